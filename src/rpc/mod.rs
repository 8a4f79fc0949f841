//! RPC over a framed duplex stream: status taxonomy, envelope codec, call
//! context, and the bidirectional agent.

pub mod agent;
pub mod context;
pub mod envelope;
pub mod status;

pub use self::agent::{CallHandler, RpcAgent, RpcCompletion};
pub use self::context::CallContext;
pub use self::envelope::{RequestEnvelope, ResponseEnvelope};
pub use self::status::{Status, StatusCode};
