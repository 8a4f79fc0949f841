//! Weft: a thread-pool-backed concurrency and RPC runtime.
//!
//! # Overview
//!
//! Weft provides the execution substrate for request-processing services:
//! a multi-queue work-stealing thread pool, a deadline-ordered timer
//! manager, a cancellable promise/future/continuation framework, and a
//! bidirectional RPC agent layered over any framed duplex message stream.
//! Incoming frames are demultiplexed into calls, dispatched onto the pool,
//! equipped with deadlines by the timer service, and completed through
//! futures whose continuations are re-posted through the same pool.
//!
//! # Core Guarantees
//!
//! - **Exactly-once tasks**: every task posted to a running pool executes
//!   exactly once by the time [`ThreadPool::dispose`] returns
//! - **Exactly-once futures**: a promise/future pair settles to exactly one
//!   of value, panic payload, or cancelled
//! - **At-most-once completions**: each outbound RPC call's completion runs
//!   once, whether the response, the deadline timer, or cancellation wins
//! - **Timer lower bound**: no timer task runs before its deadline
//! - **Localized frame errors**: a malformed frame is dropped without
//!   affecting other calls on the same connection
//!
//! # Module Structure
//!
//! - [`task`]: the type-erased unit of work
//! - [`executor`]: execution and deadline-timer contracts
//! - [`pool`]: bounded segments, the sharded queue, and the thread pool
//! - [`timer`]: the deadline-ordered timer manager
//! - [`future`]: promises, futures, packaged tasks, and spawn helpers
//! - [`rpc`]: status taxonomy, envelope codec, call context, and the agent
//! - [`net`]: framed duplex stream contracts consumed by the agent
//! - [`config`]: tunable knobs with validated defaults
//! - [`error`]: error types
//! - [`test_utils`]: logging and assertion helpers for tests

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod error;
pub mod executor;
pub mod future;
pub mod net;
pub mod pool;
pub mod rpc;
pub mod task;
pub mod test_utils;
pub mod timer;

pub use config::{AgentConfig, ConfigError, PoolConfig, TimerConfig};
pub use error::{FrameError, FutureError};
pub use executor::{DeadlineTimer, Executor};
pub use future::{spawn, spawn_later, when, Future, FutureStatus, PackagedTask, Promise};
pub use pool::{PoolExecutor, SubmitPolicy, ThreadPool};
pub use rpc::{CallContext, RpcAgent, Status, StatusCode};
pub use task::Task;
pub use timer::TimerManager;
