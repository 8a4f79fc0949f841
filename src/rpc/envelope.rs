//! Bit-exact envelope codec for request and response headers.
//!
//! Integers are big-endian; lengths are unsigned 32-bit. The first byte
//! (the tag) disambiguates request from response with no other state:
//!
//! ```text
//! Request:   tag=1:i8 | request_id:u64 | call_id:u32 | deadline_millis:u32 | payload
//! Response:  tag=0:i8 | request_id:u64 | status_code:i8 |
//!            error_message:u32-len + utf8 | error_details:u32-len + utf8 | payload
//! ```
//!
//! Decoding rejects any record where a length prefix would overrun the
//! buffer or where the status code is outside the enumerated range. Any
//! bytes beyond the declared fields are the payload.

use super::status::{Status, StatusCode};
use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};

/// Tag byte opening every request envelope.
pub const TAG_REQUEST: i8 = 1;
/// Tag byte opening every response envelope.
pub const TAG_RESPONSE: i8 = 0;

/// Fixed size of the request header.
pub const REQUEST_HEADER_LEN: usize = 17;
/// Minimum size of the response header (empty message and details).
pub const RESPONSE_HEADER_MIN_LEN: usize = 1 + 8 + 1 + 4 + 4;

/// A decoded request header and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    /// Correlates the response back to the caller.
    pub request_id: u64,
    /// Which handler serves the call.
    pub call_id: u32,
    /// Milliseconds the caller will wait; zero means no deadline.
    pub deadline_millis: u32,
    /// The serialized call parameters.
    pub payload: Bytes,
}

/// A decoded response header and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    /// Correlates with the originating request.
    pub request_id: u64,
    /// The server's verdict.
    pub status: Status,
    /// The serialized response value.
    pub payload: Bytes,
}

/// Appends a request header to `dst`.
pub fn encode_request_header(dst: &mut BytesMut, request_id: u64, call_id: u32, deadline_millis: u32) {
    dst.reserve(REQUEST_HEADER_LEN);
    dst.put_i8(TAG_REQUEST);
    dst.put_u64(request_id);
    dst.put_u32(call_id);
    dst.put_u32(deadline_millis);
}

/// Appends a response header to `dst`.
///
/// Fails when the status message or details exceed the u32 length prefix.
pub fn encode_response_header(
    dst: &mut BytesMut,
    request_id: u64,
    status: &Status,
) -> Result<(), FrameError> {
    let message = status.message().as_bytes();
    let details = status.details().as_bytes();
    if u32::try_from(message.len()).is_err() || u32::try_from(details.len()).is_err() {
        return Err(FrameError::FieldTooLarge);
    }
    dst.reserve(RESPONSE_HEADER_MIN_LEN + message.len() + details.len());
    dst.put_i8(TAG_RESPONSE);
    dst.put_u64(request_id);
    dst.put_i8(status.code().as_i8());
    dst.put_u32(message.len() as u32);
    dst.extend_from_slice(message);
    dst.put_u32(details.len() as u32);
    dst.extend_from_slice(details);
    Ok(())
}

/// Little decode cursor over a shared buffer.
struct Cursor<'a> {
    buf: &'a Bytes,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a Bytes) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(FrameError::Truncated)?;
        let slice = &self.buf[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_i8(&mut self) -> Result<i8, FrameError> {
        let bytes = self.take(1)?;
        Ok(bytes[0] as i8)
    }

    fn read_u32(&mut self) -> Result<u32, FrameError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(
            bytes.try_into().map_err(|_| FrameError::Truncated)?,
        ))
    }

    fn read_u64(&mut self) -> Result<u64, FrameError> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(
            bytes.try_into().map_err(|_| FrameError::Truncated)?,
        ))
    }

    /// Reads a u32-length-prefixed UTF-8 string.
    fn read_string(&mut self) -> Result<String, FrameError> {
        let length = self.read_u32()? as usize;
        let fits = self
            .offset
            .checked_add(length)
            .is_some_and(|end| end <= self.buf.len());
        if !fits {
            return Err(FrameError::LengthOverrun);
        }
        let bytes = self.take(length)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::BadUtf8)
    }

    /// The remainder of the buffer as a zero-copy slice.
    fn rest(&self) -> Bytes {
        self.buf.slice(self.offset..)
    }
}

/// Decodes a request envelope.
pub fn decode_request(src: &Bytes) -> Result<RequestEnvelope, FrameError> {
    let mut cursor = Cursor::new(src);
    let tag = cursor.read_i8()?;
    if tag != TAG_REQUEST {
        return Err(FrameError::BadTag(tag));
    }
    let request_id = cursor.read_u64()?;
    let call_id = cursor.read_u32()?;
    let deadline_millis = cursor.read_u32()?;
    Ok(RequestEnvelope {
        request_id,
        call_id,
        deadline_millis,
        payload: cursor.rest(),
    })
}

/// Decodes a response envelope.
pub fn decode_response(src: &Bytes) -> Result<ResponseEnvelope, FrameError> {
    let mut cursor = Cursor::new(src);
    let tag = cursor.read_i8()?;
    if tag != TAG_RESPONSE {
        return Err(FrameError::BadTag(tag));
    }
    let request_id = cursor.read_u64()?;
    let raw_code = cursor.read_i8()?;
    let code = StatusCode::from_i8(raw_code).ok_or(FrameError::BadStatusCode(raw_code))?;
    let message = cursor.read_string()?;
    let details = cursor.read_string()?;
    Ok(ResponseEnvelope {
        request_id,
        status: Status::with_details(code, message, details),
        payload: cursor.rest(),
    })
}
