//! Request and response wire messages.
//!
//! # Wire Format
//!
//! ```text
//! Request:  [call_id: u32] [arg_1] ... [arg_n]
//! Response: [status: u8]   [result | error descriptor]
//! ```
//!
//! A success response carries exactly the encoded return value (no bytes for
//! a `()` return). A failure response carries a [`RemoteError`].

use crate::protocol::error::{CallId, RemoteError, Result, RpcError};
use crate::protocol::marshal::Marshal;
use crate::protocol::payload::Payload;

crate::marshal_enum! {
    /// Outcome byte at the start of every response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Status: u8 {
        Success = 0,
        Failure = 1,
    }
}

/// A decoded request header with its still-encoded arguments.
///
/// The `args` payload's read cursor sits on the first argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub call_id: CallId,
    pub args: Payload,
}

impl Request {
    /// Builds a request payload: call id followed by the argument tuple.
    pub fn encode<A: Marshal>(call_id: CallId, args: &A) -> Result<Payload> {
        let mut payload = Payload::with_capacity(4 + A::MIN_WIRE_SIZE);
        call_id.encode(&mut payload)?;
        args.encode(&mut payload)?;
        Ok(payload)
    }

    /// Reads the call id from a received payload.
    pub fn decode(mut payload: Payload) -> Result<Self> {
        let call_id = CallId::decode(&mut payload)?;
        Ok(Self { call_id, args: payload })
    }

    /// Decodes the argument tuple, rejecting trailing bytes.
    pub fn decode_args<A: Marshal>(&mut self) -> Result<A> {
        let args = A::decode(&mut self.args)?;
        self.args.finish()?;
        Ok(args)
    }
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq)]
pub enum Response<R> {
    Success(R),
    Failure(RemoteError),
}

impl<R: Marshal> Response<R> {
    pub fn encode(&self) -> Result<Payload> {
        match self {
            Response::Success(value) => encode_success(value),
            Response::Failure(error) => encode_failure(error),
        }
    }

    /// Parses a response payload.
    ///
    /// # Errors
    ///
    /// Any framing problem (bad status byte, truncated or trailing data) is
    /// reported as `MalformedPayload`. A well-formed failure response is not
    /// an error at this level; it decodes to [`Response::Failure`].
    pub fn decode(payload: Payload) -> Result<Self> {
        Self::decode_fields(payload).map_err(|e| match e {
            RpcError::TruncatedPayload { needed, remaining } => RpcError::MalformedPayload(format!(
                "response truncated: needed {} bytes, {} remaining",
                needed, remaining
            )),
            other => other,
        })
    }

    fn decode_fields(mut payload: Payload) -> Result<Self> {
        let response = match Status::decode(&mut payload)? {
            Status::Success => Response::Success(R::decode(&mut payload)?),
            Status::Failure => Response::Failure(RemoteError::decode(&mut payload)?),
        };
        payload.finish()?;
        Ok(response)
    }

    /// Converts a failure into [`RpcError::Protocol`].
    pub fn into_result(self) -> Result<R> {
        match self {
            Response::Success(value) => Ok(value),
            Response::Failure(error) => Err(RpcError::Protocol(error)),
        }
    }
}

/// Builds a success response payload around an encoded return value.
pub fn encode_success<R: Marshal>(value: &R) -> Result<Payload> {
    let mut payload = Payload::with_capacity(1 + R::MIN_WIRE_SIZE);
    Status::Success.encode(&mut payload)?;
    value.encode(&mut payload)?;
    Ok(payload)
}

/// Builds a failure response payload carrying an error descriptor.
pub fn encode_failure(error: &RemoteError) -> Result<Payload> {
    let mut payload = Payload::with_capacity(1 + RemoteError::MIN_WIRE_SIZE + error.message.len());
    Status::Failure.encode(&mut payload)?;
    error.encode(&mut payload)?;
    Ok(payload)
}
