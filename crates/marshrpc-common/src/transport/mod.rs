//! marshrpc Transport Layer
//!
//! This module abstracts the duplex channel that carries payloads between a
//! client and a server.
//!
//! # Components
//!
//! - **[`Transport`]**: send a payload, receive a payload, close
//! - **[`NullTransport`]**: in-process loopback pair; payloads are moved, never serialized
//! - **[`TcpTransport`]**: tokio TCP stream with `[u32 length][payload]` framing
//! - **[`TcpListener`]**: accepts inbound TCP transports for a server
//!
//! # Pairing
//!
//! Every transport is strictly request/response: one payload out, one
//! payload back, in order. Concurrency comes from opening more transports,
//! not from interleaving calls on one.
//!
//! # Example
//!
//! ```
//! use marshrpc_common::protocol::Payload;
//! use marshrpc_common::transport::{NullTransport, Transport};
//!
//! # #[tokio::main]
//! # async fn main() -> marshrpc_common::protocol::Result<()> {
//! let (mut client, mut server) = NullTransport::pair();
//!
//! client.send(Payload::from_bytes(vec![1, 2, 3])).await?;
//! let received = server.receive().await?;
//! assert_eq!(received.as_bytes(), &[1, 2, 3]);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::protocol::error::Result;
use crate::protocol::payload::Payload;

pub mod listener;
pub mod null;
pub mod tcp;

pub use listener::TcpListener;
pub use null::NullTransport;
pub use tcp::{TcpConfig, TcpTransport, DEFAULT_MAX_FRAME_SIZE};

#[cfg(test)]
mod tests;

/// A duplex channel carrying whole payloads.
///
/// # Errors
///
/// - `TransportClosed`: the peer went away cleanly (or this side closed)
/// - `Transport`: the channel failed or delivered a broken frame
///
/// Both are fatal for the channel; callers must not reuse it afterwards.
#[async_trait]
pub trait Transport: Send {
    /// Sends one payload; ownership passes to the transport.
    async fn send(&mut self, payload: Payload) -> Result<()>;

    /// Waits for the next complete payload from the peer.
    async fn receive(&mut self) -> Result<Payload>;

    /// Closes the channel. Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;

    /// Human-readable peer description for logs.
    fn peer(&self) -> String;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, payload: Payload) -> Result<()> {
        (**self).send(payload).await
    }

    async fn receive(&mut self) -> Result<Payload> {
        (**self).receive().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }

    fn peer(&self) -> String {
        (**self).peer()
    }
}
