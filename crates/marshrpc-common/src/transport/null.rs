use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::error::{Result, RpcError};
use crate::protocol::payload::Payload;
use crate::transport::Transport;

/// In-process loopback transport.
///
/// Created in connected pairs. A payload sent on one end is moved to the
/// other end as-is, which makes this transport useful for exercising
/// marshaling and dispatch without a network.
///
/// Dropping or closing one end makes the other end's `receive` return
/// `TransportClosed` once any queued payloads have been drained.
pub struct NullTransport {
    tx: Option<mpsc::UnboundedSender<Payload>>,
    rx: mpsc::UnboundedReceiver<Payload>,
    name: &'static str,
}

impl NullTransport {
    /// Creates two connected ends: `(client side, server side)`.
    pub fn pair() -> (NullTransport, NullTransport) {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();

        let client = NullTransport {
            tx: Some(client_tx),
            rx: client_rx,
            name: "null:client",
        };
        let server = NullTransport {
            tx: Some(server_tx),
            rx: server_rx,
            name: "null:server",
        };
        (client, server)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn send(&mut self, payload: Payload) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(RpcError::TransportClosed)?;
        tx.send(payload).map_err(|_| RpcError::TransportClosed)
    }

    async fn receive(&mut self) -> Result<Payload> {
        self.rx.recv().await.ok_or(RpcError::TransportClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }

    fn peer(&self) -> String {
        self.name.to_string()
    }
}
