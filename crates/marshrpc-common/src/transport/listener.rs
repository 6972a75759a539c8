use std::net::SocketAddr;

use crate::protocol::error::{Result, RpcError};
use crate::transport::tcp::{TcpConfig, TcpTransport};

/// Accepts inbound TCP connections as [`TcpTransport`]s.
///
/// The accept loop itself lives in the server; this type only binds the
/// socket and applies the transport configuration to every accepted stream.
pub struct TcpListener {
    listener: tokio::net::TcpListener,
    config: TcpConfig,
}

impl TcpListener {
    /// Binds to the specified address with the default transport configuration.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g., "0.0.0.0:7400")
    pub async fn bind(bind_addr: &str) -> Result<Self> {
        Self::bind_with_config(bind_addr, TcpConfig::default()).await
    }

    pub async fn bind_with_config(bind_addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        tracing::info!("TCP listener bound to {}", bind_addr);

        Ok(Self { listener, config })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for the next inbound connection.
    pub async fn accept(&self) -> Result<(TcpTransport, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to accept connection: {}", e)))?;

        tracing::debug!("Accepted connection from {}", peer_addr);
        let transport = TcpTransport::from_stream(stream, self.config.clone())?;
        Ok((transport, peer_addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_creation() {
        let listener = TcpListener::bind("127.0.0.1:0").await;
        assert!(listener.is_ok());
    }

    #[tokio::test]
    async fn test_listener_local_addr() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_invalid_address_fails() {
        let result = TcpListener::bind("256.0.0.1:0").await;
        assert!(matches!(result, Err(RpcError::Transport(_))));
    }
}
