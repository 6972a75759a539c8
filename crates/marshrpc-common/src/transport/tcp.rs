use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::error::{Result, RpcError};
use crate::protocol::payload::Payload;
use crate::transport::Transport;

/// Default largest accepted frame (100 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Default timeout for establishing a connection (5 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const FRAME_HEADER_SIZE: usize = 4;

/// TCP transport settings.
///
/// # Default Configuration
///
/// - `connect_timeout`: 5 seconds
/// - `max_frame_size`: 100 MB
/// - `nodelay`: true
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Time allowed for each connection attempt
    pub connect_timeout: Duration,
    /// Largest frame accepted or sent; bigger frames are a transport error
    pub max_frame_size: usize,
    /// Whether to disable Nagle's algorithm on the socket
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
        }
    }
}

impl TcpConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// TCP transport over a single tokio stream.
///
/// # Wire Protocol
///
/// Each payload travels as one frame, written with a single write call:
///
/// ```text
/// [4-byte length as u32 big-endian] [payload bytes]
/// ```
///
/// The receiver reads the length first, so it always knows exactly how many
/// bytes belong to the payload before decoding starts.
///
/// # Closure
///
/// - EOF before any header byte: `TransportClosed`
/// - EOF inside a header or body: `Transport` error (never a short payload)
/// - header larger than `max_frame_size`: `Transport` error
///
/// # Example
///
/// ```no_run
/// use marshrpc_common::protocol::Payload;
/// use marshrpc_common::transport::{TcpTransport, Transport};
///
/// # #[tokio::main]
/// # async fn main() -> marshrpc_common::protocol::Result<()> {
/// let mut transport = TcpTransport::connect("127.0.0.1:7400").await?;
/// transport.send(Payload::from_bytes(vec![0, 0, 0, 1])).await?;
/// let response = transport.receive().await?;
/// # Ok(())
/// # }
/// ```
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    config: TcpConfig,
}

impl TcpTransport {
    /// Connects to a remote endpoint with the default configuration.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_config(addr, TcpConfig::default()).await
    }

    /// Connects to a remote endpoint.
    ///
    /// The address may resolve to several socket addresses; each is tried in
    /// turn until one connects within `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error if the address cannot be resolved or
    /// every connection attempt fails.
    pub async fn connect_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let socket_addrs = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| RpcError::Transport(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(config.connect_timeout, TcpStream::connect(socket_addr)).await {
                Ok(Ok(stream)) => {
                    tracing::debug!("Connected to {}", socket_addr);
                    return Self::from_stream(stream, config);
                }
                Ok(Err(e)) => {
                    tracing::debug!("Connection attempt to {} failed: {}", socket_addr, e);
                    last_err = Some(e.to_string());
                }
                Err(_) => {
                    last_err = Some(format!("timed out after {}ms", config.connect_timeout.as_millis()))
                }
            }
        }

        Err(RpcError::Transport(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err.unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream, config: TcpConfig) -> Result<Self> {
        let peer = stream.peer_addr()?;
        if config.nodelay {
            stream.set_nodelay(true)?;
        }

        Ok(Self { stream, peer, config })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Reads the frame header, telling a clean close apart from a cut header.
    async fn read_header(&mut self) -> Result<usize> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        let mut filled = 0;

        while filled < FRAME_HEADER_SIZE {
            let n = self
                .stream
                .read(&mut header[filled..])
                .await
                .map_err(|e| map_io_error(e, "reading frame header"))?;
            if n == 0 {
                if filled == 0 {
                    return Err(RpcError::TransportClosed);
                }
                return Err(RpcError::Transport(format!(
                    "Peer closed after {} of {} frame header bytes",
                    filled, FRAME_HEADER_SIZE
                )));
            }
            filled += n;
        }

        Ok(u32::from_be_bytes(header) as usize)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, payload: Payload) -> Result<()> {
        let body = payload.into_bytes();
        if body.len() > self.config.max_frame_size {
            return Err(RpcError::Transport(format!(
                "Frame too large: {} bytes (max {} bytes)",
                body.len(),
                self.config.max_frame_size
            )));
        }
        let len = u32::try_from(body.len())
            .map_err(|_| RpcError::Transport(format!("Frame length {} does not fit in u32", body.len())))?;

        // Header and body go out in one write
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&body);

        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| map_io_error(e, "writing frame"))?;
        self.stream
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<Payload> {
        let len = self.read_header().await?;

        // Validate length to prevent allocation of excessively large buffers
        if len > self.config.max_frame_size {
            return Err(RpcError::Transport(format!(
                "Frame too large: {} bytes (max {} bytes)",
                len, self.config.max_frame_size
            )));
        }

        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                RpcError::Transport(format!("Peer closed inside a {} byte frame", len))
            } else {
                map_io_error(e, "reading frame body")
            }
        })?;

        Ok(Payload::from_bytes(buf))
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(map_io_error(e, "shutting down stream")),
        }
    }

    fn peer(&self) -> String {
        format!("tcp:{}", self.peer)
    }
}

/// Map IO errors to transport-level RpcError variants
///
/// - Connection reset/aborted/broken pipe -> `TransportClosed`
/// - Everything else -> `Transport` with context
fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::BrokenPipe => RpcError::TransportClosed,
        _ => RpcError::Transport(format!("{}: {}", context, err)),
    }
}
