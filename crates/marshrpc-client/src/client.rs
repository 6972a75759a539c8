use std::sync::Arc;
use std::time::Duration;

use marshrpc_common::protocol::error::{Result, RpcError};
use marshrpc_common::protocol::{Contract, Declaration, Marshal, Payload, Request, Response};
use marshrpc_common::transport::Transport;

/// Client settings.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Upper bound on waiting for one response. `None` waits until the
    /// transport delivers a response or reports closure.
    pub call_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// Typed RPC client over a single transport.
///
/// Every call goes through [`Client::invoke`] with a [`Declaration`] from the
/// client's contract, so argument and return types are checked by the
/// compiler. `invoke` takes `&mut self`: a client has at most one call in
/// flight and responses can never be matched to the wrong request.
///
/// # Failure Semantics
///
/// - `Protocol`: the remote procedure reported an error; the client stays usable
/// - `MalformedPayload`: the response could not be decoded; only that call fails
/// - `Transport`, `TransportClosed`, `Timeout`: the client is closed, and every
///   later call returns `TransportClosed` without touching the transport
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use marshrpc_client::Client;
/// use marshrpc_common::protocol::{Contract, Declaration};
/// use marshrpc_common::transport::TcpTransport;
///
/// const ADD: Declaration<(i32, i32), i32> = Declaration::new(1, "add");
///
/// # #[tokio::main]
/// # async fn main() -> marshrpc_common::protocol::Result<()> {
/// let contract = Arc::new(Contract::builder("calculator").declare(&ADD).build()?);
/// let transport = TcpTransport::connect("127.0.0.1:7400").await?;
///
/// let mut client = Client::new(transport, contract);
/// let sum = client.invoke(&ADD, (2, 3)).await?;
/// assert_eq!(sum, 5);
/// # Ok(())
/// # }
/// ```
pub struct Client<T: Transport> {
    transport: T,
    contract: Arc<Contract>,
    config: ClientConfig,
    closed: bool,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, contract: Arc<Contract>) -> Self {
        Self::with_config(transport, contract, ClientConfig::default())
    }

    pub fn with_config(transport: T, contract: Arc<Contract>, config: ClientConfig) -> Self {
        Self {
            transport,
            contract,
            config,
            closed: false,
        }
    }

    /// Calls a remote procedure and waits for its result.
    ///
    /// # Arguments
    /// * `declaration` - The procedure to call; must be part of the client's contract
    /// * `args` - The argument tuple, in declaration order
    ///
    /// # Errors
    ///
    /// - `BadCall` if the declaration is not in the contract (nothing is sent)
    /// - `Protocol` carrying the server's error descriptor
    /// - `MalformedPayload` if the response cannot be decoded
    /// - `Transport`, `TransportClosed` or `Timeout` if the call could not complete
    pub async fn invoke<A: Marshal, R: Marshal>(&mut self, declaration: &Declaration<A, R>, args: A) -> Result<R> {
        if self.closed {
            return Err(RpcError::TransportClosed);
        }
        self.contract.check(declaration)?;

        let request = Request::encode(declaration.id(), &args)?;
        tracing::debug!(
            "Invoking {} (call id {}) over {}, {} bytes",
            declaration.name(),
            declaration.id(),
            self.transport.peer(),
            request.len()
        );

        let payload = match self.exchange(request).await {
            Ok(payload) => payload,
            Err(e) => {
                if e.is_fatal() {
                    tracing::warn!("Closing client after {} failed: {}", declaration.name(), e);
                    self.closed = true;
                }
                return Err(e);
            }
        };

        Response::<R>::decode(payload)?.into_result()
    }

    async fn exchange(&mut self, request: Payload) -> Result<Payload> {
        self.transport.send(request).await?;

        match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.receive())
                .await
                .map_err(|_| RpcError::Timeout(limit.as_millis() as u64))?,
            None => self.transport.receive().await,
        }
    }

    /// Whether a transport failure has closed this client.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn contract(&self) -> &Arc<Contract> {
        &self.contract
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Closes the underlying transport. Later calls return `TransportClosed`.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close().await
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marshrpc_common::protocol::{encode_failure, encode_success, ErrorKind, RemoteError};
    use marshrpc_common::transport::NullTransport;

    const ADD: Declaration<(i32, i32), i32> = Declaration::new(1, "add");
    const PING: Declaration<(), ()> = Declaration::new(2, "ping");
    const NOT_DECLARED: Declaration<(), ()> = Declaration::new(3, "missing");

    fn contract() -> Arc<Contract> {
        Arc::new(Contract::builder("test").declare(&ADD).declare(&PING).build().unwrap())
    }

    #[tokio::test]
    async fn test_invoke_encodes_request_and_decodes_result() {
        let (client_side, mut server_side) = NullTransport::pair();
        let mut client = Client::new(client_side, contract());

        let server = tokio::spawn(async move {
            let request = server_side.receive().await.unwrap();
            assert_eq!(request.as_bytes(), &[0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
            server_side.send(encode_success(&5i32).unwrap()).await.unwrap();
            server_side
        });

        assert_eq!(client.invoke(&ADD, (2, 3)).await.unwrap(), 5);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_undeclared_procedure_is_bad_call() {
        let (client_side, mut server_side) = NullTransport::pair();
        let mut client = Client::new(client_side, contract());

        let err = client.invoke(&NOT_DECLARED, ()).await.unwrap_err();
        assert!(matches!(err, RpcError::BadCall(_)));
        assert!(!client.is_closed());

        // Nothing reached the wire
        drop(client);
        assert!(matches!(server_side.receive().await, Err(RpcError::TransportClosed)));
    }

    #[tokio::test]
    async fn test_remote_failure_is_recoverable() {
        let (client_side, mut server_side) = NullTransport::pair();
        let mut client = Client::new(client_side, contract());

        let server = tokio::spawn(async move {
            server_side.receive().await.unwrap();
            server_side
                .send(encode_failure(&RemoteError::internal("boom")).unwrap())
                .await
                .unwrap();
            server_side.receive().await.unwrap();
            server_side.send(encode_success(&()).unwrap()).await.unwrap();
            server_side
        });

        match client.invoke(&ADD, (1, 1)).await {
            Err(RpcError::Protocol(remote)) => {
                assert_eq!(remote.kind, ErrorKind::Internal);
                assert_eq!(remote.message, "boom");
            }
            other => panic!("Expected protocol error, got {:?}", other),
        }

        client.invoke(&PING, ()).await.unwrap();
        assert!(!client.is_closed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_response_fails_only_the_call() {
        let (client_side, mut server_side) = NullTransport::pair();
        let mut client = Client::new(client_side, contract());

        let server = tokio::spawn(async move {
            server_side.receive().await.unwrap();
            // Success status with a truncated i32
            server_side.send(Payload::from_bytes(vec![0, 0, 0])).await.unwrap();
            server_side.receive().await.unwrap();
            server_side.send(encode_success(&7i32).unwrap()).await.unwrap();
            server_side
        });

        let err = client.invoke(&ADD, (3, 4)).await.unwrap_err();
        assert!(matches!(err, RpcError::MalformedPayload(_)));
        assert!(!client.is_closed());

        assert_eq!(client.invoke(&ADD, (3, 4)).await.unwrap(), 7);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_closure_poisons_client() {
        let (client_side, server_side) = NullTransport::pair();
        let mut client = Client::new(client_side, contract());
        drop(server_side);

        let err = client.invoke(&PING, ()).await.unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed));
        assert!(client.is_closed());

        let err = client.invoke(&PING, ()).await.unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let (client_side, mut server_side) = NullTransport::pair();
        let config = ClientConfig::default().with_call_timeout(Duration::from_millis(20));
        let mut client = Client::with_config(client_side, contract(), config);

        let err = client.invoke(&PING, ()).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(20)));
        assert!(client.is_closed());

        // The request did go out before the timeout
        assert!(server_side.receive().await.is_ok());
    }

    #[tokio::test]
    async fn test_close() {
        let (client_side, _server_side) = NullTransport::pair();
        let mut client = Client::new(client_side, contract());

        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(matches!(client.invoke(&PING, ()).await, Err(RpcError::TransportClosed)));

        let transport = client.into_transport();
        assert!(transport.is_closed());
    }
}
