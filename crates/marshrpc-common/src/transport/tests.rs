//! Integration tests for the transport layer
//!
//! These tests exchange payloads over the loopback pair and over real TCP
//! sockets, including broken and oversized frames written by hand.

#[cfg(test)]
mod tests {
    use crate::protocol::{Payload, RpcError};
    use crate::transport::{NullTransport, TcpConfig, TcpListener, TcpTransport, Transport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_null_pair_exchange() {
        let (mut client, mut server) = NullTransport::pair();

        client.send(Payload::from_bytes(vec![1])).await.unwrap();
        client.send(Payload::from_bytes(vec![2])).await.unwrap();

        assert_eq!(server.receive().await.unwrap().as_bytes(), &[1]);
        assert_eq!(server.receive().await.unwrap().as_bytes(), &[2]);

        server.send(Payload::from_bytes(vec![3])).await.unwrap();
        assert_eq!(client.receive().await.unwrap().as_bytes(), &[3]);
    }

    #[tokio::test]
    async fn test_null_peer_drop_closes() {
        let (mut client, server) = NullTransport::pair();
        drop(server);

        assert!(client.is_closed());
        assert!(matches!(client.receive().await, Err(RpcError::TransportClosed)));
        assert!(matches!(
            client.send(Payload::new()).await,
            Err(RpcError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_null_close_drains_queued_payloads() {
        let (mut client, mut server) = NullTransport::pair();
        client.send(Payload::from_bytes(vec![9])).await.unwrap();
        client.close().await.unwrap();

        assert_eq!(server.receive().await.unwrap().as_bytes(), &[9]);
        assert!(matches!(server.receive().await, Err(RpcError::TransportClosed)));
    }

    async fn tcp_pair(config: TcpConfig) -> (TcpTransport, TcpTransport) {
        let listener = TcpListener::bind_with_config("127.0.0.1:0", config.clone()).await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (client, accepted) = tokio::join!(
            TcpTransport::connect_with_config(&addr, config),
            listener.accept()
        );
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn raw_pair() -> (TcpStream, TcpTransport) {
        raw_pair_with_config(TcpConfig::default()).await
    }

    async fn raw_pair_with_config(config: TcpConfig) -> (TcpStream, TcpTransport) {
        let listener = TcpListener::bind_with_config("127.0.0.1:0", config).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (raw, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (raw.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_tcp_frames_round_trip() {
        let (mut client, mut server) = tcp_pair(TcpConfig::default()).await;

        client.send(Payload::from_bytes(b"hello".to_vec())).await.unwrap();
        client.send(Payload::new()).await.unwrap();

        assert_eq!(server.receive().await.unwrap().as_bytes(), b"hello");
        assert!(server.receive().await.unwrap().is_empty());

        server.send(Payload::from_bytes(vec![42; 70_000])).await.unwrap();
        assert_eq!(client.receive().await.unwrap().len(), 70_000);
    }

    #[tokio::test]
    async fn test_tcp_frame_layout() {
        let (mut raw, mut server) = raw_pair().await;

        server.send(Payload::from_bytes(vec![7, 8])).await.unwrap();

        let mut frame = [0u8; 6];
        raw.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0, 0, 0, 2, 7, 8]);
    }

    #[tokio::test]
    async fn test_tcp_clean_close_is_transport_closed() {
        let (raw, mut server) = raw_pair().await;
        drop(raw);

        assert!(matches!(server.receive().await, Err(RpcError::TransportClosed)));
    }

    #[tokio::test]
    async fn test_tcp_eof_inside_header_is_transport_error() {
        let (mut raw, mut server) = raw_pair().await;
        raw.write_all(&[0, 0]).await.unwrap();
        raw.shutdown().await.unwrap();

        assert!(matches!(server.receive().await, Err(RpcError::Transport(_))));
    }

    #[tokio::test]
    async fn test_tcp_eof_inside_body_is_transport_error() {
        let (mut raw, mut server) = raw_pair().await;
        raw.write_all(&[0, 0, 0, 10, 1, 2, 3]).await.unwrap();
        raw.shutdown().await.unwrap();

        match server.receive().await {
            Err(RpcError::Transport(msg)) => assert!(msg.contains("inside a 10 byte frame")),
            other => panic!("Expected transport error, got {:?}", other.map(|p| p.len())),
        }
    }

    #[tokio::test]
    async fn test_tcp_oversized_frame_rejected_by_sender() {
        let config = TcpConfig::default().with_max_frame_size(16);
        let (mut client, _server) = tcp_pair(config).await;

        let err = client.send(Payload::from_bytes(vec![0; 17])).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn test_tcp_oversized_frame_rejected_by_receiver() {
        let config = TcpConfig::default().with_max_frame_size(16);
        let (mut raw, mut server) = raw_pair_with_config(config).await;

        // Header claims more than allowed; the body is never allocated
        raw.write_all(&17u32.to_be_bytes()).await.unwrap();
        match server.receive().await {
            Err(RpcError::Transport(msg)) => assert!(msg.contains("Frame too large")),
            other => panic!("Expected transport error, got {:?}", other.map(|p| p.len())),
        }
    }

    #[tokio::test]
    async fn test_boxed_transport() {
        let (client, server) = NullTransport::pair();
        let mut client: Box<dyn Transport> = Box::new(client);
        let mut server: Box<dyn Transport> = Box::new(server);

        client.send(Payload::from_bytes(vec![5])).await.unwrap();
        assert_eq!(server.receive().await.unwrap().as_bytes(), &[5]);
        assert_eq!(client.peer(), "null:client");
    }
}
