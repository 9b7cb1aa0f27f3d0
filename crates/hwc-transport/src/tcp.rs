//! Raw TCP socket transport.

use hwc_core::error::{TransportError, TransportResult};
use tokio::net::TcpStream;
use tracing::info;

use crate::options::TransportOptions;
use crate::stream::StreamTransport;

/// Socket transport type.
pub type SocketTransport = StreamTransport<TcpStream>;

/// Connect to `host:port`, bounded by the configured timeout.
///
/// TCP_NODELAY is set: SCPI exchanges are many tiny request/response pairs.
pub async fn connect_socket(
    host: &str,
    port: u16,
    options: &TransportOptions,
) -> TransportResult<SocketTransport> {
    let resource = format!("TCPIP0::{}::{}::SOCKET", host, port);
    let stream = tokio::time::timeout(options.timeout(), TcpStream::connect((host, port)))
        .await
        .map_err(|_| TransportError::timeout(format!("connect {}", resource), options.timeout()))??;
    stream.set_nodelay(true)?;

    info!(%resource, "socket connected");
    StreamTransport::new(resource, stream, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwc_core::transport::MessageTransport;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn query_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut line = String::new();
            socket.read_line(&mut line).await.unwrap();
            assert_eq!(line, ":SENSe:WAVelength:STARt?\n");
            socket.get_mut().write_all(b"+1.50000000E-006\n").await.unwrap();
        });

        let transport = connect_socket("127.0.0.1", port, &TransportOptions::default())
            .await
            .unwrap();
        assert_eq!(transport.resource(), format!("TCPIP0::127.0.0.1::{port}::SOCKET"));
        assert_eq!(
            transport.query(":SENSe:WAVelength:STARt?").await.unwrap(),
            "+1.50000000E-006"
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_socket("127.0.0.1", port, &TransportOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
