//! Address dispatch through `hwc_transport::open`.

use hwc_core::completion::wait_until_complete;
use hwc_core::error::TransportError;
use hwc_core::transport::MessageTransport;
use hwc_transport::{open, TransportOptions};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

#[tokio::test]
async fn empty_address_is_rejected() {
    let err = open("", &TransportOptions::default()).await.err().unwrap();
    assert!(matches!(err, TransportError::InvalidResource(_)));
}

#[cfg(not(feature = "instrument_visa"))]
#[tokio::test]
async fn visa_address_without_feature_is_unsupported() {
    let err = open("GPIB0::1::INSTR", &TransportOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TransportError::Unsupported(_)));
}

/// A socket instrument that reports busy twice before completing.
#[tokio::test]
async fn completion_wait_over_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut socket = BufReader::new(socket);
        let mut polls = 0;
        let mut line = String::new();
        while socket.read_line(&mut line).await.unwrap() > 0 {
            if line.trim() == "*OPC?" {
                polls += 1;
                let reply: &[u8] = if polls < 3 { b"0\n" } else { b"1\n" };
                socket.get_mut().write_all(reply).await.unwrap();
            }
            line.clear();
        }
        polls
    });

    let transport = open(
        &format!("TCPIP0::127.0.0.1::{port}::SOCKET"),
        &TransportOptions::default(),
    )
    .await
    .unwrap();

    transport.write(":INITiate:IMMediate").await.unwrap();
    wait_until_complete(&transport, Duration::from_millis(5))
        .await
        .unwrap();
    transport.close().await.unwrap();

    assert_eq!(server.await.unwrap(), 3);
}
