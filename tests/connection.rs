use futures::StreamExt;
use socket_wave::config::{ClientConfig, WebSocketConfig};
use socket_wave::deflate::{DeflateFactory, DeflateOptions};
use socket_wave::error::Error;
use socket_wave::handshake::{
    accept_async, accept_async_with_config, connect, connect_async, serve_async, UpgradeDecision,
};
use socket_wave::{CloseCode, Message, WaveStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn bound_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

/// Reads an HTTP head byte-wise off a raw socket, stopping at the blank line.
async fn read_http_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Reads server-to-client frames (which are unmasked and small in these
/// tests) until a close frame shows up, returning its payload.
async fn read_until_close_frame(stream: &mut TcpStream) -> Vec<u8> {
    loop {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await.unwrap();
        let opcode = header[0] & 0x0F;
        let length = (header[1] & 0x7F) as usize;
        let mut payload = vec![0u8; length];
        stream.read_exact(&mut payload).await.unwrap();
        if opcode == 0x8 {
            return payload;
        }
    }
}

fn upgrade_request(host: &str) -> String {
    format!(
        "GET / HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        host
    )
}

#[tokio::test]
async fn happy_echo() {
    let (listener, addr) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let connection = accept_async(stream).await.unwrap();
        connection
            .run(|mut reader, mut writer| async move {
                let message = reader.next().await.unwrap()?;
                writer.send_message(message).await?;
                Ok(())
            })
            .await
            .unwrap()
    });

    let client_close = connect(
        &format!("ws://{}", addr),
        None,
        |mut reader, mut writer| async move {
            writer.send_as_text("hi".to_string()).await?;
            let echo = reader.next().await.unwrap()?;
            assert_eq!(echo, Message::Text("hi".to_string()));
            Ok(())
        },
    )
    .await
    .unwrap();

    let server_close = server.await.unwrap();
    assert_eq!(client_close.map(|frame| frame.code), Some(CloseCode::Normal));
    assert_eq!(server_close.map(|frame| frame.code), Some(CloseCode::Normal));
}

#[tokio::test]
async fn fragmented_binary_reassembly() {
    let (listener, addr) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let connection = accept_async(stream).await.unwrap();
        let (mut reader, mut writer) = connection.split();

        let message = reader.next_message(64).await.unwrap().unwrap();
        assert_eq!(message, Message::Binary(vec![7u8; 16]));

        writer.close_connection().await.unwrap();
        while reader.next().await.is_some() {}
    });

    let connection = connect_async(&format!("ws://{}", addr)).await.unwrap();
    let (mut reader, mut writer) = connection.split();

    writer.send_binary(vec![7u8; 3], false).await.unwrap();
    writer.send_continuation(vec![7u8; 5], false).await.unwrap();
    writer.send_continuation(vec![7u8; 8], true).await.unwrap();

    // run the close handshake out
    while reader.next().await.is_some() {}
    assert_eq!(
        reader.close_frame().map(|frame| frame.code),
        Some(CloseCode::Normal)
    );

    server.await.unwrap();
}

#[tokio::test]
async fn ping_timeout_closes_1001() {
    let (listener, addr) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut config = WebSocketConfig::server_default();
        config.auto_ping = Some(Duration::from_millis(100));
        let connection = accept_async_with_config(WaveStream::Plain(stream), Some(config))
            .await
            .unwrap();
        connection
            .run(|mut reader, _writer| async move {
                while reader.next().await.is_some() {}
                Ok(())
            })
            .await
            .unwrap()
    });

    // a client that completes the handshake but never answers pings
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream
        .write_all(upgrade_request(&addr).as_bytes())
        .await
        .unwrap();
    let head = read_http_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101"));

    let close_payload = read_until_close_frame(&mut stream).await;
    assert_eq!(
        u16::from_be_bytes([close_payload[0], close_payload[1]]),
        1001
    );
    assert_eq!(&close_payload[2..], b"Ping timeout");
    drop(stream);

    let server_close = server.await.unwrap().unwrap();
    assert_eq!(server_close.code, CloseCode::Away);
    assert_eq!(server_close.reason, "Ping timeout");
}

#[tokio::test]
async fn deflate_round_trip() {
    let (listener, addr) = bound_listener().await;

    let options = DeflateOptions {
        client_no_context_takeover: true,
        server_no_context_takeover: true,
        ..Default::default()
    };

    let server_options = options.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut config = WebSocketConfig::server_default();
        config.extensions = vec![Arc::new(DeflateFactory::new(server_options).unwrap())];
        let connection = accept_async_with_config(WaveStream::Plain(stream), Some(config))
            .await
            .unwrap();
        connection
            .run(|mut reader, mut writer| async move {
                let message = reader.next().await.unwrap()?;
                writer.send_message(message).await?;
                Ok(())
            })
            .await
            .unwrap()
    });

    let mut client_config = ClientConfig::default();
    client_config.web_socket_config.extensions =
        vec![Arc::new(DeflateFactory::new(options).unwrap())];

    let payload: String = "compressible payload ".repeat(50);
    assert!(payload.len() >= 1024);

    let sent = payload.clone();
    let client_close = connect(
        &format!("ws://{}", addr),
        Some(client_config),
        move |mut reader, mut writer| async move {
            writer.send_as_text(sent.clone()).await?;
            let echo = reader.next().await.unwrap()?;
            assert_eq!(echo, Message::Text(sent));
            Ok(())
        },
    )
    .await
    .unwrap();

    assert_eq!(client_close.map(|frame| frame.code), Some(CloseCode::Normal));
    server.await.unwrap();
}

#[tokio::test]
async fn deflate_round_trip_with_window_bounds() {
    let (listener, addr) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut config = WebSocketConfig::server_default();
        config.extensions =
            vec![Arc::new(DeflateFactory::new(DeflateOptions::default()).unwrap())];
        let connection = accept_async_with_config(WaveStream::Plain(stream), Some(config))
            .await
            .unwrap();
        connection
            .run(|mut reader, mut writer| async move {
                let message = reader.next().await.unwrap()?;
                writer.send_message(message).await?;
                Ok(())
            })
            .await
            .unwrap()
    });

    // bounded sliding windows on both directions; the echoed bounds drive
    // the negotiated streams on each side
    let options = DeflateOptions {
        client_max_window: Some(9),
        server_max_window: Some(10),
        ..Default::default()
    };
    let mut client_config = ClientConfig::default();
    client_config.web_socket_config.extensions =
        vec![Arc::new(DeflateFactory::new(options).unwrap())];

    let payload: String = "window bounded either way ".repeat(60);
    let sent = payload.clone();
    let client_close = connect(
        &format!("ws://{}", addr),
        Some(client_config),
        move |mut reader, mut writer| async move {
            writer.send_as_text(sent.clone()).await?;
            let echo = reader.next().await.unwrap()?;
            assert_eq!(echo, Message::Text(sent));
            Ok(())
        },
    )
    .await
    .unwrap();

    assert_eq!(client_close.map(|frame| frame.code), Some(CloseCode::Normal));
    server.await.unwrap();
}

#[tokio::test]
async fn oversized_frame_closes_1009() {
    let (listener, addr) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut config = WebSocketConfig::server_default();
        config.max_frame_size = Some(1024);
        let connection = accept_async_with_config(WaveStream::Plain(stream), Some(config))
            .await
            .unwrap();
        connection
            .run(|mut reader, _writer| async move {
                // the oversized frame surfaces as an error, never as data
                match reader.next().await {
                    Some(Err(Error::MaxFrameSize)) => {}
                    other => panic!("expected frame-size error, got {:?}", other.is_some()),
                }
                assert!(reader.next().await.is_none());
                Ok(())
            })
            .await
            .unwrap()
    });

    let connection = connect_async(&format!("ws://{}", addr)).await.unwrap();
    let (mut reader, mut writer) = connection.split();

    writer.send_binary(vec![0u8; 4096], true).await.unwrap();
    while reader.next().await.is_some() {}

    assert_eq!(
        reader.close_frame().map(|frame| frame.code),
        Some(CloseCode::Size)
    );

    let server_close = server.await.unwrap().unwrap();
    assert_eq!(server_close.code, CloseCode::Size);
}

#[tokio::test]
async fn accept_key_mismatch_fails_upgrade() {
    let (listener, addr) = bound_listener().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_http_head(&mut stream).await;
        stream
            .write_all(
                b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\n\
                  Upgrade: websocket\r\nSec-WebSocket-Accept: AAAAAAAAAAAAAAAAAAAAAAAAAAA=\r\n\r\n",
            )
            .await
            .unwrap();
    });

    let result = connect_async(&format!("ws://{}", addr)).await;
    assert!(matches!(result, Err(Error::InvalidAcceptKey)));
}

#[tokio::test]
async fn redirect_is_surfaced_to_the_caller() {
    let (listener, addr) = bound_listener().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_http_head(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 302 Found\r\nLocation: ws://other.example/\r\n\r\n")
            .await
            .unwrap();
    });

    match connect_async(&format!("ws://{}", addr)).await {
        Err(Error::RequestRedirected(location)) => assert_eq!(location, "ws://other.example/"),
        other => panic!("expected redirect error, got {:?}", other.is_ok()),
    }
}

#[tokio::test]
async fn declined_upgrade_answers_http() {
    let (listener, addr) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_async(
            stream,
            None,
            |_request| UpgradeDecision::DontUpgrade {
                status: 405,
                reason: "Method Not Allowed".to_string(),
            },
            |_reader, _writer| async move { Ok(()) },
        )
        .await
        .unwrap()
    });

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream
        .write_all(upgrade_request(&addr).as_bytes())
        .await
        .unwrap();
    let head = read_http_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 405 Method Not Allowed"));

    assert!(server.await.unwrap().is_none());
}
