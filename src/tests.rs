use crate::config::ClientConfig;
use crate::deflate::{DeflateFactory, DeflateOptions};
use crate::frame::{Frame, OpCode};
use crate::request::build_upgrade_request;
use crate::utils::generate_websocket_accept_value;
use std::sync::Arc;

#[test]
fn test_opcode() {
    let byte = 0x0;
    let res = OpCode::from(byte).unwrap();
    assert_eq!(res, OpCode::Continue);

    let opcode = OpCode::Text;
    let op_byte = opcode.as_u8();
    assert_eq!(op_byte, 0x1);

    assert!(OpCode::Close.is_control());
    assert!(!OpCode::Text.is_control());

    // 0x3..=0x7 and 0xB..=0xF are reserved
    assert!(OpCode::from(0x3).is_err());
    assert!(OpCode::from(0xF).is_err());
}

#[test]
fn test_frame() {
    let frame = Frame::data(OpCode::Text, b"hello".to_vec(), false);

    assert!(!frame.final_fragment);
    assert!(!frame.rsv1);
    assert_eq!(frame.opcode, OpCode::Text);
    assert_eq!(frame.mask_key, None);
    assert_eq!(frame.payload, b"hello");
}

#[test]
fn test_accept_value_rfc_vector() {
    // the worked example from RFC 6455 section 1.3
    assert_eq!(
        generate_websocket_accept_value("dGhlIHNhbXBsZSBub25jZQ=="),
        "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
    );
}

#[test]
fn test_upgrade_request_valid() {
    let target = build_upgrade_request(
        "ws://localhost:8080",
        "dGhlIHNhbXBsZSBub25jZQ==",
        &ClientConfig::default(),
    )
    .unwrap();

    assert_eq!(target.host_with_port, "localhost:8080");
    assert_eq!(target.domain, "localhost");
    assert!(!target.use_tls);
    assert!(target.request.starts_with("GET / HTTP/1.1"));
    assert!(target.request.contains("Host: localhost:8080"));
    assert!(target.request.contains("Connection: Upgrade"));
    assert!(target.request.contains("Upgrade: websocket"));
    assert!(target
        .request
        .contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ=="));
    assert!(target.request.contains("Sec-WebSocket-Version: 13"));
    assert!(target.request.contains("Content-Length: 0"));
    assert!(target.request.ends_with("\r\n\r\n"));
}

#[test]
fn test_upgrade_request_default_port_elided() {
    // port 80 is the ws default, so the Host header carries none
    let target = build_upgrade_request(
        "ws://example.com:80/chat",
        "dGhlIHNhbXBsZSBub25jZQ==",
        &ClientConfig::default(),
    )
    .unwrap();

    assert!(target.request.contains("Host: example.com\r\n"));
    assert_eq!(target.host_with_port, "example.com:80");

    let target = build_upgrade_request(
        "wss://example.com/chat",
        "dGhlIHNhbXBsZSBub25jZQ==",
        &ClientConfig::default(),
    )
    .unwrap();

    assert!(target.use_tls);
    assert_eq!(target.host_with_port, "example.com:443");
    assert!(target.request.contains("Host: example.com\r\n"));
}

#[test]
fn test_upgrade_request_path_and_query() {
    let target = build_upgrade_request(
        "ws://localhost:9001/runCase?case=5&agent=socket-wave",
        "dGhlIHNhbXBsZSBub25jZQ==",
        &ClientConfig::default(),
    )
    .unwrap();

    assert!(target
        .request
        .starts_with("GET /runCase?case=5&agent=socket-wave HTTP/1.1"));
}

#[test]
fn test_upgrade_request_invalid_scheme() {
    let result = build_upgrade_request(
        "ftp://localhost:8080",
        "dGhlIHNhbXBsZSBub25jZQ==",
        &ClientConfig::default(),
    );
    assert!(result.is_err());
}

#[test]
fn test_upgrade_request_no_host() {
    let result = build_upgrade_request(
        "ws://:8080",
        "dGhlIHNhbXBsZSBub25jZQ==",
        &ClientConfig::default(),
    );
    assert!(result.is_err());
}

#[test]
fn test_upgrade_request_http_schemes_accepted() {
    assert!(build_upgrade_request(
        "http://localhost:8080",
        "dGhlIHNhbXBsZSBub25jZQ==",
        &ClientConfig::default()
    )
    .is_ok());
    let target = build_upgrade_request(
        "https://localhost",
        "dGhlIHNhbXBsZSBub25jZQ==",
        &ClientConfig::default(),
    )
    .unwrap();
    assert!(target.use_tls);
    assert_eq!(target.host_with_port, "localhost:443");
}

#[test]
fn test_upgrade_request_extension_offer() {
    let mut config = ClientConfig::default();
    config.web_socket_config.extensions =
        vec![Arc::new(DeflateFactory::new(DeflateOptions::default()).unwrap())];

    let target =
        build_upgrade_request("ws://localhost:8080", "dGhlIHNhbXBsZSBub25jZQ==", &config).unwrap();

    assert!(target
        .request
        .contains("Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits"));
}

#[test]
fn test_upgrade_request_caller_headers_win() {
    let mut config = ClientConfig::default();
    config.additional_headers = vec![
        ("Authorization".to_string(), "Bearer token".to_string()),
        ("User-Agent".to_string(), "socket-wave".to_string()),
        // the caller has the final say, even over generated headers
        ("Sec-WebSocket-Version".to_string(), "13".to_string()),
    ];

    let target =
        build_upgrade_request("ws://localhost:8080", "dGhlIHNhbXBsZSBub25jZQ==", &config).unwrap();

    assert!(target.request.contains("Authorization: Bearer token"));
    assert!(target.request.contains("User-Agent: socket-wave"));
    assert_eq!(target.request.matches("Sec-WebSocket-Version").count(), 1);
}
