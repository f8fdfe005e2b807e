use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::random;
use sha1::{Digest, Sha1};

// The GUID every WebSocket server appends to the request key before hashing,
// from RFC 6455 section 1.3.
pub(crate) const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derives the `Sec-WebSocket-Accept` value for a request key:
/// `base64(sha1(key ++ GUID))`.
pub(crate) fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// A fresh `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
pub(crate) fn generate_websocket_key() -> String {
    let random_bytes: [u8; 16] = random();
    BASE64_STANDARD.encode(random_bytes)
}
