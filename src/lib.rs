//! Async WebSocket endpoint library for the Tokio stack.
//!
//! This crate implements both roles of the [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455):
//! clients connect with [`handshake::connect_async`] (or the handler-driven
//! [`handshake::connect`]), servers accept with [`handshake::accept_async`]
//! or register an upgrade decision through [`handshake::serve_async`]. Either
//! way the upgrade produces a [`WSConnection`] whose lifetime is
//! governed by a close/ping state machine, with optional automatic liveness
//! pings and graceful close handshakes on both sides.
//!
//! Frame payloads can be compressed with the permessage-deflate extension
//! ([RFC 7692](https://datatracker.ietf.org/doc/html/rfc7692)) by registering
//! a [`deflate::DeflateFactory`] in the configuration; the extension pipeline
//! is open, so other per-frame transforms can plug into the same seam.

pub mod config;
mod connection;
mod decoder;
pub mod deflate;
mod encoder;
pub mod error;
pub mod event;
pub mod extensions;
pub mod frame;
pub mod handshake;
pub mod message;
mod read;
mod request;
pub mod server;
pub mod split;
pub mod state;
mod stream;
#[cfg(test)]
mod tests;
mod utils;
mod write;

pub use connection::WSConnection;
pub use frame::{CloseCode, CloseFrame, Frame, OpCode};
pub use message::Message;
pub use request::{HttpRequest, HttpResponse};
pub use split::{WSReader, WSWriter};
pub use stream::WaveStream;
