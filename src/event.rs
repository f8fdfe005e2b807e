use crate::error::Error;
use crate::frame::CloseFrame;
use crate::message::Message;
use crate::split::WSWriter;
use futures::Stream;
use rand::random;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

pub type ID = Uuid;

/// A fresh connection id, minted whenever the server accepts a client.
pub fn generate_new_uuid() -> Uuid {
    let buf = random::<[u8; 16]>();

    Uuid::new_v8(buf)
}

/// Everything the ready-made server reports back to its consumer, keyed by
/// the id handed out in `NewClient`.
pub enum Event {
    NewClient(ID, WSWriter),
    NewMessage(ID, Message),
    /// The connection ended; carries the close frame that ended it when the
    /// close handshake completed.
    Disconnect(ID, Option<CloseFrame>),
    Error(ID, Error),
}

/// The stream of server events, so the consumer never touches the underlying
/// channel directly.
pub struct EventStream {
    receiver: Receiver<Event>,
}

impl EventStream {
    pub fn new(receiver: Receiver<Event>) -> Self {
        Self { receiver }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll_recv(cx)
    }
}
