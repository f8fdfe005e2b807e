use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::extensions::{ExtensionStack, WebSocketExtension};
use crate::frame::{CloseCode, CloseFrame, Frame, OpCode};
use crate::message::Message;
use crate::read::ReadStream;
use crate::split::{WSReader, WSWriter};
use crate::state::{Action, WebSocketState};
use crate::stream::WaveStream;
use crate::write::{Writer, WriterKind};
use futures::Stream;
use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use tokio::io::{BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

const READ_CHANNEL_CAPACITY: usize = 100;

/// One live WebSocket connection after a successful upgrade, usable directly
/// as a `Stream` of messages with writer methods, splittable into its two
/// halves, or driven to completion with [`WSConnection::run`].
///
/// Behind it run the connection's tasks: the inbound loop owning the
/// transport read side and, when auto-ping is configured, the liveness task.
/// Both coordinate through the shared state machine, which serializes close
/// emission.
pub struct WSConnection {
    reader: WSReader,
    writer: WSWriter,
    state: Arc<StdMutex<WebSocketState>>,
    read_handle: JoinHandle<()>,
}

impl WSConnection {
    /// Splits into the reader and writer halves so inbound processing can
    /// run on its own task while another writes.
    pub fn split(self) -> (WSReader, WSWriter) {
        (self.reader, self.writer)
    }

    /// The close frame that ended the connection, once it has.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.state.lock().unwrap().close_frame()
    }

    /// Hands the connection to a data handler and drives it for the rest of
    /// its life. When the handler returns cleanly this side initiates a
    /// normal closure; when it fails the connection closes with 1011 and the
    /// error comes back to the caller. Either way the close handshake runs
    /// out before the terminal close frame is returned.
    pub async fn run<H, Fut>(self, handler: H) -> Result<Option<CloseFrame>, Error>
    where
        H: FnOnce(WSReader, WSWriter) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        let WSConnection {
            reader,
            writer,
            state,
            read_handle,
        } = self;

        let mut closer = writer.clone();
        let result = handler(reader, writer).await;

        match &result {
            Ok(()) => {
                let _ = closer.close(CloseCode::Normal, "").await;
            }
            Err(err) => {
                debug!("data handler failed: {}", err);
                let _ = closer.close(CloseCode::Error, "").await;
            }
        }

        // the inbound task finishes once the peer's close (or its FIN)
        // arrives, which completes the handshake
        let _ = read_handle.await;

        let close_frame = state.lock().unwrap().close_frame();
        result.map(|_| close_frame)
    }

    // Delegated writer methods, so short-lived uses don't have to split.

    pub async fn send_message(&mut self, message: Message) -> Result<(), Error> {
        self.writer.send_message(message).await
    }

    pub async fn send(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.writer.send(data).await
    }

    pub async fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.writer.send_as_binary(data).await
    }

    pub async fn send_as_text(&mut self, data: String) -> Result<(), Error> {
        self.writer.send_as_text(data).await
    }

    pub async fn send_ping(&mut self) -> Result<(), Error> {
        self.writer.send_ping().await
    }

    pub async fn next_message(&mut self, max_size: usize) -> Option<Result<Message, Error>> {
        self.reader.next_message(max_size).await
    }

    pub async fn close_connection(&mut self) -> Result<(), Error> {
        self.writer.close_connection().await
    }
}

impl Stream for WSConnection {
    type Item = Result<Message, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.reader).poll_next(cx)
    }
}

/// Wires up a freshly upgraded transport: the shared state machine, the
/// extension stack, the inbound task and the optional auto-ping task.
pub(crate) fn spawn_connection(
    buf_reader: BufReader<ReadHalf<WaveStream>>,
    write_half: WriteHalf<WaveStream>,
    kind: WriterKind,
    config: WebSocketConfig,
    extension_instances: Vec<Box<dyn WebSocketExtension>>,
) -> WSConnection {
    let server_role = matches!(kind, WriterKind::Server);
    let writer = Arc::new(Mutex::new(Writer::new(write_half, kind)));
    let state = Arc::new(StdMutex::new(WebSocketState::new()));
    let extensions = Arc::new(StdMutex::new(ExtensionStack::new(extension_instances)));
    // read task -> auto-ping task: the connection is over, stop pinging
    let shutdown = Arc::new(Notify::new());
    // any closer -> read task: a close frame went out, stop waiting forever
    let close_signal = Arc::new(Notify::new());

    let (read_tx, read_rx) = mpsc::channel(READ_CHANNEL_CAPACITY);

    let mut read_stream = ReadStream::new(
        buf_reader,
        read_tx,
        writer.clone(),
        state.clone(),
        extensions.clone(),
        close_signal.clone(),
        config.clone(),
        server_role,
    );

    let read_shutdown = shutdown.clone();
    let read_handle = tokio::spawn(async move {
        if let Err(err) = read_stream.poll_messages().await {
            debug!("inbound loop ended with error: {}", err);
        }
        read_shutdown.notify_one();
    });

    if let Some(interval) = config.auto_ping {
        spawn_auto_ping(
            interval,
            writer.clone(),
            state.clone(),
            shutdown,
            close_signal.clone(),
        );
    }

    let reader = WSReader::new(
        ReceiverStream::new(read_rx),
        writer.clone(),
        state.clone(),
        close_signal.clone(),
        &config,
    );
    let ws_writer = WSWriter::new(writer, state.clone(), extensions, close_signal, config);

    WSConnection {
        reader,
        writer: ws_writer,
        state,
        read_handle,
    }
}

/// The liveness task: wakes every interval, lets the state machine decide
/// between a fresh ping and a timeout close, and quits as soon as the
/// inbound loop signals the connection is over.
fn spawn_auto_ping(
    interval: std::time::Duration,
    writer: Arc<Mutex<Writer>>,
    state: Arc<StdMutex<WebSocketState>>,
    shutdown: Arc<Notify>,
    close_signal: Arc<Notify>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick of a tokio interval fires immediately; the first
        // ping should wait out one whole interval instead
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = ticker.tick() => {
                    let action = state.lock().unwrap().auto_ping_tick();
                    match action {
                        Action::SendPing(payload) => {
                            if writer
                                .lock()
                                .await
                                .write_frame(Frame::control(OpCode::Ping, payload))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Action::SendClose(close_frame) => {
                            debug!("closing connection: no pong for two pings");
                            let _ = writer
                                .lock()
                                .await
                                .write_frame(Frame::close(&close_frame))
                                .await;
                            close_signal.notify_one();
                            break;
                        }
                        _ => break,
                    }
                }
            }
        }
    });
}
