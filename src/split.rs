use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::extensions::ExtensionStack;
use crate::frame::{CloseCode, CloseFrame, Frame, OpCode};
use crate::message::Message;
use crate::state::{Action, WebSocketState};
use crate::write::Writer;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use tokio::sync::{Mutex, Notify};
use tokio_stream::wrappers::ReceiverStream;

struct PartialMessage {
    op_code: OpCode,
    fragments: Vec<u8>,
}

/// The inbound half of a connection: a single-pass sequence of data frames,
/// already unmasked and run through the extension pipeline, plus the
/// coalescer that folds fragments back into messages.
///
/// Consuming it as a `Stream` yields whole messages bounded by the
/// connection's `max_message_size`; `next_message` does the same with a
/// caller-chosen bound. Once a protocol violation ends the stream it stays
/// ended.
pub struct WSReader {
    frame_rx: ReceiverStream<Result<Frame, Error>>,
    writer: Arc<Mutex<Writer>>,
    state: Arc<StdMutex<WebSocketState>>,
    close_signal: Arc<Notify>,
    max_message_size: usize,
    max_override: Option<usize>,
    partial: Option<PartialMessage>,
    finished: bool,
}

impl WSReader {
    pub(crate) fn new(
        frame_rx: ReceiverStream<Result<Frame, Error>>,
        writer: Arc<Mutex<Writer>>,
        state: Arc<StdMutex<WebSocketState>>,
        close_signal: Arc<Notify>,
        config: &WebSocketConfig,
    ) -> Self {
        Self {
            frame_rx,
            writer,
            state,
            close_signal,
            max_message_size: config.max_message_size.unwrap_or(usize::MAX),
            max_override: None,
            partial: None,
            finished: false,
        }
    }

    /// The close frame that ended the connection, once the stream is over.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.state.lock().unwrap().close_frame()
    }

    /// The next data frame, before any reassembly. Mixing this with the
    /// message-level API mid-message confuses the coalescer; pick one.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, Error>> {
        if self.finished {
            return None;
        }
        self.frame_rx.next().await
    }

    /// Coalesces the next message with an explicit size bound. Exceeding the
    /// bound closes the connection with 1009 and ends the stream.
    pub async fn next_message(&mut self, max_size: usize) -> Option<Result<Message, Error>> {
        self.max_override = Some(max_size);
        let result = self.next().await;
        self.max_override = None;
        result
    }

    fn max_size(&self) -> usize {
        self.max_override.unwrap_or(self.max_message_size)
    }

    /// Ends the stream over a reassembly violation: the matching close goes
    /// out through the shared state machine, which keeps it to a single
    /// close frame no matter which task loses the race.
    fn violation(&mut self, err: Error) -> Poll<Option<Result<Message, Error>>> {
        self.finished = true;
        self.partial = None;

        let action = self
            .state
            .lock()
            .unwrap()
            .send_close(CloseFrame::new(err.close_code(), ""));
        if let Action::SendClose(close_frame) = action {
            let writer = self.writer.clone();
            let close_signal = self.close_signal.clone();
            tokio::spawn(async move {
                let _ = writer
                    .lock()
                    .await
                    .write_frame(Frame::close(&close_frame))
                    .await;
                close_signal.notify_one();
            });
        }

        Poll::Ready(Some(Err(err)))
    }

    fn finish_message(&mut self, op_code: OpCode, payload: Vec<u8>) -> Poll<Option<Result<Message, Error>>> {
        match Message::from_parts(op_code, payload) {
            Ok(message) => Poll::Ready(Some(Ok(message))),
            // a text message that isn't UTF-8 fails the connection
            Err(err) => self.violation(err),
        }
    }
}

impl Stream for WSReader {
    type Item = Result<Message, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            let frame = match Pin::new(&mut this.frame_rx).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Some(Ok(frame))) => frame,
            };

            let max_size = this.max_size();

            match frame.opcode {
                // By default, in order to start a fragmented message, the first frame should have a Text or Binary opcode,
                // with a FIN bit set to 0
                OpCode::Text | OpCode::Binary if !frame.final_fragment => {
                    if this.partial.is_some() {
                        return this.violation(Error::FragmentedInProgress);
                    }
                    if frame.payload.len() > max_size {
                        return this.violation(Error::MaxMessageSize);
                    }
                    this.partial = Some(PartialMessage {
                        op_code: frame.opcode,
                        fragments: frame.payload,
                    });
                }
                OpCode::Text | OpCode::Binary => {
                    // a whole message in one frame; a new first frame while a
                    // fragmented message is open is a protocol violation
                    if this.partial.is_some() {
                        return this.violation(Error::InvalidFrameFragmentation);
                    }
                    if frame.payload.len() > max_size {
                        return this.violation(Error::MaxMessageSize);
                    }
                    return this.finish_message(frame.opcode, frame.payload);
                }
                // Per WebSockets RFC, the Continue opcode is specifically meant for continuation frames of a fragmented message
                OpCode::Continue => {
                    if this.partial.is_none() {
                        return this.violation(Error::InvalidContinuationFrame);
                    }

                    let exceeded = {
                        let partial = this.partial.as_mut().unwrap();
                        partial.fragments.extend_from_slice(&frame.payload);
                        partial.fragments.len() > max_size
                    };
                    if exceeded {
                        return this.violation(Error::MaxMessageSize);
                    }
                    if frame.final_fragment {
                        let partial = this.partial.take().unwrap();
                        return this.finish_message(partial.op_code, partial.fragments);
                    }
                }
                // control frames never reach the inbound stream
                _ => {}
            }
        }
    }
}

/// The outbound half of a connection. Every data frame runs the extension
/// pipeline in list order before the role-aware writer masks and serializes
/// it; writes are serialized by the writer lock so the handler and the
/// auto-ping task never interleave partial frames.
#[derive(Clone)]
pub struct WSWriter {
    writer: Arc<Mutex<Writer>>,
    state: Arc<StdMutex<WebSocketState>>,
    extensions: Arc<StdMutex<ExtensionStack>>,
    close_signal: Arc<Notify>,
    web_socket_config: WebSocketConfig,
}

impl WSWriter {
    pub(crate) fn new(
        writer: Arc<Mutex<Writer>>,
        state: Arc<StdMutex<WebSocketState>>,
        extensions: Arc<StdMutex<ExtensionStack>>,
        close_signal: Arc<Notify>,
        web_socket_config: WebSocketConfig,
    ) -> Self {
        Self {
            writer,
            state,
            extensions,
            close_signal,
            web_socket_config,
        }
    }

    /// Requests a normal closure and lets the close handshake run out.
    pub async fn close_connection(&mut self) -> Result<(), Error> {
        self.close(CloseCode::Normal, "").await
    }

    /// Initiates the close handshake. Repeated calls, or a call racing the
    /// peer's own close, collapse into the single close frame the state
    /// machine allows.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), Error> {
        let action = self
            .state
            .lock()
            .unwrap()
            .send_close(CloseFrame::new(code, reason));
        if let Action::SendClose(close_frame) = action {
            self.writer
                .lock()
                .await
                .write_frame(Frame::close(&close_frame))
                .await?;
            // tell the inbound loop the handshake is underway so it bounds
            // its wait for the peer's reply
            self.close_signal.notify_one();
        }
        Ok(())
    }

    pub async fn send_message(&mut self, message: Message) -> Result<(), Error> {
        self.write_message(message).await
    }

    /// Sends raw bytes as a text message; the bytes must already be UTF-8.
    pub async fn send(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.write_message(Message::Text(String::from_utf8(data)?))
            .await
    }

    pub async fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.write_message(Message::Binary(data)).await
    }

    pub async fn send_as_text(&mut self, data: String) -> Result<(), Error> {
        self.write_message(Message::Text(data)).await
    }

    /// Sends one text frame with the caller's choice of fin, leaving
    /// fragmentation under the caller's control.
    pub async fn send_text(&mut self, text: &str, final_fragment: bool) -> Result<(), Error> {
        self.write_data_frame(Frame::data(
            OpCode::Text,
            text.as_bytes().to_vec(),
            final_fragment,
        ))
        .await
    }

    pub async fn send_binary(&mut self, data: Vec<u8>, final_fragment: bool) -> Result<(), Error> {
        self.write_data_frame(Frame::data(OpCode::Binary, data, final_fragment))
            .await
    }

    pub async fn send_continuation(
        &mut self,
        data: Vec<u8>,
        final_fragment: bool,
    ) -> Result<(), Error> {
        self.write_data_frame(Frame::data(OpCode::Continue, data, final_fragment))
            .await
    }

    /// Sends an empty ping, for callers that run their own liveness checks.
    pub async fn send_ping(&mut self) -> Result<(), Error> {
        if !self.state.lock().unwrap().is_open() {
            return Err(Error::ConnectionClosed);
        }
        self.writer
            .lock()
            .await
            .write_frame(Frame::control(OpCode::Ping, Vec::new()))
            .await
    }

    /// Splits a large payload into continuation frames of the caller's
    /// chosen size, bounded by the configured frame and message limits.
    pub async fn send_large_data_fragmented(
        &mut self,
        data: Vec<u8>,
        fragment_size: usize,
    ) -> Result<(), Error> {
        let max_frame_size = self.web_socket_config.max_frame_size.unwrap_or(usize::MAX);
        if fragment_size > max_frame_size {
            return Err(Error::CustomFragmentSizeExceeded(
                fragment_size,
                max_frame_size,
            ));
        }
        if data.len() > self.web_socket_config.max_message_size.unwrap_or(usize::MAX) {
            return Err(Error::MaxMessageSize);
        }

        let chunks = data.chunks(fragment_size);
        let total_chunks = chunks.len();

        for (i, chunk) in chunks.enumerate() {
            let is_final = i == total_chunks - 1;
            let opcode = if i == 0 {
                OpCode::Binary
            } else {
                OpCode::Continue
            };

            self.write_data_frame(Frame::data(opcode, Vec::from(chunk), is_final))
                .await?;
        }

        Ok(())
    }

    pub(crate) fn convert_to_frames(&self, message: Message) -> Vec<Frame> {
        let opcode = message.opcode();
        let payload = message.into_payload();

        if payload.is_empty() {
            return vec![Frame::data(opcode, payload, true)];
        }

        let max_frame_size = self.web_socket_config.max_frame_size.unwrap_or(usize::MAX);
        let mut frames = Vec::new();

        for chunk in payload.chunks(max_frame_size) {
            frames.push(Frame::data(
                if frames.is_empty() {
                    opcode.clone()
                } else {
                    OpCode::Continue
                },
                chunk.to_vec(),
                false,
            ));
        }

        if let Some(last_frame) = frames.last_mut() {
            last_frame.final_fragment = true;
        }

        frames
    }

    pub(crate) async fn write_message(&mut self, message: Message) -> Result<(), Error> {
        if message.as_binary().len() > self.web_socket_config.max_message_size.unwrap_or(usize::MAX)
        {
            return Err(Error::MaxMessageSize);
        }

        for frame in self.convert_to_frames(message) {
            self.write_data_frame(frame).await?;
        }
        Ok(())
    }

    async fn write_data_frame(&mut self, frame: Frame) -> Result<(), Error> {
        // data frames are only legal while the connection is fully open
        if !self.state.lock().unwrap().is_open() {
            return Err(Error::ConnectionClosed);
        }

        let frame = {
            let mut extensions = self.extensions.lock().unwrap();
            extensions.transform_outbound(frame)?
        };

        self.writer.lock().await.write_frame(frame).await
    }
}
