use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::extensions::ExtensionStack;
use crate::frame::{apply_mask, CloseFrame, Frame, OpCode};
use crate::state::{Action, WebSocketState};
use crate::stream::WaveStream;
use crate::write::Writer;
use log::{debug, trace};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncReadExt, BufReader, ReadHalf};
use tokio::sync::mpsc::Sender;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout, Duration};

// Bound on how long we wait for the remainder of an announced payload, so a
// connection that stalls mid-frame cannot pin the task forever.
const PAYLOAD_READ_TIMEOUT: Duration = Duration::from_secs(5);
// After this side sends a close, how long we drain for the peer's reply
// before giving up on the handshake.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The single reader of a connection's transport. Decodes wire frames,
/// answers control frames through the shared state machine, pushes data
/// frames through the inbound extension pipeline and hands them to the
/// user-facing stream.
pub struct ReadStream {
    buf_reader: BufReader<ReadHalf<WaveStream>>,
    pub read_tx: Sender<Result<Frame, Error>>,
    writer: Arc<Mutex<Writer>>,
    state: Arc<StdMutex<WebSocketState>>,
    extensions: Arc<StdMutex<ExtensionStack>>,
    close_signal: Arc<Notify>,
    config: WebSocketConfig,
    server_role: bool,
}

impl ReadStream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buf_reader: BufReader<ReadHalf<WaveStream>>,
        read_tx: Sender<Result<Frame, Error>>,
        writer: Arc<Mutex<Writer>>,
        state: Arc<StdMutex<WebSocketState>>,
        extensions: Arc<StdMutex<ExtensionStack>>,
        close_signal: Arc<Notify>,
        config: WebSocketConfig,
        server_role: bool,
    ) -> Self {
        Self {
            buf_reader,
            read_tx,
            writer,
            state,
            extensions,
            close_signal,
            config,
            server_role,
        }
    }

    /// Pumps inbound frames until the close handshake finishes or the
    /// transport drops, then finalizes the connection: the terminal state is
    /// recorded, the server side sends its FIN, and the extensions are shut
    /// down exactly once.
    pub async fn poll_messages(&mut self) -> Result<(), Error> {
        let result = self.frame_loop().await;

        self.state.lock().unwrap().complete_close();
        if self.server_role {
            // tie-break from RFC 6455 section 7.1.1: the server finalizes
            // the TCP close, the client waits for our FIN
            let _ = self.writer.lock().await.shutdown().await;
        }
        self.extensions.lock().unwrap().shutdown();

        result
    }

    async fn frame_loop(&mut self) -> Result<(), Error> {
        let close_signal = self.close_signal.clone();

        loop {
            // another task (handler close, auto-ping timeout, reassembly
            // violation) may have put a close on the wire while we were
            // blocked; from then on the peer only owes us its close frame
            if !self.state.lock().unwrap().is_open() {
                self.drain_until_close().await;
                self.state.lock().unwrap().complete_close();
                return Ok(());
            }

            let incoming = tokio::select! {
                incoming = self.read_frame() => incoming,
                _ = close_signal.notified() => continue,
            };

            match incoming {
                Ok(frame) => match frame.opcode {
                    OpCode::Ping => {
                        let action = self.state.lock().unwrap().receive_ping(&frame.payload);
                        if self.execute(action).await? {
                            return Ok(());
                        }
                    }
                    OpCode::Pong => {
                        let action = self.state.lock().unwrap().receive_pong(&frame.payload);
                        let _ = self.execute(action).await?;
                    }
                    OpCode::Close => {
                        trace!("received close frame with {} bytes", frame.payload.len());
                        let action = self.state.lock().unwrap().receive_close(&frame.payload);
                        match action {
                            Action::SendClose(close_frame) => {
                                // peer-initiated: echo, then the handshake is done
                                let _ = self.write_close(&close_frame).await;
                                self.state.lock().unwrap().complete_close();
                            }
                            _ => {
                                // locally-initiated: the peer's close completed
                                // the handshake inside the state machine
                            }
                        }
                        return Ok(());
                    }
                    OpCode::Text | OpCode::Binary | OpCode::Continue => {
                        let transformed = {
                            let mut extensions = self.extensions.lock().unwrap();
                            extensions.transform_inbound(frame)
                        };
                        match transformed {
                            Ok(frame) => self.transmit_frame(frame).await?,
                            Err(err) => return self.fail(err).await,
                        }
                    }
                },
                Err(err) => {
                    if let Error::IOError { ref source } = err {
                        // the peer dropped the transport; when we already
                        // sent our close this is just the tail of a normal
                        // shutdown
                        debug!("transport closed while reading: {}", source);
                        if self.state.lock().unwrap().is_open() {
                            let _ = self.read_tx.send(Err(err)).await;
                        }
                        return Ok(());
                    }
                    return self.fail(err).await;
                }
            }
        }
    }

    /// Writes the action the state machine asked for. Returns `true` when
    /// the action was a close, which ends the read loop after the drain.
    async fn execute(&mut self, action: Action) -> Result<bool, Error> {
        match action {
            Action::None => Ok(false),
            Action::SendPong(payload) => {
                self.writer
                    .lock()
                    .await
                    .write_frame(Frame::control(OpCode::Pong, payload))
                    .await?;
                Ok(false)
            }
            Action::SendPing(payload) => {
                self.writer
                    .lock()
                    .await
                    .write_frame(Frame::control(OpCode::Ping, payload))
                    .await?;
                Ok(false)
            }
            Action::SendClose(close_frame) => {
                let _ = self.write_close(&close_frame).await;
                self.drain_until_close().await;
                self.state.lock().unwrap().complete_close();
                Ok(true)
            }
        }
    }

    /// Protocol failure path: surface the error on the inbound stream, put
    /// the matching close frame on the wire and wait out the handshake.
    async fn fail(&mut self, err: Error) -> Result<(), Error> {
        debug!("closing connection after inbound error: {}", err);
        let close_frame = CloseFrame::new(err.close_code(), "");
        let action = self.state.lock().unwrap().send_close(close_frame);
        let _ = self.read_tx.send(Err(err)).await;
        if let Action::SendClose(close_frame) = action {
            let _ = self.write_close(&close_frame).await;
            self.drain_until_close().await;
        }
        self.state.lock().unwrap().complete_close();
        Ok(())
    }

    async fn write_close(&mut self, close_frame: &CloseFrame) -> Result<(), Error> {
        self.writer
            .lock()
            .await
            .write_frame(Frame::close(close_frame))
            .await
    }

    /// After this side initiated the close, the peer is still allowed to
    /// finish whatever it was sending; everything up to its close frame is
    /// discarded.
    async fn drain_until_close(&mut self) {
        let _ = timeout(CLOSE_DRAIN_TIMEOUT, async {
            loop {
                match self.read_frame().await {
                    Ok(frame) if frame.opcode == OpCode::Close => {
                        // in `Closing` this records the peer's echo as the
                        // terminal close frame
                        let _ = self.state.lock().unwrap().receive_close(&frame.payload);
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        })
        .await;
    }

    pub async fn read_frame(&mut self) -> Result<Frame, Error> {
        let mut header = [0u8; 2];

        self.buf_reader.read_exact(&mut header).await?;

        // first header byte: fin in the top bit, rsv flags next, opcode in
        // the low nibble; a reserved opcode fails decoding right here
        let final_fragment = (header[0] & 0b10000000) != 0;
        let opcode = OpCode::from(header[0] & 0b00001111)?;

        // RSV bits are only meaningful when an extension claimed them during
        // the upgrade; permessage-deflate takes rsv1 on data frames. Anything
        // else non-zero fails the connection immediately.
        let rsv1 = (header[0] & 0b01000000) != 0;
        let rsv2 = (header[0] & 0b00100000) != 0;
        let rsv3 = (header[0] & 0b00010000) != 0;

        if rsv2 || rsv3 {
            return Err(Error::RSVNotZero);
        }
        if rsv1 && (opcode.is_control() || self.extensions.lock().unwrap().is_empty()) {
            return Err(Error::RSVNotZero);
        }

        // a non-final ping, pong or close is illegal; control frames never
        // span frames
        if !final_fragment && opcode.is_control() {
            Err(Error::ControlFramesFragmented)?;
        }

        // second header byte: mask bit on top, then a 7-bit length that may
        // escape to a 16- or 64-bit extension below
        let masked = (header[1] & 0b10000000) != 0;
        let mut length = (header[1] & 0b01111111) as usize;

        // the 7-bit form is also the ceiling for control payloads, so a
        // control frame announcing an extended length is already invalid
        if length > 125 && opcode.is_control() {
            Err(Error::ControlFramePayloadSize)?;
        }

        if length == 126 {
            let mut be_bytes = [0u8; 2];
            self.buf_reader.read_exact(&mut be_bytes).await?;
            length = u16::from_be_bytes(be_bytes) as usize;
        } else if length == 127 {
            let mut be_bytes = [0u8; 8];
            self.buf_reader.read_exact(&mut be_bytes).await?;
            length = u64::from_be_bytes(be_bytes) as usize;
        }

        if length > self.config.max_frame_size.unwrap_or(usize::MAX) {
            // discard the oversized payload (and its mask key) so the close
            // handshake that follows still reads aligned frames
            let to_skip = (length + if masked { 4 } else { 0 }) as u64;
            let _ = timeout(
                PAYLOAD_READ_TIMEOUT,
                tokio::io::copy(
                    &mut AsyncReadExt::take(&mut self.buf_reader, to_skip),
                    &mut tokio::io::sink(),
                ),
            )
            .await;
            Err(Error::MaxFrameSize)?;
        }

        // clients mask everything they send, servers nothing; the key, when
        // present, sits between the length and the payload
        let mask = if masked {
            let mut mask = [0u8; 4];
            self.buf_reader.read_exact(&mut mask).await?;
            Some(mask)
        } else {
            None
        };

        let mut payload = vec![0u8; length];

        // a header promising bytes that never arrive would otherwise park
        // this task forever, so the payload read gets a deadline
        let read_result = timeout(
            PAYLOAD_READ_TIMEOUT,
            self.buf_reader.read_exact(&mut payload),
        )
        .await;
        match read_result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => Err(e)?,
            Err(elapsed) => Err(elapsed)?,
        }

        // undo the mask right away; everything downstream of the codec works
        // on plain payload bytes
        if let Some(mask) = mask {
            apply_mask(&mut payload, mask);
        }

        Ok(Frame {
            final_fragment,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            mask_key: None,
            payload,
        })
    }

    pub async fn transmit_frame(&mut self, frame: Frame) -> Result<(), Error> {
        self.read_tx
            .send(Ok(frame))
            .await
            .map_err(|_| Error::CommunicationError)
    }
}
