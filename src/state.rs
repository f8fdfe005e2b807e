use crate::frame::{CloseCode, CloseFrame};
use rand::random;

pub const PING_TIMEOUT_REASON: &str = "Ping timeout";

/// Where the connection sits in its lifetime. `Closing` means this side has
/// put a close frame on the wire and is waiting for the peer's; `Closed`
/// carries the close frame that ended the connection, when there was one.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed(Option<CloseFrame>),
}

/// What the connection driver should do next. The state machine never
/// touches the transport itself; it hands out at most one action per event
/// and the driver executes it.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    None,
    SendPong(Vec<u8>),
    SendPing(Vec<u8>),
    SendClose(CloseFrame),
}

/// The close-handshake and liveness policy of one connection, kept free of
/// I/O so it can sit behind a plain mutex with non-suspending critical
/// sections. `send_close` is idempotent, which is what lets the handler, the
/// read loop and the auto-ping task race on closing without ever producing
/// two close frames on the wire.
pub struct WebSocketState {
    state: ConnectionState,
    /// The close frame that will become terminal once the handshake (or the
    /// transport) finishes.
    pending_close: Option<CloseFrame>,
    last_ping_payload: Option<Vec<u8>>,
    pending_pings: u32,
}

impl WebSocketState {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Open,
            pending_close: None,
            last_ping_payload: None,
            pending_pings: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open)
    }

    pub fn can_write(&self) -> bool {
        !matches!(self.state, ConnectionState::Closed(_))
    }

    /// The frame that ended the connection, available once `Closed`.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        match &self.state {
            ConnectionState::Closed(frame) => frame.clone(),
            _ => None,
        }
    }

    pub fn receive_ping(&mut self, payload: &[u8]) -> Action {
        if !self.is_open() {
            return Action::None;
        }
        if payload.len() > 125 {
            return self.send_close(CloseFrame::new(CloseCode::Protocol, ""));
        }
        Action::SendPong(payload.to_vec())
    }

    pub fn receive_pong(&mut self, payload: &[u8]) -> Action {
        // Any pong answers the outstanding ping; a payload that matches a
        // different, stale ping is an unsolicited pong and changes nothing.
        match &self.last_ping_payload {
            Some(expected) if expected.as_slice() != payload => {}
            _ => {
                self.pending_pings = 0;
                self.last_ping_payload = None;
            }
        }
        Action::None
    }

    pub fn receive_close(&mut self, payload: &[u8]) -> Action {
        let parsed = CloseFrame::parse(payload);

        match &self.state {
            ConnectionState::Closed(_) => Action::None,
            ConnectionState::Closing => {
                // our close is already on the wire; the peer's completes the
                // handshake
                let frame = match parsed {
                    Ok(Some(frame)) => frame,
                    Ok(None) => CloseFrame::normal(),
                    Err(_) => CloseFrame::new(CloseCode::Protocol, ""),
                };
                self.state = ConnectionState::Closed(Some(frame));
                Action::None
            }
            ConnectionState::Open => match parsed {
                Ok(Some(frame)) => {
                    self.pending_close = Some(frame.clone());
                    self.state = ConnectionState::Closing;
                    Action::SendClose(frame)
                }
                Ok(None) => {
                    let frame = CloseFrame::normal();
                    self.pending_close = Some(frame.clone());
                    self.state = ConnectionState::Closing;
                    Action::SendClose(frame)
                }
                Err(_) => {
                    let frame = CloseFrame::new(CloseCode::Protocol, "");
                    self.pending_close = Some(frame.clone());
                    self.state = ConnectionState::Closing;
                    Action::SendClose(frame)
                }
            },
        }
    }

    /// Local close request. A no-op unless the connection is still open, so
    /// concurrent closers collapse into a single close frame.
    pub fn send_close(&mut self, frame: CloseFrame) -> Action {
        match self.state {
            ConnectionState::Open => {
                self.pending_close = Some(frame.clone());
                self.state = ConnectionState::Closing;
                Action::SendClose(frame)
            }
            _ => Action::None,
        }
    }

    /// One wake-up of the liveness timer: two outstanding pings mean the
    /// peer is gone, otherwise a fresh random payload goes out and the
    /// strike counter moves up.
    pub fn auto_ping_tick(&mut self) -> Action {
        if !self.is_open() {
            return Action::None;
        }
        if self.pending_pings >= 2 {
            return self.send_close(CloseFrame::new(CloseCode::Away, PING_TIMEOUT_REASON));
        }
        let payload = random::<[u8; 16]>().to_vec();
        self.last_ping_payload = Some(payload.clone());
        self.pending_pings += 1;
        Action::SendPing(payload)
    }

    /// Marks the close handshake finished, after the echo to a peer close
    /// was written or the transport dropped. Preserves the one legal
    /// terminal transition: anything but `Closed` moves to `Closed` with
    /// whatever close frame was pending.
    pub fn complete_close(&mut self) {
        if !matches!(self.state, ConnectionState::Closed(_)) {
            self.state = ConnectionState::Closed(self.pending_close.take());
        }
    }
}

impl Default for WebSocketState {
    fn default() -> Self {
        Self::new()
    }
}
