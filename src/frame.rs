use crate::error::Error;

/// Close codes from RFC 6455 section 7.4 that may legally appear on the wire.
/// Everything else received inside a close payload is a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    Away,
    Protocol,
    Unsupported,
    Invalid,
    Policy,
    Size,
    Extension,
    Error,
    /// Registered or application codes (3000..=4999).
    Other(u16),
}

impl CloseCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Maps a wire code to a close code, rejecting everything RFC 6455
    /// forbids inside a close payload (1004-1006, 1015, unassigned 1xxx,
    /// anything below 1000).
    pub fn from_u16(code: u16) -> Result<Self, Error> {
        match code {
            1000 => Ok(CloseCode::Normal),
            1001 => Ok(CloseCode::Away),
            1002 => Ok(CloseCode::Protocol),
            1003 => Ok(CloseCode::Unsupported),
            1007 => Ok(CloseCode::Invalid),
            1008 => Ok(CloseCode::Policy),
            1009 => Ok(CloseCode::Size),
            1010 => Ok(CloseCode::Extension),
            1011 => Ok(CloseCode::Error),
            3000..=4999 => Ok(CloseCode::Other(code)),
            _ => Err(Error::InvalidCloseCode(code)),
        }
    }
}

/// The close code and reason carried by a close frame, either received from
/// the peer or generated locally when this side initiates the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CloseCode::Normal, "")
    }

    /// Parses a close frame payload. An empty payload is legal and reads as
    /// a normal closure; a one-byte payload or a forbidden code is a
    /// protocol error, as is a reason that isn't UTF-8.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>, Error> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(Error::InvalidClosePayload),
            _ => {
                let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]))?;
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| Error::InvalidClosePayload)?
                    .to_string();
                Ok(Some(CloseFrame { code, reason }))
            }
        }
    }

    /// Encodes the close frame back into a close payload: two big-endian
    /// code bytes followed by the reason, truncated so the whole payload
    /// stays within the 125-byte control frame limit.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&self.code.as_u16().to_be_bytes());
        let mut reason = self.reason.as_str();
        while reason.len() > 123 {
            let mut cut = 123;
            while !reason.is_char_boundary(cut) {
                cut -= 1;
            }
            reason = &reason[..cut];
        }
        payload.extend_from_slice(reason.as_bytes());
        payload
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(&self) -> bool {
        !self.is_control()
    }
}

/// One WebSocket frame, after header decoding and before wire encoding.
///
/// `rsv1` is claimed by permessage-deflate to flag the first frame of a
/// compressed message; `rsv2`/`rsv3` stay zero on this crate's wire.
#[derive(Debug, Clone)]
pub struct Frame {
    pub final_fragment: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub mask_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn data(opcode: OpCode, payload: Vec<u8>, final_fragment: bool) -> Self {
        Self {
            final_fragment,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask_key: None,
            payload,
        }
    }

    /// Control frames are never fragmented and carry at most 125 bytes.
    pub fn control(opcode: OpCode, payload: Vec<u8>) -> Self {
        debug_assert!(opcode.is_control());
        debug_assert!(payload.len() <= 125);
        Self {
            final_fragment: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask_key: None,
            payload,
        }
    }

    pub fn close(close_frame: &CloseFrame) -> Self {
        Self::control(OpCode::Close, close_frame.encode())
    }

    /// The payload with the mask key applied, when one is set. Masking is an
    /// involution, so this both unmasks inbound client frames and previews
    /// what a masked outbound frame carries on the wire.
    pub fn unmasked_payload(&self) -> Vec<u8> {
        match self.mask_key {
            Some(mask) => {
                let mut payload = self.payload.clone();
                apply_mask(&mut payload, mask);
                payload
            }
            None => self.payload.clone(),
        }
    }
}

/// XORs the payload in place with the 4-byte key cycled by position.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}
