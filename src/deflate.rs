use crate::decoder::{Decoder, DEFLATE_TRAILER};
use crate::encoder::Encoder;
use crate::error::Error;
use crate::extensions::{ExtensionFactory, ExtensionOffer, WebSocketExtension};
use crate::frame::{Frame, OpCode};

pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

const MIN_WINDOW_BITS: u8 = 8;
const MAX_WINDOW_BITS: u8 = 15;

/// permessage-deflate settings, from the point of view of the endpoint that
/// owns them.
///
/// Window sizes closer to 15 compress better but hold more memory per
/// connection; the `no_context_takeover` flags trade compression ratio for
/// a sliding window that resets between messages.
#[derive(Debug, Clone)]
pub struct DeflateOptions {
    /// Upper bound for the window of frames compressed by the client.
    pub client_max_window: Option<u8>,
    /// Upper bound for the window of frames compressed by the server.
    pub server_max_window: Option<u8>,
    /// Ask that the client resets its compression context after each message.
    pub client_no_context_takeover: bool,
    /// Ask that the server resets its compression context after each message.
    pub server_no_context_takeover: bool,
    /// Deflate effort, 0..=9. `None` keeps the codec default.
    pub compression_level: Option<u32>,
    /// Accepted for configuration compatibility; the codec picks its own
    /// memory level.
    pub memory_level: Option<u8>,
    /// Bound on the inflated size of a single frame.
    pub max_decompressed_frame_size: usize,
    /// Messages smaller than this are sent uncompressed unless fragmented.
    pub min_frame_size_to_compress: usize,
}

impl Default for DeflateOptions {
    fn default() -> Self {
        DeflateOptions {
            client_max_window: None,
            server_max_window: None,
            client_no_context_takeover: false,
            server_no_context_takeover: false,
            compression_level: None,
            memory_level: None,
            max_decompressed_frame_size: 16 << 10,
            min_frame_size_to_compress: 256,
        }
    }
}

impl DeflateOptions {
    fn validate(&self) -> Result<(), Error> {
        for window in [self.client_max_window, self.server_max_window]
            .into_iter()
            .flatten()
        {
            if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&window) {
                return Err(Error::InvalidMaxWindowBits);
            }
        }
        if let Some(level) = self.compression_level {
            if level > 9 {
                return Err(Error::NegotiationError(format!(
                    "compression_level `{}` outside 0..=9",
                    level
                )));
            }
        }
        if let Some(memory_level) = self.memory_level {
            if !(1..=9).contains(&memory_level) {
                return Err(Error::NegotiationError(format!(
                    "memory_level `{}` outside 1..=9",
                    memory_level
                )));
            }
        }
        Ok(())
    }
}

/// The parameter bag of one permessage-deflate offer or response. A window
/// parameter present without a value reads as 15, the protocol maximum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DeflateBid {
    client_max_window_bits: Option<u8>,
    server_max_window_bits: Option<u8>,
    client_no_context_takeover: bool,
    server_no_context_takeover: bool,
}

impl DeflateBid {
    fn parse(offer: &ExtensionOffer) -> Result<Self, Error> {
        let mut bid = DeflateBid::default();

        for param in &offer.params {
            match param.name.as_str() {
                CLIENT_NO_CONTEXT_TAKEOVER => bid.client_no_context_takeover = true,
                SERVER_NO_CONTEXT_TAKEOVER => bid.server_no_context_takeover = true,
                CLIENT_MAX_WINDOW_BITS => {
                    bid.client_max_window_bits = Some(parse_window_bits(param.value.as_deref())?);
                }
                SERVER_MAX_WINDOW_BITS => {
                    bid.server_max_window_bits = Some(parse_window_bits(param.value.as_deref())?);
                }
                unknown => {
                    return Err(Error::NegotiationError(format!(
                        "unknown permessage-deflate parameter: {}",
                        unknown
                    )));
                }
            }
        }

        Ok(bid)
    }
}

fn parse_window_bits(value: Option<&str>) -> Result<u8, Error> {
    let bits = match value {
        None => MAX_WINDOW_BITS,
        Some(raw) => raw.parse::<u8>().map_err(|_| Error::InvalidMaxWindowBits)?,
    };
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        return Err(Error::InvalidMaxWindowBits);
    }
    Ok(bits)
}

fn merge_window(bid: Option<u8>, local: Option<u8>) -> Option<u8> {
    match (bid, local) {
        (Some(bid), Some(local)) => Some(bid.min(local)),
        (Some(bid), None) => Some(bid),
        (None, Some(local)) => Some(local),
        (None, None) => None,
    }
}

/// The parameters both sides settled on, oriented to this endpoint:
/// `send_*` governs the compressor, `receive_*` the decompressor.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NegotiatedDeflate {
    send_max_window: Option<u8>,
    receive_max_window: Option<u8>,
    send_no_context_takeover: bool,
    receive_no_context_takeover: bool,
}

impl NegotiatedDeflate {
    /// Server-side decision for one client offer: window bounds are the
    /// minimum of both bids (omitted when the client didn't name them), the
    /// takeover flags are the OR of both sides.
    fn for_server(bid: &DeflateBid, options: &DeflateOptions) -> Self {
        let receive_max_window = bid
            .client_max_window_bits
            .map(|bits| merge_window(Some(bits), options.client_max_window).unwrap_or(bits));
        let send_max_window = merge_window(bid.server_max_window_bits, options.server_max_window);

        NegotiatedDeflate {
            send_max_window,
            receive_max_window,
            send_no_context_takeover: bid.server_no_context_takeover
                || options.server_no_context_takeover,
            receive_no_context_takeover: bid.client_no_context_takeover
                || options.client_no_context_takeover,
        }
    }

    /// Client-side mirror of the server's response: the server's `client_*`
    /// choices drive this endpoint's compressor, its `server_*` choices the
    /// decompressor. A window parameter the server left out means it refused
    /// the bound, so the stream runs unbounded rather than at whatever this
    /// side originally asked for.
    fn for_client(response: &DeflateBid, options: &DeflateOptions) -> Self {
        NegotiatedDeflate {
            send_max_window: response.client_max_window_bits,
            receive_max_window: response.server_max_window_bits,
            send_no_context_takeover: response.client_no_context_takeover
                || options.client_no_context_takeover,
            receive_no_context_takeover: response.server_no_context_takeover,
        }
    }

    fn response_fragment(&self) -> String {
        let mut fragment = String::from(PERMESSAGE_DEFLATE);
        if self.receive_no_context_takeover {
            fragment.push_str(&format!("; {}", CLIENT_NO_CONTEXT_TAKEOVER));
        }
        if self.send_no_context_takeover {
            fragment.push_str(&format!("; {}", SERVER_NO_CONTEXT_TAKEOVER));
        }
        if let Some(bits) = self.receive_max_window {
            fragment.push_str(&format!("; {}={}", CLIENT_MAX_WINDOW_BITS, bits));
        }
        if let Some(bits) = self.send_max_window {
            fragment.push_str(&format!("; {}={}", SERVER_MAX_WINDOW_BITS, bits));
        }
        fragment
    }
}

/// Factory registered in `WebSocketConfig::extensions` to negotiate
/// permessage-deflate during the upgrade.
#[derive(Debug, Clone, Default)]
pub struct DeflateFactory {
    options: DeflateOptions,
}

impl DeflateFactory {
    pub fn new(options: DeflateOptions) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self { options })
    }
}

impl ExtensionFactory for DeflateFactory {
    fn name(&self) -> &'static str {
        PERMESSAGE_DEFLATE
    }

    fn client_offer(&self) -> Option<String> {
        let mut offer = String::from(PERMESSAGE_DEFLATE);
        // Offered without a value the parameter signals that this client can
        // honor whatever bound the server picks.
        match self.options.client_max_window {
            Some(bits) => offer.push_str(&format!("; {}={}", CLIENT_MAX_WINDOW_BITS, bits)),
            None => offer.push_str(&format!("; {}", CLIENT_MAX_WINDOW_BITS)),
        }
        if let Some(bits) = self.options.server_max_window {
            offer.push_str(&format!("; {}={}", SERVER_MAX_WINDOW_BITS, bits));
        }
        if self.options.client_no_context_takeover {
            offer.push_str(&format!("; {}", CLIENT_NO_CONTEXT_TAKEOVER));
        }
        if self.options.server_no_context_takeover {
            offer.push_str(&format!("; {}", SERVER_NO_CONTEXT_TAKEOVER));
        }
        Some(offer)
    }

    fn accept_offer(
        &self,
        offer: &ExtensionOffer,
    ) -> Result<Option<(String, Box<dyn WebSocketExtension>)>, Error> {
        // A malformed or unknown parameter declines this offer; the client
        // may have listed an alternative we understand.
        let bid = match DeflateBid::parse(offer) {
            Ok(bid) => bid,
            Err(_) => return Ok(None),
        };

        let negotiated = NegotiatedDeflate::for_server(&bid, &self.options);
        let fragment = negotiated.response_fragment();
        let extension = PerMessageDeflate::new(negotiated, &self.options);
        Ok(Some((fragment, Box::new(extension))))
    }

    fn accept_response(
        &self,
        response: &ExtensionOffer,
    ) -> Result<Box<dyn WebSocketExtension>, Error> {
        let bid = DeflateBid::parse(response)?;
        let negotiated = NegotiatedDeflate::for_client(&bid, &self.options);
        Ok(Box::new(PerMessageDeflate::new(negotiated, &self.options)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Idle,
    /// Mid-message: the first frame went out with `rsv1` and the compressor
    /// holds the stream, so continuations must keep compressing.
    SendingMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveState {
    Idle,
    /// `rsv1` was set on the first frame; continuations of this message are
    /// compressed even though they carry no flag themselves.
    CompressedMessage,
    /// The first frame was plain, so continuations pass through untouched.
    UncompressedMessage,
}

/// The per-connection permessage-deflate transformer: one deflate stream per
/// direction, plus the cross-fragment bookkeeping for `rsv1`.
pub struct PerMessageDeflate {
    encoder: Encoder,
    decoder: Decoder,
    send_no_context_takeover: bool,
    receive_no_context_takeover: bool,
    max_decompressed_frame_size: usize,
    min_frame_size_to_compress: usize,
    send_state: SendState,
    receive_state: ReceiveState,
}

impl PerMessageDeflate {
    fn new(negotiated: NegotiatedDeflate, options: &DeflateOptions) -> Self {
        Self {
            encoder: Encoder::new(options.compression_level, negotiated.send_max_window),
            decoder: Decoder::new(negotiated.receive_max_window),
            send_no_context_takeover: negotiated.send_no_context_takeover,
            receive_no_context_takeover: negotiated.receive_no_context_takeover,
            max_decompressed_frame_size: options.max_decompressed_frame_size,
            min_frame_size_to_compress: options.min_frame_size_to_compress,
            send_state: SendState::Idle,
            receive_state: ReceiveState::Idle,
        }
    }

    fn compress_frame(&mut self, frame: &mut Frame) -> Result<(), Error> {
        let mut compressed = self.encoder.compress(&frame.payload)?;
        if frame.final_fragment {
            if compressed.ends_with(&DEFLATE_TRAILER) {
                compressed.truncate(compressed.len() - DEFLATE_TRAILER.len());
            }
            if self.send_no_context_takeover {
                self.encoder.reset();
            }
        }
        frame.payload = compressed;
        Ok(())
    }

    fn decompress_frame(&mut self, frame: &mut Frame) -> Result<(), Error> {
        let mut payload = std::mem::take(&mut frame.payload);
        if frame.final_fragment {
            payload.extend_from_slice(&DEFLATE_TRAILER);
        }
        frame.payload = self
            .decoder
            .decompress(&payload, self.max_decompressed_frame_size)?;
        if frame.final_fragment && self.receive_no_context_takeover {
            self.decoder.reset();
        }
        Ok(())
    }
}

impl WebSocketExtension for PerMessageDeflate {
    fn name(&self) -> &'static str {
        PERMESSAGE_DEFLATE
    }

    fn transform_outbound(&mut self, mut frame: Frame) -> Result<Frame, Error> {
        if !frame.opcode.is_data() {
            return Ok(frame);
        }

        match self.send_state {
            SendState::Idle => {
                // A stray continuation has no message to belong to; the
                // protocol layer rejects it downstream.
                if frame.opcode == OpCode::Continue {
                    return Ok(frame);
                }
                let compress = frame.payload.len() >= self.min_frame_size_to_compress
                    || !frame.final_fragment;
                if !compress {
                    return Ok(frame);
                }
                self.compress_frame(&mut frame)?;
                frame.rsv1 = true;
                if !frame.final_fragment {
                    self.send_state = SendState::SendingMessage;
                }
            }
            SendState::SendingMessage => {
                self.compress_frame(&mut frame)?;
                if frame.final_fragment {
                    self.send_state = SendState::Idle;
                }
            }
        }

        Ok(frame)
    }

    fn transform_inbound(&mut self, mut frame: Frame) -> Result<Frame, Error> {
        if !frame.opcode.is_data() {
            return Ok(frame);
        }

        match self.receive_state {
            ReceiveState::Idle => {
                if frame.opcode == OpCode::Continue {
                    return Ok(frame);
                }
                if !frame.rsv1 {
                    if !frame.final_fragment {
                        self.receive_state = ReceiveState::UncompressedMessage;
                    }
                    return Ok(frame);
                }
                self.decompress_frame(&mut frame)?;
                frame.rsv1 = false;
                frame.mask_key = None;
                if !frame.final_fragment {
                    self.receive_state = ReceiveState::CompressedMessage;
                }
            }
            ReceiveState::CompressedMessage => {
                self.decompress_frame(&mut frame)?;
                frame.mask_key = None;
                if frame.final_fragment {
                    self.receive_state = ReceiveState::Idle;
                }
            }
            ReceiveState::UncompressedMessage => {
                if frame.final_fragment {
                    self.receive_state = ReceiveState::Idle;
                }
            }
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::parse_extensions_header;

    #[test]
    fn server_merges_window_bids() {
        let factory = DeflateFactory::new(DeflateOptions {
            client_max_window: Some(10),
            server_max_window: Some(12),
            ..Default::default()
        })
        .unwrap();

        let offers = parse_extensions_header(
            "permessage-deflate; client_max_window_bits=12; server_max_window_bits=11",
        );
        let (fragment, _) = factory.accept_offer(&offers[0]).unwrap().unwrap();

        assert!(fragment.contains("client_max_window_bits=10"));
        assert!(fragment.contains("server_max_window_bits=11"));
    }

    #[test]
    fn server_omits_unoffered_client_window() {
        let factory = DeflateFactory::new(DeflateOptions {
            client_max_window: Some(10),
            ..Default::default()
        })
        .unwrap();

        let offers = parse_extensions_header("permessage-deflate");
        let (fragment, _) = factory.accept_offer(&offers[0]).unwrap().unwrap();

        assert!(!fragment.contains("client_max_window_bits"));
        assert!(!fragment.contains("server_max_window_bits"));
    }

    #[test]
    fn server_ors_takeover_flags() {
        let factory = DeflateFactory::new(DeflateOptions {
            server_no_context_takeover: true,
            ..Default::default()
        })
        .unwrap();

        let offers = parse_extensions_header("permessage-deflate; client_no_context_takeover");
        let (fragment, _) = factory.accept_offer(&offers[0]).unwrap().unwrap();

        assert!(fragment.contains("client_no_context_takeover"));
        assert!(fragment.contains("server_no_context_takeover"));
    }

    #[test]
    fn client_mirrors_response_exactly() {
        let options = DeflateOptions {
            client_max_window: Some(9),
            server_max_window: Some(10),
            ..Default::default()
        };

        // the server dropped both window bounds; mirroring means unbounded
        // streams, not a fallback to what this side originally offered
        let response = DeflateBid::parse(&parse_extensions_header("permessage-deflate")[0]).unwrap();
        let negotiated = NegotiatedDeflate::for_client(&response, &options);
        assert_eq!(negotiated.send_max_window, None);
        assert_eq!(negotiated.receive_max_window, None);

        // echoed bounds are taken as-is, receive and send swapped
        let response = DeflateBid::parse(
            &parse_extensions_header(
                "permessage-deflate; client_max_window_bits=9; server_max_window_bits=12",
            )[0],
        )
        .unwrap();
        let negotiated = NegotiatedDeflate::for_client(&response, &options);
        assert_eq!(negotiated.send_max_window, Some(9));
        assert_eq!(negotiated.receive_max_window, Some(12));
    }

    #[test]
    fn unknown_parameter_declines_the_offer() {
        let factory = DeflateFactory::new(DeflateOptions::default()).unwrap();
        let offers = parse_extensions_header("permessage-deflate; use_lzma=yes");
        assert!(factory.accept_offer(&offers[0]).unwrap().is_none());
    }

    #[test]
    fn client_rejects_unknown_response_parameter() {
        let factory = DeflateFactory::new(DeflateOptions::default()).unwrap();
        let responses = parse_extensions_header("permessage-deflate; use_lzma=yes");
        assert!(factory.accept_response(&responses[0]).is_err());
    }

    #[test]
    fn small_single_frame_passes_uncompressed() {
        let mut extension = PerMessageDeflate::new(
            NegotiatedDeflate {
                send_max_window: None,
                receive_max_window: None,
                send_no_context_takeover: false,
                receive_no_context_takeover: false,
            },
            &DeflateOptions::default(),
        );

        let frame = Frame::data(OpCode::Text, b"tiny".to_vec(), true);
        let out = extension.transform_outbound(frame).unwrap();
        assert!(!out.rsv1);
        assert_eq!(out.payload, b"tiny");
    }

    fn round_trip_options(options: DeflateOptions) {
        let negotiated = NegotiatedDeflate {
            send_max_window: None,
            receive_max_window: None,
            send_no_context_takeover: options.client_no_context_takeover,
            receive_no_context_takeover: options.client_no_context_takeover,
        };
        let mut sender = PerMessageDeflate::new(negotiated.clone(), &options);
        let mut receiver = PerMessageDeflate::new(negotiated, &options);

        for chunk in 0..4u8 {
            let payload = vec![chunk; 2048];
            let frame = Frame::data(OpCode::Binary, payload.clone(), true);

            let compressed = sender.transform_outbound(frame).unwrap();
            assert!(compressed.rsv1);
            assert!(compressed.payload.len() < payload.len());

            let restored = receiver.transform_inbound(compressed).unwrap();
            assert!(!restored.rsv1);
            assert_eq!(restored.payload, payload);
        }
    }

    #[test]
    fn round_trip_with_context_takeover() {
        round_trip_options(DeflateOptions {
            max_decompressed_frame_size: 1 << 20,
            ..Default::default()
        });
    }

    #[test]
    fn round_trip_without_context_takeover() {
        round_trip_options(DeflateOptions {
            client_no_context_takeover: true,
            max_decompressed_frame_size: 1 << 20,
            ..Default::default()
        });
    }

    #[test]
    fn fragmented_message_marks_only_first_frame() {
        let options = DeflateOptions {
            max_decompressed_frame_size: 1 << 20,
            ..Default::default()
        };
        let negotiated = NegotiatedDeflate {
            send_max_window: None,
            receive_max_window: None,
            send_no_context_takeover: false,
            receive_no_context_takeover: false,
        };
        let mut sender = PerMessageDeflate::new(negotiated.clone(), &options);
        let mut receiver = PerMessageDeflate::new(negotiated, &options);

        // a small first fragment still compresses because the message spans frames
        let first = sender
            .transform_outbound(Frame::data(OpCode::Text, b"he".to_vec(), false))
            .unwrap();
        let middle = sender
            .transform_outbound(Frame::data(OpCode::Continue, b"ll".to_vec(), false))
            .unwrap();
        let last = sender
            .transform_outbound(Frame::data(OpCode::Continue, b"o!".to_vec(), true))
            .unwrap();

        assert!(first.rsv1);
        assert!(!middle.rsv1);
        assert!(!last.rsv1);

        let mut restored = Vec::new();
        for frame in [first, middle, last] {
            restored.extend(receiver.transform_inbound(frame).unwrap().payload);
        }
        assert_eq!(restored, b"hello!");
    }

    #[test]
    fn plain_fragments_pass_when_negotiated() {
        let mut receiver = PerMessageDeflate::new(
            NegotiatedDeflate {
                send_max_window: None,
                receive_max_window: None,
                send_no_context_takeover: false,
                receive_no_context_takeover: false,
            },
            &DeflateOptions::default(),
        );

        let first = receiver
            .transform_inbound(Frame::data(OpCode::Text, b"plain ".to_vec(), false))
            .unwrap();
        let last = receiver
            .transform_inbound(Frame::data(OpCode::Continue, b"text".to_vec(), true))
            .unwrap();

        assert_eq!(first.payload, b"plain ");
        assert_eq!(last.payload, b"text");
    }

    #[test]
    fn oversized_inflation_is_bounded() {
        let options = DeflateOptions {
            max_decompressed_frame_size: 512,
            min_frame_size_to_compress: 1,
            ..Default::default()
        };
        let negotiated = NegotiatedDeflate {
            send_max_window: None,
            receive_max_window: None,
            send_no_context_takeover: false,
            receive_no_context_takeover: false,
        };
        let mut sender = PerMessageDeflate::new(negotiated.clone(), &options);
        let mut receiver = PerMessageDeflate::new(negotiated, &options);

        let bomb = sender
            .transform_outbound(Frame::data(OpCode::Binary, vec![0u8; 8192], true))
            .unwrap();
        assert!(matches!(
            receiver.transform_inbound(bomb),
            Err(Error::MaxDecompressedSize)
        ));
    }
}
