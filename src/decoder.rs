use crate::error::Error;
use bytes::BytesMut;
use flate2::{Decompress, FlushDecompress, Status};

fn calculate_buffer_size(payload_size: usize) -> usize {
    if payload_size <= 4096 {
        4096 // 4 KB for small payloads
    } else if payload_size <= 65536 {
        16384 // 16 KB for medium payloads
    } else {
        65536 // 64 KB for large payloads
    }
}

pub(crate) const DEFLATE_TRAILER: [u8; 4] = [0, 0, 255, 255];

/// Streaming raw-inflate decompressor for one receive direction of a
/// connection. The stream keeps its sliding window across frames and across
/// messages, so fragments of a compressed message inflate as they arrive;
/// `reset` drops the window when no-context-takeover was negotiated.
pub(crate) struct Decoder {
    decompressor: Decompress,
}

impl Decoder {
    pub fn new(window_bits: Option<u8>) -> Self {
        let decompressor = match window_bits {
            // zlib's floor for raw inflate; a wider window than the peer's
            // compressor is always safe
            Some(window_bits) if window_bits < 15 => {
                Decompress::new_with_window_bits(false, window_bits.max(9))
            }
            _ => Decompress::new(false),
        };
        Self { decompressor }
    }

    /// Inflates one frame payload, producing at most `max_size` bytes. The
    /// caller appends the `00 00 FF FF` trailer to the final frame of a
    /// message before handing the payload in.
    pub fn decompress(&mut self, payload: &[u8], max_size: usize) -> Result<Vec<u8>, Error> {
        // adjust the buffer size, depending on the payload,
        // for balancing between CPU vs. Memory usage
        let buffer_size = calculate_buffer_size(payload.len());
        let mut decompressed_data = BytesMut::with_capacity(buffer_size);
        let mut buffer = Vec::with_capacity(buffer_size);

        let before_in = self.decompressor.total_in();

        // total_in() tracks how much of this payload the stream has eaten so
        // far; a frame that ends mid-block simply leaves the stream waiting
        // for the next fragment, which is exactly what RFC 7692 expects.
        while (self.decompressor.total_in() - before_in) < payload.len() as u64 {
            let i = (self.decompressor.total_in() - before_in) as usize;
            let input = &payload[i..];

            let before_out = self.decompressor.total_out();
            let status = self
                .decompressor
                .decompress_vec(input, &mut buffer, FlushDecompress::Sync)
                .map_err(|err| Error::DecompressionError(err.to_string()))?;

            let produced = (self.decompressor.total_out() - before_out) as usize;
            let consumed = (self.decompressor.total_in() - before_in) as usize;

            decompressed_data.extend_from_slice(&buffer);
            buffer.clear();

            if decompressed_data.len() > max_size {
                return Err(Error::MaxDecompressedSize);
            }

            match status {
                Status::StreamEnd => break,
                _ => {
                    if produced == 0 && consumed == i {
                        break;
                    }
                }
            }
        }

        Ok(decompressed_data.to_vec())
    }

    pub fn reset(&mut self) {
        self.decompressor.reset(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;

    fn round_trip(encoder: &mut Encoder, decoder: &mut Decoder, payload: &[u8]) -> Vec<u8> {
        let mut compressed = encoder.compress(payload).unwrap();
        assert!(compressed.ends_with(&DEFLATE_TRAILER));
        compressed.truncate(compressed.len() - 4);

        compressed.extend_from_slice(&DEFLATE_TRAILER);
        decoder.decompress(&compressed, 1 << 20).unwrap()
    }

    #[test]
    fn compress_then_decompress() {
        let mut encoder = Encoder::new(None, None);
        let mut decoder = Decoder::new(None);

        let payload = b"the quick brown fox jumps over the lazy dog".repeat(20);
        assert_eq!(round_trip(&mut encoder, &mut decoder, &payload), payload);
    }

    #[test]
    fn shared_context_survives_messages() {
        let mut encoder = Encoder::new(Some(9), Some(12));
        let mut decoder = Decoder::new(Some(12));

        for _ in 0..3 {
            let payload = b"repetitive payload, repetitive payload".to_vec();
            assert_eq!(round_trip(&mut encoder, &mut decoder, &payload), payload);
        }
    }

    #[test]
    fn reset_context_stays_in_sync() {
        let mut encoder = Encoder::new(None, Some(10));
        let mut decoder = Decoder::new(Some(10));

        for _ in 0..3 {
            let payload = b"no context takeover on either side".to_vec();
            assert_eq!(round_trip(&mut encoder, &mut decoder, &payload), payload);
            encoder.reset();
            decoder.reset();
        }
    }

    #[test]
    fn decompression_bound_is_enforced() {
        let mut encoder = Encoder::new(None, None);
        let mut decoder = Decoder::new(None);

        let payload = vec![0u8; 8192];
        let compressed = encoder.compress(&payload).unwrap();
        assert!(matches!(
            decoder.decompress(&compressed, 1024),
            Err(Error::MaxDecompressedSize)
        ));
    }
}
