use crate::error::Error;
use flate2::{Compress, Compression, FlushCompress, Status};

fn calculate_buffer_size(payload_size: usize) -> usize {
    if payload_size <= 4096 {
        4096 // 4 KB for small payloads
    } else if payload_size <= 65536 {
        16384 // 16 KB for medium payloads
    } else {
        65536 // 64 KB for large payloads
    }
}

/// Streaming raw-deflate compressor for one send direction of a connection.
///
/// Every chunk is compressed with a sync flush, so the output of each call
/// ends with the `00 00 FF FF` trailer. The caller strips the trailer on the
/// final frame of a message and calls `reset` when the negotiated parameters
/// ask for no context takeover.
pub(crate) struct Encoder {
    compressor: Compress,
}

impl Encoder {
    pub fn new(level: Option<u32>, window_bits: Option<u8>) -> Self {
        let compression = match level {
            Some(level) => Compression::new(level),
            None => Compression::default(),
        };
        let compressor = match window_bits {
            // zlib cannot run raw deflate below 9 window bits and remaps 8
            // to 9 itself, so a negotiated 8 becomes 9 here
            Some(window_bits) if window_bits < 15 => {
                Compress::new_with_window_bits(compression, false, window_bits.max(9))
            }
            _ => Compress::new(compression, false),
        };
        Self { compressor }
    }

    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let buffer_size = calculate_buffer_size(payload.len());
        let mut output = Vec::with_capacity(buffer_size);

        let before_in = self.compressor.total_in();

        loop {
            let consumed = (self.compressor.total_in() - before_in) as usize;
            let input = &payload[consumed..];

            if output.len() == output.capacity() {
                output.reserve(buffer_size);
            }

            let before_out = self.compressor.total_out();
            let status = self
                .compressor
                .compress_vec(input, &mut output, FlushCompress::Sync)
                .map_err(|err| Error::CompressionError(err.to_string()))?;

            let produced = (self.compressor.total_out() - before_out) as usize;
            let consumed = (self.compressor.total_in() - before_in) as usize;

            if let Status::StreamEnd = status {
                break;
            }

            // The sync flush is complete once all input is consumed and a
            // call with spare output capacity yields nothing more.
            if consumed == payload.len() && produced == 0 && output.len() < output.capacity() {
                break;
            }
        }

        Ok(output)
    }

    pub fn reset(&mut self) {
        self.compressor.reset();
    }
}
