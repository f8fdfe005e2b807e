use crate::error::Error;
use crate::frame::{apply_mask, Frame};
use crate::stream::WaveStream;
use rand::random;
use tokio::io::{AsyncWriteExt, WriteHalf};

pub enum WriterKind {
    Client,
    Server,
}

pub struct Writer {
    write_half: WriteHalf<WaveStream>,
    kind: WriterKind,
}

impl Writer {
    pub fn new(write_half: WriteHalf<WaveStream>, kind: WriterKind) -> Self {
        Self { write_half, kind }
    }

    /// Serializes one frame onto the wire. Frames from a client are masked
    /// with a fresh random key; frames from a server are never masked.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        match self.kind {
            WriterKind::Client => self.write_frame_client(frame).await,
            WriterKind::Server => self.write_frame_server(frame).await,
        }
    }

    /// Closes the write side of the transport. The server calls this once
    /// the close handshake completes; the client instead waits for the
    /// server's FIN.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.write_half.shutdown().await?;
        Ok(())
    }

    fn first_byte(frame: &Frame) -> u8 {
        // fin sits in the top bit, the three rsv flags follow, and the
        // opcode takes the low nibble
        let mut first_byte = (frame.final_fragment as u8) << 7 | frame.opcode.as_u8();
        if frame.rsv1 {
            first_byte |= 0x40;
        }
        if frame.rsv2 {
            first_byte |= 0x20;
        }
        if frame.rsv3 {
            first_byte |= 0x10;
        }
        first_byte
    }

    async fn write_frame_server(&mut self, frame: Frame) -> Result<(), Error> {
        let first_byte = Self::first_byte(&frame);
        let payload_len = frame.payload.len();

        self.write_half.write_all(&[first_byte]).await?;

        // lengths up to 125 fit the header byte itself; 126 and 127 are
        // escape markers for a 16-bit and a 64-bit big-endian length
        if payload_len <= 125 {
            self.write_half.write_all(&[payload_len as u8]).await?;
        } else if payload_len <= 65535 {
            self.write_half
                .write_all(&[126, (payload_len >> 8) as u8, payload_len as u8])
                .await?;
        } else {
            let bytes = payload_len.to_be_bytes();
            self.write_half
                .write_all(&[
                    127, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6],
                    bytes[7],
                ])
                .await?;
        }

        self.write_half.write_all(&frame.payload).await?;

        Ok(())
    }

    // Method used for writing frames into the socket by clients
    async fn write_frame_client(&mut self, mut frame: Frame) -> Result<(), Error> {
        // every client frame gets its own random key; reusing one across
        // frames would defeat the point of masking
        let mask = random::<[u8; 4]>();
        frame.mask_key = Some(mask);

        let first_byte = Self::first_byte(&frame);
        let payload_len = frame.payload.len();

        self.write_half.write_all(&[first_byte]).await?;

        if payload_len <= 125 {
            // the mask bit rides on top of the length byte, and the key
            // follows whichever length form was used
            self.write_half
                .write_all(&[0b1000_0000 | payload_len as u8])
                .await?;
            self.write_half.write_all(&mask).await?;
        } else if payload_len <= 65535 {
            self.write_half
                .write_all(&[
                    126 | 0b1000_0000,
                    (payload_len >> 8) as u8,
                    payload_len as u8,
                ])
                .await?;
            self.write_half.write_all(&mask).await?;
        } else {
            let bytes = payload_len.to_be_bytes();
            self.write_half
                .write_all(&[
                    127 | 0b1000_0000,
                    bytes[0],
                    bytes[1],
                    bytes[2],
                    bytes[3],
                    bytes[4],
                    bytes[5],
                    bytes[6],
                    bytes[7],
                ])
                .await?;
            self.write_half.write_all(&mask).await?;
        }

        apply_mask(&mut frame.payload, mask);
        self.write_half.write_all(&frame.payload).await?;

        Ok(())
    }
}
