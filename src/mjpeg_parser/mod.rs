//! MjpegParser - JPEG boundary scanner for MJPEG byte streams
//!
//! ## Responsibilities
//!
//! - Extract complete JPEG images (`FF D8` .. `FF D9`) from an unbounded,
//!   arbitrarily chunked byte stream
//! - Carry scanner state across chunks so markers may straddle reads
//! - Bound the frame buffer; an overlong frame is dropped and the scanner
//!   resyncs on the next start marker
//!
//! The parser does not decode; callers decode each emitted image and
//! discard it on failure.

/// JPEG start-of-image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Default frame buffer capacity (8 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Result of one `feed` call
#[derive(Debug, Default)]
pub struct FeedOutcome {
    /// Complete JPEG images, markers included, in stream order
    pub frames: Vec<Vec<u8>>,
    /// Frames dropped for exceeding the buffer capacity
    pub overflows: usize,
}

/// Two-state (Searching / InPicture) scanner
#[derive(Debug)]
pub struct MjpegParser {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
    in_picture: bool,
    previous_byte: u8,
}

impl MjpegParser {
    /// Create a parser with the given frame capacity
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes: max_frame_bytes.max(EOI.len() + SOI.len()),
            in_picture: false,
            previous_byte: 0,
        }
    }

    /// Whether the scanner is currently inside a picture
    pub fn in_picture(&self) -> bool {
        self.in_picture
    }

    /// Bytes accumulated for the picture in progress
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial picture and return to Searching
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.in_picture = false;
        self.previous_byte = 0;
    }

    /// Scan one chunk
    pub fn feed(&mut self, chunk: &[u8]) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();

        for &byte in chunk {
            if !self.in_picture {
                if self.previous_byte == SOI[0] && byte == SOI[1] {
                    self.buffer.clear();
                    self.buffer.extend_from_slice(&SOI);
                    self.in_picture = true;
                }
            } else if self.buffer.len() >= self.max_frame_bytes {
                tracing::warn!(
                    capacity = self.max_frame_bytes,
                    "MJPEG frame exceeded buffer capacity, resyncing"
                );
                outcome.overflows += 1;
                self.buffer.clear();
                self.in_picture = false;
            } else {
                self.buffer.push(byte);
                if self.previous_byte == EOI[0] && byte == EOI[1] {
                    let capacity = self.buffer.len();
                    outcome
                        .frames
                        .push(std::mem::replace(&mut self.buffer, Vec::with_capacity(capacity)));
                    self.in_picture = false;
                }
            }
            self.previous_byte = byte;
        }

        outcome
    }
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut bytes = SOI.to_vec();
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&EOI);
        bytes
    }

    #[test]
    fn test_single_chunk() {
        let mut parser = MjpegParser::default();
        let mut stream = b"--boundary\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        stream.extend(jpeg(b"payload"));
        stream.extend_from_slice(b"\r\n--boundary\r\n");

        let outcome = parser.feed(&stream);
        assert_eq!(outcome.frames, vec![jpeg(b"payload")]);
        assert!(!parser.in_picture());
    }

    #[test]
    fn test_split_at_every_offset() {
        let mut stream = b"junk\xFF".to_vec();
        stream.extend(jpeg(&[0x01, 0xFF, 0x00, 0x42, 0xD9, 0xFF, 0xD8, 0x07]));
        stream.extend_from_slice(b"\xFFtrailer");
        let expected = jpeg(&[0x01, 0xFF, 0x00, 0x42, 0xD9, 0xFF, 0xD8, 0x07]);

        for split in 0..=stream.len() {
            let mut parser = MjpegParser::default();
            let (a, b) = stream.split_at(split);
            let mut frames = parser.feed(a).frames;
            frames.extend(parser.feed(b).frames);
            assert_eq!(frames, vec![expected.clone()], "split at {}", split);
        }
    }

    #[test]
    fn test_single_byte_reads() {
        let mut parser = MjpegParser::default();
        let stream = [jpeg(b"one"), jpeg(b"two")].concat();

        let mut frames = Vec::new();
        for byte in &stream {
            frames.extend(parser.feed(std::slice::from_ref(byte)).frames);
        }
        assert_eq!(frames, vec![jpeg(b"one"), jpeg(b"two")]);
    }

    #[test]
    fn test_overflow_resyncs() {
        let mut parser = MjpegParser::new(16);
        let mut stream = jpeg(&[0x11; 64]);
        stream.extend(jpeg(b"small"));

        let outcome = parser.feed(&stream);
        assert_eq!(outcome.overflows, 1);
        assert_eq!(outcome.frames, vec![jpeg(b"small")]);
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut parser = MjpegParser::default();
        parser.feed(&[0xFF, 0xD8, 0x01, 0x02]);
        assert!(parser.in_picture());
        assert_eq!(parser.buffered(), 4);

        parser.reset();
        assert!(!parser.in_picture());
        assert!(parser.feed(&[0xFF, 0xD9]).frames.is_empty());
    }
}
