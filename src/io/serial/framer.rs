// src/io/serial/framer.rs
//
// Frame reassembly for the analyzer's serial output.
// Bytes arrive in arbitrary chunks; each dialect decides where a frame ends:
// - ASTM: one frame per `\n`-terminated line (`\r` is dropped later by the sanitizer)
// - KeyValue: the whole buffer becomes a frame once it contains `Date=`
//
// An incomplete frame that outgrows `max_length` is noise (wrong baud rate,
// missing terminator) and is discarded.

use crate::protocol::keyvalue::DATE_KEY;
use crate::protocol::Dialect;

/// Default cap on a single incomplete frame
pub const MAX_FRAME_LENGTH: usize = 8 * 1024;

// =============================================================================
// Internal Framer Trait
// =============================================================================

trait FramerImpl {
    /// Append `data` and return every frame it completes, in order.
    fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>>;
    /// Bytes held back as an incomplete frame
    fn pending(&self) -> &[u8];
    /// Drop the incomplete frame, returning it.
    fn take_pending(&mut self) -> Vec<u8>;
}

fn discard_oversized(buffer: &mut Vec<u8>, max_length: usize, framer: &str) {
    if buffer.len() > max_length {
        tlog!(
            "[framer] Warning: {} bytes without a {} frame end, discarding",
            buffer.len(),
            framer
        );
        buffer.clear();
    }
}

// =============================================================================
// Line Framer (ASTM)
// =============================================================================

struct LineFramer {
    buffer: Vec<u8>,
    max_length: usize,
}

impl LineFramer {
    fn new(max_length: usize) -> Self {
        LineFramer {
            buffer: Vec::with_capacity(1024),
            max_length,
        }
    }
}

impl FramerImpl for LineFramer {
    fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        // Only the new bytes can hold a line feed; the tail before them was already scanned
        let mut scan_from = self.buffer.len();
        self.buffer.extend_from_slice(data);

        while let Some(offset) = self.buffer[scan_from..].iter().position(|&b| b == b'\n') {
            let end = scan_from + offset;
            let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
            line.pop(); // '\n'
            lines.push(line);
            scan_from = 0;
        }

        discard_oversized(&mut self.buffer, self.max_length, "line");
        lines
    }

    fn pending(&self) -> &[u8] {
        &self.buffer
    }

    fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

// =============================================================================
// Sentinel Framer (KeyValue)
// =============================================================================

struct SentinelFramer {
    buffer: Vec<u8>,
    sentinel: &'static [u8],
    max_length: usize,
}

impl SentinelFramer {
    fn new(sentinel: &'static [u8], max_length: usize) -> Self {
        SentinelFramer {
            buffer: Vec::with_capacity(1024),
            sentinel,
            max_length,
        }
    }

    /// Search only where a match could newly appear: the appended bytes plus
    /// enough of the old tail to catch a sentinel split across feeds.
    fn sentinel_from(&self, old_len: usize) -> bool {
        let start = old_len.saturating_sub(self.sentinel.len() - 1);
        self.buffer[start..]
            .windows(self.sentinel.len())
            .any(|window| window == self.sentinel)
    }
}

impl FramerImpl for SentinelFramer {
    fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let old_len = self.buffer.len();
        self.buffer.extend_from_slice(data);

        if self.sentinel_from(old_len) {
            vec![std::mem::take(&mut self.buffer)]
        } else {
            discard_oversized(&mut self.buffer, self.max_length, "sentinel");
            Vec::new()
        }
    }

    fn pending(&self) -> &[u8] {
        &self.buffer
    }

    fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

// =============================================================================
// Public FrameReassembler
// =============================================================================

/// Stateful reassembler owning the AssemblyBuffer.
/// Never holds a frame that has already been returned; the buffer only
/// carries the tail of the next, still incomplete frame.
pub struct FrameReassembler {
    framer: Box<dyn FramerImpl + Send>,
}

impl FrameReassembler {
    /// Create a reassembler using the dialect's frame boundary rule
    pub fn new(dialect: Dialect) -> Self {
        Self::with_max_length(dialect, MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(dialect: Dialect, max_length: usize) -> Self {
        let framer: Box<dyn FramerImpl + Send> = match dialect {
            Dialect::Astm => Box::new(LineFramer::new(max_length)),
            Dialect::KeyValue => Box::new(SentinelFramer::new(DATE_KEY.as_bytes(), max_length)),
        };

        FrameReassembler { framer }
    }

    /// Feed raw bytes. Returns the raw (unsanitized) frames they complete.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.framer.feed(data)
    }

    pub fn pending_len(&self) -> usize {
        self.framer.pending().len()
    }

    /// Discard the incomplete frame, e.g. when the stream ends mid-message.
    pub fn take_pending(&mut self) -> Vec<u8> {
        self.framer.take_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_framing() {
        let mut framer = FrameReassembler::new(Dialect::Astm);

        let frames = framer.feed(b"H|\\|^&\r\nP|1\nO|1");

        assert_eq!(frames, vec![b"H|\\|^&\r".to_vec(), b"P|1".to_vec()]);
        assert_eq!(framer.pending_len(), 3);
    }

    #[test]
    fn test_line_split_across_feeds() {
        let mut framer = FrameReassembler::new(Dialect::Astm);

        assert!(framer.feed(b"R|1|^^^GL").is_empty());
        assert!(framer.feed(b"U|5.6\r").is_empty());
        let frames = framer.feed(b"\nL|1|N\r\n");

        assert_eq!(frames, vec![b"R|1|^^^GLU|5.6\r".to_vec(), b"L|1|N\r".to_vec()]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_blank_lines_are_frames() {
        let mut framer = FrameReassembler::new(Dialect::Astm);
        let frames = framer.feed(b"\n\r\n");
        assert_eq!(frames, vec![Vec::new(), b"\r".to_vec()]);
    }

    #[test]
    fn test_sentinel_framing() {
        let mut framer = FrameReassembler::new(Dialect::KeyValue);

        assert!(framer.feed(b"SampleID=,S1,Conc=,4,").is_empty());
        let frames = framer.feed(b"Date=,now");

        assert_eq!(frames, vec![b"SampleID=,S1,Conc=,4,Date=,now".to_vec()]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_sentinel_split_across_feeds() {
        let mut framer = FrameReassembler::new(Dialect::KeyValue);

        assert!(framer.feed(b"Conc=,4,Da").is_empty());
        assert_eq!(framer.feed(b"te").len(), 0);
        assert_eq!(framer.feed(b"=").len(), 1);
    }

    #[test]
    fn test_sentinel_takes_whole_buffer() {
        // Back-to-back reports seen in a single read come out as one frame
        let mut framer = FrameReassembler::new(Dialect::KeyValue);
        let frames = framer.feed(b"SampleID=,A,Date=,1,SampleID=,B,Date=,2");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_take_pending() {
        let mut framer = FrameReassembler::new(Dialect::Astm);
        framer.feed(b"O|1|S1");

        assert_eq!(framer.take_pending(), b"O|1|S1".to_vec());
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_line_max_length() {
        let mut framer = FrameReassembler::with_max_length(Dialect::Astm, 16);

        assert!(framer.feed(b"0123456789").is_empty());
        assert_eq!(framer.pending_len(), 10);

        // Overflow drops the runaway line; the stream resyncs on the next line feed
        assert!(framer.feed(b"0123456789").is_empty());
        assert_eq!(framer.pending_len(), 0);

        let frames = framer.feed(b"tail\nL|1|N\n");
        assert_eq!(frames, vec![b"tail".to_vec(), b"L|1|N".to_vec()]);
    }

    #[test]
    fn test_complete_lines_survive_overflowing_tail() {
        let mut framer = FrameReassembler::with_max_length(Dialect::Astm, 8);
        let frames = framer.feed(b"P|1\n0123456789");

        assert_eq!(frames, vec![b"P|1".to_vec()]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_sentinel_max_length() {
        let mut framer = FrameReassembler::with_max_length(Dialect::KeyValue, 32);

        for _ in 0..10 {
            assert!(framer.feed(b"xxxxxxxxxx").is_empty());
            assert!(framer.pending_len() <= 32);
        }

        let frames = framer.feed(b"SampleID=,S1,Date=,now");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].ends_with(b"SampleID=,S1,Date=,now"));
    }

    #[test]
    fn test_sentinel_noise_stays_bounded() {
        let mut framer = FrameReassembler::new(Dialect::KeyValue);
        let noise = vec![b'x'; 1024];

        for _ in 0..2000 {
            assert!(framer.feed(&noise).is_empty());
        }
        assert!(framer.pending_len() <= MAX_FRAME_LENGTH);

        assert_eq!(framer.feed(b"Da").len(), 0);
        assert_eq!(framer.feed(b"te=").len(), 1);
    }

    #[test]
    fn test_sentinel_split_one_byte_at_a_time() {
        let mut framer = FrameReassembler::new(Dialect::KeyValue);
        let report = b"SampleID=,S1,Analyte=,TSH,Conc=,1,Date=,now";
        let mut frames = Vec::new();

        for byte in report.iter() {
            frames.extend(framer.feed(std::slice::from_ref(byte)));
        }

        assert_eq!(frames, vec![b"SampleID=,S1,Analyte=,TSH,Conc=,1,Date=".to_vec()]);
        assert_eq!(framer.feed(b",now").len(), 0);
    }
}
