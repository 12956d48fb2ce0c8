//! Block normalization
//!
//! Turns a raw program line into the compact block Grbl receives: comment removed,
//! whitespace removed, upper-cased. Blank and comment-only lines produce nothing and are
//! never sent.

/// Start of a line comment (runs to end of line)
pub const COMMENT_MARKER: char = ';';

/// Line terminator appended to every block on the wire
pub const LINE_TERMINATOR: u8 = b'\n';

/// A normalized block ready for transmission
///
/// `seq` is the send sequence index, assigned by the streamer when the block is queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBlock {
    text: String,
    seq: u64,
}

impl StreamBlock {
    /// Wrap an already-normalized block text
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            seq: 0,
        }
    }

    /// Assign the send sequence index
    pub fn sequenced(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Normalized text without terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Send sequence index
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Bytes this block occupies in the controller's receive buffer (text + `\n`)
    #[inline]
    pub fn wire_len(&self) -> usize {
        self.text.len() + 1
    }

    /// Encoded bytes including the terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.wire_len());
        bytes.extend_from_slice(self.text.as_bytes());
        bytes.push(LINE_TERMINATOR);
        bytes
    }
}

/// Strip comment and whitespace, upper-case the remainder
///
/// Returns an empty string for blank or comment-only lines.
pub fn strip(raw: &str) -> String {
    let code = match raw.find(COMMENT_MARKER) {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    code.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Comment text of a raw line, if any (without the marker)
pub fn comment(raw: &str) -> Option<&str> {
    raw.find(COMMENT_MARKER).map(|idx| raw[idx + COMMENT_MARKER.len_utf8()..].trim())
}

/// Normalize a raw line into a block; `None` for lines that must be skipped
pub fn normalize(raw: &str) -> Option<StreamBlock> {
    let text = strip(raw);
    if text.is_empty() {
        None
    } else {
        Some(StreamBlock::new(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_comment_and_whitespace() {
        let block = normalize("G1 X10 Y20 S500 ; beep").unwrap();
        assert_eq!(block.text(), "G1X10Y20S500");
        assert_eq!(block.wire_len(), 13);
    }

    #[test]
    fn test_normalize_upper_cases() {
        let block = normalize("  g0\tx-1.5 y2  ").unwrap();
        assert_eq!(block.text(), "G0X-1.5Y2");
    }

    #[test]
    fn test_blank_and_comment_lines_normalize_to_nothing() {
        assert!(normalize("").is_none());
        assert!(normalize("   \t ").is_none());
        assert!(normalize("; only a comment").is_none());
        assert!(normalize("   ;G1 X10").is_none());
    }

    #[test]
    fn test_to_bytes_appends_terminator() {
        let block = StreamBlock::new("G90");
        assert_eq!(block.to_bytes(), b"G90\n".to_vec());
        assert_eq!(block.to_bytes().len(), block.wire_len());
    }

    #[test]
    fn test_sequenced() {
        let block = StreamBlock::new("G1X1").sequenced(42);
        assert_eq!(block.seq(), 42);
        assert_eq!(block.text(), "G1X1");
    }

    #[test]
    fn test_comment() {
        assert_eq!(comment("G1 X1 ; beep"), Some("beep"));
        assert_eq!(comment("G1 X1"), None);
        assert_eq!(comment(";"), Some(""));
    }
}
