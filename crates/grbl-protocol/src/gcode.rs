//! Motion operand extraction
//!
//! A deliberately small tokenizer: a normalized block is a run of words, each an upper-case
//! letter followed by a signed decimal number. Only G0/G1 blocks carry motion metadata;
//! everything else passes through the streamer untouched.
//!
//! # Example
//!
//! ```
//! use grbl_protocol::gcode::{parse, MotionKind};
//!
//! let motion = parse("G1 X-10.5 Y20 F2000 S800").unwrap();
//! assert_eq!(motion.kind, MotionKind::Cut);
//! assert_eq!(motion.dx, -10.5);
//! assert_eq!(motion.feed, Some(2000.0));
//! assert_eq!(motion.power, 800.0);
//! ```

use crate::ProtocolError;
use crate::block::strip;
use smallvec::SmallVec;
use std::borrow::Cow;

/// One g-code word: letter plus the number exactly as written
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Word<'a> {
    pub letter: char,
    /// Number text as it appeared in the block (sign and fraction preserved)
    pub raw: &'a str,
    /// Byte offset of `raw` in the block
    pub offset: usize,
    pub value: f64,
}

/// Words of one block; typical blocks have fewer than 8 words
pub type Words<'a> = SmallVec<[Word<'a>; 8]>;

/// Split a normalized block into words
///
/// The block must already be stripped and upper-cased (see [`crate::block::strip`]).
/// Parenthesized comments are skipped. System commands such as `$H` are not g-code words
/// and are rejected.
pub fn tokenize(block: &str) -> Result<Words<'_>, ProtocolError> {
    scan_words(block, true)
}

/// Words of a block, skipping comments and anything that is not a word
///
/// Motion metadata only needs the operands, wherever they are in the line.
fn lenient_words(block: &str) -> Words<'_> {
    scan_words(block, false).unwrap_or_default()
}

fn scan_words(block: &str, strict: bool) -> Result<Words<'_>, ProtocolError> {
    let bytes = block.as_bytes();
    let mut words = Words::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'(' {
            match bytes[i..].iter().position(|&b| b == b')') {
                Some(len) => {
                    i += len + 1;
                    continue;
                },
                None if strict => return Err(invalid_word(block, i)),
                None => break,
            }
        }

        let letter = bytes[i];
        if !letter.is_ascii_uppercase() {
            if strict {
                return Err(invalid_word(block, i));
            }
            i += 1;
            continue;
        }

        let start = i + 1;
        let mut j = start;
        if j < bytes.len() && (bytes[j] == b'-' || bytes[j] == b'+') {
            j += 1;
        }
        let mut digits = 0;
        let mut dot = false;
        while j < bytes.len() {
            match bytes[j] {
                b'0'..=b'9' => digits += 1,
                b'.' if !dot => dot = true,
                _ => break,
            }
            j += 1;
        }
        let value = (digits > 0)
            .then(|| block[start..j].parse::<f64>().ok())
            .flatten();
        let Some(value) = value else {
            if strict {
                return Err(invalid_word(block, i));
            }
            i += 1;
            continue;
        };

        words.push(Word {
            letter: letter as char,
            raw: &block[start..j],
            offset: start,
            value,
        });
        i = j;
    }

    Ok(words)
}

fn invalid_word(block: &str, position: usize) -> ProtocolError {
    ProtocolError::InvalidWord {
        block: block.to_string(),
        position,
    }
}

/// Motion mode of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MotionKind {
    /// G0 positioning move (laser never fires)
    Rapid,
    /// G1 cutting move
    Cut,
}

/// Motion metadata of a G0/G1 block
///
/// Axis operands are treated as deltas; absent operands are 0. `power` is only read from
/// cutting moves and is 0 when absent.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Motion {
    pub kind: MotionKind,
    pub dx: f64,
    pub dy: f64,
    pub feed: Option<f64>,
    pub power: f64,
}

impl Motion {
    /// Euclidean length of the move
    #[inline]
    pub fn distance(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    #[inline]
    pub fn is_cut(&self) -> bool {
        self.kind == MotionKind::Cut
    }

    /// Power times distance, the contribution to the pass's power integral
    #[inline]
    pub fn power_integral(&self) -> f64 {
        self.power * self.distance()
    }
}

/// Motion kind of a G word, if it is G0/G1 (G00/G01 accepted)
fn motion_kind(word: &Word<'_>) -> Option<MotionKind> {
    if word.letter != 'G' || word.raw.contains('.') {
        return None;
    }
    match word.value as i64 {
        0 if word.value == 0.0 => Some(MotionKind::Rapid),
        1 if word.value == 1.0 => Some(MotionKind::Cut),
        _ => None,
    }
}

fn motion_from_words(words: &[Word<'_>]) -> Option<Motion> {
    let kind = words.iter().find_map(motion_kind)?;
    let operand = |letter: char| words.iter().find(|w| w.letter == letter).map(|w| w.value);

    Some(Motion {
        kind,
        dx: operand('X').unwrap_or(0.0),
        dy: operand('Y').unwrap_or(0.0),
        feed: operand('F'),
        power: match kind {
            MotionKind::Cut => operand('S').unwrap_or(0.0),
            MotionKind::Rapid => 0.0,
        },
    })
}

/// Extract motion metadata from a raw program line
///
/// Returns `None` for anything that is not a G0/G1 block, such as `$` system commands.
/// Operand order is irrelevant; parenthesized comments and stray characters are ignored.
pub fn parse(raw: &str) -> Option<Motion> {
    let block = strip(raw);
    motion_from_words(&lenient_words(&block))
}

/// Whether a raw line is a rapid move setting both X and Y
///
/// In absolute mode such a line is a complete start position for the program.
pub fn is_xy_rapid(raw: &str) -> bool {
    let block = strip(raw);
    let words = lenient_words(&block);
    let has = |letter: char| words.iter().any(|w| w.letter == letter);
    matches!(motion_from_words(&words), Some(m) if m.kind == MotionKind::Rapid) && has('X') && has('Y')
}

/// Operand replacement applied before transmission
///
/// - `laser_pct`: replaces the power operand of cutting moves that fire the laser
///   (`S > 0`) with `laser_pct * 10` (percent to per-mille)
/// - `speed`: replaces the feed operand of cutting moves verbatim (mm/min)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Substitution {
    pub laser_pct: Option<u32>,
    pub speed: Option<u32>,
}

impl Substitution {
    pub fn is_empty(&self) -> bool {
        self.laser_pct.is_none() && self.speed.is_none()
    }

    /// Substitute operands in a normalized block
    ///
    /// Only the numbers of the replaced `S`/`F` words change; everything else, comments
    /// included, is kept byte for byte. Blocks that are not cutting moves are returned
    /// unchanged.
    pub fn apply<'a>(&self, block: &'a str) -> Cow<'a, str> {
        if self.is_empty() {
            return Cow::Borrowed(block);
        }
        let words = lenient_words(block);
        let Some(motion) = motion_from_words(&words) else {
            return Cow::Borrowed(block);
        };
        if !motion.is_cut() {
            return Cow::Borrowed(block);
        }

        let power = self.laser_pct.filter(|_| motion.power > 0.0);
        let feed = self.speed.filter(|_| motion.feed.is_some());
        if power.is_none() && feed.is_none() {
            return Cow::Borrowed(block);
        }

        let mut out = String::with_capacity(block.len() + 4);
        let mut copied = 0;
        for word in &words {
            let value = match (word.letter, power, feed) {
                ('S', Some(pct), _) => pct * 10,
                ('F', _, Some(speed)) => speed,
                _ => continue,
            };
            out.push_str(&block[copied..word.offset]);
            out.push_str(&value.to_string());
            copied = word.offset + word.raw.len();
        }
        out.push_str(&block[copied..]);
        Cow::Owned(out)
    }
}
