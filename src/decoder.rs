//! Turns raw HID reports (or keyboard-wedge text) into barcode characters.
//!
//! A HID-class scanner "types" each barcode as a sequence of keyboard input
//! reports: one key-down report carrying the usage code, usually followed by
//! an all-zero key-up report, and a final Enter. Only the digit keys and
//! Enter matter for UPC/EAN codes; everything else is ignored.

use crate::constants::{REPORT_LEN, USAGE_OFFSET};

/// HID usage code of the Enter key.
pub const USAGE_ENTER: u8 = 0x28;

/// Usage codes 0x1E..=0x27, in order, map to these characters.
static DIGIT_USAGES: [(u8, char); 10] = [
    (0x1e, '1'),
    (0x1f, '2'),
    (0x20, '3'),
    (0x21, '4'),
    (0x22, '5'),
    (0x23, '6'),
    (0x24, '7'),
    (0x25, '8'),
    (0x26, '9'),
    (0x27, '0'),
];

/// What a single report means to the barcode accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Append(char),
    Terminate,
    Ignore,
}

/// Look up a single usage code in the digit table.
pub fn usage_to_action(usage: u8) -> KeyAction {
    if usage == USAGE_ENTER {
        return KeyAction::Terminate;
    }
    DIGIT_USAGES
        .iter()
        .find(|(code, _)| *code == usage)
        .map_or(KeyAction::Ignore, |&(_, c)| KeyAction::Append(c))
}

/// Decode one fixed-size input report.
pub fn decode_report(report: &[u8; REPORT_LEN]) -> KeyAction {
    usage_to_action(report[USAGE_OFFSET])
}

/// Barcode characters collected since the last terminator.
#[derive(Debug, Default)]
pub struct ScanAccumulator {
    buf: String,
}

impl ScanAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one action; returns the finished barcode on a non-empty terminate.
    pub fn feed(&mut self, action: KeyAction) -> Option<String> {
        match action {
            KeyAction::Append(c) => {
                self.buf.push(c);
                None
            }
            KeyAction::Terminate if !self.buf.is_empty() => Some(std::mem::take(&mut self.buf)),
            KeyAction::Terminate | KeyAction::Ignore => None,
        }
    }

    pub fn push_str(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }
}

/// Keyboard-wedge counterpart of [`KeyAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAction<'a> {
    Append(&'a str),
    Terminate,
}

/// Decode one text-input chunk. A chunk made only of CR/LF terminates the
/// barcode; anything else is appended verbatim.
pub fn decode_text(chunk: &str) -> TextAction<'_> {
    if !chunk.is_empty() && chunk.chars().all(|c| c == '\r' || c == '\n') {
        TextAction::Terminate
    } else {
        TextAction::Append(chunk)
    }
}
