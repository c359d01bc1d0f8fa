//! Character tables of the encoded transport
//!
//! The same printable letters are used for both line disciplines: plain
//! ASCII on a 3215 (CONS) connection, their EBCDIC code points on a 3270
//! (GRAF) connection.

use crate::protocol_common::ebcdic::{ascii_to_ebcdic, ebcdic_to_ascii};

/// Line discipline of a terminal connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Tn3215,
    Tn3270,
}

impl TransportMode {
    /// Session mode number reported to the host programs
    pub fn session_mode(&self) -> u32 {
        match self {
            Self::Tn3215 => 3215,
            Self::Tn3270 => 3270,
        }
    }
}

const START_SEQUENCE: &str = "<{>}";
const CHUNK_SIZE: usize = 50;

const INT_NIBBLE_1: &str = "abcdefghjklmnopq";
const INT_NIBBLE_2: &str = "ABCDEFGHJKLMNOPQ";
const DATA_NIBBLE_1_NORMAL: &str = "ABCDEFGHJKLMNOPQ";
const DATA_NIBBLE_2_NORMAL: &str = "STUVWXYZ23456789";
const DATA_NIBBLE_1_LAST: &str = "bcdefghiklmnopqr";
const DATA_NIBBLE_2_LAST: &str = "ABCDEFGHJKLMNOPQ";

/// 16 entry nibble table, split in two contiguous ranges of 8 codes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NibbleTable([u8; 16]);

impl NibbleTable {
    fn build(letters: &str, mode: TransportMode) -> Self {
        let mut table = [0u8; 16];
        for (slot, ch) in table.iter_mut().zip(letters.chars()) {
            *slot = match mode {
                TransportMode::Tn3215 => ch as u8,
                TransportMode::Tn3270 => ascii_to_ebcdic(ch),
            };
        }
        Self(table)
    }

    pub fn code(&self, nibble: u8) -> u8 {
        self.0[(nibble & 0x0F) as usize]
    }

    /// Nibble value for an encoded byte, if the byte belongs to the table.
    pub fn value(&self, b: u8) -> Option<u8> {
        let t = &self.0;
        if b >= t[0] && b <= t[7] {
            Some(b - t[0])
        } else if b >= t[8] && b <= t[15] {
            Some(b - t[8] + 8)
        } else {
            None
        }
    }
}

/// Tables and conversions for one line discipline
#[derive(Debug, Clone)]
pub struct TransportEncoding {
    mode: TransportMode,
    start_sequence: Vec<u8>,
    pub int_nibble_1: NibbleTable,
    pub int_nibble_2: NibbleTable,
    pub data_nibble_1_normal: NibbleTable,
    pub data_nibble_2_normal: NibbleTable,
    pub data_nibble_1_last: NibbleTable,
    pub data_nibble_2_last: NibbleTable,
}

impl TransportEncoding {
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            start_sequence: START_SEQUENCE.chars().map(|c| Self::convert(mode, c)).collect(),
            int_nibble_1: NibbleTable::build(INT_NIBBLE_1, mode),
            int_nibble_2: NibbleTable::build(INT_NIBBLE_2, mode),
            data_nibble_1_normal: NibbleTable::build(DATA_NIBBLE_1_NORMAL, mode),
            data_nibble_2_normal: NibbleTable::build(DATA_NIBBLE_2_NORMAL, mode),
            data_nibble_1_last: NibbleTable::build(DATA_NIBBLE_1_LAST, mode),
            data_nibble_2_last: NibbleTable::build(DATA_NIBBLE_2_LAST, mode),
        }
    }

    fn convert(mode: TransportMode, ch: char) -> u8 {
        match mode {
            TransportMode::Tn3215 => {
                if ch.is_ascii() {
                    ch as u8
                } else {
                    b'?'
                }
            }
            TransportMode::Tn3270 => ascii_to_ebcdic(ch),
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn session_mode(&self) -> u32 {
        self.mode.session_mode()
    }

    /// Max. number of bytes of a transmission unit to the host
    pub fn chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    /// Marker starting each command and each response chunk
    pub fn start_sequence(&self) -> &[u8] {
        &self.start_sequence
    }

    /// Remote code for a printable ASCII character (command codes, text).
    pub fn remote(&self, ch: char) -> u8 {
        Self::convert(self.mode, ch)
    }

    pub fn string_to_remote(&self, text: &str) -> Vec<u8> {
        text.chars().map(|c| Self::convert(self.mode, c)).collect()
    }

    pub fn remote_to_string(&self, data: &[u8]) -> String {
        match self.mode {
            TransportMode::Tn3215 => String::from_utf8_lossy(data).into_owned(),
            TransportMode::Tn3270 => data.iter().map(|&b| ebcdic_to_ascii(b)).collect(),
        }
    }
}
