//! 3270 buffer addressing
//!
//! A buffer address is a linear offset into the screen buffer, carried on the
//! wire either as two 6-bit encoded bytes (12-bit addressing) or as a plain
//! 14-bit value. Rows and columns are 1-based.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Standard 3270 screen sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenSize {
    /// Model 2: 24 rows x 80 columns
    Model2,
    /// Model 3: 32 rows x 80 columns
    Model3,
    /// Model 4: 43 rows x 80 columns
    Model4,
    /// Model 5: 27 rows x 132 columns
    Model5,
}

impl ScreenSize {
    pub fn rows(&self) -> usize {
        match self {
            Self::Model2 => 24,
            Self::Model3 => 32,
            Self::Model4 => 43,
            Self::Model5 => 27,
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            Self::Model5 => 132,
            _ => 80,
        }
    }

    /// Alternate screen size for the model digit of an `IBM-327x-n` name
    pub fn from_model_digit(digit: char) -> Option<Self> {
        match digit {
            '2' => Some(Self::Model2),
            '3' => Some(Self::Model3),
            '4' => Some(Self::Model4),
            '5' => Some(Self::Model5),
            _ => None,
        }
    }
}

/// Translation of a 6-bit value into the printable EBCDIC code used for
/// 12-bit addresses, WCC and field attribute bytes.
const CODES_6BIT: [u8; 64] = [
    0x40, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7,
    0xC8, 0xC9, 0x4A, 0x4B, 0x4C, 0x4D, 0x4E, 0x4F,
    0x50, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7,
    0xD8, 0xD9, 0x5A, 0x5B, 0x5C, 0x5D, 0x5E, 0x5F,
    0x60, 0x61, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7,
    0xE8, 0xE9, 0x6A, 0x6B, 0x6C, 0x6D, 0x6E, 0x6F,
    0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7,
    0xF8, 0xF9, 0x7A, 0x7B, 0x7C, 0x7D, 0x7E, 0x7F,
];

/// Encode the low 6 bits of `value` as printable EBCDIC.
///
/// ```
/// use mecaff::lib3270::address::encode_6bit;
///
/// assert_eq!(encode_6bit(0x02), 0xC2);
/// assert_eq!(encode_6bit(0x00), 0x40);
/// ```
pub fn encode_6bit(value: u8) -> u8 {
    CODES_6BIT[(value & 0x3F) as usize]
}

/// Cursor into the simulated 3270 screen buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAddress {
    offset: usize,
    rows: usize,
    cols: usize,
}

impl Default for BufferAddress {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

impl BufferAddress {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            offset: 0,
            rows: rows.max(1),
            cols: cols.max(1),
        }
    }

    fn size(&self) -> usize {
        self.rows * self.cols
    }

    /// Change the number of rows, keeping the position inside the buffer.
    pub fn set_term_rows(&mut self, rows: usize) {
        self.rows = rows.max(1);
        self.offset %= self.size();
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 1-based row
    pub fn row(&self) -> usize {
        self.offset / self.cols + 1
    }

    /// 1-based column
    pub fn col(&self) -> usize {
        self.offset % self.cols + 1
    }

    /// Position at a 1-based row and column (clamped to the screen).
    pub fn set_row_col(&mut self, row: usize, col: usize) {
        let row = row.clamp(1, self.rows);
        let col = col.clamp(1, self.cols);
        self.offset = (row - 1) * self.cols + (col - 1);
    }

    /// Decode a 2-byte wire address, selecting 12- or 14-bit mode from the
    /// two high bits of the first byte.
    pub fn decode(&mut self, b1: u8, b2: u8) {
        let raw = if b1 & 0xC0 == 0 {
            ((b1 as usize & 0x3F) << 8) | b2 as usize
        } else {
            ((b1 as usize & 0x3F) << 6) | (b2 as usize & 0x3F)
        };
        self.offset = raw % self.size();
    }

    /// Encode the current position: 12-bit form while it fits, else 14-bit.
    pub fn encode(&self) -> [u8; 2] {
        encode_offset(self.offset)
    }

    pub fn move_next(&mut self, count: usize) {
        self.offset = (self.offset + count) % self.size();
    }
}

/// Wire encoding for a linear buffer offset.
pub fn encode_offset(offset: usize) -> [u8; 2] {
    if offset < 4096 {
        [encode_6bit((offset >> 6) as u8), encode_6bit(offset as u8)]
    } else {
        [((offset >> 8) & 0x3F) as u8, (offset & 0xFF) as u8]
    }
}

impl fmt::Display for BufferAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferAddress[row: {}, col: {}]", self.row(), self.col())
    }
}
