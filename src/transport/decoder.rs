//! Decoder for data received from the host programs
//!
//! Decoding never fails loudly: a malformed or truncated input sets a sticky
//! parse error flag and yields zero values. Callers check
//! [`DataDecoder::had_parse_error`] before trusting the result.

use super::encoding::{NibbleTable, TransportEncoding};

#[derive(Debug, Clone)]
pub struct DataDecoder {
    enc: TransportEncoding,
    data: Vec<u8>,
    pos: usize,
    parse_error: bool,
}

impl DataDecoder {
    pub fn new(enc: TransportEncoding) -> Self {
        Self {
            enc,
            data: Vec::new(),
            pos: 0,
            parse_error: false,
        }
    }

    /// Start decoding `data` from its beginning.
    pub fn use_buffer(&mut self, data: &[u8]) -> &mut Self {
        self.data.clear();
        self.data.extend_from_slice(data);
        self.reset()
    }

    /// Rewind to the beginning and clear the parse error.
    pub fn reset(&mut self) -> &mut Self {
        self.pos = 0;
        self.parse_error = false;
        self
    }

    pub fn had_parse_error(&self) -> bool {
        self.parse_error
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Undecoded rest of the input as text, `None` when fully consumed.
    pub fn remaining_to_string(&self) -> Option<String> {
        if self.at_end() {
            None
        } else {
            Some(self.enc.remote_to_string(self.remaining()))
        }
    }

    pub fn next_byte(&mut self) -> u8 {
        match self.data.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                b
            }
            None => {
                self.parse_error = true;
                0
            }
        }
    }

    /// Next byte as ASCII character.
    pub fn next_char(&mut self) -> char {
        let b = self.next_byte();
        self.enc.remote_to_string(&[b]).chars().next().unwrap_or('\0')
    }

    /// Consume `seq` if the remaining input starts with it.
    pub fn test_for(&mut self, seq: &[u8]) -> bool {
        if self.remaining().starts_with(seq) {
            self.pos += seq.len();
            true
        } else {
            false
        }
    }

    /// Consume the start sequence if present.
    pub fn test_for_start(&mut self) -> bool {
        let marker = self.enc.start_sequence().to_vec();
        self.test_for(&marker)
    }

    pub fn decode_int(&mut self) -> u32 {
        let mut value = 0u32;
        for _ in 0..8 {
            if self.at_end() {
                break;
            }
            let b = self.next_byte();
            if let Some(n) = self.enc.int_nibble_1.value(b) {
                value = (value << 4) | n as u32;
            } else if let Some(n) = self.enc.int_nibble_2.value(b) {
                return (value << 4) | n as u32;
            } else {
                break;
            }
        }
        self.parse_error = true;
        0
    }

    /// Decode a data block up to and including its last byte pair.
    pub fn decode_data(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while !self.at_end() {
            let b1 = self.next_byte();
            let b2 = self.next_byte();
            if self.parse_error {
                return out;
            }
            let (hi, hi_last) = Self::pair_value(b1, &self.enc.data_nibble_1_normal, &self.enc.data_nibble_1_last);
            let (lo, lo_last) = Self::pair_value(b2, &self.enc.data_nibble_2_normal, &self.enc.data_nibble_2_last);
            out.push((hi << 4) | lo);
            match usize::from(hi_last) + usize::from(lo_last) {
                2 => return out,
                1 => {
                    self.parse_error = true;
                    return out;
                }
                _ => {}
            }
        }
        self.parse_error = true;
        out
    }

    /// Nibble value and "last" flag, zero for bytes outside both tables.
    fn pair_value(b: u8, normal: &NibbleTable, last: &NibbleTable) -> (u8, bool) {
        if let Some(n) = normal.value(b) {
            (n, false)
        } else if let Some(n) = last.value(b) {
            (n, true)
        } else {
            (0, false)
        }
    }
}
