//! Outbound 3270 data stream builder
//!
//! Used by the console to paint the terminal screen. All data and operand
//! bytes are IAC-escaped while appended, so the finished buffer can be sent
//! as is after [`DataOutStream3270::telnet_eor`].

use super::address::{encode_6bit, encode_offset};
use super::codes::*;
use crate::protocol_common::ebcdic::ascii_to_ebcdic;

#[derive(Debug, Clone)]
pub struct DataOutStream3270 {
    buffer: Vec<u8>,
    cols: usize,
}

impl DataOutStream3270 {
    /// Create a builder for a screen `cols` characters wide.
    pub fn new(cols: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(8192),
            cols: cols.max(1),
        }
    }

    pub fn clear(&mut self) -> &mut Self {
        self.buffer.clear();
        self
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn push(&mut self, b: u8) {
        self.buffer.push(b);
        if b == 0xFF {
            self.buffer.push(0xFF);
        }
    }

    fn wcc(reset: bool, restore: bool, alarm: bool) -> u8 {
        let mut wcc = 0u8;
        if reset {
            wcc |= WCC_RESET;
        }
        if restore {
            wcc |= WCC_RESTORE;
        }
        if alarm {
            wcc |= WCC_ALARM;
        }
        encode_6bit(wcc)
    }

    fn command(&mut self, cmd: CommandCode, reset: bool, restore: bool, alarm: bool) -> &mut Self {
        self.push(cmd.to_u8());
        self.push(Self::wcc(reset, restore, alarm));
        self
    }

    pub fn cmd_write(&mut self, reset: bool, restore: bool, alarm: bool) -> &mut Self {
        self.command(CommandCode::Write, reset, restore, alarm)
    }

    pub fn cmd_erase_write(&mut self, reset: bool, restore: bool, alarm: bool) -> &mut Self {
        self.command(CommandCode::EraseWrite, reset, restore, alarm)
    }

    pub fn cmd_erase_write_alternate(&mut self, reset: bool, restore: bool, alarm: bool) -> &mut Self {
        self.command(CommandCode::EraseWriteAlternate, reset, restore, alarm)
    }

    fn address(&mut self, row: usize, col: usize) {
        let offset = (row.max(1) - 1) * self.cols + (col.max(1) - 1);
        let [b1, b2] = encode_offset(offset);
        self.push(b1);
        self.push(b2);
    }

    /// SBA to a 1-based row and column
    pub fn set_buffer_address(&mut self, row: usize, col: usize) -> &mut Self {
        self.push(ORDER_SBA);
        self.address(row, col);
        self
    }

    /// RA up to (excluding) the given position
    pub fn repeat_to_address(&mut self, row: usize, col: usize, ch: u8) -> &mut Self {
        self.push(ORDER_RA);
        self.address(row, col);
        self.push(ch);
        self
    }

    /// SA foreground color
    pub fn set_attribute_color(&mut self, color: u8) -> &mut Self {
        self.push(ORDER_SA);
        self.push(XA_FOREGROUND);
        self.push(color);
        self
    }

    fn field_attribute(protected: bool, numeric: bool, intensified: bool, invisible: bool, modified: bool) -> u8 {
        let mut attr = 0u8;
        if protected {
            attr |= ATTR_PROTECTED;
        }
        if numeric {
            attr |= ATTR_NUMERIC;
        }
        if invisible {
            attr |= DISPLAY_HIDDEN;
        } else if intensified {
            attr |= DISPLAY_INTENSIFIED;
        }
        if modified {
            attr |= ATTR_MDT;
        }
        encode_6bit(attr)
    }

    pub fn start_field(
        &mut self,
        protected: bool,
        numeric: bool,
        intensified: bool,
        invisible: bool,
        modified: bool,
    ) -> &mut Self {
        self.push(ORDER_SF);
        self.push(Self::field_attribute(protected, numeric, intensified, invisible, modified));
        self
    }

    /// SFE with the basic attribute, optional highlighting and a foreground color
    #[allow(clippy::too_many_arguments)]
    pub fn start_field_extended(
        &mut self,
        protected: bool,
        numeric: bool,
        intensified: bool,
        invisible: bool,
        modified: bool,
        highlight: Option<u8>,
        color: u8,
    ) -> &mut Self {
        let pairs = if highlight.is_some() { 3 } else { 2 };
        self.push(ORDER_SFE);
        self.push(pairs);
        self.push(XA_3270);
        self.push(Self::field_attribute(protected, numeric, intensified, invisible, modified));
        if let Some(hl) = highlight {
            self.push(XA_HIGHLIGHTING);
            self.push(hl);
        }
        self.push(XA_FOREGROUND);
        self.push(color);
        self
    }

    pub fn insert_cursor(&mut self) -> &mut Self {
        self.push(ORDER_IC);
        self
    }

    pub fn append_ebcdic(&mut self, data: &[u8]) -> &mut Self {
        for &b in data {
            self.push(b);
        }
        self
    }

    pub fn append_ascii(&mut self, text: &str) -> &mut Self {
        for ch in text.chars() {
            self.push(ascii_to_ebcdic(ch));
        }
        self
    }

    /// Terminate the record with an unescaped `IAC EOR`.
    pub fn telnet_eor(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[0xFF, 0xEF]);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_with_restore() {
        let mut s = DataOutStream3270::new(80);
        s.cmd_write(false, true, false).telnet_eor();
        assert_eq!(s.as_bytes(), &[0xF1, 0xC2, 0xFF, 0xEF]);
    }

    #[test]
    fn test_orders() {
        let mut s = DataOutStream3270::new(80);
        s.set_buffer_address(1, 1)
            .repeat_to_address(23, 1, 0x00)
            .set_attribute_color(COLOR_YELLOW)
            .append_ascii("Hi");
        assert_eq!(
            s.as_bytes(),
            &[0x11, 0x40, 0x40, 0x3C, 0x5B, 0x60, 0x00, 0x28, 0x42, 0xF6, 0xC8, 0x89]
        );
    }

    #[test]
    fn test_input_field() {
        let mut s = DataOutStream3270::new(80);
        s.start_field_extended(false, false, true, false, true, None, COLOR_TURQUOISE);
        // unprotected, intensified, modified => 0x09 => 0xC9
        assert_eq!(s.as_bytes(), &[0x29, 0x02, 0xC0, 0xC9, 0x42, 0xF5]);

        s.clear().start_field(true, false, false, false, false);
        assert_eq!(s.as_bytes(), &[0x1D, 0x60]);
    }

    #[test]
    fn test_data_iac_is_doubled() {
        let mut s = DataOutStream3270::new(80);
        s.append_ebcdic(&[0xC1, 0xFF]).telnet_eor();
        assert_eq!(s.as_bytes(), &[0xC1, 0xFF, 0xFF, 0xFF, 0xEF]);
    }
}
