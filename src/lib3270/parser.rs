//! Host-to-terminal 3270 record interpreter
//!
//! [`OrderParser`] simulates just enough of a 3270 terminal to tell where
//! the host writes each piece of text. It walks a record left to right,
//! tracks the buffer address through the orders and hands every run of
//! plain text, together with the address it starts at, to a
//! [`RecordSink`]. [`RecordAssembler`] reassembles records that arrive split
//! over several packets.

use log::{trace, warn};

use super::address::BufferAddress;
use super::codes::*;
use crate::error::{MecaffResult, ProtocolError};
use crate::protocol_common::telnet_base::{ends_with_eor, hex_dump};

/// Decoded flags of a field attribute byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldFlags {
    pub protected: bool,
    pub numeric: bool,
    pub intensified: bool,
    pub detectable: bool,
    pub invisible: bool,
    pub modified: bool,
}

impl FieldFlags {
    pub fn from_attribute(attr: u8) -> Self {
        let display = attr & ATTR_DISPLAY;
        Self {
            protected: attr & ATTR_PROTECTED != 0,
            numeric: attr & ATTR_NUMERIC != 0,
            intensified: display == DISPLAY_INTENSIFIED,
            detectable: display == DISPLAY_DETECTABLE || display == DISPLAY_INTENSIFIED,
            invisible: display == DISPLAY_HIDDEN,
            modified: attr & ATTR_MDT != 0,
        }
    }
}

/// Receiver of the events found while interpreting host records
pub trait RecordSink {
    /// A command code started a record (EW/EWA clear the screen)
    fn command(&mut self, command: CommandCode) -> MecaffResult<()>;

    /// A run of text written at `at`; the parser advances the address afterwards
    fn host_string(&mut self, text: &[u8], at: &BufferAddress) -> MecaffResult<()>;

    /// A field was started at the current address
    fn start_field(&mut self, flags: FieldFlags) -> MecaffResult<()>;

    /// A WSF record, from the command byte up to (excluding) the EOR
    fn structured_field(&mut self, record: &[u8]) -> MecaffResult<()>;

    /// Telnet end of record reached
    fn end_of_record(&mut self) -> MecaffResult<()> {
        Ok(())
    }
}

/// Stateful interpreter of 3270 output records
#[derive(Debug)]
pub struct OrderParser {
    address: BufferAddress,
    text: Vec<u8>,
}

impl Default for OrderParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderParser {
    pub fn new() -> Self {
        Self {
            address: BufferAddress::new(24, 80),
            text: Vec::with_capacity(256),
        }
    }

    pub fn address(&self) -> &BufferAddress {
        &self.address
    }

    fn flush_text(&mut self, sink: &mut dyn RecordSink) -> MecaffResult<()> {
        if self.text.is_empty() {
            return Ok(());
        }
        sink.host_string(&self.text, &self.address)?;
        self.address.move_next(self.text.len());
        self.text.clear();
        Ok(())
    }

    fn operands(data: &[u8], pos: usize, count: usize) -> MecaffResult<&[u8]> {
        data.get(pos + 1..pos + 1 + count).ok_or_else(|| {
            ProtocolError::IncompleteRecord {
                expected: pos + 1 + count,
                received: data.len(),
            }
            .into()
        })
    }

    /// Interpret one or more complete records.
    ///
    /// A truncated order at the end of the data ends interpretation with an
    /// `IncompleteRecord` error after all text before it was delivered.
    pub fn process(&mut self, data: &[u8], sink: &mut dyn RecordSink) -> MecaffResult<()> {
        let result = self.interpret(data, sink);
        let flushed = self.flush_text(sink);
        result.and(flushed)
    }

    fn interpret(&mut self, data: &[u8], sink: &mut dyn RecordSink) -> MecaffResult<()> {
        let mut pos = 0;
        let mut at_begin_of_record = true;

        while pos < data.len() {
            let code = data[pos];

            if at_begin_of_record {
                at_begin_of_record = false;
                match CommandCode::from_u8(code) {
                    Some(CommandCode::WriteStructuredField) => {
                        let end = find_record_end(data, pos);
                        sink.structured_field(&data[pos..end])?;
                        pos = end;
                    }
                    Some(cmd) => {
                        match cmd {
                            CommandCode::EraseWrite => {
                                self.address.set_term_rows(24);
                                trace!("CommandCode EW => 80x24");
                            }
                            CommandCode::EraseWriteAlternate => {
                                self.address.set_term_rows(43);
                                trace!("CommandCode EWA => 80x43");
                            }
                            _ => {}
                        }
                        sink.command(cmd)?;
                        pos += if cmd.has_wcc() { 2 } else { 1 };
                    }
                    None => {
                        warn!("skipped non-command byte 0x{code:02X} where command expected");
                        pos += 1;
                    }
                }
                continue;
            }

            if code == 0xFF && data.get(pos + 1) == Some(&0xEF) {
                self.flush_text(sink)?;
                sink.end_of_record()?;
                pos += 2;
                at_begin_of_record = true;
                continue;
            }

            match OrderCode::from_u8(code) {
                Some(OrderCode::StartField) => {
                    self.flush_text(sink)?;
                    let attr = Self::operands(data, pos, 1)?[0];
                    let flags = FieldFlags::from_attribute(attr);
                    trace!("Start-Field(SF) {flags:?}");
                    sink.start_field(flags)?;
                    self.address.move_next(1);
                    pos += 2;
                }
                Some(OrderCode::StartFieldExtended) | Some(OrderCode::ModifyField) => {
                    self.flush_text(sink)?;
                    let count = Self::operands(data, pos, 1)?[0] as usize;
                    let pairs = Self::operands(data, pos + 1, count * 2)?;
                    if code == ORDER_SFE {
                        if let Some(pair) = pairs.chunks(2).find(|p| p[0] == XA_3270) {
                            sink.start_field(FieldFlags::from_attribute(pair[1]))?;
                        } else {
                            sink.start_field(FieldFlags::default())?;
                        }
                        self.address.move_next(1);
                    }
                    pos += 2 + count * 2;
                }
                Some(OrderCode::SetBufferAddress) | Some(OrderCode::EraseUnprotectedToAddress) => {
                    self.flush_text(sink)?;
                    let ops = Self::operands(data, pos, 2)?;
                    self.address.decode(ops[0], ops[1]);
                    trace!("SBA/EUA => {}", self.address);
                    pos += 3;
                }
                Some(OrderCode::RepeatToAddress) => {
                    self.flush_text(sink)?;
                    let ops = Self::operands(data, pos, 3)?;
                    self.address.decode(ops[0], ops[1]);
                    trace!("Repeat-to-Address(RA) => {} (0x{:02X})", self.address, ops[2]);
                    pos += 4;
                }
                Some(OrderCode::InsertCursor) => {
                    self.flush_text(sink)?;
                    trace!("Insert-Cursor(IC) at {}", self.address);
                    pos += 1;
                }
                Some(OrderCode::ProgramTab) => {
                    self.flush_text(sink)?;
                    trace!("Program-Tab(PT)");
                    pos += 1;
                }
                Some(OrderCode::SetAttribute) => {
                    Self::operands(data, pos, 2)?;
                    pos += 3;
                }
                Some(OrderCode::GraphicEscape) => {
                    let ch = Self::operands(data, pos, 1)?[0];
                    self.text.push(ch);
                    pos += 2;
                }
                None => {
                    self.text.push(code);
                    // doubled IAC in data stands for one 0xFF
                    pos += if code == 0xFF && data.get(pos + 1) == Some(&0xFF) { 2 } else { 1 };
                }
            }
        }
        Ok(())
    }
}

/// Index of the next unescaped `IAC EOR` at or after `from`, or `data.len()`.
pub fn find_record_end(data: &[u8], from: usize) -> usize {
    let mut i = from + 1;
    while i + 1 < data.len() {
        if data[i] == 0xFF {
            if data[i + 1] == 0xEF {
                return i;
            }
            if data[i + 1] == 0xFF {
                i += 1;
            }
        }
        i += 1;
    }
    data.len()
}

/// Maximal number of bytes buffered while waiting for a record end
pub const MAX_PENDING_BYTES: usize = 32768;

/// Collects packets until they end with an unescaped `IAC EOR`.
#[derive(Debug, Default)]
pub struct RecordAssembler {
    pending: Vec<u8>,
}

impl RecordAssembler {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Add a packet; returns the complete records once the data ends with EOR.
    ///
    /// On overflow the buffered bytes are discarded and an error is returned.
    pub fn push(&mut self, packet: &[u8]) -> MecaffResult<Option<Vec<u8>>> {
        if self.pending.is_empty() && ends_with_eor(packet) {
            return Ok(Some(packet.to_vec()));
        }
        if self.pending.len() + packet.len() > MAX_PENDING_BYTES {
            let size = self.pending.len() + packet.len();
            warn!("discarding {size} bytes of incomplete 3270 output");
            trace!("discarded:\n{}", hex_dump(&self.pending));
            self.pending.clear();
            return Err(ProtocolError::PendingOverflow { size, max: MAX_PENDING_BYTES }.into());
        }
        self.pending.extend_from_slice(packet);
        if ends_with_eor(&self.pending) {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        commands: Vec<CommandCode>,
        strings: Vec<(usize, usize, Vec<u8>)>,
        fields: Vec<FieldFlags>,
        wsf: Vec<Vec<u8>>,
        eors: usize,
    }

    impl RecordSink for Recorder {
        fn command(&mut self, command: CommandCode) -> MecaffResult<()> {
            self.commands.push(command);
            Ok(())
        }
        fn host_string(&mut self, text: &[u8], at: &BufferAddress) -> MecaffResult<()> {
            self.strings.push((at.row(), at.col(), text.to_vec()));
            Ok(())
        }
        fn start_field(&mut self, flags: FieldFlags) -> MecaffResult<()> {
            self.fields.push(flags);
            Ok(())
        }
        fn structured_field(&mut self, record: &[u8]) -> MecaffResult<()> {
            self.wsf.push(record.to_vec());
            Ok(())
        }
        fn end_of_record(&mut self) -> MecaffResult<()> {
            self.eors += 1;
            Ok(())
        }
    }

    #[test]
    fn test_text_positions() {
        // EW, WCC, SBA(1,1) "AB", SBA(24,61) "RUNNING", EOR
        let mut data = vec![0xF5, 0xC3, 0x11, 0x40, 0x40, 0xC1, 0xC2];
        let mut ba = BufferAddress::new(24, 80);
        ba.set_row_col(24, 61);
        let [b1, b2] = ba.encode();
        data.extend_from_slice(&[0x11, b1, b2]);
        data.extend_from_slice(&crate::protocol_common::ascii_to_ebcdic_vec("RUNNING"));
        data.extend_from_slice(&[0xFF, 0xEF]);

        let mut parser = OrderParser::new();
        let mut rec = Recorder::default();
        parser.process(&data, &mut rec).unwrap();

        assert_eq!(rec.commands, vec![CommandCode::EraseWrite]);
        assert_eq!(rec.strings.len(), 2);
        assert_eq!((rec.strings[0].0, rec.strings[0].1), (1, 1));
        assert_eq!((rec.strings[1].0, rec.strings[1].1), (24, 61));
        assert_eq!(rec.eors, 1);
    }

    #[test]
    fn test_address_advances_after_text() {
        // W, WCC, SBA(1,1) "ABC" SF(unprotected invisible) "D"
        let data = [0xF1, 0xC3, 0x11, 0x40, 0x40, 0xC1, 0xC2, 0xC3, 0x1D, 0x4C, 0xC4, 0xFF, 0xEF];
        let mut parser = OrderParser::new();
        let mut rec = Recorder::default();
        parser.process(&data, &mut rec).unwrap();
        assert_eq!(rec.strings[1].1, 5);
        assert!(rec.fields[0].invisible);
        assert!(!rec.fields[0].protected);
    }

    #[test]
    fn test_wsf_is_delivered_and_skipped() {
        let data = [0xF3, 0x00, 0x05, 0x01, 0xFF, 0xFF, 0x02, 0xFF, 0xEF];
        let mut parser = OrderParser::new();
        let mut rec = Recorder::default();
        parser.process(&data, &mut rec).unwrap();
        assert_eq!(rec.wsf, vec![data[..7].to_vec()]);
        assert!(rec.strings.is_empty());
        assert_eq!(rec.eors, 1);
    }

    #[test]
    fn test_truncated_order() {
        let data = [0xF1, 0xC3, 0xC1, 0x11, 0x40];
        let mut parser = OrderParser::new();
        let mut rec = Recorder::default();
        assert!(parser.process(&data, &mut rec).is_err());
        assert_eq!(rec.strings.len(), 1);
    }

    #[test]
    fn test_assembler() {
        let mut asm = RecordAssembler::new();
        assert_eq!(asm.push(&[0xF1, 0xC3, 0xC1]).unwrap(), None);
        assert!(asm.has_pending());
        let rec = asm.push(&[0xC2, 0xFF, 0xEF]).unwrap().unwrap();
        assert_eq!(rec, vec![0xF1, 0xC3, 0xC1, 0xC2, 0xFF, 0xEF]);
        assert!(!asm.has_pending());
        assert_eq!(asm.push(&[0xF1, 0xFF, 0xEF]).unwrap(), Some(vec![0xF1, 0xFF, 0xEF]));
    }

    #[test]
    fn test_assembler_overflow() {
        let mut asm = RecordAssembler::new();
        assert!(asm.push(&vec![0x40; MAX_PENDING_BYTES]).unwrap().is_none());
        assert!(asm.push(&[0x40]).is_err());
        assert!(!asm.has_pending());
    }
}
