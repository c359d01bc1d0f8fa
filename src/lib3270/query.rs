//! WSF query handling
//!
//! Two directions are covered here:
//! - towards the terminal, the Read-Partition Query sent after negotiation and
//!   the parsing of the terminal's Query Reply structured fields;
//! - towards the host, the canned replies returned when the host queries the
//!   (simulated) terminal.
//!
//! Parsing is best effort: unknown query codes are skipped, truncated data
//! reads as zero bytes.

use log::debug;

/// WSF Read-Partition(FF) Query, with the partition byte IAC-doubled
pub const EDS_QUERY: [u8; 9] = [0xF3, 0x00, 0x05, 0x01, 0xFF, 0xFF, 0x02, 0xFF, 0xEF];

/// Null query reply sent to the host
pub const WSF_REPLY_NULL: [u8; 8] = [0x88, 0x00, 0x04, 0x81, 0xFF, 0xFF, 0xFF, 0xEF];

/// Query reply identifying the MECAFF terminal to the host
pub const WSF_REPLY_MECAFFTERM: [u8; 7] = [0x88, 0x00, 0x04, 0x81, 0x71, 0xFF, 0xEF];

const SFID_QUERY_REPLY: u8 = 0x81;

const QCODE_SUMMARY: u8 = 0x80;
const QCODE_USABLE_AREA: u8 = 0x81;
const QCODE_ALPHA_PARTITIONS: u8 = 0x84;
const QCODE_COLORS: u8 = 0x86;
const QCODE_HIGHLIGHTING: u8 = 0x87;

/// Terminal capabilities found in a query reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryReply {
    pub addressing_14bit: bool,
    pub addressing_16bit: bool,
    pub usable_in_pels: bool,
    pub usable_width: u16,
    pub usable_height: u16,
    pub color_count: u16,
    pub highlight_count: u16,
    pub max_partitions: u8,
    pub partition_storage: u16,
}

impl QueryReply {
    /// A usable area below 80x24 is not trusted
    pub fn has_usable_area(&self) -> bool {
        self.usable_height > 23 && self.usable_width > 79
    }
}

/// Reader over a telnet-escaped reply buffer
struct ReplyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ReplyReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
            || (self.data[self.pos] == 0xFF && self.data.get(self.pos + 1) == Some(&0xEF))
    }

    fn next(&mut self) -> u8 {
        match self.data.get(self.pos) {
            Some(&b) => {
                self.pos += if b == 0xFF { 2 } else { 1 };
                b
            }
            None => 0,
        }
    }

    fn next_u16(&mut self) -> u16 {
        ((self.next() as u16) << 8) | self.next() as u16
    }
}

/// Descriptive name of a query code, for logging
pub fn qcode_name(qcode: u8) -> Option<&'static str> {
    let name = match qcode {
        0x80 => "Summary",
        0x81 => "Usable area",
        0x82 => "Image",
        0x83 => "Text partitions",
        0x84 => "Alphanumeric partitions",
        0x85 => "Character sets",
        0x86 => "Colors",
        0x87 => "Highlighting",
        0x88 => "Reply modes",
        0x8A => "Field validation",
        0x8B => "MSR control",
        0x8C => "Field outlining",
        0x8E => "Partition characteristics",
        0x8F => "OEM auxiliary device",
        0x90 => "Format presentation",
        0x91 => "DBCS-Asia",
        0x92 => "Save/restore format",
        0x94 => "Format storage auxiliary device",
        0x95 => "Distributed Data Management",
        0x96 => "Storage pools",
        0x97 => "Document Interchange Architecture",
        0x98 => "Data chaining",
        0x99 => "Auxiliary device",
        0x9A => "3270 IPDS",
        0x9C => "Product defined data stream",
        0x9E => "IBM auxiliary device",
        0x9F => "Begin/End of file",
        0xA0 => "Device characteristics",
        0xA1 => "RPQ names",
        0xA2 => "Data streams",
        0xA6 => "Implicit partition",
        0xA7 => "Paper feed techniques",
        0xA8 => "Transparency",
        0xA9 => "Settable printer characteristics",
        0xAA => "IOCA auxiliary device",
        0xAB => "Cooperative processing requestor",
        0xB0 => "Segment",
        0xB1 => "Procedure",
        0xB2 => "Line type",
        0xB3 => "Port",
        0xB4 => "Graphic color",
        0xB5 => "Extended drawing routine",
        0xB6 => "Graphic symbol sets",
        0xFF => "Null",
        _ => return None,
    };
    Some(name)
}

/// Parse the terminal's answer to [`EDS_QUERY`].
///
/// Returns `None` if the data does not start with the structured field AID.
pub fn parse_query_reply(data: &[u8]) -> Option<QueryReply> {
    let mut reader = ReplyReader::new(data);
    let aid = reader.next();
    if aid != 0x88 {
        debug!("query reply: aid is 0x{aid:02X}, not 0x88");
        return None;
    }

    let mut reply = QueryReply::default();
    while !reader.is_at_end() {
        let sf_len = reader.next_u16() as i32;
        if sf_len < 3 {
            break;
        }
        let sfid = reader.next();
        let mut remaining = sf_len - 3;

        if sfid == SFID_QUERY_REPLY && remaining > 0 {
            let qcode = reader.next();
            remaining -= 1;
            debug!("QCode 0x{qcode:02X} (len={sf_len})");
            remaining = match qcode {
                QCODE_SUMMARY => summary(&mut reader, remaining),
                QCODE_USABLE_AREA => usable_area(&mut reader, remaining, &mut reply),
                QCODE_COLORS => colors(&mut reader, remaining, &mut reply),
                QCODE_HIGHLIGHTING => highlighting(&mut reader, remaining, &mut reply),
                QCODE_ALPHA_PARTITIONS => alpha_partitions(&mut reader, remaining, &mut reply),
                _ => remaining,
            };
        }

        while remaining > 0 && !reader.is_at_end() {
            reader.next();
            remaining -= 1;
        }
    }
    Some(reply)
}

fn summary(reader: &mut ReplyReader<'_>, mut remaining: i32) -> i32 {
    while remaining > 0 {
        let qcode = reader.next();
        remaining -= 1;
        match qcode_name(qcode) {
            Some(name) => debug!("   0x{qcode:02X} {name}"),
            None => debug!("   0x{qcode:02X} undefined in 3270-EDS-qcode"),
        }
    }
    remaining
}

fn usable_area(reader: &mut ReplyReader<'_>, remaining: i32, reply: &mut QueryReply) -> i32 {
    let flags1 = reader.next();
    let flags2 = reader.next();
    match flags1 & 0x0F {
        1 => reply.addressing_14bit = true,
        3 => {
            reply.addressing_14bit = true;
            reply.addressing_16bit = true;
        }
        _ => {}
    }
    reply.usable_in_pels = flags2 & 0x04 != 0;
    reply.usable_width = reader.next_u16();
    reply.usable_height = reader.next_u16();
    debug!(
        "    -> usable area {}x{} (14bit: {}, 16bit: {})",
        reply.usable_width, reply.usable_height, reply.addressing_14bit, reply.addressing_16bit
    );
    remaining - 6
}

fn colors(reader: &mut ReplyReader<'_>, mut remaining: i32, reply: &mut QueryReply) -> i32 {
    let _flags = reader.next();
    let mut np = reader.next() as i32;
    remaining -= 2;
    reply.color_count = 0;
    // each pair decrements the counter twice
    while np > 0 {
        let cav = reader.next();
        let ci = reader.next();
        remaining -= 2;
        np -= 2;
        debug!("      -> cav = 0x{cav:02X}  --  ci = 0x{ci:02X}");
        reply.color_count += 1;
    }
    remaining
}

fn highlighting(reader: &mut ReplyReader<'_>, mut remaining: i32, reply: &mut QueryReply) -> i32 {
    let mut np = reader.next() as i32;
    remaining -= 1;
    reply.highlight_count = 0;
    while np > 0 {
        let vi = reader.next();
        let ai = reader.next();
        remaining -= 2;
        np -= 1;
        debug!("      -> vi = 0x{vi:02X} - ai = 0x{ai:02X}");
        reply.highlight_count += 1;
    }
    remaining
}

fn alpha_partitions(reader: &mut ReplyReader<'_>, remaining: i32, reply: &mut QueryReply) -> i32 {
    reply.max_partitions = reader.next();
    reply.partition_storage = reader.next_u16();
    remaining - 3
}

/// Select the reply to a WSF record the host sent to the simulated terminal.
///
/// `record` starts with the WSF command byte. Only Read-Partition queries
/// addressed to partition FF are answered.
pub fn host_query_reply(record: &[u8]) -> Option<&'static [u8]> {
    if record.len() < 7 {
        return None;
    }
    // length, sfid, partition and query type
    let len = ((record[1] as usize) << 8) | record[2] as usize;
    if len < 5 {
        return None;
    }
    // the partition id FF arrives IAC-doubled
    let (sfid, pid1, pid2, type_idx) = (record[3], record[4], record[5], 6);
    if sfid != 0x01 || pid1 != 0xFF || pid2 != 0xFF {
        return None;
    }
    match record[type_idx] {
        0x02 => Some(&WSF_REPLY_MECAFFTERM),
        0x03 => {
            let reqtype = record.get(type_idx + 1).copied().unwrap_or(0) & 0xC0;
            if reqtype == 0x40 || reqtype == 0x80 {
                Some(&WSF_REPLY_MECAFFTERM)
            } else {
                Some(&WSF_REPLY_NULL)
            }
        }
        _ => None,
    }
}
