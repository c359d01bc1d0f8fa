//! Telnet plumbing shared by the terminal-side and host-side negotiators.
//!
//! Only the handful of options needed to bring a connection into TN3270
//! binary mode (or plain TN3215 line mode) are modelled here, together with
//! the fixed byte sequences exchanged during negotiation and the IAC
//! escaping rules for data records.

/// Telnet command codes (RFC 854, RFC 885)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetCommand {
    /// Interpret As Command - 255 (0xFF)
    IAC = 255,
    /// Don't - 254 (0xFE)
    DONT = 254,
    /// Do - 253 (0xFD)
    DO = 253,
    /// Won't - 252 (0xFC)
    WONT = 252,
    /// Will - 251 (0xFB)
    WILL = 251,
    /// Subnegotiation Begin - 250 (0xFA)
    SB = 250,
    /// Subnegotiation End - 240 (0xF0)
    SE = 240,
    /// End Of Record - 239 (0xEF)
    EOR = 239,
}

impl TelnetCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            255 => Some(TelnetCommand::IAC),
            254 => Some(TelnetCommand::DONT),
            253 => Some(TelnetCommand::DO),
            252 => Some(TelnetCommand::WONT),
            251 => Some(TelnetCommand::WILL),
            250 => Some(TelnetCommand::SB),
            240 => Some(TelnetCommand::SE),
            239 => Some(TelnetCommand::EOR),
            _ => None,
        }
    }
}

/// Telnet options used by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetOption {
    /// Binary Transmission - 0
    Binary = 0,
    /// Echo - 1
    Echo = 1,
    /// Terminal Type - 24
    TerminalType = 24,
    /// End of Record - 25
    EndOfRecord = 25,
}

impl TelnetOption {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TelnetOption::Binary),
            1 => Some(TelnetOption::Echo),
            24 => Some(TelnetOption::TerminalType),
            25 => Some(TelnetOption::EndOfRecord),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TelnetOption::Binary => "Binary",
            TelnetOption::Echo => "Echo",
            TelnetOption::TerminalType => "Terminal Type",
            TelnetOption::EndOfRecord => "End of Record",
        }
    }
}

/// Terminal-type subnegotiation qualifier IS
pub const TT_IS: u8 = 0x00;
/// Terminal-type subnegotiation qualifier SEND
pub const TT_SEND: u8 = 0x01;

pub const TN_EOR: [u8; 2] = [0xFF, 0xEF];
pub const TN_SE: [u8; 2] = [0xFF, 0xF0];
pub const TN_DO_TERMINAL_TYPE: [u8; 3] = [0xFF, 0xFD, 0x18];
pub const TN_WILL_TERMINAL_TYPE: [u8; 3] = [0xFF, 0xFB, 0x18];
pub const TN_SB_SEND_TERMINAL_TYPE: [u8; 6] = [0xFF, 0xFA, 0x18, TT_SEND, 0xFF, 0xF0];
/// Prefix of a terminal-type answer; followed by the name and [`TN_SE`]
pub const TN_SB_TERMINAL_TYPE_IS: [u8; 4] = [0xFF, 0xFA, 0x18, TT_IS];
pub const TN_DO_END_OF_RECORD: [u8; 3] = [0xFF, 0xFD, 0x19];
pub const TN_WILL_END_OF_RECORD: [u8; 3] = [0xFF, 0xFB, 0x19];
pub const TN_DO_BINARY: [u8; 3] = [0xFF, 0xFD, 0x00];
pub const TN_WILL_BINARY: [u8; 3] = [0xFF, 0xFB, 0x00];
pub const TN_WONT_ECHO: [u8; 3] = [0xFF, 0xFC, 0x01];
pub const TN_DONT_ECHO: [u8; 3] = [0xFF, 0xFE, 0x01];

/// Build a telnet negotiation sequence
///
/// ```
/// use mecaff::protocol_common::telnet_base::{build_negotiation, TelnetCommand, TelnetOption};
///
/// let seq = build_negotiation(TelnetCommand::WILL, TelnetOption::EndOfRecord as u8);
/// assert_eq!(seq, vec![255, 251, 25]);
/// ```
pub fn build_negotiation(command: TelnetCommand, option: u8) -> Vec<u8> {
    vec![TelnetCommand::IAC as u8, command as u8, option]
}

/// Build a telnet subnegotiation sequence, doubling IAC bytes in `data`
///
/// ```
/// use mecaff::protocol_common::telnet_base::build_subnegotiation;
///
/// let seq = build_subnegotiation(24, &[0x00, b'A', b'N', b'S', b'I']);
/// assert_eq!(seq, vec![0xFF, 0xFA, 24, 0x00, b'A', b'N', b'S', b'I', 0xFF, 0xF0]);
/// ```
pub fn build_subnegotiation(option: u8, data: &[u8]) -> Vec<u8> {
    let mut result = vec![TelnetCommand::IAC as u8, TelnetCommand::SB as u8, option];
    result.extend(escape_iac(data));
    result.extend_from_slice(&TN_SE);
    result
}

/// `IAC SB TERMINAL-TYPE IS <name> IAC SE`
pub fn build_terminal_type_is(name: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(name.len() + 1);
    data.push(TT_IS);
    data.extend_from_slice(name);
    build_subnegotiation(TelnetOption::TerminalType as u8, &data)
}

/// Double every IAC byte.
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 4);
    for &b in data {
        out.push(b);
        if b == TelnetCommand::IAC as u8 {
            out.push(b);
        }
    }
    out
}

/// Collapse doubled IAC bytes while keeping `IAC EOR` pairs intact.
///
/// ```
/// use mecaff::protocol_common::telnet_base::unescape_iac;
///
/// assert_eq!(unescape_iac(&[0x7D, 0xFF, 0xFF, 0x40, 0xFF, 0xEF]), vec![0x7D, 0xFF, 0x40, 0xFF, 0xEF]);
/// ```
pub fn unescape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        out.push(b);
        if b == TelnetCommand::IAC as u8 && i + 1 < data.len() && data[i + 1] != TelnetCommand::EOR as u8 {
            // skip the doubled IAC
            i += 1;
        }
        i += 1;
    }
    out
}

/// Does the packet end with the bytes `IAC EOR`?
///
/// Only the last two bytes are looked at, so a data `0xFF` doubled right
/// before an `EOR` byte (`FF FF EF`) also counts as record end.
pub fn ends_with_eor(data: &[u8]) -> bool {
    data.ends_with(&TN_EOR)
}

/// Is `what` present in `data` at `offset`?
pub fn is_present_at(what: &[u8], data: &[u8], offset: usize) -> bool {
    data.len() >= offset + what.len() && &data[offset..offset + what.len()] == what
}

/// Render bytes as a hex dump for trace logging.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(if i % 16 == 0 { '\n' } else { ' ' });
        }
        out.push_str(&format!("{b:02X}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_sequences_match_builders() {
        assert_eq!(
            build_negotiation(TelnetCommand::DO, TelnetOption::TerminalType as u8),
            TN_DO_TERMINAL_TYPE.to_vec()
        );
        assert_eq!(
            build_negotiation(TelnetCommand::WILL, TelnetOption::Binary as u8),
            TN_WILL_BINARY.to_vec()
        );
        assert_eq!(
            build_negotiation(TelnetCommand::DONT, TelnetOption::Echo as u8),
            TN_DONT_ECHO.to_vec()
        );
        assert_eq!(
            build_subnegotiation(TelnetOption::TerminalType as u8, &[TT_SEND]),
            TN_SB_SEND_TERMINAL_TYPE.to_vec()
        );
    }

    #[test]
    fn test_terminal_type_is() {
        let seq = build_terminal_type_is(b"IBM-3278-4-E");
        assert!(seq.starts_with(&TN_SB_TERMINAL_TYPE_IS));
        assert!(seq.ends_with(&TN_SE));
        assert_eq!(&seq[4..seq.len() - 2], b"IBM-3278-4-E");
    }

    #[test]
    fn test_escape_unescape() {
        let data = [0x01, 0xFF, 0x02];
        let escaped = escape_iac(&data);
        assert_eq!(escaped, vec![0x01, 0xFF, 0xFF, 0x02]);
        assert_eq!(unescape_iac(&escaped), data.to_vec());
    }

    #[test]
    fn test_eor_detection() {
        assert!(ends_with_eor(&[0xF5, 0xC3, 0xFF, 0xEF]));
        assert!(!ends_with_eor(&[0xF5, 0xC3, 0xFF]));
        // suffix check only: an escaped data 0xFF before EF still ends the record
        assert!(ends_with_eor(&[0x40, 0xFF, 0xFF, 0xEF]));
        assert!(is_present_at(&TN_DO_BINARY, &[0x00, 0xFF, 0xFD, 0x00], 1));
        assert!(!is_present_at(&TN_DO_BINARY, &[0x00, 0xFF, 0xFD], 1));
    }

    #[test]
    fn test_option_names() {
        assert_eq!(TelnetOption::from_u8(25), Some(TelnetOption::EndOfRecord));
        assert_eq!(TelnetOption::EndOfRecord.name(), "End of Record");
        assert_eq!(TelnetCommand::from_u8(0xEF), Some(TelnetCommand::EOR));
        assert_eq!(TelnetOption::from_u8(31), None);
    }
}
