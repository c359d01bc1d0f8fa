//! EBCDIC code page 037 conversion for the console and the 3270 data stream.
//!
//! Host output, the MECAFF console's scrollback and everything written to the
//! 3270 terminal is EBCDIC. The gateway only needs a pure byte⇄text codec plus
//! a few comparison helpers used when classifying host lines (echo detection,
//! status-area recognition).

/// CP037 (US/Canada) EBCDIC to Latin-1 translation table.
const EBCDIC_CP037_TO_ASCII: [char; 256] = [
    // 0x00-0x0F: Control characters
    '\x00', '\x01', '\x02', '\x03', '\u{009C}', '\t', '\u{0086}', '\x7F',
    '\u{0097}', '\u{008D}', '\u{008E}', '\x0B', '\x0C', '\r', '\x0E', '\x0F',
    // 0x10-0x1F: Control characters
    '\x10', '\x11', '\x12', '\x13', '\u{009D}', '\u{0085}', '\x08', '\u{0087}',
    '\x18', '\x19', '\u{0092}', '\u{008F}', '\x1C', '\x1D', '\x1E', '\x1F',
    // 0x20-0x2F: Control characters and special
    '\u{0080}', '\u{0081}', '\u{0082}', '\u{0083}', '\u{0084}', '\n', '\x17', '\x1B',
    '\u{0088}', '\u{0089}', '\u{008A}', '\u{008B}', '\u{008C}', '\x05', '\x06', '\x07',
    // 0x30-0x3F: Control characters
    '\u{0090}', '\u{0091}', '\x16', '\u{0093}', '\u{0094}', '\u{0095}', '\u{0096}', '\x04',
    '\u{0098}', '\u{0099}', '\u{009A}', '\u{009B}', '\x14', '\x15', '\u{009E}', '\x1A',
    // 0x40-0x4F: Space and special characters
    ' ', '\u{00A0}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E1}', '\u{00E3}', '\u{00E5}',
    '\u{00E7}', '\u{00F1}', '\u{00A2}', '.', '<', '(', '+', '|',
    // 0x50-0x5F: Ampersand and special characters
    '&', '\u{00E9}', '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00ED}', '\u{00EE}', '\u{00EF}',
    '\u{00EC}', '\u{00DF}', '!', '$', '*', ')', ';', '\u{00AC}',
    // 0x60-0x6F: Dash and special characters
    '-', '/', '\u{00C2}', '\u{00C4}', '\u{00C0}', '\u{00C1}', '\u{00C3}', '\u{00C5}',
    '\u{00C7}', '\u{00D1}', '\u{00A6}', ',', '%', '_', '>', '?',
    // 0x70-0x7F: Special characters and quotes
    '\u{00F8}', '\u{00C9}', '\u{00CA}', '\u{00CB}', '\u{00C8}', '\u{00CD}', '\u{00CE}', '\u{00CF}',
    '\u{00CC}', '`', ':', '#', '@', '\'', '=', '"',
    // 0x80-0x8F: Special character and lowercase a-i
    '\u{00D8}', 'a', 'b', 'c', 'd', 'e', 'f', 'g',
    'h', 'i', '\u{00AB}', '\u{00BB}', '\u{00F0}', '\u{00FD}', '\u{00FE}', '\u{00B1}',
    // 0x90-0x9F: Degree symbol and lowercase j-r
    '\u{00B0}', 'j', 'k', 'l', 'm', 'n', 'o', 'p',
    'q', 'r', '\u{00AA}', '\u{00BA}', '\u{00E6}', '\u{00B8}', '\u{00C6}', '\u{00A4}',
    // 0xA0-0xAF: Micro sign and lowercase s-z
    '\u{00B5}', '~', 's', 't', 'u', 'v', 'w', 'x',
    'y', 'z', '\u{00A1}', '\u{00BF}', '\u{00D0}', '\u{00DD}', '\u{00DE}', '\u{00AE}',
    // 0xB0-0xBF: Caret and special characters
    '^', '\u{00A3}', '\u{00A5}', '\u{00B7}', '\u{00A9}', '\u{00A7}', '\u{00B6}', '\u{00BC}',
    '\u{00BD}', '\u{00BE}', '[', ']', '\u{00AF}', '\u{00A8}', '\u{00B4}', '\u{00D7}',
    // 0xC0-0xCF: Left brace and uppercase A-I
    '{', 'A', 'B', 'C', 'D', 'E', 'F', 'G',
    'H', 'I', '\u{00AD}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00F3}', '\u{00F5}',
    // 0xD0-0xDF: Right brace and uppercase J-R
    '}', 'J', 'K', 'L', 'M', 'N', 'O', 'P',
    'Q', 'R', '\u{00B9}', '\u{00FB}', '\u{00FC}', '\u{00F9}', '\u{00FA}', '\u{00FF}',
    // 0xE0-0xEF: Backslash and uppercase S-Z
    '\\', '\u{00F7}', 'S', 'T', 'U', 'V', 'W', 'X',
    'Y', 'Z', '\u{00B2}', '\u{00D4}', '\u{00D6}', '\u{00D2}', '\u{00D3}', '\u{00D5}',
    // 0xF0-0xFF: Digits 0-9 and special characters
    '0', '1', '2', '3', '4', '5', '6', '7',
    '8', '9', '\u{00B3}', '\u{00DB}', '\u{00DC}', '\u{00D9}', '\u{00DA}', '\u{009F}',
];

/// Reverse of [`EBCDIC_CP037_TO_ASCII`]; CP037 is a bijection over Latin-1.
const ASCII_TO_EBCDIC_CP037: [u8; 256] = build_reverse_table();

const fn build_reverse_table() -> [u8; 256] {
    let mut table = [0x40u8; 256];
    let mut i = 0;
    while i < 256 {
        let ch = EBCDIC_CP037_TO_ASCII[i] as u32;
        if ch < 256 {
            table[ch as usize] = i as u8;
        }
        i += 1;
    }
    table
}

/// EBCDIC blank.
pub const EBCDIC_BLANK: u8 = 0x40;

/// Convert an EBCDIC byte to its character.
///
/// ```
/// use mecaff::protocol_common::ebcdic::ebcdic_to_ascii;
///
/// assert_eq!(ebcdic_to_ascii(0xC1), 'A');
/// assert_eq!(ebcdic_to_ascii(0x81), 'a');
/// assert_eq!(ebcdic_to_ascii(0xF0), '0');
/// ```
pub fn ebcdic_to_ascii(byte: u8) -> char {
    EBCDIC_CP037_TO_ASCII[byte as usize]
}

/// Convert a character to EBCDIC. Characters outside Latin-1 become a blank.
///
/// ```
/// use mecaff::protocol_common::ebcdic::ascii_to_ebcdic;
///
/// assert_eq!(ascii_to_ebcdic('A'), 0xC1);
/// assert_eq!(ascii_to_ebcdic('<'), 0x4C);
/// assert_eq!(ascii_to_ebcdic('\u{263A}'), 0x40);
/// ```
pub fn ascii_to_ebcdic(ch: char) -> u8 {
    let code = ch as u32;
    if code < 256 {
        ASCII_TO_EBCDIC_CP037[code as usize]
    } else {
        EBCDIC_BLANK
    }
}

/// Convert EBCDIC bytes to a `String`.
///
/// ```
/// use mecaff::protocol_common::ebcdic::ebcdic_to_ascii_string;
///
/// assert_eq!(ebcdic_to_ascii_string(&[0xC8, 0xC5, 0xD3, 0xD3, 0xD6]), "HELLO");
/// ```
pub fn ebcdic_to_ascii_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| ebcdic_to_ascii(b)).collect()
}

/// Convert a string to EBCDIC bytes.
pub fn ascii_to_ebcdic_vec(s: &str) -> Vec<u8> {
    s.chars().map(ascii_to_ebcdic).collect()
}

fn is_ebcdic_letter(b: u8) -> bool {
    matches!(b, 0x81..=0x89 | 0x91..=0x99 | 0xA2..=0xA9 | 0xC1..=0xC9 | 0xD1..=0xD9 | 0xE2..=0xE9)
}

/// Upper-case an EBCDIC letter; other bytes pass unchanged.
pub fn ebcdic_to_upper(b: u8) -> u8 {
    if is_ebcdic_letter(b) {
        b | 0x40
    } else {
        b
    }
}

/// Case-insensitive equality of two EBCDIC strings.
pub fn ebcdic_eq_ignore_case(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(&x, &y)| ebcdic_to_upper(x) == ebcdic_to_upper(y))
}

/// Slice without trailing EBCDIC blanks.
pub fn ebcdic_strip_trailing(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != EBCDIC_BLANK)
        .map_or(0, |p| p + 1);
    &bytes[..end]
}

/// Replace bytes below 0x40 (orders and controls) by blanks so the text can be
/// placed into a 3270 buffer without being misread as orders.
pub fn ebcdic_displayable(b: u8) -> u8 {
    if b < EBCDIC_BLANK {
        EBCDIC_BLANK
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_and_digits() {
        assert_eq!(ebcdic_to_ascii(0xC1), 'A');
        assert_eq!(ebcdic_to_ascii(0xE9), 'Z');
        assert_eq!(ebcdic_to_ascii(0xA9), 'z');
        assert_eq!(ebcdic_to_ascii(0xF9), '9');
        assert_eq!(ascii_to_ebcdic('Z'), 0xE9);
        assert_eq!(ascii_to_ebcdic('a'), 0x81);
    }

    #[test]
    fn test_transport_marker_characters() {
        assert_eq!(ascii_to_ebcdic_vec("<{>}"), vec![0x4C, 0xC0, 0x6E, 0xD0]);
        assert_eq!(ascii_to_ebcdic(':'), 0x7A);
        assert_eq!(ascii_to_ebcdic('|'), 0x4F);
        assert_eq!(ascii_to_ebcdic('&'), 0x50);
    }

    #[test]
    fn test_full_round_trip() {
        for b in 0u8..=255 {
            assert_eq!(ascii_to_ebcdic(ebcdic_to_ascii(b)), b, "byte {b:02X}");
        }
    }

    #[test]
    fn test_eq_ignore_case() {
        let upper = ascii_to_ebcdic_vec("LISTFILE * EXEC");
        let lower = ascii_to_ebcdic_vec("listfile * exec");
        assert!(ebcdic_eq_ignore_case(&upper, &lower));
        assert!(!ebcdic_eq_ignore_case(&upper, &lower[1..]));
        // '{' (0xC0) must not be folded onto anything else
        assert!(!ebcdic_eq_ignore_case(&[0xC0], &[0x80]));
    }

    #[test]
    fn test_strip_trailing() {
        let text = ascii_to_ebcdic_vec("CP READ   ");
        assert_eq!(ebcdic_strip_trailing(&text), &text[..7]);
        assert!(ebcdic_strip_trailing(&[0x40, 0x40]).is_empty());
    }

    #[test]
    fn test_displayable_hides_orders() {
        // SBA, SF and IC would be taken as orders inside a write
        assert_eq!(ebcdic_displayable(0x11), 0x40);
        assert_eq!(ebcdic_displayable(0x1D), 0x40);
        assert_eq!(ebcdic_displayable(0x13), 0x40);
        assert_eq!(ebcdic_displayable(0xC1), 0xC1);
    }
}
