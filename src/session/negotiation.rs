//! Telnet negotiations with the terminal and with the host
//!
//! The terminal is always driven in TN3270 binary mode. The host side is
//! negotiated into TN3270 as well for GRAF sessions, while CONS sessions
//! answer the host's plain telnet requests as they arrive in the data stream.
//!
//! All negotiations are strict: a terminal answering with anything else than
//! the expected bytes is dropped.

use std::io::{Read, Write};

use log::{debug, info, trace, warn};

use crate::error::{MecaffResult, TelnetError};
use crate::lib3270::query::EDS_QUERY;
use crate::lib3270::{parse_query_reply, TerminalCapabilities};
use crate::protocol_common::telnet_base::*;

/// Terminal type announced to the host in GRAF sessions
pub const HOST_TERMINAL_TYPE: &str = "IBM-3278-4-E";

/// Terminal type announced to the host in CONS sessions
pub const HOST_TERMINAL_TYPE_3215: &str = "ANSI";

/// Max. length of an LU name passed to the host
pub const MAX_LU_NAME_LENGTH: usize = 32;

const MAX_NEGOTIATION_RESPONSE: usize = 512;
const MAX_QUERY_RESPONSE: usize = 8192;

/// Settings for the terminal negotiation
#[derive(Debug, Clone, Copy)]
pub struct TerminalNegotiation {
    pub conn_no: u32,
    /// Do not query the terminal for its capabilities
    pub no_dynamic: bool,
    /// Number of colors the terminal must support to be used in color
    pub min_color_count: u16,
}

impl TerminalNegotiation {
    /// Bring the terminal into TN3270 binary mode and find out what it can do.
    ///
    /// A terminal that cannot be used in 3270 mode gets a short message screen
    /// and the negotiation fails with `UnsupportedTerminal`.
    pub fn run<S: Read + Write>(&self, stream: &mut S) -> MecaffResult<TerminalCapabilities> {
        let conn_no = self.conn_no;
        debug!("{{{conn_no:02}}} negotiating 3270 mode with terminal");

        ping_pong(stream, "DO TERMINAL-TYPE", &TN_DO_TERMINAL_TYPE, &TN_WILL_TERMINAL_TYPE)?;

        stream.write_all(&TN_SB_SEND_TERMINAL_TYPE)?;
        stream.flush()?;
        let response = read_until(stream, "SEND TERMINAL-TYPE", &TN_SE, MAX_NEGOTIATION_RESPONSE)?;
        let terminal_type = parse_terminal_type_is(&response)?;
        info!("{{{conn_no:02}}} terminal type: '{terminal_type}'");

        ping_pong(stream, "DO EOR", &TN_DO_END_OF_RECORD, &TN_WILL_END_OF_RECORD)?;
        ping_pong(stream, "WILL EOR", &TN_WILL_END_OF_RECORD, &TN_DO_END_OF_RECORD)?;
        ping_pong(stream, "DO BINARY", &TN_DO_BINARY, &TN_WILL_BINARY)?;
        ping_pong(stream, "WILL BINARY", &TN_WILL_BINARY, &TN_DO_BINARY)?;

        let mut caps = TerminalCapabilities::from_terminal_type(&terminal_type);
        if !self.no_dynamic && caps.can_extended {
            self.query_terminal(stream, &mut caps);
        }
        caps.log_summary(conn_no);

        if !caps.is_3270_mode {
            warn!("{{{conn_no:02}}} terminal type '{}' not usable in 3270 mode", caps.terminal_type);
            stream.write_all(&caps.unsupported_screen())?;
            stream.flush()?;
            return Err(TelnetError::UnsupportedTerminal { terminal_type: caps.terminal_type }.into());
        }
        Ok(caps)
    }

    /// Send the WSF query and take over what the reply tells. Failing to get
    /// a usable reply leaves the capabilities as derived from the type name.
    fn query_terminal<S: Read + Write>(&self, stream: &mut S, caps: &mut TerminalCapabilities) {
        let conn_no = self.conn_no;
        debug!("{{{conn_no:02}}} querying terminal capabilities");
        match request_query_reply(stream) {
            Ok(reply) => {
                trace!("{{{conn_no:02}}} query reply:\n{}", hex_dump(&reply));
                match parse_query_reply(&reply) {
                    Some(reply) => caps.apply_query_reply(&reply, self.min_color_count),
                    None => debug!("{{{conn_no:02}}} no usable query reply"),
                }
            }
            Err(e) => warn!("{{{conn_no:02}}} terminal query failed: {e}"),
        }
    }
}

fn request_query_reply<S: Read + Write>(stream: &mut S) -> MecaffResult<Vec<u8>> {
    stream.write_all(&EDS_QUERY)?;
    stream.flush()?;
    read_until(stream, "WSF QUERY", &TN_EOR, MAX_QUERY_RESPONSE)
}

/// Send `request` and require exactly `response` as answer.
pub fn ping_pong<S: Read + Write>(
    stream: &mut S,
    step: &'static str,
    request: &[u8],
    response: &[u8],
) -> MecaffResult<()> {
    stream.write_all(request)?;
    stream.flush()?;

    let mut received = vec![0u8; response.len()];
    let mut count = 0;
    while count < received.len() {
        let n = stream.read(&mut received[count..])?;
        if n == 0 {
            return Err(TelnetError::ShortResponse { step, received: count }.into());
        }
        count += n;
    }
    if received != response {
        return Err(TelnetError::UnexpectedResponse {
            step,
            expected: response.to_vec(),
            received,
        }
        .into());
    }
    trace!("negotiation step '{step}' done");
    Ok(())
}

/// Read until the data ends with `terminator`.
fn read_until<S: Read>(stream: &mut S, step: &'static str, terminator: &[u8], max: usize) -> MecaffResult<Vec<u8>> {
    let mut data = Vec::with_capacity(256);
    let mut buffer = [0u8; 1024];
    while !data.ends_with(terminator) {
        if data.len() > max {
            return Err(TelnetError::InvalidSequence { data }.into());
        }
        let n = stream.read(&mut buffer)?;
        if n == 0 {
            return Err(TelnetError::ShortResponse { step, received: data.len() }.into());
        }
        data.extend_from_slice(&buffer[..n]);
    }
    Ok(data)
}

/// Extract the name from `IAC SB TERMINAL-TYPE IS <name> IAC SE`.
pub fn parse_terminal_type_is(data: &[u8]) -> MecaffResult<String> {
    let min_len = TN_SB_TERMINAL_TYPE_IS.len() + TN_SE.len();
    if data.len() <= min_len {
        return Err(TelnetError::ShortResponse { step: "TERMINAL-TYPE IS", received: data.len() }.into());
    }
    if !data.starts_with(&TN_SB_TERMINAL_TYPE_IS) || !data.ends_with(&TN_SE) {
        return Err(TelnetError::InvalidSequence { data: data.to_vec() }.into());
    }
    let name = &data[TN_SB_TERMINAL_TYPE_IS.len()..data.len() - TN_SE.len()];
    Ok(String::from_utf8_lossy(name).into_owned())
}

/// Terminal type string sent to the host, with the LU name appended as `@LU`.
pub fn host_terminal_type(lu_name: Option<&str>) -> String {
    match lu_name.filter(|lu| !lu.is_empty()) {
        Some(lu) => {
            let lu: String = lu.chars().take(MAX_LU_NAME_LENGTH).collect();
            format!("{HOST_TERMINAL_TYPE}@{lu}")
        }
        None => HOST_TERMINAL_TYPE.to_string(),
    }
}

/// Answer the host's requests until both sides agreed on terminal type,
/// binary mode and end-of-record.
///
/// The LU name given by the terminal takes precedence over the configured one.
pub fn negotiate_host_3270<S: Read + Write>(
    stream: &mut S,
    conn_no: u32,
    terminal_lu: Option<&str>,
    config_lu: Option<&str>,
) -> MecaffResult<()> {
    let lu_name = terminal_lu.filter(|lu| !lu.is_empty()).or(config_lu);
    let terminal_type = host_terminal_type(lu_name);
    debug!("{{{conn_no:02}}} negotiating TN3270 with host as '{terminal_type}'");

    let mut sent_terminal = false;
    let mut me_binary = false;
    let mut host_binary = false;
    let mut me_eor = false;
    let mut host_eor = false;

    let mut buffer = [0u8; 256];
    while !(sent_terminal && me_binary && host_binary && me_eor && host_eor) {
        let count = stream.read(&mut buffer)?;
        if count == 0 {
            return Err(TelnetError::ShortResponse { step: "host negotiation", received: 0 }.into());
        }
        let data = &buffer[..count];
        trace!("{{{conn_no:02}}} host negotiation data:\n{}", hex_dump(data));

        let mut offset = 0;
        while offset < count {
            let (answer, consumed) = if is_present_at(&TN_DO_TERMINAL_TYPE, data, offset) {
                (TN_WILL_TERMINAL_TYPE.to_vec(), TN_DO_TERMINAL_TYPE.len())
            } else if is_present_at(&TN_SB_SEND_TERMINAL_TYPE, data, offset) {
                sent_terminal = true;
                (build_terminal_type_is(terminal_type.as_bytes()), TN_SB_SEND_TERMINAL_TYPE.len())
            } else if is_present_at(&TN_DO_END_OF_RECORD, data, offset) {
                me_eor = true;
                (TN_WILL_END_OF_RECORD.to_vec(), TN_DO_END_OF_RECORD.len())
            } else if is_present_at(&TN_WILL_END_OF_RECORD, data, offset) {
                host_eor = true;
                (TN_DO_END_OF_RECORD.to_vec(), TN_WILL_END_OF_RECORD.len())
            } else if is_present_at(&TN_DO_BINARY, data, offset) {
                me_binary = true;
                (TN_WILL_BINARY.to_vec(), TN_DO_BINARY.len())
            } else if is_present_at(&TN_WILL_BINARY, data, offset) {
                host_binary = true;
                (TN_DO_BINARY.to_vec(), TN_WILL_BINARY.len())
            } else {
                warn!("{{{conn_no:02}}} received invalid data while negotiating into TN3270 binary mode");
                return Err(TelnetError::InvalidSequence { data: data[offset..].to_vec() }.into());
            };
            stream.write_all(&answer)?;
            stream.flush()?;
            offset += consumed;
        }
    }
    info!("{{{conn_no:02}}} host is in TN3270 binary mode");
    Ok(())
}

/// Answer one telnet request of the host in a CONS session.
///
/// `data` starts with the IAC; the result is the number of bytes consumed.
/// Unknown requests are logged and skipped.
pub fn handle_host_3215_negotiation(data: &[u8], sink: &mut dyn Write, conn_no: u32) -> MecaffResult<usize> {
    if is_present_at(&TN_DO_TERMINAL_TYPE, data, 0) {
        debug!("{{{conn_no:02}}} host: DO TERMINAL-TYPE");
        sink.write_all(&TN_WILL_TERMINAL_TYPE)?;
    } else if is_present_at(&TN_SB_SEND_TERMINAL_TYPE, data, 0) {
        debug!("{{{conn_no:02}}} host: SEND TERMINAL-TYPE");
        sink.write_all(&build_terminal_type_is(HOST_TERMINAL_TYPE_3215.as_bytes()))?;
        sink.flush()?;
        return Ok(TN_SB_SEND_TERMINAL_TYPE.len());
    } else if is_present_at(&TN_WONT_ECHO, data, 0) {
        debug!("{{{conn_no:02}}} host: WONT ECHO");
        sink.write_all(&TN_DONT_ECHO)?;
    } else {
        let shown = &data[..data.len().min(16)];
        info!("{{{conn_no:02}}} unknown negotiation from host:\n{}", hex_dump(shown));
        return Ok(data.len().min(3));
    }
    sink.flush()?;
    Ok(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MecaffError;
    use std::io::{self, Cursor};

    /// Scripted peer: reads come from `input`, writes are collected
    struct Script {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Script {
        fn new(input: Vec<u8>) -> Self {
            Self { input: Cursor::new(input), output: Vec::new() }
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn terminal_answers(terminal_type: &str) -> Vec<u8> {
        let mut input = TN_WILL_TERMINAL_TYPE.to_vec();
        input.extend(build_terminal_type_is(terminal_type.as_bytes()));
        input.extend_from_slice(&TN_WILL_END_OF_RECORD);
        input.extend_from_slice(&TN_DO_END_OF_RECORD);
        input.extend_from_slice(&TN_WILL_BINARY);
        input.extend_from_slice(&TN_DO_BINARY);
        input
    }

    #[test]
    fn test_terminal_negotiation() {
        let mut script = Script::new(terminal_answers("IBM-3278-4-E"));
        let nego = TerminalNegotiation { conn_no: 1, no_dynamic: true, min_color_count: 4 };
        let caps = nego.run(&mut script).unwrap();
        assert!(caps.is_3270_mode && caps.can_extended && caps.can_ext_highlight);
        assert!(!caps.can_colors);
        assert_eq!((caps.alt_rows, caps.alt_cols), (43, 80));

        let mut expected = TN_DO_TERMINAL_TYPE.to_vec();
        expected.extend_from_slice(&TN_SB_SEND_TERMINAL_TYPE);
        expected.extend_from_slice(&TN_DO_END_OF_RECORD);
        expected.extend_from_slice(&TN_WILL_END_OF_RECORD);
        expected.extend_from_slice(&TN_DO_BINARY);
        expected.extend_from_slice(&TN_WILL_BINARY);
        assert_eq!(script.output, expected);
    }

    #[test]
    fn test_terminal_refuses_eor() {
        let mut input = TN_WILL_TERMINAL_TYPE.to_vec();
        input.extend(build_terminal_type_is(b"IBM-3277-2"));
        input.extend_from_slice(&[0xFF, 0xFC, 0x19]);
        let mut script = Script::new(input);
        let nego = TerminalNegotiation { conn_no: 1, no_dynamic: true, min_color_count: 4 };
        match nego.run(&mut script) {
            Err(MecaffError::Telnet(TelnetError::UnexpectedResponse { step, .. })) => assert_eq!(step, "DO EOR"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_terminal_gets_message() {
        let mut script = Script::new(terminal_answers("IBM-3278-1"));
        let nego = TerminalNegotiation { conn_no: 1, no_dynamic: true, min_color_count: 4 };
        assert!(matches!(
            nego.run(&mut script),
            Err(MecaffError::Telnet(TelnetError::UnsupportedTerminal { .. }))
        ));
        assert_eq!(&script.output[script.output.len() - 2..], &TN_EOR);
        assert!(script.output.windows(2).any(|w| w == [0xF5, 0x00]));
    }

    #[test]
    fn test_terminal_closes_early() {
        let mut script = Script::new(vec![0xFF, 0xFB]);
        let nego = TerminalNegotiation { conn_no: 1, no_dynamic: true, min_color_count: 4 };
        assert!(matches!(
            nego.run(&mut script),
            Err(MecaffError::Telnet(TelnetError::ShortResponse { received: 2, .. }))
        ));
    }

    #[test]
    fn test_dynamic_query_refines_geometry() {
        let mut input = terminal_answers("IBM-DYNAMIC");
        // usable area 132x27, 8 colors, 4 highlights
        input.extend_from_slice(&[0x88, 0x00, 0x0F, 0x81, 0x81, 0x01, 0x00, 0x00, 0x84, 0x00, 0x1B, 0x01, 0x00, 0x00, 0x00, 0x00]);
        input.extend_from_slice(&[0x00, 0x16, 0x81, 0x86, 0x00, 0x10]);
        for i in 0..8u8 {
            input.extend_from_slice(&[0xF0 + i, 0xF0 + i]);
        }
        input.extend_from_slice(&[0x00, 0x0D, 0x81, 0x87, 0x04, 0x00, 0xF0, 0xF1, 0xF1, 0xF2, 0xF2, 0xF4, 0xF4]);
        input.extend_from_slice(&TN_EOR);
        let mut script = Script::new(input);
        let nego = TerminalNegotiation { conn_no: 1, no_dynamic: false, min_color_count: 4 };
        let caps = nego.run(&mut script).unwrap();
        assert!(script.output.ends_with(&EDS_QUERY));
        assert!(caps.is_3270_mode && caps.can_alt_screen_size);
        assert_eq!((caps.alt_rows, caps.alt_cols), (27, 132));
        assert!(caps.can_colors && caps.can_ext_highlight);
    }

    #[test]
    fn test_host_terminal_type() {
        assert_eq!(host_terminal_type(None), "IBM-3278-4-E");
        assert_eq!(host_terminal_type(Some("")), "IBM-3278-4-E");
        assert_eq!(host_terminal_type(Some("L0A1")), "IBM-3278-4-E@L0A1");
        let long = "X".repeat(40);
        assert_eq!(host_terminal_type(Some(&long)).len(), HOST_TERMINAL_TYPE.len() + 1 + 32);
    }

    #[test]
    fn test_host_negotiation() {
        let mut input = TN_DO_TERMINAL_TYPE.to_vec();
        input.extend_from_slice(&TN_SB_SEND_TERMINAL_TYPE);
        input.extend_from_slice(&TN_DO_END_OF_RECORD);
        input.extend_from_slice(&TN_WILL_END_OF_RECORD);
        input.extend_from_slice(&TN_DO_BINARY);
        input.extend_from_slice(&TN_WILL_BINARY);
        let mut script = Script::new(input);
        negotiate_host_3270(&mut script, 1, Some("TERMLU"), Some("CFGLU")).unwrap();

        let mut expected = TN_WILL_TERMINAL_TYPE.to_vec();
        expected.extend(build_terminal_type_is(b"IBM-3278-4-E@TERMLU"));
        expected.extend_from_slice(&TN_WILL_END_OF_RECORD);
        expected.extend_from_slice(&TN_DO_END_OF_RECORD);
        expected.extend_from_slice(&TN_WILL_BINARY);
        expected.extend_from_slice(&TN_DO_BINARY);
        assert_eq!(script.output, expected);
    }

    #[test]
    fn test_host_negotiation_rejects_garbage() {
        let mut input = TN_DO_TERMINAL_TYPE.to_vec();
        input.extend_from_slice(b"hello");
        let mut script = Script::new(input);
        assert!(matches!(
            negotiate_host_3270(&mut script, 1, None, None),
            Err(MecaffError::Telnet(TelnetError::InvalidSequence { .. }))
        ));
    }

    #[test]
    fn test_host_3215_negotiation() {
        let mut out = Vec::new();
        assert_eq!(handle_host_3215_negotiation(&TN_DO_TERMINAL_TYPE, &mut out, 1).unwrap(), 3);
        assert_eq!(out, TN_WILL_TERMINAL_TYPE.to_vec());

        out.clear();
        assert_eq!(handle_host_3215_negotiation(&TN_SB_SEND_TERMINAL_TYPE, &mut out, 1).unwrap(), 6);
        assert_eq!(out, vec![0xFF, 0xFA, 0x18, 0x00, b'A', b'N', b'S', b'I', 0xFF, 0xF0]);

        out.clear();
        assert_eq!(handle_host_3215_negotiation(&TN_WONT_ECHO, &mut out, 1).unwrap(), 3);
        assert_eq!(out, TN_DONT_ECHO.to_vec());

        out.clear();
        assert_eq!(handle_host_3215_negotiation(&[0xFF, 0xFB, 0x03, 0x41], &mut out, 1).unwrap(), 3);
        assert!(out.is_empty());
    }
}
