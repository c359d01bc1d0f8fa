//! Interpreter for FSIO commands tunneled from the host programs
//!
//! Host programs write encoded commands as ordinary output lines starting
//! with the start sequence. A recognized command is handled here, possibly
//! together with the console, and its response is queued in the encoder as
//! chunks to be sent back as input lines whenever the host prompts.

use log::{debug, error, info, trace};

use super::decoder::DataDecoder;
use super::encoder::DataEncoder;
use super::encoding::{TransportEncoding, TransportMode};
use crate::console::{Attr, Color, ConsoleControl, ConsoleElement, FS_DEFAULT_GRACE, FS_NO_TIMEOUT};
use crate::error::MecaffResult;
use crate::lib3270::TerminalCapabilities;
use crate::protocol_common::ebcdic::ascii_to_ebcdic_vec;

/// Protocol version reported by GET-TERM-DATA
pub const TRANSPORT_VERSION: u32 = 3;

/// Version of this gateway (major, minor, sub)
pub const MECAFF_VERSION: (u32, u32, u32) = (1, 2, 0);

pub const REQ_GETTERM: char = 'T';
pub const RESP_GETTERM: char = 'T';
pub const REQ_GETTERMPF: char = 't';
pub const RESP_GETTERMPF: char = 't';
pub const REQ_SETCONS: char = 'C';
pub const RESP_SETCONS: char = 'C';
pub const REQ_INITFS: char = 'W';
pub const RESP_INITFS: char = 'W';
pub const REQ_WRFSCHUNK: char = 'f';
pub const REQ_WRFSCHUNKFINAL: char = 'F';
pub const REQ_READFS: char = 'I';
pub const RESP_READFS: char = 'E';
pub const RESP_RDFSCHUNK: char = 'i';
pub const RESP_RDFSCHUNKFINAL: char = 'I';
pub const REQ_FSLOCK: char = '&';
pub const REQ_ECHO: char = ':';
pub const REQ_SETFLOWMODE: char = '|';

/// INIT-FULLSCREEN / READ-FULLSCREEN result: screen not available
pub const RC_NOT_AVAILABLE: u32 = 1;
/// INIT-FULLSCREEN / READ-FULLSCREEN result: wrong session id
pub const RC_BAD_SESSION: u32 = 2;
/// READ-FULLSCREEN state: timed out
pub const RC_TIMED_OUT: u32 = 3;
/// READ-FULLSCREEN state: no input available
pub const RC_NO_INPUT: u32 = 4;

pub struct EncodedTransport {
    conn_no: u32,
    enc: TransportEncoding,
    encoder: DataEncoder,
    decoder: DataDecoder,
    fs_buffer: Vec<u8>,
    terminal_type: Vec<u8>,
    caps: TerminalCapabilities,
    session_id: u32,
    fs_in_timeout: i32,
    fs_in_grace_period: i32,
    last_was_fs_in_request: bool,
    has_immediate_transmission: bool,
}

impl EncodedTransport {
    pub fn new(mode: TransportMode, caps: &TerminalCapabilities, conn_no: u32) -> Self {
        let millis = chrono::Utc::now().timestamp_millis().unsigned_abs();
        let session_id = (millis % i32::MAX as u64) as u32;
        Self::with_session_id(mode, caps, conn_no, session_id)
    }

    pub fn with_session_id(mode: TransportMode, caps: &TerminalCapabilities, conn_no: u32, session_id: u32) -> Self {
        let enc = TransportEncoding::new(mode);
        info!("{{{conn_no:02}}} sessionId : {session_id}");
        debug!("{{{conn_no:02}}} sessionMode : {}", enc.session_mode());
        Self {
            conn_no,
            encoder: DataEncoder::new(enc.clone()),
            decoder: DataDecoder::new(enc.clone()),
            enc,
            fs_buffer: Vec::with_capacity(8192),
            terminal_type: ascii_to_ebcdic_vec(&caps.terminal_type),
            caps: caps.clone(),
            session_id,
            fs_in_timeout: FS_NO_TIMEOUT,
            fs_in_grace_period: FS_DEFAULT_GRACE,
            last_was_fs_in_request: false,
            has_immediate_transmission: false,
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn encoding(&self) -> &TransportEncoding {
        &self.enc
    }

    fn encode_attr(&mut self, console: &dyn ConsoleControl, elem: ConsoleElement) {
        let attr = console.attr(elem);
        let mut color_idx = attr.color.index();
        if attr.highlight {
            color_idx += 100;
        }
        self.encoder.encode_int(elem.index()).encode_int(color_idx);
    }

    fn decode_attr(&mut self, console: &dyn ConsoleControl) {
        let elem_idx = self.decoder.decode_int();
        let mut color_idx = self.decoder.decode_int();
        if self.decoder.had_parse_error() {
            return;
        }
        let highlight = color_idx >= 100;
        if highlight {
            color_idx -= 100;
        }
        let color = Color::from_index(color_idx).unwrap_or(Color::Default);
        if let Some(elem) = ConsoleElement::from_index(elem_idx) {
            console.set_attr(elem, Attr::new(color, highlight));
        }
    }

    /// Check a host output line for an FSIO command and handle it.
    ///
    /// Returns `false` if the line is not a (valid) command, in which case it
    /// is ordinary output.
    pub fn handle_host_line(&mut self, line: &[u8], console: &dyn ConsoleControl) -> MecaffResult<bool> {
        self.decoder.use_buffer(line);
        if !self.decoder.test_for_start() {
            return Ok(false);
        }
        trace!("{{{:02}}} FSIO command [{}]: {}", self.conn_no, line.len(), self.enc.remote_to_string(line));
        let cmd = self.decoder.next_char();
        if self.decoder.had_parse_error() {
            return Ok(false);
        }

        match cmd {
            REQ_GETTERM => {
                self.get_term_data(console);
                Ok(true)
            }
            REQ_GETTERMPF => Ok(self.get_term_pf(console)),
            REQ_SETCONS => self.set_console(console),
            REQ_INITFS => self.init_full_screen(console),
            REQ_WRFSCHUNK | REQ_WRFSCHUNKFINAL => {
                let data = self.decoder.decode_data();
                if self.decoder.had_parse_error() {
                    debug!("{{{:02}}} FSCmd('{cmd}') => parse error", self.conn_no);
                    return Ok(false);
                }
                self.fs_buffer.extend_from_slice(&data);
                if cmd == REQ_WRFSCHUNKFINAL {
                    debug!("{{{:02}}} FSCmd('F') -> {} bytes, writing to console", self.conn_no, self.fs_buffer.len());
                    console.write_full_screen(&self.fs_buffer)?;
                } else {
                    debug!("{{{:02}}} FSCmd('f') -> fsBuffer length is now {} bytes", self.conn_no, self.fs_buffer.len());
                }
                Ok(true)
            }
            REQ_READFS => Ok(self.read_full_screen(console)),
            REQ_ECHO => {
                self.encoder.clear();
                let mut result = false;
                loop {
                    let b = self.decoder.next_byte();
                    if b == 0 || self.decoder.had_parse_error() {
                        break;
                    }
                    self.encoder.append_byte(b);
                    result = true;
                }
                self.has_immediate_transmission = result;
                Ok(result)
            }
            REQ_FSLOCK => {
                let value = self.decoder.decode_int() as i32;
                if self.decoder.had_parse_error() {
                    return Ok(false);
                }
                console.set_fs_lock_timeout(value)?;
                Ok(true)
            }
            REQ_SETFLOWMODE => {
                let flow_mode = self.decoder.decode_int();
                if self.decoder.had_parse_error() {
                    return Ok(false);
                }
                console.set_flow_mode(flow_mode != 0)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_term_data(&mut self, console: &dyn ConsoleControl) {
        let caps = self.caps.clone();
        self.encoder.reset().append_char(RESP_GETTERM).encode_int(TRANSPORT_VERSION);

        // version 1: terminal characteristics, session identity
        let terminal_type = self.terminal_type.clone();
        self.encoder
            .encode_data(&terminal_type)
            .encode_int(caps.alt_rows as u32)
            .encode_int(caps.alt_cols as u32)
            .encode_int(u32::from(caps.can_alt_screen_size))
            .encode_int(u32::from(caps.can_ext_highlight))
            .encode_int(u32::from(caps.can_colors))
            .encode_int(self.session_id)
            .encode_int(self.enc.session_mode());

        // version 2: console attributes and the PF keys in use
        for elem in ConsoleElement::ALL {
            self.encode_attr(console, elem);
        }
        let mask = (1..=24u32)
            .filter(|&pf| console.pf_command(pf).is_some())
            .fold(0u32, |mask, pf| mask | (1 << (pf - 1)));
        self.encoder.encode_int(mask);

        // version 3: gateway version
        let (major, minor, sub) = MECAFF_VERSION;
        self.encoder.encode_int(major).encode_int(minor).encode_int(sub);
    }

    fn get_term_pf(&mut self, console: &dyn ConsoleControl) -> bool {
        let pf = self.decoder.decode_int();
        if self.decoder.had_parse_error() || !(1..=24).contains(&pf) {
            trace!("{{{:02}}} FSCmd('t') => invalid", self.conn_no);
            return false;
        }
        self.encoder.reset().append_char(RESP_GETTERMPF);
        match console.pf_command(pf) {
            Some(command) if !command.is_empty() => {
                self.encoder.encode_int(command.len() as u32).append_str(&command);
            }
            _ => {
                self.encoder.encode_int(0);
            }
        }
        true
    }

    fn set_console(&mut self, console: &dyn ConsoleControl) -> MecaffResult<bool> {
        // 1..99: number of attributes following, 101..124: PF key + 100
        let parm = self.decoder.decode_int();
        if self.decoder.had_parse_error() {
            trace!("{{{:02}}} FSCmd('C') => parse error", self.conn_no);
            return Ok(false);
        }
        if (1..100).contains(&parm) {
            for _ in 0..parm {
                self.decode_attr(console);
            }
            console.redraw_screen()?;
        } else if (101..=124).contains(&parm) {
            let pf = parm - 100;
            let command = self.decoder.remaining_to_string().and_then(|raw| bracketed_command(&raw));
            trace!("{{{:02}}} FSCmd('C') set PF{pf}: {command:?}", self.conn_no);
            console.set_pf_command(pf, command.as_deref());
        }
        self.encoder.reset().append_char(RESP_SETCONS).encode_int(0);
        Ok(true)
    }

    fn init_full_screen(&mut self, console: &dyn ConsoleControl) -> MecaffResult<bool> {
        let test_session_id = self.decoder.decode_int();
        let command_type = self.decoder.decode_int();
        let raw_length = self.decoder.decode_int();
        if self.decoder.had_parse_error() {
            trace!("{{{:02}}} FSCmd('W') => parse error", self.conn_no);
            return Ok(false);
        }
        self.fs_buffer.clear();
        // Write or EraseAllUnprotected only modify the existing screen
        let requires_previous = command_type == 0 || command_type == 3;
        trace!("{{{:02}}} FSCmd('W') : commandtype = {command_type}, rawDataLength = {raw_length}", self.conn_no);

        let response = if test_session_id != self.session_id {
            error!("{{{:02}}} FSCmd('W') : session id mismatch", self.conn_no);
            RC_BAD_SESSION
        } else if !console.acquire_full_screen(requires_previous)? {
            info!("{{{:02}}} FSCmd('W') : acquireFullScreen({requires_previous}) -> false", self.conn_no);
            RC_NOT_AVAILABLE
        } else {
            0
        };
        self.encoder.reset().append_char(RESP_INITFS).encode_int(response);
        Ok(true)
    }

    fn read_full_screen(&mut self, console: &dyn ConsoleControl) -> bool {
        let test_session_id = self.decoder.decode_int();
        if self.decoder.had_parse_error() {
            return false;
        }
        // timeout and grace period are optional
        self.fs_in_timeout = self.decoder.decode_int() as i32;
        if self.decoder.had_parse_error() {
            self.fs_in_timeout = FS_NO_TIMEOUT;
        }
        self.fs_in_grace_period = self.decoder.decode_int() as i32;
        if self.decoder.had_parse_error() {
            self.fs_in_grace_period = FS_DEFAULT_GRACE;
        }
        self.fs_in_grace_period = self.fs_in_grace_period.clamp(1, 100);

        let rc = if test_session_id != self.session_id {
            debug!("{{{:02}}} FSCmd('I') : session id mismatch", self.conn_no);
            RC_BAD_SESSION
        } else if !console.may_read_full_screen() {
            debug!("{{{:02}}} FSCmd('I') : mayReadFullScreen() -> false", self.conn_no);
            RC_NOT_AVAILABLE
        } else {
            0
        };
        if rc != 0 {
            self.encoder.reset().append_char(RESP_READFS).encode_int(rc);
        } else {
            trace!("{{{:02}}} FSCmd('I') => OK, waiting for fullscreen input", self.conn_no);
            self.last_was_fs_in_request = true;
        }
        true
    }

    /// A response must be sent at once, without waiting for a host prompt.
    pub fn has_immediate_transmission(&self) -> bool {
        self.has_immediate_transmission
    }

    /// Queue a 3270 input stream as a sequence of read chunks.
    ///
    /// There are always at least two chunks, so that the transfer completes
    /// on a host prompt and not while starting it.
    pub fn prepare_full_screen_input_transfer(&mut self, input: &[u8]) {
        let chunk_size = self.enc.chunk_size();
        let mut rest = input;
        self.encoder.reset();
        if rest.len() <= chunk_size {
            if let Some((aid, tail)) = rest.split_first() {
                self.encoder.append_char(RESP_RDFSCHUNK).encode_data(&[*aid]).new_chunk();
                rest = tail;
            }
        }
        while rest.len() > chunk_size {
            let (chunk, tail) = rest.split_at(chunk_size);
            self.encoder.append_char(RESP_RDFSCHUNK).encode_data(chunk).new_chunk();
            rest = tail;
        }
        self.encoder.append_char(RESP_RDFSCHUNKFINAL).encode_data(rest);
    }

    /// Remove the next response chunk for sending it to the host.
    pub fn take_next_chunk(&mut self) -> Option<Vec<u8>> {
        self.has_immediate_transmission = false;
        self.encoder.take_next_chunk()
    }

    pub fn available_chunks(&self) -> usize {
        self.encoder.available_chunks()
    }

    /// Response to a fullscreen read without input data.
    pub fn fs_read_state(&mut self, timed_out: bool, input_available: bool) -> Vec<u8> {
        let rc = if timed_out {
            RC_TIMED_OUT
        } else if input_available {
            0
        } else {
            RC_NO_INPUT
        };
        debug!("{{{:02}}} fs read state -> rc = {rc}", self.conn_no);
        self.encoder.reset().append_char(RESP_READFS).encode_int(rc);
        self.take_next_chunk().unwrap_or_default()
    }

    pub fn is_host_requesting_fs_in(&self) -> bool {
        self.last_was_fs_in_request
    }

    /// Fullscreen read timeout in 1/10 seconds
    pub fn fs_in_timeout(&self) -> i32 {
        self.fs_in_timeout
    }

    /// Fullscreen read grace period in 1/10 seconds
    pub fn fs_in_grace_period(&self) -> i32 {
        self.fs_in_grace_period
    }

    pub fn reset_fs_in_request(&mut self) {
        self.last_was_fs_in_request = false;
    }
}

/// PF command text enclosed in `[...]`, trailing garbage after `]` removed.
fn bracketed_command(raw: &str) -> Option<String> {
    let end = raw.rfind(']')?;
    let candidate = &raw[..=end];
    candidate
        .strip_prefix('[')
        .and_then(|c| c.strip_suffix(']'))
        .map(str::to_string)
}
