//! CONS sessions: the host talks to a line-mode console
//!
//! Hercules sends plain ASCII lines ending with CR and/or LF and asks for
//! input with its `HHCTE006A` prompt. The MECAFF console runs on the 3270
//! terminal as in GRAF sessions, so only the host side differs: lines are
//! split out of the packets, FSIO commands are answered with encoded input
//! lines, and password prompts switch the console to invisible input.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, info, trace, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use super::negotiation::handle_host_3215_negotiation;
use super::{is_session_end, Link, Session, SessionConfig, SessionKind};
use crate::console::{ConsoleGeometry, ConsoleInputSink, InputState, SinkAction, Vm3270Console};
use crate::error::MecaffResult;
use crate::lib3270::TerminalCapabilities;
use crate::protocol_common::{ascii_to_ebcdic_vec, ebcdic_to_ascii_string};
use crate::transport::{EncodedTransport, TransportMode};

const CRLF: &[u8] = b"\r\n";

static INPUT_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ *HHCTE006A Enter input for console device [0-9a-fA-F]{4}$").unwrap());

const PASSWORD_PROMPTS: [&str; 4] = [
    "ENTER PASSWORD:",
    "ENTER READ PASSWORD:",
    "ENTER WRITE PASSWORD:",
    "ENTER MULT PASSWORD:",
];
const PASSWORD_MASK: &str = "XXXXXXXX";

const VM370_ONLINE: &str = "    VM/370 Online ";
const VM380_ONLINE: &str = " VM/380 Online ";

/// Line assembly and prompt tracking on the host side
#[derive(Debug, Default)]
struct HostLines {
    /// Start of a line whose end is still to come
    pending: Vec<u8>,
    last_was_pwd_prompt: bool,
    last_was_pwd_mask: bool,
    last_was_session_end_start: bool,
}

pub struct Tn3215Session {
    conn_no: u32,
    link: Link,
    console: Arc<Vm3270Console>,
    transport: Mutex<EncodedTransport>,
    host_lines: Mutex<HostLines>,
    /// Prompts to answer with an empty line after an interrupt
    empty_requests_to_send: AtomicU32,
    fs_transfer_pending: AtomicBool,
    closing: AtomicBool,
}

impl Tn3215Session {
    /// Create the session on a negotiated link and paint the console.
    pub fn start(link: Link, caps: &TerminalCapabilities, config: &SessionConfig) -> MecaffResult<Arc<Self>> {
        let conn_no = link.conn_no();
        let session = Arc::new_cyclic(|weak: &Weak<Self>| {
            let sink: Weak<dyn ConsoleInputSink> = weak.clone();
            let console = Vm3270Console::new(
                conn_no,
                ConsoleGeometry::new(caps.alt_rows, caps.alt_cols),
                config.send_delay_ms,
                link.to_terminal(),
                sink,
            );
            Self {
                conn_no,
                console: Arc::new(console),
                transport: Mutex::new(EncodedTransport::new(TransportMode::Tn3215, caps, conn_no)),
                host_lines: Mutex::new(HostLines::default()),
                empty_requests_to_send: AtomicU32::new(0),
                fs_transfer_pending: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                link,
            }
        });
        session.console.start()?;
        session.console.set_input_state(InputState::Running)?;
        info!("{{{conn_no:02}}} CONS session started");
        Ok(session)
    }

    pub fn console(&self) -> &Arc<Vm3270Console> {
        &self.console
    }

    fn lock_transport(&self) -> MutexGuard<'_, EncodedTransport> {
        self.transport.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send_line(&self, line: &[u8]) -> MecaffResult<()> {
        let mut data = Vec::with_capacity(line.len() + CRLF.len());
        data.extend_from_slice(line);
        data.extend_from_slice(CRLF);
        self.link.send_to_host(&data)
    }

    fn send_encoded_data(&self, transport: &mut EncodedTransport) -> MecaffResult<()> {
        let chunk = transport.take_next_chunk().unwrap_or_default();
        self.send_line(&chunk)?;
        if transport.available_chunks() == 0 && self.fs_transfer_pending.swap(false, Ordering::SeqCst) {
            self.console.transfer_completed()?;
        }
        Ok(())
    }

    fn send_fs_state(&self, transport: &mut EncodedTransport, timed_out: bool, available: bool) -> MecaffResult<()> {
        let state = transport.fs_read_state(timed_out, available);
        self.send_line(&state)
    }

    fn perform_full_screen(&self, transport: &mut EncodedTransport, action: SinkAction) -> MecaffResult<()> {
        match action {
            SinkAction::FullScreenInput(input) => {
                transport.prepare_full_screen_input_transfer(&input);
                self.fs_transfer_pending.store(true, Ordering::SeqCst);
                self.send_encoded_data(transport)
            }
            SinkAction::FullScreenAvailability(available) => self.send_fs_state(transport, false, available),
            SinkAction::FullScreenTimedOut => self.send_fs_state(transport, true, false),
            other => {
                warn!("{{{:02}}} unexpected fullscreen action {other:?}", self.conn_no);
                Ok(())
            }
        }
    }

    fn send_interrupt(&self, command: &[u8], empty_requests: u32) -> MecaffResult<bool> {
        self.link.send_to_host(command)?;
        self.empty_requests_to_send.store(empty_requests, Ordering::SeqCst);
        Ok(true)
    }

    /// Try the line as FSIO command, also without leading blanks.
    fn handle_fsio(&self, line: &[u8]) -> MecaffResult<bool> {
        let mut transport = self.lock_transport();
        let mut handled = transport.handle_host_line(line, &*self.console)?;
        if !handled {
            let unindented = line.iter().position(|&b| b != b' ').map_or(&line[..0], |p| &line[p..]);
            if !unindented.is_empty() && unindented.len() < line.len() {
                handled = transport.handle_host_line(unindented, &*self.console)?;
            }
        }
        if handled && transport.has_immediate_transmission() {
            self.send_encoded_data(&mut transport)?;
        }
        Ok(handled)
    }

    /// Hercules asks for console input.
    fn input_prompt(&self, lines: &mut HostLines) -> MecaffResult<()> {
        let mut transport = self.lock_transport();
        if transport.is_host_requesting_fs_in() {
            let actions = self
                .console
                .read_full_screen(transport.fs_in_timeout(), transport.fs_in_grace_period())?;
            for action in actions {
                self.perform_full_screen(&mut transport, action)?;
            }
        } else if self.take_empty_request() {
            self.send_line(&[])?;
        } else if transport.available_chunks() > 0 {
            self.send_encoded_data(&mut transport)?;
        } else {
            let state = if lines.last_was_pwd_mask { InputState::PwRead } else { InputState::VmRead };
            self.console.set_input_state(state)?;
        }
        lines.last_was_pwd_mask = false;
        transport.reset_fs_in_request();
        Ok(())
    }

    fn take_empty_request(&self) -> bool {
        self.empty_requests_to_send
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn process_line(&self, raw: &[u8], lines: &mut HostLines) -> MecaffResult<()> {
        if raw.is_empty() {
            return Ok(());
        }
        let line = String::from_utf8_lossy(raw);
        debug!("{{{:02}}}   Line-Str({line})", self.conn_no);

        if self.handle_fsio(raw)? {
            lines.last_was_pwd_prompt = false;
            lines.last_was_pwd_mask = false;
            self.empty_requests_to_send.store(0, Ordering::SeqCst);
        } else if INPUT_PROMPT.is_match(&line) {
            self.input_prompt(lines)?;
        } else if lines.last_was_pwd_prompt && line == PASSWORD_MASK {
            // the next prompt reads a password
            lines.last_was_pwd_mask = true;
            self.lock_transport().reset_fs_in_request();
        } else {
            self.console.append_host_line(&ascii_to_ebcdic_vec(&line))?;
            if lines.last_was_session_end_start && (line == VM370_ONLINE || line == VM380_ONLINE) {
                self.console.end_current_session(true)?;
            }
            lines.last_was_session_end_start = is_session_end(&line);
            lines.last_was_pwd_prompt = PASSWORD_PROMPTS.contains(&&*line);
            lines.last_was_pwd_mask = false;
            self.lock_transport().reset_fs_in_request();
        }
        Ok(())
    }

    /// Finish the current line: `part` completes the pending line start.
    fn line_end(&self, part: &[u8], lines: &mut HostLines) -> MecaffResult<()> {
        if lines.pending.is_empty() {
            return self.process_line(part, lines);
        }
        let mut line = std::mem::take(&mut lines.pending);
        line.extend_from_slice(part);
        self.process_line(&line, lines)
    }
}

impl ConsoleInputSink for Tn3215Session {
    fn console_action(&self, action: SinkAction) -> MecaffResult<bool> {
        match action {
            SinkAction::UserInput(line) => {
                self.send_line(ebcdic_to_ascii_string(&line).as_bytes())?;
                Ok(false)
            }
            SinkAction::InterruptCp => self.send_interrupt(b"#cp\r\n", 1),
            SinkAction::InterruptHt => self.send_interrupt(b"#cp attn #ht\r\n", 2),
            SinkAction::InterruptHx => self.send_interrupt(b"#cp attn #hx\r\n", 2),
            SinkAction::Pf03 => Ok(false),
            fullscreen => {
                let mut transport = self.lock_transport();
                self.perform_full_screen(&mut transport, fullscreen)?;
                Ok(false)
            }
        }
    }
}

impl Session for Tn3215Session {
    fn kind(&self) -> SessionKind {
        SessionKind::Cons
    }

    fn link(&self) -> &Link {
        &self.link
    }

    fn process_host_packet(&self, packet: &[u8]) -> MecaffResult<()> {
        let mut lines = self.host_lines.lock().unwrap_or_else(|e| e.into_inner());
        let mut offset = 0;
        let mut start = 0;
        while offset < packet.len() {
            let b = packet[offset];
            if b == 0xFF && packet.get(offset + 1).is_some_and(|&next| next != 0xFF) {
                self.line_end(&packet[start..offset], &mut lines)?;
                let consumed = self.link.with_host_writer(|writer| {
                    handle_host_3215_negotiation(&packet[offset..], writer, self.conn_no)
                })?;
                offset += consumed.max(1);
                start = offset;
            } else if b == b'\r' || b == b'\n' {
                self.line_end(&packet[start..offset], &mut lines)?;
                offset += 1;
                start = offset;
            } else {
                offset += 1;
            }
        }
        if start < packet.len() {
            trace!("{{{:02}}} keeping {} bytes of an incomplete line", self.conn_no, packet.len() - start);
            lines.pending.extend_from_slice(&packet[start..]);
        }
        Ok(())
    }

    fn process_terminal_packet(&self, packet: &[u8]) -> MecaffResult<()> {
        self.console.process_bytes_from_terminal(packet)
    }

    fn connection_closed(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.console.close();
        self.link.connection_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleState;
    use crate::protocol_common::shared_writer;
    use crate::protocol_common::telnet_base::{TN_DO_TERMINAL_TYPE, TN_WILL_TERMINAL_TYPE};
    use std::io::{self, Write};

    const PROMPT: &[u8] = b"HHCTE006A Enter input for console device 0009\r\n";

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn take(&self) -> Vec<u8> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn session() -> (Arc<Tn3215Session>, Capture) {
        let host = Capture::default();
        let link = Link::with_writers(3, shared_writer(io::sink()), shared_writer(host.clone()));
        let caps = TerminalCapabilities::from_terminal_type("IBM-3278-2");
        let session = Tn3215Session::start(link, &caps, &SessionConfig::default()).unwrap();
        (session, host)
    }

    #[test]
    fn test_prompt_sets_vm_read() {
        let (session, _host) = session();
        assert_eq!(session.console().state(), ConsoleState::Running);
        session.process_host_packet(PROMPT).unwrap();
        assert_eq!(session.console().state(), ConsoleState::VmRead);
        session.connection_closed();
    }

    #[test]
    fn test_prompt_split_over_packets() {
        let (session, _host) = session();
        let (first, second) = PROMPT.split_at(20);
        session.process_host_packet(first).unwrap();
        assert_eq!(session.console().state(), ConsoleState::Running);
        session.process_host_packet(second).unwrap();
        assert_eq!(session.console().state(), ConsoleState::VmRead);
        session.connection_closed();
    }

    #[test]
    fn test_password_prompt() {
        let (session, _host) = session();
        let before = session.console().output_line_count();
        session.process_host_packet(b"ENTER PASSWORD:\r\nXXXXXXXX\r\n").unwrap();
        assert_eq!(session.console().output_line_count(), before + 1);
        session.process_host_packet(PROMPT).unwrap();
        assert_eq!(session.console().state(), ConsoleState::PwRead);
        session.connection_closed();
    }

    #[test]
    fn test_user_input_is_ascii_line() {
        let (session, host) = session();
        let drain = session
            .console_action(SinkAction::UserInput(ascii_to_ebcdic_vec("logon maint")))
            .unwrap();
        assert!(!drain);
        assert_eq!(host.take(), b"logon maint\r\n");
    }

    #[test]
    fn test_interrupt_answers_prompts_with_empty_lines() {
        let (session, host) = session();
        assert!(session.console_action(SinkAction::InterruptHt).unwrap());
        assert_eq!(host.take(), b"#cp attn #ht\r\n");

        session.process_host_packet(PROMPT).unwrap();
        session.process_host_packet(PROMPT).unwrap();
        assert_eq!(host.take(), b"\r\n\r\n");
        assert_eq!(session.console().state(), ConsoleState::Running);

        session.process_host_packet(PROMPT).unwrap();
        assert!(host.take().is_empty());
        assert_eq!(session.console().state(), ConsoleState::VmRead);
        assert!(!session.console_action(SinkAction::Pf03).unwrap());
        session.connection_closed();
    }

    #[test]
    fn test_negotiation_inside_output() {
        let (session, host) = session();
        let mut packet = b"line one\r\n".to_vec();
        packet.extend_from_slice(&TN_DO_TERMINAL_TYPE);
        packet.extend_from_slice(PROMPT);
        let before = session.console().output_line_count();
        session.process_host_packet(&packet).unwrap();
        assert_eq!(host.take(), TN_WILL_TERMINAL_TYPE.to_vec());
        assert_eq!(session.console().output_line_count(), before + 1);
        assert_eq!(session.console().state(), ConsoleState::VmRead);
        session.connection_closed();
    }
}
