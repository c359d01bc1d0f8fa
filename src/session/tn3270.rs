//! GRAF sessions: the host talks to a simulated 3270 terminal
//!
//! CP writes its console screen to the simulated terminal. The session
//! interprets where each piece of text lands: the status area in the lower
//! right corner tells the console state, text in column 1 is console output
//! (or an FSIO command), everything else is indented output. Lines travel
//! to the MECAFF console through a pipeline; when the console has backlog
//! while CP shows MORE..., CP is put into HOLDING until the pipeline drained.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, info, trace, warn};
use once_cell::sync::{Lazy, OnceCell};

use super::{is_session_end, IntervalEnsurer, Link, Session, SessionConfig, SessionKind, TextPipeline};
use crate::console::{ConsoleGeometry, ConsoleInputSink, InputState, SinkAction, Vm3270Console};
use crate::error::{MecaffError, MecaffResult, NetworkError};
use crate::lib3270::query::host_query_reply;
use crate::lib3270::{BufferAddress, CommandCode, FieldFlags, OrderParser, RecordAssembler, RecordSink, TerminalCapabilities};
use crate::protocol_common::ebcdic::{ebcdic_eq_ignore_case, ebcdic_strip_trailing, EBCDIC_BLANK};
use crate::protocol_common::telnet_base::{escape_iac, hex_dump, TN_EOR};
use crate::protocol_common::{ascii_to_ebcdic_vec, ebcdic_to_ascii_string};
use crate::transport::{EncodedTransport, TransportMode};

/// Column of the CP status text (all models have 80 columns)
const STATE_COL: usize = 61;
const STATE_ROW_SMALL: usize = 24;
const INPUT_ROW_SMALL: usize = 23;
const STATE_ROW_LARGE: usize = 43;
const INPUT_ROW_LARGE: usize = 42;

/// ENTER with cursor at 23/1, followed by SBA 23/1
const INPUT_START: [u8; 6] = [0x7D, 0x5B, 0xE5, 0x11, 0x5B, 0xE5];
const AID_CLEAR: [u8; 1] = [0x6D];
const AID_PF03: [u8; 1] = [0x6B];

/// Minimal distance between handshake operations with CP
const HANDSHAKE_INTERVAL: Duration = Duration::from_millis(3);
/// Minimal distance between user initiated transmissions
const INTERACTION_INTERVAL: Duration = Duration::from_millis(200);
const STATE_WAIT: Duration = Duration::from_millis(100);
const WSF_REPLY_DELAY: Duration = Duration::from_millis(5);

const HERC_COL_TITLE: usize = 2;
const HERC_COL_DATA: usize = 22;
const HERC_SCREEN_END: &str = "           HHH          HHH   The S/370, ";
const HERC_ERROR_END: &str = "Connection rejected, no available 3270";

const MAX_INDENT: usize = 40;

const VM370_ONLINE: &str = "VM/370 ONLINE       ";
const VM380_ONLINE: &str = "VM/380 ONLINE       ";

static STATUS_TEXTS: Lazy<Vec<(Vec<u8>, VmState)>> = Lazy::new(|| {
    [
        ("RUNNING          ", VmState::Running),
        ("VM READ          ", VmState::VmRead),
        ("CP READ          ", VmState::CpRead),
        ("MORE...          ", VmState::More),
        ("HOLDING          ", VmState::Holding),
        ("NOT ACCEPTED     ", VmState::NotAccepted),
    ]
    .into_iter()
    .map(|(text, state)| (ascii_to_ebcdic_vec(text), state))
    .collect()
});

/// CP console state shown in the status area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    VmRead,
    CpRead,
    More,
    Holding,
    NotAccepted,
    Unknown,
}

impl VmState {
    pub fn from_status(text: &[u8]) -> Self {
        STATUS_TEXTS
            .iter()
            .find(|(status, _)| text.starts_with(status))
            .map_or(VmState::Unknown, |(_, state)| *state)
    }

    fn accepts_input(&self) -> bool {
        matches!(self, VmState::Running | VmState::VmRead | VmState::CpRead)
    }
}

/// Screen clearing handshake with CP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClearState {
    NotClearing,
    /// CLEAR sent, waiting for the screen rebuild
    ClearRequested,
    /// EW/EWA received, screen is blank
    Cleared,
}

#[derive(Debug)]
struct VmShared {
    state: VmState,
    /// HOLDING was requested by us and is expected
    in_holding: bool,
    clear_state: ClearState,
}

/// What the simulated terminal knows about the screen
#[derive(Debug)]
struct ScreenState {
    herc_initial: bool,
    tmp_line: Vec<u8>,
    state_row: usize,
    input_row: usize,
    field_is_invisible_input: bool,
    last_was_session_end_start: bool,
}

impl Default for ScreenState {
    fn default() -> Self {
        Self {
            herc_initial: true,
            tmp_line: Vec::with_capacity(160),
            state_row: STATE_ROW_SMALL,
            input_row: INPUT_ROW_SMALL,
            field_is_invisible_input: false,
            last_was_session_end_start: false,
        }
    }
}

#[derive(Debug, Default)]
struct HostSide {
    assembler: RecordAssembler,
    parser: OrderParser,
    screen: ScreenState,
}

pub struct Tn3270Session {
    conn_no: u32,
    link: Link,
    console: Arc<Vm3270Console>,
    transport: Mutex<EncodedTransport>,
    host_side: Mutex<HostSide>,
    vm: Mutex<VmShared>,
    vm_changed: Condvar,
    interval: IntervalEnsurer,
    last_input_sent: Mutex<Vec<u8>>,
    h2t: OnceCell<TextPipeline>,
    t2h: OnceCell<TextPipeline>,
    fs_transfer_pending: AtomicBool,
    closing: AtomicBool,
}

impl Tn3270Session {
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
                transport: Mutex::new(EncodedTransport::new(TransportMode::Tn3270, caps, conn_no)),
                host_side: Mutex::new(HostSide::default()),
                vm: Mutex::new(VmShared {
                    state: VmState::Unknown,
                    in_holding: false,
                    clear_state: ClearState::NotClearing,
                }),
                vm_changed: Condvar::new(),
                interval: IntervalEnsurer::new(HANDSHAKE_INTERVAL),
                last_input_sent: Mutex::new(Vec::new()),
                h2t: OnceCell::new(),
                t2h: OnceCell::new(),
                fs_transfer_pending: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                link,
            }
        });
        session.start_pipelines()?;
        session.console.start()?;
        info!("{{{conn_no:02}}} GRAF session started");
        Ok(session)
    }

    fn start_pipelines(self: &Arc<Self>) -> MecaffResult<()> {
        let console = Arc::downgrade(&self.console);
        let drained_session = Arc::downgrade(self);
        let h2t = TextPipeline::start(
            &format!("{{{:02}}} H->T", self.conn_no),
            move |line| match console.upgrade() {
                Some(console) => console.append_host_line(line),
                None => Err(gone()),
            },
            Some(move || match drained_session.upgrade() {
                Some(session) => session.pipeline_drained(),
                None => Err(gone()),
            }),
        )?;
        let input_session = Arc::downgrade(self);
        let t2h = TextPipeline::start(
            &format!("{{{:02}}} T->H", self.conn_no),
            move |line| match input_session.upgrade() {
                Some(session) => session.transmit_to_host(line),
                None => Err(gone()),
            },
            None::<fn() -> MecaffResult<()>>,
        )?;
        let _ = self.h2t.set(h2t);
        let _ = self.t2h.set(t2h);
        Ok(())
    }

    pub fn console(&self) -> &Arc<Vm3270Console> {
        &self.console
    }

    /// Current CP console state as last seen on the screen
    pub fn vm_state(&self) -> VmState {
        self.lock_vm().state
    }

    fn lock_vm(&self) -> MutexGuard<'_, VmShared> {
        self.vm.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_transport(&self) -> MutexGuard<'_, EncodedTransport> {
        self.transport.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait_vm<'a>(&self, vm: MutexGuard<'a, VmShared>) -> MutexGuard<'a, VmShared> {
        match self.vm_changed.wait_timeout(vm, STATE_WAIT) {
            Ok((vm, _)) => vm,
            Err(e) => e.into_inner().0,
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn h2t_line(&self, line: &[u8]) {
        if let Some(pipeline) = self.h2t.get() {
            pipeline.append_line(line);
        }
    }

    fn remember_input(&self, sent: &[u8]) {
        let mut last = self.last_input_sent.lock().unwrap_or_else(|e| e.into_inner());
        last.clear();
        last.extend_from_slice(ebcdic_strip_trailing(sent));
    }

    /// Is `text` the host's echo of the last input? A match is consumed.
    fn is_echo(&self, text: &[u8]) -> bool {
        let mut last = self.last_input_sent.lock().unwrap_or_else(|e| e.into_inner());
        if !last.is_empty() && ebcdic_eq_ignore_case(&last, ebcdic_strip_trailing(text)) {
            last.clear();
            return true;
        }
        false
    }

    fn send_input_record(&self, payload: &[u8]) -> MecaffResult<()> {
        let mut record = Vec::with_capacity(INPUT_START.len() + payload.len() + 2);
        record.extend_from_slice(&INPUT_START);
        record.extend_from_slice(&escape_iac(payload));
        record.extend_from_slice(&TN_EOR);
        self.link.send_to_host(&record)
    }

    fn send_aid(&self, aid: &[u8]) -> MecaffResult<()> {
        let mut record = aid.to_vec();
        record.extend_from_slice(&TN_EOR);
        self.link.send_to_host(&record)
    }

    fn send_empty_cmd(&self) -> MecaffResult<()> {
        debug!("{{{:02}}} ...sending EmptyCmd", self.conn_no);
        self.interval.ensure();
        self.send_input_record(&[])
    }

    fn send_clear_cmd(&self, vm: &mut VmShared) -> MecaffResult<()> {
        if vm.clear_state == ClearState::ClearRequested {
            debug!("{{{:02}}} ... Screen-Clear already underway", self.conn_no);
            return Ok(());
        }
        debug!("{{{:02}}} ...sending ClearCmd", self.conn_no);
        self.interval.ensure();
        self.send_aid(&AID_CLEAR)?;
        vm.clear_state = ClearState::ClearRequested;
        Ok(())
    }

    /// Put CP into HOLDING by pressing ENTER in MORE...
    fn hold_vm_output(&self) -> MecaffResult<()> {
        let mut vm = self.lock_vm();
        debug!("{{{:02}}} holdVmOutput() ... inHolding -> true", self.conn_no);
        self.send_empty_cmd()?;
        vm.in_holding = true;
        Ok(())
    }

    /// Let CP continue its output by pressing CLEAR
    fn clear_vm_output(&self) -> MecaffResult<()> {
        let mut vm = self.lock_vm();
        debug!("{{{:02}}} clearVmOutput()", self.conn_no);
        self.send_clear_cmd(&mut vm)
    }

    fn screen_cleared(&self) {
        let mut vm = self.lock_vm();
        vm.clear_state = ClearState::Cleared;
        debug!("{{{:02}}} screenCleared() -> clearState = cleared", self.conn_no);
        self.vm_changed.notify_all();
    }

    fn vm_state_arrived(&self) -> VmState {
        let mut vm = self.lock_vm();
        self.interval.log_op();
        if vm.clear_state == ClearState::Cleared {
            debug!("{{{:02}}} vmStateArrived() -> clearState = notClearing", self.conn_no);
            vm.clear_state = ClearState::NotClearing;
            self.vm_changed.notify_all();
        }
        vm.state
    }

    fn vm_state_updated(&self, new_state: VmState) {
        let mut vm = self.lock_vm();
        if vm.state == VmState::Holding {
            debug!("{{{:02}}} ... inHolding -> false", self.conn_no);
            vm.in_holding = false;
        }
        vm.state = new_state;
        debug!("{{{:02}}} vmStateUpdated(): switched to state = {new_state:?}", self.conn_no);
        self.vm_changed.notify_all();
    }

    /// The host wrote a new text into the status area.
    fn status_arrived(&self, text: &[u8], screen: &ScreenState) -> MecaffResult<()> {
        let old_state = self.vm_state_arrived();
        let new_state = VmState::from_status(text);
        if new_state == old_state {
            return Ok(());
        }
        debug!("{{{:02}}} NewState: {old_state:?} => {new_state:?}", self.conn_no);
        let in_holding = self.lock_vm().in_holding;
        match new_state {
            VmState::Holding if !in_holding => self.clear_vm_output()?,
            VmState::More => {
                if self.h2t.get().is_some_and(|p| p.has_backlog()) {
                    self.hold_vm_output()?;
                } else {
                    self.clear_vm_output()?;
                }
                self.console.set_input_state(InputState::Running)?;
            }
            VmState::VmRead | VmState::CpRead if screen.field_is_invisible_input => {
                self.console.set_input_state(InputState::PwRead)?;
            }
            VmState::VmRead => {
                let mut transport = self.lock_transport();
                if transport.is_host_requesting_fs_in() {
                    let actions = self
                        .console
                        .read_full_screen(transport.fs_in_timeout(), transport.fs_in_grace_period())?;
                    for action in actions {
                        self.perform_full_screen(&mut transport, action)?;
                    }
                } else if transport.available_chunks() > 0 {
                    self.send_encoded_data(&mut transport)?;
                } else {
                    self.console.set_input_state(InputState::VmRead)?;
                }
                transport.reset_fs_in_request();
            }
            VmState::CpRead => self.console.set_input_state(InputState::CpRead)?,
            VmState::Running => self.console.set_input_state(InputState::Running)?,
            _ => {}
        }
        self.vm_state_updated(new_state);
        Ok(())
    }

    /// Console output line written at column 1
    fn output_line(&self, text: &[u8], screen: &mut ScreenState) -> MecaffResult<()> {
        debug!("{{{:02}}} TXT: '{}'", self.conn_no, ebcdic_to_ascii_string(text));
        if self.is_echo(text) {
            debug!("{{{:02}}} ====>> echo of last input", self.conn_no);
            return Ok(());
        }
        {
            let mut transport = self.lock_transport();
            if transport.handle_host_line(text, &*self.console)? {
                if transport.has_immediate_transmission() {
                    self.send_encoded_data(&mut transport)?;
                }
                return Ok(());
            }
        }

        self.h2t_line(text);
        let line = ebcdic_to_ascii_string(text);
        if screen.last_was_session_end_start && (line == VM370_ONLINE || line == VM380_ONLINE) {
            self.console.end_current_session(true)?;
        }
        screen.last_was_session_end_start = is_session_end(&line);
        if screen.last_was_session_end_start {
            self.send_empty_cmd()?;
        }
        Ok(())
    }

    /// Text of the Hercules logo screen shown before CP takes over
    fn hercules_text(&self, text: &[u8], at: &BufferAddress, screen: &mut ScreenState) {
        debug!("{{{:02}}} TXT[col: {}]: {}", self.conn_no, at.col(), ebcdic_to_ascii_string(text));
        let blanks = |n: usize| vec![EBCDIC_BLANK; n];
        match at.col() {
            HERC_COL_TITLE => {
                if !screen.tmp_line.is_empty() {
                    self.h2t_line(&screen.tmp_line);
                    screen.tmp_line.clear();
                }
                screen.tmp_line.extend(blanks(2));
                screen.tmp_line.extend_from_slice(text);
                let end_of_screen = text.starts_with(&ascii_to_ebcdic_vec(HERC_SCREEN_END));
                if end_of_screen || text.starts_with(&ascii_to_ebcdic_vec(HERC_ERROR_END)) {
                    self.h2t_line(&screen.tmp_line);
                    screen.tmp_line.clear();
                }
                if end_of_screen {
                    debug!("{{{:02}}} end of Hercules screen", self.conn_no);
                    screen.herc_initial = false;
                }
            }
            HERC_COL_DATA => {
                screen.tmp_line.extend(blanks(2));
                screen.tmp_line.extend_from_slice(text);
                self.h2t_line(&screen.tmp_line);
                screen.tmp_line.clear();
            }
            _ => {
                screen.tmp_line.push(EBCDIC_BLANK);
                screen.tmp_line.extend_from_slice(text);
            }
        }
    }

    fn host_string(&self, text: &[u8], at: &BufferAddress, screen: &mut ScreenState) -> MecaffResult<()> {
        if text.is_empty() {
            return Ok(());
        }
        if screen.herc_initial {
            self.hercules_text(text, at, screen);
        } else if at.row() == screen.state_row && at.col() == STATE_COL {
            self.status_arrived(text, screen)?;
        } else if at.col() == 1 {
            self.output_line(text, screen)?;
        } else if at.row() < screen.input_row {
            debug!("{{{:02}}} TXT[col: {}]: {}", self.conn_no, at.col(), ebcdic_to_ascii_string(text));
            let mut line = vec![EBCDIC_BLANK; at.col().min(MAX_INDENT)];
            line.extend_from_slice(text);
            self.h2t_line(&line);
        } else {
            debug!("{{{:02}}} ** unknown **: {}", self.conn_no, ebcdic_to_ascii_string(text));
        }
        Ok(())
    }

    fn handle_data_stream(&self, packet: &[u8]) -> MecaffResult<()> {
        let mut host_side = self.host_side.lock().unwrap_or_else(|e| e.into_inner());
        let HostSide { assembler, parser, screen } = &mut *host_side;
        let records = match assembler.push(packet) {
            Ok(Some(records)) => records,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("{{{:02}}} {e}", self.conn_no);
                return Ok(());
            }
        };
        let mut interpreter = ScreenInterpreter { session: self, screen };
        match parser.process(&records, &mut interpreter) {
            Err(MecaffError::Protocol(e)) => {
                warn!("{{{:02}}} malformed 3270 output: {e}", self.conn_no);
                Ok(())
            }
            other => other,
        }
    }

    /// Send the next encoded chunk as input line; tells the console when
    /// the last chunk of a fullscreen input went out.
    fn send_encoded_data(&self, transport: &mut EncodedTransport) -> MecaffResult<()> {
        self.interval.ensure();
        if let Some(chunk) = transport.take_next_chunk() {
            self.send_input_record(&chunk)?;
            self.remember_input(&chunk);
        }
        if transport.available_chunks() == 0 && self.fs_transfer_pending.swap(false, Ordering::SeqCst) {
            self.console.transfer_completed()?;
        }
        Ok(())
    }

    fn send_fs_state(&self, transport: &mut EncodedTransport, timed_out: bool, available: bool) -> MecaffResult<()> {
        self.interval.ensure();
        let state = transport.fs_read_state(timed_out, available);
        self.send_input_record(&state)?;
        self.remember_input(&state);
        Ok(())
    }

    fn perform_full_screen(&self, transport: &mut EncodedTransport, action: SinkAction) -> MecaffResult<()> {
        match action {
            SinkAction::FullScreenInput(input) => {
                transport.prepare_full_screen_input_transfer(&input);
                self.fs_transfer_pending.store(true, Ordering::SeqCst);
                // remaining chunks go out with the next VM READs
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

    fn send_interrupt(&self, command: &str) -> MecaffResult<bool> {
        self.interval.ensure_interval(INTERACTION_INTERVAL);
        self.send_input_record(&ascii_to_ebcdic_vec(command))?;
        Ok(false)
    }

    /// Send an input line once CP accepts input.
    fn transmit_to_host(&self, line: &[u8]) -> MecaffResult<()> {
        let mut vm = self.lock_vm();
        debug!("{{{:02}}} transmitToHost([{}]:'{}')", self.conn_no, line.len(), ebcdic_to_ascii_string(line));
        while !vm.state.accepts_input() {
            if self.is_closing() {
                return Err(gone());
            }
            vm = self.wait_vm(vm);
        }
        self.interval.ensure_interval(INTERACTION_INTERVAL);
        self.send_input_record(line)?;
        self.remember_input(line);
        drop(vm);
        debug!("{{{:02}}} transmitToHost(): data transmitted", self.conn_no);
        Ok(())
    }

    /// All pending output reached the console: release a HOLDING CP.
    fn pipeline_drained(&self) -> MecaffResult<()> {
        let mut vm = self.lock_vm();
        if !vm.in_holding {
            return Ok(());
        }
        trace!("{{{:02}}} pipelineDrained(): waiting for HOLDING", self.conn_no);
        while vm.state != VmState::Holding {
            if self.is_closing() {
                return Ok(());
            }
            vm = self.wait_vm(vm);
        }
        self.send_clear_cmd(&mut vm)
    }
}

fn gone() -> MecaffError {
    NetworkError::ConnectionLost {
        reason: "session closed".into(),
    }
    .into()
}

/// Feeds the parser's findings into the session
struct ScreenInterpreter<'a> {
    session: &'a Tn3270Session,
    screen: &'a mut ScreenState,
}

impl RecordSink for ScreenInterpreter<'_> {
    fn command(&mut self, command: CommandCode) -> MecaffResult<()> {
        let (state_row, input_row) = match command {
            CommandCode::EraseWrite => (STATE_ROW_SMALL, INPUT_ROW_SMALL),
            CommandCode::EraseWriteAlternate => (STATE_ROW_LARGE, INPUT_ROW_LARGE),
            _ => return Ok(()),
        };
        self.screen.state_row = state_row;
        self.screen.input_row = input_row;
        self.session.screen_cleared();
        Ok(())
    }

    fn host_string(&mut self, text: &[u8], at: &BufferAddress) -> MecaffResult<()> {
        self.session.host_string(text, at, self.screen)
    }

    fn start_field(&mut self, flags: FieldFlags) -> MecaffResult<()> {
        if !flags.protected {
            self.screen.field_is_invisible_input = flags.invisible;
        }
        Ok(())
    }

    fn structured_field(&mut self, record: &[u8]) -> MecaffResult<()> {
        match host_query_reply(record) {
            Some(reply) => {
                debug!("{{{:02}}} handleWSF(): sending reply\n{}", self.session.conn_no, hex_dump(reply));
                thread::sleep(WSF_REPLY_DELAY);
                self.session.link.send_to_host(reply)
            }
            None => {
                trace!("{{{:02}}} WSF ignored", self.session.conn_no);
                Ok(())
            }
        }
    }

    fn end_of_record(&mut self) -> MecaffResult<()> {
        trace!("{{{:02}}} Telnet-EOR", self.session.conn_no);
        Ok(())
    }
}

impl ConsoleInputSink for Tn3270Session {
    fn console_action(&self, action: SinkAction) -> MecaffResult<bool> {
        match action {
            SinkAction::UserInput(line) => {
                if let Some(pipeline) = self.t2h.get() {
                    pipeline.append_line(&line);
                }
                Ok(false)
            }
            SinkAction::InterruptCp => self.send_interrupt("#CP"),
            SinkAction::InterruptHt => self.send_interrupt("HT"),
            SinkAction::InterruptHx => self.send_interrupt("HX"),
            SinkAction::Pf03 => {
                self.interval.ensure_interval(INTERACTION_INTERVAL);
                self.send_aid(&AID_PF03)?;
                Ok(false)
            }
            fullscreen => {
                let mut transport = self.lock_transport();
                self.perform_full_screen(&mut transport, fullscreen)?;
                Ok(false)
            }
        }
    }
}

impl Session for Tn3270Session {
    fn kind(&self) -> SessionKind {
        SessionKind::Graf
    }

    fn link(&self) -> &Link {
        &self.link
    }

    fn process_host_packet(&self, packet: &[u8]) -> MecaffResult<()> {
        if packet.first() == Some(&0xFF) {
            debug!("{{{:02}}} {}[telnet-out-of-band]\n{}", self.conn_no, self.link.h2t().prefix(), hex_dump(packet));
            return self.link.send_to_terminal(packet);
        }
        self.handle_data_stream(packet)
    }

    fn process_terminal_packet(&self, packet: &[u8]) -> MecaffResult<()> {
        if packet.first() == Some(&0xFF) {
            debug!("{{{:02}}} {}[telnet-out-of-band]\n{}", self.conn_no, self.link.t2h().prefix(), hex_dump(packet));
            return self.link.send_to_host(packet);
        }
        self.console.process_bytes_from_terminal(packet)
    }

    fn connection_closed(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.console.close();
        for pipeline in [self.h2t.get(), self.t2h.get()].into_iter().flatten() {
            pipeline.shutdown();
        }
        self.vm_changed.notify_all();
        self.link.connection_closed();
    }
}
