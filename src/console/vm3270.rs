//! The console state machine
//!
//! [`Vm3270Console`] paints the line-mode console of a VM session onto a
//! 3270 terminal and interprets the keys pressed there. Besides the line
//! mode it arbitrates the screen ownership between the console and
//! fullscreen programs on the host:
//!
//! - output lines arriving while a fullscreen program owns the screen are
//!   kept in a backlog and shown once the screen is given back;
//! - a fullscreen read waits for the terminal's input stream, optionally
//!   with a timeout, and keeps the screen for a grace period afterwards.
//!
//! The console is shared between the terminal reader, the host side and a
//! ticker thread. All state lives behind one mutex; requests towards the
//! session ([`SinkAction`]) are dispatched only after that mutex has been
//! released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, info, trace, warn};

use super::line_buffer::{LineBuffer, LineTag};
use super::pf_keys::{LocalCommand, PfAction, PfKeys};
use super::{
    Attr, ConsoleControl, ConsoleElement, ConsoleInputSink, DisplayAttrs, InputState, SinkAction, FS_NO_TIMEOUT,
    FS_READ_CANCEL,
};
use crate::error::MecaffResult;
use crate::lib3270::address::encode_6bit;
use crate::lib3270::codes::{CMD_ERASE_WRITE, CMD_ERASE_WRITE_ALTERNATE, CMD_WRITE, ORDER_SBA};
use crate::lib3270::{AidKey, BufferAddress, DataOutStream3270};
use crate::protocol_common::telnet_base::{ends_with_eor, escape_iac, hex_dump, unescape_iac, TN_EOR};
use crate::protocol_common::ebcdic::ebcdic_displayable;
use crate::protocol_common::{ascii_to_ebcdic_vec, ebcdic_to_ascii_string, write_shared, SharedWriter};

const STATUS_TEXT_LENGTH: usize = 9;
const INPUT_FIELD_INTRO: &str = " >>";
/// Input line length of CMS
const INPUT_LINE_LENGTH: usize = 130;
const MAX_OUTPUT_HISTORY: usize = 65536;
const MAX_INPUT_HISTORY: usize = 128;
const GREETING: &str = "The MECAFF-Console for VM/370 is online";

const TICK: Duration = Duration::from_millis(100);
const TICKS_PER_SESSION_TICK: u32 = 11;
const END_SESSION_TICKS: u32 = 3;
const MORE_WAIT: Duration = Duration::from_millis(100);
const ACQUIRE_WAIT: Duration = Duration::from_millis(20);
const ACQUIRE_WAIT_CYCLES: u32 = 2;

/// Internal state of the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Initial,
    VmRead,
    CpRead,
    PwRead,
    Running,
    More,
    /// A fullscreen program has written to the screen
    FsOut,
    /// A fullscreen program waits for the terminal's input
    FsIn,
}

impl ConsoleState {
    fn prompt(&self) -> &'static str {
        match self {
            Self::Running => "  Running",
            Self::VmRead => "  VM read",
            Self::CpRead => "  CP read",
            Self::More => "  More...",
            Self::PwRead => "Enter pwd",
            Self::Initial => "[Initial]",
            Self::FsOut | Self::FsIn => "UNDEFINED",
        }
    }
}

/// Screen layout of the console
///
/// The output zone covers the rows above the input zone. The input zone
/// holds the state prompt and an input field long enough for a CMS command
/// line, which wraps into the last row on 80 column screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleGeometry {
    pub rows: usize,
    pub cols: usize,
    /// Paint with Erase/Write Alternate
    pub use_alternate: bool,
    pub if_start_row: usize,
    pub if_start_col: usize,
    pub if_end_row: usize,
    pub if_end_col: usize,
    pub out_zone_rows: usize,
}

impl ConsoleGeometry {
    /// Layout for a terminal with the given alternate screen size. Sizes not
    /// larger than 24x80 fall back to the default screen.
    pub fn new(alt_rows: usize, alt_cols: usize) -> Self {
        let (rows, cols, use_alternate) = if alt_rows > 24 || alt_cols > 80 {
            (alt_rows, alt_cols, true)
        } else {
            (24, 80, false)
        };
        let if_start_col = STATUS_TEXT_LENGTH + INPUT_FIELD_INTRO.len() + 1;
        let mut if_start_row = rows;
        let mut if_end_col = if_start_col + INPUT_LINE_LENGTH + 1;
        if if_end_col > cols {
            if_end_col -= cols;
            if_start_row -= 1;
        }
        Self {
            rows,
            cols,
            use_alternate,
            if_start_row,
            if_start_col,
            if_end_row: rows,
            if_end_col,
            out_zone_rows: if_start_row - 1,
        }
    }
}

fn element_for(tag: LineTag) -> ConsoleElement {
    match tag {
        LineTag::HostOutput => ConsoleElement::OutNormal,
        LineTag::UserInput => ConsoleElement::OutEchoInput,
        LineTag::FullScreenBacklog => ConsoleElement::OutFsBg,
    }
}

struct ConsoleCore {
    conn_no: u32,
    geometry: ConsoleGeometry,
    send_delay: Duration,
    writer: SharedWriter,
    out: DataOutStream3270,
    cursor: BufferAddress,

    state: ConsoleState,
    flow_mode: bool,
    remaining_lines_to_more: i32,
    lines_since_last_user_action: u32,
    last_full_screen_overwritten: bool,
    fs_backlog: VecDeque<Vec<u8>>,
    consuming_fs_backlog: bool,
    drain_host_output: bool,
    ticks_for_end_session: u32,

    // fullscreen input
    fs_rcv_buffer: Vec<u8>,
    fs_rcv_complete: bool,
    /// the received input was handed to the host
    fs_rcv_locked: bool,
    fs_rcv_timeout: i32,
    fs_grace_period: i32,
    fs_remaining_grace: i32,
    fs_lock_timeout: i32,
    fs_locked_to_fs: bool,

    lines: LineBuffer,
    history: VecDeque<Vec<u8>>,
    history_idx: Option<usize>,
    saved_prompt: Vec<u8>,
    pf_keys: PfKeys,
    attrs: DisplayAttrs,
}

impl ConsoleCore {
    fn pause(&self) {
        if !self.send_delay.is_zero() {
            thread::sleep(self.send_delay);
        }
    }

    fn flush_out(&mut self) -> MecaffResult<()> {
        self.out.telnet_eor();
        write_shared(&self.writer, self.out.as_bytes())?;
        Ok(())
    }

    fn paint_output_zone(&mut self, zone_is_cleared: bool) {
        let g = self.geometry;
        if !zone_is_cleared {
            self.out.set_buffer_address(1, 1).repeat_to_address(g.if_start_row, 1, 0x00);
        }
        let mut row = 1;
        for (text, tag) in self.lines.page_lines() {
            if row > g.out_zone_rows {
                break;
            }
            let attr = self.attrs.get(element_for(tag));
            let shown: Vec<u8> = text.iter().map(|&b| ebcdic_displayable(b)).collect();
            self.out
                .set_buffer_address(row, 1)
                .set_attribute_color(attr.color.code3270())
                .append_ebcdic(&shown);
            row += 1 + text.len().saturating_sub(1) / g.cols;
        }
    }

    fn paint_input_zone(&mut self, prompt_only: bool) {
        let g = self.geometry;
        let password = self.state == ConsoleState::PwRead;
        let state_attr = self.attrs.get(ConsoleElement::ConsoleState);
        let prompt = format!("{}{}", self.state.prompt(), INPUT_FIELD_INTRO);
        self.out
            .set_buffer_address(g.if_start_row, 1)
            .set_attribute_color(state_attr.color.code3270())
            .append_ascii(&prompt);
        if prompt_only && !password {
            return;
        }

        let input_attr = self.attrs.get(ConsoleElement::CmdInput);
        let color = input_attr.color.code3270();
        let content = self
            .history_idx
            .and_then(|idx| self.history.get(idx))
            .unwrap_or(&self.saved_prompt);
        self.out
            .set_buffer_address(g.if_start_row, g.if_start_col)
            .set_attribute_color(color)
            .start_field_extended(false, false, input_attr.highlight, password, true, None, color)
            .append_ebcdic(content)
            .insert_cursor()
            .repeat_to_address(g.rows, g.cols, 0x00)
            .set_buffer_address(g.if_end_row, g.if_end_col)
            .start_field(true, false, false, false, false);
    }

    fn redraw_screen(&mut self) -> MecaffResult<()> {
        trace!("{{{:02}}} redrawScreen()", self.conn_no);
        self.pause();
        self.out.clear();
        if self.geometry.use_alternate {
            self.out.cmd_erase_write_alternate(false, true, false);
        } else {
            self.out.cmd_erase_write(false, true, false);
        }
        self.paint_input_zone(false);
        self.paint_output_zone(true);
        self.flush_out()?;
        self.last_full_screen_overwritten = true;
        Ok(())
    }

    fn redraw_output_zone_alone(&mut self) -> MecaffResult<()> {
        self.pause();
        if !self.last_full_screen_overwritten {
            return self.redraw_screen();
        }
        self.out.clear().cmd_write(false, true, false);
        self.paint_output_zone(false);
        self.flush_out()
    }

    fn redraw_input_zone_alone(&mut self, prompt_only: bool) -> MecaffResult<()> {
        self.pause();
        if !self.last_full_screen_overwritten {
            return self.redraw_screen();
        }
        self.out.clear().cmd_write(false, true, false);
        self.paint_input_zone(prompt_only);
        self.flush_out()
    }

    /// Show the lines collected during fullscreen mode, at most until a More
    /// state is required.
    fn consume_fs_backlog(&mut self) -> MecaffResult<()> {
        self.state = ConsoleState::Running;
        self.consuming_fs_backlog = false;
        let mut altered = false;
        while self.remaining_lines_to_more > 1 {
            let Some(text) = self.fs_backlog.pop_front() else {
                break;
            };
            let rows = self.lines.append(&text, LineTag::FullScreenBacklog);
            self.remaining_lines_to_more -= rows as i32;
            self.lines_since_last_user_action += 1;
            altered = true;
        }
        if altered {
            self.state = ConsoleState::More;
            self.consuming_fs_backlog = true;
            self.redraw_screen()?;
        }
        Ok(())
    }

    /// The user acknowledged the screen content.
    fn leave_more_state(&mut self, echoed_rows: usize) -> MecaffResult<()> {
        let out_zone_rows = self.geometry.out_zone_rows;
        self.lines
            .update_last_line_tags(out_zone_rows, LineTag::FullScreenBacklog, LineTag::HostOutput);
        self.remaining_lines_to_more = out_zone_rows as i32 - (echoed_rows as i32 - 1).max(0);
        self.lines_since_last_user_action = 0;
        self.consume_fs_backlog()
    }

    fn add_to_history(&mut self, text: &[u8]) {
        if self.history.len() >= MAX_INPUT_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(text.to_vec());
        self.history_idx = None;
    }

    fn interrupts_allowed(&self) -> bool {
        !self.consuming_fs_backlog && self.ticks_for_end_session == 0
    }

    fn interrupt(&mut self, action: SinkAction, actions: &mut Vec<SinkAction>) -> MecaffResult<()> {
        debug!("{{{:02}}} user interrupt: {action:?}", self.conn_no);
        actions.push(action);
        self.redraw_input_zone_alone(true)
    }

    fn handle_terminal_input(&mut self, data: &[u8], actions: &mut Vec<SinkAction>) -> MecaffResult<()> {
        if matches!(self.state, ConsoleState::FsIn | ConsoleState::FsOut) {
            if self.fs_rcv_complete {
                trace!("{{{:02}}} fullscreen input already complete, ignoring {} bytes", self.conn_no, data.len());
                return Ok(());
            }
            self.fs_rcv_buffer.extend_from_slice(data);
            if ends_with_eor(&self.fs_rcv_buffer) {
                let len = self.fs_rcv_buffer.len() - TN_EOR.len();
                self.fs_rcv_buffer.truncate(len);
                self.fs_rcv_complete = true;
                self.fs_rcv_locked = false;
                if self.fs_rcv_timeout >= 0 && self.state == ConsoleState::FsIn {
                    trace!("{{{:02}}} fullscreen input complete, sending to host", self.conn_no);
                    self.fs_rcv_timeout = -1;
                    self.fs_remaining_grace = if self.fs_locked_to_fs { self.fs_grace_period } else { -1 };
                    self.fs_rcv_locked = true;
                    actions.push(SinkAction::FullScreenInput(self.fs_rcv_buffer.clone()));
                }
            }
            return Ok(());
        }

        // AID + cursor [+ SBA + field address + text] + IAC EOR
        if data.len() < 3 {
            return Ok(());
        }
        let aid = AidKey::from_u8(data[0]);
        self.cursor.decode(data[1], data[2]);
        // input field content follows an SBA to the field start
        let text: &[u8] = if data.len() > 8 && data[3] == ORDER_SBA { &data[6..data.len() - 2] } else { &[] };
        self.saved_prompt = text.to_vec();
        trace!("{{{:02}}} terminal input: {aid:?} at {} : {}", self.conn_no, self.cursor, ebcdic_to_ascii_string(text));

        let pf_action = aid
            .and_then(AidKey::pf_number)
            .and_then(|pf| self.pf_keys.action(u32::from(pf)));
        let state = self.state;

        match (pf_action, aid) {
            (Some(PfAction::HostCommand(command)), _)
                if matches!(state, ConsoleState::Running | ConsoleState::VmRead) =>
            {
                let ebcdic = ascii_to_ebcdic_vec(&command);
                let echoed = self.lines.append(&ebcdic, LineTag::UserInput);
                actions.push(SinkAction::UserInput(ebcdic));
                self.history_idx = None;
                self.state = ConsoleState::Running;
                self.leave_more_state(echoed)?;
                self.redraw_screen()?;
            }
            (_, Some(AidKey::Enter)) => {
                let mut echoed = 0;
                let mut full_redraw = false;
                self.lines.page_to_youngest();
                if state == ConsoleState::PwRead {
                    echoed = self.lines.append(&[], LineTag::UserInput);
                    actions.push(SinkAction::UserInput(text.to_vec()));
                    full_redraw = true;
                } else if state != ConsoleState::More {
                    echoed = self.lines.append(text, LineTag::UserInput);
                    if !text.is_empty() {
                        self.add_to_history(text);
                    }
                    actions.push(SinkAction::UserInput(text.to_vec()));
                    full_redraw = true;
                }
                self.saved_prompt.clear();
                self.history_idx = None;
                self.state = ConsoleState::Running;
                self.leave_more_state(echoed)?;
                if full_redraw {
                    self.redraw_screen()?;
                } else {
                    self.redraw_input_zone_alone(true)?;
                }
            }
            (Some(PfAction::Local(LocalCommand::Top)), _) => {
                self.lines.page_to_oldest();
                self.redraw_output_zone_alone()?;
            }
            (Some(PfAction::Local(LocalCommand::PageUp)), _) => {
                self.lines.page_towards_oldest();
                self.redraw_output_zone_alone()?;
            }
            (Some(PfAction::Local(LocalCommand::PageDown)), _) => {
                self.lines.page_towards_youngest();
                self.redraw_output_zone_alone()?;
            }
            (Some(PfAction::Local(LocalCommand::Bottom)), _) => {
                self.lines.page_to_youngest();
                self.redraw_output_zone_alone()?;
            }
            (Some(PfAction::Local(LocalCommand::CmdClear)), _) => {
                self.history_idx = None;
                self.saved_prompt.clear();
                self.redraw_input_zone_alone(false)?;
            }
            (Some(PfAction::Local(LocalCommand::CmdNext)), _) if !self.history.is_empty() => {
                self.history_idx = match self.history_idx {
                    None => Some(0),
                    Some(idx) if idx + 1 < self.history.len() => Some(idx + 1),
                    Some(_) => None,
                };
                self.saved_prompt.clear();
                self.redraw_input_zone_alone(false)?;
            }
            (Some(PfAction::Local(LocalCommand::CmdPrev)), _) if !self.history.is_empty() => {
                self.history_idx = match self.history_idx {
                    None => Some(self.history.len() - 1),
                    Some(idx) => idx.checked_sub(1),
                };
                self.saved_prompt.clear();
                self.redraw_input_zone_alone(false)?;
            }
            (_, Some(AidKey::PA1)) if self.interrupts_allowed() => {
                self.interrupt(SinkAction::InterruptCp, actions)?;
            }
            (_, Some(AidKey::PA2)) if state == ConsoleState::More && self.interrupts_allowed() => {
                self.interrupt(SinkAction::InterruptHt, actions)?;
            }
            (_, Some(AidKey::PA3)) if state == ConsoleState::More && self.interrupts_allowed() => {
                self.interrupt(SinkAction::InterruptHx, actions)?;
            }
            (_, Some(AidKey::PA3)) if self.interrupts_allowed() => {
                self.interrupt(SinkAction::Pf03, actions)?;
            }
            _ => {
                // Clear and the like
                debug!("{{{:02}}} user input {aid:?} => redraw", self.conn_no);
                self.redraw_screen()?;
            }
        }
        Ok(())
    }

    fn on_session_tick(&mut self) -> bool {
        if self.ticks_for_end_session > 1 {
            self.ticks_for_end_session -= 1;
        } else if self.ticks_for_end_session == 1 {
            self.ticks_for_end_session = 0;
            self.remaining_lines_to_more = self.geometry.out_zone_rows as i32;
            self.lines_since_last_user_action = 0;
            self.state = ConsoleState::Running;
            return true;
        }
        false
    }

    fn on_timer_tick(&mut self, actions: &mut Vec<SinkAction>) {
        if self.fs_remaining_grace > 0 {
            self.fs_remaining_grace -= 1;
            if self.fs_remaining_grace == 0 {
                debug!("{{{:02}}} grace period ended, showing backlog", self.conn_no);
                if let Err(e) = self.consume_fs_backlog() {
                    debug!("{{{:02}}} showing backlog failed: {e}", self.conn_no);
                }
                self.fs_remaining_grace = -1;
                self.fs_locked_to_fs = false;
            }
        }
        if self.fs_rcv_timeout < 0 || self.fs_rcv_timeout == FS_NO_TIMEOUT {
            return;
        }
        self.fs_rcv_timeout -= 1;
        if self.fs_rcv_timeout > 0 {
            return;
        }
        debug!("{{{:02}}} fullscreen read timed out, grace period started", self.conn_no);
        actions.push(SinkAction::FullScreenTimedOut);
        self.fs_remaining_grace = self.fs_grace_period;
        self.fs_rcv_timeout = -1;
    }
}

/// Line-mode console on a 3270 terminal, shared by the threads of one
/// connection
pub struct Vm3270Console {
    conn_no: u32,
    geometry: ConsoleGeometry,
    sink: Weak<dyn ConsoleInputSink>,
    core: Mutex<ConsoleCore>,
    changed: Condvar,
    closed: AtomicBool,
}

impl Vm3270Console {
    /// Create the console. Nothing is written to the terminal before
    /// [`Vm3270Console::start`].
    pub fn new(
        conn_no: u32,
        geometry: ConsoleGeometry,
        send_delay_ms: u64,
        writer: SharedWriter,
        sink: Weak<dyn ConsoleInputSink>,
    ) -> Self {
        info!("{{{conn_no:02}}} new terminal connected");
        info!("{{{conn_no:02}}}   -> rows = {}, cols = {}", geometry.rows, geometry.cols);
        info!(
            "{{{conn_no:02}}}   -> input field from {}/{} to {}/{}",
            geometry.if_start_row, geometry.if_start_col, geometry.if_end_row, geometry.if_end_col
        );
        info!("{{{conn_no:02}}}   -> outZoneRows = {}", geometry.out_zone_rows);

        let mut lines = LineBuffer::new(MAX_OUTPUT_HISTORY, geometry.cols, geometry.out_zone_rows);
        lines.append(&ascii_to_ebcdic_vec(GREETING), LineTag::FullScreenBacklog);

        let core = ConsoleCore {
            conn_no,
            geometry,
            send_delay: Duration::from_millis(send_delay_ms),
            writer,
            out: DataOutStream3270::new(geometry.cols),
            cursor: BufferAddress::new(geometry.rows, geometry.cols),
            state: ConsoleState::Initial,
            flow_mode: false,
            remaining_lines_to_more: geometry.out_zone_rows as i32,
            lines_since_last_user_action: 0,
            last_full_screen_overwritten: true,
            fs_backlog: VecDeque::new(),
            consuming_fs_backlog: false,
            drain_host_output: false,
            ticks_for_end_session: 0,
            fs_rcv_buffer: Vec::with_capacity(8192),
            fs_rcv_complete: false,
            fs_rcv_locked: true,
            fs_rcv_timeout: -1,
            fs_grace_period: -1,
            fs_remaining_grace: -1,
            fs_lock_timeout: 0,
            fs_locked_to_fs: false,
            lines,
            history: VecDeque::new(),
            history_idx: None,
            saved_prompt: Vec::new(),
            pf_keys: PfKeys::default(),
            attrs: DisplayAttrs::default(),
        };

        Self {
            conn_no,
            geometry,
            sink,
            core: Mutex::new(core),
            changed: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Paint the initial screen and start the timer thread.
    pub fn start(self: &Arc<Self>) -> MecaffResult<()> {
        info!("{{{:02}}} initializing 3270 screen", self.conn_no);
        self.lock_core().redraw_screen()?;
        let console = Arc::downgrade(self);
        thread::Builder::new()
            .name(format!("console-ticker-{:02}", self.conn_no))
            .spawn(move || run_ticker(console))?;
        Ok(())
    }

    /// Stop the timer thread and release all waiting threads.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("{{{:02}}} console closing", self.conn_no);
        }
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn geometry(&self) -> ConsoleGeometry {
        self.geometry
    }

    pub fn state(&self) -> ConsoleState {
        self.lock_core().state
    }

    /// Number of lines in the output history
    pub fn output_line_count(&self) -> usize {
        self.lock_core().lines.len()
    }

    /// Copy of the `count` youngest output lines with their tags, oldest first
    pub fn last_output_lines(&self, count: usize) -> Vec<(Vec<u8>, LineTag)> {
        self.lock_core()
            .lines
            .youngest_lines(count)
            .map(|(text, tag)| (text.to_vec(), tag))
            .collect()
    }

    fn lock_core(&self) -> MutexGuard<'_, ConsoleCore> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait_changed<'a>(&self, core: MutexGuard<'a, ConsoleCore>, timeout: Duration) -> MutexGuard<'a, ConsoleCore> {
        match self.changed.wait_timeout(core, timeout) {
            Ok((core, _)) => core,
            Err(e) => e.into_inner().0,
        }
    }

    fn dispatch(&self, actions: Vec<SinkAction>) -> MecaffResult<()> {
        if actions.is_empty() {
            return Ok(());
        }
        let Some(sink) = self.sink.upgrade() else {
            warn!("{{{:02}}} session gone, dropping {} console action(s)", self.conn_no, actions.len());
            return Ok(());
        };
        for action in actions {
            let is_interrupt = action.is_interrupt();
            let drain = sink.console_action(action)?;
            if is_interrupt {
                self.lock_core().drain_host_output = drain;
                self.changed.notify_all();
            }
        }
        Ok(())
    }

    /// Enter the More state when the output zone is full and block the
    /// caller until the user has seen the screen.
    fn check_for_enter_more_state<'a>(
        &'a self,
        mut core: MutexGuard<'a, ConsoleCore>,
        added_rows: usize,
    ) -> MecaffResult<MutexGuard<'a, ConsoleCore>> {
        if core.flow_mode || core.state == ConsoleState::Initial {
            return Ok(core);
        }
        let old_state = core.state;
        core.remaining_lines_to_more -= added_rows as i32;
        if added_rows > 0 {
            core.lines_since_last_user_action += 1;
        }
        let mut state_changed = false;
        if core.remaining_lines_to_more < 2 {
            trace!("{{{:02}}} entering More... state", self.conn_no);
            core.state = ConsoleState::More;
            state_changed = true;
            core.redraw_input_zone_alone(true)?;
        }
        while core.remaining_lines_to_more < 2 && !self.is_closed() {
            core = self.wait_changed(core, MORE_WAIT);
        }
        if state_changed {
            trace!("{{{:02}}} leaving More... state", self.conn_no);
            core.state = old_state;
            core.redraw_input_zone_alone(true)?;
        }
        Ok(core)
    }

    /// Prompt state announced by the host.
    pub fn set_input_state(&self, input_state: InputState) -> MecaffResult<()> {
        if self.lock_core().state == ConsoleState::Initial {
            thread::sleep(Duration::from_millis(50));
            self.append_host_line(&[])?;
        }
        let mut core = self.lock_core();
        let new_state = match input_state {
            InputState::VmRead => ConsoleState::VmRead,
            InputState::CpRead => ConsoleState::CpRead,
            InputState::PwRead => ConsoleState::PwRead,
            InputState::Running if core.state == ConsoleState::More => ConsoleState::More,
            InputState::Running => ConsoleState::Running,
        };
        debug!("{{{:02}}} setInputState: {:?} ==> {new_state:?}", self.conn_no, core.state);
        if new_state == core.state {
            return Ok(());
        }
        if matches!(core.state, ConsoleState::FsIn | ConsoleState::FsOut) {
            debug!("{{{:02}}}   ==> ignored while in fullscreen mode", self.conn_no);
            return Ok(());
        }
        if !matches!(new_state, ConsoleState::Running | ConsoleState::More) {
            core.drain_host_output = false;
            core.remaining_lines_to_more = self.geometry.out_zone_rows as i32;
            self.changed.notify_all();
        }
        core.state = new_state;
        core.redraw_input_zone_alone(true)
    }

    /// Reset the console after the VM session ended.
    ///
    /// With `wait` the console shows More... until the user presses Enter or
    /// about 3 seconds passed.
    pub fn end_current_session(&self, wait: bool) -> MecaffResult<()> {
        info!("{{{:02}}} endCurrentSession(wait: {wait})", self.conn_no);
        let mut core = self.lock_core();
        if wait {
            core.remaining_lines_to_more = 0;
            core.ticks_for_end_session = END_SESSION_TICKS;
            core = self.check_for_enter_more_state(core, 0)?;
        }
        // keep the last line, the VM online banner
        core.lines.clear_uplines(1);
        core.history.clear();
        core.history_idx = None;
        core.saved_prompt.clear();
        core.pf_keys.reset();
        core.attrs = DisplayAttrs::default();
        core.redraw_screen()
    }

    /// Add an output line from the host (EBCDIC).
    ///
    /// Blocks while the console is in the More state.
    pub fn append_host_line(&self, line: &[u8]) -> MecaffResult<()> {
        let mut core = self.lock_core();
        if matches!(core.state, ConsoleState::FsOut | ConsoleState::FsIn)
            || !core.fs_backlog.is_empty()
            || core.fs_locked_to_fs
        {
            core.fs_backlog.push_back(line.to_vec());
            return Ok(());
        }
        if core.drain_host_output {
            return Ok(());
        }
        let rows = core.lines.append(line, LineTag::HostOutput);
        core.redraw_output_zone_alone()?;
        drop(self.check_for_enter_more_state(core, rows)?);
        Ok(())
    }

    /// Handle a packet received from the terminal, still telnet-escaped.
    pub fn process_bytes_from_terminal(&self, packet: &[u8]) -> MecaffResult<()> {
        let data = unescape_iac(packet);
        let mut actions = Vec::new();
        self.lock_core().handle_terminal_input(&data, &mut actions)?;
        self.changed.notify_all();
        self.dispatch(actions)?;
        thread::yield_now();
        Ok(())
    }

    /// Start a fullscreen read for the host.
    ///
    /// `timeout` is in 1/10 seconds: [`FS_READ_CANCEL`] ends the fullscreen
    /// mode, a negative value only polls for available input, 0 returns
    /// input only if already present, [`FS_NO_TIMEOUT`] waits forever.
    /// The returned actions are to be carried out by the caller.
    pub fn read_full_screen(&self, timeout: i32, grace_period: i32) -> MecaffResult<Vec<SinkAction>> {
        let mut core = self.lock_core();
        if core.last_full_screen_overwritten {
            debug!("{{{:02}}} readFullScreen(): aborting, screen was overwritten", self.conn_no);
            return Ok(Vec::new());
        }
        trace!(
            "{{{:02}}} readFullScreen(timeout: {timeout}, gracePeriod: {grace_period}), complete: {}, locked: {}",
            self.conn_no,
            core.fs_rcv_complete,
            core.fs_rcv_locked
        );
        let available_now = core.fs_rcv_complete && !core.fs_rcv_locked;
        if core.fs_rcv_locked {
            // last input was sent, prepare for the next one
            core.fs_rcv_buffer.clear();
            core.fs_rcv_complete = false;
            core.fs_rcv_locked = false;
        }

        if timeout == FS_READ_CANCEL {
            debug!("{{{:02}}} readFullScreen(): closing fullscreen mode", self.conn_no);
            core.fs_rcv_timeout = -1;
            core.fs_remaining_grace = -1;
            core.consume_fs_backlog()?;
            core.redraw_screen()?;
            return Ok(vec![SinkAction::FullScreenAvailability(false)]);
        }
        if timeout < 0 {
            core.fs_rcv_timeout = -1;
            core.fs_grace_period = grace_period;
            core.fs_remaining_grace = grace_period;
            return Ok(vec![SinkAction::FullScreenAvailability(available_now)]);
        }
        if available_now {
            debug!("{{{:02}}} readFullScreen(): input available, sending buffer", self.conn_no);
            core.fs_rcv_timeout = -1;
            core.fs_remaining_grace = if core.fs_locked_to_fs { core.fs_grace_period } else { -1 };
            core.fs_rcv_locked = true;
            return Ok(vec![SinkAction::FullScreenInput(core.fs_rcv_buffer.clone())]);
        }
        if timeout == 0 {
            core.fs_rcv_timeout = -1;
            core.fs_remaining_grace = core.fs_grace_period;
            return Ok(vec![SinkAction::FullScreenAvailability(false)]);
        }
        core.fs_rcv_timeout = timeout;
        core.fs_grace_period = grace_period;
        core.fs_remaining_grace = -1;
        core.fs_locked_to_fs = core.fs_lock_timeout > 0 && core.fs_lock_timeout == timeout;
        core.state = ConsoleState::FsIn;
        debug!("{{{:02}}} readFullScreen(): entered FsIn", self.conn_no);
        Ok(Vec::new())
    }

    /// All data of the last fullscreen input reached the host.
    pub fn transfer_completed(&self) -> MecaffResult<()> {
        let mut core = self.lock_core();
        trace!("{{{:02}}} transfer of fullscreen input completed", self.conn_no);
        core.fs_rcv_buffer.clear();
        core.fs_rcv_complete = false;
        if !core.fs_locked_to_fs {
            core.consume_fs_backlog()?;
        }
        Ok(())
    }

    fn on_timer_tick(&self) {
        let mut actions = Vec::new();
        self.lock_core().on_timer_tick(&mut actions);
        if let Err(e) = self.dispatch(actions) {
            debug!("{{{:02}}} sending timeout failed: {e}", self.conn_no);
        }
    }

    fn on_session_tick(&self) {
        if self.lock_core().on_session_tick() {
            self.changed.notify_all();
        }
    }
}

fn run_ticker(console: Weak<Vm3270Console>) {
    let mut ticks = 0;
    loop {
        let Some(console) = console.upgrade() else {
            break;
        };
        if console.is_closed() {
            break;
        }
        console.on_timer_tick();
        ticks += 1;
        if ticks >= TICKS_PER_SESSION_TICK {
            console.on_session_tick();
            ticks = 0;
        }
        drop(console);
        thread::sleep(TICK);
    }
}

impl ConsoleControl for Vm3270Console {
    fn attr(&self, elem: ConsoleElement) -> Attr {
        self.lock_core().attrs.get(elem)
    }

    fn set_attr(&self, elem: ConsoleElement, attr: Attr) {
        self.lock_core().attrs.set(elem, attr);
    }

    fn pf_command(&self, pf: u32) -> Option<String> {
        self.lock_core().pf_keys.get(pf).map(str::to_string)
    }

    fn set_pf_command(&self, pf: u32, command: Option<&str>) {
        self.lock_core().pf_keys.set(pf, command);
    }

    fn redraw_screen(&self) -> MecaffResult<()> {
        self.lock_core().redraw_screen()
    }

    fn acquire_full_screen(&self, requires_previous_full_screen: bool) -> MecaffResult<bool> {
        let mut core = self.lock_core();
        core.flow_mode = false;
        if matches!(core.state, ConsoleState::FsOut | ConsoleState::FsIn) {
            debug!("{{{:02}}} acquireFullScreen(): already in {:?}", self.conn_no, core.state);
            return Ok(true);
        }
        if requires_previous_full_screen && core.last_full_screen_overwritten {
            debug!("{{{:02}}} acquireFullScreen(): refused, screen was overwritten", self.conn_no);
            return Ok(false);
        }
        if requires_previous_full_screen && core.lines_since_last_user_action > 0 {
            debug!("{{{:02}}} acquireFullScreen(): refused, output since last user action", self.conn_no);
            return Ok(false);
        }
        if core.lines_since_last_user_action == 0 {
            core.state = ConsoleState::FsOut;
            return Ok(true);
        }

        debug!("{{{:02}}} acquireFullScreen(): screen re-used => More cycle(s)", self.conn_no);
        core.state = ConsoleState::More;
        core.redraw_screen()?;
        let mut cycles = ACQUIRE_WAIT_CYCLES;
        while core.state == ConsoleState::More || cycles > 0 {
            if self.is_closed() {
                return Ok(false);
            }
            core = self.wait_changed(core, ACQUIRE_WAIT);
            if core.state == ConsoleState::More {
                cycles = ACQUIRE_WAIT_CYCLES;
            } else {
                cycles -= 1;
            }
        }
        core.state = ConsoleState::FsOut;
        Ok(true)
    }

    fn write_full_screen(&self, stream3270: &[u8]) -> MecaffResult<()> {
        let mut core = self.lock_core();
        if !matches!(core.state, ConsoleState::FsOut | ConsoleState::FsIn) {
            debug!("{{{:02}}} writeFullScreen(): not in fullscreen mode, ignored", self.conn_no);
            return Ok(());
        }
        trace!("{{{:02}}} writeFullScreen():\n{}", self.conn_no, hex_dump(stream3270));
        let mut data = stream3270.to_vec();
        if data.len() > 1 && matches!(data[0], CMD_WRITE | CMD_ERASE_WRITE | CMD_ERASE_WRITE_ALTERNATE) {
            data[1] = encode_6bit(data[1]);
        }
        let mut packet = escape_iac(&data);
        packet.extend_from_slice(&TN_EOR);
        write_shared(&core.writer, &packet)?;
        core.last_full_screen_overwritten = false;
        core.lines_since_last_user_action = 0;
        Ok(())
    }

    fn may_read_full_screen(&self) -> bool {
        !self.lock_core().last_full_screen_overwritten
    }

    fn set_fs_lock_timeout(&self, value: i32) -> MecaffResult<()> {
        let mut core = self.lock_core();
        core.fs_lock_timeout = value;
        if value < 1 {
            core.fs_locked_to_fs = false;
            core.consume_fs_backlog()?;
        }
        Ok(())
    }

    fn set_flow_mode(&self, flow_mode: bool) -> MecaffResult<()> {
        let mut core = self.lock_core();
        core.flow_mode = flow_mode;
        core.redraw_output_zone_alone()?;
        drop(self.check_for_enter_more_state(core, 0)?);
        Ok(())
    }
}

impl Drop for Vm3270Console {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
