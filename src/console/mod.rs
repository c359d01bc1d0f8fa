//! The MECAFF console presented on the 3270 terminal
//!
//! The console owns the terminal screen: a scrollable output zone with the
//! host output and the echoed user input, and an input zone with the state
//! prompt and the command input field. Fullscreen programs on the host can
//! take the screen over through the encoded transport.
//!
//! - [`line_buffer`] - scrollback of output lines
//! - [`pf_keys`] - PF key table and the local `!` commands
//! - [`vm3270`] - the console state machine

pub mod line_buffer;
pub mod pf_keys;
pub mod vm3270;

use crate::error::MecaffResult;
use crate::lib3270::codes::*;

pub use line_buffer::{LineBuffer, LineTag};
pub use pf_keys::{LocalCommand, PfAction, PfKeys};
pub use vm3270::{ConsoleGeometry, ConsoleState, Vm3270Console};

/// Fullscreen read timeout meaning "wait forever"
pub const FS_NO_TIMEOUT: i32 = i32::MAX;

/// Fullscreen read timeout closing the fullscreen mode
pub const FS_READ_CANCEL: i32 = -42424242;

/// Default grace period after a fullscreen read, in 1/10 seconds
pub const FS_DEFAULT_GRACE: i32 = 30;

/// Prompt state announced by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    VmRead,
    CpRead,
    PwRead,
    Running,
}

/// Colors selectable for the console elements, in transport index order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Default,
    Blue,
    Red,
    Pink,
    Green,
    Turquoise,
    Yellow,
    White,
}

impl Color {
    pub const ALL: [Color; 8] = [
        Color::Default,
        Color::Blue,
        Color::Red,
        Color::Pink,
        Color::Green,
        Color::Turquoise,
        Color::Yellow,
        Color::White,
    ];

    pub fn index(&self) -> u32 {
        Self::ALL.iter().position(|c| c == self).unwrap_or(0) as u32
    }

    pub fn from_index(idx: u32) -> Option<Self> {
        Self::ALL.get(idx as usize).copied()
    }

    /// Color code for SA/SFE orders
    pub fn code3270(&self) -> u8 {
        match self {
            Self::Default => COLOR_DEFAULT,
            Self::Blue => COLOR_BLUE,
            Self::Red => COLOR_RED,
            Self::Pink => COLOR_PINK,
            Self::Green => COLOR_GREEN,
            Self::Turquoise => COLOR_TURQUOISE,
            Self::Yellow => COLOR_YELLOW,
            Self::White => COLOR_WHITE,
        }
    }
}

/// Screen elements with a configurable display attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleElement {
    OutNormal,
    OutEchoInput,
    OutFsBg,
    ConsoleState,
    CmdInput,
}

impl ConsoleElement {
    pub const ALL: [ConsoleElement; 5] = [
        ConsoleElement::OutNormal,
        ConsoleElement::OutEchoInput,
        ConsoleElement::OutFsBg,
        ConsoleElement::ConsoleState,
        ConsoleElement::CmdInput,
    ];

    pub fn index(&self) -> u32 {
        Self::ALL.iter().position(|e| e == self).unwrap_or(0) as u32
    }

    pub fn from_index(idx: u32) -> Option<Self> {
        Self::ALL.get(idx as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub color: Color,
    pub highlight: bool,
}

impl Attr {
    pub const fn new(color: Color, highlight: bool) -> Self {
        Self { color, highlight }
    }
}

/// Display attributes of all console elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayAttrs {
    attrs: [Attr; 5],
}

impl Default for DisplayAttrs {
    fn default() -> Self {
        Self {
            attrs: [
                Attr::new(Color::Blue, false),
                Attr::new(Color::Turquoise, true),
                Attr::new(Color::Pink, false),
                Attr::new(Color::Yellow, false),
                Attr::new(Color::Turquoise, false),
            ],
        }
    }
}

impl DisplayAttrs {
    pub fn get(&self, elem: ConsoleElement) -> Attr {
        self.attrs[elem.index() as usize]
    }

    pub fn set(&mut self, elem: ConsoleElement, attr: Attr) {
        self.attrs[elem.index() as usize] = attr;
    }
}

/// Requests of the console towards the session, carried out by the session
/// after the console released its lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkAction {
    /// Input line typed by the user (EBCDIC)
    UserInput(Vec<u8>),
    InterruptCp,
    InterruptHt,
    InterruptHx,
    Pf03,
    /// Complete 3270 input stream of a fullscreen read
    FullScreenInput(Vec<u8>),
    FullScreenAvailability(bool),
    FullScreenTimedOut,
}

impl SinkAction {
    pub fn is_interrupt(&self) -> bool {
        matches!(
            self,
            SinkAction::InterruptCp | SinkAction::InterruptHt | SinkAction::InterruptHx | SinkAction::Pf03
        )
    }
}

/// Session side receiving the console's requests
pub trait ConsoleInputSink: Send + Sync {
    /// Carry out `action`. For interrupts the result tells whether host
    /// output is to be discarded until the next read prompt.
    fn console_action(&self, action: SinkAction) -> MecaffResult<bool>;
}

/// Console operations used by the encoded transport
pub trait ConsoleControl {
    fn attr(&self, elem: ConsoleElement) -> Attr;
    fn set_attr(&self, elem: ConsoleElement, attr: Attr);
    fn pf_command(&self, pf: u32) -> Option<String>;
    fn set_pf_command(&self, pf: u32, command: Option<&str>);
    fn redraw_screen(&self) -> MecaffResult<()>;
    fn acquire_full_screen(&self, requires_previous_full_screen: bool) -> MecaffResult<bool>;
    fn write_full_screen(&self, stream3270: &[u8]) -> MecaffResult<()>;
    fn may_read_full_screen(&self) -> bool;
    fn set_fs_lock_timeout(&self, value: i32) -> MecaffResult<()>;
    fn set_flow_mode(&self, flow_mode: bool) -> MecaffResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_indices() {
        assert_eq!(Color::Default.index(), 0);
        assert_eq!(Color::White.index(), 7);
        assert_eq!(Color::from_index(5), Some(Color::Turquoise));
        assert_eq!(Color::from_index(8), None);
        assert_eq!(Color::Yellow.code3270(), 0xF6);
    }

    #[test]
    fn test_default_attrs() {
        let attrs = DisplayAttrs::default();
        assert_eq!(attrs.get(ConsoleElement::OutEchoInput), Attr::new(Color::Turquoise, true));
        assert_eq!(attrs.get(ConsoleElement::ConsoleState).color, Color::Yellow);
        assert_eq!(ConsoleElement::from_index(4), Some(ConsoleElement::CmdInput));
        assert_eq!(ConsoleElement::from_index(5), None);
    }
}
