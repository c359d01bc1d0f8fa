//! PF key assignments of the console
//!
//! A PF key is either unassigned, bound to a text sent to the host like a
//! typed command line, or bound to one of the local `!` commands handled by
//! the console itself.

use std::fmt;

pub const PF_KEY_COUNT: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCommand {
    Top,
    Bottom,
    PageUp,
    PageDown,
    CmdClear,
    CmdPrev,
    CmdNext,
}

impl LocalCommand {
    pub const ALL: [LocalCommand; 7] = [
        LocalCommand::Top,
        LocalCommand::Bottom,
        LocalCommand::PageUp,
        LocalCommand::PageDown,
        LocalCommand::CmdClear,
        LocalCommand::CmdPrev,
        LocalCommand::CmdNext,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Top => "!TOP",
            Self::Bottom => "!BOTTOM",
            Self::PageUp => "!PAGEUP",
            Self::PageDown => "!PAGEDOWN",
            Self::CmdClear => "!CMDCLR",
            Self::CmdPrev => "!CMDPREV",
            Self::CmdNext => "!CMDNEXT",
        }
    }

    /// Case-insensitive lookup of a `!` command name.
    pub fn parse(text: &str) -> Option<Self> {
        let upper = text.to_ascii_uppercase();
        Self::ALL.into_iter().find(|cmd| cmd.name() == upper)
    }
}

impl fmt::Display for LocalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What pressing a PF key does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PfAction {
    Local(LocalCommand),
    HostCommand(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfKeys {
    commands: [Option<String>; PF_KEY_COUNT],
}

impl Default for PfKeys {
    fn default() -> Self {
        let mut keys = Self {
            commands: Default::default(),
        };
        keys.reset();
        keys
    }
}

impl PfKeys {
    /// Restore the initial assignments.
    pub fn reset(&mut self) {
        self.commands = Default::default();
        self.set(1, Some("FSHELP"));
        self.set(3, Some(LocalCommand::CmdClear.name()));
        self.set(6, Some(LocalCommand::Top.name()));
        self.set(7, Some(LocalCommand::PageUp.name()));
        self.set(8, Some(LocalCommand::PageDown.name()));
        self.set(9, Some(LocalCommand::Bottom.name()));
        self.set(11, Some(LocalCommand::CmdNext.name()));
        self.set(12, Some(LocalCommand::CmdPrev.name()));
    }

    pub fn get(&self, pf: u32) -> Option<&str> {
        let idx = (pf as usize).checked_sub(1)?;
        self.commands.get(idx)?.as_deref()
    }

    /// Assign a command to PF key `pf` (1..=24).
    ///
    /// An empty command unassigns the key, as does an unknown `!` command.
    pub fn set(&mut self, pf: u32, command: Option<&str>) {
        let Some(slot) = (pf as usize).checked_sub(1).and_then(|idx| self.commands.get_mut(idx)) else {
            return;
        };
        *slot = match command {
            None | Some("") => None,
            Some(cmd) if cmd.starts_with('!') => LocalCommand::parse(cmd).map(|local| local.name().to_string()),
            Some(cmd) => Some(cmd.to_string()),
        };
    }

    pub fn action(&self, pf: u32) -> Option<PfAction> {
        let command = self.get(pf)?;
        Some(match LocalCommand::parse(command) {
            Some(local) if command.starts_with('!') => PfAction::Local(local),
            _ => PfAction::HostCommand(command.to_string()),
        })
    }

    /// Bit mask with bit `n - 1` set for each assigned PF key `n`.
    pub fn assigned_mask(&self) -> u32 {
        self.commands
            .iter()
            .enumerate()
            .filter(|(_, cmd)| cmd.is_some())
            .fold(0, |mask, (idx, _)| mask | (1 << idx))
    }
}
