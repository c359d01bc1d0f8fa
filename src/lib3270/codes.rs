/// 3270 data stream constants
///
/// Command codes, order codes, AID keys, field attribute bits and
/// extended attribute values as used on a TN3270 connection.
///
/// # References
/// - RFC 1576: TN3270 Current Practices
/// - IBM 3270 Data Stream Programmer's Reference (GA23-0059)
/// 3270 Command Codes (remote, as sent over telnet)
pub const CMD_WRITE: u8 = 0xF1;              // Write
pub const CMD_ERASE_WRITE: u8 = 0xF5;        // Erase/Write
pub const CMD_ERASE_WRITE_ALTERNATE: u8 = 0x7E; // Erase/Write Alternate
pub const CMD_READ_BUFFER: u8 = 0xF2;        // Read Buffer
pub const CMD_READ_MODIFIED: u8 = 0xF6;      // Read Modified
pub const CMD_READ_MODIFIED_ALL: u8 = 0x6E;  // Read Modified All
pub const CMD_ERASE_ALL_UNPROTECTED: u8 = 0x6F; // Erase All Unprotected
pub const CMD_WRITE_STRUCTURED_FIELD: u8 = 0xF3; // Write Structured Field

/// Local (channel) variants of the same commands, tolerated on input
pub const CMD_LOCAL_WRITE: u8 = 0x01;
pub const CMD_LOCAL_ERASE_WRITE: u8 = 0x05;
pub const CMD_LOCAL_ERASE_WRITE_ALTERNATE: u8 = 0x0D;
pub const CMD_LOCAL_ERASE_ALL_UNPROTECTED: u8 = 0x0F;
pub const CMD_LOCAL_WRITE_STRUCTURED_FIELD: u8 = 0x11;

/// 3270 Order Codes
pub const ORDER_SF: u8 = 0x1D;    // Start Field
pub const ORDER_SFE: u8 = 0x29;   // Start Field Extended
pub const ORDER_SBA: u8 = 0x11;   // Set Buffer Address
pub const ORDER_SA: u8 = 0x28;    // Set Attribute
pub const ORDER_MF: u8 = 0x2C;    // Modify Field
pub const ORDER_IC: u8 = 0x13;    // Insert Cursor
pub const ORDER_PT: u8 = 0x05;    // Program Tab
pub const ORDER_RA: u8 = 0x3C;    // Repeat to Address
pub const ORDER_EUA: u8 = 0x12;   // Erase Unprotected to Address
pub const ORDER_GE: u8 = 0x08;    // Graphic Escape

/// Write Control Character (WCC) Bits, before 6-bit encoding
pub const WCC_RESET: u8 = 0x40;           // Reset partition
pub const WCC_ALARM: u8 = 0x04;           // Sound alarm
pub const WCC_RESTORE: u8 = 0x02;         // Restore keyboard

/// AID (Attention Identifier) Keys
pub const AID_NO_AID: u8 = 0x60;
pub const AID_STRUCTURED_FIELD: u8 = 0x88;

pub const AID_PF1: u8 = 0xF1;
pub const AID_PF2: u8 = 0xF2;
pub const AID_PF3: u8 = 0xF3;
pub const AID_PF4: u8 = 0xF4;
pub const AID_PF5: u8 = 0xF5;
pub const AID_PF6: u8 = 0xF6;
pub const AID_PF7: u8 = 0xF7;
pub const AID_PF8: u8 = 0xF8;
pub const AID_PF9: u8 = 0xF9;
pub const AID_PF10: u8 = 0x7A;
pub const AID_PF11: u8 = 0x7B;
pub const AID_PF12: u8 = 0x7C;
pub const AID_PF13: u8 = 0xC1;
pub const AID_PF14: u8 = 0xC2;
pub const AID_PF15: u8 = 0xC3;
pub const AID_PF16: u8 = 0xC4;
pub const AID_PF17: u8 = 0xC5;
pub const AID_PF18: u8 = 0xC6;
pub const AID_PF19: u8 = 0xC7;
pub const AID_PF20: u8 = 0xC8;
pub const AID_PF21: u8 = 0xC9;
pub const AID_PF22: u8 = 0x4A;
pub const AID_PF23: u8 = 0x4B;
pub const AID_PF24: u8 = 0x4C;

pub const AID_PA1: u8 = 0x6C;
pub const AID_PA2: u8 = 0x6E;
pub const AID_PA3: u8 = 0x6B;

pub const AID_CLEAR: u8 = 0x6D;
pub const AID_ENTER: u8 = 0x7D;

/// Field Attribute Byte Bits (SF order), before 6-bit encoding
pub const ATTR_PROTECTED: u8 = 0x20;
pub const ATTR_NUMERIC: u8 = 0x10;
pub const ATTR_DISPLAY: u8 = 0x0C;        // display bits mask
pub const ATTR_MDT: u8 = 0x01;

pub const DISPLAY_DETECTABLE: u8 = 0x04;
pub const DISPLAY_INTENSIFIED: u8 = 0x08;
pub const DISPLAY_HIDDEN: u8 = 0x0C;

/// Extended attribute types (SFE / SA / MF)
pub const XA_3270: u8 = 0xC0;
pub const XA_HIGHLIGHTING: u8 = 0x41;
pub const XA_FOREGROUND: u8 = 0x42;

/// Color attribute values
pub const COLOR_DEFAULT: u8 = 0x00;
pub const COLOR_BLUE: u8 = 0xF1;
pub const COLOR_RED: u8 = 0xF2;
pub const COLOR_PINK: u8 = 0xF3;
pub const COLOR_GREEN: u8 = 0xF4;
pub const COLOR_TURQUOISE: u8 = 0xF5;
pub const COLOR_YELLOW: u8 = 0xF6;
pub const COLOR_WHITE: u8 = 0xF7;

/// Enum representation of 3270 command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    Write,
    EraseWrite,
    EraseWriteAlternate,
    ReadBuffer,
    ReadModified,
    ReadModifiedAll,
    EraseAllUnprotected,
    WriteStructuredField,
}

impl CommandCode {
    /// Map a command byte, accepting the remote and the local encoding
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            CMD_WRITE | CMD_LOCAL_WRITE => Some(Self::Write),
            CMD_ERASE_WRITE | CMD_LOCAL_ERASE_WRITE => Some(Self::EraseWrite),
            CMD_ERASE_WRITE_ALTERNATE | CMD_LOCAL_ERASE_WRITE_ALTERNATE => Some(Self::EraseWriteAlternate),
            CMD_READ_BUFFER => Some(Self::ReadBuffer),
            CMD_READ_MODIFIED => Some(Self::ReadModified),
            CMD_READ_MODIFIED_ALL => Some(Self::ReadModifiedAll),
            CMD_ERASE_ALL_UNPROTECTED | CMD_LOCAL_ERASE_ALL_UNPROTECTED => Some(Self::EraseAllUnprotected),
            CMD_WRITE_STRUCTURED_FIELD | CMD_LOCAL_WRITE_STRUCTURED_FIELD => Some(Self::WriteStructuredField),
            _ => None,
        }
    }

    /// Remote encoding of the command
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Write => CMD_WRITE,
            Self::EraseWrite => CMD_ERASE_WRITE,
            Self::EraseWriteAlternate => CMD_ERASE_WRITE_ALTERNATE,
            Self::ReadBuffer => CMD_READ_BUFFER,
            Self::ReadModified => CMD_READ_MODIFIED,
            Self::ReadModifiedAll => CMD_READ_MODIFIED_ALL,
            Self::EraseAllUnprotected => CMD_ERASE_ALL_UNPROTECTED,
            Self::WriteStructuredField => CMD_WRITE_STRUCTURED_FIELD,
        }
    }

    /// Write-type commands are followed by a WCC byte
    pub fn has_wcc(self) -> bool {
        matches!(self, Self::Write | Self::EraseWrite | Self::EraseWriteAlternate)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Write => "Write",
            Self::EraseWrite => "EraseWrite",
            Self::EraseWriteAlternate => "EraseWriteAlternate",
            Self::ReadBuffer => "ReadBuffer",
            Self::ReadModified => "ReadModified",
            Self::ReadModifiedAll => "ReadModifiedAll",
            Self::EraseAllUnprotected => "EraseAllUnprotected",
            Self::WriteStructuredField => "WriteStructuredField",
        }
    }
}

/// Enum representation of 3270 order codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCode {
    StartField = ORDER_SF as isize,
    StartFieldExtended = ORDER_SFE as isize,
    SetBufferAddress = ORDER_SBA as isize,
    SetAttribute = ORDER_SA as isize,
    ModifyField = ORDER_MF as isize,
    InsertCursor = ORDER_IC as isize,
    ProgramTab = ORDER_PT as isize,
    RepeatToAddress = ORDER_RA as isize,
    EraseUnprotectedToAddress = ORDER_EUA as isize,
    GraphicEscape = ORDER_GE as isize,
}

impl OrderCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            ORDER_SF => Some(Self::StartField),
            ORDER_SFE => Some(Self::StartFieldExtended),
            ORDER_SBA => Some(Self::SetBufferAddress),
            ORDER_SA => Some(Self::SetAttribute),
            ORDER_MF => Some(Self::ModifyField),
            ORDER_IC => Some(Self::InsertCursor),
            ORDER_PT => Some(Self::ProgramTab),
            ORDER_RA => Some(Self::RepeatToAddress),
            ORDER_EUA => Some(Self::EraseUnprotectedToAddress),
            ORDER_GE => Some(Self::GraphicEscape),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Enum representation of AID keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AidKey {
    NoAid,
    Enter,
    Clear,
    PA1,
    PA2,
    PA3,
    /// PF key 1..=24
    PF(u8),
    StructuredField,
}

const PF_AIDS: [u8; 24] = [
    AID_PF1, AID_PF2, AID_PF3, AID_PF4, AID_PF5, AID_PF6,
    AID_PF7, AID_PF8, AID_PF9, AID_PF10, AID_PF11, AID_PF12,
    AID_PF13, AID_PF14, AID_PF15, AID_PF16, AID_PF17, AID_PF18,
    AID_PF19, AID_PF20, AID_PF21, AID_PF22, AID_PF23, AID_PF24,
];

impl AidKey {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            AID_NO_AID => Some(Self::NoAid),
            AID_ENTER => Some(Self::Enter),
            AID_CLEAR => Some(Self::Clear),
            AID_PA1 => Some(Self::PA1),
            AID_PA2 => Some(Self::PA2),
            AID_PA3 => Some(Self::PA3),
            AID_STRUCTURED_FIELD => Some(Self::StructuredField),
            other => PF_AIDS
                .iter()
                .position(|&aid| aid == other)
                .map(|idx| Self::PF(idx as u8 + 1)),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::NoAid => AID_NO_AID,
            Self::Enter => AID_ENTER,
            Self::Clear => AID_CLEAR,
            Self::PA1 => AID_PA1,
            Self::PA2 => AID_PA2,
            Self::PA3 => AID_PA3,
            Self::PF(n) => PF_AIDS[(n.clamp(1, 24) - 1) as usize],
            Self::StructuredField => AID_STRUCTURED_FIELD,
        }
    }

    /// PF key number (1..=24) if this is a PF key
    pub fn pf_number(self) -> Option<u8> {
        match self {
            Self::PF(n) => Some(n),
            _ => None,
        }
    }
}
