//! Error types for the MECAFF gateway
//!
//! Only failures that end a connection (or prevent startup) are errors here.
//! Soft outcomes such as a refused fullscreen acquisition, a malformed FSIO
//! token or an unknown query code are reported through return values and
//! response codes instead.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Top-level error type for gateway operations
#[derive(Debug)]
pub enum MecaffError {
    /// Socket level errors
    Network(NetworkError),
    /// Telnet negotiation errors
    Telnet(TelnetError),
    /// 3270 data stream errors
    Protocol(ProtocolError),
    /// Configuration errors
    Config(ConfigError),
}

/// Network connection related errors
#[derive(Debug)]
pub enum NetworkError {
    /// Connection refused by remote host
    ConnectionRefused { host: String, port: u16 },
    /// Connection timeout
    Timeout { host: String, port: u16 },
    /// Listening socket could not be bound
    BindFailed { port: u16, reason: String },
    /// Connection lost during operation
    ConnectionLost { reason: String },
}

/// Telnet negotiation errors
#[derive(Debug)]
pub enum TelnetError {
    /// The peer answered a negotiation step with something else than expected
    UnexpectedResponse { step: &'static str, expected: Vec<u8>, received: Vec<u8> },
    /// The peer closed or sent too few bytes during a negotiation step
    ShortResponse { step: &'static str, received: usize },
    /// Malformed telnet sequence
    InvalidSequence { data: Vec<u8> },
    /// The terminal cannot be driven in 3270 mode
    UnsupportedTerminal { terminal_type: String },
}

/// 3270 data stream errors
#[derive(Debug)]
pub enum ProtocolError {
    /// A record ended before its operands
    IncompleteRecord { expected: usize, received: usize },
    /// Unknown 3270 command code at the start of a record
    InvalidCommandCode { code: u8 },
    /// Too many bytes arrived without a record end
    PendingOverflow { size: usize, max: usize },
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Invalid configuration parameter
    InvalidParameter { parameter: String, value: String, reason: String },
    /// Configuration file error
    FileError { path: String, error: String },
}

impl fmt::Display for MecaffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MecaffError::Network(err) => write!(f, "Network error: {err}"),
            MecaffError::Telnet(err) => write!(f, "Telnet error: {err}"),
            MecaffError::Protocol(err) => write!(f, "Protocol error: {err}"),
            MecaffError::Config(err) => write!(f, "Configuration error: {err}"),
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::ConnectionRefused { host, port } =>
                write!(f, "Connection refused to {host}:{port}"),
            NetworkError::Timeout { host, port } =>
                write!(f, "Connection timeout to {host}:{port}"),
            NetworkError::BindFailed { port, reason } =>
                write!(f, "Unable to listen on port {port}: {reason}"),
            NetworkError::ConnectionLost { reason } =>
                write!(f, "Connection lost: {reason}"),
        }
    }
}

impl fmt::Display for TelnetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelnetError::UnexpectedResponse { step, expected, received } =>
                write!(f, "Unexpected response to {step}: expected {expected:02X?}, received {received:02X?}"),
            TelnetError::ShortResponse { step, received } =>
                write!(f, "Short response to {step}: {received} bytes"),
            TelnetError::InvalidSequence { data } =>
                write!(f, "Invalid telnet sequence: {data:02X?}"),
            TelnetError::UnsupportedTerminal { terminal_type } =>
                write!(f, "Terminal type '{terminal_type}' not supported"),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::IncompleteRecord { expected, received } =>
                write!(f, "Incomplete 3270 record: expected {expected} bytes, received {received}"),
            ProtocolError::InvalidCommandCode { code } =>
                write!(f, "Invalid 3270 command code: 0x{code:02X}"),
            ProtocolError::PendingOverflow { size, max } =>
                write!(f, "Pending record of {size} bytes exceeds {max} bytes"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidParameter { parameter, value, reason } =>
                write!(f, "Invalid configuration parameter '{parameter}' = '{value}': {reason}"),
            ConfigError::FileError { path, error } =>
                write!(f, "Configuration file error '{path}': {error}"),
        }
    }
}

impl StdError for MecaffError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            MecaffError::Network(err) => Some(err),
            MecaffError::Telnet(err) => Some(err),
            MecaffError::Protocol(err) => Some(err),
            MecaffError::Config(err) => Some(err),
        }
    }
}

impl StdError for NetworkError {}
impl StdError for TelnetError {}
impl StdError for ProtocolError {}
impl StdError for ConfigError {}

impl From<NetworkError> for MecaffError {
    fn from(err: NetworkError) -> Self {
        MecaffError::Network(err)
    }
}

impl From<TelnetError> for MecaffError {
    fn from(err: TelnetError) -> Self {
        MecaffError::Telnet(err)
    }
}

impl From<ProtocolError> for MecaffError {
    fn from(err: ProtocolError) -> Self {
        MecaffError::Protocol(err)
    }
}

impl From<ConfigError> for MecaffError {
    fn from(err: ConfigError) -> Self {
        MecaffError::Config(err)
    }
}

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetworkError::ConnectionRefused {
                host: "unknown".to_string(),
                port: 0,
            },
            io::ErrorKind::TimedOut => NetworkError::Timeout {
                host: "unknown".to_string(),
                port: 0,
            },
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof => NetworkError::ConnectionLost {
                reason: err.to_string(),
            },
            _ => NetworkError::ConnectionLost {
                reason: format!("IO Error: {err}"),
            },
        }
    }
}

impl From<io::Error> for MecaffError {
    fn from(err: io::Error) -> Self {
        MecaffError::Network(NetworkError::from(err))
    }
}

/// Result type alias for gateway operations
pub type MecaffResult<T> = Result<T, MecaffError>;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err: MecaffError = io::Error::new(io::ErrorKind::ConnectionRefused, "nope").into();
        assert!(matches!(err, MecaffError::Network(NetworkError::ConnectionRefused { .. })));

        let err: MecaffError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, MecaffError::Network(NetworkError::ConnectionLost { .. })));
    }

    #[test]
    fn test_display_and_source() {
        let err = MecaffError::from(TelnetError::UnexpectedResponse {
            step: "DO TERMINAL-TYPE",
            expected: vec![0xFF, 0xFB, 0x18],
            received: vec![0xFF, 0xFC, 0x18],
        });
        let text = err.to_string();
        assert!(text.starts_with("Telnet error: Unexpected response to DO TERMINAL-TYPE"));
        assert!(text.contains("FB"));
        assert!(err.source().is_some());

        let err = MecaffError::from(ProtocolError::InvalidCommandCode { code: 0x42 });
        assert_eq!(err.to_string(), "Protocol error: Invalid 3270 command code: 0x42");
    }
}
