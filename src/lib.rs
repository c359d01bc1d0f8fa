//! MECAFF: Multiline External Console And Fullscreen Facility
//!
//! A gateway between 3270 terminal emulators and a VM/370 system running on
//! Hercules. Terminals connect to the gateway, which connects to the host
//! either as 3270 terminal (GRAF) or as line-mode console (CONS) and presents
//! a scrolling multiline console on the terminal. Fullscreen programs on the
//! host reach the terminal through FSIO commands embedded in console output.

/// Error types shared by all layers
pub mod error;

/// Gateway settings
pub mod config;

/// EBCDIC conversion and telnet basics
pub mod protocol_common;

/// 3270 data stream: codes, addresses, output builder, order parser, queries
pub mod lib3270;

/// FSIO encoding and command interpreter
pub mod transport;

/// The MECAFF console on the 3270 terminal
pub mod console;

/// Negotiation, pumps and the GRAF/CONS sessions
pub mod session;

/// Listeners and connection setup
pub mod network;

pub use config::GatewayConfig;
pub use error::{MecaffError, MecaffResult};
pub use network::Gateway;
