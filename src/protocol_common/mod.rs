//! Protocol building blocks shared by both line disciplines
//!
//! - [`ebcdic`] - EBCDIC (CP037) text codec and comparison helpers
//! - [`telnet_base`] - telnet option constants, sequence builders and IAC escaping
//!
//! # Examples
//!
//! ```
//! use mecaff::protocol_common::{ascii_to_ebcdic_vec, ebcdic_to_ascii_string};
//!
//! let ebcdic = ascii_to_ebcdic_vec("VM READ");
//! assert_eq!(ebcdic_to_ascii_string(&ebcdic), "VM READ");
//! ```

pub mod ebcdic;
pub mod telnet_base;

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

pub use ebcdic::{ascii_to_ebcdic, ascii_to_ebcdic_vec, ebcdic_to_ascii, ebcdic_to_ascii_string};
pub use telnet_base::{build_negotiation, build_subnegotiation, TelnetCommand, TelnetOption};

/// Socket write half shared by the threads of a connection
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub fn shared_writer<W: Write + Send + 'static>(writer: W) -> SharedWriter {
    Arc::new(Mutex::new(Box::new(writer)))
}

/// Write `data` completely and flush.
pub fn write_shared(writer: &SharedWriter, data: &[u8]) -> io::Result<()> {
    let mut w = writer.lock().unwrap_or_else(|e| e.into_inner());
    w.write_all(data)?;
    w.flush()
}
