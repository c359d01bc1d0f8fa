//! IBM 3270 data stream support
//!
//! The gateway never renders a 3270 screen itself. It needs to
//! - interpret what the host writes to its (simulated) 3270 console, see [`parser`];
//! - paint the MECAFF console on the real terminal, see [`stream`];
//! - exchange WSF queries with both sides, see [`query`].
//!
//! # Modules
//!
//! - [`codes`] - command codes, order codes, AID keys and attribute values
//! - [`address`] - 12/14-bit buffer addressing and 6-bit encoding
//! - [`stream`] - outbound data stream builder
//! - [`parser`] - host record interpreter and record reassembly
//! - [`query`] - Read-Partition Query and its replies
//! - [`terminal`] - terminal capabilities from type name and query reply
//!
//! # Example
//!
//! ```
//! use mecaff::lib3270::DataOutStream3270;
//!
//! let mut out = DataOutStream3270::new(80);
//! out.cmd_erase_write(false, true, false)
//!     .set_buffer_address(1, 1)
//!     .append_ascii("READY")
//!     .telnet_eor();
//! assert_eq!(&out.as_bytes()[..2], &[0xF5, 0xC2]);
//! ```

pub mod address;
pub mod codes;
pub mod parser;
pub mod query;
pub mod stream;
pub mod terminal;

pub use address::{BufferAddress, ScreenSize};
pub use codes::{AidKey, CommandCode, OrderCode};
pub use parser::{FieldFlags, OrderParser, RecordAssembler, RecordSink};
pub use query::{parse_query_reply, QueryReply};
pub use stream::DataOutStream3270;
pub use terminal::TerminalCapabilities;
