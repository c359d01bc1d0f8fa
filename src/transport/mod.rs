//! Encoded transport between the gateway and programs on the host
//!
//! Host programs cannot send arbitrary bytes through the line-oriented
//! console, so commands and data travel as printable text: integers and
//! byte blocks are written as nibble codes from disjoint letter tables,
//! every command line starts with a fixed start sequence.
//!
//! - [`encoding`] - nibble tables and local/remote character conversion
//! - [`encoder`] - response builder split into chunks
//! - [`decoder`] - command parser
//! - [`fsio`] - command interpreter

pub mod decoder;
pub mod encoder;
pub mod encoding;
pub mod fsio;

pub use decoder::DataDecoder;
pub use encoder::DataEncoder;
pub use encoding::{TransportEncoding, TransportMode};
pub use fsio::EncodedTransport;
