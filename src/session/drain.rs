//! Socket pumps and host pacing
//!
//! Each connection has two [`StreamDrain`]s, one per direction. A drain reads
//! packets from its socket and hands them to the session until the socket
//! reports EOF or an error. The drain ending first tells the other one that
//! the connection is going down, so that the resulting read error on the
//! other socket is not reported as a failure.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace};

use crate::error::{MecaffError, MecaffResult, NetworkError};
use crate::protocol_common::telnet_base::hex_dump;

/// Size of the packet buffer of a drain
pub const DRAIN_BUFFER_SIZE: usize = 8192;

/// Log prefix of the host to terminal direction
pub const PREFIX_H2T: &str = "  T<-H ";

/// Log prefix of the terminal to host direction
pub const PREFIX_T2H: &str = "T->H   ";

/// One direction of a connection
#[derive(Debug)]
pub struct StreamDrain {
    conn_no: u32,
    prefix: &'static str,
    closing: AtomicBool,
}

impl StreamDrain {
    pub fn new(conn_no: u32, prefix: &'static str) -> Self {
        Self {
            conn_no,
            prefix,
            closing: AtomicBool::new(false),
        }
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    /// Tell this drain that the connection is closing.
    pub fn interrupt(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Pass all packets from `reader` to `handler` until EOF, a read error or
    /// a handler error; `other` is interrupted when done.
    pub fn pump<R, F>(&self, mut reader: R, other: &StreamDrain, mut handler: F)
    where
        R: Read,
        F: FnMut(&[u8]) -> MecaffResult<()>,
    {
        let conn_no = self.conn_no;
        let mut buffer = vec![0u8; DRAIN_BUFFER_SIZE];
        loop {
            let count = match reader.read(&mut buffer) {
                Ok(0) => {
                    info!("{{{conn_no:02}}} {}connection closed (EOF)", self.prefix);
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.report_error(&e.into());
                    break;
                }
            };
            trace!("{{{conn_no:02}}} {}[{count}]\n{}", self.prefix, hex_dump(&buffer[..count]));
            if let Err(e) = handler(&buffer[..count]) {
                self.report_error(&e);
                break;
            }
        }
        other.interrupt();
        debug!("{{{conn_no:02}}} {}drain ended", self.prefix);
    }

    fn report_error(&self, err: &MecaffError) {
        let conn_no = self.conn_no;
        match err {
            MecaffError::Network(NetworkError::ConnectionLost { .. }) => {
                info!("{{{conn_no:02}}} {}connection closed", self.prefix);
            }
            _ if self.is_closing() => {
                debug!("{{{conn_no:02}}} {}error while closing: {err}", self.prefix);
            }
            _ => error!("{{{conn_no:02}}} {}error: {err}", self.prefix),
        }
    }
}

/// Keeps a minimal time distance between operations towards the host
#[derive(Debug)]
pub struct IntervalEnsurer {
    default_interval: Duration,
    last_op: Mutex<Option<Instant>>,
}

impl IntervalEnsurer {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            last_op: Mutex::new(None),
        }
    }

    /// Wait until the default interval since the last operation passed.
    pub fn ensure(&self) {
        self.ensure_interval(self.default_interval);
    }

    /// Wait until `interval` since the last operation passed, then count the
    /// caller's operation as the last one.
    pub fn ensure_interval(&self, interval: Duration) {
        let mut last_op = self.last_op.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = *last_op {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        *last_op = Some(Instant::now());
    }

    /// Record an operation done now.
    pub fn log_op(&self) {
        *self.last_op.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }
}
