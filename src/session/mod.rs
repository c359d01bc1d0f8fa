//! Gateway sessions
//!
//! A session connects one terminal with one host connection. Both kinds of
//! sessions negotiate TN3270 binary mode with the terminal and present the
//! MECAFF console there; they differ in how they talk to the host:
//!
//! - [`tn3270`] - GRAF sessions: the host sees a 3270 terminal whose screen is
//!   interpreted by the gateway
//! - [`tn3215`] - CONS sessions: the host sees a line-mode console
//!
//! Supporting modules:
//!
//! - [`negotiation`] - telnet negotiations with terminal and host
//! - [`drain`] - socket pumps and host pacing
//! - [`pipeline`] - decoupling queues between the pumps and the console

pub mod drain;
pub mod negotiation;
pub mod pipeline;
pub mod tn3215;
pub mod tn3270;

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::MecaffResult;
use crate::lib3270::TerminalCapabilities;
use crate::protocol_common::{shared_writer, write_shared, SharedWriter};

pub use drain::{IntervalEnsurer, StreamDrain};
pub use negotiation::TerminalNegotiation;
pub use pipeline::TextPipeline;
pub use tn3215::Tn3215Session;
pub use tn3270::Tn3270Session;

/// Read timeout while negotiating
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Line discipline towards the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// 3270 (GRAF) connection
    Graf,
    /// 3215 (CONS) connection
    Cons,
}

impl SessionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Graf => "GRAF",
            Self::Cons => "CONS",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-connection settings taken from the gateway configuration
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub lu_name: Option<String>,
    pub no_dynamic: bool,
    pub send_delay_ms: u64,
    pub min_color_count: u16,
}

static SESSION_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(LOGOFF|DISCONNECT) AT [0-9]{2}:[0-9]{2}:[0-9]{2} ").unwrap());

/// Does the host line start the end of a VM session (LOGOFF or DISCONNECT)?
pub fn is_session_end(line: &str) -> bool {
    SESSION_END.is_match(line)
}

/// Called with the connection number once both directions ended
pub type ClosedHandler = Box<dyn FnOnce(u32) + Send>;

/// The two sockets of a connection and the drains reading them
pub struct Link {
    conn_no: u32,
    sockets: Vec<TcpStream>,
    to_terminal: SharedWriter,
    to_host: SharedWriter,
    h2t: StreamDrain,
    t2h: StreamDrain,
    closed: AtomicBool,
}

impl Link {
    pub fn new(conn_no: u32, terminal: &TcpStream, host: &TcpStream) -> io::Result<Self> {
        let mut link = Self::with_writers(
            conn_no,
            shared_writer(terminal.try_clone()?),
            shared_writer(host.try_clone()?),
        );
        link.sockets = vec![terminal.try_clone()?, host.try_clone()?];
        Ok(link)
    }

    /// Link over arbitrary writers, without sockets to shut down
    pub fn with_writers(conn_no: u32, to_terminal: SharedWriter, to_host: SharedWriter) -> Self {
        Self {
            conn_no,
            sockets: Vec::new(),
            to_terminal,
            to_host,
            h2t: StreamDrain::new(conn_no, drain::PREFIX_H2T),
            t2h: StreamDrain::new(conn_no, drain::PREFIX_T2H),
            closed: AtomicBool::new(false),
        }
    }

    pub fn conn_no(&self) -> u32 {
        self.conn_no
    }

    pub fn to_terminal(&self) -> SharedWriter {
        Arc::clone(&self.to_terminal)
    }

    pub fn send_to_terminal(&self, data: &[u8]) -> MecaffResult<()> {
        write_shared(&self.to_terminal, data)?;
        Ok(())
    }

    pub fn send_to_host(&self, data: &[u8]) -> MecaffResult<()> {
        write_shared(&self.to_host, data)?;
        Ok(())
    }

    /// Run `f` with exclusive access to the host writer.
    pub fn with_host_writer<R>(&self, f: impl FnOnce(&mut dyn Write) -> R) -> R {
        let mut writer = self.to_host.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut **writer)
    }

    pub fn h2t(&self) -> &StreamDrain {
        &self.h2t
    }

    pub fn t2h(&self) -> &StreamDrain {
        &self.t2h
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shut both sockets down; later calls do nothing.
    pub fn connection_closed(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("{{{:02}}} closing connection", self.conn_no);
        self.h2t.interrupt();
        self.t2h.interrupt();
        for socket in &self.sockets {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!("{{{:02}}} socket shutdown: {e}", self.conn_no);
            }
        }
    }
}

/// A running gateway session
pub trait Session: Send + Sync {
    fn kind(&self) -> SessionKind;

    fn link(&self) -> &Link;

    fn conn_no(&self) -> u32 {
        self.link().conn_no()
    }

    /// Data read from the host socket
    fn process_host_packet(&self, packet: &[u8]) -> MecaffResult<()>;

    /// Data read from the terminal socket
    fn process_terminal_packet(&self, packet: &[u8]) -> MecaffResult<()>;

    /// Release the console and the worker threads and close the link.
    fn connection_closed(&self);
}

/// Negotiate with both sides and start a session of the given kind.
///
/// On failure both sockets are shut down.
pub fn start_session(
    kind: SessionKind,
    conn_no: u32,
    terminal: TcpStream,
    host: TcpStream,
    config: &SessionConfig,
    on_closed: ClosedHandler,
) -> MecaffResult<Arc<dyn Session>> {
    match establish(kind, conn_no, &terminal, &host, config) {
        Ok(session) => {
            spawn_drains(Arc::clone(&session), host, terminal, on_closed)?;
            Ok(session)
        }
        Err(e) => {
            error!("{{{conn_no:02}}} {kind} session setup failed: {e}");
            let _ = terminal.shutdown(Shutdown::Both);
            let _ = host.shutdown(Shutdown::Both);
            Err(e)
        }
    }
}

fn establish(
    kind: SessionKind,
    conn_no: u32,
    terminal: &TcpStream,
    host: &TcpStream,
    config: &SessionConfig,
) -> MecaffResult<Arc<dyn Session>> {
    terminal.set_nodelay(true)?;
    host.set_nodelay(true)?;
    terminal.set_read_timeout(Some(NEGOTIATION_TIMEOUT))?;
    host.set_read_timeout(Some(NEGOTIATION_TIMEOUT))?;

    let negotiation = TerminalNegotiation {
        conn_no,
        no_dynamic: config.no_dynamic,
        min_color_count: config.min_color_count,
    };
    let caps: TerminalCapabilities = negotiation.run(&mut &*terminal)?;
    info!("{{{conn_no:02}}} negotiation of 3270 protocol with terminal successful");

    if kind == SessionKind::Graf {
        negotiation::negotiate_host_3270(&mut &*host, conn_no, caps.lu_name.as_deref(), config.lu_name.as_deref())?;
    }

    terminal.set_read_timeout(None)?;
    host.set_read_timeout(None)?;

    let link = Link::new(conn_no, terminal, host)?;
    let session: Arc<dyn Session> = match kind {
        SessionKind::Graf => Tn3270Session::start(link, &caps, config)?,
        SessionKind::Cons => Tn3215Session::start(link, &caps, config)?,
    };
    Ok(session)
}

/// Start the two pump threads of a session.
pub fn spawn_drains<R1, R2>(
    session: Arc<dyn Session>,
    host_reader: R1,
    terminal_reader: R2,
    on_closed: ClosedHandler,
) -> MecaffResult<()>
where
    R1: io::Read + Send + 'static,
    R2: io::Read + Send + 'static,
{
    let conn_no = session.conn_no();
    let running = Arc::new(AtomicUsize::new(2));
    let on_closed = Arc::new(Mutex::new(Some(on_closed)));

    let finish = {
        let running = Arc::clone(&running);
        let on_closed = Arc::clone(&on_closed);
        move |session: &Arc<dyn Session>| {
            session.connection_closed();
            if running.fetch_sub(1, Ordering::SeqCst) == 1 {
                let handler = on_closed.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(handler) = handler {
                    handler(conn_no);
                }
            }
        }
    };
    let finish_t2h = finish.clone();

    let h2t_session = Arc::clone(&session);
    thread::Builder::new()
        .name(format!("{{{conn_no:02}}} H->T"))
        .spawn(move || {
            let link = h2t_session.link();
            link.h2t().pump(host_reader, link.t2h(), |packet| h2t_session.process_host_packet(packet));
            finish(&h2t_session);
        })?;

    let t2h_session = session;
    thread::Builder::new()
        .name(format!("{{{conn_no:02}}} T->H"))
        .spawn(move || {
            let link = t2h_session.link();
            link.t2h().pump(terminal_reader, link.h2t(), |packet| t2h_session.process_terminal_packet(packet));
            finish_t2h(&t2h_session);
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    struct Recorder {
        link: Link,
        host: Mutex<Vec<u8>>,
        terminal: Mutex<Vec<u8>>,
        closed: AtomicUsize,
    }

    impl Session for Recorder {
        fn kind(&self) -> SessionKind {
            SessionKind::Cons
        }
        fn link(&self) -> &Link {
            &self.link
        }
        fn process_host_packet(&self, packet: &[u8]) -> MecaffResult<()> {
            self.host.lock().unwrap().extend_from_slice(packet);
            Ok(())
        }
        fn process_terminal_packet(&self, packet: &[u8]) -> MecaffResult<()> {
            self.terminal.lock().unwrap().extend_from_slice(packet);
            Ok(())
        }
        fn connection_closed(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
            self.link.connection_closed();
        }
    }

    #[test]
    fn test_drains_report_close_once() {
        let recorder = Arc::new(Recorder {
            link: Link::with_writers(7, shared_writer(io::sink()), shared_writer(io::sink())),
            host: Mutex::new(Vec::new()),
            terminal: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        });
        let (tx, rx) = mpsc::channel();
        let session: Arc<dyn Session> = recorder.clone();
        spawn_drains(
            session,
            Cursor::new(b"from host".to_vec()),
            Cursor::new(b"from terminal".to_vec()),
            Box::new(move |conn_no| tx.send(conn_no).unwrap()),
        )
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(*recorder.host.lock().unwrap(), b"from host");
        assert_eq!(*recorder.terminal.lock().unwrap(), b"from terminal");
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 2);
        assert!(recorder.link.is_closed());
    }

    #[test]
    fn test_session_end_lines() {
        assert!(is_session_end("LOGOFF AT 12:34:56 CET SUNDAY 01/01/12"));
        assert!(is_session_end("DISCONNECT AT 01:02:03 GMT"));
        assert!(!is_session_end("LOGOFF AT NOON"));
        assert!(!is_session_end(" LOGOFF AT 12:34:56 CET"));
    }

    #[test]
    fn test_session_kind_names() {
        assert_eq!(SessionKind::Graf.to_string(), "GRAF");
        assert_eq!(SessionKind::Cons.name(), "CONS");
    }
}
