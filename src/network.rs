//! Listeners and connection setup
//!
//! The [`Gateway`] listens on one port per line discipline. Each accepted
//! terminal connection gets its own connection number and a fresh connection
//! to the VM/370 host; both are then handed to a session of the matching
//! kind. Sessions are tracked until both of their pumps ended.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::error::{MecaffResult, NetworkError};
use crate::session::{self, Session, SessionConfig, SessionKind};

/// Timeout for connecting to the host
pub const HOST_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Open a connection to `host:port`, trying all resolved addresses.
pub fn connect_host(host: &str, port: u16, timeout: Duration) -> MecaffResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("connect to {addr} failed: {e}");
                last_error = Some(e);
            }
        }
    }
    let host = host.to_string();
    Err(match last_error {
        Some(e) if e.kind() == io::ErrorKind::TimedOut => NetworkError::Timeout { host, port },
        _ => NetworkError::ConnectionRefused { host, port },
    }
    .into())
}

/// Bind a listener on all interfaces.
pub fn bind_listener(port: u16) -> MecaffResult<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).map_err(|e| {
        NetworkError::BindFailed {
            port,
            reason: e.to_string(),
        }
        .into()
    })
}

pub struct Gateway {
    config: GatewayConfig,
    next_conn_no: AtomicU32,
    sessions: Mutex<HashMap<u32, Arc<dyn Session>>>,
    stopping: AtomicBool,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            next_conn_no: AtomicU32::new(1),
            sessions: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            lu_name: self.config.vm_lu_name.clone(),
            no_dynamic: self.config.no_dynamic,
            send_delay_ms: u64::from(self.config.send_delay_ms),
            min_color_count: u16::from(self.config.min_color_count),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<u32, Arc<dyn Session>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of sessions currently running
    pub fn active_sessions(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Bind the configured ports and serve until all listeners stopped.
    pub fn run(self: &Arc<Self>) -> MecaffResult<()> {
        let mut listeners = Vec::new();
        if self.config.listen.graf() {
            listeners.push((SessionKind::Graf, bind_listener(self.config.port_graf)?));
        }
        if self.config.listen.cons() {
            listeners.push((SessionKind::Cons, bind_listener(self.config.port_cons)?));
        }

        let mut handles = Vec::new();
        for (kind, listener) in listeners {
            handles.push(self.spawn_listener(kind, listener)?);
        }
        for handle in handles {
            if handle.join().is_err() {
                error!("listener thread panicked");
            }
        }
        Ok(())
    }

    /// Serve `listener` on its own thread.
    pub fn spawn_listener(self: &Arc<Self>, kind: SessionKind, listener: TcpListener) -> io::Result<JoinHandle<()>> {
        let gateway = Arc::clone(self);
        let port = listener.local_addr()?.port();
        thread::Builder::new()
            .name(format!("listener {kind}"))
            .spawn(move || gateway.accept_loop(kind, port, listener))
    }

    /// Let the accept loops end after their next connection.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    fn accept_loop(self: Arc<Self>, kind: SessionKind, port: u16, listener: TcpListener) {
        info!("waiting for {kind} connections on port {port}");
        while !self.stopping.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((terminal, peer)) => {
                    let conn_no = self.next_conn_no.fetch_add(1, Ordering::SeqCst);
                    info!("{{{conn_no:02}}} {kind} connection from {peer}");
                    if let Err(e) = self.spawn_connection(kind, conn_no, terminal) {
                        error!("{{{conn_no:02}}} unable to start connection thread: {e}");
                    }
                }
                Err(e) => {
                    warn!("{kind} accept failed: {e}");
                    thread::sleep(ACCEPT_RETRY_DELAY);
                }
            }
        }
        info!("stopped listening for {kind} connections on port {port}");
    }

    fn spawn_connection(self: &Arc<Self>, kind: SessionKind, conn_no: u32, terminal: TcpStream) -> io::Result<()> {
        let gateway = Arc::clone(self);
        thread::Builder::new()
            .name(format!("{{{conn_no:02}}} setup"))
            .spawn(move || gateway.setup_connection(kind, conn_no, terminal))?;
        Ok(())
    }

    fn setup_connection(self: Arc<Self>, kind: SessionKind, conn_no: u32, terminal: TcpStream) {
        let (host_name, host_port) = (&self.config.vm_host_name, self.config.vm_host_port);
        let host = match connect_host(host_name, host_port, HOST_CONNECT_TIMEOUT) {
            Ok(host) => host,
            Err(e) => {
                error!("{{{conn_no:02}}} unable to connect to VM/370 host: {e}");
                let _ = terminal.shutdown(Shutdown::Both);
                return;
            }
        };
        debug!("{{{conn_no:02}}} connected to {host_name}:{host_port}");

        let registry = Arc::downgrade(&self);
        let on_closed: session::ClosedHandler = Box::new(move |conn_no| unregister(&registry, conn_no));
        match session::start_session(kind, conn_no, terminal, host, &self.session_config(), on_closed) {
            Ok(session) => {
                let closed_meanwhile = session.link().is_closed();
                if !closed_meanwhile {
                    self.lock_sessions().insert(conn_no, session);
                    info!("{{{conn_no:02}}} {kind} session running, {} active", self.active_sessions());
                }
            }
            Err(e) => info!("{{{conn_no:02}}} connection dropped: {e}"),
        }
    }
}

fn unregister(registry: &Weak<Gateway>, conn_no: u32) {
    if let Some(gateway) = registry.upgrade() {
        gateway.lock_sessions().remove(&conn_no);
        info!("{{{conn_no:02}}} connection closed, {} active", gateway.active_sessions());
    }
}
