//! Decoupling queue for text lines
//!
//! A [`TextPipeline`] moves lines from the thread producing them to a worker
//! thread delivering them, so that the producer never blocks on a console
//! waiting for the user. The worker reports when the queue ran empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace};

use crate::error::MecaffResult;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const IDLE_POLLS_FOR_DRAINED: u32 = 100;
const BACKLOG_PROBE: Duration = Duration::from_millis(5);
const BACKLOG_PROBES: u32 = 8;

#[derive(Debug, Default)]
struct Queue {
    lines: VecDeque<(u64, Vec<u8>)>,
    next_serial: u64,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Queue>,
    running: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn head(&self) -> Option<(u64, Vec<u8>)> {
        self.lock().lines.front().cloned()
    }

    fn head_serial(&self) -> Option<u64> {
        self.lock().lines.front().map(|(serial, _)| *serial)
    }

    /// Remove the head and tell whether lines remain.
    fn dequeue_head(&self) -> bool {
        let mut queue = self.lock();
        queue.lines.pop_front();
        !queue.lines.is_empty()
    }
}

pub struct TextPipeline {
    name: String,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TextPipeline {
    /// Start the worker thread.
    ///
    /// `on_line` gets each line in order. `on_drained`, if given, is called
    /// when the queue became empty and again after each second without lines.
    /// An error from either handler stops the worker.
    pub fn start<L, D>(name: &str, on_line: L, on_drained: Option<D>) -> MecaffResult<Self>
    where
        L: FnMut(&[u8]) -> MecaffResult<()> + Send + 'static,
        D: FnMut() -> MecaffResult<()> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            running: AtomicBool::new(true),
        });
        let worker_shared = Arc::clone(&shared);
        let worker_name = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("pipeline {name}"))
            .spawn(move || {
                if let Err(e) = run_worker(&worker_shared, on_line, on_drained) {
                    debug!("{worker_name} pipeline stopped: {e}");
                }
                worker_shared.running.store(false, Ordering::SeqCst);
                debug!("{worker_name} +++ pipeline ended +++");
            })?;
        Ok(Self {
            name: name.to_string(),
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue a line for delivery.
    pub fn append_line(&self, line: &[u8]) {
        trace!("{} appendLine([{}])", self.name, line.len());
        {
            let mut queue = self.shared.lock();
            let serial = queue.next_serial;
            queue.next_serial += 1;
            queue.lines.push_back((serial, line.to_vec()));
        }
        // give the worker a chance to pick the line up
        thread::sleep(Duration::from_millis(1));
    }

    /// Number of lines not yet delivered
    pub fn len(&self) -> usize {
        self.shared.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Are lines stuck in the queue?
    ///
    /// Waits a little while the worker is making progress, so only a queue
    /// whose head did not move for 40ms counts as backlog.
    pub fn has_backlog(&self) -> bool {
        let mut current = self.shared.head_serial();
        let mut probes = BACKLOG_PROBES;
        while probes > 0 && current.is_some() {
            thread::sleep(BACKLOG_PROBE);
            probes -= 1;
            let head = self.shared.head_serial();
            if head != current {
                probes = BACKLOG_PROBES;
            }
            current = head;
        }
        current.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop the worker after the line it is delivering.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Stop the worker and wait for its end.
    ///
    /// Must not be called from within a handler of this pipeline.
    pub fn join(&self) {
        self.shutdown();
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                debug!("{} pipeline worker panicked", self.name);
            }
        }
    }
}

impl Drop for TextPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<L, D>(shared: &Shared, mut on_line: L, mut on_drained: Option<D>) -> MecaffResult<()>
where
    L: FnMut(&[u8]) -> MecaffResult<()>,
    D: FnMut() -> MecaffResult<()>,
{
    let mut current = None;
    while shared.running.load(Ordering::SeqCst) {
        let mut idle_polls = 0;
        while current.is_none() {
            thread::sleep(POLL_INTERVAL);
            if !shared.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            current = shared.head();
            idle_polls += 1;
            if current.is_none() && idle_polls > IDLE_POLLS_FOR_DRAINED {
                if let Some(drained) = on_drained.as_mut() {
                    drained()?;
                }
                idle_polls = 0;
            }
        }

        if let Some((_, line)) = current.take() {
            on_line(&line)?;
        }
        if shared.dequeue_head() {
            current = shared.head();
        } else if let Some(drained) = on_drained.as_mut() {
            drained()?;
        }
    }
    Ok(())
}
