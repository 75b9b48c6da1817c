//! The broker: a single routing loop owning every recipient's FIFO queue.
//!
//! Grounded on `exchange.py`'s `Exchange` class. The original serializes
//! all queue mutation through a `multiprocessing.Pipe` read by one `_run`
//! loop, and wakes blocked `recv` callers through a `Condition`. We keep
//! that exact split — one thread owns the queues and answers simple
//! request/reply commands over a channel, callers block on a separate
//! condvar that's notified whenever new work lands — but replace the pipe
//! with an `std::sync::mpsc` command channel (styled on the teacher's
//! `cli/src/broker/mod.rs`, where one thread owns `sessions`/`key_map` and
//! answers over channels rather than sharing a lock across threads).

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::envelope::Envelope;
use crate::error::ExchangeFault;

/// A snapshot of broker activity, mirroring `Exchange.status()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerStatus {
    pub pending: u64,
    pub processed: HashMap<String, u64>,
    pub total: u64,
}

enum Command {
    Send {
        to_pid: String,
        envelope: Envelope,
        reply: std_mpsc::Sender<()>,
    },
    Recv {
        to_pid: String,
        reply: std_mpsc::Sender<Option<Envelope>>,
    },
    Status {
        reply: std_mpsc::Sender<BrokerStatus>,
    },
    Stop {
        reply: std_mpsc::Sender<()>,
    },
}

/// A cheaply-clonable handle to the broker's routing loop.
///
/// Every clone shares the same command channel and wakeup condvar, so any
/// handle can `send`/`recv`/`status`/`stop` the same broker.
#[derive(Clone)]
pub struct Exchange {
    cmd_tx: std_mpsc::Sender<Command>,
    notify: Arc<(Mutex<u64>, Condvar)>,
}

impl Exchange {
    /// Start the broker's routing loop on a dedicated thread and return a
    /// handle plus its join handle (spec §4.2, C2).
    ///
    /// The original's `start(process=True)` can run the loop in a forked
    /// OS process instead of a thread; Rust's ownership model makes the
    /// in-process thread the only idiomatic option here (see SPEC_FULL.md
    /// SUPPLEMENTED FEATURES #1), so there is no `as_process` parameter.
    pub fn start() -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<Command>();
        let notify = Arc::new((Mutex::new(0u64), Condvar::new()));
        let notify_loop = Arc::clone(&notify);

        let handle = thread::spawn(move || run_loop(cmd_rx, notify_loop));

        (
            Exchange {
                cmd_tx,
                notify,
            },
            handle,
        )
    }

    /// Enqueue `envelope` for `to_pid`. Does not block on a recipient
    /// actually receiving it — matches `Exchange.send`'s fire-and-forget
    /// semantics over the command pipe.
    pub fn send(&self, to_pid: impl Into<String>, envelope: Envelope) -> Result<(), ExchangeFault> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.cmd_tx
            .send(Command::Send {
                to_pid: to_pid.into(),
                envelope,
                reply: reply_tx,
            })
            .map_err(|_| ExchangeFault::BrokerDown)?;
        reply_rx.recv().map_err(|_| ExchangeFault::BrokerDown)?;

        let (lock, cvar) = &*self.notify;
        let mut generation = lock.lock().unwrap();
        *generation = generation.wrapping_add(1);
        cvar.notify_all();
        Ok(())
    }

    /// Pop the next envelope queued for `to_pid`, optionally blocking.
    ///
    /// Timeout semantics follow the original's actual `Condition.wait`
    /// control flow (see SPEC_FULL.md REDESIGN FLAGS): a finite `timeout`
    /// is a single wait budget, never re-armed after a spurious wakeup;
    /// `blocking=true, timeout=None` waits indefinitely until a message
    /// arrives.
    ///
    /// Lock `notify` *before* the first queue check and hold it across
    /// `cmd_recv`: `send` (above) needs this same lock to bump
    /// `generation` and call `notify_all`, so a message that lands in the
    /// gap between "the queue looked empty" and "we started waiting" can
    /// no longer be missed — the sender simply blocks on the lock until we
    /// give it up by entering `cvar.wait`. `generation` is the wait
    /// predicate: we only park while it's unchanged from our snapshot and
    /// the queue is still empty.
    pub fn recv(
        &self,
        to_pid: impl Into<String>,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<Envelope>, ExchangeFault> {
        let to_pid = to_pid.into();
        let (lock, cvar) = &*self.notify;

        let mut guard = lock.lock().unwrap();
        let mut seen_generation = *guard;
        let mut message = self.cmd_recv(&to_pid)?;

        while message.is_none() && (blocking || timeout.is_some()) && *guard == seen_generation {
            guard = match timeout {
                Some(d) => {
                    let (g, result) = cvar.wait_timeout(guard, d).unwrap();
                    if result.timed_out() {
                        return Ok(None);
                    }
                    g
                }
                None => cvar.wait(guard).unwrap(),
            };
            seen_generation = *guard;
            message = self.cmd_recv(&to_pid)?;

            if timeout.is_some() {
                break;
            }
        }
        Ok(message)
    }

    fn cmd_recv(&self, to_pid: &str) -> Result<Option<Envelope>, ExchangeFault> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.cmd_tx
            .send(Command::Recv {
                to_pid: to_pid.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| ExchangeFault::BrokerDown)?;
        reply_rx.recv().map_err(|_| ExchangeFault::BrokerDown)
    }

    /// Snapshot of pending/processed counts (spec §4.2, `Exchange.status`).
    pub fn status(&self) -> Result<BrokerStatus, ExchangeFault> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.cmd_tx
            .send(Command::Status { reply: reply_tx })
            .map_err(|_| ExchangeFault::BrokerDown)?;
        reply_rx.recv().map_err(|_| ExchangeFault::BrokerDown)
    }

    /// Ask the routing loop to exit. Does not drain queued messages —
    /// matches the original's confirmed FIXME (spec §9): anything still
    /// queued when `stop` lands is simply abandoned.
    pub fn stop(&self) -> Result<(), ExchangeFault> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.cmd_tx
            .send(Command::Stop { reply: reply_tx })
            .map_err(|_| ExchangeFault::BrokerDown)?;
        reply_rx.recv().map_err(|_| ExchangeFault::BrokerDown)?;

        let (lock, cvar) = &*self.notify;
        let _generation = lock.lock().unwrap();
        cvar.notify_all();
        Ok(())
    }
}

fn run_loop(cmd_rx: std_mpsc::Receiver<Command>, _notify: Arc<(Mutex<u64>, Condvar)>) {
    let mut queues: HashMap<String, VecDeque<Envelope>> = HashMap::new();
    let mut processed: HashMap<String, u64> = HashMap::new();
    let mut pending: u64 = 0;

    info!("[exchange] routing loop started");

    while let Ok(command) = cmd_rx.recv() {
        match command {
            Command::Send {
                to_pid,
                envelope,
                reply,
            } => {
                queues.entry(to_pid.clone()).or_default().push_back(envelope);
                pending += 1;
                debug!("[exchange] queued message for {to_pid}, pending={pending}");
                let _ = reply.send(());
            }
            Command::Recv { to_pid, reply } => {
                let message = queues.get_mut(&to_pid).and_then(VecDeque::pop_front);
                if message.is_some() {
                    pending = pending.saturating_sub(1);
                    *processed.entry(to_pid.clone()).or_insert(0) += 1;
                }
                let _ = reply.send(message);
            }
            Command::Status { reply } => {
                let total = processed.values().sum();
                let _ = reply.send(BrokerStatus {
                    pending,
                    processed: processed.clone(),
                    total,
                });
            }
            Command::Stop { reply } => {
                let _ = reply.send(());
                break;
            }
        }
    }

    warn!("[exchange] routing loop exiting");
}
