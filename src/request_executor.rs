//! A [`crate::message_processor::MessageProcessor`] that turns replies back
//! into awaitable futures.
//!
//! Grounded on `exchange.py`'s `RequestExecutor`: an `out_queue` drained by
//! a dedicated sender thread so `submit` never blocks on the broker, a
//! `requests` map from `ident` to a parked future guarded by a lock, a
//! poll thread dispatching every received envelope into the async runtime,
//! and a sleep-then-cancel task per timeout. Where the original sweeps
//! `requests` on every reply to garbage-collect done futures
//! (`{ident: req for ... if not req.done()}`), this version removes an
//! entry the instant it settles — by cancellation, fulfillment, or
//! shutdown — so the map only ever holds genuinely pending requests and no
//! separate sweep pass is needed.

use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{oneshot, Mutex as TokioMutex};
use tokio::runtime::Runtime;

use crate::envelope::Envelope;
use crate::error::ExchangeFault;
use crate::exchange::Exchange;
use crate::message_target::MessageTarget;
use crate::payload::Payload;
use crate::request_target::RequestTarget;

type PendingReplies = Arc<TokioMutex<HashMap<String, oneshot::Sender<Result<Payload, ExchangeFault>>>>>;

/// An envelope paired with its destination pid, queued for the sender
/// thread. Matches the original's `QueuedMessage` NamedTuple.
struct QueuedMessage {
    to_pid: String,
    envelope: Envelope,
}

struct Inner {
    target: MessageTarget,
    runtime: Runtime,
    requests: PendingReplies,
    out_tx: std_mpsc::Sender<Option<QueuedMessage>>,
    http_client: StdMutex<Option<reqwest::Client>>,
    sender_handle: StdMutex<Option<JoinHandle<()>>>,
    poll_handle: StdMutex<Option<JoinHandle<()>>>,
}

/// Submits correlated request/reply traffic and awaits the matching reply.
///
/// Cheaply clonable — every clone shares the same background threads,
/// runtime, and pending-requests map (spec §4.5, C5).
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<Inner>,
}

impl RequestExecutor {
    /// Start the executor's background machinery: a sender thread draining
    /// the out-queue, a poll thread dispatching replies, and an owned
    /// multi-threaded tokio runtime hosting request futures and
    /// cancellation timers.
    pub fn start(exchange: Exchange, pid: impl Into<String>) -> Result<Self, ExchangeFault> {
        let target = MessageTarget::new(exchange, pid);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .worker_threads(2)
            .thread_name("request-executor")
            .build()
            .map_err(ExchangeFault::Io)?;

        let requests: PendingReplies = Arc::new(TokioMutex::new(HashMap::new()));

        let (out_tx, out_rx) = std_mpsc::channel::<Option<QueuedMessage>>();
        let sender_target = target.clone();
        let sender_handle = thread::spawn(move || send_loop(sender_target, out_rx));

        let poll_target = target.clone();
        let poll_requests = Arc::clone(&requests);
        let runtime_handle = runtime.handle().clone();
        let poll_handle = thread::spawn(move || poll_loop(poll_target, poll_requests, runtime_handle));

        Ok(RequestExecutor {
            inner: Arc::new(Inner {
                target,
                runtime,
                requests,
                out_tx,
                http_client: StdMutex::new(None),
                sender_handle: StdMutex::new(Some(sender_handle)),
                poll_handle: StdMutex::new(Some(poll_handle)),
            }),
        })
    }

    pub fn pid(&self) -> &str {
        self.inner.target.pid()
    }

    /// A [`RequestTarget`] bound to `to_pid`, matching
    /// `get_request_target`.
    pub fn request_target(&self, to_pid: impl Into<String>) -> RequestTarget {
        RequestTarget::new(self.clone(), to_pid.into())
    }

    /// Send `message` to `to_pid` and await a correlated reply.
    ///
    /// Matches `submit`/`_send_request`: the ident is minted here, the
    /// pending-reply slot is registered before the envelope ever reaches
    /// the out-queue, and an optional `timeout` schedules a cancellation
    /// task that resolves the future with [`ExchangeFault::Timeout`] if no
    /// reply lands in time.
    pub async fn submit(
        &self,
        to_pid: impl Into<String>,
        message: Payload,
        timeout: Option<Duration>,
    ) -> Result<Payload, ExchangeFault> {
        let to_pid = to_pid.into();
        let ident = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        {
            let mut requests = self.inner.requests.lock().await;
            if requests.contains_key(&ident) {
                return Err(ExchangeFault::DuplicateIdent);
            }
            requests.insert(ident.clone(), tx);
        }

        let envelope = Envelope::notification(self.inner.target.from_pid().to_string(), ident.clone(), message);
        if self
            .inner
            .out_tx
            .send(Some(QueuedMessage { to_pid, envelope }))
            .is_err()
        {
            self.inner.requests.lock().await.remove(&ident);
            return Err(ExchangeFault::NotProcessed);
        }

        if let Some(duration) = timeout {
            let requests = Arc::clone(&self.inner.requests);
            let cancel_ident = ident.clone();
            self.inner.runtime.spawn(async move {
                tokio::time::sleep(duration).await;
                let mut requests = requests.lock().await;
                if let Some(tx) = requests.remove(&cancel_ident) {
                    let _ = tx.send(Err(ExchangeFault::Timeout));
                }
            });
        }

        rx.await.unwrap_or(Err(ExchangeFault::ShutDown))
    }

    /// Drive `future` to completion on the executor's own runtime, for
    /// synchronous callers (e.g. the `switchyardd` binary's `main`) that
    /// have no cooperative task loop of their own to `.await` on.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.inner.runtime.block_on(future)
    }

    /// Run `f` on the executor's blocking thread pool without going
    /// through `submit` — matches the original's `run_thread`, used by
    /// service code to offload blocking work (spec §9 SUPPLEMENTED
    /// FEATURES #1).
    pub fn run_blocking<F, T>(&self, f: F) -> tokio::task::JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.inner.runtime.spawn_blocking(f)
    }

    /// A cloned `reqwest::Client` bound to the executor's lazily-built
    /// connection pool (spec §9 SUPPLEMENTED FEATURES #3). `reqwest::
    /// Client` is itself a cheap, pool-backed handle, so building it once
    /// and cloning satisfies the original's `tcp_connector`/`http_client`
    /// split in one step.
    pub fn http_client(&self) -> reqwest::Client {
        let mut guard = self.inner.http_client.lock().unwrap();
        guard
            .get_or_insert_with(|| {
                reqwest::Client::builder()
                    .build()
                    .expect("reqwest client builder never fails with defaults")
            })
            .clone()
    }

    /// Stop both background threads and let the runtime wind down.
    pub fn stop(&self) -> Result<(), ExchangeFault> {
        let _ = self.inner.out_tx.send(None);
        if let Some(handle) = self.inner.sender_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        self.inner.target.send_noreply("stop", Payload::stop())?;
        if let Some(handle) = self.inner.poll_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn send_loop(target: MessageTarget, out_rx: std_mpsc::Receiver<Option<QueuedMessage>>) {
    while let Ok(Some(queued)) = out_rx.recv() {
        if let Err(err) = target.exchange().send(queued.to_pid, queued.envelope) {
            warn!("[request-executor:{}] send failed: {err}", target.pid());
        }
    }
}

fn poll_loop(target: MessageTarget, requests: PendingReplies, runtime: tokio::runtime::Handle) {
    loop {
        let received = match target.exchange().recv(target.pid(), true, None) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(ExchangeFault::BrokerDown) => break,
            Err(err) => {
                warn!("[request-executor:{}] recv failed: {err}", target.pid());
                break;
            }
        };

        if received.message.is_stop() {
            break;
        }

        let requests = Arc::clone(&requests);
        let pid = target.pid().to_string();
        runtime.spawn(async move { handle_message(pid, requests, received).await });
    }
}

async fn handle_message(pid: String, requests: PendingReplies, received: Envelope) {
    let Some(reply_to) = received.reply_to.clone() else {
        debug!("[request-executor:{pid}] received a notification with no reply_to, ignoring");
        return;
    };

    let mut requests = requests.lock().await;
    match requests.remove(&reply_to) {
        Some(tx) => {
            let _ = tx.send(Ok(received.message));
        }
        None => {
            debug!("[request-executor:{pid}] unhandled reply for ident {reply_to}, already resolved");
        }
    }
}
