//! A background poll loop dispatching received envelopes to a [`Handler`].
//!
//! Grounded on `exchange.py`'s `MessageProcessor`: `_poll_messages` blocks on
//! `exchange.recv(pid)` in a loop, stopping when it sees its own stop
//! sentinel, and wraps every dispatch so a handler panic becomes an
//! `ExchangeError` reply instead of killing the poll thread — with the
//! storm-prevention rule from `_reply_with_error`: if the *triggering*
//! message was itself an error, log it locally and don't reply at all.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, warn};

use crate::envelope::Envelope;
use crate::error::ExchangeFault;
use crate::exchange::Exchange;
use crate::message_target::MessageTarget;
use crate::payload::Payload;

/// Handles one received envelope, replying through `target` as needed.
///
/// Implementors should not panic for expected failures — return an error
/// payload via `target.send` instead — but a panic is still caught and
/// turned into an `ExchangeError` reply so one bad message can't kill the
/// poll thread.
///
/// Returning `false` terminates the poll loop after this message, matching
/// `_process_message(received) is False` in the original's `_poll_messages`
/// (spec §4.4). Any other return keeps the loop running.
pub trait Handler: Send + Sync {
    fn process(&self, envelope: &Envelope, target: &MessageTarget) -> bool;
}

/// Owns a dedicated thread polling one pid's queue and dispatching to a
/// [`Handler`].
pub struct MessageProcessor {
    exchange: Exchange,
    pid: String,
    handle: Option<JoinHandle<u64>>,
}

impl MessageProcessor {
    /// Spawn the poll thread. Matches `MessageProcessor.start()`.
    pub fn start(exchange: Exchange, pid: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        let pid = pid.into();
        let poll_exchange = exchange.clone();
        let poll_pid = pid.clone();
        let processed = Arc::new(AtomicU64::new(0));
        let poll_processed = Arc::clone(&processed);

        let handle = thread::spawn(move || poll_loop(poll_exchange, poll_pid, handler, poll_processed));

        MessageProcessor {
            exchange,
            pid,
            handle: Some(handle),
        }
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// Ask the poll loop to stop by sending it its own stop sentinel.
    /// Matches `MessageProcessor.stop()`.
    pub fn stop(&self) -> Result<(), ExchangeFault> {
        self.exchange.send(
            self.pid.clone(),
            Envelope::notification(self.pid.clone(), "stop", Payload::stop()),
        )
    }

    /// Block until the poll thread exits, returning how many messages it
    /// processed.
    pub fn join(&mut self) -> u64 {
        match self.handle.take() {
            Some(h) => h.join().unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for MessageProcessor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop();
            self.join();
        }
    }
}

fn poll_loop(exchange: Exchange, pid: String, handler: Arc<dyn Handler>, processed: Arc<AtomicU64>) -> u64 {
    loop {
        let received = match exchange.recv(&pid, true, None) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(ExchangeFault::BrokerDown) => break,
            Err(err) => {
                warn!("[message-processor:{pid}] recv failed: {err}");
                break;
            }
        };

        if received.message.is_stop() {
            break;
        }

        let reply_target = MessageTarget::to(exchange.clone(), received.from_pid.clone(), pid.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.process(&received, &reply_target)));
        processed.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(keep_going) => {
                if !keep_going {
                    break;
                }
            }
            Err(panic) => reply_with_error(&reply_target, &received, &panic),
        }
    }
    processed.load(Ordering::SeqCst)
}

/// Matches `_reply_with_error`: an error triggered by processing an
/// already-erroring message is logged, not replied to, to avoid an
/// error-reply storm between two processors that keep failing on each
/// other's replies.
fn reply_with_error(target: &MessageTarget, received: &Envelope, panic: &(dyn std::any::Any + Send)) {
    if let Some(existing) = received.message.as_error() {
        error!(
            "[message-processor:{}] error while handling an error message, not replying: {}",
            target.from_pid(),
            existing.format()
        );
        return;
    }

    let error = crate::payload::ExchangeError::from_panic("Exception during message processing", panic);
    error!("[message-processor:{}] {}", target.from_pid(), error.format());
    let _ = target.send(
        uuid::Uuid::new_v4().to_string(),
        Payload::Error(error),
        Some(received.ident.clone()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Echo;

    impl Handler for Echo {
        fn process(&self, envelope: &Envelope, target: &MessageTarget) -> bool {
            target
                .send(
                    uuid::Uuid::new_v4().to_string(),
                    envelope.message.clone(),
                    Some(envelope.ident.clone()),
                )
                .unwrap();
            true
        }
    }

    struct Panicker;

    impl Handler for Panicker {
        fn process(&self, _envelope: &Envelope, _target: &MessageTarget) -> bool {
            panic!("boom");
        }
    }

    struct Recorder(Mutex<Vec<String>>);

    impl Handler for Recorder {
        fn process(&self, envelope: &Envelope, _target: &MessageTarget) -> bool {
            if let Payload::Text(s) = &envelope.message {
                self.0.lock().unwrap().push(s.clone());
            }
            true
        }
    }

    #[test]
    fn processor_echoes_and_stops_cleanly() {
        let (exchange, _handle) = Exchange::start();
        let mut processor = MessageProcessor::start(exchange.clone(), "echo", Arc::new(Echo));

        exchange
            .send("echo", Envelope::notification("client", "req-1", Payload::text("ping")))
            .unwrap();

        let reply = exchange.recv("client", true, Some(std::time::Duration::from_secs(1))).unwrap();
        let reply = reply.expect("expected a reply");
        assert_eq!(reply.reply_to.as_deref(), Some("req-1"));
        assert_eq!(reply.message, Payload::text("ping"));

        processor.stop().unwrap();
        let processed = processor.join();
        assert_eq!(processed, 1);
        exchange.stop().unwrap();
    }

    #[test]
    fn panic_in_handler_becomes_error_reply_not_a_dead_thread() {
        let (exchange, _handle) = Exchange::start();
        let mut processor = MessageProcessor::start(exchange.clone(), "flaky", Arc::new(Panicker));

        exchange
            .send("flaky", Envelope::notification("client", "req-1", Payload::text("ping")))
            .unwrap();

        let reply = exchange
            .recv("client", true, Some(std::time::Duration::from_secs(1)))
            .unwrap()
            .expect("expected an error reply");
        let error = reply.message.as_error().expect("reply should be an ExchangeError");
        assert_eq!(error.value, "Exception during message processing");

        processor.stop().unwrap();
        processor.join();
        exchange.stop().unwrap();
    }

    struct TerminateAfterFirst;

    impl Handler for TerminateAfterFirst {
        fn process(&self, _envelope: &Envelope, _target: &MessageTarget) -> bool {
            false
        }
    }

    #[test]
    fn handler_returning_false_terminates_the_poll_loop() {
        let (exchange, _handle) = Exchange::start();
        let mut processor = MessageProcessor::start(exchange.clone(), "terminator", Arc::new(TerminateAfterFirst));

        exchange
            .send("terminator", Envelope::notification("client", "req-1", Payload::text("ping")))
            .unwrap();
        exchange
            .send("terminator", Envelope::notification("client", "req-2", Payload::text("ping")))
            .unwrap();

        // The handler itself requests termination after the first message,
        // without the caller ever sending the stop sentinel.
        let processed = processor.join();
        assert_eq!(processed, 1);

        let status = exchange.status().unwrap();
        assert_eq!(status.pending, 1, "second message is left unprocessed");
        exchange.stop().unwrap();
    }

    #[test]
    fn error_triggered_by_an_error_message_does_not_reply() {
        let (exchange, _handle) = Exchange::start();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut processor = MessageProcessor::start(exchange.clone(), "flaky", Arc::new(Panicker));

        exchange
            .send(
                "flaky",
                Envelope::notification("client", "req-1", Payload::error("earlier failure", "")),
            )
            .unwrap();

        let reply = exchange.recv("client", true, Some(std::time::Duration::from_millis(200))).unwrap();
        assert!(reply.is_none(), "no reply storm expected");

        processor.stop().unwrap();
        processor.join();
        exchange.stop().unwrap();
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
