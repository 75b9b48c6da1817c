//! A fixed-identity handle for sending traffic onto the bus.
//!
//! Grounded on `exchange.py`'s `MessageTarget`: bundles a `pid` (this
//! participant's own address), an optional `from_pid` override, and the
//! `Exchange` handle itself, so callers don't have to thread all three
//! through every call site.

use crate::envelope::Envelope;
use crate::error::ExchangeFault;
use crate::exchange::Exchange;
use crate::payload::Payload;

/// Addresses outbound traffic as coming from a fixed `pid`.
#[derive(Clone)]
pub struct MessageTarget {
    exchange: Exchange,
    pid: String,
    from_pid: String,
}

impl MessageTarget {
    /// A target addressing `pid`, claiming to be from `pid` itself — the
    /// common case of a participant sending under its own name.
    pub fn new(exchange: Exchange, pid: impl Into<String>) -> Self {
        let pid = pid.into();
        MessageTarget {
            exchange,
            from_pid: pid.clone(),
            pid,
        }
    }

    /// A target addressing `to_pid`, claiming to be from `from_pid` — used
    /// to reply to a received envelope's sender under one's own identity.
    pub fn to(exchange: Exchange, to_pid: impl Into<String>, from_pid: impl Into<String>) -> Self {
        MessageTarget {
            exchange,
            pid: to_pid.into(),
            from_pid: from_pid.into(),
        }
    }

    /// Override the `from_pid` this target stamps on outbound envelopes —
    /// used by a `MessageProcessor` that replies on behalf of a different
    /// pid than it's currently polling.
    pub fn with_from_pid(mut self, from_pid: impl Into<String>) -> Self {
        self.from_pid = from_pid.into();
        self
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    pub fn from_pid(&self) -> &str {
        &self.from_pid
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Send a message addressed by `ident`, optionally correlated to an
    /// earlier request via `reply_to`.
    pub fn send(
        &self,
        ident: impl Into<String>,
        message: Payload,
        reply_to: Option<String>,
    ) -> Result<(), ExchangeFault> {
        let envelope = match reply_to {
            Some(r) => Envelope::reply(self.from_pid.clone(), ident, message, r),
            None => Envelope::notification(self.from_pid.clone(), ident, message),
        };
        self.exchange.send(self.pid.clone(), envelope)
    }

    /// Send without expecting any reply correlation.
    pub fn send_noreply(&self, ident: impl Into<String>, message: Payload) -> Result<(), ExchangeFault> {
        self.send(ident, message, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_noreply_lands_in_target_pids_queue() {
        let (exchange, _handle) = Exchange::start();
        let target = MessageTarget::new(exchange.clone(), "worker");
        target.send_noreply("msg-1", Payload::text("hello")).unwrap();

        let received = exchange.recv("worker", false, None).unwrap().unwrap();
        assert_eq!(received.from_pid, "worker");
        assert_eq!(received.ident, "msg-1");
        assert!(received.is_notification());
        exchange.stop().unwrap();
    }

    #[test]
    fn with_from_pid_overrides_sender_address() {
        let (exchange, _handle) = Exchange::start();
        let target = MessageTarget::new(exchange.clone(), "worker").with_from_pid("supervisor");
        target.send_noreply("msg-1", Payload::text("hi")).unwrap();

        let received = exchange.recv("worker", false, None).unwrap().unwrap();
        assert_eq!(received.from_pid, "supervisor");
        exchange.stop().unwrap();
    }
}
