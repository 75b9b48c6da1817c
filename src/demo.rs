//! Demo processors for smoke-testing the bus.
//!
//! Grounded on `exchange.py`'s `HelloProcessor` (plain echo, used to prove
//! basic request/reply wiring) and `ThreadedHelloProcessor` (a delayed,
//! thread-pool-backed echo used to prove that two processors can share one
//! `pid` and divide traffic between them — see the module's closing
//! comment: "Testing two workers dividing requests").

use std::thread;
use std::time::Duration;

use crate::envelope::Envelope;
use crate::message_processor::Handler;
use crate::message_target::MessageTarget;

/// Echoes the received payload straight back to its sender. Matches
/// `HelloProcessor._process_message`.
pub struct EchoProcessor;

impl Handler for EchoProcessor {
    fn process(&self, envelope: &Envelope, target: &MessageTarget) -> bool {
        let _ = target.send(
            uuid::Uuid::new_v4().to_string(),
            envelope.message.clone(),
            Some(envelope.ident.clone()),
        );
        true
    }
}

/// Echoes back after a fixed delay, matching `ThreadedHelloProcessor`'s
/// `_delayed_process` (`time.sleep(1)` then the inherited echo behaviour).
/// Useful for exercising `submit`'s timeout/cancellation path and for
/// proving several processors polling the same pid divide the load.
pub struct SlowEchoProcessor {
    delay: Duration,
}

impl SlowEchoProcessor {
    pub fn new(delay: Duration) -> Self {
        SlowEchoProcessor { delay }
    }
}

impl Default for SlowEchoProcessor {
    fn default() -> Self {
        SlowEchoProcessor::new(Duration::from_secs(1))
    }
}

impl Handler for SlowEchoProcessor {
    fn process(&self, envelope: &Envelope, target: &MessageTarget) -> bool {
        thread::sleep(self.delay);
        let _ = target.send(
            uuid::Uuid::new_v4().to_string(),
            envelope.message.clone(),
            Some(envelope.ident.clone()),
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Exchange;
    use crate::message_processor::MessageProcessor;
    use crate::payload::Payload;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[test]
    fn echo_processor_replies_with_the_same_payload() {
        let (exchange, _broker) = Exchange::start();
        let mut processor = MessageProcessor::start(exchange.clone(), "echo", Arc::new(EchoProcessor));

        exchange
            .send("echo", Envelope::notification("client", "req-1", Payload::text("hi")))
            .unwrap();

        let reply = exchange
            .recv("client", true, Some(StdDuration::from_secs(1)))
            .unwrap()
            .expect("expected a reply");
        assert_eq!(reply.message, Payload::text("hi"));

        processor.stop().unwrap();
        processor.join();
        exchange.stop().unwrap();
    }

    #[test]
    fn slow_echo_processor_replies_after_its_delay() {
        let (exchange, _broker) = Exchange::start();
        let mut processor = MessageProcessor::start(
            exchange.clone(),
            "slow",
            Arc::new(SlowEchoProcessor::new(StdDuration::from_millis(50))),
        );

        let started = std::time::Instant::now();
        exchange
            .send("slow", Envelope::notification("client", "req-1", Payload::text("hi")))
            .unwrap();

        let reply = exchange
            .recv("client", true, Some(StdDuration::from_secs(1)))
            .unwrap()
            .expect("expected a reply");
        assert_eq!(reply.message, Payload::text("hi"));
        assert!(started.elapsed() >= StdDuration::from_millis(50));

        processor.stop().unwrap();
        processor.join();
        exchange.stop().unwrap();
    }
}
