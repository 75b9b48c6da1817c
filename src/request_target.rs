//! A destination-bound handle for submitting correlated requests.
//!
//! Grounded on `exchange.py`'s `RequestTarget`: pairs a fixed `to_pid` with
//! the owning `RequestExecutor` so callers repeatedly talking to the same
//! recipient don't have to restate it on every call.

use std::time::Duration;

use crate::error::ExchangeFault;
use crate::payload::Payload;
use crate::request_executor::RequestExecutor;

/// Submits requests to a fixed `to_pid` through a shared
/// [`RequestExecutor`].
#[derive(Clone)]
pub struct RequestTarget {
    executor: RequestExecutor,
    to_pid: String,
}

impl RequestTarget {
    pub fn new(executor: RequestExecutor, to_pid: String) -> Self {
        RequestTarget { executor, to_pid }
    }

    pub fn pid(&self) -> &str {
        &self.to_pid
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Submit `message` and await the correlated reply. Matches
    /// `RequestTarget.request`.
    pub async fn request(&self, message: Payload, timeout: Option<Duration>) -> Result<Payload, ExchangeFault> {
        self.executor.submit(self.to_pid.clone(), message, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::exchange::Exchange;
    use crate::message_processor::{Handler, MessageProcessor};
    use crate::message_target::MessageTarget;
    use std::sync::Arc;

    struct Echo;

    impl Handler for Echo {
        fn process(&self, envelope: &Envelope, target: &MessageTarget) -> bool {
            target
                .send(uuid::Uuid::new_v4().to_string(), envelope.message.clone(), Some(envelope.ident.clone()))
                .unwrap();
            true
        }
    }

    #[test]
    fn request_target_binds_to_pid_across_calls() {
        let (exchange, _broker) = Exchange::start();
        let mut echo = MessageProcessor::start(exchange.clone(), "echo", Arc::new(Echo));
        let executor = RequestExecutor::start(exchange.clone(), "client").unwrap();
        let target = executor.request_target("echo");
        assert_eq!(target.pid(), "echo");

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = runtime.block_on(target.request(Payload::text("hi"), Some(Duration::from_secs(1))));
        assert_eq!(result.unwrap(), Payload::text("hi"));

        echo.stop().unwrap();
        echo.join();
        executor.stop().unwrap();
        exchange.stop().unwrap();
    }
}
