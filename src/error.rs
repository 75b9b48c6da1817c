//! Local, non-transportable faults raised by the exchange API itself.
//!
//! These are distinct from [`crate::payload::ExchangeError`], which is a
//! `Payload` variant that travels *as data* across the bus. Values here
//! never cross a `send`/`recv` boundary — they report a failure to even
//! get a message onto (or off of) the bus.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeFault {
    /// The broker's routing loop has exited; the command channel is closed.
    #[error("exchange broker is down")]
    BrokerDown,

    /// `submit` generated an `ident` that collided with a still-pending
    /// request. Practically unreachable with a cryptographic ident, but
    /// guarded per spec §7.
    #[error("duplicate request identifier")]
    DuplicateIdent,

    /// The broker rejected or could not accept the outbound send.
    #[error("request could not be processed")]
    NotProcessed,

    /// The request's timeout elapsed before a reply arrived.
    #[error("request timed out")]
    Timeout,

    /// The request was cancelled before a reply arrived.
    #[error("request was cancelled")]
    Cancelled,

    /// The parked reply future was dropped without being fulfilled, usually
    /// because the `RequestExecutor` was stopped mid-flight.
    #[error("request executor shut down before a reply arrived")]
    ShutDown,

    /// A [`crate::payload::Record`] failed arity or per-field type
    /// validation at construction time.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
