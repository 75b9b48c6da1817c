//! The addressed unit of traffic the broker routes.
//!
//! Grounded on `exchange.py`'s `MessageWrapper` NamedTuple: `(from_pid,
//! ident, message, ref)`, with `ref` defaulting to `None`. `from_pid` is the
//! sender's own pid so a reply can be addressed back without a lookup;
//! `ident` correlates a reply to the request that caused it via `ref`.

use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// A single message in flight between two named participants on the bus.
///
/// `ident` is opaque to the broker — it only matters to whichever
/// [`crate::request_executor::RequestExecutor`] minted it and is sweeping
/// its pending-requests map for a `ref` match.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub from_pid: String,
    pub ident: String,
    pub message: Payload,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Envelope {
    /// A fire-and-forget envelope with no reply correlation.
    pub fn notification(from_pid: impl Into<String>, ident: impl Into<String>, message: Payload) -> Self {
        Envelope {
            from_pid: from_pid.into(),
            ident: ident.into(),
            message,
            reply_to: None,
        }
    }

    /// An envelope replying to an earlier request's `ident`.
    pub fn reply(
        from_pid: impl Into<String>,
        ident: impl Into<String>,
        message: Payload,
        reply_to: impl Into<String>,
    ) -> Self {
        Envelope {
            from_pid: from_pid.into(),
            ident: ident.into(),
            message,
            reply_to: Some(reply_to.into()),
        }
    }

    /// True when this envelope carries no correlation back to a pending
    /// request — nothing in a `RequestExecutor`'s map will ever match it.
    pub fn is_notification(&self) -> bool {
        self.reply_to.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_has_no_reply_to() {
        let env = Envelope::notification("worker-1", "abc123", Payload::text("hi"));
        assert!(env.is_notification());
    }

    #[test]
    fn reply_carries_ref_back_to_request_ident() {
        let env = Envelope::reply("worker-1", "def456", Payload::text("ack"), "abc123");
        assert!(!env.is_notification());
        assert_eq!(env.reply_to.as_deref(), Some("abc123"));
    }
}
