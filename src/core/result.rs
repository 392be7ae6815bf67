//! Tagged delivery results.
//!
//! Failure is communicated through variants rather than `Err`: the public
//! send path always resolves, and callers inspect the kind plus the
//! `dropped` flag to learn what happened to their payload.

use serde::Serialize;

/// Final outcome of one `beacon` call (or of one replayed entry).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendResult {
    /// What the delivery attempt observed.
    #[serde(flatten)]
    pub kind: ResultKind,

    /// True only when the library has committed to abandoning this payload:
    /// it will be neither retried in memory nor persisted for replay.
    pub dropped: bool,
}

/// The five delivery outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ResultKind {
    /// HTTP 2xx delivered.
    Success { status_code: u16 },

    /// The payload was handed off to a fire-and-forget channel; the
    /// delivery state is unobservable. Treated as success for queue-drain
    /// purposes.
    Unknown,

    /// HTTP non-2xx response.
    Response { status_code: u16, raw_error: String },

    /// The request failed before any response arrived.
    Network { raw_error: String },

    /// The payload was handed to the persistence queue for later replay.
    Persisted {
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },
}

impl SendResult {
    /// True for `Success` (a confirmed 2xx delivery).
    pub fn is_success(&self) -> bool {
        matches!(self.kind, ResultKind::Success { .. })
    }

    /// Status code observed by this result, when one exists.
    pub fn status_code(&self) -> Option<u16> {
        match self.kind {
            ResultKind::Success { status_code } => Some(status_code),
            ResultKind::Response { status_code, .. } => Some(status_code),
            ResultKind::Persisted { status_code } => status_code,
            ResultKind::Unknown | ResultKind::Network { .. } => None,
        }
    }
}
