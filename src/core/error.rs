//! # Core Error Module
//!
//! This module defines the central `BeaconError` type used throughout the
//! library, plus the `StoreError` carried by the durable-store traits.
//! It leverages `thiserror` for error message formatting and `serde` for
//! serialization.

use serde::Serialize;
use thiserror::Error;

/// Central error type for the `beacon-transporter` library.
///
/// Only constructors, configuration loading and the store engines surface
/// this type. The delivery path never does: `Transporter::beacon` always
/// resolves to a `SendResult`, whatever happened on the wire.
#[derive(Debug, Error, Serialize)]
pub enum BeaconError {
    /// Error related to configuration loading or merging.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Error related to internal logic or state.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Standard HTTP request or network failure.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Failure reported by a durable store engine.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Engine-level failure reported through the `RetryLog` / `StringStore`
/// traits. The first occurrence latches the owning queue into its disabled
/// state for the rest of the process lifetime.
#[derive(Debug, Clone, Error, Serialize)]
pub enum StoreError {
    /// The engine rejected or could not complete an operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A persisted value could not be encoded or decoded.
    #[error("Store serialization failed: {0}")]
    Serialization(String),
}
