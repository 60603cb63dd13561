// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!
//! Routing errors are configuration or wiring failures: an unknown port, a port without
//! handlers, a handler reference that cannot be resolved. Failures of a single request are
//! carried inside an [`Envelope`](crate::Envelope) instead, so the only request-level
//! variant here is [`Error::Functional`], raised by handlers and converted to an envelope
//! at the dispatch boundary.
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the routing layer.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Routing to a port name that was never registered.
    #[error("Port '{0}' not found.")]
    PortNotFound(String),
    /// Routing to a registered port that holds no handlers.
    #[error("Port '{0}' has no handlers.")]
    NoHandlers(String),
    /// A port with this name already exists.
    #[error("Port '{0}' already exists.")]
    PortExists(String),
    /// A handler reference could not be resolved.
    #[error("Handler error: {0}")]
    Handler(String),
    /// Failure raised by a handler while processing an envelope.
    #[error("{0}")]
    Functional(String),
    /// A `traceparent` header could not be parsed.
    #[error("Invalid traceparent header: {0}")]
    Traceparent(String),
    /// A pipeline stage failed for reasons unrelated to the handler.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl Error {
    /// Convenience constructor for handler-raised failures.
    pub fn functional(message: impl Into<String>) -> Self {
        Error::Functional(message.into())
    }
}
