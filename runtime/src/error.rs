// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!
//! Adapter lifecycle and configuration failures. Routing errors are wrapped as
//! [`Error::Router`].
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the runtime.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An inbound adapter could not be built or started.
    #[error("Can't start adapter '{adapter}': {reason}")]
    AdapterStart { adapter: String, reason: String },
    /// An inbound adapter could not be stopped.
    #[error("Can't stop adapter '{adapter}': {reason}")]
    AdapterStop { adapter: String, reason: String },
    /// An outbound adapter could not be built or connected.
    #[error("Can't connect adapter '{adapter}': {reason}")]
    AdapterConnection { adapter: String, reason: String },
    /// No constructor is registered for this adapter type.
    #[error("Unknown adapter type '{0}'.")]
    UnknownAdapter(String),
    /// The adapter was configured as inbound but is not inbound-capable.
    #[error("Adapter '{0}' is not an inbound adapter.")]
    NotInbound(String),
    /// The adapter was used as outbound but is not outbound-capable.
    #[error("Adapter '{0}' is not an outbound adapter.")]
    NotOutbound(String),
    /// The adapter is not running or not connected.
    #[error("Adapter '{0}' is not running.")]
    Disconnected(String),
    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),
    /// The runtime must be started first.
    #[error("Runtime not started.")]
    NotStarted,
    /// A lifecycle task could not be scheduled or panicked.
    #[error("Scheduler error: {0}")]
    Scheduler(String),
    /// Routing error.
    #[error(transparent)]
    Router(#[from] router::Error),
}
