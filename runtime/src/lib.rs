// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Switchboard runtime
//!
//! Owns protocol adapters and connects them to the routing core.
//!
//! - Adapters implement [`InboundAdapter`] (servers, subscribers) or [`OutboundAdapter`]
//!   (clients, publishers). Blocking implementations are wrapped in [`Blocking`].
//! - An [`AdapterFactory`] builds adapters by type name from the blocks of a
//!   [`RuntimeConfig`].
//! - The [`Dispatcher`] holds one pipeline per port, built from the port's policy (retry,
//!   backpressure, timeout). Inbound adapters receive a clone of it to dispatch requests.
//! - The [`Runtime`] starts and stops the adapters, binds configured ports to handler
//!   references, and exposes `dispatch`/`deliver` plus a signal-aware run loop.
//!
//! ```ignore
//! let registry = PortRegistry::new();
//! let factory = AdapterFactory::new();
//! let config = RuntimeConfig::from_file("switchboard.toml")?;
//! let runtime = Runtime::new(config, registry, factory)?;
//! runtime.start().await?;
//! runtime.run().await?;
//! ```
//!

mod adapter;
mod blocking;
mod config;
mod dispatcher;
mod error;
mod factory;
mod runtime;
mod scheduler;

//
// Adapter contracts
//

pub use adapter::{AdapterHandle, InboundAdapter, OutboundAdapter};

pub use blocking::{Blocking, BlockingInboundAdapter, BlockingOutboundAdapter};

pub use factory::{AdapterConstructor, AdapterContext, AdapterFactory};

//
// Configuration
//

pub use config::{
    AdapterConfig, AdaptersConfig, PortConfig, PortPolicy, RuntimeConfig,
    TimeoutConfig,
};

//
// Dispatch and lifecycle
//

pub use dispatcher::{
    BAD_REQUEST_STATUS, Dispatcher, INTERNAL_ERROR_STATUS, NOT_FOUND_STATUS,
    PORT_METADATA_KEY, TIMEOUT_STATUS, UNAVAILABLE_STATUS, error_envelope,
    status_for,
};

pub use runtime::Runtime;

pub use scheduler::Scheduler;

pub use error::Error;
