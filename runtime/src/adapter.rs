// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Adapter contracts
//!
//! Protocol adapters plug into the runtime through two traits:
//!
//! - [`InboundAdapter`] accepts wire traffic and dispatches it as envelopes (servers,
//!   subscribers).
//! - [`OutboundAdapter`] sends envelopes to remote services (clients, publishers).
//!
//! Lifecycle methods take `&self`: adapters are shared behind an `Arc` so the runtime can run
//! their lifecycle calls as independent tasks. Both contracts must be idempotent: starting
//! a running adapter, or stopping a stopped one, logs and returns `Ok`.
//!

use crate::Error;

use router::Envelope;

use async_trait::async_trait;

use std::{fmt, sync::Arc};

/// Adapter receiving traffic from the outside world.
#[async_trait]
pub trait InboundAdapter: Send + Sync + 'static {
    /// Begins accepting traffic.
    ///
    /// # Errors
    ///
    /// [`Error::AdapterStart`] when the adapter cannot start.
    async fn start(&self) -> Result<(), Error>;

    /// Stops accepting traffic and waits for the accept loop to exit.
    ///
    /// # Errors
    ///
    /// [`Error::AdapterStop`] when the adapter cannot stop cleanly.
    async fn stop(&self) -> Result<(), Error>;

    fn is_running(&self) -> bool;
}

/// Adapter sending envelopes to a remote service.
#[async_trait]
pub trait OutboundAdapter: Send + Sync + 'static {
    /// # Errors
    ///
    /// [`Error::AdapterConnection`] when the remote cannot be reached.
    async fn connect(&self) -> Result<(), Error>;

    async fn disconnect(&self) -> Result<(), Error>;

    fn is_connected(&self) -> bool;

    /// Sends a request and returns the response.
    ///
    /// Ordinary remote failures come back as error envelopes. An `Err` is reserved for misuse,
    /// such as calling `request` while disconnected.
    async fn request(&self, envelope: Envelope) -> Result<Envelope, Error>;
}

/// A constructed adapter, tagged with its direction.
#[derive(Clone)]
pub enum AdapterHandle {
    Inbound(Arc<dyn InboundAdapter>),
    Outbound(Arc<dyn OutboundAdapter>),
}

impl AdapterHandle {
    pub fn inbound<A: InboundAdapter>(adapter: A) -> Self {
        AdapterHandle::Inbound(Arc::new(adapter))
    }

    pub fn outbound<A: OutboundAdapter>(adapter: A) -> Self {
        AdapterHandle::Outbound(Arc::new(adapter))
    }

    pub fn is_inbound(&self) -> bool {
        matches!(self, AdapterHandle::Inbound(_))
    }
}

impl fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterHandle::Inbound(_) => f.write_str("AdapterHandle::Inbound"),
            AdapterHandle::Outbound(_) => f.write_str("AdapterHandle::Outbound"),
        }
    }
}
