// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Local adapters
//!
//! In-process adapters for the switchboard runtime:
//!
//! - [`ChannelInbound`] (type `local`): requests submitted through a [`LocalClient`] are
//!   dispatched to the port named in their metadata.
//! - [`LoopbackOutbound`] (type `loopback`): `deliver` routes straight into a local port.
//!
//! Both types are registered on an [`AdapterFactory`](runtime::AdapterFactory) by
//! [`LocalHub::install`]; the hub then hands out a client for every local adapter the runtime
//! builds.
//!

mod hub;
mod inbound;
mod outbound;

pub use hub::{LOCAL_ADAPTER, LOOPBACK_ADAPTER, LocalHub};
pub use inbound::{ChannelInbound, DEFAULT_CAPACITY, LocalClient};
pub use outbound::LoopbackOutbound;
