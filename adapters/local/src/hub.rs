// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Registration of the local adapter types.
//!

use crate::{
    inbound::{ChannelInbound, DEFAULT_CAPACITY, LocalClient},
    outbound::LoopbackOutbound,
};

use runtime::{AdapterContext, AdapterFactory, AdapterHandle, Error};

use tracing::debug;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// Factory key of [`ChannelInbound`].
pub const LOCAL_ADAPTER: &str = "local";
/// Factory key of [`LoopbackOutbound`].
pub const LOOPBACK_ADAPTER: &str = "loopback";

/// Keeps a client for every local inbound adapter built through the factory.
#[derive(Clone, Default)]
pub struct LocalHub {
    clients: Arc<RwLock<HashMap<String, LocalClient>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the `local` and `loopback` adapter types.
    ///
    /// `local` settings: `capacity` (channel size, default 64).
    /// `loopback` settings: `port` (target port, default taken from the envelope).
    pub async fn install(&self, factory: &AdapterFactory) {
        let hub = self.clone();
        factory
            .register(LOCAL_ADAPTER, move |ctx: &AdapterContext| {
                let capacity = match ctx.setting("capacity") {
                    None => DEFAULT_CAPACITY,
                    Some(value) => match value.as_u64() {
                        Some(capacity) if capacity > 0 => capacity as usize,
                        _ => {
                            return Err(Error::Config(format!(
                                "Adapter '{}': capacity must be a positive integer",
                                ctx.name
                            )));
                        }
                    },
                };
                let adapter =
                    ChannelInbound::new(&ctx.name, ctx.dispatcher.clone(), capacity);
                hub.insert(&ctx.name, adapter.client())?;
                Ok(AdapterHandle::inbound(adapter))
            })
            .await;
        factory
            .register(LOOPBACK_ADAPTER, |ctx: &AdapterContext| {
                let port = ctx.setting_str("port").map(str::to_owned);
                Ok(AdapterHandle::outbound(LoopbackOutbound::new(
                    &ctx.name,
                    ctx.registry.clone(),
                    port,
                )))
            })
            .await;
    }

    /// Client of the local adapter named `adapter_name`, once built.
    pub fn client(&self, adapter_name: &str) -> Option<LocalClient> {
        self.clients.read().ok()?.get(adapter_name).cloned()
    }

    fn insert(&self, adapter_name: &str, client: LocalClient) -> Result<(), Error> {
        let mut clients = self.clients.write().map_err(|e| Error::AdapterStart {
            adapter: adapter_name.to_owned(),
            reason: format!("Can not lock local hub: {}", e),
        })?;
        clients.insert(adapter_name.to_owned(), client);
        debug!("Local client for {} registered.", adapter_name);
        Ok(())
    }
}
