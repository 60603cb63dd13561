// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Loopback outbound adapter.
//!
//! Delivers envelopes straight into a port of the local registry, which makes `deliver`
//! usable in tests and in single-process deployments. The target is the adapter's configured
//! port or, when none is configured, the envelope's `port` metadata.
//!

use router::{Envelope, PortRegistry};
use runtime::{
    BAD_REQUEST_STATUS, Error, OutboundAdapter, PORT_METADATA_KEY, error_envelope,
};

use async_trait::async_trait;
use tracing::debug;

use std::sync::atomic::{AtomicBool, Ordering};

/// Outbound adapter routing into a registry port.
pub struct LoopbackOutbound {
    name: String,
    registry: PortRegistry,
    port: Option<String>,
    connected: AtomicBool,
}

impl LoopbackOutbound {
    pub fn new(name: &str, registry: PortRegistry, port: Option<String>) -> Self {
        Self {
            name: name.to_owned(),
            registry,
            port,
            connected: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl OutboundAdapter for LoopbackOutbound {
    async fn connect(&self) -> Result<(), Error> {
        if self.connected.swap(true, Ordering::SeqCst) {
            debug!("Loopback adapter {} is already connected.", self.name);
        } else {
            debug!("Loopback adapter {} connected.", self.name);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            debug!("Loopback adapter {} is not connected.", self.name);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn request(&self, envelope: Envelope) -> Result<Envelope, Error> {
        if !self.is_connected() {
            return Err(Error::Disconnected(self.name.clone()));
        }
        let target = self
            .port
            .clone()
            .or_else(|| envelope.metadata_str(PORT_METADATA_KEY).map(str::to_owned));
        let Some(port) = target else {
            return Ok(Envelope::error(
                BAD_REQUEST_STATUS,
                format!("Loopback adapter '{}' has no target port", self.name),
            )
            .respond_to(&envelope));
        };

        let request = envelope.clone();
        let response = match self.registry.route(&port, envelope).await {
            Ok(mut results) if results.len() == 1 => results.remove(0),
            Ok(results) => serde_json::to_value(&results)
                .map(Envelope::success)
                .map_err(|e| router::Error::Pipeline(e.to_string()))?,
            Err(e) => {
                debug!("Loopback delivery to port {} failed: {}", port, e);
                error_envelope(&e, &request)
            }
        };
        Ok(response.respond_to(&request))
    }
}
