// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Adapter factory
//!
//! Maps symbolic adapter types (the `type` of an adapter block) to constructors. The runtime
//! builds every configured adapter through the factory at start, handing the constructor an
//! [`AdapterContext`] with the block's name and settings plus the registry and dispatcher the
//! adapter may need.
//!

use crate::{Error, adapter::AdapterHandle, dispatcher::Dispatcher};

use router::PortRegistry;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use std::{collections::HashMap, sync::Arc};

/// Everything a constructor gets to build an adapter.
#[derive(Clone)]
pub struct AdapterContext {
    /// Configured adapter name.
    pub name: String,
    pub settings: Map<String, Value>,
    pub registry: PortRegistry,
    pub dispatcher: Dispatcher,
}

impl AdapterContext {
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(Value::as_u64)
    }
}

/// Builds an adapter from its context.
pub type AdapterConstructor =
    Arc<dyn Fn(&AdapterContext) -> Result<AdapterHandle, Error> + Send + Sync + 'static>;

/// Registry of adapter constructors. Clones share the same table.
#[derive(Clone, Default)]
pub struct AdapterFactory {
    constructors: Arc<RwLock<HashMap<String, AdapterConstructor>>>,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor, replacing any previous one for `kind`.
    pub async fn register<F>(&self, kind: &str, constructor: F)
    where
        F: Fn(&AdapterContext) -> Result<AdapterHandle, Error> + Send + Sync + 'static,
    {
        let mut constructors = self.constructors.write().await;
        constructors.insert(kind.to_owned(), Arc::new(constructor));
        debug!("Adapter type {} registered.", kind);
    }

    pub async fn contains(&self, kind: &str) -> bool {
        self.constructors.read().await.contains_key(kind)
    }

    /// Registered adapter types, sorted.
    pub async fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> =
            self.constructors.read().await.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Builds an adapter of type `kind`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownAdapter`] when nothing is registered for `kind`, or whatever the
    /// constructor returns.
    pub async fn create(
        &self,
        kind: &str,
        context: &AdapterContext,
    ) -> Result<AdapterHandle, Error> {
        let constructor = self
            .constructors
            .read()
            .await
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownAdapter(kind.to_owned()))?;
        debug!("Building adapter {} of type {}.", context.name, kind);
        constructor(context)
    }
}
