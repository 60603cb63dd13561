// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Handler loader
//!
//! Resolves symbolic handler references into [`HandlerRef`]s.
//!
//! - `"module.path:function"` resolves through the compiled-in module catalog. The module
//!   loader registered under `module.path` is invoked (the "import"), then `function` is
//!   looked up in the module it returned. The split happens at the rightmost colon.
//! - A bare name resolves to the registry port of that name.
//!
//! Successful resolutions are cached by raw reference. Concurrent first resolutions of the
//! same reference elect a single winner; the others wait for its result, so a module loader
//! runs at most once per reference. Failures are not cached.
//!

use crate::{
    Error,
    port::{Handler, HandlerRef},
    registry::PortRegistry,
};

use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error};

use std::{collections::HashMap, sync::Arc};

/// Named handlers exported by a module.
#[derive(Clone, Default)]
pub struct HandlerModule {
    functions: HashMap<String, HandlerRef>,
}

impl HandlerModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exported handler.
    pub fn with_function<H>(mut self, name: &str, handler: H) -> Self
    where
        H: Handler,
    {
        self.functions.insert(name.to_owned(), Arc::new(handler));
        self
    }

    pub fn function(&self, name: &str) -> Option<HandlerRef> {
        self.functions.get(name).cloned()
    }
}

/// Produces a module on import. A returned error is an import failure.
pub type ModuleLoader =
    Arc<dyn Fn() -> Result<HandlerModule, String> + Send + Sync + 'static>;

type Cache = HashMap<String, Arc<OnceCell<HandlerRef>>>;

/// Resolver and cache for handler references.
#[derive(Clone)]
pub struct HandlerLoader {
    registry: PortRegistry,
    modules: Arc<RwLock<HashMap<String, ModuleLoader>>>,
    cache: Arc<Mutex<Cache>>,
}

impl HandlerLoader {
    pub fn new(registry: PortRegistry) -> Self {
        Self {
            registry,
            modules: Arc::new(RwLock::new(HashMap::new())),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a module loader under `module_path`.
    pub async fn register_module<F>(&self, module_path: &str, loader: F)
    where
        F: Fn() -> Result<HandlerModule, String> + Send + Sync + 'static,
    {
        let mut modules = self.modules.write().await;
        modules.insert(module_path.to_owned(), Arc::new(loader));
        debug!("Module {} registered.", module_path);
    }

    /// Resolves a reference, consulting the cache first.
    ///
    /// # Errors
    ///
    /// [`Error::Handler`] when the reference is malformed, names an unknown port, or its
    /// module cannot be imported or lacks the function.
    pub async fn resolve(&self, reference: &str) -> Result<HandlerRef, Error> {
        let cell = {
            let mut cache = self.cache.lock().await;
            cache.entry(reference.to_owned()).or_default().clone()
        };
        let handler = cell.get_or_try_init(|| self.load(reference)).await?;
        Ok(handler.clone())
    }

    /// Resolves a bare port name to a handler routing through that port.
    pub async fn load_from_port(&self, port_name: &str) -> Result<HandlerRef, Error> {
        self.registry.get_handler(port_name).await.map_err(|e| {
            error!("Can not load handler from port {}: {}", port_name, e);
            Error::Handler(e.to_string())
        })
    }

    /// Pre-seeds the cache.
    pub async fn cache_handler(&self, reference: &str, handler: HandlerRef) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            reference.to_owned(),
            Arc::new(OnceCell::new_with(Some(handler))),
        );
    }

    /// Empties the cache. Module registrations are kept.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn load(&self, reference: &str) -> Result<HandlerRef, Error> {
        debug!("Resolving handler reference {}.", reference);
        let Some((module_path, function_name)) = reference.rsplit_once(':') else {
            return self.load_from_port(reference).await;
        };
        if module_path.is_empty() || function_name.is_empty() {
            return Err(Error::Handler(
                "Module path and function name must not be empty".to_owned(),
            ));
        }

        let loader = self
            .modules
            .read()
            .await
            .get(module_path)
            .cloned()
            .ok_or_else(|| {
                Error::Handler(format!(
                    "Failed to import module '{}': no such module",
                    module_path
                ))
            })?;
        let module = loader().map_err(|e| {
            error!("Import of module {} failed: {}", module_path, e);
            Error::Handler(format!(
                "Failed to import module '{}': {}",
                module_path, e
            ))
        })?;
        module.function(function_name).ok_or_else(|| {
            Error::Handler(format!(
                "Module '{}' has no attribute '{}'",
                module_path, function_name
            ))
        })
    }
}
