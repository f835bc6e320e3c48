//! Lookup-or-load registry of capability modules.
//!
//! The first [`ModuleRegistry::resolve`] of a name constructs the module
//! through its factory, records it in state and starts it. Concurrent first
//! lookups share one construction. Unavailable modules are remembered as
//! such until [`ModuleRegistry::reload`]. After [`ModuleRegistry::stop_all`]
//! the registry is closed and loads nothing further.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::OnceCell;

use super::{Module, ModuleFactory};
use crate::constants::{MODULES_KEY, PLAYER_KEY};
use crate::context::ModuleContext;
use crate::runtime::panic_message;

type Slot = Arc<OnceCell<Option<Arc<dyn Module>>>>;

/// Owns every loaded module, at most one per name.
pub struct ModuleRegistry {
    ctx: ModuleContext,
    /// Factories in registration order.
    factories: RwLock<Vec<Arc<dyn ModuleFactory>>>,
    /// Load result per name, including negative results.
    slots: DashMap<String, Slot>,
    /// Loaded modules in load order.
    loaded: Mutex<Vec<Arc<dyn Module>>>,
    closed: AtomicBool,
}

impl ModuleRegistry {
    pub fn new(ctx: ModuleContext) -> Self {
        Self {
            ctx,
            factories: RwLock::new(Vec::new()),
            slots: DashMap::new(),
            loaded: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Handles shared with every module.
    pub fn context(&self) -> &ModuleContext {
        &self.ctx
    }

    /// Registers a factory. A later factory with the same name replaces the
    /// earlier one for modules not loaded yet.
    pub fn register(&self, factory: Arc<dyn ModuleFactory>) {
        let name = normalize(factory.name());
        let mut factories = self.factories.write();
        factories.retain(|f| normalize(f.name()) != name);
        factories.push(factory);
    }

    /// Names of all registered factories, in registration order.
    #[must_use]
    pub fn registered_names(&self) -> Vec<String> {
        self.factories
            .read()
            .iter()
            .map(|f| normalize(f.name()))
            .collect()
    }

    /// Returns the module for `name`, loading and starting it on first use.
    pub async fn resolve(&self, name: &str) -> Option<Arc<dyn Module>> {
        let name = normalize(name);
        if name.is_empty() {
            return None;
        }
        if self.is_closed() {
            log::debug!("[ModuleRegistry] Registry closed, not resolving {}", name);
            return None;
        }
        let slot: Slot = self
            .slots
            .entry(name.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        slot.get_or_init(|| self.load(&name)).await.clone()
    }

    /// Returns an already loaded module without attempting a load.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        let name = normalize(name);
        self.slots
            .get(&name)
            .and_then(|slot| slot.get().cloned().flatten())
    }

    /// Resolves every registered factory in registration order.
    pub async fn load_all(&self) -> usize {
        let mut count = 0;
        for name in self.registered_names() {
            if self.resolve(&name).await.is_some() {
                count += 1;
            }
        }
        log::info!("[ModuleRegistry] Loaded {} module(s)", count);
        count
    }

    /// True once [`stop_all`](Self::stop_all) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Names of loaded modules, in load order.
    #[must_use]
    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded.lock().iter().map(|m| m.name().to_string()).collect()
    }

    /// Stops a loaded module, forgets any cached result, and resolves again.
    pub async fn reload(&self, name: &str) -> Option<Arc<dyn Module>> {
        let name = normalize(name);
        if let Some((_, slot)) = self.slots.remove(&name) {
            if let Some(Some(module)) = slot.get() {
                self.unload(module).await;
            }
        }
        log::info!("[ModuleRegistry] Reloading {}", name);
        self.resolve(&name).await
    }

    /// Stops every loaded module in load order, then clears and closes the
    /// registry.
    ///
    /// A failing or panicking stop hook is logged and does not prevent the
    /// remaining modules from stopping.
    pub async fn stop_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let modules: Vec<Arc<dyn Module>> = std::mem::take(&mut *self.loaded.lock());
        for module in &modules {
            stop_module(module.as_ref()).await;
        }
        self.slots.clear();
        self.ctx.state.set(MODULES_KEY, Value::Array(Vec::new()));
        self.ctx
            .state
            .set(&format!("{}.players", PLAYER_KEY), Value::Array(Vec::new()));
        log::info!("[ModuleRegistry] Stopped {} module(s)", modules.len());
    }

    async fn load(&self, name: &str) -> Option<Arc<dyn Module>> {
        if !self.ctx.config.module_enabled(name) {
            log::info!("[ModuleRegistry] Module {} is disabled", name);
            return None;
        }
        let factory = self
            .factories
            .read()
            .iter()
            .find(|f| normalize(f.name()) == name)
            .cloned();
        let Some(factory) = factory else {
            log::debug!("[ModuleRegistry] No module named {}", name);
            return None;
        };

        if self.is_closed() {
            return None;
        }
        let module = match factory.setup(&self.ctx) {
            Ok(module) => module,
            Err(e) => {
                log::warn!("[ModuleRegistry] Module {} not loaded: {}", name, e);
                return None;
            }
        };

        self.ctx.state.append(MODULES_KEY, module.display_name());
        if module.is_player() {
            self.ctx
                .state
                .append(&format!("{}.players", PLAYER_KEY), module.name());
        }
        self.loaded.lock().push(Arc::clone(&module));

        match AssertUnwindSafe(module.start()).catch_unwind().await {
            Ok(Ok(())) => log::info!("[ModuleRegistry] Started {}", module.display_name()),
            Ok(Err(e)) => log::warn!("[ModuleRegistry] Module {} failed to start: {}", name, e),
            Err(panic) => log::error!(
                "[ModuleRegistry] Module {} panicked on start: {}",
                name,
                panic_message(&panic)
            ),
        }
        Some(module)
    }

    async fn unload(&self, module: &Arc<dyn Module>) {
        self.loaded.lock().retain(|m| !Arc::ptr_eq(m, module));
        stop_module(module.as_ref()).await;

        let display_name = module.display_name().to_string();
        remove_from_list(&self.ctx, MODULES_KEY, &display_name);
        if module.is_player() {
            remove_from_list(&self.ctx, &format!("{}.players", PLAYER_KEY), module.name());
        }
    }
}

async fn stop_module(module: &dyn Module) {
    match AssertUnwindSafe(module.stop()).catch_unwind().await {
        Ok(Ok(())) => log::debug!("[ModuleRegistry] Stopped {}", module.name()),
        Ok(Err(e)) => log::warn!("[ModuleRegistry] Failed to stop {}: {}", module.name(), e),
        Err(panic) => log::error!(
            "[ModuleRegistry] Module {} panicked on stop: {}",
            module.name(),
            panic_message(&panic)
        ),
    }
}

fn remove_from_list(ctx: &ModuleContext, path: &str, entry: &str) {
    let remaining: Vec<Value> = ctx
        .state
        .get_str_list(path)
        .into_iter()
        .filter(|item| item != entry)
        .map(Value::String)
        .collect();
    ctx.state.set(path, Value::Array(remaining));
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
