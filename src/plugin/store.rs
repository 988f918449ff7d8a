use std::sync::{Arc, PoisonError, RwLock};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use validator::Validate;

use crate::{
    core::{AppBuilder, AppPlugin, AppResult, ErrorContext},
    request::options::merge_json,
};

use super::parse_config;

pub const PLUGIN_NAME: &str = "store";
const PRIORITY: i32 = 1000;

pub fn create_store_plugin(cfg: JsonValue) -> AppResult<Arc<dyn AppPlugin>> {
    let config: PluginConfig = parse_config(PLUGIN_NAME, cfg)?;
    Ok(Arc::new(PluginStore::new(config.initial_value)))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
struct PluginConfig {
    #[serde(default = "PluginConfig::default_initial_value")]
    initial_value: JsonValue,
}

impl PluginConfig {
    fn default_initial_value() -> JsonValue {
        JsonValue::Object(Default::default())
    }
}

type UpdateHook = Box<dyn Fn(&JsonValue, &JsonValue) + Send + Sync>;

/// App-wide JSON state.
///
/// Hooks run after every change with `(new, old)`; writes that leave the
/// value deep-equal to what it was notify nobody.
pub struct GlobalStore {
    state: watch::Sender<JsonValue>,
    hooks: RwLock<Vec<UpdateHook>>,
}

impl GlobalStore {
    pub fn new(initial_value: JsonValue) -> Self {
        let (state, _) = watch::channel(initial_value);
        Self {
            state,
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Start from a computed value
    pub fn with_initial<F>(init: F) -> Self
    where
        F: FnOnce() -> JsonValue,
    {
        Self::new(init())
    }

    pub fn get(&self) -> JsonValue {
        self.state.borrow().clone()
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_value(self.get()).with_context("store deserialize")
    }

    /// Receiver that wakes on every change
    pub fn subscribe(&self) -> watch::Receiver<JsonValue> {
        self.state.subscribe()
    }

    pub fn on_update<F>(&self, hook: F)
    where
        F: Fn(&JsonValue, &JsonValue) + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Mutate the value in place. Returns whether it changed.
    pub fn update<F>(&self, modify: F) -> bool
    where
        F: FnOnce(&mut JsonValue),
    {
        let mut change = None;
        self.state.send_if_modified(|value| {
            let old = value.clone();
            modify(value);
            if *value == old {
                return false;
            }
            change = Some((value.clone(), old));
            true
        });

        let Some((new, old)) = change else {
            return false;
        };
        log::debug!("Store updated");
        for hook in self.hooks.read().unwrap_or_else(PoisonError::into_inner).iter() {
            hook(&new, &old);
        }
        true
    }

    pub fn set(&self, value: JsonValue) -> bool {
        self.update(|current| *current = value)
    }

    /// Deep-merge `patch` into the current value
    pub fn merge(&self, patch: JsonValue) -> bool {
        self.update(|current| merge_json(current, patch))
    }
}

/// Provides a `GlobalStore` to the app, reachable with `AppContext::store()`
pub struct PluginStore {
    store: Arc<GlobalStore>,
}

impl PluginStore {
    pub fn new(initial_value: JsonValue) -> Self {
        Self {
            store: Arc::new(GlobalStore::new(initial_value)),
        }
    }

    pub fn on_update<F>(self, hook: F) -> Self
    where
        F: Fn(&JsonValue, &JsonValue) + Send + Sync + 'static,
    {
        self.store.on_update(hook);
        self
    }
}

impl AppPlugin for PluginStore {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    fn install(&self, app: &mut AppBuilder) -> AppResult<()> {
        app.provide(self.store.clone());
        Ok(())
    }
}
