pub mod request_id;
pub mod store;
pub mod tenant;
pub mod token;

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::core::{AppError, AppPlugin, AppResult, PluginCreateFn};

/// Global registry mapping plugin names to their factory functions.
///
/// Higher priority values install earlier, so their interceptors sit
/// further out in the engine chain.
static PLUGIN_BUILDER_REGISTRY: Lazy<HashMap<&'static str, PluginCreateFn>> = Lazy::new(|| {
    let arr: Vec<(&str, PluginCreateFn)> = vec![
        (store::PLUGIN_NAME, store::create_store_plugin),    // 1000
        (tenant::PLUGIN_NAME, tenant::create_tenant_plugin), // 2000
        (token::PLUGIN_NAME, token::create_token_plugin),    // 2510
        (
            request_id::PLUGIN_NAME,
            request_id::create_request_id_plugin,
        ), // 12015
    ];
    arr.into_iter().collect()
});

/// Creates a plugin instance from configuration.
///
/// Fails fast for unknown plugin names.
pub fn build_plugin(name: &str, cfg: JsonValue) -> AppResult<Arc<dyn AppPlugin>> {
    let builder = PLUGIN_BUILDER_REGISTRY
        .get(name)
        .ok_or_else(|| AppError::Plugin(format!("Unknown plugin type: {name}")))?;
    builder(cfg)
}

/// Names of every plugin `build_plugin` understands
pub fn plugin_names() -> Vec<&'static str> {
    let mut names: Vec<_> = PLUGIN_BUILDER_REGISTRY.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Deserialize and validate a plugin config. `null` reads as `{}`.
fn parse_config<T>(name: &str, cfg: JsonValue) -> AppResult<T>
where
    T: DeserializeOwned + Validate,
{
    let cfg = if cfg.is_null() {
        JsonValue::Object(Default::default())
    } else {
        cfg
    };
    let config: T = serde_json::from_value(cfg)
        .map_err(|e| AppError::Plugin(format!("Invalid {name} plugin config: {e}")))?;
    config
        .validate()
        .map_err(|e| AppError::Plugin(format!("Invalid {name} plugin config: {e}")))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_build_known_plugins() {
        for name in plugin_names() {
            let plugin = build_plugin(name, JsonValue::Null).unwrap();
            assert_eq!(plugin.name(), name);
        }
    }

    #[test]
    fn test_unknown_plugin() {
        let err = build_plugin("limit-count", json!({})).err().unwrap();
        assert!(matches!(err, AppError::Plugin(_)));
    }

    #[test]
    fn test_invalid_config() {
        let err = build_plugin(request_id::PLUGIN_NAME, json!({"algorithm": "nanoid"}))
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Plugin(_)));
    }
}
