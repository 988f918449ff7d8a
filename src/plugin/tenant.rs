use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::{Validate, ValidationError};

use crate::{
    core::{
        AppBuilder, AppPlugin, AppResult, InitActionError, RequestError, RequestInterceptor,
        RequestResult,
    },
    orchestration::barrier::InitTask,
    request::RequestOptions,
};

use super::parse_config;

pub const PLUGIN_NAME: &str = "tenant";
const PRIORITY: i32 = 2000;

const DEFAULT_HEADER_NAME: &str = "X-Tenant-Id";
const DEFAULT_CACHE_KEY: &str = "tenant_id";

pub fn create_tenant_plugin(cfg: JsonValue) -> AppResult<Arc<dyn AppPlugin>> {
    let config: PluginConfig = parse_config(PLUGIN_NAME, cfg)?;
    Ok(Arc::new(PluginTenant {
        config,
        tenant: Arc::new(ArcSwapOption::empty()),
    }))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
struct PluginConfig {
    /// Used when the cache holds no tenant
    tenant_id: Option<String>,
    #[serde(default = "PluginConfig::default_cache_key")]
    cache_key: String,
    #[serde(default = "PluginConfig::default_header_name")]
    #[validate(custom(function = "PluginConfig::validate_header_name"))]
    header_name: String,
    /// Runs after the token by default
    #[serde(default = "PluginConfig::default_order")]
    order: i32,
}

impl PluginConfig {
    fn default_cache_key() -> String {
        DEFAULT_CACHE_KEY.to_string()
    }

    fn default_header_name() -> String {
        DEFAULT_HEADER_NAME.to_string()
    }

    fn default_order() -> i32 {
        1
    }

    fn validate_header_name(name: &String) -> Result<(), ValidationError> {
        HeaderName::try_from(name.as_str())
            .map(|_| ())
            .map_err(|_| ValidationError::new("invalid header name"))
    }
}

pub struct PluginTenant {
    config: PluginConfig,
    tenant: Arc<ArcSwapOption<String>>,
}

impl AppPlugin for PluginTenant {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    fn install(&self, app: &mut AppBuilder) -> AppResult<()> {
        let cache = app.shared_cache().clone();
        let tenant = self.tenant.clone();
        let cache_key = self.config.cache_key.clone();
        let fallback = self.config.tenant_id.clone();
        app.register_init(
            InitTask::new(move || async move {
                let resolved = match cache.get_str(&cache_key) {
                    Some(id) => id,
                    None => {
                        let id = fallback.ok_or("no tenant id in cache or config")?;
                        cache.set(cache_key.as_str(), JsonValue::String(id.clone()));
                        id
                    }
                };
                log::info!("Tenant resolved: {resolved}");
                tenant.store(Some(Arc::new(resolved)));
                Ok::<(), InitActionError>(())
            })
            .order(self.config.order)
            .name(PLUGIN_NAME),
        )?;

        let header_name = HeaderName::try_from(self.config.header_name.as_str())
            .map_err(|e| crate::config_error!("tenant header name: {e}"))?;
        app.request_interceptor(Arc::new(TenantInterceptor {
            tenant: self.tenant.clone(),
            header_name,
        }));
        Ok(())
    }
}

struct TenantInterceptor {
    tenant: Arc<ArcSwapOption<String>>,
    header_name: HeaderName,
}

#[async_trait]
impl RequestInterceptor for TenantInterceptor {
    async fn on_request(&self, mut options: RequestOptions) -> RequestResult<RequestOptions> {
        if let Some(tenant) = self.tenant.load_full() {
            let value = HeaderValue::try_from(tenant.as_str())
                .map_err(|e| RequestError::interceptor(format!("tenant header: {e}")))?;
            options.header.insert(self.header_name.clone(), value);
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{cache::MemoryCache, config::Config, request::mock::MockTransport};

    async fn tenant_header(cache: Arc<MemoryCache>, cfg: JsonValue) -> Option<String> {
        let app = AppBuilder::new(Config::default())
            .cache(cache)
            .transport(MockTransport::new().shared())
            .plugin(create_tenant_plugin(cfg).unwrap())
            .build()
            .unwrap();
        app.boot().await;
        let data = app
            .request()
            .unwrap()
            .dispatch(RequestOptions::new("http://api.test/a"))
            .await
            .unwrap()
            .data;
        data["header"]["x-tenant-id"].as_str().map(str::to_string)
    }

    #[tokio::test]
    async fn test_cache_wins_over_config() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("tenant_id", json!("from-cache"));
        let header = tenant_header(cache, json!({"tenant_id": "t1"})).await;
        assert_eq!(header.as_deref(), Some("from-cache"));
    }

    #[tokio::test]
    async fn test_config_fallback_is_cached() {
        let cache = Arc::new(MemoryCache::new());
        let header = tenant_header(cache.clone(), json!({"tenant_id": "t1"})).await;
        assert_eq!(header.as_deref(), Some("t1"));
        assert_eq!(cache.get_str("tenant_id").as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_missing_tenant_does_not_block_boot() {
        let header = tenant_header(Arc::new(MemoryCache::new()), json!({})).await;
        assert!(header.is_none());
    }
}
