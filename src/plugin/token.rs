use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::{
    cache::MemoryCache,
    core::{
        AppBuilder, AppPlugin, AppResult, InitActionError, RequestError, RequestInterceptor,
        RequestResult, ResponseInterceptor,
    },
    orchestration::{
        barrier::InitTask,
        router::{NavigationDecision, NavigationGuard, Route},
    },
    request::{RequestOptions, Response},
};

use super::parse_config;

pub const PLUGIN_NAME: &str = "token";
const PRIORITY: i32 = 2510;

const DEFAULT_CACHE_KEY: &str = "token";
const DEFAULT_SCHEME: &str = "Bearer";

pub fn create_token_plugin(cfg: JsonValue) -> AppResult<Arc<dyn AppPlugin>> {
    let config: PluginConfig = parse_config(PLUGIN_NAME, cfg)?;
    Ok(Arc::new(PluginToken::new(config)))
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PluginConfig {
    /// Cache entry the token is hydrated from and cleared in
    #[serde(default = "PluginConfig::default_cache_key")]
    #[validate(length(min = 1))]
    pub cache_key: String,
    /// Init order on the barrier
    #[serde(default)]
    pub order: i32,
    #[serde(default = "PluginConfig::default_scheme")]
    pub scheme: String,
    /// Pages marked `auth` redirect here while logged out
    pub login_page: Option<String>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            cache_key: Self::default_cache_key(),
            order: 0,
            scheme: Self::default_scheme(),
            login_page: None,
        }
    }
}

impl PluginConfig {
    fn default_cache_key() -> String {
        DEFAULT_CACHE_KEY.to_string()
    }

    fn default_scheme() -> String {
        DEFAULT_SCHEME.to_string()
    }
}

/// The current access token, shared between boot, interceptors and guards.
///
/// Every change is written through to the cache entry it was hydrated from,
/// so a session outlives the app that created it. Reach it with
/// `AppContext::token()`.
pub struct TokenStore {
    token: ArcSwapOption<String>,
    cache: Arc<MemoryCache>,
    cache_key: String,
}

impl TokenStore {
    pub fn new(cache: Arc<MemoryCache>, cache_key: impl Into<String>) -> Self {
        Self {
            token: ArcSwapOption::empty(),
            cache,
            cache_key: cache_key.into(),
        }
    }

    pub fn get(&self) -> Option<Arc<String>> {
        self.token.load_full()
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.load().is_some()
    }

    /// Replace the token and persist it; `None` logs out and drops the
    /// cached entry.
    pub fn update(&self, token: Option<String>) {
        match token {
            Some(token) => {
                self.cache
                    .set(self.cache_key.as_str(), JsonValue::String(token.clone()));
                self.token.store(Some(Arc::new(token)));
                log::debug!("Token updated in cache entry {}", self.cache_key);
            }
            None => {
                self.cache.remove(&self.cache_key);
                self.token.store(None);
                log::info!("Logged out, cache entry {} cleared", self.cache_key);
            }
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        self.update(Some(token.into()))
    }

    pub fn clear(&self) {
        self.update(None)
    }

    /// Load the cached token without writing it back
    fn hydrate(&self) -> bool {
        let token = self.cache.get_str(&self.cache_key);
        let found = token.is_some();
        self.token.store(token.map(Arc::new));
        found
    }
}

/// Hydrates the token at boot and attaches it to every request
pub struct PluginToken {
    config: PluginConfig,
}

impl PluginToken {
    pub fn new(config: PluginConfig) -> Self {
        Self { config }
    }
}

impl AppPlugin for PluginToken {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    fn install(&self, app: &mut AppBuilder) -> AppResult<()> {
        let store = Arc::new(TokenStore::new(
            app.shared_cache().clone(),
            self.config.cache_key.as_str(),
        ));
        app.provide(store.clone());

        let hydrating = store.clone();
        app.register_init(
            InitTask::new(move || async move {
                if hydrating.hydrate() {
                    log::debug!("Token hydrated from cache entry {}", hydrating.cache_key);
                } else {
                    log::debug!("No token in cache entry {}", hydrating.cache_key);
                }
                Ok::<(), InitActionError>(())
            })
            .order(self.config.order)
            .name(PLUGIN_NAME),
        )?;

        app.request_interceptor(Arc::new(AuthorizationInterceptor {
            store: store.clone(),
            scheme: self.config.scheme.clone(),
        }));
        app.response_interceptor(Arc::new(UnauthorizedInterceptor {
            store: store.clone(),
        }));

        if let Some(login_page) = &self.config.login_page {
            app.before_each(Arc::new(LoginGuard {
                store,
                login_page: login_page.clone(),
            }));
        }
        Ok(())
    }
}

struct AuthorizationInterceptor {
    store: Arc<TokenStore>,
    scheme: String,
}

#[async_trait]
impl RequestInterceptor for AuthorizationInterceptor {
    async fn on_request(&self, mut options: RequestOptions) -> RequestResult<RequestOptions> {
        let Some(token) = self.store.get() else {
            return Ok(options);
        };
        if options.header.contains_key(AUTHORIZATION) {
            return Ok(options);
        }

        let value = HeaderValue::try_from(format!("{} {token}", self.scheme))
            .map_err(|e| RequestError::interceptor(format!("authorization header: {e}")))?;
        options.header.insert(AUTHORIZATION, value);
        Ok(options)
    }
}

struct UnauthorizedInterceptor {
    store: Arc<TokenStore>,
}

#[async_trait]
impl ResponseInterceptor for UnauthorizedInterceptor {
    async fn on_response(
        &self,
        response: Response,
        options: &RequestOptions,
    ) -> RequestResult<Response> {
        if response.status == StatusCode::UNAUTHORIZED && self.store.is_logged_in() {
            log::warn!("Token rejected by {}, clearing session", options.url);
            self.store.clear();
        }
        Ok(response)
    }
}

struct LoginGuard {
    store: Arc<TokenStore>,
    login_page: String,
}

#[async_trait]
impl NavigationGuard for LoginGuard {
    async fn before_each(&self, to: &Route, _from: &Route) -> AppResult<NavigationDecision> {
        if to.requires_auth() && !self.store.is_logged_in() {
            let target = format!(
                "{}?redirect={}",
                self.login_page,
                urlencoding::encode(&to.full_path)
            );
            return Ok(NavigationDecision::Redirect(target));
        }
        Ok(NavigationDecision::Next)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        config::{Config, Page},
        request::{mock::MockTransport, TransportResponse},
    };

    fn config() -> Config {
        Config {
            pages: vec![
                Page {
                    path: "/pages/login".to_string(),
                    name: None,
                    auth: false,
                },
                Page {
                    path: "/pages/me".to_string(),
                    name: None,
                    auth: true,
                },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hydrates_and_attaches_token() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("token", json!("t-123"));
        let transport = MockTransport::new().shared();
        let app = AppBuilder::new(Config::default())
            .cache(cache)
            .transport(transport)
            .plugin(create_token_plugin(json!({})).unwrap())
            .build()
            .unwrap();

        app.boot().await;
        let data = app
            .request()
            .unwrap()
            .dispatch(RequestOptions::new("http://api.test/me"))
            .await
            .unwrap()
            .data;
        assert_eq!(data["header"]["authorization"], "Bearer t-123");
    }

    #[tokio::test]
    async fn test_no_token_no_header() {
        let transport = MockTransport::new().shared();
        let app = AppBuilder::new(Config::default())
            .transport(transport)
            .plugin(create_token_plugin(json!({})).unwrap())
            .build()
            .unwrap();

        app.boot().await;
        let data = app
            .request()
            .unwrap()
            .dispatch(RequestOptions::new("http://api.test/me"))
            .await
            .unwrap()
            .data;
        assert!(data["header"].get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_clears_token() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("token", json!("stale"));
        let transport = MockTransport::new()
            .with_reply(|_| Ok(TransportResponse::ok(StatusCode::UNAUTHORIZED, json!({}))))
            .shared();
        let app = AppBuilder::new(Config::default())
            .cache(cache.clone())
            .transport(transport)
            .plugin(Arc::new(PluginToken::new(PluginConfig::default())))
            .build()
            .unwrap();

        app.boot().await;
        let store = app.token().unwrap();
        assert!(store.is_logged_in());
        let response = app
            .request()
            .unwrap()
            .dispatch(RequestOptions::new("http://api.test/me"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert!(!store.is_logged_in());
        assert!(cache.get("token").is_none());
    }

    #[tokio::test]
    async fn test_login_guard_redirects() {
        let plugin = PluginToken::new(PluginConfig {
            login_page: Some("/pages/login".to_string()),
            ..Default::default()
        });
        let app = AppBuilder::new(config())
            .plugin(Arc::new(plugin))
            .build()
            .unwrap();
        app.boot().await;
        let store = app.token().unwrap();

        let route = app.router().navigate("/pages/me").await.unwrap();
        assert_eq!(route.path, "/pages/login");
        assert_eq!(route.query["redirect"], "/pages/me");

        store.set("t");
        let route = app.router().navigate("/pages/me").await.unwrap();
        assert_eq!(route.path, "/pages/me");
    }

    #[tokio::test]
    async fn test_token_update_survives_rebuild() {
        let cache = Arc::new(MemoryCache::new());
        let build = |cache: Arc<MemoryCache>| {
            AppBuilder::new(Config::default())
                .cache(cache)
                .transport(MockTransport::new().shared())
                .plugin(create_token_plugin(json!({"cache_key": "session"})).unwrap())
                .build()
                .unwrap()
        };

        let first = build(cache.clone());
        first.boot().await;
        let store = first.token().unwrap();
        assert!(!store.is_logged_in());
        store.update(Some("fresh".to_string()));
        assert_eq!(cache.get_str("session").as_deref(), Some("fresh"));

        let second = build(cache.clone());
        second.boot().await;
        assert_eq!(second.token().unwrap().get().as_deref().map(String::as_str), Some("fresh"));
        let data = second
            .request()
            .unwrap()
            .dispatch(RequestOptions::new("http://api.test/me"))
            .await
            .unwrap()
            .data;
        assert_eq!(data["header"]["authorization"], "Bearer fresh");

        second.token().unwrap().update(None);
        assert!(cache.get("session").is_none());
        let third = build(cache);
        third.boot().await;
        assert!(!third.token().unwrap().is_logged_in());
    }

    #[tokio::test]
    async fn test_token_absent_without_plugin() {
        let app = AppBuilder::new(Config::default()).build().unwrap();
        assert!(app.token().is_none());
    }
}
