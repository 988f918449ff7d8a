//! Application container
//!
//! `AppBuilder` collects what plugins contribute (init tasks, engine
//! interceptors, navigation guards) and produces an `AppContext` that owns
//! every shared component. Nothing here is a global singleton.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use once_cell::sync::OnceCell;

use super::{
    error::{AppError, AppResult},
    registry::RequestTaskRegistry,
    traits::{AppPlugin, RequestInterceptor, ResponseInterceptor, Transport},
};
use crate::{
    cache::MemoryCache,
    config::Config,
    orchestration::{
        barrier::{InitBarrier, InitTask},
        router::{AfterNavigation, NavigationGuard, PageTable, RouterGuard},
    },
    plugin::{build_plugin, store::GlobalStore, token::TokenStore},
    request::{EngineConfig, Interceptors, RequestEngine},
};

/// Shared state plugins hand to the app, one value per type
#[derive(Default)]
struct Extensions(HashMap<TypeId, Arc<dyn Any + Send + Sync>>);

impl Extensions {
    fn insert<T: Any + Send + Sync>(&mut self, value: Arc<T>) {
        self.0.insert(TypeId::of::<T>(), value);
    }

    fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }
}

pub struct AppBuilder {
    config: Config,
    barrier: Arc<InitBarrier>,
    registry: Arc<RequestTaskRegistry>,
    cache: Arc<MemoryCache>,
    interceptors: Interceptors,
    guards: Vec<Arc<dyn NavigationGuard>>,
    after_hooks: Vec<Arc<dyn AfterNavigation>>,
    transport: Option<Arc<dyn Transport>>,
    plugins: Vec<Arc<dyn AppPlugin>>,
    extensions: Extensions,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(config.cache.build());
        Self {
            config,
            barrier: Arc::new(InitBarrier::new()),
            registry: Arc::new(RequestTaskRegistry::new()),
            cache,
            interceptors: Interceptors::new(),
            guards: Vec::new(),
            after_hooks: Vec::new(),
            transport: None,
            plugins: Vec::new(),
            extensions: Extensions::default(),
        }
    }

    /// Use `transport` for the request engine
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share an existing cache, e.g. one pre-seeded with a stored session
    pub fn cache(mut self, cache: Arc<MemoryCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Install a plugin alongside those named in the config
    pub fn plugin(mut self, plugin: Arc<dyn AppPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shared_cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    pub fn barrier(&self) -> &Arc<InitBarrier> {
        &self.barrier
    }

    pub fn register_init(&mut self, task: InitTask) -> AppResult<()> {
        self.barrier.register_task(task)
    }

    /// Append an engine-level request interceptor
    pub fn request_interceptor(&mut self, interceptor: Arc<dyn RequestInterceptor>) {
        self.interceptors = std::mem::take(&mut self.interceptors).on_request(interceptor);
    }

    /// Append an engine-level response interceptor
    pub fn response_interceptor(&mut self, interceptor: Arc<dyn ResponseInterceptor>) {
        self.interceptors = std::mem::take(&mut self.interceptors).on_response(interceptor);
    }

    pub fn before_each(&mut self, guard: Arc<dyn NavigationGuard>) {
        self.guards.push(guard);
    }

    pub fn after_each(&mut self, hook: Arc<dyn AfterNavigation>) {
        self.after_hooks.push(hook);
    }

    /// Expose shared state to the built app; a later value of the same type wins
    pub fn provide<T: Any + Send + Sync>(&mut self, value: Arc<T>) {
        self.extensions.insert(value);
    }

    /// Build the configured plugins, install them by descending priority
    /// and assemble the context.
    pub fn build(mut self) -> AppResult<AppContext> {
        let mut plugins = std::mem::take(&mut self.plugins);
        let mut names: Vec<_> = self.config.plugins.keys().cloned().collect();
        names.sort();
        for name in names {
            let cfg = serde_json::to_value(&self.config.plugins[&name]).map_err(|e| {
                AppError::Plugin(format!("Failed to convert {name} plugin config: {e}"))
            })?;
            plugins.push(build_plugin(&name, cfg)?);
        }
        plugins.sort_by(|a, b| b.priority().cmp(&a.priority()));

        for plugin in &plugins {
            log::debug!(
                "Installing plugin {} (priority {})",
                plugin.name(),
                plugin.priority()
            );
            plugin.install(&mut self)?;
        }

        let pages = PageTable::new(&self.config.pages)?;
        let mut router = RouterGuard::new(self.barrier.clone(), pages);
        for guard in self.guards {
            router.before_each(guard);
        }
        for hook in self.after_hooks {
            router.after_each(hook);
        }

        let mut engine_config = self.config.request.to_engine_config()?;
        engine_config.interceptors = self.interceptors;

        log::info!(
            "App built with {} plugin(s), {} init task(s)",
            plugins.len(),
            self.barrier.pending_tasks()
        );

        Ok(AppContext {
            config: self.config,
            barrier: self.barrier,
            registry: self.registry,
            cache: self.cache,
            router: Arc::new(router),
            engine_config,
            transport: self.transport,
            engine: OnceCell::new(),
            plugins,
            extensions: self.extensions,
        })
    }
}

/// Owns the barrier, registry, cache, router and (lazily) the request engine
pub struct AppContext {
    config: Config,
    barrier: Arc<InitBarrier>,
    registry: Arc<RequestTaskRegistry>,
    cache: Arc<MemoryCache>,
    router: Arc<RouterGuard>,
    engine_config: EngineConfig,
    transport: Option<Arc<dyn Transport>>,
    engine: OnceCell<RequestEngine>,
    plugins: Vec<Arc<dyn AppPlugin>>,
    extensions: Extensions,
}

impl AppContext {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn barrier(&self) -> &Arc<InitBarrier> {
        &self.barrier
    }

    pub fn registry(&self) -> &Arc<RequestTaskRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    pub fn router(&self) -> &Arc<RouterGuard> {
        &self.router
    }

    /// The request engine, constructed on first use
    pub fn request(&self) -> AppResult<&RequestEngine> {
        self.engine.get_or_try_init(|| {
            let transport = self.transport.clone().ok_or_else(|| {
                AppError::NotInitialized("request engine has no transport".to_string())
            })?;
            Ok(RequestEngine::new(
                self.engine_config.clone(),
                self.barrier.clone(),
                self.registry.clone(),
                transport,
            ))
        })
    }

    /// State a plugin provided while installing
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extensions.get::<T>()
    }

    /// Session token, when the token plugin is installed
    pub fn token(&self) -> Option<Arc<TokenStore>> {
        self.extension::<TokenStore>()
    }

    /// Global state, when the store plugin is installed
    pub fn store(&self) -> Option<Arc<GlobalStore>> {
        self.extension::<GlobalStore>()
    }

    /// Installed plugin names in install order
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }

    /// Run the init tasks and release waiting requests and navigations
    pub async fn boot(&self) {
        self.barrier.fire().await;
    }
}
