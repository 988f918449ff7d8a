//! Navigation guard
//!
//! Waits for the initialization barrier, resolves `to`/`from` route
//! descriptors against the page table and runs the guard hooks around each
//! navigation.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use matchit::{Match, Router as MatchRouter};

use super::barrier::InitBarrier;
use crate::{
    config::Page,
    core::{AppError, AppResult},
    utils::url::split_url,
};

/// Redirect chains longer than this are rejected
const MAX_REDIRECTS: usize = 8;

/// Page patterns from configuration, matched with matchit
pub struct PageTable {
    router: MatchRouter<Page>,
    len: usize,
}

impl PageTable {
    pub fn new(pages: &[Page]) -> AppResult<Self> {
        let mut router = MatchRouter::new();
        for page in pages {
            router.insert(page.path.clone(), page.clone()).map_err(|e| {
                AppError::Configuration(format!("Failed to insert page {}: {e}", page.path))
            })?;
            log::debug!("Added page: {}", page.path);
        }
        Ok(Self {
            router,
            len: pages.len(),
        })
    }

    /// Match a path, returning the page and extracted parameters
    pub fn resolve(&self, path: &str) -> Option<(Page, BTreeMap<String, String>)> {
        let Match { value, params } = self.router.at(path).ok()?;
        let params = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Some((value.clone(), params))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A resolved navigation endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    pub path: String,
    pub full_path: String,
    pub query: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    /// `None` only for the initial, not-yet-navigated route
    pub page: Option<Page>,
}

impl Route {
    pub fn requires_auth(&self) -> bool {
        self.page.as_ref().is_some_and(|page| page.auth)
    }
}

/// What a `before_each` guard decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Next,
    /// Restart resolution at another path
    Redirect(String),
    Block(String),
}

#[async_trait]
pub trait NavigationGuard: Send + Sync {
    async fn before_each(&self, to: &Route, from: &Route) -> AppResult<NavigationDecision>;
}

#[async_trait]
pub trait AfterNavigation: Send + Sync {
    async fn after_each(&self, to: &Route, from: &Route);
}

struct FnGuard<F>(F);

#[async_trait]
impl<F> NavigationGuard for FnGuard<F>
where
    F: Fn(&Route, &Route) -> AppResult<NavigationDecision> + Send + Sync,
{
    async fn before_each(&self, to: &Route, from: &Route) -> AppResult<NavigationDecision> {
        (self.0)(to, from)
    }
}

struct FnAfter<F>(F);

#[async_trait]
impl<F> AfterNavigation for FnAfter<F>
where
    F: Fn(&Route, &Route) + Send + Sync,
{
    async fn after_each(&self, to: &Route, from: &Route) {
        (self.0)(to, from)
    }
}

/// Wrap a synchronous closure as a `before_each` guard
pub fn guard_fn<F>(f: F) -> Arc<dyn NavigationGuard>
where
    F: Fn(&Route, &Route) -> AppResult<NavigationDecision> + Send + Sync + 'static,
{
    Arc::new(FnGuard(f))
}

/// Wrap a synchronous closure as an `after_each` hook
pub fn after_fn<F>(f: F) -> Arc<dyn AfterNavigation>
where
    F: Fn(&Route, &Route) + Send + Sync + 'static,
{
    Arc::new(FnAfter(f))
}

/// Runs guards around navigations once the app has booted
pub struct RouterGuard {
    barrier: Arc<InitBarrier>,
    pages: PageTable,
    before: Vec<Arc<dyn NavigationGuard>>,
    after: Vec<Arc<dyn AfterNavigation>>,
    current: Mutex<Route>,
}

impl RouterGuard {
    pub fn new(barrier: Arc<InitBarrier>, pages: PageTable) -> Self {
        Self {
            barrier,
            pages,
            before: Vec::new(),
            after: Vec::new(),
            current: Mutex::new(Route::default()),
        }
    }

    /// Guards run in registration order
    pub fn before_each(&mut self, guard: Arc<dyn NavigationGuard>) {
        self.before.push(guard);
    }

    pub fn after_each(&mut self, hook: Arc<dyn AfterNavigation>) {
        self.after.push(hook);
    }

    pub fn current(&self) -> Route {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Parse `target` into a route descriptor without navigating
    pub fn resolve(&self, target: &str) -> AppResult<Route> {
        let (path, query) = split_url(target);
        let (page, params) = self
            .pages
            .resolve(path)
            .ok_or_else(|| AppError::NotFound(format!("page {path}")))?;

        Ok(Route {
            path: path.to_string(),
            full_path: target.to_string(),
            query: query.map(parse_query).unwrap_or_default(),
            params,
            page: Some(page),
        })
    }

    /// Navigate to `target`, honouring every guard.
    ///
    /// Waits for the barrier first. A redirect restarts resolution from the
    /// first guard.
    pub async fn navigate(&self, target: &str) -> AppResult<Route> {
        self.barrier.ready().await;

        let from = self.current();
        let mut target = target.to_string();
        let mut redirects = 0;

        'resolve: loop {
            let to = self.resolve(&target)?;

            for guard in &self.before {
                match guard.before_each(&to, &from).await? {
                    NavigationDecision::Next => {}
                    NavigationDecision::Redirect(path) => {
                        redirects += 1;
                        if redirects > MAX_REDIRECTS {
                            return Err(AppError::Navigation(format!(
                                "too many redirects navigating to {}",
                                to.full_path
                            )));
                        }
                        log::debug!("Navigation to {} redirected to {path}", to.full_path);
                        target = path;
                        continue 'resolve;
                    }
                    NavigationDecision::Block(reason) => {
                        log::info!("Navigation to {} blocked: {reason}", to.full_path);
                        return Err(AppError::Navigation(reason));
                    }
                }
            }

            *self.current.lock().unwrap_or_else(PoisonError::into_inner) = to.clone();
            for hook in &self.after {
                hook.after_each(&to, &from).await;
            }
            return Ok(to);
        }
    }
}

/// Decode `a=1&b=x%20y` into a map; the first occurrence of a key wins
fn parse_query(query: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for item in query.split('&').filter(|item| !item.is_empty()) {
        let (k, v) = item.split_once('=').unwrap_or((item, ""));
        let k = urlencoding::decode(k).map_or_else(|_| k.to_string(), |k| k.into_owned());
        let v = urlencoding::decode(v).map_or_else(|_| v.to_string(), |v| v.into_owned());
        map.entry(k).or_insert(v);
    }
    map
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn page(path: &str, auth: bool) -> Page {
        Page {
            path: path.to_string(),
            name: None,
            auth,
        }
    }

    fn pages() -> PageTable {
        PageTable::new(&[
            page("/pages/index", false),
            page("/pages/login", false),
            page("/pages/user/{id}", true),
        ])
        .unwrap()
    }

    async fn fired() -> Arc<InitBarrier> {
        let barrier = Arc::new(InitBarrier::new());
        barrier.fire().await;
        barrier
    }

    #[test]
    fn test_page_table_conflict() {
        let result = PageTable::new(&[page("/a/{id}", false), page("/a/{name}", false)]);
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_resolve_route() {
        let router = RouterGuard::new(fired().await, pages());
        let route = router.resolve("/pages/user/42?tab=posts&q=a%20b").unwrap();
        assert_eq!(route.path, "/pages/user/42");
        assert_eq!(route.params["id"], "42");
        assert_eq!(route.query["tab"], "posts");
        assert_eq!(route.query["q"], "a b");
        assert!(route.requires_auth());

        assert!(matches!(
            router.resolve("/pages/missing"),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_waits_for_barrier() {
        let barrier = Arc::new(InitBarrier::new());
        let router = Arc::new(RouterGuard::new(barrier.clone(), pages()));

        let nav = {
            let router = router.clone();
            tokio::spawn(async move { router.navigate("/pages/index").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!nav.is_finished());

        barrier.fire().await;
        let route = nav.await.unwrap().unwrap();
        assert_eq!(router.current(), route);
    }

    #[tokio::test]
    async fn test_guards_in_order_with_redirect() {
        let mut router = RouterGuard::new(fired().await, pages());
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let seen = seen.clone();
            router.before_each(guard_fn(move |to, _| {
                seen.lock().unwrap().push(format!("auth:{}", to.path));
                if to.requires_auth() {
                    Ok(NavigationDecision::Redirect("/pages/login?from=user".to_string()))
                } else {
                    Ok(NavigationDecision::Next)
                }
            }));
        }
        {
            let seen = seen.clone();
            router.before_each(guard_fn(move |to, _| {
                seen.lock().unwrap().push(format!("log:{}", to.path));
                Ok(NavigationDecision::Next)
            }));
        }
        {
            let seen = seen.clone();
            router.after_each(after_fn(move |to, from| {
                seen.lock()
                    .unwrap()
                    .push(format!("after:{}<-{}", to.path, from.path));
            }));
        }

        let route = router.navigate("/pages/user/7").await.unwrap();
        assert_eq!(route.path, "/pages/login");
        assert_eq!(route.query["from"], "user");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "auth:/pages/user/7",
                "auth:/pages/login",
                "log:/pages/login",
                "after:/pages/login<-",
            ]
        );
    }

    #[tokio::test]
    async fn test_block_keeps_current_route() {
        let mut router = RouterGuard::new(fired().await, pages());
        router.before_each(guard_fn(|to, _| {
            if to.path == "/pages/login" {
                Ok(NavigationDecision::Block("already logged in".to_string()))
            } else {
                Ok(NavigationDecision::Next)
            }
        }));

        router.navigate("/pages/index").await.unwrap();
        let err = router.navigate("/pages/login").await.unwrap_err();
        assert!(matches!(err, AppError::Navigation(reason) if reason == "already logged in"));
        assert_eq!(router.current().path, "/pages/index");
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let mut router = RouterGuard::new(fired().await, pages());
        router.before_each(guard_fn(|to, _| {
            let next = if to.path == "/pages/index" {
                "/pages/login"
            } else {
                "/pages/index"
            };
            Ok(NavigationDecision::Redirect(next.to_string()))
        }));

        let err = router.navigate("/pages/index").await.unwrap_err();
        assert!(matches!(err, AppError::Navigation(_)));
    }
}
