//! Race-condition key resolution.
//!
//! A race-condition key names "at most one live request": a new request with
//! the same key evicts the older one.

use std::{fmt, sync::Arc};

use log::{debug, warn};

use super::options::RequestOptions;

/// Resolvers may return further resolvers; deeper chains are treated as misuse.
const MAX_RESOLVER_DEPTH: usize = 8;

type Resolver = Arc<dyn Fn(&RequestOptions) -> Option<RaceCondition> + Send + Sync>;

/// Raw race-condition setting at the engine or call layer
#[derive(Clone)]
pub enum RaceCondition {
    /// `true` keys on the final resolved URL, `false` disables deduplication
    Enabled(bool),
    /// Used verbatim as the key; an empty key disables deduplication
    Key(String),
    /// Evaluated against the resolved options; `None` falls through
    Resolver(Resolver),
}

impl RaceCondition {
    pub fn resolver<F>(f: F) -> Self
    where
        F: Fn(&RequestOptions) -> Option<RaceCondition> + Send + Sync + 'static,
    {
        RaceCondition::Resolver(Arc::new(f))
    }
}

impl fmt::Debug for RaceCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaceCondition::Enabled(enabled) => f.debug_tuple("Enabled").field(enabled).finish(),
            RaceCondition::Key(key) => f.debug_tuple("Key").field(key).finish(),
            RaceCondition::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl From<bool> for RaceCondition {
    fn from(enabled: bool) -> Self {
        RaceCondition::Enabled(enabled)
    }
}

impl From<&str> for RaceCondition {
    fn from(key: &str) -> Self {
        RaceCondition::Key(key.to_string())
    }
}

impl From<String> for RaceCondition {
    fn from(key: String) -> Self {
        RaceCondition::Key(key)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Evaluation {
    Key(String),
    Disabled,
    /// Nothing decided at this layer
    Undefined,
}

/// Resolve the key for a request: call layer first, engine layer as fallback.
///
/// `options.url` must already be the final URL.
pub fn resolve_race_key(
    call: Option<&RaceCondition>,
    engine: Option<&RaceCondition>,
    options: &RequestOptions,
) -> Option<String> {
    for layer in [call, engine].into_iter().flatten() {
        match evaluate(layer, options, 0) {
            Evaluation::Key(key) => return Some(key),
            Evaluation::Disabled => return None,
            Evaluation::Undefined => continue,
        }
    }
    None
}

fn evaluate(value: &RaceCondition, options: &RequestOptions, depth: usize) -> Evaluation {
    match value {
        RaceCondition::Enabled(true) => Evaluation::Key(options.url.clone()),
        RaceCondition::Enabled(false) => Evaluation::Disabled,
        RaceCondition::Key(key) if key.is_empty() => {
            debug!("Race condition key for {} is empty, not deduplicating", options.url);
            Evaluation::Disabled
        }
        RaceCondition::Key(key) => Evaluation::Key(key.clone()),
        RaceCondition::Resolver(_) if depth >= MAX_RESOLVER_DEPTH => {
            warn!(
                "Race condition resolver for {} nested deeper than {MAX_RESOLVER_DEPTH}, ignoring this layer",
                options.url
            );
            Evaluation::Undefined
        }
        RaceCondition::Resolver(resolve) => match resolve(options) {
            Some(next) => evaluate(&next, options, depth + 1),
            None => Evaluation::Undefined,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(url: &str) -> RequestOptions {
        RequestOptions::new(url)
    }

    #[test]
    fn test_call_false_beats_engine_true() {
        let opts = options("http://api.test/x");
        let call = RaceCondition::Enabled(false);
        let engine = RaceCondition::Enabled(true);
        assert_eq!(resolve_race_key(Some(&call), Some(&engine), &opts), None);
    }

    #[test]
    fn test_undefined_call_falls_through() {
        let opts = options("http://api.test/x");
        let engine = RaceCondition::Enabled(true);
        assert_eq!(
            resolve_race_key(None, Some(&engine), &opts).as_deref(),
            Some("http://api.test/x")
        );

        let call = RaceCondition::resolver(|_| None);
        assert_eq!(
            resolve_race_key(Some(&call), Some(&engine), &opts).as_deref(),
            Some("http://api.test/x")
        );
    }

    #[test]
    fn test_both_undefined_means_no_key() {
        let opts = options("/x");
        assert_eq!(resolve_race_key(None, None, &opts), None);
        let call = RaceCondition::resolver(|_| None);
        assert_eq!(resolve_race_key(Some(&call), None, &opts), None);
    }

    #[test]
    fn test_resolver_is_re_evaluated() {
        let opts = options("/users?page=2");
        let call = RaceCondition::resolver(|opts| {
            let path = opts.url.split('?').next().unwrap_or_default().to_string();
            Some(RaceCondition::resolver(move |_| Some(RaceCondition::Key(path.clone()))))
        });
        assert_eq!(resolve_race_key(Some(&call), None, &opts).as_deref(), Some("/users"));
    }

    #[test]
    fn test_empty_key_disables_without_fallback() {
        let opts = options("/x");
        let engine = RaceCondition::Key("engine".to_string());

        let empty = RaceCondition::Key(String::new());
        assert_eq!(resolve_race_key(Some(&empty), Some(&engine), &opts), None);

        let call = RaceCondition::resolver(|_| Some(RaceCondition::Key(String::new())));
        assert_eq!(resolve_race_key(Some(&call), Some(&engine), &opts), None);

        // an empty engine key disables too
        assert_eq!(resolve_race_key(None, Some(&empty), &opts), None);
    }

    #[test]
    fn test_runaway_resolver_falls_through_to_engine() {
        let opts = options("/x");
        let engine = RaceCondition::Key("engine".to_string());

        fn endless(_: &RequestOptions) -> Option<RaceCondition> {
            Some(RaceCondition::resolver(endless))
        }
        let deep = RaceCondition::resolver(endless);
        assert_eq!(
            resolve_race_key(Some(&deep), Some(&engine), &opts).as_deref(),
            Some("engine")
        );
    }
}
