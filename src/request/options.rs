//! Request options and the engine-default merge.

use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;

use super::{interceptor::Interceptors, query::Params, race::RaceCondition};

/// Per-call request options.
///
/// Header conversion errors are deferred: the builder records the first one
/// and dispatch rejects with `InvalidOptions`.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub url: String,
    pub method: Method,
    pub base_url: Option<String>,
    pub data: Option<Value>,
    pub header: HeaderMap,
    pub params: Params,
    /// `None`: `key=v`, `Some(true)`: `key[i]=v`, `Some(false)`: `key[]=v`
    pub params_indexes: Option<bool>,
    pub use_multipart_form_data: bool,
    pub interceptors: Interceptors,
    pub race_condition: Option<RaceCondition>,
    pub skip_initialized: bool,
    pub request_id: Option<String>,
    pub timeout: Option<Duration>,
    invalid: Option<String>,
}

impl RequestOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            base_url: None,
            data: None,
            header: HeaderMap::new(),
            params: Params::new(),
            params_indexes: None,
            use_multipart_form_data: false,
            interceptors: Interceptors::default(),
            race_condition: None,
            skip_initialized: false,
            request_id: None,
            timeout: None,
            invalid: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: std::fmt::Display,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: std::fmt::Display,
    {
        match (HeaderName::try_from(key), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.header.insert(name, value);
            }
            (Err(e), _) => self.record_invalid(format!("invalid header name: {e}")),
            (_, Err(e)) => self.record_invalid(format!("invalid header value: {e}")),
        }
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    pub fn params_indexes(mut self, indexes: bool) -> Self {
        self.params_indexes = Some(indexes);
        self
    }

    pub fn multipart(mut self) -> Self {
        self.use_multipart_form_data = true;
        self
    }

    pub fn interceptors(mut self, interceptors: Interceptors) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn race_condition(mut self, race_condition: impl Into<RaceCondition>) -> Self {
        self.race_condition = Some(race_condition.into());
        self
    }

    pub fn skip_initialized(mut self) -> Self {
        self.skip_initialized = true;
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// First deferred builder error, if any
    pub fn take_invalid(&mut self) -> Option<String> {
        self.invalid.take()
    }

    fn record_invalid(&mut self, message: String) {
        if self.invalid.is_none() {
            self.invalid = Some(message);
        }
    }
}

/// Engine-level defaults; replaced wholesale by `RequestEngine::set_config`
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub base_url: Option<String>,
    pub header: HeaderMap,
    pub params: Params,
    /// Deep-merged under the call's `data` when both are JSON objects
    pub data: Option<Value>,
    pub params_indexes: Option<bool>,
    pub interceptors: Interceptors,
    pub race_condition: Option<RaceCondition>,
    pub timeout: Option<Duration>,
}

impl EngineConfig {
    /// Apply call-level options over these defaults.
    ///
    /// Scalars: call wins when set. `header` is merged key-wise; `params`
    /// values and `data` are deep-merged with [`merge_json`], call wins on
    /// conflict. Interceptors and race conditions stay on their own layer and
    /// are never merged.
    pub fn merge(&self, mut call: RequestOptions) -> RequestOptions {
        call.base_url = call.base_url.or_else(|| self.base_url.clone());
        call.params_indexes = call.params_indexes.or(self.params_indexes);
        call.timeout = call.timeout.or(self.timeout);

        call.data = match (self.data.clone(), call.data.take()) {
            (Some(mut base), Some(overlay)) => {
                merge_json(&mut base, overlay);
                Some(base)
            }
            (base, overlay) => overlay.or(base),
        };

        let mut header = self.header.clone();
        for name in call.header.keys() {
            header.remove(name);
        }
        for (name, value) in call.header.iter() {
            header.append(name.clone(), value.clone());
        }
        call.header = header;

        call.params = merge_params(self.params.clone(), std::mem::take(&mut call.params));

        call
    }

    /// Deep-merge `overlay` into a copy of these defaults.
    ///
    /// Set scalars and race condition replace ours; headers replace per name;
    /// `params` and `data` merge like [`merge_json`]. A non-empty interceptor
    /// list replaces the list at that stage.
    pub fn merged(&self, overlay: EngineConfig) -> EngineConfig {
        let mut header = self.header.clone();
        for name in overlay.header.keys() {
            header.remove(name);
        }
        for (name, value) in overlay.header.iter() {
            header.append(name.clone(), value.clone());
        }

        let data = match (self.data.clone(), overlay.data) {
            (Some(mut base), Some(overlay)) => {
                merge_json(&mut base, overlay);
                Some(base)
            }
            (base, overlay) => overlay.or(base),
        };

        EngineConfig {
            base_url: overlay.base_url.or_else(|| self.base_url.clone()),
            header,
            params: merge_params(self.params.clone(), overlay.params),
            data,
            params_indexes: overlay.params_indexes.or(self.params_indexes),
            interceptors: self.interceptors.merged(overlay.interceptors),
            race_condition: overlay.race_condition.or_else(|| self.race_condition.clone()),
            timeout: overlay.timeout.or(self.timeout),
        }
    }
}

fn merge_params(mut base: Params, overlay: Params) -> Params {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => merge_json(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
    base
}

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key-wise and arrays index-wise, so `[1, 2, 3]` under `[7]`
/// gives `[7, 2, 3]`. Anything else is replaced by the overlay.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) => {
            for (index, value) in overlay.into_iter().enumerate() {
                match base.get_mut(index) {
                    Some(existing) => merge_json(existing, value),
                    None => base.push(value),
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_call_values_win() {
        let mut engine = EngineConfig {
            base_url: Some("http://api.test".to_string()),
            params_indexes: Some(false),
            timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        engine.header.insert("x-app", HeaderValue::from_static("demo"));
        engine.header.insert("x-lang", HeaderValue::from_static("en"));
        engine.params.insert("lang".to_string(), json!("en"));
        engine.params.insert("v".to_string(), json!(1));

        let call = RequestOptions::new("/x")
            .header("x-lang", "fr")
            .param("v", 2)
            .param("q", "s")
            .params_indexes(true);
        let merged = engine.merge(call);

        assert_eq!(merged.base_url.as_deref(), Some("http://api.test"));
        assert_eq!(merged.params_indexes, Some(true));
        assert_eq!(merged.timeout, Some(Duration::from_secs(30)));
        assert_eq!(merged.header["x-app"], "demo");
        assert_eq!(merged.header["x-lang"], "fr");
        assert_eq!(merged.header.get_all("x-lang").iter().count(), 1);
        assert_eq!(
            merged.params.iter().collect::<Vec<_>>(),
            vec![
                (&"lang".to_string(), &json!("en")),
                (&"v".to_string(), &json!(2)),
                (&"q".to_string(), &json!("s")),
            ]
        );
    }

    #[test]
    fn test_data_deep_merge() {
        let engine = EngineConfig {
            data: Some(json!({"client": {"os": "ios", "ver": 1}})),
            ..Default::default()
        };
        let merged = engine.merge(
            RequestOptions::new("/x").data(json!({"client": {"ver": 2}, "name": "a"})),
        );
        assert_eq!(
            merged.data,
            Some(json!({"client": {"os": "ios", "ver": 2}, "name": "a"}))
        );

        let merged = engine.merge(RequestOptions::new("/x"));
        assert_eq!(merged.data, engine.data);
    }

    #[test]
    fn test_invalid_header_is_deferred() {
        let mut opts = RequestOptions::new("/x")
            .header("bad header", "v")
            .header("x-ok", "v");
        assert!(opts.header.contains_key("x-ok"));
        assert!(opts.take_invalid().unwrap().contains("header name"));
        assert!(opts.take_invalid().is_none());
    }

    #[test]
    fn test_merge_json() {
        let mut base = json!({"a": {"b": 1, "c": [1]}, "d": 1});
        merge_json(&mut base, json!({"a": {"c": [2], "e": true}, "d": null}));
        assert_eq!(base, json!({"a": {"b": 1, "c": [2], "e": true}, "d": null}));
    }

    #[test]
    fn test_merge_json_arrays_by_index() {
        let mut base = json!([1, 2, 3]);
        merge_json(&mut base, json!([7]));
        assert_eq!(base, json!([7, 2, 3]));

        let mut base = json!({"list": [{"id": 1, "tag": "a"}]});
        merge_json(&mut base, json!({"list": [{"tag": "b"}, {"id": 2}]}));
        assert_eq!(base, json!({"list": [{"id": 1, "tag": "b"}, {"id": 2}]}));
    }

    #[test]
    fn test_params_deep_merge() {
        let mut engine = EngineConfig::default();
        engine.params.insert("a".to_string(), json!([1, 2]));
        engine.params.insert("f".to_string(), json!({"x": 1}));

        let merged = engine.merge(
            RequestOptions::new("/x")
                .param("a", json!([9]))
                .param("f", json!({"y": 2})),
        );
        assert_eq!(merged.params["a"], json!([9, 2]));
        assert_eq!(merged.params["f"], json!({"x": 1, "y": 2}));
    }

    #[test]
    fn test_engine_config_merged() {
        let mut base = EngineConfig {
            base_url: Some("http://a.test".to_string()),
            timeout: Some(Duration::from_secs(5)),
            race_condition: Some(RaceCondition::Enabled(true)),
            data: Some(json!({"client": {"os": "ios"}})),
            ..Default::default()
        };
        base.header.insert("x-app", HeaderValue::from_static("demo"));

        let mut overlay = EngineConfig {
            timeout: Some(Duration::from_secs(9)),
            data: Some(json!({"client": {"ver": 2}})),
            ..Default::default()
        };
        overlay.header.insert("x-app", HeaderValue::from_static("other"));

        let merged = base.merged(overlay);
        assert_eq!(merged.base_url.as_deref(), Some("http://a.test"));
        assert_eq!(merged.timeout, Some(Duration::from_secs(9)));
        assert!(matches!(merged.race_condition, Some(RaceCondition::Enabled(true))));
        assert_eq!(merged.header["x-app"], "other");
        assert_eq!(merged.data, Some(json!({"client": {"os": "ios", "ver": 2}})));
    }
}
