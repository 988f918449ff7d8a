use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderName, HeaderValue};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    core::{AppBuilder, AppPlugin, AppResult, RequestError, RequestInterceptor, RequestResult},
    request::RequestOptions,
};

use super::parse_config;

pub const PLUGIN_NAME: &str = "request-id";
const PRIORITY: i32 = 12015;

const DEFAULT_HEADER_NAME: &str = "X-Request-Id";
const ALGORITHM_UUID: &str = "uuid";
const ALGORITHM_RANGE_ID: &str = "range_id";
const DEFAULT_CHAR_SET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Creates a Request ID plugin instance with the given configuration.
pub fn create_request_id_plugin(cfg: JsonValue) -> AppResult<Arc<dyn AppPlugin>> {
    let config: PluginConfig = parse_config(PLUGIN_NAME, cfg)?;
    Ok(Arc::new(PluginRequestID {
        config: Arc::new(config),
    }))
}

/// Configuration for the Request ID plugin.
#[derive(Default, Debug, Serialize, Deserialize, Validate)]
struct PluginConfig {
    #[serde(default = "PluginConfig::default_header_name")]
    #[validate(custom(function = "PluginConfig::validate_header_name"))]
    header_name: String,
    #[serde(default = "PluginConfig::default_algorithm")]
    #[validate(custom(function = "PluginConfig::validate_algorithm"))]
    algorithm: String,
    #[serde(default)]
    range_id: RangeID,
}

impl PluginConfig {
    fn default_header_name() -> String {
        DEFAULT_HEADER_NAME.to_string()
    }

    fn default_algorithm() -> String {
        ALGORITHM_UUID.to_string()
    }

    fn validate_header_name(name: &String) -> Result<(), ValidationError> {
        HeaderName::try_from(name.as_str())
            .map(|_| ())
            .map_err(|_| ValidationError::new("invalid header name"))
    }

    fn validate_algorithm(algorithm: &String) -> Result<(), ValidationError> {
        if algorithm == ALGORITHM_UUID || algorithm == ALGORITHM_RANGE_ID {
            Ok(())
        } else {
            Err(ValidationError::new(
                "algorithm must be either 'uuid' or 'range_id'",
            ))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RangeID {
    #[serde(default = "RangeID::default_char_set")]
    char_set: String,
    #[serde(default = "RangeID::default_length")]
    length: u32,
}

impl Default for RangeID {
    fn default() -> Self {
        Self {
            char_set: Self::default_char_set(),
            length: Self::default_length(),
        }
    }
}

impl RangeID {
    pub fn default_char_set() -> String {
        DEFAULT_CHAR_SET.to_string()
    }

    pub fn default_length() -> u32 {
        16
    }
}

pub struct PluginRequestID {
    config: Arc<PluginConfig>,
}

impl AppPlugin for PluginRequestID {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    fn install(&self, app: &mut AppBuilder) -> AppResult<()> {
        app.request_interceptor(Arc::new(RequestIdInterceptor {
            config: self.config.clone(),
        }));
        Ok(())
    }
}

struct RequestIdInterceptor {
    config: Arc<PluginConfig>,
}

impl RequestIdInterceptor {
    /// The `uuid` algorithm reuses the dispatch id so logs and registry agree
    fn get_request_id(&self, options: &RequestOptions) -> String {
        match self.config.algorithm.as_str() {
            ALGORITHM_RANGE_ID => self.get_range_id(),
            _ => options
                .request_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }

    fn get_range_id(&self) -> String {
        let char_set = if self.config.range_id.char_set.is_empty() {
            DEFAULT_CHAR_SET
        } else {
            &self.config.range_id.char_set
        };
        let chars: Vec<char> = char_set.chars().collect();
        let mut rng = rand::thread_rng();
        (0..self.config.range_id.length)
            .filter_map(|_| chars.choose(&mut rng))
            .collect()
    }
}

#[async_trait]
impl RequestInterceptor for RequestIdInterceptor {
    async fn on_request(&self, mut options: RequestOptions) -> RequestResult<RequestOptions> {
        // a caller-supplied id wins
        if options.header.contains_key(self.config.header_name.as_str()) {
            return Ok(options);
        }

        let name = HeaderName::try_from(self.config.header_name.as_str())
            .map_err(|e| RequestError::interceptor(format!("request id header: {e}")))?;
        let value = HeaderValue::try_from(self.get_request_id(&options))
            .map_err(|e| RequestError::interceptor(format!("request id value: {e}")))?;
        options.header.insert(name, value);
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{config::Config, request::mock::MockTransport};

    async fn dispatch(cfg: JsonValue, options: RequestOptions) -> JsonValue {
        let transport = MockTransport::new().shared();
        let app = AppBuilder::new(Config::default())
            .transport(transport)
            .plugin(create_request_id_plugin(cfg).unwrap())
            .build()
            .unwrap();
        app.boot().await;
        app.request().unwrap().dispatch(options).await.unwrap().data
    }

    #[tokio::test]
    async fn test_uuid_matches_dispatch_id() {
        let data = dispatch(json!({}), RequestOptions::new("http://api.test/a")).await;
        assert_eq!(data["header"]["x-request-id"], data["id"]);
    }

    #[tokio::test]
    async fn test_range_id() {
        let cfg = json!({
            "header_name": "X-Trace",
            "algorithm": "range_id",
            "range_id": {"char_set": "ab", "length": 8}
        });
        let data = dispatch(cfg, RequestOptions::new("http://api.test/a")).await;
        let id = data["header"]["x-trace"].as_str().unwrap();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[tokio::test]
    async fn test_existing_header_kept() {
        let options = RequestOptions::new("http://api.test/a").header("x-request-id", "fixed");
        let data = dispatch(json!({}), options).await;
        assert_eq!(data["header"]["x-request-id"], "fixed");
    }

    #[test]
    fn test_invalid_header_name() {
        assert!(create_request_id_plugin(json!({"header_name": "bad header"})).is_err());
    }
}
