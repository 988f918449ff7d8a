use std::{collections::HashMap, fs, time::Duration};

use http::{HeaderMap, HeaderName, HeaderValue};
use indexmap::IndexMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use validator::{Validate, ValidationError};

use crate::{
    cache::MemoryCache,
    config_error,
    core::{AppError, AppResult},
    request::{EngineConfig, RaceCondition},
    utils::url::is_absolute_url,
};

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_unique_pages"))]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub log: Log,

    #[serde(default)]
    #[validate(nested)]
    pub request: Request,

    #[serde(default)]
    #[validate(nested)]
    pub pages: Vec<Page>,

    #[serde(default)]
    #[validate(nested)]
    pub cache: Cache,

    #[serde(default)]
    pub plugins: HashMap<String, YamlValue>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> AppResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .map_err(|e| config_error!("Unable to read conf file from {path}: {e}"))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> AppResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)
            .map_err(|e| config_error!("Unable to parse yaml conf: {e}"))?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .map_err(|e| AppError::Validation(format!("Conf file valid failed: {e}")))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> AppResult<String> {
        serde_yaml::to_string(self).map_err(|e| config_error!("Unable to render yaml: {e}"))
    }

    fn validate_unique_pages(&self) -> Result<(), ValidationError> {
        let mut seen = std::collections::HashSet::new();
        for page in &self.pages {
            if !seen.insert(page.path.as_str()) {
                let mut err = ValidationError::new("duplicate_page_path");
                err.add_param("path".into(), &page.path);
                return Err(err);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    #[serde(default = "Log::default_level")]
    #[validate(custom(function = "Log::validate_level"))]
    pub level: String,
    /// Append logs to this file instead of stderr
    pub path: Option<String>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            path: None,
        }
    }
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }

    fn validate_level(level: &String) -> Result<(), ValidationError> {
        level
            .parse::<log::LevelFilter>()
            .map(|_| ())
            .map_err(|_| ValidationError::new("invalid_log_level"))
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Storage key namespacing
#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
pub struct Cache {
    /// Keys are stored as `{prefix}{delimiter}{key}` when set
    #[validate(length(min = 1))]
    pub prefix: Option<String>,
    /// Defaults to `-`
    pub delimiter: Option<String>,
}

impl Cache {
    pub fn build(&self) -> MemoryCache {
        match &self.prefix {
            Some(prefix) => MemoryCache::with_prefix(prefix.as_str(), self.delimiter.as_deref()),
            None => MemoryCache::new(),
        }
    }
}

/// Engine-level request defaults
#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Request::validate_race_condition"))]
pub struct Request {
    #[validate(custom(function = "Request::validate_base_url"))]
    pub base_url: Option<String>,
    pub race_condition: Option<RaceConditionSetting>,
    /// Milliseconds; enforced by the transport
    pub timeout: Option<u64>,
    #[serde(default)]
    pub header: HashMap<String, String>,
    #[serde(default)]
    pub params: IndexMap<String, JsonValue>,
    pub params_indexes: Option<bool>,
    pub data: Option<JsonValue>,
}

impl Request {
    fn validate_base_url(base_url: &String) -> Result<(), ValidationError> {
        if is_absolute_url(base_url) {
            Ok(())
        } else {
            Err(ValidationError::new("base_url_must_be_absolute"))
        }
    }

    fn validate_race_condition(&self) -> Result<(), ValidationError> {
        match &self.race_condition {
            Some(RaceConditionSetting::Key(key)) if key.is_empty() => {
                Err(ValidationError::new("race_condition_key_empty"))
            }
            _ => Ok(()),
        }
    }

    /// Build the engine defaults. Interceptors are added later by plugins.
    pub fn to_engine_config(&self) -> AppResult<EngineConfig> {
        let mut header = HeaderMap::new();
        for (name, value) in &self.header {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| config_error!("invalid header name {name}: {e}"))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| config_error!("invalid header value for {name}: {e}"))?;
            header.insert(name, value);
        }

        Ok(EngineConfig {
            base_url: self.base_url.clone(),
            header,
            params: self.params.clone(),
            data: self.data.clone(),
            params_indexes: self.params_indexes,
            race_condition: self.race_condition.clone().map(Into::into),
            timeout: self.timeout.map(Duration::from_millis),
            ..Default::default()
        })
    }
}

/// `race_condition` as it can be written in YAML: a flag or a fixed key
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RaceConditionSetting {
    Enabled(bool),
    Key(String),
}

impl From<RaceConditionSetting> for RaceCondition {
    fn from(setting: RaceConditionSetting) -> Self {
        match setting {
            RaceConditionSetting::Enabled(enabled) => RaceCondition::Enabled(enabled),
            RaceConditionSetting::Key(key) => RaceCondition::Key(key),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct Page {
    /// matchit pattern, e.g. `/pages/user/{id}`
    #[validate(custom(function = "Page::validate_path"))]
    pub path: String,
    pub name: Option<String>,
    /// Requires a logged-in user
    #[serde(default)]
    pub auth: bool,
}

impl Page {
    fn validate_path(path: &String) -> Result<(), ValidationError> {
        if path.starts_with('/') {
            Ok(())
        } else {
            Err(ValidationError::new("page_path_must_start_with_slash"))
        }
    }
}
