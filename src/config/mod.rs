use std::{collections::HashMap, fs, str::FromStr, time::Duration};

use http::{HeaderMap, HeaderName, HeaderValue};
use log::{debug, trace, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{config_error, core::error::Result};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Base every relative request path is resolved against
    #[validate(url)]
    pub base_url: Option<String>,

    /// Alternate base used by descriptors with `use_cdn`
    #[validate(url)]
    pub cdn_url: Option<String>,

    #[serde(default = "Config::default_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub debug_log_enabled: bool,

    #[serde(default)]
    #[validate(custom(function = "Config::validate_default_headers"))]
    pub default_headers: HashMap<String, String>,

    /// Compared against the version stored with each cache entry
    #[serde(default)]
    pub client_version: String,

    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheConfig,

    #[validate(nested)]
    pub log: Option<Log>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            cdn_url: None,
            request_timeout_secs: Self::default_request_timeout_secs(),
            debug_log_enabled: false,
            default_headers: HashMap::new(),
            client_version: String::new(),
            cache: CacheConfig::default(),
            log: None,
        }
    }
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .map_err(|e| config_error!("Unable to read conf file from {}: {}", path, e))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Default headers as a typed map.
    ///
    /// Entries are validated on load; anything invalid set after that is
    /// skipped with a warning.
    pub fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(self.default_headers.len());
        for (name, value) in &self.default_headers {
            match (HeaderName::from_str(name), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Skipping invalid default header '{name}'"),
            }
        }
        headers
    }

    fn default_request_timeout_secs() -> u64 {
        DEFAULT_REQUEST_TIMEOUT_SECS
    }

    fn validate_default_headers(headers: &HashMap<String, String>) -> Result<(), ValidationError> {
        for (name, value) in headers {
            if HeaderName::from_str(name).is_err() || HeaderValue::from_str(value).is_err() {
                let mut err = ValidationError::new("invalid_default_header");
                err.add_param("name".into(), &name.to_string());
                return Err(err);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
pub struct CacheConfig {
    /// Directory for the file backed store; in-memory when unset
    #[validate(length(min = 1))]
    pub directory: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    #[validate(length(min = 1))]
    pub path: String,

    #[serde(default = "Log::default_level")]
    #[validate(custom(function = "Log::validate_level"))]
    pub level: String,
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }

    fn validate_level(level: &str) -> Result<(), ValidationError> {
        LevelFilter::from_str(level)
            .map(|_| ())
            .map_err(|_| ValidationError::new("invalid_log_level"))
    }

    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.level).unwrap_or(LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn not_a_test_i_cannot_write_yaml_by_hand() {
        init_log();
        let conf = Config::default();
        // cargo test -- --nocapture not_a_test_i_cannot_write_yaml_by_hand
        println!("{}", conf.to_yaml().unwrap());
    }

    #[test]
    fn test_load_file() {
        init_log();
        let conf_str = r#"
---
base_url: https://api.example.com
cdn_url: https://cdn.example.com
request_timeout_secs: 30
debug_log_enabled: true
client_version: "5.2.0"
default_headers:
  x-client: reqflow
cache:
  directory: /tmp/reqflow-cache
log:
  path: /var/log/reqflow.log
  level: warn
        "#;
        let conf = Config::from_yaml(conf_str).unwrap();
        assert_eq!(conf.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(conf.request_timeout(), Duration::from_secs(30));
        assert!(conf.debug_log_enabled);
        assert_eq!(conf.client_version, "5.2.0");
        assert_eq!(conf.cache.directory.as_deref(), Some("/tmp/reqflow-cache"));
        assert_eq!(conf.header_map().get("x-client").unwrap(), "reqflow");

        let log = conf.log.unwrap();
        assert_eq!(log.level_filter(), LevelFilter::Warn);
    }

    #[test]
    fn test_defaults() {
        init_log();
        let conf = Config::from_yaml("base_url: https://api.example.com").unwrap();
        assert_eq!(conf.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert!(!conf.debug_log_enabled);
        assert!(conf.default_headers.is_empty());
        assert!(conf.cache.directory.is_none());
        assert!(conf.log.is_none());
    }

    #[test]
    fn test_load_from_file() {
        init_log();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "request_timeout_secs: 5").unwrap();
        let path = file.path().display().to_string();

        let conf = Config::load_from_yaml(path).unwrap();
        assert_eq!(conf.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_valid_base_url() {
        init_log();
        let conf = Config::from_yaml("base_url: not a url");
        assert!(conf.is_err());
    }

    #[test]
    fn test_valid_request_timeout() {
        init_log();
        let conf = Config::from_yaml("request_timeout_secs: 0");
        assert!(conf.is_err());
    }

    #[test]
    fn test_valid_default_headers() {
        init_log();
        let conf_str = r#"
default_headers:
  "bad header": value
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_valid_log_level() {
        init_log();
        let conf_str = r#"
log:
  path: /tmp/reqflow.log
  level: loud
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }
}
