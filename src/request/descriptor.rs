//! Immutable inputs of one logical request

use std::{
    collections::BTreeMap,
    fmt,
    ops::RangeInclusive,
    sync::Arc,
    time::Duration,
};

use base64::{engine::general_purpose, Engine as _};
use http::{header, HeaderMap, HeaderValue, Method};
use serde_json::Value;

use super::validator::ResponseValidator;
use crate::config::Config;

/// Request arguments, kept ordered so the cache key is stable
pub type Arguments = BTreeMap<String, Value>;

/// Rewrites arguments before they feed the cache key
pub type ArgumentFilter = Arc<dyn Fn(&Arguments) -> Arguments + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPriority {
    Low,
    #[default]
    Default,
    High,
}

/// How arguments are encoded into the outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestSerializer {
    #[default]
    Http,
    Json,
}

/// How the response body is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Http,
    Json,
    Xml,
}

/// Accepted HTTP status codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodeSet {
    ranges: Vec<RangeInclusive<u16>>,
}

impl Default for StatusCodeSet {
    fn default() -> Self {
        Self::range(200..=299)
    }
}

impl StatusCodeSet {
    pub fn range(range: RangeInclusive<u16>) -> Self {
        Self {
            ranges: vec![range],
        }
    }

    pub fn codes(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            ranges: codes.into_iter().map(|code| code..=code).collect(),
        }
    }

    pub fn with_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn contains(&self, code: u16) -> bool {
        self.ranges.iter().any(|range| range.contains(&code))
    }
}

/// Cache behaviour attached to a descriptor.
///
/// A request without a policy never touches the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Maximum age in seconds; zero disables writes, negative is invalid
    pub time_seconds: i64,
    /// Bumped by the caller to invalidate every entry written before
    pub version: u64,
    /// Identity of the data owner, e.g. a hash of the user id
    pub sensitive_fingerprint: Option<String>,
    /// Persist on a blocking worker instead of the completion path
    pub write_asynchronously: bool,
    /// Skip the read path but still write on success
    pub ignore_cache: bool,
}

impl CachePolicy {
    pub fn new(time_seconds: i64) -> Self {
        Self {
            time_seconds,
            version: 0,
            sensitive_fingerprint: None,
            write_asynchronously: true,
            ignore_cache: false,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_sensitive_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.sensitive_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_synchronous_write(mut self) -> Self {
        self.write_asynchronously = false;
        self
    }

    pub fn ignoring_cache(mut self) -> Self {
        self.ignore_cache = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    /// `Authorization` header value for these credentials
    pub fn header_value(&self) -> Option<HeaderValue> {
        let encoded =
            general_purpose::STANDARD.encode(format!("{}:{}", self.username, self.password));
        HeaderValue::from_str(&format!("Basic {encoded}")).ok()
    }
}

/// Everything needed to issue one request.
///
/// Built by the caller and frozen once handed to [`Request::new`](super::Request::new),
/// which fills unset fields from the context configuration.
#[derive(Clone, Default)]
pub struct RequestDescriptor {
    pub method: Method,
    pub base_url: Option<String>,
    pub cdn_url: Option<String>,
    pub use_cdn: bool,
    pub path: String,
    pub arguments: Arguments,
    pub headers: HeaderMap,
    pub basic_auth: Option<BasicAuth>,
    pub timeout: Option<Duration>,
    pub priority: RequestPriority,
    pub serializer: RequestSerializer,
    pub response_format: ResponseFormat,
    pub accepted_status: StatusCodeSet,
    pub validator: Option<Arc<dyn ResponseValidator>>,
    pub cache_policy: Option<CachePolicy>,
    pub cache_key_filter: Option<ArgumentFilter>,
    pub tag: i64,
    pub user_info: Option<Value>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn accepted_status(mut self, set: StatusCodeSet) -> Self {
        self.accepted_status = set;
        self
    }

    pub fn validator(mut self, validator: impl ResponseValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    pub fn cache_key_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Arguments) -> Arguments + Send + Sync + 'static,
    {
        self.cache_key_filter = Some(Arc::new(filter));
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn tag(mut self, tag: i64) -> Self {
        self.tag = tag;
        self
    }

    /// Fill unset fields from the configuration.
    ///
    /// Explicit descriptor values win; default headers only fill names the
    /// descriptor does not set. Basic auth becomes an `Authorization` header
    /// unless one is already present.
    pub(crate) fn resolve(mut self, config: &Config) -> Self {
        if self.base_url.is_none() {
            self.base_url = config.base_url.clone();
        }
        if self.cdn_url.is_none() {
            self.cdn_url = config.cdn_url.clone();
        }
        if self.timeout.is_none() {
            self.timeout = Some(config.request_timeout());
        }
        for (name, value) in config.header_map().iter() {
            if !self.headers.contains_key(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }
        if !self.headers.contains_key(header::AUTHORIZATION) {
            if let Some(value) = self.basic_auth.as_ref().and_then(BasicAuth::header_value) {
                self.headers.insert(header::AUTHORIZATION, value);
            }
        }
        self
    }

    /// Base the path is resolved against
    pub fn host(&self) -> &str {
        let host = if self.use_cdn {
            self.cdn_url.as_deref().or(self.base_url.as_deref())
        } else {
            self.base_url.as_deref()
        };
        host.unwrap_or_default()
    }

    /// Absolute URL of the request, `None` when it cannot be built
    pub fn url(&self) -> Option<String> {
        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            return Some(self.path.clone());
        }
        let host = self.host();
        if host.is_empty() {
            return None;
        }
        if self.path.is_empty() {
            return Some(host.to_string());
        }
        Some(format!(
            "{}/{}",
            host.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        ))
    }

    /// Arguments after the cache key filter
    pub fn cache_arguments(&self) -> Arguments {
        match &self.cache_key_filter {
            Some(filter) => filter(&self.arguments),
            None => self.arguments.clone(),
        }
    }

    pub fn timeout_or_default(&self) -> Duration {
        self.timeout
            .unwrap_or(Duration::from_secs(crate::config::DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("base_url", &self.base_url)
            .field("use_cdn", &self.use_cdn)
            .field("path", &self.path)
            .field("arguments", &self.arguments)
            .field("timeout", &self.timeout)
            .field("priority", &self.priority)
            .field("serializer", &self.serializer)
            .field("response_format", &self.response_format)
            .field("cache_policy", &self.cache_policy)
            .field("has_validator", &self.validator.is_some())
            .field("tag", &self.tag)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_status_code_set() {
        let set = StatusCodeSet::default();
        assert!(set.contains(200));
        assert!(set.contains(299));
        assert!(!set.contains(304));

        let set = StatusCodeSet::codes([200, 304]).with_range(400..=401);
        assert!(set.contains(304));
        assert!(set.contains(401));
        assert!(!set.contains(201));
    }

    #[test]
    fn test_url_building() {
        let mut descriptor = RequestDescriptor::get("/v1/items");
        assert_eq!(descriptor.url(), None);

        descriptor.base_url = Some("https://api.example.com/".to_string());
        assert_eq!(
            descriptor.url().as_deref(),
            Some("https://api.example.com/v1/items")
        );

        descriptor.cdn_url = Some("https://cdn.example.com".to_string());
        descriptor.use_cdn = true;
        assert_eq!(
            descriptor.url().as_deref(),
            Some("https://cdn.example.com/v1/items")
        );

        let absolute = RequestDescriptor::get("http://other.example.com/x");
        assert_eq!(absolute.url().as_deref(), Some("http://other.example.com/x"));
    }

    #[test]
    fn test_resolve_against_config() {
        let yaml = r#"
base_url: https://api.example.com
request_timeout_secs: 15
default_headers:
  x-app: reqflow
  accept: application/json
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let descriptor = RequestDescriptor::get("/items")
            .header(header::ACCEPT, HeaderValue::from_static("text/plain"))
            .basic_auth("alice", "secret")
            .resolve(&config);

        assert_eq!(descriptor.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(descriptor.timeout, Some(Duration::from_secs(15)));
        assert_eq!(descriptor.headers.get("x-app").unwrap(), "reqflow");
        assert_eq!(descriptor.headers.get(header::ACCEPT).unwrap(), "text/plain");
        assert_eq!(
            descriptor.headers.get(header::AUTHORIZATION).unwrap(),
            "Basic YWxpY2U6c2VjcmV0"
        );
    }

    #[test]
    fn test_cache_arguments_filter() {
        let descriptor = RequestDescriptor::get("/feed")
            .argument("page", 1)
            .argument("ts", json!(123456))
            .cache_key_filter(|args| {
                let mut args = args.clone();
                args.remove("ts");
                args
            });

        let filtered = descriptor.cache_arguments();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("page"), Some(&json!(1)));
        assert_eq!(descriptor.arguments.len(), 2);
    }
}
