//! Logic for loading configuration in to an object model
pub(crate) mod cors;
mod expansion;
mod schema;

use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub use cors::Cors;
use derivative::Derivative;
use displaydoc::Display;
pub(crate) use expansion::Expansion;
use schemars::JsonSchema;
pub use schema::generate_config_schema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not read configuration file {path}: {error}
    CannotReadConfig {
        path: String,
        error: std::io::Error,
    },
    /// could not expand variable: {key}, {cause}
    CannotExpandVariable { key: String, cause: String },
    /// could not expand variable: {key}. Variables must be prefixed with one of '{supported_modes}' followed by '.' e.g. 'env.'
    UnknownExpansionMode {
        key: String,
        supported_modes: String,
    },
    /// GATEWAY_CONFIG_ENV_PREFIX must be valid unicode
    InvalidExpansionModeConfig,
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
    /// could not deserialize configuration: {0}
    DeserializeConfigError(serde_json::Error),
}

/// The configuration for the gateway.
///
/// Can be created through `serde::Deserialize` from various formats,
/// or inline in Rust code with the builder.
#[derive(Clone, Derivative, Deserialize, Serialize, JsonSchema, Default)]
#[derivative(Debug)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Configuration options pertaining to the http server component.
    pub(crate) server: Server,

    /// Landing page served to browsers on the GraphQL path.
    pub(crate) landing_page: LandingPage,

    /// Health check endpoint.
    pub(crate) health_check: HealthCheck,

    /// Cross origin request headers.
    pub(crate) cors: Cors,

    /// Cross-site request forgery prevention.
    pub(crate) csrf: Csrf,

    /// Bounded in-memory caches.
    pub(crate) cache: Cache,

    /// Graceful shutdown.
    pub(crate) shutdown: Shutdown,

    /// Session resolution.
    pub(crate) session: SessionConfig,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder(visibility = "pub")]
    fn new(
        server: Option<Server>,
        landing_page: Option<LandingPage>,
        health_check: Option<HealthCheck>,
        cors: Option<Cors>,
        csrf: Option<Csrf>,
        cache: Option<Cache>,
        shutdown: Option<Shutdown>,
        session: Option<SessionConfig>,
    ) -> Result<Self, ConfigurationError> {
        Self {
            server: server.unwrap_or_default(),
            landing_page: landing_page.unwrap_or_default(),
            health_check: health_check.unwrap_or_default(),
            cors: cors.unwrap_or_default(),
            csrf: csrf.unwrap_or_default(),
            cache: cache.unwrap_or_default(),
            shutdown: shutdown.unwrap_or_default(),
            session: session.unwrap_or_default(),
        }
        .validate()
    }
}

impl Configuration {
    /// Read, expand and validate a YAML configuration file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| {
            ConfigurationError::CannotReadConfig {
                path: path.display().to_string(),
                error,
            }
        })?;
        raw.parse()
    }

    /// The address the gateway listens on.
    pub fn listen(&self) -> SocketAddr {
        self.server.listen
    }

    /// Override the listen address, usually from the command line.
    pub fn set_listen(&mut self, listen: SocketAddr) {
        self.server.listen = listen;
    }

    pub fn graphql_path(&self) -> &str {
        &self.server.graphql_path
    }

    pub fn drain_deadline(&self) -> Duration {
        self.shutdown.drain_deadline
    }

    /// Checks constraints serde cannot express.
    pub(crate) fn validate(self) -> Result<Self, ConfigurationError> {
        if !self.server.graphql_path.starts_with('/') {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid 'server.graphql_path' configuration",
                error: format!(
                    "'{}' is invalid, it must be an absolute path and start with '/', you should try with '/{}'",
                    self.server.graphql_path, self.server.graphql_path
                ),
            });
        }
        if self.health_check.enabled && !self.health_check.path.starts_with('/') {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid 'health_check.path' configuration",
                error: format!(
                    "'{}' is invalid, it must be an absolute path and start with '/'",
                    self.health_check.path
                ),
            });
        }
        if self.health_check.enabled && self.health_check.path == self.server.graphql_path {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid 'health_check.path' configuration",
                error: format!(
                    "'{}' is already used by the GraphQL endpoint",
                    self.health_check.path
                ),
            });
        }
        self.cors
            .ensure_usable_cors_rules()
            .map_err(|error| ConfigurationError::InvalidConfiguration {
                message: "invalid 'cors' configuration",
                error: error.to_string(),
            })?;
        Ok(self)
    }
}

/// Parse configuration from a string in YAML syntax.
///
/// `${env.NAME}` and `${file.PATH}` references are expanded before deserialization.
impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_yaml_configuration(s, Expansion::from_env()?)
    }
}

pub(crate) fn validate_yaml_configuration(
    raw_yaml: &str,
    expansion: Expansion,
) -> Result<Configuration, ConfigurationError> {
    let defaulted_yaml = if raw_yaml.trim().is_empty() {
        "{}".to_string()
    } else {
        raw_yaml.to_string()
    };

    let yaml: serde_json::Value = serde_yaml::from_str(&defaulted_yaml).map_err(|e| {
        ConfigurationError::InvalidConfiguration {
            message: "failed to parse yaml",
            error: e.to_string(),
        }
    })?;
    // an empty document (comments only) parses as null
    let yaml = if yaml.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        yaml
    };

    let expanded_yaml = expansion.expand(&yaml)?;
    let configuration: Configuration = serde_json::from_value(expanded_yaml)
        .map_err(ConfigurationError::DeserializeConfigError)?;
    configuration.validate()
}

const DEFAULT_GRAPHQL_PATH: &str = "/graphql";
const DEFAULT_HEALTH_CHECK_PATH: &str = "/.well-known/apollo/server-health";
const DEFAULT_MAX_REQUEST_BODY_SIZE: usize = 2_000_000;
const DEFAULT_DOCUMENT_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(512).unwrap();
const DEFAULT_PERSISTED_QUERY_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(512).unwrap();
const DEFAULT_RESPONSE_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(256).unwrap();
const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(30);
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(5);

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

fn default_graphql_path() -> String {
    DEFAULT_GRAPHQL_PATH.to_string()
}

fn default_health_check_path() -> String {
    DEFAULT_HEALTH_CHECK_PATH.to_string()
}

fn default_true() -> bool {
    true
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Server {
    /// The socket address to listen on, defaults to `127.0.0.1:4000`.
    #[schemars(with = "String", default = "default_listen")]
    pub(crate) listen: SocketAddr,

    /// The HTTP path on which GraphQL requests will be served.
    /// Defaults to `/graphql`.
    pub(crate) graphql_path: String,

    /// Allow `__schema` and `__type` introspection queries.
    pub(crate) introspection: bool,

    /// Maximum size of a request body in bytes. Defaults to 2MB.
    pub(crate) max_request_body_size: usize,
}

impl Default for Server {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[buildstructor::buildstructor]
impl Server {
    #[builder(visibility = "pub")]
    fn new(
        listen: Option<SocketAddr>,
        graphql_path: Option<String>,
        introspection: Option<bool>,
        max_request_body_size: Option<usize>,
    ) -> Self {
        Self {
            listen: listen.unwrap_or_else(default_listen),
            graphql_path: graphql_path.unwrap_or_else(default_graphql_path),
            introspection: introspection.unwrap_or(true),
            max_request_body_size: max_request_body_size.unwrap_or(DEFAULT_MAX_REQUEST_BODY_SIZE),
        }
    }
}

/// Landing page configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct LandingPage {
    /// Serve the landing page to browsers that `GET` the GraphQL path. Defaults to true.
    #[serde(default = "default_true")]
    pub(crate) enabled: bool,
}

impl Default for LandingPage {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[buildstructor::buildstructor]
impl LandingPage {
    #[builder(visibility = "pub")]
    fn new(enabled: Option<bool>) -> Self {
        Self {
            enabled: enabled.unwrap_or(true),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct HealthCheck {
    /// Set to false to disable the health check endpoint.
    pub(crate) enabled: bool,

    /// Defaults to `/.well-known/apollo/server-health`.
    pub(crate) path: String,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_health_check_path(),
        }
    }
}

/// CSRF prevention configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Csrf {
    /// The CSRF prevention is enabled by default.
    /// Setting `unsafe_disabled: true` *is not recommended*.
    pub(crate) unsafe_disabled: bool,

    /// Override the headers to check for by setting
    /// custom values for `required_headers`.
    ///
    /// A request that carries any of these headers with a non-empty value is considered
    /// preflighted by the browser.
    pub(crate) required_headers: Vec<String>,
}

impl Default for Csrf {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[buildstructor::buildstructor]
impl Csrf {
    #[builder(visibility = "pub")]
    fn new(unsafe_disabled: Option<bool>, required_headers: Option<Vec<String>>) -> Self {
        Self {
            unsafe_disabled: unsafe_disabled.unwrap_or_default(),
            required_headers: required_headers.unwrap_or_else(|| {
                vec![
                    "x-apollo-operation-name".to_string(),
                    "apollo-require-preflight".to_string(),
                ]
            }),
        }
    }
}

/// A capacity-bounded LRU.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CacheSize {
    /// Number of entries kept before the least recently used one is evicted.
    pub(crate) capacity: NonZeroUsize,
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct ResponseCache {
    /// Cache responses of public queries that carry a positive `maxAge` hint.
    pub(crate) enabled: bool,

    /// Number of responses kept.
    pub(crate) capacity: NonZeroUsize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_RESPONSE_CACHE_CAPACITY,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Cache {
    /// Parsed and validated documents, keyed by query hash.
    pub(crate) documents: CacheSize,

    /// Automatic persisted queries, keyed by the client-provided hash.
    pub(crate) persisted_queries: CacheSize,

    /// Full responses.
    pub(crate) responses: ResponseCache,
}

#[buildstructor::buildstructor]
impl Cache {
    #[builder(visibility = "pub")]
    fn new(
        document_capacity: Option<NonZeroUsize>,
        persisted_query_capacity: Option<NonZeroUsize>,
        responses_enabled: Option<bool>,
        response_capacity: Option<NonZeroUsize>,
    ) -> Self {
        Self {
            documents: CacheSize {
                capacity: document_capacity.unwrap_or(DEFAULT_DOCUMENT_CACHE_CAPACITY),
            },
            persisted_queries: CacheSize {
                capacity: persisted_query_capacity
                    .unwrap_or(DEFAULT_PERSISTED_QUERY_CACHE_CAPACITY),
            },
            responses: ResponseCache {
                enabled: responses_enabled.unwrap_or(true),
                capacity: response_capacity.unwrap_or(DEFAULT_RESPONSE_CACHE_CAPACITY),
            },
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Shutdown {
    /// Hard deadline for draining in-flight operations and closing connections,
    /// in human-readable format; defaults to 30s.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String", default = "default_drain_deadline")]
    pub(crate) drain_deadline: Duration,
}

fn default_drain_deadline() -> Duration {
    DEFAULT_DRAIN_DEADLINE
}

impl Default for Shutdown {
    fn default() -> Self {
        Self {
            drain_deadline: DEFAULT_DRAIN_DEADLINE,
        }
    }
}

#[buildstructor::buildstructor]
impl Shutdown {
    #[builder(visibility = "pub")]
    fn new(drain_deadline: Option<Duration>) -> Self {
        Self {
            drain_deadline: drain_deadline.unwrap_or(DEFAULT_DRAIN_DEADLINE),
        }
    }
}

/// Session resolution configuration.
#[derive(Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct SessionConfig {
    /// Name of the cookie carrying the session token. Defaults to `session`.
    pub(crate) cookie_name: String,

    /// Identity provider endpoint that turns a session cookie into a session.
    /// When unset every request executes anonymously.
    pub(crate) endpoint: Option<Url>,

    /// Maximum time spent resolving a session; defaults to 5s.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String", default = "default_session_timeout")]
    pub(crate) timeout: Duration,

    /// Log resolved sessions at debug level. Sessions are never logged otherwise.
    pub(crate) log_sessions: bool,
}

fn default_session_timeout() -> Duration {
    DEFAULT_SESSION_TIMEOUT
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("cookie_name", &self.cookie_name)
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .field("timeout", &self.timeout)
            .field("log_sessions", &self.log_sessions)
            .finish()
    }
}

#[buildstructor::buildstructor]
impl SessionConfig {
    #[builder(visibility = "pub")]
    fn new(
        cookie_name: Option<String>,
        endpoint: Option<Url>,
        timeout: Option<Duration>,
        log_sessions: Option<bool>,
    ) -> Self {
        Self {
            cookie_name: cookie_name.unwrap_or_else(|| "session".to_string()),
            endpoint,
            timeout: timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT),
            log_sessions: log_sessions.unwrap_or_default(),
        }
    }
}
