//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! Every filter has its own section and its own `*_ENABLED` switch. Resource
//! strings (`*_RESOURCE`, `NOVA_INTERACTION_RESOURCES`) use the
//! `METHOD [METHOD...] /path[,...]` syntax and are parsed at startup, so a
//! typo fails the process instead of silently disabling a filter.
//!
//! # Server
//!
//! - `HOST` / `PORT`: listen address (default: `0.0.0.0:9797`)
//! - `UPSTREAM_URL`: Neutron endpoint requests are forwarded to (default: `http://127.0.0.1:9696`)
//! - `UPSTREAM_TIMEOUT_SECS`: per-request upstream timeout (default: 30)
//! - `MAX_REQUEST_BODY_SIZE`: body buffering limit in bytes (default: 10MB)
//! - `RUNTIME_OVERRIDE`: honour `X_WAFFLEHAUS_<FILTER>_ENABLED` request headers (default: false)
//!
//! # Observability
//!
//! - `LOG_FORMAT`: `text` or `json` (default: `text`)
//! - `METRICS_PORT`: Prometheus listener port (default: 9090, 0 = disabled)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::allocation::EmptyPoolPolicy;
use crate::error::ConfigurationError;
use crate::resource::{ResourceConfig, parse_resources};
use crate::utils::parse_bool;

/// Default resource for the default IP policy filter.
pub const DEFAULT_IP_POLICY_RESOURCE: &str = "POST /v2.0/subnets";

/// Default resource for the trusted shared-network filter.
pub const DEFAULT_SHARED_NETWORKS_RESOURCE: &str = "GET /v2.0/networks{.format}";

/// Default resources for the Nova interaction filter.
pub const DEFAULT_NOVA_INTERACTION_RESOURCES: &str =
    "POST /v2.0/ports,PUT DELETE /v2.0/ports/{port_id}";

// =============================================================================
// Enumerated Settings
// =============================================================================

/// How the context filter builds a request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextStrategy {
    /// Attach nothing.
    None,
    /// Build a Neutron-style context from identity headers.
    #[default]
    Neutron,
}

impl FromStr for ContextStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "neutron" => Ok(Self::Neutron),
            other => Err(ConfigurationError::UnknownContextStrategy(other.to_string())),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigurationError::InvalidValue {
                name: "LOG_FORMAT".to_string(),
                reason: format!("expected 'text' or 'json', got '{other}'"),
            }),
        }
    }
}

// =============================================================================
// Filter Sections
// =============================================================================

/// Default IP policy filter (`POST /v2.0/subnets` rewriting).
#[derive(Debug, Clone)]
pub struct IpPolicyConfig {
    pub enabled: bool,
    pub resources: ResourceConfig,
    /// What to forward when requested pools miss the usable range entirely.
    pub empty_pools: EmptyPoolPolicy,
}

/// Last-IP guard.
#[derive(Debug, Clone)]
pub struct LastIpCheckConfig {
    pub enabled: bool,
}

/// Context filter.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub enabled: bool,
    pub strategy: ContextStrategy,
    /// Reject requests without `X_USER_ID` and `X_TENANT_ID` with 403.
    pub require_auth_info: bool,
    /// Roles that make a caller an admin.
    pub admin_roles: Vec<String>,
    /// Role granting advanced-service rights.
    pub advsvc_role: String,
}

/// Trusted shared-network filter.
#[derive(Debug, Clone)]
pub struct SharedNetworksConfig {
    pub enabled: bool,
    pub resources: ResourceConfig,
    /// Network ids that are never hidden unless blacklisted.
    pub trusted: Vec<String>,
    /// Bypass the filter entirely.
    pub testing: bool,
}

/// An outbound service the Nova interaction filter talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub url: String,
    pub port: Option<u16>,
    pub verify_ssl: bool,
}

impl ServiceEndpoint {
    /// `url` with `:port` appended when a port is configured, no trailing slash.
    pub fn base_url(&self) -> String {
        let url = self.url.trim_end_matches('/');
        match self.port {
            Some(port) => format!("{url}:{port}"),
            None => url.to_string(),
        }
    }
}

/// Nova interaction filter.
#[derive(Debug, Clone)]
pub struct NovaInteractionConfig {
    pub enabled: bool,
    pub resources: ResourceConfig,
    pub nova: ServiceEndpoint,
    pub neutron: ServiceEndpoint,
    /// Timeout for each Nova or Neutron callback.
    pub callback_timeout: Duration,
}

// =============================================================================
// Config
// =============================================================================

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 9797)
    pub port: u16,

    /// Neutron endpoint every non-local request is forwarded to
    pub upstream_url: String,

    /// Upper bound on a single upstream round trip
    pub upstream_timeout: Duration,

    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,

    /// Allow per-request `X_WAFFLEHAUS_<FILTER>_ENABLED` overrides
    pub runtime_override: bool,

    // =========================================================================
    // Filters
    // =========================================================================
    pub ip_policy: IpPolicyConfig,
    pub last_ip_check: LastIpCheckConfig,
    pub context: ContextConfig,
    pub shared_networks: SharedNetworksConfig,
    pub nova_interaction: NovaInteractionConfig,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if any value is malformed: a non-numeric
    /// `PORT`, an unparseable resource string, an unknown context strategy.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let config = Self {
            // Server
            host: vars.string("HOST", "0.0.0.0"),
            port: vars.parse("PORT", 9797)?,
            upstream_url: vars.string("UPSTREAM_URL", "http://127.0.0.1:9696"),
            upstream_timeout: Duration::from_secs(vars.parse("UPSTREAM_TIMEOUT_SECS", 30)?),
            max_request_body_size: vars.parse("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?, // 10MB
            runtime_override: vars.flag("RUNTIME_OVERRIDE", false)?,

            ip_policy: IpPolicyConfig {
                enabled: vars.flag("IP_POLICY_ENABLED", true)?,
                resources: vars.resources("IP_POLICY_RESOURCE", DEFAULT_IP_POLICY_RESOURCE)?,
                empty_pools: vars.choice("IP_POLICY_EMPTY_POOLS", EmptyPoolPolicy::Keep)?,
            },

            last_ip_check: LastIpCheckConfig {
                enabled: vars.flag("LAST_IP_CHECK_ENABLED", true)?,
            },

            context: ContextConfig {
                enabled: vars.flag("CONTEXT_ENABLED", true)?,
                strategy: vars.choice("CONTEXT_STRATEGY", ContextStrategy::Neutron)?,
                require_auth_info: vars.flag("CONTEXT_REQUIRE_AUTH_INFO", false)?,
                admin_roles: vars.list("CONTEXT_ADMIN_ROLES", "admin"),
                advsvc_role: vars.string("CONTEXT_ADVSVC_ROLE", "advsvc"),
            },

            shared_networks: SharedNetworksConfig {
                enabled: vars.flag("SHARED_NETWORKS_ENABLED", true)?,
                resources: vars
                    .resources("SHARED_NETWORKS_RESOURCE", DEFAULT_SHARED_NETWORKS_RESOURCE)?,
                trusted: vars.list("SHARED_NETWORKS_TRUSTED", ""),
                testing: vars.flag("SHARED_NETWORKS_TESTING", false)?,
            },

            nova_interaction: NovaInteractionConfig {
                enabled: vars.flag("NOVA_INTERACTION_ENABLED", false)?,
                resources: vars.resources(
                    "NOVA_INTERACTION_RESOURCES",
                    DEFAULT_NOVA_INTERACTION_RESOURCES,
                )?,
                nova: ServiceEndpoint {
                    url: vars.string("NOVA_URL", ""),
                    port: vars.optional("NOVA_PORT")?,
                    verify_ssl: vars.flag("NOVA_VERIFY_SSL", true)?,
                },
                neutron: ServiceEndpoint {
                    url: vars.string("NEUTRON_URL", ""),
                    port: vars.optional("NEUTRON_PORT")?,
                    verify_ssl: vars.flag("NEUTRON_VERIFY_SSL", true)?,
                },
                callback_timeout: Duration::from_secs(vars.parse("CALLBACK_TIMEOUT_SECS", 10)?),
            },

            // Observability
            log_level: vars.string("RUST_LOG", "info"),
            log_format: vars.choice("LOG_FORMAT", LogFormat::Text)?,
            metrics_port: vars.parse("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidValue`] naming the offending variable.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |name: &str, reason: &str| ConfigurationError::InvalidValue {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if self.max_request_body_size == 0 {
            return Err(invalid("MAX_REQUEST_BODY_SIZE", "must be greater than 0"));
        }

        if self.upstream_timeout.is_zero() {
            return Err(invalid("UPSTREAM_TIMEOUT_SECS", "must be greater than 0"));
        }

        if !self.upstream_url.starts_with("http://") && !self.upstream_url.starts_with("https://") {
            return Err(invalid("UPSTREAM_URL", "must start with http:// or https://"));
        }

        if self.context.enabled && self.context.admin_roles.is_empty() {
            return Err(invalid("CONTEXT_ADMIN_ROLES", "must name at least one role"));
        }

        // Callback targets are only required once the filter is switched on
        if self.nova_interaction.enabled {
            if self.nova_interaction.nova.url.is_empty() {
                return Err(invalid("NOVA_URL", "required when NOVA_INTERACTION_ENABLED"));
            }
            if self.nova_interaction.neutron.url.is_empty() {
                return Err(invalid("NEUTRON_URL", "required when NOVA_INTERACTION_ENABLED"));
            }
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }
}

/// Typed accessors over a variable source.
struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    /// Parse a variable into the specified type with a default value.
    fn parse<T>(&self, name: &str, default: T) -> Result<T, ConfigurationError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(val) => val.trim().parse().map_err(|e| ConfigurationError::InvalidValue {
                name: name.to_string(),
                reason: format!("{e}"),
            }),
            None => Ok(default),
        }
    }

    /// Like `parse`, for enumerated settings whose errors already name the problem.
    fn choice<T>(&self, name: &str, default: T) -> Result<T, ConfigurationError>
    where
        T: FromStr<Err = ConfigurationError>,
    {
        self.get(name).map_or(Ok(default), |val| val.parse())
    }

    fn optional<T>(&self, name: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|val| {
                val.trim().parse().map_err(|e| ConfigurationError::InvalidValue {
                    name: name.to_string(),
                    reason: format!("{e}"),
                })
            })
            .transpose()
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool, ConfigurationError> {
        match self.get(name) {
            Some(val) => parse_bool(&val).ok_or_else(|| ConfigurationError::InvalidValue {
                name: name.to_string(),
                reason: format!("'{val}' is not a boolean"),
            }),
            None => Ok(default),
        }
    }

    /// Comma-separated list, trimmed, empties dropped.
    fn list(&self, name: &str, default: &str) -> Vec<String> {
        self.string(name, default)
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn resources(&self, name: &str, default: &str) -> Result<ResourceConfig, ConfigurationError> {
        parse_resources(&self.string(name, default))
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 9797,
            upstream_url: "http://127.0.0.1:9696".to_string(),
            upstream_timeout: Duration::from_secs(30),
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            runtime_override: false,
            // Filters
            ip_policy: IpPolicyConfig {
                enabled: true,
                resources: builtin_resources(DEFAULT_IP_POLICY_RESOURCE),
                empty_pools: EmptyPoolPolicy::Keep,
            },
            last_ip_check: LastIpCheckConfig { enabled: true },
            context: ContextConfig {
                enabled: true,
                strategy: ContextStrategy::Neutron,
                require_auth_info: false,
                admin_roles: vec!["admin".to_string()],
                advsvc_role: "advsvc".to_string(),
            },
            shared_networks: SharedNetworksConfig {
                enabled: true,
                resources: builtin_resources(DEFAULT_SHARED_NETWORKS_RESOURCE),
                trusted: vec![],
                testing: false,
            },
            nova_interaction: NovaInteractionConfig {
                enabled: false,
                resources: builtin_resources(DEFAULT_NOVA_INTERACTION_RESOURCES),
                nova: ServiceEndpoint {
                    url: String::new(),
                    port: None,
                    verify_ssl: true,
                },
                neutron: ServiceEndpoint {
                    url: String::new(),
                    port: None,
                    verify_ssl: true,
                },
                callback_timeout: Duration::from_secs(10),
            },
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 9090,
        }
    }
}

/// Parse one of the compiled-in resource strings, matching nothing on failure.
fn builtin_resources(spec: &str) -> ResourceConfig {
    parse_resources(spec).unwrap_or_else(|_| {
        tracing::error!(spec, "Built-in resource string failed to parse");
        ResourceConfig::default()
    })
}
