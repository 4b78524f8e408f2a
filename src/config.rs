//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{ClassPolicies, PolicyConfig};

/// Prefix for environment variable overrides, e.g. `TURNSTILE__SERVER__LISTEN_ADDR`.
const ENV_PREFIX: &str = "TURNSTILE";
/// Separator between nested keys in environment variable overrides.
const ENV_SEPARATOR: &str = "__";
/// Key whose environment override is split into a list.
const EXCLUDED_PATHS_KEY: &str = "rate_limiting.excluded_paths";

/// Main configuration for the Turnstile gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the gateway listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Base URL of the site admitted requests are forwarded to
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// Upstream request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_url: default_upstream_url(),
            upstream_timeout_secs: default_upstream_timeout(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Take the client identity from `X-Forwarded-For` / `X-Real-IP`.
    ///
    /// Only safe when a trusted edge proxy overwrites those headers. When
    /// disabled the TCP peer address is used instead.
    #[serde(default = "default_trust_proxy_headers")]
    pub trust_proxy_headers: bool,

    /// Path prefix that marks API traffic
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Path prefixes that bypass rate limiting entirely
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,

    /// Policy for API traffic
    #[serde(default = "PolicyConfig::api_default")]
    pub api: PolicyConfig,

    /// Policy for all other traffic
    #[serde(default = "PolicyConfig::general_default")]
    pub general: PolicyConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            trust_proxy_headers: default_trust_proxy_headers(),
            api_prefix: default_api_prefix(),
            excluded_paths: default_excluded_paths(),
            api: PolicyConfig::api_default(),
            general: PolicyConfig::general_default(),
        }
    }
}

fn default_trust_proxy_headers() -> bool {
    true
}

fn default_api_prefix() -> String {
    "/api/".to_string()
}

fn default_excluded_paths() -> Vec<String> {
    ["/_next/static", "/_next/image", "/favicon.ico", "/healthz"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl RateLimitingConfig {
    /// Validate both class policies.
    pub fn policies(&self) -> Result<ClassPolicies> {
        Ok(ClassPolicies {
            api: self.api.try_into()?,
            general: self.general.try_into()?,
        })
    }
}

impl TurnstileConfig {
    /// Load configuration from defaults, an optional YAML file, and
    /// `TURNSTILE__*` environment variables, in increasing precedence.
    ///
    /// `TURNSTILE__RATE_LIMITING__EXCLUDED_PATHS` takes a comma separated list.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_layered(path.map(|path| config::File::from(path).required(true)), ENV_PREFIX)
    }

    fn load_layered<S>(file: Option<S>, env_prefix: &str) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(file) = file {
            builder = builder.add_source(file);
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .list_separator(",")
                    .with_list_parse_key(EXCLUDED_PATHS_KEY)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Check the configuration for values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.policies()?;

        if !self.rate_limiting.api_prefix.starts_with('/') {
            return Err(TurnstileError::Config(format!(
                "api_prefix must start with '/': {}",
                self.rate_limiting.api_prefix
            )));
        }

        if !(self.server.upstream_url.starts_with("http://")
            || self.server.upstream_url.starts_with("https://"))
        {
            return Err(TurnstileError::Config(format!(
                "upstream_url must be an http(s) URL: {}",
                self.server.upstream_url
            )));
        }

        if self.server.upstream_timeout_secs == 0 {
            return Err(TurnstileError::Config(
                "upstream_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat, FileSourceString};
    use tokio_test::{assert_err, assert_ok};

    /// Layer a YAML document over the defaults, reading overrides from
    /// environment variables under `env_prefix`.
    fn parse(yaml: &str, env_prefix: &str) -> Result<TurnstileConfig> {
        TurnstileConfig::load_layered(Some(File::from_str(yaml, FileFormat::Yaml)), env_prefix)
    }

    fn from_env(env_prefix: &str) -> Result<TurnstileConfig> {
        TurnstileConfig::load_layered(None::<File<FileSourceString, FileFormat>>, env_prefix)
    }

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();

        assert_eq!(
            config.server.listen_addr,
            SocketAddr::from(([127, 0, 0, 1], 8080))
        );
        assert_eq!(config.server.upstream_url, "http://127.0.0.1:3000");
        assert!(config.rate_limiting.trust_proxy_headers);
        assert_eq!(config.rate_limiting.api_prefix, "/api/");
        assert!(config
            .rate_limiting
            .excluded_paths
            .contains(&"/healthz".to_string()));

        let policies = assert_ok!(config.rate_limiting.policies());
        assert_eq!(policies, ClassPolicies::default());
        assert_ok!(config.validate());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:9000
rate_limiting:
  api:
    window_ms: 1000
    max_requests: 3
"#;
        let config = parse(yaml, "TURNSTILE_TEST_UNSET").unwrap();

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.server.upstream_timeout_secs, 30);
        assert_eq!(config.rate_limiting.api.window_ms, 1000);
        assert_eq!(config.rate_limiting.api.max_requests, 3);
        assert_eq!(config.rate_limiting.general, PolicyConfig::general_default());
    }

    #[test]
    fn test_parse_empty_yaml_object() {
        let config = parse("{}", "TURNSTILE_TEST_UNSET").unwrap();
        assert_eq!(config.rate_limiting.api, PolicyConfig::api_default());
    }

    #[test]
    fn test_invalid_yaml() {
        let result = parse("server: [not, a, map]", "TURNSTILE_TEST_UNSET");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_zero_policy_fails_validation() {
        let yaml = r#"
rate_limiting:
  general:
    window_ms: 0
    max_requests: 10
"#;
        let config = parse(yaml, "TURNSTILE_TEST_UNSET").unwrap();
        let err = assert_err!(config.validate());
        assert!(matches!(err, TurnstileError::InvalidPolicy(_)));
    }

    #[test]
    fn test_bad_api_prefix_fails_validation() {
        let mut config = TurnstileConfig::default();
        config.rate_limiting.api_prefix = "api/".to_string();
        assert_err!(config.validate());
    }

    #[test]
    fn test_bad_upstream_fails_validation() {
        let mut config = TurnstileConfig::default();
        config.server.upstream_url = "ftp://example.com".to_string();
        assert_err!(config.validate());

        let mut config = TurnstileConfig::default();
        config.server.upstream_timeout_secs = 0;
        assert_err!(config.validate());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "turnstile-config-test-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"
server:
  listen_addr: 127.0.0.1:18080
  upstream_url: http://site.internal:3000
rate_limiting:
  trust_proxy_headers: false
  general:
    window_ms: 60000
    max_requests: 42
"#,
        )
        .unwrap();

        let config = TurnstileConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();
        let config = config.unwrap();

        assert_eq!(config.server.listen_addr.port(), 18080);
        assert_eq!(config.server.upstream_url, "http://site.internal:3000");
        assert!(!config.rate_limiting.trust_proxy_headers);
        assert_eq!(config.rate_limiting.general.max_requests, 42);
        assert_eq!(config.rate_limiting.api, PolicyConfig::api_default());
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("turnstile-does-not-exist.yaml");
        let result = TurnstileConfig::load(Some(&path));
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_partial_policy_in_file() {
        let yaml = r#"
rate_limiting:
  api:
    max_requests: 5
"#;
        let config = parse(yaml, "TURNSTILE_TEST_UNSET").unwrap();

        assert_eq!(config.rate_limiting.api.max_requests, 5);
        assert_eq!(
            config.rate_limiting.api.window_ms,
            PolicyConfig::api_default().window_ms
        );
    }

    #[test]
    fn test_env_overrides_single_policy_field() {
        std::env::set_var("TURNSTILE_TEST_POLICY__RATE_LIMITING__API__MAX_REQUESTS", "7");

        let config = from_env("TURNSTILE_TEST_POLICY").unwrap();

        assert_eq!(config.rate_limiting.api.max_requests, 7);
        assert_eq!(
            config.rate_limiting.api.window_ms,
            PolicyConfig::api_default().window_ms
        );
        assert_eq!(config.rate_limiting.general, PolicyConfig::general_default());
    }

    #[test]
    fn test_env_overrides_excluded_paths() {
        std::env::set_var(
            "TURNSTILE_TEST_PATHS__RATE_LIMITING__EXCLUDED_PATHS",
            "/static,/robots.txt",
        );

        let config = from_env("TURNSTILE_TEST_PATHS").unwrap();

        assert_eq!(
            config.rate_limiting.excluded_paths,
            vec!["/static".to_string(), "/robots.txt".to_string()]
        );
    }

    #[test]
    fn test_env_overrides_file() {
        std::env::set_var("TURNSTILE_TEST_LAYER__SERVER__LISTEN_ADDR", "0.0.0.0:9100");
        std::env::set_var("TURNSTILE_TEST_LAYER__RATE_LIMITING__GENERAL__MAX_REQUESTS", "7");
        let yaml = r#"
server:
  listen_addr: 127.0.0.1:18080
  upstream_url: http://site.internal:3000
rate_limiting:
  general:
    window_ms: 60000
    max_requests: 42
"#;

        let config = parse(yaml, "TURNSTILE_TEST_LAYER").unwrap();

        assert_eq!(config.server.listen_addr.port(), 9100);
        assert_eq!(config.server.upstream_url, "http://site.internal:3000");
        assert_eq!(config.rate_limiting.general.window_ms, 60_000);
        assert_eq!(config.rate_limiting.general.max_requests, 7);
    }
}
