//! Configuration management for scenariod
//!
//! Values are layered, lowest precedence first:
//! 1. Defaults (the standard three-node memcache topology)
//! 2. Environment variables prefixed with `SCENARIOD_`
//! 3. A `scenariod.yaml` file
//!
//! CLI flags are applied on top by the binary.

use serde::Deserialize;
use std::env;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILENAME: &str = "scenariod.yaml";
const ENV_PREFIX: &str = "SCENARIOD";

/// Unprefixed override for the host the default proxies forward to
pub const UPSTREAM_HOST_ENV: &str = "MEMCACHE_HOST";

/// Default Toxiproxy control API address
pub const DEFAULT_TOXIPROXY_URL: &str = "http://localhost:8474";
/// Default metrics listen address
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9092";
/// Default upstream host (docker network name)
pub const DEFAULT_UPSTREAM_HOST: &str = "memcache1";
/// Default latency added by the latency sweep, in milliseconds
pub const DEFAULT_LATENCY_SWEEP_MS: u64 = 200;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk
    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        /// Path to the configuration file that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML content from a configuration file
    #[error(
        "Invalid YAML syntax in {path}:\n{source}\n\n\
         Hint: Check for proper indentation and YAML formatting"
    )]
    YamlParse {
        /// Path to the configuration file with invalid YAML content
        path: PathBuf,
        /// Underlying YAML parsing error
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value for a specific field
    #[error("Invalid configuration value for '{field}': {value}\n{hint}")]
    InvalidValue {
        /// Name of the offending field
        field: String,
        /// The value that was provided
        value: String,
        /// How to fix it
        hint: String,
    },
}

/// One Toxiproxy proxy to create at startup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyDefinition {
    /// Proxy name, also used as the metrics `server` label
    pub name: String,
    /// Address Toxiproxy listens on
    pub listen: String,
    /// Backend address traffic is forwarded to
    pub upstream: String,
}

impl ProxyDefinition {
    /// Create a proxy definition
    pub fn new(
        name: impl Into<String>,
        listen: impl Into<String>,
        upstream: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            listen: listen.into(),
            upstream: upstream.into(),
        }
    }
}

/// Configuration settings for the scenario controller
#[derive(Debug, Clone)]
pub struct Config {
    /// Toxiproxy control API base URL
    pub toxiproxy_url: String,
    /// Host the default proxies forward to
    pub upstream_host: String,
    /// Proxies created at startup, in order; index 0 is the usual fault target
    pub proxies: Vec<ProxyDefinition>,
    /// Address the metrics endpoint binds to
    pub metrics_addr: String,
    /// Latency added by the latency sweep family
    pub latency_sweep_ms: u64,
    /// Pause between two scenarios of the same pass
    pub pause_between_scenarios: Duration,
    /// Pause between two passes when looping or repeating
    pub pause_between_passes: Duration,
    /// Pause after a live switch before the next scenario starts
    pub switch_pause: Duration,
    /// How long to wait for the control plane at startup
    pub ready_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            toxiproxy_url: DEFAULT_TOXIPROXY_URL.to_string(),
            upstream_host: DEFAULT_UPSTREAM_HOST.to_string(),
            proxies: default_proxies(DEFAULT_UPSTREAM_HOST),
            metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
            latency_sweep_ms: DEFAULT_LATENCY_SWEEP_MS,
            pause_between_scenarios: Duration::from_secs(5),
            pause_between_passes: Duration::from_secs(10),
            switch_pause: Duration::from_millis(500),
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// The standard three-node topology: memcache1..3 on 2121x forwarding to 1121x
pub fn default_proxies(upstream_host: &str) -> Vec<ProxyDefinition> {
    (1..=3)
        .map(|i| {
            ProxyDefinition::new(
                format!("memcache{i}"),
                format!("0.0.0.0:2121{i}"),
                format!("{upstream_host}:1121{i}"),
            )
        })
        .collect()
}

impl Config {
    /// Load configuration from defaults, environment and YAML
    ///
    /// An explicit `path` must exist and parse. Without one, the usual search
    /// locations are tried and a broken discovered file is logged and skipped.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_vars();

        let yaml = match path {
            Some(path) => Some(YamlConfig::load_from_file(path)?),
            None => match Self::find_yaml_config_file() {
                Some(found) => match YamlConfig::load_from_file(&found) {
                    Ok(yaml) => Some(yaml),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to load {:?}, continuing with environment and defaults: {}",
                            found,
                            e
                        );
                        None
                    }
                },
                None => None,
            },
        };

        let explicit_proxies = match yaml {
            Some(yaml) => {
                let explicit = yaml.proxies.is_some();
                yaml.apply_to_config(&mut config);
                explicit
            }
            None => false,
        };
        if !explicit_proxies {
            config.proxies = default_proxies(&config.upstream_host);
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        let loader = EnvLoader::new(ENV_PREFIX);

        self.toxiproxy_url = loader.load_string("TOXIPROXY_URL", &self.toxiproxy_url);
        self.metrics_addr = loader.load_string("METRICS_ADDR", &self.metrics_addr);
        self.latency_sweep_ms = loader.load_parsed("LATENCY_SWEEP_MS", self.latency_sweep_ms);
        self.pause_between_scenarios = Duration::from_secs(loader.load_parsed(
            "PAUSE_BETWEEN_SCENARIOS_SECS",
            self.pause_between_scenarios.as_secs(),
        ));
        self.pause_between_passes = Duration::from_secs(loader.load_parsed(
            "PAUSE_BETWEEN_LOOPS_SECS",
            self.pause_between_passes.as_secs(),
        ));
        self.switch_pause = Duration::from_millis(
            loader.load_parsed("SWITCH_PAUSE_MS", self.switch_pause.as_millis() as u64),
        );
        self.ready_timeout = Duration::from_secs(
            loader.load_parsed("READY_TIMEOUT_SECS", self.ready_timeout.as_secs()),
        );

        if let Ok(host) = env::var(UPSTREAM_HOST_ENV) {
            if !host.is_empty() {
                self.upstream_host = match resolve_host_to_ip(&host) {
                    Some(ip) => {
                        tracing::info!("Resolved {} to {} for toxiproxy upstreams", host, ip);
                        ip
                    }
                    None => {
                        tracing::info!("Could not resolve {}, using as-is", host);
                        host
                    }
                };
            }
        }
    }

    /// Find `scenariod.yaml` in the working directory or the home directory
    pub fn find_yaml_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(CONFIG_FILENAME)];
        if let Some(home_dir) = dirs::home_dir() {
            search_paths.push(home_dir.join(".config").join("scenariod").join(CONFIG_FILENAME));
            search_paths.push(home_dir.join(CONFIG_FILENAME));
        }

        let found = search_paths.into_iter().find(|path| path.is_file());
        match &found {
            Some(path) => tracing::debug!("Found configuration file: {:?}", path),
            None => tracing::debug!("No {} found in any search location", CONFIG_FILENAME),
        }
        found
    }

    /// Validate the current configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.toxiproxy_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "toxiproxy_url".to_string(),
                value: self.toxiproxy_url.clone(),
                hint: "toxiproxy_url cannot be empty, e.g. http://localhost:8474".to_string(),
            });
        }

        if self.proxies.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "proxies".to_string(),
                value: "[]".to_string(),
                hint: "at least one proxy must be configured".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for proxy in &self.proxies {
            if proxy.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "proxies.name".to_string(),
                    value: proxy.name.clone(),
                    hint: "proxy names cannot be empty".to_string(),
                });
            }
            if !seen.insert(proxy.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "proxies.name".to_string(),
                    value: proxy.name.clone(),
                    hint: "proxy names must be unique".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Generate an example YAML configuration file content
    pub fn example_yaml_config() -> &'static str {
        r#"# scenariod.yaml
toxiproxy_url: "http://localhost:8474"
metrics_addr: "0.0.0.0:9092"
latency_sweep_ms: 200
pause_between_scenarios_secs: 5
pause_between_loops_secs: 10
proxies:
  - name: memcache1
    listen: "0.0.0.0:21211"
    upstream: "memcache1:11211"
"#
    }
}

/// Configuration loaded from a `scenariod.yaml` file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    /// Toxiproxy control API base URL
    pub toxiproxy_url: Option<String>,
    /// Host the default proxies forward to
    pub upstream_host: Option<String>,
    /// Explicit proxy topology
    pub proxies: Option<Vec<ProxyDefinition>>,
    /// Metrics listen address
    pub metrics_addr: Option<String>,
    /// Latency sweep amount
    pub latency_sweep_ms: Option<u64>,
    /// Pause between scenarios, seconds
    pub pause_between_scenarios_secs: Option<u64>,
    /// Pause between passes, seconds
    pub pause_between_loops_secs: Option<u64>,
    /// Pause after a live switch, milliseconds
    pub switch_pause_ms: Option<u64>,
    /// Control plane readiness timeout, seconds
    pub ready_timeout_secs: Option<u64>,
}

impl YamlConfig {
    /// Apply YAML values to an existing Config; YAML takes precedence
    pub fn apply_to_config(self, config: &mut Config) {
        if let Some(url) = self.toxiproxy_url {
            config.toxiproxy_url = url;
        }
        if let Some(host) = self.upstream_host {
            config.upstream_host = host;
        }
        if let Some(proxies) = self.proxies {
            config.proxies = proxies;
        }
        if let Some(addr) = self.metrics_addr {
            config.metrics_addr = addr;
        }
        if let Some(ms) = self.latency_sweep_ms {
            config.latency_sweep_ms = ms;
        }
        if let Some(secs) = self.pause_between_scenarios_secs {
            config.pause_between_scenarios = Duration::from_secs(secs);
        }
        if let Some(secs) = self.pause_between_loops_secs {
            config.pause_between_passes = Duration::from_secs(secs);
        }
        if let Some(ms) = self.switch_pause_ms {
            config.switch_pause = Duration::from_millis(ms);
        }
        if let Some(secs) = self.ready_timeout_secs {
            config.ready_timeout = Duration::from_secs(secs);
        }
    }

    /// Load YAML configuration from a file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Loading YAML configuration from: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Loads environment variables sharing a common prefix
#[derive(Debug)]
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Create a new environment loader with the given prefix
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    /// Load a string value with default
    pub fn load_string(&self, suffix: &str, default: &str) -> String {
        env::var(self.key(suffix)).unwrap_or_else(|_| default.to_string())
    }

    /// Load a parsed value, falling back to `default` when unset or unparsable
    pub fn load_parsed<T: FromStr>(&self, suffix: &str, default: T) -> T {
        env::var(self.key(suffix))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

/// Resolve a hostname to an IPv4 address so Docker-hosted proxies can reach it
///
/// Returns the input unchanged when it is already an IP, `None` when
/// resolution fails.
pub fn resolve_host_to_ip(host: &str) -> Option<String> {
    if host.parse::<IpAddr>().is_ok() {
        return Some(host.to_string());
    }

    let addrs: Vec<IpAddr> = (host, 0)
        .to_socket_addrs()
        .ok()?
        .map(|addr| addr.ip())
        .collect();

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .map(|ip| ip.to_string())
}
