//! Configuration loading.
//!
//! `Config::load()` builds a configuration from defaults and the `LISTEN`
//! environment variable. `Config::from_file()` reads a YAML file and then
//! applies the same environment override.

use crate::error::{ProxyError, Result};
use crate::http::parser::MAX_BODY_SIZE;
use crate::proxy::routing::{normalize_target, RotationPolicy, RouteSnapshot};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Listener, dispatch and supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the plain HTTP listener.
    pub listen_addr: String,

    /// Worker processes to supervise; 0 serves in-process.
    pub workers: usize,

    /// Backend connect timeout in seconds.
    pub connect_timeout: u64,

    /// Backend request timeout in seconds.
    pub request_timeout: u64,

    /// Append X-Forwarded-For/Port/Proto to forwarded requests.
    pub xfwd: bool,

    /// Split comma-joined `WWW-Authenticate` values for NTLM backends.
    pub ntlm: bool,

    /// Verify certificates of `https://` backends.
    pub secure: bool,

    /// Largest request or response body buffered, in bytes.
    pub max_body_size: usize,

    /// Cursor behavior when a host gets another target.
    pub rotation: RotationPolicy,

    /// Backoff between worker restarts; immediate restarts when absent.
    pub restart_backoff: Option<BackoffConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN.to_string(),
            workers: 0,
            connect_timeout: 5,
            request_timeout: 30,
            xfwd: true,
            ntlm: false,
            secure: true,
            max_body_size: MAX_BODY_SIZE,
            rotation: RotationPolicy::default(),
            restart_backoff: None,
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

/// Exponential restart backoff for crashed workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first restart of a worker.
    pub initial_ms: u64,

    /// Ceiling for the doubled delay.
    pub max_ms: u64,

    /// A worker up this long has its backoff reset.
    pub healthy_after_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 100,
            max_ms: 30_000,
            healthy_after_secs: 60,
        }
    }
}

/// Secure listener. Certificate and key are PEM files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsConfig {
    pub listen_addr: String,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Targets for one hostname, registered in list order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteConfig {
    pub host: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tls: Option<TlsConfig>,
    pub logging: LoggingConfig,
    pub routes: Vec<RouteConfig>,
}

impl Config {
    /// Defaults plus the `LISTEN` environment override.
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Loads and validates a YAML file, then applies `LISTEN`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ProxyError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Parses and validates YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(contents).map_err(|e| ProxyError::config_parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(listen) = std::env::var("LISTEN") {
            self.server.listen_addr = listen;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.is_empty() {
            return Err(ProxyError::config_validation(
                "Server listen address cannot be empty",
            ));
        }

        if self.server.max_body_size == 0 {
            return Err(ProxyError::config_validation(
                "Server max_body_size must be greater than zero",
            ));
        }

        if let Some(tls) = &self.tls {
            if tls.listen_addr.is_empty() {
                return Err(ProxyError::config_validation(
                    "TLS listen address cannot be empty",
                ));
            }
        }

        for route in &self.routes {
            if route.host.is_empty() {
                return Err(ProxyError::config_validation("Route host cannot be empty"));
            }

            for target in &route.targets {
                url::Url::parse(&normalize_target(target)).map_err(|e| {
                    ProxyError::config_validation(format!(
                        "Invalid target {} for host {}: {}",
                        target, route.host, e
                    ))
                })?;
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ProxyError::config_validation(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        Ok(())
    }

    /// The registration sequence every worker replays at startup.
    pub fn snapshot(&self) -> RouteSnapshot {
        self.routes
            .iter()
            .flat_map(|route| route.targets.iter().map(move |t| (route.host.as_str(), t.as_str())))
            .fold(RouteSnapshot::new(), |snapshot, (host, target)| {
                snapshot.push(host, target)
            })
    }
}
