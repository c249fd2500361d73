/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ALLOWED_ORIGINS, DEFAULT_CERT_PATH, DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_KEY_PATH,
    DEFAULT_LISTEN_ADDR, DEFAULT_MAX_CONCURRENT_STREAMS, DEFAULT_MAX_IDLE_TIMEOUT, DEFAULT_PATH,
};
use crate::errors::ConfigError;

/// WebTransport echo server
///
/// Echoes datagrams and bidirectional streams back in uppercase, and greets
/// every session on a server-initiated bidi and uni stream.
#[derive(Parser, Debug, Clone, Default)]
#[clap(name = "webtransport_echo_server")]
pub struct Opt {
    /// YAML file with the full server configuration. Flags override it.
    #[clap(long = "config", env = "ECHO_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[clap(long = "listen", env = "LISTEN_ADDR")]
    pub listen: Option<SocketAddr>,

    /// TLS certificate chain (PEM or DER).
    #[clap(long = "cert", env = "CERT_PATH")]
    pub cert: Option<PathBuf>,

    /// TLS private key (PEM or DER).
    #[clap(long = "key", env = "KEY_PATH")]
    pub key: Option<PathBuf>,

    /// Only session requests for this path are accepted.
    #[clap(long = "path", env = "ECHO_PATH")]
    pub path: Option<String>,

    /// Origins admitted by the gate (host[:port]); "" admits requests without
    /// an origin. The QUIC listener cannot read the Origin header, so there
    /// every request is origin-less: the list must contain "" and other
    /// entries are not enforced.
    #[clap(long = "allowed-origin", env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Option<Vec<String>>,

    #[clap(long = "keep-alive", env = "KEEP_ALIVE")]
    pub keep_alive: Option<bool>,

    #[clap(long = "keep-alive-interval-ms", env = "KEEP_ALIVE_INTERVAL_MS")]
    pub keep_alive_interval_ms: Option<u64>,

    #[clap(long = "max-idle-timeout-ms", env = "MAX_IDLE_TIMEOUT_MS")]
    pub max_idle_timeout_ms: Option<u64>,

    #[clap(long = "max-concurrent-streams", env = "MAX_CONCURRENT_STREAMS")]
    pub max_concurrent_streams: Option<u32>,

    /// Default log filter when RUST_LOG is unset.
    #[clap(long = "log-level", env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EchoConfig {
    pub listen: SocketAddr,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub path: String,
    pub allowed_origins: Vec<String>,
    pub keep_alive: bool,
    pub keep_alive_interval_ms: u64,
    pub max_idle_timeout_ms: u64,
    pub max_concurrent_streams: u32,
    pub log_level: String,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 4433))),
            cert: PathBuf::from(DEFAULT_CERT_PATH),
            key: PathBuf::from(DEFAULT_KEY_PATH),
            path: DEFAULT_PATH.to_string(),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect(),
            keep_alive: true,
            keep_alive_interval_ms: DEFAULT_KEEP_ALIVE_INTERVAL.as_millis() as u64,
            max_idle_timeout_ms: DEFAULT_MAX_IDLE_TIMEOUT.as_millis() as u64,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            log_level: "info".to_string(),
        }
    }
}

impl EchoConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Config file first (if any), then every flag or env var that was set.
    pub fn load(opt: &Opt) -> Result<Self, ConfigError> {
        let mut config = match &opt.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(opt);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, opt: &Opt) {
        if let Some(listen) = opt.listen {
            self.listen = listen;
        }
        if let Some(cert) = &opt.cert {
            self.cert = cert.clone();
        }
        if let Some(key) = &opt.key {
            self.key = key.clone();
        }
        if let Some(path) = &opt.path {
            self.path = path.clone();
        }
        if let Some(origins) = &opt.allowed_origins {
            self.allowed_origins = origins.clone();
        }
        if let Some(keep_alive) = opt.keep_alive {
            self.keep_alive = keep_alive;
        }
        if let Some(interval) = opt.keep_alive_interval_ms {
            self.keep_alive_interval_ms = interval;
        }
        if let Some(timeout) = opt.max_idle_timeout_ms {
            self.max_idle_timeout_ms = timeout;
        }
        if let Some(streams) = opt.max_concurrent_streams {
            self.max_concurrent_streams = streams;
        }
        if let Some(level) = &opt.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if self.max_idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "max_idle_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.keep_alive && self.keep_alive_interval_ms >= self.max_idle_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "keep_alive_interval_ms ({}) must be below max_idle_timeout_ms ({})",
                self.keep_alive_interval_ms, self.max_idle_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn keep_alive_interval(&self) -> Option<Duration> {
        self.keep_alive
            .then(|| Duration::from_millis(self.keep_alive_interval_ms))
    }

    pub fn max_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.max_idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EchoConfig::default();
        config.validate().unwrap();
        assert_eq!(config.listen.port(), 4433);
        assert_eq!(config.path, "/counter");
        assert!(config.allowed_origins.contains(&String::new()));
        assert_eq!(config.max_idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.keep_alive_interval(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_yaml_fills_missing_fields_with_defaults() {
        let config = EchoConfig::from_yaml(
            "listen: 127.0.0.1:5000\nallowed_origins: [\"example.com\"]\nkeep_alive: false\n",
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.allowed_origins, vec!["example.com".to_string()]);
        assert_eq!(config.keep_alive_interval(), None);
        assert_eq!(config.cert, PathBuf::from("cert.pem"));
    }

    #[test]
    fn test_flags_override_defaults() {
        let opt = Opt::try_parse_from([
            "webtransport_echo_server",
            "--listen",
            "127.0.0.1:6000",
            "--allowed-origin",
            "a.example",
            "--allowed-origin",
            "",
            "--keep-alive",
            "false",
            "--max-idle-timeout-ms",
            "5000",
        ])
        .unwrap();
        let mut config = EchoConfig::default();
        config.apply(&opt);
        config.validate().unwrap();
        assert_eq!(config.listen.port(), 6000);
        assert_eq!(
            config.allowed_origins,
            vec!["a.example".to_string(), String::new()]
        );
        assert!(!config.keep_alive);
        assert_eq!(config.max_idle_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_path_rejected() {
        let config = EchoConfig {
            path: "counter".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_keep_alive_must_fire_before_idle_timeout() {
        let config = EchoConfig {
            keep_alive_interval_ms: 30_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
