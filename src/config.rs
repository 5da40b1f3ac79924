//! Connection settings for the reader's SiLA2 endpoint.
//!
//! Defaults match a vendor application started locally with stock
//! settings. For the CLI, values can also come from `absorbance96.toml`
//! and `A96_`-prefixed environment variables:
//!
//! ```text
//! A96_HOST=192.168.1.40
//! A96_PORT=50052
//! A96_CALL_TIMEOUT=5m
//! ```

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, ReaderResult};

/// Default port of the embedded SiLA2 server.
pub const DEFAULT_PORT: u16 = 50051;

/// Default host for a locally launched vendor application.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// One remote SiLA2 endpoint plus the per-call budgets used against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server host name or IP.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect without TLS. Matches a server started with `--sila-insecure`.
    #[serde(default)]
    pub insecure: bool,
    /// PEM bundle overriding the system trust store on the secure path.
    /// Useful when the server runs with a self-signed certificate.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Deadline applied to every individual RPC.
    #[serde(with = "humantime_serde", default = "default_call_timeout")]
    pub call_timeout: Duration,
    /// Lease timeout requested on every lock acquisition.
    #[serde(with = "humantime_serde", default = "default_lock_timeout")]
    pub lock_timeout: Duration,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(100)
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            insecure: false,
            ca_cert: None,
            call_timeout: default_call_timeout(),
            lock_timeout: default_lock_timeout(),
        }
    }
}

impl ConnectionConfig {
    /// Loads settings from `absorbance96.toml` and `A96_*` environment
    /// variables, falling back to the defaults for anything unset.
    pub fn load() -> ReaderResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file("absorbance96.toml"))
            .merge(Env::prefixed("A96_"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that parse fine but cannot identify an endpoint.
    pub fn validate(&self) -> ReaderResult<()> {
        if self.host.is_empty() {
            return Err(ReaderError::Configuration("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ReaderError::Configuration(
                "port must be in the range 1-65535".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` of the endpoint.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
