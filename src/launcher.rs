//! Launching the vendor application with its SiLA2 server enabled.
//!
//! The Absorbance 96 App embeds the server; it is started by passing
//! `--sila` plus the flags below to the desktop application. Windows runs
//! the executable directly, macOS goes through `open --args`, and other
//! platforms are unsupported because the vendor ships no build for them.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{DEFAULT_HOST, DEFAULT_PORT};
use crate::error::{ReaderError, ReaderResult};

/// Startup settings for the embedded SiLA2 server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Port the server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address; `0.0.0.0` exposes the server on the network.
    #[serde(default = "default_ip")]
    pub ip: String,
    /// Serve without TLS.
    #[serde(default)]
    pub insecure: bool,
    /// Run without a GUI window.
    #[serde(default)]
    pub headless: bool,
    /// Server UUID; the application generates one when unset.
    #[serde(default)]
    pub server_uuid: Option<String>,
    /// CA certificate the server should trust (PEM).
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Server certificate (PEM).
    #[serde(default)]
    pub cert: Option<PathBuf>,
    /// Server private key (PEM).
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// Where the server should write its self-signed certificate.
    #[serde(default)]
    pub out_cert: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_ip() -> String {
    DEFAULT_HOST.to_string()
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            ip: default_ip(),
            insecure: false,
            headless: false,
            server_uuid: None,
            ca_cert: None,
            cert: None,
            key: None,
            out_cert: None,
        }
    }
}

impl LaunchConfig {
    /// Maps the settings onto the vendor application's CLI flags.
    ///
    /// Values matching the vendor defaults are omitted; `--sila` is always
    /// emitted since it is what enables the server at all.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["--sila".to_string()];

        if self.port != DEFAULT_PORT {
            args.push("--sila-port".to_string());
            args.push(self.port.to_string());
        }
        if self.ip != DEFAULT_HOST {
            args.push("--sila-ip".to_string());
            args.push(self.ip.clone());
        }
        if self.insecure {
            args.push("--sila-insecure".to_string());
        }
        if self.headless {
            args.push("--headless".to_string());
        }
        if let Some(uuid) = &self.server_uuid {
            args.push("--sila-uuid".to_string());
            args.push(uuid.clone());
        }
        if let Some(path) = &self.ca_cert {
            args.push("--sila-ca-cert".to_string());
            args.push(path.display().to_string());
        }
        if let Some(path) = &self.cert {
            args.push("--sila-cert".to_string());
            args.push(path.display().to_string());
        }
        if let Some(path) = &self.key {
            args.push("--sila-key".to_string());
            args.push(path.display().to_string());
        }
        if let Some(path) = &self.out_cert {
            args.push("--sila-out-cert".to_string());
            args.push(path.display().to_string());
        }

        args
    }
}

/// Looks for the vendor application in its usual install locations.
pub fn locate_app() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES(X86)", "PROGRAMFILES"] {
            if let Ok(root) = std::env::var(key) {
                paths.push(
                    PathBuf::from(root)
                        .join("Byonoy")
                        .join("Absorbance 96 App")
                        .join("app")
                        .join("absorbance96app.exe"),
                );
            }
        }
        if let Ok(root) = std::env::var("LOCALAPPDATA") {
            paths.push(
                PathBuf::from(root)
                    .join("Programs")
                    .join("Byonoy")
                    .join("Absorbance 96 App")
                    .join("app")
                    .join("absorbance96app.exe"),
            );
        }
        paths
    } else if cfg!(target_os = "macos") {
        let mut paths = vec![PathBuf::from("/Applications/Absorbance 96 App.app")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join("Applications").join("Absorbance 96 App.app"));
        }
        paths
    } else {
        Vec::new()
    };

    candidates.into_iter().find(|candidate| candidate.exists())
}

/// Starts the vendor application with the SiLA2 server enabled.
///
/// Falls back to [`locate_app`] when no path is given. Returns the child
/// process handle; the caller decides whether to wait on it. Stdout and
/// stderr are discarded, the process is observed through its handle only.
pub fn launch_app(config: &LaunchConfig, app_path: Option<PathBuf>) -> ReaderResult<Child> {
    let app_path = match app_path.or_else(locate_app) {
        Some(path) => path,
        None => {
            return Err(ReaderError::Launch(
                "could not find the Absorbance 96 App; pass the application path explicitly"
                    .to_string(),
            ))
        }
    };

    let cli_args = config.to_cli_args();
    let mut command = if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(&app_path).arg("--args").args(&cli_args);
        cmd
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new(&app_path);
        cmd.args(&cli_args);
        cmd
    } else {
        return Err(ReaderError::Launch(format!(
            "unsupported platform: {}",
            std::env::consts::OS
        )));
    };

    info!(path = %app_path.display(), port = config.port, "starting Absorbance 96 App");
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            ReaderError::Launch(format!("failed to start {}: {}", app_path.display(), e))
        })
}
