use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default WebSocket port the browser extension connects to.
pub const DEFAULT_WS_PORT: u16 = 23290;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BridgeSettings {
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Upper bound on how long a reader waits for RX data before re-checking cancellation
    #[serde(default = "default_reader_poll_ms")]
    pub reader_poll_ms: u64,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Send `{data: "..."}` lifecycle notices to the parent on the control channel
    #[serde(default = "default_control_notices")]
    pub control_notices: bool,
    /// Log every WebSocket frame as hex
    #[serde(default)]
    pub verbose: bool,
}

fn default_ws_port() -> u16 {
    DEFAULT_WS_PORT
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_reader_poll_ms() -> u64 {
    1000
}
fn default_control_notices() -> bool {
    true
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            ws_port: default_ws_port(),
            bind_address: default_bind_address(),
            reader_poll_ms: default_reader_poll_ms(),
            log_dir: None,
            control_notices: default_control_notices(),
            verbose: false,
        }
    }
}

impl BridgeSettings {
    pub fn reader_poll(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reader_poll_ms.max(1))
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.ws_port)
    }

    /// Overlay command-line flags on top of file settings.
    pub fn apply_cli(&mut self, cli: &CliArgs) {
        if let Some(port) = cli.ws_port {
            self.ws_port = port;
        }
        if let Some(ref bind) = cli.bind {
            self.bind_address = bind.clone();
        }
        if let Some(ref dir) = cli.log_dir {
            self.log_dir = Some(dir.clone());
        }
        if cli.verbose {
            self.verbose = true;
        }
    }
}

/// Command-line flags.
///
/// Browsers launch native hosts with the manifest path and extension id as
/// positional arguments; those land in `launcher_args` and are ignored.
#[derive(Debug, Parser, Default)]
#[command(name = "webserial-bridge", version, about = "Serial port bridge for sandboxed clients")]
pub struct CliArgs {
    /// Settings file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// WebSocket listening port
    #[arg(long)]
    pub ws_port: Option<u16>,
    /// WebSocket bind address
    #[arg(long)]
    pub bind: Option<String>,
    /// Directory for log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Log WebSocket frames as hex
    #[arg(long)]
    pub verbose: bool,
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub launcher_args: Vec<String>,
}

/// Default settings file: `<config_dir>/webserial-bridge/settings.toml`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("webserial-bridge").join("settings.toml"))
}

/// Load settings from a TOML file. A missing file yields defaults.
pub fn load_settings(path: &Path) -> Result<BridgeSettings, String> {
    if !path.exists() {
        return Ok(BridgeSettings::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read settings {}: {}", path.display(), e))?;
    toml::from_str(&content)
        .map_err(|e| format!("Failed to parse settings {}: {}", path.display(), e))
}

/// Resolve the effective settings from CLI flags and the settings file.
pub fn resolve_settings(cli: &CliArgs) -> Result<BridgeSettings, String> {
    let mut settings = match cli.config.clone().or_else(default_settings_path) {
        Some(path) => load_settings(&path)?,
        None => BridgeSettings::default(),
    };
    settings.apply_cli(cli);
    Ok(settings)
}
