use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable for the bind host
pub const ENV_HOST: &str = "HOST";
/// Environment variable for the listen port
pub const ENV_PORT: &str = "PORT";
/// Environment variable for the cache time-to-live in seconds
pub const ENV_CACHE_TTL: &str = "CACHE_TTL_SECONDS";
/// Environment variable overriding the browser executable used by the bridge
pub const ENV_BROWSER_EXECUTABLE: &str = "BROWSER_EXECUTABLE_PATH";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Cached lookup service for a long-lived messaging session")]
pub struct Config {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind host
    #[arg(long)]
    pub host: Option<String>,

    /// Cache time-to-live in seconds
    #[arg(long)]
    pub cache_ttl: Option<u64>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve lookups from a scripted in-memory session (no bridge required)
    Demo,
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if running in demo mode
    pub fn is_demo_mode(&self) -> bool {
        matches!(self.command, Some(Command::Demo))
    }
}

/// Application settings (from config file, environment and CLI)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Lookup cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// External session settings
    #[serde(default)]
    pub session: SessionSettings,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds to let in-flight requests drain on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Lookup cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Time-to-live of a cached lookup in seconds
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Upper bound on stored entries (oldest insertion evicted first)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Interval of the background expiry sweep in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_ttl() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    10_000
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// External session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Automation bridge executable
    #[serde(default = "default_bridge_command")]
    pub bridge_command: String,

    /// Extra arguments for the bridge
    #[serde(default)]
    pub bridge_args: Vec<String>,

    /// Browser executable handed to the bridge (bridge default when unset)
    #[serde(default)]
    pub browser_executable: Option<PathBuf>,

    /// Give up (fatally) if the session is not ready within this many seconds
    #[serde(default)]
    pub ready_timeout_secs: Option<u64>,

    /// Timeout for a single bridge request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_bridge_command() -> String {
    "wacheck-bridge".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            bridge_command: default_bridge_command(),
            bridge_args: Vec::new(),
            browser_executable: None,
            ready_timeout_secs: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl SessionSettings {
    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {:?}", p))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", p));
            }
            tracing::warn!("Config file {:?} not found; falling back to defaults", p);
        }

        // Try default config locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("wacheck/config.toml")),
            dirs::home_dir().map(|p| p.join(".wacheck.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", path));
            }
        }

        // Return defaults if no config file found
        Ok(Self::default())
    }

    /// Merge environment variables into settings (env overrides the file)
    ///
    /// Values are taken verbatim; numbers that do not parse are logged and ignored.
    pub fn merge_env(&mut self) {
        if let Ok(host) = std::env::var(ENV_HOST) {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Some(port) = parse_env::<u16>(ENV_PORT) {
            self.server.port = port;
        }
        if let Some(ttl) = parse_env::<u64>(ENV_CACHE_TTL) {
            self.cache.ttl_secs = ttl;
        }
        if let Ok(path) = std::env::var(ENV_BROWSER_EXECUTABLE) {
            if !path.is_empty() {
                self.session.browser_executable = Some(PathBuf::from(path));
            }
        }
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(ttl) = cli.cache_ttl {
            self.cache.ttl_secs = ttl;
        }
    }

    /// Validate and normalize settings values
    ///
    /// A zero TTL would make every entry expire on insert; zero intervals
    /// would spin the sweeper.
    pub fn validate(&mut self) {
        self.cache.ttl_secs = self.cache.ttl_secs.max(1);
        self.cache.max_entries = self.cache.max_entries.max(1);
        self.cache.sweep_interval_secs = self.cache.sweep_interval_secs.max(1);
        self.session.request_timeout_secs = self.session.request_timeout_secs.max(1);
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}
