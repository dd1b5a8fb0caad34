//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Node configuration. File: ~/.config/auditorium/config.toml or /etc/auditorium/config.toml.
/// Env overrides: AUDITORIUM_NODE_ID, AUDITORIUM_LISTEN_ADDRESS, AUDITORIUM_ADVERTISE_ADDRESS,
/// AUDITORIUM_LISTEN_PORT, AUDITORIUM_DISCOVER_PORT, AUDITORIUM_BROADCAST_ADDRESS,
/// AUDITORIUM_LOG_LOCATION, AUDITORIUM_KEYS_DIRECTORY, AUDITORIUM_LOG_LEVEL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// This machine's node id; selects its key and certificate.
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Address the TCP listener and discovery responder bind to.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Address put in this host's pointer, where peers connect back. The
    /// loopback default only suits single-machine setups; set it to the
    /// machine's LAN address when peers run elsewhere.
    #[serde(default = "default_advertise_address")]
    pub advertise_address: String,
    /// Link TCP port (default 9700). 0 picks a free port.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Discovery UDP port (default 9701). 0 picks a free port.
    #[serde(default = "default_discover_port")]
    pub discover_port: u16,
    /// Where discovery requests are sent.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    #[serde(default = "default_discover_timeout_ms")]
    pub discover_timeout_ms: u64,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// Log file; `auditorium-<node_id>.log` in the working directory when unset.
    #[serde(default)]
    pub log_location: Option<PathBuf>,
    #[serde(default = "default_keys_directory")]
    pub keys_directory: PathBuf,
    /// Filter for tracing output, overridden by RUST_LOG.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "0".into()
}
fn default_listen_address() -> String {
    "0.0.0.0".into()
}
fn default_advertise_address() -> String {
    "127.0.0.1".into()
}
fn default_listen_port() -> u16 {
    9700
}
fn default_discover_port() -> u16 {
    9701
}
fn default_broadcast_address() -> String {
    "255.255.255.255".into()
}
fn default_discover_timeout_ms() -> u64 {
    1000
}
fn default_join_timeout_ms() -> u64 {
    4000
}
fn default_keys_directory() -> PathBuf {
    PathBuf::from("keys")
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            listen_address: default_listen_address(),
            advertise_address: default_advertise_address(),
            listen_port: default_listen_port(),
            discover_port: default_discover_port(),
            broadcast_address: default_broadcast_address(),
            discover_timeout_ms: default_discover_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            log_location: None,
            keys_directory: default_keys_directory(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn log_path(&self) -> PathBuf {
        self.log_location
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("auditorium-{}.log", self.node_id)))
    }

    /// Apply environment overrides from `var`. Unparseable values are ignored.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(s) = var("AUDITORIUM_NODE_ID") {
            self.node_id = s;
        }
        if let Some(s) = var("AUDITORIUM_LISTEN_ADDRESS") {
            self.listen_address = s;
        }
        if let Some(s) = var("AUDITORIUM_ADVERTISE_ADDRESS") {
            self.advertise_address = s;
        }
        if let Some(s) = var("AUDITORIUM_BROADCAST_ADDRESS") {
            self.broadcast_address = s;
        }
        if let Some(p) = var("AUDITORIUM_LISTEN_PORT").and_then(|s| s.parse().ok()) {
            self.listen_port = p;
        }
        if let Some(p) = var("AUDITORIUM_DISCOVER_PORT").and_then(|s| s.parse().ok()) {
            self.discover_port = p;
        }
        if let Some(s) = var("AUDITORIUM_LOG_LOCATION") {
            self.log_location = Some(PathBuf::from(s));
        }
        if let Some(s) = var("AUDITORIUM_KEYS_DIRECTORY") {
            self.keys_directory = PathBuf::from(s);
        }
        if let Some(s) = var("AUDITORIUM_LOG_LEVEL") {
            self.log_level = s;
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Result<Config, ConfigError> {
    let mut c = match load_file()? {
        Some(c) => c,
        None => Config::default(),
    };
    c.apply_env(|k| std::env::var(k).ok());
    Ok(c)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/auditorium/config.toml"));
    }
    out.push(PathBuf::from("/etc/auditorium/config.toml"));
    out
}

/// First existing file wins. A file that exists but does not parse is an error.
fn load_file() -> Result<Option<Config>, ConfigError> {
    for p in config_paths() {
        if p.exists() {
            return parse_file(p).map(Some);
        }
    }
    Ok(None)
}

fn parse_file(path: PathBuf) -> Result<Config, ConfigError> {
    let s = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    toml::from_str(&s).map_err(|source| ConfigError::Parse { path, source })
}
