//! Configuration system for pactline
//!
//! Reads config from ~/.config/pactline/config.toml

use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            bind: "127.0.0.1".to_string(),
        }
    }
}

/// Idle reaper configuration
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            timeout_secs: 300,
        }
    }
}

/// Full application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub reaper: ReaperConfig,
}

impl Config {
    /// Load configuration from default path
    pub fn load() -> Self {
        let config_path = Self::default_config_path();
        Self::load_from_path(&config_path).unwrap_or_default()
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pactline")
            .join("config.toml")
    }

    /// Load from specific path (simple key=value parsing)
    pub fn load_from_path(path: &PathBuf) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;

        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');

                match key {
                    "port" => {
                        if let Ok(port) = value.parse() {
                            config.server.port = port;
                        }
                    }
                    "bind" => {
                        config.server.bind = value.to_string();
                    }
                    "reap_interval" => {
                        if let Ok(secs) = value.parse() {
                            config.reaper.interval_secs = secs;
                        }
                    }
                    "reap_timeout" => {
                        if let Ok(secs) = value.parse() {
                            config.reaper.timeout_secs = secs;
                        }
                    }
                    _ => {}
                }
            }
        }

        Some(config)
    }

    /// Create default config file if it doesn't exist
    pub fn create_default_if_missing() {
        let path = Self::default_config_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let default_config = r#"# pactline Configuration

[server]
port = 8787
bind = "127.0.0.1"

[reaper]
reap_interval = 300
reap_timeout = 300
"#;
            let _ = std::fs::write(&path, default_config);
        }
    }
}
