use clap::Parser;
use lib_livetiming::signalr::{BackoffConfig, HubConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_flag.conf";
const DEFAULT_LOG_PREFIX: &str = "server_flag";

/// Something worth logging that happened while loading the config, before the
/// logger exists. The caller replays these once logging is set up.
pub type ConfigNote = (log::Level, String);

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[command(about = "Race control flag monitor for the live timing SignalR hub", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[arg(long, env = "FLAG_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "FLAG_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "FLAG_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "FLAG_LOG_PREFIX", help = "File name prefix of this server's log files.")]
    pub log_prefix: Option<String>,

    #[arg(long, env = "FLAG_NEGOTIATE_URL", help = "SignalR negotiation endpoint.")]
    pub negotiate_url: Option<String>,

    #[arg(long, env = "FLAG_CONNECT_URL", help = "SignalR websocket endpoint.")]
    pub connect_url: Option<String>,

    #[arg(long, env = "FLAG_HUB_NAME", help = "Hub to connect to.")]
    pub hub_name: Option<String>,

    #[arg(long, env = "FLAG_TOPIC", help = "Topic subscribed to on every connection.")]
    pub topic: Option<String>,

    #[arg(long, env = "FLAG_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[arg(long, env = "FLAG_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[arg(long, env = "FLAG_RECONNECT_FACTOR", help = "Multiplier applied to the delay after each failed attempt.")]
    pub reconnect_factor: Option<f64>,

    #[arg(long, env = "FLAG_STARTUP_GRACE_SECONDS", help = "Items older than connect time minus this many seconds are ignored.")]
    pub startup_grace_seconds: Option<u64>,

    #[arg(long, env = "FLAG_INACTIVITY_TIMEOUT_SECONDS", help = "Reconnect after this many seconds without a frame (0 disables).")]
    pub inactivity_timeout_seconds: Option<u64>,

    #[arg(long, env = "FLAG_STATE_FILE", help = "File the current flag state is written to as JSON.")]
    pub state_file: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_prefix: other.log_prefix.or(self.log_prefix),
            negotiate_url: other.negotiate_url.or(self.negotiate_url),
            connect_url: other.connect_url.or(self.connect_url),
            hub_name: other.hub_name.or(self.hub_name),
            topic: other.topic.or(self.topic),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            reconnect_factor: other.reconnect_factor.or(self.reconnect_factor),
            startup_grace_seconds: other.startup_grace_seconds.or(self.startup_grace_seconds),
            inactivity_timeout_seconds: other.inactivity_timeout_seconds.or(self.inactivity_timeout_seconds),
            state_file: other.state_file.or(self.state_file),
        }
    }

    fn defaults() -> Config {
        let hub = HubConfig::default();
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            log_prefix: Some(DEFAULT_LOG_PREFIX.to_string()),
            negotiate_url: Some(hub.negotiate_url),
            connect_url: Some(hub.connect_url),
            hub_name: Some(hub.hub_name),
            topic: Some(hub.topic),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(60000),
            reconnect_factor: Some(2.0),
            startup_grace_seconds: Some(30),
            inactivity_timeout_seconds: Some(60),
            ..Default::default()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }

    pub fn log_prefix(&self) -> String {
        self.log_prefix
            .clone()
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_PREFIX.to_string())
    }

    /// Hub settings for the client library; unset values keep the library defaults.
    pub fn to_hub_config(&self) -> HubConfig {
        let defaults = HubConfig::default();
        let backoff = BackoffConfig {
            floor: self
                .reconnect_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff.floor),
            ceiling: self
                .reconnect_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff.ceiling),
            factor: self.reconnect_factor.unwrap_or(defaults.backoff.factor),
        };

        HubConfig {
            negotiate_url: self.negotiate_url.clone().unwrap_or(defaults.negotiate_url),
            connect_url: self.connect_url.clone().unwrap_or(defaults.connect_url),
            hub_name: self.hub_name.clone().unwrap_or(defaults.hub_name),
            topic: self.topic.clone().unwrap_or(defaults.topic),
            startup_grace: self
                .startup_grace_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.startup_grace),
            inactivity_timeout: match self.inactivity_timeout_seconds {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.inactivity_timeout,
            },
            backoff,
            ..defaults
        }
    }
}

pub fn load_config() -> (Config, Vec<ConfigNote>) {
    load_config_from(Config::parse())
}

/// Defaults, then the JSON config file, then CLI arguments and environment variables.
pub fn load_config_from(cli_args: Config) -> (Config, Vec<ConfigNote>) {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut notes = Vec::new();
    let mut current_config = Config::defaults();

    match read_config_file(&config_file_path) {
        Ok(Some(file_config)) => current_config = current_config.merge(file_config),
        Ok(None) => notes.push((
            log::Level::Info,
            format!(
                "Config file not found at {}. Using defaults and environment/CLI variables.",
                config_file_path.display()
            ),
        )),
        Err(e) => notes.push((
            log::Level::Warn,
            format!("{}. Falling back to other sources.", e),
        )),
    }

    (current_config.merge(cli_args), notes)
}

fn read_config_file(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }

    let config_str = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

    serde_json::from_str::<Config>(&config_str)
        .map(Some)
        .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli_with_file(contents: &str) -> (tempfile::NamedTempFile, Config) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        (file, cli)
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let (_file, mut cli) = cli_with_file(
            r#"{"topic": "TrackStatus", "reconnectBaseDelayMs": 250, "logLevel": "debug"}"#,
        );
        cli.log_level = Some("warn".to_string());

        let (config, notes) = load_config_from(cli);
        assert!(notes.is_empty());
        assert_eq!(config.topic.as_deref(), Some("TrackStatus"));
        assert_eq!(config.reconnect_base_delay_ms, Some(250));
        assert_eq!(config.log_level(), "warn");
        assert_eq!(config.reconnect_max_delay_ms, Some(60000));
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let (file, cli) = cli_with_file("{ not json");
        let (config, notes) = load_config_from(cli);
        assert_eq!(config.topic.as_deref(), Some("RaceControlMessages"));
        assert_eq!(config.log_dir(), PathBuf::from("./logs"));

        // Kept for the caller to log once the logger is up.
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, log::Level::Warn);
        assert!(notes[0].1.contains("Failed to parse config file"));
        assert!(notes[0].1.contains(&file.path().display().to_string()));
    }

    #[test]
    fn missing_file_is_noted_at_info() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Config {
            config_path: Some(dir.path().join("absent.conf")),
            log_prefix: Some(String::new()),
            ..Default::default()
        };

        let (config, notes) = load_config_from(cli);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, log::Level::Info);
        assert_eq!(config.log_prefix(), "server_flag");
    }

    #[test]
    fn hub_config_maps_durations() {
        let config = Config {
            reconnect_base_delay_ms: Some(500),
            reconnect_max_delay_ms: Some(8000),
            reconnect_factor: Some(3.0),
            startup_grace_seconds: Some(45),
            inactivity_timeout_seconds: Some(0),
            ..Config::defaults()
        };

        let hub = config.to_hub_config();
        assert_eq!(hub.backoff.floor, Duration::from_millis(500));
        assert_eq!(hub.backoff.ceiling, Duration::from_secs(8));
        assert_eq!(hub.backoff.factor, 3.0);
        assert_eq!(hub.startup_grace, Duration::from_secs(45));
        assert_eq!(hub.inactivity_timeout, None);
        assert_eq!(hub.hub_name, "Streaming");
        assert_eq!(hub.client_protocol, "1.5");
    }
}
