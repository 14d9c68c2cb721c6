use clap::Parser;
use lib_common::retrieve::tss_udp;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "EVA telemetry bridge server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TSS_BRIDGE_PORT", help = "Port to listen on for subscriber connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "TSS_BRIDGE_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TSS_BRIDGE_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TSS_BRIDGE_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TSS_ADDR", help = "Address (host:port) of the TSS instrument server.")]
    pub tss_addr: Option<String>,

    #[clap(long, env = "TSS_FETCH_TIMEOUT_MS", help = "Receive deadline in milliseconds for one TSS fetch.")]
    pub fetch_timeout_ms: Option<u64>,

    #[clap(long, env = "TSS_POLL_INTERVAL_MS", help = "Fixed delay in milliseconds between poll cycles.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "TSS_BRIDGE_DATA_DIR", help = "Directory for the per-run telemetry databases.")]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            tss_addr: other.tss_addr.or(self.tss_addr),
            fetch_timeout_ms: other.fetch_timeout_ms.or(self.fetch_timeout_ms),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            data_dir: other.data_dir.or(self.data_dir),
        }
    }

    // Resolved accessors: every field was defaulted by load_config, the
    // fallbacks below only cover a hand-built Config.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9003)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }

    pub fn tss_addr(&self) -> String {
        self.tss_addr
            .clone()
            .unwrap_or_else(|| tss_udp::DEFAULT_ADDR.to_string())
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(tss_udp::DEFAULT_TIMEOUT)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(1000))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("./data"))
    }
}

pub fn load_config() -> Config {
    // 1. Load defaults
    let default_config = Config {
        port: Some(9003),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        tss_addr: Some(tss_udp::DEFAULT_ADDR.to_string()),
        fetch_timeout_ms: Some(tss_udp::DEFAULT_TIMEOUT.as_millis() as u64),
        poll_interval_ms: Some(1000),
        data_dir: Some(PathBuf::from("./data")),
        ..Default::default()
    };

    // 2. Load from config file (server_tss.conf) if present.
    //    Allow overriding the default config file path with a CLI arg.
    let cli_args_for_path = Config::parse();

    let config_file_path = cli_args_for_path
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_tss.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!(
                    "Failed to parse config file: {}. Falling back to other sources.",
                    config_file_path.display()
                );
            }
        } else {
            log::warn!(
                "Failed to read config file: {}. Falling back to other sources.",
                config_file_path.display()
            );
        }
    }

    // 3. Override with environment variables and CLI arguments; clap handles
    //    both, and the merge keeps file/default values where neither is set.
    current_config.merge(Config::parse())
}
