//! Environment-backed configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::entity::ConnectorKind;
use crate::error::AppError;
use crate::source::balance::CHAIN_NAMES;

#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub telegram_api_url: String,
    /// Subscription snapshot file. `None` keeps subscriptions in memory only.
    pub data_path: Option<PathBuf>,
    pub logs_path: PathBuf,
    pub enabled_connectors: Vec<ConnectorKind>,
    /// Poll interval overrides read from `<KIND>_INTERVAL`, in seconds.
    pub poll_intervals: HashMap<ConnectorKind, Duration>,
    pub nitter_instances: Vec<String>,
    /// RPC endpoint overrides read from `<CHAIN>_RPC_URL`.
    pub rpc_urls: HashMap<String, String>,
    /// Outbound proxy for every upstream request, e.g. `http://127.0.0.1:3128`.
    pub proxy_url: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            telegram_bot_token: String::new(),
            telegram_api_url: "https://api.telegram.org".to_string(),
            data_path: Some(PathBuf::from("data/subscriptions.json")),
            logs_path: PathBuf::from("logs"),
            enabled_connectors: ConnectorKind::ALL.to_vec(),
            poll_intervals: HashMap::new(),
            nitter_instances: Vec::new(),
            rpc_urls: HashMap::new(),
            proxy_url: None,
        }
    }

    /// Reads every setting from the process environment.
    pub fn load(&mut self) -> Result<(), AppError> {
        self.telegram_bot_token =
            std::env::var("TELEGRAM_BOT_TOKEN").map_err(|_| AppError::MissingConfig {
                key: "TELEGRAM_BOT_TOKEN".to_string(),
            })?;

        if let Ok(url) = std::env::var("TELEGRAM_API_URL") {
            self.telegram_api_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(path) = std::env::var("DATA_PATH") {
            self.data_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Ok(path) = std::env::var("LOGS_PATH") {
            self.logs_path = PathBuf::from(path);
        }

        if let Ok(list) = std::env::var("ENABLED_CONNECTORS") {
            self.enabled_connectors = Self::parse_connector_list(&list)?;
        }

        for kind in ConnectorKind::ALL {
            let key = format!("{}_INTERVAL", kind.as_str().to_uppercase());
            if let Ok(raw) = std::env::var(&key) {
                let interval = Self::parse_interval(&key, &raw)?;
                self.poll_intervals.insert(kind, interval);
            }
        }

        if let Ok(list) = std::env::var("NITTER_INSTANCES") {
            self.nitter_instances = Self::split_list(&list);
        }

        for chain in CHAIN_NAMES {
            let key = format!("{}_RPC_URL", chain.to_uppercase());
            if let Ok(url) = std::env::var(&key) {
                self.rpc_urls.insert(chain.to_string(), url);
            }
        }

        if let Ok(url) = std::env::var("PROXY_URL") {
            let url = url.trim();
            self.proxy_url = (!url.is_empty()).then(|| url.to_string());
        }

        Ok(())
    }

    fn parse_interval(key: &str, raw: &str) -> Result<Duration, AppError> {
        match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(AppError::ConfigurationError {
                msg: format!("{key}={raw} is not a positive number of seconds"),
            }),
        }
    }

    fn parse_connector_list(list: &str) -> Result<Vec<ConnectorKind>, AppError> {
        Self::split_list(list)
            .iter()
            .map(|name| {
                ConnectorKind::from_str(name).map_err(|_| AppError::ConfigurationError {
                    msg: format!("Unknown connector `{name}` in ENABLED_CONNECTORS"),
                })
            })
            .collect()
    }

    fn split_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
