use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "quotawatch-ui.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UiConfig {
    /// Base URL of the `quotawatch serve` instance.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8421".to_string()
}
fn default_timeout() -> u64 {
    10
}

impl UiConfig {
    /// Endpoint joined with an API path, without doubled slashes.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Load config from quotawatch-ui.toml in the given directory, or default.
pub fn load_config(dir: &Path) -> UiConfig {
    let path = dir.join(CONFIG_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}", path.display());
                UiConfig::default()
            }
        },
        Err(_) => UiConfig::default(),
    }
}
