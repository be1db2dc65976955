use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from `<data_dir>/config.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TrackerConfig {
    pub storage: StorageConfig,
    pub site: SiteConfig,
    pub fetch: FetchConfig,
    pub watcher: WatcherConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// How often a running instance checks for writes from other processes.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Host the page must be on for a popup fetch.
    pub host: String,
    /// Where users are sent when no usage data is found.
    pub usage_page_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Wait before reading the page on a popup fetch.
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_ms: u64,
    /// Wait after a URL change before extracting.
    pub settle_delay_ms: u64,
    /// Only URLs whose path contains one of these trigger extraction.
    /// Empty means every URL.
    pub path_keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

// --- Default implementations ---

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".quotawatch"),
            poll_interval_ms: 1000,
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            host: "claude.ai".to_string(),
            usage_page_url: "https://claude.ai/settings/usage".to_string(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            settle_delay_ms: 2000,
            path_keywords: vec!["settings".to_string(), "usage".to_string()],
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8421,
        }
    }
}

/// Load config from `path`, falling back to defaults.
///
/// A missing file is silent; a malformed one logs a warning.
pub fn load_config(path: &Path) -> TrackerConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}", path.display());
                TrackerConfig::default()
            }
        },
        Err(_) => TrackerConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let cfg = TrackerConfig::default();
        assert_eq!(cfg.storage.data_dir, PathBuf::from(".quotawatch"));
        assert_eq!(cfg.storage.poll_interval_ms, 1000);
        assert_eq!(cfg.site.host, "claude.ai");
        assert_eq!(cfg.fetch.settle_delay_ms, 500);
        assert_eq!(cfg.watcher.settle_delay_ms, 2000);
        assert_eq!(cfg.watcher.path_keywords, vec!["settings", "usage"]);
        assert_eq!(cfg.serve.port, 8421);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[watcher]\nsettle_delay_ms = 10\npath_keywords = []\n\n[serve]\nport = 9000\n",
        )
        .unwrap();

        let cfg = load_config(&path);
        assert_eq!(cfg.watcher.settle_delay_ms, 10);
        assert!(cfg.watcher.path_keywords.is_empty());
        assert_eq!(cfg.watcher.poll_interval_ms, 250);
        assert_eq!(cfg.serve.port, 9000);
        assert_eq!(cfg.serve.bind, "127.0.0.1");
        assert_eq!(cfg.site.usage_page_url, "https://claude.ai/settings/usage");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.toml"));
        assert_eq!(cfg.fetch.settle_delay_ms, 500);
    }

    #[test]
    fn test_malformed_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[serve\nport = ").unwrap();
        let cfg = load_config(&path);
        assert_eq!(cfg.serve.port, 8421);
    }
}
