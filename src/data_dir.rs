use std::path::{Path, PathBuf};

/// Manages the `.quotawatch/` directory layout.
///
/// The storage area, page snapshot, badge output and config all live under a
/// single data directory. This struct provides accessors for each well-known
/// path and handles initialization.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Create a new DataDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory (e.g. `.quotawatch/`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the local storage area holding the usage record.
    pub fn storage(&self) -> PathBuf {
        self.root.join("storage.json")
    }

    /// Path to the lock file serializing storage writes.
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Path to the page snapshot the page context reads.
    pub fn page(&self) -> PathBuf {
        self.root.join("page.json")
    }

    /// Path to the badge state written by the background context.
    pub fn badge(&self) -> PathBuf {
        self.root.join("badge.json")
    }

    /// Path to the config file (e.g. `.quotawatch/config.toml`).
    pub fn config(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Default content written to `config.toml` when initializing a new data directory.
    const DEFAULT_CONFIG: &str = "\
# quotawatch configuration

[storage]
poll_interval_ms = 1000

[site]
host = \"claude.ai\"
usage_page_url = \"https://claude.ai/settings/usage\"

[fetch]
settle_delay_ms = 500

[watcher]
poll_interval_ms = 250
settle_delay_ms = 2000
path_keywords = [\"settings\", \"usage\"]

[serve]
bind = \"127.0.0.1\"
port = 8421
";

    /// Initialize the directory, writing a default config.toml if missing.
    /// Returns Ok(true) if the directory was created, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;

        let config_path = self.config();
        if !config_path.exists() {
            std::fs::write(&config_path, Self::DEFAULT_CONFIG)?;
        }

        Ok(created)
    }
}
