/// Page watcher: re-extracts usage whenever the page navigates.
///
/// Polls the page source for its URL. On a change that lands on a usage-like
/// path it waits for the page to settle, runs the extractor, and stores a
/// hit. Misses are dropped quietly and never retried.
use crate::config::WatcherConfig;
use crate::page::{self, PageSource};
use crate::store::{UsageRecord, UsageStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What one poll did.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// Same URL as last time.
    Unchanged,
    /// New URL outside the watched paths.
    Skipped,
    /// Usage extracted and stored.
    Updated(UsageRecord),
    /// No strategy matched.
    NotFound,
    /// Page or store could not be accessed.
    Failed,
}

pub struct PageWatcher {
    last_url: Option<String>,
    path_keywords: Vec<String>,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl PageWatcher {
    pub fn new(config: &WatcherConfig) -> Self {
        Self {
            last_url: None,
            path_keywords: config.path_keywords.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
        }
    }

    /// Record `url`; true if it differs from the last one seen.
    pub fn observe(&mut self, url: &str) -> bool {
        if self.last_url.as_deref() == Some(url) {
            return false;
        }
        self.last_url = Some(url.to_string());
        true
    }

    /// Whether `url`'s path contains one of the watched keywords.
    pub fn is_watched(&self, url: &str) -> bool {
        if self.path_keywords.is_empty() {
            return true;
        }
        let path = url_path(url);
        self.path_keywords.iter().any(|k| path.contains(k.as_str()))
    }

    /// One poll of the page.
    pub async fn check(&mut self, source: &dyn PageSource, store: &UsageStore) -> WatchOutcome {
        let url = match source.current_url() {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(error = %e, "page unavailable");
                return WatchOutcome::Failed;
            }
        };

        if !self.observe(&url) {
            return WatchOutcome::Unchanged;
        }
        if !self.is_watched(&url) {
            tracing::debug!(url = %url, "navigation outside watched paths");
            return WatchOutcome::Skipped;
        }

        tracing::debug!(url = %url, "navigation observed, waiting for page to settle");
        tokio::time::sleep(self.settle_delay).await;

        let result = match page::extract_from(source) {
            Ok(Some(result)) => result,
            Ok(None) => {
                tracing::debug!(url = %url, "could not auto-update: no usage data on page");
                return WatchOutcome::NotFound;
            }
            Err(e) => {
                tracing::debug!(error = %e, "could not auto-update");
                return WatchOutcome::Failed;
            }
        };

        let record = UsageRecord::stamped(result);
        if let Err(e) = store.set(record).await {
            tracing::warn!(error = %e, "failed to store auto-updated usage");
            return WatchOutcome::Failed;
        }
        tracing::info!(used = record.used, limit = record.limit, "auto-updated usage");
        WatchOutcome::Updated(record)
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(
        mut self,
        source: Arc<dyn PageSource>,
        store: UsageStore,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            settle_ms = self.settle_delay.as_millis() as u64,
            "page watcher started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = self.check(source.as_ref(), &store) => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("page watcher stopped");
    }
}

/// Path part of a URL: after the host, before any query or fragment.
fn url_path(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(i) => &url[i + 3..],
        None => url,
    };
    let path = match rest.find('/') {
        Some(i) => &rest[i..],
        None => "",
    };
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}
