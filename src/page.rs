/// Page context: owns access to the current page and answers `fetchUsage`.
use crate::dom::{PageSnapshot, SnapshotError};
use crate::error::TrackerError;
use crate::extractor::{self, ExtractionResult};
use crate::messages::{Envelope, Request, Response};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Where the current page comes from.
pub trait PageSource: Send + Sync {
    /// URL of the page currently shown.
    fn current_url(&self) -> Result<String, SnapshotError>;

    /// Full snapshot of the page currently shown.
    fn snapshot(&self) -> Result<PageSnapshot, SnapshotError>;
}

/// A snapshot file on disk, rewritten by whatever captures the browser tab.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PageSource for SnapshotFile {
    fn current_url(&self) -> Result<String, SnapshotError> {
        Ok(self.snapshot()?.url)
    }

    fn snapshot(&self) -> Result<PageSnapshot, SnapshotError> {
        PageSnapshot::load(&self.path)
    }
}

/// Extract usage from whatever the source currently shows.
pub fn extract_from(source: &dyn PageSource) -> Result<Option<ExtractionResult>, SnapshotError> {
    let snapshot = source.snapshot()?;
    Ok(extractor::extract(&snapshot.page_text(), &snapshot.root))
}

pub struct PageContext {
    source: Arc<dyn PageSource>,
    settle_delay: Duration,
    usage_page_url: String,
}

impl PageContext {
    pub fn new(source: Arc<dyn PageSource>, settle_delay: Duration, usage_page_url: &str) -> Self {
        Self {
            source,
            settle_delay,
            usage_page_url: usage_page_url.to_string(),
        }
    }

    /// Let dynamic content settle, then run the extractor.
    pub async fn fetch_usage(&self) -> Result<ExtractionResult, TrackerError> {
        tokio::time::sleep(self.settle_delay).await;

        match extract_from(self.source.as_ref()) {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(TrackerError::NotFound {
                usage_page_url: self.usage_page_url.clone(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "page snapshot unavailable");
                Err(TrackerError::Page(format!("Could not read the page: {e}")))
            }
        }
    }

    /// Serve requests until every mailbox handle is dropped.
    pub async fn run(self, mut inbox: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = inbox.recv().await {
            let response = match &envelope.request {
                Request::FetchUsage => match self.fetch_usage().await {
                    Ok(data) => Response::ok(data),
                    Err(e) => {
                        tracing::info!(error = %e, "fetchUsage failed");
                        Response::err(e.user_message())
                    }
                },
                other => {
                    tracing::debug!(request = ?other, "page context ignoring request");
                    Response::err("unsupported action")
                }
            };
            envelope.respond(response);
        }
        tracing::debug!("page context stopped");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryPage;
    use super::*;
    use crate::messages::Mailbox;
    use tempfile::tempdir;

    const USAGE_URL: &str = "https://claude.ai/settings/usage";

    fn spawn_page(source: Arc<dyn PageSource>) -> Mailbox {
        let (mailbox, inbox) = Mailbox::channel();
        let ctx = PageContext::new(source, Duration::ZERO, USAGE_URL);
        tokio::spawn(ctx.run(inbox));
        mailbox
    }

    #[tokio::test]
    async fn test_fetch_usage_success() {
        let page = spawn_page(MemoryPage::new(USAGE_URL, "12 of 50 messages"));
        let resp = page.send(Request::FetchUsage).await.unwrap();
        assert_eq!(resp, Response::ok(ExtractionResult { used: 12, limit: 50 }));
    }

    #[tokio::test]
    async fn test_fetch_usage_not_found() {
        let page = spawn_page(MemoryPage::new(USAGE_URL, "Start a new chat"));
        let resp = page.send(Request::FetchUsage).await.unwrap();
        assert!(!resp.success);
        assert_eq!(
            resp.error.as_deref(),
            Some("Could not find usage data on this page. Please navigate to https://claude.ai/settings/usage")
        );
    }

    #[tokio::test]
    async fn test_fetch_usage_unreadable_page() {
        let page = spawn_page(MemoryPage::empty());
        let resp = page.send(Request::FetchUsage).await.unwrap();
        assert!(!resp.success);
        assert!(resp.error.unwrap().starts_with("Could not read the page"));
    }

    #[tokio::test]
    async fn test_unsupported_action() {
        let page = spawn_page(MemoryPage::new(USAGE_URL, ""));
        let resp = page
            .send(Request::UpdateBadge {
                percentage: Some(1.0),
            })
            .await
            .unwrap();
        assert_eq!(resp, Response::err("unsupported action"));
    }

    #[test]
    fn test_snapshot_file_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page.json");
        let snap = PageSnapshot::from_text(USAGE_URL, "4 / 8 messages");
        std::fs::write(&path, serde_json::to_string(&snap).unwrap()).unwrap();

        let source = SnapshotFile::new(&path);
        assert_eq!(source.current_url().unwrap(), USAGE_URL);
        assert_eq!(
            extract_from(&source).unwrap(),
            Some(ExtractionResult { used: 4, limit: 8 })
        );
    }
}
