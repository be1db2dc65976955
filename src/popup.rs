/// Popup context: summary view, auto-fetch and manual entry.
///
/// Every operation ends in a `PopupView`: the summary to show (if any) and a
/// transient notice. Errors never escape past this boundary.
use crate::config::SiteConfig;
use crate::error::TrackerError;
use crate::messages::{Mailbox, Request};
use crate::page::PageSource;
use crate::presenter::Summary;
use crate::store::{UsageRecord, UsageStore};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

/// A short message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

/// What the popup renders after an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupView {
    pub record: Option<UsageRecord>,
    pub summary: Option<Summary>,
    pub notice: Option<Notice>,
}

impl PopupView {
    fn new(record: Option<UsageRecord>, notice: Option<Notice>) -> Self {
        let now = Utc::now();
        Self {
            record,
            summary: record.map(|r| Summary::new(r.used, r.limit, r.last_updated, now)),
            notice,
        }
    }

    /// Text rendering for terminals.
    pub fn render(&self) -> String {
        let mut out = Vec::new();
        if let Some(summary) = &self.summary {
            out.push(summary.render());
        }
        if let Some(notice) = &self.notice {
            out.push(notice.message.clone());
        }
        out.join("\n")
    }
}

/// Parse manual-entry fields: `used >= 0`, `limit > 0`, each within `u64`.
pub fn validate_manual(used: &str, limit: &str) -> Result<(u64, u64), TrackerError> {
    let used = parse_count("used", used)?;
    let limit = parse_count("limit", limit)?;
    if limit == 0 {
        return Err(TrackerError::InvalidInput("limit must be > 0, got 0".to_string()));
    }
    Ok((used, limit))
}

/// A whole number of messages; `-0` counts as zero.
fn parse_count(field: &str, value: &str) -> Result<u64, TrackerError> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TrackerError::InvalidInput(format!(
            "{field} is not a number: {value:?}"
        )));
    }
    let n: u64 = digits
        .parse()
        .map_err(|_| TrackerError::InvalidInput(format!("{field} is out of range: {value}")))?;
    if negative && n > 0 {
        return Err(TrackerError::InvalidInput(format!(
            "{field} must be >= 0, got {value}"
        )));
    }
    Ok(n)
}

#[derive(Clone)]
pub struct Popup {
    store: UsageStore,
    page: Mailbox,
    background: Mailbox,
    source: Arc<dyn PageSource>,
    site: SiteConfig,
}

impl Popup {
    pub fn new(
        store: UsageStore,
        page: Mailbox,
        background: Mailbox,
        source: Arc<dyn PageSource>,
        site: SiteConfig,
    ) -> Self {
        Self {
            store,
            page,
            background,
            source,
            site,
        }
    }

    /// Current record, or a hint when nothing is stored yet.
    pub async fn load(&self) -> PopupView {
        match self.store.get().await {
            Ok(Some(record)) => PopupView::new(Some(record), None),
            Ok(None) => PopupView::new(
                None,
                Some(Notice::info(
                    "No usage data yet. Click \"Auto-Fetch\" or use manual entry.",
                )),
            ),
            Err(e) => {
                tracing::error!(error = %e, "error loading usage data");
                PopupView::new(None, Some(Notice::error("Error loading data")))
            }
        }
    }

    /// Ask the page context for usage and store it.
    pub async fn fetch(&self) -> Result<UsageRecord, TrackerError> {
        let on_site = self
            .source
            .current_url()
            .map(|url| url.contains(&self.site.host))
            .unwrap_or(false);
        if !on_site {
            return Err(TrackerError::OffSite {
                host: self.site.host.clone(),
            });
        }

        let response = self.page.send(Request::FetchUsage).await?;
        let data = match (response.success, response.data) {
            (true, Some(data)) => data,
            _ => {
                return Err(TrackerError::Page(response.error.unwrap_or_else(|| {
                    "Could not fetch usage. Try manual entry.".to_string()
                })))
            }
        };

        let record = UsageRecord::stamped(data);
        self.commit(record).await?;
        Ok(record)
    }

    /// Validate manual input and store it.
    pub async fn save(&self, used: &str, limit: &str) -> Result<UsageRecord, TrackerError> {
        let (used, limit) = validate_manual(used, limit)?;
        let record = UsageRecord::new(used, limit, Utc::now());
        self.commit(record).await?;
        Ok(record)
    }

    /// `fetch` as the user sees it.
    pub async fn auto_fetch(&self) -> PopupView {
        match self.fetch().await {
            Ok(record) => PopupView::new(
                Some(record),
                Some(Notice::success("Usage data updated successfully!")),
            ),
            Err(e) => self.failure(e).await,
        }
    }

    /// `save` as the user sees it.
    pub async fn save_manual(&self, used: &str, limit: &str) -> PopupView {
        self.saved_view(self.save(used, limit).await).await
    }

    /// The view shown after a manual save attempt.
    pub async fn saved_view(&self, result: Result<UsageRecord, TrackerError>) -> PopupView {
        match result {
            Ok(record) => PopupView::new(Some(record), Some(Notice::success("Usage data saved!"))),
            Err(e) => self.failure(e).await,
        }
    }

    async fn commit(&self, record: UsageRecord) -> Result<(), TrackerError> {
        self.store.set(record).await?;
        // The background also follows the store, so a lost badge request is harmless.
        if let Err(e) = self
            .background
            .send(Request::UpdateBadge {
                percentage: record.derive().percentage,
            })
            .await
        {
            tracing::debug!(error = %e, "badge update not delivered");
        }
        Ok(())
    }

    /// Keep showing whatever is stored, with a notice for `err`.
    async fn failure(&self, err: TrackerError) -> PopupView {
        tracing::info!(error = %err, "popup operation failed");
        let notice = self.notice_for(&err);
        let record = self.store.get().await.ok().flatten();
        PopupView::new(record, Some(notice))
    }

    pub fn notice_for(&self, err: &TrackerError) -> Notice {
        match err {
            TrackerError::OffSite { .. } => Notice::info(format!(
                "{} ({})",
                err.user_message(),
                self.site.usage_page_url
            )),
            TrackerError::ContextUnavailable => Notice::error(format!(
                "Error fetching data. Try navigating to {}",
                self.site.usage_page_url
            )),
            _ => Notice::error(err.user_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{Badge, BackgroundContext};
    use crate::page::testing::MemoryPage;
    use crate::page::PageContext;
    use crate::presenter::Tier;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    const USAGE_URL: &str = "https://claude.ai/settings/usage";

    struct Harness {
        popup: Popup,
        store: UsageStore,
        page: Arc<MemoryPage>,
        badge: Badge,
    }

    fn harness(dir: &Path, page: Arc<MemoryPage>) -> Harness {
        let store = UsageStore::new(dir.join("storage.json"), dir.join("lock"));
        let badge = Badge::new(dir.join("badge.json"));

        let (page_box, page_inbox) = Mailbox::channel();
        tokio::spawn(PageContext::new(page.clone(), Duration::ZERO, USAGE_URL).run(page_inbox));

        let (bg_box, bg_inbox) = Mailbox::channel();
        tokio::spawn(BackgroundContext::new(badge.clone(), store.clone()).run(bg_inbox));

        let popup = Popup::new(
            store.clone(),
            page_box,
            bg_box,
            page.clone(),
            SiteConfig::default(),
        );
        Harness {
            popup,
            store,
            page,
            badge,
        }
    }

    #[test]
    fn test_validate_manual() {
        assert_eq!(validate_manual("5", "10").unwrap(), (5, 10));
        assert_eq!(validate_manual(" 0 ", "1").unwrap(), (0, 1));
        assert!(matches!(
            validate_manual("-1", "10"),
            Err(TrackerError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_manual("5", "0"),
            Err(TrackerError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_manual("five", "10"),
            Err(TrackerError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_manual("", "10"),
            Err(TrackerError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_manual("-", "10"),
            Err(TrackerError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_manual("5", "-10"),
            Err(TrackerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_manual_full_u64_range() {
        let max = u64::MAX.to_string();
        assert_eq!(validate_manual(&max, &max).unwrap(), (u64::MAX, u64::MAX));
        let above_i64 = (i64::MAX as u64 + 1).to_string();
        assert_eq!(
            validate_manual("1", &above_i64).unwrap(),
            (1, i64::MAX as u64 + 1)
        );
        assert!(matches!(
            validate_manual("18446744073709551616", "10"),
            Err(TrackerError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_load_empty_store() {
        let dir = tempdir().unwrap();
        let h = harness(dir.path(), MemoryPage::new(USAGE_URL, ""));
        let view = h.popup.load().await;
        assert_eq!(view.summary, None);
        assert_eq!(view.notice.unwrap().kind, NoticeKind::Info);
    }

    #[tokio::test]
    async fn test_manual_rejects_without_mutation() {
        let dir = tempdir().unwrap();
        let h = harness(dir.path(), MemoryPage::new(USAGE_URL, ""));
        h.store
            .set(UsageRecord::new(3, 30, Utc::now()))
            .await
            .unwrap();

        for (used, limit) in [("-1", "10"), ("5", "0")] {
            let view = h.popup.save_manual(used, limit).await;
            let notice = view.notice.unwrap();
            assert_eq!(notice.kind, NoticeKind::Error);
            assert_eq!(notice.message, "Please enter valid numbers");
        }
        let stored = h.store.get().await.unwrap().unwrap();
        assert_eq!((stored.used, stored.limit), (3, 30));
    }

    #[tokio::test]
    async fn test_manual_accepts_and_derives() {
        let dir = tempdir().unwrap();
        let h = harness(dir.path(), MemoryPage::new(USAGE_URL, ""));

        let view = h.popup.save_manual("5", "10").await;
        assert_eq!(view.notice.unwrap(), Notice::success("Usage data saved!"));
        let summary = view.summary.unwrap();
        assert_eq!(summary.percentage, "50.0%");
        assert_eq!(summary.tier, Tier::Normal);

        let stored = h.store.get().await.unwrap().unwrap();
        let derived = stored.derive();
        assert_eq!(derived.percentage, Some(50.0));
        assert_eq!(h.badge.current().await.text, "50%");
    }

    #[tokio::test]
    async fn test_auto_fetch_success() {
        let dir = tempdir().unwrap();
        let h = harness(dir.path(), MemoryPage::new(USAGE_URL, "72 of 100 messages"));

        let view = h.popup.auto_fetch().await;
        assert_eq!(view.notice.unwrap().kind, NoticeKind::Success);
        assert_eq!(view.summary.unwrap().tier, Tier::Warning);
        let stored = h.store.get().await.unwrap().unwrap();
        assert_eq!((stored.used, stored.limit), (72, 100));
    }

    #[tokio::test]
    async fn test_auto_fetch_not_found() {
        let dir = tempdir().unwrap();
        let h = harness(dir.path(), MemoryPage::new(USAGE_URL, "Hello there"));

        let err = h.popup.fetch().await.unwrap_err();
        assert!(matches!(err, TrackerError::Page(ref m) if m.starts_with("Could not find usage data")));

        let view = h.popup.auto_fetch().await;
        assert_eq!(view.notice.unwrap().kind, NoticeKind::Error);
        assert_eq!(h.store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_auto_fetch_off_site() {
        let dir = tempdir().unwrap();
        let h = harness(
            dir.path(),
            MemoryPage::new("https://example.com/", "1 of 2 messages"),
        );

        let view = h.popup.auto_fetch().await;
        let notice = view.notice.unwrap();
        assert_eq!(notice.kind, NoticeKind::Info);
        assert!(notice.message.contains("Please navigate to claude.ai"));
        assert_eq!(h.store.get().await.unwrap(), None);

        h.page.show(USAGE_URL, "1 of 2 messages");
        assert!(h.popup.fetch().await.is_ok());
    }

    #[tokio::test]
    async fn test_auto_fetch_context_unavailable() {
        let dir = tempdir().unwrap();
        let store = UsageStore::new(dir.path().join("storage.json"), dir.path().join("lock"));
        let (page_box, page_inbox) = Mailbox::channel();
        drop(page_inbox);
        let (bg_box, _bg_inbox) = Mailbox::channel();
        let popup = Popup::new(
            store,
            page_box,
            bg_box,
            MemoryPage::new(USAGE_URL, ""),
            SiteConfig::default(),
        );

        let view = popup.auto_fetch().await;
        assert_eq!(
            view.notice.unwrap(),
            Notice::error("Error fetching data. Try navigating to https://claude.ai/settings/usage")
        );
    }

    #[test]
    fn test_view_render() {
        let view = PopupView::new(None, Some(Notice::info("hi")));
        assert_eq!(view.render(), "hi");
    }
}
