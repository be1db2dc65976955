/// Background context: keeps the badge in step with the stored record.
///
/// The badge is repainted on `updateBadge` requests and on every store
/// change. Its state is written to `badge.json` so tray or status-bar
/// integrations can pick it up.
use crate::messages::{Envelope, Request, Response};
use crate::presenter::{self, Tier};
use crate::store::{UsageRecord, UsageStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

/// What the badge currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeState {
    pub text: String,
    pub color: String,
}

impl Default for BadgeState {
    fn default() -> Self {
        Self {
            text: String::new(),
            color: Tier::Normal.color().to_string(),
        }
    }
}

/// Shared handle to the badge.
#[derive(Clone)]
pub struct Badge {
    state: Arc<RwLock<BadgeState>>,
    path: PathBuf,
}

impl Badge {
    pub fn new(path: PathBuf) -> Self {
        Self {
            state: Arc::new(RwLock::new(BadgeState::default())),
            path,
        }
    }

    pub async fn current(&self) -> BadgeState {
        self.state.read().await.clone()
    }

    /// Repaint for `percentage`. Undefined or NaN clears the text and keeps
    /// the previous colour.
    pub async fn update(&self, percentage: Option<f64>) {
        let percentage = percentage.filter(|p| !p.is_nan());
        let snapshot = {
            let mut state = self.state.write().await;
            state.text = presenter::badge_text(percentage);
            if let Some(p) = percentage {
                state.color = Tier::for_percentage(p).color().to_string();
            }
            state.clone()
        };

        tracing::info!(text = %snapshot.text, color = %snapshot.color, "badge updated");
        if let Err(e) = write_badge(&self.path, &snapshot) {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to write badge file");
        }
    }

    /// Repaint from a record, ignoring records without a usable limit.
    pub async fn apply(&self, record: &UsageRecord) {
        if record.limit > 0 {
            self.update(record.derive().percentage).await;
        }
    }
}

/// Write to a temp file then rename so readers never see a partial badge.
fn write_badge(path: &Path, state: &BadgeState) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    let dir = path.parent().unwrap_or(Path::new("."));
    let tmp_path = dir.join(format!(".badge.json.tmp.{}", std::process::id()));
    std::fs::write(&tmp_path, json.as_bytes())?;
    std::fs::rename(&tmp_path, path)
}

pub struct BackgroundContext {
    badge: Badge,
    store: UsageStore,
}

impl BackgroundContext {
    pub fn new(badge: Badge, store: UsageStore) -> Self {
        Self { badge, store }
    }

    /// Paint the stored record, then follow requests and store changes
    /// until the inbox closes.
    pub async fn run(self, mut inbox: mpsc::Receiver<Envelope>) {
        // Subscribe first so nothing written during start-up is missed.
        let mut changes = self.store.subscribe();

        match self.store.get().await {
            Ok(Some(record)) => self.badge.apply(&record).await,
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to read usage for badge"),
        }

        loop {
            tokio::select! {
                envelope = inbox.recv() => {
                    let Some(envelope) = envelope else { break };
                    self.handle(envelope).await;
                }
                change = changes.recv() => match change {
                    Ok(record) => self.badge.apply(&record).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "badge missed usage changes");
                        if let Ok(Some(record)) = self.store.get().await {
                            self.badge.apply(&record).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("background context stopped");
    }

    async fn handle(&self, envelope: Envelope) {
        let response = match &envelope.request {
            Request::UpdateBadge { percentage } => {
                self.badge.update(*percentage).await;
                Response::ok_empty()
            }
            other => {
                tracing::debug!(request = ?other, "background context ignoring request");
                Response::err("unsupported action")
            }
        };
        envelope.respond(response);
    }
}
