/// Wires the page, background and popup contexts together.
///
/// Each context runs on its own task and owns its state; they meet only
/// through mailboxes and the shared store.
use crate::background::{BackgroundContext, Badge};
use crate::config::TrackerConfig;
use crate::data_dir::DataDir;
use crate::messages::Mailbox;
use crate::page::{PageContext, PageSource};
use crate::popup::Popup;
use crate::store::UsageStore;
use crate::watcher::PageWatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Runtime {
    pub store: UsageStore,
    pub badge: Badge,
    pub page: Mailbox,
    pub background: Mailbox,
    source: Arc<dyn PageSource>,
    config: TrackerConfig,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Spawn the page and background contexts, and follow the storage file
    /// for writes made by other processes.
    pub async fn start(
        config: TrackerConfig,
        data_dir: &DataDir,
        source: Arc<dyn PageSource>,
    ) -> Self {
        let store = UsageStore::open(data_dir);
        let badge = Badge::new(data_dir.badge());

        let (page, page_inbox) = Mailbox::channel();
        let page_ctx = PageContext::new(
            Arc::clone(&source),
            Duration::from_millis(config.fetch.settle_delay_ms),
            &config.site.usage_page_url,
        );

        let (background, background_inbox) = Mailbox::channel();
        let background_ctx = BackgroundContext::new(badge.clone(), store.clone());

        let external = store
            .watch_external(Duration::from_millis(config.storage.poll_interval_ms))
            .await;

        let tasks = vec![
            external,
            tokio::spawn(page_ctx.run(page_inbox)),
            tokio::spawn(background_ctx.run(background_inbox)),
            store.on_change(|record| {
                tracing::info!(
                    used = record.used,
                    limit = record.limit,
                    last_updated = %record.last_updated,
                    "usage changed"
                );
            }),
        ];
        tracing::debug!(data_dir = %data_dir.root().display(), "contexts started");

        Self {
            store,
            badge,
            page,
            background,
            source,
            config,
            tasks,
        }
    }

    /// A popup bound to the running contexts.
    pub fn popup(&self) -> Popup {
        Popup::new(
            self.store.clone(),
            self.page.clone(),
            self.background.clone(),
            Arc::clone(&self.source),
            self.config.site.clone(),
        )
    }

    /// Start the page watcher; it stops when `shutdown` flips.
    pub fn spawn_watcher(&mut self, shutdown: watch::Receiver<bool>) {
        let watcher = PageWatcher::new(&self.config.watcher);
        self.tasks.push(tokio::spawn(watcher.run(
            Arc::clone(&self.source),
            self.store.clone(),
            shutdown,
        )));
    }

    /// Stop every context task.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}
