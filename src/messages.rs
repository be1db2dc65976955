/// Cross-context message schema and the mailbox each context listens on.
///
/// Contexts share nothing but the store; everything else travels as a
/// `Request` with a one-shot reply channel.
use crate::error::TrackerError;
use crate::extractor::ExtractionResult;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

const MAILBOX_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    /// Popup → page: extract usage from the current page.
    FetchUsage,
    /// Popup/page → background: repaint the badge.
    UpdateBadge {
        #[serde(default)]
        percentage: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ExtractionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: ExtractionResult) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// A request paired with where to send its reply.
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

impl Envelope {
    /// Answer the request. A sender that went away is not an error.
    pub fn respond(self, response: Response) {
        if self.reply.send(response).is_err() {
            tracing::debug!("requester dropped before reply");
        }
    }
}

/// Sending half of a context's inbox.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<Envelope>,
}

impl Mailbox {
    /// Create a mailbox and the receiver its context drains.
    pub fn channel() -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        (Self { tx }, rx)
    }

    /// Send a request and wait for the reply.
    ///
    /// Fails with `ContextUnavailable` if the context has shut down or drops
    /// the request unanswered.
    pub async fn send(&self, request: Request) -> Result<Response, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| TrackerError::ContextUnavailable)?;
        rx.await.map_err(|_| TrackerError::ContextUnavailable)
    }
}
