/// Errors surfaced to the user as transient notices.
use crate::store::StoreError;

#[derive(Debug)]
pub enum TrackerError {
    /// No extraction strategy matched the page.
    NotFound { usage_page_url: String },
    /// Manual entry failed validation.
    InvalidInput(String),
    /// The receiving context is gone or never answered.
    ContextUnavailable,
    /// The active page is not on the tracked site.
    OffSite { host: String },
    /// The page context answered with an error.
    Page(String),
    Store(StoreError),
}

impl TrackerError {
    /// Notice text for the popup.
    pub fn user_message(&self) -> String {
        match self {
            TrackerError::NotFound { usage_page_url } => format!(
                "Could not find usage data on this page. Please navigate to {usage_page_url}"
            ),
            TrackerError::InvalidInput(_) => "Please enter valid numbers".to_string(),
            TrackerError::ContextUnavailable => {
                "Error fetching data. Try navigating to the usage page".to_string()
            }
            TrackerError::OffSite { host } => {
                format!("Please navigate to {host} to auto-fetch usage")
            }
            TrackerError::Page(msg) => msg.clone(),
            TrackerError::Store(_) => "Error loading data".to_string(),
        }
    }
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::NotFound { .. } => write!(f, "no usage data found on page"),
            TrackerError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            TrackerError::ContextUnavailable => write!(f, "receiving context unavailable"),
            TrackerError::OffSite { host } => write!(f, "active page is not on {host}"),
            TrackerError::Page(msg) => write!(f, "page error: {msg}"),
            TrackerError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrackerError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for TrackerError {
    fn from(e: StoreError) -> Self {
        TrackerError::Store(e)
    }
}
