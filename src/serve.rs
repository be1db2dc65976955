/// Local HTTP surface for popup clients running in another process.
use crate::config::ServeConfig;
use crate::runtime::Runtime;

#[cfg(feature = "serve")]
use crate::{background::Badge, error::TrackerError, popup::Popup, store::UsageStore};

#[cfg(feature = "serve")]
#[derive(Clone)]
struct AppState {
    popup: Popup,
    badge: Badge,
    store: UsageStore,
}

#[cfg(feature = "serve")]
pub fn router(runtime: &Runtime) -> axum::Router {
    use axum::routing::get;
    use tower_http::cors::CorsLayer;

    let state = AppState {
        popup: runtime.popup(),
        badge: runtime.badge.clone(),
        store: runtime.store.clone(),
    };

    axum::Router::new()
        .route("/api/health", get(health))
        .route("/api/usage", get(api_usage).post(api_manual))
        .route("/api/fetch", axum::routing::post(api_fetch))
        .route("/api/badge", get(api_badge))
        .route("/api/events", get(api_events))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[cfg(feature = "serve")]
pub async fn run(
    runtime: &Runtime,
    config: &ServeConfig,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(runtime);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("serve listening on {local_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(crate::signals::wait(shutdown))
        .await?;
    Ok(())
}

#[cfg(not(feature = "serve"))]
pub async fn run(
    _runtime: &Runtime,
    _config: &ServeConfig,
    _shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    Err("built without the `serve` feature".into())
}

#[cfg(feature = "serve")]
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"ok": true}))
}

#[cfg(feature = "serve")]
async fn api_usage(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<crate::popup::PopupView> {
    axum::Json(state.popup.load().await)
}

/// Manual-entry body; fields may be numbers or strings as typed.
#[cfg(feature = "serve")]
#[derive(serde::Deserialize)]
struct ManualEntry {
    used: serde_json::Value,
    limit: serde_json::Value,
}

#[cfg(feature = "serve")]
fn field_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(feature = "serve")]
async fn api_manual(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::Json(entry): axum::Json<ManualEntry>,
) -> (axum::http::StatusCode, axum::Json<crate::popup::PopupView>) {
    use axum::http::StatusCode;

    let result = state
        .popup
        .save(&field_text(&entry.used), &field_text(&entry.limit))
        .await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(TrackerError::InvalidInput(msg)) => {
            tracing::debug!(%msg, "manual entry rejected");
            StatusCode::BAD_REQUEST
        }
        Err(e) => {
            tracing::warn!(error = %e, "manual entry failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, axum::Json(state.popup.saved_view(result).await))
}

#[cfg(feature = "serve")]
async fn api_fetch(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<crate::popup::PopupView> {
    axum::Json(state.popup.auto_fetch().await)
}

#[cfg(feature = "serve")]
async fn api_badge(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<crate::background::BadgeState> {
    axum::Json(state.badge.current().await)
}

/// Server-sent events: one `usage` event per stored record.
#[cfg(feature = "serve")]
async fn api_events(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::response::sse::Sse<
    impl tokio_stream::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>,
> {
    use axum::response::sse::{Event, KeepAlive, Sse};
    use tokio_stream::wrappers::BroadcastStream;
    use tokio_stream::StreamExt;

    let stream = BroadcastStream::new(state.store.subscribe()).filter_map(|change| match change {
        Ok(record) => Event::default()
            .event("usage")
            .json_data(record)
            .ok()
            .map(Ok),
        Err(e) => {
            tracing::debug!(error = %e, "event stream lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(all(test, feature = "serve"))]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::data_dir::DataDir;
    use crate::dom::PageSnapshot;
    use crate::page::SnapshotFile;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn runtime(dir: &std::path::Path, text: &str) -> Runtime {
        let dd = DataDir::new(dir);
        let snap = PageSnapshot::from_text("https://claude.ai/settings/usage", text);
        std::fs::write(dd.page(), serde_json::to_string(&snap).unwrap()).unwrap();
        let mut config = TrackerConfig::default();
        config.fetch.settle_delay_ms = 0;
        Runtime::start(config, &dd, Arc::new(SnapshotFile::new(dd.page()))).await
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&runtime(dir.path(), "").await);
        let resp = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_usage_empty() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&runtime(dir.path(), "").await);
        let resp = app
            .oneshot(Request::get("/api/usage").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert!(json["record"].is_null());
        assert_eq!(json["notice"]["kind"], "info");
    }

    #[tokio::test]
    async fn test_manual_entry_accepts_numbers_and_strings() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), "").await;
        let app = router(&rt);

        let resp = app
            .clone()
            .oneshot(post_json("/api/usage", serde_json::json!({"used": 5, "limit": "10"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["summary"]["percentage"], "50.0%");
        assert_eq!(json["record"]["messagesUsed"], 5);
    }

    #[tokio::test]
    async fn test_manual_entry_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), "").await;
        let app = router(&rt);

        let resp = app
            .oneshot(post_json("/api/usage", serde_json::json!({"used": -1, "limit": 10})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rt.store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_manual_entry_notice_matches_popup() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), "").await;
        let app = router(&rt);

        let resp = app
            .clone()
            .oneshot(post_json("/api/usage", serde_json::json!({"used": 3, "limit": 30})))
            .await
            .unwrap();
        let json = body_json(resp).await;
        let saved = rt.popup().save_manual("3", "30").await;
        assert_eq!(json["notice"]["message"], saved.notice.unwrap().message);

        let resp = app
            .oneshot(post_json("/api/usage", serde_json::json!({"used": "x", "limit": 30})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        let rejected = rt.popup().save_manual("x", "30").await;
        assert_eq!(json["notice"]["kind"], "error");
        assert_eq!(json["notice"]["message"], rejected.notice.unwrap().message);
        // The stored record is still shown alongside the error.
        assert_eq!(json["record"]["messagesUsed"], 3);
    }

    #[tokio::test]
    async fn test_fetch_and_badge() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), "95 of 100 messages").await;
        let app = router(&rt);

        let resp = app
            .clone()
            .oneshot(post_json("/api/fetch", serde_json::json!({})))
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["notice"]["kind"], "success");
        assert_eq!(json["summary"]["tier"], "danger");

        let resp = app
            .oneshot(Request::get("/api/badge").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["text"], "95%");
        assert_eq!(json["color"], "#ef4444");
    }
}
