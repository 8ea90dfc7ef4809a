//! HTTP surface: provider webhooks, operator API, cron trigger and
//! real-time subscriptions.

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use secrecy::SecretString;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dispatch::{Dispatcher, Scheduler};
use crate::ingest::InboundPipeline;
use crate::realtime::Fanout;
use crate::store::Database;

pub mod analytics;
pub mod contacts;
pub mod cron;
pub mod error;
pub mod messages;
pub mod notes;
pub mod realtime;
pub mod webhook;

pub use error::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub pipeline: Arc<InboundPipeline>,
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Arc<Scheduler>,
    pub fanout: Arc<Fanout>,
    /// Bearer secret for the cron trigger. `None` rejects every call.
    pub cron_secret: Option<SecretString>,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/webhooks/twilio",
            post(webhook::receive).get(webhook::liveness),
        )
        .route("/api/messages", get(messages::list))
        .route("/api/messages/send", post(messages::send))
        .route("/api/messages/unread-count", get(messages::unread_count))
        .route("/api/messages/{id}/read", post(messages::mark_read))
        .route("/api/scheduled-messages", get(messages::list_due_scheduled))
        .route("/api/contacts", get(contacts::list))
        .route("/api/contacts/duplicates", get(contacts::duplicates))
        .route("/api/contacts/merge", post(contacts::merge))
        .route("/api/contacts/{id}", get(contacts::get_one))
        .route("/api/notes", get(notes::list).post(notes::create))
        .route("/api/notes/{id}", patch(notes::update))
        .route("/api/analytics", get(analytics::report))
        .route(
            "/api/cron/scheduled-messages",
            get(cron::run_sweep).post(cron::run_sweep),
        )
        .route("/api/realtime/{topic}", get(realtime::sse_handler))
        .route("/ws/realtime/{topic}", get(realtime::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "unified-inbox"
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::channels::ConfiguredSenders;
    use crate::config::ChannelSettings;
    use crate::realtime::LocalHub;
    use crate::store::LibSqlBackend;

    async fn app() -> Router {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let fanout = Arc::new(Fanout::local_only(LocalHub::new()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&db),
            Arc::new(ConfiguredSenders::new(ChannelSettings::default())),
            Arc::clone(&fanout),
        ));
        router(AppState {
            pipeline: Arc::new(InboundPipeline::new(Arc::clone(&db), Arc::clone(&fanout))),
            scheduler: Arc::new(Scheduler::new(Arc::clone(&db), Arc::clone(&dispatcher))),
            db,
            dispatcher,
            fanout,
            cron_secret: None,
        })
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_and_webhook_liveness() {
        let (status, json) = get(app().await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["service"], "unified-inbox");

        let (status, json) = get(app().await, "/api/webhooks/twilio").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn cron_without_configured_secret_is_unauthorized() {
        let (status, json) = get(app().await, "/api/cron/scheduled-messages").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["code"], "unauthorized");
    }

    #[tokio::test]
    async fn unknown_contact_is_not_found() {
        let (status, json) = get(app().await, "/api/contacts/nobody").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Contact not found");
    }

    #[tokio::test]
    async fn empty_reads() {
        let (status, json) = get(app().await, "/api/messages/unread-count").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 0);

        let (_, json) = get(app().await, "/api/contacts/duplicates").await;
        assert_eq!(json["duplicates"], serde_json::json!([]));

        let (status, json) = get(app().await, "/api/messages").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["details"][0]["field"], "contactId");
    }

    async fn send_json(
        app: Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            req = req.header(messages::USER_ID_HEADER, user);
        }
        let resp = app
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn notes_require_an_author() {
        let (status, json) = send_json(
            app().await,
            "POST",
            "/api/notes",
            None,
            serde_json::json!({"contactId": "c1", "content": "hi"}),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["code"], "unauthorized");

        let (status, json) = send_json(
            app().await,
            "POST",
            "/api/notes",
            Some("alice"),
            serde_json::json!({"contactId": "nobody", "content": "hi"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Contact not found");

        let (status, json) = get(app().await, "/api/notes").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["details"][0]["field"], "contactId");
    }

    #[tokio::test]
    async fn analytics_on_empty_inbox() {
        let (status, json) = get(app().await, "/api/analytics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["metrics"]["totalInbound"], 0);
        assert_eq!(json["metrics"]["responseRate"], 0.0);
        assert_eq!(json["dailyVolume"], serde_json::json!([]));

        let (status, json) = get(app().await, "/api/analytics?days=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["details"][0]["field"], "days");
    }

    #[tokio::test]
    async fn send_to_unknown_contact_is_not_found() {
        let app = app().await;
        let req = Request::post("/api/messages/send")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"contactId":"c1","channel":"SMS","body":"hi"}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
