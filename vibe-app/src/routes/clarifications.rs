//! Read-only view of pending clarification queues. Requester ids are never
//! exposed.

use crate::server::AppState;
use axum::extract::Path;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use vibe_channels::{MessageId, UserId};
use vibe_clarify::PendingSnapshot;

#[derive(Debug, Serialize)]
struct PendingView {
    message_id: MessageId,
    content: String,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ClarifierView {
    clarifier_id: UserId,
    driving: bool,
    pending: Vec<PendingView>,
}

impl From<PendingSnapshot> for ClarifierView {
    fn from(snapshot: PendingSnapshot) -> Self {
        Self {
            clarifier_id: snapshot.clarifier_id,
            driving: snapshot.driving,
            pending: snapshot
                .pending
                .into_iter()
                .map(|r| PendingView {
                    message_id: r.message_id,
                    content: r.content,
                    enqueued_at: r.enqueued_at,
                })
                .collect(),
        }
    }
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/clarifications", get(list_clarifications))
        .route("/api/v1/clarifications/{user_id}", get(get_clarifications))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_clarifications(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<serde_json::Value> {
    let clarifiers: Vec<ClarifierView> = state
        .engine
        .store()
        .snapshot()
        .into_iter()
        .map(ClarifierView::from)
        .collect();
    Json(serde_json::json!({ "clarifiers": clarifiers }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_clarifications(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<serde_json::Value> {
    let user_id = UserId::new(user_id);
    let view = match state.engine.store().pending_for(&user_id) {
        Some(snapshot) => ClarifierView::from(snapshot),
        None => ClarifierView {
            clarifier_id: user_id,
            driving: false,
            pending: Vec::new(),
        },
    };
    Json(serde_json::json!(view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use vibe_clarify::{
        ClarificationEngine, ClarificationQueueStore, ClarificationRequest, CollectOptions,
        DirectChannel, EngineSettings, ReplyCollector, ToneAnalyzer,
    };

    struct Unused;

    #[async_trait::async_trait]
    impl DirectChannel for Unused {
        async fn send(&self, _user_id: &UserId, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn collect(&self, _user_id: &UserId, _options: CollectOptions) -> anyhow::Result<ReplyCollector> {
            anyhow::bail!("not used")
        }
    }

    #[async_trait::async_trait]
    impl ToneAnalyzer for Unused {
        async fn analyze(&self, _text: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    fn state_with_pending() -> Arc<AppState> {
        let engine = ClarificationEngine::new(
            ClarificationQueueStore::new(),
            Arc::new(Unused),
            Arc::new(Unused),
            EngineSettings::default(),
        );
        engine.enqueue(ClarificationRequest::new(
            UserId::new("author"),
            UserId::new("secret-requester"),
            MessageId::new("m1"),
            "you ok?",
        ));
        Arc::new(AppState {
            engine: Arc::new(engine),
            started_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn listing_hides_requesters() {
        let Json(body) = list_clarifications(Extension(state_with_pending())).await;
        let clarifiers = body["clarifiers"].as_array().expect("array");
        assert_eq!(clarifiers.len(), 1);
        assert_eq!(clarifiers[0]["clarifier_id"], "author");
        assert_eq!(clarifiers[0]["pending"][0]["content"], "you ok?");
        assert!(!body.to_string().contains("secret-requester"));
    }

    #[tokio::test]
    async fn unknown_clarifier_has_nothing_pending() {
        let state = state_with_pending();
        let Json(body) = get_clarifications(Extension(state.clone()), Path("nobody".to_string())).await;
        assert_eq!(body["pending"].as_array().map(Vec::len), Some(0));

        let Json(body) = get_clarifications(Extension(state), Path("author".to_string())).await;
        assert_eq!(body["pending"][0]["message_id"], "m1");
        assert!(!body.to_string().contains("secret-requester"));
    }
}
