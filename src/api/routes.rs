//! HTTP route handlers for the intake API.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{SelfHealConfig, ServerConfig};
use crate::guards::Guards;
use crate::llm::LlmClient;
use crate::model::Feedback;
use crate::store::FeedbackStore;
use crate::trigger::Trigger;

use super::types::*;

/// Shown to the user when the guard blocks a submission. Deliberately vague:
/// echoing the classifier's reasoning back to an attacker helps them iterate.
const GUARD_BLOCK_MESSAGE: &str =
    "Your feedback couldn't be processed. Please rephrase and try again.";

/// Shared application state.
pub struct AppState {
    pub store: Arc<FeedbackStore>,
    pub guards: Guards<Box<dyn LlmClient>>,
    /// `None` when self-healing is disabled or misconfigured; the intake
    /// still accepts feedback either way.
    pub trigger: Option<Arc<Trigger>>,
}

impl AppState {
    pub fn build(server: &ServerConfig, selfheal: SelfHealConfig) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(FeedbackStore::open(&server.database_path)?);
        let guards = Guards::from_config(&selfheal);

        let trigger = if !selfheal.enabled {
            None
        } else {
            match selfheal.validate() {
                Ok(()) => {
                    tracing::info!("self-healing enabled ({} mode)", selfheal.mode);
                    Some(Arc::new(Trigger::new(selfheal)))
                }
                Err(e) => {
                    tracing::warn!("self-healing config invalid, disabling: {}", e);
                    None
                }
            }
        };

        Ok(Arc::new(AppState {
            store,
            guards,
            trigger,
        }))
    }
}

/// Start the HTTP server.
pub async fn serve(server: ServerConfig, selfheal: SelfHealConfig) -> anyhow::Result<()> {
    let state = AppState::build(&server, selfheal)?;
    let app = router(state);

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/feedback", get(list_feedback).post(submit_feedback))
        .route("/api/feedback/:id", get(get_feedback))
        .route("/api/selfhealing/status", get(selfhealing_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            details: None,
        }),
    )
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /api/feedback — the widget's submission endpoint.
///
/// Synchronous phase of the dispatch pipeline: validate, guard-check,
/// persist, consult the trigger. The analysis itself runs on a detached
/// task; the client only ever sees the acceptance message.
async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SubmitFeedbackRequest>,
) -> Result<(StatusCode, Json<SubmitFeedbackResponse>), ApiError> {
    let title = request.title.trim().to_string();
    let description = request.description.trim().to_string();

    if title.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "Title is required"));
    }
    if description.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "Description is required"));
    }

    let mut feedback = Feedback::new(title, description, request.kind);
    feedback.console_logs = request.console_logs.filter(|s| !s.is_empty());
    feedback.url = request
        .url
        .filter(|s| !s.is_empty())
        .or_else(|| header_value(&headers, header::REFERER));
    feedback.user_agent = header_value(&headers, header::USER_AGENT);
    if let Some(metadata) = &request.metadata {
        apply_metadata(&mut feedback, metadata);
    }

    // With self-healing on, the submission will reach an LLM; check it for
    // injection before it is allowed to exist. Blocked reports are never
    // persisted.
    if state.trigger.is_some() {
        let user_input = format!("{}\n{}", feedback.title, feedback.description);
        let verdict = state.guards.check_injection(&user_input).await;
        if verdict.blocked {
            tracing::warn!("feedback blocked by guard: {}", verdict.reason);
            return Err(error(StatusCode::BAD_REQUEST, GUARD_BLOCK_MESSAGE));
        }
    }

    let id = match state.store.create(&feedback) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("failed to create feedback: {}", e);
            return Err(error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to save feedback",
            ));
        }
    };
    feedback.id = id;
    tracing::info!("created feedback #{}: {}", id, feedback.title);

    let mut message = "Feedback submitted successfully".to_string();
    if let Some(trigger) = &state.trigger {
        let (allowed, reason) = trigger.can_trigger(&feedback).await;
        if allowed {
            tracing::info!("triggering self-healing for feedback #{}", id);
            let receiver = trigger.clone().dispatch(state.store.clone(), feedback);
            // In-process observer; the client never waits on this.
            tokio::spawn(async move {
                if let Ok(result) = receiver.await {
                    tracing::info!("self-healing finished for feedback #{}: {}", id, result.message);
                }
            });
            message = "Feedback submitted. Self-healing analysis started.".to_string();
        } else {
            tracing::info!("self-healing not triggered for feedback #{}: {}", id, reason);
        }
    }

    Ok((StatusCode::CREATED, Json(SubmitFeedbackResponse { id, message })))
}

/// GET /api/feedback — paginated listing, heavy fields stripped.
async fn list_feedback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Feedback>>, ApiError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut feedbacks = state.store.list(limit, offset).map_err(|e| {
        tracing::error!("failed to list feedback: {}", e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve feedback")
    })?;

    // Console logs can be huge; the list view doesn't need them.
    for feedback in &mut feedbacks {
        feedback.console_logs = None;
    }

    Ok(Json(feedbacks))
}

/// GET /api/feedback/:id
async fn get_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Feedback>, ApiError> {
    let feedback = state.store.get(id).map_err(|e| {
        tracing::error!("failed to get feedback {}: {}", id, e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve feedback")
    })?;

    match feedback {
        Some(feedback) => Ok(Json(feedback)),
        None => Err(error(StatusCode::NOT_FOUND, "Feedback not found")),
    }
}

/// GET /api/selfhealing/status — trigger state and strategy health probes.
async fn selfhealing_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match &state.trigger {
        Some(trigger) => Json(trigger.status().await),
        None => Json(json!({
            "enabled": false,
            "message": "Self-healing not configured",
        })),
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
