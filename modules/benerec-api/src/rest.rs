use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info};

use benerec_common::UserId;
use benerec_engine::Resolution;

use crate::AppState;

/// Flow:
///   1. Cache hit → 200 with the cached list.
///   2. Cold-start → compute synchronously, 200 with the fresh list.
///   3. Otherwise → enqueue an async refresh and answer 202 "generating".
pub async fn get_recommendations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let user_id = UserId(user_id);

    match state.orchestrator.resolve(&user_id).await {
        Resolution::CacheHit(recommendations) => {
            info!(user_id = %user_id, "Serving cached recommendations");
            Json(serde_json::json!({
                "user_id": user_id,
                "recommendations": recommendations,
                "source": "cache",
                "strategy": "cache",
            }))
            .into_response()
        }
        Resolution::ColdStart(recommendations) => {
            info!(user_id = %user_id, "Serving cold-start recommendations");
            Json(serde_json::json!({
                "user_id": user_id,
                "recommendations": recommendations,
                "source": "cold_start",
                "strategy": "cold_start",
            }))
            .into_response()
        }
        Resolution::OnDemand => match state.refresh_queue.enqueue(&user_id).await {
            Ok(_) => (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "user_id": user_id,
                    "status": "generating",
                    "message": "Recommendations are being generated in the background. Please retry in a few seconds.",
                    "source": "on_demand",
                })),
            )
                .into_response(),
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to enqueue refresh");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "detail": e.to_string() })),
                )
                    .into_response()
            }
        },
    }
}

/// Enqueue an asynchronous refresh unconditionally.
pub async fn refresh_recommendations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let user_id = UserId(user_id);

    match state.refresh_queue.enqueue(&user_id).await {
        Ok(task_id) => Json(serde_json::json!({
            "status": "refresh_queued",
            "user_id": user_id,
            "task_id": task_id,
        }))
        .into_response(),
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to enqueue refresh");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "detail": e.to_string() })),
            )
                .into_response()
        }
    }
}
