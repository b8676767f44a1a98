use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::cache::rating_key;
use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::models::{ModerateReviewRequest, RejectReviewRequest};
use crate::services::moderation::{ModerationOutcome, ModerationRequest};
use crate::AppState;

async fn after_moderation(state: &AppState, outcome: &ModerationOutcome) -> Json<Value> {
    // Overwrite rather than delete, so a reader that raced the commit and
    // cached the older summary gets replaced with the committed one.
    if outcome.aggregate_changed {
        if let Some(cache) = &state.cache {
            cache
                .set_json(
                    &rating_key(&outcome.listing_id),
                    &outcome.summary(),
                    state.config.redis.rating_cache_secs,
                )
                .await;
        }
    }

    Json(json!({
        "status": outcome.status,
        "reviewId": outcome.review_id,
        "listingId": outcome.listing_id,
        "ratingAvg": outcome.aggregate.avg,
        "ratingCount": outcome.aggregate.count,
    }))
}

pub async fn approve_review(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let outcome = state.moderation.approve(&id, &user.id).await?;
    Ok(after_moderation(&state, &outcome).await)
}

pub async fn reject_review(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Option<Json<RejectReviewRequest>>,
) -> AppResult<Json<Value>> {
    let reason = body.and_then(|Json(b)| b.reason);
    let outcome = state.moderation.reject(&id, reason, &user.id).await?;
    Ok(after_moderation(&state, &outcome).await)
}

pub async fn moderate_review(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<ModerateReviewRequest>,
) -> AppResult<Json<Value>> {
    let outcome = state
        .moderation
        .moderate(ModerationRequest {
            review_id: id,
            decision: body.decision,
            reason: body.reason,
            moderator_id: user.id,
        })
        .await?;
    Ok(after_moderation(&state, &outcome).await)
}
