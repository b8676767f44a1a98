use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::rating_key;
use crate::error::{AppError, AppResult};
use crate::models::RatingSummary;
use crate::AppState;

pub async fn get_rating(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
) -> AppResult<Json<RatingSummary>> {
    let key = rating_key(&listing_id);
    if let Some(cache) = &state.cache {
        if let Some(summary) = cache.get_json::<RatingSummary>(&key).await {
            return Ok(Json(summary));
        }
    }

    // Read-only: the transaction is dropped without committing.
    let mut tx = state.store.begin().await?;
    let listing = tx
        .get_listing(&listing_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("listing '{listing_id}' not found")))?;
    drop(tx);

    let aggregate = listing.aggregate();
    let summary = RatingSummary::new(listing.id, aggregate);
    // A moderation committing between the read above and this write may be
    // overwritten with the older summary; the TTL bounds how long it lasts.
    if let Some(cache) = &state.cache {
        cache
            .set_json(&key, &summary, state.config.redis.rating_cache_secs)
            .await;
    }
    Ok(Json(summary))
}
