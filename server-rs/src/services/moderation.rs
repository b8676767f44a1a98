//! Review moderation: the approve/reject state machine and the listing
//! aggregate update that goes with it, applied in one storage transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::{
    CountedRating, Decision, ListingPatch, RatingSummary, ReviewPatch, ReviewRecord, ReviewStatus,
};
use crate::services::aggregate::{AggregateChange, RatingAggregate};
use crate::store::{self, BoxedTransaction, StoreError, Transactor};

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid moderation request: {0}")]
    InvalidState(String),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct ModerationRequest {
    pub review_id: String,
    pub decision: String,
    pub reason: Option<String>,
    pub moderator_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModerationOutcome {
    pub review_id: String,
    pub listing_id: String,
    pub previous_status: ReviewStatus,
    pub status: ReviewStatus,
    pub previous_aggregate: RatingAggregate,
    pub aggregate: RatingAggregate,
    pub aggregate_changed: bool,
}

impl ModerationOutcome {
    /// The listing's rating summary as committed by this decision.
    pub fn summary(&self) -> RatingSummary {
        RatingSummary::new(self.listing_id.clone(), self.aggregate)
    }
}

/// What a decision does to one review and its listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: ReviewStatus,
    pub change: AggregateChange,
    pub counted_rating: Option<CountedRating>,
    pub writes_review: bool,
}

/// Decide the transition for `decision` given the review and the listing's
/// current aggregate. Pure; performs no I/O.
pub fn plan(review: &ReviewRecord, aggregate: RatingAggregate, decision: Decision) -> Transition {
    let to = decision.target_status();
    match (decision, review.status) {
        (Decision::Approve, ReviewStatus::Approved) => Transition {
            to,
            change: AggregateChange::Unchanged,
            counted_rating: None,
            writes_review: false,
        },
        (Decision::Approve, _) => {
            let current = review.normalized_rating();
            // A review still counted with an older value is replaced in place.
            // With an empty aggregate there is nothing to replace.
            let change = match review.counted_rating() {
                Some(previous) if aggregate.count > 0 => {
                    AggregateChange::Replace { previous, current }
                }
                _ => AggregateChange::Add(current),
            };
            Transition {
                to,
                change,
                counted_rating: Some(CountedRating::Set(current)),
                writes_review: true,
            }
        }
        (Decision::Reject, ReviewStatus::Approved) => {
            let change = if aggregate.count > 0 {
                // Records approved before lastApprovedRating existed fall back
                // to the rating as it reads now.
                let removed = review
                    .counted_rating()
                    .unwrap_or_else(|| review.normalized_rating());
                AggregateChange::Remove(removed)
            } else {
                AggregateChange::Unchanged
            };
            Transition {
                to,
                change,
                counted_rating: Some(CountedRating::Clear),
                writes_review: true,
            }
        }
        (Decision::Reject, _) => Transition {
            to,
            change: AggregateChange::Unchanged,
            counted_rating: None,
            writes_review: true,
        },
    }
}

async fn apply_transition(
    tx: &mut BoxedTransaction,
    review_id: &str,
    decision: Decision,
    reason: Option<String>,
    moderator_id: &str,
    now: DateTime<Utc>,
) -> Result<ModerationOutcome, ModerationError> {
    let review = tx
        .get_review(review_id)
        .await?
        .ok_or_else(|| ModerationError::NotFound(format!("review '{review_id}'")))?;
    let listing = tx
        .get_listing(&review.listing_id)
        .await?
        .ok_or_else(|| ModerationError::NotFound(format!("listing '{}'", review.listing_id)))?;

    let before = listing.aggregate();
    let transition = plan(&review, before, decision);
    let after = before.apply(transition.change);

    if transition.writes_review {
        let patch = ReviewPatch {
            status: Some(transition.to),
            last_approved_rating: transition.counted_rating,
            moderated_by: Some(moderator_id.to_string()),
            moderated_at: Some(now),
            rejection_reason: match decision {
                Decision::Reject => Some(reason.unwrap_or_default()),
                Decision::Approve => None,
            },
        };
        tx.put_review(review_id, &patch).await?;
    }

    let aggregate_changed = transition.change != AggregateChange::Unchanged;
    if aggregate_changed {
        tx.put_listing(&listing.id, &ListingPatch::from_aggregate(after))
            .await?;
    }

    Ok(ModerationOutcome {
        review_id: review.id,
        listing_id: listing.id,
        previous_status: review.status,
        status: transition.to,
        previous_aggregate: before,
        aggregate: after,
        aggregate_changed,
    })
}

/// Applies moderation decisions. Holds no state besides the store handle, so
/// clones can run concurrently. Each call is a single transaction attempt;
/// a [`ModerationError::StorageFailure`] may be retried by the caller.
#[derive(Clone)]
pub struct ModerationEngine {
    store: Arc<dyn Transactor>,
}

impl ModerationEngine {
    pub fn new(store: Arc<dyn Transactor>) -> Self {
        Self { store }
    }

    pub async fn moderate(
        &self,
        request: ModerationRequest,
    ) -> Result<ModerationOutcome, ModerationError> {
        let decision: Decision = request
            .decision
            .parse()
            .map_err(ModerationError::InvalidState)?;
        self.decide(&request.review_id, decision, request.reason, &request.moderator_id)
            .await
    }

    pub async fn approve(
        &self,
        review_id: &str,
        moderator_id: &str,
    ) -> Result<ModerationOutcome, ModerationError> {
        self.decide(review_id, Decision::Approve, None, moderator_id)
            .await
    }

    pub async fn reject(
        &self,
        review_id: &str,
        reason: Option<String>,
        moderator_id: &str,
    ) -> Result<ModerationOutcome, ModerationError> {
        self.decide(review_id, Decision::Reject, reason, moderator_id)
            .await
    }

    pub async fn decide(
        &self,
        review_id: &str,
        decision: Decision,
        reason: Option<String>,
        moderator_id: &str,
    ) -> Result<ModerationOutcome, ModerationError> {
        let id = review_id.to_string();
        let moderator = moderator_id.to_string();
        let now = Utc::now();

        let result = store::run_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                apply_transition(tx, &id, decision, reason, &moderator, now).await
            })
        })
        .await;

        match &result {
            Ok(outcome) if outcome.previous_status != outcome.status || outcome.aggregate_changed => {
                tracing::info!(
                    review_id = %outcome.review_id,
                    listing_id = %outcome.listing_id,
                    moderator_id,
                    %decision,
                    from = %outcome.previous_status,
                    to = %outcome.status,
                    prev_avg = outcome.previous_aggregate.avg,
                    prev_count = outcome.previous_aggregate.count,
                    rating_avg = outcome.aggregate.avg,
                    rating_count = outcome.aggregate.count,
                    "Review moderated"
                );
            }
            Ok(outcome) => {
                tracing::debug!(
                    review_id = %outcome.review_id,
                    %decision,
                    status = %outcome.status,
                    "Decision already in effect"
                );
            }
            Err(ModerationError::StorageFailure(e)) => {
                tracing::warn!(review_id, %decision, error = %e, "Moderation transaction failed");
            }
            Err(e) => {
                tracing::debug!(review_id, %decision, error = %e, "Moderation rejected");
            }
        }

        result
    }
}
