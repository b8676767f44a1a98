use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::aggregate::clamp_rating;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            other => Err(format!("unknown review status '{other}'")),
        }
    }
}

/// A moderator's verdict on a single review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }

    /// Status a review ends up in once this decision is applied.
    pub fn target_status(&self) -> ReviewStatus {
        match self {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Reject => ReviewStatus::Rejected,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "approve" => Ok(Decision::Approve),
            "reject" => Ok(Decision::Reject),
            other => Err(format!("decision must be 'approve' or 'reject', got '{other}'")),
        }
    }
}

/// Stored review document, as seen by the moderation engine.
///
/// Ratings are kept raw here; use [`ReviewRecord::normalized_rating`] and
/// [`ReviewRecord::counted_rating`] to read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub id: String,
    pub listing_id: String,
    #[serde(default)]
    pub rating: i64,
    #[serde(default)]
    pub status: ReviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_approved_rating: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl ReviewRecord {
    pub fn new(id: impl Into<String>, listing_id: impl Into<String>, rating: i64) -> Self {
        Self {
            id: id.into(),
            listing_id: listing_id.into(),
            rating,
            status: ReviewStatus::Pending,
            last_approved_rating: None,
            moderated_by: None,
            moderated_at: None,
            rejection_reason: None,
        }
    }

    /// Current rating clamped into `1..=5`.
    pub fn normalized_rating(&self) -> u8 {
        clamp_rating(self.rating)
    }

    /// Rating value currently folded into the listing aggregate, if any.
    /// Zero or negative means the review was never counted.
    pub fn counted_rating(&self) -> Option<u8> {
        self.last_approved_rating
            .filter(|r| *r > 0)
            .map(clamp_rating)
    }
}

/// `lastApprovedRating` update carried by a [`ReviewPatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountedRating {
    Set(u8),
    Clear,
}

/// Explicit set of review fields to write. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewPatch {
    pub status: Option<ReviewStatus>,
    pub last_approved_rating: Option<CountedRating>,
    pub moderated_by: Option<String>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl ReviewPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.last_approved_rating.is_none()
            && self.moderated_by.is_none()
            && self.moderated_at.is_none()
            && self.rejection_reason.is_none()
    }

    /// Field map in document form. A cleared `lastApprovedRating` is written as `null`.
    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        use serde_json::Value;

        let mut fields = serde_json::Map::new();
        if let Some(status) = self.status {
            fields.insert("status".into(), Value::from(status.as_str()));
        }
        match self.last_approved_rating {
            Some(CountedRating::Set(r)) => {
                fields.insert("lastApprovedRating".into(), Value::from(r));
            }
            Some(CountedRating::Clear) => {
                fields.insert("lastApprovedRating".into(), Value::Null);
            }
            None => {}
        }
        if let Some(by) = &self.moderated_by {
            fields.insert("moderatedBy".into(), Value::from(by.as_str()));
        }
        if let Some(at) = &self.moderated_at {
            fields.insert("moderatedAt".into(), Value::from(at.to_rfc3339()));
        }
        if let Some(reason) = &self.rejection_reason {
            fields.insert("rejectionReason".into(), Value::from(reason.as_str()));
        }
        fields
    }
}

#[derive(Debug, Deserialize)]
pub struct RejectReviewRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModerateReviewRequest {
    pub decision: String,
    pub reason: Option<String>,
}
