use serde::{Deserialize, Serialize};

use crate::services::aggregate::RatingAggregate;

/// Stored listing document. Only the rating aggregate is relevant here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRecord {
    pub id: String,
    #[serde(default)]
    pub rating_avg: f64,
    #[serde(default)]
    pub rating_count: i64,
}

impl ListingRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rating_avg: 0.0,
            rating_count: 0,
        }
    }

    pub fn aggregate(&self) -> RatingAggregate {
        RatingAggregate::from_stored(self.rating_avg, self.rating_count)
    }
}

/// Explicit set of listing fields to write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListingPatch {
    pub rating_avg: f64,
    pub rating_count: i64,
}

impl ListingPatch {
    pub fn from_aggregate(aggregate: RatingAggregate) -> Self {
        Self {
            rating_avg: aggregate.avg,
            rating_count: aggregate.count as i64,
        }
    }

    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        fields.insert("ratingAvg".into(), serde_json::Value::from(self.rating_avg));
        fields.insert("ratingCount".into(), serde_json::Value::from(self.rating_count));
        fields
    }
}

/// Public rating summary for a listing, as served and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub listing_id: String,
    pub rating_avg: f64,
    pub rating_count: u64,
}

impl RatingSummary {
    pub fn new(listing_id: impl Into<String>, aggregate: RatingAggregate) -> Self {
        Self {
            listing_id: listing_id.into(),
            rating_avg: aggregate.avg,
            rating_count: aggregate.count,
        }
    }
}
