//! Incremental maintenance of a listing's `(ratingAvg, ratingCount)` pair.
//!
//! The running total is never stored; every update reconstructs it as
//! `avg * count` from the two persisted numbers.

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// Clamp a stored rating into `MIN_RATING..=MAX_RATING`.
pub fn clamp_rating(raw: i64) -> u8 {
    raw.clamp(MIN_RATING as i64, MAX_RATING as i64) as u8
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingAggregate {
    pub avg: f64,
    pub count: u64,
}

/// How a single transition changes the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateChange {
    Unchanged,
    /// First approval: fold a new rating in.
    Add(u8),
    /// Re-approval of a review that is still counted with an older value.
    Replace { previous: u8, current: u8 },
    /// Rejection of a counted review.
    Remove(u8),
}

impl RatingAggregate {
    pub const EMPTY: RatingAggregate = RatingAggregate { avg: 0.0, count: 0 };

    /// Normalise what is stored on a listing. Negative counts read as zero,
    /// non-finite averages as zero, and a zero count always has a zero average.
    pub fn from_stored(avg: f64, count: i64) -> Self {
        let count = count.max(0) as u64;
        let avg = if count == 0 || !avg.is_finite() { 0.0 } else { avg };
        Self { avg, count }
    }

    pub fn total(&self) -> f64 {
        self.avg * self.count as f64
    }

    fn from_total(total: f64, count: u64) -> Self {
        if count == 0 {
            return Self::EMPTY;
        }
        Self {
            avg: total / count as f64,
            count,
        }
    }

    pub fn apply(&self, change: AggregateChange) -> Self {
        match change {
            AggregateChange::Unchanged => *self,
            AggregateChange::Add(rating) => {
                Self::from_total(self.total() + rating as f64, self.count + 1)
            }
            AggregateChange::Replace { previous, current } => Self::from_total(
                self.total() - previous as f64 + current as f64,
                self.count,
            ),
            AggregateChange::Remove(rating) => Self::from_total(
                self.total() - rating as f64,
                self.count.saturating_sub(1),
            ),
        }
    }
}

#[cfg(test)]
pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
