//! Postgres backend. Each table carries a `version` column; writes are
//! conditional on the version read earlier in the same transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, Postgres};
use sqlx::QueryBuilder;

use super::{BoxedTransaction, StoreError, Transaction, Transactor};
use crate::models::{
    CountedRating, ListingPatch, ListingRecord, ReviewPatch, ReviewRecord, ReviewStatus,
};

/// Serialization failure and deadlock SQLSTATEs.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.iter().any(|sqlstate| code == *sqlstate))
        {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    match err {
        sqlx::Error::PoolTimedOut => StoreError::Unavailable("connection pool timed out".into()),
        sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool closed".into()),
        other => StoreError::Database(other),
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl Transactor for PgStore {
    async fn begin(&self) -> Result<BoxedTransaction, StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        Ok(Box::new(PgTransaction {
            tx,
            review_versions: HashMap::new(),
            listing_versions: HashMap::new(),
        }))
    }

    async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: String,
    listing_id: String,
    rating: i32,
    status: String,
    last_approved_rating: Option<i32>,
    moderated_by: Option<String>,
    moderated_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    version: i64,
}

impl ReviewRow {
    fn into_record(self) -> Result<ReviewRecord, StoreError> {
        let status: ReviewStatus = self.status.parse().map_err(|reason| StoreError::Malformed {
            collection: "review",
            id: self.id.clone(),
            reason,
        })?;
        Ok(ReviewRecord {
            id: self.id,
            listing_id: self.listing_id,
            rating: self.rating as i64,
            status,
            last_approved_rating: self.last_approved_rating.map(i64::from),
            moderated_by: self.moderated_by,
            moderated_at: self.moderated_at,
            rejection_reason: self.rejection_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: String,
    rating_avg: f64,
    rating_count: i64,
    version: i64,
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    review_versions: HashMap<String, i64>,
    listing_versions: HashMap<String, i64>,
}

impl PgTransaction {
    async fn execute_versioned(
        &mut self,
        mut query: QueryBuilder<'_, Postgres>,
        table: &'static str,
        id: &str,
    ) -> Result<(), StoreError> {
        let versions = match table {
            "reviews" => &mut self.review_versions,
            _ => &mut self.listing_versions,
        };
        query.push(" WHERE id = ").push_bind(id.to_string());
        if let Some(version) = versions.get(id) {
            query.push(" AND version = ").push_bind(*version);
        }

        let result = query
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "{table} row '{id}' is missing or was modified concurrently"
            )));
        }
        if let Some(version) = versions.get_mut(id) {
            *version += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn get_review(&mut self, id: &str) -> Result<Option<ReviewRecord>, StoreError> {
        let row: Option<ReviewRow> = sqlx::query_as(
            r#"SELECT id, listing_id, rating, status, last_approved_rating,
                moderated_by, moderated_at, rejection_reason, version
            FROM reviews WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;

        let Some(row) = row else {
            return Ok(None);
        };
        self.review_versions
            .entry(row.id.clone())
            .or_insert(row.version);
        row.into_record().map(Some)
    }

    async fn put_review(&mut self, id: &str, patch: &ReviewPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut query =
            QueryBuilder::<Postgres>::new("UPDATE reviews SET version = version + 1, updated_at = NOW()");
        if let Some(status) = patch.status {
            query.push(", status = ").push_bind(status.as_str());
        }
        match patch.last_approved_rating {
            Some(CountedRating::Set(rating)) => {
                query.push(", last_approved_rating = ").push_bind(rating as i32);
            }
            Some(CountedRating::Clear) => {
                query.push(", last_approved_rating = NULL");
            }
            None => {}
        }
        if let Some(by) = &patch.moderated_by {
            query.push(", moderated_by = ").push_bind(by.clone());
        }
        if let Some(at) = patch.moderated_at {
            query.push(", moderated_at = ").push_bind(at);
        }
        if let Some(reason) = &patch.rejection_reason {
            query.push(", rejection_reason = ").push_bind(reason.clone());
        }

        self.execute_versioned(query, "reviews", id).await
    }

    async fn get_listing(&mut self, id: &str) -> Result<Option<ListingRecord>, StoreError> {
        let row: Option<ListingRow> = sqlx::query_as(
            "SELECT id, rating_avg, rating_count, version FROM listings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(row.map(|row| {
            self.listing_versions
                .entry(row.id.clone())
                .or_insert(row.version);
            ListingRecord {
                id: row.id,
                rating_avg: row.rating_avg,
                rating_count: row.rating_count,
            }
        }))
    }

    async fn put_listing(&mut self, id: &str, patch: &ListingPatch) -> Result<(), StoreError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "UPDATE listings SET version = version + 1, updated_at = NOW()",
        );
        query
            .push(", rating_avg = ")
            .push_bind(patch.rating_avg)
            .push(", rating_count = ")
            .push_bind(patch.rating_count);

        self.execute_versioned(query, "listings", id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(classify)
    }
}
