//! Transactional access to review and listing documents.
//!
//! The moderation engine only talks to storage through [`Transactor`] and
//! [`Transaction`]. Every read and write of one moderation happens on a single
//! transaction; nothing becomes visible until [`Transaction::commit`], and
//! dropping an uncommitted transaction discards its writes.

mod memory;
mod postgres;

pub use memory::{Collection, MemoryStore, MemoryTransaction};
pub use postgres::{PgStore, PgTransaction};

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::models::{ListingPatch, ListingRecord, ReviewPatch, ReviewRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another transaction changed a document this one read or wrote.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("malformed {collection} document '{id}': {reason}")]
    Malformed {
        collection: &'static str,
        id: String,
        reason: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

#[async_trait]
pub trait Transaction: Send {
    async fn get_review(&mut self, id: &str) -> Result<Option<ReviewRecord>, StoreError>;

    /// Write exactly the fields set on `patch`; all other fields are left as they are.
    async fn put_review(&mut self, id: &str, patch: &ReviewPatch) -> Result<(), StoreError>;

    async fn get_listing(&mut self, id: &str) -> Result<Option<ListingRecord>, StoreError>;

    async fn put_listing(&mut self, id: &str, patch: &ListingPatch) -> Result<(), StoreError>;

    /// Publish all writes atomically, or fail with nothing published.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

pub type BoxedTransaction = Box<dyn Transaction>;

#[async_trait]
pub trait Transactor: Send + Sync {
    async fn begin(&self) -> Result<BoxedTransaction, StoreError>;

    async fn health_check(&self) -> bool;
}

pub type TxFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Run `f` on a fresh transaction. Commits when `f` returns `Ok`; on `Err` the
/// transaction is dropped and none of its writes are applied.
///
/// ```ignore
/// let review = run_in_transaction(store, |tx| {
///     Box::pin(async move { Ok::<_, StoreError>(tx.get_review("r1").await?) })
/// })
/// .await?;
/// ```
pub async fn run_in_transaction<T, E, F>(store: &dyn Transactor, f: F) -> Result<T, E>
where
    F: for<'a> FnOnce(&'a mut BoxedTransaction) -> TxFuture<'a, T, E> + Send,
    T: Send,
    E: From<StoreError> + Send,
{
    let mut tx = store.begin().await?;
    let value = f(&mut tx).await?;
    tx.commit().await?;
    Ok(value)
}
