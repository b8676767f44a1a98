//! In-memory document store with optimistic concurrency control.
//!
//! Documents are JSON objects carrying a version number. A transaction records
//! the version of every document it reads or writes and buffers its writes;
//! commit re-checks those versions under the store lock and fails with
//! [`StoreError::Conflict`] if any changed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{BoxedTransaction, StoreError, Transaction, Transactor};
use crate::models::{ListingPatch, ListingRecord, ReviewPatch, ReviewRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Reviews,
    Listings,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Reviews => "review",
            Collection::Listings => "listing",
        }
    }
}

type DocKey = (Collection, String);

#[derive(Debug, Clone)]
struct Document {
    version: u64,
    fields: Map<String, Value>,
}

type Documents = HashMap<DocKey, Document>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Arc<Mutex<Documents>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a whole document. `id` is written into the document.
    pub async fn insert_document(&self, collection: Collection, id: &str, document: Value) {
        let mut fields = match document {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        fields.insert("id".into(), Value::from(id));

        let mut documents = self.documents.lock().await;
        let key = (collection, id.to_string());
        let version = documents.get(&key).map(|d| d.version + 1).unwrap_or(1);
        documents.insert(key, Document { version, fields });
    }

    pub async fn insert_review(&self, review: &ReviewRecord) {
        let value = serde_json::to_value(review).unwrap_or(Value::Null);
        self.insert_document(Collection::Reviews, &review.id, value)
            .await;
    }

    pub async fn insert_listing(&self, listing: &ListingRecord) {
        let value = serde_json::to_value(listing).unwrap_or(Value::Null);
        self.insert_document(Collection::Listings, &listing.id, value)
            .await;
    }

    /// Committed state of a document, outside any transaction.
    pub async fn document(&self, collection: Collection, id: &str) -> Option<Value> {
        let documents = self.documents.lock().await;
        documents
            .get(&(collection, id.to_string()))
            .map(|d| Value::Object(d.fields.clone()))
    }

    pub async fn review(&self, id: &str) -> Option<ReviewRecord> {
        let value = self.document(Collection::Reviews, id).await?;
        serde_json::from_value(value).ok()
    }

    pub async fn listing(&self, id: &str) -> Option<ListingRecord> {
        let value = self.document(Collection::Listings, id).await?;
        serde_json::from_value(value).ok()
    }

    /// Make the next commit on this store fail before anything is applied.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn begin_memory(&self) -> MemoryTransaction {
        MemoryTransaction {
            documents: Arc::clone(&self.documents),
            fail_next_commit: Arc::clone(&self.fail_next_commit),
            observed: HashMap::new(),
            pending: HashMap::new(),
        }
    }
}

#[async_trait]
impl Transactor for MemoryStore {
    async fn begin(&self) -> Result<BoxedTransaction, StoreError> {
        Ok(Box::new(self.begin_memory()))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

pub struct MemoryTransaction {
    documents: Arc<Mutex<Documents>>,
    fail_next_commit: Arc<AtomicBool>,
    /// Version seen on first access; `None` when the document did not exist.
    observed: HashMap<DocKey, Option<u64>>,
    pending: HashMap<DocKey, Map<String, Value>>,
}

fn merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (field, value) in patch {
        if value.is_null() {
            target.remove(field);
        } else {
            target.insert(field.clone(), value.clone());
        }
    }
}

impl MemoryTransaction {
    /// Record the version of `key`, failing if it moved since it was first seen.
    fn observe(&mut self, documents: &Documents, key: &DocKey) -> Result<(), StoreError> {
        let current = documents.get(key).map(|d| d.version);
        let seen = *self.observed.entry(key.clone()).or_insert(current);
        if seen != current {
            return Err(StoreError::Conflict(format!(
                "{} '{}' changed during the transaction",
                key.0.as_str(),
                key.1
            )));
        }
        Ok(())
    }

    async fn read<T: DeserializeOwned>(
        &mut self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        let key = (collection, id.to_string());
        let store = Arc::clone(&self.documents);
        let mut fields = {
            let documents = store.lock().await;
            self.observe(&documents, &key)?;
            documents.get(&key).map(|d| d.fields.clone())
        };

        if let Some(patch) = self.pending.get(&key) {
            merge(fields.get_or_insert_with(Map::new), patch);
        }

        let Some(mut fields) = fields else {
            return Ok(None);
        };
        fields.insert("id".into(), Value::from(id));

        serde_json::from_value(Value::Object(fields))
            .map(Some)
            .map_err(|e| StoreError::Malformed {
                collection: collection.as_str(),
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn write(
        &mut self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let key = (collection, id.to_string());
        let store = Arc::clone(&self.documents);
        {
            let documents = store.lock().await;
            self.observe(&documents, &key)?;
        }
        let buffered = self.pending.entry(key).or_default();
        for (field, value) in fields {
            buffered.insert(field, value);
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get_review(&mut self, id: &str) -> Result<Option<ReviewRecord>, StoreError> {
        self.read(Collection::Reviews, id).await
    }

    async fn put_review(&mut self, id: &str, patch: &ReviewPatch) -> Result<(), StoreError> {
        self.write(Collection::Reviews, id, patch.to_fields()).await
    }

    async fn get_listing(&mut self, id: &str) -> Result<Option<ListingRecord>, StoreError> {
        self.read(Collection::Listings, id).await
    }

    async fn put_listing(&mut self, id: &str, patch: &ListingPatch) -> Result<(), StoreError> {
        self.write(Collection::Listings, id, patch.to_fields()).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            documents,
            fail_next_commit,
            observed,
            pending,
        } = *self;
        if fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit aborted".into()));
        }

        let mut committed = documents.lock().await;
        for (key, seen) in &observed {
            let current = committed.get(key).map(|d| d.version);
            if current != *seen {
                return Err(StoreError::Conflict(format!(
                    "{} '{}' was modified by another transaction",
                    key.0.as_str(),
                    key.1
                )));
            }
        }

        for (key, patch) in pending {
            let document = committed.entry(key.clone()).or_insert_with(|| Document {
                version: 0,
                fields: Map::from_iter([("id".to_string(), Value::from(key.1.as_str()))]),
            });
            merge(&mut document.fields, &patch);
            document.version += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CountedRating, ReviewStatus};
    use serde_json::json;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_document(
                Collection::Reviews,
                "r1",
                json!({"listingId": "l1", "rating": 4, "status": "pending", "title": "Solid tool"}),
            )
            .await;
        store.insert_listing(&ListingRecord::new("l1")).await;
        store
    }

    fn approve_patch() -> ReviewPatch {
        ReviewPatch {
            status: Some(ReviewStatus::Approved),
            last_approved_rating: Some(CountedRating::Set(4)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_returns_none_for_missing() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_review("nope").await.unwrap().is_none());
        assert!(tx.get_listing("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        tx.put_review("r1", &approve_patch()).await.unwrap();

        // Read-your-writes inside the transaction.
        let inside = tx.get_review("r1").await.unwrap().unwrap();
        assert_eq!(inside.status, ReviewStatus::Approved);

        let outside = store.review("r1").await.unwrap();
        assert_eq!(outside.status, ReviewStatus::Pending);

        tx.commit().await.unwrap();
        assert_eq!(store.review("r1").await.unwrap().status, ReviewStatus::Approved);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = seeded().await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.put_review("r1", &approve_patch()).await.unwrap();
        }
        assert_eq!(store.review("r1").await.unwrap().status, ReviewStatus::Pending);
    }

    #[tokio::test]
    async fn test_put_merges_and_preserves_other_fields() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        tx.put_review("r1", &approve_patch()).await.unwrap();
        tx.commit().await.unwrap();

        let doc = store.document(Collection::Reviews, "r1").await.unwrap();
        assert_eq!(doc["title"], "Solid tool");
        assert_eq!(doc["rating"], 4);
        assert_eq!(doc["lastApprovedRating"], 4);
    }

    #[tokio::test]
    async fn test_null_field_is_removed() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        tx.put_review("r1", &approve_patch()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let clear = ReviewPatch {
            last_approved_rating: Some(CountedRating::Clear),
            ..Default::default()
        };
        tx.put_review("r1", &clear).await.unwrap();
        tx.commit().await.unwrap();

        let doc = store.document(Collection::Reviews, "r1").await.unwrap();
        assert!(doc.get("lastApprovedRating").is_none());
    }

    #[tokio::test]
    async fn test_conflicting_commit_fails_and_applies_nothing() {
        let store = seeded().await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.get_listing("l1").await.unwrap();
        second.get_listing("l1").await.unwrap();

        let patch = ListingPatch {
            rating_avg: 4.0,
            rating_count: 1,
        };
        first.put_listing("l1", &patch).await.unwrap();
        second.put_review("r1", &approve_patch()).await.unwrap();
        second
            .put_listing(
                "l1",
                &ListingPatch {
                    rating_avg: 2.0,
                    rating_count: 1,
                },
            )
            .await
            .unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_conflict());

        let listing = store.listing("l1").await.unwrap();
        assert_eq!(listing.rating_avg, 4.0);
        assert_eq!(store.review("r1").await.unwrap().status, ReviewStatus::Pending);
    }

    #[tokio::test]
    async fn test_read_after_concurrent_commit_conflicts_early() {
        let store = seeded().await;
        let mut slow = store.begin().await.unwrap();
        slow.get_listing("l1").await.unwrap();

        let mut fast = store.begin().await.unwrap();
        fast.put_listing(
            "l1",
            &ListingPatch {
                rating_avg: 5.0,
                rating_count: 1,
            },
        )
        .await
        .unwrap();
        fast.commit().await.unwrap();

        let err = slow.get_listing("l1").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_injected_failure_applies_nothing_and_resets() {
        let store = seeded().await;
        store.fail_next_commit();

        let mut tx = store.begin().await.unwrap();
        tx.put_review("r1", &approve_patch()).await.unwrap();
        assert!(matches!(
            tx.commit().await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.review("r1").await.unwrap().status, ReviewStatus::Pending);

        let mut tx = store.begin().await.unwrap();
        tx.put_review("r1", &approve_patch()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.review("r1").await.unwrap().status, ReviewStatus::Approved);
    }

    #[tokio::test]
    async fn test_malformed_document_is_reported() {
        let store = MemoryStore::new();
        store
            .insert_document(Collection::Reviews, "bad", json!({"rating": 3}))
            .await;
        let mut tx = store.begin().await.unwrap();
        let err = tx.get_review("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Malformed { collection: "review", .. }));
    }
}
