// aqi_station - Air quality station sync and dashboard
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::record::StationRecord;
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::future::Future;
use tokio::sync::RwLock;

#[derive(Debug)]
pub enum StoreError {
    Backend(Box<dyn error::Error + Send + Sync>),
    Decode(String),
    InvalidKey(DocumentKey),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "{}", e),
            Self::Decode(msg) => write!(f, "unable to decode stored record: {}", msg),
            Self::InvalidKey(k) => write!(f, "invalid document key {}", k),
        }
    }
}

impl error::Error for StoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Identifier assigned by the store to a document, distinct from the station id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentKey(pub String);

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record along with the key the store uses for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: DocumentKey,
    pub record: StationRecord,
}

/// Single write applied as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Replace the whole document with `key`, inserting it under that key if it is gone.
    Replace { key: DocumentKey, record: StationRecord },
    /// Insert a new document, the store assigns its key.
    Insert(StationRecord),
}

/// Keyed collection of station records.
///
/// Implementations must allow reads while a batch is being written. Individual operations
/// in a batch are applied one at a time, a batch as a whole is not atomic.
pub trait RecordStore: Send + Sync {
    /// Every record currently stored, in insertion order.
    fn scan_all(&self) -> impl Future<Output = Result<Vec<StoredRecord>, StoreError>> + Send;

    /// The record for a station id, if any.
    fn find(&self, id: &str) -> impl Future<Output = Result<Option<StationRecord>, StoreError>> + Send;

    /// Apply each operation in order, stopping at the first failure.
    fn write_batch(&self, ops: Vec<WriteOp>) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert records without checking for existing ids.
    fn insert_many(&self, records: Vec<StationRecord>) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove every record along with the backing collection.
    fn drop_all(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_key: u64,
    docs: BTreeMap<DocumentKey, StationRecord>,
}

impl MemoryInner {
    fn insert(&mut self, record: StationRecord) {
        let key = DocumentKey(format!("{:024x}", self.next_key));
        self.next_key += 1;
        self.docs.insert(key, record);
    }
}

/// In-process store for running without a database.
///
/// Keys are zero padded counters so that iteration order matches insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    async fn scan_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .docs
            .iter()
            .map(|(key, record)| StoredRecord {
                key: key.clone(),
                record: record.clone(),
            })
            .collect())
    }

    async fn find(&self, id: &str) -> Result<Option<StationRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.docs.values().find(|r| r.id == id).cloned())
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        for op in ops {
            // Lock per operation so readers can interleave with a batch, same as a real database.
            let mut inner = self.inner.write().await;
            match op {
                WriteOp::Replace { key, record } => {
                    inner.docs.insert(key, record);
                }
                WriteOp::Insert(record) => inner.insert(record),
            }
        }

        Ok(())
    }

    async fn insert_many(&self, records: Vec<StationRecord>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for record in records {
            inner.insert(record);
        }

        Ok(())
    }

    async fn drop_all(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.docs.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DocumentKey, MemoryStore, RecordStore, WriteOp};
    use crate::record::StationRecord;

    #[tokio::test]
    async fn test_insert_assigns_distinct_keys() {
        let store = MemoryStore::new();
        store
            .insert_many(vec![StationRecord::empty("a", "A"), StationRecord::empty("b", "B")])
            .await
            .unwrap();

        let all = store.scan_all().await.unwrap();
        assert_eq!(2, all.len());
        assert_ne!(all[0].key, all[1].key);
        assert_eq!("a", all[0].record.id);
        assert_eq!("b", all[1].record.id);
    }

    #[tokio::test]
    async fn test_replace_keeps_key() {
        let store = MemoryStore::new();
        store.insert_many(vec![StationRecord::empty("a", "A")]).await.unwrap();
        let key = store.scan_all().await.unwrap()[0].key.clone();

        let replacement = StationRecord::empty("a", "Renamed");
        store
            .write_batch(vec![WriteOp::Replace {
                key: key.clone(),
                record: replacement.clone(),
            }])
            .await
            .unwrap();

        let all = store.scan_all().await.unwrap();
        assert_eq!(1, all.len());
        assert_eq!(key, all[0].key);
        assert_eq!(replacement, all[0].record);
    }

    #[tokio::test]
    async fn test_replace_unknown_key_inserts() {
        let store = MemoryStore::new();
        let key = DocumentKey("00000000000000000000abcd".to_owned());
        store
            .write_batch(vec![WriteOp::Replace {
                key: key.clone(),
                record: StationRecord::empty("a", "A"),
            }])
            .await
            .unwrap();

        let all = store.scan_all().await.unwrap();
        assert_eq!(1, all.len());
        assert_eq!(key, all[0].key);
    }

    #[tokio::test]
    async fn test_find() {
        let store = MemoryStore::new();
        store.insert_many(vec![StationRecord::empty("a", "A")]).await.unwrap();

        assert_eq!(Some(StationRecord::empty("a", "A")), store.find("a").await.unwrap());
        assert_eq!(None, store.find("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_all_empties_store() {
        let store = MemoryStore::new();
        store.insert_many(vec![StationRecord::empty("a", "A")]).await.unwrap();
        store.drop_all().await.unwrap();

        assert!(store.scan_all().await.unwrap().is_empty());
    }
}
