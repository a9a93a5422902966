//! In-memory [`EntityStore`] implementation for tests and dry runs.
//!
//! Records live in a `BTreeMap` behind `std::sync::RwLock`. Payloads are
//! stored encoded, exactly as a persistent backend would hold them, so
//! decode errors surface the same way.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::layout::RecordLayout;
use crate::models::StoredEntity;

use super::EntityStore;

struct StoredRecord {
    payload: Value,
    updated_at: i64,
    /// Insertion sequence, kept across updates (like a SQLite rowid).
    seq: u64,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<(String, String), StoredRecord>,
    next_seq: u64,
}

/// In-memory entity store.
pub struct InMemoryStore {
    layout: RecordLayout,
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new(layout: RecordLayout) -> Self {
        Self {
            layout,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Seed a raw payload, bypassing the layout.
    pub fn insert_payload(&self, collection: &str, id: &str, payload: Value, updated_at: i64) -> Result<()> {
        let mut inner = self.write()?;
        inner.put(collection, id, payload, updated_at);
        Ok(())
    }

    /// Raw payload of a record, if present.
    pub fn payload(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let inner = self.read()?;
        Ok(inner
            .records
            .get(&(collection.to_string(), id.to_string()))
            .map(|r| r.payload.clone()))
    }

    /// Number of records in `collection`.
    pub fn count(&self, collection: &str) -> Result<usize> {
        let inner = self.read()?;
        Ok(inner
            .records
            .keys()
            .filter(|(c, _)| c == collection)
            .count())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Inner {
    fn put(&mut self, collection: &str, id: &str, payload: Value, updated_at: i64) {
        let key = (collection.to_string(), id.to_string());
        let seq = match self.records.get(&key) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.records.insert(
            key,
            StoredRecord {
                payload,
                updated_at,
                seq,
            },
        );
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn list_by_group(&self, collection: &str, group_key: &str) -> Result<Vec<StoredEntity>> {
        let inner = self.read()?;
        let mut rows: Vec<(u64, StoredEntity)> = Vec::new();
        for ((c, id), record) in &inner.records {
            if c != collection {
                continue;
            }
            let group = record
                .payload
                .get(&self.layout.group_field)
                .and_then(Value::as_str);
            if group != Some(group_key) {
                continue;
            }
            let entity = self.layout.decode(id, &record.payload, record.updated_at)?;
            rows.push((record.seq, entity));
        }
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, e)| e).collect())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredEntity>> {
        let inner = self.read()?;
        inner
            .records
            .get(&(collection.to_string(), id.to_string()))
            .map(|r| self.layout.decode(id, &r.payload, r.updated_at))
            .transpose()
    }

    async fn upsert(&self, collection: &str, entity: &StoredEntity) -> Result<()> {
        let payload = self.layout.encode(entity);
        let mut inner = self.write()?;
        inner.put(collection, &entity.id, payload, entity.updated_at);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .records
            .remove(&(collection.to_string(), id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_by_group_keeps_insertion_order() {
        let store = InMemoryStore::new(RecordLayout::default());
        for (id, group) in [("z", "g1"), ("a", "g1"), ("m", "g2"), ("b", "g1")] {
            store
                .insert_payload("cards", id, json!({"topicId": group, "prompt": id}), 1)
                .unwrap();
        }
        let ids: Vec<String> = store
            .list_by_group("cards", "g1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
    }

    #[tokio::test]
    async fn test_upsert_preserves_position_and_delete_removes() {
        let store = InMemoryStore::new(RecordLayout::default());
        store
            .insert_payload("cards", "a", json!({"topicId": "g", "prompt": "1"}), 1)
            .unwrap();
        store
            .insert_payload("cards", "b", json!({"topicId": "g", "prompt": "2"}), 1)
            .unwrap();
        let mut a = store.get("cards", "a").await.unwrap().unwrap();
        a.content.primary = "changed".into();
        store.upsert("cards", &a).await.unwrap();

        let listed = store.list_by_group("cards", "g").await.unwrap();
        assert_eq!(listed[0].id, "a");
        assert_eq!(listed[0].content.primary, "changed");

        store.delete("cards", "a").await.unwrap();
        assert!(store.get("cards", "a").await.unwrap().is_none());
        assert_eq!(store.count("cards").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_collections_are_separate() {
        let store = InMemoryStore::new(RecordLayout::default());
        store
            .insert_payload("cards", "a", json!({"topicId": "g"}), 1)
            .unwrap();
        assert!(store.get("cardbank", "a").await.unwrap().is_none());
        assert!(store.list_by_group("cardbank", "g").await.unwrap().is_empty());
    }
}
