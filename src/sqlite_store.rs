//! SQLite-backed [`EntityStore`] implementation.
//!
//! Every collection lives in the single `records` table, one JSON payload
//! per `(collection, record_key)`. Group membership is read straight out of
//! the payload with `json_extract`, so the store needs no schema knowledge
//! beyond the [`RecordLayout`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};

use carryover_core::error::SyncError;
use carryover_core::layout::RecordLayout;
use carryover_core::models::StoredEntity;
use carryover_core::store::{EntityStore, Mutation};

/// SQLite implementation of the [`EntityStore`] trait.
///
/// [`apply_batch`](EntityStore::apply_batch) runs a group's mutations in a
/// single transaction: a failed write rolls the whole group back.
pub struct SqliteStore {
    pool: SqlitePool,
    layout: RecordLayout,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, layout: RecordLayout) -> Self {
        Self { pool, layout }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Entity count per group key in `collection`, ordered by group key.
    /// Records whose payload lacks a group field are counted under `None`.
    pub async fn count_by_group(&self, collection: &str) -> Result<Vec<(Option<String>, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT json_extract(payload, ?) AS group_key, COUNT(*) AS cnt
            FROM records
            WHERE collection = ?
            GROUP BY group_key
            ORDER BY group_key
            "#,
        )
        .bind(self.layout.group_path())
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("group_key"), row.get("cnt")))
            .collect())
    }

    fn decode_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<StoredEntity> {
        let key: String = row.get("record_key");
        let payload: String = row.get("payload");
        let updated_at: i64 = row.get("updated_at");
        let value: serde_json::Value = serde_json::from_str(&payload)
            .with_context(|| format!("payload of '{}' is not valid JSON", key))?;
        self.layout.decode(&key, &value, updated_at)
    }

    fn payload_of(&self, entity: &StoredEntity) -> Result<String> {
        Ok(serde_json::to_string(&self.layout.encode(entity))?)
    }
}

async fn upsert_on(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
    payload: &str,
    updated_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO records (collection, record_key, payload, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(collection, record_key) DO UPDATE SET
            payload = excluded.payload,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(collection)
    .bind(id)
    .bind(payload)
    .bind(updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn delete_on(conn: &mut SqliteConnection, collection: &str, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM records WHERE collection = ? AND record_key = ?")
        .bind(collection)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn list_by_group(&self, collection: &str, group_key: &str) -> Result<Vec<StoredEntity>> {
        let rows = sqlx::query(
            r#"
            SELECT record_key, payload, updated_at
            FROM records
            WHERE collection = ? AND json_extract(payload, ?) = ?
            ORDER BY rowid
            "#,
        )
        .bind(collection)
        .bind(self.layout.group_path())
        .bind(group_key)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredEntity>> {
        let row = sqlx::query(
            "SELECT record_key, payload, updated_at FROM records WHERE collection = ? AND record_key = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.decode_row(&r)).transpose()
    }

    async fn upsert(&self, collection: &str, entity: &StoredEntity) -> Result<()> {
        let payload = self.payload_of(entity)?;
        let mut conn = self.pool.acquire().await?;
        upsert_on(&mut *conn, collection, &entity.id, &payload, entity.updated_at).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        delete_on(&mut *conn, collection, id).await
    }

    async fn apply_batch(
        &self,
        group_key: &str,
        mutations: &[Mutation],
    ) -> std::result::Result<(), SyncError> {
        if mutations.is_empty() {
            return Ok(());
        }

        let commit_error = |source: anyhow::Error| SyncError::StoreCommit {
            group: group_key.to_string(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(|e| commit_error(e.into()))?;

        for mutation in mutations {
            let result = match mutation {
                Mutation::Update { collection, entity } | Mutation::Insert { collection, entity } => {
                    match self.payload_of(entity) {
                        Ok(payload) => {
                            upsert_on(&mut *tx, collection, &entity.id, &payload, entity.updated_at)
                                .await
                        }
                        Err(e) => Err(e),
                    }
                }
                Mutation::Delete { collection, id } => delete_on(&mut *tx, collection, id).await,
            };
            // Dropping `tx` on the error path rolls the group back.
            result.map_err(|e| mutation.write_error(e))?;
        }

        tx.commit().await.map_err(|e| commit_error(e.into()))?;
        Ok(())
    }
}
