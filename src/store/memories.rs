use super::*;

use crate::memory::binary::{decode_embedding, encode_embedding};

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> CoreResult<MemoryEntry> {
    let source: String = row.get("source");
    let blob: Vec<u8> = row.get("embedding");
    let embedding = decode_embedding(&blob)
        .map_err(|e| CoreError::Internal(format!("corrupt embedding blob: {}", e)))?;
    Ok(MemoryEntry {
        id: row.get("id"),
        content: row.get("content"),
        embedding,
        source: MemorySource::parse(&source)?,
        thread_id: row.get("thread_id"),
        created_at: ts(&row.get::<String, _>("created_at")),
        updated_at: ts(&row.get::<String, _>("updated_at")),
    })
}

impl Store {
    pub async fn insert_memory(
        &self,
        content: &str,
        embedding: &[f32],
        source: MemorySource,
        thread_id: Option<i64>,
    ) -> CoreResult<MemoryEntry> {
        let now = now_str();
        let row = sqlx::query(
            "INSERT INTO memory_entries (content, embedding, source, thread_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(content)
        .bind(encode_embedding(embedding))
        .bind(source.as_str())
        .bind(thread_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        row_to_entry(&row)
    }

    pub async fn find_memory(&self, id: i64) -> CoreResult<Option<MemoryEntry>> {
        let row = sqlx::query("SELECT * FROM memory_entries WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    pub async fn list_memories(&self) -> CoreResult<Vec<MemoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM memory_entries WHERE deleted_at IS NULL ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Content mutations re-embed in the same operation; the caller supplies
    /// the fresh vector so content and embedding never diverge.
    pub async fn update_memory(
        &self,
        id: i64,
        content: &str,
        embedding: &[f32],
    ) -> CoreResult<MemoryEntry> {
        let row = sqlx::query(
            "UPDATE memory_entries SET content = ?, embedding = ?, updated_at = ?
             WHERE id = ? AND deleted_at IS NULL
             RETURNING *",
        )
        .bind(content)
        .bind(encode_embedding(embedding))
        .bind(now_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_entry(&row),
            None => Err(CoreError::not_found("memory entry", id)),
        }
    }

    pub async fn delete_memory(&self, id: i64) -> CoreResult<()> {
        let now = now_str();
        let result = sqlx::query(
            "UPDATE memory_entries SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("memory entry", id));
        }
        Ok(())
    }
}
