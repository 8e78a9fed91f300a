//! Memory service: embed, store, similarity-search, and soft-delete memory
//! entries. Deduplication is deliberately the LM's job — the `remember` tool
//! instructs it to `recall` first and pass `replace_id` to overwrite; the
//! service performs no implicit merge.

pub mod binary;
mod index;

pub use index::{IndexHit, MemoryIndex};

use std::sync::Arc;
use tracing::info;

use crate::embeddings::Embedder;
use crate::error::{CoreError, CoreResult};
use crate::store::{MemoryEntry, MemorySource, Store};

/// Entries below this cosine similarity are not worth surfacing.
pub const RECALL_THRESHOLD: f32 = 0.30;

pub const DEFAULT_RECALL_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct RecallHit {
    pub entry: MemoryEntry,
    pub similarity: f32,
}

pub struct MemoryService {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    index: MemoryIndex,
}

impl MemoryService {
    /// Builds the service and rebuilds the ANN index from every live entry.
    pub async fn new(store: Arc<Store>, embedder: Arc<dyn Embedder>) -> CoreResult<Self> {
        let index = MemoryIndex::new(embedder.dimensions());
        let entries = store.list_memories().await?;
        for entry in &entries {
            index.insert(entry.id, &entry.embedding);
        }
        info!(entries = entries.len(), "Memory index rebuilt");
        Ok(Self {
            store,
            embedder,
            index,
        })
    }

    /// Store one atomic fact. With `replace_id`, the existing entry's content
    /// and embedding are replaced in a single operation; without it a new
    /// entry is created even if similar content already exists.
    pub async fn remember(
        &self,
        content: &str,
        source: MemorySource,
        thread_id: Option<i64>,
        replace_id: Option<i64>,
    ) -> CoreResult<MemoryEntry> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CoreError::validation("memory content must not be empty"));
        }

        let embedding = self.embedder.embed(content).await?;

        let entry = match replace_id {
            Some(id) => self.store.update_memory(id, content, &embedding).await?,
            None => {
                self.store
                    .insert_memory(content, &embedding, source, thread_id)
                    .await?
            }
        };
        self.index.insert(entry.id, &entry.embedding);
        Ok(entry)
    }

    /// Top-`limit` entries with similarity ≥ the recall threshold, ordered by
    /// descending similarity. Index hits are re-checked against the store so
    /// rows deleted since the last index rebuild never leak out.
    pub async fn recall(&self, query: &str, limit: usize) -> CoreResult<Vec<RecallHit>> {
        let embedding = self.embedder.embed(query).await?;
        let candidates = self.index.search(&embedding, limit.max(1) * 2);

        let mut hits = Vec::with_capacity(limit);
        for candidate in candidates {
            if hits.len() >= limit {
                break;
            }
            if candidate.similarity < RECALL_THRESHOLD {
                break;
            }
            if let Some(entry) = self.store.find_memory(candidate.entry_id).await? {
                hits.push(RecallHit {
                    entry,
                    similarity: candidate.similarity,
                });
            }
        }
        Ok(hits)
    }

    pub async fn list(&self) -> CoreResult<Vec<MemoryEntry>> {
        self.store.list_memories().await
    }

    /// Re-embeds: content and embedding change together or not at all.
    pub async fn update(&self, id: i64, content: &str) -> CoreResult<MemoryEntry> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CoreError::validation("memory content must not be empty"));
        }
        let embedding = self.embedder.embed(content).await?;
        let entry = self.store.update_memory(id, content, &embedding).await?;
        self.index.insert(entry.id, &entry.embedding);
        Ok(entry)
    }

    pub async fn delete(&self, id: i64) -> CoreResult<()> {
        self.store.delete_memory(id).await?;
        self.index.remove(id);
        Ok(())
    }
}
