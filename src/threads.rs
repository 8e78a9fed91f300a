//! Thin orchestration over thread and message storage.

use serde_json::Value;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::store::{Message, MessageRole, Store, Thread, ThreadSource};

pub struct ThreadService {
    store: Arc<Store>,
}

impl ThreadService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        title: Option<&str>,
        source: ThreadSource,
        job_run_id: Option<i64>,
    ) -> CoreResult<Thread> {
        self.store.create_thread(title, source, job_run_id).await
    }

    pub async fn find(&self, id: i64) -> CoreResult<Option<Thread>> {
        self.store.find_thread(id).await
    }

    pub async fn get(&self, id: i64) -> CoreResult<Thread> {
        self.store
            .find_thread(id)
            .await?
            .ok_or_else(|| CoreError::not_found("thread", id))
    }

    /// Most recently active first.
    pub async fn list(&self) -> CoreResult<Vec<Thread>> {
        self.store.list_threads().await
    }

    /// Ascending id order.
    pub async fn messages(&self, thread_id: i64) -> CoreResult<Vec<Message>> {
        self.store.thread_messages(thread_id).await
    }

    /// Writes both the row role and the structured content; the store
    /// rejects the pair when they disagree on role.
    pub async fn add_message(
        &self,
        thread_id: i64,
        role: MessageRole,
        model: Option<&str>,
        content: &Value,
    ) -> CoreResult<Message> {
        let message = self
            .store
            .add_message(thread_id, role, model, content)
            .await?;
        self.store.touch_thread(thread_id).await?;
        Ok(message)
    }

    pub async fn update_title(&self, id: i64, title: &str) -> CoreResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CoreError::validation("thread title must not be empty"));
        }
        self.store.update_thread_title(id, title).await
    }

    pub async fn delete(&self, id: i64) -> CoreResult<()> {
        self.store.delete_thread(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_store;
    use serde_json::json;

    async fn service() -> ThreadService {
        ThreadService::new(Arc::new(test_store().await))
    }

    #[tokio::test]
    async fn list_orders_most_recent_activity_first() {
        let threads = service().await;
        let first = threads.create(None, ThreadSource::User, None).await.unwrap();
        let second = threads.create(None, ThreadSource::User, None).await.unwrap();

        // Adding a message touches the thread, moving it to the front.
        threads
            .add_message(
                first.id,
                MessageRole::User,
                None,
                &json!({"role": "user", "content": "bump"}),
            )
            .await
            .unwrap();

        let listed = threads.list().await.unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[tokio::test]
    async fn get_on_deleted_thread_is_not_found() {
        let threads = service().await;
        let thread = threads.create(None, ThreadSource::User, None).await.unwrap();
        threads.delete(thread.id).await.unwrap();
        assert!(matches!(
            threads.get(thread.id).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_title_rejected() {
        let threads = service().await;
        let thread = threads.create(None, ThreadSource::User, None).await.unwrap();
        assert!(matches!(
            threads.update_title(thread.id, "  ").await,
            Err(CoreError::Validation(_))
        ));
    }
}
