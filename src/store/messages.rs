use super::*;

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Message> {
    let role: String = row.get("role");
    let content: String = row.get("content");
    let content: Value = serde_json::from_str(&content)
        .map_err(|e| CoreError::Internal(format!("corrupt message content: {}", e)))?;
    Ok(Message {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        role: MessageRole::parse(&role)?,
        model: row.get("model"),
        content,
        created_at: ts(&row.get::<String, _>("created_at")),
    })
}

impl Store {
    /// The row role and `content.role` must agree; the structured document
    /// is the source of truth and the column exists for filtering.
    pub async fn add_message(
        &self,
        thread_id: i64,
        role: MessageRole,
        model: Option<&str>,
        content: &Value,
    ) -> CoreResult<Message> {
        let content_role = content.get("role").and_then(|v| v.as_str());
        if content_role != Some(role.as_str()) {
            return Err(CoreError::Internal(format!(
                "message row role '{}' disagrees with content role {:?}",
                role.as_str(),
                content_role
            )));
        }

        let row = sqlx::query(
            "INSERT INTO messages (thread_id, role, model, content, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(thread_id)
        .bind(role.as_str())
        .bind(model)
        .bind(content.to_string())
        .bind(now_str())
        .fetch_one(&self.pool)
        .await?;
        row_to_message(&row)
    }

    /// Messages of a thread in ascending id order. Id, not timestamp, is the
    /// ordering key.
    pub async fn thread_messages(&self, thread_id: i64) -> CoreResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE thread_id = ? AND deleted_at IS NULL ORDER BY id ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_store;
    use serde_json::json;

    #[tokio::test]
    async fn structured_content_round_trips() {
        let store = test_store().await;
        let thread = store
            .create_thread(None, ThreadSource::User, None)
            .await
            .unwrap();

        let content = json!({
            "role": "assistant",
            "content": "hello there",
            "usage": {"input_tokens": 12, "output_tokens": 5, "total_tokens": 17}
        });
        store
            .add_message(thread.id, MessageRole::Assistant, Some("gpt-4o"), &content)
            .await
            .unwrap();

        let messages = store.thread_messages(thread.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, content);
        assert_eq!(messages[0].model.as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn ascending_id_order_is_stable() {
        let store = test_store().await;
        let thread = store
            .create_thread(None, ThreadSource::User, None)
            .await
            .unwrap();

        for i in 0..5 {
            let content = json!({"role": "user", "content": format!("msg {}", i)});
            store
                .add_message(thread.id, MessageRole::User, None, &content)
                .await
                .unwrap();
        }

        let first = store.thread_messages(thread.id).await.unwrap();
        let ids: Vec<i64> = first.iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);

        // Order is preserved across calls.
        let second = store.thread_messages(thread.id).await.unwrap();
        assert_eq!(
            second.iter().map(|m| m.id).collect::<Vec<_>>(),
            ids
        );
    }

    #[tokio::test]
    async fn role_disagreement_is_rejected() {
        let store = test_store().await;
        let thread = store
            .create_thread(None, ThreadSource::User, None)
            .await
            .unwrap();

        let result = store
            .add_message(
                thread.id,
                MessageRole::User,
                None,
                &json!({"role": "assistant", "content": "impostor"}),
            )
            .await;
        assert!(matches!(result, Err(CoreError::Internal(_))));
    }
}
