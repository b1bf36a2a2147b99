//! Postgres-backed message queue on the `queue_messages` table.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::ports::{MessageQueue, QueueError, QueueMessage};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Messages are claimed with `FOR UPDATE SKIP LOCKED`, so concurrent receivers never see
/// the same message twice within its visibility timeout. A claim assigns a fresh receipt
/// handle; deletes with a stale handle fail.
#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
    name: String,
    visibility_timeout: Duration,
}

impl PostgresQueue {
    pub fn new(pool: PgPool, name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            name: name.into(),
            visibility_timeout,
        }
    }

    fn error(&self, err: sqlx::Error) -> QueueError {
        let message = err.to_string();
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                QueueError::Transient {
                    queue: self.name.clone(),
                    message,
                }
            }
            _ => QueueError::Permanent {
                queue: self.name.clone(),
                message,
            },
        }
    }

    async fn claim(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String)>(
            r#"
            UPDATE queue_messages
            SET receipt_handle = gen_random_uuid(),
                visible_at = NOW() + make_interval(secs => $3),
                receive_count = receive_count + 1
            WHERE id IN (
                SELECT id FROM queue_messages
                WHERE queue = $1 AND visible_at <= NOW()
                ORDER BY created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, receipt_handle, body
            "#,
        )
        .bind(&self.name)
        .bind(max_messages.max(1) as i64)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.error(e))?;

        Ok(rows
            .into_iter()
            .map(|(id, receipt, body)| QueueMessage {
                id: id.to_string(),
                receipt_handle: receipt.to_string(),
                body,
            })
            .collect())
    }
}

#[async_trait]
impl MessageQueue for PostgresQueue {
    fn name(&self) -> &str {
        &self.name
    }

    /// Re-polls until a message arrives or `wait` elapses.
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let batch = self.claim(max_messages).await?;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO queue_messages (id, queue, body) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(&self.name)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(|e| self.error(e))?;
        Ok(())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let receipt = Uuid::parse_str(receipt_handle).map_err(|e| QueueError::Permanent {
            queue: self.name.clone(),
            message: format!("invalid receipt handle {receipt_handle:?}: {e}"),
        })?;

        let result = sqlx::query("DELETE FROM queue_messages WHERE queue = $1 AND receipt_handle = $2")
            .bind(&self.name)
            .bind(receipt)
            .execute(&self.pool)
            .await
            .map_err(|e| self.error(e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::Permanent {
                queue: self.name.clone(),
                message: format!("receipt handle {receipt_handle} is stale"),
            });
        }
        Ok(())
    }
}
