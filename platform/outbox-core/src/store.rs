use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("event {0} not found")]
    NotFound(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
    Timeout,
}

impl OutboxStatus {
    /// `status` only moves PENDING -> {PUBLISHED, FAILED, TIMEOUT}.
    pub fn can_transition_to(self, next: OutboxStatus) -> bool {
        matches!(self, OutboxStatus::Pending) && self != next
    }
}

/// The central persistent entity: a domain event staged for publication in
/// the same transaction as the business mutation it describes.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub event_id: Uuid,
    pub correlation_id: String,
    pub event_type: String,
    pub destination: String,
    pub payload: Value,
    pub status: OutboxStatus,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub compensation_data: Option<Value>,
}

impl OutboxEvent {
    /// Start a new PENDING event. `expires_at`, when set, is the saga-leg
    /// timeout deadline checked (strictly) against `now` by the Timeout
    /// Worker — exactly equal is not yet expired.
    pub fn new(
        correlation_id: impl Into<String>,
        event_type: impl Into<String>,
        destination: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            correlation_id: correlation_id.into(),
            event_type: event_type.into(),
            destination: destination.into(),
            payload,
            status: OutboxStatus::Pending,
            attempt_count: 0,
            last_error: None,
            created_at: Utc::now(),
            published_at: None,
            expires_at: None,
            compensation_data: None,
        }
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_compensation_data(mut self, data: Value) -> Self {
        self.compensation_data = Some(data);
        self
    }
}

/// Abstraction over the outbox's persistent store so the Publisher and
/// Timeout Worker can be exercised against an in-memory fake in tests.
#[async_trait::async_trait]
pub trait OutboxStore: Send + Sync {
    /// Enqueue `event` as PENDING. Callers that hold a live database
    /// transaction for their own business write and want the two to commit
    /// or roll back together use `PgOutboxStore::stage_in_txn` instead of
    /// this trait method — `stage` itself stays transaction-agnostic so
    /// that non-Postgres-backed callers (in-process domain state, other
    /// stores) can implement it too.
    async fn stage(&self, event: &OutboxEvent) -> Result<(), OutboxError>;

    /// Events with `status=PENDING`, oldest first, bounded by `limit`.
    async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboxEvent>, OutboxError>;

    /// Events with `status=PENDING ∧ expires_at < now`, oldest first.
    async fn claim_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEvent>, OutboxError>;

    async fn mark_published(&self, event_id: Uuid) -> Result<(), OutboxError>;

    /// Increment `attempt_count` and record `last_error`, optionally
    /// promoting the row to FAILED when `promote_to_failed` is set.
    async fn mark_failed(
        &self,
        event_id: Uuid,
        error: &str,
        promote_to_failed: bool,
    ) -> Result<(), OutboxError>;

    async fn mark_timeout(&self, event_id: Uuid, error: &str) -> Result<(), OutboxError>;

    /// Delete PUBLISHED rows older than `older_than`. Returns rows removed.
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, OutboxError>;
}

/// Postgres-backed implementation.
///
/// Expected schema:
/// ```sql
/// CREATE TABLE outbox_events (
///     event_id UUID PRIMARY KEY,
///     correlation_id TEXT NOT NULL,
///     event_type TEXT NOT NULL,
///     destination TEXT NOT NULL,
///     payload JSONB NOT NULL,
///     status TEXT NOT NULL DEFAULT 'PENDING',
///     attempt_count INTEGER NOT NULL DEFAULT 0,
///     last_error TEXT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
///     published_at TIMESTAMPTZ,
///     expires_at TIMESTAMPTZ,
///     compensation_data JSONB
/// );
/// ```
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: sqlx::PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Enlist `event` in a transaction the caller already opened for its
    /// own business write, so that either both commit or both roll back.
    /// This is the atomic staging path spec.md §2 describes; the trait-level
    /// `stage` above is for callers with no Postgres transaction to enlist
    /// in at all.
    pub async fn stage_in_txn(
        &self,
        event: &OutboxEvent,
        txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (event_id, correlation_id, event_type, destination, payload,
                 status, attempt_count, created_at, expires_at, compensation_data)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6, $7, $8)
            "#,
        )
        .bind(event.event_id)
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(&event.destination)
        .bind(&event.payload)
        .bind(event.created_at)
        .bind(event.expires_at)
        .bind(&event.compensation_data)
        .execute(&mut **txn)
        .await?;

        tracing::debug!(
            event_id = %event.event_id,
            correlation_id = %event.correlation_id,
            event_type = %event.event_type,
            "event staged in outbox (caller transaction)"
        );

        Ok(())
    }
}

#[async_trait::async_trait]
impl OutboxStore for PgOutboxStore {
    async fn stage(&self, event: &OutboxEvent) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (event_id, correlation_id, event_type, destination, payload,
                 status, attempt_count, created_at, expires_at, compensation_data)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6, $7, $8)
            "#,
        )
        .bind(event.event_id)
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(&event.destination)
        .bind(&event.payload)
        .bind(event.created_at)
        .bind(event.expires_at)
        .bind(&event.compensation_data)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            event_id = %event.event_id,
            correlation_id = %event.correlation_id,
            event_type = %event.event_type,
            "event staged in outbox"
        );

        Ok(())
    }

    async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboxEvent>, OutboxError> {
        let events = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT event_id, correlation_id, event_type, destination, payload,
                   status, attempt_count, last_error, created_at, published_at,
                   expires_at, compensation_data
            FROM outbox_events
            WHERE status = 'PENDING'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn claim_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let events = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT event_id, correlation_id, event_type, destination, payload,
                   status, attempt_count, last_error, created_at, published_at,
                   expires_at, compensation_data
            FROM outbox_events
            WHERE status = 'PENDING' AND expires_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PUBLISHED', published_at = NOW()
            WHERE event_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        error: &str,
        promote_to_failed: bool,
    ) -> Result<(), OutboxError> {
        if promote_to_failed {
            sqlx::query(
                r#"
                UPDATE outbox_events
                SET status = 'FAILED', attempt_count = attempt_count + 1, last_error = $2
                WHERE event_id = $1 AND status = 'PENDING'
                "#,
            )
            .bind(event_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE outbox_events
                SET attempt_count = attempt_count + 1, last_error = $2
                WHERE event_id = $1 AND status = 'PENDING'
                "#,
            )
            .bind(event_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn mark_timeout(&self, event_id: Uuid, error: &str) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'TIMEOUT', last_error = $2
            WHERE event_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_events
            WHERE status = 'PUBLISHED' AND published_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! In-memory fake used by the publisher/timeout-worker unit tests and
    //! by downstream crates (`saga-coordinator`) that don't need a live
    //! Postgres connection for their own tests.
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryOutboxStore {
        rows: Mutex<HashMap<Uuid, OutboxEvent>>,
    }

    impl InMemoryOutboxStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Synchronous fixture helper for test setup — equivalent to
        /// `stage` but without the `async`/`Result` ceremony.
        pub fn stage_now(&self, event: OutboxEvent) {
            self.rows.lock().unwrap().insert(event.event_id, event);
        }

        pub fn get(&self, event_id: Uuid) -> Option<OutboxEvent> {
            self.rows.lock().unwrap().get(&event_id).cloned()
        }
    }

    #[async_trait::async_trait]
    impl OutboxStore for InMemoryOutboxStore {
        async fn stage(&self, event: &OutboxEvent) -> Result<(), OutboxError> {
            self.rows.lock().unwrap().insert(event.event_id, event.clone());
            Ok(())
        }

        async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboxEvent>, OutboxError> {
            let rows = self.rows.lock().unwrap();
            let mut pending: Vec<_> = rows
                .values()
                .filter(|e| e.status == OutboxStatus::Pending)
                .cloned()
                .collect();
            pending.sort_by_key(|e| e.created_at);
            pending.truncate(limit as usize);
            Ok(pending)
        }

        async fn claim_expired(
            &self,
            now: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<OutboxEvent>, OutboxError> {
            let rows = self.rows.lock().unwrap();
            let mut expired: Vec<_> = rows
                .values()
                .filter(|e| {
                    e.status == OutboxStatus::Pending
                        && e.expires_at.is_some_and(|deadline| deadline < now)
                })
                .cloned()
                .collect();
            expired.sort_by_key(|e| e.created_at);
            expired.truncate(limit as usize);
            Ok(expired)
        }

        async fn mark_published(&self, event_id: Uuid) -> Result<(), OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            let event = rows.get_mut(&event_id).ok_or(OutboxError::NotFound(event_id))?;
            if event.status.can_transition_to(OutboxStatus::Published) {
                event.status = OutboxStatus::Published;
                event.published_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn mark_failed(
            &self,
            event_id: Uuid,
            error: &str,
            promote_to_failed: bool,
        ) -> Result<(), OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            let event = rows.get_mut(&event_id).ok_or(OutboxError::NotFound(event_id))?;
            event.attempt_count += 1;
            event.last_error = Some(error.to_string());
            if promote_to_failed && event.status.can_transition_to(OutboxStatus::Failed) {
                event.status = OutboxStatus::Failed;
            }
            Ok(())
        }

        async fn mark_timeout(&self, event_id: Uuid, error: &str) -> Result<(), OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            let event = rows.get_mut(&event_id).ok_or(OutboxError::NotFound(event_id))?;
            if event.status.can_transition_to(OutboxStatus::Timeout) {
                event.status = OutboxStatus::Timeout;
                event.last_error = Some(error.to_string());
            }
            Ok(())
        }

        async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|_, e| {
                !(e.status == OutboxStatus::Published
                    && e.published_at.is_some_and(|p| p < older_than))
            });
            Ok((before - rows.len()) as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::InMemoryOutboxStore;
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn staged_event_is_pending_and_claimable() {
        let store = InMemoryOutboxStore::new();
        let event = OutboxEvent::new("corr", "ORDER_CREATED", "q.order.events", serde_json::json!({"order_id": "O1"}));
        let event_id = event.event_id;

        store.stage(&event).await.unwrap();

        let row = store.get(event_id).expect("staged event recorded");
        assert_eq!(row.status, OutboxStatus::Pending);

        let claimed = store.claim_pending(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].event_id, event_id);
    }

    #[test]
    fn status_only_transitions_forward_from_pending() {
        assert!(OutboxStatus::Pending.can_transition_to(OutboxStatus::Published));
        assert!(!OutboxStatus::Published.can_transition_to(OutboxStatus::Pending));
        assert!(!OutboxStatus::Failed.can_transition_to(OutboxStatus::Published));
    }

    #[tokio::test]
    async fn claim_pending_is_oldest_first_and_bounded() {
        let store = InMemoryOutboxStore::new();
        for i in 0..5 {
            let mut event = OutboxEvent::new("corr", "ORDER_CREATED", "q.order.events", serde_json::json!({"i": i}));
            event.created_at = Utc::now() - Duration::seconds(5 - i);
            store.stage_now(event);
        }

        let claimed = store.claim_pending(3).await.unwrap();
        assert_eq!(claimed.len(), 3);
        assert!(claimed.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn expires_at_equal_to_now_is_not_expired() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let event = OutboxEvent::new("corr", "PAYMENT_INITIATED", "q.payment.events", serde_json::json!({}))
            .with_expires_at(now);
        let event_id = event.event_id;
        store.stage_now(event);

        let expired = store.claim_expired(now, 10).await.unwrap();
        assert!(expired.is_empty());

        let expired = store.claim_expired(now + Duration::milliseconds(1), 10).await.unwrap();
        assert_eq!(expired[0].event_id, event_id);
    }

    #[tokio::test]
    async fn attempt_cap_promotes_to_failed_on_the_cap_th_failure() {
        let store = InMemoryOutboxStore::new();
        let event = OutboxEvent::new("corr", "RESERVE", "q.inventory.events", serde_json::json!({}));
        let event_id = event.event_id;
        store.stage_now(event);

        for attempt in 1..=5 {
            let promote = attempt == 5;
            store.mark_failed(event_id, "transport down", promote).await.unwrap();
        }

        let row = store.get(event_id).unwrap();
        assert_eq!(row.attempt_count, 5);
        assert_eq!(row.status, OutboxStatus::Failed);
    }

    #[tokio::test]
    async fn cleanup_removes_only_published_rows_older_than_retention() {
        let store = InMemoryOutboxStore::new();
        let event = OutboxEvent::new("corr", "ORDER_CREATED", "q.order.events", serde_json::json!({}));
        let event_id = event.event_id;
        store.stage_now(event);
        store.mark_published(event_id).await.unwrap();

        let removed = store.cleanup(Utc::now() - Duration::days(1)).await.unwrap();
        assert_eq!(removed, 0);

        let removed = store.cleanup(Utc::now() + Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);
    }
}
