//! # Idempotency Store
//!
//! Records `(consumer_name, idempotency_key)` pairs with a TTL. Presence of
//! a key means "already applied; skip". Consumers derive `idempotency_key`
//! from the business meaning of the event (e.g.
//! `seckill:{user_id}:{product_id}:{timestamp}`), not solely from the
//! envelope's `event_id`, so that duplicate upstream events collapse even
//! when their envelope ids differ.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

/// Default TTL applied when a caller doesn't specify one.
pub const DEFAULT_TTL: Duration = Duration::hours(24);

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Abstraction over the idempotency store so callers (and tests) can swap
/// the Postgres-backed implementation for an in-memory fake.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn is_processed(&self, consumer_name: &str, key: &str) -> Result<bool, IdempotencyError>;

    /// Atomically record `(consumer_name, key)` as processed. Returns
    /// `true` if this call performed the insert (first time seen), `false`
    /// if the key was already present (SETNX semantics).
    async fn mark_as_processed(
        &self,
        consumer_name: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, IdempotencyError>;

    /// Convenience wrapper: runs `handler` only if `(consumer_name, key)`
    /// has not been seen before, then marks it processed. Returns `false`
    /// if the event was a duplicate and `handler` was skipped.
    async fn process_idempotent<F, Fut, E>(
        &self,
        consumer_name: &str,
        key: &str,
        ttl: Duration,
        handler: F,
    ) -> Result<bool, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<(), E>> + Send,
        E: From<IdempotencyError> + Send,
    {
        if self.is_processed(consumer_name, key).await.map_err(E::from)? {
            tracing::info!(
                consumer_name,
                idempotency_key = key,
                "duplicate event ignored (already processed)"
            );
            return Ok(false);
        }

        handler().await?;

        self.mark_as_processed(consumer_name, key, ttl)
            .await
            .map_err(E::from)?;

        Ok(true)
    }
}

/// Postgres-backed implementation.
///
/// Expected schema:
/// ```sql
/// CREATE TABLE processed_keys (
///     consumer_name TEXT NOT NULL,
///     idempotency_key TEXT NOT NULL,
///     processed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
///     expires_at TIMESTAMPTZ NOT NULL,
///     PRIMARY KEY (consumer_name, idempotency_key)
/// );
/// ```
#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete rows whose TTL has lapsed. Intended to be called from a
    /// periodic cleanup task; the retention/cleanup schedule itself is an
    /// operator decision (see DESIGN.md Open Questions).
    pub async fn purge_expired(&self) -> Result<u64, IdempotencyError> {
        let result = sqlx::query("DELETE FROM processed_keys WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn is_processed(&self, consumer_name: &str, key: &str) -> Result<bool, IdempotencyError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT 1
            FROM processed_keys
            WHERE consumer_name = $1 AND idempotency_key = $2 AND expires_at > NOW()
            "#,
        )
        .bind(consumer_name)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn mark_as_processed(
        &self,
        consumer_name: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, IdempotencyError> {
        let expires_at: DateTime<Utc> = Utc::now() + ttl;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_keys (consumer_name, idempotency_key, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (consumer_name, idempotency_key) DO NOTHING
            "#,
        )
        .bind(consumer_name)
        .bind(key)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        tracing::debug!(
            consumer_name,
            idempotency_key = key,
            inserted,
            "idempotency key recorded"
        );
        Ok(inserted)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use fake::InMemoryIdempotencyStore;

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! An in-memory fake used by downstream crates' tests so they don't
    //! need a live Postgres connection.
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryIdempotencyStore {
        seen: Mutex<HashMap<(String, String), DateTime<Utc>>>,
    }

    impl InMemoryIdempotencyStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl IdempotencyStore for InMemoryIdempotencyStore {
        async fn is_processed(
            &self,
            consumer_name: &str,
            key: &str,
        ) -> Result<bool, IdempotencyError> {
            let seen = self.seen.lock().unwrap();
            Ok(seen
                .get(&(consumer_name.to_string(), key.to_string()))
                .is_some_and(|expires_at| *expires_at > Utc::now()))
        }

        async fn mark_as_processed(
            &self,
            consumer_name: &str,
            key: &str,
            ttl: Duration,
        ) -> Result<bool, IdempotencyError> {
            let mut seen = self.seen.lock().unwrap();
            let k = (consumer_name.to_string(), key.to_string());
            if seen.contains_key(&k) {
                return Ok(false);
            }
            seen.insert(k, Utc::now() + ttl);
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::InMemoryIdempotencyStore;
    use super::*;

    #[tokio::test]
    async fn mark_as_processed_is_setnx() {
        let store = InMemoryIdempotencyStore::new();
        assert!(store
            .mark_as_processed("order-consumer", "order:resv:O1", DEFAULT_TTL)
            .await
            .unwrap());
        assert!(!store
            .mark_as_processed("order-consumer", "order:resv:O1", DEFAULT_TTL)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn is_processed_reflects_marked_keys() {
        let store = InMemoryIdempotencyStore::new();
        assert!(!store.is_processed("c", "k").await.unwrap());
        store
            .mark_as_processed("c", "k", DEFAULT_TTL)
            .await
            .unwrap();
        assert!(store.is_processed("c", "k").await.unwrap());
    }

    #[tokio::test]
    async fn process_idempotent_runs_handler_once() {
        let store = InMemoryIdempotencyStore::new();
        let mut calls = 0;

        for _ in 0..3 {
            let applied: Result<bool, IdempotencyError> = store
                .process_idempotent("consumer", "key-1", DEFAULT_TTL, || {
                    calls += 1;
                    async { Ok(()) }
                })
                .await;
            applied.unwrap();
        }

        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn different_keys_are_independent() {
        let store = InMemoryIdempotencyStore::new();
        assert!(store
            .mark_as_processed("c", "k1", DEFAULT_TTL)
            .await
            .unwrap());
        assert!(store
            .mark_as_processed("c", "k2", DEFAULT_TTL)
            .await
            .unwrap());
    }
}
