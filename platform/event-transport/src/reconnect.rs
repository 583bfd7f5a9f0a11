use crate::error::TransportError;
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 5;

/// Connect to the broker with bounded exponential backoff (start 5s, cap
/// 60s, up to 5 attempts) before surfacing a fatal error. `async-nats`
/// already reconnects transparently once connected; this covers the
/// initial-connect path where the broker may not be up yet.
pub async fn connect_with_backoff(url: &str) -> Result<async_nats::Client, TransportError> {
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        match async_nats::connect(url).await {
            Ok(client) => {
                if attempt > 1 {
                    tracing::info!(attempt, "connected to broker after retrying");
                }
                return Ok(client);
            }
            Err(err) => {
                if attempt == MAX_ATTEMPTS {
                    tracing::error!(attempt, error = %err, "exhausted connection retries");
                    return Err(TransportError::Fatal);
                }
                tracing::warn!(
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %err,
                    "broker connection failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            }
        }
    }

    Err(TransportError::Fatal)
}
