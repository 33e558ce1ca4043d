//! Single-slot TTL cache for API access tokens.

use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::debug;

/// Safety margin subtracted from every TTL so a token is refreshed before the
/// issuer actually expires it.
const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// A freshly issued token plus the lifetime the issuer granted it.
pub struct IssuedToken {
    pub value: String,
    pub ttl: Duration,
}

struct Slot {
    value: String,
    expires_at: Instant,
}

/// Caches one token and refreshes it through a caller-supplied async fetch.
///
/// There is no single-flight lock: two tasks racing past an expired slot both
/// fetch, and the later write wins. Token issuance is idempotent, so the race
/// costs one extra HTTP call and nothing else; serializing all sends behind a
/// slow token endpoint would cost more.
pub struct TokenCache {
    slot: Mutex<Option<Slot>>,
    margin: Duration,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::with_margin(EXPIRY_MARGIN)
    }

    pub fn with_margin(margin: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            margin,
        }
    }

    /// Return the cached token, or fetch a fresh one when the slot is empty
    /// or past its deadline.
    pub async fn get<F, Fut>(&self, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IssuedToken>>,
    {
        {
            let slot = self.slot.lock().await;
            if let Some(cached) = slot.as_ref()
                && Instant::now() < cached.expires_at
            {
                return Ok(cached.value.clone());
            }
        }

        // Fetch outside the lock so a slow issuer never blocks readers.
        let issued = fetch().await?;
        let expires_at = Instant::now() + issued.ttl.saturating_sub(self.margin);
        debug!("token: refreshed, ttl {}s", issued.ttl.as_secs());
        let mut slot = self.slot.lock().await;
        *slot = Some(Slot {
            value: issued.value.clone(),
            expires_at,
        });
        Ok(issued.value)
    }

    /// Drop the cached token so the next `get` fetches.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn issued(value: &str, ttl_secs: u64) -> IssuedToken {
        IssuedToken {
            value: value.to_string(),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    #[tokio::test]
    async fn caches_until_expiry() {
        let cache = TokenCache::new();
        let fetches = AtomicUsize::new(0);
        for _ in 0..3 {
            let token = cache
                .get(|| async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(issued("tok-a", 7200))
                })
                .await
                .unwrap();
            assert_eq!(token, "tok-a");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_ttl_refetches_immediately() {
        // TTL below the margin means the slot is already stale when written.
        let cache = TokenCache::new();
        let fetches = AtomicUsize::new(0);
        for _ in 0..2 {
            cache
                .get(|| async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(issued("tok-b", 10))
                })
                .await
                .unwrap();
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = TokenCache::new();
        let fetches = AtomicUsize::new(0);
        let fetch = || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(issued("tok-c", 7200))
        };
        cache.get(fetch).await.unwrap();
        cache.invalidate().await;
        cache.get(fetch).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_error_propagates_and_leaves_slot_empty() {
        let cache = TokenCache::new();
        let result = cache
            .get(|| async { Err(anyhow::anyhow!("issuer down")) })
            .await;
        assert!(result.is_err());
        let token = cache.get(|| async { Ok(issued("tok-d", 7200)) }).await.unwrap();
        assert_eq!(token, "tok-d");
    }
}
