//! Shared Market-Data Cache: spec §4.3. Wraps a [`MarketDataDriver`] so
//! concurrent readers of the same `(security, data_type, date)` decode the
//! underlying data exactly once.

use super::driver::{MarketDataDriver, MarketMessage};
use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// One cache entry per `(security, data_type, format, date)` quadruple. The
/// `OnceCell` *is* the per-date single-flight mutex: concurrent callers of
/// `get_or_try_init` all await the same in-flight initialization instead of
/// racing to decode, satisfying "the underlying loader is invoked at most
/// once per cache-entry lifetime" (spec §4.3 invariant a).
struct CacheEntry {
    messages: OnceCell<Arc<Vec<MarketMessage>>>,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            messages: OnceCell::new(),
        }
    }
}

/// A reference-counted view over an already-materialized message array.
/// Disposal-safe per spec §4.3 invariant (b) and §9: dropping this iterator
/// mid-consumption never invalidates the backing array, because the `Arc`
/// keeps it alive independently of both this iterator's lifetime and the
/// cache entry that originally published it.
pub struct CachedMessages {
    data: Arc<Vec<MarketMessage>>,
    index: usize,
}

impl Iterator for CachedMessages {
    type Item = MarketMessage;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.data.get(self.index).cloned();
        if item.is_some() {
            self.index += 1;
        }
        item
    }
}

/// Per-`(security, data_type, format)` wrapper over the driver, memoizing
/// decoded messages per date.
pub struct SharedMarketDataCache {
    driver: Arc<dyn MarketDataDriver>,
    entries: DashMap<(String, String, String, NaiveDate), Arc<CacheEntry>>,
}

impl SharedMarketDataCache {
    #[must_use]
    pub fn new(driver: Arc<dyn MarketDataDriver>) -> Self {
        Self {
            driver,
            entries: DashMap::new(),
        }
    }

    fn key(security: &str, data_type: &str, format: &str, date: NaiveDate) -> (String, String, String, NaiveDate) {
        (security.to_string(), data_type.to_string(), format.to_string(), date)
    }

    /// On a hit, streams from the cached array without re-decoding; on a
    /// miss, decodes fully into an array via the single-flight `OnceCell`
    /// and publishes it for all waiters.
    pub async fn load(
        &self,
        security: &str,
        data_type: &str,
        format: &str,
        date: NaiveDate,
    ) -> anyhow::Result<CachedMessages> {
        let key = Self::key(security, data_type, format, date);
        // `entry().or_insert_with` on DashMap is itself atomic per-shard, so
        // the first caller to reach a given key creates the `CacheEntry`
        // and all others reuse it — no two entries are ever created for the
        // same key, even under concurrent first access.
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(CacheEntry::new()))
            .clone();

        let security = security.to_string();
        let data_type = data_type.to_string();
        let driver = Arc::clone(&self.driver);
        let data = entry
            .messages
            .get_or_try_init(|| async move {
                tracing::debug!(%security, %data_type, %date, "decoding market data (cache miss)");
                let msgs = driver.load(&security, &data_type, date)?;
                Ok::<_, anyhow::Error>(Arc::new(msgs))
            })
            .await?
            .clone();

        Ok(CachedMessages { data, index: 0 })
    }

    /// Evicts both the cached array and the underlying storage entry.
    pub fn delete(&self, security: &str, data_type: &str, format: &str, date: NaiveDate) -> anyhow::Result<()> {
        let key = Self::key(security, data_type, format, date);
        self.entries.remove(&key);
        self.driver.delete(security, data_type, date)
    }

    /// Evicts all in-memory entries; does not touch underlying storage.
    pub fn clear_cache(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDriver {
        calls: AtomicUsize,
    }

    impl MarketDataDriver for CountingDriver {
        fn get_dates(&self, _security: &str, _data_type: &str) -> anyhow::Result<Vec<NaiveDate>> {
            Ok(vec![])
        }
        fn get_meta(&self, _s: &str, _t: &str, _d: NaiveDate) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        fn load(&self, _security: &str, _data_type: &str, date: NaiveDate) -> anyhow::Result<Vec<MarketMessage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![MarketMessage {
                date,
                payload: vec![1, 2, 3],
            }])
        }
        fn save(&self, _s: &str, _t: &str, _msgs: &[MarketMessage]) -> anyhow::Result<()> {
            Ok(())
        }
        fn delete(&self, _s: &str, _t: &str, _d: NaiveDate) -> anyhow::Result<()> {
            Ok(())
        }
    }

    // S3 — Shared cache single-flight.
    #[tokio::test]
    async fn single_flight_across_concurrent_readers() {
        let driver = Arc::new(CountingDriver {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(SharedMarketDataCache::new(driver.clone()));
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let msgs: Vec<_> = cache.load("AAPL", "bars", "bin", date).await.unwrap().collect();
                msgs
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }

        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
        for r in &results {
            assert_eq!(r.len(), 1);
            assert_eq!(r[0].payload, vec![1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn dropping_iterator_mid_consumption_does_not_invalidate_backing_array() {
        let driver = Arc::new(CountingDriver {
            calls: AtomicUsize::new(0),
        });
        let cache = SharedMarketDataCache::new(driver);
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let mut iter = cache.load("AAPL", "bars", "bin", date).await.unwrap();
        let first = iter.next();
        drop(iter);
        assert!(first.is_some());

        // Re-fetching must still observe the single published array, not a
        // fresh decode.
        let again: Vec<_> = cache.load("AAPL", "bars", "bin", date).await.unwrap().collect();
        assert_eq!(again.len(), 1);
    }
}
