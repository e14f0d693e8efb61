//! Two-tier resolution cache.
//!
//! The volatile tier is an in-process map keyed by the normalized address. The
//! persistent tier is the `geocode_cache` table keyed by the address hash and
//! only ever holds successful resolutions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::{CacheSettings, MAX_CACHE_TTL_SECS};
use crate::db::SharedConnection;
use crate::errors::{AppError, AppResult};
use crate::geocoder::ResolutionResult;

/// Lowercase, trim and collapse whitespace runs into single spaces.
pub fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn address_hash(address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_address(address).as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct VolatileEntry {
    result: ResolutionResult,
    expires_at: Instant,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub volatile_hits: u64,
    pub persistent_hits: u64,
    pub misses: u64,
    pub volatile_entries: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub persistent_removed: usize,
    pub volatile_removed: usize,
}

#[derive(Default)]
struct Counters {
    volatile_hits: AtomicU64,
    persistent_hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Clone)]
pub struct ResolutionCache {
    db: SharedConnection,
    volatile: Arc<Mutex<HashMap<String, VolatileEntry>>>,
    counters: Arc<Counters>,
    settings: CacheSettings,
}

impl ResolutionCache {
    pub fn new(db: SharedConnection, settings: CacheSettings) -> Self {
        Self {
            db,
            volatile: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            settings,
        }
    }

    pub fn lookup(&self, address: &str) -> AppResult<Option<ResolutionResult>> {
        let key = normalize_address(address);
        if let Some(result) = self.volatile_get(&key) {
            self.counters.volatile_hits.fetch_add(1, Ordering::Relaxed);
            trace!(target: "geocode_cache", tier = "volatile", "cache hit");
            return Ok(Some(result));
        }

        let hash = address_hash(&key);
        let Some(result) = self.persistent_get(&hash)? else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        self.counters.persistent_hits.fetch_add(1, Ordering::Relaxed);
        trace!(target: "geocode_cache", tier = "persistent", %hash, "cache hit");
        self.volatile_put(key, result.clone(), self.settings.success_ttl);
        Ok(Some(result))
    }

    pub fn store(&self, address: &str, result: &ResolutionResult) -> AppResult<()> {
        let key = normalize_address(address);
        match result {
            ResolutionResult::Success {
                lat,
                lng,
                formatted_address,
            } => {
                self.persistent_put(address, &key, *lat, *lng, formatted_address.as_deref())?;
                self.volatile_put(key, result.clone(), self.settings.success_ttl);
            }
            ResolutionResult::Failure { kind, .. } if kind.is_address_specific() => {
                self.volatile_put(key, result.clone(), self.settings.failure_ttl);
            }
            ResolutionResult::Failure { kind, .. } => {
                debug!(target: "geocode_cache", ?kind, "transient failure not cached");
            }
        }
        Ok(())
    }

    /// Drops persistent rows older than the configured age and expired
    /// volatile entries.
    pub fn sweep(&self) -> AppResult<SweepReport> {
        let persistent_removed = {
            let conn = self.db.lock();
            conn.execute(
                "DELETE FROM geocode_cache WHERE updated_at < DATETIME('now', ?1)",
                [format!("-{} days", self.settings.max_age_days)],
            )?
        };

        let volatile_removed = {
            let now = Instant::now();
            let mut volatile = self.volatile.lock();
            let before = volatile.len();
            volatile.retain(|_, entry| entry.expires_at > now);
            before - volatile.len()
        };

        info!(
            target: "geocode_cache",
            persistent_removed,
            volatile_removed,
            "cache sweep finished"
        );
        Ok(SweepReport {
            persistent_removed,
            volatile_removed,
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            volatile_hits: self.counters.volatile_hits.load(Ordering::Relaxed),
            persistent_hits: self.counters.persistent_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            volatile_entries: self.volatile.lock().len(),
        }
    }

    fn volatile_get(&self, key: &str) -> Option<ResolutionResult> {
        let mut volatile = self.volatile.lock();
        match volatile.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.result.clone()),
            Some(_) => {
                volatile.remove(key);
                None
            }
            None => None,
        }
    }

    fn volatile_put(&self, key: String, result: ResolutionResult, ttl: Duration) {
        let now = Instant::now();
        let ttl = ttl.min(Duration::from_secs(MAX_CACHE_TTL_SECS));
        let Some(expires_at) = now.checked_add(ttl) else {
            debug!(target: "geocode_cache", ?ttl, "ttl overflows the clock; entry not cached");
            return;
        };
        let entry = VolatileEntry { result, expires_at };
        self.volatile.lock().insert(key, entry);
    }

    fn persistent_get(&self, hash: &str) -> AppResult<Option<ResolutionResult>> {
        let conn = self.db.lock();
        let row = conn
            .query_row(
                "SELECT latitude, longitude, formatted_address FROM geocode_cache WHERE address_hash = ?1",
                [hash],
                |row| {
                    Ok(ResolutionResult::Success {
                        lat: row.get(0)?,
                        lng: row.get(1)?,
                        formatted_address: row.get(2)?,
                    })
                },
            )
            .optional()?;
        if row.is_some() {
            conn.execute(
                "UPDATE geocode_cache SET updated_at = DATETIME('now') WHERE address_hash = ?1",
                [hash],
            )?;
        }
        Ok(row)
    }

    fn persistent_put(
        &self,
        address: &str,
        key: &str,
        lat: f64,
        lng: f64,
        formatted_address: Option<&str>,
    ) -> AppResult<()> {
        let hash = address_hash(key);
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO geocode_cache (address_hash, address, latitude, longitude, formatted_address, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, DATETIME('now'))
            ON CONFLICT(address_hash) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                formatted_address = COALESCE(excluded.formatted_address, geocode_cache.formatted_address),
                updated_at = DATETIME('now')",
            params![hash, address.trim(), lat, lng, formatted_address],
        )
        .map_err(AppError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::bootstrap_in_memory;
    use crate::geocoder::FailureKind;

    fn cache() -> (ResolutionCache, SharedConnection) {
        let db = bootstrap_in_memory().unwrap().into_shared();
        (ResolutionCache::new(db.clone(), CacheSettings::default()), db)
    }

    fn success(lat: f64, lng: f64) -> ResolutionResult {
        ResolutionResult::Success {
            lat,
            lng,
            formatted_address: Some("Somewhere".into()),
        }
    }

    fn persistent_rows(db: &SharedConnection) -> i64 {
        db.lock()
            .query_row("SELECT COUNT(*) FROM geocode_cache", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn equivalent_addresses_share_a_hash() {
        assert_eq!(
            address_hash(" 123 Main St, Springfield "),
            address_hash("123 main st, springfield")
        );
        assert_eq!(
            normalize_address("  123\tMAIN   St,\nSpringfield "),
            "123 main st, springfield"
        );
        assert_ne!(address_hash("123 Main St"), address_hash("124 Main St"));
    }

    #[tokio::test]
    async fn successes_reach_both_tiers() {
        let (cache, db) = cache();
        cache.store("123 Main St", &success(1.0, 2.0)).unwrap();
        assert_eq!(persistent_rows(&db), 1);
        assert_eq!(cache.lookup("123 MAIN ST").unwrap(), Some(success(1.0, 2.0)));
        assert_eq!(cache.stats().volatile_hits, 1);
    }

    #[tokio::test]
    async fn persistent_hit_backfills_volatile_tier() {
        let (cache, db) = cache();
        cache.store("9 Elm St", &success(3.0, 4.0)).unwrap();

        let cold = ResolutionCache::new(db, CacheSettings::default());
        assert_eq!(cold.lookup("9 elm st").unwrap(), Some(success(3.0, 4.0)));
        assert_eq!(cold.lookup("9 elm st").unwrap(), Some(success(3.0, 4.0)));
        let stats = cold.stats();
        assert_eq!(stats.persistent_hits, 1);
        assert_eq!(stats.volatile_hits, 1);
        assert_eq!(stats.volatile_entries, 1);
    }

    #[tokio::test]
    async fn failures_never_persist() {
        let (cache, db) = cache();
        let missing = ResolutionResult::failure(FailureKind::NoResults, "ZERO_RESULTS");
        cache.store("Nowhere", &missing).unwrap();
        assert_eq!(persistent_rows(&db), 0);
        assert_eq!(cache.lookup("nowhere").unwrap(), Some(missing));

        let throttled = ResolutionResult::failure(FailureKind::RateLimited, "OVER_QUERY_LIMIT");
        cache.store("Busy Rd", &throttled).unwrap();
        assert_eq!(cache.lookup("busy rd").unwrap(), None);
        assert_eq!(persistent_rows(&db), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_failures_expire_after_short_ttl() {
        let (cache, _db) = cache();
        let missing = ResolutionResult::failure(FailureKind::NoResults, "ZERO_RESULTS");
        cache.store("Nowhere", &missing).unwrap();

        tokio::time::advance(CacheSettings::default().failure_ttl + Duration::from_secs(1)).await;
        assert_eq!(cache.lookup("nowhere").unwrap(), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_rows() {
        let (cache, db) = cache();
        cache.store("Fresh St", &success(1.0, 1.0)).unwrap();
        db.lock()
            .execute(
                "INSERT INTO geocode_cache (address_hash, address, latitude, longitude, updated_at)
                VALUES ('stale', 'Old St', 5.0, 5.0, DATETIME('now', '-8 days'))",
                [],
            )
            .unwrap();

        let report = cache.sweep().unwrap();
        assert_eq!(report.persistent_removed, 1);
        assert_eq!(persistent_rows(&db), 1);
    }

    #[tokio::test]
    async fn persistent_hit_refreshes_row_age() {
        let (cache, db) = cache();
        cache.store("Old Mill Rd", &success(7.0, 8.0)).unwrap();
        db.lock()
            .execute(
                "UPDATE geocode_cache SET updated_at = DATETIME('now', '-8 days')",
                [],
            )
            .unwrap();

        let cold = ResolutionCache::new(db.clone(), CacheSettings::default());
        assert_eq!(cold.lookup("old mill rd").unwrap(), Some(success(7.0, 8.0)));

        let report = cold.sweep().unwrap();
        assert_eq!(report.persistent_removed, 0);
        assert_eq!(persistent_rows(&db), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_purges_expired_volatile_entries() {
        let (cache, _db) = cache();
        let missing = ResolutionResult::failure(FailureKind::NoResults, "ZERO_RESULTS");
        cache.store("Nowhere", &missing).unwrap();
        cache.store("Fresh St", &success(1.0, 1.0)).unwrap();

        tokio::time::advance(CacheSettings::default().failure_ttl + Duration::from_secs(1)).await;
        let report = cache.sweep().unwrap();
        assert_eq!(report.volatile_removed, 1);
        assert_eq!(report.persistent_removed, 0);
        assert_eq!(cache.stats().volatile_entries, 1);
    }

    #[tokio::test]
    async fn oversized_ttl_does_not_overflow() {
        let db = bootstrap_in_memory().unwrap().into_shared();
        let cache = ResolutionCache::new(
            db,
            CacheSettings {
                success_ttl: Duration::MAX,
                failure_ttl: Duration::MAX,
                max_age_days: 7,
            },
        );
        cache.store("1 Long Way", &success(2.0, 3.0)).unwrap();
        assert_eq!(cache.lookup("1 long way").unwrap(), Some(success(2.0, 3.0)));
    }
}
