//! Geo Locator - cached geolocation resolution
//!
//! Wraps a [`GeoProvider`] with a TTL cache bounded in size, a single slot
//! for the local machine's own location, and the lazily resolved reference
//! coordinates used by distance rules.

use crate::domain::entities::{GeolocationRecord, RuleSet};
use crate::domain::errors::GeoLookupError;
use crate::domain::ports::{GeoProvider, LookupTarget};
use crate::domain::services::GeoFence;
use crate::domain::value_objects::Coordinates;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Cache tuning.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// How long a record is served from cache
    pub ttl: Duration,
    /// Maximum number of per-address entries; `0` disables the per-address cache
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 1000,
        }
    }
}

/// Per-address record cache.
///
/// Not synchronized on its own; [`GeoLocator`] keeps it behind a mutex so
/// that lookup, insertion and eviction never interleave.
#[derive(Debug, Default)]
pub(crate) struct GeoCache {
    entries: HashMap<IpAddr, GeolocationRecord>,
    max_entries: usize,
}

impl GeoCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
        }
    }

    /// Return the entry for `ip` if it is younger than `ttl`.
    pub fn get_fresh(&self, ip: &IpAddr, ttl: Duration, now: Instant) -> Option<GeolocationRecord> {
        self.entries
            .get(ip)
            .filter(|r| r.is_fresh(ttl, now))
            .cloned()
    }

    /// Insert or replace the entry for `ip`.
    ///
    /// When the bound is exceeded, the single entry with the oldest
    /// resolution time is evicted.
    pub fn insert(&mut self, ip: IpAddr, record: GeolocationRecord) {
        self.entries.insert(ip, record);

        if self.max_entries > 0 && self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, r)| r.resolved_at)
                .map(|(ip, _)| *ip);
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
                tracing::debug!(ip = %oldest, "evicted oldest geolocation cache entry");
            }
        }
    }

    #[cfg(test)]
    fn contains(&self, ip: &IpAddr) -> bool {
        self.entries.contains_key(ip)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Cached geolocation resolver.
///
/// Constructed once at startup and shared by every listener task.
pub struct GeoLocator {
    provider: Arc<dyn GeoProvider>,
    settings: CacheSettings,
    cache: Mutex<GeoCache>,
    local: Mutex<Option<GeolocationRecord>>,
    local_reference: OnceCell<Coordinates>,
}

impl GeoLocator {
    /// Create a new locator.
    pub fn new(provider: Arc<dyn GeoProvider>, settings: CacheSettings) -> Self {
        let cache = GeoCache::new(settings.max_entries);
        Self {
            provider,
            settings,
            cache: Mutex::new(cache),
            local: Mutex::new(None),
            local_reference: OnceCell::new(),
        }
    }

    /// Resolve an address, serving fresh cached records without a provider call.
    ///
    /// Failures (including rate limiting) are never cached. A local lookup
    /// without coordinates is reported as [`GeoLookupError::LocalUnavailable`].
    pub async fn resolve(&self, target: LookupTarget) -> Result<GeolocationRecord, GeoLookupError> {
        if let Some(hit) = self.cached(target, Instant::now()) {
            tracing::debug!(addr = %target, "geolocation cache hit");
            return Ok(hit);
        }

        let record = self.provider.lookup(target).await?;

        match target {
            LookupTarget::Local => {
                if record.location.is_unknown() {
                    return Err(GeoLookupError::LocalUnavailable);
                }
                *self.local.lock() = Some(record.clone());
            }
            LookupTarget::Remote(ip) => {
                if self.settings.max_entries > 0 {
                    self.cache.lock().insert(ip, record.clone());
                }
            }
        }

        tracing::debug!(
            addr = %target,
            country = %record.country,
            region = %record.region,
            city = %record.city,
            org = %record.org,
            loc = %record.location,
            "geolocation resolved"
        );

        Ok(record)
    }

    fn cached(&self, target: LookupTarget, now: Instant) -> Option<GeolocationRecord> {
        match target {
            LookupTarget::Local => self
                .local
                .lock()
                .as_ref()
                .filter(|r| r.is_fresh(self.settings.ttl, now))
                .cloned(),
            LookupTarget::Remote(ip) => self.cache.lock().get_fresh(&ip, self.settings.ttl, now),
        }
    }

    /// This machine's coordinates, resolved at most once for the process lifetime.
    ///
    /// Concurrent first callers share a single provider lookup. A failed
    /// attempt leaves the cell empty so the next caller retries.
    pub async fn local_reference(&self) -> Option<Coordinates> {
        let result = self
            .local_reference
            .get_or_try_init(|| async {
                self.resolve(LookupTarget::Local)
                    .await
                    .map(|record| record.location)
            })
            .await;

        match result {
            Ok(coords) => Some(*coords),
            Err(e) => {
                tracing::warn!("failed to resolve local coordinates: {}", e);
                None
            }
        }
    }

    /// Resolve `ip` and check it against `rules`.
    ///
    /// Any resolution failure means the location cannot be confirmed and the
    /// check fails.
    pub async fn within_fence(&self, ip: IpAddr, rules: &RuleSet) -> bool {
        if rules.is_empty() {
            return true;
        }

        let record = match self.resolve(LookupTarget::Remote(ip)).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(ip = %ip, "geolocation failed: {}", e);
                return false;
            }
        };

        let local = if rules.needs_local_reference() {
            self.local_reference().await
        } else {
            None
        };

        GeoFence::matches_set(&record, rules, local)
    }

    /// Number of per-address cache entries.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    #[cfg(test)]
    fn is_cached(&self, ip: &IpAddr) -> bool {
        self.cache.lock().contains(ip)
    }
}
