//! Approximate-match cache for panorama lookups.
//!
//! Entries are unique by provider panorama ID. A lookup hits an entry that
//! is still valid, lies within the distance tolerance and, when a heading is
//! given, faces within the heading tolerance (circular difference). Validity
//! is checked on every read; physical deletion of expired entries is only
//! storage reclamation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rstar::{AABB, RTree, RTreeObject};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{haversine_distance, heading_difference, normalize_heading, search_envelopes};
use crate::provider::call_bounded;
use crate::{
    CancelToken, GeoError, GeoPoint, ImageryCacheConfig, ImageryFetch, ImageryProvider,
    ImageryRequest, Result,
};

/// A cached panorama.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageryCacheEntry {
    /// Stable provider panorama identifier (the cache key).
    pub pano_id: String,
    /// Query location the panorama was fetched for.
    pub location: GeoPoint,
    /// Heading in `[0, 360)`.
    pub heading: f64,
    pub pitch: f64,
    pub fov: f64,
    /// Where the provider says the panorama was captured.
    pub pano_location: GeoPoint,
    pub capture_date: Option<String>,
    pub image_ref: String,
    pub expires_at: DateTime<Utc>,
}

impl ImageryCacheEntry {
    /// An entry is valid until its expiry instant (exclusive).
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Result of [`ImageryCache::plan_fetch`].
#[derive(Debug)]
pub enum ImageryLookup {
    Hit(ImageryCacheEntry),
    Miss(ImageryFetchPlan),
}

/// A provider call to make on a cache miss. Holds no borrow of the cache.
pub struct ImageryFetchPlan {
    provider: Arc<dyn ImageryProvider>,
    request: ImageryRequest,
    timeout: StdDuration,
}

impl fmt::Debug for ImageryFetchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageryFetchPlan")
            .field("request", &self.request)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ImageryFetchPlan {
    pub fn request(&self) -> &ImageryRequest {
        &self.request
    }

    /// Call the provider under the timeout and cancel token.
    pub fn fetch(self, cancel: &CancelToken) -> Result<FetchedImagery> {
        let provider = self.provider;
        let outbound = self.request.clone();
        match call_bounded(self.timeout, cancel, move || provider.panorama(&outbound)) {
            Ok(fetch) => Ok(FetchedImagery {
                fetch,
                request: self.request,
            }),
            Err(e) => {
                warn!(
                    "estategeo: [ImageryCache] fetch at {:.6},{:.6} failed ({}): {}",
                    self.request.location.lat(),
                    self.request.location.lng(),
                    e.kind().as_str(),
                    e
                );
                Err(e)
            }
        }
    }
}

/// A provider answer waiting to be stored.
#[derive(Debug, Clone)]
pub struct FetchedImagery {
    pub fetch: ImageryFetch,
    pub request: ImageryRequest,
}

fn validate_heading(heading: f64) -> Result<f64> {
    if heading.is_finite() {
        Ok(normalize_heading(heading))
    } else {
        Err(GeoError::InvalidHeading(heading))
    }
}

/// Entry location wrapper for R-tree indexing.
#[derive(Debug, Clone, PartialEq)]
struct CachedLocation {
    pano_id: String,
    lat: f64,
    lng: f64,
}

impl RTreeObject for CachedLocation {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

impl From<&ImageryCacheEntry> for CachedLocation {
    fn from(entry: &ImageryCacheEntry) -> Self {
        Self {
            pano_id: entry.pano_id.clone(),
            lat: entry.location.lat(),
            lng: entry.location.lng(),
        }
    }
}

/// Fuzzy-key panorama cache.
#[derive(Debug)]
pub struct ImageryCache {
    /// Entries by panorama ID
    entries: HashMap<String, ImageryCacheEntry>,
    /// Entry locations for tolerance searches
    locations: RTree<CachedLocation>,
    config: ImageryCacheConfig,
}

impl Default for ImageryCache {
    fn default() -> Self {
        Self::new(ImageryCacheConfig::default())
    }
}

impl ImageryCache {
    /// Create a new empty cache.
    pub fn new(config: ImageryCacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            locations: RTree::new(),
            config,
        }
    }

    /// Build a cache from previously persisted entries.
    pub fn from_entries(config: ImageryCacheConfig, entries: Vec<ImageryCacheEntry>) -> Self {
        let locations = RTree::bulk_load(entries.iter().map(CachedLocation::from).collect());
        Self {
            entries: entries.into_iter().map(|e| (e.pano_id.clone(), e)).collect(),
            locations,
            config,
        }
    }

    pub fn config(&self) -> &ImageryCacheConfig {
        &self.config
    }

    /// Look up with the configured tolerances.
    pub fn lookup(
        &self,
        location: &GeoPoint,
        heading: Option<f64>,
        now: DateTime<Utc>,
    ) -> Option<&ImageryCacheEntry> {
        self.lookup_with(
            location,
            heading,
            self.config.tolerance_meters,
            self.config.heading_tolerance_deg,
            now,
        )
    }

    /// Look up with explicit tolerances.
    ///
    /// Hit: valid at `now`, within `tolerance_meters`, and (if `heading` is
    /// given) less than `heading_tolerance_deg` away from the stored heading.
    /// Among several hits the nearest wins.
    pub fn lookup_with(
        &self,
        location: &GeoPoint,
        heading: Option<f64>,
        tolerance_meters: f64,
        heading_tolerance_deg: f64,
        now: DateTime<Utc>,
    ) -> Option<&ImageryCacheEntry> {
        if heading.is_some_and(|h| !h.is_finite()) {
            return None;
        }
        let mut best: Option<(&ImageryCacheEntry, f64)> = None;

        for envelope in search_envelopes(location, tolerance_meters) {
            let search = AABB::from_corners(
                [envelope.min_lng, envelope.min_lat],
                [envelope.max_lng, envelope.max_lat],
            );
            for candidate in self.locations.locate_in_envelope_intersecting(&search) {
                let Some(entry) = self.entries.get(&candidate.pano_id) else {
                    continue;
                };
                if !entry.is_valid(now) {
                    continue;
                }
                if let Some(h) = heading {
                    if heading_difference(h, entry.heading) >= heading_tolerance_deg {
                        continue;
                    }
                }
                let d = haversine_distance(location, &entry.location);
                if d > tolerance_meters {
                    continue;
                }
                if best.map_or(true, |(_, best_d)| d < best_d) {
                    best = Some((entry, d));
                }
            }
        }

        match best {
            Some((entry, d)) => {
                debug!(
                    "estategeo: [ImageryCache] hit {} at {:.1}m",
                    entry.pano_id, d
                );
                Some(entry)
            }
            None => None,
        }
    }

    /// Store a fetched panorama, refreshing in place if its ID is known.
    ///
    /// `expires_at` becomes `now + ttl`, and always moves strictly forward
    /// for an existing entry.
    pub fn upsert(
        &mut self,
        fetch: ImageryFetch,
        request: &ImageryRequest,
        now: DateTime<Utc>,
    ) -> Result<ImageryCacheEntry> {
        let entry = self.entry_for(fetch, request, now)?;
        self.restore(entry.clone());
        Ok(entry)
    }

    /// The entry [`upsert`](Self::upsert) would store, without storing it.
    pub fn entry_for(
        &self,
        fetch: ImageryFetch,
        request: &ImageryRequest,
        now: DateTime<Utc>,
    ) -> Result<ImageryCacheEntry> {
        let location = request.location.validated()?;
        let heading = validate_heading(request.heading)?;
        let ttl_seconds = self.config.ttl_seconds;
        let ttl = Duration::try_seconds(ttl_seconds).ok_or_else(|| {
            GeoError::InvalidArgument(format!("ttl_seconds {ttl_seconds} out of range"))
        })?;
        let mut expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            GeoError::InvalidArgument("imagery expiry out of range".to_string())
        })?;

        if let Some(existing) = self.entries.get(&fetch.pano_id) {
            if expires_at <= existing.expires_at {
                expires_at = existing.expires_at + Duration::milliseconds(1);
            }
        }

        Ok(ImageryCacheEntry {
            pano_id: fetch.pano_id,
            location,
            heading,
            pitch: request.pitch,
            fov: request.fov,
            pano_location: fetch.location,
            capture_date: fetch.capture_date,
            image_ref: fetch.image_ref,
            expires_at,
        })
    }

    /// First half of a cache-aside fetch: serve a hit, or describe the
    /// provider call to make on a miss.
    ///
    /// Only reads the cache. The returned [`ImageryFetchPlan`] borrows
    /// nothing, so the provider call can run without holding the cache.
    pub fn plan_fetch(
        &self,
        provider: &Arc<dyn ImageryProvider>,
        request: &ImageryRequest,
        timeout: StdDuration,
        now: DateTime<Utc>,
    ) -> Result<ImageryLookup> {
        let location = request.location.validated()?;
        let heading = validate_heading(request.heading)?;
        if let Some(hit) = self.lookup(&location, Some(heading), now) {
            return Ok(ImageryLookup::Hit(hit.clone()));
        }

        Ok(ImageryLookup::Miss(ImageryFetchPlan {
            provider: Arc::clone(provider),
            request: ImageryRequest {
                location,
                heading,
                ..request.clone()
            },
            timeout,
        }))
    }

    /// Cache-aside fetch: serve a hit, otherwise ask the provider and store
    /// the result.
    ///
    /// Nothing is cached when the provider fails, times out or the caller
    /// cancels.
    pub fn get_or_fetch(
        &mut self,
        provider: &Arc<dyn ImageryProvider>,
        request: &ImageryRequest,
        timeout: StdDuration,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<ImageryCacheEntry> {
        match self.plan_fetch(provider, request, timeout, now)? {
            ImageryLookup::Hit(entry) => Ok(entry),
            ImageryLookup::Miss(plan) => {
                let fetched = plan.fetch(cancel)?;
                let entry = self.upsert(fetched.fetch, &fetched.request, now)?;
                info!(
                    "estategeo: [ImageryCache] cached {} (expires {})",
                    entry.pano_id,
                    entry.expires_at.to_rfc3339()
                );
                Ok(entry)
            }
        }
    }

    /// Put an entry back as-is (e.g. when loading from storage).
    pub fn restore(&mut self, entry: ImageryCacheEntry) {
        if let Some(existing) = self.entries.get(&entry.pano_id) {
            let old = CachedLocation::from(existing);
            self.locations.remove(&old);
        }
        self.locations.insert(CachedLocation::from(&entry));
        self.entries.insert(entry.pano_id.clone(), entry);
    }

    /// Physically delete entries that expired at or before `now`.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| !e.is_valid(now))
            .map(|e| e.pano_id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = self.entries.remove(id) {
                self.locations.remove(&CachedLocation::from(&entry));
            }
        }

        if !expired.is_empty() {
            debug!("estategeo: [ImageryCache] purged {} expired", expired.len());
        }
        expired.len()
    }

    /// Stored entry by panorama ID, whether or not it is still valid.
    pub fn get_stored(&self, pano_id: &str) -> Option<&ImageryCacheEntry> {
        self.entries.get(pano_id)
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.locations = RTree::new();
    }

    /// Get all stored entries.
    pub fn values(&self) -> impl Iterator<Item = &ImageryCacheEntry> {
        self.entries.values()
    }

    /// Get the number of stored entries (valid or not).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
