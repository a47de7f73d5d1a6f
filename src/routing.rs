//! Route computation through an external directions provider.
//!
//! This module provides:
//! - Route, owner and export types
//! - Origin resolution from stored geography
//! - Destination resolution (free text is geocoded, results LRU cached)
//! - `RouteComputer::compute`, which keeps the provider's best alternative
//!   and overwrites the owner slot on success only
//!
//! A computation runs in three steps: [`RouteComputer::plan`] reads the
//! stores, [`RoutePlan::fetch`] talks to the providers while holding no
//! borrow of them, and the caller writes the [`FetchedRoute`] back.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::engine::{RouteStore, SpatialStore};
use crate::geo_utils::decode_path;
use crate::provider::{call_bounded, DirectionsRequest, RouteAlternative};
use crate::{
    CancelToken, Destination, GeoError, GeoPoint, Geocoder, OptionExt, ProviderConfig, Result,
    RoutingConfig, RoutingProvider, TravelMode,
};

// ============================================================================
// Types
// ============================================================================

/// Who a route belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RouteOwner {
    /// A building's own route (single slot, uncapped).
    Building(String),
    /// A customer's saved routes (several slots, capped).
    Customer(String),
}

impl RouteOwner {
    /// Stable storage key, e.g. `customer:42`.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Parse a storage key produced by [`RouteOwner::key`].
    pub fn parse_key(key: &str) -> Option<Self> {
        let (kind, id) = key.split_once(':')?;
        match kind {
            "building" => Some(RouteOwner::Building(id.to_string())),
            "customer" => Some(RouteOwner::Customer(id.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RouteOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteOwner::Building(id) => write!(f, "building:{id}"),
            RouteOwner::Customer(id) => write!(f, "customer:{id}"),
        }
    }
}

/// One route slot of an owner. Upserts are keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerSlot {
    pub owner: RouteOwner,
    pub slot: u32,
}

impl OwnerSlot {
    pub fn new(owner: RouteOwner, slot: u32) -> Self {
        Self { owner, slot }
    }

    /// The single route slot of a building.
    pub fn building(id: &str) -> Self {
        Self::new(RouteOwner::Building(id.to_string()), 0)
    }

    pub fn customer(id: &str, slot: u32) -> Self {
        Self::new(RouteOwner::Customer(id.to_string()), slot)
    }
}

impl fmt::Display for OwnerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner, self.slot)
    }
}

/// Computed part of a route. Either all of it exists or none of it does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePath {
    pub encoded_path: String,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

impl From<&RouteAlternative> for RoutePath {
    fn from(alt: &RouteAlternative) -> Self {
        Self {
            encoded_path: alt.encoded_path.clone(),
            distance_meters: alt.distance_meters,
            duration_seconds: alt.duration_seconds,
        }
    }
}

/// A persisted route for one owner slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub owner_slot: OwnerSlot,
    pub origin: GeoPoint,
    pub destination: Option<GeoPoint>,
    pub destination_name: String,
    pub travel_mode: TravelMode,
    /// `Some` exactly when the route is computed.
    pub path: Option<RoutePath>,
    /// Provider summary of the kept alternative (e.g. the main road or line).
    pub summary: Option<String>,
    /// Provider response body, stored verbatim and never parsed again.
    pub raw_payload: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Route {
    pub fn computed(&self) -> bool {
        self.path.is_some()
    }

    /// Drop the computed part, keeping origin and destination.
    pub fn clear_path(&mut self) {
        self.path = None;
        self.summary = None;
        self.raw_payload = None;
    }

    pub fn distance_meters(&self) -> Option<f64> {
        self.path.as_ref().map(|p| p.distance_meters)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.path.as_ref().map(|p| p.duration_seconds)
    }

    pub fn encoded_path(&self) -> Option<&str> {
        self.path.as_ref().map(|p| p.encoded_path.as_str())
    }

    /// Decoded path points; empty when not computed.
    pub fn path_points(&self) -> Vec<GeoPoint> {
        self.encoded_path().map(decode_path).unwrap_or_default()
    }

    /// Shape handed to the UI/mapping layer.
    pub fn export(&self) -> RouteExport {
        RouteExport {
            origin: self.origin,
            destination: self.destination,
            destination_name: self.destination_name.clone(),
            travel_mode: self.travel_mode,
            distance_meters: self.distance_meters(),
            duration_seconds: self.duration_seconds(),
            encoded_path: self.encoded_path().map(str::to_string),
            computed: self.computed(),
        }
    }
}

/// Route as exported to the UI/mapping layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteExport {
    pub origin: GeoPoint,
    pub destination: Option<GeoPoint>,
    pub destination_name: String,
    pub travel_mode: TravelMode,
    pub distance_meters: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub encoded_path: Option<String>,
    pub computed: bool,
}

/// Where a route starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// A stored entity; its anchor point is the origin.
    Entity(String),
    Point(GeoPoint),
}

/// Input to [`RouteComputer::compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub owner_slot: OwnerSlot,
    pub origin: Origin,
    pub destination: Destination,
    /// Display name; defaults to the free-text query or the coordinate.
    pub destination_name: Option<String>,
    pub mode: TravelMode,
}

impl RouteRequest {
    /// Route from a building to a destination, stored in the building's slot.
    pub fn for_building(building_id: &str, destination: Destination, mode: TravelMode) -> Self {
        Self {
            owner_slot: OwnerSlot::building(building_id),
            origin: Origin::Entity(building_id.to_string()),
            destination,
            destination_name: None,
            mode,
        }
    }

    pub fn with_destination_name(mut self, name: &str) -> Self {
        self.destination_name = Some(name.to_string());
        self
    }
}

/// Display name for a destination when the caller gave none.
pub(crate) fn default_destination_name(destination: &Destination) -> String {
    match destination {
        Destination::Place(text) => text.trim().to_string(),
        Destination::Point(p) => format!("{:.6},{:.6}", p.lat(), p.lng()),
    }
}

/// Reject destinations that can never be routed, before any external call.
pub(crate) fn validate_destination(destination: &Destination) -> Result<()> {
    match destination {
        Destination::Place(text) if text.trim().is_empty() => Err(GeoError::MissingDestination),
        Destination::Place(_) => Ok(()),
        Destination::Point(p) => p.validated().map(|_| ()),
    }
}

// ============================================================================
// Route Computer
// ============================================================================

/// Computes and stores one route per owner slot.
///
/// Clones share the geocode cache.
#[derive(Clone)]
pub struct RouteComputer {
    routing: Arc<dyn RoutingProvider>,
    geocoder: Arc<dyn Geocoder>,
    geocode_cache: Arc<Mutex<LruCache<String, GeoPoint>>>,
    config: RoutingConfig,
    timeout: Duration,
}

impl RouteComputer {
    pub fn new(
        routing: Arc<dyn RoutingProvider>,
        geocoder: Arc<dyn Geocoder>,
        config: RoutingConfig,
        provider: &ProviderConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.geocode_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            routing,
            geocoder,
            geocode_cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            config,
            timeout: provider.timeout(),
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Route cap for an owner; building routes are uncapped.
    pub fn cap_for(&self, owner: &RouteOwner) -> Option<usize> {
        match owner {
            RouteOwner::Customer(_) => Some(self.config.max_routes_per_owner),
            RouteOwner::Building(_) => None,
        }
    }

    /// Resolve the origin without any external call.
    pub fn resolve_origin(&self, spatial: &SpatialStore, origin: &Origin) -> Result<GeoPoint> {
        match origin {
            Origin::Entity(id) => spatial.anchor_of(id).ok_or_missing_origin(id),
            Origin::Point(p) => p.validated(),
        }
    }

    fn cached_geocode(&self, key: &str) -> Option<GeoPoint> {
        self.geocode_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    /// Resolve a destination to a point, geocoding free text.
    ///
    /// The cache lock is never held across the geocoder call.
    pub fn resolve_destination(
        &self,
        destination: &Destination,
        cancel: &CancelToken,
    ) -> Result<GeoPoint> {
        match destination {
            Destination::Point(p) => p.validated(),
            Destination::Place(text) => {
                let key = text.trim().to_lowercase();
                if key.is_empty() {
                    return Err(GeoError::MissingDestination);
                }
                if let Some(p) = self.cached_geocode(&key) {
                    debug!("estategeo: [RouteComputer] geocode cache hit for '{}'", key);
                    return Ok(p);
                }

                let geocoder = Arc::clone(&self.geocoder);
                let query = text.trim().to_string();
                let point = call_bounded(self.timeout, cancel, move || geocoder.geocode(&query))?;
                let point = point.validated()?;
                self.geocode_cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .put(key, point);
                Ok(point)
            }
        }
    }

    /// Ask the routing provider for alternatives (best first) plus the raw body.
    pub(crate) fn fetch_alternatives(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        mode: TravelMode,
        alternatives: bool,
        cancel: &CancelToken,
    ) -> Result<(Vec<RouteAlternative>, String)> {
        let request = DirectionsRequest {
            origin,
            destination,
            mode,
            alternatives,
        };
        let routing = Arc::clone(&self.routing);
        let response = call_bounded(self.timeout, cancel, move || routing.directions(&request))?;
        response.into_alternatives()
    }

    /// Validate `request` against the stores and capture what the fetch needs.
    ///
    /// Destination, origin and owner cap are all checked here, before any
    /// external call.
    pub fn plan(
        &self,
        spatial: &SpatialStore,
        routes: &RouteStore,
        request: &RouteRequest,
    ) -> Result<RoutePlan> {
        let slot = &request.owner_slot;
        validate_destination(&request.destination)?;
        let origin = self.resolve_origin(spatial, &request.origin)?;
        routes.check_capacity(slot, self.cap_for(&slot.owner))?;

        Ok(RoutePlan {
            computer: self.clone(),
            owner_slot: slot.clone(),
            origin,
            destination: request.destination.clone(),
            destination_name: request
                .destination_name
                .clone()
                .unwrap_or_else(|| default_destination_name(&request.destination)),
            mode: request.mode,
        })
    }

    /// Store a fetched route, re-checking the cap against the current store.
    pub fn store(&self, routes: &mut RouteStore, route: Route) -> Result<Route> {
        let cap = self.cap_for(&route.owner_slot.owner);
        routes.upsert(route.clone(), cap)?;
        Ok(route)
    }

    /// Compute the route for `request.owner_slot` and store it.
    ///
    /// On any failure the slot keeps whatever it held before; a slot that
    /// was never computed stays absent, i.e. not computed.
    pub fn compute(
        &self,
        spatial: &SpatialStore,
        routes: &mut RouteStore,
        request: &RouteRequest,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<Route> {
        let fetched = self.plan(spatial, routes, request)?.fetch(cancel)?;
        self.store(routes, fetched.into_route(now))
    }
}

/// A validated route computation that owns everything its fetch needs.
pub struct RoutePlan {
    computer: RouteComputer,
    owner_slot: OwnerSlot,
    origin: GeoPoint,
    destination: Destination,
    destination_name: String,
    mode: TravelMode,
}

impl fmt::Debug for RoutePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutePlan")
            .field("owner_slot", &self.owner_slot)
            .field("origin", &self.origin)
            .field("destination", &self.destination)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl RoutePlan {
    pub fn owner_slot(&self) -> &OwnerSlot {
        &self.owner_slot
    }

    /// Resolve the destination and keep the provider's best alternative.
    pub fn fetch(self, cancel: &CancelToken) -> Result<FetchedRoute> {
        let computer = &self.computer;
        let result = computer
            .resolve_destination(&self.destination, cancel)
            .and_then(|dest| {
                computer
                    .fetch_alternatives(self.origin, dest, self.mode, false, cancel)
                    .map(|(alts, raw)| (dest, alts, raw))
            });

        let (destination, alternatives, raw) = match result {
            Ok(ok) => ok,
            Err(e) => {
                warn!(
                    "estategeo: [RouteComputer] {} failed ({}): {}",
                    self.owner_slot,
                    e.kind().as_str(),
                    e
                );
                return Err(e);
            }
        };

        // Provider order is best first
        let best = alternatives.into_iter().next().ok_or(GeoError::NoRoute)?;
        info!(
            "estategeo: [RouteComputer] {} computed: {:.0}m, {:.0}s ({})",
            self.owner_slot,
            best.distance_meters,
            best.duration_seconds,
            self.mode.as_str()
        );
        Ok(FetchedRoute {
            owner_slot: self.owner_slot,
            origin: self.origin,
            destination,
            destination_name: self.destination_name,
            mode: self.mode,
            best,
            raw_payload: raw,
        })
    }
}

/// Provider answer for a [`RoutePlan`], not yet stored.
#[derive(Debug, Clone)]
pub struct FetchedRoute {
    pub owner_slot: OwnerSlot,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub destination_name: String,
    pub mode: TravelMode,
    pub best: RouteAlternative,
    pub raw_payload: String,
}

impl FetchedRoute {
    pub fn into_route(self, now: DateTime<Utc>) -> Route {
        Route {
            path: Some(RoutePath::from(&self.best)),
            summary: Some(self.best.summary),
            owner_slot: self.owner_slot,
            origin: self.origin,
            destination: Some(self.destination),
            destination_name: self.destination_name,
            travel_mode: self.mode,
            raw_payload: Some(self.raw_payload),
            updated_at: now,
        }
    }
}
