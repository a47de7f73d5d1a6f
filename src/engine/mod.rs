//! # Geo Engine
//!
//! Façade over the stores with focused subcomponents.
//!
//! ## Architecture
//!
//! The engine is composed of focused modules:
//! - `SpatialStore` - Entity CRUD with R-tree backed queries
//! - `RouteStore` - One route per owner slot, per-owner caps
//! - `ImageryCache` - Fuzzy-key panorama cache with expiry
//! - `SpatialIndex` - R-trees for anchors and polygon extents
//!
//! Route computation and candidate preview/select live in
//! [`crate::routing`] and [`crate::ranker`]; the engine wires them to the
//! stores, the clock and (optionally) SQLite.
//!
//! ## Sharing
//!
//! Queries take `&self`; writes take `&mut self`. Operations that call a
//! provider are split so that a shared `Mutex<GeoEngine>` is never locked
//! across the call:
//!
//! ```text
//! let plan = engine.lock().prepare_route(&request)?;   // &self
//! let fetched = plan.fetch(&cancel)?;                  // no engine borrow
//! engine.lock().commit_route(fetched)?;                // &mut self
//! ```
//!
//! Every write reaches SQLite before memory, so a failed database write
//! leaves the in-memory stores unchanged.

pub mod imagery_cache;
pub mod route_store;
pub mod spatial_index;
pub mod spatial_store;

pub use imagery_cache::{
    FetchedImagery, ImageryCache, ImageryCacheEntry, ImageryFetchPlan, ImageryLookup,
};
pub use route_store::RouteStore;
pub use spatial_index::{AnchorEntry, PolygonBounds, SpatialIndex};
pub use spatial_store::SpatialStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;

#[cfg(feature = "persistence")]
use crate::persistence::GeoDatabase;
use crate::{
    CancelToken, CandidateSet, Clock, Destination, EngineConfig, EntityKind, FetchedRoute,
    GeoPoint, Geocoder, ImageryProvider, ImageryRequest, Origin, OwnerSlot, PreviewPlan, Result,
    Route, RouteCandidateRanker, RouteComputer, RouteExport, RouteOwner, RoutePlan, RouteRequest,
    RoutingProvider, SpatialEntity, SystemClock, TravelMode,
};

/// External providers the engine talks to.
#[derive(Clone)]
pub struct Providers {
    pub routing: Arc<dyn RoutingProvider>,
    pub geocoder: Arc<dyn Geocoder>,
    pub imagery: Arc<dyn ImageryProvider>,
}

/// Geospatial engine: stores, route computation and imagery caching.
pub struct GeoEngine {
    // Core components
    pub spatial: SpatialStore,
    pub routes: RouteStore,
    pub imagery: ImageryCache,

    computer: RouteComputer,
    ranker: RouteCandidateRanker,
    imagery_provider: Arc<dyn ImageryProvider>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,

    #[cfg(feature = "persistence")]
    db: Option<GeoDatabase>,
}

impl GeoEngine {
    /// Create an in-memory engine. Fails on an invalid configuration.
    pub fn new(config: EngineConfig, providers: Providers) -> Result<Self> {
        config.validate()?;
        let computer = RouteComputer::new(
            providers.routing,
            providers.geocoder,
            config.routing.clone(),
            &config.provider,
        );
        Ok(Self {
            spatial: SpatialStore::new(),
            routes: RouteStore::new(),
            imagery: ImageryCache::new(config.imagery.clone()),
            computer,
            ranker: RouteCandidateRanker::new(),
            imagery_provider: providers.imagery,
            clock: Arc::new(SystemClock),
            config,
            #[cfg(feature = "persistence")]
            db: None,
        })
    }

    /// Open an engine backed by a SQLite file, loading everything it holds.
    #[cfg(feature = "persistence")]
    pub fn open(db_path: &str, config: EngineConfig, providers: Providers) -> Result<Self> {
        let mut engine = Self::new(config, providers)?;
        let db = GeoDatabase::open(db_path)?;

        engine.spatial = SpatialStore::from_entities(db.load_entities()?)?;
        engine.routes = RouteStore::from_routes(db.load_routes()?);
        engine.imagery =
            ImageryCache::from_entries(engine.config.imagery.clone(), db.load_imagery()?);

        info!(
            "estategeo: [GeoEngine] loaded {} entities, {} routes, {} imagery entries from {}",
            engine.spatial.len(),
            engine.routes.len(),
            engine.imagery.len(),
            db_path
        );
        engine.db = Some(db);
        Ok(engine)
    }

    /// Replace the time source (tests use a fixed clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========================================================================
    // Entities (delegates to SpatialStore)
    // ========================================================================

    /// Insert or replace an entity. Invalid geometry is rejected before any write.
    pub fn upsert_entity(&mut self, entity: SpatialEntity) -> Result<()> {
        self.spatial.check(&entity)?;

        #[cfg(feature = "persistence")]
        if let Some(db) = &self.db {
            db.save_entity(&entity)?;
        }
        self.spatial.upsert(entity)
    }

    /// Remove an entity. Removing a building also removes the building's routes.
    pub fn remove_entity(&mut self, id: &str) -> Result<Option<SpatialEntity>> {
        if self
            .spatial
            .get(id)
            .is_some_and(|e| e.kind == EntityKind::Building)
        {
            self.delete_owner(&RouteOwner::Building(id.to_string()))?;
        }

        #[cfg(feature = "persistence")]
        if let Some(db) = &self.db {
            db.delete_entity(id)?;
        }
        Ok(self.spatial.remove(id))
    }

    pub fn entity(&self, id: &str) -> Option<&SpatialEntity> {
        self.spatial.get(id)
    }

    pub fn bounding_box_query(&self, sw: &GeoPoint, ne: &GeoPoint) -> Vec<&SpatialEntity> {
        self.spatial.bounding_box_query(sw, ne)
    }

    pub fn radius_query(
        &self,
        center: &GeoPoint,
        radius_meters: f64,
        limit: Option<usize>,
    ) -> Vec<(&SpatialEntity, f64)> {
        self.spatial.radius_query(center, radius_meters, limit)
    }

    pub fn nearest(
        &self,
        center: &GeoPoint,
        k: usize,
        kind: Option<EntityKind>,
    ) -> Vec<(&SpatialEntity, f64)> {
        self.spatial.nearest(center, k, kind)
    }

    pub fn polygon_containment_query(&self, point: &GeoPoint) -> Vec<&SpatialEntity> {
        self.spatial.polygon_containment_query(point)
    }

    // ========================================================================
    // Routes
    // ========================================================================

    /// Validate a route request against the stores. No external call is made.
    pub fn prepare_route(&self, request: &RouteRequest) -> Result<RoutePlan> {
        self.computer.plan(&self.spatial, &self.routes, request)
    }

    /// Store a fetched route. The owner cap is checked again, since other
    /// writes may have happened while the fetch ran.
    pub fn commit_route(&mut self, fetched: FetchedRoute) -> Result<Route> {
        let route = fetched.into_route(self.clock.now());
        let cap = self.computer.cap_for(&route.owner_slot.owner);
        self.routes.check_capacity(&route.owner_slot, cap)?;

        #[cfg(feature = "persistence")]
        if let Some(db) = &self.db {
            db.save_route(&route)?;
        }
        self.computer.store(&mut self.routes, route)
    }

    /// Compute and store a single route. See [`RouteComputer::compute`].
    pub fn compute_route(&mut self, request: &RouteRequest, cancel: &CancelToken) -> Result<Route> {
        let fetched = self.prepare_route(request)?.fetch(cancel)?;
        self.commit_route(fetched)
    }

    /// Validate a preview. No external call is made.
    pub fn prepare_preview(
        &self,
        origin: &Origin,
        destination: &Destination,
        destination_name: Option<&str>,
        mode: TravelMode,
    ) -> Result<PreviewPlan> {
        self.ranker.plan_preview(
            &self.computer,
            &self.spatial,
            origin,
            destination,
            destination_name,
            mode,
        )
    }

    /// Fetch alternatives without storing anything.
    pub fn preview_routes(
        &self,
        origin: &Origin,
        destination: &Destination,
        destination_name: Option<&str>,
        mode: TravelMode,
        cancel: &CancelToken,
    ) -> Result<CandidateSet> {
        self.prepare_preview(origin, destination, destination_name, mode)?
            .fetch(cancel)
    }

    /// Persist one candidate of a preview into an owner slot.
    pub fn select_route(
        &mut self,
        set: &CandidateSet,
        index: usize,
        owner_slot: OwnerSlot,
    ) -> Result<Route> {
        let now = self.clock.now();
        let route = self.ranker.candidate_route(set, index, owner_slot, now)?;
        let cap = self.computer.cap_for(&route.owner_slot.owner);
        self.routes.check_capacity(&route.owner_slot, cap)?;

        #[cfg(feature = "persistence")]
        if let Some(db) = &self.db {
            db.save_route(&route)?;
        }
        self.ranker
            .select(&self.computer, &mut self.routes, set, index, route.owner_slot, now)
    }

    pub fn route(&self, slot: &OwnerSlot) -> Option<&Route> {
        self.routes.get(slot)
    }

    /// Export shape for the UI/mapping layer.
    pub fn route_export(&self, slot: &OwnerSlot) -> Option<RouteExport> {
        self.routes.get(slot).map(Route::export)
    }

    pub fn routes_for(&self, owner: &RouteOwner) -> Vec<&Route> {
        self.routes.routes_for(owner)
    }

    /// Mark a stored route as not computed so it can be recomputed later.
    pub fn reset_route(&mut self, slot: &OwnerSlot) -> Result<bool> {
        let Some(route) = self.routes.get(slot) else {
            return Ok(false);
        };

        #[cfg(feature = "persistence")]
        if let Some(db) = &self.db {
            let mut cleared = route.clone();
            cleared.clear_path();
            db.save_route(&cleared)?;
        }
        #[cfg(not(feature = "persistence"))]
        let _ = route;
        Ok(self.routes.mark_not_computed(slot))
    }

    pub fn delete_route(&mut self, slot: &OwnerSlot) -> Result<Option<Route>> {
        #[cfg(feature = "persistence")]
        if let Some(db) = &self.db {
            db.delete_route(slot)?;
        }
        Ok(self.routes.remove(slot))
    }

    /// Delete every route of an owner. Returns the number removed.
    pub fn delete_owner(&mut self, owner: &RouteOwner) -> Result<usize> {
        #[cfg(feature = "persistence")]
        if let Some(db) = &self.db {
            db.delete_owner_routes(owner)?;
        }
        let removed = self.routes.remove_owner(owner);

        if !removed.is_empty() {
            info!(
                "estategeo: [GeoEngine] removed {} routes of {}",
                removed.len(),
                owner
            );
        }
        Ok(removed.len())
    }

    // ========================================================================
    // Imagery (delegates to ImageryCache)
    // ========================================================================

    /// Cache-only lookup with the configured tolerances.
    pub fn lookup_imagery(
        &self,
        location: &GeoPoint,
        heading: Option<f64>,
    ) -> Option<&ImageryCacheEntry> {
        self.imagery.lookup(location, heading, self.clock.now())
    }

    /// Serve a cache hit, or describe the provider call a miss needs.
    pub fn plan_imagery(&self, location: GeoPoint, heading: f64) -> Result<ImageryLookup> {
        let request = ImageryRequest {
            location,
            heading,
            pitch: self.config.imagery.default_pitch,
            fov: self.config.imagery.default_fov,
        };
        self.imagery.plan_fetch(
            &self.imagery_provider,
            &request,
            self.config.provider.timeout(),
            self.clock.now(),
        )
    }

    /// Store a fetched panorama.
    pub fn commit_imagery(&mut self, fetched: FetchedImagery) -> Result<ImageryCacheEntry> {
        let entry = self
            .imagery
            .entry_for(fetched.fetch, &fetched.request, self.clock.now())?;

        #[cfg(feature = "persistence")]
        if let Some(db) = &self.db {
            db.save_imagery(&entry)?;
        }
        self.imagery.restore(entry.clone());
        info!(
            "estategeo: [GeoEngine] cached {} (expires {})",
            entry.pano_id,
            entry.expires_at.to_rfc3339()
        );
        Ok(entry)
    }

    /// Street-level panorama for a location and heading, from cache when possible.
    pub fn fetch_imagery(
        &mut self,
        location: GeoPoint,
        heading: f64,
        cancel: &CancelToken,
    ) -> Result<ImageryCacheEntry> {
        match self.plan_imagery(location, heading)? {
            ImageryLookup::Hit(entry) => Ok(entry),
            ImageryLookup::Miss(plan) => {
                let fetched = plan.fetch(cancel)?;
                self.commit_imagery(fetched)
            }
        }
    }

    /// Physically delete expired imagery (memory and storage).
    pub fn purge_expired_imagery(&mut self) -> Result<usize> {
        let now = self.clock.now();

        #[cfg(feature = "persistence")]
        if let Some(db) = &self.db {
            db.purge_expired_imagery(now)?;
        }
        Ok(self.imagery.purge_expired(now))
    }
}
