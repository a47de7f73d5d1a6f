//! # Estate Geo
//!
//! Geospatial location, routing and imagery-caching core for real-estate
//! listings.
//!
//! This library provides:
//! - Point/polygon geography with bounding-box, radius, nearest-neighbour
//!   and boundary-inclusive polygon containment queries
//! - Route computation through an external directions provider, with one
//!   persisted route per owner slot
//! - Route candidate preview/select with a per-owner cap
//! - A fuzzy-key (distance + heading tolerance) cache for panorama lookups
//! - SQLite persistence for entities, routes and cached imagery
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel batch nearest-neighbour queries with rayon
//! - **`persistence`** - Enable SQLite persistence for the engine
//! - **`http`** - Enable blocking HTTP providers (directions, geocoding, street-level imagery)
//!
//! ## Quick Start
//!
//! ```rust
//! use estategeo::{EntityKind, GeoPoint, SpatialEntity, engine::SpatialStore};
//!
//! let mut store = SpatialStore::new();
//! store
//!     .upsert(SpatialEntity::point(
//!         "tokyo-st",
//!         EntityKind::Station,
//!         "Tokyo",
//!         GeoPoint::new(35.6812, 139.7671),
//!     ))
//!     .unwrap();
//!
//! let hits = store.radius_query(&GeoPoint::new(35.681, 139.767), 500.0, None);
//! assert_eq!(hits.len(), 1);
//! ```

use std::collections::BTreeMap;

use geo::{BoundingRect, Centroid, Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{FailureKind, GeoError, OptionExt, Result};

// Geographic utilities (distance, headings, envelopes, path encoding)
pub mod geo_utils;

// Time source for expiry decisions
pub mod clock;
pub use clock::{Clock, FixedClock, SystemClock};

// External provider seams, bounded calls and response parsing
pub mod provider;
pub use provider::{
    CancelToken, DirectionsRequest, DirectionsResponse, Geocoder, ImageryFetch, ImageryProvider,
    ImageryRequest, RouteAlternative, RoutingProvider,
};

// Single-route computation
pub mod routing;
pub use routing::{
    FetchedRoute, Origin, OwnerSlot, Route, RouteComputer, RouteExport, RouteOwner, RoutePath,
    RoutePlan, RouteRequest,
};

// Preview/select of route alternatives
pub mod ranker;
pub use ranker::{CandidateSet, PreviewPlan, RouteCandidate, RouteCandidateRanker};

// Stores, caches and the engine façade
pub mod engine;
pub use engine::{
    FetchedImagery, GeoEngine, ImageryCache, ImageryCacheEntry, ImageryFetchPlan, ImageryLookup,
    RouteStore, SpatialIndex, SpatialStore,
};

// SQLite persistence
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::GeoDatabase;

// Blocking HTTP providers
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{HttpDirections, HttpGeocoder, HttpImagery};

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate.
///
/// This is the one canonical coordinate value; latitude and longitude are
/// read through accessors and never stored anywhere else.
///
/// # Example
/// ```
/// use estategeo::GeoPoint;
/// let point = GeoPoint::new(35.6812, 139.7671); // Tokyo Station
/// assert_eq!(point.lat(), 35.6812);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "LatLng", into = "LatLng")]
pub struct GeoPoint(geo::Point<f64>);

/// Wire shape of a [`GeoPoint`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl From<LatLng> for GeoPoint {
    fn from(value: LatLng) -> Self {
        GeoPoint::new(value.lat, value.lng)
    }
}

impl From<GeoPoint> for LatLng {
    fn from(value: GeoPoint) -> Self {
        LatLng {
            lat: value.lat(),
            lng: value.lng(),
        }
    }
}

impl GeoPoint {
    /// Create a point from latitude and longitude in decimal degrees.
    ///
    /// No validation happens here; writes go through [`GeoPoint::validated`].
    pub fn new(lat: f64, lng: f64) -> Self {
        Self(geo::Point::new(lng, lat))
    }

    /// Latitude in decimal degrees.
    pub fn lat(&self) -> f64 {
        self.0.y()
    }

    /// Longitude in decimal degrees.
    pub fn lng(&self) -> f64 {
        self.0.x()
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        let (lat, lng) = (self.lat(), self.lng());
        lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng)
    }

    /// Return the point if its coordinates are in range, otherwise a validation error.
    pub fn validated(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(GeoError::InvalidCoordinate {
                lat: self.lat(),
                lng: self.lng(),
            })
        }
    }

    /// The point as a `geo` coordinate (x = lng, y = lat).
    pub fn coord(&self) -> Coord<f64> {
        self.0.into()
    }

    /// The underlying `geo` point.
    pub fn as_geo(&self) -> geo::Point<f64> {
        self.0
    }
}

impl From<Coord<f64>> for GeoPoint {
    fn from(c: Coord<f64>) -> Self {
        GeoPoint::new(c.y, c.x)
    }
}

/// Axis-aligned lat/lng rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from the south-west and north-east corners.
    pub fn from_corners(sw: &GeoPoint, ne: &GeoPoint) -> Self {
        Self {
            min_lat: sw.lat(),
            max_lat: ne.lat(),
            min_lng: sw.lng(),
            max_lng: ne.lng(),
        }
    }

    /// Create bounds from points.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.lat());
            max_lat = max_lat.max(p.lat());
            min_lng = min_lng.min(p.lng());
            max_lng = max_lng.max(p.lng());
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Whether the box wraps across the antimeridian (west edge east of the east edge).
    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lng > self.max_lng
    }

    /// Inclusive containment test, aware of antimeridian wrapping.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let lat_ok = point.lat() >= self.min_lat && point.lat() <= self.max_lat;
        let lng_ok = if self.crosses_antimeridian() {
            point.lng() >= self.min_lng || point.lng() <= self.max_lng
        } else {
            point.lng() >= self.min_lng && point.lng() <= self.max_lng
        };
        lat_ok && lng_ok
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// What a spatial entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Building,
    Station,
    SchoolDistrict,
    AddressPoint,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Building => "building",
            EntityKind::Station => "station",
            EntityKind::SchoolDistrict => "school_district",
            EntityKind::AddressPoint => "address_point",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "building" => Some(EntityKind::Building),
            "station" => Some(EntityKind::Station),
            "school_district" => Some(EntityKind::SchoolDistrict),
            "address_point" => Some(EntityKind::AddressPoint),
            _ => None,
        }
    }
}

/// Geometry as it arrives from outside: GeoJSON-style nested coordinate
/// arrays in `[lng, lat]` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum RawGeometry {
    Point([f64; 2]),
    Polygon(Vec<Vec<[f64; 2]>>),
}

/// Internal geometry representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(GeoPoint),
    Polygon(Polygon<f64>),
}

impl Geometry {
    /// Convert raw input geometry into the internal representation.
    ///
    /// This is the only conversion path; every coordinate is validated and
    /// every polygon ring is closed and checked for at least three distinct
    /// vertices.
    pub fn from_raw(raw: &RawGeometry) -> Result<Self> {
        match raw {
            RawGeometry::Point([lng, lat]) => {
                Ok(Geometry::Point(GeoPoint::new(*lat, *lng).validated()?))
            }
            RawGeometry::Polygon(rings) => {
                let mut rings = rings.iter();
                let exterior = rings
                    .next()
                    .ok_or_invalid_geometry("polygon has no exterior ring")?;
                let exterior = ring_from_raw(exterior)?;
                let interiors = rings.map(|r| ring_from_raw(r)).collect::<Result<Vec<_>>>()?;
                Ok(Geometry::Polygon(Polygon::new(exterior, interiors)))
            }
        }
    }

    /// Convert back to the raw wire shape.
    pub fn to_raw(&self) -> RawGeometry {
        match self {
            Geometry::Point(p) => RawGeometry::Point([p.lng(), p.lat()]),
            Geometry::Polygon(poly) => {
                let ring = |ls: &LineString<f64>| -> Vec<[f64; 2]> {
                    ls.coords().map(|c| [c.x, c.y]).collect()
                };
                let mut rings = vec![ring(poly.exterior())];
                rings.extend(poly.interiors().iter().map(ring));
                RawGeometry::Polygon(rings)
            }
        }
    }

    /// Validate an already-built geometry (used when geometry is constructed in code).
    pub fn validate(&self) -> Result<()> {
        match self {
            Geometry::Point(p) => p.validated().map(|_| ()),
            Geometry::Polygon(_) => Geometry::from_raw(&self.to_raw()).map(|_| ()),
        }
    }

    /// Representative point: the point itself, or the polygon centroid.
    pub fn anchor(&self) -> Option<GeoPoint> {
        match self {
            Geometry::Point(p) => Some(*p),
            Geometry::Polygon(poly) => poly.centroid().map(GeoPoint),
        }
    }

    /// Bounding box of the geometry.
    pub fn bounds(&self) -> Option<Bounds> {
        match self {
            Geometry::Point(p) => Bounds::from_points(&[*p]),
            Geometry::Polygon(poly) => poly.bounding_rect().map(|r| Bounds {
                min_lat: r.min().y,
                max_lat: r.max().y,
                min_lng: r.min().x,
                max_lng: r.max().x,
            }),
        }
    }
}

fn ring_from_raw(ring: &[[f64; 2]]) -> Result<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.len() + 1);
    for [lng, lat] in ring {
        let p = GeoPoint::new(*lat, *lng).validated()?;
        coords.push(p.coord());
    }

    let mut distinct: Vec<Coord<f64>> = Vec::new();
    for c in &coords {
        if !distinct.contains(c) {
            distinct.push(*c);
        }
    }
    if distinct.len() < 3 {
        return Err(GeoError::InvalidGeometry(format!(
            "polygon ring needs at least 3 distinct vertices, got {}",
            distinct.len()
        )));
    }

    // LineString::close is a no-op when already closed
    let mut line = LineString::new(coords);
    line.close();
    Ok(line)
}

/// A building, station, school-district boundary or address point.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialEntity {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    pub geometry: Geometry,
    pub attributes: BTreeMap<String, String>,
}

impl SpatialEntity {
    /// Create a point entity without attributes.
    pub fn point(id: &str, kind: EntityKind, name: &str, location: GeoPoint) -> Self {
        Self {
            id: id.to_string(),
            kind,
            name: name.to_string(),
            geometry: Geometry::Point(location),
            attributes: BTreeMap::new(),
        }
    }

    /// Create a polygon entity from raw geometry, validating it.
    pub fn polygon(
        id: &str,
        kind: EntityKind,
        name: &str,
        rings: Vec<Vec<[f64; 2]>>,
    ) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            kind,
            name: name.to_string(),
            geometry: Geometry::from_raw(&RawGeometry::Polygon(rings))?,
            attributes: BTreeMap::new(),
        })
    }

    /// Attach a descriptive attribute.
    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    /// Representative point used by bounding-box, radius and nearest queries.
    pub fn anchor(&self) -> Option<GeoPoint> {
        self.geometry.anchor()
    }

    pub fn is_polygon(&self) -> bool {
        matches!(self.geometry, Geometry::Polygon(_))
    }

    /// Plain geometry + attribute record for the consuming layer.
    pub fn to_record(&self) -> EntityRecord {
        EntityRecord {
            id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            geometry: self.geometry.to_raw(),
            attributes: self.attributes.clone(),
        }
    }

    /// Build an entity from a plain record (ingestion boundary).
    pub fn from_record(record: &EntityRecord) -> Result<Self> {
        Ok(Self {
            id: record.id.clone(),
            kind: record.kind,
            name: record.name.clone(),
            geometry: Geometry::from_raw(&record.geometry)?,
            attributes: record.attributes.clone(),
        })
    }
}

/// Serializable form of a [`SpatialEntity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    pub geometry: RawGeometry,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Mode of transport a route is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Walking,
    Transit,
    Driving,
    Bicycling,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Walking => "walking",
            TravelMode::Transit => "transit",
            TravelMode::Driving => "driving",
            TravelMode::Bicycling => "bicycling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "walking" => Some(TravelMode::Walking),
            "transit" => Some(TravelMode::Transit),
            "driving" => Some(TravelMode::Driving),
            "bicycling" => Some(TravelMode::Bicycling),
            _ => None,
        }
    }
}

/// Where a route goes: a known point or a free-text place to geocode first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Point(GeoPoint),
    Place(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Tolerances and lifetime for the imagery cache.
///
/// None of these are correctness constants; they trade provider calls
/// against imagery accuracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageryCacheConfig {
    /// Maximum great-circle distance for a cache hit.
    /// Default: 10.0 meters
    pub tolerance_meters: f64,

    /// Maximum circular heading difference for a cache hit (exclusive).
    /// Default: 30.0 degrees
    pub heading_tolerance_deg: f64,

    /// Lifetime of an entry after its last create/refresh.
    /// Default: 30 days
    pub ttl_seconds: i64,

    /// Pitch sent to the provider on a miss. Default: 0.0
    pub default_pitch: f64,

    /// Field of view sent to the provider on a miss. Default: 90.0
    pub default_fov: f64,
}

impl Default for ImageryCacheConfig {
    fn default() -> Self {
        Self {
            tolerance_meters: 10.0,
            heading_tolerance_deg: 30.0,
            ttl_seconds: 30 * 24 * 60 * 60,
            default_pitch: 0.0,
            default_fov: 90.0,
        }
    }
}

/// Limits for route computation and candidate preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Routes a customer owner may hold. Default: 4
    pub max_routes_per_owner: usize,

    /// Alternatives returned by a preview. Default: 3
    pub max_candidates: usize,

    /// Geocoder results kept in memory. Default: 256
    pub geocode_cache_size: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_routes_per_owner: 4,
            max_candidates: 3,
            geocode_cache_size: 256,
        }
    }
}

/// Endpoint and budget for external provider calls.
///
/// Base URLs are passed explicitly to every component that needs one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider API root. Default: "https://maps.googleapis.com"
    pub base_url: String,

    /// API key appended to provider requests.
    pub api_key: String,

    /// Upper bound for a single external call. Default: 10000 ms
    pub timeout_ms: u64,

    /// Public root used to build image references handed to clients.
    /// When unset, references point at the provider directly.
    pub public_base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://maps.googleapis.com".to_string(),
            api_key: String::new(),
            timeout_ms: 10_000,
            public_base_url: None,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub imagery: ImageryCacheConfig,
    pub routing: RoutingConfig,
    pub provider: ProviderConfig,
}

/// Longest accepted imagery TTL (100 years).
pub const MAX_TTL_SECONDS: i64 = 100 * 365 * 24 * 60 * 60;

impl EngineConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the stores cannot work with.
    pub fn validate(&self) -> Result<()> {
        let imagery = &self.imagery;
        if !imagery.tolerance_meters.is_finite() || imagery.tolerance_meters < 0.0 {
            return Err(invalid_config("imagery.tolerance_meters", imagery.tolerance_meters));
        }
        if !(0.0..=180.0).contains(&imagery.heading_tolerance_deg) {
            return Err(invalid_config(
                "imagery.heading_tolerance_deg",
                imagery.heading_tolerance_deg,
            ));
        }
        if imagery.ttl_seconds <= 0
            || imagery.ttl_seconds > MAX_TTL_SECONDS
            || chrono::Duration::try_seconds(imagery.ttl_seconds).is_none()
        {
            return Err(invalid_config("imagery.ttl_seconds", imagery.ttl_seconds));
        }
        if !imagery.default_pitch.is_finite() {
            return Err(invalid_config("imagery.default_pitch", imagery.default_pitch));
        }
        if !imagery.default_fov.is_finite() || imagery.default_fov <= 0.0 {
            return Err(invalid_config("imagery.default_fov", imagery.default_fov));
        }
        if self.routing.max_routes_per_owner == 0 {
            return Err(invalid_config("routing.max_routes_per_owner", 0));
        }
        if self.routing.max_candidates == 0 {
            return Err(invalid_config("routing.max_candidates", 0));
        }
        if self.provider.timeout_ms == 0 {
            return Err(invalid_config("provider.timeout_ms", 0));
        }
        Ok(())
    }
}

fn invalid_config(field: &str, value: impl std::fmt::Display) -> GeoError {
    GeoError::InvalidArgument(format!("{field} = {value}"))
}
