//! Geography storage with bounding-box, radius, nearest-neighbour and
//! polygon-containment queries.
//!
//! Coordinates are validated once, on `upsert`. Queries take `&self`,
//! never validate and never mutate.

use std::collections::{HashMap, HashSet};

use geo::coordinate_position::{CoordPos, CoordinatePosition};
use log::debug;

use crate::geo_utils::{haversine_distance, search_envelopes, split_bounds, EARTH_RADIUS_METERS};
use crate::{Bounds, EntityKind, GeoError, GeoPoint, Geometry, Result, SpatialEntity};

use super::spatial_index::{AnchorEntry, PolygonBounds, SpatialIndex};

/// Half the Earth's circumference; no two points are farther apart.
const MAX_SEARCH_RADIUS: f64 = std::f64::consts::PI * EARTH_RADIUS_METERS;

/// First radius tried by `nearest` before widening.
const NEAREST_START_RADIUS: f64 = 250.0;

/// Storage for spatial entities.
#[derive(Debug, Default)]
pub struct SpatialStore {
    entities: HashMap<String, SpatialEntity>,
    index: SpatialIndex,
}

impl SpatialStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            index: SpatialIndex::new(),
        }
    }

    /// Build a store from many entities in one pass (bulk-loaded index).
    pub fn from_entities(entities: Vec<SpatialEntity>) -> Result<Self> {
        // Later records replace earlier ones with the same id
        let mut by_id = HashMap::with_capacity(entities.len());
        for entity in entities {
            entity.geometry.validate()?;
            by_id.insert(entity.id.clone(), entity);
        }

        let mut anchors = Vec::with_capacity(by_id.len());
        let mut polygons = Vec::new();
        for entity in by_id.values() {
            let (anchor, polygon) = index_entries(entity)?;
            anchors.push(anchor);
            polygons.extend(polygon);
        }

        Ok(Self {
            entities: by_id,
            index: SpatialIndex::bulk_load(anchors, polygons),
        })
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert or replace an entity.
    ///
    /// This is the write boundary: coordinates out of range, non-finite
    /// values and degenerate polygons are rejected here.
    pub fn upsert(&mut self, entity: SpatialEntity) -> Result<()> {
        entity.geometry.validate()?;
        let (anchor, polygon) = index_entries(&entity)?;

        self.remove_from_index(&entity.id);
        self.index.insert_anchor(anchor);
        if let Some(p) = polygon {
            self.index.insert_polygon(p);
        }

        debug!(
            "estategeo: [SpatialStore] upserted {} ({})",
            entity.id,
            entity.kind.as_str()
        );
        self.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    /// Run the write-boundary checks of [`upsert`](Self::upsert) without storing.
    pub fn check(&self, entity: &SpatialEntity) -> Result<()> {
        entity.geometry.validate()?;
        index_entries(entity).map(|_| ())
    }

    /// Remove an entity by ID.
    ///
    /// Returns the removed entity if it existed.
    pub fn remove(&mut self, id: &str) -> Option<SpatialEntity> {
        self.remove_from_index(id);
        self.entities.remove(id)
    }

    /// Clear all entities.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.index.clear();
    }

    fn remove_from_index(&mut self, id: &str) {
        let Some(existing) = self.entities.get(id) else {
            return;
        };
        if let Ok((anchor, polygon)) = index_entries(existing) {
            self.index.remove_anchor(&anchor);
            if let Some(p) = polygon {
                self.index.remove_polygon(&p);
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get an entity by ID.
    pub fn get(&self, id: &str) -> Option<&SpatialEntity> {
        self.entities.get(id)
    }

    /// Check if an entity exists.
    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// Get the number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Get all entities.
    pub fn values(&self) -> impl Iterator<Item = &SpatialEntity> {
        self.entities.values()
    }

    /// Great-circle distance between two points in meters.
    pub fn distance(&self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        haversine_distance(a, b)
    }

    /// Entities whose anchor lies inside the rectangle spanned by `sw` and
    /// `ne` (edges inclusive).
    ///
    /// A south-west corner east of the north-east corner is read as a
    /// viewport crossing the antimeridian.
    pub fn bounding_box_query(&self, sw: &GeoPoint, ne: &GeoPoint) -> Vec<&SpatialEntity> {
        let bounds = Bounds::from_corners(sw, ne);
        if bounds.min_lat > bounds.max_lat {
            return Vec::new();
        }

        let mut ids: Vec<&str> = split_bounds(&bounds)
            .iter()
            .flat_map(|b| self.index.anchors_in(b))
            .map(|a| a.id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        ids.into_iter().filter_map(|id| self.entities.get(id)).collect()
    }

    /// Like [`bounding_box_query`](Self::bounding_box_query), restricted to one kind.
    pub fn bounding_box_query_of_kind(
        &self,
        sw: &GeoPoint,
        ne: &GeoPoint,
        kind: EntityKind,
    ) -> Vec<&SpatialEntity> {
        self.bounding_box_query(sw, ne)
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    /// Entities whose anchor is within `radius_meters` great-circle distance
    /// of `center`, nearest first, each paired with its distance.
    ///
    /// The R-tree only narrows candidates; membership is decided by the exact
    /// distance, so the result has no false positives or negatives.
    pub fn radius_query(
        &self,
        center: &GeoPoint,
        radius_meters: f64,
        limit: Option<usize>,
    ) -> Vec<(&SpatialEntity, f64)> {
        self.radius_query_filtered(center, radius_meters, limit, |_| true)
    }

    /// Like [`radius_query`](Self::radius_query), restricted to one kind.
    pub fn radius_query_of_kind(
        &self,
        center: &GeoPoint,
        radius_meters: f64,
        kind: EntityKind,
        limit: Option<usize>,
    ) -> Vec<(&SpatialEntity, f64)> {
        self.radius_query_filtered(center, radius_meters, limit, |e| e.kind == kind)
    }

    fn radius_query_filtered<F>(
        &self,
        center: &GeoPoint,
        radius_meters: f64,
        limit: Option<usize>,
        keep: F,
    ) -> Vec<(&SpatialEntity, f64)>
    where
        F: Fn(&SpatialEntity) -> bool,
    {
        if radius_meters.is_nan() || radius_meters < 0.0 {
            return Vec::new();
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut hits: Vec<(&SpatialEntity, f64)> = Vec::new();

        for envelope in search_envelopes(center, radius_meters) {
            for anchor in self.index.anchors_in(&envelope) {
                // Split envelopes can both return the same anchor
                if !seen.insert(anchor.id.as_str()) {
                    continue;
                }

                let Some(entity) = self.entities.get(&anchor.id) else {
                    continue;
                };
                if !keep(entity) {
                    continue;
                }
                let Some(location) = entity.anchor() else {
                    continue;
                };
                let d = haversine_distance(center, &location);
                if d <= radius_meters {
                    hits.push((entity, d));
                }
            }
        }

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        hits
    }

    /// The `k` entities nearest to `center` (optionally of one kind), nearest first.
    ///
    /// Searches with a growing radius; once `k` entities fall inside radius
    /// `r`, no entity outside it can be nearer, so the answer is exact.
    pub fn nearest(
        &self,
        center: &GeoPoint,
        k: usize,
        kind: Option<EntityKind>,
    ) -> Vec<(&SpatialEntity, f64)> {
        if k == 0 || self.entities.is_empty() {
            return Vec::new();
        }

        let keep = |e: &SpatialEntity| kind.map_or(true, |k| e.kind == k);
        let mut radius = NEAREST_START_RADIUS;
        loop {
            let hits = self.radius_query_filtered(center, radius, Some(k), &keep);
            if hits.len() >= k || radius >= MAX_SEARCH_RADIUS {
                return hits;
            }
            radius = (radius * 4.0).min(MAX_SEARCH_RADIUS);
        }
    }

    /// Nearest entities of `kind` for many points at once
    /// (e.g. the closest stations for every building on a page).
    #[cfg(feature = "parallel")]
    pub fn nearest_batch(
        &self,
        points: &[GeoPoint],
        k: usize,
        kind: Option<EntityKind>,
    ) -> Vec<Vec<(String, f64)>> {
        use rayon::prelude::*;

        points
            .par_iter()
            .map(|p| {
                self.nearest(p, k, kind)
                    .into_iter()
                    .map(|(e, d)| (e.id.clone(), d))
                    .collect()
            })
            .collect()
    }

    /// Nearest entities of `kind` for many points at once.
    #[cfg(not(feature = "parallel"))]
    pub fn nearest_batch(
        &self,
        points: &[GeoPoint],
        k: usize,
        kind: Option<EntityKind>,
    ) -> Vec<Vec<(String, f64)>> {
        points
            .iter()
            .map(|p| {
                self.nearest(p, k, kind)
                    .into_iter()
                    .map(|(e, d)| (e.id.clone(), d))
                    .collect()
            })
            .collect()
    }

    /// Polygon entities containing `point`. Points on an edge or vertex
    /// count as contained; points inside a hole do not.
    pub fn polygon_containment_query(&self, point: &GeoPoint) -> Vec<&SpatialEntity> {
        let coord = point.coord();
        let mut hits: Vec<&SpatialEntity> = self
            .index
            .polygons_covering(point.lat(), point.lng())
            .into_iter()
            .filter_map(|p| self.entities.get(&p.id))
            .filter(|entity| match &entity.geometry {
                Geometry::Polygon(poly) => {
                    matches!(
                        poly.coordinate_position(&coord),
                        CoordPos::Inside | CoordPos::OnBoundary
                    )
                }
                Geometry::Point(_) => false,
            })
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        hits
    }

    /// Like [`polygon_containment_query`](Self::polygon_containment_query), restricted to one kind.
    pub fn polygon_containment_query_of_kind(
        &self,
        point: &GeoPoint,
        kind: EntityKind,
    ) -> Vec<&SpatialEntity> {
        self.polygon_containment_query(point)
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    /// Anchor point of an entity, used as a route origin.
    pub fn anchor_of(&self, id: &str) -> Option<GeoPoint> {
        self.entities.get(id).and_then(|e| e.anchor())
    }
}

/// Index entries for an entity: its anchor, plus bounds when it is a polygon.
fn index_entries(entity: &SpatialEntity) -> Result<(AnchorEntry, Option<PolygonBounds>)> {
    let anchor = entity.anchor().ok_or_else(|| {
        GeoError::InvalidGeometry(format!("entity {} has no anchor point", entity.id))
    })?;
    let anchor = AnchorEntry {
        id: entity.id.clone(),
        lat: anchor.lat(),
        lng: anchor.lng(),
    };

    let polygon = match &entity.geometry {
        Geometry::Polygon(_) => entity.geometry.bounds().map(|b| PolygonBounds {
            id: entity.id.clone(),
            min_lat: b.min_lat,
            max_lat: b.max_lat,
            min_lng: b.min_lng,
            max_lng: b.max_lng,
        }),
        Geometry::Point(_) => None,
    };

    Ok((anchor, polygon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::offset_point;

    fn station(id: &str, p: GeoPoint) -> SpatialEntity {
        SpatialEntity::point(id, EntityKind::Station, id, p)
    }

    #[test]
    fn test_upsert_rejects_out_of_range() {
        let mut store = SpatialStore::new();
        let err = store
            .upsert(station("bad", GeoPoint::new(91.0, 0.0)))
            .unwrap_err();
        assert!(matches!(err, GeoError::InvalidCoordinate { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_upsert_replaces_index_entry() {
        let mut store = SpatialStore::new();
        store.upsert(station("s", GeoPoint::new(35.0, 139.0))).unwrap();
        store.upsert(station("s", GeoPoint::new(10.0, 10.0))).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store
            .radius_query(&GeoPoint::new(35.0, 139.0), 100.0, None)
            .is_empty());
        assert_eq!(
            store.radius_query(&GeoPoint::new(10.0, 10.0), 1.0, None).len(),
            1
        );
    }

    #[test]
    fn test_from_entities_keeps_last_duplicate() {
        let mut store = SpatialStore::from_entities(vec![
            station("x", GeoPoint::new(35.0, 139.0)),
            station("x", GeoPoint::new(10.0, 10.0)),
        ])
        .unwrap();

        assert_eq!(store.len(), 1);
        assert!(store
            .radius_query(&GeoPoint::new(35.0, 139.0), 10.0, None)
            .is_empty());
        let hits = store.radius_query(&GeoPoint::new(10.0, 10.0), 10.0, None);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].1 < 1e-6);

        store.remove("x");
        assert!(store
            .radius_query(&GeoPoint::new(35.0, 139.0), 1_000.0, None)
            .is_empty());
    }

    #[test]
    fn test_nearest_expands_radius() {
        let center = GeoPoint::new(35.681, 139.767);
        let mut store = SpatialStore::new();
        store.upsert(station("far", offset_point(&center, 90.0, 40_000.0))).unwrap();
        store.upsert(station("near", offset_point(&center, 10.0, 5_000.0))).unwrap();

        let hits = store.nearest(&center, 1, None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "near");

        let both = store.nearest(&center, 5, Some(EntityKind::Station));
        assert_eq!(both.len(), 2);
        assert_eq!(both[1].0.id, "far");
    }

    #[test]
    fn test_remove() {
        let mut store = SpatialStore::new();
        store.upsert(station("s", GeoPoint::new(35.0, 139.0))).unwrap();
        assert!(store.remove("s").is_some());
        assert!(store.remove("s").is_none());
        assert!(store
            .bounding_box_query(&GeoPoint::new(34.0, 138.0), &GeoPoint::new(36.0, 140.0))
            .is_empty());
    }
}
