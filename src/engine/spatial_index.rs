//! Spatial indexing for viewport, radius and containment queries.
//!
//! Two R-trees: one over entity anchor points, one over polygon bounding
//! boxes. Both are kept current on every write, so reads never rebuild.

use rstar::{AABB, RTree, RTreeObject};

use crate::Bounds;

/// Entity anchor point wrapper for R-tree indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorEntry {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
}

impl RTreeObject for AnchorEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

/// Polygon bounds wrapper for R-tree indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonBounds {
    pub id: String,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl RTreeObject for PolygonBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }
}

/// Spatial index for entity anchors and polygon extents.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    anchors: RTree<AnchorEntry>,
    polygons: RTree<PolygonBounds>,
}

impl SpatialIndex {
    /// Create a new empty spatial index.
    pub fn new() -> Self {
        Self {
            anchors: RTree::new(),
            polygons: RTree::new(),
        }
    }

    /// Bulk-build the index.
    pub fn bulk_load(anchors: Vec<AnchorEntry>, polygons: Vec<PolygonBounds>) -> Self {
        Self {
            anchors: RTree::bulk_load(anchors),
            polygons: RTree::bulk_load(polygons),
        }
    }

    pub fn insert_anchor(&mut self, entry: AnchorEntry) {
        self.anchors.insert(entry);
    }

    pub fn remove_anchor(&mut self, entry: &AnchorEntry) -> bool {
        self.anchors.remove(entry).is_some()
    }

    pub fn insert_polygon(&mut self, entry: PolygonBounds) {
        self.polygons.insert(entry);
    }

    pub fn remove_polygon(&mut self, entry: &PolygonBounds) -> bool {
        self.polygons.remove(entry).is_some()
    }

    /// Clear the index.
    pub fn clear(&mut self) {
        self.anchors = RTree::new();
        self.polygons = RTree::new();
    }

    /// Anchors inside a plain (non-wrapping) rectangle, edges inclusive.
    pub fn anchors_in(&self, bounds: &Bounds) -> Vec<&AnchorEntry> {
        let search = AABB::from_corners(
            [bounds.min_lng, bounds.min_lat],
            [bounds.max_lng, bounds.max_lat],
        );
        self.anchors.locate_in_envelope_intersecting(&search).collect()
    }

    /// Polygons whose bounding box covers the point.
    pub fn polygons_covering(&self, lat: f64, lng: f64) -> Vec<&PolygonBounds> {
        let search = AABB::from_point([lng, lat]);
        self.polygons.locate_in_envelope_intersecting(&search).collect()
    }

    /// Get the number of indexed anchors.
    pub fn len(&self) -> usize {
        self.anchors.size()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.anchors.size() == 0
    }

    /// Get the number of indexed polygons.
    pub fn polygon_count(&self) -> usize {
        self.polygons.size()
    }
}
