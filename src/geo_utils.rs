//! Geographic utilities: great-circle distance, circular headings,
//! radius search envelopes and encoded-path conversion.

use geo::{Coord, LineString};

use crate::{Bounds, GeoPoint};

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Precision of encoded paths exchanged with the routing provider.
pub const PATH_PRECISION: u32 = 5;

/// Great-circle distance between two points in meters (haversine).
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();
    let dlat = lat2 - lat1;
    let dlng = (b.lng() - a.lng()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Normalize a heading into `[0, 360)`.
pub fn normalize_heading(heading: f64) -> f64 {
    let h = heading.rem_euclid(360.0);
    // rem_euclid can return 360.0 for tiny negative inputs
    if h >= 360.0 {
        0.0
    } else {
        h
    }
}

/// Smallest angle between two headings, in `[0, 180]`.
///
/// 350° and 10° differ by 20°, not 340°.
pub fn heading_difference(a: f64, b: f64) -> f64 {
    let d = (normalize_heading(a) - normalize_heading(b)).abs();
    d.min(360.0 - d)
}

/// Point reached by travelling `distance_m` from `origin` along `bearing_deg`
/// on the sphere.
pub fn offset_point(origin: &GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let delta = distance_m / EARTH_RADIUS_METERS;
    let theta = bearing_deg.to_radians();
    let lat1 = origin.lat().to_radians();
    let lng1 = origin.lng().to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lng2 = lng1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    GeoPoint::new(lat2.to_degrees(), normalize_longitude(lng2.to_degrees()))
}

/// Wrap a longitude into `[-180, 180]`.
pub fn normalize_longitude(lng: f64) -> f64 {
    if (-180.0..=180.0).contains(&lng) {
        lng
    } else {
        (lng + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Lat/lng rectangles that together cover every point within `radius_m` of
/// `center`.
///
/// The envelopes are conservative (slightly larger than the spherical cap),
/// so an exact distance check on the candidates yields exact results. A cap
/// that crosses the antimeridian is split into two rectangles; a cap that
/// reaches a pole covers the full longitude range.
pub fn search_envelopes(center: &GeoPoint, radius_m: f64) -> Vec<Bounds> {
    // Small margin against floating-point drift at the envelope edge
    let delta = (radius_m.max(0.0) / EARTH_RADIUS_METERS) * (1.0 + 1e-9) + 1e-12;
    let lat = center.lat().to_radians();

    let min_lat = lat - delta;
    let max_lat = lat + delta;
    let half_pi = std::f64::consts::FRAC_PI_2;

    if min_lat <= -half_pi || max_lat >= half_pi || delta >= std::f64::consts::PI {
        return vec![Bounds {
            min_lat: min_lat.max(-half_pi).to_degrees(),
            max_lat: max_lat.min(half_pi).to_degrees(),
            min_lng: -180.0,
            max_lng: 180.0,
        }];
    }

    let dlng = (delta.sin() / lat.cos()).min(1.0).asin();
    let min_lat = min_lat.to_degrees();
    let max_lat = max_lat.to_degrees();
    let min_lng = center.lng() - dlng.to_degrees();
    let max_lng = center.lng() + dlng.to_degrees();

    if max_lng - min_lng >= 360.0 {
        return vec![Bounds {
            min_lat,
            max_lat,
            min_lng: -180.0,
            max_lng: 180.0,
        }];
    }

    if min_lng < -180.0 {
        vec![
            Bounds {
                min_lat,
                max_lat,
                min_lng: min_lng + 360.0,
                max_lng: 180.0,
            },
            Bounds {
                min_lat,
                max_lat,
                min_lng: -180.0,
                max_lng,
            },
        ]
    } else if max_lng > 180.0 {
        vec![
            Bounds {
                min_lat,
                max_lat,
                min_lng,
                max_lng: 180.0,
            },
            Bounds {
                min_lat,
                max_lat,
                min_lng: -180.0,
                max_lng: max_lng - 360.0,
            },
        ]
    } else {
        vec![Bounds {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }]
    }
}

/// Split a possibly antimeridian-crossing rectangle into plain rectangles.
pub fn split_bounds(bounds: &Bounds) -> Vec<Bounds> {
    if bounds.crosses_antimeridian() {
        vec![
            Bounds {
                max_lng: 180.0,
                ..*bounds
            },
            Bounds {
                min_lng: -180.0,
                ..*bounds
            },
        ]
    } else {
        vec![*bounds]
    }
}

/// Encode a path as a Google polyline string.
pub fn encode_path(points: &[GeoPoint]) -> String {
    let line: LineString<f64> = points.iter().map(|p| p.coord()).collect();
    polyline::encode_coordinates(line, PATH_PRECISION).unwrap_or_default()
}

/// Decode a Google polyline string. Returns an empty path for malformed input.
pub fn decode_path(encoded: &str) -> Vec<GeoPoint> {
    if encoded.is_empty() {
        return Vec::new();
    }

    polyline::decode_polyline(encoded, PATH_PRECISION)
        .map(|line| line.coords().map(|c: &Coord<f64>| GeoPoint::from(*c)).collect())
        .unwrap_or_default()
}

/// Length of a path in meters.
pub fn path_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}
