//! Integration tests for ImageryCache

use chrono::{DateTime, Duration, TimeZone, Utc};
use estategeo::{
    engine::ImageryCache, GeoError, GeoPoint, ImageryCacheConfig, ImageryFetch, ImageryRequest,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()
}

fn fetch(pano_id: &str, lat: f64, lng: f64) -> ImageryFetch {
    ImageryFetch {
        pano_id: pano_id.to_string(),
        location: GeoPoint::new(lat, lng),
        capture_date: Some("2024-08".to_string()),
        image_ref: format!("https://img.test/{pano_id}"),
    }
}

fn request(lat: f64, lng: f64, heading: f64) -> ImageryRequest {
    ImageryRequest {
        location: GeoPoint::new(lat, lng),
        heading,
        pitch: 0.0,
        fov: 90.0,
    }
}

fn cache_with_entry() -> ImageryCache {
    let mut cache = ImageryCache::default();
    cache.upsert(
        fetch("pano-a", 35.00005, 139.00005),
        &request(35.00005, 139.00005, 350.0),
        now(),
    ).unwrap();
    cache
}

#[test]
fn test_hit_within_tolerance_across_north() {
    let cache = cache_with_entry();
    // ~7m away, heading 10 vs 350 differs by 20 degrees
    let hit = cache.lookup(&GeoPoint::new(35.0, 139.0), Some(10.0), now());
    assert_eq!(hit.map(|e| e.pano_id.as_str()), Some("pano-a"));
}

#[test]
fn test_miss_on_heading() {
    let cache = cache_with_entry();
    // 50 vs 350 differs by 60 degrees
    assert!(cache.lookup(&GeoPoint::new(35.0, 139.0), Some(50.0), now()).is_none());
    // 40 degrees off
    assert!(cache.lookup(&GeoPoint::new(35.0, 139.0), Some(30.0), now()).is_none());
}

#[test]
fn test_heading_tolerance_is_exclusive() {
    let cache = cache_with_entry();
    let at = GeoPoint::new(35.00005, 139.00005);
    // Exactly 30 degrees away misses; just under hits
    assert!(cache.lookup(&at, Some(20.0), now()).is_none());
    assert!(cache.lookup(&at, Some(19.5), now()).is_some());
    assert!(cache.lookup(&at, Some(320.5), now()).is_some());
}

#[test]
fn test_no_heading_matches_any_direction() {
    let cache = cache_with_entry();
    assert!(cache.lookup(&GeoPoint::new(35.0, 139.0), None, now()).is_some());
}

#[test]
fn test_miss_beyond_distance() {
    let cache = cache_with_entry();
    // ~0.0002 degrees of latitude is ~22m
    assert!(cache.lookup(&GeoPoint::new(35.0002, 139.00005), None, now()).is_none());
}

#[test]
fn test_configured_tolerances() {
    let mut cache = ImageryCache::new(ImageryCacheConfig {
        tolerance_meters: 50.0,
        heading_tolerance_deg: 90.0,
        ..ImageryCacheConfig::default()
    });
    cache
        .upsert(fetch("p", 35.0, 139.0), &request(35.0, 139.0, 0.0), now())
        .unwrap();

    assert!(cache.lookup(&GeoPoint::new(35.0002, 139.0), Some(80.0), now()).is_some());
    assert!(cache
        .lookup_with(&GeoPoint::new(35.0002, 139.0), Some(80.0), 10.0, 30.0, now())
        .is_none());
}

#[test]
fn test_upsert_same_pano_never_duplicates() {
    let mut cache = ImageryCache::default();
    let first = cache.upsert(fetch("p", 35.0, 139.0), &request(35.0, 139.0, 0.0), now()).unwrap();
    let later = now() + Duration::days(3);
    let second = cache.upsert(fetch("p", 35.0, 139.0), &request(35.0, 139.0, 90.0), later).unwrap();

    assert_eq!(cache.len(), 1);
    assert!(second.expires_at > first.expires_at);
    assert_eq!(second.expires_at, later + Duration::days(30));
    assert_eq!(cache.get_stored("p").unwrap().heading, 90.0);
}

#[test]
fn test_expiry_moves_forward_even_with_same_now() {
    let mut cache = ImageryCache::default();
    let first = cache.upsert(fetch("p", 35.0, 139.0), &request(35.0, 139.0, 0.0), now()).unwrap();
    let second = cache.upsert(fetch("p", 35.0, 139.0), &request(35.0, 139.0, 0.0), now()).unwrap();
    assert!(second.expires_at > first.expires_at);

    // A clock that went backwards still cannot shorten the entry
    let third = cache.upsert(
        fetch("p", 35.0, 139.0),
        &request(35.0, 139.0, 0.0),
        now() - Duration::days(1),
    ).unwrap();
    assert!(third.expires_at > second.expires_at);
}

#[test]
fn test_expired_entry_never_returned() {
    let cache = cache_with_entry();
    let expiry = cache.get_stored("pano-a").unwrap().expires_at;

    let at = GeoPoint::new(35.00005, 139.00005);
    assert!(cache.lookup(&at, None, expiry - Duration::milliseconds(1)).is_some());
    // Not yet swept, still invisible
    assert!(cache.lookup(&at, None, expiry).is_none());
    assert!(cache.lookup(&at, None, expiry + Duration::days(1)).is_none());
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_expired_entry_does_not_shadow_valid_one() {
    let mut cache = ImageryCache::default();
    cache.upsert(fetch("old", 35.0, 139.0), &request(35.0, 139.0, 0.0), now()).unwrap();
    let later = now() + Duration::days(25);
    cache.upsert(fetch("new", 35.0, 139.0), &request(35.00003, 139.0, 0.0), later).unwrap();

    let hit = cache.lookup(&GeoPoint::new(35.0, 139.0), None, now() + Duration::days(31));
    assert_eq!(hit.map(|e| e.pano_id.as_str()), Some("new"));
}

#[test]
fn test_purge_expired() {
    let mut cache = cache_with_entry();
    assert_eq!(cache.purge_expired(now()), 0);
    assert_eq!(cache.purge_expired(now() + Duration::days(30)), 1);
    assert!(cache.is_empty());
    assert!(cache.lookup(&GeoPoint::new(35.0, 139.0), None, now()).is_none());
}

#[test]
fn test_from_entries_restores_lookup() {
    let cache = cache_with_entry();
    let entries: Vec<_> = cache.values().cloned().collect();
    let restored = ImageryCache::from_entries(ImageryCacheConfig::default(), entries);
    assert!(restored.lookup(&GeoPoint::new(35.0, 139.0), Some(10.0), now()).is_some());
}

#[test]
fn test_entry_keeps_query_and_pano_locations() {
    let mut cache = ImageryCache::default();
    let entry = cache.upsert(
        fetch("p", 35.00002, 139.00002),
        &request(35.0, 139.0, 45.0),
        now(),
    ).unwrap();
    assert_eq!(entry.location, GeoPoint::new(35.0, 139.0));
    assert_eq!(entry.pano_location, GeoPoint::new(35.00002, 139.00002));
    assert_eq!(entry.capture_date.as_deref(), Some("2024-08"));
}

#[test]
fn test_nan_heading_never_hits() {
    let cache = cache_with_entry();
    let at = GeoPoint::new(35.00005, 139.00005);
    assert!(cache.lookup(&at, Some(f64::NAN), now()).is_none());
    assert!(cache.lookup(&at, Some(350.0), now()).is_some());
}

#[test]
fn test_non_finite_heading_is_not_stored() {
    let mut cache = cache_with_entry();
    let err = cache
        .upsert(
            fetch("pano-b", 35.0, 139.0),
            &request(35.0, 139.0, f64::NEG_INFINITY),
            now(),
        )
        .unwrap_err();
    assert!(matches!(err, GeoError::InvalidHeading(_)));
    assert_eq!(cache.len(), 1);
    assert!(cache.get_stored("pano-b").is_none());
}
