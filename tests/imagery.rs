//! Tests for cache-aside imagery fetching through the engine

mod common;

use std::time::Duration;

use common::{fast_config, harness, Behavior};
use estategeo::{CancelToken, EngineConfig, FailureKind, GeoError, GeoPoint, ImageryLookup};

#[test]
fn test_second_nearby_request_is_served_from_cache() {
    let mut h = harness(EngineConfig::default());
    let cancel = CancelToken::new();

    let first = h
        .engine
        .fetch_imagery(GeoPoint::new(35.00005, 139.00005), 350.0, &cancel)
        .unwrap();
    let second = h
        .engine
        .fetch_imagery(GeoPoint::new(35.0, 139.0), 10.0, &cancel)
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.imagery.call_count(), 1);
}

#[test]
fn test_heading_outside_tolerance_refetches() {
    let mut h = harness(EngineConfig::default());
    let cancel = CancelToken::new();
    h.engine
        .fetch_imagery(GeoPoint::new(35.00005, 139.00005), 350.0, &cancel)
        .unwrap();

    h.imagery.set_pano_id("pano-2");
    let other = h
        .engine
        .fetch_imagery(GeoPoint::new(35.0, 139.0), 50.0, &cancel)
        .unwrap();
    assert_eq!(other.pano_id, "pano-2");
    assert_eq!(h.imagery.call_count(), 2);
    assert_eq!(h.engine.imagery.len(), 2);
}

#[test]
fn test_expired_entry_is_refreshed_in_place() {
    let mut h = harness(EngineConfig::default());
    let cancel = CancelToken::new();
    let location = GeoPoint::new(35.0, 139.0);
    let first = h.engine.fetch_imagery(location, 0.0, &cancel).unwrap();

    h.clock.advance(chrono::Duration::days(31));
    assert!(h.engine.lookup_imagery(&location, Some(0.0)).is_none());

    let refreshed = h.engine.fetch_imagery(location, 0.0, &cancel).unwrap();
    assert_eq!(refreshed.pano_id, first.pano_id);
    assert!(refreshed.expires_at > first.expires_at);
    assert_eq!(h.engine.imagery.len(), 1);
    assert_eq!(h.imagery.call_count(), 2);
}

#[test]
fn test_no_imagery_is_permanent_and_not_cached() {
    let mut h = harness(EngineConfig::default());
    h.imagery.set_behavior(Behavior::Fail(|| GeoError::NoImagery));

    let err = h
        .engine
        .fetch_imagery(GeoPoint::new(35.0, 139.0), 0.0, &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Permanent);
    assert!(h.engine.imagery.is_empty());
}

#[test]
fn test_timeout_is_transient_and_not_cached() {
    let mut h = harness(fast_config());
    h.imagery.set_behavior(Behavior::Hang(Duration::from_millis(800)));

    let err = h
        .engine
        .fetch_imagery(GeoPoint::new(35.0, 139.0), 0.0, &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Transient);
    assert!(h.engine.imagery.is_empty());
}

#[test]
fn test_invalid_location_rejected() {
    let mut h = harness(EngineConfig::default());
    let err = h
        .engine
        .fetch_imagery(GeoPoint::new(35.0, 200.0), 0.0, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, GeoError::InvalidCoordinate { .. }));
    assert_eq!(h.imagery.call_count(), 0);
}

#[test]
fn test_purge_expired_imagery() {
    let mut h = harness(EngineConfig::default());
    h.engine
        .fetch_imagery(GeoPoint::new(35.0, 139.0), 0.0, &CancelToken::new())
        .unwrap();

    assert_eq!(h.engine.purge_expired_imagery().unwrap(), 0);
    h.clock.advance(chrono::Duration::days(30));
    assert_eq!(h.engine.purge_expired_imagery().unwrap(), 1);
    assert!(h.engine.imagery.is_empty());
}

#[test]
fn test_non_finite_heading_rejected_before_provider() {
    let mut h = harness(EngineConfig::default());
    for heading in [f64::NAN, f64::INFINITY] {
        let err = h
            .engine
            .fetch_imagery(GeoPoint::new(35.0, 139.0), heading, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, GeoError::InvalidHeading(_)));
        assert_eq!(err.kind(), FailureKind::Validation);
    }
    assert_eq!(h.imagery.call_count(), 0);
    assert!(h.engine.imagery.is_empty());
}

#[test]
fn test_nan_heading_lookup_is_a_miss() {
    let mut h = harness(EngineConfig::default());
    let location = GeoPoint::new(35.0, 139.0);
    h.engine
        .fetch_imagery(location, 0.0, &CancelToken::new())
        .unwrap();

    assert!(h.engine.lookup_imagery(&location, Some(f64::NAN)).is_none());
    assert!(h.engine.lookup_imagery(&location, None).is_some());
}

#[test]
fn test_imagery_fetch_runs_outside_the_engine() {
    let mut h = harness(EngineConfig::default());
    let location = GeoPoint::new(35.0, 139.0);

    let plan = match h.engine.plan_imagery(location, 45.0).unwrap() {
        ImageryLookup::Miss(plan) => plan,
        ImageryLookup::Hit(_) => panic!("empty cache cannot hit"),
    };
    let fetched = plan.fetch(&CancelToken::new()).unwrap();
    assert!(h.engine.imagery.is_empty());

    let entry = h.engine.commit_imagery(fetched).unwrap();
    assert_eq!(entry.heading, 45.0);
    assert!(matches!(
        h.engine.plan_imagery(location, 50.0).unwrap(),
        ImageryLookup::Hit(_)
    ));
    assert_eq!(h.imagery.call_count(), 1);
}
