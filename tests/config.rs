//! Tests for engine configuration parsing and validation

mod common;

use common::{FakeGeocoder, FakeImagery, FakeRouting};
use estategeo::engine::Providers;
use estategeo::{EngineConfig, GeoEngine, GeoError, GeoPoint};

fn providers() -> Providers {
    Providers {
        routing: FakeRouting::new(Vec::new()),
        geocoder: FakeGeocoder::returning(GeoPoint::new(35.0, 139.0)),
        imagery: FakeImagery::new("pano-1"),
    }
}

fn assert_invalid(json: &str) {
    match EngineConfig::from_json(json) {
        Err(GeoError::InvalidArgument(_)) => {}
        other => panic!("expected InvalidArgument for {json}, got {other:?}"),
    }
}

#[test]
fn test_defaults_are_valid() {
    assert!(EngineConfig::default().validate().is_ok());
    let parsed = EngineConfig::from_json("{}").unwrap();
    assert_eq!(parsed, EngineConfig::default());
}

#[test]
fn test_partial_json_keeps_other_defaults() {
    let config =
        EngineConfig::from_json(r#"{"imagery": {"tolerance_meters": 25.0}}"#).unwrap();
    assert_eq!(config.imagery.tolerance_meters, 25.0);
    assert_eq!(config.imagery.heading_tolerance_deg, 30.0);
    assert_eq!(config.routing.max_candidates, 3);
}

#[test]
fn test_out_of_range_ttl_rejected() {
    assert_invalid(r#"{"imagery": {"ttl_seconds": 0}}"#);
    assert_invalid(r#"{"imagery": {"ttl_seconds": -60}}"#);
    assert_invalid(r#"{"imagery": {"ttl_seconds": 9223372036854775807}}"#);
}

#[test]
fn test_bad_tolerances_rejected() {
    assert_invalid(r#"{"imagery": {"tolerance_meters": -1.0}}"#);
    assert_invalid(r#"{"imagery": {"heading_tolerance_deg": 181.0}}"#);
}

#[test]
fn test_zero_limits_rejected() {
    assert_invalid(r#"{"routing": {"max_candidates": 0}}"#);
    assert_invalid(r#"{"routing": {"max_routes_per_owner": 0}}"#);
    assert_invalid(r#"{"provider": {"timeout_ms": 0}}"#);
}

#[test]
fn test_non_finite_values_rejected() {
    let mut config = EngineConfig::default();
    config.imagery.tolerance_meters = f64::NAN;
    assert!(matches!(config.validate(), Err(GeoError::InvalidArgument(_))));

    let mut config = EngineConfig::default();
    config.imagery.heading_tolerance_deg = f64::NAN;
    assert!(matches!(config.validate(), Err(GeoError::InvalidArgument(_))));
}

#[test]
fn test_engine_refuses_invalid_config() {
    let mut config = EngineConfig::default();
    config.imagery.ttl_seconds = i64::MAX;
    assert!(matches!(
        GeoEngine::new(config, providers()),
        Err(GeoError::InvalidArgument(_))
    ));
}

#[cfg(feature = "persistence")]
#[test]
fn test_open_refuses_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geo.sqlite");
    let mut config = EngineConfig::default();
    config.routing.max_candidates = 0;

    let result = GeoEngine::open(path.to_str().unwrap(), config, providers());
    assert!(matches!(result, Err(GeoError::InvalidArgument(_))));
    assert!(!path.exists());
}
