//! Integration tests for RouteStore

use chrono::{TimeZone, Utc};
use estategeo::{
    engine::RouteStore, GeoError, GeoPoint, OwnerSlot, Route, RouteOwner, RoutePath, TravelMode,
};

fn route(slot: OwnerSlot, meters: f64) -> Route {
    Route {
        owner_slot: slot,
        origin: GeoPoint::new(35.6812, 139.7671),
        destination: Some(GeoPoint::new(35.6717, 139.765)),
        destination_name: "Ginza".to_string(),
        travel_mode: TravelMode::Walking,
        path: Some(RoutePath {
            encoded_path: "_p~iF~ps|U".to_string(),
            distance_meters: meters,
            duration_seconds: meters / 1.3,
        }),
        summary: Some("Chuo-dori".to_string()),
        raw_payload: Some("{}".to_string()),
        updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
    }
}

fn customer() -> RouteOwner {
    RouteOwner::Customer("42".to_string())
}

#[test]
fn test_cap_blocks_fifth_route() {
    let mut store = RouteStore::new();
    for slot in 0..4 {
        store
            .upsert(route(OwnerSlot::customer("42", slot), 1000.0 + slot as f64), Some(4))
            .unwrap();
    }
    let before: Vec<Route> = store.routes_for(&customer()).into_iter().cloned().collect();

    let err = store
        .upsert(route(OwnerSlot::customer("42", 4), 9999.0), Some(4))
        .unwrap_err();
    assert!(matches!(err, GeoError::OwnerCapExceeded { limit: 4, .. }));

    let after: Vec<Route> = store.routes_for(&customer()).into_iter().cloned().collect();
    assert_eq!(before, after);
}

#[test]
fn test_overwrite_at_cap_is_allowed() {
    let mut store = RouteStore::new();
    for slot in 0..4 {
        store.upsert(route(OwnerSlot::customer("42", slot), 1000.0), Some(4)).unwrap();
    }
    let previous = store
        .upsert(route(OwnerSlot::customer("42", 2), 2000.0), Some(4))
        .unwrap();
    assert_eq!(previous.unwrap().distance_meters(), Some(1000.0));
    assert_eq!(store.count_for(&customer()), 4);
}

#[test]
fn test_cap_is_per_owner() {
    let mut store = RouteStore::new();
    for slot in 0..4 {
        store.upsert(route(OwnerSlot::customer("42", slot), 1000.0), Some(4)).unwrap();
    }
    assert!(store.upsert(route(OwnerSlot::customer("7", 0), 1000.0), Some(4)).is_ok());
    assert!(store.upsert(route(OwnerSlot::building("b1"), 1000.0), None).is_ok());
}

#[test]
fn test_mark_not_computed_keeps_destination() {
    let mut store = RouteStore::new();
    let slot = OwnerSlot::building("b1");
    store.upsert(route(slot.clone(), 1000.0), None).unwrap();

    assert!(store.mark_not_computed(&slot));
    let r = store.get(&slot).unwrap();
    assert!(!r.computed());
    assert_eq!(r.distance_meters(), None);
    assert_eq!(r.destination_name, "Ginza");
    assert!(r.destination.is_some());
    assert!(!store.is_computed(&slot));

    assert!(!store.mark_not_computed(&OwnerSlot::building("missing")));
}

#[test]
fn test_remove_owner() {
    let mut store = RouteStore::new();
    store.upsert(route(OwnerSlot::customer("42", 0), 1.0), Some(4)).unwrap();
    store.upsert(route(OwnerSlot::customer("42", 1), 1.0), Some(4)).unwrap();
    store.upsert(route(OwnerSlot::customer("7", 0), 1.0), Some(4)).unwrap();

    let removed = store.remove_owner(&customer());
    assert_eq!(removed.len(), 2);
    assert_eq!(store.len(), 1);
    assert_eq!(store.count_for(&customer()), 0);
}

#[test]
fn test_next_free_slot() {
    let mut store = RouteStore::new();
    assert_eq!(store.next_free_slot(&customer()), 0);
    store.upsert(route(OwnerSlot::customer("42", 0), 1.0), None).unwrap();
    store.upsert(route(OwnerSlot::customer("42", 2), 1.0), None).unwrap();
    assert_eq!(store.next_free_slot(&customer()), 1);
}

#[test]
fn test_export_shape() {
    let r = route(OwnerSlot::building("b1"), 1200.0);
    let export = r.export();
    assert!(export.computed);
    assert_eq!(export.distance_meters, Some(1200.0));

    let json = serde_json::to_value(&export).unwrap();
    for key in [
        "origin",
        "destination",
        "destination_name",
        "travel_mode",
        "distance_meters",
        "duration_seconds",
        "encoded_path",
        "computed",
    ] {
        assert!(json.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(json["travel_mode"], "walking");
    assert_eq!(json["origin"]["lat"], 35.6812);
}

#[test]
fn test_owner_keys() {
    assert_eq!(customer().key(), "customer:42");
    assert_eq!(RouteOwner::parse_key("building:b1"), Some(RouteOwner::Building("b1".to_string())));
    assert_eq!(RouteOwner::parse_key("tenant:1"), None);
    assert_eq!(OwnerSlot::customer("42", 3).to_string(), "customer:42#3");
}
