//! Shared fixtures: scripted providers and sample geography.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use estategeo::engine::Providers;
use estategeo::geo_utils::{encode_path, offset_point};
use estategeo::{
    DirectionsRequest, DirectionsResponse, EngineConfig, EntityKind, FixedClock, GeoEngine,
    GeoError, GeoPoint, Geocoder, ImageryFetch, ImageryProvider, ImageryRequest, Result,
    RouteAlternative, RoutingProvider, SpatialEntity,
};

pub const TOKYO_STATION: (f64, f64) = (35.6812, 139.7671);

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
}

/// How a fake provider answers.
#[derive(Clone)]
pub enum Behavior {
    Succeed,
    /// Sleep longer than any test timeout before answering.
    Hang(Duration),
    Fail(fn() -> GeoError),
}

// ============================================================================
// Routing
// ============================================================================

pub struct FakeRouting {
    pub calls: AtomicUsize,
    behavior: Mutex<Behavior>,
    alternatives: Mutex<Vec<RouteAlternative>>,
}

impl FakeRouting {
    pub fn new(alternatives: Vec<RouteAlternative>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            behavior: Mutex::new(Behavior::Succeed),
            alternatives: Mutex::new(alternatives),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_alternatives(&self, alternatives: Vec<RouteAlternative>) {
        *self.alternatives.lock().unwrap() = alternatives;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RoutingProvider for FakeRouting {
    fn directions(&self, request: &DirectionsRequest) -> Result<DirectionsResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Succeed => {}
            Behavior::Hang(d) => thread::sleep(d),
            Behavior::Fail(make) => return Err(make()),
        }

        let mut alternatives = self.alternatives.lock().unwrap().clone();
        if !request.alternatives {
            alternatives.truncate(1);
        }
        let raw = format!(
            "{{\"status\":\"OK\",\"routes\":{}}}",
            serde_json::to_string(&alternatives).unwrap()
        );
        Ok(DirectionsResponse {
            status: "OK".to_string(),
            alternatives,
            raw,
        })
    }
}

/// A straight-line alternative heading east from `origin`.
pub fn alternative(summary: &str, origin: GeoPoint, meters: f64, seconds: f64) -> RouteAlternative {
    let end = offset_point(&origin, 90.0, meters);
    RouteAlternative {
        summary: summary.to_string(),
        distance_meters: meters,
        duration_seconds: seconds,
        encoded_path: encode_path(&[origin, end]),
    }
}

// ============================================================================
// Geocoder
// ============================================================================

pub struct FakeGeocoder {
    pub calls: AtomicUsize,
    result: Mutex<std::result::Result<GeoPoint, fn() -> GeoError>>,
}

impl FakeGeocoder {
    pub fn returning(point: GeoPoint) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            result: Mutex::new(Ok(point)),
        })
    }

    pub fn failing(make: fn() -> GeoError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            result: Mutex::new(Err(make)),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Geocoder for FakeGeocoder {
    fn geocode(&self, _query: &str) -> Result<GeoPoint> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.result.lock().unwrap() {
            Ok(p) => Ok(*p),
            Err(make) => Err(make()),
        }
    }
}

// ============================================================================
// Imagery
// ============================================================================

pub struct FakeImagery {
    pub calls: AtomicUsize,
    behavior: Mutex<Behavior>,
    pano_id: Mutex<String>,
}

impl FakeImagery {
    pub fn new(pano_id: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            behavior: Mutex::new(Behavior::Succeed),
            pano_id: Mutex::new(pano_id.to_string()),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_pano_id(&self, pano_id: &str) {
        *self.pano_id.lock().unwrap() = pano_id.to_string();
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageryProvider for FakeImagery {
    fn panorama(&self, request: &ImageryRequest) -> Result<ImageryFetch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Succeed => {}
            Behavior::Hang(d) => thread::sleep(d),
            Behavior::Fail(make) => return Err(make()),
        }
        let pano_id = self.pano_id.lock().unwrap().clone();
        Ok(ImageryFetch {
            image_ref: format!("https://img.test/{}?heading={}", pano_id, request.heading),
            pano_id,
            location: request.location,
            capture_date: Some("2025-11".to_string()),
        })
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct Harness {
    pub engine: GeoEngine,
    pub routing: Arc<FakeRouting>,
    pub geocoder: Arc<FakeGeocoder>,
    pub imagery: Arc<FakeImagery>,
    pub clock: Arc<FixedClock>,
}

/// Engine with one building at Tokyo Station and scripted providers.
pub fn harness(config: EngineConfig) -> Harness {
    let origin = GeoPoint::new(TOKYO_STATION.0, TOKYO_STATION.1);
    let routing = FakeRouting::new(vec![
        alternative("Chuo-dori", origin, 1200.0, 900.0),
        alternative("Eitai-dori", origin, 1350.0, 960.0),
        alternative("", origin, 1500.0, 1100.0),
    ]);
    let geocoder = FakeGeocoder::returning(GeoPoint::new(35.6717, 139.7650));
    let imagery = FakeImagery::new("pano-1");
    let clock = Arc::new(FixedClock::new(start_time()));

    let providers = Providers {
        routing: routing.clone(),
        geocoder: geocoder.clone(),
        imagery: imagery.clone(),
    };
    let mut engine = GeoEngine::new(config, providers)
        .unwrap()
        .with_clock(clock.clone());
    engine
        .upsert_entity(SpatialEntity::point(
            "b1",
            EntityKind::Building,
            "Marunouchi Residence",
            origin,
        ))
        .unwrap();

    Harness {
        engine,
        routing,
        geocoder,
        imagery,
        clock,
    }
}

/// Config with a short provider timeout so hang tests finish quickly.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.provider.timeout_ms = 150;
    config
}
