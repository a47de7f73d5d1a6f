//! External provider seams.
//!
//! - `RoutingProvider` - origin/destination/mode to ordered route alternatives
//! - `Geocoder` - free-text address to a coordinate
//! - `ImageryProvider` - location/heading to a stable panorama
//!
//! Every call goes through [`call_bounded`], which enforces a timeout and
//! lets the caller abandon the wait through a [`CancelToken`]. The remote
//! call itself is never interrupted; its late result is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{GeoError, GeoPoint, Result, TravelMode};

/// How often a waiting caller re-checks its cancel token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionsRequest {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub mode: TravelMode,
    /// Ask the provider for more than one alternative.
    pub alternatives: bool,
}

/// One alternative returned by the routing provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteAlternative {
    pub summary: String,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub encoded_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectionsResponse {
    /// Provider status string; only "OK" counts as success.
    pub status: String,
    /// Alternatives in provider order (best first).
    pub alternatives: Vec<RouteAlternative>,
    /// Unmodified response body, kept for audit.
    pub raw: String,
}

impl DirectionsResponse {
    /// Check the provider status and return the alternatives.
    ///
    /// "No route exists" statuses (and an OK with nothing in it) are
    /// permanent; every other non-OK status is reported as the provider
    /// being unavailable without looking at the specific code.
    pub fn into_alternatives(self) -> Result<(Vec<RouteAlternative>, String)> {
        check_status(&self.status, GeoError::NoRoute)?;
        if self.alternatives.is_empty() {
            return Err(GeoError::NoRoute);
        }
        Ok((self.alternatives, self.raw))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageryRequest {
    pub location: GeoPoint,
    pub heading: f64,
    pub pitch: f64,
    pub fov: f64,
}

/// Panorama metadata returned by the imagery provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageryFetch {
    /// Stable provider panorama identifier.
    pub pano_id: String,
    /// Where the panorama was actually captured.
    pub location: GeoPoint,
    pub capture_date: Option<String>,
    /// Reference the client uses to load the image.
    pub image_ref: String,
}

// ============================================================================
// Provider Traits
// ============================================================================

pub trait RoutingProvider: Send + Sync {
    fn directions(&self, request: &DirectionsRequest) -> Result<DirectionsResponse>;
}

pub trait Geocoder: Send + Sync {
    fn geocode(&self, query: &str) -> Result<GeoPoint>;
}

pub trait ImageryProvider: Send + Sync {
    fn panorama(&self, request: &ImageryRequest) -> Result<ImageryFetch>;
}

// ============================================================================
// Bounded Calls
// ============================================================================

/// Cooperative cancellation flag shared between a caller and whoever
/// drives it (e.g. a UI that navigated away).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run `call` on a worker thread and wait for it at most `timeout`.
///
/// Returns `Timeout` when the budget runs out and `Cancelled` as soon as the
/// token is set. Neither stops the worker; its result is discarded.
pub fn call_bounded<T, F>(timeout: Duration, cancel: &CancelToken, call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(GeoError::Cancelled);
    }

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("estategeo-provider".to_string())
        .spawn(move || {
            // Receiver may be gone after a timeout or cancel
            let _ = tx.send(call());
        })
        .map_err(|e| GeoError::Network(format!("failed to start provider call: {e}")))?;

    let started = Instant::now();
    let deadline = started + timeout;
    loop {
        if cancel.is_cancelled() {
            debug!("estategeo: [provider] wait cancelled after {:?}", started.elapsed());
            return Err(GeoError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            warn!("estategeo: [provider] call timed out after {:?}", timeout);
            return Err(GeoError::Timeout(timeout.as_millis() as u64));
        }

        match rx.recv_timeout((deadline - now).min(CANCEL_POLL_INTERVAL)) {
            Ok(result) => return result,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(GeoError::Network(
                    "provider call ended without a result".to_string(),
                ))
            }
        }
    }
}

/// Map a provider status string to success or a failure.
///
/// `ZERO_RESULTS` and `NOT_FOUND` mean nothing exists and yield `not_found`.
pub fn check_status(status: &str, not_found: GeoError) -> Result<()> {
    match status {
        "OK" => Ok(()),
        "ZERO_RESULTS" | "NOT_FOUND" => Err(not_found),
        other => Err(GeoError::ProviderUnavailable(other.to_string())),
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

#[derive(Deserialize)]
struct DirectionsBody {
    status: String,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Deserialize)]
struct DirectionsRoute {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    legs: Vec<DirectionsLeg>,
    overview_polyline: Option<EncodedPolyline>,
}

#[derive(Deserialize)]
struct DirectionsLeg {
    distance: Option<ValueField>,
    duration: Option<ValueField>,
}

#[derive(Deserialize)]
struct ValueField {
    value: f64,
}

#[derive(Deserialize)]
struct EncodedPolyline {
    points: String,
}

#[derive(Deserialize)]
struct LatLngBody {
    lat: f64,
    lng: f64,
}

/// Parse a directions response body.
///
/// Alternatives missing a path, distance or duration are dropped so that no
/// partially-filled route can come out of here.
pub fn parse_directions(raw: &str) -> Result<DirectionsResponse> {
    let body: DirectionsBody = serde_json::from_str(raw)
        .map_err(|e| GeoError::ProviderUnavailable(format!("INVALID_RESPONSE: {e}")))?;

    let alternatives = body
        .routes
        .into_iter()
        .filter_map(|route| {
            let encoded_path = route.overview_polyline?.points;
            if encoded_path.is_empty() || route.legs.is_empty() {
                return None;
            }
            let mut distance = 0.0;
            let mut duration = 0.0;
            for leg in &route.legs {
                distance += leg.distance.as_ref()?.value;
                duration += leg.duration.as_ref()?.value;
            }
            Some(RouteAlternative {
                summary: route.summary,
                distance_meters: distance,
                duration_seconds: duration,
                encoded_path,
            })
        })
        .collect();

    Ok(DirectionsResponse {
        status: body.status,
        alternatives,
        raw: raw.to_string(),
    })
}

#[derive(Deserialize)]
struct GeocodeBody {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: GeocodeGeometry,
}

#[derive(Deserialize)]
struct GeocodeGeometry {
    location: LatLngBody,
}

/// Parse a geocoding response body into the first result's coordinate.
pub fn parse_geocode(raw: &str, query: &str) -> Result<GeoPoint> {
    let body: GeocodeBody = serde_json::from_str(raw)
        .map_err(|e| GeoError::ProviderUnavailable(format!("INVALID_RESPONSE: {e}")))?;
    check_status(&body.status, GeoError::GeocodeNotFound(query.to_string()))?;

    let location = body
        .results
        .first()
        .map(|r| GeoPoint::new(r.geometry.location.lat, r.geometry.location.lng))
        .ok_or_else(|| GeoError::GeocodeNotFound(query.to_string()))?;

    // A coordinate outside the valid range is a broken response, not an address
    location
        .validated()
        .map_err(|_| GeoError::ProviderUnavailable("INVALID_RESPONSE".to_string()))
}

#[derive(Deserialize)]
struct PanoramaBody {
    status: String,
    pano_id: Option<String>,
    location: Option<LatLngBody>,
    date: Option<String>,
}

/// Parse an imagery metadata response body.
///
/// `image_ref` is built by the caller since it depends on where clients
/// load images from.
pub fn parse_panorama(raw: &str, image_ref: impl FnOnce(&str) -> String) -> Result<ImageryFetch> {
    let body: PanoramaBody = serde_json::from_str(raw)
        .map_err(|e| GeoError::ProviderUnavailable(format!("INVALID_RESPONSE: {e}")))?;
    check_status(&body.status, GeoError::NoImagery)?;

    let (pano_id, location) = match (body.pano_id, body.location) {
        (Some(id), Some(loc)) if !id.is_empty() => (id, GeoPoint::new(loc.lat, loc.lng)),
        _ => return Err(GeoError::NoImagery),
    };

    Ok(ImageryFetch {
        image_ref: image_ref(&pano_id),
        pano_id,
        location,
        capture_date: body.date,
    })
}
