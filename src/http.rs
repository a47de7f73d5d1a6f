//! Blocking HTTP providers for Google-style Maps web services.
//!
//! Each provider owns its [`ProviderConfig`]; nothing is read from
//! request-global state. Callers still wrap these in
//! [`call_bounded`](crate::provider::call_bounded) for cancellation; the
//! client timeout is the same budget and only stops a stuck socket.

use log::debug;
use reqwest::blocking::{Client, Response};

use crate::provider::{parse_directions, parse_geocode, parse_panorama};
use crate::{
    DirectionsRequest, DirectionsResponse, GeoError, GeoPoint, Geocoder, ImageryFetch,
    ImageryProvider, ImageryRequest, ProviderConfig, Result, RoutingProvider,
};

const DIRECTIONS_PATH: &str = "/maps/api/directions/json";
const GEOCODE_PATH: &str = "/maps/api/geocode/json";
const STREETVIEW_METADATA_PATH: &str = "/maps/api/streetview/metadata";
const STREETVIEW_IMAGE_PATH: &str = "/maps/api/streetview";

fn build_client(config: &ProviderConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| GeoError::Network(e.to_string()))
}

fn map_reqwest_error(e: reqwest::Error, timeout_ms: u64) -> GeoError {
    if e.is_timeout() {
        GeoError::Timeout(timeout_ms)
    } else {
        GeoError::Network(e.to_string())
    }
}

/// Read the body of a response, treating HTTP-level failures as the
/// provider being unavailable.
fn read_body(response: Response, timeout_ms: u64) -> Result<String> {
    let status = response.status();
    if !status.is_success() {
        return Err(GeoError::ProviderUnavailable(format!("HTTP {}", status.as_u16())));
    }
    response.text().map_err(|e| map_reqwest_error(e, timeout_ms))
}

fn format_point(p: &GeoPoint) -> String {
    format!("{:.6},{:.6}", p.lat(), p.lng())
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Directions over HTTP.
pub struct HttpDirections {
    client: Client,
    config: ProviderConfig,
}

impl HttpDirections {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }
}

impl RoutingProvider for HttpDirections {
    fn directions(&self, request: &DirectionsRequest) -> Result<DirectionsResponse> {
        let url = endpoint(&self.config.base_url, DIRECTIONS_PATH);
        debug!(
            "estategeo: [HttpDirections] {} -> {} ({})",
            format_point(&request.origin),
            format_point(&request.destination),
            request.mode.as_str()
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("origin", format_point(&request.origin)),
                ("destination", format_point(&request.destination)),
                ("mode", request.mode.as_str().to_string()),
                ("alternatives", request.alternatives.to_string()),
                ("key", self.config.api_key.clone()),
            ])
            .send()
            .map_err(|e| map_reqwest_error(e, self.config.timeout_ms))?;

        let raw = read_body(response, self.config.timeout_ms)?;
        parse_directions(&raw)
    }
}

/// Geocoding over HTTP.
pub struct HttpGeocoder {
    client: Client,
    config: ProviderConfig,
}

impl HttpGeocoder {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }
}

impl Geocoder for HttpGeocoder {
    fn geocode(&self, query: &str) -> Result<GeoPoint> {
        let url = endpoint(&self.config.base_url, GEOCODE_PATH);
        let response = self
            .client
            .get(&url)
            .query(&[("address", query), ("key", self.config.api_key.as_str())])
            .send()
            .map_err(|e| map_reqwest_error(e, self.config.timeout_ms))?;

        let raw = read_body(response, self.config.timeout_ms)?;
        parse_geocode(&raw, query)
    }
}

/// Street-level panorama metadata over HTTP.
///
/// Image references point at `public_base_url` when set (e.g. an image
/// proxy that holds the key), otherwise at the provider itself.
pub struct HttpImagery {
    client: Client,
    config: ProviderConfig,
}

impl HttpImagery {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }

    fn image_ref(&self, pano_id: &str, request: &ImageryRequest) -> String {
        let params = format!(
            "pano={}&heading={:.1}&pitch={:.1}&fov={:.1}",
            pano_id, request.heading, request.pitch, request.fov
        );
        match &self.config.public_base_url {
            Some(public) => format!("{}?{}", endpoint(public, STREETVIEW_IMAGE_PATH), params),
            None => format!(
                "{}?size=640x640&{}&key={}",
                endpoint(&self.config.base_url, STREETVIEW_IMAGE_PATH),
                params,
                self.config.api_key
            ),
        }
    }
}

impl ImageryProvider for HttpImagery {
    fn panorama(&self, request: &ImageryRequest) -> Result<ImageryFetch> {
        let url = endpoint(&self.config.base_url, STREETVIEW_METADATA_PATH);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("location", format_point(&request.location)),
                ("key", self.config.api_key.clone()),
            ])
            .send()
            .map_err(|e| map_reqwest_error(e, self.config.timeout_ms))?;

        let raw = read_body(response, self.config.timeout_ms)?;
        parse_panorama(&raw, |pano_id| self.image_ref(pano_id, request))
    }
}
