//! Preview several route alternatives, then persist the one a user picks.
//!
//! A preview is a pure read of the provider: nothing is stored. The
//! returned [`CandidateSet`] is held by the caller and handed back to
//! [`RouteCandidateRanker::select`], which writes exactly the chosen
//! candidate into an owner slot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::engine::{RouteStore, SpatialStore};
use crate::provider::RouteAlternative;
use crate::routing::{default_destination_name, validate_destination};
use crate::{
    CancelToken, Destination, GeoError, GeoPoint, Origin, OwnerSlot, Result, Route, RouteComputer,
    RoutePath, TravelMode,
};

/// One alternative offered to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub summary: String,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub encoded_path: String,
}

impl RouteCandidate {
    fn from_alternative(index: usize, alt: RouteAlternative) -> Self {
        let summary = if alt.summary.trim().is_empty() {
            format!("Route {}", index + 1)
        } else {
            alt.summary
        };
        Self {
            summary,
            distance_meters: alt.distance_meters,
            duration_seconds: alt.duration_seconds,
            encoded_path: alt.encoded_path,
        }
    }

    fn path(&self) -> RoutePath {
        RoutePath {
            encoded_path: self.encoded_path.clone(),
            distance_meters: self.distance_meters,
            duration_seconds: self.duration_seconds,
        }
    }
}

/// Result of a preview. Never stored by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    /// Monotonic per-ranker identifier, for the caller's bookkeeping.
    pub preview_id: u64,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub destination_name: String,
    pub mode: TravelMode,
    /// Provider order, at most `max_candidates`.
    pub candidates: Vec<RouteCandidate>,
    pub raw_payload: String,
}

impl CandidateSet {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Preview/select workflow on top of a [`RouteComputer`].
#[derive(Debug)]
pub struct RouteCandidateRanker {
    next_preview_id: AtomicU64,
}

impl Default for RouteCandidateRanker {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteCandidateRanker {
    pub fn new() -> Self {
        Self {
            next_preview_id: AtomicU64::new(1),
        }
    }

    /// Validate a preview and capture what its fetch needs.
    #[allow(clippy::too_many_arguments)]
    pub fn plan_preview(
        &self,
        computer: &RouteComputer,
        spatial: &SpatialStore,
        origin: &Origin,
        destination: &Destination,
        destination_name: Option<&str>,
        mode: TravelMode,
    ) -> Result<PreviewPlan> {
        validate_destination(destination)?;
        let origin = computer.resolve_origin(spatial, origin)?;
        Ok(PreviewPlan {
            computer: computer.clone(),
            preview_id: self.next_preview_id.fetch_add(1, Ordering::Relaxed),
            origin,
            destination: destination.clone(),
            destination_name: destination_name
                .map(str::to_string)
                .unwrap_or_else(|| default_destination_name(destination)),
            mode,
        })
    }

    /// Fetch up to `max_candidates` alternatives without persisting anything.
    #[allow(clippy::too_many_arguments)]
    pub fn preview(
        &self,
        computer: &RouteComputer,
        spatial: &SpatialStore,
        origin: &Origin,
        destination: &Destination,
        destination_name: Option<&str>,
        mode: TravelMode,
        cancel: &CancelToken,
    ) -> Result<CandidateSet> {
        self.plan_preview(computer, spatial, origin, destination, destination_name, mode)?
            .fetch(cancel)
    }

    /// Build the route for candidate `index` of `set` without storing it.
    pub fn candidate_route(
        &self,
        set: &CandidateSet,
        index: usize,
        owner_slot: OwnerSlot,
        now: DateTime<Utc>,
    ) -> Result<Route> {
        let candidate = set
            .candidates
            .get(index)
            .ok_or(GeoError::InvalidCandidateIndex {
                index,
                count: set.candidates.len(),
            })?;

        Ok(Route {
            owner_slot,
            origin: set.origin,
            destination: Some(set.destination),
            destination_name: set.destination_name.clone(),
            travel_mode: set.mode,
            path: Some(candidate.path()),
            summary: Some(candidate.summary.clone()),
            raw_payload: Some(set.raw_payload.clone()),
            updated_at: now,
        })
    }

    /// Persist candidate `index` of `set` into `owner_slot`.
    ///
    /// Fails without touching any stored route when the index is out of
    /// range or the owner already holds its maximum number of routes.
    pub fn select(
        &self,
        computer: &RouteComputer,
        routes: &mut RouteStore,
        set: &CandidateSet,
        index: usize,
        owner_slot: OwnerSlot,
        now: DateTime<Utc>,
    ) -> Result<Route> {
        let route = self.candidate_route(set, index, owner_slot, now)?;
        let route = computer.store(routes, route)?;

        info!(
            "estategeo: [RouteCandidateRanker] {} selected candidate {} of preview {}",
            route.owner_slot, index, set.preview_id
        );
        Ok(route)
    }
}

/// A validated preview that owns everything its fetch needs.
pub struct PreviewPlan {
    computer: RouteComputer,
    preview_id: u64,
    origin: GeoPoint,
    destination: Destination,
    destination_name: String,
    mode: TravelMode,
}

impl fmt::Debug for PreviewPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewPlan")
            .field("preview_id", &self.preview_id)
            .field("origin", &self.origin)
            .field("destination", &self.destination)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl PreviewPlan {
    pub fn preview_id(&self) -> u64 {
        self.preview_id
    }

    pub fn fetch(self, cancel: &CancelToken) -> Result<CandidateSet> {
        let computer = &self.computer;
        let dest_point = computer.resolve_destination(&self.destination, cancel)?;
        let (alternatives, raw) =
            computer.fetch_alternatives(self.origin, dest_point, self.mode, true, cancel)?;

        let max = computer.config().max_candidates;
        let candidates: Vec<RouteCandidate> = alternatives
            .into_iter()
            .take(max)
            .enumerate()
            .map(|(i, alt)| RouteCandidate::from_alternative(i, alt))
            .collect();

        debug!(
            "estategeo: [RouteCandidateRanker] preview {} returned {} candidates",
            self.preview_id,
            candidates.len()
        );

        Ok(CandidateSet {
            preview_id: self.preview_id,
            origin: self.origin,
            destination: dest_point,
            destination_name: self.destination_name,
            mode: self.mode,
            candidates,
            raw_payload: raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_summary_is_numbered() {
        let alt = RouteAlternative {
            summary: "  ".to_string(),
            distance_meters: 1.0,
            duration_seconds: 1.0,
            encoded_path: String::new(),
        };
        assert_eq!(RouteCandidate::from_alternative(1, alt).summary, "Route 2");
    }

    #[test]
    fn test_provider_summary_kept() {
        let alt = RouteAlternative {
            summary: "Yamanote Line".to_string(),
            distance_meters: 1.0,
            duration_seconds: 1.0,
            encoded_path: String::new(),
        };
        assert_eq!(
            RouteCandidate::from_alternative(0, alt).summary,
            "Yamanote Line"
        );
    }
}
