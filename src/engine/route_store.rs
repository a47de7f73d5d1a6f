//! Route storage keyed by owner slot.
//!
//! Manages the stored routes, including:
//! - Upsert by owner slot (overwrite, no history)
//! - Per-owner caps, checked before creating a new slot
//! - Cascade removal when an owner is deleted

use std::collections::BTreeMap;

use crate::{GeoError, OwnerSlot, Result, Route, RouteOwner};

/// Storage for computed and not-yet-computed routes.
#[derive(Debug, Default)]
pub struct RouteStore {
    routes: BTreeMap<OwnerSlot, Route>,
}

impl RouteStore {
    /// Create a new empty route store.
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Build a store from previously persisted routes.
    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|r| (r.owner_slot.clone(), r))
                .collect(),
        }
    }

    /// Fail if writing `slot` would create a route beyond the owner's cap.
    ///
    /// Overwriting an existing slot never counts as a create.
    pub fn check_capacity(&self, slot: &OwnerSlot, cap: Option<usize>) -> Result<()> {
        let Some(limit) = cap else {
            return Ok(());
        };
        if self.routes.contains_key(slot) {
            return Ok(());
        }
        if self.count_for(&slot.owner) >= limit {
            return Err(GeoError::OwnerCapExceeded {
                owner: slot.owner.key(),
                limit,
            });
        }
        Ok(())
    }

    /// Insert or overwrite the route in its owner slot.
    ///
    /// Returns the previous route for that slot, if any.
    pub fn upsert(&mut self, route: Route, cap: Option<usize>) -> Result<Option<Route>> {
        self.check_capacity(&route.owner_slot, cap)?;
        Ok(self.routes.insert(route.owner_slot.clone(), route))
    }

    /// Clear the computed part of a route, keeping origin and destination.
    ///
    /// Returns false if the slot holds no route.
    pub fn mark_not_computed(&mut self, slot: &OwnerSlot) -> bool {
        match self.routes.get_mut(slot) {
            Some(route) => {
                route.clear_path();
                true
            }
            None => false,
        }
    }

    /// Remove one route.
    pub fn remove(&mut self, slot: &OwnerSlot) -> Option<Route> {
        self.routes.remove(slot)
    }

    /// Remove every route of an owner.
    ///
    /// Returns the slots that were actually removed.
    pub fn remove_owner(&mut self, owner: &RouteOwner) -> Vec<OwnerSlot> {
        let slots: Vec<OwnerSlot> = self
            .routes
            .keys()
            .filter(|s| &s.owner == owner)
            .cloned()
            .collect();
        for slot in &slots {
            self.routes.remove(slot);
        }
        slots
    }

    /// Clear all routes.
    pub fn clear(&mut self) {
        self.routes.clear();
    }

    /// Get a route by slot.
    pub fn get(&self, slot: &OwnerSlot) -> Option<&Route> {
        self.routes.get(slot)
    }

    /// Whether the slot holds a computed route.
    pub fn is_computed(&self, slot: &OwnerSlot) -> bool {
        self.routes.get(slot).is_some_and(Route::computed)
    }

    /// Routes of one owner, ordered by slot.
    pub fn routes_for(&self, owner: &RouteOwner) -> Vec<&Route> {
        self.routes
            .iter()
            .filter(|(s, _)| &s.owner == owner)
            .map(|(_, r)| r)
            .collect()
    }

    /// Number of routes an owner holds.
    pub fn count_for(&self, owner: &RouteOwner) -> usize {
        self.routes.keys().filter(|s| &s.owner == owner).count()
    }

    /// Lowest slot number the owner is not using yet.
    pub fn next_free_slot(&self, owner: &RouteOwner) -> u32 {
        let mut slot = 0;
        while self.routes.contains_key(&OwnerSlot::new(owner.clone(), slot)) {
            slot += 1;
        }
        slot
    }

    /// Get all routes.
    pub fn values(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    /// Get the number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
