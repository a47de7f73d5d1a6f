//! # SQLite persistence
//!
//! Durable storage for the three stores the engine keeps in memory:
//!
//! - `entities` - geometry as GeoJSON-style text, attributes as JSON
//! - `routes` - one row per owner slot; the computed columns are either all
//!   set or all NULL (enforced by a CHECK constraint)
//! - `imagery_cache` - one row per panorama ID, indexed by expiry so the
//!   external sweep can delete cheaply
//!
//! All writes are upserts (`INSERT ... ON CONFLICT DO UPDATE`), so the last
//! writer wins per key.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    EntityKind, EntityRecord, GeoPoint, ImageryCacheEntry, OwnerSlot, RawGeometry, Result, Route,
    RouteOwner, RoutePath, SpatialEntity, TravelMode,
};

/// SQLite-backed storage for entities, routes and cached imagery.
pub struct GeoDatabase {
    db: Connection,
    db_path: String,
}

impl GeoDatabase {
    /// Open (or create) a database file.
    pub fn open(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        debug!("estategeo: [GeoDatabase] opened {}", db_path);
        Ok(Self {
            db,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                geometry_json TEXT NOT NULL,
                attributes_json TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS routes (
                owner_key TEXT NOT NULL,
                slot INTEGER NOT NULL,
                origin_lat REAL NOT NULL,
                origin_lng REAL NOT NULL,
                dest_lat REAL,
                dest_lng REAL,
                destination_name TEXT NOT NULL,
                travel_mode TEXT NOT NULL,
                encoded_path TEXT,
                distance_meters REAL,
                duration_seconds REAL,
                summary TEXT,
                raw_payload TEXT,
                updated_at INTEGER NOT NULL,  -- Unix ms
                PRIMARY KEY (owner_key, slot),
                CHECK ((encoded_path IS NULL) = (distance_meters IS NULL)
                   AND (encoded_path IS NULL) = (duration_seconds IS NULL))
            );

            CREATE TABLE IF NOT EXISTS imagery_cache (
                pano_id TEXT PRIMARY KEY,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                heading REAL NOT NULL,
                pitch REAL NOT NULL,
                fov REAL NOT NULL,
                pano_lat REAL NOT NULL,
                pano_lng REAL NOT NULL,
                capture_date TEXT,
                image_ref TEXT NOT NULL,
                expires_at INTEGER NOT NULL   -- Unix ms
            );

            CREATE INDEX IF NOT EXISTS idx_imagery_expires ON imagery_cache(expires_at);
            "#,
        )
    }

    // ========================================================================
    // Entities
    // ========================================================================

    pub fn save_entity(&self, entity: &SpatialEntity) -> Result<()> {
        let record = entity.to_record();
        let geometry_json = serde_json::to_string(&record.geometry)?;
        let attributes_json = serde_json::to_string(&record.attributes)?;
        self.db.execute(
            "INSERT INTO entities (id, kind, name, geometry_json, attributes_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                geometry_json = excluded.geometry_json,
                attributes_json = excluded.attributes_json",
            params![
                record.id,
                record.kind.as_str(),
                record.name,
                geometry_json,
                attributes_json
            ],
        )?;
        Ok(())
    }

    pub fn delete_entity(&self, id: &str) -> Result<bool> {
        let n = self
            .db
            .execute("DELETE FROM entities WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Load every entity. Rows that no longer validate are skipped with a warning.
    pub fn load_entities(&self) -> Result<Vec<SpatialEntity>> {
        let mut stmt = self
            .db
            .prepare("SELECT id, kind, name, geometry_json, attributes_json FROM entities")?;
        let rows: Vec<(String, String, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut entities = Vec::with_capacity(rows.len());
        for (id, kind, name, geometry_json, attributes_json) in rows {
            let Some(kind) = EntityKind::parse(&kind) else {
                warn!("estategeo: [GeoDatabase] entity {} has unknown kind '{}'", id, kind);
                continue;
            };
            let geometry: RawGeometry = serde_json::from_str(&geometry_json)?;
            let attributes = serde_json::from_str(&attributes_json)?;
            let record = EntityRecord {
                id,
                kind,
                name,
                geometry,
                attributes,
            };
            match SpatialEntity::from_record(&record) {
                Ok(entity) => entities.push(entity),
                Err(e) => warn!("estategeo: [GeoDatabase] skipping entity {}: {}", record.id, e),
            }
        }
        Ok(entities)
    }

    // ========================================================================
    // Routes
    // ========================================================================

    pub fn save_route(&self, route: &Route) -> Result<()> {
        let path = route.path.as_ref();
        self.db.execute(
            "INSERT INTO routes (owner_key, slot, origin_lat, origin_lng, dest_lat, dest_lng,
                                 destination_name, travel_mode, encoded_path, distance_meters,
                                 duration_seconds, summary, raw_payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(owner_key, slot) DO UPDATE SET
                origin_lat = excluded.origin_lat,
                origin_lng = excluded.origin_lng,
                dest_lat = excluded.dest_lat,
                dest_lng = excluded.dest_lng,
                destination_name = excluded.destination_name,
                travel_mode = excluded.travel_mode,
                encoded_path = excluded.encoded_path,
                distance_meters = excluded.distance_meters,
                duration_seconds = excluded.duration_seconds,
                summary = excluded.summary,
                raw_payload = excluded.raw_payload,
                updated_at = excluded.updated_at",
            params![
                route.owner_slot.owner.key(),
                route.owner_slot.slot,
                route.origin.lat(),
                route.origin.lng(),
                route.destination.map(|d| d.lat()),
                route.destination.map(|d| d.lng()),
                route.destination_name,
                route.travel_mode.as_str(),
                path.map(|p| p.encoded_path.as_str()),
                path.map(|p| p.distance_meters),
                path.map(|p| p.duration_seconds),
                route.summary,
                route.raw_payload,
                route.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_route(&self, slot: &OwnerSlot) -> Result<bool> {
        let n = self.db.execute(
            "DELETE FROM routes WHERE owner_key = ?1 AND slot = ?2",
            params![slot.owner.key(), slot.slot],
        )?;
        Ok(n > 0)
    }

    /// Delete all routes of one owner. Returns the number of rows removed.
    pub fn delete_owner_routes(&self, owner: &RouteOwner) -> Result<usize> {
        let n = self
            .db
            .execute("DELETE FROM routes WHERE owner_key = ?1", params![owner.key()])?;
        Ok(n)
    }

    pub fn load_routes(&self) -> Result<Vec<Route>> {
        let mut stmt = self.db.prepare(
            "SELECT owner_key, slot, origin_lat, origin_lng, dest_lat, dest_lng,
                    destination_name, travel_mode, encoded_path, distance_meters,
                    duration_seconds, summary, raw_payload, updated_at
             FROM routes ORDER BY owner_key, slot",
        )?;
        let rows: Vec<RouteRow> = stmt
            .query_map([], |row| {
                Ok(RouteRow {
                    owner_key: row.get(0)?,
                    slot: row.get(1)?,
                    origin: (row.get(2)?, row.get(3)?),
                    dest_lat: row.get(4)?,
                    dest_lng: row.get(5)?,
                    destination_name: row.get(6)?,
                    travel_mode: row.get(7)?,
                    encoded_path: row.get(8)?,
                    distance_meters: row.get(9)?,
                    duration_seconds: row.get(10)?,
                    summary: row.get(11)?,
                    raw_payload: row.get(12)?,
                    updated_at: row.get(13)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(rows.into_iter().filter_map(RouteRow::into_route).collect())
    }

    // ========================================================================
    // Imagery cache
    // ========================================================================

    pub fn save_imagery(&self, entry: &ImageryCacheEntry) -> Result<()> {
        self.db.execute(
            "INSERT INTO imagery_cache (pano_id, lat, lng, heading, pitch, fov, pano_lat, pano_lng,
                                        capture_date, image_ref, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(pano_id) DO UPDATE SET
                lat = excluded.lat,
                lng = excluded.lng,
                heading = excluded.heading,
                pitch = excluded.pitch,
                fov = excluded.fov,
                pano_lat = excluded.pano_lat,
                pano_lng = excluded.pano_lng,
                capture_date = excluded.capture_date,
                image_ref = excluded.image_ref,
                expires_at = excluded.expires_at",
            params![
                entry.pano_id,
                entry.location.lat(),
                entry.location.lng(),
                entry.heading,
                entry.pitch,
                entry.fov,
                entry.pano_location.lat(),
                entry.pano_location.lng(),
                entry.capture_date,
                entry.image_ref,
                entry.expires_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn load_imagery(&self) -> Result<Vec<ImageryCacheEntry>> {
        let mut stmt = self.db.prepare(
            "SELECT pano_id, lat, lng, heading, pitch, fov, pano_lat, pano_lng,
                    capture_date, image_ref, expires_at
             FROM imagery_cache",
        )?;
        let rows: Vec<Option<ImageryCacheEntry>> = stmt
            .query_map([], |row| {
                let expires_ms: i64 = row.get(10)?;
                let Some(expires_at) = DateTime::from_timestamp_millis(expires_ms) else {
                    return Ok(None);
                };
                Ok(Some(ImageryCacheEntry {
                    pano_id: row.get(0)?,
                    location: GeoPoint::new(row.get(1)?, row.get(2)?),
                    heading: row.get(3)?,
                    pitch: row.get(4)?,
                    fov: row.get(5)?,
                    pano_location: GeoPoint::new(row.get(6)?, row.get(7)?),
                    capture_date: row.get(8)?,
                    image_ref: row.get(9)?,
                    expires_at,
                }))
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(rows.into_iter().flatten().collect())
    }

    /// Delete cached imagery that expired at or before `now`.
    pub fn purge_expired_imagery(&self, now: DateTime<Utc>) -> Result<usize> {
        let n = self.db.execute(
            "DELETE FROM imagery_cache WHERE expires_at <= ?1",
            params![now.timestamp_millis()],
        )?;
        if n > 0 {
            debug!("estategeo: [GeoDatabase] purged {} imagery rows", n);
        }
        Ok(n)
    }

    /// Whether a row for this panorama exists (valid or not).
    pub fn has_imagery(&self, pano_id: &str) -> Result<bool> {
        let found = self
            .db
            .query_row(
                "SELECT 1 FROM imagery_cache WHERE pano_id = ?1",
                params![pano_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Clear all data.
    pub fn clear(&self) -> Result<()> {
        self.db.execute_batch(
            "DELETE FROM routes;
             DELETE FROM imagery_cache;
             DELETE FROM entities;",
        )?;
        Ok(())
    }
}

/// Raw `routes` row before conversion.
struct RouteRow {
    owner_key: String,
    slot: u32,
    origin: (f64, f64),
    dest_lat: Option<f64>,
    dest_lng: Option<f64>,
    destination_name: String,
    travel_mode: String,
    encoded_path: Option<String>,
    distance_meters: Option<f64>,
    duration_seconds: Option<f64>,
    summary: Option<String>,
    raw_payload: Option<String>,
    updated_at: i64,
}

impl RouteRow {
    fn into_route(self) -> Option<Route> {
        let Some(owner) = RouteOwner::parse_key(&self.owner_key) else {
            warn!("estategeo: [GeoDatabase] bad owner key '{}'", self.owner_key);
            return None;
        };
        let travel_mode = TravelMode::parse(&self.travel_mode)?;
        let path = match (self.encoded_path, self.distance_meters, self.duration_seconds) {
            (Some(encoded_path), Some(distance_meters), Some(duration_seconds)) => {
                Some(RoutePath {
                    encoded_path,
                    distance_meters,
                    duration_seconds,
                })
            }
            _ => None,
        };
        let destination = match (self.dest_lat, self.dest_lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        };
        Some(Route {
            owner_slot: OwnerSlot::new(owner, self.slot),
            origin: GeoPoint::new(self.origin.0, self.origin.1),
            destination,
            destination_name: self.destination_name,
            travel_mode,
            path,
            summary: self.summary,
            raw_payload: self.raw_payload,
            updated_at: DateTime::from_timestamp_millis(self.updated_at)?,
        })
    }
}
