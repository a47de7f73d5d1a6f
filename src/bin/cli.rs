//! estategeo CLI - inspect and maintain a geo database
//!
//! Usage:
//!   estategeo-cli --db geo.sqlite import <entities.json>
//!   estategeo-cli --db geo.sqlite nearby <lat> <lng> [--radius <m>] [--kind station]
//!   estategeo-cli --db geo.sqlite purge-imagery
//!
//! Route and imagery commands talk to the configured provider and need the
//! `http` feature; everything else works offline.

use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use estategeo::engine::Providers;
use estategeo::{
    geo_utils, CancelToken, Destination, EngineConfig, EntityKind, EntityRecord, GeoEngine,
    GeoError, GeoPoint, OptionExt, OwnerSlot, Result, RouteOwner, RouteRequest, SpatialEntity,
    TravelMode,
};
#[cfg(not(feature = "http"))]
use estategeo::{
    DirectionsRequest, DirectionsResponse, Geocoder, ImageryFetch, ImageryProvider,
    ImageryRequest, RoutingProvider,
};

#[derive(Parser)]
#[command(name = "estategeo-cli")]
#[command(about = "Inspect and maintain an estategeo database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file
    #[arg(long, global = true, default_value = "estategeo.sqlite")]
    db: PathBuf,

    /// Engine configuration (JSON); defaults apply to missing fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Great-circle distance between two points
    Distance {
        lat1: f64,
        lng1: f64,
        lat2: f64,
        lng2: f64,
    },

    /// Import entities from a JSON array of records
    Import { file: PathBuf },

    /// Print one stored entity as a JSON record
    Show { id: String },

    /// Entities within a radius of a point, nearest first
    Nearby {
        lat: f64,
        lng: f64,

        /// Radius in meters
        #[arg(short, long, default_value = "1000")]
        radius: f64,

        /// Filter by kind (building, station, school_district, address_point)
        #[arg(short, long)]
        kind: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Entities whose anchor is inside a viewport
    Viewport {
        sw_lat: f64,
        sw_lng: f64,
        ne_lat: f64,
        ne_lng: f64,
    },

    /// Polygons (e.g. school districts) containing a point
    Contains { lat: f64, lng: f64 },

    /// Show the stored routes of an owner (e.g. "building:b1", "customer:42")
    Routes { owner: String },

    /// Compute the route of a building to a destination
    Route {
        building: String,

        /// Free-text destination to geocode
        destination: String,

        #[arg(short, long, default_value = "walking")]
        mode: String,
    },

    /// Street-level panorama for a location and heading
    Imagery { lat: f64, lng: f64, heading: f64 },

    /// Delete expired imagery cache entries
    PurgeImagery,
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error ({}): {}", e.kind().as_str(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Distance {
        lat1,
        lng1,
        lat2,
        lng2,
    } = cli.command
    {
        let a = GeoPoint::new(lat1, lng1).validated()?;
        let b = GeoPoint::new(lat2, lng2).validated()?;
        println!("{:.1} m", geo_utils::haversine_distance(&a, &b));
        return Ok(());
    }

    let config = load_config(cli.config.as_ref())?;
    let providers = providers(&config)?;
    let db_path = cli.db.to_string_lossy().to_string();
    let mut engine = GeoEngine::open(&db_path, config, providers)?;

    match cli.command {
        Commands::Distance { .. } => {}
        Commands::Import { file } => {
            let json = read_file(&file)?;
            let records: Vec<EntityRecord> = serde_json::from_str(&json)?;
            let mut imported = 0;
            for record in &records {
                match SpatialEntity::from_record(record).and_then(|e| engine.upsert_entity(e)) {
                    Ok(()) => imported += 1,
                    Err(e) => eprintln!("  [ERR] {}: {}", record.id, e),
                }
            }
            println!("Imported {} of {} entities", imported, records.len());
        }
        Commands::Show { id } => {
            let entity = engine.entity(&id).ok_or_unknown_entity(&id)?;
            println!("{}", serde_json::to_string_pretty(&entity.to_record())?);
        }
        Commands::Nearby {
            lat,
            lng,
            radius,
            kind,
            limit,
        } => {
            let center = GeoPoint::new(lat, lng).validated()?;
            let hits = match kind.as_deref() {
                Some(k) => {
                    let kind = parse_kind(k)?;
                    engine.spatial.radius_query_of_kind(&center, radius, kind, limit)
                }
                None => engine.radius_query(&center, radius, limit),
            };
            for (entity, d) in hits {
                println!(
                    "{:>9.1} m  {:<16} {} ({})",
                    d,
                    entity.kind.as_str(),
                    entity.name,
                    entity.id
                );
            }
        }
        Commands::Viewport {
            sw_lat,
            sw_lng,
            ne_lat,
            ne_lng,
        } => {
            let sw = GeoPoint::new(sw_lat, sw_lng).validated()?;
            let ne = GeoPoint::new(ne_lat, ne_lng).validated()?;
            for entity in engine.bounding_box_query(&sw, &ne) {
                println!("{:<16} {} ({})", entity.kind.as_str(), entity.name, entity.id);
            }
        }
        Commands::Contains { lat, lng } => {
            let point = GeoPoint::new(lat, lng).validated()?;
            for entity in engine.polygon_containment_query(&point) {
                println!("{:<16} {} ({})", entity.kind.as_str(), entity.name, entity.id);
            }
        }
        Commands::Routes { owner } => {
            let owner = RouteOwner::parse_key(&owner).ok_or_else(|| {
                GeoError::InvalidArgument(format!("unrecognized owner key '{owner}'"))
            })?;
            let exports: Vec<_> = engine
                .routes_for(&owner)
                .into_iter()
                .map(|r| r.export())
                .collect();
            println!("{}", serde_json::to_string_pretty(&exports)?);
        }
        Commands::Route {
            building,
            destination,
            mode,
        } => {
            let mode = TravelMode::parse(&mode)
                .ok_or_else(|| GeoError::InvalidArgument(format!("unknown travel mode '{mode}'")))?;
            let request =
                RouteRequest::for_building(&building, Destination::Place(destination), mode);
            engine.compute_route(&request, &CancelToken::new())?;
            if let Some(export) = engine.route_export(&OwnerSlot::building(&building)) {
                println!("{}", serde_json::to_string_pretty(&export)?);
            }
        }
        Commands::Imagery { lat, lng, heading } => {
            let location = GeoPoint::new(lat, lng).validated()?;
            let entry = engine.fetch_imagery(location, heading, &CancelToken::new())?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::PurgeImagery => {
            let purged = engine.purge_expired_imagery()?;
            println!("Purged {} expired imagery entries", purged);
        }
    }
    Ok(())
}

fn read_file(path: &PathBuf) -> Result<String> {
    Ok(fs::read_to_string(path)?)
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(p) => EngineConfig::from_json(&read_file(p)?)?,
        None => EngineConfig::default(),
    };
    if let Ok(key) = std::env::var("ESTATEGEO_API_KEY") {
        config.provider.api_key = key;
    }
    Ok(config)
}

fn parse_kind(s: &str) -> Result<EntityKind> {
    EntityKind::parse(s).ok_or_else(|| GeoError::InvalidArgument(format!("unknown kind '{s}'")))
}

#[cfg(feature = "http")]
fn providers(config: &EngineConfig) -> Result<Providers> {
    use estategeo::{HttpDirections, HttpGeocoder, HttpImagery};

    Ok(Providers {
        routing: Arc::new(HttpDirections::new(config.provider.clone())?),
        geocoder: Arc::new(HttpGeocoder::new(config.provider.clone())?),
        imagery: Arc::new(HttpImagery::new(config.provider.clone())?),
    })
}

#[cfg(not(feature = "http"))]
fn providers(_config: &EngineConfig) -> Result<Providers> {
    let offline = Arc::new(Offline);
    Ok(Providers {
        routing: offline.clone(),
        geocoder: offline.clone(),
        imagery: offline,
    })
}

/// Stand-in provider for builds without `http`.
#[cfg(not(feature = "http"))]
struct Offline;

#[cfg(not(feature = "http"))]
impl RoutingProvider for Offline {
    fn directions(&self, _request: &DirectionsRequest) -> Result<DirectionsResponse> {
        Err(GeoError::ProviderUnavailable("built without http".to_string()))
    }
}

#[cfg(not(feature = "http"))]
impl Geocoder for Offline {
    fn geocode(&self, _query: &str) -> Result<GeoPoint> {
        Err(GeoError::ProviderUnavailable("built without http".to_string()))
    }
}

#[cfg(not(feature = "http"))]
impl ImageryProvider for Offline {
    fn panorama(&self, _request: &ImageryRequest) -> Result<ImageryFetch> {
        Err(GeoError::ProviderUnavailable("built without http".to_string()))
    }
}
