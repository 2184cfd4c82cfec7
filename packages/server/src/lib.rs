#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for zone aggregates.
//!
//! Serves single and batched aggregate requests for a zone plus the
//! display metadata of every registered aggregate. Results are computed
//! on first request and cached in the configured store; with the `duckdb`
//! feature the cache survives restarts.

pub mod config;
mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use zonestat_aggregates::memory::{
    MemoryGeoAggregateStore, MemoryZoneAggregateStore, MemoryZoneGeoMapStore,
};
use zonestat_aggregates::registry::{AggregateRegistry, RegistryError};
use zonestat_aggregates::service::ZoneAggregatesService;
use zonestat_aggregates::store::{GeoAggregateStore, ZoneAggregateStore, ZoneGeoMapStore};
use zonestat_database::DbError;

use crate::config::{ConfigError, ServerConfig, StoreKind};

/// Shared application state.
pub struct AppState {
    /// The zone aggregates service.
    pub service: Arc<ZoneAggregatesService>,
}

/// Errors raised while assembling the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A built-in plugin failed registration.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Store or seed failure.
    #[error(transparent)]
    Database(#[from] DbError),

    /// `ZONESTAT_STORE=duckdb` in a build without `DuckDB` support.
    #[error("DuckDB store requested but the server was built without the `duckdb` feature")]
    DuckDbUnavailable,
}

/// The three store handles the service is built over.
struct Stores {
    aggregates: Arc<dyn ZoneAggregateStore>,
    geo: Arc<dyn GeoAggregateStore>,
    zones: Arc<dyn ZoneGeoMapStore>,
}

fn open_stores(config: &ServerConfig) -> Result<Stores, ServerError> {
    match config.store {
        StoreKind::Memory => {
            log::info!("Using in-memory stores");
            Ok(Stores {
                aggregates: Arc::new(MemoryZoneAggregateStore::new()),
                geo: Arc::new(MemoryGeoAggregateStore::new()),
                zones: Arc::new(MemoryZoneGeoMapStore::new()),
            })
        }
        #[cfg(feature = "duckdb")]
        StoreKind::Duckdb => {
            let store = Arc::new(zonestat_database::duckdb_store::DuckDbStore::open(
                &config.db_path,
            )?);
            Ok(Stores {
                aggregates: store.clone(),
                geo: store.clone(),
                zones: store,
            })
        }
        #[cfg(not(feature = "duckdb"))]
        StoreKind::Duckdb => Err(ServerError::DuckDbUnavailable),
    }
}

/// Builds the service described by `config`, applying the seed file if
/// one is configured.
///
/// # Errors
///
/// Returns [`ServerError`] if the registry, stores, or seed fail.
pub async fn build_service(config: &ServerConfig) -> Result<ZoneAggregatesService, ServerError> {
    let registry: Arc<AggregateRegistry> = Arc::new(zonestat_plugins::registry::default_registry()?);
    let stores = open_stores(config)?;

    if let Some(seed_path) = &config.seed_path {
        let seed = zonestat_database::seed::load_seed_file(seed_path)?;
        zonestat_database::seed::apply_seed(
            seed,
            &registry,
            stores.geo.as_ref(),
            stores.zones.as_ref(),
        )
        .await?;
    }

    Ok(ZoneAggregatesService::new(
        registry,
        stores.aggregates,
        stores.geo,
        stores.zones,
    ))
}

/// Registers the `/api` routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/aggregates", web::get().to(handlers::list_aggregates))
            .route(
                "/aggregates/{aggregate_id}",
                web::get().to(handlers::get_aggregate_display),
            )
            .route(
                "/zones/{zone_id}/aggregates:batch",
                web::post().to(handlers::batch),
            )
            .route(
                "/zones/{zone_id}/aggregates/{aggregate_id}",
                web::get().to(handlers::get_zone_aggregate),
            ),
    );
}

/// Starts the zone aggregates API server.
///
/// Reads [`ServerConfig`] from the environment, builds the service, and
/// runs the Actix-Web HTTP server. The caller provides the async runtime
/// (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the service cannot be built, or
/// the HTTP server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = ServerConfig::from_env().map_err(std::io::Error::other)?;

    log::info!("Building zone aggregates service ({} store)...", config.store);
    let service = build_service(&config)
        .await
        .map_err(std::io::Error::other)?;
    log::info!(
        "Registered aggregates: {}",
        service
            .registry()
            .list()
            .iter()
            .map(|p| p.id())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let state = web::Data::new(AppState {
        service: Arc::new(service),
    });

    log::info!("Starting server on {}:{}", config.bind_addr, config.port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind((config.bind_addr.clone(), config.port))?
    .run()
    .await
}
