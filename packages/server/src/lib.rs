#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the movement map.
//!
//! Serves a read-only REST API over the clustered pin set: clusters for a
//! zoom and viewport, cluster expansion, leaves, stats, and the category
//! legend. The pin set is loaded from the configured feed at startup and
//! reloaded only on `POST /api/refresh`; the server never writes
//! submissions back.

mod handlers;

use std::sync::{Arc, PoisonError, RwLock};

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use movement_map_engine::{Aggregator, EngineError, FilterState, MapConfig, MapData, MapSnapshot};
use movement_map_ingest::{PinFeed, open_feed};

/// Shared application state.
pub struct AppState {
    /// Loaded configuration.
    pub config: MapConfig,
    /// Where pins are loaded from. `None` serves an empty map.
    feed: Option<Arc<dyn PinFeed>>,
    /// Current pin set and its per-filter snapshots. Swapped wholesale on
    /// refresh.
    aggregator: RwLock<Aggregator>,
    /// Set while no load from `feed` has succeeded.
    load_error: RwLock<Option<String>>,
}

impl AppState {
    /// Creates state over an already loaded pin set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cluster`] if the clustering options are invalid.
    pub fn new(
        config: MapConfig,
        feed: Option<Arc<dyn PinFeed>>,
        data: Arc<MapData>,
    ) -> Result<Self, EngineError> {
        let aggregator = Aggregator::new(data, config.clustering)?;
        Ok(Self {
            config,
            feed,
            aggregator: RwLock::new(aggregator),
            load_error: RwLock::new(None),
        })
    }

    /// Opens the configured feed and loads it once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the feed can't be opened or the
    /// clustering options are invalid.
    pub async fn load(config: MapConfig) -> Result<Self, EngineError> {
        let feed = match config.feed.url.as_deref() {
            Some(url) => Some(open_feed(url, config.feed.timeout())?),
            None => {
                log::warn!("No feed URL configured; serving an empty map");
                None
            }
        };
        Self::from_feed(config, feed).await
    }

    /// Loads `feed` once.
    ///
    /// A failed load is logged and recorded: data endpoints answer with an
    /// error until a refresh succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cluster`] if the clustering options are invalid.
    pub async fn from_feed(
        config: MapConfig,
        feed: Option<Arc<dyn PinFeed>>,
    ) -> Result<Self, EngineError> {
        let (data, load_error) = match &feed {
            Some(feed) => match movement_map_ingest::load(feed.as_ref()).await {
                Ok(loaded) => (MapData::new(loaded), None),
                Err(e) => {
                    log::error!("Initial pin load failed: {e}");
                    (MapData::empty(), Some(e.to_string()))
                }
            },
            None => (MapData::empty(), None),
        };

        let state = Self::new(config, feed, Arc::new(data))?;
        *state.load_error.write().unwrap_or_else(PoisonError::into_inner) = load_error;
        Ok(state)
    }

    /// Why pins are unavailable, if no load has succeeded yet.
    #[must_use]
    pub fn load_error(&self) -> Option<String> {
        self.load_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The snapshot for `filter` over the current pin set.
    ///
    /// Uncached snapshots are built without holding the state lock, so a
    /// refresh is never blocked behind a build.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cluster`] if the hierarchy can't be built.
    pub fn snapshot(&self, filter: &FilterState) -> Result<Arc<MapSnapshot>, EngineError> {
        let (data, options) = {
            let aggregator = self
                .aggregator
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(snapshot) = aggregator.cached(filter) {
                return Ok(snapshot);
            }
            (Arc::clone(aggregator.data()), *aggregator.options())
        };

        let snapshot = Arc::new(MapSnapshot::build(data, *filter, options)?);

        Ok(self
            .aggregator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .remember(snapshot))
    }

    /// The current pin set.
    #[must_use]
    pub fn data(&self) -> Arc<MapData> {
        Arc::clone(
            self.aggregator
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .data(),
        )
    }

    /// Fetches the feed again and swaps in the result.
    ///
    /// On failure the previous pin set keeps being served.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoFeed`] if no feed is configured, or
    /// [`EngineError::Ingest`] if the fetch fails.
    pub async fn refresh(&self) -> Result<Arc<MapData>, EngineError> {
        let feed = self.feed.as_ref().ok_or(EngineError::NoFeed)?;
        let loaded = match movement_map_ingest::load(feed.as_ref()).await {
            Ok(loaded) => loaded,
            Err(e) => {
                if let Some(message) = self
                    .load_error
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_mut()
                {
                    *message = e.to_string();
                }
                return Err(e.into());
            }
        };
        let data = Arc::new(MapData::new(loaded));

        self.aggregator
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace_data(Arc::clone(&data));
        self.load_error
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        Ok(data)
    }
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/categories", web::get().to(handlers::categories))
            .route("/clusters", web::get().to(handlers::clusters))
            .route(
                "/clusters/{zoom}/{index}/expansion-zoom",
                web::get().to(handlers::expansion_zoom),
            )
            .route(
                "/clusters/{zoom}/{index}/leaves",
                web::get().to(handlers::leaves),
            )
            .route("/stats", web::get().to(handlers::stats))
            .route("/refresh", web::post().to(handlers::refresh)),
    );
}

/// Starts the movement map API server.
///
/// Loads configuration, fetches the pin feed once, and starts the
/// Actix-Web HTTP server. This is a regular async function; the caller
/// provides the runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if configuration can't be loaded,
/// the feed can't be opened, or the HTTP server fails to bind.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = MapConfig::load(None).map_err(std::io::Error::other)?;

    log::info!("Loading pins...");
    let state = web::Data::new(
        AppState::load(config)
            .await
            .map_err(std::io::Error::other)?,
    );

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
