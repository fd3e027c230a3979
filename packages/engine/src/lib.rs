#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Movement map engine.
//!
//! Ties the pieces together: a loaded feed becomes [`MapData`], an
//! [`Aggregator`] derives per-filter [`MapSnapshot`]s (clusters and stats
//! computed together), and a [`MapController`] turns user events into
//! render commands. [`MapSession`] drives the controller's single async
//! step, the feed fetch.

pub mod aggregate;
pub mod config;
pub mod controller;
pub mod filter;
pub mod frame;
pub mod session;

pub use aggregate::{Aggregator, MapData, MapSnapshot};
pub use config::{ConfigError, MapConfig, ViewConfig};
pub use controller::{Interaction, MapCommand, MapController, MapEvent, Phase};
pub use filter::{FilterState, UnknownCategoryError};
pub use frame::{ClusterMarker, MapFeature, MapFrame, PinPopup, PointMarker, Viewport};
pub use session::MapSession;

/// Errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Loading the feed failed.
    #[error(transparent)]
    Ingest(#[from] movement_map_ingest::IngestError),

    /// A cluster query or build failed.
    #[error(transparent)]
    Cluster(#[from] movement_map_cluster::ClusterError),

    /// Configuration couldn't be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No feed URL or file was given.
    #[error("No feed configured (set feed.url or MOVEMENT_MAP_FEED_URL)")]
    NoFeed,
}
