#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI for querying the movement map from a terminal.
//!
//! Loads the feed once, then prints clusters, expansion zooms, leaves, or
//! stats as JSON. `render` goes through a full map session instead and
//! prints the first frame at the configured view.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use movement_map_cluster::ClusterId;
use movement_map_engine::frame::zoom_level;
use movement_map_engine::{
    Aggregator, EngineError, FilterState, MapCommand, MapConfig, MapData, MapEvent, MapSession,
    PointMarker,
};
use movement_map_pin_models::PinCategory;
use movement_map_ingest::open_feed;
use movement_map_pin_models::BoundingBox;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "movement_map", about = "Movement map clustering tool")]
struct Cli {
    /// Config file (defaults to `MOVEMENT_MAP_CONFIG` or the built-in config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Feed URL or path to a local JSON file (overrides `feed.url`)
    #[arg(long, global = true)]
    feed: Option<String>,
    /// Comma-separated categories to show (e.g. "supporter,in-memory")
    #[arg(long, global = true)]
    categories: Option<FilterState>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the clusters and points at a zoom level
    Clusters {
        /// Map zoom (fractional zooms round down)
        #[arg(long, default_value = "3")]
        zoom: f64,
        /// Bounding box as "west,south,east,north"
        #[arg(long)]
        bbox: Option<BoundingBox>,
    },
    /// Print the zoom at which a cluster splits
    Expand {
        /// Zoom level the cluster belongs to
        zoom: u8,
        /// Cluster index at that zoom
        index: usize,
    },
    /// Print the pins under a cluster
    Leaves {
        /// Zoom level the cluster belongs to
        zoom: u8,
        /// Cluster index at that zoom
        index: usize,
        /// Maximum number of pins to print
        #[arg(long, default_value = "10")]
        limit: usize,
        /// Number of pins to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Print total and per-category counts
    Stats,
    /// Print how many feed records were accepted and dropped
    Report,
    /// Load through a map session and print the first rendered frame
    Render,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Expansion {
    cluster: ClusterId,
    expansion_zoom: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config = MapConfig::load(cli.config.as_deref())?;
    let source = cli
        .feed
        .or_else(|| config.feed.url.clone())
        .ok_or(EngineError::NoFeed)?;

    let feed = open_feed(&source, config.feed.timeout())?;
    let filter = cli.categories.unwrap_or_default();

    if matches!(cli.command, Commands::Render) {
        let mut session = MapSession::from_config(&config, feed)?;
        return render(&mut session, &filter).await;
    }

    let loaded = movement_map_ingest::load(feed.as_ref()).await?;
    let data = Arc::new(MapData::new(loaded));

    if matches!(cli.command, Commands::Report) {
        print_json(data.report())?;
        return Ok(());
    }

    let aggregator = Aggregator::new(data, config.clustering)?;
    let snapshot = aggregator.snapshot(&filter)?;

    match cli.command {
        Commands::Clusters { zoom, bbox } => {
            let frame = match bbox {
                Some(bbox) => snapshot.frame_at(zoom_level(zoom), &bbox),
                None => snapshot.world_frame(zoom),
            };
            print_json(&frame)?;
        }
        Commands::Expand { zoom, index } => {
            let cluster = ClusterId::new(zoom, index);
            let expansion_zoom = snapshot.expansion_zoom(cluster)?;
            print_json(&Expansion {
                cluster,
                expansion_zoom,
            })?;
        }
        Commands::Leaves {
            zoom,
            index,
            limit,
            offset,
        } => {
            let pins: Vec<PointMarker> = snapshot
                .leaves(ClusterId::new(zoom, index), limit, offset)?
                .into_iter()
                .map(PointMarker::from)
                .collect();
            print_json(&pins)?;
        }
        Commands::Stats => print_json(snapshot.stats())?,
        Commands::Report | Commands::Render => {}
    }

    Ok(())
}

async fn render(
    session: &mut MapSession,
    filter: &FilterState,
) -> Result<(), Box<dyn std::error::Error>> {
    for category in PinCategory::all() {
        if !filter.is_visible(*category) {
            session.dispatch(MapEvent::FilterChanged {
                category: *category,
                visible: false,
            });
        }
    }
    session.start();

    let commands = session.next().await.unwrap_or_default();
    session.teardown();

    for command in commands {
        match command {
            MapCommand::Render(frame) => {
                print_json(&*frame)?;
                return Ok(());
            }
            MapCommand::ShowError { message } => return Err(message.into()),
            _ => {}
        }
    }
    Err("Map session produced no frame".into())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
