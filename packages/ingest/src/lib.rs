#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pin feed ingestion for the movement map.
//!
//! Each feed implements the [`PinFeed`] trait to fetch the raw point
//! document. [`normalize`] then turns the raw records into validated
//! [`Pin`]s, dropping records with missing or out-of-range coordinates
//! and tallying every drop in an [`IngestReport`].
//!
//! Feeds are fetched exactly once per call. Failures are returned to the
//! caller as errors; nothing here retries on its own.

pub mod feed;
pub mod normalize;

use async_trait::async_trait;
use movement_map_pin_models::Pin;

pub use feed::{FeedConfig, FileFeed, HttpFeed, StaticFeed, open_feed, parse_document};
pub use normalize::{IngestReport, normalize};

/// Errors that can occur while fetching or decoding a feed.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The feed answered with a non-success status.
    #[error("Feed returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The request did not finish in time.
    #[error("Feed request timed out after {seconds}s")]
    Timeout {
        /// The timeout that expired.
        seconds: u64,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document parsed but doesn't contain a list of points.
    #[error("Malformed feed payload: {message}")]
    Payload {
        /// Description of what went wrong.
        message: String,
    },

    /// I/O error (file read).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fetched feed document: one JSON value per point record.
pub type FeedDocument = Vec<serde_json::Value>;

/// Validated pins plus the tally of what was dropped on the way.
#[derive(Debug, Clone, Default)]
pub struct NormalizedFeed {
    /// Accepted pins, in feed order.
    pub pins: Vec<Pin>,
    /// Counts of accepted and dropped records.
    pub report: IngestReport,
}

/// Trait that all pin feeds must implement.
#[async_trait]
pub trait PinFeed: Send + Sync {
    /// Short description of where the feed comes from, for logs.
    fn describe(&self) -> String;

    /// Fetches the raw point records.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the request fails, the server answers
    /// with a non-success status, or the payload isn't a point list.
    async fn fetch(&self) -> Result<FeedDocument, IngestError>;
}

/// Fetches a feed once and normalizes it.
///
/// # Errors
///
/// Returns [`IngestError`] if the fetch fails. Individual bad records are
/// not errors; they are counted in the report.
pub async fn load(feed: &dyn PinFeed) -> Result<NormalizedFeed, IngestError> {
    log::info!("Fetching pins from {}", feed.describe());
    let records = feed.fetch().await.inspect_err(|e| {
        log::error!("Failed to fetch pins from {}: {e}", feed.describe());
    })?;
    Ok(normalize(records))
}
