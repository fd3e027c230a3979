#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the movement map server.
//!
//! Map frames and pin markers are serialized straight from the engine;
//! the types here cover query strings and the smaller JSON envelopes.

use chrono::{DateTime, Utc};
use movement_map_cluster::ClusterId;
use movement_map_pin_models::{LngLat, PinCategory, Stats};
use serde::{Deserialize, Serialize};

/// Query parameters for the clusters endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueryParams {
    /// Map zoom. Fractional values round down.
    pub zoom: Option<f64>,
    /// Bounding box as `west,south,east,north`.
    pub bbox: Option<String>,
    /// Comma-separated list of category names to include.
    pub categories: Option<String>,
}

/// Query parameters for endpoints that only take a category filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQueryParams {
    /// Comma-separated list of category names to include.
    pub categories: Option<String>,
}

/// Query parameters for the cluster leaves endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavesQueryParams {
    /// Comma-separated list of category names to include.
    pub categories: Option<String>,
    /// Maximum number of pins.
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
    /// Pins currently indexed.
    pub pins: usize,
    /// When the current pin set was loaded.
    pub loaded_at: DateTime<Utc>,
    /// Why pins couldn't be loaded, while no load has succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry of the category legend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCategory {
    /// Category identifier, as accepted by `categories=`.
    pub id: PinCategory,
    /// Human readable name.
    pub label: &'static str,
    /// Marker color.
    pub color: &'static str,
    /// Pins in this category.
    pub count: u64,
}

impl ApiCategory {
    /// Legend entries for every category, counted from `stats`.
    #[must_use]
    pub fn legend(stats: &Stats) -> Vec<Self> {
        PinCategory::all()
            .iter()
            .map(|category| Self {
                id: *category,
                label: category.label(),
                color: category.color(),
                count: stats.get(*category),
            })
            .collect()
    }
}

/// Where to zoom to expand a cluster.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiExpansion {
    /// The cluster asked about.
    pub cluster: ClusterId,
    /// Lowest zoom at which it splits.
    pub expansion_zoom: u8,
    /// Where to center the camera.
    pub center: LngLat,
}

/// Summary statistics for a filter state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStatsSummary {
    /// Total active pins.
    pub total_count: u64,
    /// Breakdown by category, in legend order.
    pub by_category: Vec<ApiCategoryCount>,
    /// Categories the filter included.
    pub categories: Vec<PinCategory>,
}

impl ApiStatsSummary {
    /// Summarizes `stats` for a filter showing `categories`.
    #[must_use]
    pub fn new(stats: &Stats, categories: impl IntoIterator<Item = PinCategory>) -> Self {
        Self {
            total_count: stats.total(),
            by_category: stats
                .by_category()
                .iter()
                .map(|(category, count)| ApiCategoryCount { category, count })
                .collect(),
            categories: categories.into_iter().collect(),
        }
    }
}

/// Count of pins for a single category.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCategoryCount {
    /// Category.
    pub category: PinCategory,
    /// Number of pins.
    pub count: u64,
}

/// Result of reloading the feed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRefresh {
    /// Records in the feed document.
    pub received: u64,
    /// Records that became pins.
    pub accepted: u64,
    /// Records dropped as malformed or invalid.
    pub dropped: u64,
    /// When the new pin set was loaded.
    pub loaded_at: DateTime<Utc>,
}
