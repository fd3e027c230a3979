#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Zoom-aware pin clustering.
//!
//! A [`ClusterHierarchy`] is built once per (pin set, filter state) from a
//! shared [`movement_map_spatial::PointIndex`]. Building walks from the
//! finest zoom to the coarsest, merging every node that lies within the
//! pixel merge radius of a seed node. Each merge is recorded as an
//! explicit parent/child link keyed by [`ClusterId`], so per-zoom queries
//! and cluster expansion are lookups rather than re-clustering.

mod hierarchy;

use std::fmt;

use movement_map_pin_models::{CategoryCounts, LngLat};
use serde::{Deserialize, Serialize};

pub use hierarchy::ClusterHierarchy;

/// Largest supported `max_zoom`.
pub const MAX_SUPPORTED_ZOOM: u8 = 30;

/// Errors from cluster queries.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// No cluster with this id exists in the hierarchy.
    #[error("Unknown cluster {id}")]
    UnknownCluster {
        /// The id that was looked up.
        id: ClusterId,
    },

    /// The id refers to a single pin, which cannot be expanded.
    #[error("Cluster {id} is a single pin")]
    NotACluster {
        /// The id that was looked up.
        id: ClusterId,
    },

    /// The clustering options are unusable.
    #[error("Invalid cluster options: {message}")]
    InvalidOptions {
        /// Description of what went wrong.
        message: String,
    },
}

/// Tuning for the radius-merge rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClusterOptions {
    /// Coarsest zoom level that gets clusters.
    pub min_zoom: u8,
    /// Finest zoom level that gets clusters. Above this every pin is shown
    /// individually.
    pub max_zoom: u8,
    /// Merge radius in screen pixels.
    pub radius: f64,
    /// Tile size in pixels the radius is relative to.
    pub extent: f64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 16,
            radius: 50.0,
            extent: 512.0,
        }
    }
}

impl ClusterOptions {
    /// Merge radius at `zoom` in projected (unit square) distance.
    #[must_use]
    pub fn radius_at(&self, zoom: u8) -> f64 {
        self.radius / (self.extent * 2f64.powi(i32::from(zoom)))
    }

    /// Zoom at which every pin is shown on its own.
    #[must_use]
    pub const fn leaf_zoom(&self) -> u8 {
        self.max_zoom + 1
    }

    /// Clamps a requested zoom to the range the hierarchy answers for.
    #[must_use]
    pub fn clamp_zoom(&self, zoom: u8) -> u8 {
        zoom.clamp(self.min_zoom, self.leaf_zoom())
    }

    /// Checks that the options describe a usable hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::InvalidOptions`] if the zoom range is empty
    /// or too deep, or the radius or extent is not positive.
    pub fn validate(&self) -> Result<(), ClusterError> {
        let message = if self.min_zoom > self.max_zoom {
            format!(
                "min_zoom {} is greater than max_zoom {}",
                self.min_zoom, self.max_zoom
            )
        } else if self.max_zoom > MAX_SUPPORTED_ZOOM {
            format!(
                "max_zoom {} exceeds {MAX_SUPPORTED_ZOOM}",
                self.max_zoom
            )
        } else if !(self.radius.is_finite() && self.radius > 0.0) {
            format!("radius must be positive, got {}", self.radius)
        } else if !(self.extent.is_finite() && self.extent > 0.0) {
            format!("extent must be positive, got {}", self.extent)
        } else {
            return Ok(());
        };

        Err(ClusterError::InvalidOptions { message })
    }
}

/// Opaque handle to one cluster at one zoom level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ClusterId {
    /// Zoom level the cluster belongs to.
    pub zoom: u8,
    /// Position of the cluster within that level.
    pub index: usize,
}

impl ClusterId {
    /// Creates a new cluster id.
    #[must_use]
    pub const fn new(zoom: u8, index: usize) -> Self {
        Self { zoom, index }
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zoom, self.index)
    }
}

/// A multi-pin cluster as shown at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    /// Handle for expansion and leaf queries.
    pub id: ClusterId,
    /// Weighted centroid of the member pins.
    pub center: LngLat,
    /// Number of member pins.
    pub count: u64,
    /// Member pins per category.
    pub categories: CategoryCounts,
}

/// One renderable item at a zoom level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClusterFeature {
    /// Two or more pins drawn as one marker with a count.
    Cluster(ClusterSummary),
    /// A single pin, drawn like an ungrouped point.
    Point {
        /// Position of the pin in the slice the index was built from.
        position: usize,
    },
}

impl ClusterFeature {
    /// Number of pins this feature stands for.
    #[must_use]
    pub const fn count(&self) -> u64 {
        match self {
            Self::Cluster(summary) => summary.count,
            Self::Point { .. } => 1,
        }
    }
}

/// A child link in the cluster tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    /// A pin, by position.
    Leaf(usize),
    /// A node at the next finer zoom.
    Cluster(ClusterId),
}
