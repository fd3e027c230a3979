//! Renderable output handed to the presentation layer.
//!
//! A [`MapFrame`] is immutable and complete: the features for one zoom and
//! viewport plus the stats for the same filter state.

use movement_map_cluster::{ClusterId, ClusterSummary, MAX_SUPPORTED_ZOOM};
use movement_map_pin_models::{BoundingBox, CategoryCounts, LngLat, Pin, PinCategory, Stats};
use serde::Serialize;

/// What part of the map is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    /// Camera center.
    pub center: LngLat,
    /// Fractional zoom as reported by the map.
    pub zoom: f64,
    /// Visible area.
    pub bounds: BoundingBox,
}

impl Viewport {
    /// A viewport showing the whole world at `zoom`.
    #[must_use]
    pub const fn world(center: LngLat, zoom: f64) -> Self {
        Self {
            center,
            zoom,
            bounds: BoundingBox::world(),
        }
    }

    /// Integer zoom level used for cluster queries.
    ///
    /// Fractional zooms round down so clusters never split early.
    #[must_use]
    pub fn zoom_level(&self) -> u8 {
        zoom_level(self.zoom)
    }
}

/// Converts a fractional map zoom into a cluster query level.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn zoom_level(zoom: f64) -> u8 {
    if zoom.is_nan() {
        return 0;
    }
    zoom.floor().clamp(0.0, f64::from(MAX_SUPPORTED_ZOOM) + 1.0) as u8
}

/// A multi-pin marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMarker {
    /// Handle for expansion queries.
    pub id: ClusterId,
    /// Centroid longitude.
    pub lng: f64,
    /// Centroid latitude.
    pub lat: f64,
    /// Member pin count.
    pub count: u64,
    /// Member pins per category.
    pub categories: CategoryCounts,
}

impl From<ClusterSummary> for ClusterMarker {
    fn from(summary: ClusterSummary) -> Self {
        Self {
            id: summary.id,
            lng: summary.center.lng,
            lat: summary.center.lat,
            count: summary.count,
            categories: summary.categories,
        }
    }
}

/// A single pin with its derived display fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointMarker {
    /// The pin record.
    #[serde(flatten)]
    pub pin: Pin,
    /// Display name, or the placeholder.
    pub label: String,
    /// Marker color.
    pub color: &'static str,
}

impl From<&Pin> for PointMarker {
    fn from(pin: &Pin) -> Self {
        Self {
            label: pin.label().to_string(),
            color: pin.color(),
            pin: pin.clone(),
        }
    }
}

/// One item on the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MapFeature {
    /// Two or more pins.
    Cluster(ClusterMarker),
    /// One pin, drawn without a count badge.
    Point(PointMarker),
}

impl MapFeature {
    /// Number of pins this feature stands for.
    #[must_use]
    pub const fn count(&self) -> u64 {
        match self {
            Self::Cluster(marker) => marker.count,
            Self::Point(_) => 1,
        }
    }
}

/// Everything the presentation layer needs for one redraw.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapFrame {
    /// Zoom level the features were computed for.
    pub zoom: u8,
    /// Features in the viewport, in stable order.
    pub features: Vec<MapFeature>,
    /// Stats over every active pin, not just the viewport.
    pub stats: Stats,
}

impl MapFrame {
    /// Sum of feature counts.
    #[must_use]
    pub fn pin_count(&self) -> u64 {
        self.features.iter().map(MapFeature::count).sum()
    }
}

/// Popup contents for a clicked pin. Missing fields degrade to
/// placeholders rather than failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinPopup {
    /// Pin id.
    pub id: String,
    /// Display name, or the placeholder.
    pub name: String,
    /// Category.
    pub category: PinCategory,
    /// Human readable category.
    pub category_label: &'static str,
    /// Category color.
    pub color: &'static str,
    /// `"City, ST"` when known.
    pub locality: Option<String>,
    /// Title of the linked story.
    pub story_title: Option<String>,
    /// Site path of the linked story.
    pub story_path: Option<String>,
}

impl From<&Pin> for PinPopup {
    fn from(pin: &Pin) -> Self {
        Self {
            id: pin.id.clone(),
            name: pin.label().to_string(),
            category: pin.category,
            category_label: pin.category.label(),
            color: pin.color(),
            locality: pin.locality(),
            story_title: pin.story_title.clone(),
            story_path: pin.story_path(),
        }
    }
}
