//! Filter-driven recomputation of clusters and stats.
//!
//! [`MapData`] is built once per feed load. An [`Aggregator`] derives a
//! [`MapSnapshot`] for each filter state, computing the active pin set,
//! the stats over it, and its cluster hierarchy in one step. Consumers only
//! ever hold whole snapshots, so stats and clusters always agree.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use movement_map_cluster::{
    ClusterError, ClusterFeature, ClusterHierarchy, ClusterId, ClusterOptions, ClusterSummary,
};
use movement_map_ingest::{IngestReport, NormalizedFeed};
use movement_map_pin_models::{BoundingBox, CategoryCounts, Pin, Stats};
use movement_map_spatial::PointIndex;

use crate::EngineError;
use crate::filter::FilterState;
use crate::frame::{MapFeature, MapFrame, PointMarker, Viewport, zoom_level};

/// One loaded pin set and its spatial index.
///
/// Immutable. A refresh builds a new one.
pub struct MapData {
    pins: Vec<Pin>,
    index: Arc<PointIndex>,
    positions: HashMap<String, usize>,
    report: IngestReport,
    loaded_at: DateTime<Utc>,
}

impl MapData {
    /// Indexes a normalized feed.
    #[must_use]
    pub fn new(feed: NormalizedFeed) -> Self {
        let start = Instant::now();
        let index = Arc::new(PointIndex::build(&feed.pins));
        let positions = feed
            .pins
            .iter()
            .enumerate()
            .map(|(i, pin)| (pin.id.clone(), i))
            .collect();

        log::info!("Indexed {} pins in {:.2?}", index.len(), start.elapsed());

        Self {
            pins: feed.pins,
            index,
            positions,
            report: feed.report,
            loaded_at: Utc::now(),
        }
    }

    /// Indexes pins that didn't come through a feed.
    #[must_use]
    pub fn from_pins(pins: Vec<Pin>) -> Self {
        let report = IngestReport {
            received: pins.len() as u64,
            accepted: pins.len() as u64,
            ..IngestReport::default()
        };
        Self::new(NormalizedFeed { pins, report })
    }

    /// An empty pin set.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_pins(Vec::new())
    }

    /// Every loaded pin, in feed order.
    #[must_use]
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// The shared spatial index.
    #[must_use]
    pub const fn index(&self) -> &Arc<PointIndex> {
        &self.index
    }

    /// What the normalizer kept and dropped.
    #[must_use]
    pub const fn report(&self) -> &IngestReport {
        &self.report
    }

    /// When this pin set was indexed.
    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Pin at `position`.
    #[must_use]
    pub fn pin(&self, position: usize) -> Option<&Pin> {
        self.pins.get(position)
    }

    /// Position of the pin with the given id.
    #[must_use]
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }
}

/// Clusters and stats for one filter state over one [`MapData`].
pub struct MapSnapshot {
    filter: FilterState,
    stats: Stats,
    hierarchy: ClusterHierarchy,
    data: Arc<MapData>,
}

impl MapSnapshot {
    /// Computes the active pin set, its stats, and its hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::InvalidOptions`] if `options` are invalid.
    pub fn build(
        data: Arc<MapData>,
        filter: FilterState,
        options: ClusterOptions,
    ) -> Result<Self, ClusterError> {
        let hierarchy = ClusterHierarchy::build(Arc::clone(data.index()), options, |p| {
            filter.is_visible(data.pins[p].category)
        })?;

        let mut counts = CategoryCounts::new();
        for (p, pin) in data.pins.iter().enumerate() {
            if hierarchy.is_active(p) {
                counts.add(pin.category, 1);
            }
        }
        let stats = Stats::from_counts(counts);

        log::debug!(
            "Snapshot for filter {:04b}: {} active pins",
            filter.mask(),
            stats.total()
        );

        Ok(Self {
            filter,
            stats,
            hierarchy,
            data,
        })
    }

    /// The filter this snapshot was computed for.
    #[must_use]
    pub const fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// Counts over the active pin set.
    #[must_use]
    pub const fn stats(&self) -> &Stats {
        &self.stats
    }

    /// The pin set this snapshot was computed from.
    #[must_use]
    pub const fn data(&self) -> &Arc<MapData> {
        &self.data
    }

    /// Features and stats for a viewport.
    #[must_use]
    pub fn frame(&self, viewport: &Viewport) -> MapFrame {
        self.frame_at(viewport.zoom_level(), &viewport.bounds)
    }

    /// Features and stats for an integer zoom and a bounding box.
    #[must_use]
    pub fn frame_at(&self, zoom: u8, bbox: &BoundingBox) -> MapFrame {
        let features = self
            .hierarchy
            .clusters_at(zoom, bbox)
            .into_iter()
            .filter_map(|feature| self.map_feature(feature))
            .collect();

        MapFrame {
            zoom,
            features,
            stats: self.stats,
        }
    }

    /// Features for a fractional map zoom over the whole world.
    #[must_use]
    pub fn world_frame(&self, zoom: f64) -> MapFrame {
        self.frame_at(zoom_level(zoom), &BoundingBox::world())
    }

    /// Summary of one cluster.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnknownCluster`] if the id doesn't exist in
    /// this snapshot.
    pub fn cluster(&self, id: ClusterId) -> Result<ClusterSummary, ClusterError> {
        self.hierarchy.cluster(id)
    }

    /// Lowest zoom at which `id` splits.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError`] if the id is unknown or a single pin.
    pub fn expansion_zoom(&self, id: ClusterId) -> Result<u8, ClusterError> {
        self.hierarchy.expansion_zoom(id)
    }

    /// Pins under a cluster, paginated.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnknownCluster`] if the id doesn't exist.
    pub fn leaves(
        &self,
        id: ClusterId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<&Pin>, ClusterError> {
        Ok(self
            .hierarchy
            .leaves(id, limit, offset)?
            .into_iter()
            .filter_map(|p| self.data.pin(p))
            .collect())
    }

    /// An active pin by id. Pins hidden by the filter are not found.
    #[must_use]
    pub fn find_pin(&self, id: &str) -> Option<&Pin> {
        self.data
            .position_of(id)
            .filter(|p| self.hierarchy.is_active(*p))
            .and_then(|p| self.data.pin(p))
    }

    fn map_feature(&self, feature: ClusterFeature) -> Option<MapFeature> {
        match feature {
            ClusterFeature::Cluster(summary) => Some(MapFeature::Cluster(summary.into())),
            ClusterFeature::Point { position } => self
                .data
                .pin(position)
                .map(|pin| MapFeature::Point(PointMarker::from(pin))),
        }
    }
}

/// Hands out [`MapSnapshot`]s for the current pin set, caching one per
/// filter state.
///
/// Clustering is deterministic, so a cached snapshot is identical to a
/// fresh one. The cache is dropped whenever the pin set is replaced.
pub struct Aggregator {
    options: ClusterOptions,
    data: Arc<MapData>,
    cache: Mutex<BTreeMap<u8, Arc<MapSnapshot>>>,
}

impl Aggregator {
    /// Creates an aggregator over `data`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cluster`] if `options` are invalid.
    pub fn new(data: Arc<MapData>, options: ClusterOptions) -> Result<Self, EngineError> {
        options.validate()?;
        Ok(Self {
            options,
            data,
            cache: Mutex::new(BTreeMap::new()),
        })
    }

    /// Clustering options in use.
    #[must_use]
    pub const fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Current pin set.
    #[must_use]
    pub const fn data(&self) -> &Arc<MapData> {
        &self.data
    }

    /// Swaps in a new pin set and forgets every cached snapshot.
    pub fn replace_data(&mut self, data: Arc<MapData>) {
        self.data = data;
        self.cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The cached snapshot for `filter`, if one has been built.
    #[must_use]
    pub fn cached(&self, filter: &FilterState) -> Option<Arc<MapSnapshot>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&filter.mask())
            .cloned()
    }

    /// Caches a snapshot built elsewhere and returns the cached entry.
    ///
    /// Snapshots built from a pin set other than the current one are
    /// returned as is and not cached.
    pub fn remember(&self, snapshot: Arc<MapSnapshot>) -> Arc<MapSnapshot> {
        if !Arc::ptr_eq(snapshot.data(), &self.data) {
            log::debug!("Not caching snapshot built from a replaced pin set");
            return snapshot;
        }
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cache.entry(snapshot.filter().mask()).or_insert(snapshot))
    }

    /// The snapshot for `filter`, built on first use.
    ///
    /// The cache lock isn't held while building.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cluster`] if the hierarchy can't be built.
    pub fn snapshot(&self, filter: &FilterState) -> Result<Arc<MapSnapshot>, EngineError> {
        if let Some(snapshot) = self.cached(filter) {
            return Ok(snapshot);
        }
        let snapshot = MapSnapshot::build(Arc::clone(&self.data), *filter, self.options)?;
        Ok(self.remember(Arc::new(snapshot)))
    }
}
