//! Interaction state machine.
//!
//! [`MapController`] turns discrete [`MapEvent`]s into [`MapCommand`]s for
//! the presentation layer. It performs no I/O: a `Fetch` command asks the
//! driver to load the feed, and the driver reports back with
//! `FetchSucceeded` or `FetchFailed` tagged with the same generation.
//!
//! ```text
//! Idle ──Start──▶ Fetching ──ok──▶ Ready(Viewing ⇄ PopupOpen)
//!                   ▲   └──err──▶ Error
//!                   └────Retry─────┘
//! ```

use std::sync::Arc;

use movement_map_cluster::{ClusterId, ClusterOptions};
use movement_map_ingest::NormalizedFeed;
use movement_map_pin_models::{LngLat, PinCategory, Stats};

use crate::EngineError;
use crate::aggregate::{Aggregator, MapData, MapSnapshot};
use crate::config::MapConfig;
use crate::filter::FilterState;
use crate::frame::{MapFrame, PinPopup, Viewport};

/// Sub-state while data is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    /// Browsing the map.
    Viewing,
    /// A pin's popup is showing.
    PopupOpen(PinPopup),
}

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Created, nothing requested yet.
    Idle,
    /// Waiting for the feed.
    Fetching {
        /// Generation of the outstanding request.
        generation: u64,
    },
    /// Data loaded.
    Ready(Interaction),
    /// The feed failed. Only `Retry` leaves this phase.
    Error {
        /// What went wrong, for display.
        message: String,
    },
    /// Torn down. Every further event is ignored.
    Closed,
}

/// Inputs to the controller.
#[derive(Debug, Clone)]
pub enum MapEvent {
    /// Begin the first load.
    Start,
    /// Load again after a failure.
    Retry,
    /// The feed for `generation` loaded.
    FetchSucceeded {
        /// Generation from the matching `Fetch` command.
        generation: u64,
        /// Normalized pins.
        feed: NormalizedFeed,
    },
    /// The feed for `generation` failed or timed out.
    FetchFailed {
        /// Generation from the matching `Fetch` command.
        generation: u64,
        /// What went wrong.
        message: String,
    },
    /// A cluster marker was clicked.
    ClusterClicked(ClusterId),
    /// A single pin was clicked, by pin id.
    PointClicked(String),
    /// The map background was clicked.
    MapClicked,
    /// The popup's close button was used.
    PopupClosed,
    /// The camera moved or zoomed.
    ViewportChanged(Viewport),
    /// A category toggle changed.
    FilterChanged {
        /// Category toggled.
        category: PinCategory,
        /// New visibility.
        visible: bool,
    },
    /// The owning view is going away.
    Teardown,
}

/// Outputs for the driver and the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum MapCommand {
    /// Load the feed and report back with this generation.
    Fetch {
        /// Tag for the eventual result.
        generation: u64,
    },
    /// Replace everything drawn with this frame.
    Render(Arc<MapFrame>),
    /// Move the camera.
    FlyTo {
        /// New center.
        center: LngLat,
        /// New zoom.
        zoom: u8,
    },
    /// Show a popup for a pin.
    OpenPopup(PinPopup),
    /// Hide the popup.
    ClosePopup,
    /// Show the load error with a retry action.
    ShowError {
        /// What went wrong.
        message: String,
    },
}

/// The interaction state machine for one map.
pub struct MapController {
    options: ClusterOptions,
    phase: Phase,
    generation: u64,
    filter: FilterState,
    viewport: Viewport,
    aggregator: Option<Aggregator>,
    snapshot: Option<Arc<MapSnapshot>>,
}

impl MapController {
    /// Creates an idle controller.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cluster`] if `options` are invalid.
    pub fn new(options: ClusterOptions, viewport: Viewport) -> Result<Self, EngineError> {
        options.validate()?;
        Ok(Self {
            options,
            phase: Phase::Idle,
            generation: 0,
            filter: FilterState::default(),
            viewport,
            aggregator: None,
            snapshot: None,
        })
    }

    /// Creates an idle controller from configuration, looking at the
    /// configured initial view.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cluster`] if the clustering options are invalid.
    pub fn from_config(config: &MapConfig) -> Result<Self, EngineError> {
        Self::new(
            config.clustering,
            Viewport::world(config.view.center(), config.view.zoom),
        )
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Current filter.
    #[must_use]
    pub const fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// Last reported viewport.
    #[must_use]
    pub const fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Generation of the most recent fetch request.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Snapshot for the current data and filter, once loaded.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&Arc<MapSnapshot>> {
        self.snapshot.as_ref()
    }

    /// Stats for the current filter. Empty until loaded.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.snapshot
            .as_ref()
            .map(|s| *s.stats())
            .unwrap_or_default()
    }

    /// Frame for the current viewport, once loaded.
    #[must_use]
    pub fn current_frame(&self) -> Option<MapFrame> {
        self.snapshot.as_ref().map(|s| s.frame(&self.viewport))
    }

    /// Applies one event.
    pub fn handle(&mut self, event: MapEvent) -> Vec<MapCommand> {
        if self.phase == Phase::Closed {
            log::debug!("Ignoring {event:?} after teardown");
            return Vec::new();
        }

        match event {
            MapEvent::Start => match self.phase {
                Phase::Idle => self.begin_fetch(),
                _ => ignored("Start", &self.phase),
            },
            MapEvent::Retry => match self.phase {
                Phase::Error { .. } => {
                    log::info!("Retrying pin feed");
                    self.begin_fetch()
                }
                _ => ignored("Retry", &self.phase),
            },
            MapEvent::FetchSucceeded { generation, feed } => {
                if self.is_current_fetch(generation) {
                    self.load(feed)
                } else {
                    log::debug!("Discarding stale fetch result {generation}");
                    Vec::new()
                }
            }
            MapEvent::FetchFailed {
                generation,
                message,
            } => {
                if self.is_current_fetch(generation) {
                    self.fail(message)
                } else {
                    log::debug!("Discarding stale fetch failure {generation}: {message}");
                    Vec::new()
                }
            }
            MapEvent::ClusterClicked(id) => self.expand(id),
            MapEvent::PointClicked(id) => self.open_popup(&id),
            MapEvent::MapClicked | MapEvent::PopupClosed => self.close_popup(),
            MapEvent::ViewportChanged(viewport) => {
                self.viewport = viewport;
                self.render().into_iter().collect()
            }
            MapEvent::FilterChanged { category, visible } => {
                self.set_filter(self.filter.set(category, visible))
            }
            MapEvent::Teardown => {
                log::debug!("Tearing down map controller");
                self.phase = Phase::Closed;
                self.generation += 1;
                self.snapshot = None;
                self.aggregator = None;
                Vec::new()
            }
        }
    }

    const fn is_current_fetch(&self, generation: u64) -> bool {
        matches!(self.phase, Phase::Fetching { generation: g } if g == generation)
    }

    fn begin_fetch(&mut self) -> Vec<MapCommand> {
        self.generation += 1;
        self.phase = Phase::Fetching {
            generation: self.generation,
        };
        vec![MapCommand::Fetch {
            generation: self.generation,
        }]
    }

    fn load(&mut self, feed: NormalizedFeed) -> Vec<MapCommand> {
        let data = Arc::new(MapData::new(feed));

        let aggregator = match self.aggregator.take() {
            Some(mut aggregator) => {
                aggregator.replace_data(data);
                Ok(aggregator)
            }
            None => Aggregator::new(data, self.options),
        };
        let result = aggregator.and_then(|aggregator| {
            let snapshot = aggregator.snapshot(&self.filter)?;
            Ok((aggregator, snapshot))
        });

        match result {
            Ok((aggregator, snapshot)) => {
                self.aggregator = Some(aggregator);
                self.snapshot = Some(snapshot);
                self.phase = Phase::Ready(Interaction::Viewing);
                self.render().into_iter().collect()
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn fail(&mut self, message: String) -> Vec<MapCommand> {
        log::error!("Map data failed to load: {message}");
        self.phase = Phase::Error {
            message: message.clone(),
        };
        vec![MapCommand::ShowError { message }]
    }

    fn render(&self) -> Option<MapCommand> {
        if !matches!(self.phase, Phase::Ready(_)) {
            return None;
        }
        self.current_frame().map(|frame| {
            log::trace!(
                "Rendering {} features ({} pins) at zoom {}",
                frame.features.len(),
                frame.pin_count(),
                frame.zoom
            );
            MapCommand::Render(Arc::new(frame))
        })
    }

    fn expand(&mut self, id: ClusterId) -> Vec<MapCommand> {
        let Some(snapshot) = self.ready_snapshot() else {
            return ignored("ClusterClicked", &self.phase);
        };

        let target = snapshot
            .expansion_zoom(id)
            .and_then(|zoom| Ok((snapshot.cluster(id)?.center, zoom)));

        let mut commands = self.close_popup();
        match target {
            Ok((center, zoom)) => {
                log::debug!("Expanding cluster {id} at zoom {zoom}");
                commands.push(MapCommand::FlyTo { center, zoom });
            }
            Err(e) => log::warn!("Can't expand cluster {id}: {e}"),
        }
        commands
    }

    fn open_popup(&mut self, id: &str) -> Vec<MapCommand> {
        let Some(snapshot) = self.ready_snapshot() else {
            return ignored("PointClicked", &self.phase);
        };

        match snapshot.find_pin(id) {
            Some(pin) => {
                let popup = PinPopup::from(pin);
                self.phase = Phase::Ready(Interaction::PopupOpen(popup.clone()));
                vec![MapCommand::OpenPopup(popup)]
            }
            None => {
                log::warn!("Clicked pin {id} is not visible");
                Vec::new()
            }
        }
    }

    fn close_popup(&mut self) -> Vec<MapCommand> {
        if matches!(self.phase, Phase::Ready(Interaction::PopupOpen(_))) {
            self.phase = Phase::Ready(Interaction::Viewing);
            vec![MapCommand::ClosePopup]
        } else {
            Vec::new()
        }
    }

    fn set_filter(&mut self, filter: FilterState) -> Vec<MapCommand> {
        self.filter = filter;

        let Some(aggregator) = self.aggregator.as_ref() else {
            return Vec::new();
        };
        let snapshot = match aggregator.snapshot(&self.filter) {
            Ok(snapshot) => snapshot,
            Err(e) => return self.fail(e.to_string()),
        };

        let hides_popup = matches!(
            &self.phase,
            Phase::Ready(Interaction::PopupOpen(popup)) if snapshot.find_pin(&popup.id).is_none()
        );
        self.snapshot = Some(snapshot);

        let mut commands = if hides_popup {
            self.close_popup()
        } else {
            Vec::new()
        };
        commands.extend(self.render());
        commands
    }

    fn ready_snapshot(&self) -> Option<Arc<MapSnapshot>> {
        match self.phase {
            Phase::Ready(_) => self.snapshot.clone(),
            _ => None,
        }
    }
}

fn ignored(event: &str, phase: &Phase) -> Vec<MapCommand> {
    log::debug!("Ignoring {event} in phase {phase:?}");
    Vec::new()
}

#[cfg(test)]
mod tests {
    use movement_map_ingest::normalize;
    use movement_map_pin_models::BoundingBox;
    use serde_json::json;

    use super::*;
    use crate::frame::MapFeature;

    fn feed() -> NormalizedFeed {
        normalize(vec![
            json!({"id": "a", "category": "supporter", "lat": 30.20, "lng": -97.70}),
            json!({"id": "b", "category": "supporter", "lat": 30.25, "lng": -97.60}),
            json!({"id": "c", "category": "in-memory", "lat": 30.30, "lng": -97.65, "city": "Austin"}),
            json!({"id": "far", "category": "struggling", "lat": 47.6, "lng": -122.3}),
        ])
    }

    fn controller() -> MapController {
        MapController::new(
            ClusterOptions::default(),
            Viewport::world(LngLat::new(-98.0, 39.0), 3.0),
        )
        .unwrap()
    }

    fn ready() -> MapController {
        let mut controller = controller();
        let commands = controller.handle(MapEvent::Start);
        let [MapCommand::Fetch { generation }] = commands.as_slice() else {
            panic!("expected a fetch, got {commands:?}");
        };
        controller.handle(MapEvent::FetchSucceeded {
            generation: *generation,
            feed: feed(),
        });
        controller
    }

    fn rendered(commands: &[MapCommand]) -> &MapFrame {
        commands
            .iter()
            .find_map(|c| match c {
                MapCommand::Render(frame) => Some(frame.as_ref()),
                _ => None,
            })
            .expect("no render command")
    }

    #[test]
    fn start_fetches_then_renders() {
        let mut controller = controller();
        assert_eq!(controller.phase(), &Phase::Idle);

        let commands = controller.handle(MapEvent::Start);
        assert_eq!(commands, vec![MapCommand::Fetch { generation: 1 }]);
        assert_eq!(controller.phase(), &Phase::Fetching { generation: 1 });
        assert!(controller.handle(MapEvent::Start).is_empty());

        let commands = controller.handle(MapEvent::FetchSucceeded {
            generation: 1,
            feed: feed(),
        });
        assert_eq!(controller.phase(), &Phase::Ready(Interaction::Viewing));
        let frame = rendered(&commands);
        assert_eq!(frame.zoom, 3);
        assert_eq!(frame.stats.total(), 4);
        assert_eq!(frame.pin_count(), 4);
    }

    #[test]
    fn failure_waits_for_retry() {
        let mut controller = controller();
        controller.handle(MapEvent::Start);
        let commands = controller.handle(MapEvent::FetchFailed {
            generation: 1,
            message: "Feed returned HTTP 503".to_string(),
        });
        assert_eq!(
            commands,
            vec![MapCommand::ShowError {
                message: "Feed returned HTTP 503".to_string()
            }]
        );
        assert!(matches!(controller.phase(), Phase::Error { .. }));

        assert!(controller.handle(MapEvent::Start).is_empty());
        assert!(controller.handle(MapEvent::MapClicked).is_empty());
        assert_eq!(
            controller.handle(MapEvent::Retry),
            vec![MapCommand::Fetch { generation: 2 }]
        );
        assert!(controller.handle(MapEvent::Retry).is_empty());
    }

    #[test]
    fn stale_results_are_discarded() {
        let mut controller = controller();
        controller.handle(MapEvent::Start);
        controller.handle(MapEvent::FetchFailed {
            generation: 1,
            message: "timeout".to_string(),
        });
        controller.handle(MapEvent::Retry);

        let late = controller.handle(MapEvent::FetchSucceeded {
            generation: 1,
            feed: feed(),
        });
        assert!(late.is_empty());
        assert_eq!(controller.phase(), &Phase::Fetching { generation: 2 });
    }

    #[test]
    fn teardown_ignores_everything_after() {
        let mut controller = controller();
        controller.handle(MapEvent::Start);
        controller.handle(MapEvent::Teardown);
        assert_eq!(controller.phase(), &Phase::Closed);

        assert!(
            controller
                .handle(MapEvent::FetchSucceeded {
                    generation: 1,
                    feed: feed(),
                })
                .is_empty()
        );
        assert!(controller.handle(MapEvent::Retry).is_empty());
        assert!(controller.snapshot().is_none());
    }

    #[test]
    fn cluster_click_flies_to_expansion_zoom() {
        let mut controller = ready();
        let frame = controller.current_frame().unwrap();
        let cluster = frame
            .features
            .iter()
            .find_map(|f| match f {
                MapFeature::Cluster(c) => Some(*c),
                MapFeature::Point(_) => None,
            })
            .unwrap();
        assert_eq!(cluster.count, 3);

        let expected = controller
            .snapshot()
            .unwrap()
            .expansion_zoom(cluster.id)
            .unwrap();
        let commands = controller.handle(MapEvent::ClusterClicked(cluster.id));
        let [MapCommand::FlyTo { center, zoom }] = commands.as_slice() else {
            panic!("expected fly-to, got {commands:?}");
        };
        assert_eq!(*zoom, expected);
        assert!(*zoom > 3);
        assert!((center.lng - cluster.lng).abs() < 1e-9);
        assert_eq!(controller.phase(), &Phase::Ready(Interaction::Viewing));

        assert!(
            controller
                .handle(MapEvent::ClusterClicked(ClusterId::new(3, 999)))
                .is_empty()
        );
    }

    #[test]
    fn point_click_opens_and_closes_popup() {
        let mut controller = ready();
        let commands = controller.handle(MapEvent::PointClicked("c".to_string()));
        let [MapCommand::OpenPopup(popup)] = commands.as_slice() else {
            panic!("expected popup, got {commands:?}");
        };
        assert_eq!(popup.name, movement_map_pin_models::PLACEHOLDER_NAME);
        assert_eq!(popup.locality.as_deref(), Some("Austin"));
        assert!(matches!(
            controller.phase(),
            Phase::Ready(Interaction::PopupOpen(_))
        ));

        assert_eq!(
            controller.handle(MapEvent::MapClicked),
            vec![MapCommand::ClosePopup]
        );
        assert!(controller.handle(MapEvent::PopupClosed).is_empty());
        assert!(
            controller
                .handle(MapEvent::PointClicked("nope".to_string()))
                .is_empty()
        );
    }

    #[test]
    fn cluster_click_with_popup_closes_it_first() {
        let mut controller = ready();
        controller.handle(MapEvent::PointClicked("far".to_string()));
        let cluster_id = controller
            .current_frame()
            .unwrap()
            .features
            .iter()
            .find_map(|f| match f {
                MapFeature::Cluster(c) => Some(c.id),
                MapFeature::Point(_) => None,
            })
            .unwrap();

        let commands = controller.handle(MapEvent::ClusterClicked(cluster_id));
        assert_eq!(commands[0], MapCommand::ClosePopup);
        assert!(matches!(commands[1], MapCommand::FlyTo { .. }));
    }

    #[test]
    fn viewport_changes_rerender_without_changing_state() {
        let mut controller = ready();
        controller.handle(MapEvent::PointClicked("far".to_string()));

        let commands = controller.handle(MapEvent::ViewportChanged(Viewport {
            center: LngLat::new(-97.65, 30.25),
            zoom: 14.2,
            bounds: BoundingBox::new(-98.0, 30.0, -97.0, 31.0),
        }));
        let frame = rendered(&commands);
        assert_eq!(frame.zoom, 14);
        assert_eq!(frame.features.len(), 3);
        assert_eq!(frame.stats.total(), 4);
        assert!(matches!(
            controller.phase(),
            Phase::Ready(Interaction::PopupOpen(_))
        ));
    }

    #[test]
    fn viewport_before_load_is_remembered() {
        let mut controller = controller();
        assert!(
            controller
                .handle(MapEvent::ViewportChanged(Viewport::world(
                    LngLat::new(0.0, 0.0),
                    12.0
                )))
                .is_empty()
        );
        controller.handle(MapEvent::Start);
        let commands = controller.handle(MapEvent::FetchSucceeded {
            generation: 1,
            feed: feed(),
        });
        assert_eq!(rendered(&commands).zoom, 12);
    }

    #[test]
    fn filter_changes_update_stats_and_popup() {
        let mut controller = ready();
        controller.handle(MapEvent::PointClicked("far".to_string()));

        let commands = controller.handle(MapEvent::FilterChanged {
            category: PinCategory::Supporter,
            visible: false,
        });
        assert_eq!(rendered(&commands).stats.total(), 2);
        assert!(!commands.contains(&MapCommand::ClosePopup));

        let commands = controller.handle(MapEvent::FilterChanged {
            category: PinCategory::Struggling,
            visible: false,
        });
        assert_eq!(commands[0], MapCommand::ClosePopup);
        let frame = rendered(&commands);
        assert_eq!(frame.stats.total(), 1);
        assert_eq!(frame.stats.get(PinCategory::InMemory), 1);
        assert_eq!(frame.pin_count(), 1);
        assert_eq!(controller.stats(), frame.stats);
    }

    #[test]
    fn filter_before_load_applies_on_arrival() {
        let mut controller = controller();
        assert!(
            controller
                .handle(MapEvent::FilterChanged {
                    category: PinCategory::Struggling,
                    visible: false,
                })
                .is_empty()
        );
        controller.handle(MapEvent::Start);
        let commands = controller.handle(MapEvent::FetchSucceeded {
            generation: 1,
            feed: feed(),
        });
        assert_eq!(rendered(&commands).stats.total(), 3);
    }
}
