//! Async driver for a [`MapController`].
//!
//! The session runs feed fetches as tokio tasks and feeds their results
//! back into the controller. At most one fetch is in flight. Tearing the
//! session down (or dropping it) aborts that fetch. A fetch task that
//! panics is reported to the controller as a failed fetch.

use std::sync::Arc;
use std::time::Duration;

use movement_map_ingest::{IngestError, PinFeed};
use tokio::task::JoinHandle;

use crate::EngineError;
use crate::config::MapConfig;
use crate::controller::{MapCommand, MapController, MapEvent};

/// Owns a controller, its feed, and the in-flight fetch.
pub struct MapSession {
    controller: MapController,
    feed: Arc<dyn PinFeed>,
    timeout: Duration,
    /// Generation and task of the outstanding fetch.
    in_flight: Option<(u64, JoinHandle<MapEvent>)>,
}

impl MapSession {
    /// Wraps `controller`, fetching from `feed` with the given ceiling.
    #[must_use]
    pub fn new(controller: MapController, feed: Arc<dyn PinFeed>, timeout: Duration) -> Self {
        Self {
            controller,
            feed,
            timeout,
            in_flight: None,
        }
    }

    /// Builds a session from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cluster`] if the clustering options are invalid.
    pub fn from_config(config: &MapConfig, feed: Arc<dyn PinFeed>) -> Result<Self, EngineError> {
        Ok(Self::new(
            MapController::from_config(config)?,
            feed,
            config.feed.timeout(),
        ))
    }

    /// The controller being driven.
    #[must_use]
    pub const fn controller(&self) -> &MapController {
        &self.controller
    }

    /// Whether a fetch is outstanding.
    #[must_use]
    pub const fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Starts the first load.
    pub fn start(&mut self) -> Vec<MapCommand> {
        self.dispatch(MapEvent::Start)
    }

    /// Retries after a failed load.
    pub fn retry(&mut self) -> Vec<MapCommand> {
        self.dispatch(MapEvent::Retry)
    }

    /// Passes an event to the controller and starts any fetch it asks for.
    ///
    /// `Fetch` commands are handled here and also returned, so the caller
    /// can show a loading state.
    pub fn dispatch(&mut self, event: MapEvent) -> Vec<MapCommand> {
        let commands = self.controller.handle(event);
        for command in &commands {
            if let MapCommand::Fetch { generation } = command {
                self.spawn_fetch(*generation);
            }
        }
        commands
    }

    /// Waits for the outstanding fetch and applies its result.
    ///
    /// Returns `None` when nothing is in flight or the session is closed.
    /// Cancel safe: dropping the future leaves the fetch outstanding.
    pub async fn next(&mut self) -> Option<Vec<MapCommand>> {
        let (generation, task) = self.in_flight.as_mut()?;
        let generation = *generation;
        let result = task.await;
        self.in_flight = None;

        let event = result.unwrap_or_else(|e| {
            log::error!("Pin fetch {generation} task failed: {e}");
            MapEvent::FetchFailed {
                generation,
                message: format!("Pin fetch failed: {e}"),
            }
        });
        Some(self.dispatch(event))
    }

    /// Aborts any fetch and closes the controller.
    pub fn teardown(&mut self) {
        if let Some((_, task)) = self.in_flight.take() {
            log::debug!("Aborting in-flight pin fetch");
            task.abort();
        }
        self.controller.handle(MapEvent::Teardown);
    }

    fn spawn_fetch(&mut self, generation: u64) {
        if let Some((_, previous)) = self.in_flight.take() {
            previous.abort();
        }

        let feed = Arc::clone(&self.feed);
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            let result =
                tokio::time::timeout(timeout, movement_map_ingest::load(feed.as_ref())).await;

            match result {
                Ok(Ok(feed)) => MapEvent::FetchSucceeded { generation, feed },
                Ok(Err(e)) => MapEvent::FetchFailed {
                    generation,
                    message: e.to_string(),
                },
                Err(_) => {
                    let e = IngestError::Timeout {
                        seconds: timeout.as_secs(),
                    };
                    log::error!("Pin fetch {generation} from {}: {e}", feed.describe());
                    MapEvent::FetchFailed {
                        generation,
                        message: e.to_string(),
                    }
                }
            }
        });
        self.in_flight = Some((generation, task));
    }
}

impl Drop for MapSession {
    fn drop(&mut self) {
        if let Some((_, task)) = self.in_flight.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use movement_map_cluster::ClusterOptions;
    use movement_map_ingest::{FeedDocument, StaticFeed, parse_document};
    use movement_map_pin_models::LngLat;

    use super::*;
    use crate::controller::Phase;
    use crate::frame::{Viewport, zoom_level};

    const BODY: &str = r#"[
        {"id": "1", "category": "supporter", "lat": 30.2, "lng": -97.7},
        {"id": "2", "category": "supporter", "lat": 30.3, "lng": -97.6},
        {"id": "3", "category": "supporter", "lat": null, "lng": -97.6}
    ]"#;

    /// Fails on the first call, then serves [`BODY`].
    struct FlakyFeed {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PinFeed for FlakyFeed {
        fn describe(&self) -> String {
            "flaky".to_string()
        }

        async fn fetch(&self) -> Result<FeedDocument, IngestError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(IngestError::Status { status: 502 })
            } else {
                parse_document(BODY)
            }
        }
    }

    /// Never answers in test time.
    struct SlowFeed;

    #[async_trait]
    impl PinFeed for SlowFeed {
        fn describe(&self) -> String {
            "slow".to_string()
        }

        async fn fetch(&self) -> Result<FeedDocument, IngestError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            parse_document(BODY)
        }
    }

    /// Panics inside the fetch task.
    struct BrokenFeed;

    #[async_trait]
    impl PinFeed for BrokenFeed {
        fn describe(&self) -> String {
            "broken".to_string()
        }

        async fn fetch(&self) -> Result<FeedDocument, IngestError> {
            panic!("feed exploded");
        }
    }

    fn session(feed: Arc<dyn PinFeed>, timeout: Duration) -> MapSession {
        let controller = MapController::new(
            ClusterOptions::default(),
            Viewport::world(LngLat::new(-97.0, 30.0), 3.0),
        )
        .unwrap();
        MapSession::new(controller, feed, timeout)
    }

    #[tokio::test]
    async fn loads_and_renders() {
        let mut session = session(Arc::new(StaticFeed::new(BODY)), Duration::from_secs(5));
        assert_eq!(session.start(), vec![MapCommand::Fetch { generation: 1 }]);
        assert!(session.is_fetching());

        let commands = session.next().await.unwrap();
        let [MapCommand::Render(frame)] = commands.as_slice() else {
            panic!("expected a render, got {commands:?}");
        };
        assert_eq!(frame.stats.total(), 2);
        assert!(!session.is_fetching());
        assert!(session.next().await.is_none());

        let snapshot = session.controller().snapshot().unwrap();
        assert_eq!(snapshot.data().report().missing_coordinates, 1);
    }

    #[tokio::test]
    async fn failure_then_manual_retry() {
        let mut session = session(
            Arc::new(FlakyFeed {
                calls: AtomicUsize::new(0),
            }),
            Duration::from_secs(5),
        );
        session.start();

        let commands = session.next().await.unwrap();
        assert!(matches!(commands.as_slice(), [MapCommand::ShowError { .. }]));
        assert!(matches!(session.controller().phase(), Phase::Error { .. }));
        assert!(session.next().await.is_none());

        assert_eq!(session.retry(), vec![MapCommand::Fetch { generation: 2 }]);
        let commands = session.next().await.unwrap();
        assert!(matches!(commands.as_slice(), [MapCommand::Render(_)]));
    }

    #[tokio::test]
    async fn slow_feeds_time_out_into_error() {
        let mut session = session(Arc::new(SlowFeed), Duration::from_millis(20));
        session.start();

        let commands = session.next().await.unwrap();
        let [MapCommand::ShowError { message }] = commands.as_slice() else {
            panic!("expected an error, got {commands:?}");
        };
        assert!(message.contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_fetch_surfaces_as_error() {
        let mut session = session(Arc::new(BrokenFeed), Duration::from_secs(5));
        session.start();

        let commands = session.next().await.unwrap();
        assert!(matches!(commands.as_slice(), [MapCommand::ShowError { .. }]));
        assert!(matches!(session.controller().phase(), Phase::Error { .. }));
        assert!(!session.is_fetching());
        assert_eq!(session.retry(), vec![MapCommand::Fetch { generation: 2 }]);
    }

    #[tokio::test]
    async fn from_config_uses_configured_view() {
        let config = MapConfig::default();
        let mut session =
            MapSession::from_config(&config, Arc::new(StaticFeed::new(BODY))).unwrap();
        session.start();

        let commands = session.next().await.unwrap();
        let [MapCommand::Render(frame)] = commands.as_slice() else {
            panic!("expected a render, got {commands:?}");
        };
        assert_eq!(frame.zoom, zoom_level(config.view.zoom));
    }

    #[tokio::test]
    async fn teardown_discards_pending_fetch() {
        let mut session = session(Arc::new(SlowFeed), Duration::from_secs(60));
        session.start();
        session.teardown();

        assert!(!session.is_fetching());
        assert!(session.next().await.is_none());
        assert_eq!(session.controller().phase(), &Phase::Closed);
        assert!(session.start().is_empty());
    }
}
