//! Map configuration.
//!
//! Defaults live in `config/map.toml`, embedded at compile time. A file
//! named by `MOVEMENT_MAP_CONFIG` replaces them, and
//! `MOVEMENT_MAP_FEED_URL` overrides the feed URL last.

use std::path::Path;

use movement_map_cluster::ClusterOptions;
use movement_map_ingest::FeedConfig;
use movement_map_pin_models::LngLat;
use serde::Deserialize;

/// Embedded default configuration.
pub const DEFAULT_CONFIG: &str = include_str!("../config/map.toml");

/// Environment variable naming a config file to load instead of the defaults.
pub const CONFIG_PATH_ENV: &str = "MOVEMENT_MAP_CONFIG";

/// Environment variable overriding `feed.url`.
pub const FEED_URL_ENV: &str = "MOVEMENT_MAP_FEED_URL";

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading the config file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file isn't valid TOML for this layout.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The values parse but can't be used.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] movement_map_cluster::ClusterError),
}

/// Initial camera position.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Center longitude.
    pub longitude: f64,
    /// Center latitude.
    pub latitude: f64,
    /// Zoom level.
    pub zoom: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            longitude: -98.5795,
            latitude: 39.8283,
            zoom: 3.0,
        }
    }
}

impl ViewConfig {
    /// Center as a coordinate pair.
    #[must_use]
    pub const fn center(&self) -> LngLat {
        LngLat::new(self.longitude, self.latitude)
    }
}

/// Complete map configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Where pins come from.
    pub feed: FeedConfig,
    /// Radius-merge tuning.
    pub clustering: ClusterOptions,
    /// Initial camera.
    pub view: ViewConfig,
}

impl MapConfig {
    /// Parses a TOML document and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] on parse failure or
    /// [`ConfigError::Invalid`] if the clustering options are unusable.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.clustering.validate()?;
        Ok(config)
    }

    /// Reads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file can't be read, parsed, or
    /// validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }

    /// Loads the embedded defaults, an optional file, then env overrides.
    ///
    /// An explicit `path` wins over `MOVEMENT_MAP_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the chosen file can't be read, parsed,
    /// or validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok();
        let mut config = match path.or_else(|| env_path.as_deref().map(Path::new)) {
            Some(path) => {
                log::info!("Loading map config from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::from_toml(DEFAULT_CONFIG)?,
        };

        if let Ok(url) = std::env::var(FEED_URL_ENV) {
            if !url.trim().is_empty() {
                config.feed.url = Some(url.trim().to_string());
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_match_default_impl() {
        let config = MapConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, MapConfig::default());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let config = MapConfig::from_toml(
            r#"
            [feed]
            url = "https://example.org/pins"

            [clustering]
            max_zoom = 14
            "#,
        )
        .unwrap();
        assert_eq!(config.feed.url.as_deref(), Some("https://example.org/pins"));
        assert_eq!(config.feed.timeout_secs, 30);
        assert_eq!(config.clustering.max_zoom, 14);
        assert!((config.clustering.radius - 50.0).abs() < f64::EPSILON);
        assert_eq!(config.view, ViewConfig::default());
    }

    #[test]
    fn invalid_clustering_is_rejected() {
        let result = MapConfig::from_toml(
            r"
            [clustering]
            min_zoom = 10
            max_zoom = 2
            ",
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        assert!(matches!(
            MapConfig::from_toml("[clustering]\nradius = \"wide\""),
            Err(ConfigError::Toml(_))
        ));
    }
}
