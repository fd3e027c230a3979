#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pin category taxonomy and pin record types for the movement map.
//!
//! Every submission shown on the map is a [`Pin`]: a validated location
//! tagged with one [`PinCategory`]. The feed delivers [`RawPin`] records
//! whose fields are all optional; the ingestion crate turns those into
//! pins and drops anything without a usable coordinate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::ser::SerializeMap as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};

/// Label shown for pins whose submitter left no display name.
pub const PLACEHOLDER_NAME: &str = "Anonymous";

/// The kind of participation a pin represents.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum PinCategory {
    /// Someone currently struggling
    #[serde(alias = "STRUGGLING")]
    Struggling,
    /// A pin placed in memory of someone
    #[serde(alias = "in_memory", alias = "inMemory", alias = "IN_MEMORY")]
    #[strum(to_string = "in-memory", serialize = "in_memory", serialize = "inMemory")]
    InMemory,
    /// A supporter of the movement
    #[serde(alias = "SUPPORTER")]
    Supporter,
    /// Someone who shared a story
    #[serde(alias = "story_sharer", alias = "storySharer", alias = "STORY_SHARER")]
    #[strum(
        to_string = "story-sharer",
        serialize = "story_sharer",
        serialize = "storySharer"
    )]
    StorySharer,
}

impl PinCategory {
    /// Number of categories. Used to size dense per-category arrays.
    pub const COUNT: usize = 4;

    /// Returns all variants of this enum, in legend order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Struggling,
            Self::InMemory,
            Self::Supporter,
            Self::StorySharer,
        ]
    }

    /// Dense index of this category in `0..Self::COUNT`.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable legend label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Struggling => "Struggling",
            Self::InMemory => "In Memory",
            Self::Supporter => "Supporter",
            Self::StorySharer => "Story Sharer",
        }
    }

    /// Marker color for this category as a hex string.
    ///
    /// Rendering only; never used to infer the category back.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Struggling => "#f97316",
            Self::InMemory => "#8b5cf6",
            Self::Supporter => "#0ea5e9",
            Self::StorySharer => "#22c55e",
        }
    }
}

/// A longitude/latitude pair in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    /// Longitude, -180 to 180.
    pub lng: f64,
    /// Latitude, -90 to 90.
    pub lat: f64,
}

impl LngLat {
    /// Creates a new coordinate pair.
    #[must_use]
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Whether both components are finite and within WGS84 bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

/// A geographic bounding box in WGS84 coordinates.
///
/// `west > east` means the box crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// The whole world.
    #[must_use]
    pub const fn world() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    /// Whether this box wraps across the 180th meridian.
    #[must_use]
    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }
}

/// Error returned when a bounding box string can't be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid bounding box {input:?}: expected west,south,east,north")]
pub struct InvalidBoundingBoxError {
    /// The input that failed to parse.
    pub input: String,
}

impl FromStr for BoundingBox {
    type Err = InvalidBoundingBoxError;

    /// Parses `"west,south,east,north"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidBoundingBoxError {
            input: s.to_string(),
        };
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| err())?;

        let [west, south, east, north] = parts[..] else {
            return Err(err());
        };
        if !parts.iter().all(|v| v.is_finite()) || south > north {
            return Err(err());
        }

        Ok(Self::new(west, south, east, north))
    }
}

/// A validated pin ready for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    /// Unique submission identifier from the feed.
    pub id: String,
    /// Participation category.
    pub category: PinCategory,
    /// Display name as submitted. `None` when absent or blank.
    pub name: Option<String>,
    /// Pin location.
    pub location: LngLat,
    /// City for popup text.
    pub city: Option<String>,
    /// State or region for popup text.
    pub state: Option<String>,
    /// Title of the linked story, if the pin belongs to one.
    pub story_title: Option<String>,
    /// Slug of the linked story.
    pub story_slug: Option<String>,
    /// When the pin was submitted.
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Pin {
    /// The display name, or [`PLACEHOLDER_NAME`] when there is none.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(PLACEHOLDER_NAME)
    }

    /// Marker color derived from the category.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        self.category.color()
    }

    /// `"City, ST"`, or whichever half is present.
    #[must_use]
    pub fn locality(&self) -> Option<String> {
        let city = self.city.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let state = self.state.as_deref().map(str::trim).filter(|s| !s.is_empty());
        match (city, state) {
            (Some(city), Some(state)) => Some(format!("{city}, {state}")),
            (Some(part), None) | (None, Some(part)) => Some(part.to_string()),
            (None, None) => None,
        }
    }

    /// Site path of the linked story.
    #[must_use]
    pub fn story_path(&self) -> Option<String> {
        self.story_slug
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|slug| format!("/stories/{slug}"))
    }
}

/// A pin identifier as it appears on the wire: string or number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPinId {
    /// String identifier (UUIDs, slugs).
    Text(String),
    /// Integer primary key.
    Number(i64),
}

impl fmt::Display for RawPinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// A coordinate component as it appears on the wire.
///
/// Some hosted databases return `numeric` columns as strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawCoordinate {
    /// Plain JSON number.
    Number(f64),
    /// Numeric string.
    Text(String),
}

impl RawCoordinate {
    /// The numeric value, if this is a number or a parseable string.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// A point record exactly as delivered by the feed.
///
/// Every field is optional so that one bad record never fails the whole
/// document. Metadata fields of the wrong JSON type decode as `None`
/// instead of failing the record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPin {
    /// Submission identifier.
    pub id: Option<RawPinId>,
    /// Category tag.
    #[serde(alias = "type", alias = "pin_type", alias = "pinType")]
    pub category: Option<String>,
    /// Display name.
    #[serde(
        default,
        deserialize_with = "deserialize_text",
        alias = "display_name",
        alias = "displayName"
    )]
    pub name: Option<String>,
    /// Latitude.
    #[serde(alias = "latitude")]
    pub lat: Option<RawCoordinate>,
    /// Longitude.
    #[serde(alias = "lon", alias = "longitude")]
    pub lng: Option<RawCoordinate>,
    /// City.
    #[serde(default, deserialize_with = "deserialize_text")]
    pub city: Option<String>,
    /// State or region.
    #[serde(default, deserialize_with = "deserialize_text")]
    pub state: Option<String>,
    /// Linked story title.
    #[serde(
        default,
        deserialize_with = "deserialize_text",
        alias = "title",
        alias = "storyTitle"
    )]
    pub story_title: Option<String>,
    /// Linked story slug.
    #[serde(
        default,
        deserialize_with = "deserialize_text",
        alias = "slug",
        alias = "storySlug"
    )]
    pub story_slug: Option<String>,
    /// Submission timestamp, unparsed. See [`RawPin::submitted_at`].
    #[serde(
        default,
        rename = "submitted_at",
        deserialize_with = "deserialize_text",
        alias = "created_at",
        alias = "createdAt",
        alias = "submittedAt"
    )]
    pub submitted_at_text: Option<String>,
}

impl RawPin {
    /// The submission timestamp, if present and parseable as RFC 3339.
    ///
    /// # Errors
    ///
    /// Returns the unparseable text when a timestamp is present but
    /// invalid.
    pub fn submitted_at(&self) -> Result<Option<DateTime<Utc>>, &str> {
        match self.submitted_at_text.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => text.parse::<DateTime<Utc>>().map(Some).map_err(|_| text),
        }
    }
}

/// Reads an optional string, treating any other JSON type as absent.
fn deserialize_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeText {
        Text(String),
        Other(IgnoredAny),
    }

    Ok(match Option::<MaybeText>::deserialize(deserializer)? {
        Some(MaybeText::Text(text)) => Some(text),
        Some(MaybeText::Other(_)) | None => None,
    })
}

/// Dense per-category counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CategoryCounts([u64; PinCategory::COUNT]);

impl CategoryCounts {
    /// An all-zero counter.
    #[must_use]
    pub const fn new() -> Self {
        Self([0; PinCategory::COUNT])
    }

    /// A counter holding a single pin of `category`.
    #[must_use]
    pub const fn single(category: PinCategory) -> Self {
        let mut counts = [0; PinCategory::COUNT];
        counts[category.index()] = 1;
        Self(counts)
    }

    /// Count for one category.
    #[must_use]
    pub const fn get(&self, category: PinCategory) -> u64 {
        self.0[category.index()]
    }

    /// Adds `n` to the count for `category`.
    pub fn add(&mut self, category: PinCategory, n: u64) {
        self.0[category.index()] += n;
    }

    /// Adds every count from `other` into this counter.
    pub fn merge(&mut self, other: &Self) {
        for (mine, theirs) in self.0.iter_mut().zip(other.0) {
            *mine += theirs;
        }
    }

    /// Sum across all categories.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// Iterates `(category, count)` in legend order, zeros included.
    pub fn iter(&self) -> impl Iterator<Item = (PinCategory, u64)> + '_ {
        PinCategory::all().iter().map(|c| (*c, self.get(*c)))
    }
}

impl Serialize for CategoryCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(PinCategory::COUNT))?;
        for (category, count) in self.iter() {
            map.serialize_entry(category.as_ref(), &count)?;
        }
        map.end()
    }
}

/// Total and per-category counts over a set of pins.
///
/// Only constructible from a [`CategoryCounts`], so `total` always equals
/// the sum of the breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    total: u64,
    by_category: CategoryCounts,
}

impl Stats {
    /// Derives stats from a per-category breakdown.
    #[must_use]
    pub fn from_counts(by_category: CategoryCounts) -> Self {
        Self {
            total: by_category.total(),
            by_category,
        }
    }

    /// Total pin count.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Count for one category.
    #[must_use]
    pub const fn get(&self, category: PinCategory) -> u64 {
        self.by_category.get(category)
    }

    /// The per-category breakdown.
    #[must_use]
    pub const fn by_category(&self) -> &CategoryCounts {
        &self.by_category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_wire_names_roundtrip() {
        for category in PinCategory::all() {
            let parsed: PinCategory = category.as_ref().parse().unwrap();
            assert_eq!(parsed, *category);
        }
        assert_eq!(PinCategory::InMemory.to_string(), "in-memory");
        assert_eq!(
            "story_sharer".parse::<PinCategory>().unwrap(),
            PinCategory::StorySharer
        );
        assert_eq!(
            "SUPPORTER".parse::<PinCategory>().unwrap(),
            PinCategory::Supporter
        );
        assert!("volunteer".parse::<PinCategory>().is_err());
    }

    #[test]
    fn category_indexes_are_dense() {
        for (i, category) in PinCategory::all().iter().enumerate() {
            assert_eq!(category.index(), i);
        }
        assert_eq!(PinCategory::all().len(), PinCategory::COUNT);
    }

    #[test]
    fn coordinate_validity() {
        assert!(LngLat::new(-98.5, 39.8).is_valid());
        assert!(LngLat::new(180.0, -90.0).is_valid());
        assert!(!LngLat::new(0.0, 999.0).is_valid());
        assert!(!LngLat::new(-180.5, 0.0).is_valid());
        assert!(!LngLat::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn bbox_parse() {
        let bbox: BoundingBox = "-100, 30, -90, 40".parse().unwrap();
        assert_eq!(bbox, BoundingBox::new(-100.0, 30.0, -90.0, 40.0));
        assert!(!bbox.crosses_antimeridian());
        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("0,50,10,40".parse::<BoundingBox>().is_err());

        let wrapped = BoundingBox::new(170.0, -10.0, -170.0, 10.0);
        assert!(wrapped.crosses_antimeridian());

        let err = "1,2,3".parse::<BoundingBox>().unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"invalid bounding box "1,2,3": expected west,south,east,north"#
        );
    }

    #[test]
    fn label_falls_back_to_placeholder() {
        let mut pin = Pin {
            id: "1".to_string(),
            category: PinCategory::Supporter,
            name: Some("   ".to_string()),
            location: LngLat::new(0.0, 0.0),
            city: Some("Austin".to_string()),
            state: None,
            story_title: None,
            story_slug: None,
            submitted_at: None,
        };
        assert_eq!(pin.label(), PLACEHOLDER_NAME);
        assert_eq!(pin.locality().as_deref(), Some("Austin"));

        pin.name = Some("Sam".to_string());
        pin.state = Some("TX".to_string());
        assert_eq!(pin.label(), "Sam");
        assert_eq!(pin.locality().as_deref(), Some("Austin, TX"));
        assert_eq!(pin.color(), "#0ea5e9");
    }

    #[test]
    fn raw_pin_accepts_aliases_and_string_coordinates() {
        let raw: RawPin = serde_json::from_str(
            r#"{"id": 7, "type": "in_memory", "display_name": "Lee",
                "latitude": "41.5", "longitude": -87.25, "slug": "lees-story"}"#,
        )
        .unwrap();
        assert_eq!(raw.id.unwrap().to_string(), "7");
        assert_eq!(raw.category.as_deref(), Some("in_memory"));
        assert_eq!(raw.lat.and_then(|c| c.value()), Some(41.5));
        assert_eq!(raw.lng.and_then(|c| c.value()), Some(-87.25));
        assert_eq!(raw.story_slug.as_deref(), Some("lees-story"));
    }

    #[test]
    fn raw_pin_tolerates_mistyped_metadata() {
        let raw: RawPin = serde_json::from_str(
            r#"{"id": "x", "category": "supporter", "lat": 30, "lng": -97,
                "name": 12, "city": false, "state": ["TX"], "title": {"a": 1},
                "created_at": "yesterday"}"#,
        )
        .unwrap();
        assert_eq!(raw.name, None);
        assert_eq!(raw.city, None);
        assert_eq!(raw.state, None);
        assert_eq!(raw.story_title, None);
        assert_eq!(raw.submitted_at(), Err("yesterday"));

        let raw: RawPin =
            serde_json::from_str(r#"{"submittedAt": "2024-05-01T12:00:00Z", "name": null}"#)
                .unwrap();
        assert_eq!(raw.name, None);
        assert_eq!(
            raw.submitted_at().unwrap().map(|t| t.to_rfc3339()).as_deref(),
            Some("2024-05-01T12:00:00+00:00")
        );
        assert_eq!(RawPin::default().submitted_at(), Ok(None));
    }

    #[test]
    fn stats_total_matches_breakdown() {
        let mut counts = CategoryCounts::single(PinCategory::Supporter);
        counts.add(PinCategory::StorySharer, 4);
        counts.merge(&CategoryCounts::single(PinCategory::Supporter));
        let stats = Stats::from_counts(counts);
        assert_eq!(stats.total(), 6);
        assert_eq!(stats.get(PinCategory::Supporter), 2);
        assert_eq!(
            stats.total(),
            PinCategory::all().iter().map(|c| stats.get(*c)).sum::<u64>()
        );

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["total"], 6);
        assert_eq!(json["byCategory"]["story-sharer"], 4);
        assert_eq!(json["byCategory"]["in-memory"], 0);
    }
}
