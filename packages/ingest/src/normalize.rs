//! Raw record validation.
//!
//! Converts [`RawPin`] records into [`Pin`]s. A record is dropped (and
//! counted) when it isn't an object, has no id, names an unknown
//! category, lacks a coordinate, or has one outside WGS84 bounds. Only
//! the first record with a given id is kept. Bad metadata (names, places,
//! story links, timestamps) is cleared rather than dropping the pin.

use std::collections::BTreeSet;

use movement_map_pin_models::{LngLat, Pin, PinCategory, RawPin};
use serde::Serialize;

use crate::NormalizedFeed;

/// Tally of what happened to each record in a feed.
///
/// `received` always equals `accepted` plus the sum of the drop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// Records in the document.
    pub received: u64,
    /// Records that became pins.
    pub accepted: u64,
    /// Records that aren't objects or have a mistyped id, category, or
    /// coordinate.
    pub malformed: u64,
    /// Records without an id.
    pub missing_id: u64,
    /// Records whose id was already seen.
    pub duplicate_ids: u64,
    /// Records with a missing or unrecognized category.
    pub unknown_category: u64,
    /// Records with a null, missing, or non-numeric coordinate.
    pub missing_coordinates: u64,
    /// Records with a coordinate outside ±90 lat / ±180 lon.
    pub out_of_range_coordinates: u64,
}

impl IngestReport {
    /// Total records dropped for any reason.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.malformed
            + self.missing_id
            + self.duplicate_ids
            + self.unknown_category
            + self.missing_coordinates
            + self.out_of_range_coordinates
    }
}

/// Why a single record was rejected.
enum Rejection {
    MissingId,
    UnknownCategory(Option<String>),
    MissingCoordinates,
    OutOfRange(LngLat),
}

/// Validates every record, keeping feed order.
#[must_use]
pub fn normalize(records: Vec<serde_json::Value>) -> NormalizedFeed {
    let mut report = IngestReport {
        received: records.len() as u64,
        ..IngestReport::default()
    };
    let mut seen = BTreeSet::new();
    let mut pins = Vec::with_capacity(records.len());

    for (i, value) in records.into_iter().enumerate() {
        let raw: RawPin = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("Record {i}: malformed ({e})");
                report.malformed += 1;
                continue;
            }
        };

        match to_pin(raw) {
            Ok(pin) => {
                if seen.insert(pin.id.clone()) {
                    pins.push(pin);
                } else {
                    log::debug!("Record {i}: duplicate id {}", pin.id);
                    report.duplicate_ids += 1;
                }
            }
            Err(Rejection::MissingId) => {
                log::debug!("Record {i}: no id");
                report.missing_id += 1;
            }
            Err(Rejection::UnknownCategory(category)) => {
                log::debug!("Record {i}: unknown category {category:?}");
                report.unknown_category += 1;
            }
            Err(Rejection::MissingCoordinates) => {
                log::debug!("Record {i}: missing coordinates");
                report.missing_coordinates += 1;
            }
            Err(Rejection::OutOfRange(location)) => {
                log::debug!(
                    "Record {i}: coordinates out of range (lat {}, lng {})",
                    location.lat,
                    location.lng
                );
                report.out_of_range_coordinates += 1;
            }
        }
    }

    report.accepted = pins.len() as u64;

    if report.dropped() > 0 {
        log::warn!(
            "Loaded {} of {} pins; dropped {} malformed, {} without id, {} duplicate, \
             {} unknown category, {} missing coordinates, {} out of range",
            report.accepted,
            report.received,
            report.malformed,
            report.missing_id,
            report.duplicate_ids,
            report.unknown_category,
            report.missing_coordinates,
            report.out_of_range_coordinates,
        );
    } else {
        log::info!("Loaded {} pins", report.accepted);
    }

    NormalizedFeed { pins, report }
}

fn to_pin(raw: RawPin) -> Result<Pin, Rejection> {
    let id = raw
        .id
        .as_ref()
        .map(|id| id.to_string().trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(Rejection::MissingId)?;

    let category = match raw.category.as_deref().map(str::trim) {
        Some(tag) => tag
            .parse::<PinCategory>()
            .map_err(|_| Rejection::UnknownCategory(Some(tag.to_string())))?,
        None => return Err(Rejection::UnknownCategory(None)),
    };

    let (Some(lat), Some(lng)) = (
        raw.lat.as_ref().and_then(|c| c.value()),
        raw.lng.as_ref().and_then(|c| c.value()),
    ) else {
        return Err(Rejection::MissingCoordinates);
    };
    let location = LngLat::new(lng, lat);
    if !location.is_valid() {
        return Err(Rejection::OutOfRange(location));
    }

    let submitted_at = raw.submitted_at().unwrap_or_else(|text| {
        log::debug!("Pin {id}: ignoring unparseable timestamp {text:?}");
        None
    });

    Ok(Pin {
        id,
        category,
        name: non_blank(raw.name),
        location,
        city: non_blank(raw.city),
        state: non_blank(raw.state),
        story_title: non_blank(raw.story_title),
        story_slug: non_blank(raw.story_slug),
        submitted_at,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use movement_map_pin_models::PLACEHOLDER_NAME;
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_valid_records_in_order() {
        let feed = normalize(vec![
            json!({"id": "b", "category": "story-sharer", "name": " Ana ", "lat": 40.7, "lng": -74.0,
                   "city": "New York", "state": "NY", "story_title": "Ana's story", "story_slug": "anas-story"}),
            json!({"id": 3, "type": "in_memory", "latitude": "34.05", "longitude": -118.24}),
        ]);

        assert_eq!(feed.report.accepted, 2);
        assert_eq!(feed.report.dropped(), 0);
        assert_eq!(feed.pins[0].id, "b");
        assert_eq!(feed.pins[0].name.as_deref(), Some("Ana"));
        assert_eq!(feed.pins[0].story_path().as_deref(), Some("/stories/anas-story"));
        assert_eq!(feed.pins[1].id, "3");
        assert_eq!(feed.pins[1].category, PinCategory::InMemory);
        assert_eq!(feed.pins[1].label(), PLACEHOLDER_NAME);
    }

    #[test]
    fn drops_and_counts_bad_records() {
        let feed = normalize(vec![
            json!({"id": "ok", "category": "supporter", "lat": 1.0, "lng": 1.0}),
            json!({"id": "lat999", "category": "supporter", "lat": 999.0, "lng": 1.0}),
            json!({"id": "lngnull", "category": "supporter", "lat": 1.0, "lng": null}),
            json!({"id": "nolat", "category": "supporter", "lng": 1.0}),
            json!({"id": "text", "category": "supporter", "lat": "north", "lng": 1.0}),
            json!({"id": "cat", "category": "volunteer", "lat": 1.0, "lng": 1.0}),
            json!({"id": "nocat", "lat": 1.0, "lng": 1.0}),
            json!({"category": "supporter", "lat": 1.0, "lng": 1.0}),
            json!({"id": "ok", "category": "struggling", "lat": 2.0, "lng": 2.0}),
            json!({"id": "badname", "category": "supporter", "lat": 1.0, "lng": 1.0, "name": 12}),
            json!("not an object"),
        ]);

        let report = feed.report;
        assert_eq!(report.received, 11);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.out_of_range_coordinates, 1);
        assert_eq!(report.missing_coordinates, 3);
        assert_eq!(report.unknown_category, 2);
        assert_eq!(report.missing_id, 1);
        assert_eq!(report.duplicate_ids, 1);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.received, report.accepted + report.dropped());

        assert_eq!(feed.pins.len(), 2);
        assert_eq!(feed.pins[0].category, PinCategory::Supporter);
        assert_eq!(feed.pins[1].id, "badname");
    }

    #[test]
    fn mistyped_metadata_degrades_to_placeholders() {
        let feed = normalize(vec![
            json!({"id": "n", "category": "supporter", "lat": 30, "lng": -97, "name": 12}),
            json!({"id": "t", "category": "supporter", "lat": 30, "lng": -97,
                   "created_at": "yesterday"}),
            json!({"id": "c", "category": "supporter", "lat": 30, "lng": -97, "city": false,
                   "slug": 5, "submitted_at": "2024-03-01T08:30:00Z"}),
        ]);

        assert_eq!(feed.report.accepted, 3);
        assert_eq!(feed.report.dropped(), 0);
        assert!(feed.pins.iter().all(|p| p.label() == PLACEHOLDER_NAME));
        assert_eq!(feed.pins[1].submitted_at, None);
        assert_eq!(feed.pins[2].city, None);
        assert_eq!(feed.pins[2].story_path(), None);
        assert!(feed.pins[2].submitted_at.is_some());
    }

    #[test]
    fn empty_feed_is_not_an_error() {
        let feed = normalize(Vec::new());
        assert!(feed.pins.is_empty());
        assert_eq!(feed.report, IngestReport::default());
    }
}
