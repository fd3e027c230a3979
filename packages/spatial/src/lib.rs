#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index for map pins.
//!
//! Projects every pin into the Web-Mercator unit square once, then builds
//! an R-tree over the projected coordinates. The index is rebuilt only
//! when the pin set changes; zoom and filter changes reuse it. Radius
//! queries feed the clustering engine and bounding-box queries serve
//! viewport lookups.

use geo::{Coord, Rect};
use movement_map_pin_models::{BoundingBox, LngLat, Pin, PinCategory};
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};

/// A projected point in the R-tree, tagged with its position in the pin slice.
pub type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Projects a coordinate into the Web-Mercator unit square.
///
/// `x` grows eastward from 0 at -180°, `y` grows southward from 0 at the
/// top of the map. Latitudes beyond the Mercator limit clamp to the edge.
#[must_use]
pub fn project(point: LngLat) -> [f64; 2] {
    [lng_x(point.lng), lat_y(point.lat)]
}

/// Inverse of [`project`].
#[must_use]
pub fn unproject(xy: [f64; 2]) -> LngLat {
    LngLat::new(x_lng(xy[0]), y_lat(xy[1]))
}

fn lng_x(lng: f64) -> f64 {
    lng / 360.0 + 0.5
}

fn lat_y(lat: f64) -> f64 {
    let sin = lat.to_radians().sin();
    let y = 0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / std::f64::consts::PI;
    y.clamp(0.0, 1.0)
}

fn x_lng(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

fn y_lat(y: f64) -> f64 {
    let y2 = (180.0 - y * 360.0).to_radians();
    360.0 * y2.exp().atan() / std::f64::consts::PI - 90.0
}

/// Converts a geographic bounding box into one or two projected
/// rectangles (two when the box crosses the antimeridian).
#[must_use]
pub fn projected_rects(bbox: &BoundingBox) -> Vec<Rect<f64>> {
    let south = lat_y(bbox.south);
    let north = lat_y(bbox.north);

    if bbox.crosses_antimeridian() {
        vec![
            Rect::new(
                Coord { x: lng_x(bbox.west), y: north },
                Coord { x: 1.0, y: south },
            ),
            Rect::new(
                Coord { x: 0.0, y: north },
                Coord { x: lng_x(bbox.east), y: south },
            ),
        ]
    } else {
        vec![Rect::new(
            Coord { x: lng_x(bbox.west), y: north },
            Coord { x: lng_x(bbox.east), y: south },
        )]
    }
}

/// R-tree envelopes covering a geographic bounding box.
#[must_use]
pub fn envelopes(bbox: &BoundingBox) -> Vec<AABB<[f64; 2]>> {
    projected_rects(bbox).iter().map(rect_envelope).collect()
}

fn rect_envelope(rect: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// Pre-built spatial index over every valid pin.
///
/// Positions returned by queries are indexes into the pin slice the index
/// was built from. Pins with invalid coordinates are left out of the tree
/// entirely.
pub struct PointIndex {
    coords: Vec<[f64; 2]>,
    categories: Vec<PinCategory>,
    indexed: Vec<bool>,
    tree: RTree<IndexedPoint>,
}

impl PointIndex {
    /// Projects the pins and bulk-loads the R-tree.
    #[must_use]
    pub fn build(pins: &[Pin]) -> Self {
        let mut coords = Vec::with_capacity(pins.len());
        let mut categories = Vec::with_capacity(pins.len());
        let mut indexed = Vec::with_capacity(pins.len());
        let mut entries = Vec::with_capacity(pins.len());

        for (i, pin) in pins.iter().enumerate() {
            let valid = pin.location.is_valid();
            let xy = if valid {
                project(pin.location)
            } else {
                log::warn!("Pin {} has invalid coordinates, not indexing", pin.id);
                [f64::NAN, f64::NAN]
            };
            coords.push(xy);
            categories.push(pin.category);
            indexed.push(valid);
            if valid {
                entries.push(IndexedPoint::new(xy, i));
            }
        }

        let tree = RTree::bulk_load(entries);
        log::debug!("Indexed {} of {} pins", tree.size(), pins.len());

        Self {
            coords,
            categories,
            indexed,
            tree,
        }
    }

    /// Number of pins in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the tree holds no pins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Number of positions (indexed or not) this index was built over.
    #[must_use]
    pub fn positions(&self) -> usize {
        self.coords.len()
    }

    /// Whether the pin at `position` is in the tree.
    #[must_use]
    pub fn is_indexed(&self, position: usize) -> bool {
        self.indexed.get(position).copied().unwrap_or(false)
    }

    /// Projected coordinate of the pin at `position`.
    #[must_use]
    pub fn coord(&self, position: usize) -> [f64; 2] {
        self.coords[position]
    }

    /// Category of the pin at `position`.
    #[must_use]
    pub fn category(&self, position: usize) -> PinCategory {
        self.categories[position]
    }

    /// Positions of pins within `radius` (projected units) of `center`.
    ///
    /// Order is unspecified.
    pub fn within_radius(&self, center: [f64; 2], radius: f64) -> impl Iterator<Item = usize> + '_ {
        self.tree
            .locate_within_distance(center, radius * radius)
            .map(|entry| entry.data)
    }

    /// Positions of pins inside a geographic bounding box, ascending.
    #[must_use]
    pub fn within_bbox(&self, bbox: &BoundingBox) -> Vec<usize> {
        let mut positions: Vec<usize> = envelopes(bbox)
            .iter()
            .flat_map(|env| self.tree.locate_in_envelope(env).map(|entry| entry.data))
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(id: &str, lng: f64, lat: f64) -> Pin {
        Pin {
            id: id.to_string(),
            category: PinCategory::Supporter,
            name: None,
            location: LngLat::new(lng, lat),
            city: None,
            state: None,
            story_title: None,
            story_slug: None,
            submitted_at: None,
        }
    }

    #[test]
    fn projection_roundtrip() {
        for (lng, lat) in [(0.0, 0.0), (-122.4, 37.8), (151.2, -33.9), (179.9, 84.0)] {
            let back = unproject(project(LngLat::new(lng, lat)));
            assert!((back.lng - lng).abs() < 1e-9, "{lng} -> {}", back.lng);
            assert!((back.lat - lat).abs() < 1e-9, "{lat} -> {}", back.lat);
        }
        assert_eq!(project(LngLat::new(0.0, 0.0)), [0.5, 0.5]);
    }

    #[test]
    fn poles_clamp_to_unit_square() {
        let [_, top] = project(LngLat::new(0.0, 90.0));
        let [_, bottom] = project(LngLat::new(0.0, -90.0));
        assert!((0.0..=1.0).contains(&top));
        assert!((0.0..=1.0).contains(&bottom));
    }

    #[test]
    fn invalid_pins_are_not_indexed() {
        let pins = vec![pin("a", -90.0, 40.0), pin("b", 0.0, 999.0), pin("c", -90.1, 40.1)];
        let index = PointIndex::build(&pins);
        assert_eq!(index.len(), 2);
        assert_eq!(index.positions(), 3);
        assert!(!index.is_indexed(1));
        assert_eq!(index.within_bbox(&BoundingBox::world()), vec![0, 2]);
    }

    #[test]
    fn radius_and_bbox_queries() {
        let pins = vec![pin("a", 10.0, 10.0), pin("b", 10.01, 10.0), pin("c", 50.0, 10.0)];
        let index = PointIndex::build(&pins);

        let mut near: Vec<usize> = index.within_radius(index.coord(0), 0.001).collect();
        near.sort_unstable();
        assert_eq!(near, vec![0, 1]);

        let bbox = BoundingBox::new(0.0, 0.0, 20.0, 20.0);
        assert_eq!(index.within_bbox(&bbox), vec![0, 1]);
    }

    #[test]
    fn bbox_across_antimeridian() {
        let pins = vec![pin("east", 179.5, 0.0), pin("west", -179.5, 0.0), pin("mid", 0.0, 0.0)];
        let index = PointIndex::build(&pins);
        let bbox = BoundingBox::new(179.0, -1.0, -179.0, 1.0);
        assert_eq!(index.within_bbox(&bbox), vec![0, 1]);
    }
}
