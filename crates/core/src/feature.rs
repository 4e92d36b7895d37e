//! Intermediate feature model shared by conversion, clipping, wrapping and tile building.
//!
//! Geometry lives in flat `(x, y, z)` buffers in projected `[0, 1]` space, where `z` is
//! the simplification importance computed by [`crate::simplify`]. Lines and rings also
//! carry their total `size` (length, or absolute area for polygon rings) plus the
//! `start`/`end` distance along the original line, which is what line-metric tracking
//! needs once a line has been cut into pieces.

use std::sync::Arc;

use geojson::feature::Id;
use geojson::JsonObject;

/// Feature properties. Shared between every clipped copy of a feature.
pub type Properties = Arc<JsonObject>;

/// A line or polygon ring as a flat `(x, y, importance)` buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ring {
    pub coords: Vec<f64>,
    /// Line length, or absolute ring area for polygons.
    pub size: f64,
    /// Distance along the source line where this piece starts.
    pub start: f64,
    /// Distance along the source line where this piece ends.
    pub end: f64,
}

impl Ring {
    pub fn new(coords: Vec<f64>, size: f64) -> Self {
        Self {
            coords,
            size,
            start: 0.0,
            end: size,
        }
    }

    /// An empty ring carrying the same line metrics as `source`.
    pub fn slice_of(source: &Ring) -> Self {
        Self {
            coords: Vec::new(),
            size: source.size,
            start: source.start,
            end: source.end,
        }
    }

    #[inline]
    pub fn push_point(&mut self, x: f64, y: f64, z: f64) {
        self.coords.extend_from_slice(&[x, y, z]);
    }

    /// Number of `(x, y, z)` triples.
    pub fn num_points(&self) -> usize {
        self.coords.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Copy of this ring moved by `offset` along the x axis.
    pub fn shifted(&self, offset: f64) -> Ring {
        Ring {
            coords: shift_coords(&self.coords, offset),
            ..Ring::slice_of(self)
        }
    }
}

fn shift_coords(coords: &[f64], offset: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(coords.len());
    for p in coords.chunks_exact(3) {
        out.extend_from_slice(&[p[0] + offset, p[1], p[2]]);
    }
    out
}

/// Projected geometry of an intermediate feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// A single `(x, y, z)` triple.
    Point(Vec<f64>),
    /// Consecutive `(x, y, z)` triples.
    MultiPoint(Vec<f64>),
    LineString(Ring),
    MultiLineString(Vec<Ring>),
    /// Outer ring first, then holes.
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

impl Geometry {
    /// Copy of this geometry moved by `offset` along the x axis.
    pub fn shifted(&self, offset: f64) -> Geometry {
        let shift_rings = |rings: &[Ring]| rings.iter().map(|r| r.shifted(offset)).collect();
        match self {
            Geometry::Point(c) => Geometry::Point(shift_coords(c, offset)),
            Geometry::MultiPoint(c) => Geometry::MultiPoint(shift_coords(c, offset)),
            Geometry::LineString(r) => Geometry::LineString(r.shifted(offset)),
            Geometry::MultiLineString(rs) => Geometry::MultiLineString(shift_rings(rs)),
            Geometry::Polygon(rs) => Geometry::Polygon(shift_rings(rs)),
            Geometry::MultiPolygon(ps) => {
                Geometry::MultiPolygon(ps.iter().map(|p| shift_rings(p)).collect())
            }
        }
    }
}

/// A converted feature ready for clipping and tile building.
///
/// The bounding box is computed once in [`Feature::new`] and always matches the
/// geometry (outer rings only, for polygons).
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: Option<Id>,
    pub geometry: Geometry,
    pub tags: Properties,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Feature {
    pub fn new(id: Option<Id>, geometry: Geometry, tags: Properties) -> Self {
        let mut feature = Feature {
            id,
            geometry,
            tags,
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        feature.update_bbox();
        feature
    }

    /// Copy of this feature moved by `offset` along the x axis.
    pub fn shifted(&self, offset: f64) -> Feature {
        Feature::new(self.id.clone(), self.geometry.shifted(offset), self.tags.clone())
    }

    fn update_bbox(&mut self) {
        let mut bbox = [
            f64::INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
        ];
        match &self.geometry {
            Geometry::Point(c) | Geometry::MultiPoint(c) => extend_bbox(&mut bbox, c),
            Geometry::LineString(r) => extend_bbox(&mut bbox, &r.coords),
            Geometry::MultiLineString(rs) => {
                for r in rs {
                    extend_bbox(&mut bbox, &r.coords);
                }
            }
            Geometry::Polygon(rs) => {
                if let Some(outer) = rs.first() {
                    extend_bbox(&mut bbox, &outer.coords);
                }
            }
            Geometry::MultiPolygon(ps) => {
                for outer in ps.iter().filter_map(|p| p.first()) {
                    extend_bbox(&mut bbox, &outer.coords);
                }
            }
        }
        [self.min_x, self.min_y, self.max_x, self.max_y] = bbox;
    }
}

fn extend_bbox(bbox: &mut [f64; 4], coords: &[f64]) {
    for p in coords.chunks_exact(3) {
        bbox[0] = bbox[0].min(p[0]);
        bbox[1] = bbox[1].min(p[1]);
        bbox[2] = bbox[2].max(p[0]);
        bbox[3] = bbox[3].max(p[1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(points: &[(f64, f64)]) -> Ring {
        let mut r = Ring::default();
        for &(x, y) in points {
            r.push_point(x, y, 1.0);
        }
        r
    }

    #[test]
    fn test_bbox_from_line() {
        let f = Feature::new(
            None,
            Geometry::LineString(ring(&[(0.1, 0.2), (0.4, 0.1), (0.3, 0.6)])),
            Properties::default(),
        );
        assert_eq!((f.min_x, f.min_y, f.max_x, f.max_y), (0.1, 0.1, 0.4, 0.6));
    }

    #[test]
    fn test_polygon_bbox_ignores_holes() {
        let outer = ring(&[(0.0, 0.0), (0.5, 0.0), (0.5, 0.5), (0.0, 0.0)]);
        let hole = ring(&[(0.1, 0.1), (0.9, 0.1), (0.9, 0.9), (0.1, 0.1)]);
        let f = Feature::new(None, Geometry::Polygon(vec![outer, hole]), Properties::default());
        assert_eq!(f.max_x, 0.5);
        assert_eq!(f.max_y, 0.5);
    }

    #[test]
    fn test_shifted_keeps_metrics() {
        let mut r = ring(&[(0.2, 0.2), (0.4, 0.2)]);
        r.size = 0.2;
        r.start = 0.05;
        r.end = 0.15;
        let f = Feature::new(None, Geometry::LineString(r), Properties::default());

        let moved = f.shifted(-1.0);
        match &moved.geometry {
            Geometry::LineString(r) => {
                let expected = [-0.8, 0.2, 1.0, -0.6, 0.2, 1.0];
                for (got, want) in r.coords.iter().zip(expected) {
                    assert!((got - want).abs() < 1e-12, "{:?}", r.coords);
                }
                assert_eq!((r.size, r.start, r.end), (0.2, 0.05, 0.15));
            }
            other => panic!("Expected LineString, got {:?}", other),
        }
        assert!((moved.min_x - (-0.8)).abs() < 1e-12);
        // The source is untouched
        assert_eq!(f.min_x, 0.2);
    }

    #[test]
    fn test_empty_geometry_bbox_is_inverted() {
        let f = Feature::new(None, Geometry::MultiPoint(vec![]), Properties::default());
        assert!(f.min_x > f.max_x);
    }
}
