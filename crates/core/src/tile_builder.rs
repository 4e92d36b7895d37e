//! Tile construction from clipped features.
//!
//! A [`Tile`] first stores geometry in projected `[0, 1]` space, with vertices below the
//! zoom's simplification tolerance already dropped. [`Tile::transform`] converts it once,
//! in place, to integer pixel coordinates in `[0, extent)` plus buffer.

use std::sync::Arc;

use geo::{LineString, Winding};
use geojson::feature::Id;
use serde_json::json;

use crate::feature::{Feature, Geometry, Properties, Ring};
use crate::index::TilerOptions;

/// Fixed-extent feature type, as encoded in vector tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Point = 1,
    Line = 2,
    Polygon = 3,
}

impl FeatureKind {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Tile feature geometry.
///
/// Coordinates are projected until the owning tile is transformed; afterwards every
/// value is a whole number of pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum TileGeometry {
    Points(Vec<[f64; 2]>),
    Rings(Vec<Vec<[f64; 2]>>),
}

impl TileGeometry {
    pub fn num_points(&self) -> usize {
        match self {
            TileGeometry::Points(points) => points.len(),
            TileGeometry::Rings(rings) => rings.iter().map(Vec::len).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileFeature {
    pub geometry: TileGeometry,
    pub kind: FeatureKind,
    pub tags: Properties,
    pub id: Option<Id>,
}

/// One node of the tile index.
#[derive(Debug, Clone)]
pub struct Tile {
    pub features: Vec<TileFeature>,
    /// Every vertex seen while building.
    pub num_points: usize,
    /// Vertices that survived simplification.
    pub num_simplified: usize,
    pub num_features: usize,
    /// Clipped input kept for drill-down; cleared once the tile has been split.
    pub source: Option<Vec<Arc<Feature>>>,
    pub x: u32,
    pub y: u32,
    pub z: u8,
    pub transformed: bool,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Tile {
    /// Convert geometry to integer pixel coordinates. Runs once; later calls are no-ops.
    pub fn transform(&mut self, extent: u32) -> &Self {
        if self.transformed {
            return self;
        }

        let z2 = (1u64 << self.z) as f64;
        let (tx, ty) = (self.x as f64, self.y as f64);
        let extent = extent as f64;
        let convert = |p: &mut [f64; 2]| *p = transform_point(p[0], p[1], extent, z2, tx, ty);

        for feature in &mut self.features {
            match &mut feature.geometry {
                TileGeometry::Points(points) => points.iter_mut().for_each(convert),
                TileGeometry::Rings(rings) => rings.iter_mut().flatten().for_each(convert),
            }
        }

        self.transformed = true;
        self
    }
}

/// Project a `[0, 1]` point into the pixel space of tile `(tx, ty)` at scale `z2`.
///
/// Halves round up, so `-0.5` becomes `0`.
#[inline]
pub fn transform_point(x: f64, y: f64, extent: f64, z2: f64, tx: f64, ty: f64) -> [f64; 2] {
    [
        round_half_up(extent * (x * z2 - tx)),
        round_half_up(extent * (y * z2 - ty)),
    ]
}

#[inline]
fn round_half_up(v: f64) -> f64 {
    (v + 0.5).floor()
}

/// Build tile `(z, tx, ty)` from already-clipped features.
///
/// At `options.max_zoom` nothing is simplified away; below it, vertices whose
/// importance does not exceed the squared zoom tolerance are dropped, and whole rings
/// shorter (or smaller) than the tolerance are culled.
pub fn create_tile(
    features: &[Arc<Feature>],
    z: u8,
    tx: u32,
    ty: u32,
    options: &TilerOptions,
) -> Tile {
    let tolerance = if z == options.max_zoom {
        0.0
    } else {
        options.tolerance / ((1u64 << z) as f64 * options.extent as f64)
    };

    let mut tile = Tile {
        features: Vec::new(),
        num_points: 0,
        num_simplified: 0,
        num_features: features.len(),
        source: None,
        x: tx,
        y: ty,
        z,
        transformed: false,
        min_x: 2.0,
        min_y: 1.0,
        max_x: -1.0,
        max_y: 0.0,
    };

    for feature in features {
        add_feature(&mut tile, feature, tolerance, options.line_metrics);
    }

    tile
}

fn add_feature(tile: &mut Tile, feature: &Feature, tolerance: f64, line_metrics: bool) {
    tile.min_x = tile.min_x.min(feature.min_x);
    tile.min_y = tile.min_y.min(feature.min_y);
    tile.max_x = tile.max_x.max(feature.max_x);
    tile.max_y = tile.max_y.max(feature.max_y);

    let mut tags = feature.tags.clone();

    let (geometry, kind) = match &feature.geometry {
        Geometry::Point(coords) | Geometry::MultiPoint(coords) => {
            let points: Vec<[f64; 2]> = coords.chunks_exact(3).map(|p| [p[0], p[1]]).collect();
            tile.num_points += points.len();
            tile.num_simplified += points.len();
            (TileGeometry::Points(points), FeatureKind::Point)
        }
        Geometry::LineString(line) => {
            let mut rings = Vec::new();
            add_line(&mut rings, line, tile, tolerance, false, false);

            if line_metrics {
                let mut with_metrics = (*feature.tags).clone();
                with_metrics.insert("mapbox_clip_start".to_string(), json!(line.start / line.size));
                with_metrics.insert("mapbox_clip_end".to_string(), json!(line.end / line.size));
                tags = Arc::new(with_metrics);
            }
            (TileGeometry::Rings(rings), FeatureKind::Line)
        }
        Geometry::MultiLineString(lines) => {
            let mut rings = Vec::new();
            for line in lines {
                add_line(&mut rings, line, tile, tolerance, false, false);
            }
            (TileGeometry::Rings(rings), FeatureKind::Line)
        }
        Geometry::Polygon(polygon) => {
            let mut rings = Vec::new();
            for (i, ring) in polygon.iter().enumerate() {
                add_line(&mut rings, ring, tile, tolerance, true, i == 0);
            }
            (TileGeometry::Rings(rings), FeatureKind::Polygon)
        }
        Geometry::MultiPolygon(polygons) => {
            let mut rings = Vec::new();
            for polygon in polygons {
                for (i, ring) in polygon.iter().enumerate() {
                    add_line(&mut rings, ring, tile, tolerance, true, i == 0);
                }
            }
            (TileGeometry::Rings(rings), FeatureKind::Polygon)
        }
    };

    let is_empty = match &geometry {
        TileGeometry::Points(points) => points.is_empty(),
        TileGeometry::Rings(rings) => rings.is_empty(),
    };
    if is_empty {
        return;
    }

    tile.features.push(TileFeature {
        geometry,
        kind,
        tags,
        id: feature.id.clone(),
    });
}

fn add_line(
    out: &mut Vec<Vec<[f64; 2]>>,
    geom: &Ring,
    tile: &mut Tile,
    tolerance: f64,
    is_polygon: bool,
    is_outer: bool,
) {
    let sq_tolerance = tolerance * tolerance;

    // Rings and lines too small to see at this zoom are dropped outright
    let min_size = if is_polygon { sq_tolerance } else { tolerance };
    if tolerance > 0.0 && geom.size < min_size {
        tile.num_points += geom.num_points();
        return;
    }

    let mut ring = Vec::with_capacity(geom.num_points());
    for p in geom.coords.chunks_exact(3) {
        if tolerance == 0.0 || p[2] > sq_tolerance {
            tile.num_simplified += 1;
            ring.push([p[0], p[1]]);
        }
        tile.num_points += 1;
    }

    if is_polygon {
        ring = rewind(ring, is_outer);
    }
    out.push(ring);
}

/// Orient a ring: outer rings clockwise in y-down space, holes counter-clockwise.
fn rewind(ring: Vec<[f64; 2]>, clockwise: bool) -> Vec<[f64; 2]> {
    let mut line = LineString::from(ring);
    // geo measures winding with y up
    if clockwise {
        line.make_ccw_winding();
    } else {
        line.make_cw_winding();
    }
    line.0.into_iter().map(<[f64; 2]>::from).collect()
}
