//! Axis-aligned clipping of projected features.
//!
//! Features are clipped against a band `[k1, k2]` on one axis at a time; a tile's
//! buffered window is cut by one x pass followed by one y pass. Points on the band
//! edge are kept. Segments crossing an edge get an interpolated vertex whose
//! importance is 1, so it always survives simplification and rings close cleanly.
//!
//! Clipping works on shared [`Arc<Feature>`] lists: features that lie entirely
//! inside the band are passed through without copying their geometry.

use std::borrow::Cow;
use std::sync::Arc;

use crate::feature::{Feature, Geometry, Ring};

/// The coordinate a clip pass works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    #[inline]
    fn offset(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }

    #[inline]
    fn pick(self, x: f64, y: f64) -> f64 {
        match self {
            Axis::X => x,
            Axis::Y => y,
        }
    }

    fn feature_range(self, feature: &Feature) -> (f64, f64) {
        match self {
            Axis::X => (feature.min_x, feature.max_x),
            Axis::Y => (feature.min_y, feature.max_y),
        }
    }
}

/// Clip `features` to the band `[k1 / scale, k2 / scale]` along `axis`.
///
/// `min_all`/`max_all` are the bounds of the whole list on that axis. When the list
/// lies completely inside the band the input slice itself is returned
/// (`Cow::Borrowed`); when nothing survives the result is `None`.
///
/// With `line_metrics`, a clipped `LineString` becomes one feature per surviving
/// piece, each piece carrying its own `start`/`end` distances.
#[allow(clippy::too_many_arguments)]
pub fn clip<'a>(
    features: &'a [Arc<Feature>],
    scale: f64,
    k1: f64,
    k2: f64,
    axis: Axis,
    min_all: f64,
    max_all: f64,
    line_metrics: bool,
) -> Option<Cow<'a, [Arc<Feature>]>> {
    let k1 = k1 / scale;
    let k2 = k2 / scale;

    if min_all >= k1 && max_all < k2 {
        return Some(Cow::Borrowed(features));
    }
    if max_all < k1 || min_all >= k2 {
        return None;
    }

    let mut clipped = Vec::new();

    for feature in features {
        let (min, max) = axis.feature_range(feature);

        if min >= k1 && max < k2 {
            clipped.push(Arc::clone(feature));
            continue;
        }
        if max < k1 || min >= k2 {
            continue;
        }

        let id = &feature.id;
        let tags = &feature.tags;

        match &feature.geometry {
            Geometry::Point(coords) | Geometry::MultiPoint(coords) => {
                let kept = clip_points(coords, k1, k2, axis);
                if kept.is_empty() {
                    continue;
                }
                let geometry = if kept.len() == 3 {
                    Geometry::Point(kept)
                } else {
                    Geometry::MultiPoint(kept)
                };
                clipped.push(Arc::new(Feature::new(id.clone(), geometry, tags.clone())));
            }
            Geometry::LineString(line) => {
                let mut pieces = Vec::new();
                clip_line(line, &mut pieces, k1, k2, axis, false, line_metrics);

                if line_metrics {
                    for piece in pieces {
                        let geometry = Geometry::LineString(piece);
                        clipped.push(Arc::new(Feature::new(id.clone(), geometry, tags.clone())));
                    }
                } else if let Some(geometry) = lines_geometry(pieces) {
                    clipped.push(Arc::new(Feature::new(id.clone(), geometry, tags.clone())));
                }
            }
            Geometry::MultiLineString(lines) => {
                let mut pieces = Vec::new();
                for line in lines {
                    clip_line(line, &mut pieces, k1, k2, axis, false, false);
                }
                if let Some(geometry) = lines_geometry(pieces) {
                    clipped.push(Arc::new(Feature::new(id.clone(), geometry, tags.clone())));
                }
            }
            Geometry::Polygon(rings) => {
                let new_rings = clip_rings(rings, k1, k2, axis);
                if !new_rings.is_empty() {
                    let geometry = Geometry::Polygon(new_rings);
                    clipped.push(Arc::new(Feature::new(id.clone(), geometry, tags.clone())));
                }
            }
            Geometry::MultiPolygon(polygons) => {
                let new_polygons: Vec<Vec<Ring>> = polygons
                    .iter()
                    .map(|rings| clip_rings(rings, k1, k2, axis))
                    .filter(|rings| !rings.is_empty())
                    .collect();
                if !new_polygons.is_empty() {
                    let geometry = Geometry::MultiPolygon(new_polygons);
                    clipped.push(Arc::new(Feature::new(id.clone(), geometry, tags.clone())));
                }
            }
        }
    }

    if clipped.is_empty() {
        None
    } else {
        Some(Cow::Owned(clipped))
    }
}

/// A single surviving piece stays a `LineString`.
fn lines_geometry(mut pieces: Vec<Ring>) -> Option<Geometry> {
    match pieces.len() {
        0 => None,
        1 => pieces.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(pieces)),
    }
}

fn clip_points(coords: &[f64], k1: f64, k2: f64, axis: Axis) -> Vec<f64> {
    let mut out = Vec::new();
    for p in coords.chunks_exact(3) {
        let a = p[axis.offset()];
        if a >= k1 && a <= k2 {
            out.extend_from_slice(p);
        }
    }
    out
}

fn clip_rings(rings: &[Ring], k1: f64, k2: f64, axis: Axis) -> Vec<Ring> {
    let mut out = Vec::new();
    for ring in rings {
        clip_line(ring, &mut out, k1, k2, axis, true, false);
    }
    out
}

/// Clip one line or ring, pushing the surviving pieces onto `out`.
///
/// Lines are cut into a new piece every time they leave the band; polygon rings are
/// kept as one ring running along the band edge, then re-closed.
fn clip_line(
    geom: &Ring,
    out: &mut Vec<Ring>,
    k1: f64,
    k2: f64,
    axis: Axis,
    is_polygon: bool,
    track_metrics: bool,
) {
    let coords = &geom.coords;
    if coords.is_empty() {
        return;
    }

    let mut slice = Ring::slice_of(geom);
    let mut len = geom.start;

    let mut i = 0;
    while i + 3 < coords.len() {
        let (ax, ay, az) = (coords[i], coords[i + 1], coords[i + 2]);
        let (bx, by) = (coords[i + 3], coords[i + 4]);
        let a = axis.pick(ax, ay);
        let b = axis.pick(bx, by);
        let seg_len = if track_metrics {
            ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
        } else {
            0.0
        };
        let mut exit_t = None;

        if a < k1 {
            // Entering from below k1
            if b > k1 {
                let t = intersect(&mut slice, axis, ax, ay, bx, by, k1);
                if track_metrics {
                    slice.start = len + seg_len * t;
                }
            }
        } else if a > k2 {
            // Entering from above k2
            if b < k2 {
                let t = intersect(&mut slice, axis, ax, ay, bx, by, k2);
                if track_metrics {
                    slice.start = len + seg_len * t;
                }
            }
        } else {
            slice.push_point(ax, ay, az);
        }

        if b < k1 && a >= k1 {
            exit_t = Some(intersect(&mut slice, axis, ax, ay, bx, by, k1));
        }
        if b > k2 && a <= k2 {
            exit_t = Some(intersect(&mut slice, axis, ax, ay, bx, by, k2));
        }

        if let Some(t) = exit_t {
            if !is_polygon {
                if track_metrics {
                    slice.end = len + seg_len * t;
                }
                out.push(std::mem::replace(&mut slice, Ring::slice_of(geom)));
            }
        }

        if track_metrics {
            len += seg_len;
        }
        i += 3;
    }

    let last = coords.len() - 3;
    let (ax, ay, az) = (coords[last], coords[last + 1], coords[last + 2]);
    let a = axis.pick(ax, ay);
    if a >= k1 && a <= k2 {
        slice.push_point(ax, ay, az);
    }

    let last = slice.coords.len().saturating_sub(3);
    if is_polygon
        && last >= 3
        && (slice.coords[last] != slice.coords[0] || slice.coords[last + 1] != slice.coords[1])
    {
        let (x, y, z) = (slice.coords[0], slice.coords[1], slice.coords[2]);
        slice.push_point(x, y, z);
    }

    if !slice.is_empty() {
        out.push(slice);
    }
}

/// Push the crossing of segment `a -> b` with the line `axis == k`; returns its `t`.
fn intersect(out: &mut Ring, axis: Axis, ax: f64, ay: f64, bx: f64, by: f64, k: f64) -> f64 {
    match axis {
        Axis::X => {
            let t = (k - ax) / (bx - ax);
            out.push_point(k, ay + (by - ay) * t, 1.0);
            t
        }
        Axis::Y => {
            let t = (k - ay) / (by - ay);
            out.push_point(ax + (bx - ax) * t, k, 1.0);
            t
        }
    }
}
