//! Douglas-Peucker simplification over flat coordinate buffers.
//!
//! Instead of dropping vertices, the simplifier *ranks* them: each retained vertex
//! gets its squared distance from the simplified chord written into the third slot
//! of its `(x, y, importance)` triple. Tile building later keeps only the vertices
//! whose importance exceeds the squared tolerance of the zoom being rendered, so one
//! pass at conversion time serves every zoom level.
//!
//! # Coordinate Spaces
//!
//! Coordinates are projected mercator in `[0, 1]`. Tolerances are therefore given in
//! the same unit: a tolerance of `t` pixels at max zoom `z` with tile extent `e` is
//! `t / (2^z * e)`, squared before being passed in here.

/// Rank the vertices in `coords[first..=last]` (triple-aligned indices).
///
/// Endpoints are never marked; callers set their importance to 1 themselves.
/// The buffer is mutated in place and nothing else is touched, so calling this
/// twice with the same tolerance is a no-op the second time.
pub fn simplify(coords: &mut [f64], first: usize, last: usize, sq_tolerance: f64) {
    let mut max_sq_dist = sq_tolerance;
    let mid = first + ((last - first) >> 1);
    let mut min_pos_to_mid = last - first;
    let mut index = None;

    let ax = coords[first];
    let ay = coords[first + 1];
    let bx = coords[last];
    let by = coords[last + 1];

    let mut i = first + 3;
    while i < last {
        let d = sq_seg_dist(coords[i], coords[i + 1], ax, ay, bx, by);

        if d > max_sq_dist {
            index = Some(i);
            max_sq_dist = d;
        } else if d == max_sq_dist {
            // Prefer a pivot close to the middle on ties; keeps recursion shallow
            // for collinear and other degenerate runs.
            let pos_to_mid = i.abs_diff(mid);
            if pos_to_mid < min_pos_to_mid {
                index = Some(i);
                min_pos_to_mid = pos_to_mid;
            }
        }
        i += 3;
    }

    let Some(index) = index else {
        return;
    };

    if max_sq_dist > sq_tolerance {
        if index - first > 3 {
            simplify(coords, first, index, sq_tolerance);
        }
        coords[index + 2] = max_sq_dist;
        if last - index > 3 {
            simplify(coords, index, last, sq_tolerance);
        }
    }
}

/// Squared distance from `(px, py)` to the segment `(x, y) -> (bx, by)`.
#[inline]
fn sq_seg_dist(px: f64, py: f64, mut x: f64, mut y: f64, bx: f64, by: f64) -> f64 {
    let mut dx = bx - x;
    let mut dy = by - y;

    if dx != 0.0 || dy != 0.0 {
        let t = ((px - x) * dx + (py - y) * dy) / (dx * dx + dy * dy);

        if t > 1.0 {
            x = bx;
            y = by;
        } else if t > 0.0 {
            x += dx * t;
            y += dy * t;
        }
    }

    dx = px - x;
    dy = py - y;

    dx * dx + dy * dy
}
