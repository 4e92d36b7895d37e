//! Static KD-tree over 2D points.
//!
//! The tree is stored as two flat arrays: `ids` (the index of each point in the input)
//! and `coords` (interleaved `x, y`). Construction sorts both in place so that every
//! range `[left, right]` has its median at `(left + right) / 2`, split on x at even
//! depths and y at odd depths. Ranges no longer than `node_size` are left unsorted and
//! scanned linearly at query time.
//!
//! The tree never changes after construction, so queries take `&self` and can run
//! concurrently.
//!
//! # Example
//!
//! ```
//! use tilecraft_core::spatial_index::KdTree;
//!
//! let points = [(0.1, 0.1), (0.5, 0.5), (0.9, 0.2)];
//! let tree = KdTree::new(&points, |p| p.0, |p| p.1, 64);
//!
//! let mut ids = tree.range(0.0, 0.0, 0.6, 0.6);
//! ids.sort();
//! assert_eq!(ids, vec![0, 1]);
//! assert_eq!(tree.within(0.9, 0.25, 0.1), vec![2]);
//! ```

/// A KD-tree answering box and radius queries with input indices.
#[derive(Debug, Clone, Default)]
pub struct KdTree {
    node_size: usize,
    ids: Vec<u32>,
    coords: Vec<f64>,
}

impl KdTree {
    /// Index `points`, reading coordinates through `get_x`/`get_y`.
    pub fn new<T>(
        points: &[T],
        get_x: impl Fn(&T) -> f64,
        get_y: impl Fn(&T) -> f64,
        node_size: usize,
    ) -> Self {
        let mut ids = Vec::with_capacity(points.len());
        let mut coords = Vec::with_capacity(points.len() * 2);

        for (i, p) in points.iter().enumerate() {
            ids.push(i as u32);
            coords.push(get_x(p));
            coords.push(get_y(p));
        }

        let mut tree = KdTree {
            node_size,
            ids,
            coords,
        };
        let right = tree.ids.len() as isize - 1;
        tree.sort_kd(0, right, 0);
        tree
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn node_size(&self) -> usize {
        self.node_size
    }

    /// Input indices of all points inside the box (edges included). Unordered.
    pub fn range(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<usize> {
        let inside = |x: f64, y: f64| x >= min_x && x <= max_x && y >= min_y && y <= max_y;

        self.search(inside, |axis, x, y| match axis {
            0 => (min_x <= x, max_x >= x),
            _ => (min_y <= y, max_y >= y),
        })
    }

    /// Input indices of all points within distance `r` of `(qx, qy)`. Unordered.
    pub fn within(&self, qx: f64, qy: f64, r: f64) -> Vec<usize> {
        let r2 = r * r;
        let inside = |x: f64, y: f64| sq_dist(x, y, qx, qy) <= r2;

        self.search(inside, |axis, x, y| match axis {
            0 => (qx - r <= x, qx + r >= x),
            _ => (qy - r <= y, qy + r >= y),
        })
    }

    /// Stack-based traversal shared by both queries.
    ///
    /// `descend(axis, x, y)` says whether the query can reach the lower and upper
    /// half of a node split at `(x, y)`.
    fn search(
        &self,
        inside: impl Fn(f64, f64) -> bool,
        descend: impl Fn(usize, f64, f64) -> (bool, bool),
    ) -> Vec<usize> {
        let mut result = Vec::new();
        let mut stack: Vec<(isize, isize, usize)> = vec![(0, self.ids.len() as isize - 1, 0)];

        while let Some((left, right, axis)) = stack.pop() {
            if right - left <= self.node_size as isize {
                for i in left..=right {
                    let i = i as usize;
                    if inside(self.coords[2 * i], self.coords[2 * i + 1]) {
                        result.push(self.ids[i] as usize);
                    }
                }
                continue;
            }

            let m = (left + right) >> 1;
            let mu = m as usize;
            let (x, y) = (self.coords[2 * mu], self.coords[2 * mu + 1]);
            if inside(x, y) {
                result.push(self.ids[mu] as usize);
            }

            let next_axis = (axis + 1) % 2;
            let (lower, upper) = descend(axis, x, y);
            if lower {
                stack.push((left, m - 1, next_axis));
            }
            if upper {
                stack.push((m + 1, right, next_axis));
            }
        }

        result
    }

    // ========================================================================
    // Construction
    // ========================================================================

    fn sort_kd(&mut self, left: isize, right: isize, depth: usize) {
        if right - left <= self.node_size as isize {
            return;
        }
        let m = (left + right) >> 1;
        self.select(m, left, right, depth % 2);
        self.sort_kd(left, m - 1, depth + 1);
        self.sort_kd(m + 1, right, depth + 1);
    }

    /// Floyd-Rivest selection: reorder `[left, right]` so the `k`-th smallest
    /// coordinate on axis `inc` sits at `k`, with smaller values before it.
    fn select(&mut self, k: isize, mut left: isize, mut right: isize, inc: usize) {
        while right > left {
            if right - left > 600 {
                let n = (right - left + 1) as f64;
                let m = (k - left + 1) as f64;
                let z = n.ln();
                let s = 0.5 * (2.0 * z / 3.0).exp();
                let sign = if m - n / 2.0 < 0.0 { -1.0 } else { 1.0 };
                let sd = 0.5 * (z * s * (n - s) / n).sqrt() * sign;
                let kf = k as f64;
                let new_left = left.max((kf - m * s / n + sd).floor() as isize);
                let new_right = right.min((kf + (n - m) * s / n + sd).floor() as isize);
                self.select(k, new_left, new_right, inc);
            }

            let t = self.coord(k, inc);
            let mut i = left;
            let mut j = right;

            self.swap_item(left, k);
            if self.coord(right, inc) > t {
                self.swap_item(left, right);
            }

            while i < j {
                self.swap_item(i, j);
                i += 1;
                j -= 1;
                while self.coord(i, inc) < t {
                    i += 1;
                }
                while self.coord(j, inc) > t {
                    j -= 1;
                }
            }

            if self.coord(left, inc) == t {
                self.swap_item(left, j);
            } else {
                j += 1;
                self.swap_item(j, right);
            }

            if j <= k {
                left = j + 1;
            }
            if k <= j {
                right = j - 1;
            }
        }
    }

    #[inline]
    fn coord(&self, i: isize, inc: usize) -> f64 {
        self.coords[2 * i as usize + inc]
    }

    #[inline]
    fn swap_item(&mut self, i: isize, j: isize) {
        let (i, j) = (i as usize, j as usize);
        self.ids.swap(i, j);
        self.coords.swap(2 * i, 2 * j);
        self.coords.swap(2 * i + 1, 2 * j + 1);
    }
}

#[inline]
fn sq_dist(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let dx = ax - bx;
    let dy = ay - by;
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small xorshift generator so test inputs are reproducible.
    struct Rng(u64);

    impl Rng {
        fn next_f64(&mut self) -> f64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    fn random_points(n: usize, seed: u64) -> Vec<[f64; 2]> {
        let mut rng = Rng(seed);
        (0..n).map(|_| [rng.next_f64(), rng.next_f64()]).collect()
    }

    fn sorted(mut ids: Vec<usize>) -> Vec<usize> {
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_structure_is_permutation() {
        let points = random_points(1000, 7);
        let tree = KdTree::new(&points, |p| p[0], |p| p[1], 10);

        assert_eq!(tree.len(), 1000);
        assert_eq!(tree.coords.len(), 2 * tree.ids.len());
        let ids: Vec<usize> = tree.ids.iter().map(|&i| i as usize).collect();
        assert_eq!(sorted(ids), (0..1000).collect::<Vec<_>>());

        // Every stored coordinate still belongs to its id
        for (i, &id) in tree.ids.iter().enumerate() {
            assert_eq!(tree.coords[2 * i], points[id as usize][0]);
            assert_eq!(tree.coords[2 * i + 1], points[id as usize][1]);
        }
    }

    #[test]
    fn test_range_matches_brute_force() {
        // Large enough to exercise the Floyd-Rivest refinement
        let points = random_points(5000, 42);
        let tree = KdTree::new(&points, |p| p[0], |p| p[1], 16);

        let boxes = [
            (0.2, 0.3, 0.5, 0.6),
            (0.0, 0.0, 1.0, 1.0),
            (0.9, 0.9, 0.95, 0.99),
            (0.5, 0.5, 0.5, 0.5),
        ];
        for &(min_x, min_y, max_x, max_y) in &boxes {
            let expected: Vec<usize> = points
                .iter()
                .enumerate()
                .filter(|(_, p)| p[0] >= min_x && p[0] <= max_x && p[1] >= min_y && p[1] <= max_y)
                .map(|(i, _)| i)
                .collect();
            assert_eq!(
                sorted(tree.range(min_x, min_y, max_x, max_y)),
                expected,
                "box {:?}",
                (min_x, min_y, max_x, max_y)
            );
        }
    }

    #[test]
    fn test_within_matches_brute_force() {
        let points = random_points(3000, 99);
        let tree = KdTree::new(&points, |p| p[0], |p| p[1], 64);

        for &(qx, qy, r) in &[(0.5, 0.5, 0.1), (0.0, 1.0, 0.3), (0.25, 0.75, 0.01)] {
            let expected: Vec<usize> = points
                .iter()
                .enumerate()
                .filter(|(_, p)| sq_dist(p[0], p[1], qx, qy) <= r * r)
                .map(|(i, _)| i)
                .collect();
            assert_eq!(sorted(tree.within(qx, qy, r)), expected);
        }
    }

    #[test]
    fn test_duplicate_coordinates() {
        let points = vec![[0.5, 0.5]; 200];
        let tree = KdTree::new(&points, |p| p[0], |p| p[1], 4);
        assert_eq!(tree.within(0.5, 0.5, 0.0).len(), 200);
        assert_eq!(tree.range(0.0, 0.0, 0.4, 1.0).len(), 0);
    }

    #[test]
    fn test_empty_tree() {
        let points: Vec<[f64; 2]> = Vec::new();
        let tree = KdTree::new(&points, |p| p[0], |p| p[1], 64);
        assert!(tree.is_empty());
        assert!(tree.range(0.0, 0.0, 1.0, 1.0).is_empty());
        assert!(tree.within(0.5, 0.5, 1.0).is_empty());
    }
}
