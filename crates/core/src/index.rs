//! GeoJSON tile index.
//!
//! The index converts its input once, then splits it down a quad-tree of buffered,
//! clipped tiles until tiles are simple enough or `index_max_zoom` is reached. Leaf
//! tiles keep their clipped source features so that [`TileIndex::get_tile`] can later
//! drill down to any tile up to `max_zoom` on demand.
//!
//! # Example
//!
//! ```
//! use tilecraft_core::{convert::parse_geojson, TileIndex, TilerOptions};
//!
//! let data = parse_geojson(
//!     r#"{"type":"LineString","coordinates":[[-10,-10],[10,10]]}"#,
//! ).unwrap();
//! let mut index = TileIndex::new(&data, TilerOptions::default()).unwrap();
//!
//! // Drills down from the root tile, just south-west of null island
//! let tile = index.get_tile(6, 31, 32).unwrap();
//! assert_eq!(tile.features.len(), 1);
//! ```

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use geojson::GeoJson;
use serde::{Deserialize, Serialize};

use crate::clip::{clip, Axis};
use crate::convert::convert;
use crate::feature::Feature;
use crate::tile::{to_id, wrap_x, TileCoord, MAX_ZOOM};
use crate::tile_builder::{create_tile, Tile};
use crate::wrap::wrap;
use crate::{Error, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Options for building a [`TileIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TilerOptions {
    /// Deepest zoom tiles can be generated for (0-24).
    pub max_zoom: u8,
    /// Deepest zoom of the pre-built index. Capped at `max_zoom`.
    pub index_max_zoom: u8,
    /// Tiles with at most this many points are not split in the first pass.
    pub index_max_points: usize,
    /// Simplification tolerance in pixels; higher means simpler.
    pub tolerance: f64,
    /// Tile extent in pixels.
    pub extent: u32,
    /// Tile buffer on each side, in pixels.
    pub buffer: f64,
    /// Track line start/end distances across clips (`mapbox_clip_start`/`_end`).
    pub line_metrics: bool,
    /// Use this property as the feature id.
    pub promote_id: Option<String>,
    /// Use the feature's position in the input as its id.
    pub generate_id: bool,
    /// Logging verbosity: 0 silent, 1 summary, 2 per-step timings.
    pub debug: u8,
}

impl Default for TilerOptions {
    fn default() -> Self {
        Self {
            max_zoom: 14,
            index_max_zoom: 5,
            index_max_points: 100_000,
            tolerance: 3.0,
            extent: 4096,
            buffer: 64.0,
            line_metrics: false,
            promote_id: None,
            generate_id: false,
            debug: 0,
        }
    }
}

impl TilerOptions {
    pub fn with_max_zoom(mut self, max_zoom: u8) -> Self {
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_index_max_zoom(mut self, zoom: u8) -> Self {
        self.index_max_zoom = zoom;
        self
    }

    pub fn with_index_max_points(mut self, points: usize) -> Self {
        self.index_max_points = points;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_extent(mut self, extent: u32) -> Self {
        self.extent = extent;
        self
    }

    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_line_metrics(mut self, enabled: bool) -> Self {
        self.line_metrics = enabled;
        self
    }

    pub fn with_promote_id(mut self, property: impl Into<String>) -> Self {
        self.promote_id = Some(property.into());
        self
    }

    pub fn with_generate_id(mut self, enabled: bool) -> Self {
        self.generate_id = enabled;
        self
    }

    pub fn with_debug(mut self, level: u8) -> Self {
        self.debug = level;
        self
    }

    /// Check the options before any work is done.
    pub fn validate(&self) -> Result<()> {
        if self.max_zoom > MAX_ZOOM || self.index_max_zoom > MAX_ZOOM {
            return Err(Error::InvalidConfig(
                "maxZoom should be in the 0-24 range".to_string(),
            ));
        }
        if self.promote_id.is_some() && self.generate_id {
            return Err(Error::InvalidConfig(
                "promoteId and generateId cannot be used together.".to_string(),
            ));
        }
        if self.extent == 0 {
            return Err(Error::InvalidConfig("extent must be positive".to_string()));
        }
        if !(self.tolerance >= 0.0) || !self.tolerance.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if !(self.buffer >= 0.0) || !self.buffer.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "buffer must be a non-negative number, got {}",
                self.buffer
            )));
        }
        Ok(())
    }

    fn effective_index_max_zoom(&self) -> u8 {
        self.index_max_zoom.min(self.max_zoom)
    }
}

// ============================================================================
// Tile index
// ============================================================================

type WorkItem = (Vec<Arc<Feature>>, u8, u32, u32);

/// Quad-tree of generated tiles, keyed by [`to_id`].
#[derive(Debug)]
pub struct TileIndex {
    options: TilerOptions,
    tiles: HashMap<u64, Tile>,
    tile_coords: Vec<TileCoord>,
    stats: BTreeMap<u8, usize>,
    total: usize,
}

impl TileIndex {
    /// Convert `data` and build the initial index.
    pub fn new(data: &GeoJson, options: TilerOptions) -> Result<Self> {
        options.validate()?;

        let start = Instant::now();
        let features = convert(data, &options)?;
        if options.debug > 0 {
            log::debug!(
                "preprocess data: {} features in {:?}",
                features.len(),
                start.elapsed()
            );
        }

        Self::from_features(features, options)
    }

    /// Build the index from features that are already converted to projected space.
    pub fn from_features(features: Vec<Feature>, options: TilerOptions) -> Result<Self> {
        options.validate()?;

        let mut index = TileIndex {
            options,
            tiles: HashMap::new(),
            tile_coords: Vec::new(),
            stats: BTreeMap::new(),
            total: 0,
        };

        let debug = index.options.debug;
        if debug > 0 {
            log::debug!(
                "index: maxZoom {}, indexMaxZoom {}, indexMaxPoints {}",
                index.options.max_zoom,
                index.options.index_max_zoom,
                index.options.index_max_points
            );
        }

        let start = Instant::now();
        let features: Vec<Arc<Feature>> = features.into_iter().map(Arc::new).collect();
        let features = wrap(features, &index.options);

        if !features.is_empty() {
            index.split_tile(features, 0, 0, 0, None);
        }

        if debug > 0 {
            if let Some(root) = index.tiles.get(&to_id(0, 0, 0)) {
                log::debug!(
                    "features: {}, points: {}",
                    root.num_features,
                    root.num_points
                );
            }
            log::debug!(
                "generate tiles: {} tiles in {:?} {:?}",
                index.total,
                start.elapsed(),
                index.stats
            );
        }

        Ok(index)
    }

    pub fn options(&self) -> &TilerOptions {
        &self.options
    }

    /// Every tile created so far, in creation order.
    pub fn tile_coords(&self) -> &[TileCoord] {
        &self.tile_coords
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Tiles created per zoom level. Only tracked when `debug > 0`.
    pub fn stats(&self) -> &BTreeMap<u8, usize> {
        &self.stats
    }

    /// Total tiles created. Only tracked when `debug > 0`.
    pub fn total(&self) -> usize {
        self.total
    }

    /// A tile already in the index, as stored, without drilling down.
    pub fn indexed_tile(&self, z: u8, x: u32, y: u32) -> Option<&Tile> {
        self.tiles.get(&to_id(z, x, y))
    }

    /// Get tile `(z, x, y)` in pixel coordinates, generating it if needed.
    ///
    /// `x` is wrapped into `[0, 2^z)`. Returns `None` when `z` is beyond the
    /// addressable range or when no ancestor holds source data for the tile.
    pub fn get_tile(&mut self, z: u8, x: i64, y: u32) -> Option<&Tile> {
        if z > MAX_ZOOM {
            return None;
        }

        let extent = self.options.extent;
        let debug = self.options.debug;
        let x = wrap_x(x, z);
        let id = to_id(z, x, y);

        if self.tiles.contains_key(&id) {
            return self.tiles.get_mut(&id).map(|tile| &*tile.transform(extent));
        }

        if debug > 1 {
            log::debug!("drilling down to z{}-{}-{}", z, x, y);
        }

        let (mut z0, mut x0, mut y0) = (z, x, y);
        let mut parent = None;
        while parent.is_none() && z0 > 0 {
            z0 -= 1;
            x0 >>= 1;
            y0 >>= 1;
            parent = self.tiles.get(&to_id(z0, x0, y0));
        }

        let source = parent?.source.clone()?;

        if debug > 1 {
            log::debug!("found parent tile z{}-{}-{}", z0, x0, y0);
        }
        let start = Instant::now();
        self.split_tile(source, z0, x0, y0, Some(TileCoord::new(x, y, z)));
        if debug > 1 {
            log::debug!("drilling down took {:?}", start.elapsed());
        }

        self.tiles.get_mut(&id).map(|tile| &*tile.transform(extent))
    }

    /// Split `features` from tile `(z, x, y)` downwards.
    ///
    /// Without a target, splitting stops at `index_max_zoom` or at tiles with few
    /// enough points. With a target, only ancestors of the target are split, down to
    /// the target itself or `max_zoom`.
    fn split_tile(
        &mut self,
        features: Vec<Arc<Feature>>,
        z: u8,
        x: u32,
        y: u32,
        target: Option<TileCoord>,
    ) {
        let options = &self.options;
        let debug = options.debug;
        let index_max_zoom = options.effective_index_max_zoom();

        let k1 = 0.5 * options.buffer / options.extent as f64;
        let k2 = 0.5 - k1;
        let k3 = 0.5 + k1;
        let k4 = 1.0 + k1;

        let mut stack: Vec<WorkItem> = vec![(features, z, x, y)];

        while let Some((features, z, x, y)) = stack.pop() {
            let z2 = (1u64 << z) as f64;
            let id = to_id(z, x, y);

            let tile = match self.tiles.entry(id) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    let start = Instant::now();
                    let tile = create_tile(&features, z, x, y, options);
                    self.tile_coords.push(TileCoord::new(x, y, z));

                    if debug > 0 {
                        log::debug!(
                            "tile z{}-{}-{} (features: {}, points: {}, simplified: {}) in {:?}",
                            z,
                            x,
                            y,
                            tile.num_features,
                            tile.num_points,
                            tile.num_simplified,
                            start.elapsed()
                        );
                        *self.stats.entry(z).or_insert(0) += 1;
                        self.total += 1;
                    }
                    entry.insert(tile)
                }
            };

            let stop = match target {
                None => z == index_max_zoom || tile.num_points <= options.index_max_points,
                Some(target) => {
                    z == options.max_zoom
                        || z == target.z
                        || !TileCoord::new(x, y, z).is_ancestor_of(&target)
                }
            };

            if stop {
                // Keep the clipped source so a later request can drill down from here
                tile.source = Some(features);
                continue;
            }

            tile.source = None;
            if features.is_empty() {
                continue;
            }

            let (min_x, min_y, max_x, max_y) = (tile.min_x, tile.min_y, tile.max_x, tile.max_y);
            let (fx, fy) = (x as f64, y as f64);
            let line_metrics = options.line_metrics;
            let start = Instant::now();

            let split_x = |k_lo: f64, k_hi: f64| {
                clip(&features, z2, fx + k_lo, fx + k_hi, Axis::X, min_x, max_x, line_metrics)
                    .map(Cow::into_owned)
            };
            let left = split_x(-k1, k3);
            let right = split_x(k2, k4);

            let split_y = |half: &Option<Vec<Arc<Feature>>>, k_lo: f64, k_hi: f64| {
                half.as_ref()
                    .and_then(|half| {
                        clip(half, z2, fy + k_lo, fy + k_hi, Axis::Y, min_y, max_y, line_metrics)
                            .map(Cow::into_owned)
                    })
                    .unwrap_or_default()
            };
            let tl = split_y(&left, -k1, k3);
            let bl = split_y(&left, k2, k4);
            let tr = split_y(&right, -k1, k3);
            let br = split_y(&right, k2, k4);

            if debug > 1 {
                log::debug!("clipping z{}-{}-{} took {:?}", z, x, y, start.elapsed());
            }

            stack.push((tl, z + 1, x * 2, y * 2));
            stack.push((bl, z + 1, x * 2, y * 2 + 1));
            stack.push((tr, z + 1, x * 2 + 1, y * 2));
            stack.push((br, z + 1, x * 2 + 1, y * 2 + 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::parse_geojson;
    use crate::tile::lng_lat_to_tile;
    use crate::tile_builder::TileGeometry;

    fn point_index(lng: f64, lat: f64, options: TilerOptions) -> TileIndex {
        let text = format!(
            r#"{{"type":"Feature","properties":{{}},"geometry":{{"type":"Point","coordinates":[{},{}]}}}}"#,
            lng, lat
        );
        let data = parse_geojson(&text).unwrap();
        TileIndex::new(&data, options).unwrap()
    }

    #[test]
    fn test_options_validation() {
        assert!(TilerOptions::default().validate().is_ok());

        let err = TilerOptions::default().with_max_zoom(25).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: maxZoom should be in the 0-24 range"
        );

        let err = TilerOptions::default()
            .with_promote_id("id")
            .with_generate_id(true)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("cannot be used together"));

        assert!(TilerOptions::default().with_extent(0).validate().is_err());
        assert!(TilerOptions::default().with_tolerance(-1.0).validate().is_err());
        assert!(TilerOptions::default().with_buffer(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_options_from_json() {
        let options: TilerOptions =
            serde_json::from_str(r#"{"maxZoom": 8, "indexMaxPoints": 10, "lineMetrics": true}"#)
                .unwrap();
        assert_eq!(options.max_zoom, 8);
        assert_eq!(options.index_max_points, 10);
        assert!(options.line_metrics);
        assert_eq!(options.extent, 4096);
    }

    #[test]
    fn test_first_pass_stops_at_simple_tiles() {
        let index = point_index(10.0, 10.0, TilerOptions::default());
        // One point is below indexMaxPoints, so only the root exists
        assert_eq!(index.tile_count(), 1);
        assert!(index.indexed_tile(0, 0, 0).unwrap().source.is_some());
    }

    #[test]
    fn test_first_pass_stops_at_index_max_zoom() {
        let options = TilerOptions::default()
            .with_index_max_zoom(2)
            .with_index_max_points(0)
            .with_debug(1);
        let index = point_index(10.0, 10.0, options);

        // Root, its four children, then the four children of the one non-empty tile
        assert_eq!(index.tile_count(), 9);
        assert_eq!(index.total(), 9);
        assert_eq!(index.stats().get(&2), Some(&4));

        assert!(index.indexed_tile(0, 0, 0).unwrap().source.is_none());
        assert!(index.indexed_tile(1, 1, 0).unwrap().source.is_none());
        let leaf = index.indexed_tile(2, 2, 1).unwrap();
        assert_eq!(leaf.source.as_ref().map(Vec::len), Some(1));
        assert_eq!(index.tile_coords()[0], TileCoord::new(0, 0, 0));
    }

    #[test]
    fn test_drill_down_to_max_zoom() {
        let mut index = point_index(10.0, 10.0, TilerOptions::default());
        let target = lng_lat_to_tile(10.0, 10.0, 14);

        let tile = index.get_tile(14, target.x as i64, target.y).unwrap();
        assert_eq!(tile.features.len(), 1);
        assert!(tile.transformed);
        match &tile.features[0].geometry {
            TileGeometry::Points(points) => {
                let [px, py] = points[0];
                assert!((0.0..4096.0).contains(&px) && (0.0..4096.0).contains(&py));
            }
            other => panic!("Expected points, got {:?}", other),
        }

        // Ancestors were split and dropped their source
        assert!(index.indexed_tile(0, 0, 0).unwrap().source.is_none());
        let parent = target.parent().unwrap();
        assert!(index.indexed_tile(parent.z, parent.x, parent.y).unwrap().source.is_none());
    }

    #[test]
    fn test_get_tile_wraps_x() {
        let options = TilerOptions::default().with_index_max_zoom(1).with_index_max_points(0);
        let mut index = point_index(170.0, 10.0, options);

        let wrapped = index.get_tile(1, -1, 0).map(|t| (t.x, t.y, t.features.len()));
        assert_eq!(wrapped, Some((1, 0, 1)));
    }

    #[test]
    fn test_get_tile_out_of_range() {
        let mut index = point_index(10.0, 10.0, TilerOptions::default());
        assert!(index.get_tile(25, 0, 0).is_none());
    }

    #[test]
    fn test_no_source_means_no_tile() {
        let options = TilerOptions::default()
            .with_max_zoom(2)
            .with_index_max_zoom(2)
            .with_index_max_points(0);
        let mut index = point_index(10.0, 10.0, options);

        // Beyond max zoom the parent keeps its source but splitting stops there
        assert!(index.get_tile(3, 4, 3).is_none());
    }

    #[test]
    fn test_empty_input_builds_no_tiles() {
        let data = parse_geojson(r#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        let mut index = TileIndex::new(&data, TilerOptions::default()).unwrap();
        assert_eq!(index.tile_count(), 0);
        assert!(index.get_tile(0, 0, 0).is_none());
    }
}
