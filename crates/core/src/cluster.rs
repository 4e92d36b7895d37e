//! Hierarchical point clustering.
//!
//! Points are indexed in a [`KdTree`] at `max_zoom + 1`; then, from `max_zoom` down to
//! `min_zoom`, every level is built by greedily merging the previous level's points
//! that fall within `radius` pixels of each other into weighted-centroid clusters.
//!
//! # Cluster ids
//!
//! A cluster created at zoom `z` from the `i`-th point of level `z + 1` gets the id
//! `(i << 5) + (z + 1) + n`, where `n` is the number of input points. The origin
//! point and level are recovered with [`Supercluster::origin_id`] and
//! [`Supercluster::origin_zoom`], which is how children and leaves are found again
//! without storing explicit child lists.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use geojson::feature::Id;
use geojson::{Feature, Geometry, JsonObject, Value};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::spatial_index::KdTree;
use crate::tile::{lat_to_y, lng_to_x, x_to_lng, y_to_lat};
use crate::tile_builder::{FeatureKind, TileFeature, TileGeometry};
use crate::{Error, Result};

/// Extracts the properties a point contributes to its clusters.
pub type MapFn = Arc<dyn Fn(&JsonObject) -> JsonObject + Send + Sync>;

/// Folds a point's (mapped) properties into a cluster's accumulated properties.
pub type ReduceFn = Arc<dyn Fn(&mut JsonObject, &JsonObject) + Send + Sync>;

// ============================================================================
// Configuration
// ============================================================================

/// Options for a [`Supercluster`] index.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterOptions {
    /// Lowest zoom level clusters are generated for.
    pub min_zoom: u8,
    /// Highest zoom level clusters are generated for.
    pub max_zoom: u8,
    /// Minimum number of points that form a cluster.
    pub min_points: usize,
    /// Cluster radius in pixels.
    pub radius: f64,
    /// Tile extent; `radius` is relative to it.
    pub extent: f64,
    /// KD-tree leaf size.
    pub node_size: usize,
    /// Log per-zoom clustering timings.
    pub log: bool,
    /// Use the input index as the id of unclustered points in tiles.
    pub generate_id: bool,
    #[serde(skip)]
    pub map: Option<MapFn>,
    #[serde(skip)]
    pub reduce: Option<ReduceFn>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 16,
            min_points: 2,
            radius: 40.0,
            extent: 512.0,
            node_size: 64,
            log: false,
            generate_id: false,
            map: None,
            reduce: None,
        }
    }
}

impl fmt::Debug for ClusterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterOptions")
            .field("min_zoom", &self.min_zoom)
            .field("max_zoom", &self.max_zoom)
            .field("min_points", &self.min_points)
            .field("radius", &self.radius)
            .field("extent", &self.extent)
            .field("node_size", &self.node_size)
            .field("log", &self.log)
            .field("generate_id", &self.generate_id)
            .field("map", &self.map.is_some())
            .field("reduce", &self.reduce.is_some())
            .finish()
    }
}

impl ClusterOptions {
    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_min_points(mut self, min_points: usize) -> Self {
        self.min_points = min_points;
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_extent(mut self, extent: f64) -> Self {
        self.extent = extent;
        self
    }

    pub fn with_node_size(mut self, node_size: usize) -> Self {
        self.node_size = node_size;
        self
    }

    pub fn with_log(mut self, enabled: bool) -> Self {
        self.log = enabled;
        self
    }

    pub fn with_generate_id(mut self, enabled: bool) -> Self {
        self.generate_id = enabled;
        self
    }

    pub fn with_map(
        mut self,
        map: impl Fn(&JsonObject) -> JsonObject + Send + Sync + 'static,
    ) -> Self {
        self.map = Some(Arc::new(map));
        self
    }

    pub fn with_reduce(
        mut self,
        reduce: impl Fn(&mut JsonObject, &JsonObject) + Send + Sync + 'static,
    ) -> Self {
        self.reduce = Some(Arc::new(reduce));
        self
    }

    pub fn validate(&self) -> Result<()> {
        // The origin zoom of a cluster is stored in 5 bits
        if self.max_zoom > 30 {
            return Err(Error::InvalidConfig(format!(
                "maxZoom must be at most 30, got {}",
                self.max_zoom
            )));
        }
        if self.min_zoom > self.max_zoom {
            return Err(Error::InvalidConfig(format!(
                "minZoom ({}) must not exceed maxZoom ({})",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.min_points == 0 {
            return Err(Error::InvalidConfig("minPoints must be at least 1".to_string()));
        }
        if !(self.radius > 0.0) || !(self.extent > 0.0) {
            return Err(Error::InvalidConfig(
                "radius and extent must be positive".to_string(),
            ));
        }
        if self.node_size == 0 {
            return Err(Error::InvalidConfig("nodeSize must be positive".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Index
// ============================================================================

/// A point or cluster on one zoom level.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPoint {
    /// Projected x, rounded to `f32` precision.
    pub x: f64,
    /// Projected y, rounded to `f32` precision.
    pub y: f64,
    /// Last zoom this record was processed at; `None` until clustered.
    pub zoom: Option<u8>,
    /// Input index for single points, cluster id for clusters.
    pub id: usize,
    /// Cluster this record was merged into.
    pub parent_id: Option<usize>,
    pub num_points: usize,
    /// Index of the reduced cluster properties.
    pub properties: Option<usize>,
}

impl ClusterPoint {
    pub fn is_cluster(&self) -> bool {
        self.num_points > 1
    }

    #[inline]
    fn unvisited(&self, zoom: u8) -> bool {
        self.zoom.map_or(true, |z| z > zoom)
    }
}

#[derive(Debug, Clone, Default)]
struct Level {
    tree: KdTree,
    points: Vec<ClusterPoint>,
}

impl Level {
    fn new(points: Vec<ClusterPoint>, node_size: usize) -> Self {
        let tree = KdTree::new(&points, |p| p.x, |p| p.y, node_size);
        Level { tree, points }
    }
}

/// Point clustering index across zoom levels.
#[derive(Debug, Clone)]
pub struct Supercluster {
    options: ClusterOptions,
    /// One level per zoom, `0..=max_zoom + 1`.
    levels: Vec<Level>,
    points: Vec<Feature>,
    cluster_props: Vec<JsonObject>,
}

impl Supercluster {
    pub fn new(options: ClusterOptions) -> Result<Self> {
        options.validate()?;
        let levels = vec![Level::default(); options.max_zoom as usize + 2];
        Ok(Supercluster {
            options,
            levels,
            points: Vec::new(),
            cluster_props: Vec::new(),
        })
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// The input features, as loaded.
    pub fn points(&self) -> &[Feature] {
        &self.points
    }

    /// Index `points` and cluster them on every zoom level.
    ///
    /// Features without a `Point` geometry are ignored but keep their position in the
    /// input, so leaf indices always refer to `points`.
    pub fn load(&mut self, points: Vec<Feature>) -> &mut Self {
        let start = Instant::now();
        let min_zoom = self.options.min_zoom;
        let max_zoom = self.options.max_zoom;
        let node_size = self.options.node_size;

        self.points = points;
        self.cluster_props.clear();

        let mut leaves = Vec::with_capacity(self.points.len());
        for (i, feature) in self.points.iter().enumerate() {
            let Some(Value::Point(position)) = feature.geometry.as_ref().map(|g| &g.value) else {
                continue;
            };
            let [lng, lat, ..] = position[..] else {
                continue;
            };
            leaves.push(ClusterPoint {
                x: round_f32(lng_to_x(lng)),
                y: round_f32(lat_to_y(lat)),
                zoom: None,
                id: i,
                parent_id: None,
                num_points: 1,
                properties: None,
            });
        }

        if self.options.log {
            log::info!("prepare {} points in {:?}", leaves.len(), start.elapsed());
        }
        self.levels[max_zoom as usize + 1] = Level::new(leaves, node_size);

        for zoom in (min_zoom..=max_zoom).rev() {
            let now = Instant::now();
            let previous = &mut self.levels[zoom as usize + 1];
            let next = cluster_level(
                &mut previous.points,
                &previous.tree,
                zoom,
                &self.options,
                &self.points,
                &mut self.cluster_props,
            );
            self.levels[zoom as usize] = Level::new(next, node_size);

            if self.options.log {
                log::info!(
                    "z{}: {} clusters in {}ms",
                    zoom,
                    self.levels[zoom as usize].points.len(),
                    now.elapsed().as_millis()
                );
            }
        }

        if self.options.log {
            log::info!("total time: {:?}", start.elapsed());
        }
        self
    }

    /// Points and clusters of the level used for `zoom`.
    pub fn cluster_points(&self, zoom: u8) -> &[ClusterPoint] {
        &self.levels[self.limit_zoom(zoom)].points
    }

    /// Clusters and points inside `[west, south, east, north]` at `zoom`.
    ///
    /// Boxes crossing the antimeridian (`west > east` after normalisation) are
    /// queried as two halves; boxes 360 degrees wide or more cover the whole world.
    pub fn get_clusters(&self, bbox: [f64; 4], zoom: u8) -> Vec<Feature> {
        let mut min_lng = normalize_lng(bbox[0]);
        let min_lat = bbox[1].clamp(-90.0, 90.0);
        let mut max_lng = if bbox[2] == 180.0 {
            180.0
        } else {
            normalize_lng(bbox[2])
        };
        let max_lat = bbox[3].clamp(-90.0, 90.0);

        if bbox[2] - bbox[0] >= 360.0 {
            min_lng = -180.0;
            max_lng = 180.0;
        } else if min_lng > max_lng {
            let mut eastern = self.get_clusters([min_lng, min_lat, 180.0, max_lat], zoom);
            let western = self.get_clusters([-180.0, min_lat, max_lng, max_lat], zoom);
            eastern.extend(western);
            return eastern;
        }

        let level = &self.levels[self.limit_zoom(zoom)];
        level
            .tree
            .range(
                lng_to_x(min_lng),
                lat_to_y(max_lat),
                lng_to_x(max_lng),
                lat_to_y(min_lat),
            )
            .into_iter()
            .map(|i| self.point_feature(&level.points[i]))
            .collect()
    }

    /// Direct children of a cluster: sub-clusters as cluster features, single points
    /// as the original input features.
    pub fn get_children(&self, cluster_id: usize) -> Result<Vec<Feature>> {
        Ok(self
            .children_of(cluster_id)?
            .into_iter()
            .map(|p| self.point_feature(p))
            .collect())
    }

    /// Input points under a cluster, depth first, skipping `offset` and returning at
    /// most `limit`.
    pub fn get_leaves(&self, cluster_id: usize, limit: usize, offset: usize) -> Result<Vec<Feature>> {
        let mut leaves = Vec::new();
        self.append_leaves(&mut leaves, cluster_id, limit, offset, 0)?;
        Ok(leaves)
    }

    /// The zoom at which a cluster splits into more than one child.
    pub fn get_cluster_expansion_zoom(&self, cluster_id: usize) -> Result<u8> {
        let mut cluster_id = cluster_id;
        let mut expansion_zoom = self.origin_zoom(cluster_id)?.saturating_sub(1);

        while expansion_zoom <= self.options.max_zoom as usize {
            let children = self.children_of(cluster_id)?;
            expansion_zoom += 1;

            match children.as_slice() {
                [only] if only.is_cluster() => cluster_id = only.id,
                _ => break,
            }
        }

        Ok(expansion_zoom as u8)
    }

    /// Tile `(z, x, y)` as point features in `[0, extent)` pixel space.
    ///
    /// Edge columns also pick up points from across the antimeridian. Returns `None`
    /// for empty tiles.
    pub fn get_tile(&self, z: u8, x: u32, y: u32) -> Option<Vec<TileFeature>> {
        let level = &self.levels[self.limit_zoom(z)];
        let z2 = 2f64.powi(z as i32);
        let p = self.options.radius / self.options.extent;
        let (fx, fy) = (x as f64, y as f64);
        let top = (fy - p) / z2;
        let bottom = (fy + 1.0 + p) / z2;

        let mut features = Vec::new();

        let ids = level.tree.range((fx - p) / z2, top, (fx + 1.0 + p) / z2, bottom);
        self.add_tile_features(&mut features, &ids, &level.points, fx, fy, z2);

        if x == 0 {
            let ids = level.tree.range(1.0 - p / z2, top, 1.0, bottom);
            self.add_tile_features(&mut features, &ids, &level.points, z2, fy, z2);
        }
        if fx == z2 - 1.0 {
            let ids = level.tree.range(0.0, top, p / z2, bottom);
            self.add_tile_features(&mut features, &ids, &level.points, -1.0, fy, z2);
        }

        if features.is_empty() {
            None
        } else {
            Some(features)
        }
    }

    /// Index of the point in its origin level that a cluster grew from.
    pub fn origin_id(&self, cluster_id: usize) -> Result<usize> {
        Ok(self.cluster_offset(cluster_id)? >> 5)
    }

    /// Level (`zoom + 1`) whose points a cluster was built from.
    pub fn origin_zoom(&self, cluster_id: usize) -> Result<usize> {
        Ok(self.cluster_offset(cluster_id)? % 32)
    }

    fn cluster_offset(&self, cluster_id: usize) -> Result<usize> {
        cluster_id
            .checked_sub(self.points.len())
            .ok_or(Error::ClusterNotFound)
    }

    fn children_of(&self, cluster_id: usize) -> Result<Vec<&ClusterPoint>> {
        let origin_id = self.origin_id(cluster_id)?;
        let origin_zoom = self.origin_zoom(cluster_id)?;

        let level = self.levels.get(origin_zoom).ok_or(Error::ClusterNotFound)?;
        let origin = level.points.get(origin_id).ok_or(Error::ClusterNotFound)?;

        let r = self.options.radius
            / (self.options.extent * 2f64.powi(origin_zoom as i32 - 1));

        let children: Vec<&ClusterPoint> = level
            .tree
            .within(origin.x, origin.y, r)
            .into_iter()
            .map(|i| &level.points[i])
            .filter(|p| p.parent_id == Some(cluster_id))
            .collect();

        if children.is_empty() {
            return Err(Error::ClusterNotFound);
        }
        Ok(children)
    }

    fn append_leaves(
        &self,
        result: &mut Vec<Feature>,
        cluster_id: usize,
        limit: usize,
        offset: usize,
        mut skipped: usize,
    ) -> Result<usize> {
        for child in self.children_of(cluster_id)? {
            if child.is_cluster() {
                if skipped + child.num_points <= offset {
                    // Skip the whole cluster
                    skipped += child.num_points;
                } else {
                    skipped = self.append_leaves(result, child.id, limit, offset, skipped)?;
                }
            } else if skipped < offset {
                skipped += 1;
            } else {
                result.push(self.points[child.id].clone());
            }

            if result.len() == limit {
                break;
            }
        }
        Ok(skipped)
    }

    fn add_tile_features(
        &self,
        out: &mut Vec<TileFeature>,
        ids: &[usize],
        points: &[ClusterPoint],
        x: f64,
        y: f64,
        z2: f64,
    ) {
        let extent = self.options.extent;

        for &i in ids {
            let point = &points[i];

            let (tags, px, py, id) = if point.is_cluster() {
                let tags = cluster_properties(point, &self.cluster_props);
                (tags, point.x, point.y, Some(Id::Number(point.id.into())))
            } else {
                let input = &self.points[point.id];
                let Some((px, py)) = projected_position(input) else {
                    continue;
                };
                let id = if self.options.generate_id {
                    Some(Id::Number(point.id.into()))
                } else {
                    input.id.clone()
                };
                (input.properties.clone().unwrap_or_default(), px, py, id)
            };

            let position = [
                (extent * (px * z2 - x)).round(),
                (extent * (py * z2 - y)).round(),
            ];

            out.push(TileFeature {
                geometry: TileGeometry::Points(vec![position]),
                kind: FeatureKind::Point,
                tags: Arc::new(tags),
                id,
            });
        }
    }

    fn point_feature(&self, point: &ClusterPoint) -> Feature {
        if !point.is_cluster() {
            return self.points[point.id].clone();
        }
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![
                x_to_lng(point.x),
                y_to_lat(point.y),
            ]))),
            id: Some(Id::Number(point.id.into())),
            properties: Some(cluster_properties(point, &self.cluster_props)),
            foreign_members: None,
        }
    }

    fn limit_zoom(&self, zoom: u8) -> usize {
        zoom.clamp(self.options.min_zoom, self.options.max_zoom + 1) as usize
    }
}

/// Build level `zoom` from the points of level `zoom + 1`.
fn cluster_level(
    points: &mut [ClusterPoint],
    tree: &KdTree,
    zoom: u8,
    options: &ClusterOptions,
    inputs: &[Feature],
    cluster_props: &mut Vec<JsonObject>,
) -> Vec<ClusterPoint> {
    let r = options.radius / (options.extent * 2f64.powi(zoom as i32));
    let mut next = Vec::new();

    for i in 0..points.len() {
        if !points[i].unvisited(zoom) {
            continue;
        }
        points[i].zoom = Some(zoom);

        let (x, y) = (points[i].x, points[i].y);
        let neighbors = tree.within(x, y, r);

        let num_points_origin = points[i].num_points;
        let num_points = num_points_origin
            + neighbors
                .iter()
                .filter(|&&k| points[k].unvisited(zoom))
                .map(|&k| points[k].num_points)
                .sum::<usize>();

        if num_points > num_points_origin && num_points >= options.min_points {
            let mut wx = x * num_points_origin as f64;
            let mut wy = y * num_points_origin as f64;
            let id = (i << 5) + (zoom as usize + 1) + inputs.len();
            let mut reduced: Option<JsonObject> = None;

            for &k in &neighbors {
                if !points[k].unvisited(zoom) {
                    continue;
                }
                points[k].zoom = Some(zoom);

                let weight = points[k].num_points as f64;
                wx += points[k].x * weight;
                wy += points[k].y * weight;
                points[k].parent_id = Some(id);

                if let Some(reduce) = &options.reduce {
                    let acc = reduced.get_or_insert_with(|| {
                        mapped_properties(&points[i], options, inputs, cluster_props.as_slice())
                    });
                    reduce(acc, &mapped_properties(&points[k], options, inputs, cluster_props.as_slice()));
                }
            }

            points[i].parent_id = Some(id);
            let properties = reduced.map(|props| {
                cluster_props.push(props);
                cluster_props.len() - 1
            });

            next.push(ClusterPoint {
                x: round_f32(wx / num_points as f64),
                y: round_f32(wy / num_points as f64),
                zoom: None,
                id,
                parent_id: None,
                num_points,
                properties,
            });
        } else {
            next.push(points[i].clone());

            // Neighbours too light to form a cluster move on as they are
            if num_points > 1 {
                for &k in &neighbors {
                    if !points[k].unvisited(zoom) {
                        continue;
                    }
                    points[k].zoom = Some(zoom);
                    next.push(points[k].clone());
                }
            }
        }
    }

    next
}

fn mapped_properties(
    point: &ClusterPoint,
    options: &ClusterOptions,
    inputs: &[Feature],
    cluster_props: &[JsonObject],
) -> JsonObject {
    if point.is_cluster() {
        return point
            .properties
            .and_then(|i| cluster_props.get(i))
            .cloned()
            .unwrap_or_default();
    }

    let empty = JsonObject::new();
    let original = inputs[point.id].properties.as_ref().unwrap_or(&empty);
    match &options.map {
        Some(map) => map(original),
        None => original.clone(),
    }
}

fn cluster_properties(point: &ClusterPoint, cluster_props: &[JsonObject]) -> JsonObject {
    let mut properties = point
        .properties
        .and_then(|i| cluster_props.get(i))
        .cloned()
        .unwrap_or_default();

    properties.insert("cluster".to_string(), json!(true));
    properties.insert("cluster_id".to_string(), json!(point.id));
    properties.insert("point_count".to_string(), json!(point.num_points));
    properties.insert(
        "point_count_abbreviated".to_string(),
        abbreviate_count(point.num_points),
    );
    properties
}

/// `12345` becomes `"12k"`, `1234` becomes `"1.2k"`, smaller counts stay numbers.
pub fn abbreviate_count(count: usize) -> serde_json::Value {
    let n = count as f64;
    if count >= 10_000 {
        json!(format!("{}k", (n / 1000.0).round()))
    } else if count >= 1000 {
        json!(format!("{}k", (n / 100.0).round() / 10.0))
    } else {
        json!(count)
    }
}

fn projected_position(feature: &Feature) -> Option<(f64, f64)> {
    match feature.geometry.as_ref().map(|g| &g.value) {
        Some(Value::Point(position)) if position.len() >= 2 => {
            Some((lng_to_x(position[0]), lat_to_y(position[1])))
        }
        _ => None,
    }
}

fn normalize_lng(lng: f64) -> f64 {
    ((lng + 180.0) % 360.0 + 360.0) % 360.0 - 180.0
}

#[inline]
fn round_f32(v: f64) -> f64 {
    v as f32 as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lng: f64, lat: f64, props: serde_json::Value) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![lng, lat]))),
            id: None,
            properties: props.as_object().cloned(),
            foreign_members: None,
        }
    }

    fn cluster_id(feature: &Feature) -> Option<usize> {
        feature
            .property("cluster_id")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
    }

    fn loaded(points: Vec<Feature>, options: ClusterOptions) -> Supercluster {
        let mut index = Supercluster::new(options).unwrap();
        index.load(points);
        index
    }

    #[test]
    fn test_options_validation() {
        assert!(ClusterOptions::default().validate().is_ok());
        assert!(ClusterOptions::default().with_min_points(0).validate().is_err());
        assert!(ClusterOptions::default().with_node_size(0).validate().is_err());
        assert!(ClusterOptions::default().with_radius(0.0).validate().is_err());
        assert!(ClusterOptions::default().with_zoom_range(5, 3).validate().is_err());
        assert!(ClusterOptions::default().with_zoom_range(0, 31).validate().is_err());
    }

    #[test]
    fn test_abbreviate_count() {
        assert_eq!(abbreviate_count(5), json!(5));
        assert_eq!(abbreviate_count(1000), json!("1k"));
        assert_eq!(abbreviate_count(1234), json!("1.2k"));
        assert_eq!(abbreviate_count(12_345), json!("12k"));
    }

    #[test]
    fn test_nearby_points_merge_at_low_zoom() {
        let points = vec![
            point(0.0, 0.0, json!({})),
            point(0.1, 0.1, json!({})),
            point(0.2, 0.0, json!({})),
            point(100.0, 40.0, json!({})),
        ];
        let index = loaded(points, ClusterOptions::default());

        let clusters = index.get_clusters([-180.0, -85.0, 180.0, 85.0], 0);
        assert_eq!(clusters.len(), 2);

        let cluster = clusters
            .iter()
            .find(|f| f.contains_property("cluster"))
            .expect("one cluster");
        assert_eq!(cluster.property("point_count"), Some(&json!(3)));

        // At max zoom nothing is merged
        assert_eq!(index.get_clusters([-180.0, -85.0, 180.0, 85.0], 16).len(), 4);
    }

    #[test]
    fn test_cluster_id_round_trip() {
        let points: Vec<Feature> = (0..3).map(|i| point(i as f64 * 0.01, 0.0, json!({}))).collect();
        let index = loaded(points, ClusterOptions::default().with_zoom_range(0, 5));

        let clusters = index.get_clusters([-180.0, -85.0, 180.0, 85.0], 5);
        let id = cluster_id(&clusters[0]).unwrap();

        // Clustered at zoom 5 from level 6
        assert_eq!(index.origin_zoom(id).unwrap(), 6);
        let origin = &index.cluster_points(6)[index.origin_id(id).unwrap()];
        assert_eq!(origin.parent_id, Some(id));
    }

    #[test]
    fn test_unknown_cluster_id() {
        let index = loaded(vec![point(0.0, 0.0, json!({}))], ClusterOptions::default());

        let err = index.get_children(0).unwrap_err();
        assert_eq!(err.to_string(), "No cluster with the specified id.");
        assert!(matches!(index.get_leaves(12345, 10, 0), Err(Error::ClusterNotFound)));
        assert!(index.get_cluster_expansion_zoom(999).is_err());
    }

    #[test]
    fn test_children_and_expansion_zoom() {
        // Two tight pairs far enough apart to separate a few zooms in
        let points = vec![
            point(0.0, 0.0, json!({})),
            point(0.001, 0.0, json!({})),
            point(2.0, 0.0, json!({})),
            point(2.001, 0.0, json!({})),
        ];
        let index = loaded(points, ClusterOptions::default());

        let top = index.get_clusters([-180.0, -85.0, 180.0, 85.0], 0);
        assert_eq!(top.len(), 1);
        let id = cluster_id(&top[0]).unwrap();

        let expansion = index.get_cluster_expansion_zoom(id).unwrap();
        let children = index
            .get_clusters([-180.0, -85.0, 180.0, 85.0], expansion);
        assert_eq!(children.len(), 2, "split at zoom {}", expansion);
        assert!(children
            .iter()
            .all(|c| c.property("point_count") == Some(&json!(2))));

        let direct = index.get_children(id).unwrap();
        let total: u64 = direct
            .iter()
            .map(|c| c.property("point_count").and_then(|v| v.as_u64()).unwrap_or(1))
            .sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_leaves_pagination() {
        let points: Vec<Feature> = (0..10)
            .map(|i| point(i as f64 * 0.01, 0.0, json!({"n": i})))
            .collect();
        let index = loaded(points, ClusterOptions::default());
        let top = index.get_clusters([-180.0, -85.0, 180.0, 85.0], 0);
        let id = cluster_id(&top[0]).unwrap();

        let all = index.get_leaves(id, usize::MAX, 0).unwrap();
        assert_eq!(all.len(), 10);

        let page = index.get_leaves(id, 3, 4).unwrap();
        assert_eq!(page.len(), 3);
        let expected: Vec<_> = all[4..7].iter().map(|f| f.property("n").cloned()).collect();
        let got: Vec<_> = page.iter().map(|f| f.property("n").cloned()).collect();
        assert_eq!(got, expected);

        assert!(index.get_leaves(id, 10, 10).unwrap().is_empty());
    }

    #[test]
    fn test_map_reduce_properties() {
        let points = vec![
            point(0.0, 0.0, json!({"sum": 1})),
            point(0.01, 0.0, json!({"sum": 2})),
            point(0.02, 0.0, json!({"sum": 3})),
        ];
        let options = ClusterOptions::default()
            .with_map(|props| {
                let mut out = JsonObject::new();
                out.insert("sum".to_string(), props.get("sum").cloned().unwrap_or(json!(0)));
                out
            })
            .with_reduce(|acc, props| {
                let a = acc.get("sum").and_then(|v| v.as_i64()).unwrap_or(0);
                let b = props.get("sum").and_then(|v| v.as_i64()).unwrap_or(0);
                acc.insert("sum".to_string(), json!(a + b));
            });
        let index = loaded(points, options);

        let top = index.get_clusters([-180.0, -85.0, 180.0, 85.0], 0);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].property("sum"), Some(&json!(6)));
    }

    #[test]
    fn test_antimeridian_bbox() {
        let points = vec![
            point(179.0, 0.0, json!({})),
            point(-179.0, 0.0, json!({})),
            point(0.0, 0.0, json!({})),
        ];
        let index = loaded(points, ClusterOptions::default());

        assert_eq!(index.get_clusters([170.0, -10.0, -170.0, 10.0], 16).len(), 2);
        assert_eq!(index.get_clusters([-170.0, -10.0, 170.0, 10.0], 16).len(), 1);
        assert_eq!(index.get_clusters([-540.0, -10.0, 540.0, 10.0], 16).len(), 3);
    }

    #[test]
    fn test_tile_features() {
        let mut points = vec![
            point(-179.9, 0.0, json!({"name": "west"})),
            point(10.0, 10.0, json!({"name": "a"})),
        ];
        points[1].id = Some(Id::String("a".to_string()));
        let index = loaded(points, ClusterOptions::default());

        let coord = crate::tile::lng_lat_to_tile(10.0, 10.0, 16);
        let features = index.get_tile(16, coord.x, coord.y).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id, Some(Id::String("a".to_string())));
        assert_eq!(features[0].kind, FeatureKind::Point);

        // The east edge column sees the point just across the antimeridian
        let east = index.get_tile(1, 1, 0).or_else(|| index.get_tile(1, 1, 1)).unwrap();
        assert!(east.iter().any(|f| f.tags.get("name") == Some(&json!("west"))));

        assert!(index.get_tile(16, 0, 0).is_none());
    }

    #[test]
    fn test_generate_id_in_tiles() {
        let points = vec![point(10.0, 10.0, json!({}))];
        let index = loaded(points, ClusterOptions::default().with_generate_id(true));
        let features = index.get_tile(0, 0, 0).unwrap();
        assert_eq!(features[0].id, Some(Id::Number(0.into())));
    }

    #[test]
    fn test_non_point_features_skipped() {
        let mut line = point(0.0, 0.0, json!({}));
        line.geometry = Some(Geometry::new(Value::LineString(vec![
            vec![0.0, 0.0],
            vec![1.0, 1.0],
        ])));
        let index = loaded(vec![line, point(5.0, 5.0, json!({}))], ClusterOptions::default());

        let all = index.get_clusters([-180.0, -85.0, 180.0, 85.0], 16);
        assert_eq!(all.len(), 1);
        assert_eq!(index.cluster_points(17)[0].id, 1);
    }
}
