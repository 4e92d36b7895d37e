//! Entry points that wire parsing, indexing and output together.
//!
//! Each function covers one worker request:
//!
//! 1. GeoJSON text to a [`TileIndex`] ([`load_geojson`])
//! 2. GeoJSON points to a [`Supercluster`] ([`load_points`])
//! 3. A temporal-grid tile payload to aggregated features ([`parse_temporal_grid`])
//! 4. A generated tile back to lon/lat GeoJSON ([`tile_to_geojson`],
//!    [`cluster_tile_to_geojson`])

use std::time::Instant;

use geojson::{Feature, FeatureCollection, GeoJson};

use crate::aggregate::{aggregate, AggregatedTile, AggregationOptions};
use crate::cluster::{ClusterOptions, Supercluster};
use crate::convert::parse_geojson;
use crate::index::{TileIndex, TilerOptions};
use crate::temporal_grid;
use crate::wrapper::TileWrapper;
use crate::Result;

/// Parse GeoJSON text and build a tile index over it.
pub fn load_geojson(text: &str, options: TilerOptions) -> Result<TileIndex> {
    options.validate()?;
    let data = parse_geojson(text)?;
    TileIndex::new(&data, options)
}

/// Parse GeoJSON points and cluster them.
///
/// Accepts a FeatureCollection, a single Feature or a bare geometry.
pub fn load_points(text: &str, options: ClusterOptions) -> Result<Supercluster> {
    let mut index = Supercluster::new(options)?;
    let points = match parse_geojson(text)? {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![Feature::from(geometry)],
    };
    index.load(points);
    Ok(index)
}

/// Decode a temporal-grid tile payload and aggregate it.
pub fn parse_temporal_grid(bytes: &[u8], options: &AggregationOptions) -> Result<AggregatedTile> {
    let start = Instant::now();
    let data = temporal_grid::decode(bytes)?;
    let tile = aggregate(&data, options)?;
    log::debug!(
        "aggregated {} cells for {}/{} in {:?}",
        tile.main.features.len(),
        options.x,
        options.y,
        start.elapsed()
    );
    Ok(tile)
}

/// Tile `(z, x, y)` of `index` as lon/lat features. `None` when the tile is empty.
pub fn tile_to_geojson(
    index: &mut TileIndex,
    z: u8,
    x: u32,
    y: u32,
    layer: &str,
) -> Option<FeatureCollection> {
    let extent = index.options().extent;
    let tile = index.get_tile(z, x as i64, y)?;
    let wrapped = TileWrapper::from_tile(tile, layer, extent);
    wrapper_to_geojson(&wrapped, layer, z, x, y)
}

/// Cluster tile `(z, x, y)` as lon/lat features. `None` when the tile is empty.
pub fn cluster_tile_to_geojson(
    index: &Supercluster,
    z: u8,
    x: u32,
    y: u32,
    layer: &str,
) -> Option<FeatureCollection> {
    let features = index.get_tile(z, x, y)?;
    let extent = index.options().extent as u32;
    let wrapped = TileWrapper::new().with_layer(layer, features, extent);
    wrapper_to_geojson(&wrapped, layer, z, x, y)
}

fn wrapper_to_geojson(
    wrapped: &TileWrapper,
    layer: &str,
    z: u8,
    x: u32,
    y: u32,
) -> Option<FeatureCollection> {
    let layer = wrapped.layer(layer)?;
    if layer.is_empty() {
        return None;
    }
    Some(FeatureCollection {
        bbox: None,
        features: layer.features().map(|f| f.to_geojson(x, y, z)).collect(),
        foreign_members: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use geojson::Value;

    const POINTS: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","properties":{"n":1},"geometry":{"type":"Point","coordinates":[10,10]}},
        {"type":"Feature","properties":{"n":2},"geometry":{"type":"Point","coordinates":[10.01,10]}}
    ]}"#;

    #[test]
    fn test_load_geojson_rejects_bad_options_before_parsing() {
        let err = load_geojson("not json", TilerOptions::default().with_max_zoom(30)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = load_geojson("not json", TilerOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidGeoJson));
    }

    #[test]
    fn test_tile_round_trip_point() {
        let mut index = load_geojson(POINTS, TilerOptions::default().with_max_zoom(4)).unwrap();
        let collection = tile_to_geojson(&mut index, 0, 0, 0, "layer").unwrap();

        assert_eq!(collection.features.len(), 2);
        let Some(Value::Point(p)) = collection.features[0].geometry.as_ref().map(|g| g.value.clone())
        else {
            panic!("expected a point");
        };
        // One pixel at z0 is under 0.1 degrees
        assert!((p[0] - 10.0).abs() < 0.1, "lng {}", p[0]);
        assert!((p[1] - 10.0).abs() < 0.1, "lat {}", p[1]);

        assert!(tile_to_geojson(&mut index, 4, 0, 0, "layer").is_none());
    }

    #[test]
    fn test_cluster_tile() {
        let index = load_points(POINTS, ClusterOptions::default()).unwrap();
        let collection = cluster_tile_to_geojson(&index, 0, 0, 0, "clusters").unwrap();

        assert_eq!(collection.features.len(), 1);
        let feature = &collection.features[0];
        assert_eq!(feature.property("point_count"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_load_single_point() {
        let index = load_points(
            r#"{"type":"Point","coordinates":[0,0]}"#,
            ClusterOptions::default(),
        )
        .unwrap();
        assert_eq!(index.points().len(), 1);
    }

    #[test]
    fn test_parse_temporal_grid() {
        let bytes = temporal_grid::encode(&[1, 1, 0, 0, 1, 4, 6]);
        let options = AggregationOptions::default().with_delta(1);
        let tile = parse_temporal_grid(&bytes, &options).unwrap();
        assert_eq!(tile.main.features.len(), 1);

        assert!(parse_temporal_grid(&[0xff], &options).is_err());
    }
}
