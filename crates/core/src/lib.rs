//! Core geometry engine for vector map workers.
//!
//! This library turns raw map data into tiled, simplified, clipped geometry ready for
//! rendering. Three engines share the crate:
//!
//! - **GeoJSON tiling** ([`index`]): converts GeoJSON into projected features, simplifies
//!   them once with Douglas-Peucker ranking, then splits them down an adaptive quad-tree
//!   of buffered, clipped tiles. Tiles deeper than the pre-built index are generated on
//!   demand by drilling down from the nearest ancestor.
//! - **Point clustering** ([`cluster`]): a KD-tree per zoom level, with greedy radius
//!   clustering from the highest zoom down.
//! - **Temporal-grid aggregation** ([`aggregate`]): decodes packed per-cell time series
//!   and emits one feature per cell with sliding-window aggregated values per frame.
//!
//! Output tiles use integer coordinates in a fixed extent and can be read through the
//! vector-tile compatible views in [`wrapper`].
//!
//! # Examples
//!
//! ```
//! use tilecraft_core::{pipeline, TilerOptions};
//!
//! let data = r#"{"type":"Feature","properties":{},
//!     "geometry":{"type":"Point","coordinates":[0,0]}}"#;
//!
//! let options = TilerOptions::default().with_max_zoom(0);
//! let mut index = pipeline::load_geojson(data, options).unwrap();
//!
//! let tile = index.get_tile(0, 0, 0).unwrap();
//! assert_eq!(tile.features.len(), 1);
//! ```

use thiserror::Error;

pub mod aggregate;
pub mod clip;
pub mod cluster;
pub mod convert;
pub mod feature;
pub mod index;
pub mod pipeline;
pub mod simplify;
pub mod spatial_index;
pub mod temporal_grid;
pub mod tile;
pub mod tile_builder;
pub mod time_series;
pub mod wrap;
pub mod wrapper;

pub use aggregate::{
    aggregate, AggregatedTile, AggregationOperation, AggregationOptions, GeomType,
    SublayerCombinationMode,
};
pub use cluster::{ClusterOptions, Supercluster};
pub use feature::{Feature, Geometry, Properties, Ring};
pub use index::{TileIndex, TilerOptions};
pub use tile::{TileBounds, TileCoord};
pub use tile_builder::{FeatureKind, Tile, TileFeature, TileGeometry};
pub use wrapper::{FeatureWrapper, LayerWrapper, TileWrapper};

/// Errors raised by the tiling, clustering and aggregation engines.
///
/// Every error here is a pure computation error (bad input or configuration); none of
/// them is transient.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Input data is not a valid GeoJSON object.")]
    InvalidGeoJson,

    #[error("No cluster with the specified id.")]
    ClusterNotFound,

    #[error("4w-agg::{0}")]
    Aggregation(String),

    #[error("Malformed temporal grid: {0}")]
    MalformedGrid(String),

    #[error("Temporal grid decoding failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
