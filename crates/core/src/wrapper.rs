//! Vector-tile compatible views over generated tiles.
//!
//! Renderers written against decoded vector tiles expect `layers` holding features that
//! can load integer geometry, report a bbox and convert themselves back to GeoJSON. The
//! wrappers here expose generated tiles through that shape without encoding to protobuf.
//!
//! Tiles must already be in pixel space (see [`Tile::transform`]).

use geo::{Coord, LineString, Rect, Winding};
use geojson::feature::Id;
use geojson::{Feature, Geometry, JsonObject, Value};

use crate::tile::{x_to_lng, y_to_lat};
use crate::tile_builder::{FeatureKind, Tile, TileFeature, TileGeometry};

/// Vector tile version reported by every layer.
pub const VERSION: u32 = 2;

// ============================================================================
// Tile
// ============================================================================

/// A set of named layers.
#[derive(Debug, Clone, Default)]
pub struct TileWrapper {
    layers: Vec<LayerWrapper>,
}

impl TileWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a transformed tile as a single layer.
    pub fn from_tile(tile: &Tile, layer: impl Into<String>, extent: u32) -> Self {
        Self::new().with_layer(layer, tile.features.clone(), extent)
    }

    /// Add a layer, replacing any layer with the same name.
    pub fn with_layer(
        mut self,
        name: impl Into<String>,
        features: Vec<TileFeature>,
        extent: u32,
    ) -> Self {
        let layer = LayerWrapper {
            name: name.into(),
            extent,
            features,
        };
        self.layers.retain(|l| l.name != layer.name);
        self.layers.push(layer);
        self
    }

    pub fn layer(&self, name: &str) -> Option<&LayerWrapper> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerWrapper> {
        self.layers.iter()
    }
}

// ============================================================================
// Layer
// ============================================================================

#[derive(Debug, Clone)]
pub struct LayerWrapper {
    name: String,
    extent: u32,
    features: Vec<TileFeature>,
}

impl LayerWrapper {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extent(&self) -> u32 {
        self.extent
    }

    pub fn version(&self) -> u32 {
        VERSION
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn feature(&self, i: usize) -> Option<FeatureWrapper<'_>> {
        self.features.get(i).map(|feature| FeatureWrapper {
            feature,
            extent: self.extent,
        })
    }

    pub fn features(&self) -> impl Iterator<Item = FeatureWrapper<'_>> {
        (0..self.len()).filter_map(|i| self.feature(i))
    }
}

// ============================================================================
// Feature
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct FeatureWrapper<'a> {
    feature: &'a TileFeature,
    extent: u32,
}

impl<'a> FeatureWrapper<'a> {
    /// Numeric id, if the feature has one. String ids are not representable.
    pub fn id(&self) -> Option<u64> {
        match &self.feature.id {
            Some(Id::Number(n)) => n.as_u64(),
            _ => None,
        }
    }

    pub fn kind(&self) -> FeatureKind {
        self.feature.kind
    }

    pub fn properties(&self) -> &'a JsonObject {
        &self.feature.tags
    }

    pub fn extent(&self) -> u32 {
        self.extent
    }

    /// Geometry as rings of integer points. Each point of a point feature is its own
    /// ring.
    pub fn load_geometry(&self) -> Vec<Vec<Coord<i32>>> {
        let coord = |p: &[f64; 2]| Coord {
            x: p[0] as i32,
            y: p[1] as i32,
        };
        match &self.feature.geometry {
            TileGeometry::Points(points) => points.iter().map(|p| vec![coord(p)]).collect(),
            TileGeometry::Rings(rings) => rings
                .iter()
                .map(|ring| ring.iter().map(coord).collect())
                .collect(),
        }
    }

    /// Bounding box in tile pixels, `None` for empty geometry.
    pub fn bbox(&self) -> Option<Rect<i32>> {
        let mut coords = self.load_geometry().into_iter().flatten();
        let first = coords.next()?;
        let (min, max) = coords.fold((first, first), |(min, max), c| {
            (
                Coord {
                    x: min.x.min(c.x),
                    y: min.y.min(c.y),
                },
                Coord {
                    x: max.x.max(c.x),
                    y: max.y.max(c.y),
                },
            )
        });
        Some(Rect::new(min, max))
    }

    /// Convert back to a lon/lat GeoJSON feature as seen from tile `(x, y, z)`.
    ///
    /// Polygon rings are grouped into polygons by winding: the first ring's orientation
    /// marks outer rings. Single-part results use the non-Multi geometry type.
    pub fn to_geojson(&self, x: u32, y: u32, z: u8) -> Feature {
        let extent = self.extent as f64;
        let size = extent * 2f64.powi(z as i32);
        let x0 = extent * x as f64;
        let y0 = extent * y as f64;

        let project = |ring: &[Coord<i32>]| -> Vec<Vec<f64>> {
            ring.iter()
                .map(|p| {
                    vec![
                        x_to_lng((p.x as f64 + x0) / size),
                        y_to_lat((p.y as f64 + y0) / size),
                    ]
                })
                .collect()
        };

        let rings = self.load_geometry();
        let value = match self.feature.kind {
            FeatureKind::Point => {
                let mut points: Vec<Vec<f64>> = rings
                    .iter()
                    .filter_map(|ring| ring.first())
                    .flat_map(|p| project(std::slice::from_ref(p)))
                    .collect();
                if points.len() == 1 {
                    Value::Point(points.remove(0))
                } else {
                    Value::MultiPoint(points)
                }
            }
            FeatureKind::Line => {
                let mut lines: Vec<_> = rings.iter().map(|r| project(r.as_slice())).collect();
                if lines.len() == 1 {
                    Value::LineString(lines.remove(0))
                } else {
                    Value::MultiLineString(lines)
                }
            }
            FeatureKind::Polygon => {
                let mut polygons: Vec<Vec<Vec<Vec<f64>>>> = classify_rings(&rings)
                    .into_iter()
                    .map(|polygon| polygon.iter().map(|r| project(*r)).collect())
                    .collect();
                if polygons.len() == 1 {
                    Value::Polygon(polygons.remove(0))
                } else {
                    Value::MultiPolygon(polygons)
                }
            }
        };

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(value)),
            id: self.feature.id.clone(),
            properties: Some((*self.feature.tags).clone()),
            foreign_members: None,
        }
    }
}

/// Group rings into polygons. A ring with the same winding as the first ring starts
/// a new polygon; the others are holes of the current one. Rings without a winding
/// (open or zero-area) are dropped.
pub fn classify_rings(rings: &[Vec<Coord<i32>>]) -> Vec<Vec<&[Coord<i32>]>> {
    if rings.len() <= 1 {
        return vec![rings.iter().map(Vec::as_slice).collect()];
    }

    let mut polygons = Vec::new();
    let mut polygon: Vec<&[Coord<i32>]> = Vec::new();
    let mut outer_order = None;

    for ring in rings {
        let Some(order) = LineString::from(ring.clone()).winding_order() else {
            continue;
        };
        let outer = *outer_order.get_or_insert(order);

        if order == outer && !polygon.is_empty() {
            polygons.push(std::mem::take(&mut polygon));
        }
        polygon.push(ring);
    }
    if !polygon.is_empty() {
        polygons.push(polygon);
    }
    polygons
}
