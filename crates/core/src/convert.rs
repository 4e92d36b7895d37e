//! GeoJSON to intermediate feature conversion.
//!
//! Every position is projected to `[0, 1]` mercator space, every line and ring is
//! ranked by the Douglas-Peucker simplifier at max-zoom tolerance, and each ring is
//! annotated with its size (length or area) so tile building can cull features that
//! are too small to see.

use std::sync::Arc;

use geojson::feature::Id;
use geojson::{GeoJson, JsonObject, JsonValue, Value};

use crate::feature::{Feature, Geometry, Properties, Ring};
use crate::index::TilerOptions;
use crate::simplify::simplify;
use crate::tile::{lat_to_y, lng_to_x};
use crate::{Error, Result};

/// Parse GeoJSON text.
///
/// Anything the parser rejects (malformed JSON, unknown geometry `type`, ...) is
/// reported as [`Error::InvalidGeoJson`].
pub fn parse_geojson(text: &str) -> Result<GeoJson> {
    text.parse::<GeoJson>().map_err(|e| {
        log::debug!("rejected GeoJSON input: {}", e);
        Error::InvalidGeoJson
    })
}

/// Convert a GeoJSON object into projected, simplification-ranked features.
///
/// Features without geometry and geometries with empty coordinates are skipped.
/// Geometry collections are flattened, each member inheriting the parent's id and
/// properties.
pub fn convert(data: &GeoJson, options: &TilerOptions) -> Result<Vec<Feature>> {
    let converter = Converter::new(options);
    let mut features = Vec::new();

    match data {
        GeoJson::FeatureCollection(collection) => {
            for (i, feature) in collection.features.iter().enumerate() {
                converter.convert_feature(&mut features, feature, Some(i))?;
            }
        }
        GeoJson::Feature(feature) => converter.convert_feature(&mut features, feature, None)?,
        GeoJson::Geometry(geometry) => {
            let id = converter.feature_id(None, None, None);
            converter.convert_geometry(&mut features, &id, geometry, &Properties::default())?;
        }
    }

    Ok(features)
}

struct Converter<'a> {
    options: &'a TilerOptions,
    sq_tolerance: f64,
}

impl<'a> Converter<'a> {
    fn new(options: &'a TilerOptions) -> Self {
        let scale = (1u64 << options.max_zoom) as f64 * options.extent as f64;
        let tolerance = options.tolerance / scale;
        Self {
            options,
            sq_tolerance: tolerance * tolerance,
        }
    }

    fn convert_feature(
        &self,
        out: &mut Vec<Feature>,
        feature: &geojson::Feature,
        index: Option<usize>,
    ) -> Result<()> {
        let Some(geometry) = &feature.geometry else {
            return Ok(());
        };
        let id = self.feature_id(feature.id.as_ref(), feature.properties.as_ref(), index);
        let tags: Properties = Arc::new(feature.properties.clone().unwrap_or_default());
        self.convert_geometry(out, &id, geometry, &tags)
    }

    fn feature_id(
        &self,
        id: Option<&Id>,
        properties: Option<&JsonObject>,
        index: Option<usize>,
    ) -> Option<Id> {
        if let Some(key) = &self.options.promote_id {
            return properties
                .and_then(|p| p.get(key))
                .and_then(json_to_id);
        }
        if self.options.generate_id {
            return Some(Id::Number(index.unwrap_or(0).into()));
        }
        id.cloned()
    }

    fn convert_geometry(
        &self,
        out: &mut Vec<Feature>,
        id: &Option<Id>,
        geometry: &geojson::Geometry,
        tags: &Properties,
    ) -> Result<()> {
        let converted = match &geometry.value {
            Value::Point(position) => {
                if position.is_empty() {
                    return Ok(());
                }
                let mut coords = Vec::with_capacity(3);
                convert_point(position, &mut coords)?;
                Geometry::Point(coords)
            }
            Value::MultiPoint(positions) => {
                if positions.is_empty() {
                    return Ok(());
                }
                let mut coords = Vec::with_capacity(positions.len() * 3);
                for position in positions {
                    convert_point(position, &mut coords)?;
                }
                Geometry::MultiPoint(coords)
            }
            Value::LineString(line) => {
                if line.is_empty() {
                    return Ok(());
                }
                Geometry::LineString(self.convert_line(line, false)?)
            }
            Value::MultiLineString(lines) => {
                if lines.is_empty() {
                    return Ok(());
                }
                if self.options.line_metrics {
                    // One feature per line so each keeps its own start/end metrics
                    for line in lines.iter().filter(|l| !l.is_empty()) {
                        let ring = self.convert_line(line, false)?;
                        out.push(Feature::new(
                            id.clone(),
                            Geometry::LineString(ring),
                            tags.clone(),
                        ));
                    }
                    return Ok(());
                }
                Geometry::MultiLineString(self.convert_lines(lines, false)?)
            }
            Value::Polygon(rings) => {
                if rings.is_empty() {
                    return Ok(());
                }
                Geometry::Polygon(self.convert_lines(rings, true)?)
            }
            Value::MultiPolygon(polygons) => {
                if polygons.is_empty() {
                    return Ok(());
                }
                let polygons = polygons
                    .iter()
                    .map(|rings| self.convert_lines(rings, true))
                    .collect::<Result<Vec<_>>>()?;
                Geometry::MultiPolygon(polygons)
            }
            Value::GeometryCollection(members) => {
                for member in members {
                    self.convert_geometry(out, id, member, tags)?;
                }
                return Ok(());
            }
        };

        out.push(Feature::new(id.clone(), converted, tags.clone()));
        Ok(())
    }

    fn convert_lines(&self, rings: &[Vec<Vec<f64>>], is_polygon: bool) -> Result<Vec<Ring>> {
        rings
            .iter()
            .map(|ring| self.convert_line(ring, is_polygon))
            .collect()
    }

    /// Project one line or ring, measure it and rank its vertices.
    fn convert_line(&self, ring: &[Vec<f64>], is_polygon: bool) -> Result<Ring> {
        let mut coords = Vec::with_capacity(ring.len() * 3);
        let mut size = 0.0;
        let (mut x0, mut y0) = (0.0, 0.0);

        for (j, position) in ring.iter().enumerate() {
            let (x, y) = project(position)?;
            coords.extend_from_slice(&[x, y, 0.0]);

            if j > 0 {
                if is_polygon {
                    size += (x0 * y - x * y0) / 2.0;
                } else {
                    size += ((x - x0).powi(2) + (y - y0).powi(2)).sqrt();
                }
            }
            x0 = x;
            y0 = y;
        }

        if coords.is_empty() {
            return Ok(Ring::default());
        }

        let last = coords.len() - 3;
        coords[2] = 1.0;
        simplify(&mut coords, 0, last, self.sq_tolerance);
        coords[last + 2] = 1.0;

        Ok(Ring::new(coords, size.abs()))
    }
}

fn project(position: &[f64]) -> Result<(f64, f64)> {
    match position {
        [lng, lat, ..] => Ok((lng_to_x(*lng), lat_to_y(*lat))),
        _ => Err(Error::InvalidGeoJson),
    }
}

fn convert_point(position: &[f64], out: &mut Vec<f64>) -> Result<()> {
    let (x, y) = project(position)?;
    out.extend_from_slice(&[x, y, 0.0]);
    Ok(())
}

fn json_to_id(value: &JsonValue) -> Option<Id> {
    match value {
        JsonValue::String(s) => Some(Id::String(s.clone())),
        JsonValue::Number(n) => Some(Id::Number(n.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn geojson(value: serde_json::Value) -> GeoJson {
        GeoJson::from_json_value(value).expect("valid GeoJSON fixture")
    }

    fn options() -> TilerOptions {
        TilerOptions::default()
    }

    #[test]
    fn test_point_projects_to_center() {
        let data = geojson(json!({"type": "Point", "coordinates": [0.0, 0.0]}));
        let features = convert(&data, &options()).unwrap();

        assert_eq!(features.len(), 1);
        match &features[0].geometry {
            Geometry::Point(c) => {
                assert_eq!(c[0], 0.5);
                assert!((c[1] - 0.5).abs() < 1e-12);
                assert_eq!(c[2], 0.0);
            }
            other => panic!("Expected Point, got {:?}", other),
        }
    }

    #[test]
    fn test_line_length_and_endpoints() {
        let data = geojson(json!({
            "type": "LineString",
            "coordinates": [[0.0, 0.0], [45.0, 0.0], [90.0, 0.0]]
        }));
        let features = convert(&data, &options()).unwrap();

        let Geometry::LineString(ring) = &features[0].geometry else {
            panic!("Expected LineString");
        };
        assert!((ring.size - 0.25).abs() < 1e-12, "length {}", ring.size);
        assert_eq!(ring.start, 0.0);
        assert_eq!(ring.end, ring.size);
        // Collinear middle vertex is not important; endpoints always are
        assert_eq!(ring.coords[2], 1.0);
        assert_eq!(ring.coords[5], 0.0);
        assert_eq!(ring.coords[8], 1.0);
    }

    #[test]
    fn test_polygon_ring_area() {
        let data = geojson(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [90.0, 0.0], [90.0, 45.0], [0.0, 45.0], [0.0, 0.0]]]
        }));
        let features = convert(&data, &options()).unwrap();

        let Geometry::Polygon(rings) = &features[0].geometry else {
            panic!("Expected Polygon");
        };
        let expected = 0.25 * (0.5 - lat_to_y(45.0));
        assert!((rings[0].size - expected).abs() < 1e-12);
    }

    #[test]
    fn test_generate_id_uses_collection_index() {
        let data = geojson(json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [1.0, 1.0]}},
                {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [2.0, 2.0]}}
            ]
        }));
        let features = convert(&data, &options().with_generate_id(true)).unwrap();

        let ids: Vec<_> = features.iter().map(|f| f.id.clone()).collect();
        assert_eq!(
            ids,
            vec![Some(Id::Number(0.into())), Some(Id::Number(1.into()))]
        );
    }

    #[test]
    fn test_promote_id_reads_property() {
        let data = geojson(json!({
            "type": "Feature",
            "id": 99,
            "properties": {"code": "abc"},
            "geometry": {"type": "Point", "coordinates": [1.0, 1.0]}
        }));
        let features = convert(&data, &options().with_promote_id("code")).unwrap();
        assert_eq!(features[0].id, Some(Id::String("abc".to_string())));
    }

    #[test]
    fn test_line_metrics_explodes_multilinestring() {
        let data = geojson(json!({
            "type": "Feature",
            "properties": {"name": "road"},
            "geometry": {
                "type": "MultiLineString",
                "coordinates": [[[0.0, 0.0], [10.0, 0.0]], [[20.0, 0.0], [30.0, 5.0]]]
            }
        }));

        let plain = convert(&data, &options()).unwrap();
        assert_eq!(plain.len(), 1);
        assert!(matches!(plain[0].geometry, Geometry::MultiLineString(_)));

        let exploded = convert(&data, &options().with_line_metrics(true)).unwrap();
        assert_eq!(exploded.len(), 2);
        assert!(exploded
            .iter()
            .all(|f| matches!(f.geometry, Geometry::LineString(_))));
        assert_eq!(exploded[1].tags.get("name"), Some(&json!("road")));
    }

    #[test]
    fn test_geometry_collection_flattened() {
        let data = geojson(json!({
            "type": "Feature",
            "id": "gc",
            "properties": {"kind": "mixed"},
            "geometry": {
                "type": "GeometryCollection",
                "geometries": [
                    {"type": "Point", "coordinates": [0.0, 0.0]},
                    {"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]}
                ]
            }
        }));
        let features = convert(&data, &options()).unwrap();

        assert_eq!(features.len(), 2);
        for f in &features {
            assert_eq!(f.id, Some(Id::String("gc".to_string())));
            assert_eq!(f.tags.get("kind"), Some(&json!("mixed")));
        }
        // Both members share one property map
        assert!(Arc::ptr_eq(&features[0].tags, &features[1].tags));
    }

    #[test]
    fn test_empty_coordinates_skipped() {
        let data = geojson(json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "LineString", "coordinates": []}},
                {"type": "Feature", "properties": {}, "geometry": null}
            ]
        }));
        assert!(convert(&data, &options()).unwrap().is_empty());
    }

    #[test]
    fn test_short_position_rejected() {
        let data = GeoJson::Geometry(geojson::Geometry::new(Value::Point(vec![1.0])));
        assert!(matches!(
            convert(&data, &options()),
            Err(Error::InvalidGeoJson)
        ));
    }

    #[test]
    fn test_unknown_geometry_type_rejected() {
        let result = parse_geojson(r#"{"type": "Circle", "coordinates": [0, 0]}"#);
        assert!(matches!(result, Err(Error::InvalidGeoJson)));

        let err = parse_geojson("not json").unwrap_err();
        assert_eq!(err.to_string(), "Input data is not a valid GeoJSON object.");
    }
}
