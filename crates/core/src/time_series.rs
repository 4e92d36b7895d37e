//! Per-frame series for charting.
//!
//! Works from the `rawValues` of interactive aggregation features, so the values are
//! the stored per-frame values, not sliding-window aggregates.

use std::collections::BTreeMap;

use geojson::Feature;

use crate::aggregate::AggregationOperation;
use crate::temporal_grid::CELL_HEADER_LEN;
use crate::{Error, Result};

/// Values of one frame, summed (or averaged) over the input cells.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameValues {
    pub frame: i64,
    /// `frame - quantizeOffset`, the key the frame has in aggregated tiles.
    pub key: i64,
    pub sublayers: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    /// One entry per frame from `min_frame` to `max_frame`, gaps filled with zeros.
    pub values: Vec<FrameValues>,
    pub min_frame: Option<i64>,
    pub max_frame: Option<i64>,
}

#[derive(Debug, Clone)]
struct FrameAccumulator {
    sums: Vec<f64>,
    num_cells: usize,
}

/// Build a dense per-frame series from interactive features.
pub fn get_time_series(
    features: &[Feature],
    num_sublayers: usize,
    quantize_offset: i64,
    operation: AggregationOperation,
) -> Result<TimeSeries> {
    if num_sublayers == 0 {
        return Err(Error::Aggregation("sublayer count must be at least 1".to_string()));
    }

    let mut frames: BTreeMap<i64, FrameAccumulator> = BTreeMap::new();

    for feature in features {
        let raw = raw_values(feature)?;
        let Some(&start_frame) = raw.get(1) else {
            return Err(Error::MalformedGrid("rawValues without a cell header".to_string()));
        };
        if !start_frame.is_finite() || start_frame.fract() != 0.0 {
            return Err(Error::MalformedGrid(format!(
                "start frame {} is not an integer",
                start_frame
            )));
        }
        let start_frame = start_frame as i64;

        let values = raw.get(CELL_HEADER_LEN..).unwrap_or_default();
        for (i, &value) in values.iter().enumerate() {
            let sublayer = i % num_sublayers;
            let frame = start_frame + (i / num_sublayers) as i64;

            let acc = frames.entry(frame).or_insert_with(|| FrameAccumulator {
                sums: vec![0.0; num_sublayers],
                num_cells: 0,
            });
            acc.sums[sublayer] += value;
            if sublayer == num_sublayers - 1 {
                acc.num_cells += 1;
            }
        }
    }

    let (Some(&min_frame), Some(&max_frame)) = (frames.keys().next(), frames.keys().next_back())
    else {
        return Ok(TimeSeries::default());
    };

    let values = (min_frame..=max_frame)
        .map(|frame| {
            let sublayers = match frames.get(&frame) {
                Some(acc) => match operation {
                    AggregationOperation::Sum => acc.sums.clone(),
                    AggregationOperation::Avg => {
                        let n = acc.num_cells.max(1) as f64;
                        acc.sums.iter().map(|v| v / n).collect()
                    }
                },
                None => vec![0.0; num_sublayers],
            };
            FrameValues {
                frame,
                key: frame - quantize_offset,
                sublayers,
            }
        })
        .collect();

    Ok(TimeSeries {
        values,
        min_frame: Some(min_frame),
        max_frame: Some(max_frame),
    })
}

fn raw_values(feature: &Feature) -> Result<Vec<f64>> {
    let Some(array) = feature.property("rawValues").and_then(|v| v.as_array()) else {
        return Err(Error::MalformedGrid("feature has no rawValues array".to_string()));
    };
    array
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| Error::MalformedGrid(format!("non-numeric raw value {}", v)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cell(raw: serde_json::Value) -> Feature {
        let mut feature = Feature::default();
        feature.set_property("rawValues", raw);
        feature
    }

    #[test]
    fn test_sums_cells_per_frame() {
        let features = vec![cell(json!([0, 2, 3, 10, 20])), cell(json!([1, 3, 5, 1, 2, 3]))];
        let series = get_time_series(&features, 1, 0, AggregationOperation::Sum).unwrap();

        assert_eq!(series.min_frame, Some(2));
        assert_eq!(series.max_frame, Some(5));
        let sums: Vec<f64> = series.values.iter().map(|f| f.sublayers[0]).collect();
        assert_eq!(sums, vec![10.0, 21.0, 2.0, 3.0]);
    }

    #[test]
    fn test_average_and_sublayers() {
        let features = vec![cell(json!([0, 0, 0, 2, 4])), cell(json!([1, 0, 0, 6, 8]))];
        let series = get_time_series(&features, 2, 0, AggregationOperation::Avg).unwrap();

        assert_eq!(series.values.len(), 1);
        assert_eq!(series.values[0].sublayers, vec![4.0, 6.0]);
    }

    #[test]
    fn test_gaps_and_offset() {
        let features = vec![cell(json!([0, 10, 10, 1])), cell(json!([1, 13, 13, 4]))];
        let series = get_time_series(&features, 1, 10, AggregationOperation::Sum).unwrap();

        let keys: Vec<i64> = series.values.iter().map(|f| f.key).collect();
        assert_eq!(keys, vec![0, 1, 2, 3]);
        assert_eq!(series.values[1].sublayers, vec![0.0]);
    }

    #[test]
    fn test_empty_and_invalid() {
        let series = get_time_series(&[], 1, 0, AggregationOperation::Sum).unwrap();
        assert!(series.values.is_empty());
        assert_eq!(series.min_frame, None);

        assert!(get_time_series(&[Feature::default()], 1, 0, AggregationOperation::Sum).is_err());
        assert!(get_time_series(&[cell(json!(["a"]))], 1, 0, AggregationOperation::Sum).is_err());
    }

    #[test]
    fn test_fractional_start_frame_is_rejected() {
        let features = vec![cell(json!([0, 2.5, 3, 10, 20]))];
        let err = get_time_series(&features, 1, 0, AggregationOperation::Sum).unwrap_err();
        assert!(matches!(err, Error::MalformedGrid(_)));

        // Integral floats are fine
        let features = vec![cell(json!([0, 2.0, 2.0, 10.0]))];
        let series = get_time_series(&features, 1, 0, AggregationOperation::Sum).unwrap();
        assert_eq!(series.min_frame, Some(2));
    }
}
