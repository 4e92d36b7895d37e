//! Temporal-grid aggregation.
//!
//! Turns a decoded temporal-grid tile into one GeoJSON feature per cell. Every output
//! frame is the aggregate of a sliding window of `delta` frames ending at the current
//! frame; the property key is the window's first frame minus `quantizeOffset`. When a
//! tile carries several sublayers, their per-frame values are folded into a single
//! property value by the [`SublayerCombinationMode`].

use std::collections::VecDeque;

use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::temporal_grid::{self, CellSeries, GridSize};
use crate::tile::TileCoord;
use crate::{Error, Result};

/// Fixed-point multiplier of single-frame values.
pub const VALUE_MULTIPLIER: f64 = 100.0;

/// Size of one bivariate breaks array; the legend is a 4x4 grid.
const BIVARIATE_BREAKS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeomType {
    Point,
    #[default]
    Rectangle,
}

/// How per-sublayer values become one property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SublayerCombinationMode {
    /// Single sublayer, value or bucket.
    #[default]
    None,
    /// Index of the highest sublayer and its bucket, packed as `index * 10 + bucket`.
    Max,
    /// Sum of all sublayers.
    Add,
    /// Two sublayers bucketed on a 4x4 grid.
    Bivariate,
    /// `"[v0,v1,..]"` string of the rounded values.
    Literal,
    /// Difference between the second and first sublayer.
    TimeCompare,
    /// Running sum across sublayers, as concatenated 6 digit strings.
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationOperation {
    #[default]
    Sum,
    Avg,
}

/// Aggregation settings for one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregationOptions {
    /// Subtracted from the window start to get the frame key.
    pub quantize_offset: i64,
    /// Geographic `[west, south, east, north]` of the tile.
    #[serde(rename = "tileBBox")]
    pub tile_bbox: [f64; 4],
    pub x: u32,
    pub y: u32,
    /// Sliding window length in frames.
    pub delta: usize,
    pub geom_type: GeomType,
    pub single_frame: bool,
    pub interactive: bool,
    pub sublayer_breaks: Option<Vec<Vec<f64>>>,
    pub sublayer_count: usize,
    #[serde(rename = "sublayerCombinationMode")]
    pub combination_mode: SublayerCombinationMode,
    pub sublayer_visibility: Vec<bool>,
    pub aggregation_operation: AggregationOperation,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            quantize_offset: 0,
            tile_bbox: [-180.0, -85.0511, 180.0, 85.0511],
            x: 0,
            y: 0,
            delta: 30,
            geom_type: GeomType::Rectangle,
            single_frame: false,
            interactive: false,
            sublayer_breaks: None,
            sublayer_count: 1,
            combination_mode: SublayerCombinationMode::None,
            sublayer_visibility: vec![true],
            aggregation_operation: AggregationOperation::Sum,
        }
    }
}

impl AggregationOptions {
    /// Options for tile `coord`: position and geographic bounds filled in.
    pub fn for_tile(coord: TileCoord) -> Self {
        Self::default().with_tile(coord)
    }

    pub fn with_tile(mut self, coord: TileCoord) -> Self {
        self.x = coord.x;
        self.y = coord.y;
        self.tile_bbox = coord.bounds().to_array();
        self
    }

    pub fn with_delta(mut self, delta: usize) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_quantize_offset(mut self, offset: i64) -> Self {
        self.quantize_offset = offset;
        self
    }

    pub fn with_geom_type(mut self, geom_type: GeomType) -> Self {
        self.geom_type = geom_type;
        self
    }

    pub fn with_single_frame(mut self, enabled: bool) -> Self {
        self.single_frame = enabled;
        self
    }

    pub fn with_interactive(mut self, enabled: bool) -> Self {
        self.interactive = enabled;
        self
    }

    /// Sets the sublayer count and makes every sublayer visible.
    pub fn with_sublayers(mut self, count: usize, mode: SublayerCombinationMode) -> Self {
        self.sublayer_count = count;
        self.combination_mode = mode;
        self.sublayer_visibility = vec![true; count];
        self
    }

    pub fn with_breaks(mut self, breaks: Vec<Vec<f64>>) -> Self {
        self.sublayer_breaks = Some(breaks);
        self
    }

    pub fn with_visibility(mut self, visibility: Vec<bool>) -> Self {
        self.sublayer_visibility = visibility;
        self
    }

    pub fn with_operation(mut self, operation: AggregationOperation) -> Self {
        self.aggregation_operation = operation;
        self
    }

    /// Check the combination mode against the sublayer count and breaks.
    pub fn validate(&self) -> Result<()> {
        use SublayerCombinationMode as Mode;

        let fail = |msg: String| Err(Error::Aggregation(msg));
        let breaks = self.sublayer_breaks.as_ref();
        let num_breaks = breaks.map(Vec::len);

        if self.sublayer_count == 0 {
            return fail("sublayerCount must be at least 1".to_string());
        }
        if self.delta == 0 {
            return fail("delta must be at least 1".to_string());
        }

        match self.combination_mode {
            Mode::None if self.sublayer_count > 1 => {
                return fail(format!(
                    "Multiple sublayers but no proper combination mode set ({} sublayers)",
                    self.sublayer_count
                ));
            }
            Mode::Max | Mode::Bivariate if num_breaks.is_some_and(|n| n != self.sublayer_count) => {
                return fail(format!(
                    "Must provide as many breaks arrays as number of datasets when using compareMode max or bivariate (got {:?} for {} sublayers)",
                    num_breaks, self.sublayer_count
                ));
            }
            Mode::TimeCompare => {
                if self.sublayer_count != 2 {
                    return fail(format!(
                        "delta compare mode should only be used with 2 sublayers, got {}",
                        self.sublayer_count
                    ));
                }
                if num_breaks.is_some_and(|n| n != 1) {
                    return fail("delta compare mode should only be used with 1 breaks array".to_string());
                }
            }
            Mode::Add if num_breaks.is_some_and(|n| n != 1) => {
                return fail("add compare mode should only be used with 1 breaks array".to_string());
            }
            _ => {}
        }

        if self.combination_mode == Mode::Bivariate {
            let breaks = match breaks {
                Some(b) if b.len() == 2 => b,
                _ => return fail("bivariate mode requires exactly 2 breaks arrays".to_string()),
            };
            if breaks[0].len() != breaks[1].len() {
                return fail("bivariate breaks arrays must have the same length".to_string());
            }
            if breaks[0].len() != BIVARIATE_BREAKS {
                return fail(format!(
                    "bivariate breaks arrays must have {} values, got {}",
                    BIVARIATE_BREAKS,
                    breaks[0].len()
                ));
            }
        }

        Ok(())
    }
}

/// The features of an aggregated tile.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTile {
    /// One feature per cell, frame keys to combined values.
    pub main: FeatureCollection,
    /// Same cells with `_col`, `_row`, `rawValues` and per-sublayer frame values.
    /// Only built when `interactive` is set.
    pub interactive: Option<FeatureCollection>,
}

/// Aggregate a decoded temporal-grid tile.
pub fn aggregate(data: &[i64], options: &AggregationOptions) -> Result<AggregatedTile> {
    options.validate()?;
    let size = GridSize::parse(data)?;

    if options.single_frame {
        return aggregate_single_frame(data, size, options);
    }

    if options.sublayer_visibility.len() < options.sublayer_count {
        log::warn!(
            "visibility given for {} of {} sublayers, the rest are shown",
            options.sublayer_visibility.len(),
            options.sublayer_count
        );
    }

    let pad = match options.aggregation_operation {
        AggregationOperation::Sum => 0.0,
        AggregationOperation::Avg => f64::NAN,
    };
    let cells = temporal_grid::split_cells(data, options.sublayer_count, options.delta, pad)?;

    let mut main = Vec::with_capacity(cells.len());
    let mut interactive = options.interactive.then(|| Vec::with_capacity(cells.len()));

    for cell in &cells {
        let (feature, meta) = aggregate_cell(cell, size, options);
        main.push(feature);
        if let (Some(list), Some(meta)) = (interactive.as_mut(), meta) {
            list.push(meta);
        }
    }

    Ok(AggregatedTile {
        main: collection(main),
        interactive: interactive.map(collection),
    })
}

fn aggregate_single_frame(
    data: &[i64],
    size: GridSize,
    options: &AggregationOptions,
) -> Result<AggregatedTile> {
    let features = temporal_grid::split_single_frame(data)?
        .into_iter()
        .map(|(cell, value)| {
            let mut feature = cell_feature(cell, size, options, false);
            // Single-frame ids are plain cell indices
            feature.id = Some(Id::Number(cell.into()));
            feature.set_property("value", value as f64 / VALUE_MULTIPLIER);
            feature
        })
        .collect();

    Ok(AggregatedTile {
        main: collection(features),
        interactive: None,
    })
}

/// Run the sliding window over one cell.
fn aggregate_cell(
    cell: &CellSeries,
    size: GridSize,
    options: &AggregationOptions,
) -> (Feature, Option<Feature>) {
    let sublayers = options.sublayer_count;
    let delta = options.delta as i64;
    let avg = options.aggregation_operation == AggregationOperation::Avg;

    let mut feature = cell_feature(cell.cell, size, options, false);
    let mut meta = options.interactive.then(|| {
        let mut f = cell_feature(cell.cell, size, options, true);
        f.set_property("rawValues", json!(cell.raw));
        f
    });

    // Values currently inside the window, per sublayer
    let mut window: Vec<VecDeque<f64>> = vec![VecDeque::with_capacity(options.delta); sublayers];
    let mut running = vec![0.0; sublayers];
    let mut counts = vec![0usize; sublayers];
    let mut frame_values = vec![0.0; sublayers];
    let mut head = cell.start_frame;

    for (pos, &raw) in cell.values.iter().enumerate() {
        let sublayer = pos % sublayers;
        let tail = head - delta + 1;

        let value = if is_visible(options, sublayer) { raw } else { 0.0 };
        let leaving = if tail > cell.start_frame {
            window[sublayer].pop_front()
        } else {
            None
        };
        window[sublayer].push_back(value);

        running[sublayer] += zero_if_nan(value) - leaving.map_or(0.0, zero_if_nan);

        frame_values[sublayer] = if avg {
            // NaN marks padding: it never counts, and only a positive value leaving
            // alongside it shrinks the divisor
            if value.is_nan() {
                if leaving.is_some_and(|v| v > 0.0) && counts[sublayer] > 0 {
                    counts[sublayer] -= 1;
                }
            } else if !leaving.is_some_and(|v| !v.is_nan()) {
                counts[sublayer] += 1;
            }
            match counts[sublayer] {
                0 => running[sublayer],
                n => running[sublayer] / n as f64,
            }
        } else {
            running[sublayer]
        };

        if sublayer + 1 < sublayers {
            continue;
        }

        let key = tail - options.quantize_offset;
        if key >= 0 {
            if let Some(value) = combine(&frame_values, options) {
                feature.set_property(key.to_string(), value);
                if let Some(meta) = meta.as_mut() {
                    meta.set_property(key.to_string(), json!(frame_values));
                }
            }
        }
        head += 1;
    }

    (feature, meta)
}

/// Fold one frame's per-sublayer values into a property value.
///
/// `None` means no data for the frame; zero is never written as a bucket.
fn combine(values: &[f64], options: &AggregationOptions) -> Option<JsonValue> {
    use SublayerCombinationMode as Mode;

    let breaks = options.sublayer_breaks.as_deref();
    let first_breaks = breaks.and_then(|b| b.first());

    match options.combination_mode {
        Mode::None => {
            let value = values[0];
            if value == 0.0 {
                return None;
            }
            Some(match first_breaks {
                Some(b) => json!(get_bucket_index(b, value)),
                None => json!(value),
            })
        }
        Mode::Max => {
            let mut highest = 0.0;
            let mut highest_index = None;
            for (i, &v) in values.iter().enumerate() {
                if v > highest {
                    highest = v;
                    highest_index = Some(i);
                }
            }
            let index = highest_index?;
            Some(match breaks.and_then(|b| b.get(index)) {
                Some(b) => json!(index * 10 + get_bucket_index(b, highest)),
                None => json!(format!("{};{}", index, highest)),
            })
        }
        Mode::Add => {
            let sum: f64 = values.iter().sum();
            if sum == 0.0 {
                return None;
            }
            Some(match first_breaks {
                Some(b) => json!(get_bucket_index(b, sum)),
                None => json!(sum),
            })
        }
        Mode::Bivariate => {
            let (a, b) = (values[0], values[1]);
            if a == 0.0 && b == 0.0 {
                return None;
            }
            let breaks = breaks?;
            let bucket_a = get_bucket_index(&breaks[0], a).max(1);
            let bucket_b = get_bucket_index(&breaks[1], b).max(1);
            Some(json!((bucket_a - 1) + (bucket_b - 1) * BIVARIATE_BREAKS + 1))
        }
        Mode::Literal => {
            let parts: Vec<String> = values.iter().map(|v| (v.round() as i64).to_string()).collect();
            Some(json!(format!("[{}]", parts.join(","))))
        }
        Mode::TimeCompare => {
            let delta = values[1] - values[0];
            if delta == 0.0 {
                return None;
            }
            Some(match first_breaks {
                Some(b) => json!(get_bucket_index(b, delta)),
                None => json!(delta),
            })
        }
        Mode::Cumulative => {
            let mut cumulative = 0.0;
            let mut encoded = String::with_capacity(values.len() * 6);
            for v in values {
                cumulative += v;
                encoded.push_str(&format!("{:06}", cumulative.round() as i64));
            }
            if cumulative == 0.0 {
                return None;
            }
            Some(json!(encoded))
        }
    }
}

/// Index of the first break `value` does not exceed, `breaks.len()` past the last
/// one. NaN maps to 0.
pub fn get_bucket_index(breaks: &[f64], value: f64) -> usize {
    if value.is_nan() {
        return 0;
    }
    breaks
        .iter()
        .position(|&b| value <= b)
        .unwrap_or(breaks.len())
}

/// Short numeric feature id from the last digits of the tile position and the cell.
///
/// Ids only need to be distinct across the handful of tiles in view.
pub fn feature_id(x: u32, y: u32, cell: u32) -> u64 {
    let cell_digits = cell.checked_ilog10().map_or(1, |d| d + 1);
    let shift = 10u64.pow(cell_digits);
    (x % 10) as u64 * shift * 10 + (y % 10) as u64 * shift + cell as u64
}

fn is_visible(options: &AggregationOptions, sublayer: usize) -> bool {
    options
        .sublayer_visibility
        .get(sublayer)
        .copied()
        .unwrap_or(true)
}

#[inline]
fn zero_if_nan(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v
    }
}

fn cell_feature(cell: u32, size: GridSize, options: &AggregationOptions, meta: bool) -> Feature {
    let [min_x, min_y, max_x, max_y] = options.tile_bbox;
    let (col, row) = size.position(cell);
    let cols = size.num_cols as f64;
    let rows = size.num_rows as f64;
    let width = max_x - min_x;
    let height = max_y - min_y;

    let x0 = min_x + col as f64 / cols * width;
    let y0 = min_y + row as f64 / rows * height;

    let value = match options.geom_type {
        GeomType::Point => Value::Point(vec![x0, y0]),
        GeomType::Rectangle => {
            let x1 = min_x + (col + 1) as f64 / cols * width;
            let y1 = min_y + (row + 1) as f64 / rows * height;
            Value::Polygon(vec![vec![
                vec![x0, y0],
                vec![x1, y0],
                vec![x1, y1],
                vec![x0, y1],
                vec![x0, y0],
            ]])
        }
    };

    let mut properties = JsonObject::new();
    if meta {
        properties.insert("_col".to_string(), json!(col));
        properties.insert("_row".to_string(), json!(row));
    }

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: Some(Id::Number(feature_id(options.x, options.y, cell).into())),
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
