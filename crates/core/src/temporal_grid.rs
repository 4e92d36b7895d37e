//! Packed temporal-grid tiles.
//!
//! A tile is a protobuf message with a single packed varint field (tag 1) holding
//!
//! ```text
//! [numRows, numCols, cell0, start0, end0, v.., cell1, start1, end1, v.., ...]
//! ```
//!
//! where each cell carries `(end - start + 1) * sublayerCount` values, frame-major
//! (all sublayers of the first frame, then the second frame, ...).
//!
//! The single-frame variant replaces the cell records with `(cell, value)` pairs.

use prost::Message;

use crate::{Error, Result};

/// Cell header length: cell index, start frame, end frame.
pub const CELL_HEADER_LEN: usize = 3;

/// The wire message.
#[derive(Clone, PartialEq, Message)]
pub struct PackedGrid {
    #[prost(int64, repeated, tag = "1")]
    pub data: Vec<i64>,
}

/// Decode a tile payload into its flat integer array.
pub fn decode(bytes: &[u8]) -> Result<Vec<i64>> {
    let grid = PackedGrid::decode(bytes)?;
    Ok(grid.data)
}

/// Encode a flat integer array as a tile payload.
pub fn encode(data: &[i64]) -> Vec<u8> {
    PackedGrid {
        data: data.to_vec(),
    }
    .encode_to_vec()
}

/// Grid dimensions from the first two ints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub num_rows: u32,
    pub num_cols: u32,
}

impl GridSize {
    pub fn parse(data: &[i64]) -> Result<Self> {
        let [rows, cols, ..] = data[..] else {
            return Err(Error::MalformedGrid(format!(
                "expected a 2 value header, got {} values",
                data.len()
            )));
        };
        let num_rows = header_value(rows, "numRows")?;
        let num_cols = header_value(cols, "numCols")?;
        if num_rows == 0 || num_cols == 0 {
            return Err(Error::MalformedGrid(format!(
                "empty grid {}x{}",
                num_rows, num_cols
            )));
        }
        Ok(GridSize { num_rows, num_cols })
    }

    /// `(col, row)` of a cell index.
    pub fn position(&self, cell: u32) -> (u32, u32) {
        (cell % self.num_cols, cell / self.num_cols)
    }
}

/// One cell's time series.
#[derive(Debug, Clone, PartialEq)]
pub struct CellSeries {
    pub cell: u32,
    pub start_frame: i64,
    pub end_frame: i64,
    /// The cell record as stored: header followed by values.
    pub raw: Vec<i64>,
    /// Values followed by `delta * sublayerCount` padding entries.
    pub values: Vec<f64>,
}

impl CellSeries {
    pub fn num_frames(&self) -> usize {
        (self.end_frame - self.start_frame + 1) as usize
    }
}

/// Split the cell records after the grid header.
///
/// Every cell is right-padded with `pad_frames * sublayer_count` copies of `pad` so a
/// sliding window can run past the last real frame.
pub fn split_cells(
    data: &[i64],
    sublayer_count: usize,
    pad_frames: usize,
    pad: f64,
) -> Result<Vec<CellSeries>> {
    if sublayer_count == 0 {
        return Err(Error::MalformedGrid("sublayer count must be positive".to_string()));
    }
    GridSize::parse(data)?;
    let pad_len = pad_frames.checked_mul(sublayer_count).ok_or_else(|| {
        Error::MalformedGrid(format!(
            "padding of {} frames x {} sublayers overflows",
            pad_frames, sublayer_count
        ))
    })?;

    let mut cells = Vec::new();
    let mut start = 2;

    while start < data.len() {
        let header = data.get(start..start + CELL_HEADER_LEN).ok_or_else(|| {
            Error::MalformedGrid(format!("truncated cell header at offset {}", start))
        })?;
        let (cell, start_frame, end_frame) = (header[0], header[1], header[2]);

        let cell = header_value(cell, "cell index")?;
        if start_frame < 0 {
            return Err(Error::MalformedGrid(format!(
                "cell {} starts at negative frame {}",
                cell, start_frame
            )));
        }
        if end_frame < start_frame {
            return Err(Error::MalformedGrid(format!(
                "cell {} ends at frame {} before it starts at {}",
                cell, end_frame, start_frame
            )));
        }

        // The sliding window runs `pad_frames` past the last frame
        if i64::try_from(pad_frames)
            .ok()
            .and_then(|p| end_frame.checked_add(p))
            .is_none()
        {
            return Err(Error::MalformedGrid(format!(
                "cell {} ends at frame {}, too late to pad",
                cell, end_frame
            )));
        }

        let remaining = data.len() - start - CELL_HEADER_LEN;
        let num_values = end_frame
            .checked_sub(start_frame)
            .and_then(|d| d.checked_add(1))
            .and_then(|n| usize::try_from(n).ok())
            .and_then(|n| n.checked_mul(sublayer_count))
            .filter(|&n| n <= remaining)
            .ok_or_else(|| {
                Error::MalformedGrid(format!(
                    "cell {} spans frames {}..={} but only {} values remain",
                    cell, start_frame, end_frame, remaining
                ))
            })?;
        let end = start + CELL_HEADER_LEN + num_values;

        let raw = data[start..end].to_vec();
        let mut values: Vec<f64> = raw[CELL_HEADER_LEN..].iter().map(|&v| v as f64).collect();
        values.resize(values.len() + pad_len, pad);

        cells.push(CellSeries {
            cell,
            start_frame,
            end_frame,
            raw,
            values,
        });
        start = end;
    }

    log::debug!("decoded {} cells from {} values", cells.len(), data.len());
    Ok(cells)
}

/// Read the `(cell, value)` pairs of a single-frame tile.
pub fn split_single_frame(data: &[i64]) -> Result<Vec<(u32, i64)>> {
    GridSize::parse(data)?;
    let pairs = &data[2..];
    if pairs.len() % 2 != 0 {
        return Err(Error::MalformedGrid(
            "single frame data has an unpaired cell".to_string(),
        ));
    }
    pairs
        .chunks_exact(2)
        .map(|pair| Ok((header_value(pair[0], "cell index")?, pair[1])))
        .collect()
}

fn header_value(value: i64, name: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::MalformedGrid(format!("{} out of range: {}", name, value)))
}
