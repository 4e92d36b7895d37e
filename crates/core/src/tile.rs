//! Tile addressing and Web Mercator projection.
//!
//! Two coordinate spaces are used throughout the crate:
//!
//! - **Geographic**: longitude/latitude in degrees.
//! - **Projected**: spherical mercator normalized to `[0, 1]` on both axes, with
//!   `(0, 0)` at the north-west corner of the world. At zoom `z` the world is
//!   `2^z` tiles wide, so tile `(x, y)` covers `[x / 2^z, (x + 1) / 2^z]`.
//!
//! Tiles are addressed by `(z, x, y)` and hashed into a single integer with
//! [`to_id`].

use std::f64::consts::PI;

/// Highest zoom level the GeoJSON tile index can address.
pub const MAX_ZOOM: u8 = 24;

/// Tile coordinates: x, y, and zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    /// Create a new tile coordinate
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Composite hash key for this tile, see [`to_id`].
    pub fn id(&self) -> u64 {
        to_id(self.z, self.x, self.y)
    }

    /// The tile one zoom level up that contains this one.
    pub fn parent(&self) -> Option<TileCoord> {
        if self.z == 0 {
            return None;
        }
        Some(TileCoord::new(self.x >> 1, self.y >> 1, self.z - 1))
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &TileCoord) -> bool {
        if self.z > other.z {
            return false;
        }
        let steps = other.z - self.z;
        other.x >> steps == self.x && other.y >> steps == self.y
    }

    /// Get the bounding box of this tile in geographic coordinates (lng/lat)
    pub fn bounds(&self) -> TileBounds {
        let n = 2_f64.powi(self.z as i32);
        let lng_min = (self.x as f64) / n * 360.0 - 180.0;
        let lng_max = (self.x as f64 + 1.0) / n * 360.0 - 180.0;

        let lat_rad = |y: f64| {
            let y_rad = PI * (1.0 - 2.0 * y / n);
            y_rad.sinh().atan().to_degrees()
        };

        let lat_max = lat_rad(self.y as f64);
        let lat_min = lat_rad(self.y as f64 + 1.0);

        TileBounds {
            lng_min,
            lat_min,
            lng_max,
            lat_max,
        }
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "z{}-{}-{}", self.z, self.x, self.y)
    }
}

/// Geographic bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub lng_min: f64,
    pub lat_min: f64,
    pub lng_max: f64,
    pub lat_max: f64,
}

impl TileBounds {
    /// Create a new bounding box
    pub fn new(lng_min: f64, lat_min: f64, lng_max: f64, lat_max: f64) -> Self {
        Self {
            lng_min,
            lat_min,
            lng_max,
            lat_max,
        }
    }

    /// `[west, south, east, north]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.lng_min, self.lat_min, self.lng_max, self.lat_max]
    }
}

/// Encode `(z, x, y)` into a single integer: `((2^z * y + x) * 32) + z`.
///
/// Zoom is capped at [`MAX_ZOOM`] by callers, so the result always fits in 53 bits.
#[inline]
pub fn to_id(z: u8, x: u32, y: u32) -> u64 {
    (((1u64 << z) * y as u64 + x as u64) * 32) + z as u64
}

/// Wrap a tile column into `[0, 2^z)`.
#[inline]
pub fn wrap_x(x: i64, z: u8) -> u32 {
    let z2 = 1i64 << z;
    x.rem_euclid(z2) as u32
}

// ============================================================================
// Spherical Mercator
// ============================================================================

/// Project longitude to the `[0, 1]` mercator x axis.
#[inline]
pub fn lng_to_x(lng: f64) -> f64 {
    lng / 360.0 + 0.5
}

/// Project latitude to the `[0, 1]` mercator y axis (north at 0), clamped at the poles.
#[inline]
pub fn lat_to_y(lat: f64) -> f64 {
    let sin = (lat * PI / 180.0).sin();
    let y = 0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI;
    y.clamp(0.0, 1.0)
}

/// Inverse of [`lng_to_x`].
#[inline]
pub fn x_to_lng(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

/// Inverse of [`lat_to_y`].
#[inline]
pub fn y_to_lat(y: f64) -> f64 {
    let y2 = (180.0 - y * 360.0) * PI / 180.0;
    360.0 * y2.exp().atan() / PI - 90.0
}

/// Convert longitude/latitude to tile coordinates at a given zoom level
///
/// Uses Web Mercator projection (EPSG:3857)
///
/// # Arguments
///
/// * `lng` - Longitude in degrees (-180 to 180)
/// * `lat` - Latitude in degrees (-85.0511 to 85.0511, Web Mercator bounds)
/// * `zoom` - Zoom level (0-30)
///
/// # Returns
///
/// TileCoord with x, y, and zoom
pub fn lng_lat_to_tile(lng: f64, lat: f64, zoom: u8) -> TileCoord {
    let n = 2_f64.powi(zoom as i32);
    let max = (n as u32).saturating_sub(1);

    let x = ((lng_to_x(lng) * n).floor() as u32).min(max);
    let y = ((lat_to_y(lat) * n).floor() as u32).min(max);

    TileCoord::new(x, y, zoom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lng_lat_to_tile_origin() {
        // Null island at zoom 0
        let tile = lng_lat_to_tile(0.0, 0.0, 0);
        assert_eq!(tile, TileCoord::new(0, 0, 0));
    }

    #[test]
    fn test_lng_lat_to_tile_zoom_1() {
        let tile = lng_lat_to_tile(0.0, 0.0, 1);
        assert_eq!(tile.x, 1);
        assert_eq!(tile.y, 1);
        assert_eq!(tile.z, 1);

        // Top-left quadrant
        let tile = lng_lat_to_tile(-90.0, 45.0, 1);
        assert_eq!((tile.x, tile.y), (0, 0));

        // Top-right quadrant
        let tile = lng_lat_to_tile(90.0, 45.0, 1);
        assert_eq!((tile.x, tile.y), (1, 0));
    }

    #[test]
    fn test_tile_bounds() {
        // Tile 0,0,0 should cover the whole world
        let bounds = TileCoord::new(0, 0, 0).bounds();

        assert!((bounds.lng_min - (-180.0)).abs() < 0.0001);
        assert!((bounds.lng_max - 180.0).abs() < 0.0001);
        // Lat bounds are Web Mercator limits (~85.05 degrees)
        assert!(bounds.lat_min < -85.0);
        assert!(bounds.lat_max > 85.0);
    }

    #[test]
    fn test_projection_center() {
        assert_eq!(lng_to_x(0.0), 0.5);
        assert!((lat_to_y(0.0) - 0.5).abs() < 1e-12);
        assert_eq!(lng_to_x(-180.0), 0.0);
        assert_eq!(lng_to_x(180.0), 1.0);
    }

    #[test]
    fn test_projection_clamps_poles() {
        assert_eq!(lat_to_y(90.0), 0.0);
        assert_eq!(lat_to_y(-90.0), 1.0);
    }

    #[test]
    fn test_projection_round_trip() {
        for &(lng, lat) in &[(-122.4, 37.8), (151.2, -33.9), (0.0, 0.0), (179.0, 80.0)] {
            let back_lng = x_to_lng(lng_to_x(lng));
            let back_lat = y_to_lat(lat_to_y(lat));
            assert!((back_lng - lng).abs() < 1e-9, "lng {} -> {}", lng, back_lng);
            assert!((back_lat - lat).abs() < 1e-9, "lat {} -> {}", lat, back_lat);
        }
    }

    #[test]
    fn test_to_id_distinct_per_zoom() {
        assert_eq!(to_id(0, 0, 0), 0);
        assert_eq!(to_id(1, 0, 0), 1);
        assert_eq!(to_id(1, 1, 0), 33);
        assert_eq!(to_id(1, 0, 1), 65);
        assert_ne!(to_id(2, 1, 0), to_id(1, 1, 0));
        // Largest addressable tile stays exact in f64 territory
        let max = (1u32 << MAX_ZOOM) - 1;
        assert!(to_id(MAX_ZOOM, max, max) < (1u64 << 53));
    }

    #[test]
    fn test_wrap_x() {
        assert_eq!(wrap_x(-1, 2), 3);
        assert_eq!(wrap_x(4, 2), 0);
        assert_eq!(wrap_x(2, 2), 2);
        assert_eq!(wrap_x(0, 0), 0);
    }

    #[test]
    fn test_ancestry() {
        let tile = TileCoord::new(5, 9, 4);
        let parent = tile.parent().unwrap();
        assert_eq!(parent, TileCoord::new(2, 4, 3));
        assert!(parent.is_ancestor_of(&tile));
        assert!(TileCoord::new(0, 0, 0).is_ancestor_of(&tile));
        assert!(!TileCoord::new(1, 0, 1).is_ancestor_of(&tile));
        assert_eq!(TileCoord::new(0, 0, 0).parent(), None);
    }

    #[test]
    fn test_tile_coord_round_trip() {
        // A tile's center converts back to the same tile
        for zoom in 0..=14 {
            let max_coord = 2_u32.pow(zoom as u32) - 1;
            let tile = TileCoord::new(max_coord.min(100), max_coord.min(200), zoom);
            let bounds = tile.bounds();

            let center_lng = (bounds.lng_min + bounds.lng_max) / 2.0;
            let center_lat = (bounds.lat_min + bounds.lat_max) / 2.0;

            assert_eq!(
                tile,
                lng_lat_to_tile(center_lng, center_lat, zoom),
                "Round-trip failed at zoom {}",
                zoom
            );
        }
    }
}
