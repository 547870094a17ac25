//! Web-Mercator (slippy map) tiles and Bing-style quadkeys.
//!
//! The Microsoft building dataset is partitioned by zoom-9 quadkeys; the
//! dataset-links CSV stores them as integers (leading zeros dropped), so
//! keys are compared through [`Tile::quadkey_int`].

use std::collections::BTreeSet;

use crate::geo_core::BoundingBox;

const MAX_LATITUDE: f64 = 85.051_128_779_806_59;
const EPSILON: f64 = 1e-14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl Tile {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Tile { x, y, z }
    }

    /// Tile containing a lon/lat point.
    pub fn containing(lon: f64, lat: f64, z: u8) -> Self {
        let n = f64::from(1u32 << z);
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let fx = (lon + 180.0) / 360.0 * n;
        let fy = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * n;
        let max = (1u32 << z) - 1;
        let clamp = |v: f64| (v.floor().max(0.0) as u32).min(max);
        Tile::new(clamp(fx), clamp(fy), z)
    }

    pub fn quadkey(&self) -> String {
        let mut key = String::with_capacity(self.z as usize);
        for i in (1..=self.z).rev() {
            let mask = 1u32 << (i - 1);
            let mut digit = b'0';
            if self.x & mask != 0 {
                digit += 1;
            }
            if self.y & mask != 0 {
                digit += 2;
            }
            key.push(digit as char);
        }
        key
    }

    /// Quadkey read as a decimal integer.
    pub fn quadkey_int(&self) -> u64 {
        self.quadkey()
            .bytes()
            .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0'))
    }
}

/// All tiles at zoom `z` intersecting the bounding box (lon/lat).
pub fn tiles_for_bbox(bbox: &BoundingBox, z: u8) -> Vec<Tile> {
    let west = bbox.min_x.max(-180.0);
    let east = (bbox.max_x - EPSILON).min(180.0 - EPSILON);
    let south = bbox.min_y + EPSILON;
    let north = bbox.max_y;

    let ul = Tile::containing(west, north, z);
    let lr = Tile::containing(east, south, z);

    let mut tiles = Vec::new();
    for x in ul.x..=lr.x.max(ul.x) {
        for y in ul.y..=lr.y.max(ul.y) {
            tiles.push(Tile::new(x, y, z));
        }
    }
    tiles
}

/// Distinct integer quadkeys covering the bounding box.
pub fn quadkeys_for_bbox(bbox: &BoundingBox, z: u8) -> BTreeSet<u64> {
    tiles_for_bbox(bbox, z)
        .iter()
        .map(Tile::quadkey_int)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadkey_reference_tile() {
        // Bing Maps tile system documentation example
        let tile = Tile::new(3, 5, 3);
        assert_eq!(tile.quadkey(), "213");
        assert_eq!(tile.quadkey_int(), 213);
    }

    #[test]
    fn test_leading_zero_dropped_in_int() {
        let tile = Tile::new(0, 1, 2);
        assert_eq!(tile.quadkey(), "02");
        assert_eq!(tile.quadkey_int(), 2);
    }

    #[test]
    fn test_containing_tile() {
        assert_eq!(Tile::containing(0.0, 0.0, 1), Tile::new(1, 1, 1));
        assert_eq!(Tile::containing(-74.0, 40.7, 9), Tile::new(150, 192, 9));
        // Poles and the antimeridian stay inside the grid
        assert_eq!(Tile::containing(180.0, 90.0, 2), Tile::new(3, 0, 2));
        assert_eq!(Tile::containing(-180.0, -90.0, 2), Tile::new(0, 3, 2));
    }

    #[test]
    fn test_tiles_cover_bbox_corners() {
        let bbox = BoundingBox::new(-74.3, 40.4, -73.6, 41.0);
        let tiles = tiles_for_bbox(&bbox, 9);
        for (lon, lat) in [(-74.3, 40.4), (-74.3, 40.99), (-73.61, 40.4), (-73.61, 40.99)] {
            let corner = Tile::containing(lon, lat, 9);
            assert!(tiles.contains(&corner), "missing tile for {lon},{lat}");
        }
        let keys = quadkeys_for_bbox(&bbox, 9);
        assert_eq!(keys.len(), tiles.len());
    }

    #[test]
    fn test_small_bbox_single_tile() {
        let bbox = BoundingBox::new(-73.99, 40.75, -73.98, 40.76);
        assert_eq!(tiles_for_bbox(&bbox, 9).len(), 1);
    }
}
