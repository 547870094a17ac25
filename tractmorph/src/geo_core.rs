use anyhow::Result;
#[cfg(feature = "proj")]
use anyhow::Context;
use geo::{BoundingRect, Coord, Rect};
#[cfg(feature = "proj")]
use proj::Proj;
use serde::{Deserialize, Serialize};

/// WGS84 geographic coordinates, the CRS of every geometry after loading.
pub const WGS84: i32 = 4326;
/// NAD83, the CRS of TIGER shapefiles. Treated as WGS84 (sub-metre offset).
pub const NAD83: i32 = 4269;

/// CRS helpers. Every loaded geometry is lon/lat; only rasters may carry another CRS.
pub struct GeoCore;

impl GeoCore {
    /// Whether coordinates in this EPSG can be used as lon/lat directly
    pub fn is_geographic(epsg: i32) -> bool {
        epsg == WGS84 || epsg == NAD83
    }

    /// Transform coordinates from one CRS to another
    #[cfg(feature = "proj")]
    pub fn transform_coords(from_epsg: i32, to_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
        let from_crs = format!("EPSG:{}", from_epsg);
        let to_crs = format!("EPSG:{}", to_epsg);

        let proj = Proj::new_known_crs(&from_crs, &to_crs, None)
            .context("Failed to create Proj transformation")?;

        let result = proj
            .convert((x, y))
            .context("Failed to transform coordinates")?;

        Ok(result)
    }

    /// Without libproj only identity and NAD83/WGS84 pass through.
    #[cfg(not(feature = "proj"))]
    pub fn transform_coords(from_epsg: i32, to_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
        if from_epsg == to_epsg || (Self::is_geographic(from_epsg) && Self::is_geographic(to_epsg))
        {
            return Ok((x, y));
        }
        Err(crate::error::TractError::UnsupportedCrs(from_epsg.max(to_epsg)).into())
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64, // min longitude
    pub min_y: f64, // min latitude
    pub max_x: f64, // max longitude
    pub max_y: f64, // max latitude
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_rect(rect: Rect<f64>) -> Self {
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// Total bounds of a set of geometries; `None` when the iterator is empty.
    pub fn from_geometries<'a, G, I>(geometries: I) -> Option<Self>
    where
        G: BoundingRect<f64> + 'a,
        G::Output: Into<Option<Rect<f64>>>,
        I: IntoIterator<Item = &'a G>,
    {
        geometries
            .into_iter()
            .filter_map(|g| g.bounding_rect().into())
            .map(BoundingBox::from_rect)
            .reduce(|a, b| a.union(&b))
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Grow the box by `margin` on every side.
    pub fn padded(&self, margin: f64) -> BoundingBox {
        BoundingBox::new(
            self.min_x - margin,
            self.min_y - margin,
            self.max_x + margin,
            self.max_y + margin,
        )
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn center(&self) -> Coord<f64> {
        Coord {
            x: (self.min_x + self.max_x) / 2.0,
            y: (self.min_y + self.max_y) / 2.0,
        }
    }

    /// Overpass QL bbox order: south, west, north, east
    pub fn to_overpass(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_y, self.min_x, self.max_y, self.max_x
        )
    }
}
