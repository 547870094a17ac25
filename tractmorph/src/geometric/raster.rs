//! GeoTIFF rasters (WorldPop population, CNBH heights) on top of `tiff`.
//!
//! Georeferencing is read from the ModelPixelScale, ModelTiepoint, GeoKeyDirectory
//! and GDAL_NODATA tags directly rather than through `geotiff`, whose reader decodes
//! the full image on open. Here only the strips or tiles under a query window are
//! decoded, and they are cached per raster.

use anyhow::{Context, Result};
use geo::{BoundingRect, Contains, MapCoords, MultiPolygon, Point};
use log::debug;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::error::TractError;
use crate::geo_core::{BoundingBox, GeoCore, WGS84};

const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
/// Decoded chunks kept in memory before the cache is flushed
const MAX_CACHED_CHUNKS: usize = 256;

/// North-up affine georeferencing from ModelPixelScale + ModelTiepoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_tags(scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
        if scale.len() < 2 || tiepoint.len() < 6 || scale[0] <= 0.0 || scale[1] <= 0.0 {
            return None;
        }
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        Some(GeoTransform {
            origin_x: x - i * scale[0],
            origin_y: y + j * scale[1],
            pixel_width: scale[0],
            pixel_height: scale[1],
        })
    }

    /// World coordinates of a pixel centre
    pub fn pixel_center(&self, col: u32, row: u32) -> (f64, f64) {
        (
            self.origin_x + (f64::from(col) + 0.5) * self.pixel_width,
            self.origin_y - (f64::from(row) + 0.5) * self.pixel_height,
        )
    }

    /// Pixel window `[col0, col1) x [row0, row1)` covering a bounding box, clipped to the raster.
    pub fn window(&self, bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let c0 = ((bbox.min_x - self.origin_x) / self.pixel_width).floor();
        let c1 = ((bbox.max_x - self.origin_x) / self.pixel_width).ceil();
        let r0 = ((self.origin_y - bbox.max_y) / self.pixel_height).floor();
        let r1 = ((self.origin_y - bbox.min_y) / self.pixel_height).ceil();
        let clip = |v: f64, max: u32| v.max(0.0).min(f64::from(max)) as u32;
        let (c0, c1) = (clip(c0, width), clip(c1, width));
        let (r0, r1) = (clip(r0, height), clip(r1, height));
        if c0 >= c1 || r0 >= r1 {
            None
        } else {
            Some((c0, c1, r0, r1))
        }
    }
}

fn decoding_result_to_f64(result: DecodingResult) -> Result<Vec<f64>> {
    #[allow(unreachable_patterns)]
    let values = match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        _ => anyhow::bail!("Unsupported raster sample format"),
    };
    Ok(values)
}

/// EPSG code from a GeoKeyDirectory (inline SHORT values only).
fn epsg_from_geo_keys(keys: &[u16]) -> Option<i32> {
    if keys.len() < 4 {
        return None;
    }
    let count = keys[3] as usize;
    let mut geographic = None;
    let mut projected = None;
    for entry in keys[4..].chunks_exact(4).take(count) {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key_id {
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(i32::from(value)),
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(i32::from(value)),
            _ => {}
        }
    }
    projected.or(geographic)
}

/// Single-band GeoTIFF read chunk by chunk.
/// Only the strips/tiles under a query window are decoded.
pub struct GeoRaster {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    width: u32,
    height: u32,
    chunk_width: u32,
    chunk_height: u32,
    chunks_across: u32,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    pub epsg: i32,
    cache: HashMap<u32, Vec<f64>>,
}

impl GeoRaster {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open raster {}", path.display()))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .with_context(|| format!("Failed to read TIFF header of {}", path.display()))?;

        let (width, height) = decoder.dimensions().context("Failed to read raster dimensions")?;
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();

        let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok();
        let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok();
        let transform = scale
            .zip(tiepoint)
            .and_then(|(s, t)| GeoTransform::from_tags(&s, &t))
            .ok_or_else(|| TractError::MissingGeoreference(path.display().to_string()))?;

        let nodata = decoder
            .get_tag_ascii_string(Tag::GdalNodata)
            .ok()
            .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());
        let epsg = decoder
            .get_tag_u16_vec(Tag::GeoKeyDirectoryTag)
            .ok()
            .and_then(|keys| epsg_from_geo_keys(&keys))
            .unwrap_or(WGS84);

        debug!(
            "{}: {}x{} px, chunk {}x{}, EPSG:{}, nodata {:?}",
            path.display(),
            width,
            height,
            chunk_width,
            chunk_height,
            epsg,
            nodata
        );

        Ok(GeoRaster {
            path: path.to_path_buf(),
            decoder,
            width,
            height,
            chunk_width,
            chunk_height,
            chunks_across: width.div_ceil(chunk_width.max(1)),
            transform,
            nodata,
            epsg,
            cache: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Extent in the raster CRS
    pub fn bounds(&self) -> BoundingBox {
        let t = &self.transform;
        BoundingBox::new(
            t.origin_x,
            t.origin_y - f64::from(self.height) * t.pixel_height,
            t.origin_x + f64::from(self.width) * t.pixel_width,
            t.origin_y,
        )
    }

    /// Raster extent in lon/lat. Fails when the raster CRS cannot be converted.
    pub fn lonlat_bounds(&self) -> Result<BoundingBox> {
        let native = self.bounds();
        if GeoCore::is_geographic(self.epsg) {
            return Ok(native);
        }
        let corners = [
            (native.min_x, native.min_y),
            (native.min_x, native.max_y),
            (native.max_x, native.min_y),
            (native.max_x, native.max_y),
        ];
        let mut lonlat = Vec::with_capacity(corners.len());
        for (x, y) in corners {
            lonlat.push(GeoCore::transform_coords(self.epsg, WGS84, x, y)?);
        }
        let (xs, ys): (Vec<f64>, Vec<f64>) = lonlat.into_iter().unzip();
        Ok(BoundingBox::new(
            xs.iter().copied().fold(f64::INFINITY, f64::min),
            ys.iter().copied().fold(f64::INFINITY, f64::min),
            xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ys.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ))
    }

    fn pixel(&mut self, col: u32, row: u32) -> Result<f64> {
        let chunk_col = col / self.chunk_width;
        let chunk_row = row / self.chunk_height;
        let chunk_idx = chunk_row * self.chunks_across + chunk_col;
        // Edge chunks are decoded without padding
        let stride = self
            .chunk_width
            .min(self.width - chunk_col * self.chunk_width);

        if !self.cache.contains_key(&chunk_idx) {
            if self.cache.len() >= MAX_CACHED_CHUNKS {
                self.cache.clear();
            }
            let data = self
                .decoder
                .read_chunk(chunk_idx)
                .with_context(|| format!("{}: read_chunk({})", self.path.display(), chunk_idx))?;
            self.cache.insert(chunk_idx, decoding_result_to_f64(data)?);
        }
        let chunk = &self.cache[&chunk_idx];
        let local_row = row % self.chunk_height;
        let local_col = col % self.chunk_width;
        let idx = local_row as usize * stride as usize + local_col as usize;
        Ok(chunk.get(idx).copied().unwrap_or(f64::NAN))
    }

    fn is_valid(&self, value: f64) -> bool {
        value.is_finite() && self.nodata.map_or(true, |nd| value != nd)
    }

    /// Footprint expressed in the raster CRS.
    fn to_raster_crs(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if GeoCore::is_geographic(self.epsg) {
            return Ok(geometry.clone());
        }
        let epsg = self.epsg;
        geometry.try_map_coords(move |c| {
            GeoCore::transform_coords(WGS84, epsg, c.x, c.y).map(|(x, y)| geo::Coord { x, y })
        })
    }

    /// Visit every valid pixel whose centre lies inside the geometry.
    fn for_each_masked<F: FnMut(f64)>(&mut self, geometry: &MultiPolygon<f64>, mut visit: F) -> Result<()> {
        let geometry = self.to_raster_crs(geometry)?;
        let Some(rect) = geometry.bounding_rect() else {
            return Ok(());
        };
        let Some((c0, c1, r0, r1)) =
            self.transform
                .window(&BoundingBox::from_rect(rect), self.width, self.height)
        else {
            return Ok(());
        };
        for row in r0..r1 {
            for col in c0..c1 {
                let (x, y) = self.transform.pixel_center(col, row);
                if !geometry.contains(&Point::new(x, y)) {
                    continue;
                }
                let value = self.pixel(col, row)?;
                if self.is_valid(value) {
                    visit(value);
                }
            }
        }
        Ok(())
    }

    /// Sum of strictly positive pixel values inside the geometry (population counts).
    pub fn masked_sum_positive(&mut self, geometry: &MultiPolygon<f64>) -> Result<f64> {
        let mut sum = 0.0;
        self.for_each_masked(geometry, |v| {
            if v > 0.0 {
                sum += v;
            }
        })?;
        Ok(sum)
    }

    /// Maximum pixel value inside the geometry; 0 when no valid pixel is covered.
    pub fn masked_max(&mut self, geometry: &MultiPolygon<f64>) -> Result<f64> {
        let mut max: Option<f64> = None;
        self.for_each_masked(geometry, |v| {
            max = Some(max.map_or(v, |m: f64| m.max(v)));
        })?;
        Ok(max.unwrap_or(0.0).max(0.0))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use geo::polygon;
    use tiff::encoder::{colortype, TiffEncoder};

    /// Write a north-up Float32 GeoTIFF with EPSG:4326 keys and a nodata tag.
    pub(crate) fn write_test_raster(
        path: &Path,
        origin: (f64, f64),
        pixel: f64,
        width: u32,
        height: u32,
        values: &[f32],
    ) {
        write_test_raster_in(path, WGS84, origin, pixel, width, height, values)
    }

    /// Float raster with GeoKeys for `epsg` (geographic for 4326/4269, projected otherwise).
    pub(crate) fn write_test_raster_in(
        path: &Path,
        epsg: i32,
        origin: (f64, f64),
        pixel: f64,
        width: u32,
        height: u32,
        values: &[f32],
    ) {
        let code = u16::try_from(epsg).unwrap();
        let geo_keys: [u16; 12] = if GeoCore::is_geographic(epsg) {
            [1, 1, 0, 2, 1024, 0, 1, 2, GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, code]
        } else {
            [1, 1, 0, 2, 1024, 0, 1, 1, PROJECTED_CS_TYPE_GEO_KEY, 0, 1, code]
        };
        let file = File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(file).unwrap();
        let mut image = encoder
            .new_image::<colortype::Gray32Float>(width, height)
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &[pixel, pixel, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(
                Tag::ModelTiepointTag,
                &[0.0, 0.0, 0.0, origin.0, origin.1, 0.0][..],
            )
            .unwrap();
        image
            .encoder()
            .write_tag(
                Tag::GeoKeyDirectoryTag,
                &geo_keys[..],
            )
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::GdalNodata, "-9999")
            .unwrap();
        image.rows_per_strip(2).unwrap();
        image.write_data(values).unwrap();
    }

    #[test]
    fn test_geo_transform_window() {
        let t = GeoTransform::from_tags(&[1.0, 1.0, 0.0], &[0.0, 0.0, 0.0, 10.0, 20.0, 0.0]).unwrap();
        assert_eq!(t.pixel_center(0, 0), (10.5, 19.5));
        let w = t.window(&BoundingBox::new(11.2, 17.5, 12.8, 19.0), 4, 4).unwrap();
        assert_eq!(w, (1, 3, 1, 3));
        assert!(t.window(&BoundingBox::new(30.0, 0.0, 31.0, 1.0), 4, 4).is_none());
    }

    #[test]
    fn test_epsg_from_geo_keys() {
        assert_eq!(epsg_from_geo_keys(&[1, 1, 0, 1, 2048, 0, 1, 4326]), Some(4326));
        assert_eq!(
            epsg_from_geo_keys(&[1, 1, 0, 2, 2048, 0, 1, 4326, 3072, 0, 1, 32650]),
            Some(32650)
        );
        assert_eq!(epsg_from_geo_keys(&[1, 1]), None);
    }

    #[test]
    fn test_masked_sum_and_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pop.tif");
        // 4x4 grid of 1-degree pixels, origin (0, 4)
        #[rustfmt::skip]
        let values: Vec<f32> = vec![
            1.0,  2.0,  3.0,     4.0,
            5.0, -1.0,  7.0,     8.0,
            9.0, 10.0, -9999.0, 12.0,
            f32::NAN, 14.0, 15.0, 16.0,
        ];
        write_test_raster(&path, (0.0, 4.0), 1.0, 4, 4, &values);

        let mut raster = GeoRaster::open(&path).unwrap();
        assert_eq!(raster.dimensions(), (4, 4));
        assert_eq!(raster.epsg, 4326);
        assert_eq!(raster.nodata, Some(-9999.0));
        assert_eq!(raster.bounds(), BoundingBox::new(0.0, 0.0, 4.0, 4.0));

        // Covers pixel centres of rows 0..2 and cols 0..2: 1, 2, 3, 5, -1, 7, 9, 10, nodata
        let window = MultiPolygon(vec![polygon![
            (x: 0.1, y: 1.1), (x: 2.9, y: 1.1), (x: 2.9, y: 3.9), (x: 0.1, y: 3.9), (x: 0.1, y: 1.1),
        ]]);
        let sum = raster.masked_sum_positive(&window).unwrap();
        assert!((sum - 37.0).abs() < 1e-6);
        let max = raster.masked_max(&window).unwrap();
        assert!((max - 10.0).abs() < 1e-6);

        // Only the NaN pixel at (0, 3): max falls back to 0
        let nan_only = MultiPolygon(vec![polygon![
            (x: 0.2, y: 0.2), (x: 0.8, y: 0.2), (x: 0.8, y: 0.8), (x: 0.2, y: 0.8), (x: 0.2, y: 0.2),
        ]]);
        assert_eq!(raster.masked_max(&nan_only).unwrap(), 0.0);

        // Outside the raster
        let outside = MultiPolygon(vec![polygon![
            (x: 10.0, y: 10.0), (x: 11.0, y: 10.0), (x: 11.0, y: 11.0), (x: 10.0, y: 10.0),
        ]]);
        assert_eq!(raster.masked_sum_positive(&outside).unwrap(), 0.0);
    }
}
