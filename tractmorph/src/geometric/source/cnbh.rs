use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;

use crate::collect::global_variables::CNBH_BASE_URL;
use crate::collect::http::{DownloadJob, Downloader};
use crate::config::Settings;
use crate::error::TractError;
use crate::geo_core::BoundingBox;
use crate::geometric::building::BuildingCollection;
use crate::geometric::raster::GeoRaster;
use crate::geometric::region::RegionCollection;
use crate::geometric::source::BuildingSource;

/// Degrees added around the region bounds before tiling
const TILE_PADDING: f64 = 0.5;

/// CNBH tiles are named by odd integer coordinates.
fn odd_bound(value: f64) -> i32 {
    let t = value.trunc() as i32;
    if t.rem_euclid(2) == 0 {
        t + 1
    } else {
        t
    }
}

/// `(X, Y)` of every CNBH-10m tile covering the padded bounds.
pub fn tile_coords(bounds: &BoundingBox) -> Vec<(i32, i32)> {
    let padded = bounds.padded(TILE_PADDING);
    let (x0, y0) = (odd_bound(padded.min_x), odd_bound(padded.min_y));
    let (x1, y1) = (odd_bound(padded.max_x), odd_bound(padded.max_y));
    let mut tiles = Vec::new();
    for y in (y0..=y1).step_by(2) {
        for x in (x0..=x1).step_by(2) {
            tiles.push((x, y));
        }
    }
    tiles
}

pub fn tile_file_name(x: i32, y: i32) -> String {
    format!("CNBH10m_X{}Y{}.tif", x, y)
}

pub fn tile_url(x: i32, y: i32) -> String {
    format!("{}/{}?download=1", CNBH_BASE_URL, tile_file_name(x, y))
}

/// Highest pixel of one tile under each footprint it overlaps (`None` elsewhere).
fn tile_heights(raster: &mut GeoRaster, collection: &BuildingCollection) -> Result<Vec<Option<f64>>> {
    let bounds = raster.lonlat_bounds()?;
    let mut heights = Vec::with_capacity(collection.len());
    for building in collection.buildings() {
        if building.bounding_box().is_some_and(|b| b.intersects(&bounds)) {
            heights.push(Some(raster.masked_max(&building.footprint)?));
        } else {
            heights.push(None);
        }
    }
    Ok(heights)
}

/// Replace footprint heights with the highest raster pixel under each footprint.
/// The maximum is taken over every raster; footprints left at 0 are dropped.
/// A tile that cannot be read or reprojected is skipped as a whole.
pub fn sample_heights(
    mut collection: BuildingCollection,
    rasters: &mut [GeoRaster],
) -> BuildingCollection {
    let mut heights = vec![0.0_f64; collection.len()];
    for raster in rasters.iter_mut() {
        match tile_heights(raster, &collection) {
            Ok(tile) => {
                let mut sampled = 0usize;
                for (height, value) in heights.iter_mut().zip(tile) {
                    if let Some(value) = value {
                        *height = height.max(value);
                        sampled += 1;
                    }
                }
                info!("{}: {} footprints sampled", raster.path().display(), sampled);
            }
            Err(e) => warn!("skipping tile {}: {:#}", raster.path().display(), e),
        }
    }

    let total = collection.len();
    let buildings = std::mem::take(collection.buildings_mut());
    for (mut building, height) in buildings.into_iter().zip(heights) {
        if height > 0.0 {
            building.set_height(height);
            collection.add_building(building);
        }
    }
    info!(
        "{} footprints with a CNBH height, {} dropped at 0 m",
        collection.len(),
        total - collection.len()
    );
    collection
}

/// Footprints from an inner source with heights from the CNBH-10m raster tiles.
pub struct CnbhHeights<S> {
    footprints: S,
    downloader: Downloader,
    dir: PathBuf,
}

impl<S: BuildingSource> CnbhHeights<S> {
    pub fn new(settings: &Settings, footprints: S) -> Result<Self> {
        Ok(CnbhHeights {
            footprints,
            downloader: Downloader::new(settings)?,
            dir: settings.cnbh_dir(),
        })
    }

    /// Download the tiles covering `bounds`; returns the paths available on disk.
    pub fn download_tiles(&self, bounds: &BoundingBox) -> Result<Vec<PathBuf>> {
        let jobs: Vec<DownloadJob> = tile_coords(bounds)
            .into_iter()
            .map(|(x, y)| DownloadJob::new(tile_url(x, y), self.dir.join(tile_file_name(x, y))))
            .collect();
        let report = self.downloader.download_all(&jobs, "CNBH tiles")?;
        info!("{} of {} CNBH tiles on disk", jobs.len() - report.failed.len(), jobs.len());
        Ok(jobs
            .into_iter()
            .map(|j| j.path)
            .filter(|p| p.exists())
            .collect())
    }
}

impl<S: BuildingSource> BuildingSource for CnbhHeights<S> {
    fn name(&self) -> &str {
        "cnbh"
    }

    fn fetch(&mut self, regions: &RegionCollection) -> Result<BuildingCollection> {
        let bounds = regions.bounding_box().ok_or(TractError::EmptyRegions)?;
        let footprints = self
            .footprints
            .fetch(regions)
            .with_context(|| format!("Failed to fetch footprints from {}", self.footprints.name()))?;

        let mut rasters = Vec::new();
        for path in self.download_tiles(&bounds)? {
            info!("loading {}", path.display());
            match GeoRaster::open(&path) {
                Ok(raster) => rasters.push(raster),
                Err(e) => warn!("skipping tile {}: {:#}", path.display(), e),
            }
        }
        Ok(sample_heights(footprints, &mut rasters))
    }
}
