use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;

use crate::collect::global_variables::WORLDPOP_BASE_URL;
use crate::collect::http::Downloader;
use crate::config::Settings;
use crate::geometric::raster::GeoRaster;
use crate::geometric::region::RegionCollection;

/// WorldPop unconstrained population counts (`{iso}_ppp_{year}_UNadj.tif`).
pub struct WorldPop {
    iso: String,
    year: u16,
    dir: PathBuf,
}

impl WorldPop {
    /// `iso` is the ISO 3166-1 alpha-3 country code, e.g. `CHN`.
    pub fn new(settings: &Settings, iso: &str, year: u16) -> Self {
        WorldPop {
            iso: iso.to_uppercase(),
            year,
            dir: settings.worldpop_dir(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_ppp_{}_UNadj.tif", self.iso.to_lowercase(), self.year)
    }

    pub fn url(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            WORLDPOP_BASE_URL,
            self.year,
            self.iso,
            self.file_name()
        )
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(self.file_name())
    }

    /// Local raster path, downloaded once.
    pub fn ensure(&self, downloader: &Downloader) -> Result<PathBuf> {
        let path = self.path();
        if downloader.download_if_missing(&self.url(), &path)? {
            info!("WorldPop raster saved to {}", path.display());
        }
        Ok(path)
    }

    /// Set `pop_overall` of every region to the sum of its positive pixels.
    pub fn assign(&self, regions: &mut RegionCollection) -> Result<()> {
        let path = self.path();
        let mut raster = GeoRaster::open(&path)
            .with_context(|| format!("Failed to open WorldPop raster {}", path.display()))?;
        assign_population(&mut raster, regions)
    }
}

/// Masked sum of positive population pixels per region.
pub fn assign_population(raster: &mut GeoRaster, regions: &mut RegionCollection) -> Result<()> {
    let bounds = raster.bounds();
    for region in regions.regions_mut() {
        if let Some(bbox) = region.bounding_box() {
            if !bbox.intersects(&bounds) {
                warn!("Region {} lies outside the population raster", region.geoid);
            }
        }
        let pop = raster
            .masked_sum_positive(&region.geometry)
            .with_context(|| format!("Population sum failed for region {}", region.geoid))?;
        region.demographics.pop_overall = Some(pop);
    }
    info!("Population assigned to {} regions", regions.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::raster::tests::write_test_raster;
    use crate::geometric::region::Region;
    use geo::{polygon, MultiPolygon};

    #[test]
    fn test_worldpop_url_layout() {
        let mut settings = Settings::default();
        settings.data_dir = PathBuf::from("/tmp/data");
        let pop = WorldPop::new(&settings, "chn", 2020);
        assert_eq!(pop.file_name(), "chn_ppp_2020_UNadj.tif");
        assert_eq!(
            pop.url(),
            "https://data.worldpop.org/GIS/Population/Global_2000_2020/2020/CHN/chn_ppp_2020_UNadj.tif"
        );
        assert_eq!(
            pop.path(),
            PathBuf::from("/tmp/data/data_worldpop/chn_ppp_2020_UNadj.tif")
        );
    }

    #[test]
    fn test_assign_population() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pop.tif");
        let values: Vec<f32> = vec![
            1.0, 2.0, //
            3.0, -5.0,
        ];
        write_test_raster(&path, (100.0, 30.0), 1.0, 2, 2, &values);

        let west = MultiPolygon(vec![polygon![
            (x: 100.0, y: 28.0), (x: 101.0, y: 28.0), (x: 101.0, y: 30.0), (x: 100.0, y: 30.0), (x: 100.0, y: 28.0),
        ]]);
        let east = MultiPolygon(vec![polygon![
            (x: 101.0, y: 28.0), (x: 102.0, y: 28.0), (x: 102.0, y: 30.0), (x: 101.0, y: 30.0), (x: 101.0, y: 28.0),
        ]]);
        let mut regions = RegionCollection::from_regions(vec![
            Region::new("W", 1.0, west),
            Region::new("E", 1.0, east),
        ])
        .unwrap();

        let mut raster = GeoRaster::open(&path).unwrap();
        assign_population(&mut raster, &mut regions).unwrap();
        assert_eq!(regions.get("W").unwrap().demographics.pop_overall, Some(4.0));
        assert_eq!(regions.get("E").unwrap().demographics.pop_overall, Some(2.0));
    }
}
