use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

use crate::config::Settings;
use crate::geometric::building::BuildingCollection;
use crate::geometric::region::RegionCollection;
use crate::geometric::source::BuildingSource;

/// Buildings from a local GeoJSON file (`height`/`hauteur`, storeys, alternative height).
pub struct GeoJsonBuildings {
    path: PathBuf,
    storey_height: f64,
}

impl GeoJsonBuildings {
    pub fn new(settings: &Settings, path: impl Into<PathBuf>) -> Self {
        GeoJsonBuildings {
            path: path.into(),
            storey_height: settings.storey_height,
        }
    }
}

impl BuildingSource for GeoJsonBuildings {
    fn name(&self) -> &str {
        "geojson"
    }

    fn fetch(&mut self, _regions: &RegionCollection) -> Result<BuildingCollection> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let mut collection = BuildingCollection::from_geojson(&bytes, self.storey_height)?;
        collection.resolve_heights();
        info!("{} buildings loaded from {}", collection.len(), self.path.display());
        Ok(collection)
    }
}
