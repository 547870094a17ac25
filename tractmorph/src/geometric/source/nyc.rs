use anyhow::{Context, Result};
use geojson::GeoJson;
use log::info;
use std::path::PathBuf;

use crate::collect::global_variables::{FEET_TO_METERS, NYC_BUILDINGS_URL, NYC_BUILDING_FEAT_CODE};
use crate::collect::http::Downloader;
use crate::config::Settings;
use crate::geometric::building::{json_number, polygonal, Building, BuildingCollection};
use crate::geometric::region::RegionCollection;
use crate::geometric::source::BuildingSource;

/// `feat_code` may be exported as a string or a number.
fn feat_code(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Building features of the NYC footprint export; `heightroof` feet become meters.
pub fn parse_nyc_buildings(bytes: &[u8], storey_height: f64) -> Result<BuildingCollection> {
    let text = std::str::from_utf8(bytes).context("NYC export is not valid UTF-8")?;
    let geojson: GeoJson = text.parse().context("Failed to parse NYC building GeoJSON")?;
    let GeoJson::FeatureCollection(fc) = geojson else {
        anyhow::bail!("NYC building export must be a FeatureCollection");
    };

    let mut collection = BuildingCollection::new(storey_height);
    for feature in &fc.features {
        let is_building = feature
            .property("feat_code")
            .and_then(feat_code)
            .is_some_and(|code| code == NYC_BUILDING_FEAT_CODE);
        if !is_building {
            continue;
        }
        let Some(geometry) = feature.geometry.as_ref() else {
            continue;
        };
        let Some(footprint) = polygonal(geometry)? else {
            continue;
        };
        let feet = feature
            .property("heightroof")
            .and_then(json_number)
            .unwrap_or(0.0);
        let mut building = Building::with_height(footprint, feet * FEET_TO_METERS);
        if let Some(bin) = feature.property("bin").and_then(|v| v.as_str()) {
            building.metadata.insert("bin".to_string(), bin.to_string());
        }
        collection.add_building(building);
    }
    info!("building json file data loaded! ({} buildings)", collection.len());
    Ok(collection)
}

/// NYC open data building footprints, downloaded once and cached.
pub struct NycBuildings {
    downloader: Downloader,
    path: PathBuf,
    storey_height: f64,
}

impl NycBuildings {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(NycBuildings {
            downloader: Downloader::new(settings)?,
            path: settings.nyc_dir().join("building.geojson"),
            storey_height: settings.storey_height,
        })
    }
}

impl BuildingSource for NycBuildings {
    fn name(&self) -> &str {
        "nyc"
    }

    fn fetch(&mut self, _regions: &RegionCollection) -> Result<BuildingCollection> {
        self.downloader
            .download_if_missing(NYC_BUILDINGS_URL, &self.path)
            .context("Failed to download NYC building footprints")?;
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        parse_nyc_buildings(&bytes, self.storey_height)
    }
}
