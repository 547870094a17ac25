use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

use crate::collect::overpass::{OsmFeature, OverpassClient};
use crate::commons::basic_functions::parse_leading_number;
use crate::config::Settings;
use crate::error::TractError;
use crate::geometric::building::{Building, BuildingCollection};
use crate::geometric::region::RegionCollection;
use crate::geometric::source::BuildingSource;

/// OpenStreetMap buildings in the bounding box of the regions (Overpass API).
pub struct OsmBuildings {
    client: OverpassClient,
    storey_height: f64,
    output_path: Option<PathBuf>,
}

impl OsmBuildings {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(OsmBuildings {
            client: OverpassClient::new(settings)?,
            storey_height: settings.storey_height,
            output_path: None,
        })
    }

    /// Also write the fetched footprints to this GeoJSON file.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }
}

/// Footprints with heights from the `height` tag, or `building:levels` × storey height.
pub fn buildings_from_features(features: Vec<OsmFeature>, storey_height: f64) -> BuildingCollection {
    let mut collection = BuildingCollection::new(storey_height);
    for feature in features {
        let mut building = Building::new(feature.geometry);
        if let Some(h) = feature.tags.get("height").and_then(|v| parse_leading_number(v)) {
            building.set_height(h);
        }
        if let Some(levels) = feature
            .tags
            .get("building:levels")
            .and_then(|v| parse_leading_number(v))
            .filter(|l| *l > 0.0)
        {
            building.set_storeys(levels);
        }
        building
            .metadata
            .insert("osmid".to_string(), feature.id);
        if let Some(kind) = feature.tags.get("building") {
            building.metadata.insert("building".to_string(), kind.clone());
        }
        collection.add_building(building);
    }
    collection.resolve_heights();
    collection
}

impl BuildingSource for OsmBuildings {
    fn name(&self) -> &str {
        "osm"
    }

    fn fetch(&mut self, regions: &RegionCollection) -> Result<BuildingCollection> {
        let bbox = regions.bounding_box().ok_or(TractError::EmptyRegions)?;
        let features = self
            .client
            .buildings_in_bbox(&bbox)
            .context("Failed to fetch OSM buildings")?;
        let collection = buildings_from_features(features, self.storey_height);

        if let Some(path) = &self.output_path {
            collection.to_geojson(path)?;
            info!("OSM footprints saved to {}", path.display());
        }
        Ok(collection)
    }
}
