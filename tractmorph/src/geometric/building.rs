use anyhow::{Context, Result};
use geo::orient::{Direction, Orient};
#[cfg(feature = "polars")]
use geo::Centroid;
use geo::{BoundingRect, GeodesicArea, MultiPolygon, Polygon};
use geojson::{Feature as GeoJsonFeature, FeatureCollection, GeoJson, Geometry, JsonObject};
use log::warn;
#[cfg(feature = "polars")]
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::commons::basic_functions::{parse_leading_number, write_atomic};
use crate::geo_core::BoundingBox;

/// Geodesic area on the WGS84 ellipsoid in square meters.
/// The footprint is reoriented first, so the result does not depend on vertex winding.
pub fn geodesic_area(footprint: &MultiPolygon<f64>) -> f64 {
    footprint
        .orient(Direction::Default)
        .geodesic_area_signed()
        .abs()
}

/// Polygonal part of a GeoJSON geometry; `None` for points and lines.
pub fn polygonal(geometry: &Geometry) -> Result<Option<MultiPolygon<f64>>> {
    let geo_geom: geo::Geometry<f64> = geometry
        .try_into()
        .context("Failed to convert GeoJSON geometry to geo::Geometry")?;

    match geo_geom {
        geo::Geometry::Polygon(poly) => Ok(Some(MultiPolygon(vec![poly]))),
        geo::Geometry::MultiPolygon(mp) if !mp.0.is_empty() => Ok(Some(mp)),
        _ => Ok(None),
    }
}

pub fn geojson_type_name(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Numeric JSON property: a number, or a string starting with one (`"12 m"`).
pub fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        serde_json::Value::String(s) => parse_leading_number(s),
        _ => None,
    }
}

/// Building structure representing a single building with its geometric and metadata properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Building {
    /// Building footprint in WGS84 lon/lat
    pub footprint: MultiPolygon<f64>,
    /// Building height in meters
    pub height: Option<f64>,
    /// Number of storeys (if available)
    pub storeys: Option<f64>,
    /// Secondary height field used when `height` is missing
    pub alternative_height: Option<f64>,
    /// Additional metadata as key-value pairs
    pub metadata: HashMap<String, String>,
}

impl Building {
    pub fn new(footprint: MultiPolygon<f64>) -> Self {
        Building {
            footprint,
            height: None,
            storeys: None,
            alternative_height: None,
            metadata: HashMap::new(),
        }
    }

    pub fn from_polygon(footprint: Polygon<f64>) -> Self {
        Self::new(MultiPolygon(vec![footprint]))
    }

    pub fn with_height(footprint: MultiPolygon<f64>, height: f64) -> Self {
        let mut building = Self::new(footprint);
        building.height = Some(height);
        building
    }

    pub fn set_height(&mut self, height: f64) {
        self.height = Some(height);
    }

    pub fn set_storeys(&mut self, storeys: f64) {
        self.storeys = Some(storeys);
    }

    /// Height with the missing value coerced to 0.
    pub fn effective_height(&self) -> f64 {
        self.height.filter(|h| h.is_finite()).unwrap_or(0.0)
    }

    pub fn geodesic_area(&self) -> f64 {
        geodesic_area(&self.footprint)
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.footprint.bounding_rect().map(BoundingBox::from_rect)
    }
}

/// Collection of buildings loaded from one source
pub struct BuildingCollection {
    pub buildings: Vec<Building>,
    pub default_storey_height: f64,
}

impl BuildingCollection {
    pub fn new(default_storey_height: f64) -> Self {
        BuildingCollection {
            buildings: Vec::new(),
            default_storey_height,
        }
    }

    pub fn from_buildings(buildings: Vec<Building>) -> Self {
        let mut collection = Self::new(crate::collect::global_variables::DEFAULT_STOREY_HEIGHT);
        collection.buildings = buildings;
        collection
    }

    pub fn add_building(&mut self, building: Building) {
        self.buildings.push(building);
    }

    pub fn len(&self) -> usize {
        self.buildings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
    }

    pub fn buildings(&self) -> &Vec<Building> {
        &self.buildings
    }

    pub fn buildings_mut(&mut self) -> &mut Vec<Building> {
        &mut self.buildings
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_geometries(self.buildings.iter().map(|b| &b.footprint))
    }

    /// Fill missing heights from storeys or the alternative height field.
    /// Buildings with none of them keep `None` (counted as 0 downstream).
    pub fn resolve_heights(&mut self) {
        for building in &mut self.buildings {
            if building.height.is_some() {
                continue;
            }
            if let Some(storeys) = building.storeys {
                building.set_height(storeys * self.default_storey_height);
            } else if let Some(h2) = building.alternative_height {
                building.set_height(h2);
            }
        }
    }

    /// Load buildings from GeoJSON (file or bytes)
    pub fn from_geojson(geojson_data: &[u8], default_storey_height: f64) -> Result<Self> {
        let mut collection = Self::new(default_storey_height);

        let geojson_str =
            std::str::from_utf8(geojson_data).context("GeoJSON data is not valid UTF-8")?;
        let geojson: GeoJson = geojson_str.parse().context("Failed to parse GeoJSON")?;

        let features = match geojson {
            GeoJson::FeatureCollection(fc) => fc.features,
            GeoJson::Feature(f) => vec![f],
            _ => anyhow::bail!("GeoJSON must be a Feature or FeatureCollection"),
        };

        for feature in &features {
            match Self::geojson_feature_to_building(feature) {
                Ok(Some(building)) => collection.add_building(building),
                Ok(None) => continue,
                Err(e) => {
                    warn!("Failed to process feature: {:#}", e);
                    continue;
                }
            }
        }

        Ok(collection)
    }

    /// Convert GeoJSON feature to Building
    /// Returns None if geometry is not polygonal (allows skipping points and lines)
    fn geojson_feature_to_building(feature: &GeoJsonFeature) -> Result<Option<Building>> {
        let geometry = feature
            .geometry
            .as_ref()
            .context("Feature has no geometry")?;

        let Some(footprint) = polygonal(geometry)? else {
            return Ok(None);
        };
        let mut building = Building::new(footprint);

        if let Some(properties) = &feature.properties {
            for (key, value) in properties {
                match key.to_lowercase().as_str() {
                    "height" | "hauteur" => {
                        if let Some(h) = json_number(value) {
                            building.set_height(h);
                        }
                    }
                    "storeys" | "building:levels" | "nombre_d_etages" | "etages" => {
                        if let Some(s) = json_number(value).filter(|s| *s > 0.0) {
                            building.set_storeys(s);
                        }
                    }
                    "height_2" | "hauteur_2" | "h2" => {
                        if let Some(h) = json_number(value).filter(|h| *h > 0.0) {
                            building.alternative_height = Some(h);
                        }
                    }
                    _ => {
                        if let Some(s) = value.as_str() {
                            building.metadata.insert(key.clone(), s.to_string());
                        } else if let Some(f) = value.as_f64() {
                            building.metadata.insert(key.clone(), f.to_string());
                        }
                    }
                }
            }
        }

        Ok(Some(building))
    }

    /// GeoJSON FeatureCollection with one feature per building (`height` when known)
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .buildings
            .iter()
            .map(|b| {
                let mut properties = JsonObject::new();
                if let Some(h) = b.height {
                    properties.insert("height".to_string(), h.into());
                }
                for (key, value) in &b.metadata {
                    properties.insert(key.clone(), value.clone().into());
                }
                GeoJsonFeature {
                    bbox: None,
                    geometry: Some(Geometry::new(geojson::Value::from(&b.footprint))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    pub fn to_geojson(&self, path: &Path) -> Result<()> {
        let text = GeoJson::from(self.to_feature_collection()).to_string();
        write_atomic(path, text.as_bytes())
    }

    /// Convert building collection to Polars DataFrame
    #[cfg(feature = "polars")]
    pub fn to_polars_df(&self) -> Result<DataFrame> {
        let mut height_vec: Vec<Option<f64>> = Vec::new();
        let mut area_vec: Vec<f64> = Vec::new();
        let mut centroid_x_vec: Vec<Option<f64>> = Vec::new();
        let mut centroid_y_vec: Vec<Option<f64>> = Vec::new();
        let mut storeys_vec: Vec<Option<f64>> = Vec::new();

        for building in &self.buildings {
            let centroid = building.footprint.centroid();
            height_vec.push(building.height);
            area_vec.push(building.geodesic_area());
            centroid_x_vec.push(centroid.map(|c| c.x()));
            centroid_y_vec.push(centroid.map(|c| c.y()));
            storeys_vec.push(building.storeys);
        }

        let df = df! [
            "height" => height_vec,
            "area" => area_vec,
            "centroid_x" => centroid_x_vec,
            "centroid_y" => centroid_y_vec,
            "storeys" => storeys_vec,
        ]
        .context("Failed to create DataFrame")?;

        Ok(df)
    }
}
