use anyhow::{Context, Result};
use geo::{BoundingRect, MultiPolygon, Point};
use geojson::{Feature as GeoJsonFeature, FeatureCollection, GeoJson, Geometry, JsonObject};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use shapefile::dbase::{FieldValue, Record};
use shapefile::Shape;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use crate::collect::acs::PopulationRow;
use crate::collect::tiger::TigerTracts;
use crate::commons::basic_functions::{extract_zip, find_file_with_extension};
use crate::error::TractError;
use crate::geo_core::BoundingBox;
use crate::geometric::building::{geojson_type_name, json_number, polygonal};

/// Optional demographic attributes merged from external tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    pub pop_overall: Option<f64>,
    pub population_over18: Option<f64>,
    pub pop_employment: Option<f64>,
}

/// A census-tract-like region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub geoid: String,
    /// Land area in square meters as published by the boundary source
    pub aland: f64,
    pub geometry: MultiPolygon<f64>,
    /// Published interior point (INTPTLON, INTPTLAT)
    pub interior_point: Option<Point<f64>>,
    pub demographics: Demographics,
}

impl Region {
    pub fn new(geoid: impl Into<String>, aland: f64, geometry: MultiPolygon<f64>) -> Self {
        Region {
            geoid: geoid.into(),
            aland,
            geometry,
            interior_point: None,
            demographics: Demographics::default(),
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.geometry.bounding_rect().map(BoundingBox::from_rect)
    }
}

/// Convert shapefile::Polygon to geo::MultiPolygon<f64>
/// Shapefile stores each exterior ring (clockwise) followed by its holes.
fn shp_to_geo(p: &shapefile::Polygon) -> MultiPolygon<f64> {
    fn signed_area(pts: &[geo::Coord<f64>]) -> f64 {
        pts.windows(2)
            .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
            .sum::<f64>()
            / 2.0
    }

    let mut polys: Vec<geo::Polygon<f64>> = Vec::new();
    let mut current_exterior: Option<geo::LineString<f64>> = None;
    let mut current_holes: Vec<geo::LineString<f64>> = Vec::new();

    for ring in p.rings() {
        let mut coords: Vec<geo::Coord<f64>> = ring
            .points()
            .iter()
            .map(|pt| geo::Coord { x: pt.x, y: pt.y })
            .collect();
        if coords.first() != coords.last() {
            if let Some(first) = coords.first().copied() {
                coords.push(first);
            }
        }
        let is_exterior = signed_area(&coords) < 0.0;
        let ls = geo::LineString(coords);
        if is_exterior {
            if let Some(ext) = current_exterior.take() {
                polys.push(geo::Polygon::new(ext, std::mem::take(&mut current_holes)));
            }
            current_exterior = Some(ls);
        } else {
            current_holes.push(ls);
        }
    }
    if let Some(ext) = current_exterior {
        polys.push(geo::Polygon::new(ext, current_holes));
    }

    MultiPolygon(polys)
}

fn character_field(record: &Record, field: &str) -> Option<String> {
    match record.get(field) {
        Some(FieldValue::Character(Some(s))) => Some(s.trim().to_string()),
        _ => None,
    }
}

fn numeric_field(record: &Record, field: &str) -> Option<f64> {
    match record.get(field) {
        Some(FieldValue::Numeric(Some(n))) => Some(*n),
        Some(FieldValue::Float(Some(f))) => Some(f64::from(*f)),
        Some(FieldValue::Double(d)) => Some(*d),
        Some(FieldValue::Character(Some(s))) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Read a JSON array of GEOID strings (`regs.json`).
pub fn read_geoid_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read GEOID list {}", path.display()))?;
    let ids: Vec<serde_json::Value> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array", path.display()))?;
    ids.into_iter()
        .map(|v| match v {
            serde_json::Value::String(s) => Ok(s),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => anyhow::bail!("Unexpected GEOID entry {}", other),
        })
        .collect()
}

/// Set of regions keyed by unique GEOID, in load order
#[derive(Default)]
pub struct RegionCollection {
    regions: Vec<Region>,
    index: HashMap<String, usize>,
}

impl RegionCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection, rejecting duplicate GEOIDs.
    pub fn from_regions(regions: Vec<Region>) -> Result<Self> {
        let mut collection = Self::new();
        for region in regions {
            collection.add_region(region)?;
        }
        Ok(collection)
    }

    pub fn add_region(&mut self, region: Region) -> Result<()> {
        if self.index.contains_key(&region.geoid) {
            return Err(TractError::DuplicateGeoid(region.geoid).into());
        }
        self.index.insert(region.geoid.clone(), self.regions.len());
        self.regions.push(region);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut [Region] {
        &mut self.regions
    }

    pub fn get(&self, geoid: &str) -> Option<&Region> {
        self.index.get(geoid).map(|&i| &self.regions[i])
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_geometries(self.regions.iter().map(|r| &r.geometry))
    }

    /// Keep only the listed GEOIDs; load order is preserved.
    pub fn retain_geoids(&mut self, geoids: &[String]) {
        let wanted: HashSet<&str> = geoids.iter().map(String::as_str).collect();
        let missing: Vec<&str> = wanted
            .iter()
            .filter(|g| !self.index.contains_key(**g))
            .copied()
            .collect();
        if !missing.is_empty() {
            warn!("{} requested GEOID(s) not found in boundaries", missing.len());
        }
        self.regions.retain(|r| wanted.contains(r.geoid.as_str()));
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index = self
            .regions
            .iter()
            .enumerate()
            .map(|(i, r)| (r.geoid.clone(), i))
            .collect();
    }

    /// Load regions from a GeoJSON Feature/FeatureCollection with `GEOID` and `ALAND` properties.
    pub fn from_geojson(geojson_data: &[u8]) -> Result<Self> {
        let geojson_str =
            std::str::from_utf8(geojson_data).context("GeoJSON data is not valid UTF-8")?;
        let geojson: GeoJson = geojson_str.parse().context("Failed to parse GeoJSON")?;
        let features = match geojson {
            GeoJson::FeatureCollection(fc) => fc.features,
            GeoJson::Feature(f) => vec![f],
            _ => anyhow::bail!("GeoJSON must be a Feature or FeatureCollection"),
        };

        let mut collection = Self::new();
        for (idx, feature) in features.iter().enumerate() {
            let region = Self::geojson_feature_to_region(feature)
                .with_context(|| format!("Invalid region feature #{}", idx))?;
            collection.add_region(region)?;
        }
        Ok(collection)
    }

    fn geojson_feature_to_region(feature: &GeoJsonFeature) -> Result<Region> {
        let properties = feature
            .properties
            .as_ref()
            .ok_or_else(|| TractError::MissingProperty("GEOID".to_string()))?;

        let geoid = match properties.get("GEOID") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(TractError::MissingProperty("GEOID".to_string()).into()),
        };
        let aland = properties
            .get("ALAND")
            .and_then(json_number)
            .ok_or_else(|| TractError::MissingProperty("ALAND".to_string()))?;

        let geometry = feature
            .geometry
            .as_ref()
            .context("Feature has no geometry")?;
        let Some(geometry) = polygonal(geometry)? else {
            return Err(TractError::UnsupportedGeometry(format!(
                "{} (GEOID {})",
                geojson_type_name(&geometry.value),
                geoid
            ))
            .into());
        };

        let mut region = Region::new(geoid, aland, geometry);
        let lat = properties.get("INTPTLAT").and_then(json_number);
        let lon = properties.get("INTPTLON").and_then(json_number);
        if let (Some(lat), Some(lon)) = (lat, lon) {
            region.interior_point = Some(Point::new(lon, lat));
        }
        region.demographics = Demographics {
            pop_overall: properties.get("pop_overall").and_then(json_number),
            population_over18: properties.get("population_over18").and_then(json_number),
            pop_employment: properties.get("pop_employment").and_then(json_number),
        };
        Ok(region)
    }

    /// Load every tract of a TIGER tract shapefile.
    pub fn from_tiger_shapefile(path: &Path) -> Result<Self> {
        let mut reader = shapefile::Reader::from_path(path)
            .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;

        // NAD83 lon/lat, used as WGS84 as-is
        let mut collection = Self::new();
        for result in reader.iter_shapes_and_records() {
            let (shape, record) = result.context("Error reading shape+record")?;
            let geometry = match shape {
                Shape::Polygon(p) => shp_to_geo(&p),
                Shape::NullShape => continue,
                other => {
                    return Err(
                        TractError::UnsupportedGeometry(format!("{:?}", other.shapetype())).into(),
                    )
                }
            };
            let geoid = character_field(&record, "GEOID")
                .ok_or_else(|| TractError::MissingProperty("GEOID".to_string()))?;
            let aland = numeric_field(&record, "ALAND")
                .ok_or_else(|| TractError::MissingProperty("ALAND".to_string()))?;

            let mut region = Region::new(geoid, aland, geometry);
            if let (Some(lat), Some(lon)) = (
                numeric_field(&record, "INTPTLAT"),
                numeric_field(&record, "INTPTLON"),
            ) {
                region.interior_point = Some(Point::new(lon, lat));
            }
            collection.add_region(region)?;
        }
        Ok(collection)
    }

    /// Extract a TIGER archive into a temp dir and load its shapefile.
    pub fn from_tiger_zip(zip_path: &Path) -> Result<Self> {
        let temp_dir = tempfile::TempDir::new().context("Failed to create temp dir")?;
        extract_zip(zip_path, temp_dir.path())?;
        let shp = find_file_with_extension(temp_dir.path(), "shp")?
            .with_context(|| format!("No .shp inside {}", zip_path.display()))?;
        Self::from_tiger_shapefile(&shp)
    }

    /// Tracts for a GEOID list: one archive per state prefix (downloaded when missing),
    /// concatenated, then filtered to the list.
    pub fn from_tiger_tracts(tracts: &TigerTracts, geoids: &[String]) -> Result<Self> {
        let states: BTreeSet<String> = geoids
            .iter()
            .filter_map(|g| g.get(..2).map(str::to_string))
            .collect();

        let mut collection = Self::new();
        for state in &states {
            let archive = tracts.ensure_state(state)?;
            let loaded = Self::from_tiger_zip(&archive)?;
            for region in loaded.regions {
                collection.add_region(region)?;
            }
        }
        collection.retain_geoids(geoids);
        info!("{} tracts kept from the GEOID list", collection.len());
        Ok(collection)
    }

    /// Left-join ACS population by GEOID.
    pub fn merge_population(&mut self, table: &HashMap<String, PopulationRow>) {
        let mut matched = 0;
        for region in &mut self.regions {
            if let Some(row) = table.get(&region.geoid) {
                region.demographics.pop_overall = row.pop_overall;
                region.demographics.population_over18 = row.population_over18;
                matched += 1;
            }
        }
        info!("population matched for {}/{} regions", matched, self.regions.len());
    }

    /// Left-join ACS employment by GEOID.
    pub fn merge_employment(&mut self, table: &HashMap<String, Option<f64>>) {
        let mut matched = 0;
        for region in &mut self.regions {
            if let Some(value) = table.get(&region.geoid) {
                region.demographics.pop_employment = *value;
                matched += 1;
            }
        }
        info!("employment matched for {}/{} regions", matched, self.regions.len());
    }

    /// Region outlines as GeoJSON with GEOID and ALAND properties
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .regions
            .iter()
            .map(|r| {
                let mut properties = JsonObject::new();
                properties.insert("GEOID".to_string(), r.geoid.clone().into());
                properties.insert("ALAND".to_string(), r.aland.into());
                GeoJsonFeature {
                    bbox: None,
                    geometry: Some(Geometry::new(geojson::Value::from(&r.geometry))),
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
}
