use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use geojson::Feature;
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::collect::global_variables::{MS_DATASET_LINKS_URL, MS_TILE_ZOOM};
use crate::collect::http::{DownloadJob, Downloader};
use crate::collect::quadkey::quadkeys_for_bbox;
use crate::config::Settings;
use crate::error::TractError;
use crate::geo_core::BoundingBox;
use crate::geometric::building::{json_number, polygonal, Building, BuildingCollection};
use crate::geometric::region::RegionCollection;
use crate::geometric::source::BuildingSource;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One row of `dataset-links.csv`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatasetLink {
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "QuadKey")]
    pub quadkey: u64,
    #[serde(rename = "Url")]
    pub url: String,
    #[serde(rename = "Size", default)]
    pub size: Option<String>,
}

impl DatasetLink {
    pub fn cache_name(&self) -> String {
        let location: String = self
            .location
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}_{}.csv.gz", location, self.quadkey)
    }
}

pub fn parse_dataset_links(bytes: &[u8]) -> Result<Vec<DatasetLink>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let mut links = Vec::new();
    for (line, row) in reader.deserialize::<DatasetLink>().enumerate() {
        match row {
            Ok(link) => links.push(link),
            Err(e) => debug!("dataset-links row {} skipped: {}", line + 2, e),
        }
    }
    Ok(links)
}

/// Rows whose quadkey is one of `quadkeys`. A quadkey can appear under several locations.
pub fn select_links(links: &[DatasetLink], quadkeys: &BTreeSet<u64>) -> Vec<DatasetLink> {
    links
        .iter()
        .filter(|l| quadkeys.contains(&l.quadkey))
        .cloned()
        .collect()
}

/// Read a GeoJSON-lines file, gzip-compressed or plain.
/// Features whose envelope misses `bounds` are skipped.
pub fn read_geojsonl(bytes: &[u8], bounds: &BoundingBox) -> Result<Vec<Building>> {
    let reader: Box<dyn Read + '_> = if bytes.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };

    let mut buildings = Vec::new();
    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.context("Failed to read GeoJSON-lines data")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let feature: Feature = match line.parse() {
            Ok(f) => f,
            Err(e) => {
                warn!("line {}: invalid feature: {}", idx + 1, e);
                continue;
            }
        };
        let Some(geometry) = feature.geometry.as_ref() else {
            continue;
        };
        let Some(footprint) = polygonal(geometry)? else {
            continue;
        };
        let mut building = Building::new(footprint);
        if !building
            .bounding_box()
            .is_some_and(|b| b.intersects(bounds))
        {
            continue;
        }
        if let Some(h) = feature.property("height").and_then(json_number) {
            building.set_height(h);
        }
        buildings.push(building);
    }
    Ok(buildings)
}

fn read_cached(path: &Path, bounds: &BoundingBox) -> Result<Vec<Building>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    read_geojsonl(&bytes, bounds).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Buildings of every cached tile that reads cleanly.
/// An unreadable tile is skipped and removed so the next run downloads it again.
pub fn read_cached_tiles(paths: &[PathBuf], bounds: &BoundingBox) -> Vec<Building> {
    let mut buildings = Vec::new();
    for path in paths {
        match read_cached(path, bounds) {
            Ok(tile) => {
                info!("{}: {} buildings in range", path.display(), tile.len());
                buildings.extend(tile);
            }
            Err(e) => {
                warn!("skipping tile {}: {:#}", path.display(), e);
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("could not remove {}: {}", path.display(), e);
                }
            }
        }
    }
    buildings
}

/// Microsoft Global ML Building Footprints, partitioned by zoom-9 quadkeys.
pub struct MicrosoftBuildings {
    downloader: Downloader,
    cache_dir: PathBuf,
    links_url: String,
    storey_height: f64,
}

impl MicrosoftBuildings {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(MicrosoftBuildings {
            downloader: Downloader::new(settings)?,
            cache_dir: settings.microsoft_cache_dir(),
            links_url: MS_DATASET_LINKS_URL.to_string(),
            storey_height: settings.storey_height,
        })
    }
}

impl BuildingSource for MicrosoftBuildings {
    fn name(&self) -> &str {
        "microsoft"
    }

    fn fetch(&mut self, regions: &RegionCollection) -> Result<BuildingCollection> {
        let bounds = regions.bounding_box().ok_or(TractError::EmptyRegions)?;
        let quadkeys = quadkeys_for_bbox(&bounds, MS_TILE_ZOOM);
        debug!("zoom-{} quadkeys covering the regions: {:?}", MS_TILE_ZOOM, quadkeys);

        let csv = self
            .downloader
            .get_bytes(&self.links_url)
            .context("Failed to fetch dataset-links.csv")?;
        let links = select_links(&parse_dataset_links(&csv)?, &quadkeys);
        info!("{} building tiles selected", links.len());

        let jobs: Vec<DownloadJob> = links
            .iter()
            .map(|l| DownloadJob::new(l.url.clone(), self.cache_dir.join(l.cache_name())))
            .collect();
        let report = self.downloader.download_all(&jobs, "building tiles")?;

        let cached: Vec<PathBuf> = jobs
            .into_iter()
            .filter(|job| !report.failed.iter().any(|(f, _)| f.path == job.path))
            .map(|job| job.path)
            .collect();

        let mut collection = BuildingCollection::new(self.storey_height);
        for building in read_cached_tiles(&cached, &bounds) {
            collection.add_building(building);
        }
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const LINES: &str = concat!(
        r#"{"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[-74.0,40.7],[-73.999,40.7],[-73.999,40.701],[-74.0,40.7]]]},"properties":{"height":12.3,"confidence":-1.0}}"#,
        "\n",
        r#"{"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[-74.0,40.7],[-73.999,40.7],[-73.999,40.701],[-74.0,40.7]]]},"properties":{"height":-1.0}}"#,
        "\n\n",
        r#"{"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[10.0,10.0],[10.001,10.0],[10.001,10.001],[10.0,10.0]]]},"properties":{"height":5.0}}"#,
        "\n",
    );

    #[test]
    fn test_parse_dataset_links() {
        let csv = "Location,QuadKey,Url,Size\n\
                   UnitedStates,032010110,https://example.org/a.csv.gz,1.2MB\n\
                   UnitedStates,032010111,https://example.org/b.csv.gz,3MB\n\
                   Mexico,032010110,https://example.org/c.csv.gz,10KB\n";
        let links = parse_dataset_links(csv.as_bytes()).unwrap();
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].quadkey, 32010110);

        let wanted: BTreeSet<u64> = [32010110].into_iter().collect();
        let selected = select_links(&links, &wanted);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].cache_name(), "UnitedStates_32010110.csv.gz");
        assert_eq!(selected[1].location, "Mexico");
    }

    #[test]
    fn test_read_plain_and_gzip() {
        let bounds = BoundingBox::new(-74.1, 40.6, -73.9, 40.8);

        let plain = read_geojsonl(LINES.as_bytes(), &bounds).unwrap();
        assert_eq!(plain.len(), 2);
        assert_eq!(plain[0].height, Some(12.3));
        assert_eq!(plain[1].height, Some(-1.0));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(LINES.as_bytes()).unwrap();
        let gz = encoder.finish().unwrap();
        let compressed = read_geojsonl(&gz, &bounds).unwrap();
        assert_eq!(compressed.len(), 2);
    }

    #[test]
    fn test_corrupt_cached_tile_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let bounds = BoundingBox::new(-74.1, 40.6, -73.9, 40.8);

        let good = dir.path().join("UnitedStates_32010110.csv.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(LINES.as_bytes()).unwrap();
        std::fs::write(&good, encoder.finish().unwrap()).unwrap();

        // gzip magic followed by an invalid compression method
        let bad = dir.path().join("UnitedStates_32010111.csv.gz");
        std::fs::write(&bad, [0x1f, 0x8b, 0xff, 0xff, 0x00, 0x01, 0x02]).unwrap();

        let buildings = read_cached_tiles(&[bad.clone(), good.clone()], &bounds);
        assert_eq!(buildings.len(), 2);
        assert!(!bad.exists());
        assert!(good.exists());
    }
}
