use anyhow::{Context, Result};
use geojson::GeoJson;
use log::{info, warn};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::collect::overpass::{to_feature_collection, OsmFeature, OverpassClient};
use crate::commons::basic_functions::{append_error_log, ensure_dir_exists, write_atomic};
use crate::config::Settings;

/// World cities whose OSM footprints are collected, grouped by region.
pub const CITY_GROUPS: &[(&str, &[&str])] = &[
    (
        "America",
        &[
            "New York",
            "San Francisco",
            "Los Angeles",
            "Boston",
            "Toronto",
            "Vancouver",
            "Mexico City",
            "Sao Paulo",
            "Buenos Aires",
        ],
    ),
    (
        "Europe",
        &[
            "Amsterdam",
            "Athens",
            "Berlin",
            "Brussels",
            "Hamburg",
            "Istanbul",
            "Lisbon",
            "London",
            "Madrid",
            "Manchester",
            "Milan",
            "Munich",
            "Paris",
            "Rome",
            "Vienna",
            "Delft",
        ],
    ),
    (
        "Eastern_Europe",
        &["Kiev", "Minsk", "Moscow", "Saint Petersburg", "Warsaw"],
    ),
    ("Australia", &["Sydney", "Melbourne", "Canberra"]),
    (
        "East_Asia",
        &[
            "Singapore",
            "Chennai",
            "Kampala",
            "Hong Kong",
            "Seoul",
            "Osaka",
            "Bangkok",
            "Guangzhou",
            "Shanghai",
            "Tokyo",
            "Beijing",
            "Wuhan",
            "Tianjin",
            "Changsha",
        ],
    ),
];

pub fn footprint_path(root: &Path, group: &str, city: &str) -> PathBuf {
    root.join(group).join(format!("buildings_{}.geojson", city))
}

pub fn error_log_path(root: &Path) -> PathBuf {
    root.join("error.log")
}

/// Completed cities of one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupProgress {
    pub group: String,
    pub done: usize,
    pub total: usize,
}

impl fmt::Display for GroupProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Finished: {}: {}/{}", self.group, self.done, self.total)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FootprintSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn check(root: &Path, groups: &[(&str, &[&str])]) -> Vec<GroupProgress> {
    groups
        .iter()
        .map(|(group, cities)| GroupProgress {
            group: group.to_string(),
            done: cities
                .iter()
                .filter(|city| footprint_path(root, group, city).exists())
                .count(),
            total: cities.len(),
        })
        .collect()
}

/// Fetch every missing city with `fetch` and write its GeoJSON.
/// A failing city is appended to `error.log` and the loop moves on.
pub fn download_with<F>(root: &Path, groups: &[(&str, &[&str])], mut fetch: F) -> Result<FootprintSummary>
where
    F: FnMut(&str) -> Result<Vec<OsmFeature>>,
{
    let mut summary = FootprintSummary::default();
    for (group, cities) in groups {
        ensure_dir_exists(&root.join(group))?;
        for (i, city) in cities.iter().enumerate() {
            info!("{}({}/{}):{}", group, i + 1, cities.len(), city);
            let path = footprint_path(root, group, city);
            if path.exists() {
                info!("file exists: {}", path.display());
                summary.skipped += 1;
                continue;
            }

            let result = fetch(city).and_then(|features| {
                let text = GeoJson::from(to_feature_collection(&features)).to_string();
                write_atomic(&path, text.as_bytes())?;
                Ok(features.len())
            });
            match result {
                Ok(count) => {
                    info!("buildings num: {}", count);
                    summary.written += 1;
                }
                Err(e) => {
                    warn!("Error: {}: {:#}", city, e);
                    append_error_log(&error_log_path(root), city, &e)
                        .context("Failed to append to error log")?;
                    summary.failed += 1;
                }
            }
        }
    }
    Ok(summary)
}

/// OSM building footprints of the world cities in [`CITY_GROUPS`].
pub struct CityFootprints {
    client: OverpassClient,
    root: PathBuf,
}

impl CityFootprints {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(CityFootprints {
            client: OverpassClient::new(settings)?,
            root: settings.footprint_dir(),
        })
    }

    pub fn download(&self) -> Result<FootprintSummary> {
        download_with(&self.root, CITY_GROUPS, |city| self.client.buildings_in_place(city))
    }

    pub fn check(&self) -> Vec<GroupProgress> {
        check(&self.root, CITY_GROUPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};
    use std::collections::HashMap;

    const GROUPS: &[(&str, &[&str])] = &[("Test", &["Alpha", "Beta", "Gamma"])];

    fn square() -> OsmFeature {
        let mut tags = HashMap::new();
        tags.insert("building".to_string(), "yes".to_string());
        OsmFeature {
            id: "way/1".to_string(),
            geometry: MultiPolygon(vec![polygon![
                (x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0),
            ]]),
            tags,
        }
    }

    #[test]
    fn test_city_groups() {
        let total: usize = CITY_GROUPS.iter().map(|(_, c)| c.len()).sum();
        assert_eq!(CITY_GROUPS.len(), 5);
        assert_eq!(total, 47);
    }

    #[test]
    fn test_download_skips_existing_and_logs_failures() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("Test")).unwrap();
        std::fs::write(footprint_path(root, "Test", "Alpha"), "{}").unwrap();

        let mut calls = Vec::new();
        let summary = download_with(root, GROUPS, |city| {
            calls.push(city.to_string());
            if city == "Beta" {
                anyhow::bail!("Nominatim returned no result for {}", city);
            }
            Ok(vec![square()])
        })
        .unwrap();

        assert_eq!(calls, vec!["Beta", "Gamma"]);
        assert_eq!(
            summary,
            FootprintSummary {
                written: 1,
                skipped: 1,
                failed: 1
            }
        );
        let log = std::fs::read_to_string(error_log_path(root)).unwrap();
        assert!(log.contains("####################Error: Beta####################"));
        assert!(log.contains("Nominatim returned no result for Beta"));

        let written = std::fs::read_to_string(footprint_path(root, "Test", "Gamma")).unwrap();
        assert!(written.contains("\"osmid\":\"way/1\""));

        let progress = check(root, GROUPS);
        assert_eq!(progress[0].to_string(), "Finished: Test: 2/3");
    }
}
