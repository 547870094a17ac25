use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::collect::global_variables::{
    DATA_PATH, DEFAULT_CENSUS_YEAR, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_PROCESSES,
    DEFAULT_STOREY_HEIGHT, NOMINATIM_URL, OVERPASS_URL, USER_AGENT,
};

/// Run settings shared by every command.
/// Loaded from an optional JSON file; command-line flags override individual fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the on-disk layout (`data_{city}/`, `data_census_tract/`, ...)
    pub data_dir: PathBuf,
    /// TIGER vintage used for census tracts
    pub census_year: u16,
    /// Worker threads for parallel downloads
    pub processes: usize,
    pub http_timeout_secs: u64,
    /// Meters per storey when only `building:levels` is known
    pub storey_height: f64,
    pub user_agent: String,
    pub overpass_url: String,
    pub nominatim_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from(DATA_PATH),
            census_year: DEFAULT_CENSUS_YEAR,
            processes: DEFAULT_PROCESSES,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            storey_height: DEFAULT_STOREY_HEIGHT,
            user_agent: USER_AGENT.to_string(),
            overpass_url: OVERPASS_URL.to_string(),
            nominatim_url: NOMINATIM_URL.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Settings::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        Ok(settings)
    }

    pub fn city_dir(&self, city: &str) -> PathBuf {
        self.data_dir.join(format!("data_{}", city))
    }

    pub fn census_tract_dir(&self, year: u16) -> PathBuf {
        self.data_dir
            .join("data_census_tract")
            .join(format!("census_tract_{}", year))
    }

    pub fn census_gov_dir(&self) -> PathBuf {
        self.data_dir.join("data_census_gov")
    }

    pub fn nyc_dir(&self) -> PathBuf {
        self.data_dir.join("data_nyc")
    }

    pub fn microsoft_cache_dir(&self) -> PathBuf {
        self.data_dir.join("data_ms")
    }

    pub fn cnbh_dir(&self) -> PathBuf {
        self.data_dir.join("data_CNBH")
    }

    pub fn worldpop_dir(&self) -> PathBuf {
        self.data_dir.join("data_worldpop")
    }

    pub fn footprint_dir(&self) -> PathBuf {
        self.data_dir.join("bldg")
    }
}
