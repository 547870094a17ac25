use anyhow::{Context, Result};
use log::info;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::collect::global_variables::TIGER_BASE_URL;
use crate::collect::http::{DownloadJob, DownloadReport, Downloader};
use crate::config::Settings;

/// Directory listing of the tract archives for one TIGER vintage.
pub fn tract_index_url(year: u16) -> String {
    format!("{}/TIGER{}/TRACT/", TIGER_BASE_URL, year)
}

pub fn tract_file_name(year: u16, state: &str) -> String {
    format!("tl_{}_{}_tract.zip", year, state)
}

pub fn tract_url(year: u16, state: &str) -> String {
    format!("{}{}", tract_index_url(year), tract_file_name(year, state))
}

/// Archive names linked from a TIGER index page, deduplicated and sorted.
pub fn parse_tract_index(html: &str) -> Result<Vec<String>> {
    let re = Regex::new(r"tl_\d{4}_[0-9A-Za-z]+_tract\.zip").context("Invalid tract regex")?;
    let names: BTreeSet<String> = re
        .find_iter(html)
        .map(|m| m.as_str().to_string())
        .collect();
    Ok(names.into_iter().collect())
}

/// Local store of TIGER tract archives under `data_census_tract/census_tract_{year}/`.
pub struct TigerTracts {
    settings: Settings,
    downloader: Downloader,
    year: u16,
}

impl TigerTracts {
    pub fn new(settings: &Settings, year: u16) -> Result<Self> {
        Ok(TigerTracts {
            settings: settings.clone(),
            downloader: Downloader::new(settings)?,
            year,
        })
    }

    pub fn archive_path(&self, state: &str) -> PathBuf {
        self.settings
            .census_tract_dir(self.year)
            .join(tract_file_name(self.year, state))
    }

    /// Path of the state's archive, downloading it first when absent.
    pub fn ensure_state(&self, state: &str) -> Result<PathBuf> {
        let path = self.archive_path(state);
        if !path.exists() {
            info!("downloading census tract data, state id = {}", state);
        }
        self.downloader
            .download_if_missing(&tract_url(self.year, state), &path)
            .with_context(|| format!("Failed to fetch tracts of state {}", state))?;
        Ok(path)
    }

    /// Download one state's archive, or every archive listed on the index page.
    pub fn download(&self, state: Option<&str>) -> Result<DownloadReport> {
        let names = match state {
            Some(state) => vec![tract_file_name(self.year, state)],
            None => {
                let html = self
                    .downloader
                    .get_text(&tract_index_url(self.year))
                    .context("Failed to list TIGER tract archives")?;
                parse_tract_index(&html)?
            }
        };
        info!("{} tract archive(s) for {}", names.len(), self.year);

        let dir = self.settings.census_tract_dir(self.year);
        let jobs: Vec<DownloadJob> = names
            .iter()
            .map(|name| {
                DownloadJob::new(
                    format!("{}{}", tract_index_url(self.year), name),
                    dir.join(name),
                )
            })
            .collect();
        self.downloader.download_all(&jobs, "tract archives")
    }
}
