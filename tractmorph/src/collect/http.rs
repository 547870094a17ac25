use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;
use reqwest::blocking::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::commons::basic_functions::{ensure_dir_exists, progress_style};
use crate::config::Settings;
use crate::error::TractError;

/// One remote file and where it lives on disk.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub path: PathBuf,
}

impl DownloadJob {
    pub fn new(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        DownloadJob {
            url: url.into(),
            path: path.into(),
        }
    }
}

/// Outcome of a batch download; failed units are kept, not raised.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: Vec<(DownloadJob, anyhow::Error)>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Blocking HTTP client with the run-wide timeout and user agent.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    processes: usize,
}

impl Downloader {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Downloader {
            client,
            processes: settings.processes.max(1),
        })
    }

    fn check_status(url: &str, response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
        let status = response.status();
        if !status.is_success() {
            return Err(TractError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        Ok(response)
    }

    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {}", url))?;
        let response = Self::check_status(url, response)?;
        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read body of {}", url))?;
        Ok(bytes.to_vec())
    }

    pub fn get_text(&self, url: &str) -> Result<String> {
        let bytes = self.get_bytes(url)?;
        String::from_utf8(bytes).with_context(|| format!("Response of {} is not valid UTF-8", url))
    }

    pub fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Vec<u8>> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .with_context(|| format!("POST {}", url))?;
        let response = Self::check_status(url, response)?;
        Ok(response
            .bytes()
            .with_context(|| format!("Failed to read body of {}", url))?
            .to_vec())
    }

    /// Stream `url` into `path` through a temp file in the same directory.
    pub fn download_file(&self, url: &str, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        ensure_dir_exists(parent)?;

        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {}", url))?;
        let mut response = Self::check_status(url, response)?;

        let mut tmp = NamedTempFile::new_in(parent).context("Failed to create temp file")?;
        std::io::copy(&mut response, &mut tmp)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tmp.persist(path)
            .with_context(|| format!("Failed to rename into {}", path.display()))?;
        Ok(())
    }

    /// Download unless the file is already on disk. Returns true when a download happened.
    pub fn download_if_missing(&self, url: &str, path: &Path) -> Result<bool> {
        if path.exists() {
            debug!("file exists: {}", path.display());
            return Ok(false);
        }
        info!("downloading {}", url);
        self.download_file(url, path)?;
        Ok(true)
    }

    /// Run independent downloads on a pool of `processes` threads.
    /// Existing files are skipped; failures are logged and collected, the batch continues.
    pub fn download_all(&self, jobs: &[DownloadJob], label: &str) -> Result<DownloadReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.processes)
            .build()
            .context("Failed to build download thread pool")?;

        let pb = ProgressBar::new(jobs.len() as u64);
        pb.set_style(progress_style());
        pb.set_message(label.to_string());

        let results: Vec<(usize, Result<bool>)> = pool.install(|| {
            jobs.par_iter()
                .enumerate()
                .map(|(idx, job)| {
                    let res = self.download_if_missing(&job.url, &job.path);
                    pb.inc(1);
                    (idx, res)
                })
                .collect()
        });
        pb.finish_with_message(format!("{} done", label));

        let mut report = DownloadReport::default();
        for (idx, res) in results {
            match res {
                Ok(true) => report.downloaded += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!("download failed for {}: {:#}", jobs[idx].url, e);
                    report.failed.push((jobs[idx].clone(), e));
                }
            }
        }
        info!(
            "{}: {} downloaded, {} cached, {} failed",
            label,
            report.downloaded,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tl_2015_36_tract.zip");
        std::fs::write(&path, b"cached").unwrap();

        let downloader = Downloader::new(&Settings::default()).unwrap();
        // Unroutable URL: must never be requested because the file exists
        let jobs = vec![DownloadJob::new("http://127.0.0.1:9/never", &path)];
        let report = downloader.download_all(&jobs, "test").unwrap();
        assert_eq!(report.skipped, 1);
        assert!(report.is_complete());
        assert_eq!(std::fs::read(&path).unwrap(), b"cached");
    }

    #[test]
    fn test_failures_do_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("cached.tif");
        std::fs::write(&cached, b"x").unwrap();

        let mut settings = Settings::default();
        settings.http_timeout_secs = 2;
        let downloader = Downloader::new(&settings).unwrap();
        let jobs = vec![
            DownloadJob::new("http://127.0.0.1:9/missing.tif", dir.path().join("missing.tif")),
            DownloadJob::new("http://127.0.0.1:9/cached.tif", &cached),
        ];
        let report = downloader.download_all(&jobs, "test").unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.skipped, 1);
        assert!(!dir.path().join("missing.tif").exists());
    }
}
