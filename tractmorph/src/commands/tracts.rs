use anyhow::Result;
use log::warn;

use crate::cli::{Cli, TractsArgs};
use crate::collect::tiger::TigerTracts;

pub fn run(cli: &Cli, args: &TractsArgs) -> Result<()> {
    let mut settings = cli.settings()?;
    if let Some(processes) = args.processes {
        settings.processes = processes;
    }
    let year = args.year.unwrap_or(settings.census_year);

    let report = TigerTracts::new(&settings, year)?.download(args.state.as_deref())?;
    if !report.is_complete() {
        for (job, error) in &report.failed {
            warn!("not downloaded: {} ({:#})", job.url, error);
        }
    }
    println!(
        "census tracts {}: {} downloaded, {} already present, {} failed",
        year,
        report.downloaded,
        report.skipped,
        report.failed.len()
    );
    Ok(())
}
