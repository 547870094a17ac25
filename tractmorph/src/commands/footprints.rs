use anyhow::Result;

use crate::cli::{Cli, FootprintMode, FootprintsArgs};
use crate::geometric::city_footprint::CityFootprints;

pub fn run(cli: &Cli, args: &FootprintsArgs) -> Result<()> {
    let settings = cli.settings()?;
    let footprints = CityFootprints::new(&settings)?;
    match args.mode {
        FootprintMode::Download => {
            let summary = footprints.download()?;
            println!(
                "{} written, {} already present, {} failed (see {})",
                summary.written,
                summary.skipped,
                summary.failed,
                settings.footprint_dir().join("error.log").display()
            );
        }
        FootprintMode::Check => {
            for progress in footprints.check() {
                println!("{}", progress);
            }
        }
    }
    Ok(())
}
