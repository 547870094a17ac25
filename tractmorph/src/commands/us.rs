use anyhow::Result;
use log::info;

use crate::cli::{Cli, UsArgs};
use crate::features::export::FeatureSchema;
use crate::geometric::source::{BuildingSource, MicrosoftBuildings, NycBuildings};
use crate::pipeline::{us_regions, RegionFeaturePipeline};

pub fn run(cli: &Cli, args: &UsArgs) -> Result<()> {
    let settings = cli.settings()?;
    let year = args.year.unwrap_or(settings.census_year);
    let regions = us_regions(&settings, &args.city, year)?;

    let source: Box<dyn BuildingSource> = if args.city == "nyc" {
        Box::new(NycBuildings::new(&settings)?)
    } else {
        Box::new(MicrosoftBuildings::new(&settings)?)
    };

    let output = RegionFeaturePipeline::new(source, FeatureSchema::us(), settings.city_dir(&args.city))
        .with_visualization(args.visualize)
        .with_csv(args.csv)
        .run(&regions)?;
    info!("region features ready at {}", output.output_path.display());
    Ok(())
}
