use anyhow::Result;
use log::info;

use crate::cli::{CnArgs, Cli};
use crate::features::export::FeatureSchema;
use crate::geometric::source::{CnbhHeights, OsmBuildings};
use crate::pipeline::{cn_regions, RegionFeaturePipeline};

pub fn run(cli: &Cli, args: &CnArgs) -> Result<()> {
    let settings = cli.settings()?;
    let city_dir = settings.city_dir(&args.city);
    let regions = cn_regions(&settings, &args.city, &args.iso, args.pop_year)?;

    let footprints = OsmBuildings::new(&settings)?.with_output(city_dir.join("buildings.geojson"));
    let source = CnbhHeights::new(&settings, footprints)?;

    let output = RegionFeaturePipeline::new(source, FeatureSchema::cn(), city_dir)
        .with_visualization(args.visualize)
        .with_csv(args.csv)
        .run(&regions)?;
    info!("region features ready at {}", output.output_path.display());
    Ok(())
}
