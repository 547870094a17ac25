//! Region feature pipeline: regions + one building source → `region2info_building.json`.

use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::collect::acs::{read_employment, read_population};
use crate::collect::global_variables::{
    ACS_EMPLOYMENT_FILE, ACS_POPULATION_FILE, FEATURE_CSV_FILE_NAME, OUTPUT_FILE_NAME,
    VISUAL_FILE_NAME,
};
use crate::collect::http::Downloader;
use crate::collect::tiger::TigerTracts;
use crate::commons::basic_functions::ensure_dir_exists;
use crate::commons::visualization::write_map;
use crate::config::Settings;
use crate::features::aggregate::{Aggregation, RegionFeatureAggregator};
use crate::features::export::{FeatureExporter, FeatureSchema, RegionRecord};
use crate::geometric::population::WorldPop;
use crate::geometric::region::{read_geoid_list, RegionCollection};
use crate::geometric::source::BuildingSource;

/// What one run produced.
#[derive(Debug)]
pub struct PipelineOutput {
    pub aggregation: Aggregation,
    pub records: BTreeMap<String, RegionRecord>,
    pub output_path: PathBuf,
}

/// Fetch buildings, aggregate them per region, normalize and write the records.
pub struct RegionFeaturePipeline<S> {
    source: S,
    aggregator: RegionFeatureAggregator,
    exporter: FeatureExporter,
    output_dir: PathBuf,
    visualize: bool,
    write_csv: bool,
}

impl<S: BuildingSource> RegionFeaturePipeline<S> {
    pub fn new(source: S, schema: FeatureSchema, output_dir: impl Into<PathBuf>) -> Self {
        RegionFeaturePipeline {
            source,
            aggregator: RegionFeatureAggregator::default(),
            exporter: FeatureExporter::new(schema),
            output_dir: output_dir.into(),
            visualize: false,
            write_csv: false,
        }
    }

    pub fn with_aggregator(mut self, aggregator: RegionFeatureAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Also write `visual.html` with the regions and the joined buildings.
    pub fn with_visualization(mut self, visualize: bool) -> Self {
        self.visualize = visualize;
        self
    }

    /// Also write the raw feature table as `region_features.csv`.
    pub fn with_csv(mut self, write_csv: bool) -> Self {
        self.write_csv = write_csv;
        self
    }

    pub fn run(&mut self, regions: &RegionCollection) -> Result<PipelineOutput> {
        ensure_dir_exists(&self.output_dir)?;
        info!("{} regions to aggregate", regions.len());

        let buildings = self
            .source
            .fetch(regions)
            .with_context(|| format!("Building source `{}` failed", self.source.name()))?;
        info!("{}: {} buildings fetched", self.source.name(), buildings.len());

        let aggregation = self.aggregator.aggregate(regions, &buildings)?;

        if self.visualize {
            let joined: Vec<_> = aggregation
                .joined_buildings()
                .into_iter()
                .map(|i| &buildings.buildings()[i])
                .collect();
            write_map(&self.output_dir.join(VISUAL_FILE_NAME), regions, &joined)?;
        }

        #[cfg(feature = "polars")]
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("{}", aggregation.table.to_polars_df()?);
        }

        if self.write_csv {
            aggregation
                .table
                .write_csv(&self.output_dir.join(FEATURE_CSV_FILE_NAME))?;
        }

        let output_path = self.output_dir.join(OUTPUT_FILE_NAME);
        let records = self.exporter.export(&aggregation.table, &output_path)?;
        Ok(PipelineOutput {
            aggregation,
            records,
            output_path,
        })
    }
}

/// US tracts listed in `data_{city}/regs.json`, with ACS demographics when the exports are present.
pub fn us_regions(settings: &Settings, city: &str, year: u16) -> Result<RegionCollection> {
    let geoids = read_geoid_list(&settings.city_dir(city).join("regs.json"))?;
    let tracts = TigerTracts::new(settings, year)?;
    let mut regions = RegionCollection::from_tiger_tracts(&tracts, &geoids)?;
    merge_acs(&mut regions, &settings.census_gov_dir())?;
    Ok(regions)
}

fn merge_acs(regions: &mut RegionCollection, dir: &Path) -> Result<()> {
    let population = dir.join(ACS_POPULATION_FILE);
    if population.exists() {
        regions.merge_population(&read_population(&population)?);
    } else {
        warn!("{} not found, population features are 0", population.display());
    }
    let employment = dir.join(ACS_EMPLOYMENT_FILE);
    if employment.exists() {
        regions.merge_employment(&read_employment(&employment)?);
    } else {
        warn!("{} not found, employment features are 0", employment.display());
    }
    Ok(())
}

/// Regions from `data_{city}/region.geojson` with WorldPop population.
pub fn cn_regions(settings: &Settings, city: &str, iso: &str, pop_year: u16) -> Result<RegionCollection> {
    let path = settings.city_dir(city).join("region.geojson");
    let bytes = std::fs::read(&path).with_context(|| {
        format!("Failed to read {} (region boundaries must be provided)", path.display())
    })?;
    let mut regions = RegionCollection::from_geojson(&bytes)?;

    let worldpop = WorldPop::new(settings, iso, pop_year);
    worldpop.ensure(&Downloader::new(settings)?)?;
    worldpop.assign(&mut regions)?;
    Ok(regions)
}
