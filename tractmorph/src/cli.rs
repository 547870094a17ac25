use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

use crate::config::Settings;

/// Region building-morphology features from census tracts and building footprints
#[derive(Parser, Debug)]
#[command(name = "tractmorph", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Root of the data layout
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,

    /// JSON settings file
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Settings file (or defaults) with command-line overrides applied.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(dir) = &self.data_dir {
            settings.data_dir = dir.clone();
        }
        Ok(settings)
    }

    /// `warn`, `info` or `debug` from the `-v` count
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// US city: TIGER tracts + ACS + Microsoft or NYC buildings
    Us(UsArgs),

    /// Chinese city: region.geojson + WorldPop + OSM footprints with CNBH heights
    Cn(CnArgs),

    /// Download TIGER census tract archives
    Tracts(TractsArgs),

    /// Download or check OSM footprints of the world city list
    Footprints(FootprintsArgs),
}

#[derive(Args, Debug)]
pub struct UsArgs {
    /// City directory suffix (`data_{city}`); `nyc` uses the NYC footprint export
    #[arg(long, default_value = "nyc")]
    pub city: String,

    /// Census tract vintage
    #[arg(short, long)]
    pub year: Option<u16>,

    /// Write visual.html
    #[arg(long)]
    pub visualize: bool,

    /// Write region_features.csv
    #[arg(long)]
    pub csv: bool,
}

#[derive(Args, Debug)]
pub struct CnArgs {
    #[arg(long, default_value = "bj")]
    pub city: String,

    /// ISO 3166-1 alpha-3 code of the WorldPop raster
    #[arg(long, default_value = "CHN")]
    pub iso: String,

    #[arg(long, default_value_t = 2020)]
    pub pop_year: u16,

    #[arg(long)]
    pub visualize: bool,

    #[arg(long)]
    pub csv: bool,
}

#[derive(Args, Debug)]
pub struct TractsArgs {
    #[arg(short, long)]
    pub year: Option<u16>,

    /// Parallel downloads
    #[arg(short, long)]
    pub processes: Option<usize>,

    /// Two-digit state FIPS code; every state when omitted
    #[arg(long)]
    pub state: Option<String>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
pub enum FootprintMode {
    Download,
    Check,
}

#[derive(Args, Debug)]
pub struct FootprintsArgs {
    #[arg(value_enum, default_value_t = FootprintMode::Download)]
    pub mode: FootprintMode,
}
