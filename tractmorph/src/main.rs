use anyhow::Result;
use clap::Parser;

use tractmorph::cli::{Cli, Commands};
use tractmorph::commands::{cn, footprints, tracts, us};

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    match &cli.command {
        Commands::Us(args) => us::run(&cli, args),
        Commands::Cn(args) => cn::run(&cli, args),
        Commands::Tracts(args) => tracts::run(&cli, args),
        Commands::Footprints(args) => footprints::run(&cli, args),
    }
}
