// artstage/src/cli/clean.rs
use artstage_common::config::Config;
use artstage_common::error::Result;
use artstage_core::clean_staging;
use clap::Args;
use colored::Colorize;

use super::overrides::Overrides;

#[derive(Debug, Args)]
pub struct CleanArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

impl CleanArgs {
    pub fn run(&self, config: &Config) -> Result<()> {
        let root = config.staging_root();
        if clean_staging(config)? {
            println!("{} Removed {}", "==>".bold().blue(), root.display());
        } else {
            println!("Nothing to clean at {}", root.display());
        }
        Ok(())
    }
}
