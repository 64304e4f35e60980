// artstage/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::path::PathBuf;

use artstage_common::config::Config;
use artstage_common::error::Result;
use artstage_common::pipeline::PipelineStage;
use clap::{ArgAction, Parser, Subcommand};

pub mod clean;
pub mod locate;
pub mod overrides;
pub mod run;
pub mod status;
pub mod ui;

use crate::cli::clean::CleanArgs;
use crate::cli::locate::LocateArgs;
pub use crate::cli::overrides::Overrides;
use crate::cli::run::RunArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "artstage", bin_name = "artstage")]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Read settings from this TOML file instead of searching for artstage.toml
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download, extract and stage every platform archive
    #[command(visible_alias = "install")]
    Run(RunArgs),
    /// Download the platform archives into the staging root only
    Download(RunArgs),
    /// Download and extract, without copying into the destinations
    Unzip(RunArgs),
    /// Print the planned download URL and archive path per platform
    Locate(LocateArgs),
    /// Remove the staging root
    Clean(CleanArgs),
}

impl Command {
    pub fn overrides(&self) -> &Overrides {
        match self {
            Self::Run(args) | Self::Download(args) | Self::Unzip(args) => &args.overrides,
            Self::Locate(args) => &args.overrides,
            Self::Clean(args) => &args.overrides,
        }
    }

    pub async fn run(&self, config: Config) -> Result<()> {
        match self {
            Self::Run(command) => command.run(config, PipelineStage::Staging).await,
            Self::Download(command) => command.run(config, PipelineStage::Downloading).await,
            Self::Unzip(command) => command.run(config, PipelineStage::Extracting).await,
            Self::Locate(command) => command.run(&config),
            Self::Clean(command) => command.run(&config),
        }
    }
}
