//! Command line interface definitions
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

#[derive(Debug, Parser)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub(crate) command: Commands,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Commands {
    /// Create the run directory tree and copy the model grids into it
    Prepare(ConfigCli),
    /// Run every configured regrid operation
    Run(ConfigCli),
    /// Summarize variables of netCDF files into a CSV file
    Describe(DescribeCli),
}

#[derive(Debug, Clone, Args)]
pub(crate) struct ConfigCli {
    /// Path to the TOML run configuration.
    pub(crate) config: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub(crate) struct DescribeCli {
    /// Label written into every row of the summary.
    #[clap(long)]
    pub(crate) namespace: String,

    /// Where to write the CSV summary.
    #[clap(long)]
    pub(crate) csv_out: PathBuf,

    /// Variable to summarize. May be given multiple times.
    #[clap(long = "var", required = true)]
    pub(crate) varnames: Vec<String>,

    /// netCDF files to summarize.
    #[clap(required = true)]
    pub(crate) files: Vec<PathBuf>,
}
