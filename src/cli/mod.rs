pub mod config;
pub mod init;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::init::Preset;

#[derive(Parser)]
#[command(name = "fis-loadgen")]
#[command(
    about = "Load generator for the FIS event-ingestion and journal-posting APIs",
    long_about = None,
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a load test from a config file or a built-in preset
    Run {
        /// Path to the configuration file (YAML/JSON)
        #[arg(required_unless_present = "preset", conflicts_with = "preset")]
        config: Option<PathBuf>,

        /// Run a built-in workload instead of a config file
        #[arg(short, long, value_enum)]
        preset: Option<Preset>,

        /// Print the final report as JSON instead of the text summary
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Export the final report to a JSON file
        #[arg(long)]
        export_json: Option<PathBuf>,
    },
    /// Write a preset as an editable config file
    Init {
        #[arg(value_enum)]
        preset: Preset,

        /// Output file path (default: <preset>.yaml)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a config file without sending any requests
    Validate {
        /// Path to the configuration file (YAML/JSON)
        config: PathBuf,
    },
    /// Print the JSON schema of the config file
    Schema {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
