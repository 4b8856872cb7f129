use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediasqueeze")]
#[command(author, version, about = "Compress audio and video files to a chosen quality profile")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compress files (or zip bundles of files) with one profile
    Compress {
        /// Files to compress
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Profile id, e.g. audio-128k or video-720p (see `profiles`)
        #[arg(short, long)]
        profile: String,

        /// Directory receiving the compressed results
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Session name the jobs are submitted under
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// List the available output profiles
    Profiles {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
