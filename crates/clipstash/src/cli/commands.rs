//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::device::Facing;

/// Record command arguments.
#[derive(Debug, Args)]
pub struct RecordCommand {
    /// How long to record, as `mm:ss` or plain seconds
    #[arg(short, long, default_value = "00:03")]
    pub duration: String,

    /// Camera to record from
    #[arg(long, value_enum)]
    pub facing: Option<FacingArg>,

    /// Title for the saved video
    #[arg(short, long)]
    pub title: Option<String>,

    /// Category for the saved video
    #[arg(long)]
    pub category: Option<String>,

    /// Mark the saved video as private
    #[arg(long)]
    pub private: bool,

    /// Also write the payload into this directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Do not save the clip to the library
    #[arg(long)]
    pub no_save: bool,
}

/// Import command arguments.
#[derive(Debug, Args)]
pub struct ImportCommand {
    /// Video file to import
    pub file: PathBuf,

    /// Title (defaults to the file name)
    #[arg(short, long)]
    pub title: Option<String>,

    /// Category
    #[arg(long)]
    pub category: Option<String>,

    /// Length as `mm:ss`, if known
    #[arg(short, long)]
    pub duration: Option<String>,

    /// Mark the video as private
    #[arg(long)]
    pub private: bool,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Export command arguments.
#[derive(Debug, Args)]
pub struct ExportCommand {
    /// Id of the video to export
    pub id: String,

    /// Destination file
    pub path: PathBuf,
}

/// Stats command arguments.
#[derive(Debug, Args)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Check command arguments.
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Remove interrupted saves and unpaired rows
    #[arg(long)]
    pub repair: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Camera argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FacingArg {
    /// User-facing camera
    Front,
    /// Environment-facing camera
    Back,
}

impl From<FacingArg> for Facing {
    fn from(arg: FacingArg) -> Self {
        match arg {
            FacingArg::Front => Self::Front,
            FacingArg::Back => Self::Back,
        }
    }
}
