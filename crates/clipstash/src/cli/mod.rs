//! Command-line interface for clipstash.
//!
//! This module provides the CLI structure for the `clipstash` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CheckCommand, ConfigCommand, ExportCommand, FacingArg, ImportCommand, ListCommand,
    RecordCommand, StatsCommand,
};

use crate::logging::Verbosity;

/// clipstash - Record short clips and keep them in a local library
///
/// Captures video from a camera (or the built-in test pattern), stores the
/// clips with their metadata in a local database, and exports them again.
#[derive(Debug, Parser)]
#[command(name = "clipstash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record a clip from the test-pattern camera
    Record(RecordCommand),

    /// Import a video file into the library
    Import(ImportCommand),

    /// List saved videos
    List(ListCommand),

    /// Write a saved video's payload to a file
    Export(ExportCommand),

    /// Delete a saved video
    Delete {
        /// Id of the video to delete
        id: String,
    },

    /// Delete every saved video
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show library statistics
    Stats(StatsCommand),

    /// Check that metadata and payloads are consistent
    Check(CheckCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "clipstash");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_flags() {
        let cli = Cli::try_parse_from(["clipstash", "-q", "list"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Quiet);

        let cli = Cli::try_parse_from(["clipstash", "-vv", "list"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Trace);

        let cli = Cli::try_parse_from(["clipstash", "list"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Normal);
    }

    #[test]
    fn test_parse_record() {
        let cli = Cli::try_parse_from([
            "clipstash",
            "record",
            "--duration",
            "00:05",
            "--facing",
            "back",
            "--private",
        ])
        .unwrap();
        match cli.command {
            Command::Record(cmd) => {
                assert_eq!(cmd.duration, "00:05");
                assert_eq!(cmd.facing, Some(FacingArg::Back));
                assert!(cmd.private);
                assert!(!cmd.no_save);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_record_defaults() {
        let cli = Cli::try_parse_from(["clipstash", "record"]).unwrap();
        match cli.command {
            Command::Record(cmd) => {
                assert_eq!(cmd.duration, "00:03");
                assert!(cmd.facing.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_import() {
        let cli = Cli::try_parse_from(["clipstash", "import", "clip.webm", "-t", "Holiday"]).unwrap();
        match cli.command {
            Command::Import(cmd) => {
                assert_eq!(cmd.file, PathBuf::from("clip.webm"));
                assert_eq!(cmd.title.as_deref(), Some("Holiday"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_export() {
        let cli =
            Cli::try_parse_from(["clipstash", "export", "video_1_abcdefghi", "out.webm"]).unwrap();
        assert!(matches!(cli.command, Command::Export(_)));
    }

    #[test]
    fn test_parse_clear_requires_nothing() {
        let cli = Cli::try_parse_from(["clipstash", "clear"]).unwrap();
        assert!(matches!(cli.command, Command::Clear { yes: false }));
    }

    #[test]
    fn test_parse_check_repair() {
        let cli = Cli::try_parse_from(["clipstash", "check", "--repair"]).unwrap();
        assert!(matches!(cli.command, Command::Check(CheckCommand { repair: true })));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = Cli::try_parse_from(["clipstash", "-c", "/custom/config.toml", "stats"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_parse_config_validate() {
        let cli = Cli::try_parse_from(["clipstash", "config", "validate", "-f", "x.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }
}
