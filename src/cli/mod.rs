//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cannect-ingest",
    version,
    about = "Cannabis-industry firehose ingestion and classification pipeline",
    long_about = "Consumes firehose post commits, classifies them with keyword heuristics and an \
                  optional AI verifier, and stores relevant posts for feed serving and model training."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/cannect-ingest/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest Jetstream JSONL commits until end of input or a shutdown signal
    Run {
        /// Input file ("-" reads stdin)
        #[arg(short, long, default_value = "-")]
        input: String,
    },

    /// Dry-run the heuristic classifier on a piece of text
    Classify {
        /// Post text
        text: String,

        /// Source handle to classify as
        #[arg(long, default_value = "")]
        handle: String,
    },

    /// Print the feed skeleton, newest first
    Feed {
        /// Maximum number of posts
        #[arg(short, long, default_value = "30")]
        limit: usize,

        /// Cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Show content store statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export stored posts as JSONL for model training
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Only posts indexed at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["cannect-ingest", "run"]).unwrap();
        match cli.command {
            Commands::Run { input } => assert_eq!(input, "-"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_classify_with_handle() {
        let cli = Cli::try_parse_from([
            "cannect-ingest",
            "classify",
            "--handle",
            "grower.cannect.space",
            "hello",
        ])
        .unwrap();
        match cli.command {
            Commands::Classify { text, handle } => {
                assert_eq!(text, "hello");
                assert_eq!(handle, "grower.cannect.space");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
