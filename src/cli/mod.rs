//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "misp-glue",
    version,
    author = "neur0map",
    about = "Enrich MISP events from the ZMQ feed with misp-modules",
    long_about = "misp-glue subscribes to a MISP instance's ZMQ feed, runs every attribute of each \
                  published event through the matching misp-modules expansion modules, and writes \
                  the returned observables back to the event."
)]
pub struct Cli {
    /// Config file path (defaults to ~/.config/misp-glue/config.toml)
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
    /// Subscribe to the feed and enrich events until interrupted
    Run,

    /// List expansion modules offered by the module service
    Modules {
        /// Only show modules that would run for this attribute type
        #[arg(short = 't', long, value_name = "TYPE")]
        attribute_type: Option<String>,
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
        /// Path to config file (defaults to --config or the standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Write a default configuration file
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
    fn test_parse_modules_filter() {
        let cli = Cli::try_parse_from(["misp-glue", "-c", "glue.toml", "modules", "-t", "ip-dst"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("glue.toml")));
        match cli.command {
            Commands::Modules { attribute_type } => {
                assert_eq!(attribute_type.as_deref(), Some("ip-dst"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
