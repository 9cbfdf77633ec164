use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "g6_config/g6_config.yaml";

#[derive(Parser, Debug)]
#[command(name = "g6")]
#[command(about = "G6 - Periodic option chain collection and analytics")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Log output format (overrides the configuration file)
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormatArg>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start periodic collection until Ctrl+C
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Override the configured data provider
        #[arg(short, long, value_enum)]
        provider: Option<ProviderArg>,
    },

    /// Run one collection cycle per symbol and print the results as JSON
    Once {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Override the configured data provider
        #[arg(short, long, value_enum)]
        provider: Option<ProviderArg>,

        /// Only collect this symbol
        #[arg(short, long)]
        symbol: Option<String>,

        /// Collect even when the market is closed
        #[arg(long)]
        ignore_session: bool,
    },

    /// Validate configuration without starting collection
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "g6_config.yaml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderArg {
    /// Seeded in-process mock data
    Mock,
    /// Kite-style REST API
    Live,
}

impl ProviderArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderArg::Mock => "mock",
            ProviderArg::Live => "live",
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
    Compact,
}

impl LogFormatArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormatArg::Pretty => "pretty",
            LogFormatArg::Json => "json",
            LogFormatArg::Compact => "compact",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
