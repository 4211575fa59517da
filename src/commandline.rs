//! Command-line interface for the gateway daemon.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

const fn about_text() -> &'static str {
    "Multi-protocol energy meter acquisition and telemetry gateway"
}

#[derive(Parser, Debug)]
#[command(version, about = about_text(), long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Gateway configuration file listing every meter and its node set
    #[arg(long, short = 'c', default_value = "gateway.yaml")]
    pub config_file: String,

    /// MQTT broker configuration file; omit to run without publishing
    #[arg(long)]
    pub mqtt_config_file: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run every enabled meter, polling and publishing until interrupted
    Run,

    /// Parse and validate the configuration file without starting anything
    Validate,
}
