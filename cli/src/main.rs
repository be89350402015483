//! ConnectorHub CLI.
//!
//! # Commands
//! ```text
//! connectorhub start   --feed <blocks.bin> [-c <checkpoint>] [-b <start block>]
//! connectorhub inspect --feed <blocks.bin> [-b <start block>]
//! ```
//!
//! `start` listens for connector events, answers every request with a stub
//! response and sends it back through the event callback. With the default
//! file checkpoint (`/tmp/checkpoint.tmp`), wipe the checkpoint whenever the
//! block source is reset, otherwise the stream waits for blocks that never
//! arrive.

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

mod cmd_inspect;
mod cmd_start;
mod logging;

#[derive(Parser)]
#[command(
    name = "connectorhub",
    about = "Connector hub for Luther phyla on Hyperledger Fabric",
    long_about = "
ConnectorHub: stream connector requests out of committed Fabric blocks and
send responses back to the phylum.

ENVIRONMENT VARIABLES:
  CH_BLOCK_FILE        Length-delimited BlockAndPrivateData feed file
  CH_CHECKPOINT_FILE   Checkpoint file (default /tmp/checkpoint.tmp)
  CH_START_BLOCK       Block to start playing events from
  CH_CHAINCODE_ID      Chaincode filter (default sandbox)
  CH_MSP_ID            MSP filter (default Org1MSP)
",
    version
)]
struct Cli {
    /// Verbose logs
    #[arg(short, long, global = true, env = "CH_VERBOSE", default_value_t = true, action = ArgAction::Set)]
    verbose: bool,

    /// Emit JSON logs
    #[arg(long, global = true)]
    log_json: bool,

    /// Per-crate log level, e.g. `--log connectorhub-fabric=warn` (repeatable)
    #[arg(long = "log", global = true, value_name = "COMPONENT=LEVEL", value_parser = logging::parse_component_level)]
    log_components: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the connector hub
    Start(cmd_start::StartArgs),

    /// Print a summary of every block in a feed file
    Inspect {
        /// Length-delimited BlockAndPrivateData file
        #[arg(long, env = "CH_BLOCK_FILE")]
        feed: std::path::PathBuf,
        /// First block to print
        #[arg(short = 'b', long, default_value_t = 0)]
        start_block: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_config =
        logging::LogConfig::from_flags(cli.verbose, cli.log_json).with_components(cli.log_components);
    logging::init_tracing(&log_config);

    match cli.command {
        Commands::Start(args) => cmd_start::run(args).await,
        Commands::Inspect { feed, start_block } => cmd_inspect::run(&feed, start_block).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_overrides_are_repeatable_and_global() {
        let cli = Cli::parse_from([
            "connectorhub",
            "--log",
            "connectorhub-stream=trace",
            "inspect",
            "--feed",
            "blocks.bin",
            "--log",
            "connectorhub-fabric=warn",
        ]);
        assert_eq!(
            cli.log_components,
            vec![
                ("connectorhub-stream".to_string(), "trace".to_string()),
                ("connectorhub-fabric".to_string(), "warn".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_log_override_is_rejected() {
        let res = Cli::try_parse_from(["connectorhub", "--log", "verbose", "inspect", "--feed", "b"]);
        assert!(res.is_err());
    }
}
