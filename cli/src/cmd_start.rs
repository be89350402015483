//! `connectorhub start`: consume connector events and answer them with a
//! stub processor.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use connectorhub_core::ConnectorError;
use connectorhub_stream::{EventStream, FileFeed, StreamConfig, StreamOptions};
use serde::Serialize;
use tracing::{error, info};

const DEFAULT_CHECKPOINT_FILE: &str = "/tmp/checkpoint.tmp";
const DEFAULT_CHAINCODE_ID: &str = "sandbox";
const DEFAULT_MSP_ID: &str = "Org1MSP";

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Length-delimited BlockAndPrivateData file to replay
    #[arg(long, env = "CH_BLOCK_FILE")]
    pub feed: PathBuf,

    /// Stream config JSON; flags override its fields
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Path to checkpoint file [default: /tmp/checkpoint.tmp]
    #[arg(short, long, env = "CH_CHECKPOINT_FILE")]
    pub checkpoint_file: Option<PathBuf>,

    /// Block to start playing events from [default: 1]
    #[arg(short = 'b', long, env = "CH_START_BLOCK")]
    pub start_block: Option<u64>,

    /// Only handle events from this chaincode [default: sandbox]
    #[arg(long, env = "CH_CHAINCODE_ID")]
    pub chaincode_id: Option<String>,

    /// Only handle requests addressed to this MSP [default: Org1MSP]
    #[arg(long, env = "CH_MSP_ID")]
    pub msp_id: Option<String>,
}

impl StartArgs {
    /// Config file (or built-in defaults) with flag overrides applied.
    pub fn stream_config(&self) -> Result<StreamConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read(path)
                    .with_context(|| format!("reading config '{}'", path.display()))?;
                serde_json::from_slice(&raw)
                    .with_context(|| format!("parsing config '{}'", path.display()))?
            }
            None => StreamConfig::builder()
                .chaincode_id(DEFAULT_CHAINCODE_ID)
                .msp_id(DEFAULT_MSP_ID)
                .checkpoint_file(DEFAULT_CHECKPOINT_FILE)
                .build(),
        };

        if let Some(path) = &self.checkpoint_file {
            config.checkpoint_file = Some(path.clone());
        }
        if let Some(block) = self.start_block {
            config.start_block = block;
        }
        if let Some(id) = &self.chaincode_id {
            config.chaincode_id = id.clone();
        }
        if let Some(id) = &self.msp_id {
            config.msp_id = id.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Serialize)]
struct OkResponse {
    status: &'static str,
}

/// Stand-in for routing a request to a connector: every request gets
/// `{"status":"OK"}`.
pub fn process_request(req: Result<Vec<u8>, ConnectorError>) -> Result<Vec<u8>> {
    let req = req.map_err(|e| anyhow!("request had error: {e}"))?;
    info!(req = %String::from_utf8_lossy(&req), "processing phylum request");

    let resp = serde_json::to_vec(&OkResponse { status: "OK" }).context("marshal response")?;
    info!("returning stub OK response");
    Ok(resp)
}

async fn listen(stream: Arc<EventStream>) -> usize {
    info!("listening for events");
    let mut handled = 0;
    while let Some(event) = stream.recv().await {
        let req = event.request_body();
        if let Err(e) = &req {
            error!(req_id = event.request_id(), error = %e, "event received with error");
        }
        let result = match process_request(req) {
            Ok(resp) => event.callback(&resp, None).await,
            Err(e) => event.callback(b"", Some(&*e)).await,
        };
        match result {
            Ok(()) => info!(req_id = event.request_id(), "callback successful"),
            Err(e) => error!(req_id = event.request_id(), error = %e, "event callback failed"),
        }
        handled += 1;
    }
    info!("event listener shutting down");
    handled
}

pub async fn run(args: StartArgs) -> Result<()> {
    let config = args.stream_config()?;
    info!(
        feed = %args.feed.display(),
        chaincode_id = %config.chaincode_id,
        msp_id = %config.msp_id,
        "starting event stream"
    );

    let feed = Arc::new(FileFeed::new(&args.feed));
    let stream = Arc::new(
        EventStream::start(feed, config, StreamOptions::new())
            .await
            .context("event stream")?,
    );

    let mut listener = tokio::spawn(listen(stream.clone()));
    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nReceived an interrupt, stopping tasks...");
            false
        }
        handled = &mut listener => {
            info!(handled = handled.unwrap_or_default(), "feed drained");
            true
        }
    };

    if let Err(e) = stream.done().await {
        error!(error = %e, "stream done");
    }
    if !finished {
        if let Ok(handled) = listener.await {
            info!(handled, "listener stopped");
        }
    }
    info!("connectorhub exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: StartArgs,
    }

    #[test]
    fn stub_answers_ok() {
        let resp = process_request(Ok(br#"{"request_id":"1"}"#.to_vec())).unwrap();
        assert_eq!(resp, br#"{"status":"OK"}"#);
    }

    #[test]
    fn stub_wraps_request_errors() {
        let err = process_request(Err(ConnectorError::MissingData("missing request key".into())))
            .unwrap_err();
        assert!(err.to_string().starts_with("request had error: "));
    }

    #[test]
    fn defaults_match_sandbox_network() {
        let cli = TestCli::parse_from(["test", "--feed", "blocks.bin"]);
        let config = cli.args.stream_config().unwrap();
        assert_eq!(config.chaincode_id, "sandbox");
        assert_eq!(config.msp_id, "Org1MSP");
        assert_eq!(config.start_block, 1);
        assert_eq!(config.checkpoint_file, Some(PathBuf::from(DEFAULT_CHECKPOINT_FILE)));
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.json");
        std::fs::write(&path, r#"{"chaincode_id":"other","msp_id":"Org2MSP","channel_capacity":8}"#)
            .unwrap();

        let cli = TestCli::parse_from([
            "test",
            "--feed",
            "blocks.bin",
            "--config",
            path.to_str().unwrap(),
            "-b",
            "40",
            "--msp-id",
            "Org3MSP",
        ]);
        let config = cli.args.stream_config().unwrap();
        assert_eq!(config.chaincode_id, "other");
        assert_eq!(config.msp_id, "Org3MSP");
        assert_eq!(config.start_block, 40);
        assert_eq!(config.channel_capacity, 8);
        assert!(config.checkpoint_file.is_none());
    }
}
