//! `BlockFeed` trait, the abstraction over the upstream source of committed
//! blocks with private data.
//!
//! A feed yields [`BlockAndPrivateData`] items in ledger order; the end of
//! the stream means the feed has no more blocks. The gateway connection
//! used in production lives outside this crate and only has to implement
//! [`BlockFeed`].

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use connectorhub_fabric::unmarshal::unmarshal_block_and_private_data;
use connectorhub_fabric::BlockAndPrivateData;
use futures::Stream;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::StreamError;

/// A stream of blocks from a single feed subscription.
pub type BlockStream = Pin<Box<dyn Stream<Item = BlockAndPrivateData> + Send>>;

/// Source of committed blocks.
#[async_trait]
pub trait BlockFeed: Send + Sync {
    /// Start streaming blocks numbered `start_block` and above.
    async fn subscribe(&self, start_block: u64) -> Result<BlockStream, StreamError>;

    /// Release the feed. Called exactly once by the owning stream.
    async fn close(&self) -> Result<(), StreamError>;
}

/// Number of the block carried by `blk`, 0 when it has no header.
pub fn block_number(blk: &BlockAndPrivateData) -> u64 {
    blk.block
        .as_ref()
        .and_then(|b| b.header.as_ref())
        .map_or(0, |h| h.number)
}

// ─── ChannelFeed ──────────────────────────────────────────────────────────────

/// In-process feed backed by an mpsc channel.
///
/// Dropping the returned sender ends the stream.
#[derive(Debug)]
pub struct ChannelFeed {
    rx: Mutex<Option<mpsc::Receiver<BlockAndPrivateData>>>,
    closes: AtomicUsize,
}

impl ChannelFeed {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<BlockAndPrivateData>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let feed = Self {
            rx: Mutex::new(Some(rx)),
            closes: AtomicUsize::new(0),
        };
        (feed, tx)
    }

    /// Number of times [`BlockFeed::close`] was called.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockFeed for ChannelFeed {
    async fn subscribe(&self, start_block: u64) -> Result<BlockStream, StreamError> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| StreamError::Subscribe("channel feed already subscribed".into()))?;

        let stream = futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                let blk = rx.recv().await?;
                if block_number(&blk) >= start_block {
                    return Some((blk, rx));
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ─── FileFeed ─────────────────────────────────────────────────────────────────

/// Feed replaying varint length-delimited `BlockAndPrivateData` records
/// from a file.
#[derive(Debug, Clone)]
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `blocks` to `path` in the format this feed reads.
    pub async fn write_blocks(
        path: impl AsRef<Path>,
        blocks: &[BlockAndPrivateData],
    ) -> Result<(), StreamError> {
        let mut buf = Vec::new();
        for blk in blocks {
            buf.extend(blk.encode_length_delimited_to_vec());
        }
        tokio::fs::write(path.as_ref(), buf)
            .await
            .map_err(|e| StreamError::Feed(format!("write [{}]: {e}", path.as_ref().display())))
    }
}

/// Largest accepted record, Fabric's default maximum message size.
pub const MAX_RECORD_SIZE: usize = 100 * 1024 * 1024;

/// Read a varint; `None` on a clean EOF before the first byte.
async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<u64>> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && shift == 0 => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some(result));
        }
        shift += 7;
        if shift >= 64 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "varint too long",
            ));
        }
    }
}

async fn read_record<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<BlockAndPrivateData>, StreamError> {
    let Some(len) = read_varint(reader)
        .await
        .map_err(|e| StreamError::Feed(format!("read length: {e}")))?
    else {
        return Ok(None);
    };
    let len = usize::try_from(len)
        .ok()
        .filter(|&n| n <= MAX_RECORD_SIZE)
        .ok_or_else(|| StreamError::Feed(format!("record length {len} exceeds {MAX_RECORD_SIZE}")))?;

    // Allocation is bounded by the bytes actually present.
    let mut buf = Vec::new();
    reader
        .take(len as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| StreamError::Feed(format!("read record: {e}")))?;
    if buf.len() != len {
        return Err(StreamError::Feed(format!(
            "truncated record: want {len} bytes, got {}",
            buf.len()
        )));
    }
    unmarshal_block_and_private_data(&buf)
        .map(Some)
        .map_err(|e| StreamError::Feed(e.to_string()))
}

#[async_trait]
impl BlockFeed for FileFeed {
    async fn subscribe(&self, start_block: u64) -> Result<BlockStream, StreamError> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            StreamError::Subscribe(format!("open [{}]: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), start_block, "replaying block file");

        let stream = futures::stream::unfold(BufReader::new(file), move |mut reader| async move {
            loop {
                match read_record(&mut reader).await {
                    Ok(Some(blk)) if block_number(&blk) < start_block => continue,
                    Ok(Some(blk)) => return Some((blk, reader)),
                    Ok(None) => return None,
                    Err(e) => {
                        error!(error = %e, "corrupt block file, ending feed");
                        return None;
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<(), StreamError> {
        debug!(path = %self.path.display(), "block file feed closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectorhub_fabric::builder::{BlockBuilder, TxBuilder};
    use futures::StreamExt;

    fn blk(n: u64) -> BlockAndPrivateData {
        BlockBuilder::new(n).tx(TxBuilder::new(format!("tx-{n}"))).build()
    }

    #[tokio::test]
    async fn channel_feed_skips_below_start() {
        let (feed, tx) = ChannelFeed::new(8);
        for n in 1..=4 {
            tx.send(blk(n)).await.unwrap();
        }
        drop(tx);

        let stream = feed.subscribe(3).await.unwrap();
        let numbers: Vec<u64> = stream.map(|b| block_number(&b)).collect().await;
        assert_eq!(numbers, vec![3, 4]);
    }

    #[tokio::test]
    async fn channel_feed_subscribes_once() {
        let (feed, _tx) = ChannelFeed::new(1);
        assert!(feed.subscribe(0).await.is_ok());
        assert!(matches!(feed.subscribe(0).await, Err(StreamError::Subscribe(_))));
    }

    #[tokio::test]
    async fn file_feed_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.bin");
        FileFeed::write_blocks(&path, &[blk(1), blk(2), blk(3)]).await.unwrap();

        let feed = FileFeed::new(&path);
        let numbers: Vec<u64> = feed
            .subscribe(2)
            .await
            .unwrap()
            .map(|b| block_number(&b))
            .collect()
            .await;
        assert_eq!(numbers, vec![2, 3]);
    }

    #[tokio::test]
    async fn file_feed_stops_at_truncated_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.bin");
        let mut bytes = blk(1).encode_length_delimited_to_vec();
        let second = blk(2).encode_length_delimited_to_vec();
        bytes.extend_from_slice(&second[..second.len() / 2]);
        std::fs::write(&path, bytes).unwrap();

        let count = FileFeed::new(&path).subscribe(0).await.unwrap().count().await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn file_feed_rejects_oversized_length_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.bin");
        let mut bytes = Vec::new();
        prost::encoding::encode_varint(1 << 62, &mut bytes);
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe]);
        std::fs::write(&path, bytes).unwrap();

        let count = FileFeed::new(&path).subscribe(0).await.unwrap().count().await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn length_prefix_past_end_of_file_is_truncation() {
        let mut bytes = Vec::new();
        prost::encoding::encode_varint(64, &mut bytes);
        bytes.extend_from_slice(&[1, 2, 3]);

        let err = read_record(&mut bytes.as_slice()).await.unwrap_err();
        assert!(err.to_string().contains("truncated record"));
    }

    #[tokio::test]
    async fn file_feed_missing_file_fails_subscribe() {
        let feed = FileFeed::new("/nonexistent/blocks.bin");
        assert!(matches!(feed.subscribe(0).await, Err(StreamError::Subscribe(_))));
    }
}
