//! `connectorhub inspect`: dump the blocks of a feed file as tables.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use connectorhub_fabric::Block;
use connectorhub_stream::{BlockFeed, FileFeed};
use futures::StreamExt;

pub async fn run(path: &Path, start_block: u64) -> Result<()> {
    let feed = FileFeed::new(path);
    let mut blocks = feed
        .subscribe(start_block)
        .await
        .with_context(|| format!("opening feed '{}'", path.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut count = 0usize;
    while let Some(blk) = blocks.next().await {
        let Some(raw) = blk.block.as_ref() else {
            eprintln!("✗ record without a block, skipping");
            continue;
        };
        match Block::new(raw) {
            Ok(block) => {
                block.write_summary(&mut out)?;
                writeln!(out)?;
                count += 1;
            }
            Err(e) => eprintln!("✗ block {}: {e}", raw.header.as_ref().map_or(0, |h| h.number)),
        }
    }
    feed.close().await?;

    println!("✓ {count} block(s)");
    Ok(())
}
