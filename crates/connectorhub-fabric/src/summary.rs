//! Human-readable block dump used by `connectorhub inspect`.

use std::io::{self, Write};

use crate::block::Block;

const LIFECYCLE_NAMESPACE: &str = "_lifecycle";
const HASH_DISPLAY_LEN: usize = 6;
const VALUE_DISPLAY_LEN: usize = 100;

fn truncate(input: &str, len: usize) -> String {
    match input.char_indices().nth(len) {
        Some((idx, _)) => format!("{}...", &input[..idx]),
        None => input.to_string(),
    }
}

/// Pretty-printed JSON of a written value, or `"non-JSON"`.
fn pretty_value(value: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(value)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .map(|s| truncate(&s, VALUE_DISPLAY_LEN))
        .unwrap_or_else(|| "non-JSON".to_string())
}

/// Column-aligned text table with a caption.
struct Table {
    caption: String,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn new(caption: impl Into<String>, header: &[&str]) -> Self {
        Self {
            caption: caption.into(),
            header: header.iter().map(|h| h.to_uppercase()).collect(),
            rows: Vec::new(),
        }
    }

    fn row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn render(&self, w: &mut dyn Write) -> io::Result<()> {
        let mut widths: Vec<usize> = self.header.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                // Multi-line cells (pretty JSON) are measured by their widest line.
                let cell_width = cell.lines().map(|l| l.chars().count()).max().unwrap_or(0);
                if let Some(width) = widths.get_mut(i) {
                    *width = (*width).max(cell_width);
                }
            }
        }

        let border: String = widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+");
        writeln!(w, "+{border}+")?;
        self.render_row(w, &self.header, &widths)?;
        writeln!(w, "+{border}+")?;
        for row in &self.rows {
            self.render_row(w, row, &widths)?;
        }
        writeln!(w, "+{border}+")?;
        writeln!(w, "  {}", self.caption)
    }

    fn render_row(&self, w: &mut dyn Write, row: &[String], widths: &[usize]) -> io::Result<()> {
        let height = row.iter().map(|c| c.lines().count()).max().unwrap_or(1).max(1);
        for line in 0..height {
            write!(w, "|")?;
            for (i, width) in widths.iter().enumerate() {
                let cell = row
                    .get(i)
                    .and_then(|c| c.lines().nth(line))
                    .unwrap_or_default();
                write!(w, " {cell:<width$} |")?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}

impl Block {
    /// Write a summary table followed by a table per transaction and its
    /// read/write sets. The `_lifecycle` namespace is skipped.
    pub fn write_summary(&self, w: &mut dyn Write) -> io::Result<()> {
        let mut table = Table::new(
            "Block Summary",
            &["Block Num", "Hash", "Num Txs", "Size (bytes)"],
        );
        table.row(vec![
            self.block_num().to_string(),
            truncate(self.hash(), HASH_DISPLAY_LEN),
            self.transactions().len().to_string(),
            self.size().to_string(),
        ]);
        table.render(w)?;
        writeln!(w)?;

        for i in 0..self.transactions().len() {
            self.write_transaction(i, w)?;
        }
        Ok(())
    }

    fn write_transaction(&self, i: usize, w: &mut dyn Write) -> io::Result<()> {
        let Some(tx) = self.transactions().get(i) else {
            return Ok(());
        };
        let event = tx.event();

        let mut table = Table::new(
            format!("Transactions (block=[{}])", self.block_num()),
            &[
                "ID",
                "Validation",
                "Chaincode ID",
                "Luther Event",
                "Event Size (bytes)",
                "Size (bytes)",
            ],
        );
        table.row(vec![
            truncate(tx.id(), HASH_DISPLAY_LEN),
            self.validation(i).reason(),
            event.map(|e| e.chaincode_id().to_string()).unwrap_or_default(),
            event.map_or_else(|| "<none>".to_string(), ToString::to_string),
            event.map_or(0, |e| e.payload().len()).to_string(),
            tx.size().to_string(),
        ]);
        table.render(w)?;
        writeln!(w)?;

        for ns in tx.details().ns_rw_sets() {
            if ns.namespace == LIFECYCLE_NAMESPACE {
                continue;
            }

            let mut reads = Table::new(
                format!("Read Set (namespace=[{}], txid=[{}])", ns.namespace, tx.id()),
                &["Key", "Version"],
            );
            for record in &ns.rw_set.read_set {
                reads.row(vec![record.key.clone(), record.version.to_string()]);
            }
            reads.render(w)?;
            writeln!(w)?;

            let mut writes = Table::new(
                format!("Write Set [{}]", ns.namespace),
                &["Key", "Val (size)", "Val"],
            );
            for record in &ns.rw_set.write_set {
                writes.row(vec![
                    record.key.clone(),
                    record.value.len().to_string(),
                    pretty_value(&record.value),
                ]);
            }
            writes.render(w)?;
            writeln!(w)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BlockBuilder, TxBuilder};

    #[test]
    fn truncates_with_dots() {
        assert_eq!(truncate("abcdefgh", 6), "abcdef...");
        assert_eq!(truncate("abc", 6), "abc");
    }

    #[test]
    fn pretty_value_json_and_binary() {
        assert_eq!(pretty_value(br#"{"a":1}"#), "{\n  \"a\": 1\n}");
        assert_eq!(pretty_value(&[0xde, 0xad]), "non-JSON");
        let long = format!("\"{}\"", "x".repeat(200));
        assert!(pretty_value(long.as_bytes()).ends_with("..."));
    }

    #[test]
    fn summary_skips_lifecycle() {
        let raw = BlockBuilder::new(42)
            .tx(
                TxBuilder::new("tx-0001")
                    .chaincode("cc")
                    .write("cc", "visible", br#"{"ok":true}"#)
                    .write(LIFECYCLE_NAMESPACE, "hidden", b"x"),
            )
            .build_block();
        let block = Block::new(&raw).unwrap();

        let mut out = Vec::new();
        block.write_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Block Summary"));
        assert!(text.contains("Transactions (block=[42])"));
        assert!(text.contains("tx-000..."));
        assert!(text.contains("Write Set [cc]"));
        assert!(text.contains("visible"));
        assert!(!text.contains("hidden"));
    }
}
