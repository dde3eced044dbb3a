//! Newline-delimited JSON work feed.
//!
//! Each line is one [`Work`] record, e.g. `{"result_id": 23, "owner_id": 9}`.
//! Ordinary polls only read lines appended since the previous poll. A final
//! poll rescans the whole file, so the pool's confirmation round checks
//! against everything the file holds.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tracing::debug;

use crate::engine::Producer;
use crate::model::Work;

/// A [`Producer`] that tails a JSONL file.
#[derive(Debug, Clone)]
pub struct JsonlFeed {
    path: PathBuf,
    /// Byte offset just past the last complete line consumed.
    offset: usize,
}

impl JsonlFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every complete line currently in the file and move the tail
    /// offset past them. Used to seed the pool's initial work.
    pub async fn initial(&mut self) -> anyhow::Result<Vec<Work>> {
        self.offset = 0;
        self.read_new().await
    }

    async fn read_new(&mut self) -> anyhow::Result<Vec<Work>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("cannot read feed {}", self.path.display()))?;

        if bytes.len() < self.offset {
            debug!(path = %self.path.display(), "feed shrank, rereading from the start");
            self.offset = 0;
        }

        let (items, consumed) = parse_complete_lines(&bytes[self.offset..], self.offset)
            .with_context(|| format!("bad record in feed {}", self.path.display()))?;
        self.offset += consumed;
        Ok(items)
    }
}

#[async_trait]
impl Producer for JsonlFeed {
    async fn produce(&mut self, final_call: bool) -> anyhow::Result<Vec<Work>> {
        if final_call {
            self.offset = 0;
        }
        let items = self.read_new().await?;
        debug!(count = items.len(), final_call, offset = self.offset, "feed polled");
        Ok(items)
    }
}

/// Parse the complete (newline-terminated) lines of `chunk`.
///
/// Returns the records and the number of bytes consumed; a trailing partial
/// line is left for the next read. `base` is only used in error messages.
fn parse_complete_lines(chunk: &[u8], base: usize) -> anyhow::Result<(Vec<Work>, usize)> {
    let consumed = match chunk.iter().rposition(|&b| b == b'\n') {
        Some(last_newline) => last_newline + 1,
        None => return Ok((Vec::new(), 0)),
    };

    let text = std::str::from_utf8(&chunk[..consumed])
        .with_context(|| format!("feed is not UTF-8 after byte {base}"))?;

    let mut items = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let work: Work = serde_json::from_str(line)
            .with_context(|| format!("line {} after byte {base}: {line}", index + 1))?;
        items.push(work);
    }
    Ok((items, consumed))
}

/// The items a fresh queue would deliver from `items`, in delivery order:
/// first occurrence of each result id, newest per owner.
pub fn live_items(items: &[Work]) -> Vec<Work> {
    let mut seen = HashSet::new();
    let mut newest = HashMap::new();
    let accepted: Vec<Work> = items
        .iter()
        .copied()
        .filter(|work| seen.insert(work.result_id))
        .inspect(|work| {
            newest.insert(work.owner_id, work.result_id);
        })
        .collect();

    accepted
        .into_iter()
        .filter(|work| newest.get(&work.owner_id) == Some(&work.result_id))
        .collect()
}
