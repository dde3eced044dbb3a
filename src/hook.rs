//! Worker callback that runs an external command per work item.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::Context as _;
use tracing::{debug, info, warn};

use crate::engine::WorkerContext;

/// Exit status a hook uses to ask for the item to be retried (`EX_TEMPFAIL`).
pub const EXIT_RETRY: i32 = 75;

/// Runs `command` once per work item, with the item in its environment.
///
/// The command sees `WORKQ_RESULT_ID`, `WORKQ_OWNER_ID` and `WORKQ_WORKER`.
/// Exit 0 completes the item, [`EXIT_RETRY`] requeues it (bounded), any
/// other status is logged and the item dropped. Failing to launch the
/// command at all is returned as an error and aborts the run.
#[derive(Debug, Clone)]
pub struct CommandHook {
    command: PathBuf,
    args: Vec<String>,
}

impl CommandHook {
    /// Relative command paths are resolved against the current directory.
    pub fn new(command: &Path, args: Vec<String>) -> anyhow::Result<Self> {
        let command = if command.is_relative() && command.components().count() > 1 {
            std::env::current_dir()
                .context("cannot resolve current directory")?
                .join(command)
        } else {
            command.to_path_buf()
        };
        Ok(Self { command, args })
    }

    /// Handle one item. Returns without doing anything once the pool is
    /// shutting down.
    pub fn handle(&self, ctx: &WorkerContext) -> anyhow::Result<()> {
        let Some(work) = ctx.get_work() else {
            return Ok(());
        };

        debug!(
            worker = ctx.worker(),
            result_id = work.result_id,
            owner_id = work.owner_id,
            command = %self.command.display(),
            "running hook"
        );

        let started = Instant::now();
        let status = Command::new(&self.command)
            .args(&self.args)
            .env("WORKQ_RESULT_ID", work.result_id.to_string())
            .env("WORKQ_OWNER_ID", work.owner_id.to_string())
            .env("WORKQ_WORKER", ctx.worker().to_string())
            .status()
            .with_context(|| format!("failed to launch {}", self.command.display()))?;
        let duration_ms = started.elapsed().as_millis() as u64;

        match status.code() {
            Some(0) => info!(%work, duration_ms, "hook completed"),
            Some(EXIT_RETRY) => {
                warn!(%work, duration_ms, "hook asked for a retry");
                ctx.retry_work(work)?;
            }
            code => warn!(
                %work,
                duration_ms,
                status = code.unwrap_or(-1),
                "hook failed, dropping item"
            ),
        }
        Ok(())
    }
}
