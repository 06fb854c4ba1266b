//! Implementation of the `reasonflow reevaluate` command.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{open_repository, worker_pool};
use crate::cli::output::{output, spinner, CommandOutput};
use crate::domain::models::{Config, MachineId, TimeRange};
use crate::services::{BatchReport, ReasonStores};

#[derive(Args, Debug)]
pub struct ReevaluateArgs {
    /// Machine ID
    #[arg(short, long)]
    pub machine: u32,

    /// Start of the period (RFC 3339)
    #[arg(long)]
    pub from: DateTime<Utc>,

    /// End of the period, exclusive (RFC 3339)
    #[arg(long)]
    pub to: DateTime<Utc>,
}

#[derive(Debug, serde::Serialize)]
#[serde(transparent)]
pub struct ReevaluateOutput {
    pub report: BatchReport,
}

impl CommandOutput for ReevaluateOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        let mut lines = vec![format!(
            "Machine {} {}: {} slot(s) re-evaluated, {} changed, {} failed",
            r.machine_id, r.range, r.processed, r.changed, r.failed
        )];
        if r.cancelled {
            lines.push("Cancelled; slots processed so far were kept.".to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.report).unwrap_or_default()
    }
}

pub async fn execute(args: ReevaluateArgs, config: &Config, json_mode: bool) -> Result<()> {
    let range = TimeRange::new(args.from, args.to).context("Invalid period")?;
    let repo = open_repository(config).await?;
    let pool = worker_pool(config, repo, &ReasonStores::default(), vec![]);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current slot");
            on_interrupt.cancel();
        }
    });

    let progress = spinner(
        format!("Re-evaluating machine {} over {range}", args.machine),
        json_mode,
    );
    let result = pool
        .reevaluate(MachineId(args.machine), range, cancel)
        .await;
    progress.finish_and_clear();
    pool.shutdown().await;

    output(&ReevaluateOutput { report: result? }, json_mode);
    Ok(())
}
