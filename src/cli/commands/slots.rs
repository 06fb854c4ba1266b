//! Implementation of the `reasonflow slots` command.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use super::open_repository;
use crate::cli::output::{output, render_list, slot_table, CommandOutput, SlotOutput};
use crate::domain::models::{Config, MachineId, TimeRange};

#[derive(Args, Debug)]
pub struct SlotsArgs {
    /// Machine ID
    #[arg(short, long)]
    pub machine: u32,

    /// Only slots ending after this instant (RFC 3339)
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// Only slots starting before this instant (RFC 3339)
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, serde::Serialize)]
pub struct SlotListOutput {
    pub machine_id: u32,
    pub slots: Vec<SlotOutput>,
    pub total: usize,
}

impl CommandOutput for SlotListOutput {
    fn to_human(&self) -> String {
        render_list("slot", &slot_table(&self.slots), self.total)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: SlotsArgs, config: &Config, json_mode: bool) -> Result<()> {
    if let (Some(from), Some(to)) = (args.from, args.to) {
        if from >= to {
            bail!("--from ({from}) must be before --to ({to})");
        }
    }

    let repo = open_repository(config).await?;
    let machine_id = MachineId(args.machine);
    let slots = match (args.from, args.to) {
        (Some(from), Some(to)) => {
            repo.find_in_range(machine_id, &TimeRange::new(from, to)?)
                .await?
        }
        (from, to) => repo
            .find_all(machine_id)
            .await?
            .into_iter()
            .filter(|s| from.map_or(true, |f| s.range.upper() > f))
            .filter(|s| to.map_or(true, |t| s.range.lower() < t))
            .collect(),
    };

    let slots: Vec<SlotOutput> = slots.iter().map(|s| SlotOutput::new(s, config)).collect();
    let out = SlotListOutput {
        machine_id: args.machine,
        total: slots.len(),
        slots,
    };
    output(&out, json_mode);
    Ok(())
}
