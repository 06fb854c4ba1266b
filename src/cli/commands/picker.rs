//! Implementation of the `reasonflow picker` command.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use comfy_table::Cell;

use super::{open_repository, worker_pool};
use crate::cli::output::{list_table, output, reason_name, render_list, CommandOutput};
use crate::domain::models::{
    Config, ExtraReasonSelection, MachineId, MachineModeId, MachineObservationStateId,
};
use crate::services::ReasonStores;

#[derive(Args, Debug)]
pub struct PickerArgs {
    /// Machine ID
    #[arg(short, long)]
    pub machine: u32,

    /// Instant (RFC 3339)
    #[arg(long)]
    pub at: DateTime<Utc>,

    /// Machine mode ID
    #[arg(long)]
    pub mode: u32,

    /// Machine observation state ID
    #[arg(long)]
    pub state: u32,
}

#[derive(Debug, serde::Serialize)]
pub struct SelectionOutput {
    #[serde(flatten)]
    pub selection: ExtraReasonSelection,
    pub reason_name: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct PickerOutput {
    pub machine_id: u32,
    pub at: String,
    pub selections: Vec<SelectionOutput>,
}

impl CommandOutput for PickerOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["reason", "name", "score", "selectable", "details"]);
        for entry in &self.selections {
            let s = &entry.selection;
            table.add_row(vec![
                Cell::new(s.reason),
                Cell::new(entry.reason_name.as_deref().unwrap_or("")),
                Cell::new(format!("{:.1}", s.reason_score)),
                Cell::new(if s.selectable { "yes" } else { "no" }),
                Cell::new(if s.details_required { "required" } else { "" }),
            ]);
        }
        render_list("selection", &table, self.selections.len())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: PickerArgs, config: &Config, json_mode: bool) -> Result<()> {
    let repo = open_repository(config).await?;
    let pool = worker_pool(config, repo, &ReasonStores::default(), vec![]);

    let result = pool
        .selections_at(
            MachineId(args.machine),
            args.at,
            MachineModeId(args.mode),
            MachineObservationStateId(args.state),
        )
        .await;
    pool.shutdown().await;

    let selections = result?
        .into_iter()
        .map(|selection| SelectionOutput {
            reason_name: reason_name(config, selection.reason),
            selection,
        })
        .collect();
    let out = PickerOutput {
        machine_id: args.machine,
        at: args.at.to_rfc3339(),
        selections,
    };
    output(&out, json_mode);
    Ok(())
}
