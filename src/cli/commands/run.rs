//! Implementation of the `reasonflow run` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{open_repository, worker_pool};
use crate::cli::output::{output, render_list, slot_table, spinner, CommandOutput, SlotOutput};
use crate::cli::scenario::{Scenario, StepOutcome};
use crate::domain::models::Config;
use crate::domain::ports::ReasonSlotRepository;
use crate::infrastructure::InMemorySlotRepository;
use crate::services::ReasonStores;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario file (YAML)
    pub scenario: PathBuf,

    /// Keep the slots in this SQLite database instead of in memory
    #[arg(long)]
    pub database: Option<PathBuf>,
}

#[derive(Debug, serde::Serialize)]
pub struct RunOutput {
    pub scenario: Option<String>,
    pub steps: Vec<StepOutcome>,
    pub cancelled: bool,
    pub slots: Vec<SlotOutput>,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Scenario {}: {} step(s) played",
            self.scenario.as_deref().unwrap_or("(unnamed)"),
            self.steps.len()
        )];
        for (i, step) in self.steps.iter().enumerate() {
            lines.push(format!(
                "  {:>3}. {} ({} consolidated, {} changed)",
                i + 1,
                step.step,
                step.consolidated,
                step.changed
            ));
        }
        if self.cancelled {
            lines.push("Interrupted before the last step.".to_string());
        }
        lines.push(String::new());
        lines.push(render_list(
            "slot",
            &slot_table(&self.slots),
            self.slots.len(),
        ));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: RunArgs, config: &Config, json_mode: bool) -> Result<()> {
    let scenario = Scenario::from_file(&args.scenario)?;
    let mut config = scenario.apply_to(config)?;

    let repo: Arc<dyn ReasonSlotRepository> = match &args.database {
        Some(path) => {
            config.database.path = path.to_string_lossy().into_owned();
            open_repository(&config).await?
        }
        None => Arc::new(InMemorySlotRepository::new()),
    };

    let stores = ReasonStores::default();
    let pool = worker_pool(&config, repo.clone(), &stores, scenario.machines.clone());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the scenario");
            on_interrupt.cancel();
        }
    });

    info!(
        scenario = scenario.name.as_deref().unwrap_or(""),
        steps = scenario.steps.len(),
        "Playing scenario"
    );
    let progress = spinner("Playing scenario", json_mode);
    let mut steps = Vec::with_capacity(scenario.steps.len());
    let mut failure = None;
    for (i, step) in scenario.steps.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        progress.set_message(format!("Step {}/{}: {step}", i + 1, scenario.steps.len()));
        match step.play(&pool, &stores, &cancel).await {
            Ok(outcome) => steps.push(outcome),
            Err(err) => {
                failure = Some(err.context(format!("Step {} ({step}) failed", i + 1)));
                break;
            }
        }
    }
    progress.finish_and_clear();
    pool.shutdown().await;
    if let Some(err) = failure {
        return Err(err);
    }

    let mut slots = Vec::new();
    for machine_id in repo.machines().await.context("Failed to list machines")? {
        slots.extend(
            repo.find_all(machine_id)
                .await?
                .iter()
                .map(|slot| SlotOutput::new(slot, &config)),
        );
    }

    let out = RunOutput {
        scenario: scenario.name.clone(),
        steps,
        cancelled: cancel.is_cancelled(),
        slots,
    };
    output(&out, json_mode);
    Ok(())
}
