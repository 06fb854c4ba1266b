//! Scenario files for `reasonflow run`.
//!
//! A scenario plays the role of the upstream system: it records machine
//! activity, restates machine modes, enters manual reasons and proposes auto
//! reasons, step by step, and lets the worker pool consolidate each change.
//!
//! ```yaml
//! machines:
//!   - id: 1
//!     name: press
//! reasons:
//!   - id: 10
//!     name: Production
//! machine_mode_defaults:
//!   - machine_mode: 1
//!     reason: 10
//!     score: 10.0
//! steps:
//!   - type: activity
//!     machine: 1
//!     from: 2024-03-04T08:00:00Z
//!     to: 2024-03-04T09:00:00Z
//!     mode: 1
//!     state: 1
//!   - type: manual
//!     machine_id: 1
//!     range: { lower: 2024-03-04T08:15:00Z, upper: 2024-03-04T08:30:00Z }
//!     reason: 11
//! ```

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::models::{
    Config, Machine, MachineId, MachineModeDefaultEntry, MachineModeId, MachineObservationStateId,
    Modification, ModificationKind, Reason, ReasonSlotChange, ScheduledWindowConfig, SlotTrigger,
    TimeRange,
};
use crate::infrastructure::config::ConfigLoader;
use crate::services::builtin_providers::{ManualReason, ReasonProposal};
use crate::services::{BatchReport, ConsolidationReport, MachineWorkerPool, ReasonStores};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub machines: Vec<Machine>,

    /// Added to the configured reasons
    #[serde(default)]
    pub reasons: Vec<Reason>,

    /// Added to the configured machine mode defaults
    #[serde(default)]
    pub machine_mode_defaults: Vec<MachineModeDefaultEntry>,

    /// Added to the configured scheduled windows
    #[serde(default)]
    pub scheduled: Vec<ScheduledWindowConfig>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// New activity, stored as an undetermined slot
    Activity {
        machine: MachineId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        mode: MachineModeId,
        state: MachineObservationStateId,
    },
    /// Machine mode or observation state restated over a period
    Status {
        machine: MachineId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        mode: MachineModeId,
        state: MachineObservationStateId,
    },
    /// An operator enters a manual reason
    Manual(ManualReason),
    /// A detector proposes an auto reason
    Proposal(ReasonProposal),
    /// Batch re-evaluation of a period
    Reevaluate {
        machine: MachineId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activity { machine, from, to, mode, state } => write!(
                f,
                "activity machine={machine} [{from}, {to}) mode={mode} state={state}"
            ),
            Self::Status { machine, from, to, mode, state } => write!(
                f,
                "status machine={machine} [{from}, {to}) mode={mode} state={state}"
            ),
            Self::Manual(m) => write!(
                f,
                "manual machine={} {} reason={}",
                m.machine_id, m.range, m.reason
            ),
            Self::Proposal(p) => write!(
                f,
                "proposal machine={} {} reason={} score={}",
                p.machine_id, p.range, p.reason, p.score
            ),
            Self::Reevaluate { machine, from, to } => {
                write!(f, "reevaluate machine={machine} [{from}, {to})")
            }
        }
    }
}

/// What one step did.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: String,
    /// Consolidation passes run
    pub consolidated: usize,
    /// Passes that changed the slots
    pub changed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchReport>,
}

impl StepOutcome {
    fn new(step: &Step) -> Self {
        Self {
            step: step.to_string(),
            consolidated: 0,
            changed: 0,
            batch: None,
        }
    }

    fn record(&mut self, reports: &[ConsolidationReport]) {
        self.consolidated += reports.len();
        self.changed += reports.iter().filter(|r| r.changed).count();
    }
}

impl Scenario {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))
    }

    /// `config` extended with the scenario's reference data, validated.
    pub fn apply_to(&self, config: &Config) -> Result<Config> {
        let mut config = config.clone();
        config.reasons.extend(self.reasons.iter().cloned());
        config
            .providers
            .machine_mode_defaults
            .entries
            .extend(self.machine_mode_defaults.iter().cloned());
        config
            .providers
            .scheduled
            .windows
            .extend(self.scheduled.iter().cloned());
        ConfigLoader::validate(&config).context("Scenario makes the configuration invalid")?;
        Ok(config)
    }

    /// Machines declared by the scenario or touched by one of its steps.
    pub fn machine_ids(&self) -> Vec<MachineId> {
        let mut ids: Vec<MachineId> = self.machines.iter().map(|m| m.id).collect();
        ids.extend(self.steps.iter().map(Step::machine_id));
        ids.sort();
        ids.dedup();
        ids
    }
}

impl Step {
    pub const fn machine_id(&self) -> MachineId {
        match self {
            Self::Activity { machine, .. }
            | Self::Status { machine, .. }
            | Self::Reevaluate { machine, .. } => *machine,
            Self::Manual(m) => m.machine_id,
            Self::Proposal(p) => p.machine_id,
        }
    }

    /// Apply the step upstream and consolidate the resulting triggers.
    pub async fn play(
        &self,
        pool: &MachineWorkerPool,
        stores: &ReasonStores,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let service = pool.service();
        let mut outcome = StepOutcome::new(self);
        debug!(step = %self, "Playing scenario step");

        let triggers: Vec<SlotTrigger> = match self {
            Self::Activity { machine, from, to, mode, state } => {
                let range = TimeRange::new(*from, *to)?;
                vec![service.record_activity(*machine, range, *mode, *state).await?]
            }
            Self::Status { machine, from, to, mode, state } => {
                let range = TimeRange::new(*from, *to)?;
                service.apply_status(*machine, range, *mode, *state).await?
            }
            Self::Manual(manual) => {
                stores.manual.add(manual.clone());
                let modification = Modification::new(ModificationKind::ManualReason)
                    .with_range(manual.range)
                    .with_reason(manual.reason);
                service
                    .triggers_for_range(
                        manual.machine_id,
                        &manual.range,
                        ReasonSlotChange::REASON | ReasonSlotChange::RESET_MANUAL,
                        Some(modification),
                    )
                    .await?
            }
            Self::Proposal(proposal) => {
                stores.proposals.add(proposal.clone());
                let modification = Modification::new(ModificationKind::ReasonProposal)
                    .with_range(proposal.range)
                    .with_reason(proposal.reason);
                service
                    .triggers_for_range(
                        proposal.machine_id,
                        &proposal.range,
                        ReasonSlotChange::REASON,
                        Some(modification),
                    )
                    .await?
            }
            Self::Reevaluate { machine, from, to } => {
                let range = TimeRange::new(*from, *to)?;
                let report = pool.reevaluate(*machine, range, cancel.child_token()).await?;
                outcome.consolidated = report.processed;
                outcome.changed = report.changed;
                outcome.batch = Some(report);
                vec![]
            }
        };

        for trigger in triggers {
            let reports = pool.submit(trigger).await?;
            outcome.record(&reports);
        }
        info!(
            step = %outcome.step,
            consolidated = outcome.consolidated,
            changed = outcome.changed,
            "Scenario step done"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ReasonId;

    const SCENARIO: &str = r"
name: morning shift
machines:
  - id: 1
    name: press
reasons:
  - id: 10
    name: Production
  - id: 11
    name: Tool change
machine_mode_defaults:
  - machine_mode: 1
    reason: 10
    score: 10.0
steps:
  - type: activity
    machine: 1
    from: 2024-03-04T08:00:00Z
    to: 2024-03-04T09:00:00Z
    mode: 1
    state: 1
  - type: manual
    machine_id: 1
    range: { lower: 2024-03-04T08:15:00Z, upper: 2024-03-04T08:30:00Z }
    reason: 11
    details: die swap
  - type: proposal
    machine_id: 2
    range: { lower: 2024-03-04T08:00:00Z, upper: 2024-03-04T08:10:00Z }
    reason: 11
    score: 20.0
  - type: reevaluate
    machine: 1
    from: 2024-03-04T08:00:00Z
    to: 2024-03-04T09:00:00Z
";

    #[test]
    fn test_parse_scenario() {
        let scenario: Scenario = serde_yaml::from_str(SCENARIO).unwrap();
        assert_eq!(scenario.name.as_deref(), Some("morning shift"));
        assert_eq!(scenario.steps.len(), 4);
        match &scenario.steps[1] {
            Step::Manual(m) => {
                assert_eq!(m.reason, ReasonId(11));
                assert_eq!(m.details.as_deref(), Some("die swap"));
            }
            other => panic!("expected a manual step, got {other:?}"),
        }
        assert_eq!(scenario.machine_ids(), vec![MachineId(1), MachineId(2)]);
    }

    #[test]
    fn test_apply_to_validates_references() {
        let scenario: Scenario = serde_yaml::from_str(SCENARIO).unwrap();
        let config = scenario.apply_to(&Config::default()).unwrap();
        assert_eq!(config.reasons.len(), 2);
        assert_eq!(config.providers.machine_mode_defaults.entries.len(), 1);

        let mut broken = scenario;
        broken.reasons.clear();
        assert!(broken.apply_to(&Config::default()).is_err());
    }

    #[test]
    fn test_rejects_inverted_manual_range() {
        let yaml = r"
steps:
  - type: manual
    machine_id: 1
    range: { lower: 2024-03-04T09:00:00Z, upper: 2024-03-04T08:00:00Z }
    reason: 11
";
        assert!(serde_yaml::from_str::<Scenario>(yaml).is_err());
    }
}
