//! Per-machine consolidation workers.
//!
//! Triggers for one machine are processed strictly in submission order by a
//! single task that owns that machine's provider instances; different
//! machines run concurrently. Conflicting writes detected by the repository
//! are retried with exponential backoff from a fresh read of the slots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::consolidation_service::{
    ConsolidationError, ConsolidationReport, ConsolidationResult, ConsolidationService,
};
use super::provider_registry::{ActiveProviders, ProviderRegistry};
use crate::domain::models::{
    Config, ExtraReasonSelection, Machine, MachineId, MachineModeId, MachineObservationStateId,
    RetryConfig, SlotTrigger, TimeRange,
};
use crate::domain::ports::BatchContext;

/// Summary of a batch re-evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub machine_id: MachineId,
    pub range: TimeRange,
    /// Slots consolidated
    pub processed: usize,
    /// Slots whose reasons changed
    pub changed: usize,
    /// Slots that failed after retries
    pub failed: usize,
    /// The run stopped early on cancellation
    pub cancelled: bool,
}

impl BatchReport {
    fn new(machine_id: MachineId, range: TimeRange) -> Self {
        Self {
            machine_id,
            range,
            processed: 0,
            changed: 0,
            failed: 0,
            cancelled: false,
        }
    }
}

type Reply<T> = oneshot::Sender<ConsolidationResult<T>>;

enum Command {
    Consolidate {
        trigger: SlotTrigger,
        reply: Option<Reply<Vec<ConsolidationReport>>>,
    },
    Reevaluate {
        range: TimeRange,
        cancel: CancellationToken,
        reply: Reply<BatchReport>,
    },
    Selections {
        at: DateTime<Utc>,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
        reply: Reply<Vec<ExtraReasonSelection>>,
    },
}

struct WorkerHandle {
    sender: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Pool of per-machine workers, spawned on first use.
pub struct MachineWorkerPool {
    registry: ProviderRegistry,
    service: Arc<ConsolidationService>,
    machines: HashMap<MachineId, Machine>,
    channel_capacity: usize,
    batch_size: usize,
    retry: RetryConfig,
    workers: Mutex<HashMap<MachineId, WorkerHandle>>,
    shutdown: CancellationToken,
}

impl MachineWorkerPool {
    pub fn new(
        registry: ProviderRegistry,
        service: Arc<ConsolidationService>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            service,
            machines: HashMap::new(),
            channel_capacity: config.worker.channel_capacity.max(1),
            batch_size: config.worker.batch_size.max(1),
            retry: config.retry.clone(),
            workers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Known machines; unknown ids get a generated name.
    #[must_use]
    pub fn with_machines(mut self, machines: impl IntoIterator<Item = Machine>) -> Self {
        self.machines.extend(machines.into_iter().map(|m| (m.id, m)));
        self
    }

    pub fn service(&self) -> &Arc<ConsolidationService> {
        &self.service
    }

    /// Consolidate a trigger and wait for the committed result.
    ///
    /// A retried trigger may yield several reports when the slot was split
    /// or merged concurrently.
    pub async fn submit(
        &self,
        trigger: SlotTrigger,
    ) -> ConsolidationResult<Vec<ConsolidationReport>> {
        let machine_id = trigger.machine_id;
        let (reply, receiver) = oneshot::channel();
        self.send(
            machine_id,
            Command::Consolidate {
                trigger,
                reply: Some(reply),
            },
        )
        .await?;
        receiver
            .await
            .map_err(|_| ConsolidationError::WorkerUnavailable(machine_id))?
    }

    /// Queue a trigger without waiting for it; waits only when the
    /// machine's channel is full.
    pub async fn enqueue(&self, trigger: SlotTrigger) -> ConsolidationResult<()> {
        self.send(
            trigger.machine_id,
            Command::Consolidate {
                trigger,
                reply: None,
            },
        )
        .await
    }

    /// Re-evaluate every slot overlapping `range` with a `REQUESTED` trigger.
    ///
    /// Cancellation is checked between slots; slots already committed stay
    /// committed and the report is flagged as cancelled.
    pub async fn reevaluate(
        &self,
        machine_id: MachineId,
        range: TimeRange,
        cancel: CancellationToken,
    ) -> ConsolidationResult<BatchReport> {
        let (reply, receiver) = oneshot::channel();
        self.send(
            machine_id,
            Command::Reevaluate {
                range,
                cancel,
                reply,
            },
        )
        .await?;
        receiver
            .await
            .map_err(|_| ConsolidationError::WorkerUnavailable(machine_id))?
    }

    /// Picker entries for a machine at an instant.
    pub async fn selections_at(
        &self,
        machine_id: MachineId,
        at: DateTime<Utc>,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> ConsolidationResult<Vec<ExtraReasonSelection>> {
        let (reply, receiver) = oneshot::channel();
        self.send(
            machine_id,
            Command::Selections {
                at,
                machine_mode,
                machine_observation_state,
                reply,
            },
        )
        .await?;
        receiver
            .await
            .map_err(|_| ConsolidationError::WorkerUnavailable(machine_id))?
    }

    /// Stop accepting work, let workers drain their queues and wait for them.
    /// Running batch re-evaluations stop at the next slot.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<(MachineId, WorkerHandle)> =
            self.workers.lock().await.drain().collect();
        for (machine_id, handle) in handles {
            drop(handle.sender);
            if let Err(e) = handle.task.await {
                error!(%machine_id, error = %e, "Machine worker panicked");
            }
        }
        info!("Machine worker pool stopped");
    }

    pub async fn active_workers(&self) -> usize {
        self.workers.lock().await.len()
    }

    async fn send(&self, machine_id: MachineId, command: Command) -> ConsolidationResult<()> {
        let sender = self.sender(machine_id).await?;
        sender
            .send(command)
            .await
            .map_err(|_| ConsolidationError::WorkerUnavailable(machine_id))
    }

    async fn sender(&self, machine_id: MachineId) -> ConsolidationResult<mpsc::Sender<Command>> {
        if self.shutdown.is_cancelled() {
            return Err(ConsolidationError::Cancelled);
        }
        let mut workers = self.workers.lock().await;
        if let Some(handle) = workers.get(&machine_id) {
            if !handle.task.is_finished() {
                return Ok(handle.sender.clone());
            }
            warn!(%machine_id, "Machine worker exited, respawning");
        }

        let machine = self
            .machines
            .get(&machine_id)
            .cloned()
            .unwrap_or_else(|| Machine::new(machine_id.0, format!("machine-{machine_id}")));
        let providers = self.registry.activate(&machine);
        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        let worker = MachineWorker {
            providers,
            service: Arc::clone(&self.service),
            retry: self.retry.clone(),
            batch_size: self.batch_size,
            shutdown: self.shutdown.clone(),
        };
        let task = tokio::spawn(worker.run(receiver));
        workers.insert(
            machine_id,
            WorkerHandle {
                sender: sender.clone(),
                task,
            },
        );
        Ok(sender)
    }
}

struct MachineWorker {
    providers: ActiveProviders,
    service: Arc<ConsolidationService>,
    retry: RetryConfig,
    batch_size: usize,
    shutdown: CancellationToken,
}

impl MachineWorker {
    fn machine_id(&self) -> MachineId {
        self.providers.machine().id
    }

    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        info!(
            machine_id = %self.machine_id(),
            providers = ?self.providers.names(),
            "Machine worker started"
        );

        while let Some(command) = commands.recv().await {
            match command {
                Command::Consolidate { trigger, reply } => {
                    let batch = self.providers.new_batch();
                    let result = self.consolidate_with_retry(&batch, &trigger).await;
                    if let Err(e) = &result {
                        error!(
                            machine_id = %self.machine_id(),
                            range = %trigger.range(),
                            error = %e,
                            "Trigger dropped"
                        );
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Command::Reevaluate {
                    range,
                    cancel,
                    reply,
                } => {
                    let _ = reply.send(self.reevaluate(range, &cancel).await);
                }
                Command::Selections {
                    at,
                    machine_mode,
                    machine_observation_state,
                    reply,
                } => {
                    let batch = self.providers.new_batch();
                    let _ = reply.send(Ok(self.service.selections_at(
                        &self.providers,
                        &batch,
                        at,
                        machine_mode,
                        machine_observation_state,
                    )));
                }
            }
        }

        debug!(machine_id = %self.machine_id(), "Machine worker stopped");
    }

    fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.retry.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.retry.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build()
    }

    async fn consolidate_with_retry(
        &self,
        batch: &BatchContext,
        trigger: &SlotTrigger,
    ) -> ConsolidationResult<Vec<ConsolidationReport>> {
        let max_retries = self.retry.max_retries;
        let mut attempts = 0u32;

        backoff::future::retry(self.retry_policy(), || {
            attempts += 1;
            let attempt = attempts;
            async move {
                self.attempt(batch, trigger, attempt).await.map_err(|e| {
                    if e.is_retryable() && attempt <= max_retries {
                        warn!(
                            machine_id = %trigger.machine_id,
                            attempt,
                            error = %e,
                            "Concurrent slot update, retrying"
                        );
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }

    /// The first attempt resolves the trigger as given; retries re-read the
    /// slots now covering its range.
    async fn attempt(
        &self,
        batch: &BatchContext,
        trigger: &SlotTrigger,
        attempt: u32,
    ) -> ConsolidationResult<Vec<ConsolidationReport>> {
        if attempt == 1 {
            let report = self
                .service
                .consolidate(&self.providers, batch, trigger)
                .await?;
            return Ok(vec![report]);
        }

        let refreshed = self
            .service
            .triggers_for_range(
                trigger.machine_id,
                &trigger.range(),
                trigger.change,
                trigger.modification.clone(),
            )
            .await?;
        let mut reports = Vec::with_capacity(refreshed.len());
        for piece in &refreshed {
            reports.push(self.service.consolidate(&self.providers, batch, piece).await?);
        }
        Ok(reports)
    }

    #[instrument(skip_all, fields(machine_id = %self.machine_id(), range = %range))]
    async fn reevaluate(
        &self,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> ConsolidationResult<BatchReport> {
        let mut batch = self.providers.new_batch();
        self.providers.start_batch(&mut batch, &range);
        let outcome = self.run_batch(&batch, range, cancel).await;
        self.providers.end_batch(&mut batch);

        if let Ok(report) = &outcome {
            info!(
                processed = report.processed,
                changed = report.changed,
                failed = report.failed,
                cancelled = report.cancelled,
                "Batch re-evaluation finished"
            );
        }
        outcome
    }

    async fn run_batch(
        &self,
        batch: &BatchContext,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> ConsolidationResult<BatchReport> {
        let machine_id = self.machine_id();
        let repo = self.service.repository();
        let mut report = BatchReport::new(machine_id, range);
        let mut cursor = range.lower();

        'pages: while cursor < range.upper() {
            let window = TimeRange::new(cursor, range.upper())?;
            let page = repo.find_in_range(machine_id, &window).await?;
            if page.is_empty() {
                break;
            }

            for slot in page.into_iter().take(self.batch_size) {
                if cancel.is_cancelled() || self.shutdown.is_cancelled() {
                    report.cancelled = true;
                    break 'pages;
                }
                let next = slot.range.upper();
                match self
                    .consolidate_with_retry(batch, &SlotTrigger::requested(slot))
                    .await
                {
                    Ok(reports) => {
                        report.processed += 1;
                        report.changed += reports.iter().filter(|r| r.changed).count();
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(%machine_id, error = %e, "Slot re-evaluation failed");
                    }
                }
                cursor = cursor.max(next);
            }
        }

        Ok(report)
    }
}
