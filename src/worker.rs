use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;
use crate::config::AggregatorConfig;
use crate::errors::{AggregatorError, Result, TransportError};
use crate::progress::ProgressRamp;
use crate::transport::UploadTransport;
use super::types::{AggregatorCommand, AggregatorEvent, JobId, JobState, Snapshot, UploadJob};

/// Messages from a running attempt back to the worker. Each carries the
/// generation it was started with so reports from a superseded or removed
/// attempt can be recognised and dropped.
#[derive(Debug)]
enum AttemptReport {
    Tick {
        id: JobId,
        generation: u64,
    },

    Finished {
        id: JobId,
        generation: u64,
        outcome: std::result::Result<Url, TransportError>,
    },
}

struct JobEntry {
    job: UploadJob,
    generation: u64,
    cancellation_token: Option<CancellationToken>,
}

impl JobEntry {
    fn cancel(&mut self) {
        if let Some(token) = self.cancellation_token.take() {
            token.cancel();
        }
    }
}

/// Owns every job. All mutations go through this task, one at a time.
pub(crate) struct AggregatorWorker {
    transport: Arc<dyn UploadTransport>,
    ramp: ProgressRamp,
    progress_interval: Duration,
    semaphore: Option<Arc<Semaphore>>,

    jobs: HashMap<JobId, JobEntry>,
    /// Ids in the order they were first added
    order: Vec<JobId>,
    /// Uploaded ids in completion order
    completed: Vec<JobId>,
    next_generation: u64,

    event_tx: broadcast::Sender<AggregatorEvent>,
    report_tx: mpsc::UnboundedSender<AttemptReport>,
    report_rx: mpsc::UnboundedReceiver<AttemptReport>,
}

impl AggregatorWorker {
    pub(crate) fn new(
        transport: Arc<dyn UploadTransport>,
        config: &AggregatorConfig,
        event_tx: broadcast::Sender<AggregatorEvent>,
    ) -> Self {
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        Self {
            transport,
            ramp: ProgressRamp::from_config(config),
            progress_interval: config.progress_interval,
            semaphore: config.max_concurrent.map(|limit| Arc::new(Semaphore::new(limit))),
            jobs: HashMap::new(),
            order: Vec::new(),
            completed: Vec::new(),
            next_generation: 0,
            event_tx,
            report_tx,
            report_rx,
        }
    }

    pub(crate) async fn run(mut self, mut command_rx: mpsc::Receiver<AggregatorCommand>) {
        debug!("aggregator worker started");

        // Commands and attempt reports are handled strictly one after another
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(AggregatorCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                Some(report) = self.report_rx.recv() => {
                    self.handle_report(report);
                }
            }
        }

        for entry in self.jobs.values_mut() {
            entry.cancel();
        }
        debug!(jobs = self.jobs.len(), "aggregator worker stopped");
    }

    fn handle_command(&mut self, command: AggregatorCommand) {
        match command {
            AggregatorCommand::AddJob { id, payload, reply } => {
                let result = self.add_job(id, payload);
                let _ = reply.send(result);
            }
            AggregatorCommand::RetryJob { id, payload, reply } => {
                let result = self.retry_job(id, payload);
                let _ = reply.send(result);
            }
            AggregatorCommand::RemoveJob { id, reply } => {
                self.remove_job(&id);
                let _ = reply.send(());
            }
            AggregatorCommand::Reset { reply } => {
                self.reset();
                let _ = reply.send(());
            }
            AggregatorCommand::GetJob { id, reply } => {
                let job = self.jobs.get(&id).map(|entry| entry.job.clone());
                let _ = reply.send(job);
            }
            AggregatorCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            AggregatorCommand::Shutdown => {}
        }
    }

    fn add_job(&mut self, id: JobId, payload: Bytes) -> Result<()> {
        if self.jobs.contains_key(&id) {
            return Err(AggregatorError::DuplicateJob(id));
        }

        debug!(job = %id, bytes = payload.len(), "job added");
        self.jobs.insert(id.clone(), JobEntry {
            job: UploadJob::new(id.clone(), payload),
            generation: 0,
            cancellation_token: None,
        });
        self.order.push(id.clone());
        let _ = self.event_tx.send(AggregatorEvent::JobAdded { id: id.clone() });

        self.start(&id);
        Ok(())
    }

    fn retry_job(&mut self, id: JobId, payload: Bytes) -> Result<()> {
        let entry = self.jobs.get_mut(&id)
            .ok_or_else(|| AggregatorError::UnknownJob(id.clone()))?;

        if !entry.job.state.is_failed() {
            trace!(job = %id, state = entry.job.state.name(), "retry ignored");
            return Ok(());
        }

        // The payload is fixed at creation; a retry re-sends the stored bytes
        if payload != entry.job.payload {
            debug!(job = %id, "retry payload differs from stored payload, keeping stored bytes");
        }
        info!(job = %id, attempt = entry.job.attempt + 1, "retrying upload");
        self.start(&id);
        Ok(())
    }

    fn remove_job(&mut self, id: &JobId) {
        let Some(mut entry) = self.jobs.remove(id) else {
            return;
        };

        // A late report for this job finds no entry and is dropped
        entry.cancel();
        self.order.retain(|existing| existing != id);
        self.completed.retain(|existing| existing != id);

        debug!(job = %id, state = entry.job.state.name(), "job removed");
        let _ = self.event_tx.send(AggregatorEvent::JobRemoved { id: id.clone() });
    }

    fn reset(&mut self) {
        for entry in self.jobs.values_mut() {
            entry.cancel();
        }
        self.jobs.clear();
        self.order.clear();
        self.completed.clear();

        debug!("aggregator reset");
        let _ = self.event_tx.send(AggregatorEvent::Reset);
    }

    /// Begin a new attempt. No-op unless the job is idle or failed, so a job
    /// never has two transport calls in flight.
    fn start(&mut self, id: &JobId) {
        self.next_generation += 1;
        let generation = self.next_generation;

        let Some(entry) = self.jobs.get_mut(id) else {
            return;
        };
        if !matches!(entry.job.state, JobState::Idle | JobState::Failed { .. }) {
            return;
        }

        let cancellation_token = CancellationToken::new();
        entry.generation = generation;
        entry.cancellation_token = Some(cancellation_token.clone());
        entry.job.attempt += 1;
        entry.job.started_at = Some(Utc::now());
        entry.job.finished_at = None;
        let payload = entry.job.payload.clone();

        if !self.transition(id, JobState::Uploading { progress: 0.0 }) {
            return;
        }

        let attempt = Attempt {
            id: id.clone(),
            generation,
            transport: self.transport.clone(),
            semaphore: self.semaphore.clone(),
            progress_interval: self.progress_interval,
            cancellation_token,
            report_tx: self.report_tx.clone(),
        };
        tokio::spawn(attempt.run(payload));
    }

    fn handle_report(&mut self, report: AttemptReport) {
        match report {
            AttemptReport::Tick { id, generation } => {
                let Some(progress) = self.current_progress(&id, generation) else {
                    trace!(job = %id, generation, "stale progress discarded");
                    return;
                };

                if let Some(next) = self.ramp.advance(progress) {
                    if self.transition(&id, JobState::Uploading { progress: next }) {
                        let _ = self.event_tx.send(AggregatorEvent::Progress { id, progress: next });
                    }
                }
            }
            AttemptReport::Finished { id, generation, outcome } => {
                if self.current_progress(&id, generation).is_none() {
                    debug!(job = %id, generation, "late completion discarded");
                    return;
                }

                if let Some(entry) = self.jobs.get_mut(&id) {
                    entry.cancellation_token = None;
                    entry.job.finished_at = Some(Utc::now());
                }

                match outcome {
                    Ok(url) => {
                        info!(job = %id, %url, "upload finished");
                        if self.transition(&id, JobState::Uploaded { url }) && !self.completed.contains(&id) {
                            self.completed.push(id);
                        }
                    }
                    Err(err) => {
                        warn!(job = %id, error = %err, "upload failed");
                        self.transition(&id, JobState::Failed { message: err.to_string() });
                    }
                }
            }
        }
    }

    /// Progress of `id` if it is still uploading under `generation`.
    fn current_progress(&self, id: &JobId, generation: u64) -> Option<f64> {
        self.jobs
            .get(id)
            .filter(|entry| entry.generation == generation)
            .and_then(|entry| entry.job.state.progress())
    }

    fn transition(&mut self, id: &JobId, new_state: JobState) -> bool {
        let Some(entry) = self.jobs.get_mut(id) else {
            return false;
        };

        if !JobState::is_valid_transition(&entry.job.state, &new_state) {
            warn!(
                job = %id,
                from = entry.job.state.name(),
                to = new_state.name(),
                "invalid state transition ignored"
            );
            return false;
        }

        let old_state = std::mem::replace(&mut entry.job.state, new_state.clone());

        // Progress ticks are reported through `AggregatorEvent::Progress`
        if !(old_state.is_uploading() && new_state.is_uploading()) {
            let _ = self.event_tx.send(AggregatorEvent::StateChanged {
                id: id.clone(),
                old_state,
                new_state,
            });
        }

        true
    }

    fn snapshot(&self) -> Snapshot {
        let jobs: Vec<UploadJob> = self.order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .map(|entry| entry.job.clone())
            .collect();

        let completed_urls = self.completed
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter_map(|entry| entry.job.state.url().cloned())
            .collect();

        let all_uploaded = !jobs.is_empty() && jobs.iter().all(|job| job.state.is_uploaded());
        let any_failed = jobs.iter().any(|job| job.state.is_failed());

        Snapshot {
            jobs,
            completed_urls,
            all_uploaded,
            any_failed,
        }
    }
}

/// One transport call plus its progress ticker.
struct Attempt {
    id: JobId,
    generation: u64,
    transport: Arc<dyn UploadTransport>,
    semaphore: Option<Arc<Semaphore>>,
    progress_interval: Duration,
    cancellation_token: CancellationToken,
    report_tx: mpsc::UnboundedSender<AttemptReport>,
}

impl Attempt {
    async fn run(self, payload: Bytes) {
        let _permit = match &self.semaphore {
            Some(semaphore) => {
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                    _ = self.cancellation_token.cancelled() => return,
                }
            }
            None => None,
        };

        let mut upload = self.transport.upload(payload);
        let mut ticker = interval(self.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; progress starts at 0.0
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    trace!(job = %self.id, generation = self.generation, "attempt cancelled");
                    return;
                }
                outcome = &mut upload => {
                    let _ = self.report_tx.send(AttemptReport::Finished {
                        id: self.id.clone(),
                        generation: self.generation,
                        outcome,
                    });
                    return;
                }
                _ = ticker.tick() => {
                    let report = AttemptReport::Tick {
                        id: self.id.clone(),
                        generation: self.generation,
                    };
                    if self.report_tx.send(report).is_err() {
                        return;
                    }
                }
            }
        }
    }
}
