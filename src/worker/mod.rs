//! GenerationWorker - periodic inventory replenishment
//!
//! Each cycle:
//! - Skips everything while the persisted global pause flag is set
//! - Ranks live hints, then low-inventory combos of active users
//! - Asks the admission controller for a slot per candidate (fail-fast)
//! - Runs admitted attempts concurrently, each under a deadline
//! - Folds outcomes into backoff, exclusions, and the run history

mod attempt;
pub mod candidates;
pub mod state;
pub mod status;

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::admission::AdmissionController;
use crate::ai::{ErrorClass, QuestionGenerator};
use crate::config::{Config, WorkerConfig};
use crate::domain::Combo;
use crate::error::Result;
use crate::scoring::PriorityScorer;
use crate::store::QuizStore;

pub use attempt::{AttemptFailure, AttemptReport};
pub use candidates::{Backoff, Candidate, CandidateSource, plan_candidates};
pub use state::{AttemptLifecycle, AttemptState, InvalidTransition};
pub use status::{CycleReport, RunHistory, RunRecord, WorkerStatus};

use attempt::{AttemptContext, run_attempt};

/// In-memory state carried between cycles. Never held across an await.
#[derive(Debug)]
struct WorkerState {
    excluded: BTreeSet<Combo>,
    backoff: Backoff,
    history: RunHistory,
    cycles_run: u64,
    total_generated: u64,
    total_failed: u64,
    total_rejected: u64,
}

pub struct GenerationWorker {
    store: Arc<QuizStore>,
    admission: Arc<AdmissionController>,
    ctx: Arc<AttemptContext>,
    config: WorkerConfig,
    state: Mutex<WorkerState>,
}

impl GenerationWorker {
    pub fn new(
        config: &Config,
        store: Arc<QuizStore>,
        admission: Arc<AdmissionController>,
        scorer: Arc<PriorityScorer>,
        generator: Arc<dyn QuestionGenerator>,
    ) -> Self {
        let worker_config = config.worker.clone();
        let state = WorkerState {
            excluded: BTreeSet::new(),
            backoff: Backoff::new(std::time::Duration::from_secs(worker_config.max_failure_backoff_secs)),
            history: RunHistory::new(worker_config.max_history),
            cycles_run: 0,
            total_generated: 0,
            total_failed: 0,
            total_rejected: 0,
        };
        Self {
            ctx: Arc::new(AttemptContext {
                store: Arc::clone(&store),
                scorer,
                generator,
                config: Arc::new(config.clone()),
            }),
            store,
            admission,
            config: worker_config,
            state: Mutex::new(state),
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        // counters and sets stay consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One replenishment pass with an injected clock for hint expiry and backoff.
    /// Returns after every admitted attempt has finished.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::new(now);

        if self.store.is_globally_paused()? {
            report.skipped_paused = true;
            tracing::info!("Generation globally paused, skipping cycle");
            return Ok(self.finish(report));
        }

        let paused = self.store.paused_user_ids()?;
        let mut eligible_users = HashSet::new();
        let mut interest = BTreeSet::new();
        for user in self.store.list_users()?.into_iter().filter(|u| u.ai_enabled) {
            if paused.contains(&user.id) {
                report.skipped_paused_users += 1;
                continue;
            }
            interest.extend(user.combos());
            eligible_users.insert(user.id);
        }

        let inventory = self.store.low_usage_counts(self.config.low_usage_threshold)?;
        let hints: Vec<_> = self
            .store
            .active_hints(now)?
            .into_iter()
            .filter(|h| eligible_users.contains(&h.user_id))
            .collect();

        let planned = plan_candidates(&hints, &interest, &inventory, self.config.min_buffer, now);
        report.candidates = planned.len();

        let mut tasks = JoinSet::new();
        {
            let state = self.lock_state();
            for candidate in planned {
                if state.excluded.contains(&candidate.combo) {
                    report.skipped_excluded += 1;
                    continue;
                }
                if state.backoff.is_backing_off(candidate.subject, &candidate.combo, now) {
                    report.skipped_backoff += 1;
                    continue;
                }

                let mut lifecycle = AttemptLifecycle::new();
                match self.admission.try_admit(candidate.subject) {
                    Some(permit) => {
                        lifecycle.advance(AttemptState::AdmissionGranted).ok();
                        report.admitted += 1;
                        tasks.spawn(run_attempt(Arc::clone(&self.ctx), candidate, permit, lifecycle));
                    }
                    None => {
                        lifecycle.advance(AttemptState::Rejected).ok();
                        report.rejected += 1;
                        tracing::debug!(
                            combo = %candidate.combo,
                            subject = %candidate.subject,
                            "No admission capacity, deferring to next cycle"
                        );
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(attempt) => self.apply(&mut report, attempt, now),
                Err(err) => {
                    report.panicked += 1;
                    tracing::error!(error = %err, "Generation attempt task died");
                }
            }
        }

        Ok(self.finish(report))
    }

    fn apply(&self, report: &mut CycleReport, attempt: AttemptReport, now: DateTime<Utc>) {
        let mut state = self.lock_state();
        let candidate = &attempt.candidate;
        match &attempt.result {
            Ok(question) => {
                report.completed += 1;
                report.question_ids.push(question.id);
                state.backoff.record_success(candidate.subject, &candidate.combo);
            }
            Err(err) => {
                report.failed += 1;
                match err.class() {
                    ErrorClass::Config => {
                        if state.excluded.insert(candidate.combo.clone()) {
                            tracing::error!(
                                combo = %candidate.combo,
                                error = %err,
                                "Generation misconfigured, combo excluded until exclusions are cleared"
                            );
                        }
                    }
                    ErrorClass::Retryable => {
                        let delay = state
                            .backoff
                            .record_failure(candidate.subject, &candidate.combo, err.ai_error(), now);
                        tracing::warn!(
                            combo = %candidate.combo,
                            subject = %candidate.subject,
                            error = %err,
                            backoff_secs = delay.as_secs(),
                            "Generation attempt failed"
                        );
                    }
                }
            }
        }
    }

    fn finish(&self, mut report: CycleReport) -> CycleReport {
        report.finished_at = Utc::now().max(report.started_at);
        let mut state = self.lock_state();
        state.cycles_run += 1;
        state.total_generated += report.completed as u64;
        state.total_failed += (report.failed + report.panicked) as u64;
        state.total_rejected += report.rejected as u64;
        let record = RunRecord::from_report(state.cycles_run, &report);
        state.history.push(record);
        tracing::info!(cycle = state.cycles_run, summary = %report.summary(), "Generation cycle finished");
        report
    }

    /// Periodic loop until `shutdown` flips to true or its sender is dropped.
    /// A failed cycle is logged and the loop keeps going.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.config.start_paused {
            self.store.set_globally_paused(true)?;
        }

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.config.interval_secs, "Generation worker started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_cycle().await {
                        tracing::error!(error = %err, "Generation cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Generation worker stopped");
        Ok(())
    }

    pub fn set_global_paused(&self, paused: bool) -> Result<()> {
        self.store.set_globally_paused(paused)?;
        tracing::info!(paused, "Global generation pause updated");
        Ok(())
    }

    pub fn set_user_paused(&self, user_id: i64, paused: bool) -> Result<()> {
        self.store.require_user(user_id)?;
        self.store.set_user_paused(user_id, paused, Utc::now())?;
        tracing::info!(user_id, paused, "User generation pause updated");
        Ok(())
    }

    /// Forget config-class exclusions. Returns how many were cleared.
    pub fn clear_exclusions(&self) -> usize {
        let mut state = self.lock_state();
        let cleared = state.excluded.len();
        state.excluded.clear();
        cleared
    }

    pub fn excluded_combos(&self) -> Vec<Combo> {
        self.lock_state().excluded.iter().cloned().collect()
    }

    pub fn status(&self) -> Result<WorkerStatus> {
        let globally_paused = self.store.is_globally_paused()?;
        let state = self.lock_state();
        Ok(WorkerStatus {
            globally_paused,
            cycles_run: state.cycles_run,
            total_generated: state.total_generated,
            total_failed: state.total_failed,
            total_rejected: state.total_rejected,
            excluded_combos: state.excluded.iter().cloned().collect(),
            backing_off: state.backoff.len(),
            admission: self.admission.stats(),
            last_run: state.history.last().cloned(),
            history: state.history.to_vec(),
        })
    }
}
