//! Cycle reports, bounded run history, and the worker status snapshot.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::admission::AdmissionStats;
use crate::domain::Combo;

/// What one `run_cycle` did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Global pause was on; nothing else ran
    pub skipped_paused: bool,
    pub candidates: usize,
    pub admitted: usize,
    pub rejected: usize,
    pub completed: usize,
    pub failed: usize,
    /// Attempt tasks that died without reporting back
    pub panicked: usize,
    pub skipped_excluded: usize,
    pub skipped_backoff: usize,
    pub skipped_paused_users: usize,
    pub question_ids: Vec<i64>,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            skipped_paused: false,
            candidates: 0,
            admitted: 0,
            rejected: 0,
            completed: 0,
            failed: 0,
            panicked: 0,
            skipped_excluded: 0,
            skipped_backoff: 0,
            skipped_paused_users: 0,
            question_ids: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        if self.skipped_paused {
            return "paused".to_string();
        }
        format!(
            "{} candidates, {} admitted, {} rejected, {} completed, {} failed",
            self.candidates, self.admitted, self.rejected, self.completed, self.failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub paused: bool,
    pub generated: usize,
    pub failed: usize,
    pub rejected: usize,
}

impl RunRecord {
    pub fn from_report(cycle: u64, report: &CycleReport) -> Self {
        Self {
            cycle,
            started_at: report.started_at,
            finished_at: report.finished_at,
            paused: report.skipped_paused,
            generated: report.completed,
            failed: report.failed + report.panicked,
            rejected: report.rejected,
        }
    }
}

/// Ring of the most recent runs.
#[derive(Debug, Clone)]
pub struct RunHistory {
    capacity: usize,
    records: VecDeque<RunRecord>,
}

impl RunHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn push(&mut self, record: RunRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn last(&self) -> Option<&RunRecord> {
        self.records.back()
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<RunRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Snapshot for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub globally_paused: bool,
    pub cycles_run: u64,
    pub total_generated: u64,
    pub total_failed: u64,
    pub total_rejected: u64,
    pub excluded_combos: Vec<Combo>,
    pub backing_off: usize,
    pub admission: AdmissionStats,
    pub last_run: Option<RunRecord>,
    pub history: Vec<RunRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cycle: u64) -> RunRecord {
        RunRecord::from_report(cycle, &CycleReport::new(Utc::now()))
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = RunHistory::new(3);
        for cycle in 1..=5 {
            history.push(record(cycle));
        }
        assert_eq!(history.len(), 3);
        let cycles: Vec<u64> = history.to_vec().iter().map(|r| r.cycle).collect();
        assert_eq!(cycles, vec![3, 4, 5]);
        assert_eq!(history.last().map(|r| r.cycle), Some(5));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = RunHistory::new(0);
        history.push(record(1));
        assert!(history.is_empty());
    }

    #[test]
    fn test_run_record_counts_panics_as_failures() {
        let mut report = CycleReport::new(Utc::now());
        report.completed = 2;
        report.failed = 1;
        report.panicked = 1;
        let record = RunRecord::from_report(4, &report);
        assert_eq!(record.generated, 2);
        assert_eq!(record.failed, 2);
    }

    #[test]
    fn test_summary() {
        let mut report = CycleReport::new(Utc::now());
        report.skipped_paused = true;
        assert_eq!(report.summary(), "paused");
        report.skipped_paused = false;
        report.candidates = 3;
        assert!(report.summary().starts_with("3 candidates"));
    }
}
