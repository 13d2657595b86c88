//! Fail-fast concurrency gate with a global limit and a per-user limit.
//!
//! `try_acquire` never blocks and never queues: it checks both counters under one
//! lock and either increments both and hands out a token, or changes nothing.
//! `release` gives the slot back exactly once per token.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Who an admission slot is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum AdmissionSubject {
    /// Counted against the global limit and the user's own limit
    User(i64),
    /// Background work not tied to a user; global limit only
    System,
}

impl std::fmt::Display for AdmissionSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionSubject::User(id) => write!(f, "user:{}", id),
            AdmissionSubject::System => write!(f, "system"),
        }
    }
}

/// Proof of a granted slot. Hand it back to `release`.
#[derive(Debug, PartialEq, Eq)]
pub struct AdmissionToken {
    id: u64,
    subject: AdmissionSubject,
}

impl AdmissionToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subject(&self) -> AdmissionSubject {
        self.subject
    }
}

/// Point-in-time view of the controller, for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionStats {
    pub global_in_use: usize,
    pub global_limit: usize,
    pub per_user_in_use: BTreeMap<i64, usize>,
    pub per_user_limit: usize,
    pub system_in_use: usize,
    pub total_granted: u64,
    pub total_rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    global_in_use: usize,
    per_user: HashMap<i64, usize>,
    system_in_use: usize,
    outstanding: HashSet<u64>,
    next_id: u64,
    total_granted: u64,
    total_rejected: u64,
}

#[derive(Debug)]
pub struct AdmissionController {
    global_limit: usize,
    per_user_limit: usize,
    counters: Mutex<Counters>,
}

impl AdmissionController {
    pub fn new(global_limit: usize, per_user_limit: usize) -> Self {
        Self {
            global_limit,
            per_user_limit,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn from_config(config: &crate::config::AdmissionConfig) -> Self {
        Self::new(config.max_ai_concurrent, config.max_ai_per_user)
    }

    // Counters stay consistent on every exit path, so a poisoned lock is still usable.
    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take a slot if both the global and the subject's limit have room.
    /// Returns `None` immediately otherwise, with no counter touched.
    pub fn try_acquire(&self, subject: AdmissionSubject) -> Option<AdmissionToken> {
        let mut c = self.counters();

        let user_in_use = match subject {
            AdmissionSubject::User(id) => c.per_user.get(&id).copied().unwrap_or(0),
            AdmissionSubject::System => 0,
        };
        let global_full = c.global_in_use >= self.global_limit;
        let user_full = matches!(subject, AdmissionSubject::User(_)) && user_in_use >= self.per_user_limit;

        if global_full || user_full {
            c.total_rejected += 1;
            tracing::debug!(
                %subject,
                global_in_use = c.global_in_use,
                user_in_use,
                "Admission rejected"
            );
            return None;
        }

        c.global_in_use += 1;
        match subject {
            AdmissionSubject::User(id) => *c.per_user.entry(id).or_insert(0) += 1,
            AdmissionSubject::System => c.system_in_use += 1,
        }
        c.next_id += 1;
        let id = c.next_id;
        c.outstanding.insert(id);
        c.total_granted += 1;

        Some(AdmissionToken { id, subject })
    }

    /// Give a slot back. A token that is unknown or already released only logs a
    /// warning and returns false; counters never go below zero.
    pub fn release(&self, token: &AdmissionToken) -> bool {
        let mut c = self.counters();

        if !c.outstanding.remove(&token.id) {
            tracing::warn!(
                token_id = token.id,
                subject = %token.subject,
                "Release without matching acquire"
            );
            return false;
        }

        c.global_in_use = c.global_in_use.saturating_sub(1);
        match token.subject {
            AdmissionSubject::User(id) => {
                let remaining = c.per_user.get(&id).copied().unwrap_or(0).saturating_sub(1);
                if remaining == 0 {
                    c.per_user.remove(&id);
                } else {
                    c.per_user.insert(id, remaining);
                }
            }
            AdmissionSubject::System => c.system_in_use = c.system_in_use.saturating_sub(1),
        }
        true
    }

    pub fn stats(&self) -> AdmissionStats {
        let c = self.counters();
        AdmissionStats {
            global_in_use: c.global_in_use,
            global_limit: self.global_limit,
            per_user_in_use: c.per_user.iter().map(|(k, v)| (*k, *v)).collect(),
            per_user_limit: self.per_user_limit,
            system_in_use: c.system_in_use,
            total_granted: c.total_granted,
            total_rejected: c.total_rejected,
        }
    }

    pub fn global_limit(&self) -> usize {
        self.global_limit
    }

    pub fn per_user_limit(&self) -> usize {
        self.per_user_limit
    }

    /// Acquire a slot wrapped in a guard that releases it when dropped.
    pub fn try_admit(self: &Arc<Self>, subject: AdmissionSubject) -> Option<AdmissionPermit> {
        self.try_acquire(subject).map(|token| AdmissionPermit {
            controller: Arc::clone(self),
            token: Some(token),
        })
    }
}

/// Scoped admission slot; released on drop, including during unwinding.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
    token: Option<AdmissionToken>,
}

impl AdmissionPermit {
    pub fn subject(&self) -> Option<AdmissionSubject> {
        self.token.as_ref().map(|t| t.subject())
    }

    /// Release now instead of at drop.
    pub fn release(mut self) -> bool {
        match self.token.take() {
            Some(token) => self.controller.release(&token),
            None => false,
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.controller.release(&token);
        }
    }
}
