use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::JobIdentifier;

/// Where a one-shot job is in its life, as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OneShotState {
    /// Descriptor registered, not fired yet.
    Pending,
    /// Body is executing.
    Running,
    /// Past-dated schedule written, read-back not confirmed yet.
    Disabling,
    /// Read-back confirmed the schedule can no longer fire.
    Disabled,
}

impl OneShotState {
    pub fn can_transition_to(self, next: OneShotState) -> bool {
        use OneShotState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Disabling)
                | (Running, Disabling)
                | (Disabling, Disabling)
                | (Disabling, Disabled)
                // a raced second firing parks the job again
                | (Disabled, Disabling)
        )
    }
}

impl std::fmt::Display for OneShotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OneShotState::Pending => "pending",
            OneShotState::Running => "running",
            OneShotState::Disabling => "disabling",
            OneShotState::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    state: OneShotState,
    fires: u32,
}

/// Per-identifier state table for jobs submitted through this process.
#[derive(Default)]
pub struct Lifecycle {
    jobs: DashMap<JobIdentifier, Tracked>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id` as `Pending`. Returns false if already tracked.
    pub fn register(&self, id: &JobIdentifier) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.jobs.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Tracked {
                    state: OneShotState::Pending,
                    fires: 0,
                });
                true
            }
        }
    }

    /// Record a firing and return how many firings `id` has seen.
    ///
    /// Any firing after the first is the stale-schedule race: the scheduler
    /// ticked again before the job parked itself.
    pub fn fired(&self, id: &JobIdentifier) -> u32 {
        let Some(mut job) = self.jobs.get_mut(id) else {
            return 0;
        };
        job.fires += 1;
        if job.state == OneShotState::Pending {
            job.state = OneShotState::Running;
        } else {
            warn!(name = %id, state = %job.state, fires = job.fires, "stale schedule race: job fired again before it was parked");
        }
        job.fires
    }

    /// Move `id` to `next` if the transition is legal. Untracked identifiers
    /// (jobs submitted elsewhere) are ignored.
    pub fn advance(&self, id: &JobIdentifier, next: OneShotState) -> bool {
        let Some(mut job) = self.jobs.get_mut(id) else {
            return false;
        };
        if !job.state.can_transition_to(next) {
            warn!(name = %id, from = %job.state, to = %next, "illegal one-shot transition ignored");
            return false;
        }
        job.state = next;
        true
    }

    pub fn state(&self, id: &JobIdentifier) -> Option<OneShotState> {
        self.jobs.get(id).map(|job| job.state)
    }

    pub fn fires(&self, id: &JobIdentifier) -> u32 {
        self.jobs.get(id).map(|job| job.fires).unwrap_or(0)
    }

    pub fn forget(&self, id: &JobIdentifier) {
        self.jobs.remove(id);
    }

    pub fn ids(&self) -> Vec<JobIdentifier> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop every `Disabled` entry and return their identifiers.
    pub fn evict_disabled(&self) -> Vec<JobIdentifier> {
        let settled: Vec<JobIdentifier> = self
            .jobs
            .iter()
            .filter(|entry| entry.state == OneShotState::Disabled)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &settled {
            self.jobs
                .remove_if(id, |_, job| job.state == OneShotState::Disabled);
        }
        settled
    }
}
