//! Quota Enforcer
//!
//! Each metered Project has one `AtomicU64` packing `(period << 32) | used`.
//! Reservation is a compare-and-swap loop that rolls the period over and
//! checks the limit in one step, so concurrent callers of one Project never
//! overshoot and callers of different Projects never contend.

use conduit_core::{Clock, Project, ProjectId, QuotaError, QuotaPolicy, Timestamp};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

fn pack(period: u32, used: u32) -> u64 {
    (u64::from(period) << 32) | u64::from(used)
}

fn unpack(state: u64) -> (u32, u32) {
    ((state >> 32) as u32, state as u32)
}

#[derive(Debug, Default)]
struct ProjectCounter {
    state: AtomicU64,
    total_used: AtomicU64,
}

impl ProjectCounter {
    /// Usage within `period`; zero if the stored period is older.
    fn used_in(&self, period: u32) -> u32 {
        let (stored, used) = unpack(self.state.load(Ordering::Acquire));
        if stored == period {
            used
        } else {
            0
        }
    }

    /// Add up to `amount` to `period` without passing `limit`; returns what
    /// was added. Nothing is added once a later period has started.
    fn add_capped(&self, period: u32, amount: u32, limit: u32) -> u32 {
        let mut added = 0;
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                let (stored, used) = unpack(state);
                added = 0;
                if stored != period {
                    return None;
                }
                added = amount.min(limit.saturating_sub(used));
                Some(pack(period, used + added))
            });
        added
    }

    /// Give back `amount` if the period has not rolled over since.
    fn refund(&self, period: u32, amount: u32) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                let (stored, used) = unpack(state);
                (stored == period).then(|| pack(period, used.saturating_sub(amount)))
            });
    }
}

/// Point-in-time view of a Project's budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// Committed plus in-flight units in the current period.
    pub used: u32,
    /// `None` for unmetered Projects.
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub resets_at: Option<Timestamp>,
    /// Units committed since process start, across periods.
    pub total_used: u64,
}

pub struct QuotaEnforcer {
    counters: DashMap<ProjectId, Arc<ProjectCounter>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for QuotaEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaEnforcer")
            .field("projects", &self.counters.len())
            .finish()
    }
}

impl QuotaEnforcer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    fn counter(&self, project_id: ProjectId) -> Arc<ProjectCounter> {
        self.counters.entry(project_id).or_default().clone()
    }

    /// Hold `cost` units of the Project's budget until commit or drop.
    pub fn reserve(&self, project: &Project, cost: u32) -> Result<QuotaReservation, QuotaError> {
        let counter = self.counter(project.id);
        let Some(policy) = project.quota else {
            return Ok(QuotaReservation::unmetered(project.id, counter, cost));
        };

        let now = self.clock.now();
        let period = policy.period.index(now);
        let reserved = counter
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                let (stored, used) = unpack(state);
                let used = if stored == period { used } else { 0 };
                match used.checked_add(cost) {
                    Some(next) if next <= policy.limit => Some(pack(period, next)),
                    _ => None,
                }
            });

        match reserved {
            Ok(_) => {
                debug!(project_id = %project.id, cost, "Quota reserved");
                Ok(QuotaReservation {
                    project_id: project.id,
                    counter,
                    metered: Some((period, policy)),
                    reserved: cost,
                    settled: false,
                })
            }
            Err(state) => {
                let (stored, used) = unpack(state);
                let used = if stored == period { used } else { 0 };
                warn!(project_id = %project.id, used, limit = policy.limit, "Quota exceeded");
                Err(QuotaError::Exceeded {
                    project_id: project.id,
                    used,
                    limit: policy.limit,
                    resets_at: policy.period.next_boundary(now),
                })
            }
        }
    }

    pub fn usage(&self, project: &Project) -> QuotaUsage {
        let counter = self.counters.get(&project.id).map(|c| c.value().clone());
        let total_used = counter
            .as_ref()
            .map(|c| c.total_used.load(Ordering::Acquire))
            .unwrap_or(0);
        match project.quota {
            Some(policy) => {
                let now = self.clock.now();
                let used = counter
                    .map(|c| c.used_in(policy.period.index(now)))
                    .unwrap_or(0);
                QuotaUsage {
                    used,
                    limit: Some(policy.limit),
                    remaining: Some(policy.limit.saturating_sub(used)),
                    resets_at: Some(policy.period.next_boundary(now)),
                    total_used,
                }
            }
            None => QuotaUsage {
                used: 0,
                limit: None,
                remaining: None,
                resets_at: None,
                total_used,
            },
        }
    }

    pub fn total_used(&self, project_id: ProjectId) -> u64 {
        self.counters
            .get(&project_id)
            .map(|c| c.total_used.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

/// Units held against a Project's budget.
///
/// Dropping an uncommitted reservation refunds it, so an early return or a
/// cancelled request never charges the Project.
#[must_use = "an uncommitted reservation is refunded on drop"]
pub struct QuotaReservation {
    project_id: ProjectId,
    counter: Arc<ProjectCounter>,
    metered: Option<(u32, QuotaPolicy)>,
    reserved: u32,
    settled: bool,
}

impl std::fmt::Debug for QuotaReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaReservation")
            .field("project_id", &self.project_id)
            .field("reserved", &self.reserved)
            .field("metered", &self.metered.is_some())
            .finish()
    }
}

impl QuotaReservation {
    fn unmetered(project_id: ProjectId, counter: Arc<ProjectCounter>, cost: u32) -> Self {
        Self {
            project_id,
            counter,
            metered: None,
            reserved: cost,
            settled: false,
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Record the actual cost. Extra units beyond the reservation are only
    /// taken while budget remains. Returns the committed units.
    pub fn commit(mut self, actual: u32) -> u32 {
        self.settled = true;
        let committed = match self.metered {
            None => actual,
            Some((period, policy)) => {
                if actual < self.reserved {
                    self.counter.refund(period, self.reserved - actual);
                    actual
                } else {
                    let extra = self
                        .counter
                        .add_capped(period, actual - self.reserved, policy.limit);
                    self.reserved + extra
                }
            }
        };
        self.counter
            .total_used
            .fetch_add(u64::from(committed), Ordering::AcqRel);
        debug!(project_id = %self.project_id, committed, "Quota committed");
        committed
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some((period, _)) = self.metered {
            self.counter.refund(period, self.reserved);
            debug!(project_id = %self.project_id, refunded = self.reserved, "Quota reservation released");
        }
    }
}
