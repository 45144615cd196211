//! Bandwidth reclamation: lets a CBS server absorb capacity an early
//! completion or the system's spare bandwidth would otherwise waste.
//!
//! Three policies, selected per [`crate::algo::edf_scheduler::EdfScheduler`]
//! instance:
//! - [`NoReclaim`]: textbook CBS, no reclamation.
//! - [`Grub`]: scales virtual-time progression by the active bandwidth
//!   ratio and keeps early-completing servers `NonContending` so they
//!   continue reclaiming until their deadline.
//! - [`Cash`]: banks the budget left over at an early completion in a
//!   shared capacity queue, spent by the next server that exhausts its own
//!   budget instead of postponing its deadline.

use std::collections::VecDeque;

use crate::core::time::{Duration, TimePoint};

use super::cbs_server::CbsServer;

pub trait ReclamationPolicy {
    fn name(&self) -> &'static str;

    /// Extra budget to grant a server whose budget just hit zero, instead
    /// of the standard deadline-postponement path. `Duration::ZERO` means
    /// "no reclaimed capacity available, postpone as usual".
    fn extra_budget_on_exhaustion(&mut self, server: &CbsServer, now: TimePoint) -> Duration;

    /// Whether a server that completed its job with budget to spare should
    /// become `NonContending` (continuing to reclaim until its deadline)
    /// rather than going `Inactive` immediately.
    fn should_enter_non_contending_on_early_completion(&self, server: &CbsServer) -> bool;

    /// Let a server that completed early donate its leftover budget back to
    /// the policy (CASH's capacity queue; a no-op for policies that don't
    /// bank leftover budget).
    fn notify_early_completion(&mut self, leftover_budget: Duration, expires_at: TimePoint) {
        let _ = (leftover_budget, expires_at);
    }

    /// Override the standard `vt += exec/U` virtual-time update. `None`
    /// means "use the server's own formula".
    fn compute_virtual_time(&self, server: &CbsServer, executed: Duration) -> Option<TimePoint>;

    /// Told whenever the sum of utilizations of all Ready/Running/
    /// NonContending servers changes (and given the scheduler's processor
    /// count `m`, which GRUB's virtual-time formula also needs), so that
    /// rate-proportional policies can rescale.
    fn notify_active_utilization(&mut self, active_utilization: f64, processor_count: usize) {
        let _ = (active_utilization, processor_count);
    }
}

pub struct NoReclaim;

impl ReclamationPolicy for NoReclaim {
    fn name(&self) -> &'static str {
        "none"
    }

    fn extra_budget_on_exhaustion(&mut self, _server: &CbsServer, _now: TimePoint) -> Duration {
        Duration::ZERO
    }

    fn should_enter_non_contending_on_early_completion(&self, _server: &CbsServer) -> bool {
        false
    }

    fn compute_virtual_time(&self, _server: &CbsServer, _executed: Duration) -> Option<TimePoint> {
        None
    }
}

/// Greedy Reclamation of Unused Bandwidth: servers progress their virtual
/// time proportionally to the ratio of their own bandwidth to the system's
/// currently active bandwidth, so idle reservation capacity is reclaimed by
/// whoever is running.
pub struct Grub {
    active_utilization: f64,
    processor_count: usize,
}

impl Grub {
    pub fn new() -> Self {
        Self { active_utilization: 0.0, processor_count: 1 }
    }
}

impl Default for Grub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReclamationPolicy for Grub {
    fn name(&self) -> &'static str {
        "grub"
    }

    fn extra_budget_on_exhaustion(&mut self, _server: &CbsServer, _now: TimePoint) -> Duration {
        Duration::ZERO
    }

    fn should_enter_non_contending_on_early_completion(&self, _server: &CbsServer) -> bool {
        true
    }

    fn compute_virtual_time(&self, server: &CbsServer, executed: Duration) -> Option<TimePoint> {
        let m = self.processor_count.max(1) as f64;
        let rate = self.active_utilization / m;
        Some(server.virtual_time() + Duration::from_seconds(executed.as_seconds() * rate))
    }

    fn notify_active_utilization(&mut self, active_utilization: f64, processor_count: usize) {
        self.active_utilization = active_utilization;
        self.processor_count = processor_count.max(1);
    }
}

struct CapacityEntry {
    amount: Duration,
    expires_at: TimePoint,
}

/// CApacity SHaring: an early-completing server donates its unused budget
/// to a shared FIFO queue; the next server to exhaust its own budget draws
/// from that queue instead of postponing its deadline. Donated capacity
/// that outlives the donor's original deadline is discarded.
pub struct Cash {
    capacity_queue: VecDeque<CapacityEntry>,
}

impl Cash {
    pub fn new() -> Self {
        Self { capacity_queue: VecDeque::new() }
    }

    fn evict_expired(&mut self, now: TimePoint) {
        while let Some(front) = self.capacity_queue.front() {
            if front.expires_at < now {
                self.capacity_queue.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for Cash {
    fn default() -> Self {
        Self::new()
    }
}

impl ReclamationPolicy for Cash {
    fn name(&self) -> &'static str {
        "cash"
    }

    fn extra_budget_on_exhaustion(&mut self, _server: &CbsServer, now: TimePoint) -> Duration {
        self.evict_expired(now);
        match self.capacity_queue.pop_front() {
            Some(entry) => entry.amount,
            None => Duration::ZERO,
        }
    }

    fn should_enter_non_contending_on_early_completion(&self, _server: &CbsServer) -> bool {
        false
    }

    fn notify_early_completion(&mut self, leftover_budget: Duration, expires_at: TimePoint) {
        if leftover_budget.is_positive() {
            self.capacity_queue.push_back(CapacityEntry { amount: leftover_budget, expires_at });
        }
    }

    fn compute_virtual_time(&self, _server: &CbsServer, _executed: Duration) -> Option<TimePoint> {
        None
    }
}

pub mod prelude {
    pub use super::{Cash, Grub, NoReclaim, ReclamationPolicy};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::cbs_server::{CbsServer, OverrunPolicy, ServerId};
    use crate::core::job::TaskId;

    fn server() -> CbsServer {
        let mut s = CbsServer::new(ServerId(0), TaskId(0), Duration::from_seconds(2.0), Duration::from_seconds(10.0), OverrunPolicy::Queue);
        s.activate(TimePoint::ZERO);
        s.dispatch();
        s
    }

    #[test]
    fn grub_scales_virtual_time_by_active_bandwidth_share() {
        // active_bw=2.0 over m=4 processors -> rate 0.5, so 1s of execution
        // advances virtual time by 0.5s (less than wall-clock, the reclaim).
        let mut policy = Grub::new();
        policy.notify_active_utilization(2.0, 4);
        let s = server();
        let vt = policy.compute_virtual_time(&s, Duration::from_seconds(1.0)).unwrap();
        assert!((vt.as_seconds() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn cash_reclaims_donated_budget_once() {
        let mut policy = Cash::new();
        policy.notify_early_completion(Duration::from_seconds(0.5), TimePoint::from_seconds(100.0));
        let s = server();
        let extra = policy.extra_budget_on_exhaustion(&s, TimePoint::from_seconds(1.0));
        assert_eq!(extra.as_seconds(), 0.5);
        let extra_again = policy.extra_budget_on_exhaustion(&s, TimePoint::from_seconds(1.0));
        assert_eq!(extra_again.as_seconds(), 0.0);
    }

    #[test]
    fn cash_discards_expired_donations() {
        let mut policy = Cash::new();
        policy.notify_early_completion(Duration::from_seconds(0.5), TimePoint::from_seconds(5.0));
        let s = server();
        let extra = policy.extra_budget_on_exhaustion(&s, TimePoint::from_seconds(10.0));
        assert_eq!(extra.as_seconds(), 0.0);
    }
}
