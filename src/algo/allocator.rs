//! Where a newly admitted task's server is placed when more than one EDF
//! scheduler (cluster) exists. Cluster-selection *policy* is out of scope
//! for this engine — only the boundary a caller plugs a policy into.

use super::edf_scheduler::EdfScheduler;
use super::error::AdmissionError;

pub trait Allocator {
    /// Pick the index (into `schedulers`) of the cluster a server with
    /// `utilization` should be admitted to.
    fn select_cluster(&mut self, utilization: f64, schedulers: &[EdfScheduler]) -> Result<usize, AdmissionError>;
}

/// The common case: exactly one scheduler, one cluster.
pub struct SingleSchedulerAllocator;

impl Allocator for SingleSchedulerAllocator {
    fn select_cluster(&mut self, utilization: f64, schedulers: &[EdfScheduler]) -> Result<usize, AdmissionError> {
        match schedulers.first() {
            Some(scheduler) if scheduler.can_admit(utilization) => Ok(0),
            Some(scheduler) => Err(AdmissionError {
                requested_utilization: utilization,
                current_utilization: scheduler.utilization(),
                capacity: scheduler.processor_count() as f64,
            }),
            None => Err(AdmissionError { requested_utilization: utilization, current_utilization: 0.0, capacity: 0.0 }),
        }
    }
}

/// Picks the first cluster with enough spare capacity.
pub struct FirstFitAllocator;

impl Allocator for FirstFitAllocator {
    fn select_cluster(&mut self, utilization: f64, schedulers: &[EdfScheduler]) -> Result<usize, AdmissionError> {
        schedulers
            .iter()
            .position(|s| s.can_admit(utilization))
            .ok_or_else(|| {
                let (current_utilization, capacity) = schedulers
                    .iter()
                    .map(|s| (s.utilization(), s.processor_count() as f64))
                    .fold((0.0, 0.0), |acc, x| if x.1 - x.0 > acc.1 - acc.0 { x } else { acc });
                AdmissionError { requested_utilization: utilization, current_utilization, capacity }
            })
    }
}

pub mod prelude {
    pub use super::{Allocator, FirstFitAllocator, SingleSchedulerAllocator};
}
