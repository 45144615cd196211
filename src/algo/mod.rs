//! Scheduling policy layer built on top of `core`'s platform model and
//! discrete-event engine: CBS servers, bandwidth reclamation, DVFS/DPM power
//! policies, admission control, and the `EdfScheduler` that ties them all
//! together into a runnable simulation.

pub mod prelude {
    pub use super::allocator::{Allocator, FirstFitAllocator, SingleSchedulerAllocator};
    pub use super::cbs_server::{CbsServer, OverrunPolicy, ServerId, State as CbsState};
    pub use super::dpm::{BasicDpm, DpmDecision, DpmPolicy};
    pub use super::dvfs::{Csf, DvfsDecision, DvfsPolicy, Ffa, PowerAware};
    pub use super::edf_scheduler::{DeadlineMissPolicy, EdfScheduler};
    pub use super::error::{AdmissionError, AdmissionTest};
    pub use super::reclamation::{Cash, Grub, NoReclaim, ReclamationPolicy};
}

pub mod allocator;
pub mod cbs_server;
pub mod dpm;
pub mod dvfs;
pub mod edf_scheduler;
pub mod error;
pub mod reclamation;
