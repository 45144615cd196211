//! Collaborator boundary: everything the core event engine treats as "the
//! outside world" — platform/scenario JSON loading, trace emission, and
//! scenario generation (UUniFast). None of these are consulted by
//! `schedsim_algo::edf_scheduler::EdfScheduler`'s dispatch path; it only
//! ever sees the `crate::core::engine::TraceWriter` trait object it is
//! handed.

pub mod prelude {
    pub use super::error::LoaderError;
    pub use super::platform_loader::{load_platform, load_platform_from_str};
    pub use super::scenario::{ScenarioFile, ScenarioJob, ScenarioTask, load_scenario, load_scenario_from_str};
    pub use super::scenario_gen::{ScenarioGenParams, UuniFastError, generate_scenario, uunifast_discard};
    pub use super::trace::{JsonTraceWriter, TextTraceWriter};
}

pub mod error;
pub mod platform_loader;
pub mod scenario;
pub mod scenario_gen;
pub mod trace;
