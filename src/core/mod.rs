pub mod prelude {
    pub use super::engine::prelude::*;
    pub use super::error::InvalidStateError;
    pub use super::job::{Job, JobId, Task, TaskId};
    pub use super::platform::{
        ClockDomain, ClockDomainId, CStateLevel, CStateScope, Platform, PlatformBuilder,
        PowerCoefficients, PowerDomain, PowerDomainId, ProcessorSpec, ProcessorType,
        ProcessorTypeId,
    };
    pub use super::processor::{Processor, ProcessorId, ProcessorState};
    pub use super::time::{Duration, Energy, Frequency, Power, TimePoint, ZERO_EPSILON};
}

pub mod engine;
pub mod error;
pub mod job;
pub mod platform;
pub mod processor;
pub mod time;
