//! Dynamic Power Management: decides whether and how deep an idle processor
//! should sleep. Separate from DVFS — DPM acts on individual processors'
//! C-states, DVFS acts on a clock domain's frequency.

use crate::core::platform::{ClockDomain, PowerDomain};
use crate::core::time::{Duration, ZERO_EPSILON};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DpmDecision {
    pub level: u32,
    /// How long the processor must stay idle before this decision is
    /// applied — lets the scheduler arm a single delayed timer rather than
    /// acting the instant the processor goes idle.
    pub after: Duration,
}

pub trait DpmPolicy {
    fn name(&self) -> &'static str;

    /// Called whenever a processor becomes idle, with the processor's own
    /// power and clock domains. Returning `None` leaves the processor in C0.
    fn decide_sleep(&self, power_domain: &PowerDomain, clock_domain: &ClockDomain) -> Option<DpmDecision>;
}

/// Commits directly to the deepest available sleep state once a processor
/// has been idle for `idle_delay` — unless its clock domain is pinned at
/// peak frequency (another core sharing the domain still needs it), in
/// which case the processor is kept active instead.
pub struct BasicDpm {
    pub idle_delay: Duration,
}

impl BasicDpm {
    pub fn new(idle_delay: Duration) -> Self {
        Self { idle_delay }
    }
}

impl DpmPolicy for BasicDpm {
    fn name(&self) -> &'static str {
        "basic-dpm"
    }

    fn decide_sleep(&self, power_domain: &PowerDomain, clock_domain: &ClockDomain) -> Option<DpmDecision> {
        if clock_domain.current_frequency().as_mhz() + ZERO_EPSILON >= clock_domain.freq_max.as_mhz() {
            return None;
        }
        power_domain.deepest_sleep_state().map(|c_state| DpmDecision { level: c_state.level, after: self.idle_delay })
    }
}

pub mod prelude {
    pub use super::{BasicDpm, DpmDecision, DpmPolicy};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::{CStateLevel, PlatformBuilder, PowerCoefficients, Power};
    use crate::core::time::Frequency;

    fn platform_with_initial_frequency(initial: Frequency) -> (crate::core::platform::Platform, crate::core::platform::ClockDomainId, crate::core::platform::PowerDomainId) {
        let mut b = PlatformBuilder::new();
        let ptype = b.add_processor_type("core", 1.0, Duration::ZERO);
        let domain = b
            .add_clock_domain(
                Frequency::mhz(600.0),
                Frequency::mhz(2400.0),
                initial,
                None,
                None,
                PowerCoefficients { c0: 0.0, c1: 0.0, c2: 0.0, c3: 0.0 },
                Duration::ZERO,
                false,
            )
            .unwrap();
        let pd = b.add_power_domain(vec![
            CStateLevel {
                level: 1,
                scope: crate::core::platform::CStateScope::PerProcessor,
                wake_latency: Duration::from_seconds(0.001),
                sleep_power: Power::mw(50.0),
            },
            CStateLevel {
                level: 2,
                scope: crate::core::platform::CStateScope::PerProcessor,
                wake_latency: Duration::from_seconds(0.01),
                sleep_power: Power::mw(5.0),
            },
        ]);
        b.add_processor(ptype, domain, pd).unwrap();
        let platform = b.finalize().unwrap();
        (platform, domain, pd)
    }

    #[test]
    fn basic_dpm_picks_deepest_state_below_peak() {
        let (platform, domain, pd) = platform_with_initial_frequency(Frequency::mhz(1200.0));
        let dpm = BasicDpm::new(Duration::from_seconds(0.0005));
        let decision = dpm.decide_sleep(platform.power_domain(pd), platform.clock_domain(domain)).unwrap();
        assert_eq!(decision.level, 2);
    }

    #[test]
    fn basic_dpm_skips_sleep_at_peak_frequency() {
        let (platform, domain, pd) = platform_with_initial_frequency(Frequency::mhz(2400.0));
        let dpm = BasicDpm::new(Duration::from_seconds(0.0005));
        assert!(dpm.decide_sleep(platform.power_domain(pd), platform.clock_domain(domain)).is_none());
    }
}
