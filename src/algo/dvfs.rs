//! Dynamic Voltage and Frequency Scaling policies.
//!
//! Every policy reduces to the same shape: given the system's active
//! utilization, the single highest individual server utilization, and the
//! processor count, decide a target frequency and how many processors
//! should stay active (the rest are candidates for DPM sleep).
//! `compute_target` is the pure, side-effect-free core formula (`pub(crate)`
//! rather than private so tests can drive it directly with hand-picked
//! utilization values, the way the original test suite exposed it through a
//! test-only subclass); the scheduler applies the cooldown gate and commits
//! the decision.

use crate::core::platform::ClockDomain;
use crate::core::time::{Duration, Frequency, ZERO_EPSILON};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DvfsDecision {
    pub frequency: Frequency,
    pub active_processors: usize,
}

pub trait DvfsPolicy {
    fn name(&self) -> &'static str;

    /// Minimum time between two frequency changes on the same domain.
    fn cooldown(&self) -> Duration;

    fn compute_target(&self, active_utilization: f64, max_utilization: f64, total_processors: usize, domain: &ClockDomain) -> DvfsDecision;
}

/// `⌈m · f_min / freq_eff⌉`, clamped to `[1, m]`.
fn active_processors_at_freq_eff(f_min_mhz: f64, freq_eff_mhz: f64, m: usize) -> usize {
    ((m as f64 * f_min_mhz).max(0.0) / freq_eff_mhz).ceil().clamp(1.0, m as f64) as usize
}

/// Chooses the lowest frequency satisfying `Σ U_i · (f_max/f_min) ≤ m`, i.e.
/// `f_min = f_max · active_utilization / m`, and keeps every processor
/// active.
pub struct PowerAware {
    pub cooldown: Duration,
}

impl PowerAware {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub(crate) fn compute_target(&self, active_utilization: f64, _max_utilization: f64, total_processors: usize, domain: &ClockDomain) -> DvfsDecision {
        let m = total_processors.max(1);
        let f_min = Frequency::mhz(domain.freq_max.as_mhz() * active_utilization / m as f64);
        let frequency = domain.round_up(f_min.max(domain.freq_min));
        DvfsDecision { frequency, active_processors: m }
    }
}

impl DvfsPolicy for PowerAware {
    fn name(&self) -> &'static str {
        "power-aware"
    }

    fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn compute_target(&self, active_utilization: f64, max_utilization: f64, total_processors: usize, domain: &ClockDomain) -> DvfsDecision {
        PowerAware::compute_target(self, active_utilization, max_utilization, total_processors, domain)
    }
}

/// Feedback-based Frequency Adaptation:
/// `f_min = f_max · (U_active + (m−1)·U_max) / m`. If that falls below the
/// domain's efficient frequency, runs at `freq_eff` instead and drops
/// `active = ⌈m · f_min / freq_eff⌉` processors (the rest go to DPM sleep);
/// otherwise uses all `m` processors at the ceiled mode.
pub struct Ffa {
    pub cooldown: Duration,
}

impl Ffa {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub(crate) fn compute_target(&self, active_utilization: f64, max_utilization: f64, total_processors: usize, domain: &ClockDomain) -> DvfsDecision {
        let m = total_processors.max(1);
        let f_min = domain.freq_max.as_mhz() * (active_utilization + (m as f64 - 1.0) * max_utilization) / m as f64;

        match domain.freq_eff {
            Some(freq_eff) if f_min < freq_eff.as_mhz() => {
                let active = active_processors_at_freq_eff(f_min, freq_eff.as_mhz(), m);
                DvfsDecision { frequency: domain.round_up(freq_eff.max(domain.freq_min)), active_processors: active }
            }
            _ => {
                let frequency = domain.round_up(Frequency::mhz(f_min).max(domain.freq_min));
                DvfsDecision { frequency, active_processors: m }
            }
        }
    }
}

impl DvfsPolicy for Ffa {
    fn name(&self) -> &'static str {
        "ffa"
    }

    fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn compute_target(&self, active_utilization: f64, max_utilization: f64, total_processors: usize, domain: &ClockDomain) -> DvfsDecision {
        Ffa::compute_target(self, active_utilization, max_utilization, total_processors, domain)
    }
}

/// Cluster Sleep Frequency: first picks the minimum number of active cores
/// `m_min = ⌈(U_active − U_max) / (1 − U_max)⌉` (clamped to `[1, m]`; a
/// server with `U_max ≥ 1` forces `m_min = m`), then applies FFA's frequency
/// formula over that narrower core count. Trades cores for frequency more
/// aggressively than FFA since it shrinks the active set before computing
/// the frequency, rather than only as a fallback.
pub struct Csf {
    pub cooldown: Duration,
}

impl Csf {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub(crate) fn compute_target(&self, active_utilization: f64, max_utilization: f64, total_processors: usize, domain: &ClockDomain) -> DvfsDecision {
        let m = total_processors.max(1);

        let m_min = if max_utilization >= 1.0 - ZERO_EPSILON {
            m
        } else {
            (((active_utilization - max_utilization) / (1.0 - max_utilization)).ceil() as i64).clamp(1, m as i64) as usize
        };

        let f_min = domain.freq_max.as_mhz() * (active_utilization + (m_min as f64 - 1.0) * max_utilization) / m_min as f64;

        match domain.freq_eff {
            Some(freq_eff) if f_min < freq_eff.as_mhz() => {
                let active = active_processors_at_freq_eff(f_min, freq_eff.as_mhz(), m_min);
                DvfsDecision { frequency: domain.round_up(freq_eff.max(domain.freq_min)), active_processors: active }
            }
            _ => {
                let frequency = domain.round_up(Frequency::mhz(f_min).max(domain.freq_min));
                DvfsDecision { frequency, active_processors: m_min }
            }
        }
    }
}

impl DvfsPolicy for Csf {
    fn name(&self) -> &'static str {
        "csf"
    }

    fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn compute_target(&self, active_utilization: f64, max_utilization: f64, total_processors: usize, domain: &ClockDomain) -> DvfsDecision {
        Csf::compute_target(self, active_utilization, max_utilization, total_processors, domain)
    }
}

pub mod prelude {
    pub use super::{Csf, DvfsDecision, DvfsPolicy, Ffa, PowerAware};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::PowerCoefficients;

    fn domain(freq_eff: Option<Frequency>) -> ClockDomain {
        let mut b = crate::core::platform::PlatformBuilder::new();
        let id = b
            .add_clock_domain(
                Frequency::mhz(200.0),
                Frequency::mhz(2000.0),
                Frequency::mhz(2000.0),
                Some(vec![
                    Frequency::mhz(200.0),
                    Frequency::mhz(500.0),
                    Frequency::mhz(800.0),
                    Frequency::mhz(1000.0),
                    Frequency::mhz(1500.0),
                    Frequency::mhz(2000.0),
                ]),
                freq_eff,
                PowerCoefficients { c0: 0.0, c1: 0.0, c2: 0.0, c3: 0.0 },
                Duration::ZERO,
                false,
            )
            .unwrap();
        let ptype = b.add_processor_type("core", 1.0, Duration::ZERO);
        let pd = b.add_power_domain(vec![]);
        b.add_processor(ptype, id, pd).unwrap();
        let platform = b.finalize().unwrap();
        platform.clock_domain(id).clone()
    }

    #[test]
    fn csf_high_utilization_all_cores_max_freq() {
        let csf = Csf::new(Duration::ZERO);
        let d = domain(Some(Frequency::mhz(1000.0)));
        // 4 tasks of utilization 1.0 each: active=4, max=1.0 -> m_min=4, f_min=2000
        let decision = csf.compute_target(4.0, 1.0, 4, &d);
        assert_eq!(decision.active_processors, 4);
        assert_eq!(decision.frequency.as_mhz(), 2000.0);
    }

    #[test]
    fn csf_medium_utilization_reduces_cores_keeps_all_freq_above_eff() {
        let csf = Csf::new(Duration::ZERO);
        let d = domain(Some(Frequency::mhz(1000.0)));
        // 2 tasks of 0.3 each: active=0.6, max=0.3 -> m_min=ceil(0.3/0.7)=1, f_min=1200 -> mode 1500
        let decision = csf.compute_target(0.6, 0.3, 4, &d);
        assert_eq!(decision.active_processors, 1);
        assert_eq!(decision.frequency.as_mhz(), 1500.0);
    }

    #[test]
    fn csf_max_util_one_avoids_zero_division() {
        let csf = Csf::new(Duration::ZERO);
        let d = domain(Some(Frequency::mhz(1000.0)));
        let decision = csf.compute_target(1.0, 1.0, 4, &d);
        assert_eq!(decision.active_processors, 4);
    }

    #[test]
    fn ffa_low_utilization_drops_below_freq_eff_reduces_cores() {
        let ffa = Ffa::new(Duration::ZERO);
        let d = domain(Some(Frequency::mhz(1000.0)));
        // 1 task util=0.1: active=0.1, max=0.1, m=4 -> f_min = 2000*(0.1+3*0.1)/4 = 200
        // 200 < freq_eff(1000) -> freq_eff, active = ceil(4*200/1000) = 1
        let decision = ffa.compute_target(0.1, 0.1, 4, &d);
        assert_eq!(decision.frequency.as_mhz(), 1000.0);
        assert_eq!(decision.active_processors, 1);
    }

    #[test]
    fn ffa_high_utilization_uses_all_cores() {
        let ffa = Ffa::new(Duration::ZERO);
        let d = domain(Some(Frequency::mhz(1000.0)));
        let decision = ffa.compute_target(4.0, 1.0, 4, &d);
        assert_eq!(decision.active_processors, 4);
        assert_eq!(decision.frequency.as_mhz(), 2000.0);
    }

    #[test]
    fn csf_uses_fewer_or_equal_cores_than_ffa_same_workload() {
        let d = domain(Some(Frequency::mhz(1000.0)));
        let ffa_decision = Ffa::new(Duration::ZERO).compute_target(0.6, 0.3, 4, &d);
        let csf_decision = Csf::new(Duration::ZERO).compute_target(0.6, 0.3, 4, &d);
        assert!(csf_decision.active_processors <= ffa_decision.active_processors);
    }

    #[test]
    fn power_aware_scales_frequency_linearly_with_active_utilization() {
        let pa = PowerAware::new(Duration::ZERO);
        let d = domain(None);
        // active_utilization=2.0, m=4 -> f_min = 2000*2/4 = 1000
        let decision = pa.compute_target(2.0, 1.0, 4, &d);
        assert_eq!(decision.frequency.as_mhz(), 1000.0);
        assert_eq!(decision.active_processors, 4);
    }
}
