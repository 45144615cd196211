//! Static description of the hardware the scheduler runs on: processor
//! types, clock domains (frequency scaling) and power domains (C-states).
//!
//! Built incrementally through [`PlatformBuilder`] and frozen by
//! [`PlatformBuilder::finalize`] into an immutable [`Platform`] — the
//! engine never mutates the catalog of types/domains after that point, only
//! the live frequency each domain is currently running at.

use super::time::{Duration, Frequency, Power};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorTypeId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockDomainId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PowerDomainId(pub usize);

#[derive(Clone, Debug)]
pub struct ProcessorType {
    pub name: String,
    pub performance: f64,
    pub context_switch_delay: Duration,
}

/// Whether a C-state's effect (and therefore its wake latency and sleep
/// power) applies to a single processor independently, or to every
/// processor sharing the power domain at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CStateScope {
    #[default]
    PerProcessor,
    DomainWide,
}

#[derive(Clone, Copy, Debug)]
pub struct CStateLevel {
    pub level: u32,
    pub scope: CStateScope,
    pub wake_latency: Duration,
    pub sleep_power: Power,
}

#[derive(Clone, Debug)]
pub struct PowerDomain {
    pub c_states: Vec<CStateLevel>,
}

impl PowerDomain {
    pub fn c_state(&self, level: u32) -> Option<&CStateLevel> {
        self.c_states.iter().find(|c| c.level == level)
    }

    pub fn c_states(&self) -> &[CStateLevel] {
        &self.c_states
    }

    /// The deepest (highest-numbered) sleep state available, excluding C0.
    pub fn deepest_sleep_state(&self) -> Option<&CStateLevel> {
        self.c_states.iter().filter(|c| c.level > 0).max_by_key(|c| c.level)
    }
}

/// Power coefficients for `P(f) = c0 + c1*f + c2*f^2 + c3*f^3`, `f` in GHz.
#[derive(Clone, Copy, Debug)]
pub struct PowerCoefficients {
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
}

#[derive(Clone, Debug)]
pub struct ClockDomain {
    pub freq_min: Frequency,
    pub freq_max: Frequency,
    pub frequency_modes: Option<Vec<Frequency>>,
    pub freq_eff: Option<Frequency>,
    pub power: PowerCoefficients,
    pub transition_delay: Duration,
    pub locked: bool,
    current_frequency: Frequency,
}

impl ClockDomain {
    pub fn current_frequency(&self) -> Frequency {
        self.current_frequency
    }

    pub fn power_at(&self, freq: Frequency) -> Power {
        let f = freq.as_ghz();
        let PowerCoefficients { c0, c1, c2, c3 } = self.power;
        Power::mw(c0 + c1 * f + c2 * f.powi(2) + c3 * f.powi(3))
    }

    /// Round a requested frequency UP to the next available mode. Without a
    /// discrete mode table the domain is continuously adjustable between
    /// `freq_min` and `freq_max`.
    pub fn round_up(&self, requested: Frequency) -> Frequency {
        let clamped = Frequency::mhz(requested.as_mhz().clamp(self.freq_min.as_mhz(), self.freq_max.as_mhz()));
        match &self.frequency_modes {
            None => clamped,
            Some(modes) => modes
                .iter()
                .copied()
                .find(|m| m.as_mhz() + 1e-9 >= clamped.as_mhz())
                .unwrap_or(self.freq_max),
        }
    }

    fn set_current(&mut self, freq: Frequency) {
        self.current_frequency = freq;
    }
}

/// One processor's static wiring: which type, clock domain and power domain
/// it belongs to. Runtime state (`core::processor::Processor`) is
/// constructed from these by the scheduler that owns the simulation.
#[derive(Clone, Copy, Debug)]
pub struct ProcessorSpec {
    pub processor_type: ProcessorTypeId,
    pub clock_domain: ClockDomainId,
    pub power_domain: PowerDomainId,
}

pub struct Platform {
    processor_types: Vec<ProcessorType>,
    clock_domains: Vec<ClockDomain>,
    power_domains: Vec<PowerDomain>,
    processors: Vec<ProcessorSpec>,
}

impl Platform {
    pub fn processor_types(&self) -> &[ProcessorType] {
        &self.processor_types
    }

    pub fn clock_domains(&self) -> &[ClockDomain] {
        &self.clock_domains
    }

    pub fn clock_domain(&self, id: ClockDomainId) -> &ClockDomain {
        &self.clock_domains[id.0]
    }

    pub fn clock_domain_mut(&mut self, id: ClockDomainId) -> &mut ClockDomain {
        &mut self.clock_domains[id.0]
    }

    pub fn power_domain(&self, id: PowerDomainId) -> &PowerDomain {
        &self.power_domains[id.0]
    }

    pub fn processors(&self) -> &[ProcessorSpec] {
        &self.processors
    }

    pub fn processor_type(&self, id: ProcessorTypeId) -> &ProcessorType {
        &self.processor_types[id.0]
    }

    /// Highest performance score across all processor types: the reference
    /// used to normalize every processor's `speed()` to `[0, 1]`.
    pub fn reference_performance(&self) -> f64 {
        self.processor_types
            .iter()
            .map(|t| ordered_float::OrderedFloat(t.performance))
            .max()
            .map(|m| m.into_inner())
            .unwrap_or(1.0)
    }

    /// Relative execution speed of a processor at its clock domain's
    /// current frequency, normalized against the fastest processor type at
    /// its domain's max frequency.
    pub fn speed(&self, spec: &ProcessorSpec) -> f64 {
        let domain = self.clock_domain(spec.clock_domain);
        let ptype = self.processor_type(spec.processor_type);
        (domain.current_frequency().as_mhz() / domain.freq_max.as_mhz())
            * (ptype.performance / self.reference_performance())
    }

    /// Set a clock domain's frequency, rounding up to the nearest available
    /// mode, and return the frequency actually applied.
    pub fn set_frequency(&mut self, id: ClockDomainId, requested: Frequency) -> Frequency {
        let domain = self.clock_domain_mut(id);
        let applied = domain.round_up(requested);
        domain.set_current(applied);
        applied
    }
}

#[derive(Default)]
pub struct PlatformBuilder {
    processor_types: Vec<ProcessorType>,
    clock_domains: Vec<ClockDomain>,
    power_domains: Vec<PowerDomain>,
    processors: Vec<ProcessorSpec>,
}

impl PlatformBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_processor_type(&mut self, name: impl Into<String>, performance: f64, context_switch_delay: Duration) -> ProcessorTypeId {
        let id = ProcessorTypeId(self.processor_types.len());
        self.processor_types.push(ProcessorType { name: name.into(), performance, context_switch_delay });
        id
    }

    pub fn add_clock_domain(
        &mut self,
        freq_min: Frequency,
        freq_max: Frequency,
        initial_frequency: Frequency,
        frequency_modes: Option<Vec<Frequency>>,
        freq_eff: Option<Frequency>,
        power: PowerCoefficients,
        transition_delay: Duration,
        locked: bool,
    ) -> anyhow::Result<ClockDomainId> {
        if freq_min.as_mhz() > freq_max.as_mhz() {
            anyhow::bail!("clock domain freq_min {:?} exceeds freq_max {:?}", freq_min, freq_max);
        }
        let id = ClockDomainId(self.clock_domains.len());
        self.clock_domains.push(ClockDomain {
            freq_min,
            freq_max,
            frequency_modes,
            freq_eff,
            power,
            transition_delay,
            locked,
            current_frequency: initial_frequency,
        });
        Ok(id)
    }

    pub fn add_power_domain(&mut self, mut c_states: Vec<CStateLevel>) -> PowerDomainId {
        if !c_states.iter().any(|c| c.level == 0) {
            c_states.insert(
                0,
                CStateLevel { level: 0, scope: CStateScope::PerProcessor, wake_latency: Duration::ZERO, sleep_power: Power::mw(0.0) },
            );
        }
        let id = PowerDomainId(self.power_domains.len());
        self.power_domains.push(PowerDomain { c_states });
        id
    }

    pub fn add_processor(
        &mut self,
        processor_type: ProcessorTypeId,
        clock_domain: ClockDomainId,
        power_domain: PowerDomainId,
    ) -> anyhow::Result<usize> {
        if processor_type.0 >= self.processor_types.len() {
            anyhow::bail!("unknown processor type {processor_type:?}");
        }
        if clock_domain.0 >= self.clock_domains.len() {
            anyhow::bail!("unknown clock domain {clock_domain:?}");
        }
        if power_domain.0 >= self.power_domains.len() {
            anyhow::bail!("unknown power domain {power_domain:?}");
        }
        let idx = self.processors.len();
        self.processors.push(ProcessorSpec { processor_type, clock_domain, power_domain });
        Ok(idx)
    }

    pub fn finalize(self) -> anyhow::Result<Platform> {
        if self.processors.is_empty() {
            anyhow::bail!("platform must declare at least one processor");
        }
        Ok(Platform {
            processor_types: self.processor_types,
            clock_domains: self.clock_domains,
            power_domains: self.power_domains,
            processors: self.processors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_single_core_platform() -> Platform {
        let mut b = PlatformBuilder::new();
        let ptype = b.add_processor_type("core", 1.0, Duration::from_seconds(0.0001));
        let domain = b
            .add_clock_domain(
                Frequency::mhz(600.0),
                Frequency::mhz(2400.0),
                Frequency::mhz(2400.0),
                None,
                Some(Frequency::mhz(1800.0)),
                PowerCoefficients { c0: 10.0, c1: 5.0, c2: 2.0, c3: 1.0 },
                Duration::from_seconds(0.00002),
                false,
            )
            .unwrap();
        let power_domain = b.add_power_domain(vec![]);
        b.add_processor(ptype, domain, power_domain).unwrap();
        b.finalize().unwrap()
    }

    #[test]
    fn speed_is_one_at_max_frequency() {
        let platform = build_single_core_platform();
        let spec = platform.processors()[0];
        assert!((platform.speed(&spec) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn frequency_rounds_up_to_next_mode() {
        let mut b = PlatformBuilder::new();
        let ptype = b.add_processor_type("core", 1.0, Duration::ZERO);
        let domain = b
            .add_clock_domain(
                Frequency::mhz(600.0),
                Frequency::mhz(2400.0),
                Frequency::mhz(600.0),
                Some(vec![Frequency::mhz(600.0), Frequency::mhz(1200.0), Frequency::mhz(2400.0)]),
                None,
                PowerCoefficients { c0: 0.0, c1: 0.0, c2: 0.0, c3: 0.0 },
                Duration::ZERO,
                false,
            )
            .unwrap();
        let power_domain = b.add_power_domain(vec![]);
        b.add_processor(ptype, domain, power_domain).unwrap();
        let mut platform = b.finalize().unwrap();

        let applied = platform.set_frequency(domain, Frequency::mhz(900.0));
        assert_eq!(applied.as_mhz(), 1200.0);
    }

    #[test]
    fn power_domain_always_has_c0() {
        let mut b = PlatformBuilder::new();
        b.add_power_domain(vec![]);
        assert!(b.power_domains[0].c_state(0).is_some());
    }
}
