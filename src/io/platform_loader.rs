//! JSON platform description loader: processor types, clock domains, power
//! domains and the processors that wire them together, plus the legacy
//! `clusters` shorthand.
//!
//! Grounded on
//! `original_source/schedsim/io/src/platform_loader.cpp`'s two-format split
//! (`load_new_format`/`load_legacy_format`), re-expressed as `serde`
//! `Deserialize` structs rather than hand-rolled `rapidjson` field getters —
//! the teacher's own `common/taskset_serde.rs` reaches for `serde_json` the
//! same way.

use std::collections::HashMap;

use crate::core::platform::{CStateScope, Platform, PlatformBuilder, PowerCoefficients};
use crate::core::time::{Duration, Frequency, Power};

use super::error::LoaderError;

#[derive(serde::Deserialize)]
struct ProcessorTypeSpec {
    name: String,
    performance: f64,
    #[serde(default)]
    context_switch_delay_us: f64,
}

#[derive(serde::Deserialize)]
struct ClockDomainSpec {
    id: u64,
    frequencies_mhz: Vec<f64>,
    effective_frequency_mhz: Option<f64>,
    initial_frequency_mhz: Option<f64>,
    power_model: Option<[f64; 4]>,
    #[serde(default)]
    transition_delay_us: f64,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "snake_case")]
enum CStateScopeSpec {
    PerProcessor,
    DomainWide,
}

impl From<CStateScopeSpec> for CStateScope {
    fn from(s: CStateScopeSpec) -> Self {
        match s {
            CStateScopeSpec::PerProcessor => CStateScope::PerProcessor,
            CStateScopeSpec::DomainWide => CStateScope::DomainWide,
        }
    }
}

#[derive(serde::Deserialize)]
struct CStateSpec {
    level: u32,
    power_mw: f64,
    #[serde(default)]
    latency_us: f64,
    #[serde(default = "default_scope")]
    scope: CStateScopeSpec,
}

fn default_scope() -> CStateScopeSpec {
    CStateScopeSpec::PerProcessor
}

#[derive(serde::Deserialize)]
struct PowerDomainSpec {
    id: u64,
    #[serde(default)]
    c_states: Vec<CStateSpec>,
}

#[derive(serde::Deserialize)]
struct ProcessorSpec {
    #[serde(rename = "type")]
    type_name: String,
    clock_domain: u64,
    power_domain: u64,
}

#[derive(serde::Deserialize)]
struct ClusterSpec {
    procs: u32,
    #[serde(default = "default_perf_score")]
    perf_score: f64,
    #[serde(default = "default_effective_freq")]
    effective_freq: f64,
    frequencies: Option<Vec<f64>>,
    power_model: Option<[f64; 4]>,
}

fn default_perf_score() -> f64 {
    1.0
}

fn default_effective_freq() -> f64 {
    1000.0
}

#[derive(serde::Deserialize)]
struct PlatformFile {
    processor_types: Option<Vec<ProcessorTypeSpec>>,
    clock_domains: Option<Vec<ClockDomainSpec>>,
    power_domains: Option<Vec<PowerDomainSpec>>,
    processors: Option<Vec<ProcessorSpec>>,
    clusters: Option<Vec<ClusterSpec>>,
}

pub fn load_platform(path: &std::path::Path) -> Result<Platform, LoaderError> {
    let text = std::fs::read_to_string(path)?;
    load_platform_from_str(&text)
}

pub fn load_platform_from_str(json: &str) -> Result<Platform, LoaderError> {
    let file: PlatformFile = serde_json::from_str(json)?;
    if file.clusters.is_some() {
        load_legacy(file)
    } else {
        load_new(file)
    }
}

fn load_new(file: PlatformFile) -> Result<Platform, LoaderError> {
    let mut builder = PlatformBuilder::new();

    let types = file.processor_types.ok_or_else(|| LoaderError::new("platform", "missing required field 'processor_types'"))?;
    if types.is_empty() {
        return Err(LoaderError::new("platform.processor_types", "must declare at least one processor type"));
    }
    let mut type_ids = HashMap::new();
    for (idx, t) in types.into_iter().enumerate() {
        let id = builder.add_processor_type(t.name.clone(), t.performance, Duration::from_seconds(t.context_switch_delay_us / 1e6));
        if type_ids.insert(t.name, id).is_some() {
            return Err(LoaderError::new(format!("platform.processor_types[{idx}]"), "duplicate processor type name"));
        }
    }

    let domains = file.clock_domains.ok_or_else(|| LoaderError::new("platform", "missing required field 'clock_domains'"))?;
    if domains.is_empty() {
        return Err(LoaderError::new("platform.clock_domains", "must declare at least one clock domain"));
    }
    let mut domain_ids = HashMap::new();
    for (idx, d) in domains.into_iter().enumerate() {
        let ctx = format!("platform.clock_domains[{idx}]");
        if d.frequencies_mhz.is_empty() {
            return Err(LoaderError::new(ctx, "'frequencies_mhz' must not be empty"));
        }
        let freq_min = Frequency::mhz(d.frequencies_mhz[0]);
        let freq_max = Frequency::mhz(*d.frequencies_mhz.last().unwrap());
        let modes = if d.frequencies_mhz.len() > 1 { Some(d.frequencies_mhz.iter().copied().map(Frequency::mhz).collect()) } else { None };
        let initial = d.initial_frequency_mhz.map(Frequency::mhz).unwrap_or(freq_max);
        let freq_eff = d.effective_frequency_mhz.map(Frequency::mhz);
        let power = d.power_model.map(|[c0, c1, c2, c3]| PowerCoefficients { c0, c1, c2, c3 }).unwrap_or(PowerCoefficients { c0: 0.0, c1: 0.0, c2: 0.0, c3: 0.0 });
        let cid = builder
            .add_clock_domain(freq_min, freq_max, initial, modes, freq_eff, power, Duration::from_seconds(d.transition_delay_us / 1e6), false)
            .map_err(|err| LoaderError::new(ctx, err.to_string()))?;
        if domain_ids.insert(d.id, cid).is_some() {
            return Err(LoaderError::new("platform.clock_domains", format!("duplicate clock_domain id {}", d.id)));
        }
    }

    let power_domains = file.power_domains.ok_or_else(|| LoaderError::new("platform", "missing required field 'power_domains'"))?;
    if power_domains.is_empty() {
        return Err(LoaderError::new("platform.power_domains", "must declare at least one power domain"));
    }
    let mut power_ids = HashMap::new();
    for pd in power_domains {
        let c_states = pd
            .c_states
            .into_iter()
            .map(|c| crate::core::platform::CStateLevel {
                level: c.level,
                scope: c.scope.into(),
                wake_latency: Duration::from_seconds(c.latency_us / 1e6),
                sleep_power: Power::mw(c.power_mw),
            })
            .collect();
        let pid = builder.add_power_domain(c_states);
        if power_ids.insert(pd.id, pid).is_some() {
            return Err(LoaderError::new("platform.power_domains", format!("duplicate power_domain id {}", pd.id)));
        }
    }

    let processors = file.processors.ok_or_else(|| LoaderError::new("platform", "missing required field 'processors'"))?;
    if processors.is_empty() {
        return Err(LoaderError::new("platform.processors", "must declare at least one processor"));
    }
    for (idx, p) in processors.into_iter().enumerate() {
        let ctx = format!("platform.processors[{idx}]");
        let type_id = *type_ids.get(&p.type_name).ok_or_else(|| LoaderError::new(&ctx, format!("unknown processor type '{}'", p.type_name)))?;
        let clock_id = *domain_ids.get(&p.clock_domain).ok_or_else(|| LoaderError::new(&ctx, format!("unknown clock_domain {}", p.clock_domain)))?;
        let power_id = *power_ids.get(&p.power_domain).ok_or_else(|| LoaderError::new(&ctx, format!("unknown power_domain {}", p.power_domain)))?;
        builder.add_processor(type_id, clock_id, power_id).map_err(|err| LoaderError::new(ctx, err.to_string()))?;
    }

    builder.finalize().map_err(|err| LoaderError::new("platform", err.to_string()))
}

fn load_legacy(file: PlatformFile) -> Result<Platform, LoaderError> {
    let clusters = file.clusters.expect("load_legacy requires clusters");
    let mut builder = PlatformBuilder::new();

    for (idx, cluster) in clusters.into_iter().enumerate() {
        let ctx = format!("platform.clusters[{idx}]");
        let ptype = builder.add_processor_type(format!("cluster{idx}"), cluster.perf_score, Duration::ZERO);

        let (freq_min, freq_max, modes) = match &cluster.frequencies {
            Some(freqs) if !freqs.is_empty() => {
                let min = Frequency::mhz(freqs[0]);
                let max = Frequency::mhz(*freqs.last().unwrap());
                let modes = if freqs.len() > 1 { Some(freqs.iter().copied().map(Frequency::mhz).collect()) } else { None };
                (min, max, modes)
            }
            _ => (Frequency::mhz(cluster.effective_freq), Frequency::mhz(cluster.effective_freq), None),
        };
        let power = cluster.power_model.map(|[c0, c1, c2, c3]| PowerCoefficients { c0, c1, c2, c3 }).unwrap_or(PowerCoefficients { c0: 0.0, c1: 0.0, c2: 0.0, c3: 0.0 });
        let domain = builder
            .add_clock_domain(freq_min, freq_max, Frequency::mhz(cluster.effective_freq), modes, Some(Frequency::mhz(cluster.effective_freq)), power, Duration::ZERO, false)
            .map_err(|err| LoaderError::new(&ctx, err.to_string()))?;

        let power_domain = builder.add_power_domain(vec![]);

        for _ in 0..cluster.procs {
            builder.add_processor(ptype, domain, power_domain).map_err(|err| LoaderError::new(&ctx, err.to_string()))?;
        }
    }

    builder.finalize().map_err(|err| LoaderError::new("platform", err.to_string()))
}

pub mod prelude {
    pub use super::{load_platform, load_platform_from_str};
}
