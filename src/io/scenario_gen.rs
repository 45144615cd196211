//! UUniFast-discard task-set generator, grounded on
//! `original_source/schedlib/src/generators/uunifast_discard_weibull.cpp`.
//!
//! Ported in two layers matching the C++ split:
//! - [`uunifast_discard`] draws `nb_tasks` utilizations that sum to
//!   `total_utilization`, each bounded by `umax`, by repeatedly resampling
//!   any draw that would violate the bound (discard-and-retry) instead of
//!   clamping it, which would bias the distribution.
//! - [`generate_scenario`] turns those utilizations into a full
//!   [`ScenarioFile`]: a period is picked per task from a fixed hyperperiod
//!   divisor set, `wcet = utilization * period`, and job durations are
//!   sampled from a bounded Weibull distribution around `wcet` so a
//!   generated scenario isn't just worst-case-every-job (the degenerate
//!   `compression_rate == 1.0` case reduces to exactly that, matching the
//!   original's shortcut).

use rand::Rng;
use rand::distributions::Uniform;

use super::scenario::{ScenarioFile, ScenarioJob, ScenarioTask};

/// Divisors of 25200 (2^4*3^2*5^2*7), the original generator's hyperperiod,
/// offered as candidate task periods.
const CANDIDATE_PERIODS: [f64; 10] = [25200.0, 12600.0, 8400.0, 6300.0, 5040.0, 4200.0, 3600.0, 3150.0, 2800.0, 2520.0];

#[derive(Debug)]
pub struct UuniFastError {
    pub message: String,
}

impl UuniFastError {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for UuniFastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uunifast: {}", self.message)
    }
}

impl std::error::Error for UuniFastError {}

/// Draws `nb_tasks` utilizations summing to `total_utilization`, none
/// exceeding `umax`. Classic UUniFast (repeated `u_i = u_sum * (1 -
/// rand^(1/(n-i)))`) followed by a discard-and-retry pass: any task whose
/// draw would exceed `umax` is redrawn from scratch rather than clamped, so
/// the accepted distribution stays the one UUniFast actually produces.
pub fn uunifast_discard(rng: &mut impl Rng, nb_tasks: usize, total_utilization: f64, umax: f64) -> Result<Vec<f64>, UuniFastError> {
    if nb_tasks == 0 {
        return Err(UuniFastError::new("nb_tasks must be at least 1"));
    }
    if !(0.0..=f64::MAX).contains(&total_utilization) {
        return Err(UuniFastError::new("total_utilization must be non-negative"));
    }
    if !(0.0..=1.0).contains(&umax) {
        return Err(UuniFastError::new("umax must be within 0..=1"));
    }
    if total_utilization > nb_tasks as f64 * umax {
        return Err(UuniFastError::new("total_utilization is unreachable under umax with this many tasks"));
    }

    const MAX_ATTEMPTS: usize = 10_000;
    let unit = Uniform::new(0.0_f64, 1.0);

    for _ in 0..MAX_ATTEMPTS {
        let mut utilizations = Vec::with_capacity(nb_tasks);
        let mut sum_u = total_utilization;
        let mut ok = true;
        for i in 0..nb_tasks - 1 {
            let remaining = (nb_tasks - i - 1) as f64;
            let next_sum_u = sum_u * rng.sample(unit).powf(1.0 / remaining);
            let u_i = sum_u - next_sum_u;
            if u_i > umax {
                ok = false;
                break;
            }
            utilizations.push(u_i);
            sum_u = next_sum_u;
        }
        if !ok {
            continue;
        }
        if sum_u > umax {
            continue;
        }
        utilizations.push(sum_u);
        return Ok(utilizations);
    }

    Err(UuniFastError::new("failed to satisfy umax bound within the discard-retry attempt budget"))
}

/// Samples from a Weibull distribution truncated to `[min, max]` by inverse
/// CDF with rejection, shape parameter fixed at 2 (Rayleigh-like) as in the
/// original generator.
fn bounded_weibull(rng: &mut impl Rng, min: f64, max: f64) -> f64 {
    if min >= max {
        return min;
    }
    const SHAPE: f64 = 2.0;
    let unit = Uniform::new(0.0_f64, 1.0);
    loop {
        let u: f64 = rng.sample(unit);
        let scale = max - min;
        let sample = min + scale * (-((1.0 - u).ln())).powf(1.0 / SHAPE).min(1.0);
        if sample >= min && sample <= max {
            return sample;
        }
    }
}

/// Draws `nb_jobs` per-job durations for a task with worst-case execution
/// time `wcet`. `compression_rate == 1.0` short-circuits to "every job runs
/// for exactly `wcet`"; otherwise each duration is drawn from
/// `bounded_weibull(compression_rate * wcet, wcet)`, biasing jobs toward
/// shorter-than-worst-case runs the way real workloads rarely hit their WCET
/// on every release.
fn generate_durations(rng: &mut impl Rng, nb_jobs: usize, compression_rate: f64, wcet: f64) -> Vec<f64> {
    if compression_rate >= 1.0 {
        return vec![wcet; nb_jobs];
    }
    (0..nb_jobs).map(|_| bounded_weibull(rng, compression_rate * wcet, wcet)).collect()
}

/// Generation knobs for [`generate_scenario`].
pub struct ScenarioGenParams {
    pub nb_tasks: usize,
    pub total_utilization: f64,
    pub umax: f64,
    pub hyperperiod_jobs: usize,
    pub compression_rate: f64,
}

/// Builds a full [`ScenarioFile`] from UUniFast-drawn utilizations: each
/// task is given a period from [`CANDIDATE_PERIODS`], a `wcet` derived from
/// its utilization share, a relative deadline equal to its period (implicit
/// deadline), and `hyperperiod_jobs` periodic job releases with Weibull
/// jittered durations.
pub fn generate_scenario(rng: &mut impl Rng, params: &ScenarioGenParams) -> Result<ScenarioFile, UuniFastError> {
    if params.hyperperiod_jobs == 0 {
        return Err(UuniFastError::new("hyperperiod_jobs must be at least 1"));
    }
    let utilizations = uunifast_discard(rng, params.nb_tasks, params.total_utilization, params.umax)?;
    let period_index = Uniform::new(0, CANDIDATE_PERIODS.len());

    let tasks = utilizations
        .into_iter()
        .enumerate()
        .map(|(idx, utilization)| {
            let period = CANDIDATE_PERIODS[rng.sample(period_index)];
            let wcet = utilization * period;
            let durations = generate_durations(rng, params.hyperperiod_jobs, params.compression_rate, wcet);
            let jobs = durations
                .into_iter()
                .enumerate()
                .map(|(job_idx, duration)| ScenarioJob { arrival: job_idx as f64 * period, duration })
                .collect();
            ScenarioTask { id: idx as u64, period, relative_deadline: period, wcet, jobs }
        })
        .collect();

    Ok(ScenarioFile { tasks })
}

pub mod prelude {
    pub use super::{ScenarioGenParams, UuniFastError, generate_scenario, uunifast_discard};
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn uunifast_discard_respects_total_and_bound() {
        let mut rng = StdRng::seed_from_u64(42);
        let utilizations = uunifast_discard(&mut rng, 5, 3.0, 0.9).unwrap();
        assert_eq!(utilizations.len(), 5);
        let sum: f64 = utilizations.iter().sum();
        assert!((sum - 3.0).abs() < 1e-6, "sum was {sum}");
        assert!(utilizations.iter().all(|&u| u <= 0.9 + 1e-9));
    }

    #[test]
    fn uunifast_discard_rejects_unreachable_total() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(uunifast_discard(&mut rng, 2, 5.0, 0.5).is_err());
    }

    #[test]
    fn uunifast_discard_rejects_zero_tasks() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(uunifast_discard(&mut rng, 0, 1.0, 1.0).is_err());
    }

    #[test]
    fn generate_scenario_produces_periodic_jobs_with_expected_wcet_ratio() {
        let mut rng = StdRng::seed_from_u64(7);
        let params = ScenarioGenParams { nb_tasks: 3, total_utilization: 1.2, umax: 0.9, hyperperiod_jobs: 4, compression_rate: 1.0 };
        let scenario = generate_scenario(&mut rng, &params).unwrap();
        assert_eq!(scenario.tasks.len(), 3);
        for task in &scenario.tasks {
            assert_eq!(task.jobs.len(), 4);
            assert_eq!(task.relative_deadline, task.period);
            for job in &task.jobs {
                assert_eq!(job.duration, task.wcet);
            }
        }
    }

    #[test]
    fn generate_scenario_with_compression_jitters_durations_within_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let params = ScenarioGenParams { nb_tasks: 2, total_utilization: 0.8, umax: 0.9, hyperperiod_jobs: 10, compression_rate: 0.5 };
        let scenario = generate_scenario(&mut rng, &params).unwrap();
        for task in &scenario.tasks {
            for job in &task.jobs {
                assert!(job.duration >= 0.5 * task.wcet - 1e-9);
                assert!(job.duration <= task.wcet + 1e-9);
            }
        }
    }
}
