use rand::SeedableRng;
use rand::rngs::StdRng;
use schedsim::prelude::*;

#[derive(clap::Parser)]
pub struct Args {
    /// Number of tasks to generate
    #[arg(short = 'n', value_name = "# TASKS")]
    pub nb_tasks: usize,

    /// Total utilization to distribute across the task set
    #[arg(short = 'u', value_name = "UTILIZATION")]
    pub total_utilization: f64,

    /// Per-task utilization cap
    #[arg(long = "umax", value_name = "UTILIZATION", default_value = "1.0")]
    pub umax: f64,

    /// Number of periodic job releases to generate per task
    #[arg(short = 'j', long = "jobs", value_name = "# JOBS", default_value = "10")]
    pub hyperperiod_jobs: usize,

    /// Fraction of WCET below which actual job durations may fall (1.0
    /// disables jitter: every job runs for exactly its task's WCET)
    #[arg(long = "compression", value_name = "RATE", default_value = "1.0")]
    pub compression_rate: f64,

    /// Seed the RNG for a reproducible task set; omit for a fresh draw each run
    #[arg(long = "seed", value_name = "SEED")]
    pub seed: Option<u64>,

    /// Write the generated scenario here instead of standard output
    #[arg(short = 'o', value_name = "FILE")]
    pub output: Option<std::path::PathBuf>,
}

fn main() {
    let args = <Args as clap::Parser>::parse();

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let params = ScenarioGenParams {
        nb_tasks: args.nb_tasks,
        total_utilization: args.total_utilization,
        umax: args.umax,
        hyperperiod_jobs: args.hyperperiod_jobs,
        compression_rate: args.compression_rate,
    };

    let scenario = match generate_scenario(&mut rng, &params) {
        Ok(scenario) => scenario,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    let json = serde_json::to_string_pretty(&scenario).expect("generated scenario always serializes");
    match args.output {
        Some(path) => {
            if let Err(err) = std::fs::write(&path, json) {
                eprintln!("error: could not write {}: {err}", path.display());
                std::process::exit(1);
            }
        }
        None => println!("{json}"),
    }
}
