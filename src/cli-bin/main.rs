use clap::Parser;
use schedsim::prelude::*;

pub mod args;

use args::{Args, DeadlineMissKind, DvfsKind, OverrunKind, ReclamationKind, TraceFormatKind};

pub mod prelude {
    pub use super::args::prelude::*;
}

/// sysexits.h-style usage error; `0`/`1`/`2` below are simulation outcomes
/// proper, so a malformed command line gets a code none of them use.
const EXIT_USAGE: i32 = 64;
const EXIT_IO_ERROR: i32 = 1;
const EXIT_ADMISSION_FAILURE: i32 = 2;
const EXIT_SUCCESS: i32 = 0;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            err.print().expect("clap error always prints");
            std::process::exit(EXIT_USAGE);
        }
    };

    match run(&args) {
        Ok(outcome) => {
            print_summary(&outcome, args.quiet);
            // Deadline misses are a reported simulation outcome, not a tool
            // failure, so the exit code stays 0 and is recovered from the
            // summary/trace instead of colliding with the I/O/admission codes.
            std::process::exit(EXIT_SUCCESS);
        }
        Err(Failure::Io(err)) => {
            eprintln!("error: {err:#}");
            std::process::exit(EXIT_IO_ERROR);
        }
        Err(Failure::Admission(err)) => {
            eprintln!("error: {err}");
            std::process::exit(EXIT_ADMISSION_FAILURE);
        }
    }
}

enum Failure {
    Io(anyhow::Error),
    Admission(AdmissionError),
}

impl From<LoaderError> for Failure {
    fn from(err: LoaderError) -> Self {
        Failure::Io(anyhow::Error::new(err))
    }
}

impl From<AdmissionError> for Failure {
    fn from(err: AdmissionError) -> Self {
        Failure::Admission(err)
    }
}

struct Outcome {
    deadline_misses: u64,
    final_time: f64,
    total_energy_mj: Option<f64>,
}

fn run(args: &Args) -> Result<Outcome, Failure> {
    let platform = load_platform(&args.input.platform_file)?;
    let scenario = load_scenario(&args.input.scenario_file)?;

    let reclamation: Box<dyn ReclamationPolicy> = match args.policy.reclamation {
        ReclamationKind::None => Box::new(NoReclaim),
        ReclamationKind::Grub => Box::new(Grub::new()),
        ReclamationKind::Cash => Box::new(Cash::new()),
    };
    let mut scheduler = EdfScheduler::new(platform, reclamation);

    let overrun = match args.policy.overrun {
        OverrunKind::Queue => OverrunPolicy::Queue,
        OverrunKind::Skip => OverrunPolicy::Skip,
        OverrunKind::Abort => OverrunPolicy::Abort,
    };
    scheduler.set_deadline_miss_policy(match args.policy.deadline_miss {
        DeadlineMissKind::Continue => DeadlineMissPolicy::Continue,
        DeadlineMissKind::AbortJob => DeadlineMissPolicy::AbortJob,
        DeadlineMissKind::AbortTask => DeadlineMissPolicy::AbortTask,
        DeadlineMissKind::Stop => DeadlineMissPolicy::StopSimulation,
    });

    let cooldown = Duration::from_seconds(args.policy.dvfs_cooldown);
    if let Some(dvfs) = args.policy.dvfs {
        let policy: Box<dyn DvfsPolicy> = match dvfs {
            DvfsKind::PowerAware => Box::new(PowerAware::new(cooldown)),
            DvfsKind::Ffa => Box::new(Ffa::new(cooldown)),
            DvfsKind::Csf => Box::new(Csf::new(cooldown)),
        };
        scheduler.set_dvfs_policy(policy);
    }
    if let Some(idle_delay) = args.policy.dpm_idle_delay {
        scheduler.set_dpm_policy(Box::new(BasicDpm::new(Duration::from_seconds(idle_delay))));
    }

    if args.output.energy {
        scheduler.enable_energy_tracking(true);
    }

    let mut json_handle = None;
    if let Some(path) = &args.output.trace_file {
        match args.output.trace_format {
            TraceFormatKind::Json => {
                let writer = JsonTraceWriter::new();
                json_handle = Some(writer.handle());
                scheduler.set_trace_writer(Box::new(writer));
            }
            TraceFormatKind::Text => {
                let file = std::fs::File::create(path).map_err(LoaderError::from)?;
                scheduler.set_trace_writer(Box::new(TextTraceWriter::new(file)));
            }
        }
    }

    for task in &scenario.tasks {
        let task_id = scheduler.register_task(task.wcet_duration(), task.period_duration(), task.relative_deadline_duration());
        let server_id = scheduler.add_server_for_task(task_id, overrun)?;
        scheduler.set_expected_arrivals(server_id, task.jobs.len());
        for job in &task.jobs {
            scheduler.schedule_job_arrival(task_id, job.duration(), job.arrival_time());
        }
    }

    let until = args.input.until.map(TimePoint::from_seconds);
    scheduler.run(until);

    if let (Some(path), Some(handle)) = (&args.output.trace_file, json_handle) {
        let file = std::fs::File::create(path).map_err(LoaderError::from)?;
        handle.write_to(file).map_err(|err| Failure::Io(anyhow::Error::new(LoaderError::new("trace", err.to_string()))))?;
    }

    Ok(Outcome {
        deadline_misses: scheduler.deadline_miss_count(),
        final_time: scheduler.now().as_seconds(),
        total_energy_mj: args.output.energy.then(|| scheduler.total_energy().as_mj()),
    })
}

fn print_summary(outcome: &Outcome, quiet: bool) {
    if quiet {
        return;
    }
    println!("simulation finished at t={:.6}", outcome.final_time);
    println!("deadline misses: {}", outcome.deadline_misses);
    if let Some(energy) = outcome.total_energy_mj {
        println!("total energy: {energy:.3} mJ");
    }
}
