//! End-to-end scheduling scenarios exercised through the public
//! `EdfScheduler` API and the JSON trace, grounded on
//! `original_source/schedsim/algo/tests/edf_integration_test.cpp` and
//! `dvfs_integration_test.cpp`.

use schedsim::prelude::*;

fn platform(processors: usize) -> Platform {
    let mut b = PlatformBuilder::new();
    let ptype = b.add_processor_type("core", 1.0, Duration::ZERO);
    let domain = b
        .add_clock_domain(
            Frequency::mhz(1000.0),
            Frequency::mhz(1000.0),
            Frequency::mhz(1000.0),
            None,
            None,
            PowerCoefficients { c0: 0.0, c1: 0.0, c2: 0.0, c3: 0.0 },
            Duration::ZERO,
            false,
        )
        .unwrap();
    let pd = b.add_power_domain(vec![]);
    for _ in 0..processors {
        b.add_processor(ptype, domain, pd).unwrap();
    }
    b.finalize().unwrap()
}

fn event_types(writer: &JsonTraceWriter) -> Vec<String> {
    writer.records().iter().map(|r| r["type"].as_str().unwrap().to_string()).collect()
}

fn events_of_type<'a>(records: &'a [serde_json::Value], ty: &str) -> Vec<&'a serde_json::Value> {
    records.iter().filter(|r| r["type"] == ty).collect()
}

/// S1 — single task, runs to completion with no deadline miss.
#[test]
fn s1_single_task_runs_to_completion() {
    let mut sched = EdfScheduler::new(platform(1), Box::new(NoReclaim));
    let writer = JsonTraceWriter::new();
    sched.set_trace_writer(Box::new(writer.handle()));

    let t0 = sched.register_task(Duration::from_seconds(2.0), Duration::from_seconds(10.0), Duration::from_seconds(10.0));
    sched.add_server_for_task(t0, OverrunPolicy::Queue).unwrap();
    sched.schedule_job_arrival(t0, Duration::from_seconds(2.0), TimePoint::ZERO);
    sched.run(Some(TimePoint::from_seconds(10.0)));

    let records = writer.records();
    let starts = events_of_type(&records, "job_start");
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0]["time"], serde_json::Value::from(0.0));

    let completions = events_of_type(&records, "job_completion");
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0]["time"], serde_json::Value::from(2.0));

    assert_eq!(sched.deadline_miss_count(), 0);
}

/// S2 — EDF preemption: the shorter-deadline, shorter-wcet task interrupts
/// and the first task resumes and completes only after both have run.
#[test]
fn s2_edf_preemption_and_resume() {
    let mut sched = EdfScheduler::new(platform(1), Box::new(NoReclaim));
    let writer = JsonTraceWriter::new();
    sched.set_trace_writer(Box::new(writer.handle()));

    let t1 = sched.register_task(Duration::from_seconds(4.0), Duration::from_seconds(10.0), Duration::from_seconds(10.0));
    sched.add_server_for_task(t1, OverrunPolicy::Queue).unwrap();
    sched.schedule_job_arrival(t1, Duration::from_seconds(4.0), TimePoint::ZERO);

    let t2 = sched.register_task(Duration::from_seconds(1.0), Duration::from_seconds(5.0), Duration::from_seconds(3.0));
    sched.add_server_for_task(t2, OverrunPolicy::Queue).unwrap();
    sched.schedule_job_arrival(t2, Duration::from_seconds(1.0), TimePoint::from_seconds(1.0));

    sched.run(Some(TimePoint::from_seconds(10.0)));

    let records = writer.records();
    let completions = events_of_type(&records, "job_completion");
    // T2 (shorter job) completes before T1 resumes and finishes at t=5.
    assert_eq!(completions.len(), 2);
    let times: Vec<f64> = completions.iter().map(|r| r["time"].as_f64().unwrap()).collect();
    assert!(times.contains(&2.0), "expected T2 to finish at t=2, saw {times:?}");
    assert!(times.contains(&5.0), "expected T1 to finish at t=5, saw {times:?}");
    assert_eq!(sched.deadline_miss_count(), 0);
}

/// S3 — budget exhaustion postpones the deadline rather than missing it.
/// A 5s job against a 2s/10s CBS budget exhausts twice (at t=2 and t=4,
/// postponing the deadline by one period each time) before finishing its
/// last second of work at t=5, well inside its (now twice-postponed)
/// deadline.
#[test]
fn s3_budget_exhaustion_postpones_repeatedly() {
    let mut sched = EdfScheduler::new(platform(1), Box::new(NoReclaim));
    let writer = JsonTraceWriter::new();
    sched.set_trace_writer(Box::new(writer.handle()));

    let t0 = sched.register_task(Duration::from_seconds(5.0), Duration::from_seconds(10.0), Duration::from_seconds(10.0));
    let sid = sched.add_server(t0, Duration::from_seconds(2.0), Duration::from_seconds(10.0), OverrunPolicy::Queue).unwrap();
    sched.schedule_job_arrival(t0, Duration::from_seconds(5.0), TimePoint::ZERO);
    sched.run(Some(TimePoint::from_seconds(10.0)));

    let records = writer.records();
    let exhaustions = events_of_type(&records, "budget_exhausted");
    assert_eq!(exhaustions.len(), 2, "expected two budget_exhausted events, saw {:?}", event_types(&writer));
    let exhaustion_times: Vec<f64> = exhaustions.iter().map(|r| r["time"].as_f64().unwrap()).collect();
    assert_eq!(exhaustion_times, vec![2.0, 4.0]);

    let completions = events_of_type(&records, "job_completion");
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0]["time"], serde_json::Value::from(5.0));
    assert_eq!(sched.deadline_miss_count(), 0);
    let _ = sid;
}

/// S4 — admission failure: a second server whose utilization would push
/// the total over capacity is rejected, and a subsequent arrival for a task
/// with no admitted server is traced as rejected without moving utilization.
#[test]
fn s4_admission_failure_rejects_overload() {
    let mut sched = EdfScheduler::new(platform(1), Box::new(NoReclaim));
    let writer = JsonTraceWriter::new();
    sched.set_trace_writer(Box::new(writer.handle()));

    let t1 = sched.register_task(Duration::from_seconds(8.0), Duration::from_seconds(10.0), Duration::from_seconds(10.0));
    sched.add_server_for_task(t1, OverrunPolicy::Queue).unwrap();
    let utilization_after_first = sched.utilization();
    assert!((utilization_after_first - 0.8).abs() < 1e-9);

    let t2 = sched.register_task(Duration::from_seconds(3.0), Duration::from_seconds(10.0), Duration::from_seconds(10.0));
    let rejected = sched.add_server_for_task(t2, OverrunPolicy::Queue);
    assert!(rejected.is_err());
    assert_eq!(sched.utilization(), utilization_after_first);

    sched.schedule_job_arrival(t2, Duration::from_seconds(3.0), TimePoint::ZERO);
    sched.run(Some(TimePoint::from_seconds(1.0)));

    let records = writer.records();
    let rejections = events_of_type(&records, "task_rejected");
    assert_eq!(rejections.len(), 1);
    assert_eq!(sched.utilization(), utilization_after_first);
}

/// S5 — DVFS saves energy: GRUB+FFA over a light (U=0.1) task running for
/// 10 simulated seconds draws less total energy than GRUB alone, with no
/// deadline misses introduced by the frequency scaling.
#[test]
fn s5_dvfs_reduces_energy_without_deadline_misses() {
    fn build(with_dvfs: bool) -> EdfScheduler {
        let mut b = PlatformBuilder::new();
        let ptype = b.add_processor_type("core", 1.0, Duration::ZERO);
        let modes = vec![
            Frequency::mhz(200.0),
            Frequency::mhz(500.0),
            Frequency::mhz(800.0),
            Frequency::mhz(1000.0),
            Frequency::mhz(1500.0),
            Frequency::mhz(2000.0),
        ];
        let domain = b
            .add_clock_domain(
                Frequency::mhz(200.0),
                Frequency::mhz(2000.0),
                Frequency::mhz(2000.0),
                Some(modes),
                Some(Frequency::mhz(1000.0)),
                PowerCoefficients { c0: 50.0, c1: 100.0, c2: 0.0, c3: 0.0 },
                Duration::ZERO,
                false,
            )
            .unwrap();
        let pd = b.add_power_domain(vec![]);
        for _ in 0..4 {
            b.add_processor(ptype, domain, pd).unwrap();
        }
        let platform = b.finalize().unwrap();

        let mut sched = EdfScheduler::new(platform, Box::new(Grub::new()));
        sched.enable_energy_tracking(true);
        if with_dvfs {
            sched.set_dvfs_policy(Box::new(Ffa::new(Duration::ZERO)));
        }
        let t0 = sched.register_task(Duration::from_seconds(1.0), Duration::from_seconds(10.0), Duration::from_seconds(10.0));
        sched.add_server_for_task(t0, OverrunPolicy::Queue).unwrap();
        sched.schedule_job_arrival(t0, Duration::from_seconds(1.0), TimePoint::ZERO);
        sched.run(Some(TimePoint::from_seconds(10.0)));
        sched
    }

    let baseline = build(false);
    let treatment = build(true);

    assert_eq!(baseline.deadline_miss_count(), 0);
    assert_eq!(treatment.deadline_miss_count(), 0);
    assert!(
        treatment.total_energy().as_mj() < baseline.total_energy().as_mj(),
        "expected FFA to use less energy: baseline={}, treatment={}",
        baseline.total_energy().as_mj(),
        treatment.total_energy().as_mj()
    );
}

/// S6 — deterministic tie-break: two tasks with identical periods arriving
/// simultaneously are always dispatched in server-id order.
#[test]
fn s6_deterministic_tie_break_by_server_id() {
    let mut sched = EdfScheduler::new(platform(1), Box::new(NoReclaim));
    let writer = JsonTraceWriter::new();
    sched.set_trace_writer(Box::new(writer.handle()));

    let t1 = sched.register_task(Duration::from_seconds(1.0), Duration::from_seconds(10.0), Duration::from_seconds(10.0));
    let s1 = sched.add_server_for_task(t1, OverrunPolicy::Queue).unwrap();
    let t2 = sched.register_task(Duration::from_seconds(1.0), Duration::from_seconds(10.0), Duration::from_seconds(10.0));
    let s2 = sched.add_server_for_task(t2, OverrunPolicy::Queue).unwrap();
    assert!(s1.0 < s2.0);

    sched.schedule_job_arrival(t1, Duration::from_seconds(1.0), TimePoint::ZERO);
    sched.schedule_job_arrival(t2, Duration::from_seconds(1.0), TimePoint::ZERO);
    sched.run(Some(TimePoint::from_seconds(1.0)));

    let records = writer.records();
    let starts = events_of_type(&records, "job_start");
    assert_eq!(starts.len(), 1, "only one processor available, only the first job should start");
    assert_eq!(starts[0]["job"], serde_json::Value::from(0));
}
