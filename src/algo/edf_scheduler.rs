//! The EDF scheduler: the single driver of every processor and server state
//! transition in the engine.
//!
//! `core::processor::Processor` is a plain data holder (see its doc
//! comment); all of the orchestration the original engine's
//! `Processor::assign/clear/request_cstate` and `EdfScheduler::dispatch_edf`
//! methods performed lives here instead, working through index-based
//! `ProcessorId`/`ServerId` handles rather than back-pointers. Similarly,
//! the original's `Processor::current_job_` pointed *into* the owning
//! `CbsServer`'s queue; here a dispatched job is physically moved out of the
//! server's `VecDeque` into `Processor::current_job`, and returned with
//! [`CbsServer::push_front_job`] on preemption or incomplete budget
//! exhaustion so it resumes ahead of anything queued behind it.

use std::collections::HashMap;

use crate::core::engine::{Engine, EventPriority, TimerId, TraceWriter};
use crate::core::job::{Job, JobId, Task, TaskId};
use crate::core::platform::{ClockDomainId, Platform};
use crate::core::processor::{Processor, ProcessorId, ProcessorState};
use crate::core::time::{Duration, Energy, Frequency, TimePoint};

use super::cbs_server::{CbsServer, EnqueueOutcome, OverrunPolicy, ServerId, State as CbsState};
use super::dpm::DpmPolicy;
use super::dvfs::DvfsPolicy;
use super::error::{AdmissionError, AdmissionTest};
use super::reclamation::ReclamationPolicy;

/// What to do with a task whose job has just missed its absolute deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeadlineMissPolicy {
    /// Log it and keep going; the offending job (running or still queued)
    /// is simply dropped, the server carries on.
    #[default]
    Continue,
    /// Drop the offending job same as `Continue`, but also discard whatever
    /// else is sitting in that server's queue.
    AbortJob,
    /// Remove the task's server from the scheduler entirely.
    AbortTask,
    /// Halt the simulation at this instant.
    StopSimulation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeadlineMissContext {
    Running,
    Queued,
}

#[derive(Clone, Copy, Debug)]
enum Event {
    JobArrival { task: TaskId, wcet: Duration, absolute_deadline: TimePoint },
    JobCompletion { processor: ProcessorId },
    ProcessorDeadlineMiss { processor: ProcessorId },
    QueuedDeadlineMiss { server: ServerId },
    BudgetExhausted { server: ServerId },
    NonContendingDeadline { server: ServerId },
    ContextSwitchDone { processor: ProcessorId },
    WakeUpDone { processor: ProcessorId },
    DvfsDone { domain: ClockDomainId },
    DpmSleepReady { processor: ProcessorId, level: u32 },
}

#[derive(Default)]
struct ProcRuntime {
    completion_timer: Option<TimerId>,
    deadline_timer: Option<TimerId>,
    transition_timer: Option<TimerId>,
    dpm_sleep_timer: Option<TimerId>,
    last_update: TimePoint,
}

#[derive(Default)]
struct ServerRuntime {
    budget_timer: Option<TimerId>,
    queued_deadline_timer: Option<TimerId>,
    non_contending_deadline_timer: Option<TimerId>,
}

/// A single EDF-scheduled cluster: `m` processors sharing one ready queue of
/// CBS servers, plus whatever DVFS/DPM policy is plugged in for that
/// cluster's clock/power domains.
pub struct EdfScheduler {
    platform: Platform,
    processors: Vec<Processor>,
    proc_runtime: Vec<ProcRuntime>,
    processor_to_server: Vec<Option<ServerId>>,

    servers: Vec<CbsServer>,
    server_runtime: Vec<ServerRuntime>,
    server_to_processor: Vec<Option<ProcessorId>>,

    tasks: Vec<Task>,
    task_to_server: HashMap<TaskId, ServerId>,

    engine: Engine<Event>,
    reclamation: Box<dyn ReclamationPolicy>,
    dvfs: Option<Box<dyn DvfsPolicy>>,
    dpm: Option<Box<dyn DpmPolicy>>,
    admission_test: AdmissionTest,
    deadline_miss_policy: DeadlineMissPolicy,

    domain_last_change: Vec<Option<TimePoint>>,
    domain_changing: Vec<bool>,
    domain_transition_timer: Vec<Option<TimerId>>,

    total_utilization: f64,
    dispatch_requested: bool,
    stopped: bool,
    next_job_id: usize,
    deadline_miss_count: u64,
}

impl EdfScheduler {
    pub fn new(platform: Platform, reclamation: Box<dyn ReclamationPolicy>) -> Self {
        let processors: Vec<Processor> = platform
            .processors()
            .iter()
            .enumerate()
            .map(|(idx, spec)| Processor::new(ProcessorId(idx), spec.processor_type.0, spec.clock_domain.0, spec.power_domain.0))
            .collect();
        let n = processors.len();
        let domains = platform.clock_domains().len();

        let mut scheduler = Self {
            processors,
            proc_runtime: (0..n).map(|_| ProcRuntime::default()).collect(),
            processor_to_server: vec![None; n],
            servers: Vec::new(),
            server_runtime: Vec::new(),
            server_to_processor: Vec::new(),
            tasks: Vec::new(),
            task_to_server: HashMap::new(),
            engine: Engine::new(),
            reclamation,
            dvfs: None,
            dpm: None,
            admission_test: AdmissionTest::default(),
            deadline_miss_policy: DeadlineMissPolicy::default(),
            domain_last_change: vec![None; domains],
            domain_changing: vec![false; domains],
            domain_transition_timer: vec![None; domains],
            total_utilization: 0.0,
            dispatch_requested: false,
            stopped: false,
            next_job_id: 0,
            deadline_miss_count: 0,
            platform,
        };
        for idx in 0..n {
            scheduler.notify_power_for_processor(ProcessorId(idx));
        }
        scheduler
    }

    pub fn set_dvfs_policy(&mut self, policy: Box<dyn DvfsPolicy>) {
        self.dvfs = Some(policy);
    }

    pub fn set_dpm_policy(&mut self, policy: Box<dyn DpmPolicy>) {
        self.dpm = Some(policy);
    }

    pub fn set_deadline_miss_policy(&mut self, policy: DeadlineMissPolicy) {
        self.deadline_miss_policy = policy;
    }

    pub fn set_admission_test(&mut self, test: AdmissionTest) {
        self.admission_test = test;
    }

    pub fn set_trace_writer(&mut self, writer: Box<dyn TraceWriter>) {
        self.engine.set_trace_writer(writer);
    }

    pub fn enable_energy_tracking(&mut self, enabled: bool) {
        self.engine.enable_energy_tracking(enabled);
    }

    pub fn deadline_miss_count(&self) -> u64 {
        self.deadline_miss_count
    }

    pub fn total_energy(&self) -> Energy {
        self.engine.total_energy()
    }

    pub fn now(&self) -> TimePoint {
        self.engine.now()
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn utilization(&self) -> f64 {
        self.total_utilization
    }

    pub fn can_admit(&self, utilization: f64) -> bool {
        self.admission_test.admits(self.total_utilization, utilization, self.processors.len())
    }

    pub fn register_task(&mut self, wcet: Duration, period: Duration, relative_deadline: Duration) -> TaskId {
        let id = TaskId(self.tasks.len());
        self.tasks.push(Task::new(id, wcet, period, relative_deadline));
        id
    }

    pub fn add_server(&mut self, task: TaskId, budget: Duration, period: Duration, overrun: OverrunPolicy) -> Result<ServerId, AdmissionError> {
        let utilization = budget.as_seconds() / period.as_seconds();
        if !self.can_admit(utilization) {
            tracing::error!(task = task.0, requested = utilization, current = self.total_utilization, "admission rejected");
            return Err(AdmissionError {
                requested_utilization: utilization,
                current_utilization: self.total_utilization,
                capacity: self.processors.len() as f64,
            });
        }
        let id = ServerId(self.servers.len());
        self.servers.push(CbsServer::new(id, task, budget, period, overrun));
        self.server_runtime.push(ServerRuntime::default());
        self.server_to_processor.push(None);
        self.task_to_server.insert(task, id);
        self.total_utilization += utilization;
        self.notify_utilization_changed();
        Ok(id)
    }

    pub fn add_server_for_task(&mut self, task: TaskId, overrun: OverrunPolicy) -> Result<ServerId, AdmissionError> {
        let t = self.tasks[task.0].clone();
        self.add_server(task, t.wcet, t.period, overrun)
    }

    /// Cap the number of jobs this server will ever release; once it has
    /// gone Inactive having seen that many arrivals, [`Self::try_detach_server`]
    /// can remove it from utilization accounting entirely.
    pub fn set_expected_arrivals(&mut self, sid: ServerId, expected: usize) {
        self.servers[sid.0].expected_arrivals = Some(expected);
    }

    /// Detach a server that has gone Inactive and released every job it was
    /// ever going to (`CbsServer::is_detachable`), freeing its utilization
    /// for other admissions. A no-op returning `false` if the server is
    /// still in use.
    pub fn try_detach_server(&mut self, sid: ServerId) -> bool {
        if !self.servers[sid.0].is_detachable() {
            return false;
        }
        self.total_utilization -= self.servers[sid.0].utilization();
        self.task_to_server.retain(|_, v| *v != sid);
        self.notify_utilization_changed();
        true
    }

    /// Push a known job release (e.g. read from a scenario trace) onto the
    /// engine. Arrivals are supplied externally rather than generated
    /// internally from the task's period, so sporadic and periodic releases
    /// look identical to the scheduler.
    pub fn schedule_job_arrival(&mut self, task: TaskId, wcet: Duration, at: TimePoint) {
        let absolute_deadline = at + self.tasks[task.0].relative_deadline;
        self.engine.schedule(at, EventPriority::TimerDefault, Event::JobArrival { task, wcet, absolute_deadline });
    }

    /// Drain the event wheel until it is empty, `until` is exceeded, or a
    /// deadline miss triggers `StopSimulation`.
    pub fn run(&mut self, until: Option<TimePoint>) {
        loop {
            if self.stopped {
                break;
            }
            let Some(event) = self.engine.next(until) else { break };
            self.process_event(event);
            if self.dispatch_requested && self.engine.peek_time() != Some(self.engine.now()) {
                self.dispatch_requested = false;
                self.engine.trace("resched", &[]);
                self.dispatch_edf();
            }
        }
        self.engine.finalize_energy();
        self.engine.trace("sim_finished", &[]);
    }

    fn request_dispatch(&mut self) {
        self.dispatch_requested = true;
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::JobArrival { task, wcet, absolute_deadline } => self.on_job_arrival(task, wcet, absolute_deadline),
            Event::JobCompletion { processor } => self.on_job_completion(processor),
            Event::ProcessorDeadlineMiss { processor } => self.on_processor_deadline_miss(processor),
            Event::QueuedDeadlineMiss { server } => self.on_queued_deadline_miss(server),
            Event::BudgetExhausted { server } => self.on_budget_exhausted(server),
            Event::NonContendingDeadline { server } => self.on_non_contending_deadline(server),
            Event::ContextSwitchDone { processor } => self.on_context_switch_complete(processor),
            Event::WakeUpDone { processor } => self.on_wake_up_complete(processor),
            Event::DvfsDone { domain } => self.on_dvfs_done(domain),
            Event::DpmSleepReady { processor, level } => self.on_dpm_sleep_ready(processor, level),
        }
    }

    // ---- job arrival -----------------------------------------------------

    fn on_job_arrival(&mut self, task: TaskId, wcet: Duration, absolute_deadline: TimePoint) {
        tracing::trace!(task = task.0, wcet = wcet.as_seconds(), "job arrival ISR");
        let Some(&sid) = self.task_to_server.get(&task) else {
            // task has no admitted server (rejected, or not yet registered)
            tracing::warn!(task = task.0, "job arrival for task with no admitted server, dropping");
            self.engine.trace("task_rejected", &[("task", (task.0 as i64).into())]);
            return;
        };
        let now = self.engine.now();
        let job_id = JobId(self.next_job_id);
        self.next_job_id += 1;
        let job = Job::new(job_id, task, wcet, absolute_deadline);
        self.engine.trace("job_arrival", &[("task", (task.0 as i64).into()), ("job", (job_id.0 as i64).into())]);

        let was_inactive = self.servers[sid.0].state() == CbsState::Inactive;
        let was_non_contending = self.servers[sid.0].state() == CbsState::NonContending;
        if self.servers[sid.0].enqueue_job(job) == EnqueueOutcome::AbortRunningJob {
            self.abort_running_overrun(sid);
        }

        if was_inactive {
            self.servers[sid.0].activate(now);
            self.notify_utilization_changed();
            self.maybe_wake_sleeping_processor();
        } else if was_non_contending {
            self.cancel_non_contending_deadline(sid);
            self.servers[sid.0].reactivate_from_non_contending(now);
        }

        self.sync_queued_deadline_timer(sid);
        self.request_dispatch();
    }

    // ---- EDF dispatch ------------------------------------------------------

    /// Two-pass preempt-then-assign: processors with no server assigned are
    /// handed the earliest-deadline waiting server first; once none are
    /// free, a ready server can still steal a processor from whichever
    /// running server currently has the *latest* deadline, provided that
    /// deadline is later than the waiting server's own.
    fn dispatch_edf(&mut self) {
        let mut ready: Vec<ServerId> = self
            .servers
            .iter()
            .filter(|s| s.state() == CbsState::Ready && s.has_pending_jobs())
            .map(|s| s.id)
            .collect();
        ready.sort_by_key(|&sid| self.servers[sid.0].deadline());

        let mut running: Vec<(ProcessorId, ServerId)> = self
            .processor_to_server
            .iter()
            .enumerate()
            .filter_map(|(idx, opt)| opt.map(|sid| (ProcessorId(idx), sid)))
            .filter(|(pid, _)| self.processors[pid.0].is_running())
            .collect();
        let mut free: Vec<ProcessorId> = self.processors.iter().filter(|p| p.is_idle()).map(|p| p.id).collect();

        for sid in ready {
            if free.is_empty() {
                running.sort_by_key(|&(_, rsid)| std::cmp::Reverse(self.servers[rsid.0].deadline()));
                match running.first().copied() {
                    Some((pid, rsid)) if self.servers[rsid.0].deadline() > self.servers[sid.0].deadline() => {
                        self.preempt_processor(pid);
                        running.remove(0);
                        free.push(pid);
                    }
                    _ => break, // nothing left worth preempting; later (later-deadline) entries fare no better
                }
            }
            if let Some(pid) = free.pop() {
                self.assign(pid, sid);
            }
        }

        if self.servers.iter().any(|s| s.state() == CbsState::Ready && s.has_pending_jobs()) {
            self.maybe_wake_sleeping_processor();
        }
        self.sleep_remaining_idle_processors();
    }

    fn assign(&mut self, pid: ProcessorId, sid: ServerId) {
        tracing::debug!(processor = pid.0, server = sid.0, deadline = ?self.servers[sid.0].deadline(), "dispatch assign");
        if let Some(id) = self.proc_runtime[pid.0].dpm_sleep_timer.take() {
            self.engine.cancel(id);
        }
        if self.servers[sid.0].state() == CbsState::Ready {
            self.servers[sid.0].dispatch();
        }
        let job = self.servers[sid.0].dequeue_job().expect("assign requires a queued job");
        self.processor_to_server[pid.0] = Some(sid);
        self.server_to_processor[sid.0] = Some(pid);
        self.sync_queued_deadline_timer(sid);

        let now = self.engine.now();
        self.proc_runtime[pid.0].last_update = now;
        let ctx_delay = self.platform.processor_type(self.platform.processors()[pid.0].processor_type).context_switch_delay;
        if ctx_delay.is_zero() {
            let job_id = job.id;
            self.processors[pid.0].current_job = Some(job);
            self.processors[pid.0].state = ProcessorState::Running;
            self.notify_power_for_processor(pid);
            self.engine.trace(
                "job_start",
                &[("job", (job_id.0 as i64).into()), ("server", (sid.0 as i64).into()), ("processor", (pid.0 as i64).into())],
            );
            self.engine.trace("proc_activated", &[("processor", (pid.0 as i64).into())]);
            self.schedule_completion(pid);
        } else {
            self.processors[pid.0].pending_job = Some(job);
            self.processors[pid.0].state = ProcessorState::ContextSwitching;
            let id = self.engine.schedule(now + ctx_delay, EventPriority::ProcessorAvailable, Event::ContextSwitchDone { processor: pid });
            self.proc_runtime[pid.0].transition_timer = Some(id);
        }
    }

    fn on_context_switch_complete(&mut self, pid: ProcessorId) {
        self.proc_runtime[pid.0].transition_timer = None;
        let job = self.processors[pid.0].pending_job.take();
        let job_id = job.as_ref().map(|j| j.id);
        self.processors[pid.0].current_job = job;
        self.processors[pid.0].state = ProcessorState::Running;
        self.proc_runtime[pid.0].last_update = self.engine.now();
        self.notify_power_for_processor(pid);
        if let Some(job_id) = job_id {
            self.engine.trace("job_start", &[("job", (job_id.0 as i64).into()), ("processor", (pid.0 as i64).into())]);
        }
        self.engine.trace("proc_activated", &[("processor", (pid.0 as i64).into())]);
        self.schedule_completion(pid);
    }

    fn preempt_processor(&mut self, pid: ProcessorId) {
        self.flush_running_processor(pid);
        let sid = self.processor_to_server[pid.0].expect("preempt of unmapped processor");
        self.cancel_processor_timers(pid);
        self.cancel_budget_timer(sid);
        let job = self.processors[pid.0].current_job.take().expect("preempt without job");
        self.engine.trace(
            "preemption",
            &[("job", (job.id.0 as i64).into()), ("server", (sid.0 as i64).into()), ("processor", (pid.0 as i64).into())],
        );
        self.servers[sid.0].push_front_job(job);
        self.servers[sid.0].preempt();
        self.processor_to_server[pid.0] = None;
        self.server_to_processor[sid.0] = None;
        self.processors[pid.0].state = ProcessorState::Idle;
        self.sync_queued_deadline_timer(sid);
    }

    /// `OverrunPolicy::Abort` while the server's job is already running: the
    /// replacement job is already queued (`CbsServer::enqueue_job`), so this
    /// only needs to discard the job on the processor and drop the server
    /// back to Ready so `dispatch_edf` redispatches it onto the new job.
    fn abort_running_overrun(&mut self, sid: ServerId) {
        let pid = self.server_to_processor[sid.0].expect("abort-on-overrun requires a running job");
        self.flush_running_processor(pid);
        self.cancel_processor_timers(pid);
        self.cancel_budget_timer(sid);
        self.processors[pid.0].current_job.take().expect("abort-on-overrun without job");
        self.servers[sid.0].preempt();
        self.release_processor_idle(pid);
    }

    fn release_processor_idle(&mut self, pid: ProcessorId) {
        if let Some(sid) = self.processor_to_server[pid.0].take() {
            self.server_to_processor[sid.0] = None;
        }
        self.processors[pid.0].state = ProcessorState::Idle;
        self.engine.trace("proc_idled", &[("processor", (pid.0 as i64).into())]);
    }

    // ---- running-job accounting -------------------------------------------

    /// Flush real elapsed time on a running processor into its job's
    /// remaining work (scaled by the processor's current speed) and its
    /// server's budget/virtual time (unscaled: CBS budget is wall-clock
    /// processor time, not work).
    fn flush_running_processor(&mut self, pid: ProcessorId) {
        if !self.processors[pid.0].is_running() {
            return;
        }
        let now = self.engine.now();
        let elapsed = (now - self.proc_runtime[pid.0].last_update).max(Duration::ZERO);
        self.proc_runtime[pid.0].last_update = now;
        if elapsed.is_zero() {
            return;
        }
        let speed = self.platform.speed(&self.platform.processors()[pid.0]).max(crate::core::time::ZERO_EPSILON);
        let work = Duration::from_seconds(elapsed.as_seconds() * speed);
        if let Some(job) = self.processors[pid.0].current_job.as_mut() {
            job.consume_work(work);
        }
        if let Some(sid) = self.processor_to_server[pid.0] {
            self.servers[sid.0].consume_budget(elapsed);
            match self.reclamation.compute_virtual_time(&self.servers[sid.0], elapsed) {
                Some(vt) => self.servers[sid.0].set_virtual_time(vt),
                None => self.servers[sid.0].update_virtual_time(elapsed),
            }
            self.engine.trace(
                "virtual_time_update",
                &[("server", (sid.0 as i64).into()), ("virtual_time", self.servers[sid.0].virtual_time().as_seconds().into())],
            );
        }
    }

    fn schedule_completion(&mut self, pid: ProcessorId) {
        let now = self.engine.now();
        let speed = self.platform.speed(&self.platform.processors()[pid.0]).max(crate::core::time::ZERO_EPSILON);
        let job = self.processors[pid.0].current_job.as_ref().expect("schedule_completion without job");
        let completion_at = now + Duration::from_seconds(job.remaining_work.as_seconds() / speed);
        let deadline = job.absolute_deadline;

        if let Some(id) = self.proc_runtime[pid.0].completion_timer.take() {
            self.engine.cancel(id);
        }
        let id = self.engine.schedule(completion_at, EventPriority::JobCompletion, Event::JobCompletion { processor: pid });
        self.proc_runtime[pid.0].completion_timer = Some(id);

        if let Some(id) = self.proc_runtime[pid.0].deadline_timer.take() {
            self.engine.cancel(id);
        }
        let id = self.engine.schedule(deadline, EventPriority::DeadlineMiss, Event::ProcessorDeadlineMiss { processor: pid });
        self.proc_runtime[pid.0].deadline_timer = Some(id);

        let sid = self.processor_to_server[pid.0].expect("schedule_completion without mapped server");
        self.schedule_budget_timer(sid);
    }

    fn schedule_budget_timer(&mut self, sid: ServerId) {
        if let Some(id) = self.server_runtime[sid.0].budget_timer.take() {
            self.engine.cancel(id);
        }
        let fire_at = self.engine.now() + self.servers[sid.0].remaining_budget();
        let id = self.engine.schedule(fire_at, EventPriority::TimerDefault, Event::BudgetExhausted { server: sid });
        self.server_runtime[sid.0].budget_timer = Some(id);
    }

    fn cancel_processor_timers(&mut self, pid: ProcessorId) {
        if let Some(id) = self.proc_runtime[pid.0].completion_timer.take() {
            self.engine.cancel(id);
        }
        if let Some(id) = self.proc_runtime[pid.0].deadline_timer.take() {
            self.engine.cancel(id);
        }
    }

    fn cancel_budget_timer(&mut self, sid: ServerId) {
        if let Some(id) = self.server_runtime[sid.0].budget_timer.take() {
            self.engine.cancel(id);
        }
    }

    fn arm_non_contending_deadline(&mut self, sid: ServerId) {
        let deadline = self.servers[sid.0].deadline();
        let id = self.engine.schedule(deadline, EventPriority::TimerDefault, Event::NonContendingDeadline { server: sid });
        self.server_runtime[sid.0].non_contending_deadline_timer = Some(id);
    }

    fn cancel_non_contending_deadline(&mut self, sid: ServerId) {
        if let Some(id) = self.server_runtime[sid.0].non_contending_deadline_timer.take() {
            self.engine.cancel(id);
        }
    }

    /// Arm (or disarm) the timer guarding a job sitting in the Ready queue
    /// that has not yet been dispatched: once running, its own
    /// `ProcessorDeadlineMiss` timer takes over.
    fn sync_queued_deadline_timer(&mut self, sid: ServerId) {
        if let Some(id) = self.server_runtime[sid.0].queued_deadline_timer.take() {
            self.engine.cancel(id);
        }
        if self.servers[sid.0].state() == CbsState::Ready {
            if let Some(job) = self.servers[sid.0].current_job() {
                let deadline = job.absolute_deadline;
                let id = self.engine.schedule(deadline, EventPriority::DeadlineMiss, Event::QueuedDeadlineMiss { server: sid });
                self.server_runtime[sid.0].queued_deadline_timer = Some(id);
            }
        }
    }

    // ---- completion / deadline miss / budget exhaustion -------------------

    fn on_job_completion(&mut self, pid: ProcessorId) {
        self.flush_running_processor(pid);
        self.cancel_processor_timers(pid);
        let sid = self.processor_to_server[pid.0].expect("completion on unmapped processor");
        self.cancel_budget_timer(sid);

        let job = self.processors[pid.0].current_job.take().expect("completion without job");
        self.engine
            .trace("job_completion", &[("task", (job.task.0 as i64).into()), ("job", (job.id.0 as i64).into()), ("processor", (pid.0 as i64).into())]);

        let has_more = self.servers[sid.0].has_pending_jobs();
        let leftover = self.servers[sid.0].remaining_budget();
        let should_non_contend = !has_more && leftover.is_positive() && self.reclamation.should_enter_non_contending_on_early_completion(&self.servers[sid.0]);

        if should_non_contend {
            let expires_at = self.servers[sid.0].deadline();
            self.reclamation.notify_early_completion(leftover, expires_at);
            self.servers[sid.0].enter_non_contending();
            self.arm_non_contending_deadline(sid);
        } else {
            if !has_more && leftover.is_positive() {
                let expires_at = self.servers[sid.0].deadline();
                self.reclamation.notify_early_completion(leftover, expires_at);
            }
            self.servers[sid.0].complete_job();
        }

        self.release_processor_idle(pid);
        self.sync_queued_deadline_timer(sid);
        self.notify_utilization_changed();
        self.request_dispatch();
    }

    fn on_processor_deadline_miss(&mut self, pid: ProcessorId) {
        self.flush_running_processor(pid);
        self.cancel_processor_timers(pid);
        let sid = self.processor_to_server[pid.0].expect("deadline miss on unmapped processor");
        self.cancel_budget_timer(sid);
        if let Some(job) = self.processors[pid.0].current_job.take() {
            tracing::warn!(task = job.task.0, job = job.id.0, processor = pid.0, "deadline miss");
            self.engine
                .trace("deadline_miss", &[("task", (job.task.0 as i64).into()), ("job", (job.id.0 as i64).into()), ("processor", (pid.0 as i64).into())]);
        }
        self.release_processor_idle(pid);
        self.handle_deadline_miss(sid, DeadlineMissContext::Running);
        self.notify_utilization_changed();
    }

    fn on_queued_deadline_miss(&mut self, sid: ServerId) {
        self.server_runtime[sid.0].queued_deadline_timer = None;
        if let Some(job) = self.servers[sid.0].current_job() {
            self.engine.trace("deadline_miss", &[("task", (job.task.0 as i64).into()), ("job", (job.id.0 as i64).into())]);
        }
        self.handle_deadline_miss(sid, DeadlineMissContext::Queued);
    }

    fn handle_deadline_miss(&mut self, sid: ServerId, ctx: DeadlineMissContext) {
        self.deadline_miss_count += 1;
        if self.deadline_miss_policy == DeadlineMissPolicy::StopSimulation {
            self.stopped = true;
            return;
        }
        if self.deadline_miss_policy == DeadlineMissPolicy::AbortTask {
            self.deactivate_server_fully(sid);
            return;
        }
        if self.deadline_miss_policy == DeadlineMissPolicy::AbortJob && ctx == DeadlineMissContext::Queued {
            self.servers[sid.0].abort_queued_job();
        }
        if ctx == DeadlineMissContext::Running && self.servers[sid.0].state() == CbsState::Running {
            self.servers[sid.0].complete_job();
        }
        self.sync_queued_deadline_timer(sid);
        self.request_dispatch();
    }

    fn deactivate_server_fully(&mut self, sid: ServerId) {
        if let Some(pid) = self.server_to_processor[sid.0] {
            self.flush_running_processor(pid);
            self.cancel_processor_timers(pid);
            self.processors[pid.0].current_job = None;
            self.release_processor_idle(pid);
        }
        self.cancel_budget_timer(sid);
        self.cancel_non_contending_deadline(sid);
        if let Some(id) = self.server_runtime[sid.0].queued_deadline_timer.take() {
            self.engine.cancel(id);
        }
        while self.servers[sid.0].dequeue_job().is_some() {}
        self.total_utilization -= self.servers[sid.0].utilization();
        self.task_to_server.retain(|_, v| *v != sid);
        self.notify_utilization_changed();
        self.request_dispatch();
    }

    /// Budget hits zero while a job is still running. The CASH fix: when
    /// reclaimed capacity is available, resume on it without touching the
    /// deadline; only fall back to the standard postponement when there is
    /// none. The original always postponed even when granting extra
    /// budget, which is the double-effect bug this spec calls out.
    fn on_budget_exhausted(&mut self, sid: ServerId) {
        self.server_runtime[sid.0].budget_timer = None;
        let pid = self.server_to_processor[sid.0];
        if let Some(pid) = pid {
            self.flush_running_processor(pid);
        }
        self.engine.trace("budget_exhausted", &[("server", (sid.0 as i64).into())]);
        let now = self.engine.now();
        let extra = self.reclamation.extra_budget_on_exhaustion(&self.servers[sid.0], now);
        if extra.is_positive() {
            self.servers[sid.0].resume_with_reclaimed_budget(extra);
        } else {
            self.servers[sid.0].exhaust_budget();
        }

        if let Some(pid) = pid {
            self.servers[sid.0].dispatch();
            self.schedule_completion(pid);
        }
        self.sync_queued_deadline_timer(sid);
        self.notify_utilization_changed();
        self.request_dispatch();
    }

    fn on_non_contending_deadline(&mut self, sid: ServerId) {
        self.server_runtime[sid.0].non_contending_deadline_timer = None;
        if self.servers[sid.0].state() == CbsState::NonContending {
            self.servers[sid.0].reach_deadline();
            self.notify_utilization_changed();
        }
    }

    // ---- DPM ---------------------------------------------------------------

    fn consider_dpm_sleep(&mut self, pid: ProcessorId) {
        let Some(dpm) = &self.dpm else { return };
        if !self.processors[pid.0].is_idle() {
            return;
        }
        let spec = self.platform.processors()[pid.0];
        let Some(decision) = dpm.decide_sleep(self.platform.power_domain(spec.power_domain), self.platform.clock_domain(spec.clock_domain)) else {
            return;
        };
        let fire_at = self.engine.now() + decision.after;
        let id = self.engine.schedule(fire_at, EventPriority::TimerDefault, Event::DpmSleepReady { processor: pid, level: decision.level });
        self.proc_runtime[pid.0].dpm_sleep_timer = Some(id);
    }

    fn sleep_remaining_idle_processors(&mut self) {
        for idx in 0..self.processors.len() {
            let pid = ProcessorId(idx);
            if self.processors[idx].is_idle() && self.proc_runtime[idx].dpm_sleep_timer.is_none() {
                self.consider_dpm_sleep(pid);
            }
        }
    }

    fn on_dpm_sleep_ready(&mut self, pid: ProcessorId, _level: u32) {
        self.proc_runtime[pid.0].dpm_sleep_timer = None;
        if !self.processors[pid.0].is_idle() {
            return; // reassigned before the idle-delay elapsed
        }
        self.force_sleep(pid);
    }

    /// Proactively wake one sleeping processor when a server is waiting to
    /// run and every non-sleeping processor is already occupied, rather
    /// than letting it sit queued until something else frees up.
    fn maybe_wake_sleeping_processor(&mut self) {
        let free_idle = self.processors.iter().filter(|p| p.is_idle()).count();
        if free_idle > 0 {
            return;
        }
        if let Some(pid) = self.processors.iter().find(|p| p.is_sleeping()).map(|p| p.id) {
            self.begin_wake_up(pid);
        }
    }

    fn begin_wake_up(&mut self, pid: ProcessorId) {
        let spec = self.platform.processors()[pid.0];
        let level = self.processors[pid.0].current_cstate_level;
        let wake_latency = self.platform.power_domain(spec.power_domain).c_state(level).map(|c| c.wake_latency).unwrap_or(Duration::ZERO);
        self.processors[pid.0].state = ProcessorState::ContextSwitching;
        let id = self.engine.schedule(self.engine.now() + wake_latency, EventPriority::ProcessorAvailable, Event::WakeUpDone { processor: pid });
        self.proc_runtime[pid.0].transition_timer = Some(id);
    }

    fn on_wake_up_complete(&mut self, pid: ProcessorId) {
        self.proc_runtime[pid.0].transition_timer = None;
        self.processors[pid.0].state = ProcessorState::Idle;
        self.processors[pid.0].current_cstate_level = 0;
        self.notify_power_for_processor(pid);
        self.request_dispatch();
    }

    // ---- DVFS ---------------------------------------------------------------

    fn active_bandwidth(&self) -> (f64, f64) {
        let mut active = 0.0;
        let mut max_u: f64 = 0.0;
        for s in &self.servers {
            if matches!(s.state(), CbsState::Ready | CbsState::Running | CbsState::NonContending) {
                let u = s.utilization();
                active += u;
                max_u = max_u.max(u);
            }
        }
        (active, max_u)
    }

    fn notify_utilization_changed(&mut self) {
        let (active, max_u) = self.active_bandwidth();
        self.reclamation.notify_active_utilization(active, self.processors.len());
        let Some(dvfs) = self.dvfs.as_ref() else { return };
        let total_processors = self.processors.len();

        // Collect every domain's target first: `dvfs` borrows `self.dvfs`,
        // and applying a decision needs `&mut self`, so the two passes can't
        // interleave.
        let mut decisions = Vec::new();
        for idx in 0..self.platform.clock_domains().len() {
            let domain_id = ClockDomainId(idx);
            let domain = self.platform.clock_domain(domain_id);
            if domain.locked {
                continue;
            }
            let decision = dvfs.compute_target(active, max_u, total_processors, domain);
            decisions.push((domain_id, decision));
        }
        for (domain_id, decision) in decisions {
            self.maybe_apply_dvfs(domain_id, decision.frequency);
            self.apply_core_sleep_target(domain_id, decision.active_processors);
        }
    }

    /// FFA/CSF trade cores for frequency: once a domain's target says only
    /// `active_processors` of its cores are needed, sleep the rest
    /// immediately rather than waiting for them to go idle on their own and
    /// run out the DPM idle-delay. Only puts processors to sleep — waking
    /// spare capacity back up happens on demand in
    /// [`Self::maybe_wake_sleeping_processor`], same as plain DPM.
    fn apply_core_sleep_target(&mut self, domain_id: ClockDomainId, active_processors: usize) {
        let procs = self.domain_processors(domain_id);
        let desired_sleep = procs.len().saturating_sub(active_processors.max(1));
        let mut sent_to_sleep = 0;
        for pid in procs {
            if sent_to_sleep >= desired_sleep {
                break;
            }
            if self.processors[pid.0].is_idle() {
                self.force_sleep(pid);
                sent_to_sleep += 1;
            }
        }
    }

    /// Put an idle processor straight to its power domain's deepest sleep
    /// state, bypassing any pending DPM idle-delay timer. Shared by the DVFS
    /// core-count enforcement above and the DPM idle-delay path below.
    fn force_sleep(&mut self, pid: ProcessorId) {
        if let Some(id) = self.proc_runtime[pid.0].dpm_sleep_timer.take() {
            self.engine.cancel(id);
        }
        let spec = self.platform.processors()[pid.0];
        let Some(level) = self.platform.power_domain(spec.power_domain).deepest_sleep_state().map(|c| c.level) else { return };
        self.processors[pid.0].state = ProcessorState::Sleep;
        self.processors[pid.0].current_cstate_level = level;
        self.notify_power_for_processor(pid);
        self.engine.trace("proc_sleep", &[("processor", (pid.0 as i64).into()), ("level", (level as i64).into())]);
    }

    fn maybe_apply_dvfs(&mut self, domain_id: ClockDomainId, requested: Frequency) {
        if self.domain_changing[domain_id.0] {
            return;
        }
        let now = self.engine.now();
        let cooldown = self.dvfs.as_ref().expect("maybe_apply_dvfs requires a dvfs policy").cooldown();
        if let Some(last) = self.domain_last_change[domain_id.0] {
            if now - last < cooldown {
                return;
            }
        }
        let domain = self.platform.clock_domain(domain_id);
        if domain.round_up(requested).as_mhz() == domain.current_frequency().as_mhz() {
            return;
        }
        tracing::debug!(domain = domain_id.0, from = domain.current_frequency().as_mhz(), to = requested.as_mhz(), "dvfs transition");
        self.begin_dvfs(domain_id, requested);
    }

    fn domain_processors(&self, domain_id: ClockDomainId) -> Vec<ProcessorId> {
        self.platform
            .processors()
            .iter()
            .enumerate()
            .filter(|(_, spec)| spec.clock_domain == domain_id)
            .map(|(idx, _)| ProcessorId(idx))
            .collect()
    }

    fn begin_dvfs(&mut self, domain_id: ClockDomainId, requested: Frequency) {
        let now = self.engine.now();
        self.domain_changing[domain_id.0] = true;
        self.domain_last_change[domain_id.0] = Some(now);

        for pid in self.domain_processors(domain_id) {
            match self.processors[pid.0].state {
                ProcessorState::Running => {
                    self.flush_running_processor(pid);
                    self.cancel_processor_timers(pid);
                    if let Some(sid) = self.processor_to_server[pid.0] {
                        self.cancel_budget_timer(sid);
                    }
                    self.processors[pid.0].pre_dvfs_state = Some(ProcessorState::Running);
                    self.processors[pid.0].state = ProcessorState::Changing;
                }
                ProcessorState::Idle => {
                    if let Some(id) = self.proc_runtime[pid.0].dpm_sleep_timer.take() {
                        self.engine.cancel(id);
                    }
                    self.processors[pid.0].pre_dvfs_state = Some(ProcessorState::Idle);
                    self.processors[pid.0].state = ProcessorState::Changing;
                }
                // ContextSwitching, Sleep and already-Changing processors ride
                // the transition out undisturbed: they pick up the new
                // frequency (already committed to the domain below) the next
                // time they become active.
                _ => {}
            }
        }

        let applied = self.platform.set_frequency(domain_id, requested);
        let transition_delay = self.platform.clock_domain(domain_id).transition_delay;
        let id = self.engine.schedule(now + transition_delay, EventPriority::TimerDefault, Event::DvfsDone { domain: domain_id });
        self.domain_transition_timer[domain_id.0] = Some(id);
        self.engine.trace("frequency_update", &[("domain", (domain_id.0 as i64).into()), ("frequency_mhz", applied.as_mhz().into())]);
    }

    fn on_dvfs_done(&mut self, domain_id: ClockDomainId) {
        self.domain_changing[domain_id.0] = false;
        self.domain_transition_timer[domain_id.0] = None;
        for pid in self.domain_processors(domain_id) {
            if self.processors[pid.0].state != ProcessorState::Changing {
                continue;
            }
            let restored = self.processors[pid.0].pre_dvfs_state.take().unwrap_or(ProcessorState::Idle);
            self.processors[pid.0].state = restored;
            self.proc_runtime[pid.0].last_update = self.engine.now();
            self.notify_power_for_processor(pid);
            match restored {
                ProcessorState::Running => self.schedule_completion(pid),
                ProcessorState::Idle => self.consider_dpm_sleep(pid),
                _ => {}
            }
        }
        self.request_dispatch();
    }

    // ---- energy --------------------------------------------------------------

    fn notify_power_for_processor(&mut self, pid: ProcessorId) {
        let spec = self.platform.processors()[pid.0];
        let power = if self.processors[pid.0].is_sleeping() {
            self.platform
                .power_domain(spec.power_domain)
                .c_state(self.processors[pid.0].current_cstate_level)
                .map(|c| c.sleep_power)
                .unwrap_or(crate::core::time::Power::mw(0.0))
        } else {
            let domain = self.platform.clock_domain(spec.clock_domain);
            domain.power_at(domain.current_frequency())
        };
        self.engine.notify_processor_power(pid.0, power);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::reclamation::{Cash, NoReclaim};
    use crate::core::platform::{PlatformBuilder, PowerCoefficients};

    fn single_core_platform() -> Platform {
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
        b.add_processor(ptype, domain, pd).unwrap();
        b.finalize().unwrap()
    }

    #[test]
    fn admission_rejects_overload() {
        let mut sched = EdfScheduler::new(single_core_platform(), Box::new(NoReclaim));
        let t0 = sched.register_task(Duration::from_seconds(0.6), Duration::from_seconds(1.0), Duration::from_seconds(1.0));
        let t1 = sched.register_task(Duration::from_seconds(0.6), Duration::from_seconds(1.0), Duration::from_seconds(1.0));
        assert!(sched.add_server_for_task(t0, OverrunPolicy::Queue).is_ok());
        assert!(sched.add_server_for_task(t1, OverrunPolicy::Queue).is_err());
    }

    #[test]
    fn single_job_runs_to_completion() {
        let mut sched = EdfScheduler::new(single_core_platform(), Box::new(NoReclaim));
        let t0 = sched.register_task(Duration::from_seconds(0.5), Duration::from_seconds(2.0), Duration::from_seconds(2.0));
        let sid = sched.add_server_for_task(t0, OverrunPolicy::Queue).unwrap();
        sched.schedule_job_arrival(t0, Duration::from_seconds(0.5), TimePoint::ZERO);
        sched.run(Some(TimePoint::from_seconds(5.0)));

        assert_eq!(sched.servers[sid.0].state(), CbsState::Inactive);
        assert!(!sched.servers[sid.0].has_pending_jobs());
        assert!(sched.processors[0].is_idle());
    }

    #[test]
    fn budget_exhaustion_postpones_deadline_without_reclamation() {
        let mut sched = EdfScheduler::new(single_core_platform(), Box::new(NoReclaim));
        // wcet (1.0) exceeds budget (0.4) within a 2.0s period: budget runs out
        // mid-job and the server's deadline must move one period later.
        let t0 = sched.register_task(Duration::from_seconds(1.0), Duration::from_seconds(2.0), Duration::from_seconds(2.0));
        let sid = sched.add_server(t0, Duration::from_seconds(0.4), Duration::from_seconds(2.0), OverrunPolicy::Queue).unwrap();
        sched.schedule_job_arrival(t0, Duration::from_seconds(1.0), TimePoint::ZERO);
        sched.run(Some(TimePoint::from_seconds(0.5)));

        assert_eq!(sched.servers[sid.0].deadline().as_seconds(), 4.0);
    }

    #[test]
    fn cash_reclaim_avoids_postponing_deadline_twice() {
        let mut sched = EdfScheduler::new(single_core_platform(), Box::new(Cash::new()));
        let t0 = sched.register_task(Duration::from_seconds(0.2), Duration::from_seconds(1.0), Duration::from_seconds(1.0));
        let sid = sched.add_server_for_task(t0, OverrunPolicy::Queue).unwrap();
        sched.reclamation.notify_early_completion(Duration::from_seconds(1.0), TimePoint::from_seconds(100.0));

        let t1 = sched.register_task(Duration::from_seconds(0.5), Duration::from_seconds(2.0), Duration::from_seconds(2.0));
        let sid1 = sched.add_server(t1, Duration::from_seconds(0.1), Duration::from_seconds(2.0), OverrunPolicy::Queue).unwrap();
        let deadline_before = sched.servers[sid1.0].deadline();
        sched.servers[sid1.0].activate(TimePoint::ZERO);
        assert_eq!(sched.servers[sid1.0].deadline().as_seconds(), deadline_before.as_seconds() + 2.0);

        let extra = sched.reclamation.extra_budget_on_exhaustion(&sched.servers[sid1.0], TimePoint::ZERO);
        assert!(extra.is_positive());
        let deadline_pre_exhaustion = sched.servers[sid1.0].deadline();
        sched.servers[sid1.0].dispatch();
        sched.servers[sid1.0].resume_with_reclaimed_budget(extra);
        assert_eq!(sched.servers[sid1.0].deadline(), deadline_pre_exhaustion);
        let _ = sid;
    }

    #[test]
    fn abort_overrun_discards_running_job_for_new_one() {
        let mut sched = EdfScheduler::new(single_core_platform(), Box::new(NoReclaim));
        let t0 = sched.register_task(Duration::from_seconds(1.0), Duration::from_seconds(5.0), Duration::from_seconds(5.0));
        let sid = sched.add_server(t0, Duration::from_seconds(1.0), Duration::from_seconds(5.0), OverrunPolicy::Abort).unwrap();
        sched.schedule_job_arrival(t0, Duration::from_seconds(1.0), TimePoint::ZERO);
        // Second job for the same task arrives while the first is still running:
        // Abort must discard the running job, not just append to the (now-empty)
        // server queue behind it.
        sched.schedule_job_arrival(t0, Duration::from_seconds(0.3), TimePoint::from_seconds(0.1));
        sched.run(Some(TimePoint::from_seconds(0.2)));

        assert_eq!(sched.servers[sid.0].job_queue_size(), 0);
        assert_eq!(sched.processors[0].current_job.as_ref().map(|j| j.remaining_work.as_seconds()), Some(0.3));
    }
}
