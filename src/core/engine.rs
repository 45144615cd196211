//! The discrete-event engine: a single timer wheel of typed events.
//!
//! `Engine<E>` deliberately stores plain event payloads rather than boxed
//! closures. A closure-based design would need to capture the very
//! scheduler that owns the engine to react to a fired timer, which has no
//! safe expression in an owned-arena design (the scheduler can't hand out a
//! `&mut self` closure to a structure it also holds by value). Instead the
//! engine just tells its owner "event `E` fired at time `t`"; the owner
//! (`crate::algo::edf_scheduler::EdfScheduler`) drives the run loop and
//! matches on `E` with full access to its own state.
//!
//! Deferred-callback coalescing (multiple triggers within one instant
//! collapsing into a single reaction) is therefore not an engine concern
//! either: it is a boolean flag the owner checks between processing all
//! events that share an instant, using [`Engine::peek_time`] to tell
//! whether more events remain at the same timestamp.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use super::time::{Duration, Energy, Power, TimePoint};

/// Tie-break order for events that share an instant. Deadline misses sort
/// first so policies observe them before a same-instant completion; job
/// completions before a processor merely becoming available (context-switch
/// or wake-up finishing); everything else (budget timers, DVFS transitions,
/// job arrivals) is `TimerDefault`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    DeadlineMiss = 0,
    JobCompletion = 1,
    ProcessorAvailable = 2,
    TimerDefault = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(usize);

#[derive(Debug, PartialEq, Eq)]
struct TimerKey {
    fire_at: ordered_float::OrderedFloat<f64>,
    priority: EventPriority,
    seq: u64,
    id: usize,
}

impl PartialOrd for TimerKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.fire_at, self.priority, self.seq).cmp(&(other.fire_at, other.priority, other.seq))
    }
}

/// Records power-state changes for each processor and integrates them into
/// a total energy figure. Only told about transitions, never polled: a
/// piecewise-constant power segment is closed (and folded into the running
/// total) the instant a new one opens.
#[derive(Default)]
struct EnergyTracker {
    enabled: bool,
    open_segments: HashMap<usize, (Power, TimePoint)>,
    total: Energy,
}

impl EnergyTracker {
    fn notify_power(&mut self, processor: usize, power: Power, at: TimePoint) {
        if !self.enabled {
            return;
        }
        if let Some((prev_power, since)) = self.open_segments.insert(processor, (power, at)) {
            let elapsed = (at - since).as_seconds();
            self.total += Energy::mj(prev_power.as_mw() * elapsed / 1000.0);
        }
    }

    fn finalize(&mut self, at: TimePoint) {
        if !self.enabled {
            return;
        }
        for (_, (power, since)) in self.open_segments.drain() {
            let elapsed = (at - since).as_seconds();
            self.total += Energy::mj(power.as_mw() * elapsed / 1000.0);
        }
    }
}

/// Sink for trace records. The engine treats this purely as a collaborator:
/// `schedsim-io::trace::JsonTraceWriter` is the production implementation,
/// [`NullTraceWriter`] is used when tracing is disabled.
pub trait TraceWriter {
    fn record(&mut self, time: TimePoint, event_type: &str, fields: &[(&str, serde_json::Value)]);
}

pub struct NullTraceWriter;

impl TraceWriter for NullTraceWriter {
    fn record(&mut self, _time: TimePoint, _event_type: &str, _fields: &[(&str, serde_json::Value)]) {}
}

/// A timer wheel over a caller-defined event payload `E`.
pub struct Engine<E> {
    now: TimePoint,
    heap: BinaryHeap<Reverse<TimerKey>>,
    entries: HashMap<usize, E>,
    next_id: usize,
    next_seq: u64,
    trace_writer: Box<dyn TraceWriter>,
    energy: EnergyTracker,
}

impl<E: Copy> Engine<E> {
    pub fn new() -> Self {
        Self {
            now: TimePoint::ZERO,
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            next_id: 0,
            next_seq: 0,
            trace_writer: Box::new(NullTraceWriter),
            energy: EnergyTracker::default(),
        }
    }

    pub fn set_trace_writer(&mut self, writer: Box<dyn TraceWriter>) {
        self.trace_writer = writer;
    }

    pub fn enable_energy_tracking(&mut self, enabled: bool) {
        self.energy.enabled = enabled;
    }

    pub fn total_energy(&self) -> Energy {
        self.energy.total
    }

    pub fn notify_processor_power(&mut self, processor_id: usize, power: Power) {
        let now = self.now;
        self.energy.notify_power(processor_id, power, now);
    }

    pub fn finalize_energy(&mut self) {
        let now = self.now;
        self.energy.finalize(now);
    }

    pub fn now(&self) -> TimePoint {
        self.now
    }

    pub fn trace(&mut self, event_type: &str, fields: &[(&str, serde_json::Value)]) {
        self.trace_writer.record(self.now, event_type, fields);
    }

    /// Schedule a one-shot event at an absolute time.
    pub fn schedule(&mut self, fire_at: TimePoint, priority: EventPriority, event: E) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(id, event);
        self.heap.push(Reverse(TimerKey {
            fire_at: ordered_float::OrderedFloat(fire_at.as_seconds()),
            priority,
            seq,
            id,
        }));
        TimerId(id)
    }

    /// Cancel a pending timer. A no-op if it already fired or was already
    /// cancelled.
    pub fn cancel(&mut self, id: TimerId) {
        self.entries.remove(&id.0);
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.entries.contains_key(&id.0)
    }

    /// The fire time of the next still-pending event, if any, without
    /// consuming it.
    pub fn peek_time(&mut self) -> Option<TimePoint> {
        while let Some(Reverse(key)) = self.heap.peek() {
            if self.entries.contains_key(&key.id) {
                return Some(TimePoint::from_seconds(key.fire_at.into_inner()));
            }
            self.heap.pop();
        }
        None
    }

    /// Pop and return the next pending event (advancing `now` to its fire
    /// time), or `None` if the wheel is empty or the next event is beyond
    /// `until`.
    pub fn next(&mut self, until: Option<TimePoint>) -> Option<E> {
        loop {
            let Reverse(key) = self.heap.pop()?;
            let Some(event) = self.entries.remove(&key.id) else {
                continue; // cancelled
            };
            let fire_at = TimePoint::from_seconds(key.fire_at.into_inner());
            if let Some(until) = until {
                if fire_at > until {
                    return None;
                }
            }
            self.now = fire_at;
            return Some(event);
        }
    }
}

impl<E: Copy> Default for Engine<E> {
    fn default() -> Self {
        Self::new()
    }
}

pub mod prelude {
    pub use super::{Engine, EventPriority, NullTraceWriter, TimerId, TraceWriter};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_fire_in_time_order() {
        let mut engine: Engine<i32> = Engine::new();
        engine.schedule(TimePoint::from_seconds(2.0), EventPriority::TimerDefault, 2);
        engine.schedule(TimePoint::from_seconds(1.0), EventPriority::TimerDefault, 1);

        assert_eq!(engine.next(None), Some(1));
        assert_eq!(engine.next(None), Some(2));
        assert_eq!(engine.next(None), None);
    }

    #[test]
    fn cancelled_event_does_not_fire() {
        let mut engine: Engine<i32> = Engine::new();
        let id = engine.schedule(TimePoint::from_seconds(1.0), EventPriority::TimerDefault, 42);
        engine.cancel(id);
        assert_eq!(engine.next(None), None);
    }

    #[test]
    fn next_respects_until() {
        let mut engine: Engine<i32> = Engine::new();
        engine.schedule(TimePoint::from_seconds(5.0), EventPriority::TimerDefault, 1);
        assert_eq!(engine.next(Some(TimePoint::from_seconds(1.0))), None);
        assert_eq!(engine.now().as_seconds(), 0.0);
    }

    #[test]
    fn peek_time_skips_cancelled_entries() {
        let mut engine: Engine<i32> = Engine::new();
        let id = engine.schedule(TimePoint::from_seconds(1.0), EventPriority::TimerDefault, 1);
        engine.schedule(TimePoint::from_seconds(2.0), EventPriority::TimerDefault, 2);
        engine.cancel(id);
        assert_eq!(engine.peek_time(), Some(TimePoint::from_seconds(2.0)));
    }

    #[test]
    fn same_instant_events_preserve_priority_order() {
        let mut engine: Engine<&'static str> = Engine::new();
        engine.schedule(TimePoint::from_seconds(1.0), EventPriority::TimerDefault, "low");
        engine.schedule(TimePoint::from_seconds(1.0), EventPriority::DeadlineMiss, "high");
        assert_eq!(engine.next(None), Some("high"));
        assert_eq!(engine.next(None), Some("low"));
    }
}
