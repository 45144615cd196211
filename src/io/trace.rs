//! Trace sink implementations. The core only depends on
//! [`crate::core::engine::TraceWriter`]; these are the production
//! collaborators plugged in behind it, grounded on
//! `original_source/schedlib/src/protocols/traces.cpp`'s ordered
//! `{type, ...fields}` record shape (time is threaded in separately there
//! via the engine clock, same as here).

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::core::engine::TraceWriter;
use crate::core::time::TimePoint;

/// Accumulates `{time, type, ...fields}` records in emission order and
/// serializes them as a single JSON array once the run is over. Held in
/// memory rather than streamed: trace files for the scenarios this
/// simulator targets are small enough that the serde round-trip cost isn't
/// worth avoiding.
///
/// Backed by `Rc<RefCell<..>>` rather than a bare `Vec` so a caller can keep
/// a [`JsonTraceWriter::handle`] after handing the writer itself to
/// [`crate::core::engine::Engine::set_trace_writer`] (which takes ownership
/// of the `Box<dyn TraceWriter>`) and still read the records back once the
/// run finishes.
#[derive(Clone, Default)]
pub struct JsonTraceWriter {
    records: Rc<RefCell<Vec<Value>>>,
}

impl JsonTraceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Self {
        self.clone()
    }

    pub fn records(&self) -> Vec<Value> {
        self.records.borrow().clone()
    }

    pub fn write_to(&self, mut out: impl Write) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(&*self.records.borrow()).expect("trace records always serialize");
        out.write_all(json.as_bytes())?;
        out.write_all(b"\n")
    }
}

impl TraceWriter for JsonTraceWriter {
    fn record(&mut self, time: TimePoint, event_type: &str, fields: &[(&str, Value)]) {
        let mut map = Map::with_capacity(fields.len() + 2);
        map.insert("time".to_string(), Value::from(time.as_seconds()));
        map.insert("type".to_string(), Value::from(event_type));
        for (key, value) in fields {
            map.insert((*key).to_string(), value.clone());
        }
        self.records.borrow_mut().push(Value::Object(map));
    }
}

/// One line per record, for a human watching a run in a terminal. Not a
/// `tracing` subscriber layer: this is trace *data* (the spec's required
/// event stream), while `tracing` macros elsewhere in the crate narrate
/// *control flow* (dispatch decisions, ISR entry) for debugging the engine
/// itself. The two are deliberately separate channels.
pub struct TextTraceWriter<W: Write> {
    out: W,
}

impl<W: Write> TextTraceWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> TraceWriter for TextTraceWriter<W> {
    fn record(&mut self, time: TimePoint, event_type: &str, fields: &[(&str, Value)]) {
        let mut line = format!("{:>12.6} {}", time.as_seconds(), event_type);
        for (key, value) in fields {
            line.push_str(&format!(" {key}={value}"));
        }
        let _ = writeln!(self.out, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::TimePoint;

    #[test]
    fn json_trace_writer_preserves_emission_order() {
        let mut writer = JsonTraceWriter::new();
        writer.record(TimePoint::from_seconds(1.0), "job_arrival", &[("task", Value::from(0))]);
        writer.record(TimePoint::from_seconds(1.0), "resched", &[]);
        assert_eq!(writer.records().len(), 2);
        assert_eq!(writer.records()[0]["type"], Value::from("job_arrival"));
        assert_eq!(writer.records()[1]["type"], Value::from("resched"));
    }

    #[test]
    fn json_trace_writer_serializes_time_field() {
        let mut writer = JsonTraceWriter::new();
        writer.record(TimePoint::from_seconds(2.5), "sim_finished", &[]);
        assert_eq!(writer.records()[0]["time"], Value::from(2.5));
    }
}
