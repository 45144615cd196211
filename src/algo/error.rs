/// A server could not be admitted because its utilization would push the
/// scheduler's total beyond the admissible capacity bound.
///
/// Recoverable: callers are expected to handle this (reject the task,
/// report it to the user), not treat it as a programmer error.
#[derive(Debug)]
pub struct AdmissionError {
    pub requested_utilization: f64,
    pub current_utilization: f64,
    pub capacity: f64,
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "admission rejected: {:.4} + {:.4} > capacity {:.4}",
            self.current_utilization, self.requested_utilization, self.capacity
        )
    }
}

impl std::error::Error for AdmissionError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AdmissionTest {
    #[default]
    CapacityBound,
}

impl AdmissionTest {
    /// `total_utilization + Q/T <= m`
    pub fn admits(&self, current_utilization: f64, requested_utilization: f64, processor_count: usize) -> bool {
        match self {
            AdmissionTest::CapacityBound => current_utilization + requested_utilization <= processor_count as f64 + 1e-9,
        }
    }
}
