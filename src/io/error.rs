/// A malformed or incomplete platform/scenario file, or a dangling
/// reference between its sections (`processors[2].clock_domain` naming an
/// id nobody declared).
///
/// Recoverable only in the sense that the caller can report it and refuse
/// to start the simulation; there is no partial-load fallback, matching the
/// original loader's `throw LoaderError(message, context)` on first bad
/// field rather than collecting every error in the file.
#[derive(Debug)]
pub struct LoaderError {
    pub context: String,
    pub message: String,
}

impl LoaderError {
    pub fn new(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self { context: context.into(), message: message.into() }
    }
}

impl std::fmt::Display for LoaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

impl std::error::Error for LoaderError {}

impl From<std::io::Error> for LoaderError {
    fn from(err: std::io::Error) -> Self {
        LoaderError::new("io", err.to_string())
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::new("json", err.to_string())
    }
}

pub mod prelude {
    pub use super::LoaderError;
}
