//! Identities passed from callers into the core
//!
//! Callers own these values; the components only ever hold copies.

/// A string payload entering a queue (print job, order)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Job(String);

impl Job {
    pub fn new(content: impl Into<String>) -> Self {
        Self(content.into())
    }

    /// Get the job content
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Job {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Job {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Numeric identity of an opaque unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
