//! Core identifier types for the germweave pipeline executor.
//!
//! These are the small, widely shared types that name things in a running
//! workflow: jobs in the graph and the run itself. Artifact-level types live
//! in [`crate::artifacts`]; they are a separate vocabulary on purpose, since
//! artifact keys outlive the jobs that produced them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one job node within a single engine run.
///
/// Ids are assigned by the engine in registration order and are unique for
/// the lifetime of a run. They carry no meaning across runs.
///
/// # Examples
///
/// ```
/// use germweave::types::JobId;
///
/// let id = JobId::new(3);
/// assert_eq!(id.index(), 3);
/// assert_eq!(format!("{id}"), "job-3");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    #[must_use]
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Identifies one workflow run end to end.
///
/// Generated once at startup and threaded through events and working
/// directory names so concurrent runs on the same host never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh random run identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_ordering_follows_registration_order() {
        assert!(JobId::new(1) < JobId::new(2));
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
    }
}
