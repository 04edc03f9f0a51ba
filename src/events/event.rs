use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::JobId;

/// One structured progress event emitted during a run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    Job(JobEvent),
    Diagnostic(DiagnosticEvent),
}

impl Event {
    /// Job-scoped event carrying the job's id and display name.
    pub fn job(
        job_id: JobId,
        name: impl Into<String>,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Job(JobEvent {
            job_id,
            name: name.into(),
            scope: scope.into(),
            message: message.into(),
            when: Utc::now(),
        })
    }

    /// Run-level diagnostic not tied to a particular job.
    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
            when: Utc::now(),
        })
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        match self {
            Event::Job(e) => &e.scope,
            Event::Diagnostic(e) => &e.scope,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Event::Job(e) => &e.message,
            Event::Diagnostic(e) => &e.message,
        }
    }

    /// Normalized JSON form for sinks that forward to structured logs.
    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Event::Job(e) => json!({
                "type": "job",
                "job_id": e.job_id.index(),
                "name": e.name,
                "scope": e.scope,
                "message": e.message,
                "timestamp": e.when.to_rfc3339(),
            }),
            Event::Diagnostic(e) => json!({
                "type": "diagnostic",
                "scope": e.scope,
                "message": e.message,
                "timestamp": e.when.to_rfc3339(),
            }),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Job(e) => write!(f, "[{} {}] {}: {}", e.job_id, e.name, e.scope, e.message),
            Event::Diagnostic(e) => write!(f, "{}: {}", e.scope, e.message),
        }
    }
}

/// Event scoped to one job node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub name: String,
    pub scope: String,
    pub message: String,
    pub when: DateTime<Utc>,
}

/// Run-level diagnostic event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub scope: String,
    pub message: String,
    pub when: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_event_json_shape() {
        let event = Event::job(JobId::new(2), "genotype", "dispatch", "started");
        let json = event.to_json_value();
        assert_eq!(json["type"], "job");
        assert_eq!(json["job_id"], 2);
        assert_eq!(json["scope"], "dispatch");
    }

    #[test]
    fn display_includes_job_identity() {
        let event = Event::job(JobId::new(7), "faidx", "dispatch", "succeeded");
        assert_eq!(format!("{event}"), "[job-7 faidx] dispatch: succeeded");
    }
}
