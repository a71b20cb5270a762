//! Error taxonomy shared by every workspace component.
//!
//! Remote failures are normalized into [`WorkspaceError`] by the catalog
//! client; nothing transport-specific crosses that boundary. Batch operations
//! that may partly succeed report through [`BatchReport`] instead of failing
//! as a whole.

use serde::Serialize;

pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkspaceError {
    #[error("not signed in")]
    Unauthenticated,
    #[error("authorization required: {0}")]
    Unauthorized(String),
    #[error("storage root not found: {0}")]
    NotFound(String),
    #[error("project {project} has no remote folder path configured")]
    NotConfigured { project: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("rate limited by the catalog service, retry later")]
    RateLimited,
    #[error("catalog service error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("catalog service unreachable: {0}")]
    Transport(String),
    #[error("local cache full writing {key}: {needed} bytes needed, {available} available")]
    QuotaExceeded {
        key: String,
        needed: u64,
        available: u64,
    },
    #[error("local cache error: {0}")]
    Cache(String),
    #[error("invalid location: {0}")]
    InvalidLocation(String),
    #[error("unknown project {0}")]
    UnknownProject(String),
}

impl WorkspaceError {
    /// Classify a non-success HTTP status returned by the catalog service.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => WorkspaceError::Unauthorized(message),
            404 => WorkspaceError::NotFound(message),
            422 => WorkspaceError::Rejected(message),
            429 => WorkspaceError::RateLimited,
            _ => WorkspaceError::Server { status, message },
        }
    }

    /// Errors the user should not be shown a toast for.
    pub fn is_silent(&self) -> bool {
        matches!(self, WorkspaceError::Unauthenticated)
    }
}

/// One failed item of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub id: String,
    pub name: String,
    pub reason: String,
}

/// Succeeded/failed breakdown of a batch operation (the partial-failure report).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn succeed(&mut self, id: impl Into<String>) {
        self.succeeded.push(id.into());
    }

    pub fn fail(&mut self, id: impl Into<String>, name: impl Into<String>, reason: impl ToString) {
        self.failed.push(BatchFailure {
            id: id.into(),
            name: name.into(),
            reason: reason.to_string(),
        });
    }

    /// Some items succeeded and some failed.
    pub fn is_partial(&self) -> bool {
        !self.succeeded.is_empty() && !self.failed.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        );
        if !self.failed.is_empty() {
            let details: Vec<String> = self
                .failed
                .iter()
                .map(|f| format!("{}: {}", f.name, f.reason))
                .collect();
            out.push_str(&format!(" ({})", details.join("; ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            WorkspaceError::from_status(401, "expired"),
            WorkspaceError::Unauthorized("expired".to_string())
        );
        assert_eq!(
            WorkspaceError::from_status(404, "gone"),
            WorkspaceError::NotFound("gone".to_string())
        );
        assert_eq!(
            WorkspaceError::from_status(422, "bad name"),
            WorkspaceError::Rejected("bad name".to_string())
        );
        assert_eq!(WorkspaceError::from_status(429, ""), WorkspaceError::RateLimited);
        assert!(matches!(
            WorkspaceError::from_status(503, "down"),
            WorkspaceError::Server { status: 503, .. }
        ));
    }

    #[test]
    fn report_summary_lists_failures() {
        let mut report = BatchReport::default();
        report.succeed("a");
        report.fail("b", "b.txt", "too large");
        assert!(report.is_partial());
        assert!(!report.is_clean());
        assert_eq!(report.summary(), "1 succeeded, 1 failed (b.txt: too large)");
    }
}
