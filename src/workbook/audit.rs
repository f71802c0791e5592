//! In-memory audit trail of write operations.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    /// A cell value was changed.
    UpdateCell,
    /// A worksheet was added.
    AddWorksheet,
    /// A cell note was added.
    AddAnnotation,
}

impl OperationType {
    /// Wire name of the operation type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpdateCell => "updateCell",
            Self::AddWorksheet => "addWorksheet",
            Self::AddAnnotation => "addAnnotation",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::UpdateCell, Self::AddWorksheet, Self::AddAnnotation]
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(())
    }
}

/// One recorded write operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unique id (UUID v4).
    pub id: String,
    /// What kind of write it was.
    pub operation_type: OperationType,
    /// Human-readable summary.
    pub description: String,
    /// When the write was saved.
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied reason.
    pub reason: Option<String>,
    /// Operation-specific details.
    pub details: IndexMap<String, Option<String>>,
}

/// Audit trail query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    /// Only entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only entries at or before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Only entries of this operation type (case-insensitive).
    pub operation_type: Option<String>,
    /// Largest number of entries returned.
    pub limit: Option<i64>,
}

/// Audit trail query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrail {
    /// Matching entries, newest first.
    pub entries: Vec<AuditEntry>,
    /// Number of matching entries before `limit` was applied.
    pub total_count: usize,
}

/// Per-process audit log.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write and returns the stored entry.
    pub fn record(
        &self,
        operation_type: OperationType,
        description: String,
        timestamp: DateTime<Utc>,
        reason: Option<String>,
        details: IndexMap<String, Option<String>>,
    ) -> AuditEntry {
        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            operation_type,
            description,
            timestamp,
            reason: reason.filter(|r| !r.trim().is_empty()),
            details,
        };

        tracing::debug!(id = %entry.id, operation = %operation_type, "Recorded audit entry");
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        entry
    }

    /// Returns matching entries, newest first.
    ///
    /// An unrecognised `operation_type` matches nothing.
    #[must_use]
    pub fn query(&self, query: &AuditQuery) -> AuditTrail {
        let operation_filter = query
            .operation_type
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(OperationType::from_str);

        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let matching: Vec<AuditEntry> = entries
            .iter()
            .rev()
            .filter(|e| query.since.is_none_or(|since| e.timestamp >= since))
            .filter(|e| query.until.is_none_or(|until| e.timestamp <= until))
            .filter(|e| match &operation_filter {
                None => true,
                Some(Ok(op)) => e.operation_type == *op,
                Some(Err(())) => false,
            })
            .cloned()
            .collect();
        drop(entries);

        let total_count = matching.len();
        let limit = query
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);

        AuditTrail {
            entries: matching.into_iter().take(limit).collect(),
            total_count,
        }
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
