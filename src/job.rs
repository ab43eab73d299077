//! Batch identity and lifecycle.

use crate::pipeline::segment::LabelUnit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identifier handed back to the submitter for status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of a batch. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Reading,
    Analyzing,
    Converting,
    Finalizing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Reading => "reading",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Converting => "converting",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// `next` is reachable from `self`: strictly later, and never out of a
    /// terminal state.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next > *self
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted batch: its id, a name for the artifact, and the units in order.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: JobId,
    /// Sanitized base name for the merged PDF.
    pub name: String,
    pub units: Vec<LabelUnit>,
}

impl BatchJob {
    pub fn new(name: impl Into<String>, units: Vec<LabelUnit>) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            units,
        }
    }

    pub fn total(&self) -> usize {
        self.units.len()
    }
}
