//! Result types produced by a conversion.

use crate::error::UnitError;
use crate::pipeline::assemble::ArtifactHandle;
use crate::pipeline::render::ConversionOutcome;
use serde::{Deserialize, Serialize};

/// What happened to one label unit.
#[derive(Debug, Clone)]
pub struct UnitResult {
    /// 1-indexed position of the unit in its batch.
    pub label: usize,
    pub outcome: ConversionOutcome,
    /// Attempts consumed (1 ..= max_attempts).
    pub attempts: u32,
    pub duration_ms: u64,
}

impl UnitResult {
    pub fn is_rendered(&self) -> bool {
        matches!(self.outcome, ConversionOutcome::Rendered(_))
    }

    pub fn error(&self) -> Option<&UnitError> {
        match &self.outcome {
            ConversionOutcome::Failed(e) => Some(e),
            ConversionOutcome::Rendered(_) => None,
        }
    }

    /// Rendered page bytes, if any.
    pub fn page(&self) -> Option<&[u8]> {
        match &self.outcome {
            ConversionOutcome::Rendered(bytes) => Some(bytes),
            ConversionOutcome::Failed(_) => None,
        }
    }
}

/// Summary of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_units: usize,
    pub rendered_units: usize,
    /// Units dropped after exhausting their attempts.
    pub failed_units: usize,
    pub total_attempts: u64,
    pub duration_ms: u64,
}

impl ConversionStats {
    pub(crate) fn from_results(total_units: usize, results: &[UnitResult], duration_ms: u64) -> Self {
        let rendered_units = results.iter().filter(|r| r.is_rendered()).count();
        Self {
            total_units,
            rendered_units,
            failed_units: results.len() - rendered_units,
            total_attempts: results.iter().map(|r| u64::from(r.attempts)).sum(),
            duration_ms,
        }
    }
}

/// Output of a background batch: the stored artifact plus stats.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub artifact: ArtifactHandle,
    pub stats: ConversionStats,
}

/// Output of an in-memory conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// The merged PDF.
    pub pdf: Vec<u8>,
    /// Per-unit results, in submission order.
    pub units: Vec<UnitResult>,
    pub stats: ConversionStats,
}
