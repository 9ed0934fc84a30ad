//! Job phases and progress snapshots
//!
//! The percentage reported to pollers is derived from the current [`Phase`]
//! through a fixed band table. Only the processing phase scales with the row
//! counters; every other phase maps to a constant. The reported value never
//! moves backwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lower edge of the processing band
const PROCESSING_FLOOR: u8 = 40;
/// Upper edge of the processing band
const PROCESSING_CEILING: u8 = 80;

/// Lifecycle stage of an import job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Starting,
    ReadingHeader,
    ValidatingHeader,
    Counting,
    Processing,
    Persisting,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Starting => "STARTING",
            Phase::ReadingHeader => "READING_HEADER",
            Phase::ValidatingHeader => "VALIDATING_HEADER",
            Phase::Counting => "COUNTING",
            Phase::Processing => "PROCESSING",
            Phase::Persisting => "PERSISTING",
            Phase::Completed => "COMPLETED",
            Phase::Failed => "FAILED",
        }
    }

    /// Fixed percentage for phases that do not scale with row counts
    ///
    /// `None` means "hold the last value".
    fn band(&self) -> Option<u8> {
        match self {
            Phase::Starting | Phase::ReadingHeader => Some(10),
            Phase::ValidatingHeader => Some(20),
            Phase::Counting => Some(30),
            Phase::Processing => Some(PROCESSING_FLOOR),
            Phase::Persisting => Some(90),
            Phase::Completed => Some(100),
            Phase::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a job's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub total_records: u64,
    pub processed_records: u64,
    pub saved_records: u64,
    pub error_records: u64,
    pub current_phase: Phase,
    pub progress_percentage: u8,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            total_records: 0,
            processed_records: 0,
            saved_records: 0,
            error_records: 0,
            current_phase: Phase::Starting,
            progress_percentage: 10,
        }
    }
}

impl ProgressSnapshot {
    pub fn set_phase(&mut self, phase: Phase) {
        self.current_phase = phase;
        self.recompute();
    }

    pub fn add_processed(&mut self, n: u64) {
        self.processed_records += n;
        self.recompute();
    }

    pub fn add_errors(&mut self, n: u64) {
        self.error_records += n;
        self.recompute();
    }

    pub fn add_saved(&mut self, n: u64) {
        self.saved_records += n;
    }

    fn recompute(&mut self) {
        let target = match self.current_phase {
            Phase::Processing => Some(self.processing_percentage()),
            phase => phase.band(),
        };
        if let Some(target) = target {
            self.progress_percentage = self.progress_percentage.max(target);
        }
    }

    /// Scale processed/total onto the 40..=80 band, rounded to the nearest 10
    fn processing_percentage(&self) -> u8 {
        if self.total_records == 0 {
            return PROCESSING_FLOOR;
        }
        let done = self.processed_records.min(self.total_records);
        let span = u64::from(PROCESSING_CEILING - PROCESSING_FLOOR);
        let raw = u64::from(PROCESSING_FLOOR) + done * span / self.total_records;
        let rounded = (raw + 5) / 10 * 10;
        rounded.clamp(u64::from(PROCESSING_FLOOR), u64::from(PROCESSING_CEILING)) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_bands() {
        let mut snapshot = ProgressSnapshot::default();
        assert_eq!(snapshot.progress_percentage, 10);

        snapshot.set_phase(Phase::ValidatingHeader);
        assert_eq!(snapshot.progress_percentage, 20);
        snapshot.set_phase(Phase::Counting);
        assert_eq!(snapshot.progress_percentage, 30);
        snapshot.set_phase(Phase::Processing);
        assert_eq!(snapshot.progress_percentage, 40);
        snapshot.set_phase(Phase::Persisting);
        assert_eq!(snapshot.progress_percentage, 90);
        snapshot.set_phase(Phase::Completed);
        assert_eq!(snapshot.progress_percentage, 100);
    }

    #[test]
    fn test_processing_scales_and_rounds() {
        let mut snapshot = ProgressSnapshot {
            total_records: 1000,
            ..Default::default()
        };
        snapshot.set_phase(Phase::Processing);

        snapshot.add_processed(100); // 44 -> 40
        assert_eq!(snapshot.progress_percentage, 40);
        snapshot.add_processed(30); // 45 -> 50
        assert_eq!(snapshot.progress_percentage, 50);
        snapshot.add_processed(370); // 60
        assert_eq!(snapshot.progress_percentage, 60);
        snapshot.add_processed(500); // 80
        assert_eq!(snapshot.progress_percentage, 80);
    }

    #[test]
    fn test_errors_count_towards_processing_only_via_processed() {
        let mut snapshot = ProgressSnapshot {
            total_records: 10,
            ..Default::default()
        };
        snapshot.set_phase(Phase::Processing);
        snapshot.add_errors(10);
        assert_eq!(snapshot.progress_percentage, 40);
        assert_eq!(snapshot.error_records, 10);
    }

    #[test]
    fn test_failed_holds_last_percentage() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.set_phase(Phase::Counting);
        snapshot.set_phase(Phase::Failed);
        assert_eq!(snapshot.progress_percentage, 30);
        assert!(snapshot.current_phase.is_terminal());
    }

    #[test]
    fn test_percentage_never_decreases() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.set_phase(Phase::Persisting);
        snapshot.set_phase(Phase::Counting);
        assert_eq!(snapshot.progress_percentage, 90);
    }

    #[test]
    fn test_empty_total_stays_at_floor() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.set_phase(Phase::Processing);
        snapshot.add_processed(50);
        assert_eq!(snapshot.progress_percentage, 40);
    }

    #[test]
    fn test_wire_format() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.total_records = 4;
        snapshot.set_phase(Phase::Processing);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["currentPhase"], "PROCESSING");
        assert_eq!(json["totalRecords"], 4);
        assert_eq!(json["progressPercentage"], 40);
        assert!(json.get("savedRecords").is_some());
    }
}
