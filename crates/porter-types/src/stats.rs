//! Transfer statistics and progress accounting

use crate::location::Location;
use std::time::Duration;

/// Aggregate accounting for one job
///
/// Skipped items are reported separately from failures: a Skip decision is
/// soft success at the pair level.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferStats {
    /// Number of files fully copied
    pub files_copied: u64,
    /// Number of directories created at the destination
    pub directories_created: u64,
    /// Total payload bytes written
    pub bytes_copied: u64,
    /// Number of entries abandoned on a Skip decision
    pub files_skipped: u64,
    /// Number of errors surfaced to the supervisor
    pub errors: u64,
    /// Number of source entries deleted (move and delete jobs)
    pub files_deleted: u64,
    /// Wall-clock duration of the job
    pub duration: Duration,
}

impl TransferStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Overall transfer rate in bytes per second
    pub fn transfer_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.bytes_copied as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Merge statistics from another instance
    pub fn merge(&mut self, other: &TransferStats) {
        self.files_copied += other.files_copied;
        self.directories_created += other.directories_created;
        self.bytes_copied += other.bytes_copied;
        self.files_skipped += other.files_skipped;
        self.errors += other.errors;
        self.files_deleted += other.files_deleted;
        self.duration += other.duration;
    }
}

/// Point-in-time progress of a running job
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressSnapshot {
    /// Entry currently being processed
    pub current: Location,
    /// Bytes done for the current file
    pub current_bytes: u64,
    /// Recorded size of the current file
    pub current_size: u64,
    /// Entries fully processed so far (skips included)
    pub entries_processed: u64,
    /// Total entries, when pre-measured
    pub total_entries: u64,
    /// Payload bytes done across the job
    pub bytes_processed: u64,
    /// Total payload bytes, when pre-measured
    pub total_bytes: u64,
}

impl ProgressSnapshot {
    /// Progress percentage for the current file
    pub fn current_file_progress(&self) -> f64 {
        if self.current_size > 0 {
            (self.current_bytes as f64 / self.current_size as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Overall progress percentage by bytes
    pub fn overall_progress(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.bytes_processed as f64 / self.total_bytes as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_rate() {
        let mut stats = TransferStats::new();
        stats.bytes_copied = 10 * 1024 * 1024;
        stats.duration = Duration::from_secs(2);
        assert!((stats.transfer_rate() - 5.0 * 1024.0 * 1024.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_percentages() {
        let snap = ProgressSnapshot {
            current: Location::local("/src/a"),
            current_bytes: 512,
            current_size: 1024,
            entries_processed: 1,
            total_entries: 4,
            bytes_processed: 2048,
            total_bytes: 8192,
        };
        assert!((snap.current_file_progress() - 50.0).abs() < f64::EPSILON);
        assert!((snap.overall_progress() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_size_progress() {
        let snap = ProgressSnapshot {
            current: Location::local("/src/empty"),
            current_bytes: 0,
            current_size: 0,
            entries_processed: 0,
            total_entries: 0,
            bytes_processed: 0,
            total_bytes: 0,
        };
        assert_eq!(snap.current_file_progress(), 0.0);
        assert_eq!(snap.overall_progress(), 0.0);
    }
}
