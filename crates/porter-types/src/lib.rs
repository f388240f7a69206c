//! Core type system and error handling for Porter
//!
//! This crate provides the foundational types shared across the Porter
//! file-operations stack:
//!
//! - **Error handling**: structured error types with kind and retryability
//!   accessors, matching the decision protocol's error categories
//! - **Job model**: job identifiers, operation state, supervisor decisions,
//!   pending-error records and job events
//! - **Locations**: scheme-qualified resource identifiers and immutable
//!   file-metadata snapshots
//! - **Accounting**: transfer statistics and progress snapshots
//!
//! # Examples
//!
//! ```rust
//! use porter_types::{Decision, TransferStats};
//!
//! let mut stats = TransferStats::new();
//! stats.files_copied = 3;
//! stats.bytes_copied = 3 * 1024 * 1024;
//! assert_eq!(Decision::default(), Decision::NoAction);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod job;
pub mod location;
pub mod result;
pub mod stats;

// Re-export commonly used types
pub use error::{Error, ErrorKind};
pub use job::{Decision, JobEvent, JobId, JobKind, JobOutcome, OpState, PendingError, StepOutcome};
pub use location::{FileInfo, FileKind, Location, TransferPair, LOCAL_SCHEME};
pub use result::Result;
pub use stats::{ProgressSnapshot, TransferStats};
