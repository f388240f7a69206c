//! Job supervisor for Porter
//!
//! The engine owns the storage registry, accepts [`JobRequest`]s, and runs
//! each one as a [`TransferWorker`](porter_fileops::TransferWorker) on a
//! dedicated blocking thread. The returned [`JobHandle`] is the UI-facing
//! control surface: pause, resume, cancel, answer pending errors, observe
//! events, and await the terminal report.
//!
//! # Examples
//!
//! ```rust,no_run
//! use porter_engine::{Engine, JobRequest};
//! use porter_types::{Location, TransferPair};
//! use porter_vfs::StorageRegistry;
//!
//! # async fn example() -> porter_types::Result<()> {
//! let engine = Engine::new(StorageRegistry::with_local_disk());
//! let pair = TransferPair::new(
//!     Location::local("/home/me/big.iso"),
//!     Location::local("/media/usb/big.iso"),
//! );
//! let mut job = engine.submit(JobRequest::copy(vec![pair])).await?;
//! let report = job.wait().await?;
//! println!("copied {} bytes", report.stats.bytes_copied);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod job;

pub use engine::{Engine, JobHandle, JobReport};
pub use job::JobRequest;
