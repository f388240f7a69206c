//! Transfer worker core for Porter
//!
//! This crate implements the cancellable, pausable unit of work behind bulk
//! copy, move and delete: the shared operation-state gate, the blocking
//! error/decision rendezvous with the supervisor, and the worker that
//! streams data in bounded blocks, recurses into directories, propagates
//! metadata and keeps the accounting straight.
//!
//! The worker runs on a dedicated blocking thread and owns all handles and
//! buffers of the pair currently being processed. The supervising side (see
//! `porter-engine`) owns the operation state and the ordered pair queue and
//! communicates through [`StateGate`], [`InteractionHandle`] and the job
//! event channel.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod interaction;
pub mod state;
pub mod worker;

pub use interaction::{interaction, Interaction, InteractionHandle};
pub use state::StateGate;
pub use worker::{TransferWorker, WorkerOptions, DEFAULT_BLOCK_SIZE};
