//! Shared helpers for Porter's cross-crate integration tests

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod test_utils;

pub use test_utils::*;
