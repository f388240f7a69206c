//! Result type alias for Porter operations

use crate::Error;

/// Result type alias for Porter operations
pub type Result<T> = std::result::Result<T, Error>;
