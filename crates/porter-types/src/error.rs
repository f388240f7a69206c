//! Error types for Porter file operations
//!
//! Every failure the transfer worker can surface through the decision
//! protocol is a variant here, so the supervisor sees the same categories
//! the worker retries on.

/// Main error type for Porter operations
#[derive(thiserror::Error, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// Opening a handle or producing a backend for a location failed
    #[error("I/O error on '{location}': {message}")]
    Io {
        /// Location the handle was requested for
        location: String,
        /// Backend error text
        message: String,
    },

    /// Reading from an open source handle failed
    #[error("failed to read '{location}': {message}")]
    Read {
        /// Source location
        location: String,
        /// Backend error text
        message: String,
    },

    /// Writing to an open destination handle failed
    #[error("failed to write '{location}': {message}")]
    Write {
        /// Destination location
        location: String,
        /// Backend error text
        message: String,
    },

    /// Repositioning a handle for a retry failed
    #[error("failed to seek '{location}'")]
    Seek {
        /// Location of the handle that refused the seek
        location: String,
    },

    /// The source vanished while the operation was in flight
    #[error("source '{location}' no longer exists")]
    Nonexistence {
        /// Location that disappeared
        location: String,
    },

    /// Creating a destination directory failed
    #[error("failed to create directory '{location}': {message}")]
    Mkdir {
        /// Directory location
        location: String,
        /// Backend error text
        message: String,
    },

    /// Deleting a file or directory failed
    #[error("failed to delete '{location}': {message}")]
    DeleteFile {
        /// Location being deleted
        location: String,
        /// Backend error text
        message: String,
    },

    /// The destination storage cannot hold the pending transfer
    #[error("not enough space on target storage: {required} bytes required, {available} available")]
    NotEnoughSpace {
        /// Cumulative size of the pending transfer
        required: u64,
        /// Free bytes reported by the destination storage
        available: u64,
    },

    /// Internal invariant violation, never retryable
    #[error("program error: {message}")]
    Program {
        /// What went wrong
        message: String,
    },

    /// Operation cancelled by the supervisor
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {message}")]
    Config {
        /// What is invalid
        message: String,
    },
}

/// Error kind for categorizing errors across the decision protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Handle or backend creation failure
    Io,
    /// Read failure
    Read,
    /// Write failure
    Write,
    /// Seek failure
    Seek,
    /// Source vanished
    Nonexistence,
    /// Directory creation failure
    Mkdir,
    /// Delete failure
    DeleteFile,
    /// Insufficient destination space
    NotEnoughSpace,
    /// Internal invariant violation
    Program,
    /// Cancellation
    Cancelled,
    /// Configuration failure
    Config,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Read { .. } => ErrorKind::Read,
            Self::Write { .. } => ErrorKind::Write,
            Self::Seek { .. } => ErrorKind::Seek,
            Self::Nonexistence { .. } => ErrorKind::Nonexistence,
            Self::Mkdir { .. } => ErrorKind::Mkdir,
            Self::DeleteFile { .. } => ErrorKind::DeleteFile,
            Self::NotEnoughSpace { .. } => ErrorKind::NotEnoughSpace,
            Self::Program { .. } => ErrorKind::Program,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Whether a Retry decision makes sense for this error
    ///
    /// Program errors are invariant violations and always fatal to their
    /// subtree; cancellation and configuration failures never reach the
    /// decision protocol at all.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Program | ErrorKind::Cancelled | ErrorKind::Config
        )
    }

    /// Create a new handle-creation error
    pub fn io(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a new read error
    pub fn read(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Read {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a new write error
    pub fn write(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Write {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a new seek error
    pub fn seek(location: impl Into<String>) -> Self {
        Self::Seek {
            location: location.into(),
        }
    }

    /// Create a new vanished-source error
    pub fn nonexistence(location: impl Into<String>) -> Self {
        Self::Nonexistence {
            location: location.into(),
        }
    }

    /// Create a new mkdir error
    pub fn mkdir(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mkdir {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a new delete error
    pub fn delete_file(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeleteFile {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a new program error
    pub fn program(message: impl Into<String>) -> Self {
        Self::Program {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_kind_matches_variant(location in ".*", message in ".*") {
            let errors = vec![
                Error::io(location.clone(), message.clone()),
                Error::read(location.clone(), message.clone()),
                Error::write(location.clone(), message.clone()),
                Error::seek(location.clone()),
                Error::nonexistence(location.clone()),
                Error::mkdir(location.clone(), message.clone()),
                Error::delete_file(location.clone(), message.clone()),
                Error::program(message.clone()),
            ];

            for error in errors {
                let kind = error.kind();
                match error {
                    Error::Io { .. } => prop_assert_eq!(kind, ErrorKind::Io),
                    Error::Read { .. } => prop_assert_eq!(kind, ErrorKind::Read),
                    Error::Write { .. } => prop_assert_eq!(kind, ErrorKind::Write),
                    Error::Seek { .. } => prop_assert_eq!(kind, ErrorKind::Seek),
                    Error::Nonexistence { .. } => prop_assert_eq!(kind, ErrorKind::Nonexistence),
                    Error::Mkdir { .. } => prop_assert_eq!(kind, ErrorKind::Mkdir),
                    Error::DeleteFile { .. } => prop_assert_eq!(kind, ErrorKind::DeleteFile),
                    Error::Program { .. } => prop_assert_eq!(kind, ErrorKind::Program),
                    _ => {}
                }
            }
        }

        #[test]
        fn test_program_errors_never_retryable(message in ".*") {
            prop_assert!(!Error::program(message).is_retryable());
        }
    }

    #[test]
    fn test_space_error_display() {
        let err = Error::NotEnoughSpace {
            required: 2048,
            available: 512,
        };
        assert_eq!(err.kind(), ErrorKind::NotEnoughSpace);
        assert!(err.is_retryable());
        let text = err.to_string();
        assert!(text.contains("2048"));
        assert!(text.contains("512"));
    }

    #[test]
    fn test_cancelled_not_retryable() {
        assert!(!Error::Cancelled.is_retryable());
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_retryable_kinds() {
        for err in [
            Error::io("file:///a", "open refused"),
            Error::read("file:///a", "interrupted"),
            Error::write("file:///b", "device full"),
            Error::seek("file:///b"),
            Error::nonexistence("file:///a"),
            Error::mkdir("file:///d", "exists"),
            Error::delete_file("file:///a", "busy"),
        ] {
            assert!(err.is_retryable(), "{err} should be retryable");
        }
    }
}
