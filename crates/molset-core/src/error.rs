use std::path::PathBuf;

/// All errors that can occur within molset.
///
/// Construction-time problems (`Configuration`, `ShapeMismatch`, `Glob`,
/// `Format`) abort dataset assembly; access-time problems (`IndexOutOfBounds`,
/// `FileAccess`) are reported by the call that hit them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required inputs are missing or contradict each other.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Arrays that must line up across files or fields do not.
    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Logical sample index outside `0..len`.
    #[error("index {index} out of bounds for dataset of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A store could not be opened or read, or lacks the groups and fields
    /// a sample store must have.
    #[error("cannot access {}: {reason}", .path.display())]
    FileAccess { path: PathBuf, reason: String },

    /// A glob pattern failed to parse or a matched entry was unreadable.
    #[error("glob pattern {pattern:?}: {reason}")]
    Glob { pattern: String, reason: String },

    /// A file was read but its contents cannot be used (dtype, order, rank).
    #[error("unsupported array in {}: {reason}", .path.display())]
    Format { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Shorthand for a [`Error::ShapeMismatch`].
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl Into<Vec<usize>>,
        got: impl Into<Vec<usize>>,
    ) -> Self {
        Error::ShapeMismatch {
            context: context.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn file_access(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::FileAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result type used throughout molset.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

/// Early return with [`Error::Configuration`].
#[macro_export]
macro_rules! config_bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Configuration(format!($($arg)*)))
    };
}
