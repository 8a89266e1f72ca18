//! Error type shared by the whole crate.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    /// Malformed checkpoint content. Never repaired.
    #[error("format error at line {line}: {message}")]
    Format { line: usize, message: String },
    /// No step sequence connects (0,0) to (above, below) under the bounds.
    #[error("not alignable: lengths ({above},{below}) with below bounds [{min_below},{max_below}]")]
    NotAlignable {
        above: usize,
        below: usize,
        min_below: usize,
        max_below: usize,
    },
    /// Internal consistency failure. Indicates a bug.
    #[error("invariant violation: {0}")]
    Invariant(String),
    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AlignError {
    pub(crate) fn format<S: Into<String>>(line: usize, message: S) -> Self {
        AlignError::Format {
            line,
            message: message.into(),
        }
    }
    pub fn is_not_alignable(&self) -> bool {
        matches!(self, AlignError::NotAlignable { .. })
    }
}

pub type Result<T> = std::result::Result<T, AlignError>;
