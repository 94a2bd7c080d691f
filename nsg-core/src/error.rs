//! Error types shared by every NSG operation.

use thiserror::Error;

/// Errors raised while building, searching, or persisting an NSG index.
///
/// Every operation validates its inputs before doing any work, so an error
/// never leaves an index half-updated.
#[derive(Debug, Error)]
pub enum NsgError {
    /// A parameter is out of range or inconsistent with the data
    /// (bad L/R/C, `search_l < k`, dimension or point-count mismatch,
    /// index not built).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A k-NN graph, index, or vector file is truncated or malformed.
    #[error("format error: {0}")]
    Format(String),

    /// A persisted index describes a different number of points than the
    /// vector store it is being loaded against.
    #[error("size mismatch: expected {expected} points, file has {actual}")]
    SizeMismatch {
        /// Point count supplied by the caller.
        expected: usize,
        /// Point count found in the file.
        actual: usize,
    },

    /// Optimized search was requested before `optimize_graph` ran.
    #[error("optimized layout has not been built; call optimize_graph first")]
    NotOptimized,

    /// The optimized layout was built from a graph that has since been
    /// rebuilt or reloaded.
    #[error("optimized layout is stale; call optimize_graph again")]
    StaleLayout,

    /// An input file is empty or could not be opened.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NsgError>;

pub(crate) fn invalid(msg: impl Into<String>) -> NsgError {
    NsgError::InvalidParameter(msg.into())
}

pub(crate) fn format_error(msg: impl Into<String>) -> NsgError {
    NsgError::Format(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(invalid("R must be >= 1").to_string(), "invalid parameter: R must be >= 1");
        assert_eq!(
            NsgError::SizeMismatch { expected: 10, actual: 7 }.to_string(),
            "size mismatch: expected 10 points, file has 7"
        );
        assert!(NsgError::StaleLayout.to_string().contains("optimize_graph"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: NsgError = io.into();
        assert!(matches!(err, NsgError::Io(_)));
    }
}
