/*!
Error types for unitig consensus.
Per-read failures are recorded on the read's placement and never abort the unitig; only the structural errors are returned from `UnitigConsensus::generate()`.
*/

use simple_error::SimpleError;
use thiserror::Error;

/// Result type alias for utgcns operations
pub type Result<T> = std::result::Result<T, UtgcnsError>;

/// Error type for utgcns operations
#[derive(Error, Debug)]
pub enum UtgcnsError {
    /// The banded aligner did not find an alignment within the band / error-rate bound
    #[error("No alignment found for query of length {query_len} against target of length {target_len} at error rate {max_error_rate:.4}")]
    AlignmentNotFound {
        /// Length of the query sequence
        query_len: usize,
        /// Length of the target sequence
        target_len: usize,
        /// The error rate bound that was requested
        max_error_rate: f64,
    },

    /// A read could not extend the template, even after widening the search
    #[error("Read {ident} failed to extend the template")]
    ReadExtensionFailed {
        /// The read identifier
        ident: u32,
    },

    /// A read could not be aligned to the finished template
    #[error("Read {ident} failed to align to the template after {attempts} attempts")]
    ReadAlignmentFailed {
        /// The read identifier
        ident: u32,
        /// Number of alignment attempts made
        attempts: usize,
    },

    /// A placement could not be translated through the coordinate map
    #[error("Placement {min}-{max} cannot be mapped onto a template of length {template_len}")]
    UnmappablePosition {
        /// Start of the placement
        min: usize,
        /// End of the placement
        max: usize,
        /// Length of the template the placement refers to
        template_len: usize,
    },

    /// No usable reads were provided
    #[error("Unitig has no usable reads")]
    EmptyInput,

    /// A read violates the input contract
    #[error("Invalid read {ident}: {reason}")]
    InvalidRead {
        /// The read identifier
        ident: u32,
        /// Explanation of the problem
        reason: String,
    },

    /// Invalid configuration value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidConfig {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// The worker pool for read alignment could not be created
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The consensus graph detected an internal inconsistency
    #[error("Consensus graph error: {0}")]
    Graph(#[from] SimpleError),
}

impl UtgcnsError {
    /// Returns true if the error only concerns a single read (or a single alignment attempt) and the unitig can proceed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            UtgcnsError::AlignmentNotFound { .. }
                | UtgcnsError::ReadExtensionFailed { .. }
                | UtgcnsError::ReadAlignmentFailed { .. }
                | UtgcnsError::UnmappablePosition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_alignment_failed() {
        let error = UtgcnsError::ReadAlignmentFailed { ident: 17, attempts: 8 };
        let msg = format!("{error}");
        assert!(msg.contains("Read 17"));
        assert!(msg.contains("8 attempts"));
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_empty_input_is_fatal() {
        let error = UtgcnsError::EmptyInput;
        assert_eq!(error.to_string(), "Unitig has no usable reads");
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_graph_from_simple_error() {
        let error: UtgcnsError = SimpleError::new("edge to a deleted node").into();
        assert_eq!(error.to_string(), "Consensus graph error: edge to a deleted node");
        assert!(!error.is_recoverable());
    }
}
