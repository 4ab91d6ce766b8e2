//! Error types for the annotation pipeline

use std::path::PathBuf;

use disasm::DisassemblyError;
use thiserror::Error;

/// Exit code for a successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for configuration errors.
pub const EXIT_CONFIG: i32 = 1;
/// Exit code for input, disassembly and finder errors.
pub const EXIT_INPUT: i32 = 2;
/// Exit code for output I/O errors.
pub const EXIT_OUTPUT: i32 = 4;

/// Errors from the accessed-address finders.
#[derive(Debug, Error)]
pub enum FinderError {
    #[error("block execution timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("block faulted fatally at address {address:#x} (signal {signal})")]
    FatalFault { address: u64, signal: i32 },

    #[error("accessed-address search did not converge after {rounds} rounds")]
    NotConverged { rounds: usize },

    #[error("address finding is only supported on x86-64 Linux")]
    Unsupported,

    #[error("child process failed: {reason}")]
    Child { reason: String },
}

/// Result type alias for finder operations
pub type FinderResult<T> = Result<T, FinderError>;

/// Errors that abort a pipeline run.
///
/// Each variant that concerns one input block carries the block's hex prefix
/// so the failing record can be located in the input CSV.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("invalid input at line {line_number}: {reason}")]
    InputParse { line_number: usize, reason: String },

    #[error("failed to disassemble block {block_hex}: {source}")]
    Disassembly {
        block_hex: String,
        source: DisassemblyError,
    },

    #[error("failed to annotate block {block_hex}: {source}")]
    Finder {
        block_hex: String,
        source: FinderError,
    },

    #[error("failed to write {path}: {source}")]
    EmitterIo {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config { .. } => EXIT_CONFIG,
            PipelineError::InputParse { .. }
            | PipelineError::Disassembly { .. }
            | PipelineError::Finder { .. } => EXIT_INPUT,
            PipelineError::EmitterIo { .. } => EXIT_OUTPUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FinderError, PipelineError, EXIT_CONFIG, EXIT_INPUT, EXIT_OUTPUT};

    #[test]
    fn test_exit_codes() {
        let config = PipelineError::Config {
            reason: "x".to_string(),
        };
        assert_eq!(config.exit_code(), EXIT_CONFIG);

        let input = PipelineError::InputParse {
            line_number: 3,
            reason: "no comma".to_string(),
        };
        assert_eq!(input.exit_code(), EXIT_INPUT);

        let finder = PipelineError::Finder {
            block_hex: "90".to_string(),
            source: FinderError::Timeout { millis: 2000 },
        };
        assert_eq!(finder.exit_code(), EXIT_INPUT);

        let io = PipelineError::EmitterIo {
            path: "/tmp/x".into(),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(io.exit_code(), EXIT_OUTPUT);
    }

    #[test]
    fn test_diagnostics_name_the_block() {
        let err = PipelineError::Finder {
            block_hex: "4883c101".to_string(),
            source: FinderError::NotConverged { rounds: 64 },
        };
        let message = err.to_string();
        assert!(message.contains("4883c101"));
        assert!(message.contains("64 rounds"));
    }
}
