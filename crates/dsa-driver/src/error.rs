//! Error types for DSA driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for DSA operations
pub type Result<T> = std::result::Result<T, DsaError>;

/// Errors that can occur while validating or executing a GEMM
#[derive(Debug, Error)]
pub enum DsaError {
    /// K, N or M is zero or exceeds what the backend accepts
    #[error("Invalid dimensions: K={k} N={n} M={m}: {reason}")]
    InvalidDimensions {
        /// Rows of lhs / output
        k: u32,
        /// Inner dimension
        n: u32,
        /// Columns of output
        m: u32,
        /// What is wrong with them
        reason: String,
    },

    /// A required buffer is missing or shorter than its extent
    #[error("Buffer `{operand}` too small: need {required} elements, have {actual}")]
    BufferTooSmall {
        /// Operand name (`lhs`, `rhs`, `bias`, `dst`, ...)
        operand: &'static str,
        /// Elements required by the configured shape and stride
        required: usize,
        /// Elements supplied
        actual: usize,
    },

    /// A row stride is shorter than the row it steps over
    #[error("Invalid stride for `{operand}`: {stride} < row length {row_len}")]
    InvalidStride {
        /// Operand name
        operand: &'static str,
        /// Configured stride in elements
        stride: u32,
        /// Minimum legal stride
        row_len: u32,
    },

    /// Multiplier, shift, offset or activation range rejected
    #[error("Invalid quantization parameters: {reason}")]
    InvalidQuantization {
        /// Reason for rejection
        reason: String,
    },

    /// Backend does not offer a feature the configuration needs
    #[error("Unsupported by {backend}: {feature}")]
    Unsupported {
        /// Backend description
        backend: String,
        /// Missing feature
        feature: String,
    },

    /// Operands do not fit in device SRAM
    #[error("Operands need {required} bytes of SRAM, device has {available}")]
    SramExhausted {
        /// Bytes needed by the staged job
        required: usize,
        /// SRAM window size
        available: usize,
    },

    /// Accelerator raised STATUS.ERROR
    #[error("Hardware error: ERR_CODE={code:#x}")]
    HardwareError {
        /// Raw ERR_CODE register value
        code: u32,
    },

    /// Operation timeout
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Device node not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Device is present but not usable (bad ID, bad mapping, ...)
    #[error("Device unavailable: {reason}")]
    DeviceUnavailable {
        /// Reason for failure
        reason: String,
    },

    /// I/O error during device or file access
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Test-case file could not be encoded or decoded
    #[error("Test case serialization failed: {source}")]
    Serialization {
        /// Underlying serde error
        #[from]
        source: serde_json::Error,
    },
}

impl DsaError {
    /// Create an invalid dimensions error
    pub fn invalid_dimensions(k: u32, n: u32, m: u32, reason: impl Into<String>) -> Self {
        Self::InvalidDimensions {
            k,
            n,
            m,
            reason: reason.into(),
        }
    }

    /// Create a buffer-too-small error
    pub const fn buffer_too_small(operand: &'static str, required: usize, actual: usize) -> Self {
        Self::BufferTooSmall {
            operand,
            required,
            actual,
        }
    }

    /// Create an invalid quantization error
    pub fn invalid_quantization(reason: impl Into<String>) -> Self {
        Self::InvalidQuantization {
            reason: reason.into(),
        }
    }

    /// Create an unsupported-feature error
    pub fn unsupported(backend: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::Unsupported {
            backend: backend.into(),
            feature: feature.into(),
        }
    }

    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a device unavailable error
    pub fn device_unavailable(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    /// True for errors raised by configuration validation, before any device
    /// or buffer was touched.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimensions { .. }
                | Self::BufferTooSmall { .. }
                | Self::InvalidStride { .. }
                | Self::InvalidQuantization { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_operand() {
        let e = DsaError::buffer_too_small("rhs", 12, 4);
        assert_eq!(e.to_string(), "Buffer `rhs` too small: need 12 elements, have 4");
        assert!(e.is_validation());
    }

    #[test]
    fn device_errors_are_not_validation() {
        assert!(!DsaError::Timeout { duration_ms: 5 }.is_validation());
        assert!(!DsaError::HardwareError { code: 7 }.is_validation());
    }
}
