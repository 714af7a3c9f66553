//! Execution status codes.
//!
//! `ExecutionStatus` is what `execute` hands back to firmware-style callers:
//! a single `u32`, zero on success. The same numbering is used by the
//! accelerator's `ERR_CODE` register, so a code read from hardware and a code
//! produced by the software model mean the same thing.

use crate::error::DsaError;
use std::fmt;

/// Outcome of one `execute` call.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    /// All K×M outputs written.
    Success = 0,
    /// K, N or M is zero or out of range.
    InvalidDimensions = 1,
    /// A required buffer is missing or too short.
    NullBuffer = 2,
    /// A row stride is shorter than its row.
    InvalidStride = 3,
    /// Multiplier / shift / offset / activation range rejected.
    InvalidQuantization = 4,
    /// The backend lacks a feature the job needs.
    Unsupported = 5,
    /// Operands do not fit in device SRAM.
    ResourceExhausted = 6,
    /// The accelerator reported an error.
    DeviceFault = 7,
    /// The accelerator did not finish in time.
    Timeout = 8,
    /// Device missing or not accessible.
    DeviceUnavailable = 9,
}

impl ExecutionStatus {
    /// Raw status code (0 = success).
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decode a raw status code, `None` for codes this driver does not know.
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::InvalidDimensions,
            2 => Self::NullBuffer,
            3 => Self::InvalidStride,
            4 => Self::InvalidQuantization,
            5 => Self::Unsupported,
            6 => Self::ResourceExhausted,
            7 => Self::DeviceFault,
            8 => Self::Timeout,
            9 => Self::DeviceUnavailable,
            _ => return None,
        })
    }

    /// True only for [`ExecutionStatus::Success`].
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::InvalidDimensions => "INVALID_DIMENSIONS",
            Self::NullBuffer => "NULL_BUFFER",
            Self::InvalidStride => "INVALID_STRIDE",
            Self::InvalidQuantization => "INVALID_QUANTIZATION",
            Self::Unsupported => "UNSUPPORTED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::DeviceFault => "DEVICE_FAULT",
            Self::Timeout => "TIMEOUT",
            Self::DeviceUnavailable => "DEVICE_UNAVAILABLE",
        };
        write!(f, "{name} ({:#010X})", self.code())
    }
}

impl From<&DsaError> for ExecutionStatus {
    fn from(err: &DsaError) -> Self {
        match err {
            DsaError::InvalidDimensions { .. } => Self::InvalidDimensions,
            DsaError::BufferTooSmall { .. } => Self::NullBuffer,
            DsaError::InvalidStride { .. } => Self::InvalidStride,
            DsaError::InvalidQuantization { .. } => Self::InvalidQuantization,
            DsaError::Unsupported { .. } => Self::Unsupported,
            DsaError::SramExhausted { .. } => Self::ResourceExhausted,
            DsaError::HardwareError { .. } => Self::DeviceFault,
            DsaError::Timeout { .. } => Self::Timeout,
            DsaError::DeviceNotFound { .. }
            | DsaError::DeviceUnavailable { .. }
            | DsaError::Io { .. }
            | DsaError::Serialization { .. } => Self::DeviceUnavailable,
        }
    }
}

impl From<crate::Result<()>> for ExecutionStatus {
    fn from(result: crate::Result<()>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(ref e) => Self::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_zero() {
        assert_eq!(ExecutionStatus::Success.code(), 0);
        assert!(ExecutionStatus::Success.is_success());
    }

    #[test]
    fn every_code_round_trips() {
        for code in 0..=9 {
            let s = ExecutionStatus::from_code(code).unwrap();
            assert_eq!(s.code(), code);
            assert_eq!(s.is_success(), code == 0);
        }
        assert_eq!(ExecutionStatus::from_code(0xDEAD), None);
    }

    #[test]
    fn validation_errors_map_to_their_codes() {
        let e = DsaError::invalid_dimensions(0, 1, 1, "K is zero");
        assert_eq!(ExecutionStatus::from(&e), ExecutionStatus::InvalidDimensions);
        let e = DsaError::buffer_too_small("dst", 4, 0);
        assert_eq!(ExecutionStatus::from(&e), ExecutionStatus::NullBuffer);
        let e = DsaError::Timeout { duration_ms: 10 };
        assert_eq!(ExecutionStatus::from(&e), ExecutionStatus::Timeout);
    }

    #[test]
    fn display_includes_hex_code() {
        assert_eq!(ExecutionStatus::Timeout.to_string(), "TIMEOUT (0x00000008)");
    }
}
