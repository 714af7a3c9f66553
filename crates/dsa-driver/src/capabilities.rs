//! Device capability querying and representation
//!
//! Nothing about a device is assumed: the MMIO backend reads the identity
//! registers once at open time and every job is checked against the result.

use crate::config::{Lhs, MatmulConfig, RhsLayout};
use crate::error::{DsaError, Result};
use crate::quant::{Rounding, ShiftConvention};
use dsa_chip::regs::{self, features};
use std::fmt;

/// What a backend can execute, discovered at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Raw `DEVICE_ID`
    pub device_id: u32,

    /// Hardware revision `(major, minor)`
    pub version: (u16, u16),

    /// Operand SRAM in bytes (`usize::MAX` for the software model)
    pub sram_bytes: usize,

    /// Largest K, N or M
    pub max_dim: u32,

    /// `dsa_chip::regs::features` bits
    pub features: u32,
}

impl Capabilities {
    /// Capabilities of the software reference: unbounded, every feature.
    pub const fn software() -> Self {
        Self {
            device_id: regs::DSA_DEVICE_ID,
            version: (0, 0),
            sram_bytes: usize::MAX,
            max_dim: u32::MAX,
            features: features::ALL,
        }
    }

    /// Decode the identity registers through `read`.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if `DEVICE_ID` does not identify a DSA,
    /// or the first error `read` reports.
    pub fn from_registers(mut read: impl FnMut(usize) -> Result<u32>) -> Result<Self> {
        let device_id = read(regs::DEVICE_ID)?;
        if device_id != regs::DSA_DEVICE_ID {
            return Err(DsaError::device_unavailable(format!(
                "DEVICE_ID {device_id:#010x}, expected {:#010x}",
                regs::DSA_DEVICE_ID
            )));
        }

        let caps = Self {
            device_id,
            version: regs::split_version(read(regs::VERSION)?),
            sram_bytes: read(regs::SRAM_SIZE)? as usize,
            max_dim: read(regs::MAX_DIM)?,
            features: read(regs::FEATURES)?,
        };
        tracing::debug!("Discovered {caps}");
        Ok(caps)
    }

    /// True if every bit of `feature` is advertised.
    pub const fn has(&self, feature: u32) -> bool {
        self.features & feature == feature
    }

    /// Check that a job uses only advertised features and dimensions.
    ///
    /// # Errors
    ///
    /// - `InvalidDimensions` if K, N or M exceeds `max_dim`
    /// - `Unsupported` naming the first missing feature
    pub fn supports(&self, config: &MatmulConfig<'_>, backend: &str) -> Result<()> {
        let (k, n, m) = (config.k, config.n, config.m);
        if k.max(n).max(m) > self.max_dim {
            return Err(DsaError::invalid_dimensions(
                k,
                n,
                m,
                format!("exceeds device maximum {}", self.max_dim),
            ));
        }

        let needs = [
            (matches!(config.lhs, Lhs::S16(_)), features::LHS_S16, "S16 lhs"),
            (config.per_channel.is_some(), features::PER_CHANNEL, "per-channel requantization"),
            (
                config.rhs_layout == RhsLayout::ColumnMajor,
                features::RHS_COL_MAJOR,
                "column-major rhs",
            ),
            (
                config.policy.shift == ShiftConvention::Signed,
                features::SIGNED_SHIFT,
                "signed shift",
            ),
            (
                config.policy.rounding == Rounding::HalfAwayFromZero,
                features::ROUND_AWAY,
                "round-half-away-from-zero",
            ),
            (config.policy.rounding == Rounding::Floor, features::ROUND_FLOOR, "floor rounding"),
        ];
        for (needed, bit, what) in needs {
            if needed && !self.has(bit) {
                return Err(DsaError::unsupported(backend, what));
            }
        }
        Ok(())
    }

    /// Names of the advertised optional features.
    pub fn feature_names(&self) -> Vec<&'static str> {
        [
            (features::LHS_S16, "lhs-s16"),
            (features::PER_CHANNEL, "per-channel"),
            (features::RHS_COL_MAJOR, "rhs-column-major"),
            (features::SIGNED_SHIFT, "signed-shift"),
            (features::ROUND_AWAY, "round-away"),
            (features::ROUND_FLOOR, "round-floor"),
        ]
        .into_iter()
        .filter(|(bit, _)| self.has(*bit))
        .map(|(_, name)| name)
        .collect()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor) = self.version;
        write!(f, "DSA v{major}.{minor}, max_dim {}, SRAM ", self.max_dim)?;
        if self.sram_bytes == usize::MAX {
            write!(f, "unbounded")?;
        } else {
            write!(f, "{} KB", self.sram_bytes / 1024)?;
        }
        write!(f, ", features [{}]", self.feature_names().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs_with(features: u32) -> impl FnMut(usize) -> Result<u32> {
        move |offset| {
            Ok(match offset {
                regs::DEVICE_ID => regs::DSA_DEVICE_ID,
                regs::VERSION => 0x0001_0003,
                regs::SRAM_SIZE => 64 * 1024,
                regs::MAX_DIM => 64,
                regs::FEATURES => features,
                _ => 0,
            })
        }
    }

    #[test]
    fn decodes_identity_registers() {
        let caps = Capabilities::from_registers(regs_with(features::PER_CHANNEL)).unwrap();
        assert_eq!(caps.version, (1, 3));
        assert_eq!(caps.sram_bytes, 65536);
        assert!(caps.has(features::PER_CHANNEL));
        assert!(!caps.has(features::LHS_S16));
        assert_eq!(caps.feature_names(), vec!["per-channel"]);
    }

    #[test]
    fn wrong_device_id_rejected() {
        let err = Capabilities::from_registers(|_| Ok(0xFFFF_FFFF)).unwrap_err();
        assert!(matches!(err, DsaError::DeviceUnavailable { .. }));
    }

    #[test]
    fn missing_feature_is_unsupported() {
        let caps = Capabilities::from_registers(regs_with(0)).unwrap();
        let lhs = [0i16; 4];
        let rhs = [0i8; 4];
        let mut dst = [0i8; 4];
        let cfg = MatmulConfig::new(2, 2, 2, Lhs::S16(&lhs), &rhs, &mut dst);
        let err = caps.supports(&cfg, "test").unwrap_err();
        assert!(err.to_string().contains("S16 lhs"));
    }

    #[test]
    fn oversized_dimension_rejected() {
        let caps = Capabilities::from_registers(regs_with(features::ALL)).unwrap();
        let lhs = [0i8; 65];
        let rhs = [0i8; 65];
        let mut dst = [0i8; 1];
        let cfg = MatmulConfig::new(1, 65, 1, Lhs::S8(&lhs), &rhs, &mut dst);
        assert!(matches!(
            caps.supports(&cfg, "test"),
            Err(DsaError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn software_supports_everything() {
        let caps = Capabilities::software();
        assert_eq!(caps.features, features::ALL);
        assert!(caps.to_string().contains("unbounded"));
    }
}
