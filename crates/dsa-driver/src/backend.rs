//! Backend abstraction for GEMM execution
//!
//! One trait, interchangeable engines: the software reference model and the
//! register-driven MMIO backend (on a mapped device or the in-process
//! emulator). Callers pick one at runtime through [`select_backend`].

use crate::backends::emulated::EmulatedDsa;
use crate::backends::mmap::MappedBus;
use crate::backends::mmio::{MmioBackend, MmioOptions};
use crate::backends::software::SoftwareBackend;
use crate::capabilities::Capabilities;
use crate::config::MatmulConfig;
use crate::error::Result;
use std::fmt::Debug;
use std::str::FromStr;

/// GEMM backend trait - unified interface for software and hardware engines
pub trait GemmBackend: Debug + Send + Sync {
    /// Initialize backend for the given device locator
    ///
    /// Backends without a device ignore the locator.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be found, mapped or identified.
    fn init(device: &str) -> Result<Self>
    where
        Self: Sized;

    /// Get runtime-discovered capabilities
    fn capabilities(&self) -> &Capabilities;

    /// Run one GEMM, writing K×M results into `config.dst`
    ///
    /// The configuration is validated first; on any error `dst` is left
    /// exactly as the caller supplied it.
    ///
    /// # Errors
    ///
    /// Returns validation errors, `Unsupported`, `SramExhausted`,
    /// `HardwareError` or `Timeout`.
    fn execute(&mut self, config: &mut MatmulConfig<'_>) -> Result<()>;

    /// Get backend type for debugging
    fn backend_type(&self) -> BackendType;

    /// Check if backend is ready
    fn is_ready(&self) -> bool;
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Bit-exact CPU reference model
    Software,

    /// Register-driven engine on a mapped device
    Mmio,

    /// Register-driven engine on the in-process emulator
    Emulated,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "Software (reference)"),
            Self::Mmio => write!(f, "MMIO"),
            Self::Emulated => write!(f, "MMIO (emulated device)"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendSelection {
    /// Mapped device if one opens, otherwise the software reference
    #[default]
    Auto,

    /// Force the software reference model
    Software,

    /// Force the mapped device
    Mmio,

    /// Force the in-process emulator
    Emulated,
}

impl FromStr for BackendSelection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "software" | "sw" => Ok(Self::Software),
            "mmio" | "hw" => Ok(Self::Mmio),
            "emulated" | "emu" => Ok(Self::Emulated),
            other => Err(format!(
                "unknown backend `{other}` (expected auto, software, mmio or emulated)"
            )),
        }
    }
}

/// Select a backend with default polling options
///
/// # Errors
///
/// Returns error if the requested backend cannot be initialized.
pub fn select_backend(selection: BackendSelection, device: &str) -> Result<Box<dyn GemmBackend>> {
    select_backend_with(selection, device, MmioOptions::default())
}

/// Select a backend, applying `options` to MMIO-based engines
///
/// # Errors
///
/// Returns error if the requested backend cannot be initialized. `Auto`
/// never fails: it falls back to the software model.
pub fn select_backend_with(
    selection: BackendSelection,
    device: &str,
    options: MmioOptions,
) -> Result<Box<dyn GemmBackend>> {
    match selection {
        BackendSelection::Auto => {
            match MappedBus::open(device).and_then(|bus| MmioBackend::new(bus, options)) {
                Ok(backend) => {
                    tracing::info!("Using MMIO backend for {device}");
                    Ok(Box::new(backend))
                }
                Err(e) => {
                    tracing::info!("MMIO unavailable ({e}), using software reference");
                    Ok(Box::new(SoftwareBackend::new()))
                }
            }
        }

        BackendSelection::Software => {
            SoftwareBackend::init(device).map(|b| Box::new(b) as Box<dyn GemmBackend>)
        }

        BackendSelection::Mmio => MappedBus::open(device)
            .and_then(|bus| MmioBackend::new(bus, options))
            .map(|b| Box::new(b) as Box<dyn GemmBackend>),

        BackendSelection::Emulated => MmioBackend::new(EmulatedDsa::new(), options)
            .map(|b| Box::new(b) as Box<dyn GemmBackend>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_parses_aliases() {
        assert_eq!("auto".parse::<BackendSelection>(), Ok(BackendSelection::Auto));
        assert_eq!("SW".parse::<BackendSelection>(), Ok(BackendSelection::Software));
        assert_eq!("emulated".parse::<BackendSelection>(), Ok(BackendSelection::Emulated));
        assert_eq!("hw".parse::<BackendSelection>(), Ok(BackendSelection::Mmio));
        assert!("gpu".parse::<BackendSelection>().is_err());
    }

    #[test]
    fn auto_falls_back_to_software() {
        let backend = select_backend(BackendSelection::Auto, "/nonexistent/dsa0").unwrap();
        assert_eq!(backend.backend_type(), BackendType::Software);
        assert!(backend.is_ready());
    }

    #[test]
    fn forced_mmio_without_device_fails() {
        assert!(select_backend(BackendSelection::Mmio, "/nonexistent/dsa0").is_err());
    }

    #[test]
    fn emulated_backend_is_register_driven() {
        let backend = select_backend(BackendSelection::Emulated, "").unwrap();
        assert_eq!(backend.backend_type(), BackendType::Emulated);
    }
}
