//! GEMM backend implementations
//!
//! - **Software**: bit-exact reference model, no hardware
//! - **MMIO**: programs accelerator registers over a [`DsaBus`](mmio::DsaBus)
//!   - `MappedBus`: real device through mmap
//!   - `EmulatedDsa`: in-process register-level emulator

pub mod emulated;
pub mod mmap;
pub mod mmio;
pub mod software;

pub use emulated::{EmulatedDsa, Fault};
pub use mmap::{DeviceLocator, MappedBus, MmapRegion, DEFAULT_DEVICE};
pub use mmio::{DsaBus, MmioBackend, MmioOptions, SramLayout, SramRegion};
pub use software::SoftwareBackend;
