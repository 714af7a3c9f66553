//! Host driver for the quantized INT8 matrix-multiply accelerator (DSA).
//!
//! One operation: `dst = requant(lhs × rhs + bias)` with INT8 (or INT16)
//! inputs, a 32-bit accumulator and fixed-point requantization back to INT8.
//!
//! # Backend hierarchy
//!
//! ```text
//! GemmBackend
//!   SoftwareBackend            bit-exact reference, no hardware
//!   MmioBackend<MappedBus>     real device: UIO node, /dev/mem, PCI resource
//!   MmioBackend<EmulatedDsa>   register-level emulator (CI, parity tests)
//! ```
//!
//! # Quick start
//!
//! ```
//! use dsa_driver::{execute, ExecutionStatus, Lhs, MatmulConfig};
//!
//! let lhs = [1i8, 2, 3, 4];
//! let rhs = [1i8, 0, 0, 1];
//! let bias = [10i32, -10];
//! let mut dst = [0i8; 4];
//!
//! let mut cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst)
//!     .with_bias(&bias)
//!     .with_requant(1 << 8, 8);
//! assert_eq!(execute(&mut cfg), ExecutionStatus::Success);
//! assert_eq!(dst, [11, 12, -7, -6]);
//! ```
//!
//! # Hardware
//!
//! ```no_run
//! use dsa_driver::{select_backend, BackendSelection};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = select_backend(BackendSelection::Mmio, "/dev/mem@0x4000_0000")?;
//! println!("{}", backend.capabilities());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod capabilities;
mod config;
mod error;
mod execute;
pub mod harness;
pub mod quant;
mod status;
pub mod testcase;

pub use backend::{select_backend, select_backend_with, BackendSelection, BackendType, GemmBackend};
pub use backends::{
    DeviceLocator, DsaBus, EmulatedDsa, Fault, MappedBus, MmioBackend, MmioOptions,
    SoftwareBackend,
};
pub use capabilities::Capabilities;
pub use config::{Lhs, MatmulConfig, PerChannel, RhsLayout, Shape, MAX_OFFSET};
pub use error::{DsaError, Result};
pub use execute::{execute, execute_on};
pub use harness::{run_case, CaseReport, ElementCheck, SuiteReport};
pub use quant::{requantize, RequantPolicy, Rounding, ShiftConvention};
pub use status::ExecutionStatus;
pub use testcase::{
    AccumulatorDump, BiasMode, CaseGenerator, GenOptions, LhsData, LhsType, Requant, TestCase,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        execute, execute_on, run_case, select_backend, BackendSelection, Capabilities,
        CaseReport, DsaError, ExecutionStatus, GemmBackend, Lhs, MatmulConfig, Result,
        RhsLayout, SuiteReport, TestCase,
    };
}
