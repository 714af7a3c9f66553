// SPDX-License-Identifier: AGPL-3.0-only

//! Software reference backend
//!
//! Implements `GemmBackend` with plain integer arithmetic. This is the
//! definition of a correct result: the emulated device runs the same kernel,
//! and the hardware validation binary (`validate_all`) compares real
//! accelerator output against it byte for byte.
//!
//! ## Arithmetic
//!
//! ```text
//! acc[r][c] = Σ_i (lhs[r][i] + lhs_offset) · (rhs[i][c] + rhs_offset) + bias[r]   (i64)
//! acc       = saturate_i32(acc)                                         (accumulator register)
//! v         = scale(acc, mult_r, shift_r) + dst_offset
//! dst[r][c] = clamp(v, act_min, act_max)
//! ```
//!
//! With `|lhs| ≤ 2^15`, `|rhs| ≤ 2^7` and offsets within ±255 each product is
//! below 2^24, so the `i64` sum cannot overflow for any `u32` inner dimension.

use crate::backend::{BackendType, GemmBackend};
use crate::capabilities::Capabilities;
use crate::config::{MatmulConfig, RhsLayout};
use crate::error::Result;
use crate::quant;
use tracing::{debug, info};

/// Software reference backend.
///
/// Stateless apart from an execution counter; every feature is supported
/// and there is no SRAM limit.
#[derive(Debug)]
pub struct SoftwareBackend {
    caps: Capabilities,
    /// Completed executions
    executions: u64,
}

impl SoftwareBackend {
    /// Create a software backend.
    pub fn new() -> Self {
        Self {
            caps: Capabilities::software(),
            executions: 0,
        }
    }

    /// Number of successful `execute` calls.
    pub const fn executions(&self) -> u64 {
        self.executions
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GemmBackend for SoftwareBackend {
    fn init(_device: &str) -> Result<Self> {
        info!("Initializing software reference backend");
        Ok(Self::new())
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn execute(&mut self, config: &mut MatmulConfig<'_>) -> Result<()> {
        reference_gemm(config)?;
        self.executions += 1;
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Validate `config` and compute it into `config.dst`.
///
/// Writes exactly K×M elements; stride gaps and anything past the last row
/// keep their previous contents. On a validation error nothing is written.
pub(crate) fn reference_gemm(config: &mut MatmulConfig<'_>) -> Result<()> {
    let shape = config.validate()?;
    debug!(
        "GEMM K={} N={} M={} lhs={:?} layout={:?} per_channel={}",
        shape.k,
        shape.n,
        shape.m,
        config.lhs.dtype(),
        config.rhs_layout,
        config.per_channel.is_some()
    );

    let lhs = config.lhs;
    let rhs = config.rhs;
    let bias = config.bias;
    let lhs_offset = config.lhs_offset;
    let rhs_offset = config.rhs_offset;
    let dst_offset = i64::from(config.dst_offset);
    let (act_min, act_max) = (i64::from(config.act_min), i64::from(config.act_max));
    let policy = config.policy;

    // (step between consecutive k, step between consecutive columns)
    let (rhs_k_step, rhs_c_step) = match config.rhs_layout {
        RhsLayout::RowMajor => (shape.rhs_stride, 1),
        RhsLayout::ColumnMajor => (1, shape.rhs_stride),
    };

    for r in 0..shape.k {
        let (mult, shift) = config.requant_for_row(r);
        let row_bias = bias.map_or(0, |b| i64::from(b[r]));
        let lhs_row = r * shape.lhs_stride;
        let dst_row = r * shape.dst_stride;

        for c in 0..shape.m {
            let rhs_col = c * rhs_c_step;
            let mut acc = row_bias;
            for i in 0..shape.n {
                let a = i64::from(lhs.get(lhs_row + i) + lhs_offset);
                let b = i64::from(i32::from(rhs[rhs_col + i * rhs_k_step]) + rhs_offset);
                acc += a * b;
            }

            let v = quant::scale(quant::saturate_acc(acc), mult, shift, policy) + dst_offset;
            config.dst[dst_row + c] = quant::saturate_i8(v.clamp(act_min, act_max));
        }
    }
    Ok(())
}
