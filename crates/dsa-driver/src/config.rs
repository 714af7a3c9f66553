//! GEMM job description.
//!
//! A [`MatmulConfig`] borrows every operand from the caller for the duration
//! of one `execute` call. `dst` is the only mutable borrow, so the output can
//! never alias `lhs`, `rhs` or `bias`.

use crate::error::{DsaError, Result};
use crate::quant::RequantPolicy;
use serde::{Deserialize, Serialize};

/// Largest magnitude of `lhs_offset`, `rhs_offset` and `dst_offset`.
pub const MAX_OFFSET: i32 = 255;

/// Left-hand operand, K×N.
#[derive(Debug, Clone, Copy)]
pub enum Lhs<'a> {
    /// Signed 8-bit elements.
    S8(&'a [i8]),
    /// Signed 16-bit elements.
    S16(&'a [i16]),
}

impl Lhs<'_> {
    /// Number of elements supplied.
    pub const fn len(&self) -> usize {
        match self {
            Self::S8(v) => v.len(),
            Self::S16(v) => v.len(),
        }
    }

    /// True when no elements were supplied.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `i`, widened.
    #[inline]
    pub fn get(&self, i: usize) -> i32 {
        match self {
            Self::S8(v) => i32::from(v[i]),
            Self::S16(v) => i32::from(v[i]),
        }
    }

    /// `dsa_chip::dtype` code of the element type.
    pub const fn dtype(&self) -> u32 {
        match self {
            Self::S8(_) => dsa_chip::dtype::S8,
            Self::S16(_) => dsa_chip::dtype::S16,
        }
    }

    /// Bytes per element.
    pub const fn element_bytes(&self) -> usize {
        match self {
            Self::S8(_) => 1,
            Self::S16(_) => 2,
        }
    }
}

/// Storage order of `rhs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RhsLayout {
    /// `rhs[k][c]` at `k * rhs_row_stride + c`.
    #[default]
    RowMajor,
    /// `rhs[k][c]` at `c * rhs_row_stride + k`.
    ColumnMajor,
}

/// Per-output-row requantization parameters.
#[derive(Debug, Clone, Copy)]
pub struct PerChannel<'a> {
    /// One multiplier per output row.
    pub mults: &'a [i32],
    /// One shift per output row.
    pub shifts: &'a [i32],
}

/// Validated dimensions and element extents of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    /// Output rows.
    pub k: usize,
    /// Inner dimension.
    pub n: usize,
    /// Output columns.
    pub m: usize,
    /// lhs row stride in elements.
    pub lhs_stride: usize,
    /// rhs row (or column) stride in elements.
    pub rhs_stride: usize,
    /// dst row stride in elements.
    pub dst_stride: usize,
}

impl Shape {
    /// Elements of lhs the job reads through.
    pub const fn lhs_extent(&self) -> usize {
        (self.k - 1) * self.lhs_stride + self.n
    }

    /// Elements of rhs the job reads through, for the given layout.
    pub const fn rhs_extent(&self, layout: RhsLayout) -> usize {
        match layout {
            RhsLayout::RowMajor => (self.n - 1) * self.rhs_stride + self.m,
            RhsLayout::ColumnMajor => (self.m - 1) * self.rhs_stride + self.n,
        }
    }

    /// Elements of dst the job writes through.
    pub const fn dst_extent(&self) -> usize {
        (self.k - 1) * self.dst_stride + self.m
    }
}

/// One GEMM invocation: `dst = requant(lhs × rhs + bias)`.
#[derive(Debug)]
pub struct MatmulConfig<'a> {
    /// Rows of lhs and of the output.
    pub k: u32,
    /// Inner dimension.
    pub n: u32,
    /// Columns of the output.
    pub m: u32,
    /// K×N input.
    pub lhs: Lhs<'a>,
    /// N×M weights.
    pub rhs: &'a [i8],
    /// One value per output row; `None` means zero bias.
    pub bias: Option<&'a [i32]>,
    /// Output, written exactly K×M times.
    pub dst: &'a mut [i8],
    /// Per-tensor multiplier.
    pub dst_mult: i32,
    /// Per-tensor shift.
    pub dst_shift: i32,
    /// Overrides `dst_mult` / `dst_shift` row by row when present.
    pub per_channel: Option<PerChannel<'a>>,
    /// lhs row stride in elements (0 = dense).
    pub lhs_row_stride: u32,
    /// rhs row or column stride in elements (0 = dense).
    pub rhs_row_stride: u32,
    /// dst row stride in elements (0 = dense).
    pub dst_row_stride: u32,
    /// Storage order of rhs.
    pub rhs_layout: RhsLayout,
    /// Added to every lhs element before multiplying.
    pub lhs_offset: i32,
    /// Added to every rhs element before multiplying.
    pub rhs_offset: i32,
    /// Added to every scaled output.
    pub dst_offset: i32,
    /// Lower output clamp.
    pub act_min: i8,
    /// Upper output clamp.
    pub act_max: i8,
    /// Rounding rule and shift convention.
    pub policy: RequantPolicy,
}

impl<'a> MatmulConfig<'a> {
    /// Dense, unbiased, per-tensor job with identity requantization
    /// (`mult = 1`, `shift = 0`). Refine with the `with_*` setters.
    pub fn new(k: u32, n: u32, m: u32, lhs: Lhs<'a>, rhs: &'a [i8], dst: &'a mut [i8]) -> Self {
        Self {
            k,
            n,
            m,
            lhs,
            rhs,
            bias: None,
            dst,
            dst_mult: 1,
            dst_shift: 0,
            per_channel: None,
            lhs_row_stride: 0,
            rhs_row_stride: 0,
            dst_row_stride: 0,
            rhs_layout: RhsLayout::RowMajor,
            lhs_offset: 0,
            rhs_offset: 0,
            dst_offset: 0,
            act_min: i8::MIN,
            act_max: i8::MAX,
            policy: RequantPolicy::default(),
        }
    }

    /// Set the bias vector.
    #[must_use]
    pub fn with_bias(mut self, bias: &'a [i32]) -> Self {
        self.bias = Some(bias);
        self
    }

    /// Set the per-tensor multiplier and shift.
    #[must_use]
    pub fn with_requant(mut self, mult: i32, shift: i32) -> Self {
        self.dst_mult = mult;
        self.dst_shift = shift;
        self
    }

    /// Switch to per-row requantization.
    #[must_use]
    pub fn with_per_channel(mut self, mults: &'a [i32], shifts: &'a [i32]) -> Self {
        self.per_channel = Some(PerChannel { mults, shifts });
        self
    }

    /// Set row strides in elements; 0 keeps the dense default.
    #[must_use]
    pub fn with_strides(mut self, lhs: u32, rhs: u32, dst: u32) -> Self {
        self.lhs_row_stride = lhs;
        self.rhs_row_stride = rhs;
        self.dst_row_stride = dst;
        self
    }

    /// Set the rhs storage order.
    #[must_use]
    pub fn with_rhs_layout(mut self, layout: RhsLayout) -> Self {
        self.rhs_layout = layout;
        self
    }

    /// Set the lhs, rhs and output zero points.
    #[must_use]
    pub fn with_offsets(mut self, lhs: i32, rhs: i32, dst: i32) -> Self {
        self.lhs_offset = lhs;
        self.rhs_offset = rhs;
        self.dst_offset = dst;
        self
    }

    /// Set the output clamp.
    #[must_use]
    pub fn with_activation(mut self, min: i8, max: i8) -> Self {
        self.act_min = min;
        self.act_max = max;
        self
    }

    /// Set the rounding rule and shift convention.
    #[must_use]
    pub fn with_policy(mut self, policy: RequantPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Multiplier and shift that apply to output row `row`.
    #[inline]
    pub fn requant_for_row(&self, row: usize) -> (i32, i32) {
        match &self.per_channel {
            Some(pc) => (pc.mults[row], pc.shifts[row]),
            None => (self.dst_mult, self.dst_shift),
        }
    }

    /// Check every invariant of the job without touching `dst`.
    ///
    /// # Errors
    ///
    /// - `InvalidDimensions` if K, N or M is zero
    /// - `InvalidStride` if a stride is shorter than its row
    /// - `BufferTooSmall` if an operand is shorter than its extent
    /// - `InvalidQuantization` for shifts, offsets or clamps out of range
    pub fn validate(&self) -> Result<Shape> {
        let (k, n, m) = (self.k, self.n, self.m);
        for (name, v) in [("K", k), ("N", n), ("M", m)] {
            if v == 0 {
                return Err(DsaError::invalid_dimensions(k, n, m, format!("{name} is zero")));
            }
        }

        let rhs_row_len = match self.rhs_layout {
            RhsLayout::RowMajor => m,
            RhsLayout::ColumnMajor => n,
        };
        let shape = Shape {
            k: k as usize,
            n: n as usize,
            m: m as usize,
            lhs_stride: stride_or_dense("lhs", self.lhs_row_stride, n)?,
            rhs_stride: stride_or_dense("rhs", self.rhs_row_stride, rhs_row_len)?,
            dst_stride: stride_or_dense("dst", self.dst_row_stride, m)?,
        };

        check_len("lhs", shape.lhs_extent(), self.lhs.len())?;
        check_len("rhs", shape.rhs_extent(self.rhs_layout), self.rhs.len())?;
        check_len("dst", shape.dst_extent(), self.dst.len())?;
        if let Some(bias) = self.bias {
            check_len("bias", shape.k, bias.len())?;
        }

        match &self.per_channel {
            Some(pc) => {
                check_len("mults", shape.k, pc.mults.len())?;
                check_len("shifts", shape.k, pc.shifts.len())?;
                for &s in &pc.shifts[..shape.k] {
                    self.policy.check_shift(s)?;
                }
            }
            None => self.policy.check_shift(self.dst_shift)?,
        }

        for (name, v) in [
            ("lhs_offset", self.lhs_offset),
            ("rhs_offset", self.rhs_offset),
            ("dst_offset", self.dst_offset),
        ] {
            if !(-MAX_OFFSET..=MAX_OFFSET).contains(&v) {
                return Err(DsaError::invalid_quantization(format!(
                    "{name} {v} outside -{MAX_OFFSET}..={MAX_OFFSET}"
                )));
            }
        }

        if self.act_min > self.act_max {
            return Err(DsaError::invalid_quantization(format!(
                "act_min {} > act_max {}",
                self.act_min, self.act_max
            )));
        }

        Ok(shape)
    }
}

fn stride_or_dense(operand: &'static str, stride: u32, row_len: u32) -> Result<usize> {
    match stride {
        0 => Ok(row_len as usize),
        s if s < row_len => Err(DsaError::InvalidStride {
            operand,
            stride: s,
            row_len,
        }),
        s => Ok(s as usize),
    }
}

fn check_len(operand: &'static str, required: usize, actual: usize) -> Result<()> {
    if actual < required {
        Err(DsaError::buffer_too_small(operand, required, actual))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::{Rounding, ShiftConvention};

    const LHS: [i8; 4] = [1, 2, 3, 4];
    const RHS: [i8; 4] = [1, 0, 0, 1];

    #[test]
    fn dense_defaults_validate() {
        let mut dst = [0i8; 4];
        let cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst);
        let shape = cfg.validate().unwrap();
        assert_eq!(shape.lhs_stride, 2);
        assert_eq!(shape.dst_extent(), 4);
    }

    #[test]
    fn zero_dimension_rejected() {
        let mut dst = [0i8; 4];
        for (k, n, m) in [(0, 2, 2), (2, 0, 2), (2, 2, 0)] {
            let cfg = MatmulConfig::new(k, n, m, Lhs::S8(&LHS), &RHS, &mut dst);
            assert!(matches!(cfg.validate(), Err(DsaError::InvalidDimensions { .. })));
        }
    }

    #[test]
    fn short_dst_rejected() {
        let mut dst = [0i8; 3];
        let cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst);
        match cfg.validate() {
            Err(DsaError::BufferTooSmall { operand, required, actual }) => {
                assert_eq!((operand, required, actual), ("dst", 4, 3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn strided_dst_needs_only_last_row_dense() {
        // rows at 0 and 5: extent 5 + 2 = 7
        let mut dst = [0i8; 7];
        let cfg =
            MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst).with_strides(0, 0, 5);
        assert_eq!(cfg.validate().unwrap().dst_extent(), 7);
    }

    #[test]
    fn stride_shorter_than_row_rejected() {
        let mut dst = [0i8; 4];
        let cfg =
            MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst).with_strides(1, 0, 0);
        assert!(matches!(
            cfg.validate(),
            Err(DsaError::InvalidStride { operand: "lhs", stride: 1, row_len: 2 })
        ));
    }

    #[test]
    fn short_bias_and_per_channel_rejected() {
        let mut dst = [0i8; 4];
        let cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst).with_bias(&[1]);
        assert!(matches!(
            cfg.validate(),
            Err(DsaError::BufferTooSmall { operand: "bias", .. })
        ));

        let mut dst = [0i8; 4];
        let cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst)
            .with_per_channel(&[1, 1], &[0]);
        assert!(matches!(
            cfg.validate(),
            Err(DsaError::BufferTooSmall { operand: "shifts", .. })
        ));
    }

    #[test]
    fn quantization_ranges_enforced() {
        let mut dst = [0i8; 4];
        let cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst).with_requant(1, -2);
        assert!(matches!(cfg.validate(), Err(DsaError::InvalidQuantization { .. })));

        let mut dst = [0i8; 4];
        let signed = RequantPolicy {
            rounding: Rounding::HalfUp,
            shift: ShiftConvention::Signed,
        };
        let cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst)
            .with_requant(1, -2)
            .with_policy(signed);
        assert!(cfg.validate().is_ok());

        let mut dst = [0i8; 4];
        let cfg =
            MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst).with_offsets(0, 256, 0);
        assert!(matches!(cfg.validate(), Err(DsaError::InvalidQuantization { .. })));

        let mut dst = [0i8; 4];
        let cfg =
            MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst).with_activation(10, -10);
        assert!(matches!(cfg.validate(), Err(DsaError::InvalidQuantization { .. })));
    }

    #[test]
    fn column_major_extent_uses_inner_dimension() {
        // N=3, M=2 column-major: 2 columns of 3
        let rhs = [0i8; 6];
        let lhs = [0i8; 3];
        let mut dst = [0i8; 2];
        let cfg = MatmulConfig::new(1, 3, 2, Lhs::S8(&lhs), &rhs, &mut dst)
            .with_rhs_layout(RhsLayout::ColumnMajor);
        let shape = cfg.validate().unwrap();
        assert_eq!(shape.rhs_stride, 3);
        assert_eq!(shape.rhs_extent(RhsLayout::ColumnMajor), 6);
    }

    #[test]
    fn per_channel_overrides_tensor_params() {
        let mut dst = [0i8; 4];
        let cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&LHS), &RHS, &mut dst)
            .with_requant(9, 9)
            .with_per_channel(&[3, 5], &[1, 2]);
        assert_eq!(cfg.requant_for_row(0), (3, 1));
        assert_eq!(cfg.requant_for_row(1), (5, 2));
    }
}
