//! Control window register map.
//!
//! The register file mirrors the fields of the firmware's
//! `dsa_matmul_config_t`: one 32-bit register per field, operand pointers
//! replaced by SRAM byte offsets. The per-channel array offsets have no
//! firmware field and sit directly after `BIAS_ADDR`.
//!
//! ```text
//! 0x000  DEVICE_ID    RO   reads DSA_DEVICE_ID
//! 0x004  VERSION      RO   major << 16 | minor
//! 0x008  FEATURES     RO   optional-feature bits (see `features`)
//! 0x00C  SRAM_SIZE    RO   operand SRAM size in bytes
//! 0x010  MAX_DIM      RO   largest K / N / M accepted
//! 0x020  CTRL         RW   START / RESET / IRQ_EN
//! 0x024  STATUS       RW1C BUSY / DONE / ERROR
//! 0x028  ERR_CODE     RO   failure code of the last run (0 = none)
//! 0x040  DIM_K..      RW   job description (see below)
//! ```

// ── Identity ─────────────────────────────────────────────────────────────────

/// Device identification register.
pub const DEVICE_ID: usize = 0x000;
/// Version register: `major << 16 | minor`.
pub const VERSION: usize = 0x004;
/// Optional-feature bits, see [`features`].
pub const FEATURES: usize = 0x008;
/// Operand SRAM size in bytes.
pub const SRAM_SIZE: usize = 0x00C;
/// Largest accepted K, N or M.
pub const MAX_DIM: usize = 0x010;

/// Value of `DEVICE_ID` on every accelerator revision ("DSA" + 0x01).
pub const DSA_DEVICE_ID: u32 = 0x4453_4101;

// ── Control and status ───────────────────────────────────────────────────────

/// Control register, see [`ctrl`].
pub const CTRL: usize = 0x020;
/// Status register, see [`status`]. Write 1 to clear DONE / ERROR.
pub const STATUS: usize = 0x024;
/// Failure code of the last run; uses the driver's status code numbering.
pub const ERR_CODE: usize = 0x028;

// ── Shape and strides ────────────────────────────────────────────────────────

/// Rows of lhs / output.
pub const DIM_K: usize = 0x040;
/// Inner dimension.
pub const DIM_N: usize = 0x044;
/// Columns of output.
pub const DIM_M: usize = 0x048;
/// lhs row stride in **bytes**.
pub const LHS_ROW_STRIDE: usize = 0x04C;
/// rhs row (or column, for column-major) stride in bytes.
pub const RHS_ROW_STRIDE: usize = 0x050;
/// Output row stride in bytes.
pub const DST_ROW_STRIDE: usize = 0x054;

// ── Operand placement (byte offsets into the SRAM window) ───────────────────

/// lhs base offset.
pub const LHS_ADDR: usize = 0x060;
/// rhs base offset.
pub const RHS_ADDR: usize = 0x064;
/// Output base offset.
pub const DST_ADDR: usize = 0x068;
/// Bias base offset (ignored unless `FLAGS.BIAS_EN`).
pub const BIAS_ADDR: usize = 0x06C;
/// Per-channel multiplier array offset (read when `QUANT_MODE` is
/// per-channel).
pub const MULT_ADDR: usize = 0x070;
/// Per-channel shift array offset (read when `QUANT_MODE` is per-channel).
pub const SHIFT_ADDR: usize = 0x074;

// ── Types and quantization ───────────────────────────────────────────────────

/// Packed element types, see `dtype::pack_dtypes`.
pub const DTYPE: usize = 0x080;
/// `QUANT_PER_TENSOR` or `QUANT_PER_CHANNEL`.
pub const QUANT_MODE: usize = 0x084;
/// Job flags, see [`flags`].
pub const FLAGS: usize = 0x088;
/// lhs zero point (two's complement).
pub const LHS_OFFSET: usize = 0x08C;
/// rhs zero point.
pub const RHS_OFFSET: usize = 0x090;
/// Output zero point.
pub const DST_OFFSET: usize = 0x094;
/// Per-tensor multiplier.
pub const DST_MULT: usize = 0x098;
/// Per-tensor shift (two's complement).
pub const DST_SHIFT: usize = 0x09C;
/// Lower output clamp.
pub const ACT_MIN: usize = 0x0A0;
/// Upper output clamp.
pub const ACT_MAX: usize = 0x0A4;

/// One past the last register.
pub const REG_END: usize = 0x0A8;

// ── CTRL bits ────────────────────────────────────────────────────────────────

/// Control register bit definitions.
pub mod ctrl {
    /// Start the programmed job. Self-clearing.
    pub const START: u32 = 1 << 0;
    /// Soft reset: clears STATUS and ERR_CODE.
    pub const RESET: u32 = 1 << 1;
    /// Raise the completion interrupt (unused by the polling driver).
    pub const IRQ_EN: u32 = 1 << 2;
}

// ── STATUS bits ──────────────────────────────────────────────────────────────

/// Status register bit definitions.
pub mod status {
    /// Job in progress.
    pub const BUSY: u32 = 1 << 0;
    /// Job finished, results valid in SRAM.
    pub const DONE: u32 = 1 << 1;
    /// Job aborted, see `ERR_CODE`. No results written.
    pub const ERROR: u32 = 1 << 2;
}

// ── FEATURES bits ────────────────────────────────────────────────────────────

/// Optional-feature bits reported by `FEATURES`.
pub mod features {
    /// lhs may be S16.
    pub const LHS_S16: u32 = 1 << 0;
    /// Per-channel requantization.
    pub const PER_CHANNEL: u32 = 1 << 1;
    /// Column-major rhs.
    pub const RHS_COL_MAJOR: u32 = 1 << 2;
    /// Negative shifts (left shift).
    pub const SIGNED_SHIFT: u32 = 1 << 3;
    /// Round-half-away-from-zero.
    pub const ROUND_AWAY: u32 = 1 << 4;
    /// Truncating (floor) shift.
    pub const ROUND_FLOOR: u32 = 1 << 5;

    /// Every feature bit.
    pub const ALL: u32 =
        LHS_S16 | PER_CHANNEL | RHS_COL_MAJOR | SIGNED_SHIFT | ROUND_AWAY | ROUND_FLOOR;
}

// ── FLAGS bits ───────────────────────────────────────────────────────────────

/// Job flag bit definitions.
pub mod flags {
    /// Read bias from `BIAS_ADDR`; otherwise bias is zero.
    pub const BIAS_EN: u32 = 1 << 0;
    /// rhs is stored column-major.
    pub const RHS_COL_MAJOR: u32 = 1 << 1;
    /// `DST_SHIFT` / shift array is signed (negative = left shift).
    pub const SIGNED_SHIFT: u32 = 1 << 2;
    /// Rounding mode field position.
    pub const ROUND_SHIFT: u32 = 4;
    /// Rounding mode field mask (after shifting).
    pub const ROUND_MASK: u32 = 0x3;

    /// Rounding field values.
    pub mod round {
        /// `(p + 2^(s-1)) >> s`.
        pub const HALF_UP: u32 = 0;
        /// Ties away from zero.
        pub const HALF_AWAY: u32 = 1;
        /// Arithmetic shift, no rounding term.
        pub const FLOOR: u32 = 2;
    }
}

/// How the host may access a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Writes are ignored.
    ReadOnly,
    /// Plain read/write.
    ReadWrite,
    /// Writing 1 to a bit clears it.
    WriteOneToClear,
}

/// One entry of the register map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegInfo {
    /// Register name as in the firmware header.
    pub name: &'static str,
    /// Byte offset in the control window.
    pub offset: usize,
    /// Host access.
    pub access: Access,
}

const fn reg(name: &'static str, offset: usize, access: Access) -> RegInfo {
    RegInfo {
        name,
        offset,
        access,
    }
}

/// Every register, in address order.
pub const MAP: [RegInfo; 30] = [
    reg("DEVICE_ID", DEVICE_ID, Access::ReadOnly),
    reg("VERSION", VERSION, Access::ReadOnly),
    reg("FEATURES", FEATURES, Access::ReadOnly),
    reg("SRAM_SIZE", SRAM_SIZE, Access::ReadOnly),
    reg("MAX_DIM", MAX_DIM, Access::ReadOnly),
    reg("CTRL", CTRL, Access::ReadWrite),
    reg("STATUS", STATUS, Access::WriteOneToClear),
    reg("ERR_CODE", ERR_CODE, Access::ReadOnly),
    reg("DIM_K", DIM_K, Access::ReadWrite),
    reg("DIM_N", DIM_N, Access::ReadWrite),
    reg("DIM_M", DIM_M, Access::ReadWrite),
    reg("LHS_ROW_STRIDE", LHS_ROW_STRIDE, Access::ReadWrite),
    reg("RHS_ROW_STRIDE", RHS_ROW_STRIDE, Access::ReadWrite),
    reg("DST_ROW_STRIDE", DST_ROW_STRIDE, Access::ReadWrite),
    reg("LHS_ADDR", LHS_ADDR, Access::ReadWrite),
    reg("RHS_ADDR", RHS_ADDR, Access::ReadWrite),
    reg("DST_ADDR", DST_ADDR, Access::ReadWrite),
    reg("BIAS_ADDR", BIAS_ADDR, Access::ReadWrite),
    reg("MULT_ADDR", MULT_ADDR, Access::ReadWrite),
    reg("SHIFT_ADDR", SHIFT_ADDR, Access::ReadWrite),
    reg("DTYPE", DTYPE, Access::ReadWrite),
    reg("QUANT_MODE", QUANT_MODE, Access::ReadWrite),
    reg("FLAGS", FLAGS, Access::ReadWrite),
    reg("LHS_OFFSET", LHS_OFFSET, Access::ReadWrite),
    reg("RHS_OFFSET", RHS_OFFSET, Access::ReadWrite),
    reg("DST_OFFSET", DST_OFFSET, Access::ReadWrite),
    reg("DST_MULT", DST_MULT, Access::ReadWrite),
    reg("DST_SHIFT", DST_SHIFT, Access::ReadWrite),
    reg("ACT_MIN", ACT_MIN, Access::ReadWrite),
    reg("ACT_MAX", ACT_MAX, Access::ReadWrite),
];

/// Map entry for `offset`, if a register lives there.
pub fn lookup(offset: usize) -> Option<&'static RegInfo> {
    MAP.iter().find(|r| r.offset == offset)
}

/// Decode a `VERSION` register value into `(major, minor)`.
#[allow(clippy::cast_possible_truncation)]
pub const fn split_version(raw: u32) -> (u16, u16) {
    ((raw >> 16) as u16, (raw & 0xFFFF) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB_REGS: [usize; 24] = [
        DIM_K, DIM_N, DIM_M, LHS_ROW_STRIDE, RHS_ROW_STRIDE, DST_ROW_STRIDE,
        LHS_ADDR, RHS_ADDR, DST_ADDR, BIAS_ADDR, MULT_ADDR, SHIFT_ADDR,
        DTYPE, QUANT_MODE, FLAGS, LHS_OFFSET, RHS_OFFSET, DST_OFFSET,
        DST_MULT, DST_SHIFT, ACT_MIN, ACT_MAX, CTRL, STATUS,
    ];

    #[test]
    fn registers_are_word_aligned_and_distinct() {
        for (i, a) in JOB_REGS.iter().enumerate() {
            assert_eq!(a % 4, 0, "register {a:#x} not aligned");
            assert!(*a < REG_END);
            for b in &JOB_REGS[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn register_file_fits_control_window() {
        assert!(REG_END <= crate::window::ctrl::SIZE);
    }

    #[test]
    fn map_is_sorted_and_complete() {
        for pair in MAP.windows(2) {
            assert!(pair[0].offset < pair[1].offset, "{} out of order", pair[1].name);
        }
        for offset in JOB_REGS {
            assert!(lookup(offset).is_some(), "{offset:#x} missing from MAP");
        }
        assert_eq!(lookup(STATUS).map(|r| r.access), Some(Access::WriteOneToClear));
        assert_eq!(lookup(0x030), None);
    }

    #[test]
    fn per_channel_addrs_follow_bias_addr() {
        assert_eq!(MULT_ADDR, BIAS_ADDR + 4);
        assert_eq!(SHIFT_ADDR, MULT_ADDR + 4);
    }

    #[test]
    fn version_split() {
        assert_eq!(split_version(0x0001_0002), (1, 2));
    }

    #[test]
    fn status_bits_disjoint() {
        assert_eq!(status::BUSY & status::DONE, 0);
        assert_eq!(status::DONE & status::ERROR, 0);
    }
}
