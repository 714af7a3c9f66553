//! Element type and quantization mode codes.
//!
//! Codes match the firmware header the accelerator was brought up with
//! (`DSA_DTYPE_S8 = 1`, `DSA_DTYPE_S16 = 2`, `DSA_QUANT_PER_TENSOR = 0`).
//! The firmware header has no bias type or per-channel mode; those take
//! the next free code.

/// Signed 8-bit elements.
pub const S8: u32 = 1;
/// Signed 16-bit elements (lhs only).
pub const S16: u32 = 2;
/// Signed 32-bit elements. Only the bias operand uses it; it is the first
/// code after the firmware's S8 and S16.
pub const S32: u32 = 3;

/// One multiplier/shift pair for the whole output.
pub const QUANT_PER_TENSOR: u32 = 0;
/// One multiplier/shift pair per output row, read from SRAM.
pub const QUANT_PER_CHANNEL: u32 = 1;

/// Bit positions of each operand's type code inside the `DTYPE` register.
pub mod pack {
    /// lhs type, bits 0..8.
    pub const LHS_SHIFT: u32 = 0;
    /// rhs type, bits 8..16.
    pub const RHS_SHIFT: u32 = 8;
    /// bias type, bits 16..24.
    pub const BIAS_SHIFT: u32 = 16;
    /// output type, bits 24..32.
    pub const OUT_SHIFT: u32 = 24;
    /// Width mask of one type field.
    pub const FIELD_MASK: u32 = 0xFF;
}

/// Pack four type codes into a `DTYPE` register value.
pub const fn pack_dtypes(lhs: u32, rhs: u32, bias: u32, out: u32) -> u32 {
    ((lhs & pack::FIELD_MASK) << pack::LHS_SHIFT)
        | ((rhs & pack::FIELD_MASK) << pack::RHS_SHIFT)
        | ((bias & pack::FIELD_MASK) << pack::BIAS_SHIFT)
        | ((out & pack::FIELD_MASK) << pack::OUT_SHIFT)
}

/// Extract the lhs type code from a `DTYPE` register value.
pub const fn lhs_of(dtype: u32) -> u32 {
    (dtype >> pack::LHS_SHIFT) & pack::FIELD_MASK
}

/// Extract the rhs type code from a `DTYPE` register value.
pub const fn rhs_of(dtype: u32) -> u32 {
    (dtype >> pack::RHS_SHIFT) & pack::FIELD_MASK
}

/// Extract the bias type code from a `DTYPE` register value.
pub const fn bias_of(dtype: u32) -> u32 {
    (dtype >> pack::BIAS_SHIFT) & pack::FIELD_MASK
}

/// Extract the output type code from a `DTYPE` register value.
pub const fn out_of(dtype: u32) -> u32 {
    (dtype >> pack::OUT_SHIFT) & pack::FIELD_MASK
}

/// Size in bytes of one element of the given type code, `None` if unknown.
pub const fn element_bytes(code: u32) -> Option<usize> {
    match code {
        S8 => Some(1),
        S16 => Some(2),
        S32 => Some(4),
        _ => None,
    }
}
