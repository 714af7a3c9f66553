//! Address windows exposed by the accelerator.
//!
//! ```text
//! Window   Offset from device base   Size     Purpose
//! ──────── ───────────────────────── ──────── ─────────────────────────────
//!  CTRL    0x0000_0000               4 KB     Register file (see `regs`)
//!  SRAM    0x0001_0000               64 KB    Operand / result scratchpad
//! ```
//!
//! All operand addresses programmed into the register file are byte
//! offsets into the SRAM window, not host or bus addresses. Multi-byte
//! elements are stored little-endian.

/// Control window (register file).
pub mod ctrl {
    /// Offset of the register file from the device base.
    pub const OFFSET: u64 = 0x0000_0000;
    /// Size of the register file in bytes.
    pub const SIZE: usize = 4 * 1024;
}

/// Operand SRAM window.
pub mod sram {
    /// Offset of the SRAM window from the device base.
    pub const OFFSET: u64 = 0x0001_0000;
    /// Default SRAM size in bytes (the `SRAM_SIZE` register is authoritative).
    pub const DEFAULT_SIZE: usize = 64 * 1024;
    /// Required alignment of every operand region.
    pub const ALIGN: usize = 16;
}

/// Round `offset` up to the SRAM operand alignment.
pub const fn align_up(offset: usize) -> usize {
    (offset + sram::ALIGN - 1) & !(sram::ALIGN - 1)
}
