//! In-process accelerator emulator
//!
//! Register-level model of the DSA: a register file plus an SRAM array.
//! Writing `CTRL.START` decodes the job registers, reads operands from SRAM
//! exactly as the hardware would (byte strides, little-endian), runs the
//! reference kernel and writes results back into SRAM. STATUS then reports
//! BUSY for a configurable number of polls before DONE.
//!
//! Faults can be injected to exercise the driver's error paths without
//! hardware.

use crate::backend::BackendType;
use crate::backends::mmio::DsaBus;
use crate::backends::software::reference_gemm;
use crate::capabilities::Capabilities;
use crate::config::{Lhs, MatmulConfig, RhsLayout};
use crate::error::{DsaError, Result};
use crate::quant::{RequantPolicy, Rounding, ShiftConvention};
use crate::status::ExecutionStatus;
use dsa_chip::regs::{self, ctrl, features, flags, status, Access};
use dsa_chip::{dtype, window};

const REG_WORDS: usize = regs::REG_END / 4;

/// Fault applied to the next started job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// STATUS stays BUSY until reset
    Hang,
    /// STATUS reports ERROR with this ERR_CODE
    Error(u32),
}

/// Emulated accelerator
#[derive(Debug, Clone)]
pub struct EmulatedDsa {
    regs: [u32; REG_WORDS],
    sram: Vec<u8>,
    latency_polls: u32,
    busy_polls_left: u32,
    hung: bool,
    fault: Option<Fault>,
    jobs: u64,
}

impl EmulatedDsa {
    /// Emulator with 64 KB SRAM, every feature, dimensions up to 1024.
    pub fn new() -> Self {
        let mut emu = Self {
            regs: [0; REG_WORDS],
            sram: vec![0; window::sram::DEFAULT_SIZE],
            latency_polls: 0,
            busy_polls_left: 0,
            hung: false,
            fault: None,
            jobs: 0,
        };
        emu.set(regs::DEVICE_ID, regs::DSA_DEVICE_ID);
        emu.set(regs::VERSION, 0x0001_0000);
        emu.set(regs::FEATURES, features::ALL);
        emu.set(regs::MAX_DIM, 1024);
        emu.set_sram_register();
        emu
    }

    /// Resize SRAM.
    #[must_use]
    pub fn with_sram_size(mut self, bytes: usize) -> Self {
        self.sram = vec![0; bytes];
        self.set_sram_register();
        self
    }

    /// Advertise only the given `features` bits.
    #[must_use]
    pub fn with_features(mut self, bits: u32) -> Self {
        self.set(regs::FEATURES, bits);
        self
    }

    /// Set the largest accepted dimension.
    #[must_use]
    pub fn with_max_dim(mut self, max_dim: u32) -> Self {
        self.set(regs::MAX_DIM, max_dim);
        self
    }

    /// Report BUSY for `polls` STATUS reads after each START.
    #[must_use]
    pub const fn with_latency(mut self, polls: u32) -> Self {
        self.latency_polls = polls;
        self
    }

    /// Apply `fault` to the next started job.
    pub fn inject(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    /// Jobs that ran to completion.
    pub const fn jobs_completed(&self) -> u64 {
        self.jobs
    }

    /// Raw SRAM contents.
    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    fn set_sram_register(&mut self) {
        let bytes = u32::try_from(self.sram.len()).unwrap_or(u32::MAX);
        self.set(regs::SRAM_SIZE, bytes);
    }

    const fn get(&self, offset: usize) -> u32 {
        self.regs[offset / 4]
    }

    fn set(&mut self, offset: usize, value: u32) {
        self.regs[offset / 4] = value;
    }

    #[allow(clippy::cast_possible_wrap)]
    const fn get_i32(&self, offset: usize) -> i32 {
        self.get(offset) as i32
    }

    fn reset(&mut self) {
        self.set(regs::STATUS, 0);
        self.set(regs::ERR_CODE, 0);
        self.busy_polls_left = 0;
        self.hung = false;
    }

    fn start(&mut self) {
        tracing::trace!("emulator: START");
        match self.fault.take() {
            Some(Fault::Hang) => {
                self.hung = true;
                self.set(regs::STATUS, status::BUSY);
                return;
            }
            Some(Fault::Error(code)) => {
                self.fail(code);
                return;
            }
            None => {}
        }

        match self.run_job() {
            Ok(()) => {
                self.jobs += 1;
                self.busy_polls_left = self.latency_polls;
                let st = if self.latency_polls == 0 { status::DONE } else { status::BUSY };
                self.set(regs::STATUS, st);
            }
            Err(e) => {
                tracing::debug!("emulator: job rejected: {e}");
                self.fail(ExecutionStatus::from(&e).code());
            }
        }
    }

    fn fail(&mut self, code: u32) {
        self.set(regs::ERR_CODE, code);
        self.set(regs::STATUS, status::ERROR);
    }

    fn sram_slice(&self, operand: &'static str, addr: usize, len: usize) -> Result<&[u8]> {
        addr.checked_add(len)
            .and_then(|end| self.sram.get(addr..end))
            .ok_or_else(|| DsaError::buffer_too_small(operand, addr.saturating_add(len), self.sram.len()))
    }

    fn read_i32s(&self, operand: &'static str, addr_reg: usize, count: usize) -> Result<Vec<i32>> {
        let bytes = self.sram_slice(operand, self.get(addr_reg) as usize, count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Decode the job registers and run the job against SRAM.
    fn run_job(&mut self) -> Result<()> {
        let (k, n, m) = (self.get(regs::DIM_K), self.get(regs::DIM_N), self.get(regs::DIM_M));
        if k == 0 || n == 0 || m == 0 {
            return Err(DsaError::invalid_dimensions(k, n, m, "zero dimension programmed"));
        }
        if k.max(n).max(m) > self.get(regs::MAX_DIM) {
            return Err(DsaError::invalid_dimensions(k, n, m, "exceeds MAX_DIM"));
        }

        let dtypes = self.get(regs::DTYPE);
        let lhs_code = dtype::lhs_of(dtypes);
        let elem = dtype::element_bytes(lhs_code)
            .filter(|_| lhs_code != dtype::S32)
            .ok_or_else(|| DsaError::unsupported("emulator", format!("lhs dtype {lhs_code}")))?;
        if dtype::rhs_of(dtypes) != dtype::S8 || dtype::out_of(dtypes) != dtype::S8 {
            return Err(DsaError::unsupported("emulator", format!("DTYPE {dtypes:#x}")));
        }

        let job_flags = self.get(regs::FLAGS);
        let per_channel = self.get(regs::QUANT_MODE) == dtype::QUANT_PER_CHANNEL;
        let layout = if job_flags & flags::RHS_COL_MAJOR != 0 {
            RhsLayout::ColumnMajor
        } else {
            RhsLayout::RowMajor
        };
        let rounding = match (job_flags >> flags::ROUND_SHIFT) & flags::ROUND_MASK {
            flags::round::HALF_UP => Rounding::HalfUp,
            flags::round::HALF_AWAY => Rounding::HalfAwayFromZero,
            flags::round::FLOOR => Rounding::Floor,
            other => {
                return Err(DsaError::invalid_quantization(format!("rounding mode {other}")));
            }
        };
        let policy = RequantPolicy {
            rounding,
            shift: if job_flags & flags::SIGNED_SHIFT != 0 {
                ShiftConvention::Signed
            } else {
                ShiftConvention::RightOnly
            },
        };

        let feats = self.get(regs::FEATURES);
        let needs = [
            (elem == 2, features::LHS_S16),
            (per_channel, features::PER_CHANNEL),
            (layout == RhsLayout::ColumnMajor, features::RHS_COL_MAJOR),
            (policy.shift == ShiftConvention::Signed, features::SIGNED_SHIFT),
            (rounding == Rounding::HalfAwayFromZero, features::ROUND_AWAY),
            (rounding == Rounding::Floor, features::ROUND_FLOOR),
        ];
        if let Some((_, bit)) = needs.iter().find(|(needed, bit)| *needed && feats & bit == 0) {
            return Err(DsaError::unsupported("emulator", format!("feature bit {bit:#x}")));
        }

        let lhs_stride_bytes = self.get(regs::LHS_ROW_STRIDE);
        if lhs_stride_bytes as usize % elem != 0 {
            return Err(DsaError::InvalidStride {
                operand: "lhs",
                stride: lhs_stride_bytes,
                row_len: n,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let lhs_stride = lhs_stride_bytes / elem as u32;
        let rhs_stride = self.get(regs::RHS_ROW_STRIDE);
        let dst_stride = self.get(regs::DST_ROW_STRIDE);
        for (operand, stride, row_len) in [
            ("lhs", lhs_stride, n),
            ("rhs", rhs_stride, if layout == RhsLayout::RowMajor { m } else { n }),
            ("dst", dst_stride, m),
        ] {
            if stride < row_len {
                return Err(DsaError::InvalidStride { operand, stride, row_len });
            }
        }

        let (ku, nu, mu) = (k as usize, n as usize, m as usize);
        let lhs_len = (ku - 1) * lhs_stride as usize + nu;
        let rhs_len = match layout {
            RhsLayout::RowMajor => (nu - 1) * rhs_stride as usize + mu,
            RhsLayout::ColumnMajor => (mu - 1) * rhs_stride as usize + nu,
        };
        let dst_len = (ku - 1) * dst_stride as usize + mu;
        let dst_addr = self.get(regs::DST_ADDR) as usize;

        let lhs_raw = self.sram_slice("lhs", self.get(regs::LHS_ADDR) as usize, lhs_len * elem)?;
        let lhs8: Vec<i8>;
        let lhs16: Vec<i16>;
        let lhs = if elem == 1 {
            lhs8 = bytemuck::cast_slice::<u8, i8>(lhs_raw).to_vec();
            Lhs::S8(&lhs8)
        } else {
            lhs16 = lhs_raw
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect();
            Lhs::S16(&lhs16)
        };
        let rhs: Vec<i8> =
            bytemuck::cast_slice(self.sram_slice("rhs", self.get(regs::RHS_ADDR) as usize, rhs_len)?)
                .to_vec();
        let bias = if job_flags & flags::BIAS_EN != 0 {
            Some(self.read_i32s("bias", regs::BIAS_ADDR, ku)?)
        } else {
            None
        };
        let (mults, shifts) = if per_channel {
            (
                self.read_i32s("mults", regs::MULT_ADDR, ku)?,
                self.read_i32s("shifts", regs::SHIFT_ADDR, ku)?,
            )
        } else {
            (Vec::new(), Vec::new())
        };
        let mut dst: Vec<i8> =
            bytemuck::cast_slice(self.sram_slice("dst", dst_addr, dst_len)?).to_vec();

        let act = |reg: usize| {
            i8::try_from(self.get_i32(reg))
                .map_err(|_| DsaError::invalid_quantization(format!("activation bound {}", self.get_i32(reg))))
        };

        let mut config = MatmulConfig::new(k, n, m, lhs, &rhs, &mut dst)
            .with_requant(self.get_i32(regs::DST_MULT), self.get_i32(regs::DST_SHIFT))
            .with_strides(lhs_stride, rhs_stride, dst_stride)
            .with_rhs_layout(layout)
            .with_offsets(
                self.get_i32(regs::LHS_OFFSET),
                self.get_i32(regs::RHS_OFFSET),
                self.get_i32(regs::DST_OFFSET),
            )
            .with_activation(act(regs::ACT_MIN)?, act(regs::ACT_MAX)?)
            .with_policy(policy);
        if let Some(bias) = &bias {
            config = config.with_bias(bias);
        }
        if per_channel {
            config = config.with_per_channel(&mults, &shifts);
        }
        reference_gemm(&mut config)?;

        self.sram[dst_addr..dst_addr + dst_len].copy_from_slice(bytemuck::cast_slice(&dst));
        Ok(())
    }
}

impl Default for EmulatedDsa {
    fn default() -> Self {
        Self::new()
    }
}

impl DsaBus for EmulatedDsa {
    const BACKEND_TYPE: BackendType = BackendType::Emulated;

    fn connect(_device: &str) -> Result<Self> {
        Ok(Self::new())
    }

    fn read_reg(&mut self, offset: usize) -> Result<u32> {
        check_reg(offset)?;
        if offset >= regs::REG_END {
            return Ok(0);
        }
        if offset == regs::STATUS && !self.hung && self.busy_polls_left > 0 {
            self.busy_polls_left -= 1;
            if self.busy_polls_left == 0 {
                self.set(regs::STATUS, status::DONE);
            }
            return Ok(status::BUSY);
        }
        let value = self.get(offset);
        tracing::trace!("emulator: read {offset:#x} = {value:#x}");
        Ok(value)
    }

    fn write_reg(&mut self, offset: usize, value: u32) -> Result<()> {
        check_reg(offset)?;
        tracing::trace!("emulator: write {offset:#x} = {value:#x}");
        match offset {
            regs::CTRL => {
                if value & ctrl::RESET != 0 {
                    self.reset();
                }
                if value & ctrl::START != 0 {
                    self.start();
                }
            }
            regs::STATUS => {
                let st = self.get(regs::STATUS) & !(value & (status::DONE | status::ERROR));
                self.set(regs::STATUS, st);
            }
            o => match regs::lookup(o) {
                Some(reg) if reg.access == Access::ReadWrite => self.set(o, value),
                _ => {}
            },
        }
        Ok(())
    }

    fn read_sram(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let src = self.sram_slice("sram read", offset, buf.len())?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_sram(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.sram.len())
            .ok_or_else(|| {
                DsaError::buffer_too_small("sram write", offset.saturating_add(data.len()), self.sram.len())
            })?;
        self.sram[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn sram_size(&self) -> usize {
        self.sram.len()
    }

    fn probe(&mut self) -> Result<Capabilities> {
        Capabilities::from_registers(|off| self.read_reg(off))
    }

    fn describe(&self) -> String {
        "emulated DSA".to_string()
    }
}

fn check_reg(offset: usize) -> Result<()> {
    if offset % 4 != 0 || offset >= window::ctrl::SIZE {
        return Err(DsaError::device_unavailable(format!(
            "register access at {offset:#x} outside control window"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_registers() {
        let mut emu = EmulatedDsa::new().with_sram_size(4096);
        let caps = emu.probe().unwrap();
        assert_eq!(caps.device_id, regs::DSA_DEVICE_ID);
        assert_eq!(caps.sram_bytes, 4096);
        assert_eq!(caps.version, (1, 0));
    }

    #[test]
    fn read_only_registers_ignore_writes() {
        let mut emu = EmulatedDsa::new();
        emu.write_reg(regs::DEVICE_ID, 0).unwrap();
        assert_eq!(emu.read_reg(regs::DEVICE_ID).unwrap(), regs::DSA_DEVICE_ID);
    }

    #[test]
    fn unaligned_register_rejected() {
        let mut emu = EmulatedDsa::new();
        assert!(emu.read_reg(0x41).is_err());
        assert!(emu.write_reg(window::ctrl::SIZE, 0).is_err());
    }

    #[test]
    fn status_is_write_one_to_clear() {
        let mut emu = EmulatedDsa::new();
        emu.inject(Fault::Error(7));
        emu.write_reg(regs::CTRL, ctrl::START).unwrap();
        assert_eq!(emu.read_reg(regs::STATUS).unwrap(), status::ERROR);
        assert_eq!(emu.read_reg(regs::ERR_CODE).unwrap(), 7);
        emu.write_reg(regs::STATUS, status::ERROR).unwrap();
        assert_eq!(emu.read_reg(regs::STATUS).unwrap(), 0);
    }

    #[test]
    fn start_with_empty_registers_reports_invalid_dimensions() {
        let mut emu = EmulatedDsa::new();
        emu.write_reg(regs::CTRL, ctrl::START).unwrap();
        assert_eq!(emu.read_reg(regs::STATUS).unwrap(), status::ERROR);
        assert_eq!(
            emu.read_reg(regs::ERR_CODE).unwrap(),
            ExecutionStatus::InvalidDimensions.code()
        );
    }

    #[test]
    fn hang_clears_on_reset() {
        let mut emu = EmulatedDsa::new();
        emu.inject(Fault::Hang);
        emu.write_reg(regs::CTRL, ctrl::START).unwrap();
        for _ in 0..10 {
            assert_eq!(emu.read_reg(regs::STATUS).unwrap(), status::BUSY);
        }
        emu.write_reg(regs::CTRL, ctrl::RESET).unwrap();
        assert_eq!(emu.read_reg(regs::STATUS).unwrap(), 0);
    }

    #[test]
    fn sram_bounds_checked() {
        let mut emu = EmulatedDsa::new().with_sram_size(64);
        assert!(emu.write_sram(60, &[0; 8]).is_err());
        let mut buf = [0u8; 8];
        assert!(emu.read_sram(usize::MAX, &mut buf).is_err());
        emu.write_sram(56, &[9; 8]).unwrap();
        emu.read_sram(56, &mut buf).unwrap();
        assert_eq!(buf, [9; 8]);
    }
}
