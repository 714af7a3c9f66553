//! Register-driven GEMM backend
//!
//! Executes a job the way the accelerator expects it:
//!
//! ```text
//! 1. validate config, check it against discovered capabilities
//! 2. plan SRAM placement (16-byte aligned regions)
//! 3. stage lhs / rhs / bias / per-channel params into SRAM (little-endian)
//! 4. program DIM_* / *_ROW_STRIDE / *_ADDR / DTYPE / QUANT_MODE / FLAGS / ...
//! 5. clear STATUS, write CTRL.START
//! 6. poll STATUS for DONE or ERROR (timeout → soft reset)
//! 7. copy each output row (M bytes) from SRAM into dst, acknowledge DONE
//! ```
//!
//! The bus underneath is abstract: [`MappedBus`](super::mmap::MappedBus) for
//! a real device, [`EmulatedDsa`](super::emulated::EmulatedDsa) for CI.

use crate::backend::{BackendType, GemmBackend};
use crate::capabilities::Capabilities;
use crate::config::{Lhs, MatmulConfig, RhsLayout, Shape};
use crate::error::{DsaError, Result};
use crate::quant::{Rounding, ShiftConvention};
use dsa_chip::regs::{self, ctrl, flags, status};
use dsa_chip::{dtype, window};
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Register and SRAM access to one accelerator
pub trait DsaBus: Debug + Send + Sync {
    /// Backend type reported by an `MmioBackend` on this bus
    const BACKEND_TYPE: BackendType;

    /// Attach to the device named by `device`.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be found or mapped.
    fn connect(device: &str) -> Result<Self>
    where
        Self: Sized;

    /// Read a control register.
    ///
    /// # Errors
    ///
    /// Returns error on an out-of-window or unaligned offset.
    fn read_reg(&mut self, offset: usize) -> Result<u32>;

    /// Write a control register.
    ///
    /// # Errors
    ///
    /// Returns error on an out-of-window or unaligned offset.
    fn write_reg(&mut self, offset: usize, value: u32) -> Result<()>;

    /// Copy bytes out of SRAM.
    ///
    /// # Errors
    ///
    /// Returns error if the range exceeds the SRAM window.
    fn read_sram(&mut self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Copy bytes into SRAM.
    ///
    /// # Errors
    ///
    /// Returns error if the range exceeds the SRAM window.
    fn write_sram(&mut self, offset: usize, data: &[u8]) -> Result<()>;

    /// Size of the SRAM window in bytes.
    fn sram_size(&self) -> usize;

    /// Read identity registers.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the device does not identify as a DSA.
    fn probe(&mut self) -> Result<Capabilities>;

    /// Human-readable description for logs and errors.
    fn describe(&self) -> String;
}

/// Polling and placement options for the MMIO backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioOptions {
    /// Give up on a job after this long
    pub poll_timeout: Duration,
    /// Sleep between STATUS reads
    pub poll_interval: Duration,
    /// First SRAM byte the driver may use
    pub sram_base: usize,
}

impl Default for MmioOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_micros(100),
            sram_base: 0,
        }
    }
}

impl MmioOptions {
    /// Set the completion timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the STATUS polling interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Reserve SRAM below `base`.
    #[must_use]
    pub const fn with_sram_base(mut self, base: usize) -> Self {
        self.sram_base = base;
        self
    }
}

/// Byte range inside the SRAM window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SramRegion {
    /// Start offset (16-byte aligned)
    pub offset: usize,
    /// Length in bytes
    pub len: usize,
}

impl SramRegion {
    /// One past the last byte.
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Placement of every operand of one job in SRAM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SramLayout {
    /// lhs, including stride padding
    pub lhs: SramRegion,
    /// rhs, including stride padding
    pub rhs: SramRegion,
    /// Bias, K × i32
    pub bias: Option<SramRegion>,
    /// Per-channel multipliers, K × i32
    pub mults: Option<SramRegion>,
    /// Per-channel shifts, K × i32
    pub shifts: Option<SramRegion>,
    /// Output, including stride gaps
    pub dst: SramRegion,
}

impl SramLayout {
    /// Lay the job out from `base`, each region aligned to
    /// `window::sram::ALIGN`.
    ///
    /// # Errors
    ///
    /// Returns `SramExhausted` if the layout does not fit in `sram_bytes`.
    pub fn plan(
        config: &MatmulConfig<'_>,
        shape: &Shape,
        base: usize,
        sram_bytes: usize,
    ) -> Result<Self> {
        let mut cursor = base;
        let mut take = |len: usize| {
            let region = SramRegion {
                offset: window::align_up(cursor),
                len,
            };
            cursor = region.end();
            region
        };

        let lhs = take(shape.lhs_extent() * config.lhs.element_bytes());
        let rhs = take(shape.rhs_extent(config.rhs_layout));
        let bias = config.bias.map(|_| take(shape.k * 4));
        let (mults, shifts) = match config.per_channel {
            Some(_) => (Some(take(shape.k * 4)), Some(take(shape.k * 4))),
            None => (None, None),
        };
        let dst = take(shape.dst_extent());

        let layout = Self {
            lhs,
            rhs,
            bias,
            mults,
            shifts,
            dst,
        };
        if layout.end() > sram_bytes || u32::try_from(layout.end()).is_err() {
            return Err(DsaError::SramExhausted {
                required: layout.end(),
                available: sram_bytes,
            });
        }
        Ok(layout)
    }

    /// One past the last byte used.
    pub const fn end(&self) -> usize {
        self.dst.end()
    }
}

/// GEMM backend that drives accelerator registers over a [`DsaBus`]
#[derive(Debug)]
pub struct MmioBackend<B: DsaBus> {
    bus: B,
    caps: Capabilities,
    options: MmioOptions,
    ready: bool,
}

impl<B: DsaBus> MmioBackend<B> {
    /// Probe the device on `bus` and reset it.
    ///
    /// # Errors
    ///
    /// Returns error if the device does not identify as a DSA or a register
    /// access fails.
    pub fn new(mut bus: B, options: MmioOptions) -> Result<Self> {
        let caps = bus.probe()?;
        if options.sram_base >= caps.sram_bytes {
            return Err(DsaError::SramExhausted {
                required: options.sram_base,
                available: caps.sram_bytes,
            });
        }
        bus.write_reg(regs::CTRL, ctrl::RESET)?;
        info!("{}: {caps}", bus.describe());
        Ok(Self {
            bus,
            caps,
            options,
            ready: true,
        })
    }

    /// Borrow the underlying bus.
    pub const fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutably borrow the underlying bus.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Active options.
    pub const fn options(&self) -> &MmioOptions {
        &self.options
    }

    /// Poll STATUS until DONE, ERROR or timeout
    fn poll_status(&mut self) -> Result<()> {
        let start = Instant::now();

        loop {
            let st = self.bus.read_reg(regs::STATUS)?;

            if st & status::ERROR != 0 {
                let code = self.bus.read_reg(regs::ERR_CODE)?;
                self.bus.write_reg(regs::STATUS, status::ERROR | status::DONE)?;
                return Err(DsaError::HardwareError { code });
            }

            if st & status::DONE != 0 {
                return Ok(());
            }

            if start.elapsed() > self.options.poll_timeout {
                if let Err(e) = self.bus.write_reg(regs::CTRL, ctrl::RESET) {
                    self.ready = false;
                    return Err(e);
                }
                return Err(DsaError::Timeout {
                    duration_ms: u64::try_from(self.options.poll_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                });
            }

            std::thread::sleep(self.options.poll_interval);
        }
    }

    fn stage(&mut self, config: &MatmulConfig<'_>, shape: &Shape, layout: &SramLayout) -> Result<()> {
        let lhs_bytes = match config.lhs {
            Lhs::S8(v) => bytemuck::cast_slice::<i8, u8>(&v[..shape.lhs_extent()]).to_vec(),
            Lhs::S16(v) => le_bytes(&v[..shape.lhs_extent()], |x| x.to_le_bytes()),
        };
        self.bus.write_sram(layout.lhs.offset, &lhs_bytes)?;

        let rhs = &config.rhs[..shape.rhs_extent(config.rhs_layout)];
        self.bus.write_sram(layout.rhs.offset, bytemuck::cast_slice(rhs))?;

        if let (Some(region), Some(bias)) = (layout.bias, config.bias) {
            self.bus.write_sram(region.offset, &le_bytes(&bias[..shape.k], |x| x.to_le_bytes()))?;
        }
        if let (Some(mults), Some(shifts), Some(pc)) = (layout.mults, layout.shifts, config.per_channel)
        {
            self.bus.write_sram(mults.offset, &le_bytes(&pc.mults[..shape.k], |x| x.to_le_bytes()))?;
            self.bus.write_sram(shifts.offset, &le_bytes(&pc.shifts[..shape.k], |x| x.to_le_bytes()))?;
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn program(&mut self, config: &MatmulConfig<'_>, shape: &Shape, layout: &SramLayout) -> Result<()> {
        let elem = config.lhs.element_bytes();
        let addr = |r: Option<SramRegion>| r.map_or(0, |r| r.offset as u32);

        let mut job_flags = 0;
        if config.bias.is_some() {
            job_flags |= flags::BIAS_EN;
        }
        if config.rhs_layout == RhsLayout::ColumnMajor {
            job_flags |= flags::RHS_COL_MAJOR;
        }
        if config.policy.shift == ShiftConvention::Signed {
            job_flags |= flags::SIGNED_SHIFT;
        }
        let round = match config.policy.rounding {
            Rounding::HalfUp => flags::round::HALF_UP,
            Rounding::HalfAwayFromZero => flags::round::HALF_AWAY,
            Rounding::Floor => flags::round::FLOOR,
        };
        job_flags |= round << flags::ROUND_SHIFT;

        let quant_mode = if config.per_channel.is_some() {
            dtype::QUANT_PER_CHANNEL
        } else {
            dtype::QUANT_PER_TENSOR
        };

        let writes = [
            (regs::DIM_K, config.k),
            (regs::DIM_N, config.n),
            (regs::DIM_M, config.m),
            (regs::LHS_ROW_STRIDE, (shape.lhs_stride * elem) as u32),
            (regs::RHS_ROW_STRIDE, shape.rhs_stride as u32),
            (regs::DST_ROW_STRIDE, shape.dst_stride as u32),
            (regs::LHS_ADDR, layout.lhs.offset as u32),
            (regs::RHS_ADDR, layout.rhs.offset as u32),
            (regs::DST_ADDR, layout.dst.offset as u32),
            (regs::BIAS_ADDR, addr(layout.bias)),
            (regs::MULT_ADDR, addr(layout.mults)),
            (regs::SHIFT_ADDR, addr(layout.shifts)),
            (
                regs::DTYPE,
                dtype::pack_dtypes(config.lhs.dtype(), dtype::S8, dtype::S32, dtype::S8),
            ),
            (regs::QUANT_MODE, quant_mode),
            (regs::FLAGS, job_flags),
            (regs::LHS_OFFSET, config.lhs_offset as u32),
            (regs::RHS_OFFSET, config.rhs_offset as u32),
            (regs::DST_OFFSET, config.dst_offset as u32),
            (regs::DST_MULT, config.dst_mult as u32),
            (regs::DST_SHIFT, config.dst_shift as u32),
            (regs::ACT_MIN, i32::from(config.act_min) as u32),
            (regs::ACT_MAX, i32::from(config.act_max) as u32),
        ];
        for (offset, value) in writes {
            self.bus.write_reg(offset, value)?;
        }
        Ok(())
    }

    fn read_back(&mut self, layout: &SramLayout) -> Result<Vec<u8>> {
        let mut out = vec![0u8; layout.dst.len];
        self.bus.read_sram(layout.dst.offset, &mut out)?;
        Ok(out)
    }
}

/// Copy the K valid rows of a read-back dst extent into `dst`, leaving the
/// bytes between rows untouched.
fn scatter_rows(dst: &mut [i8], out: &[u8], shape: &Shape) {
    let out: &[i8] = bytemuck::cast_slice(out);
    for r in 0..shape.k {
        let row = r * shape.dst_stride;
        dst[row..row + shape.m].copy_from_slice(&out[row..row + shape.m]);
    }
}

fn le_bytes<T: Copy, const N: usize>(values: &[T], f: impl Fn(T) -> [u8; N]) -> Vec<u8> {
    values.iter().flat_map(|&v| f(v)).collect()
}

impl<B: DsaBus> GemmBackend for MmioBackend<B> {
    fn init(device: &str) -> Result<Self> {
        Self::new(B::connect(device)?, MmioOptions::default())
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn execute(&mut self, config: &mut MatmulConfig<'_>) -> Result<()> {
        execute_job(self, config)
    }

    fn backend_type(&self) -> BackendType {
        B::BACKEND_TYPE
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

fn execute_job<B: DsaBus>(backend: &mut MmioBackend<B>, config: &mut MatmulConfig<'_>) -> Result<()> {
    let shape = config.validate()?;
    let desc = backend.bus.describe();
    backend.caps.supports(config, &desc)?;

    let layout = SramLayout::plan(config, &shape, backend.options.sram_base, backend.caps.sram_bytes)?;
    debug!(
        "{desc}: K={} N={} M={} staged {} of {} SRAM bytes",
        shape.k,
        shape.n,
        shape.m,
        layout.end(),
        backend.caps.sram_bytes
    );

    backend.stage(config, &shape, &layout)?;
    backend.program(config, &shape, &layout)?;
    backend.bus.write_reg(regs::STATUS, status::DONE | status::ERROR)?;
    backend.bus.write_reg(regs::CTRL, ctrl::START)?;

    if let Err(e) = backend.poll_status() {
        warn!("{desc}: job failed: {e}");
        return Err(e);
    }

    // dst is written only once the job is fully acknowledged
    let out = backend.read_back(&layout)?;
    backend.bus.write_reg(regs::STATUS, status::DONE)?;
    scatter_rows(config.dst, &out, &shape);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::emulated::{EmulatedDsa, Fault};
    use dsa_chip::regs::features;

    fn options() -> MmioOptions {
        MmioOptions::default().with_poll_timeout(Duration::from_millis(20))
    }

    #[test]
    fn layout_regions_are_aligned_and_disjoint() {
        let lhs = [0i16; 6];
        let rhs = [0i8; 9];
        let bias = [0i32; 2];
        let mults = [1i32; 2];
        let shifts = [0i32; 2];
        let mut dst = [0i8; 6];
        let cfg = MatmulConfig::new(2, 3, 3, Lhs::S16(&lhs), &rhs, &mut dst)
            .with_bias(&bias)
            .with_per_channel(&mults, &shifts);
        let shape = cfg.validate().unwrap();
        let layout = SramLayout::plan(&cfg, &shape, 4, 4096).unwrap();

        let regions = [
            layout.lhs,
            layout.rhs,
            layout.bias.unwrap(),
            layout.mults.unwrap(),
            layout.shifts.unwrap(),
            layout.dst,
        ];
        assert_eq!(layout.lhs, SramRegion { offset: 16, len: 12 });
        for pair in regions.windows(2) {
            assert_eq!(pair[1].offset % window::sram::ALIGN, 0);
            assert!(pair[0].end() <= pair[1].offset);
        }
        assert_eq!(layout.end(), layout.dst.end());
    }

    #[test]
    fn layout_without_optional_operands() {
        let lhs = [0i8; 4];
        let rhs = [0i8; 4];
        let mut dst = [0i8; 4];
        let cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst);
        let shape = cfg.validate().unwrap();
        let layout = SramLayout::plan(&cfg, &shape, 0, 64).unwrap();
        assert_eq!(layout.bias, None);
        assert_eq!(layout.mults, None);
        assert_eq!(layout.dst, SramRegion { offset: 32, len: 4 });
    }

    #[test]
    fn layout_too_large_is_exhausted() {
        let lhs = [0i8; 64];
        let rhs = [0i8; 64];
        let mut dst = [0i8; 64];
        let cfg = MatmulConfig::new(8, 8, 8, Lhs::S8(&lhs), &rhs, &mut dst);
        let shape = cfg.validate().unwrap();
        assert!(matches!(
            SramLayout::plan(&cfg, &shape, 0, 128),
            Err(DsaError::SramExhausted { required: 192, available: 128 })
        ));
    }

    #[test]
    fn sram_base_beyond_window_rejected() {
        let emu = EmulatedDsa::new().with_sram_size(256);
        let err = MmioBackend::new(emu, options().with_sram_base(256)).unwrap_err();
        assert!(matches!(err, DsaError::SramExhausted { .. }));
    }

    #[test]
    fn program_writes_job_registers() {
        let mut backend = MmioBackend::new(EmulatedDsa::new(), options()).unwrap();
        let lhs = [1i16, -2, 3, 4];
        let rhs = [1i8, 2, 3, 4];
        let bias = [5i32, 6];
        let mut dst = [0i8; 4];
        let mut cfg = MatmulConfig::new(2, 2, 2, Lhs::S16(&lhs), &rhs, &mut dst)
            .with_bias(&bias)
            .with_rhs_layout(RhsLayout::ColumnMajor)
            .with_offsets(-3, 0, 7)
            .with_activation(-10, 100);
        backend.execute(&mut cfg).unwrap();

        let bus = backend.bus_mut();
        assert_eq!(bus.read_reg(regs::DIM_N).unwrap(), 2);
        assert_eq!(bus.read_reg(regs::LHS_ROW_STRIDE).unwrap(), 4);
        let job_flags = bus.read_reg(regs::FLAGS).unwrap();
        assert_ne!(job_flags & flags::BIAS_EN, 0);
        assert_ne!(job_flags & flags::RHS_COL_MAJOR, 0);
        assert_eq!(bus.read_reg(regs::LHS_OFFSET).unwrap(), (-3i32) as u32);
        assert_eq!(bus.read_reg(regs::ACT_MIN).unwrap(), (-10i32) as u32);
        assert_eq!(bus.read_reg(regs::STATUS).unwrap() & status::DONE, 0);
    }

    #[test]
    fn hardware_error_carries_err_code() {
        let mut backend = MmioBackend::new(EmulatedDsa::new(), options()).unwrap();
        backend.bus_mut().inject(Fault::Error(0x42));
        let lhs = [1i8];
        let rhs = [1i8];
        let mut dst = [9i8];
        let err = backend
            .execute(&mut MatmulConfig::new(1, 1, 1, Lhs::S8(&lhs), &rhs, &mut dst))
            .unwrap_err();
        assert!(matches!(err, DsaError::HardwareError { code: 0x42 }));
        assert_eq!(dst, [9]);
        assert!(backend.is_ready());
    }

    #[test]
    fn timeout_resets_and_next_job_runs() {
        let mut backend = MmioBackend::new(EmulatedDsa::new(), options()).unwrap();
        backend.bus_mut().inject(Fault::Hang);
        let lhs = [2i8];
        let rhs = [3i8];
        let mut dst = [0i8];
        let err = backend
            .execute(&mut MatmulConfig::new(1, 1, 1, Lhs::S8(&lhs), &rhs, &mut dst))
            .unwrap_err();
        assert!(matches!(err, DsaError::Timeout { duration_ms: 20 }));
        assert_eq!(dst, [0]);

        backend
            .execute(&mut MatmulConfig::new(1, 1, 1, Lhs::S8(&lhs), &rhs, &mut dst))
            .unwrap();
        assert_eq!(dst, [6]);
    }

    #[test]
    fn missing_feature_is_unsupported() {
        let emu = EmulatedDsa::new().with_features(features::ALL & !features::LHS_S16);
        let mut backend = MmioBackend::new(emu, options()).unwrap();
        let lhs = [1i16];
        let rhs = [1i8];
        let mut dst = [0i8];
        let err = backend
            .execute(&mut MatmulConfig::new(1, 1, 1, Lhs::S16(&lhs), &rhs, &mut dst))
            .unwrap_err();
        assert!(matches!(err, DsaError::Unsupported { .. }));
        assert_eq!(backend.bus().jobs_completed(), 0);
    }

    /// Emulator whose SRAM reads or DONE acknowledgement can be made to fail
    #[derive(Debug)]
    struct FlakyBus {
        inner: EmulatedDsa,
        fail_sram_read: bool,
        fail_ack: bool,
    }

    impl FlakyBus {
        fn new() -> Self {
            Self {
                inner: EmulatedDsa::new(),
                fail_sram_read: false,
                fail_ack: false,
            }
        }
    }

    impl DsaBus for FlakyBus {
        const BACKEND_TYPE: BackendType = BackendType::Emulated;

        fn connect(_device: &str) -> Result<Self> {
            Ok(Self::new())
        }

        fn read_reg(&mut self, offset: usize) -> Result<u32> {
            self.inner.read_reg(offset)
        }

        fn write_reg(&mut self, offset: usize, value: u32) -> Result<()> {
            if self.fail_ack && offset == regs::STATUS && value == status::DONE {
                return Err(DsaError::device_unavailable("bus error acknowledging DONE"));
            }
            self.inner.write_reg(offset, value)
        }

        fn read_sram(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
            if self.fail_sram_read {
                return Err(DsaError::device_unavailable("bus error reading SRAM"));
            }
            self.inner.read_sram(offset, buf)
        }

        fn write_sram(&mut self, offset: usize, data: &[u8]) -> Result<()> {
            self.inner.write_sram(offset, data)
        }

        fn sram_size(&self) -> usize {
            self.inner.sram_size()
        }

        fn probe(&mut self) -> Result<Capabilities> {
            self.inner.probe()
        }

        fn describe(&self) -> String {
            format!("flaky {}", self.inner.describe())
        }
    }

    fn run_strided(backend: &mut MmioBackend<FlakyBus>, dst: &mut [i8; 6]) -> Result<()> {
        let lhs = [1i8, 2, 3, 4];
        let rhs = [1i8, 0, 0, 1];
        let mut cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, dst).with_strides(0, 0, 3);
        backend.execute(&mut cfg)
    }

    #[test]
    fn failed_sram_read_leaves_dst_untouched() {
        let mut bus = FlakyBus::new();
        bus.fail_sram_read = true;
        let mut backend = MmioBackend::new(bus, options()).unwrap();
        let mut dst = [0x5a_i8; 6];
        let err = run_strided(&mut backend, &mut dst).unwrap_err();
        assert!(matches!(err, DsaError::DeviceUnavailable { .. }));
        assert_eq!(dst, [0x5a; 6]);
    }

    #[test]
    fn failed_done_ack_leaves_dst_untouched() {
        let mut bus = FlakyBus::new();
        bus.fail_ack = true;
        let mut backend = MmioBackend::new(bus, options()).unwrap();
        let mut dst = [0x5a_i8; 6];
        assert!(run_strided(&mut backend, &mut dst).is_err());
        assert_eq!(dst, [0x5a; 6]);

        backend.bus_mut().fail_ack = false;
        run_strided(&mut backend, &mut dst).unwrap();
        assert_eq!(dst, [1, 2, 0x5a, 3, 4, 0x5a]);
    }
}
