//! Memory-mapped device windows
//!
//! The accelerator is reached through a device node that can be mapped:
//! a UIO node (`/dev/uio0`), `/dev/mem` with a physical base address, or a
//! sysfs PCI resource file. [`MappedBus`] maps the control window and the
//! operand SRAM window of one accelerator and implements [`DsaBus`] on them.
//!
//! Unsafe code is confined to [`MmapRegion`]; everything above it is
//! bounds-checked safe Rust.

use crate::backend::BackendType;
use crate::backends::mmio::DsaBus;
use crate::capabilities::Capabilities;
use crate::error::{DsaError, Result};
use dsa_chip::{regs, window};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::str::FromStr;

/// Default device node when no locator is given.
pub const DEFAULT_DEVICE: &str = "/dev/uio0";

/// Where an accelerator lives: a mappable file and the byte offset of the
/// device inside it.
///
/// Parsed from `PATH[@BASE]`; `BASE` is hex with a `0x` prefix or decimal
/// and defaults to 0 (UIO nodes and PCI resource files start at the device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLocator {
    /// Device node or resource file
    pub path: PathBuf,
    /// Byte offset of the control window inside `path`
    pub base: u64,
}

impl FromStr for DeviceLocator {
    type Err = DsaError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (path, base) = match s.rsplit_once('@') {
            Some((path, base)) => (path, parse_base(base)?),
            None => (s, 0),
        };
        let path = if path.is_empty() { DEFAULT_DEVICE } else { path };
        Ok(Self {
            path: PathBuf::from(path),
            base,
        })
    }
}

impl std::fmt::Display for DeviceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.base == 0 {
            write!(f, "{}", self.path.display())
        } else {
            write!(f, "{}@{:#x}", self.path.display(), self.base)
        }
    }
}

fn parse_base(text: &str) -> Result<u64> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse(),
    };
    parsed.map_err(|e| DsaError::device_unavailable(format!("bad base address `{text}`: {e}")))
}

/// One mapped window of a device file
///
/// Provides bounds-checked access to memory-mapped hardware. The mapping
/// starts at the page containing `offset`; accessors are relative to
/// `offset` itself.
#[derive(Debug)]
pub struct MmapRegion {
    /// Page-aligned start of the mapping (what munmap needs)
    map_base: NonNull<u8>,
    /// Length of the whole mapping
    map_len: usize,
    /// First byte of the window
    ptr: NonNull<u8>,
    /// Usable window size
    size: usize,
    _file: File,
    label: &'static str,
}

impl MmapRegion {
    /// Map `size` bytes of `file` starting at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if `size` is zero, `offset` is not word aligned, the
    /// file cannot be duplicated, or mmap fails.
    pub fn map(file: &File, offset: u64, size: usize, label: &'static str) -> Result<Self> {
        if size == 0 {
            return Err(DsaError::device_unavailable(format!("{label} window size is 0")));
        }
        // register accessors cast to *u32
        if offset % 4 != 0 {
            return Err(DsaError::device_unavailable(format!(
                "{label} window offset {offset:#x} is not word aligned"
            )));
        }

        let page = rustix::param::page_size() as u64;
        let aligned = offset & !(page - 1);
        let delta = usize::try_from(offset - aligned)
            .map_err(|_| DsaError::device_unavailable("page offset overflow"))?;
        let map_len = size
            .checked_add(delta)
            .ok_or_else(|| DsaError::device_unavailable(format!("{label} window size overflow")))?;
        let file = file.try_clone()?;

        tracing::debug!("Mapping {label}: {map_len} bytes at file offset {aligned:#x}");

        // SAFETY: mmap is unsafe but we validate all preconditions:
        // - File descriptor is valid (cloned from an open File above)
        // - map_len is non-zero (size checked above)
        // - aligned is a multiple of the page size, as mmap requires
        // - PROT_READ|PROT_WRITE for register/SRAM access, MAP_SHARED so
        //   stores reach the device
        // - The File is stored in the struct so the fd outlives the mapping
        // - Drop unmaps exactly (map_base, map_len)
        let map_base = unsafe {
            let addr = mmap(
                std::ptr::null_mut(),
                map_len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                aligned,
            )
            .map_err(|e| DsaError::device_unavailable(format!("mmap of {label} failed: {e}")))?;

            NonNull::new(addr.cast::<u8>())
                .ok_or_else(|| DsaError::device_unavailable("mmap returned null"))?
        };

        // SAFETY: delta < page <= map_len, so the result stays inside the
        // mapping created above.
        let ptr = unsafe { NonNull::new_unchecked(map_base.as_ptr().add(delta)) };

        tracing::info!("Mapped {label} window ({size} bytes at {ptr:p})");

        Ok(Self {
            map_base,
            map_len,
            ptr,
            size,
            _file: file,
            label,
        })
    }

    fn check(&self, offset: usize, len: usize, op: &str) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(DsaError::device_unavailable(format!(
                "Out of bounds {op} in {}: offset={offset:#x}, size={len}, limit={:#x}",
                self.label, self.size
            ))),
        }
    }

    /// Read 32-bit register at offset
    ///
    /// # Errors
    ///
    /// Returns error if offset is out of bounds or not word aligned
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4, "read")?;
        if offset % 4 != 0 {
            return Err(DsaError::device_unavailable(format!(
                "Unaligned register read at {offset:#x}"
            )));
        }

        // SAFETY: Volatile read from memory-mapped hardware register.
        // - Bounds validated above: offset + 4 <= self.size
        // - ptr is valid for the lifetime of self (successful mmap)
        // - offset is a multiple of 4, and ptr is a page-aligned mapping
        //   plus a delta that map() requires to be a multiple of 4
        // - read_volatile: register reads have side effects and must not be
        //   merged or reordered by the compiler
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };

        tracing::trace!("Read u32 @ {offset:#x} = {value:#x}");
        Ok(value)
    }

    /// Write 32-bit register at offset
    ///
    /// # Errors
    ///
    /// Returns error if offset is out of bounds or not word aligned
    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, 4, "write")?;
        if offset % 4 != 0 {
            return Err(DsaError::device_unavailable(format!(
                "Unaligned register write at {offset:#x}"
            )));
        }

        tracing::trace!("Write u32 @ {offset:#x} = {value:#x}");

        // SAFETY: Volatile write to memory-mapped hardware register.
        // Same invariants as read_u32; write_volatile keeps the store (which
        // may start the accelerator) from being elided or reordered.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }

        Ok(())
    }

    /// Read bytes at offset
    ///
    /// # Errors
    ///
    /// Returns error if read would exceed bounds
    pub fn read_bytes(&self, offset: usize, buffer: &mut [u8]) -> Result<()> {
        self.check(offset, buffer.len(), "read")?;

        // SAFETY: copy_nonoverlapping requires valid, non-overlapping src/dst
        // for buffer.len() bytes:
        // - src: offset + len <= self.size, inside the mapping
        // - dst: buffer is a valid mutable slice owned by the caller
        // - No overlap: device memory vs caller memory
        // - u8 has alignment 1
        unsafe {
            let src = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(src, buffer.as_mut_ptr(), buffer.len());
        }

        Ok(())
    }

    /// Write bytes at offset
    ///
    /// # Errors
    ///
    /// Returns error if write would exceed bounds
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.check(offset, data.len(), "write")?;

        // SAFETY: as in read_bytes with the direction reversed.
        unsafe {
            let dst = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Get window size
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        tracing::debug!("Unmapping {} window ({} bytes)", self.label, self.size);

        // SAFETY: munmap requires the pointer and length returned by mmap.
        // - map_base / map_len are exactly what map() passed to mmap
        // - The mapping is still valid: Drop runs once
        unsafe {
            if let Err(e) = munmap(self.map_base.as_ptr().cast(), self.map_len) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: MmapRegion owns its mapping exclusively; no other in-process
// references exist, and the mapping stays valid for the struct's lifetime
// (fd kept open). Moving it between threads does not invalidate it.
unsafe impl Send for MmapRegion {}

// SAFETY: writes require &mut self (exclusive access enforced by the borrow
// checker); reads through &self are bounds-checked volatile loads. ptr, size
// and the fd are never mutated after construction.
unsafe impl Sync for MmapRegion {}

/// Control and SRAM windows of one mapped accelerator
#[derive(Debug)]
pub struct MappedBus {
    locator: DeviceLocator,
    ctrl: MmapRegion,
    sram: MmapRegion,
}

impl MappedBus {
    /// Open and map the device named by a `PATH[@BASE]` locator.
    ///
    /// An empty locator means [`DEFAULT_DEVICE`].
    ///
    /// # Errors
    ///
    /// - `DeviceNotFound` if the path does not exist
    /// - `DeviceUnavailable` if it cannot be opened, mapped or identified
    pub fn open(locator: &str) -> Result<Self> {
        let locator: DeviceLocator = locator.parse()?;
        Self::open_locator(locator)
    }

    /// Open and map the device at `locator`.
    ///
    /// # Errors
    ///
    /// As [`MappedBus::open`].
    pub fn open_locator(locator: DeviceLocator) -> Result<Self> {
        if !locator.path.exists() {
            return Err(DsaError::device_not_found(locator.path.clone()));
        }
        let file = open_rw(&locator.path)?;

        let ctrl = MmapRegion::map(
            &file,
            window_offset(&locator, window::ctrl::OFFSET)?,
            window::ctrl::SIZE,
            "ctrl",
        )?;

        let id = ctrl.read_u32(regs::DEVICE_ID)?;
        if id != regs::DSA_DEVICE_ID {
            return Err(DsaError::device_unavailable(format!(
                "{locator}: DEVICE_ID {id:#010x} is not a DSA"
            )));
        }

        let sram_size = match ctrl.read_u32(regs::SRAM_SIZE)? {
            0 => window::sram::DEFAULT_SIZE,
            n => n as usize,
        };
        let sram = MmapRegion::map(
            &file,
            window_offset(&locator, window::sram::OFFSET)?,
            sram_size,
            "sram",
        )?;

        tracing::info!("Opened DSA at {locator}");
        Ok(Self {
            locator,
            ctrl,
            sram,
        })
    }

    /// Locator this bus was opened from.
    pub const fn locator(&self) -> &DeviceLocator {
        &self.locator
    }
}

fn window_offset(locator: &DeviceLocator, window: u64) -> Result<u64> {
    locator.base.checked_add(window).ok_or_else(|| {
        DsaError::device_unavailable(format!("{locator}: window at +{window:#x} overflows"))
    })
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| {
            DsaError::device_unavailable(format!(
                "Cannot open {}: {e}. Check permissions / driver binding",
                path.display()
            ))
        })
}

impl DsaBus for MappedBus {
    const BACKEND_TYPE: BackendType = BackendType::Mmio;

    fn connect(device: &str) -> Result<Self> {
        Self::open(device)
    }

    fn read_reg(&mut self, offset: usize) -> Result<u32> {
        self.ctrl.read_u32(offset)
    }

    fn write_reg(&mut self, offset: usize, value: u32) -> Result<()> {
        self.ctrl.write_u32(offset, value)
    }

    fn read_sram(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.sram.read_bytes(offset, buf)
    }

    fn write_sram(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.sram.write_bytes(offset, data)
    }

    fn sram_size(&self) -> usize {
        self.sram.size()
    }

    fn probe(&mut self) -> Result<Capabilities> {
        let mut caps = Capabilities::from_registers(|off| self.ctrl.read_u32(off))?;
        caps.sram_bytes = self.sram.size();
        Ok(caps)
    }

    fn describe(&self) -> String {
        format!("MMIO {}", self.locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn locator_parses_path_and_base() {
        let loc: DeviceLocator = "/dev/mem@0x4000_0000".parse().unwrap();
        assert_eq!(loc.path, PathBuf::from("/dev/mem"));
        assert_eq!(loc.base, 0x4000_0000);

        let loc: DeviceLocator = "/dev/uio3".parse().unwrap();
        assert_eq!(loc.base, 0);

        let loc: DeviceLocator = "/dev/mem@65536".parse().unwrap();
        assert_eq!(loc.base, 65536);

        let loc: DeviceLocator = "".parse().unwrap();
        assert_eq!(loc.path, PathBuf::from(DEFAULT_DEVICE));

        assert!("/dev/mem@zz".parse::<DeviceLocator>().is_err());
    }

    #[test]
    fn locator_display_round_trips() {
        let loc: DeviceLocator = "/dev/mem@0x10000".parse().unwrap();
        assert_eq!(loc.to_string(), "/dev/mem@0x10000");
        assert_eq!(loc.to_string().parse::<DeviceLocator>().unwrap(), loc);
    }

    #[test]
    fn missing_device_is_not_found() {
        let err = MappedBus::open("/nonexistent/dsa0").unwrap_err();
        assert!(matches!(err, DsaError::DeviceNotFound { .. }));
    }

    #[test]
    fn region_over_plain_file_is_bounds_checked() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0u8; 8192]).unwrap();

        // offset inside a page exercises the page adjustment
        let mut region = MmapRegion::map(&file, 100, 64, "test").unwrap();
        region.write_u32(4, 0xDEAD_BEEF).unwrap();
        assert_eq!(region.read_u32(4).unwrap(), 0xDEAD_BEEF);

        region.write_bytes(60, &[1, 2, 3, 4]).unwrap();
        let mut back = [0u8; 4];
        region.read_bytes(60, &mut back).unwrap();
        assert_eq!(back, [1, 2, 3, 4]);

        assert!(region.read_u32(64).is_err());
        assert!(region.write_bytes(61, &[0; 4]).is_err());
        assert!(region.read_u32(2).is_err());
        assert!(region.read_bytes(usize::MAX, &mut back).is_err());
    }

    #[test]
    fn unaligned_window_offset_is_rejected() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0u8; 8192]).unwrap();

        for offset in [1, 2, 0x1001] {
            let err = MmapRegion::map(&file, offset, 64, "test").unwrap_err();
            assert!(matches!(err, DsaError::DeviceUnavailable { .. }));
        }
        assert!(MmapRegion::map(&file, 0x1004, 64, "test").is_ok());
    }

    #[test]
    fn unaligned_locator_base_fails_to_open() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 0x2_0000]).unwrap();
        file.flush().unwrap();
        let locator = format!("{}@0x1001", file.path().display());
        let err = MappedBus::open(&locator).unwrap_err();
        assert!(err.to_string().contains("not word aligned"), "{err}");
    }

    #[test]
    fn window_offset_overflow_is_an_error() {
        let locator: DeviceLocator = "/dev/mem@0xffff_ffff_ffff_fff0".parse().unwrap();
        assert!(window_offset(&locator, 0).is_ok());
        assert!(window_offset(&locator, window::sram::OFFSET).is_err());
    }

    #[test]
    fn plain_file_without_device_id_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 0x2_0000]).unwrap();
        file.flush().unwrap();
        let err = MappedBus::open(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, DsaError::DeviceUnavailable { .. }));
    }
}
