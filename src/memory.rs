//! Read-only access to the target's address space.
//!
//! Everything the core knows about the target comes from reads against an address space it
//! does not own: a live (suspended) process, a minidump, or a full dump. This module defines
//! the [`crate::memory::MemoryReader`] trait through which all of those reads flow, together
//! with [`crate::memory::SnapshotMemory`], a region-backed implementation suitable for dump
//! files and tests.
//!
//! # Failure semantics
//!
//! A failed read is an everyday event when inspecting a foreign address space: pages are
//! paged out, dumps are partial, the target may even be mid-mutation. Callers in the core
//! therefore treat any `Err` from these methods as "this item cannot be resolved" and fall
//! back to a safe default; nothing in this module retries.
//!
//! # Usage Examples
//!
//! ```rust
//! use clrscope::memory::{MemoryReader, PointerWidth, SnapshotMemory};
//!
//! let mut image = SnapshotMemory::new();
//! image.add_region(0x1000, vec![0x78, 0x56, 0x34, 0x12, 0, 0, 0, 0]);
//!
//! assert_eq!(image.read_u32(0x1000)?, 0x1234_5678);
//! assert_eq!(image.read_pointer(0x1000, PointerWidth::Bits64)?, 0x1234_5678);
//! # Ok::<(), clrscope::Error>(())
//! ```

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::Result;

/// Pointer width of the target process.
///
/// Every address-sized read and every header-relative offset depends on this;
/// it is fixed at session open and carried by the ABI profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    /// 32-bit target (4-byte pointers)
    Bits32,
    /// 64-bit target (8-byte pointers)
    Bits64,
}

impl PointerWidth {
    /// Size of a pointer in bytes.
    #[must_use]
    pub fn size(self) -> u64 {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }
}

/// Read-only access to a target address space.
///
/// Implementations wrap whatever the target actually is - a suspended live
/// process, a mapped dump file, or a synthetic image in tests. All methods are
/// synchronous and never retry; an `Err` means the range is unreadable.
///
/// The provided typed readers are little-endian, matching every platform the
/// CLR runs on.
pub trait MemoryReader {
    /// Fill `buffer` from `address`. Fails unless the whole range is readable.
    ///
    /// # Errors
    /// Returns an error if any byte of the range cannot be read.
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> Result<()>;

    /// Read a single byte.
    ///
    /// # Errors
    /// Returns an error if the address is unreadable.
    fn read_u8(&self, address: u64) -> Result<u8> {
        let mut buffer = [0u8; 1];
        self.read_memory(address, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Read a little-endian `u16`.
    ///
    /// # Errors
    /// Returns an error if the range is unreadable.
    fn read_u16(&self, address: u64) -> Result<u16> {
        let mut buffer = [0u8; 2];
        self.read_memory(address, &mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    /// Read a little-endian `u32` (a "dword" in debugger parlance).
    ///
    /// # Errors
    /// Returns an error if the range is unreadable.
    fn read_u32(&self, address: u64) -> Result<u32> {
        let mut buffer = [0u8; 4];
        self.read_memory(address, &mut buffer)?;
        Ok(u32::from_le_bytes(buffer))
    }

    /// Read a little-endian `u64` (a "qword").
    ///
    /// # Errors
    /// Returns an error if the range is unreadable.
    fn read_u64(&self, address: u64) -> Result<u64> {
        let mut buffer = [0u8; 8];
        self.read_memory(address, &mut buffer)?;
        Ok(u64::from_le_bytes(buffer))
    }

    /// Read a little-endian `f32`.
    ///
    /// # Errors
    /// Returns an error if the range is unreadable.
    fn read_f32(&self, address: u64) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(address)?))
    }

    /// Read a little-endian `f64`.
    ///
    /// # Errors
    /// Returns an error if the range is unreadable.
    fn read_f64(&self, address: u64) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(address)?))
    }

    /// Read a pointer-sized value, zero-extended to 64 bits.
    ///
    /// # Errors
    /// Returns an error if the range is unreadable.
    fn read_pointer(&self, address: u64, width: PointerWidth) -> Result<u64> {
        match width {
            PointerWidth::Bits32 => Ok(u64::from(self.read_u32(address)?)),
            PointerWidth::Bits64 => self.read_u64(address),
        }
    }
}

enum RegionData {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl RegionData {
    fn bytes(&self) -> &[u8] {
        match self {
            RegionData::Owned(data) => data,
            RegionData::Mapped(map) => map,
        }
    }
}

struct Region {
    base: u64,
    data: RegionData,
}

/// A target image assembled from discrete memory regions.
///
/// Each region pairs a base address with a byte payload, either owned or
/// memory-mapped from a dump file. Reads that cross a gap between regions
/// fail, exactly like a read of an unmapped page in the real target.
///
/// # Examples
///
/// ```rust
/// use clrscope::memory::{MemoryReader, SnapshotMemory};
///
/// let mut image = SnapshotMemory::new();
/// image.add_region(0x40_0000, vec![1, 2, 3, 4]);
///
/// assert_eq!(image.read_u8(0x40_0002)?, 3);
/// assert!(image.read_u8(0x40_0004).is_err());
/// # Ok::<(), clrscope::Error>(())
/// ```
pub struct SnapshotMemory {
    regions: Vec<Region>,
}

impl SnapshotMemory {
    /// Create an empty image.
    #[must_use]
    pub fn new() -> Self {
        SnapshotMemory {
            regions: Vec::new(),
        }
    }

    /// Add an owned region at `base`.
    pub fn add_region(&mut self, base: u64, data: Vec<u8>) {
        self.regions.push(Region {
            base,
            data: RegionData::Owned(data),
        });
        self.regions.sort_by_key(|r| r.base);
    }

    /// Map a raw dump file as a single region at `base`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn map_file(&mut self, path: &Path, base: u64) -> Result<()> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and the file is not expected to be
        // truncated while the snapshot is alive.
        let map = unsafe { Mmap::map(&file)? };
        self.regions.push(Region {
            base,
            data: RegionData::Mapped(map),
        });
        self.regions.sort_by_key(|r| r.base);
        Ok(())
    }

    fn region_containing(&self, address: u64, len: u64) -> Option<&Region> {
        let idx = self
            .regions
            .partition_point(|r| r.base <= address)
            .checked_sub(1)?;
        let region = &self.regions[idx];
        let offset = address - region.base;
        let end = offset.checked_add(len)?;
        if end <= region.data.bytes().len() as u64 {
            Some(region)
        } else {
            None
        }
    }
}

impl Default for SnapshotMemory {
    fn default() -> Self {
        SnapshotMemory::new()
    }
}

impl MemoryReader for SnapshotMemory {
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        let len = buffer.len() as u64;
        let Some(region) = self.region_containing(address, len) else {
            return Err(crate::Error::OutOfBounds);
        };

        let offset = (address - region.base) as usize;
        buffer.copy_from_slice(&region.data.bytes()[offset..offset + buffer.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_within_region() {
        let mut image = SnapshotMemory::new();
        image.add_region(0x1000, vec![0xDE, 0xAD, 0xBE, 0xEF]);

        assert_eq!(image.read_u8(0x1000).unwrap(), 0xDE);
        assert_eq!(image.read_u16(0x1002).unwrap(), 0xEFBE);
        assert_eq!(image.read_u32(0x1000).unwrap(), 0xEFBE_ADDE);
    }

    #[test]
    fn test_read_past_region_end_fails() {
        let mut image = SnapshotMemory::new();
        image.add_region(0x1000, vec![0u8; 4]);

        assert!(image.read_u32(0x1001).is_err());
        assert!(image.read_u8(0x0FFF).is_err());
    }

    #[test]
    fn test_read_between_regions_fails() {
        let mut image = SnapshotMemory::new();
        image.add_region(0x1000, vec![0u8; 0x100]);
        image.add_region(0x2000, vec![0u8; 0x100]);

        assert!(image.read_u8(0x1800).is_err());
        assert!(image.read_u8(0x2080).is_ok());
    }

    #[test]
    fn test_pointer_width_reads() {
        let mut image = SnapshotMemory::new();
        image.add_region(0x1000, vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);

        assert_eq!(
            image.read_pointer(0x1000, PointerWidth::Bits32).unwrap(),
            0x4433_2211
        );
        assert_eq!(
            image.read_pointer(0x1000, PointerWidth::Bits64).unwrap(),
            0x8877_6655_4433_2211
        );
    }

    #[test]
    fn test_float_reads() {
        let mut image = SnapshotMemory::new();
        image.add_region(0x1000, 1.5f32.to_le_bytes().to_vec());
        image.add_region(0x2000, 2.25f64.to_le_bytes().to_vec());

        assert!((image.read_f32(0x1000).unwrap() - 1.5).abs() < f32::EPSILON);
        assert!((image.read_f64(0x2000).unwrap() - 2.25).abs() < f64::EPSILON);
    }
}
