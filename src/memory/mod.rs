//! Remote memory access
//!
//! This module provides the copy primitive abstraction ([`RemoteMemory`]),
//! the Linux implementation on top of `process_vm_readv`/`process_vm_writev`,
//! `/proc/[pid]/maps` parsing and masked pattern scanning.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
mod process;

mod maps;
mod pattern;
mod region;
mod traits;

pub use maps::RegionMap;
pub use pattern::{find_pattern, Matches, Pattern};
pub use region::{Permissions, Region, RegionId, DYNAMIC_REGION};
pub use traits::MockMemory;

#[cfg(target_os = "linux")]
pub use linux::LinuxMemory;
#[cfg(target_os = "linux")]
pub use process::{find_process, is_process_running};

use std::sync::Arc;

use bytemuck::{AnyBitPattern, NoUninit};

use crate::error::MemoryError;

/// Cross-process copy primitive
///
/// Both directions return the number of bytes actually transferred, which may
/// be less than requested when the range runs into an unmapped page. An `Err`
/// means the copy itself failed (target gone, address unmapped, no privilege).
pub trait RemoteMemory: Send + Sync {
    /// Copy up to `buf.len()` bytes starting at `address` in the target
    fn read_remote(&self, address: usize, buf: &mut [u8]) -> Result<usize, MemoryError>;

    /// Copy `data` to `address` in the target
    fn write_remote(&self, address: usize, data: &[u8]) -> Result<usize, MemoryError>;

    /// Fill all of `buf`, treating a short copy as an error
    fn read_exact(&self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        let copied = self.read_remote(address, buf)?;
        if copied == buf.len() {
            Ok(())
        } else {
            Err(MemoryError::Partial {
                address,
                expected: buf.len(),
                copied,
            })
        }
    }

    /// Write all of `data`, treating a short copy as an error
    fn write_all(&self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        let copied = self.write_remote(address, data)?;
        if copied == data.len() {
            Ok(())
        } else {
            Err(MemoryError::Partial {
                address,
                expected: data.len(),
                copied,
            })
        }
    }
}

impl<M: RemoteMemory + ?Sized> RemoteMemory for Arc<M> {
    fn read_remote(&self, address: usize, buf: &mut [u8]) -> Result<usize, MemoryError> {
        (**self).read_remote(address, buf)
    }

    fn write_remote(&self, address: usize, data: &[u8]) -> Result<usize, MemoryError> {
        (**self).write_remote(address, data)
    }
}

impl<M: RemoteMemory + ?Sized> RemoteMemory for Box<M> {
    fn read_remote(&self, address: usize, buf: &mut [u8]) -> Result<usize, MemoryError> {
        (**self).read_remote(address, buf)
    }

    fn write_remote(&self, address: usize, data: &[u8]) -> Result<usize, MemoryError> {
        (**self).write_remote(address, data)
    }
}

/// Typed reads and writes plus the region snapshot used for scanning
///
/// The snapshot buffer grows to the largest region read and never shrinks.
/// Regions above the snapshot limit are refused instead of allocated.
/// It is tagged with the [`RegionId`] it mirrors and only re-read when a
/// different region is requested or a reload is forced, so repeated scans of
/// one region see the same (possibly stale) bytes.
pub struct MemoryAccessor<M> {
    memory: M,
    snapshot: Vec<u8>,
    snapshot_len: usize,
    snapshot_tag: Option<RegionId>,
    snapshot_limit: usize,
}

/// Default upper bound on the snapshot buffer (4 GiB on 64-bit targets)
pub const DEFAULT_SNAPSHOT_LIMIT: usize = u32::MAX as usize;

impl<M: RemoteMemory> MemoryAccessor<M> {
    pub fn new(memory: M) -> Self {
        Self {
            memory,
            snapshot: Vec::new(),
            snapshot_len: 0,
            snapshot_tag: None,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
        }
    }

    /// Largest region [`snapshot`](Self::snapshot) will copy
    pub fn snapshot_limit(&self) -> usize {
        self.snapshot_limit
    }

    /// Change the largest region [`snapshot`](Self::snapshot) will copy
    ///
    /// A buffer already grown past the new limit is kept.
    pub fn set_snapshot_limit(&mut self, limit: usize) {
        self.snapshot_limit = limit;
    }

    /// The underlying copy primitive
    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn into_inner(self) -> M {
        self.memory
    }

    /// Single copy from the target; see [`RemoteMemory::read_remote`]
    pub fn read_remote(&self, address: usize, buf: &mut [u8]) -> Result<usize, MemoryError> {
        self.memory.read_remote(address, buf)
    }

    /// Single copy into the target; see [`RemoteMemory::write_remote`]
    pub fn write_remote(&self, address: usize, data: &[u8]) -> Result<usize, MemoryError> {
        self.memory.write_remote(address, data)
    }

    /// Local copy of `region`, read from the target only when needed
    ///
    /// The returned slice covers the bytes actually copied, which is shorter
    /// than the region when the read was partial. A region larger than the
    /// snapshot limit, or one the buffer cannot be grown to hold, fails with
    /// [`MemoryError::SnapshotTooLarge`] before anything is read.
    pub fn snapshot(&mut self, region: &Region, force_reload: bool) -> Result<&[u8], MemoryError> {
        if force_reload || self.snapshot_tag != Some(region.id()) {
            self.snapshot_tag = None;
            self.snapshot_len = 0;

            let size = region.size();
            if self.snapshot.len() < size {
                let too_large = MemoryError::SnapshotTooLarge {
                    address: region.start(),
                    len: size,
                    limit: self.snapshot_limit,
                };
                if size > self.snapshot_limit {
                    return Err(too_large);
                }
                if self
                    .snapshot
                    .try_reserve_exact(size - self.snapshot.len())
                    .is_err()
                {
                    return Err(too_large);
                }
                self.snapshot.resize(size, 0);
            }

            let copied = self
                .memory
                .read_remote(region.start(), &mut self.snapshot[..size])?;
            if copied < size {
                log::debug!(
                    "Partial snapshot of {}: {:#x} of {:#x} bytes",
                    region.name(),
                    copied,
                    size
                );
            } else {
                log::debug!("Snapshot of {} ({:#x} bytes)", region.name(), size);
            }

            self.snapshot_len = copied;
            self.snapshot_tag = Some(region.id());
        }
        Ok(&self.snapshot[..self.snapshot_len])
    }

    /// Region the snapshot currently mirrors, if any
    pub fn snapshot_region(&self) -> Option<RegionId> {
        self.snapshot_tag
    }

    /// Allocated size of the snapshot buffer
    pub fn snapshot_capacity(&self) -> usize {
        self.snapshot.len()
    }

    /// Drop the snapshot tag so the next request re-reads
    pub fn invalidate_snapshot(&mut self) {
        self.snapshot_tag = None;
        self.snapshot_len = 0;
    }

    /// Read a plain value of type `T` (exactly `size_of::<T>()` bytes)
    pub fn read<T: AnyBitPattern>(&self, address: usize) -> Result<T, MemoryError> {
        let mut buf = vec![0u8; std::mem::size_of::<T>()];
        self.memory.read_exact(address, &mut buf)?;
        Ok(bytemuck::pod_read_unaligned(&buf))
    }

    /// Write a plain value of type `T`
    pub fn write<T: NoUninit>(&self, address: usize, value: &T) -> Result<(), MemoryError> {
        self.memory.write_all(address, bytemuck::bytes_of(value))
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&self, address: usize, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buf = vec![0u8; len];
        self.memory.read_exact(address, &mut buf)?;
        Ok(buf)
    }

    /// Write all of `data`
    pub fn write_bytes(&self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        self.memory.write_all(address, data)
    }

    /// Read a null-terminated string of at most `max_len` bytes
    ///
    /// A partial copy still yields the bytes that arrived.
    pub fn read_string(&self, address: usize, max_len: usize) -> Result<String, MemoryError> {
        let mut buf = vec![0u8; max_len];
        let copied = self.memory.read_remote(address, &mut buf)?;
        let bytes = &buf[..copied];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        if copied == 0 && max_len > 0 {
            return Err(MemoryError::Partial {
                address,
                expected: max_len,
                copied,
            });
        }
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Write the bytes of `value` without a terminator
    pub fn write_string(&self, address: usize, value: &str) -> Result<(), MemoryError> {
        self.memory.write_all(address, value.as_bytes())
    }

    /// Read a pointer-sized value
    pub fn read_ptr(&self, address: usize) -> Result<usize, MemoryError> {
        self.read::<usize>(address)
    }

    /// Read a boolean (non-zero = true)
    pub fn read_bool(&self, address: usize) -> Result<bool, MemoryError> {
        self.read::<u8>(address).map(|v| v != 0)
    }

    /// Resolve a relative reference embedded in code
    ///
    /// Reads the little-endian 32-bit displacement at `address + offset` and
    /// returns `address + displacement + extra`. Unlike a plain unsigned
    /// `u32` addition, the displacement is read as `i32` and sign extended,
    /// so negative `rel32` offsets resolve to lower addresses. Returns `None`
    /// unless all four bytes were read.
    pub fn absolute_address(&self, address: usize, offset: usize, extra: usize) -> Option<usize> {
        let displacement = self.read::<[u8; 4]>(address.wrapping_add(offset)).ok()?;
        let displacement = i32::from_le_bytes(displacement) as isize;
        Some(address.wrapping_add_signed(displacement).wrapping_add(extra))
    }

    /// Target of a 5-byte `call rel32` instruction at `address`
    pub fn call_address(&self, address: usize) -> Option<usize> {
        self.absolute_address(address, 1, 5)
    }
}
