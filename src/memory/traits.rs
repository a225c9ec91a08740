//! In-process stand-in for a target's address space
//!
//! [`MockMemory`] implements [`RemoteMemory`] over a set of byte blocks so the
//! accessor, scanner and [`Target`](crate::Target) can be exercised without a
//! second process. Its contents can be changed behind the accessor's back to
//! simulate a target that keeps running.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::RemoteMemory;
use crate::error::MemoryError;

/// Fake address space made of non-overlapping blocks
pub struct MockMemory {
    /// Block start address -> contents
    blocks: Mutex<BTreeMap<usize, Vec<u8>>>,
    /// Whether the "process" is still alive
    valid: AtomicBool,
    /// Number of read calls served, successful or not
    reads: AtomicUsize,
}

impl Default for MockMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMemory {
    /// Create an empty address space
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            valid: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
        }
    }

    /// Map a block at `base` (builder form)
    pub fn with_block(self, base: usize, data: &[u8]) -> Self {
        self.map_block(base, data);
        self
    }

    /// Map a block at `base`, replacing any block that starts there
    pub fn map_block(&self, base: usize, data: &[u8]) {
        self.blocks.lock().insert(base, data.to_vec());
    }

    /// Overwrite bytes inside an existing block without going through
    /// [`RemoteMemory::write_remote`]; returns false if the range is not mapped
    pub fn poke(&self, address: usize, data: &[u8]) -> bool {
        let mut blocks = self.blocks.lock();
        let Some((&base, block)) = blocks.range_mut(..=address).next_back() else {
            return false;
        };
        let offset = address - base;
        match block.get_mut(offset..offset + data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Copy bytes out of a block without counting as a read
    pub fn peek(&self, address: usize, len: usize) -> Option<Vec<u8>> {
        let blocks = self.blocks.lock();
        let (&base, block) = blocks.range(..=address).next_back()?;
        let offset = address - base;
        block.get(offset..offset + len).map(|b| b.to_vec())
    }

    /// Simulate the target exiting: every later copy fails
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Number of read calls made so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check_alive(&self, address: usize, len: usize) -> Result<(), MemoryError> {
        if self.valid.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MemoryError::Copy {
                address,
                len,
                source: io::Error::new(io::ErrorKind::NotFound, "no such process"),
            })
        }
    }

    fn unmapped(address: usize, len: usize) -> MemoryError {
        MemoryError::Copy {
            address,
            len,
            source: io::Error::new(io::ErrorKind::Other, "bad address"),
        }
    }
}

impl RemoteMemory for MockMemory {
    fn read_remote(&self, address: usize, buf: &mut [u8]) -> Result<usize, MemoryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_alive(address, buf.len())?;
        if buf.is_empty() {
            return Ok(0);
        }

        let blocks = self.blocks.lock();
        let (&base, block) = blocks
            .range(..=address)
            .next_back()
            .filter(|(base, block)| address < **base + block.len())
            .ok_or_else(|| Self::unmapped(address, buf.len()))?;

        let offset = address - base;
        let count = buf.len().min(block.len() - offset);
        buf[..count].copy_from_slice(&block[offset..offset + count]);
        Ok(count)
    }

    fn write_remote(&self, address: usize, data: &[u8]) -> Result<usize, MemoryError> {
        self.check_alive(address, data.len())?;
        if data.is_empty() {
            return Ok(0);
        }

        let mut blocks = self.blocks.lock();
        let (&base, block) = blocks
            .range_mut(..=address)
            .next_back()
            .filter(|(base, block)| address < **base + block.len())
            .ok_or_else(|| Self::unmapped(address, data.len()))?;

        let offset = address - base;
        let count = data.len().min(block.len() - offset);
        block[offset..offset + count].copy_from_slice(&data[..count]);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_inside_block() {
        let memory = MockMemory::new().with_block(0x1000, &[1, 2, 3, 4]);
        let mut buf = [0u8; 2];
        assert_eq!(memory.read_remote(0x1001, &mut buf).unwrap(), 2);
        assert_eq!(buf, [2, 3]);
        assert_eq!(memory.read_count(), 1);
    }

    #[test]
    fn test_read_past_block_end_is_partial() {
        let memory = MockMemory::new().with_block(0x1000, &[1, 2, 3, 4]);
        let mut buf = [0u8; 8];
        assert_eq!(memory.read_remote(0x1002, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[3, 4]);
    }

    #[test]
    fn test_read_unmapped_fails() {
        let memory = MockMemory::new().with_block(0x1000, &[1, 2, 3, 4]);
        let mut buf = [0u8; 1];
        assert!(memory.read_remote(0x0fff, &mut buf).is_err());
        assert!(memory.read_remote(0x1004, &mut buf).is_err());
    }

    #[test]
    fn test_write_then_peek() {
        let memory = MockMemory::new().with_block(0x1000, &[0; 4]);
        assert_eq!(memory.write_remote(0x1003, &[9, 9]).unwrap(), 1);
        assert_eq!(memory.peek(0x1000, 4), Some(vec![0, 0, 0, 9]));
    }

    #[test]
    fn test_poke_bypasses_read_counter() {
        let memory = MockMemory::new().with_block(0x1000, &[0; 4]);
        assert!(memory.poke(0x1001, &[7, 7]));
        assert!(!memory.poke(0x1003, &[7, 7]));
        assert!(!memory.poke(0x10, &[7]));
        assert_eq!(memory.peek(0x1000, 4), Some(vec![0, 7, 7, 0]));
        assert_eq!(memory.read_count(), 0);
    }

    #[test]
    fn test_invalidate() {
        let memory = MockMemory::new().with_block(0x1000, &[0; 4]);
        memory.invalidate();
        let mut buf = [0u8; 1];
        assert!(memory.read_remote(0x1000, &mut buf).is_err());
        assert!(memory.write_remote(0x1000, &[1]).is_err());
    }
}
