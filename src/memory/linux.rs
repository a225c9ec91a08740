//! Linux remote copy backend

#![cfg(target_os = "linux")]

use std::io;

use super::RemoteMemory;
use crate::error::MemoryError;

/// Copies memory to and from another process with `process_vm_readv` and
/// `process_vm_writev`
///
/// Each call issues exactly one syscall with one local and one remote iovec;
/// the kernel stops at the first inaccessible page and reports the bytes
/// moved so far. The caller needs ptrace access to the target (same user and
/// a permissive Yama scope, or `CAP_SYS_PTRACE`).
#[derive(Debug, Clone, Copy)]
pub struct LinuxMemory {
    pid: libc::pid_t,
}

impl LinuxMemory {
    /// Create a new Linux memory backend for the given process ID
    pub fn new(pid: u32) -> Self {
        Self {
            pid: pid as libc::pid_t,
        }
    }

    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid as u32
    }

    fn check(result: isize, address: usize, len: usize) -> Result<usize, MemoryError> {
        if result < 0 {
            Err(MemoryError::Copy {
                address,
                len,
                source: io::Error::last_os_error(),
            })
        } else {
            Ok(result as usize)
        }
    }
}

impl RemoteMemory for LinuxMemory {
    fn read_remote(&self, address: usize, buf: &mut [u8]) -> Result<usize, MemoryError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let local_iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let remote_iov = libc::iovec {
            iov_base: address as *mut libc::c_void,
            iov_len: buf.len(),
        };

        // SAFETY: the local iovec covers `buf`, which outlives the call; the
        // remote iovec is only interpreted in the target's address space.
        let result = unsafe { libc::process_vm_readv(self.pid, &local_iov, 1, &remote_iov, 1, 0) };
        Self::check(result, address, buf.len())
    }

    fn write_remote(&self, address: usize, data: &[u8]) -> Result<usize, MemoryError> {
        if data.is_empty() {
            return Ok(0);
        }

        let local_iov = libc::iovec {
            iov_base: data.as_ptr() as *mut libc::c_void,
            iov_len: data.len(),
        };
        let remote_iov = libc::iovec {
            iov_base: address as *mut libc::c_void,
            iov_len: data.len(),
        };

        // SAFETY: the kernel only reads from the local iovec, which covers `data`
        let result = unsafe { libc::process_vm_writev(self.pid, &local_iov, 1, &remote_iov, 1, 0) };
        Self::check(result, address, data.len())
    }
}
