//! procscope
//!
//! Read/write memory interface into another Linux process.
//!
//! - `/proc/[pid]/maps` parsing into named, merged regions
//! - Masked byte signature scanning over cached region snapshots
//! - Typed remote reads and writes via `process_vm_readv`/`process_vm_writev`
//!
//! The entry point is [`Target`]:
//!
//! ```no_run
//! use procscope::{Permissions, Target};
//!
//! let mut target = Target::new(1234);
//! target.parse_maps()?;
//!
//! let mut index = 0;
//! while let Some(region) = target.region("test", index, Permissions::NONE).cloned() {
//!     if let Some(address) = target.find_pattern(&region, "68 65 6c 6c 6f", 0, false) {
//!         target.write_memory(address, b"works")?;
//!     }
//!     index += 1;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod memory;
mod target;

// Re-export commonly used types
pub use config::{RelativeConfig, ScanConfig, SignatureConfig, SignatureMatch};
pub use error::{ConfigError, MapsError, MemoryError, PatternError};
pub use memory::{
    find_pattern, MemoryAccessor, MockMemory, Pattern, Permissions, Region, RegionId, RegionMap,
    RemoteMemory, DEFAULT_SNAPSHOT_LIMIT, DYNAMIC_REGION,
};
pub use target::Target;

#[cfg(target_os = "linux")]
pub use memory::{find_process, is_process_running, LinuxMemory};
