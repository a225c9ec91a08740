//! Memory interface into one target process
//!
//! [`Target`] owns the region collection parsed from the target's maps
//! listing and a [`MemoryAccessor`] with its snapshot buffer. Two targets
//! never share state, so several can be attached side by side.
//!
//! A `Target` is mutated in place (region list replacement, snapshot
//! growth); callers sharing one across threads must serialize access.

use std::io::BufRead;

use crate::config::{ScanConfig, SignatureConfig, SignatureMatch};
use crate::error::{MapsError, MemoryError};
use crate::memory::{MemoryAccessor, Pattern, Permissions, Region, RegionMap, RemoteMemory};

#[cfg(target_os = "linux")]
use crate::memory::{find_process, is_process_running, LinuxMemory};

/// A target process: its regions plus remote memory access
pub struct Target<M> {
    pid: u32,
    regions: RegionMap,
    accessor: MemoryAccessor<M>,
}

#[cfg(target_os = "linux")]
impl Target<LinuxMemory> {
    /// Target the process with the given PID
    pub fn new(pid: u32) -> Self {
        Self::with_memory(pid, LinuxMemory::new(pid))
    }

    /// Target the first process whose executable is named `process_name`
    pub fn attach(process_name: &str) -> Option<Self> {
        find_process(process_name).map(Self::new)
    }
}

impl<M: RemoteMemory> Target<M> {
    /// Target `pid` through a custom copy backend
    pub fn with_memory(pid: u32, memory: M) -> Self {
        Self {
            pid,
            regions: RegionMap::new(),
            accessor: MemoryAccessor::new(memory),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the target process still exists
    #[cfg(target_os = "linux")]
    pub fn is_running(&self) -> bool {
        is_process_running(self.pid)
    }

    /// Re-read `/proc/[pid]/maps`, replacing the region collection
    ///
    /// Returns the number of regions; an unreadable listing is an error and
    /// leaves the collection empty.
    pub fn parse_maps(&mut self) -> Result<usize, MapsError> {
        self.accessor.invalidate_snapshot();
        let count = self.regions.parse_pid(self.pid)?;
        log::info!("Parsed {} regions for PID {}", count, self.pid);
        Ok(count)
    }

    /// Replace the region collection from an arbitrary maps listing
    pub fn load_maps<R: BufRead>(&mut self, reader: R) -> usize {
        self.accessor.invalidate_snapshot();
        self.regions.parse(reader)
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    /// The `index`-th region named `name` carrying all permissions in `filter`
    pub fn region(&self, name: &str, index: usize, filter: Permissions) -> Option<&Region> {
        self.regions.get(name, index, filter)
    }

    pub fn accessor(&self) -> &MemoryAccessor<M> {
        &self.accessor
    }

    pub fn accessor_mut(&mut self) -> &mut MemoryAccessor<M> {
        &mut self.accessor
    }

    /// First match of `pattern` in `region`, as `region start + match + offset`
    ///
    /// Uses the cached snapshot unless `reload` is set or it mirrors another
    /// region. Invalid patterns and failed reads are logged and reported as
    /// not found.
    pub fn find_pattern(
        &mut self,
        region: &Region,
        pattern: &str,
        offset: isize,
        reload: bool,
    ) -> Option<usize> {
        self.find_pattern_nth(region, pattern, 0, offset, reload)
    }

    /// The `n`-th (zero based) non-overlapping match of `pattern` in `region`
    pub fn find_pattern_nth(
        &mut self,
        region: &Region,
        pattern: &str,
        n: usize,
        offset: isize,
        reload: bool,
    ) -> Option<usize> {
        let compiled = compile_logged(pattern)?;
        let data = self.snapshot_logged(region, reload)?;
        let found = compiled.find_nth(data, n)?;
        Some(region.start().wrapping_add(found).wrapping_add_signed(offset))
    }

    /// Every non-overlapping match of `pattern` in `region`, in ascending order
    pub fn find_all(&mut self, region: &Region, pattern: &str, reload: bool) -> Vec<usize> {
        let Some(compiled) = compile_logged(pattern) else {
            return Vec::new();
        };
        let Some(data) = self.snapshot_logged(region, reload) else {
            return Vec::new();
        };
        compiled
            .find_iter(data)
            .map(|found| region.start() + found)
            .collect()
    }

    /// Look up the `index`-th region named `name` and search it
    pub fn find_pattern_in(
        &mut self,
        name: &str,
        index: usize,
        pattern: &str,
        offset: isize,
    ) -> Option<usize> {
        let region = self.regions.get(name, index, Permissions::NONE)?.clone();
        self.find_pattern(&region, pattern, offset, false)
    }

    fn snapshot_logged(&mut self, region: &Region, reload: bool) -> Option<&[u8]> {
        match self.accessor.snapshot(region, reload) {
            Ok(data) => Some(data),
            Err(e) => {
                log::warn!("Failed to read region {}: {}", region, e);
                None
            }
        }
    }

    /// Read a plain value; see [`MemoryAccessor::read`]
    pub fn read<T: bytemuck::AnyBitPattern>(&self, address: usize) -> Result<T, MemoryError> {
        self.accessor.read(address)
    }

    /// Write a plain value; see [`MemoryAccessor::write`]
    pub fn write<T: bytemuck::NoUninit>(&self, address: usize, value: &T) -> Result<(), MemoryError> {
        self.accessor.write(address, value)
    }

    /// Raw copy out of the target, returning the transferred count
    pub fn read_memory(&self, address: usize, buf: &mut [u8]) -> Result<usize, MemoryError> {
        self.accessor.read_remote(address, buf)
    }

    /// Raw copy into the target, returning the transferred count
    pub fn write_memory(&self, address: usize, data: &[u8]) -> Result<usize, MemoryError> {
        self.accessor.write_remote(address, data)
    }

    /// See [`MemoryAccessor::absolute_address`]
    pub fn absolute_address(&self, address: usize, offset: usize, extra: usize) -> Option<usize> {
        self.accessor.absolute_address(address, offset, extra)
    }

    /// See [`MemoryAccessor::call_address`]
    pub fn call_address(&self, address: usize) -> Option<usize> {
        self.accessor.call_address(address)
    }

    /// Run every signature of `config` against the current region collection
    pub fn scan(&mut self, config: &ScanConfig) -> Vec<SignatureMatch> {
        let mut matches = Vec::new();
        for signature in &config.signatures {
            let found = self.scan_signature(signature);
            if found.is_empty() {
                log::info!("No match for signature {}", signature.name);
            }
            matches.extend(found);
        }
        matches
    }

    /// Matches of one signature, trying fallback patterns until one hits
    pub fn scan_signature(&mut self, signature: &SignatureConfig) -> Vec<SignatureMatch> {
        let filter = signature.permission_filter();
        let regions: Vec<(usize, Region)> = match signature.index {
            Some(index) => self
                .regions
                .get(&signature.region, index, filter)
                .map(|r| vec![(index, r.clone())])
                .unwrap_or_default(),
            None => self
                .regions
                .by_name(&signature.region)
                .filter(|r| r.permissions().contains(filter))
                .cloned()
                .enumerate()
                .collect(),
        };

        if regions.is_empty() {
            log::warn!(
                "Signature {}: no region named {}",
                signature.name,
                signature.region
            );
            return Vec::new();
        }

        for pattern in signature.patterns() {
            let Some(compiled) = compile_logged(pattern) else {
                continue;
            };

            let mut found = Vec::new();
            for (region_index, region) in &regions {
                let Some(data) = self.snapshot_logged(region, signature.reload) else {
                    continue;
                };
                let offsets: Vec<usize> = if signature.all {
                    compiled.find_iter(data).collect()
                } else {
                    compiled.find(data).into_iter().collect()
                };

                for offset in offsets {
                    let address = region
                        .start()
                        .wrapping_add(offset)
                        .wrapping_add_signed(signature.offset);
                    let resolved = signature
                        .relative
                        .and_then(|rel| self.accessor.absolute_address(address, rel.offset, rel.extra));
                    log::debug!(
                        "Signature {} matched in {} #{} at {:#x}",
                        signature.name,
                        region.name(),
                        region_index,
                        address
                    );
                    found.push(SignatureMatch {
                        name: signature.name.clone(),
                        pattern: pattern.to_string(),
                        region: region.name().to_string(),
                        region_index: *region_index,
                        region_start: region.start(),
                        address,
                        resolved,
                    });
                }
            }

            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }
}

fn compile_logged(pattern: &str) -> Option<Pattern> {
    match Pattern::compile(pattern) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            log::warn!("Pattern compilation failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MockMemory;
    use std::sync::Arc;

    const LISTING: &str = "\
00001000-00002000 r-xp 00000000 08:01 1 /opt/test
00002000-00003000 rw-p 00000000 00:00 0
00003000-00004000 r--p 00000000 08:01 1 /opt/test
";

    fn target() -> (Target<Arc<MockMemory>>, Arc<MockMemory>) {
        let mut first = vec![0u8; 0x1000];
        first[0x10..0x15].copy_from_slice(b"hello");
        first[0x40..0x45].copy_from_slice(b"hello");
        let mut second = vec![0u8; 0x1000];
        second[0x20..0x25].copy_from_slice(b"hello");

        let memory = Arc::new(
            MockMemory::new()
                .with_block(0x1000, &first)
                .with_block(0x2000, &[0u8; 0x1000])
                .with_block(0x3000, &second),
        );
        let mut target = Target::with_memory(42, Arc::clone(&memory));
        assert_eq!(target.load_maps(LISTING.as_bytes()), 3);
        (target, memory)
    }

    #[test]
    fn test_find_pattern_in_region() {
        let (mut target, _) = target();
        let region = target.region("test", 0, Permissions::NONE).unwrap().clone();

        assert_eq!(target.find_pattern(&region, "68 65 6c 6c 6f", 0, false), Some(0x1010));
        assert_eq!(target.find_pattern(&region, "68 65 6c 6c 6f", 2, false), Some(0x1012));
        assert_eq!(target.find_pattern(&region, "68 65 6c 6c 6f", -0x10, false), Some(0x1000));
        assert_eq!(target.find_pattern_nth(&region, "68 65 ?? 6c 6f", 1, 0, false), Some(0x1040));
        assert_eq!(target.find_pattern_nth(&region, "68 65 ?? 6c 6f", 2, 0, false), None);
        assert_eq!(target.find_all(&region, "68656c6c6f", false), vec![0x1010, 0x1040]);
    }

    #[test]
    fn test_invalid_pattern_is_not_found() {
        let (mut target, memory) = target();
        let region = target.region("test", 0, Permissions::NONE).unwrap().clone();

        assert_eq!(target.find_pattern(&region, "zz", 0, false), None);
        assert!(target.find_all(&region, "4", false).is_empty());
        // nothing was read for a pattern that never compiled
        assert_eq!(memory.read_count(), 0);
    }

    #[test]
    fn test_iterate_same_named_regions() {
        let (mut target, _) = target();

        let mut hits = Vec::new();
        let mut index = 0;
        while let Some(region) = target.region("test", index, Permissions::NONE).cloned() {
            if let Some(address) = target.find_pattern(&region, "68 65 6c 6c 6f", 0, false) {
                hits.push(address);
            }
            index += 1;
        }
        assert_eq!(index, 2);
        assert_eq!(hits, vec![0x1010, 0x3020]);
    }

    #[test]
    fn test_find_pattern_in_by_name() {
        let (mut target, _) = target();
        assert_eq!(target.find_pattern_in("test", 1, "68 65 6c 6c 6f", 0), Some(0x3020));
        assert_eq!(target.find_pattern_in("test", 2, "68 65 6c 6c 6f", 0), None);
        assert_eq!(target.find_pattern_in("missing", 0, "68", 0), None);
    }

    #[test]
    fn test_cached_snapshot_until_reload() {
        let (mut target, memory) = target();
        let region = target.region("test", 0, Permissions::NONE).unwrap().clone();

        assert_eq!(target.find_pattern(&region, "77 6f 72 6b 73", 0, false), None);
        target.write_memory(0x1100, b"works").unwrap();
        assert_eq!(memory.read_count(), 1);

        // cached snapshot predates the write
        assert_eq!(target.find_pattern(&region, "77 6f 72 6b 73", 0, false), None);
        assert_eq!(memory.read_count(), 1);

        assert_eq!(target.find_pattern(&region, "77 6f 72 6b 73", 0, true), Some(0x1100));
        assert_eq!(memory.read_count(), 2);
    }

    #[test]
    fn test_reparse_invalidates_snapshot() {
        let (mut target, memory) = target();
        let region = target.region("test", 0, Permissions::NONE).unwrap().clone();
        target.find_pattern(&region, "68", 0, false);
        assert!(target.accessor().snapshot_region().is_some());

        target.load_maps(LISTING.as_bytes());
        assert!(target.accessor().snapshot_region().is_none());

        let region = target.region("test", 0, Permissions::NONE).unwrap().clone();
        target.find_pattern(&region, "68", 0, false);
        assert_eq!(memory.read_count(), 2);
    }

    #[test]
    fn test_gone_target_degrades_to_not_found() {
        let (mut target, memory) = target();
        let region = target.region("test", 0, Permissions::NONE).unwrap().clone();
        memory.invalidate();

        assert_eq!(target.find_pattern(&region, "68 65", 0, true), None);
        assert!(target.read::<u32>(0x1010).is_err());
        assert_eq!(target.call_address(0x1000), None);
    }

    #[test]
    fn test_typed_access_through_target() {
        let (target, _) = target();
        target.write(0x2000, &0x1234_5678u32).unwrap();
        assert_eq!(target.read::<u32>(0x2000).unwrap(), 0x1234_5678);

        let mut buf = [0u8; 5];
        assert_eq!(target.read_memory(0x1010, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_scan_config() {
        let (mut target, _) = target();

        let config = ScanConfig::from_toml_str(
            r#"
            [[signature]]
            name = "greeting"
            region = "test"
            pattern = "68 65 6c 6c 6f"

            [[signature]]
            name = "every_greeting"
            region = "test"
            pattern = "68 65 6c 6c 6f"
            all = true
            permissions = "rx"

            [[signature]]
            name = "second_only"
            region = "test"
            pattern = "zz"
            fallback_patterns = ["ff ff", "68 65 6c 6c 6f"]
            index = 1

            [[signature]]
            name = "absent"
            region = "nowhere"
            pattern = "00"
        "#,
        )
        .unwrap();

        let matches = target.scan(&config);
        let summary: Vec<(&str, usize, usize)> = matches
            .iter()
            .map(|m| (m.name.as_str(), m.region_index, m.address))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("greeting", 0, 0x1010),
                ("greeting", 1, 0x3020),
                ("every_greeting", 0, 0x1010),
                ("every_greeting", 0, 0x1040),
                ("second_only", 1, 0x3020),
            ]
        );
        assert_eq!(matches[4].pattern, "68 65 6c 6c 6f");
        assert_eq!(matches[1].region_start, 0x3000);
    }

    #[test]
    fn test_scan_resolves_relative_reference() {
        let (mut target, memory) = target();
        // displacement right after the match start
        memory.poke(0x1011, &0x20u32.to_le_bytes());

        let config = ScanConfig::from_toml_str(
            r#"
            [[signature]]
            name = "ref"
            region = "test"
            pattern = "68 ?? ?? ?? ?? 00"
            index = 0
            relative = { offset = 1, extra = 5 }
        "#,
        )
        .unwrap();

        let matches = target.scan(&config);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].address, 0x1010);
        assert_eq!(matches[0].resolved, Some(0x1010 + 0x20 + 5));
    }
}
