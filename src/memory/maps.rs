//! `/proc/[pid]/maps` parsing
//!
//! Each line of the listing has the layout
//!
//! ```text
//! start-end perms offset dev:inode [pathname]
//! 00400000-00452000 r-xp 00000000 08:02 173521      /usr/bin/dbus-daemon
//! ```
//!
//! Lines are turned into [`Region`] records in listing order (ascending start
//! address). Consecutive lines with the same backing path collapse into one
//! region, and mappings without a path are kept under [`DYNAMIC_REGION`].

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use super::region::{Permissions, Region, DYNAMIC_REGION};
use crate::error::MapsError;

/// Ordered collection of the regions of one target
#[derive(Debug, Default, Clone)]
pub struct RegionMap {
    regions: Vec<Region>,
}

/// The fields of one maps line this crate cares about
#[derive(Debug, PartialEq, Eq)]
struct MapLine<'a> {
    start: usize,
    end: usize,
    permissions: Permissions,
    path: Option<&'a str>,
}

/// Split off the next whitespace-delimited field
fn next_field<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    let end = trimmed
        .find(char::is_whitespace)
        .unwrap_or(trimmed.len());
    let (field, tail) = trimmed.split_at(end);
    *rest = tail;
    Some(field)
}

fn parse_line(line: &str) -> Option<MapLine<'_>> {
    let mut rest = line.trim_end_matches(['\n', '\r']);

    let (start, end) = next_field(&mut rest)?.split_once('-')?;
    let start = usize::from_str_radix(start, 16).ok()?;
    let end = usize::from_str_radix(end, 16).ok()?;
    if start >= end {
        return None;
    }

    let permissions = Permissions::from_mode(next_field(&mut rest)?)?;

    // offset, dev and inode must be well formed for the path column to be trusted
    u64::from_str_radix(next_field(&mut rest)?, 16).ok()?;
    let (major, minor) = next_field(&mut rest)?.split_once(':')?;
    u32::from_str_radix(major, 16).ok()?;
    u32::from_str_radix(minor, 16).ok()?;
    next_field(&mut rest)?.parse::<u64>().ok()?;

    let path = rest.trim_start();
    Some(MapLine {
        start,
        end,
        permissions,
        path: (!path.is_empty()).then_some(path),
    })
}

impl RegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the maps listing for `pid`
    pub fn maps_path(pid: u32) -> PathBuf {
        PathBuf::from(format!("/proc/{}/maps", pid))
    }

    /// Replace the collection with the current mappings of `pid`
    ///
    /// The previous collection is cleared first, so an open failure leaves the
    /// map empty.
    pub fn parse_pid(&mut self, pid: u32) -> Result<usize, MapsError> {
        self.regions.clear();
        let path = Self::maps_path(pid);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(source) => {
                log::warn!("Failed to open {}: {}", path.display(), source);
                return Err(MapsError::Open { path, source });
            }
        };
        Ok(self.parse(BufReader::new(file)))
    }

    /// Replace the collection with the regions described by `reader`
    ///
    /// Malformed lines are skipped. A read error part way through (the target
    /// exiting mid-listing) ends the pass and keeps what was parsed so far.
    pub fn parse<R: BufRead>(&mut self, reader: R) -> usize {
        self.regions.clear();
        let mut skipped = 0usize;

        for line in reader.split(b'\n') {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("Maps listing ended early: {}", e);
                    break;
                }
            };
            let line = String::from_utf8_lossy(&line);
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Some(entry) => self.push(entry),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            log::debug!("Skipped {} malformed maps lines", skipped);
        }
        log::debug!("Parsed {} regions", self.regions.len());
        self.regions.len()
    }

    /// Convenience wrapper around [`RegionMap::parse`] for in-memory listings
    pub fn parse_str(&mut self, listing: &str) -> usize {
        self.parse(listing.as_bytes())
    }

    fn push(&mut self, entry: MapLine<'_>) {
        let path = entry.path.unwrap_or(DYNAMIC_REGION);
        match self.regions.last_mut() {
            Some(last) if last.path() == path => last.extend_to(entry.end),
            _ => self.regions.push(Region::new(
                entry.path,
                entry.permissions,
                entry.start,
                entry.end,
            )),
        }
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    pub fn as_slice(&self) -> &[Region] {
        &self.regions
    }

    /// Regions whose file name is `name`, in ascending address order
    pub fn by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Region> + 'a {
        self.regions.iter().filter(move |r| r.name() == name)
    }

    /// The `index`-th region named `name` that carries every permission in `filter`
    ///
    /// An empty filter matches any region.
    pub fn get(&self, name: &str, index: usize, filter: Permissions) -> Option<&Region> {
        self.regions
            .iter()
            .filter(|r| r.name() == name && r.permissions().contains(filter))
            .nth(index)
    }

    /// The region containing `address`
    pub fn find_address(&self, address: usize) -> Option<&Region> {
        let idx = self.regions.partition_point(|r| r.end() <= address);
        self.regions.get(idx).filter(|r| r.contains(address))
    }
}

impl<'a> IntoIterator for &'a RegionMap {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}
