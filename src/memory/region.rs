//! Mapped memory region records

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Path and name given to mappings without a backing file
pub const DYNAMIC_REGION: &str = "[dynamic]";

/// Permission bitset of a mapping (`rwxp`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const EXEC: Self = Self(4);
    /// Copy-on-write mapping; clear for shared mappings
    pub const PRIVATE: Self = Self(8);

    const SLOTS: [(char, Permissions); 4] = [
        ('r', Self::READ),
        ('w', Self::WRITE),
        ('x', Self::EXEC),
        ('p', Self::PRIVATE),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0F)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Decode the four-character mode field of a maps line (`r-xp`, `rw-s`, ...)
    ///
    /// Each slot either holds its marker character or anything else (usually
    /// `-`), which leaves the bit clear. Returns `None` unless the field is
    /// exactly four characters long.
    pub fn from_mode(mode: &str) -> Option<Self> {
        if mode.chars().count() != 4 {
            return None;
        }
        let mut perms = Self::NONE;
        for (c, (marker, bit)) in mode.chars().zip(Self::SLOTS) {
            if c == marker {
                perms |= bit;
            }
        }
        Some(perms)
    }

    /// Parse a filter such as `"rx"` or `"r-xp"`; order does not matter
    pub fn from_filter(filter: &str) -> Option<Self> {
        let mut perms = Self::NONE;
        for c in filter.chars() {
            match c {
                'r' => perms |= Self::READ,
                'w' => perms |= Self::WRITE,
                'x' => perms |= Self::EXEC,
                'p' => perms |= Self::PRIVATE,
                '-' => {}
                _ => return None,
            }
        }
        Some(perms)
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (marker, bit) in Self::SLOTS {
            if self.contains(bit) {
                write!(f, "{marker}")?;
            } else {
                f.write_str("-")?;
            }
        }
        Ok(())
    }
}

/// Identity of one region record, unique for the lifetime of the host process
///
/// Snapshots are tagged with it; a re-parse produces fresh identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(u64);

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

impl RegionId {
    fn next() -> Self {
        Self(NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One contiguous mapped range of a target process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    #[serde(skip)]
    id: RegionId,
    path: String,
    #[serde(skip)]
    name_start: usize,
    permissions: Permissions,
    start: usize,
    end: usize,
}

impl Region {
    /// Create a region record; `path` of `None` marks an anonymous mapping
    pub fn new(path: Option<&str>, permissions: Permissions, start: usize, end: usize) -> Self {
        let path = match path {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => DYNAMIC_REGION.to_string(),
        };
        let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
        Self {
            id: RegionId::next(),
            path,
            name_start,
            permissions,
            start,
            end,
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Backing path, or [`DYNAMIC_REGION`]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final path component, or the whole path when it has no `/`
    pub fn name(&self) -> &str {
        &self.path[self.name_start..]
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn is_dynamic(&self) -> bool {
        self.path == DYNAMIC_REGION
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.start && address < self.end
    }

    pub(crate) fn extend_to(&mut self, end: usize) {
        if end > self.end {
            self.end = end;
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}-{:x} {} {}",
            self.start, self.end, self.permissions, self.path
        )
    }
}
