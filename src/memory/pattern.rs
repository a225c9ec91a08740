//! Pattern scanning utilities for memory signature matching
//!
//! Pattern format: `"48 8B 05 ?? ?? ?? ?? 48 85 C0"`
//! - Regular bytes are pairs of hex digits (`"48"`, `"8b"`), with or without
//!   whitespace between them (`"488B05"`)
//! - `?` or `??` is a wildcard that matches any single byte
//!
//! Searching anchors on the longest run of fixed bytes with a `memmem`
//! finder and verifies the wildcard positions around each hit, so the
//! common case stays linear in the size of the scanned buffer while the
//! reported offset is always the earliest match.

use memchr::memmem::Finder;

use crate::error::PatternError;

/// A compiled byte pattern: expected bytes plus a mask of fixed positions
#[derive(Debug, Clone)]
pub struct Pattern {
    bytes: Vec<u8>,
    mask: Vec<bool>,
    anchor: Option<Anchor>,
}

/// Longest run of fixed bytes inside the pattern
#[derive(Debug, Clone)]
struct Anchor {
    offset: usize,
    len: usize,
    finder: Finder<'static>,
}

impl Pattern {
    /// Compile a pattern string into bytes and mask
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let mut bytes = Vec::new();
        let mut mask = Vec::new();
        let mut chars = pattern.chars().enumerate().peekable();

        while let Some((position, c)) = chars.next() {
            if c.is_whitespace() {
                continue;
            }

            if c == '?' {
                chars.next_if(|&(_, next)| next == '?');
                bytes.push(0);
                mask.push(false);
                continue;
            }

            let Some(high) = c.to_digit(16) else {
                return Err(PatternError::InvalidCharacter {
                    pattern: pattern.to_string(),
                    position,
                    character: c,
                });
            };
            let Some((_, low)) = chars.next_if(|&(_, next)| next.is_ascii_hexdigit()) else {
                return Err(PatternError::IncompleteByte {
                    pattern: pattern.to_string(),
                    position,
                });
            };
            let low = low.to_digit(16).unwrap_or_default();
            bytes.push((high * 16 + low) as u8);
            mask.push(true);
        }

        if bytes.is_empty() {
            return Err(PatternError::Empty {
                pattern: pattern.to_string(),
            });
        }

        let anchor = Self::longest_fixed_run(&mask).map(|(offset, len)| Anchor {
            offset,
            len,
            finder: Finder::new(&bytes[offset..offset + len]).into_owned(),
        });

        Ok(Self { bytes, mask, anchor })
    }

    /// Build a pattern directly from `Option<u8>` entries (`None` = wildcard)
    pub fn from_entries(entries: &[Option<u8>]) -> Option<Self> {
        let text = entries
            .iter()
            .map(|e| match e {
                Some(b) => format!("{:02x}", b),
                None => "??".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        Self::compile(&text).ok()
    }

    fn longest_fixed_run(mask: &[bool]) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        let mut run_start = 0;
        for i in 0..=mask.len() {
            if i < mask.len() && mask[i] {
                continue;
            }
            let len = i - run_start;
            if len > 0 && best.map_or(true, |(_, best_len)| len > best_len) {
                best = Some((run_start, len));
            }
            run_start = i + 1;
        }
        best
    }

    /// Number of bytes the pattern spans
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false for a compiled pattern
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Expected value per position (wildcards hold 0)
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether each position is constrained
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Check the pattern against `data` starting at `pos`
    pub fn matches_at(&self, data: &[u8], pos: usize) -> bool {
        let Some(window) = data.get(pos..pos.saturating_add(self.len())) else {
            return false;
        };
        window.len() == self.len()
            && window
                .iter()
                .zip(self.bytes.iter().zip(&self.mask))
                .all(|(&actual, (&expected, &fixed))| !fixed || actual == expected)
    }

    /// Offset of the first match in `data`
    pub fn find(&self, data: &[u8]) -> Option<usize> {
        self.find_from(data, 0)
    }

    /// Offset of the first match starting at or after `from`
    pub fn find_from(&self, data: &[u8], from: usize) -> Option<usize> {
        let last_start = data.len().checked_sub(self.len())?;
        if from > last_start {
            return None;
        }

        let Some(anchor) = &self.anchor else {
            // nothing but wildcards
            return Some(from);
        };

        // every start in [from, last_start] puts the anchor inside this window
        let window_end = last_start + anchor.offset + anchor.len;
        let mut pos = from + anchor.offset;
        while pos + anchor.len <= window_end {
            let hit = pos + anchor.finder.find(&data[pos..window_end])?;
            let start = hit - anchor.offset;
            if self.matches_at(data, start) {
                return Some(start);
            }
            pos = hit + 1;
        }
        None
    }

    /// Offset of the `n`-th (zero based) non-overlapping match
    pub fn find_nth(&self, data: &[u8], n: usize) -> Option<usize> {
        self.find_iter(data).nth(n)
    }

    /// Iterate over all non-overlapping matches in ascending order
    pub fn find_iter<'p, 'd>(&'p self, data: &'d [u8]) -> Matches<'p, 'd> {
        Matches {
            pattern: self,
            data,
            next: 0,
        }
    }
}

impl std::str::FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

/// Iterator over non-overlapping match offsets
#[derive(Debug)]
pub struct Matches<'p, 'd> {
    pattern: &'p Pattern,
    data: &'d [u8],
    next: usize,
}

impl Iterator for Matches<'_, '_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let found = self.pattern.find_from(self.data, self.next)?;
        self.next = found + self.pattern.len();
        Some(found)
    }
}

/// Compile `pattern` and return the first match in `data`
///
/// A pattern that fails to compile is logged and reported as not found.
pub fn find_pattern(data: &[u8], pattern: &str) -> Option<usize> {
    match Pattern::compile(pattern) {
        Ok(compiled) => compiled.find(data),
        Err(e) => {
            log::warn!("Pattern compilation failed: {}", e);
            None
        }
    }
}
