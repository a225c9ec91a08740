//! Error types shared by the map parser, pattern compiler and memory accessor

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to obtain the map listing of a target
#[derive(Debug, Error)]
pub enum MapsError {
    /// The listing could not be opened (process gone, no permission, ...)
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure to compile a textual byte pattern
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// The pattern contains no byte tokens at all
    #[error("empty pattern {pattern:?}")]
    Empty { pattern: String },

    /// A character outside of `[0-9a-fA-F?]` and whitespace
    #[error("{}", invalid_character(.pattern, .position, .character))]
    InvalidCharacter {
        pattern: String,
        position: usize,
        character: char,
    },

    /// A hex digit that is not followed by a second hex digit
    #[error("{}", caret(.pattern, .position, "incomplete hex byte"))]
    IncompleteByte { pattern: String, position: usize },
}

impl PatternError {
    /// Character position of the offending token, if any
    pub fn position(&self) -> Option<usize> {
        match self {
            PatternError::Empty { .. } => None,
            PatternError::InvalidCharacter { position, .. }
            | PatternError::IncompleteByte { position, .. } => Some(*position),
        }
    }
}

const PATTERN_LABEL: &str = "Pattern: ";

fn invalid_character(pattern: &str, position: &usize, character: &char) -> String {
    caret(pattern, position, &format!("invalid character {character:?}"))
}

/// Render the pattern with a `^` marker under the offending character
fn caret(pattern: &str, position: &usize, message: &str) -> String {
    let width = PATTERN_LABEL.len() + position + 1;
    format!("{message}\n{PATTERN_LABEL}{pattern}\n{:>width$}", "^")
}

/// Failure of a remote copy or of a typed access built on one
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The copy primitive itself failed: target exited, range unmapped, no privilege
    #[error("remote copy of {len} bytes at {address:#x} failed: {source}")]
    Copy {
        address: usize,
        len: usize,
        #[source]
        source: io::Error,
    },

    /// Fewer bytes were transferred than a typed access needs
    #[error("partial copy at {address:#x}: {copied} of {expected} bytes")]
    Partial {
        address: usize,
        expected: usize,
        copied: usize,
    },

    /// A region is larger than the snapshot buffer may grow to
    #[error("cannot snapshot {len:#x} bytes at {address:#x}: exceeds {limit:#x} byte limit or allocation failed")]
    SnapshotTooLarge {
        address: usize,
        len: usize,
        limit: usize,
    },
}

/// Failure to load a scan configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_character_renders_caret() {
        let err = PatternError::InvalidCharacter {
            pattern: "48 zz".to_string(),
            position: 3,
            character: 'z',
        };
        let rendered = err.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "invalid character 'z'");
        assert_eq!(lines[1], "Pattern: 48 zz");
        // caret sits under the 'z' at column 3 of the pattern
        assert_eq!(lines[2].len(), PATTERN_LABEL.len() + 4);
        assert_eq!(lines[1].as_bytes()[lines[2].len() - 1], b'z');
        assert!(lines[2].ends_with('^'));
    }

    #[test]
    fn test_pattern_error_position() {
        let empty = PatternError::Empty { pattern: "  ".into() };
        assert_eq!(empty.position(), None);

        let incomplete = PatternError::IncompleteByte {
            pattern: "4".into(),
            position: 0,
        };
        assert_eq!(incomplete.position(), Some(0));
    }

    #[test]
    fn test_memory_error_display() {
        let err = MemoryError::Partial {
            address: 0x1000,
            expected: 8,
            copied: 3,
        };
        assert_eq!(err.to_string(), "partial copy at 0x1000: 3 of 8 bytes");
    }
}
