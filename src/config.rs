//! Configuration types for signature scans
//!
//! These types define the structure of scan configurations loaded from TOML
//! files, and the serializable results a scan produces.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::memory::Permissions;

/// Relative reference resolution applied to a match
///
/// The resolved address is `match + u32 at (match + offset) + extra`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeConfig {
    /// Position of the 32-bit displacement inside the match
    pub offset: usize,
    /// Added after the displacement (usually the instruction length)
    pub extra: usize,
}

/// One byte signature to look for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Name of this signature (reported with every match)
    pub name: String,
    /// File name of the region(s) to scan (e.g. "libc.so.6", "[heap]")
    pub region: String,
    /// Byte pattern with wildcards (e.g. "48 8b 05 ?? ?? ?? ?? 48 85 c0")
    pub pattern: String,
    /// Added to each match address
    #[serde(default)]
    pub offset: isize,
    /// Only scan the n-th region with this name instead of all of them
    #[serde(default)]
    pub index: Option<usize>,
    /// Permission letters every scanned region must carry (e.g. "rx")
    #[serde(default)]
    pub permissions: Option<String>,
    /// Report every non-overlapping match instead of the first per region
    #[serde(default)]
    pub all: bool,
    /// Re-read each region even if a snapshot of it is cached
    #[serde(default)]
    pub reload: bool,
    /// Resolve an embedded relative reference at each match
    #[serde(default)]
    pub relative: Option<RelativeConfig>,
    /// Tried in order when the primary pattern finds nothing
    #[serde(default)]
    pub fallback_patterns: Vec<String>,
    /// Text written over every match by callers that patch the target
    #[serde(default)]
    pub replace_with: Option<String>,
}

impl SignatureConfig {
    /// Permission filter for region selection; unparseable letters are ignored
    pub fn permission_filter(&self) -> Permissions {
        match &self.permissions {
            None => Permissions::NONE,
            Some(letters) => Permissions::from_filter(letters).unwrap_or_else(|| {
                log::warn!(
                    "Ignoring invalid permission filter {:?} for {}",
                    letters,
                    self.name
                );
                Permissions::NONE
            }),
        }
    }

    /// Primary pattern followed by the fallbacks
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.pattern.as_str()).chain(self.fallback_patterns.iter().map(String::as_str))
    }
}

/// A full scan configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Executable name of the target, when the caller should look it up
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default, rename = "signature")]
    pub signatures: Vec<SignatureConfig>,
}

impl ScanConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// One match produced by a signature scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureMatch {
    /// Signature name
    pub name: String,
    /// Pattern text that matched (primary or fallback)
    pub pattern: String,
    /// File name of the region the match is in
    pub region: String,
    /// Ordinal of that region among regions with the same name
    pub region_index: usize,
    /// Region start address
    pub region_start: usize,
    /// Match address including the signature offset
    pub address: usize,
    /// Resolved relative reference, when configured and readable
    #[serde(default)]
    pub resolved: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_config_defaults() {
        let config: SignatureConfig = toml::from_str(
            r#"
            name = "greeting"
            region = "test"
            pattern = "68 65 6c 6c 6f"
        "#,
        )
        .unwrap();

        assert_eq!(config.name, "greeting");
        assert_eq!(config.offset, 0);
        assert_eq!(config.index, None);
        assert!(!config.all);
        assert!(!config.reload);
        assert!(config.relative.is_none());
        assert!(config.fallback_patterns.is_empty());
        assert_eq!(config.permission_filter(), Permissions::NONE);
    }

    #[test]
    fn test_signature_config_full() {
        let config: SignatureConfig = toml::from_str(
            r#"
            name = "player_base"
            region = "game"
            pattern = "48 8b 05 ?? ?? ?? ?? 48 85 c0"
            offset = -4
            index = 1
            permissions = "rx"
            all = true
            reload = true
            relative = { offset = 3, extra = 7 }
            fallback_patterns = ["48 8b 0d ?? ?? ?? ??"]
            replace_with = "works"
        "#,
        )
        .unwrap();

        assert_eq!(config.offset, -4);
        assert_eq!(config.index, Some(1));
        assert_eq!(
            config.permission_filter(),
            Permissions::READ | Permissions::EXEC
        );
        assert_eq!(config.relative, Some(RelativeConfig { offset: 3, extra: 7 }));
        assert_eq!(
            config.patterns().collect::<Vec<_>>(),
            vec!["48 8b 05 ?? ?? ?? ?? 48 85 c0", "48 8b 0d ?? ?? ?? ??"]
        );
        assert_eq!(config.replace_with.as_deref(), Some("works"));
    }

    #[test]
    fn test_invalid_permission_filter_is_ignored() {
        let config: SignatureConfig = toml::from_str(
            r#"
            name = "x"
            region = "y"
            pattern = "00"
            permissions = "rz"
        "#,
        )
        .unwrap();
        assert_eq!(config.permission_filter(), Permissions::NONE);
    }

    #[test]
    fn test_scan_config_from_toml() {
        let config = ScanConfig::from_toml_str(
            r#"
            target = "app"

            [[signature]]
            name = "a"
            region = "app"
            pattern = "90 90"

            [[signature]]
            name = "b"
            region = "[heap]"
            pattern = "de ad be ef"
        "#,
        )
        .unwrap();

        assert_eq!(config.target.as_deref(), Some("app"));
        assert_eq!(config.signatures.len(), 2);
        assert_eq!(config.signatures[1].region, "[heap]");
    }

    #[test]
    fn test_scan_config_rejects_missing_fields() {
        let result = ScanConfig::from_toml_str(
            r#"
            [[signature]]
            name = "a"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ScanConfig::load("/nonexistent/procscope.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_signature_match_json_roundtrip() {
        let found = SignatureMatch {
            name: "greeting".to_string(),
            pattern: "68 65".to_string(),
            region: "test".to_string(),
            region_index: 1,
            region_start: 0x400000,
            address: 0x400010,
            resolved: None,
        };
        let json = serde_json::to_string(&found).unwrap();
        let parsed: SignatureMatch = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, found);
    }
}
