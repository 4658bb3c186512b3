//! Repository tunables
//!
//! A repository may carry a `config` file in TOML form:
//!
//! ```toml
//! [deltification]
//! max-deltification-walk = 1000
//! max-linear-deltification = 16
//!
//! [rep-sharing]
//! enable = true
//!
//! [layout]
//! shard-size = 1000
//! ```
//!
//! A missing file (or missing keys) means defaults. The shard size is only
//! consulted at repository creation; afterwards the `format` file is
//! authoritative.

use revfs_core::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default ceiling on predecessor hops when picking a delta base.
pub const DEFAULT_MAX_DELTIFICATION_WALK: u64 = 1000;
/// Default length of the linear delta tail near head.
pub const DEFAULT_MAX_LINEAR_DELTIFICATION: u64 = 16;
/// Default revisions per shard directory.
pub const DEFAULT_SHARD_SIZE: u64 = 1000;

/// Parsed repository tunables.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct FsConfig {
    /// Delta chain tuning.
    pub deltification: Deltification,
    /// Content-addressed deduplication.
    pub rep_sharing: RepSharingConfig,
    /// Physical placement, consulted at creation only.
    pub layout: LayoutConfig,
}

/// `[deltification]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Deltification {
    /// Ceiling on predecessor hops; beyond it a fresh chain starts.
    pub max_deltification_walk: u64,
    /// Below this distance the delta base is simply the predecessor.
    pub max_linear_deltification: u64,
}

impl Default for Deltification {
    fn default() -> Self {
        Deltification {
            max_deltification_walk: DEFAULT_MAX_DELTIFICATION_WALK,
            max_linear_deltification: DEFAULT_MAX_LINEAR_DELTIFICATION,
        }
    }
}

/// `[rep-sharing]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RepSharingConfig {
    /// Whether identical content may share one stored representation.
    pub enable: bool,
}

impl Default for RepSharingConfig {
    fn default() -> Self {
        RepSharingConfig { enable: true }
    }
}

/// `[layout]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LayoutConfig {
    /// Revisions per shard directory.
    pub shard_size: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            shard_size: DEFAULT_SHARD_SIZE,
        }
    }
}

impl FsConfig {
    /// Load the config file at `path`; absence means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FsConfig::default())
            }
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&text).map_err(|e| Error::Corrupt(format!("malformed config: {e}")))
    }

    /// The file contents written into fresh repositories.
    pub fn to_file_contents(&self) -> String {
        format!(
            "\
# Repository tunables. Missing keys fall back to built-in defaults.

[deltification]
# Ceiling on predecessor hops when picking a delta base.
max-deltification-walk = {}
# Below this distance the base is simply the previous node-revision.
max-linear-deltification = {}

[rep-sharing]
# Identical content may share one stored representation.
enable = {}

[layout]
# Revisions per shard directory; consulted at creation only.
shard-size = {}
",
            self.deltification.max_deltification_walk,
            self.deltification.max_linear_deltification,
            self.rep_sharing.enable,
            self.layout.shard_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = FsConfig::load(&dir.path().join("config")).unwrap();
        assert_eq!(
            config.deltification.max_deltification_walk,
            DEFAULT_MAX_DELTIFICATION_WALK
        );
        assert!(config.rep_sharing.enable);
        assert_eq!(config.layout.shard_size, DEFAULT_SHARD_SIZE);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "[deltification]\nmax-linear-deltification = 4\n").unwrap();
        let config = FsConfig::load(&path).unwrap();
        assert_eq!(config.deltification.max_linear_deltification, 4);
        assert_eq!(
            config.deltification.max_deltification_walk,
            DEFAULT_MAX_DELTIFICATION_WALK
        );
        assert!(config.rep_sharing.enable);
    }

    #[test]
    fn test_file_contents_round_trip() {
        let mut config = FsConfig::default();
        config.deltification.max_linear_deltification = 4;
        config.rep_sharing.enable = false;
        let parsed: FsConfig = toml::from_str(&config.to_file_contents()).unwrap();
        assert_eq!(parsed.deltification.max_linear_deltification, 4);
        assert_eq!(
            parsed.deltification.max_deltification_walk,
            DEFAULT_MAX_DELTIFICATION_WALK
        );
        assert!(!parsed.rep_sharing.enable);
        assert_eq!(parsed.layout.shard_size, DEFAULT_SHARD_SIZE);
    }

    #[test]
    fn test_malformed_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "[deltification\n").unwrap();
        assert!(matches!(FsConfig::load(&path), Err(Error::Corrupt(_))));
    }
}
