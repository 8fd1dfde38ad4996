//! Startup configuration.
//!
//! Loaded once from a RON file; the mount list becomes the immutable
//! [`MountTable`] shared by every request.
//!
//! ```ron
//! (
//!     name: Some("Library"),
//!     mounts: [
//!         (mount: "books", root: "~/books", accel: Some("/books_protected")),
//!         (mount: "audio", root: "/srv/audio"),
//!     ],
//!     archive: (walk_timeout_ms: 10000, compression: Deflated),
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveOptions, Compression, DEFAULT_CHANNEL_CAPACITY, DEFAULT_CHUNK_SIZE};
use crate::vfs::{DEFAULT_WALK_TIMEOUT, Mount, MountTable, VfsError, VfsResult};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "WEBINDEX_CONF";

/// Config file used when neither a flag nor the environment names one.
pub const DEFAULT_CONFIG_FILE: &str = "config.ron";

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Site title for presentation layers.
    pub name: Option<String>,
    pub url_prefix: Option<String>,
    pub route_prefix: Option<String>,
    /// Mounts in display order.
    pub mounts: Vec<MountConfig>,
    pub archive: ArchiveConfig,
}

/// One `mount -> root` binding as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub mount: String,
    /// Physical root; `~` and `$VARS` are expanded.
    pub root: String,
    #[serde(default)]
    pub accel: Option<String>,
}

impl MountConfig {
    /// Expand the root and build a canonical [`Mount`].
    pub fn to_mount(&self) -> VfsResult<Mount> {
        let root = shellexpand::full(&self.root)
            .map_err(|e| VfsError::invalid_mount(format!("{}: {e}", self.mount)))?;
        Mount::new(self.mount.clone(), root.into_owned(), self.accel.clone())
    }
}

/// Archive tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub walk_timeout_ms: u64,
    pub chunk_size: usize,
    pub compression: Compression,
    pub channel_capacity: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            walk_timeout_ms: DEFAULT_WALK_TIMEOUT.as_millis() as u64,
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: Compression::Stored,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ArchiveConfig {
    pub fn options(&self) -> ArchiveOptions {
        ArchiveOptions {
            chunk_size: self.chunk_size,
            compression: self.compression,
            channel_capacity: self.channel_capacity,
        }
    }

    pub fn walk_timeout(&self) -> Duration {
        Duration::from_millis(self.walk_timeout_ms)
    }
}

impl Config {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::parse(&text)?;
        tracing::debug!(path = %path.display(), mounts = config.mounts.len(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate RON text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.archive.chunk_size == 0 {
            return Err(ConfigError::Invalid("archive.chunk_size must be > 0".into()));
        }
        if self.archive.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "archive.channel_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Build the mount table from the configured mounts followed by `extra`.
    ///
    /// Roots are canonicalized here, so a missing root fails startup.
    pub fn mount_table(&self, extra: impl IntoIterator<Item = Mount>) -> VfsResult<MountTable> {
        let mut mounts = Vec::with_capacity(self.mounts.len());
        for mount in &self.mounts {
            mounts.push(mount.to_mount()?);
        }
        mounts.extend(extra);
        MountTable::new(mounts)
    }
}

/// Pick the config path: explicit flag, then [`CONFIG_ENV`], then
/// [`DEFAULT_CONFIG_FILE`].
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    resolve_config_path(explicit, std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

fn resolve_config_path(explicit: Option<&Path>, env: Option<PathBuf>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or(env.filter(|p| !p.as_os_str().is_empty()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::parse("()").unwrap();
        assert!(config.mounts.is_empty());
        assert_eq!(config.archive.walk_timeout(), Duration::from_secs(10));
        assert_eq!(config.archive.options(), ArchiveOptions::default());
    }

    #[test]
    fn test_full_document() {
        let text = r#"(
            name: Some("Library"),
            route_prefix: Some("/webindex"),
            mounts: [
                (mount: "books", root: "/srv/books", accel: Some("/books_protected")),
                (mount: "audio", root: "/srv/audio"),
            ],
            archive: (walk_timeout_ms: 2500, compression: Deflated),
        )"#;
        let config = Config::parse(text).unwrap();
        assert_eq!(config.name.as_deref(), Some("Library"));
        assert_eq!(config.url_prefix, None);
        assert_eq!(config.mounts.len(), 2);
        assert_eq!(config.mounts[0].accel.as_deref(), Some("/books_protected"));
        assert_eq!(config.mounts[1].accel, None);
        assert_eq!(config.archive.walk_timeout(), Duration::from_millis(2500));
        assert_eq!(config.archive.compression, Compression::Deflated);
        assert_eq!(config.archive.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(matches!(
            Config::parse("(archive: (chunk_size: 0))"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("(archive: (channel_capacity: 0))"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_parse_error_is_ron() {
        assert!(matches!(Config::parse("(mounts: 3)"), Err(ConfigError::Ron(_))));
    }

    #[test]
    fn test_mount_table_appends_extra() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        let config = Config {
            mounts: vec![MountConfig {
                mount: "a".into(),
                root: dir.path().join("a").display().to_string(),
                accel: None,
            }],
            ..Config::default()
        };
        let extra = Mount::new("b", dir.path().join("b"), None).unwrap();
        let table = config.mount_table([extra]).unwrap();
        let names: Vec<_> = table.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_mount_table_missing_root() {
        let config = Config {
            mounts: vec![MountConfig {
                mount: "gone".into(),
                root: "/definitely/not/here".into(),
                accel: None,
            }],
            ..Config::default()
        };
        assert!(matches!(
            config.mount_table([]),
            Err(VfsError::InvalidMount(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ron");
        std::fs::write(&path, "(name: Some(\"x\"))").unwrap();
        assert_eq!(Config::load(&path).unwrap().name.as_deref(), Some("x"));
        assert!(matches!(
            Config::load(&dir.path().join("missing.ron")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_config_path_precedence() {
        let flag = Path::new("/etc/flag.ron");
        assert_eq!(
            resolve_config_path(Some(flag), Some("/env.ron".into())),
            PathBuf::from("/etc/flag.ron")
        );
        assert_eq!(
            resolve_config_path(None, Some("/env.ron".into())),
            PathBuf::from("/env.ron")
        );
        assert_eq!(
            resolve_config_path(None, Some(PathBuf::new())),
            PathBuf::from(DEFAULT_CONFIG_FILE)
        );
        assert_eq!(resolve_config_path(None, None), PathBuf::from(DEFAULT_CONFIG_FILE));
    }
}
