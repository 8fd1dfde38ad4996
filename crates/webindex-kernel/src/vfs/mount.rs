//! Mount table: named bindings from a virtual prefix to a physical root.
//!
//! The table is built once at startup and never mutated, so it is shared
//! between requests behind an `Arc` with no locking.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::error::{VfsError, VfsResult};

/// A named binding of a virtual prefix to a canonical physical directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    name: String,
    root: PathBuf,
    accel_base: Option<String>,
}

impl Mount {
    /// Create a mount, canonicalizing `root`.
    ///
    /// The root must exist and be a directory. Symlinks in it are resolved
    /// here, once, so every later containment check compares canonical paths
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(
        name: impl Into<String>,
        root: impl AsRef<Path>,
        accel_base: Option<String>,
    ) -> VfsResult<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(VfsError::invalid_mount(format!(
                "mount name {name:?} must be a single non-empty path segment"
            )));
        }

        let root = root.as_ref();
        let canonical = dunce::canonicalize(root).map_err(|e| {
            VfsError::invalid_mount(format!("{name}: root {}: {e}", root.display()))
        })?;
        if !canonical.is_dir() {
            return Err(VfsError::invalid_mount(format!(
                "{name}: root {} is not a directory",
                canonical.display()
            )));
        }

        let accel_base = accel_base
            .map(|base| base.trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty());

        Ok(Self {
            name,
            root: canonical,
            accel_base,
        })
    }

    /// The virtual prefix (first path segment).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical physical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Base path for proxy hand-off, if configured.
    pub fn accel_base(&self) -> Option<&str> {
        self.accel_base.as_deref()
    }

    /// Component-wise containment check against the canonical root.
    ///
    /// `canonical` must already be canonicalized; a textual prefix such as
    /// `/srv/books-private` does not count as inside `/srv/books`.
    pub fn contains(&self, canonical: &Path) -> bool {
        canonical.starts_with(&self.root)
    }

    /// Slash-joined path of `canonical` relative to the root.
    ///
    /// Returns `None` when the path is outside the root. The mount root
    /// itself yields an empty string.
    pub fn relative(&self, canonical: &Path) -> Option<String> {
        let rel = canonical.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    /// Virtual path for a list of segments under this mount.
    pub fn virtual_path(&self, segments: &[String]) -> String {
        if segments.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.name, segments.join("/"))
        }
    }

    /// The `accel_base`-relative counterpart of a canonical physical path.
    pub fn accel_path(&self, canonical: &Path) -> Option<String> {
        let base = self.accel_base.as_deref()?;
        let rel = self.relative(canonical)?;
        if rel.is_empty() {
            Some(base.to_string())
        } else {
            Some(format!("{base}/{rel}"))
        }
    }
}

/// Ordered, immutable collection of mounts.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    mounts: Vec<Arc<Mount>>,
}

impl MountTable {
    /// Build a table, rejecting duplicate names.
    pub fn new(mounts: impl IntoIterator<Item = Mount>) -> VfsResult<Self> {
        let mut table: Vec<Arc<Mount>> = Vec::new();
        for mount in mounts {
            if table.iter().any(|m| m.name() == mount.name()) {
                return Err(VfsError::invalid_mount(format!(
                    "duplicate mount name {:?}",
                    mount.name()
                )));
            }
            table.push(Arc::new(mount));
        }
        Ok(Self { mounts: table })
    }

    /// Parse the compact `name|root|accel` form, one mount per line.
    ///
    /// Blank lines and lines starting with `#` are ignored. The accel field
    /// is optional; an empty one means "no accel".
    pub fn from_spec(spec: &str) -> VfsResult<Self> {
        let mut mounts = Vec::new();
        for line in spec.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            mounts.push(parse_spec_line(line)?);
        }
        Self::new(mounts)
    }

    /// Look up a mount by exact (case-sensitive) name.
    pub fn get(&self, name: &str) -> Option<&Arc<Mount>> {
        self.mounts.iter().find(|m| m.name() == name)
    }

    /// Iterate mounts in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Mount>> {
        self.mounts.iter()
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

/// Parse one `name|root|accel` line.
pub fn parse_spec_line(line: &str) -> VfsResult<Mount> {
    let mut fields = line.splitn(3, '|').map(str::trim);
    let name = fields.next().unwrap_or_default();
    let root = fields
        .next()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| VfsError::invalid_mount(format!("{line:?}: missing root")))?;
    let accel = fields
        .next()
        .filter(|a| !a.is_empty())
        .map(str::to_string);
    let root = shellexpand::full(root)
        .map_err(|e| VfsError::invalid_mount(format!("{line:?}: {e}")))?;
    Mount::new(name, root.into_owned(), accel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mount_canonicalizes_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("books")).unwrap();
        let mount = Mount::new("books", dir.path().join("books/../books"), None).unwrap();
        assert_eq!(
            mount.root(),
            dunce::canonicalize(dir.path().join("books")).unwrap()
        );
    }

    #[test]
    fn test_mount_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Mount::new("a/b", dir.path(), None),
            Err(VfsError::InvalidMount(_))
        ));
        assert!(Mount::new("", dir.path(), None).is_err());
        assert!(Mount::new("..", dir.path(), None).is_err());
    }

    #[test]
    fn test_mount_rejects_missing_root() {
        let dir = TempDir::new().unwrap();
        let result = Mount::new("gone", dir.path().join("nope"), None);
        assert!(matches!(result, Err(VfsError::InvalidMount(_))));
    }

    #[test]
    fn test_mount_rejects_file_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        assert!(Mount::new("f", dir.path().join("f.txt"), None).is_err());
    }

    #[test]
    fn test_contains_is_component_wise() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("books")).unwrap();
        std::fs::create_dir(dir.path().join("books-private")).unwrap();
        let mount = Mount::new("books", dir.path().join("books"), None).unwrap();
        let sibling = dunce::canonicalize(dir.path().join("books-private")).unwrap();
        assert!(!mount.contains(&sibling));
        assert!(mount.contains(mount.root()));
        assert!(mount.contains(&mount.root().join("a/b.txt")));
    }

    #[test]
    fn test_accel_path() {
        let dir = TempDir::new().unwrap();
        let mount = Mount::new("books", dir.path(), Some("/protected/".into())).unwrap();
        let file = mount.root().join("sub").join("a.epub");
        assert_eq!(
            mount.accel_path(&file).as_deref(),
            Some("/protected/sub/a.epub")
        );
        assert_eq!(mount.accel_path(mount.root()).as_deref(), Some("/protected"));

        let plain = Mount::new("plain", dir.path(), None).unwrap();
        assert_eq!(plain.accel_path(&file), None);
    }

    #[test]
    fn test_virtual_path() {
        let dir = TempDir::new().unwrap();
        let mount = Mount::new("books", dir.path(), None).unwrap();
        assert_eq!(mount.virtual_path(&[]), "books");
        assert_eq!(
            mount.virtual_path(&["a".to_string(), "b.txt".to_string()]),
            "books/a/b.txt"
        );
    }

    #[test]
    fn test_table_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let a = Mount::new("books", dir.path(), None).unwrap();
        let b = Mount::new("books", dir.path(), None).unwrap();
        assert!(MountTable::new([a, b]).is_err());
    }

    #[test]
    fn test_table_lookup_is_case_sensitive() {
        let dir = TempDir::new().unwrap();
        let table = MountTable::new([Mount::new("Books", dir.path(), None).unwrap()]).unwrap();
        assert!(table.get("Books").is_some());
        assert!(table.get("books").is_none());
    }

    #[test]
    fn test_from_spec() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        let spec = format!(
            "# comment\nalpha|{}|/accel_a\n\nbeta|{}\n",
            dir.path().join("a").display(),
            dir.path().join("b").display()
        );
        let table = MountTable::from_spec(&spec).unwrap();
        assert_eq!(table.len(), 2);
        let names: Vec<_> = table.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(table.get("alpha").unwrap().accel_base(), Some("/accel_a"));
        assert_eq!(table.get("beta").unwrap().accel_base(), None);
    }

    #[test]
    fn test_from_spec_missing_root() {
        assert!(MountTable::from_spec("lonely").is_err());
        assert!(MountTable::from_spec("lonely|").is_err());
    }
}
