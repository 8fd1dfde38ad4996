//! Resolved, read-only views of namespace entries.
//!
//! A [`Node`] is produced fresh per request by the
//! [`PathResolver`](super::PathResolver). It carries the metadata captured
//! when it was built and nothing else; there is no identity across requests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::error::{VfsError, VfsResult};
use super::mime::MimeTable;
use super::mount::Mount;
use super::resolve::{Denial, Namespace, canonical_segments, resolve_at};
use super::types::{NodeInfo, NodeKind};

/// Mime class reported for directories and the virtual root.
pub const DIRECTORY_CLASS: &str = "directory";

/// A resolved entry in the virtual namespace.
#[derive(Debug, Clone)]
pub enum Node {
    /// The synthetic top level; one child per mount.
    VirtualRoot(VirtualRoot),
    /// A directory inside a mount (including the mount root).
    Directory(DirectoryNode),
    /// A regular file inside a mount.
    File(FileNode),
}

/// The synthetic root. Has no physical backing.
#[derive(Debug, Clone)]
pub struct VirtualRoot {
    ns: Arc<Namespace>,
}

impl VirtualRoot {
    pub(crate) fn new(ns: Arc<Namespace>) -> Self {
        Self { ns }
    }
}

/// Where a mounted node lives, virtually and physically.
#[derive(Debug, Clone)]
pub struct Location {
    ns: Arc<Namespace>,
    mount: Arc<Mount>,
    segments: Vec<String>,
    virtual_path: String,
    physical_path: PathBuf,
    modified: SystemTime,
}

impl Location {
    pub(crate) fn new(
        ns: Arc<Namespace>,
        mount: Arc<Mount>,
        segments: Vec<String>,
        physical_path: PathBuf,
        meta: &std::fs::Metadata,
    ) -> Self {
        let virtual_path = mount.virtual_path(&segments);
        Self {
            ns,
            mount,
            segments,
            virtual_path,
            physical_path,
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }

    /// Last virtual segment, or the mount name for a mount root.
    pub fn name(&self) -> &str {
        self.segments
            .last()
            .map(String::as_str)
            .unwrap_or_else(|| self.mount.name())
    }

    pub fn mount(&self) -> &Arc<Mount> {
        &self.mount
    }

    /// Segments under the mount: as typed, or canonical when `..` was used.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Mount-prefixed, slash-separated virtual path.
    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    /// Canonical physical path; always inside the mount root.
    pub fn physical_path(&self) -> &Path {
        &self.physical_path
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Child location segments.
    fn child_segments(&self, name: String) -> Vec<String> {
        let mut segments = self.segments.clone();
        segments.push(name);
        segments
    }
}

/// A directory inside a mount.
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    location: Location,
}

impl DirectoryNode {
    pub(crate) fn new(location: Location) -> Self {
        Self { location }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// True when this directory is its mount's root.
    pub fn is_mount_root(&self) -> bool {
        self.location.physical_path == self.location.mount.root()
    }

    /// One node per directory entry, in filesystem order.
    ///
    /// Entries that vanish while listing, or whose canonical target leaves
    /// the mount root, are skipped.
    pub async fn children(&self) -> VfsResult<Vec<Node>> {
        let loc = &self.location;
        let mut dir = tokio::fs::read_dir(&loc.physical_path).await?;
        let mut nodes = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let segments = loc.child_segments(name);
            match resolve_at(&loc.ns, &loc.mount, segments, entry.path()).await {
                Ok(node) => nodes.push(node),
                Err(Denial::Escape(target)) => {
                    tracing::warn!(
                        dir = %loc.virtual_path,
                        entry = %entry.path().display(),
                        target = %target.display(),
                        "Skipping entry that escapes its mount root"
                    );
                }
                Err(denial) => {
                    tracing::debug!(
                        dir = %loc.virtual_path,
                        entry = %entry.path().display(),
                        ?denial,
                        "Skipping unreadable entry"
                    );
                }
            }
        }

        tracing::debug!(dir = %loc.virtual_path, entries = nodes.len(), "Listed directory");
        Ok(nodes)
    }
}

/// A regular file inside a mount.
#[derive(Debug, Clone)]
pub struct FileNode {
    location: Location,
    size: u64,
    mime_type: String,
    accel_redirect_path: Option<String>,
}

impl FileNode {
    pub(crate) fn new(location: Location, size: u64, mime_type: String) -> Self {
        let accel_redirect_path = location.mount.accel_path(&location.physical_path);
        Self {
            location,
            size,
            mime_type,
            accel_redirect_path,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn mime_class(&self) -> &str {
        MimeTable::class_of(&self.mime_type)
    }

    /// Proxy hand-off path; present iff the mount declares `accel`.
    pub fn accel_redirect_path(&self) -> Option<&str> {
        self.accel_redirect_path.as_deref()
    }

    /// Whether a browser could show this file in place.
    pub fn is_inline(&self) -> bool {
        MimeTable::is_inline(&self.mime_type)
    }
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::VirtualRoot(_) => NodeKind::VirtualRoot,
            Node::Directory(_) => NodeKind::Directory,
            Node::File(_) => NodeKind::File,
        }
    }

    /// Mounted location; `None` for the virtual root.
    pub fn location(&self) -> Option<&Location> {
        match self {
            Node::VirtualRoot(_) => None,
            Node::Directory(d) => Some(&d.location),
            Node::File(f) => Some(&f.location),
        }
    }

    fn ns(&self) -> &Arc<Namespace> {
        match self {
            Node::VirtualRoot(root) => &root.ns,
            Node::Directory(d) => &d.location.ns,
            Node::File(f) => &f.location.ns,
        }
    }

    /// Display name; empty for the virtual root.
    pub fn name(&self) -> &str {
        self.location().map(Location::name).unwrap_or("")
    }

    /// Mount-prefixed virtual path; empty for the virtual root.
    pub fn virtual_path(&self) -> &str {
        self.location().map(Location::virtual_path).unwrap_or("")
    }

    pub fn is_directory(&self) -> bool {
        !matches!(self, Node::File(_))
    }

    /// File size in bytes; 0 for directories.
    pub fn size(&self) -> u64 {
        match self {
            Node::File(f) => f.size,
            _ => 0,
        }
    }

    /// Modification time; the virtual root has none.
    pub fn modified(&self) -> Option<SystemTime> {
        self.location().map(Location::modified)
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Node::File(f) => Some(f.mime_type()),
            _ => None,
        }
    }

    /// Slash-prefix of the mime type, or `"directory"`.
    pub fn mime_class(&self) -> &str {
        match self {
            Node::File(f) => f.mime_class(),
            _ => DIRECTORY_CLASS,
        }
    }

    pub fn physical_path(&self) -> Option<&Path> {
        self.location().map(Location::physical_path)
    }

    pub fn mount(&self) -> Option<&Arc<Mount>> {
        self.location().map(Location::mount)
    }

    pub fn accel_redirect_path(&self) -> Option<&str> {
        match self {
            Node::File(f) => f.accel_redirect_path(),
            _ => None,
        }
    }

    /// Metadata snapshot for renderers.
    pub fn info(&self) -> NodeInfo {
        NodeInfo::from(self)
    }

    /// Child nodes.
    ///
    /// The virtual root yields one directory per mount (mounts whose root
    /// disappeared since startup are skipped). Files fail with
    /// [`VfsError::InvalidOperation`].
    pub async fn iterate_children(&self) -> VfsResult<Vec<Node>> {
        match self {
            Node::VirtualRoot(root) => Ok(mount_roots(&root.ns).await),
            Node::Directory(d) => d.children().await,
            Node::File(f) => Err(VfsError::invalid_operation(format!(
                "{} is not a directory",
                f.location.virtual_path
            ))),
        }
    }

    /// Path from the virtual root down to this node, inclusive.
    ///
    /// Walks the physical ancestors that are still inside the mount root,
    /// so a node `d` levels below its mount root yields `d + 2` entries.
    pub async fn breadcrumbs(&self) -> Vec<Node> {
        let ns = self.ns();
        let mut crumbs = vec![Node::VirtualRoot(VirtualRoot::new(Arc::clone(ns)))];
        let Some(loc) = self.location() else {
            return crumbs;
        };

        let mut ancestors: Vec<&Path> = loc
            .physical_path
            .ancestors()
            .skip(1)
            .take_while(|p| loc.mount.contains(p))
            .collect();
        ancestors.reverse();

        for ancestor in ancestors {
            let Some(segments) = canonical_segments(&loc.mount, ancestor) else {
                continue;
            };
            match resolve_at(ns, &loc.mount, segments, ancestor.to_path_buf()).await {
                Ok(node) => crumbs.push(node),
                Err(denial) => {
                    tracing::debug!(ancestor = %ancestor.display(), ?denial, "Dropping breadcrumb");
                }
            }
        }

        crumbs.push(self.clone());
        crumbs
    }
}

async fn mount_roots(ns: &Arc<Namespace>) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(ns.mounts.len());
    for mount in ns.mounts.iter() {
        match resolve_at(ns, mount, Vec::new(), mount.root().to_path_buf()).await {
            Ok(node) => nodes.push(node),
            Err(denial) => {
                tracing::warn!(mount = %mount.name(), ?denial, "Mount root unavailable");
            }
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{MountTable, PathResolver};
    use tempfile::TempDir;

    fn setup() -> (PathResolver, TempDir) {
        let dir = TempDir::new().unwrap();
        let books = dir.path().join("books");
        std::fs::create_dir_all(books.join("a/b/c")).unwrap();
        std::fs::write(books.join("a/b/c/deep.cbz"), "x").unwrap();
        std::fs::write(books.join("top.epub"), "epub").unwrap();
        std::fs::create_dir(dir.path().join("audio")).unwrap();

        let mounts = MountTable::new([
            Mount::new("books", &books, Some("/protected".into())).unwrap(),
            Mount::new("audio", dir.path().join("audio"), None).unwrap(),
        ])
        .unwrap();
        (
            PathResolver::new(Arc::new(mounts), Arc::new(MimeTable::builtin())),
            dir,
        )
    }

    #[tokio::test]
    async fn test_root_children_are_mounts() {
        let (resolver, _dir) = setup();
        let root = resolver.root();
        assert!(root.is_directory());
        assert_eq!(root.mime_class(), DIRECTORY_CLASS);
        assert!(root.modified().is_none());

        let children = root.iterate_children().await.unwrap();
        let names: Vec<_> = children.iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, vec!["books", "audio"]);
        assert!(children.iter().all(|n| matches!(n, Node::Directory(_))));
    }

    #[tokio::test]
    async fn test_directory_children() {
        let (resolver, _dir) = setup();
        let books = resolver.navigate("books").await.unwrap();
        let mut children = books.iterate_children().await.unwrap();
        crate::vfs::sort_listing(&mut children);
        let paths: Vec<_> = children.iter().map(|n| n.virtual_path().to_string()).collect();
        assert_eq!(paths, vec!["books/a", "books/top.epub"]);
    }

    #[tokio::test]
    async fn test_file_children_is_invalid() {
        let (resolver, _dir) = setup();
        let file = resolver.navigate("books/top.epub").await.unwrap();
        assert!(matches!(
            file.iterate_children().await,
            Err(VfsError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_file_metadata() {
        let (resolver, _dir) = setup();
        let file = resolver.navigate("books/top.epub").await.unwrap();
        assert_eq!(file.kind(), NodeKind::File);
        assert_eq!(file.size(), 4);
        assert_eq!(file.mime_type(), Some("application/epub+zip"));
        assert_eq!(file.mime_class(), "application");
        assert_eq!(file.accel_redirect_path(), Some("/protected/top.epub"));
        assert!(file.modified().is_some());
    }

    #[tokio::test]
    async fn test_no_accel_without_base() {
        let (resolver, dir) = setup();
        std::fs::write(dir.path().join("audio/x.mp3"), "id3").unwrap();
        let file = resolver.navigate("audio/x.mp3").await.unwrap();
        assert_eq!(file.accel_redirect_path(), None);
        assert_eq!(file.mime_type(), Some("audio/mpeg"));
    }

    #[tokio::test]
    async fn test_breadcrumb_shape() {
        let (resolver, _dir) = setup();

        let root_crumbs = resolver.root().breadcrumbs().await;
        assert_eq!(root_crumbs.len(), 1);

        let mount_root = resolver.navigate("books").await.unwrap();
        let crumbs = mount_root.breadcrumbs().await;
        assert_eq!(crumbs.len(), 2);
        assert!(matches!(crumbs[0], Node::VirtualRoot(_)));
        assert_eq!(crumbs[1].virtual_path(), "books");

        let deep = resolver.navigate("books/a/b/c/deep.cbz").await.unwrap();
        let crumbs = deep.breadcrumbs().await;
        // depth 4 under the mount root
        assert_eq!(crumbs.len(), 4 + 2);
        let paths: Vec<_> = crumbs.iter().map(|n| n.virtual_path().to_string()).collect();
        assert_eq!(
            paths,
            vec!["", "books", "books/a", "books/a/b", "books/a/b/c", "books/a/b/c/deep.cbz"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_breadcrumbs_through_alias_follow_real_directories() {
        let (resolver, dir) = setup();
        let books = dir.path().join("books");
        std::os::unix::fs::symlink(books.join("a/b"), books.join("shelf")).unwrap();

        let node = resolver.navigate("books/shelf/c/deep.cbz").await.unwrap();
        assert_eq!(node.virtual_path(), "books/shelf/c/deep.cbz");

        let crumbs = node.breadcrumbs().await;
        let paths: Vec<_> = crumbs.iter().map(|n| n.virtual_path().to_string()).collect();
        assert_eq!(
            paths,
            vec!["", "books", "books/a", "books/a/b", "books/a/b/c", "books/shelf/c/deep.cbz"]
        );
    }

    #[tokio::test]
    async fn test_info_snapshot() {
        let (resolver, _dir) = setup();
        let dir_node = resolver.navigate("books/a").await.unwrap();
        let info = dir_node.info();
        assert_eq!(info.kind, NodeKind::Directory);
        assert_eq!(info.mime_class, "directory");
        assert_eq!(info.mime_type, None);
        assert_eq!(info.size, 0);
    }
}
