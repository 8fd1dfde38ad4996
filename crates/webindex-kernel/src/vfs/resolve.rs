//! Virtual path resolution with sandbox containment.
//!
//! A virtual path is `mount/seg/seg/...`. The segments after the mount name
//! are joined onto the mount's canonical root and the result is canonicalized
//! (symlinks resolved, `..` collapsed by the OS). The canonical result must be
//! the root or a descendant of it; anything else is reported as not found.
//!
//! A path without `..` keeps its segments as typed, so a symlink alias inside
//! the mount stays visible in the virtual path. A path with `..` is named
//! after its canonical target instead, because the OS applies `..` after
//! following links and only the canonical form agrees with what was opened.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::error::{VfsError, VfsResult};
use super::mime::MimeTable;
use super::mount::{Mount, MountTable};
use super::node::{DirectoryNode, FileNode, Location, Node, VirtualRoot};

/// Immutable state shared by the resolver and every node it hands out.
#[derive(Debug)]
pub(crate) struct Namespace {
    pub(crate) mounts: Arc<MountTable>,
    pub(crate) mime: Arc<MimeTable>,
}

/// Why a path did not resolve.
///
/// Only used for logging; callers always see [`VfsError::NotFound`].
#[derive(Debug)]
pub(crate) enum Denial {
    UnknownMount,
    Missing(io::Error),
    Escape(PathBuf),
}

/// Resolves virtual paths against a [`MountTable`].
///
/// Cheap to clone; all state is behind `Arc`.
#[derive(Debug, Clone)]
pub struct PathResolver {
    ns: Arc<Namespace>,
}

impl PathResolver {
    pub fn new(mounts: Arc<MountTable>, mime: Arc<MimeTable>) -> Self {
        Self {
            ns: Arc::new(Namespace { mounts, mime }),
        }
    }

    pub fn mounts(&self) -> &Arc<MountTable> {
        &self.ns.mounts
    }

    pub fn mime(&self) -> &Arc<MimeTable> {
        &self.ns.mime
    }

    /// The synthetic root listing one directory per mount.
    pub fn root(&self) -> Node {
        Node::VirtualRoot(VirtualRoot::new(Arc::clone(&self.ns)))
    }

    /// Resolve a virtual path into a [`Node`].
    ///
    /// Unknown mounts, missing entries and sandbox escapes all come back as
    /// [`VfsError::NotFound`]; only the log tells them apart.
    pub async fn navigate(&self, virtual_path: &str) -> VfsResult<Node> {
        let mut parts = virtual_path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty());

        let Some(mount_name) = parts.next() else {
            return Ok(self.root());
        };
        let raw: Vec<&str> = parts.collect();

        let result = match self.ns.mounts.get(mount_name) {
            None => Err(Denial::UnknownMount),
            Some(mount) => {
                let mut physical = mount.root().to_path_buf();
                physical.extend(&raw);
                match naming(&raw) {
                    None => Err(Denial::Escape(physical)),
                    Some(Naming::AsTyped(segments)) => {
                        resolve_at(&self.ns, mount, segments, physical).await
                    }
                    Some(Naming::Canonical) => resolve_canonical(&self.ns, mount, physical).await,
                }
            }
        };

        result.map_err(|denial| {
            match &denial {
                Denial::UnknownMount => {
                    tracing::debug!(mount = %mount_name, path = %virtual_path, "Unknown mount");
                }
                Denial::Missing(e) => {
                    tracing::debug!(path = %virtual_path, error = %e, "Path not found");
                }
                Denial::Escape(physical) => {
                    tracing::warn!(
                        path = %virtual_path,
                        physical = %physical.display(),
                        "Rejected path escaping its mount root"
                    );
                }
            }
            VfsError::not_found(virtual_path)
        })
    }
}

/// How a request's virtual segments are derived.
#[derive(Debug, PartialEq, Eq)]
enum Naming {
    /// The typed segments with `.` dropped.
    AsTyped(Vec<String>),
    /// The canonical target's path under the mount; the request had `..`.
    Canonical,
}

/// Classify the raw segments after the mount name.
///
/// Returns `None` when a segment is not a single plain component (a drive
/// prefix, for instance). `..` is never judged here; the canonical
/// containment check decides whether it stays inside the mount.
fn naming(raw: &[&str]) -> Option<Naming> {
    let mut segments: Vec<String> = Vec::with_capacity(raw.len());
    let mut climbs = false;
    for seg in raw {
        let mut components = Path::new(seg).components();
        let component = components.next()?;
        if components.next().is_some() {
            return None;
        }
        match component {
            Component::CurDir => {}
            Component::ParentDir => climbs = true,
            Component::Normal(_) => segments.push((*seg).to_string()),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(if climbs {
        Naming::Canonical
    } else {
        Naming::AsTyped(segments)
    })
}

/// Segments of `canonical` under the mount root; `None` when outside it.
pub(crate) fn canonical_segments(mount: &Mount, canonical: &Path) -> Option<Vec<String>> {
    let rel = mount.relative(canonical)?;
    Some(
        rel.split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Canonicalize `physical` and check it stays inside `mount`.
async fn contained(mount: &Mount, physical: PathBuf) -> Result<PathBuf, Denial> {
    let canonical = canonicalize(physical).await.map_err(Denial::Missing)?;
    if !mount.contains(&canonical) {
        return Err(Denial::Escape(canonical));
    }
    Ok(canonical)
}

/// Canonicalize `physical`, check it stays inside `mount`, and stat it.
///
/// `segments` is the path under the mount that the caller asked for; it
/// names the node, while `physical` decides what is on disk.
pub(crate) async fn resolve_at(
    ns: &Arc<Namespace>,
    mount: &Arc<Mount>,
    segments: Vec<String>,
    physical: PathBuf,
) -> Result<Node, Denial> {
    let canonical = contained(mount, physical).await?;
    node_at(ns, mount, segments, canonical).await
}

/// Like [`resolve_at`], naming the node after its canonical location.
pub(crate) async fn resolve_canonical(
    ns: &Arc<Namespace>,
    mount: &Arc<Mount>,
    physical: PathBuf,
) -> Result<Node, Denial> {
    let canonical = contained(mount, physical).await?;
    let segments =
        canonical_segments(mount, &canonical).ok_or_else(|| Denial::Escape(canonical.clone()))?;
    node_at(ns, mount, segments, canonical).await
}

async fn node_at(
    ns: &Arc<Namespace>,
    mount: &Arc<Mount>,
    segments: Vec<String>,
    canonical: PathBuf,
) -> Result<Node, Denial> {
    let meta = tokio::fs::metadata(&canonical)
        .await
        .map_err(Denial::Missing)?;

    let location = Location::new(Arc::clone(ns), Arc::clone(mount), segments, canonical, &meta);
    if meta.is_dir() {
        Ok(Node::Directory(DirectoryNode::new(location)))
    } else if meta.is_file() {
        let mime_type = ns.mime.guess(location.name()).to_string();
        Ok(Node::File(FileNode::new(location, meta.len(), mime_type)))
    } else {
        // Sockets, FIFOs and devices are not served.
        Err(Denial::Missing(io::Error::new(
            io::ErrorKind::Unsupported,
            "not a regular file or directory",
        )))
    }
}

/// Canonicalize on the blocking pool so a stalled filesystem only stalls
/// this request.
pub(crate) async fn canonicalize(path: PathBuf) -> io::Result<PathBuf> {
    tokio::task::spawn_blocking(move || dunce::canonicalize(&path))
        .await
        .map_err(io::Error::other)?
}
