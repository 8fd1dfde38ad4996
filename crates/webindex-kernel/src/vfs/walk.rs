//! Time-bounded recursive enumeration of a directory for archiving.
//!
//! The walk is finished before any archive byte is produced, so a walk that
//! runs out of time fails the request cleanly.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{VfsError, VfsResult};
use super::mount::Mount;
use super::natural::natural_cmp;
use super::node::DirectoryNode;
use super::resolve::canonicalize;
use crate::archive::ArchiveEntry;

/// Default ceiling for one walk.
pub const DEFAULT_WALK_TIMEOUT: Duration = Duration::from_secs(10);

/// A child waiting to be emitted.
struct Pending {
    entry: ArchiveEntry,
    /// False for symlinked directories; they are listed but not entered.
    descend: bool,
}

/// Enumerate everything under `dir` as archive entries.
///
/// Order is depth-first pre-order with each directory's children in natural
/// order. Archive paths are relative to `dir`, which itself is not an entry.
/// Symlinks are followed only when their target stays inside the mount, and
/// symlinked directories are never descended into.
///
/// Fails with [`VfsError::TimeoutExceeded`] once `timeout` has elapsed, or
/// [`VfsError::Cancelled`] when `cancel` fires. Both are checked before each
/// directory is read.
pub async fn walk_directory(
    dir: &DirectoryNode,
    timeout: Duration,
    cancel: &CancellationToken,
) -> VfsResult<Vec<ArchiveEntry>> {
    let deadline = Instant::now() + timeout;
    let started = Instant::now();

    let result = match tokio::time::timeout_at(deadline, walk(dir, timeout, deadline, cancel)).await {
        Ok(result) => result,
        Err(_) => Err(VfsError::TimeoutExceeded(timeout)),
    };

    match &result {
        Ok(entries) => tracing::debug!(
            dir = %dir.location().virtual_path(),
            entries = entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Walked directory"
        ),
        Err(e) => tracing::warn!(
            dir = %dir.location().virtual_path(),
            error = %e,
            "Directory walk failed"
        ),
    }
    result
}

async fn walk(
    dir: &DirectoryNode,
    timeout: Duration,
    deadline: Instant,
    cancel: &CancellationToken,
) -> VfsResult<Vec<ArchiveEntry>> {
    let mount = dir.location().mount();
    let mut out = Vec::new();

    checkpoint(timeout, deadline, cancel)?;
    let first = read_children(mount, dir.location().physical_path().to_path_buf(), "").await?;
    let mut stack: Vec<VecDeque<Pending>> = vec![first];

    while let Some(frame) = stack.last_mut() {
        let Some(next) = frame.pop_front() else {
            stack.pop();
            continue;
        };

        if next.entry.is_dir() && next.descend {
            checkpoint(timeout, deadline, cancel)?;
            let children =
                read_children(mount, next.entry.physical_path.clone(), &next.entry.archive_path)
                    .await;
            out.push(next.entry);
            match children {
                Ok(children) => stack.push(children),
                Err(e) => {
                    // Still archived, just empty.
                    tracing::warn!(error = %e, "Skipping unreadable directory contents");
                }
            }
        } else {
            out.push(next.entry);
        }
    }
    Ok(out)
}

fn checkpoint(timeout: Duration, deadline: Instant, cancel: &CancellationToken) -> VfsResult<()> {
    if cancel.is_cancelled() {
        return Err(VfsError::Cancelled);
    }
    if Instant::now() >= deadline {
        return Err(VfsError::TimeoutExceeded(timeout));
    }
    Ok(())
}

/// Read one directory and return its admissible children, naturally sorted.
async fn read_children(
    mount: &Mount,
    physical: PathBuf,
    prefix: &str,
) -> VfsResult<VecDeque<Pending>> {
    let mut dir = tokio::fs::read_dir(&physical).await?;
    let mut children = Vec::new();

    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let archive_path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };

        let file_type = match entry.file_type().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(entry = %entry.path().display(), error = %e, "Skipping vanished entry");
                continue;
            }
        };

        // Parents are canonical, so only symlinks need resolving.
        let (path, is_link) = if file_type.is_symlink() {
            match canonicalize(entry.path()).await {
                Ok(target) if mount.contains(&target) => (target, true),
                Ok(target) => {
                    tracing::warn!(
                        entry = %entry.path().display(),
                        target = %target.display(),
                        "Skipping symlink that escapes its mount root"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(entry = %entry.path().display(), error = %e, "Skipping dangling symlink");
                    continue;
                }
            }
        } else {
            (entry.path(), false)
        };

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(entry = %path.display(), error = %e, "Skipping vanished entry");
                continue;
            }
        };
        if !meta.is_dir() && !meta.is_file() {
            tracing::debug!(entry = %path.display(), "Skipping special file");
            continue;
        }

        let descend = meta.is_dir() && !is_link;
        children.push((
            name,
            Pending {
                entry: ArchiveEntry::from_metadata(path, archive_path, &meta)
                    .confined_to(mount.root().to_path_buf()),
                descend,
            },
        ));
    }

    children.sort_by(|(a, _), (b, _)| natural_cmp(a, b));
    Ok(children.into_iter().map(|(_, pending)| pending).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{MimeTable, MountTable, Node, PathResolver};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn books_dir(dir: &TempDir) -> DirectoryNode {
        let books = dir.path().join("books");
        let mounts = MountTable::new([Mount::new("books", &books, None).unwrap()]).unwrap();
        let resolver = PathResolver::new(Arc::new(mounts), Arc::new(MimeTable::builtin()));
        match resolver.navigate("books").await.unwrap() {
            Node::Directory(d) => d,
            other => panic!("expected directory, got {other:?}"),
        }
    }

    fn tree(dir: &TempDir) {
        let books = dir.path().join("books");
        std::fs::create_dir_all(books.join("vol10")).unwrap();
        std::fs::create_dir_all(books.join("vol2/inner")).unwrap();
        std::fs::write(books.join("vol2/inner/c.txt"), "c").unwrap();
        std::fs::write(books.join("vol2/b.txt"), "b").unwrap();
        std::fs::write(books.join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("outside.txt"), "secret").unwrap();
    }

    #[tokio::test]
    async fn test_walk_order_is_preorder_natural() {
        let dir = TempDir::new().unwrap();
        tree(&dir);
        let books = books_dir(&dir).await;

        let entries = walk_directory(&books, DEFAULT_WALK_TIMEOUT, &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.zip_name()).collect();
        assert_eq!(
            names,
            vec![
                "a.txt",
                "vol2/",
                "vol2/b.txt",
                "vol2/inner/",
                "vol2/inner/c.txt",
                "vol10/",
            ]
        );
    }

    #[tokio::test]
    async fn test_walk_zero_timeout() {
        let dir = TempDir::new().unwrap();
        tree(&dir);
        let books = books_dir(&dir).await;
        assert!(matches!(
            walk_directory(&books, Duration::ZERO, &CancellationToken::new()).await,
            Err(VfsError::TimeoutExceeded(_))
        ));
    }

    #[tokio::test]
    async fn test_walk_cancelled() {
        let dir = TempDir::new().unwrap();
        tree(&dir);
        let books = books_dir(&dir).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            walk_directory(&books, DEFAULT_WALK_TIMEOUT, &cancel).await,
            Err(VfsError::Cancelled)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_symlink_policy() {
        let dir = TempDir::new().unwrap();
        tree(&dir);
        let books = dir.path().join("books");
        std::os::unix::fs::symlink(dir.path().join("outside.txt"), books.join("leak.txt")).unwrap();
        std::os::unix::fs::symlink(&books, books.join("loop")).unwrap();
        std::os::unix::fs::symlink(books.join("a.txt"), books.join("alias.txt")).unwrap();
        let node = books_dir(&dir).await;

        let entries = walk_directory(&node, DEFAULT_WALK_TIMEOUT, &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.zip_name()).collect();
        assert!(!names.iter().any(|n| n.starts_with("leak")));
        assert!(names.contains(&"alias.txt".to_string()));
        // listed, not entered
        assert!(names.contains(&"loop/".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("loop/") && n != "loop/"));
    }
}
