//! Read-only virtual filesystem over several physical roots.
//!
//! Key components:
//!
//! - [`MountTable`] - Named bindings from a virtual prefix to a physical root
//! - [`PathResolver`] - Turns virtual paths into [`Node`]s, enforcing containment
//! - [`Node`] - Resolved metadata, listings and breadcrumbs
//! - [`walk_directory`] - Time-bounded enumeration feeding the archiver
//!
//! ## Design Decisions
//!
//! - **Exact-match mounts**: the first virtual segment selects a mount by
//!   name. Mounts never overlap in the virtual namespace, even when their
//!   physical roots nest.
//! - **Canonical containment**: every physical path is canonicalized before
//!   it is checked against the mount root, so `..` and symlinks cannot leave
//!   the sandbox.
//! - **Uniform denial**: unknown mount, missing entry and escape attempt all
//!   surface as [`VfsError::NotFound`].

mod error;
mod mime;
mod mount;
mod natural;
mod node;
mod resolve;
mod types;
mod walk;

pub use error::{ClientSignal, VfsError, VfsResult};
pub use mime::{DEFAULT_MIME, MimeTable};
pub use mount::{Mount, MountTable, parse_spec_line};
pub use natural::{natural_cmp, sort_listing};
pub use node::{DIRECTORY_CLASS, DirectoryNode, FileNode, Location, Node, VirtualRoot};
pub use resolve::PathResolver;
pub(crate) use resolve::canonicalize;
pub use types::{NodeInfo, NodeKind};
pub use walk::{DEFAULT_WALK_TIMEOUT, walk_directory};
