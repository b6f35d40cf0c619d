// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! Inode records for the static accession tree.
//!
//! The tree is built once from the locator catalog and never
//! mutated afterwards: directories for accessions, files for their
//! remote objects, plus the synthesized `error.log` and
//! `.initialized` entries. Children hold strong references from
//! their parent's child list; the parent back-pointer is weak and
//! exists for path reconstruction only.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use fuser::FileType;
use srafs::catalog::Location;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./inode_test.rs"]
mod inode_test;

pub(crate) type Ino = u64;

/// The root directory is always inode 1.
pub(crate) const ROOT_INO: Ino = 1;

/// Fragment size used for attr blocks and statfs accounting.
pub(crate) const BLOCK_SIZE: u32 = 4096;

/// Mutable attributes, guarded by the inode mutex.
#[derive(Clone, Debug)]
pub(crate) struct Attr {
    pub size: u64,
    pub mtime: SystemTime,
    /// Set when the remote reported the object missing; the size is
    /// revised to zero at the same time and getattr answers ESTALE.
    pub invalid: bool,
}

/// Where a file's bytes come from.
#[derive(Debug)]
pub(crate) enum Backing {
    /// The object store, at this location. `None` until the locator
    /// signs the file, after which the location may still be
    /// replaced when its signature goes stale.
    Remote(Option<Location>),
    /// An in-memory buffer, serving synthesized files such as the
    /// per-accession `error.log`.
    Buffer(Arc<[u8]>),
}

/// Kind-specific inode state.
#[derive(Debug)]
pub(crate) enum Kind {
    Directory {
        /// Children, kept sorted directories-first then by name.
        children: Mutex<Vec<Arc<Inode>>>,
    },
    File {
        backing: Mutex<Backing>,
    },
}

#[derive(Debug)]
pub(crate) struct Inode {
    pub ino: Ino,
    pub name: String,
    pub parent: Weak<Inode>,
    pub kind: Kind,
    pub attr: Mutex<Attr>,
    /// Kernel lookup count; `lookup` increments, `forget`
    /// decrements. Preloaded inodes start at one and are never
    /// reclaimed, but the protocol is honored.
    lookups: AtomicI64,
    /// Remote metadata exposed read-only under the `s3.` namespace.
    pub xattrs_remote: BTreeMap<String, Vec<u8>>,
    /// User metadata exposed under the `user.` namespace.
    pub xattrs_user: BTreeMap<String, Vec<u8>>,
}

impl Inode {
    pub fn new_dir(ino: Ino, name: impl Into<String>, parent: Weak<Inode>, mtime: SystemTime) -> Self {
        Self {
            ino,
            name: name.into(),
            parent,
            kind: Kind::Directory {
                children: Mutex::new(Vec::new()),
            },
            attr: Mutex::new(Attr {
                size: u64::from(BLOCK_SIZE),
                mtime,
                invalid: false,
            }),
            lookups: AtomicI64::new(1),
            xattrs_remote: BTreeMap::new(),
            xattrs_user: BTreeMap::new(),
        }
    }

    pub fn new_file(
        ino: Ino,
        name: impl Into<String>,
        parent: Weak<Inode>,
        size: u64,
        mtime: SystemTime,
        backing: Backing,
        xattrs_remote: BTreeMap<String, Vec<u8>>,
    ) -> Self {
        Self {
            ino,
            name: name.into(),
            parent,
            kind: Kind::File {
                backing: Mutex::new(backing),
            },
            attr: Mutex::new(Attr {
                size,
                mtime,
                invalid: false,
            }),
            lookups: AtomicI64::new(1),
            xattrs_remote,
            xattrs_user: BTreeMap::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, Kind::Directory { .. })
    }

    pub fn file_type(&self) -> FileType {
        if self.is_dir() {
            FileType::Directory
        } else {
            FileType::RegularFile
        }
    }

    pub fn attr_snapshot(&self) -> Attr {
        self.attr.lock().expect("inode attr lock poisoned").clone()
    }

    /// Record one kernel reference to this inode.
    pub fn retain(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop `count` kernel references. Going negative means the
    /// kernel and the tree disagree about this inode's life, which
    /// cannot be recovered from.
    pub fn release(&self, count: u64) {
        let previous = self.lookups.fetch_sub(count as i64, Ordering::Relaxed);
        assert!(
            previous >= count as i64,
            "inode {} forgotten {count} times with only {previous} lookups",
            self.ino
        );
    }

    /// The current kernel reference count, for diagnostics.
    pub fn lookup_count(&self) -> i64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Find a child by name. Errors on non-directories.
    pub fn find_child(&self, name: &str) -> Result<Option<Arc<Inode>>> {
        match &self.kind {
            Kind::File { .. } => Err(Error::errno(libc::ENOTDIR, "not a directory")),
            Kind::Directory { children } => Ok(children
                .lock()
                .expect("child list lock poisoned")
                .iter()
                .find(|child| child.name == name)
                .map(Arc::clone)),
        }
    }

    /// Snapshot the (sorted) child list. Errors on non-directories.
    pub fn children_snapshot(&self) -> Result<Vec<Arc<Inode>>> {
        match &self.kind {
            Kind::File { .. } => Err(Error::errno(libc::ENOTDIR, "not a directory")),
            Kind::Directory { children } => {
                Ok(children.lock().expect("child list lock poisoned").clone())
            }
        }
    }

    /// Insert a child, keeping the list sorted.
    pub fn insert_child(&self, child: Arc<Inode>) {
        let Kind::Directory { children } = &self.kind else {
            unreachable!("children are only ever attached to directories");
        };
        let mut children = children.lock().expect("child list lock poisoned");
        let at = children
            .binary_search_by(|existing| cmp_children(existing, &child))
            .unwrap_or_else(|insertion_point| insertion_point);
        children.insert(at, child);
    }

    /// The current remote location of a file, if signed.
    pub fn location(&self) -> Result<Option<Location>> {
        match &self.kind {
            Kind::Directory { .. } => Err(Error::errno(libc::EISDIR, "is a directory")),
            Kind::File { backing } => match &*backing.lock().expect("backing lock poisoned") {
                Backing::Remote(location) => Ok(location.clone()),
                Backing::Buffer(_) => Ok(None),
            },
        }
    }

    /// Replace a file's location after a re-sign.
    pub fn set_location(&self, location: Location) {
        if let Kind::File { backing } = &self.kind {
            let mut backing = backing.lock().expect("backing lock poisoned");
            if let Backing::Remote(slot) = &mut *backing {
                *slot = Some(location);
            }
        }
    }

    /// The in-memory buffer backing this file, if any.
    pub fn buffer(&self) -> Option<Arc<[u8]>> {
        match &self.kind {
            Kind::Directory { .. } => None,
            Kind::File { backing } => match &*backing.lock().expect("backing lock poisoned") {
                Backing::Buffer(bytes) => Some(Arc::clone(bytes)),
                Backing::Remote(_) => None,
            },
        }
    }

    /// Record that the remote reported this object missing: the
    /// size collapses to zero and the inode goes stale.
    pub fn mark_missing(&self) {
        let mut attr = self.attr.lock().expect("inode attr lock poisoned");
        attr.size = 0;
        attr.invalid = true;
    }

    /// The accession this file belongs to, read off the parent
    /// directory's name.
    pub fn accession(&self) -> Result<String> {
        let parent = self
            .parent
            .upgrade()
            .ok_or_else(|| Error::errno(libc::ESTALE, "parent directory released"))?;
        if parent.ino == ROOT_INO {
            return Err(Error::errno(
                libc::ENOENT,
                format!("{} does not belong to an accession", self.name),
            ));
        }
        Ok(parent.name.clone())
    }
}

/// Child ordering: all directories before all files, then by name.
pub(crate) fn cmp_children(a: &Arc<Inode>, b: &Arc<Inode>) -> CmpOrdering {
    (!a.is_dir(), a.name.as_str()).cmp(&(!b.is_dir(), b.name.as_str()))
}
