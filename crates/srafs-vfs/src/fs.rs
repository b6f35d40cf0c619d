// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! The filesystem object: inode and handle tables, id allocation,
//! and the operation set the FUSE dispatcher calls into.
//!
//! The inode tree is built once from the locator catalog at mount
//! time. One directory per accession hangs off the root; an
//! accession that failed validation gets a single `error.log` file
//! carrying the diagnostics instead of its data files. A hidden
//! zero-length `.initialized` file at the root tells outside
//! orchestration that population finished.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;
use fuser::{FileAttr, FileType};
use srafs::catalog::{Catalog, RemoteFile};
use srafs::sdl;

use crate::inode::{Backing, Ino, Inode, BLOCK_SIZE, ROOT_INO};
use crate::reader::{RangeReader, ReadContext};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./fs_test.rs"]
mod fs_test;

/// Hidden marker file signalling that population finished.
const READY_MARKER: &str = ".initialized";
/// Diagnostics file synthesized into errored accessions.
const ERROR_LOG: &str = "error.log";

/// Optimal transfer size reported through statfs.
const IO_SIZE: u32 = 1024 * 1024;
/// Inode capacity reported through statfs.
const TOTAL_INODES: u64 = 1_000_000_000;

/// One `readdir` entry: inode, resume offset, type, name.
pub(crate) type DirEntry = (Ino, i64, FileType, String);

/// Everything statfs reports.
pub(crate) struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

pub(crate) struct DirHandle {
    dir: Arc<Inode>,
    /// Children as they were at opendir; the tree is static so this
    /// equals the live list, but readdir never takes the child lock.
    entries: Vec<Arc<Inode>>,
}

pub(crate) struct FileHandle {
    pub reader: tokio::sync::Mutex<RangeReader>,
}

pub(crate) enum Handle {
    Dir(DirHandle),
    File(Arc<FileHandle>),
}

/// Handles the allocation of inodes and handles, and every
/// filesystem operation the dispatcher routes in.
pub struct Filesystem {
    ctx: ReadContext,
    uid: u32,
    gid: u32,
    mounted_at: SystemTime,
    pub(crate) ttl: Duration,
    next_inode: AtomicU64,
    next_handle: AtomicU64,
    inodes: DashMap<Ino, Arc<Inode>>,
    handles: DashMap<u64, Handle>,
}

impl Filesystem {
    /// Build the filesystem for a retrieved catalog.
    ///
    /// All inodes are allocated here; the tree never changes for
    /// the life of the mount. Files and directories are owned by
    /// the configured uid/gid and are read-only for everyone.
    pub fn new(
        settings: srafs::Config,
        sdl: Arc<sdl::Client>,
        catalog: Catalog,
        opts: &crate::Config,
    ) -> Self {
        let fs = Self {
            ctx: ReadContext::new(sdl, settings),
            uid: opts.uid,
            gid: opts.gid,
            mounted_at: SystemTime::now(),
            ttl: Duration::from_secs(1),
            // the root inode must be 1, which populate allocates first
            next_inode: AtomicU64::new(1),
            // handle 0 is never given out
            next_handle: AtomicU64::new(1),
            inodes: Default::default(),
            handles: Default::default(),
        };
        fs.populate(catalog);
        fs
    }

    fn populate(&self, catalog: Catalog) {
        let mounted = self.mounted_at;
        let root = Arc::new(Inode::new_dir(
            self.allocate_inode(),
            "",
            Weak::new(),
            mounted,
        ));
        assert_eq!(root.ino, ROOT_INO, "the root must be allocated first");
        self.inodes.insert(root.ino, Arc::clone(&root));

        for accession in &catalog.accessions {
            if root
                .find_child(&accession.id)
                .expect("root is a directory")
                .is_some()
            {
                tracing::warn!(accession = %accession.id, "skipping repeated accession");
                continue;
            }
            let dir = Arc::new(Inode::new_dir(
                self.allocate_inode(),
                &accession.id,
                Arc::downgrade(&root),
                mounted,
            ));
            self.inodes.insert(dir.ino, Arc::clone(&dir));

            for file in &accession.files {
                if dir
                    .find_child(&file.name)
                    .expect("accessions are directories")
                    .is_some()
                {
                    tracing::warn!(
                        accession = %accession.id,
                        file = %file.name,
                        "skipping repeated file name"
                    );
                    continue;
                }
                let mtime = file.modified.map(SystemTime::from).unwrap_or(mounted);
                let node = Arc::new(Inode::new_file(
                    self.allocate_inode(),
                    &file.name,
                    Arc::downgrade(&dir),
                    file.size,
                    mtime,
                    Backing::Remote(file.location.clone()),
                    remote_xattrs(file),
                ));
                self.inodes.insert(node.ino, Arc::clone(&node));
                dir.insert_child(node);
            }

            if accession.has_errors() {
                let log: Arc<[u8]> = accession.error_log.clone().into_bytes().into();
                let node = Arc::new(Inode::new_file(
                    self.allocate_inode(),
                    ERROR_LOG,
                    Arc::downgrade(&dir),
                    log.len() as u64,
                    mounted,
                    Backing::Buffer(log),
                    BTreeMap::new(),
                ));
                self.inodes.insert(node.ino, Arc::clone(&node));
                dir.insert_child(node);
            }

            root.insert_child(dir);
        }

        let marker = Arc::new(Inode::new_file(
            self.allocate_inode(),
            READY_MARKER,
            Arc::downgrade(&root),
            0,
            mounted,
            Backing::Buffer(Vec::new().into()),
            BTreeMap::new(),
        ));
        self.inodes.insert(marker.ino, Arc::clone(&marker));
        root.insert_child(marker);
    }

    fn allocate_inode(&self) -> Ino {
        self.next_inode.fetch_add(1, Ordering::Relaxed)
    }

    fn allocate_handle(&self, data: Handle) -> u64 {
        loop {
            let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                // the zero handle stays free so a missing handle is
                // always distinguishable
                continue;
            }
            match self.handles.entry(id) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(data);
                    break id;
                }
            }
        }
    }

    fn inode(&self, ino: Ino) -> Result<Arc<Inode>> {
        self.inodes
            .get(&ino)
            .map(|kv| Arc::clone(kv.value()))
            .ok_or_else(|| Error::errno(libc::ENOENT, format!("no inode {ino}")))
    }

    pub(crate) fn attr_of(&self, inode: &Inode) -> FileAttr {
        let attr = inode.attr_snapshot();
        let (kind, perm, nlink) = if inode.is_dir() {
            (FileType::Directory, 0o555, 2)
        } else {
            (FileType::RegularFile, 0o444, 1)
        };
        FileAttr {
            ino: inode.ino,
            size: attr.size,
            blocks: attr.size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: attr.mtime,
            mtime: attr.mtime,
            ctime: attr.mtime,
            crtime: attr.mtime,
            kind,
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    pub(crate) fn lookup(&self, parent: Ino, name: &str) -> Result<FileAttr> {
        let parent = self.inode(parent)?;
        let child = parent
            .find_child(name)?
            .ok_or_else(|| Error::errno(libc::ENOENT, format!("no entry named {name}")))?;
        child.retain();
        Ok(self.attr_of(&child))
    }

    pub(crate) fn forget(&self, ino: Ino, nlookup: u64) {
        if let Some(inode) = self.inodes.get(&ino) {
            inode.release(nlookup);
        }
    }

    pub(crate) fn getattr(&self, ino: Ino) -> Result<FileAttr> {
        let inode = self.inode(ino)?;
        if inode.attr_snapshot().invalid {
            return Err(Error::errno(
                libc::ESTALE,
                format!("{} is gone from the remote", inode.name),
            ));
        }
        Ok(self.attr_of(&inode))
    }

    pub(crate) fn opendir(&self, ino: Ino) -> Result<u64> {
        let dir = self.inode(ino)?;
        let entries = dir.children_snapshot()?;
        Ok(self.allocate_handle(Handle::Dir(DirHandle { dir, entries })))
    }

    /// Entries after `offset`, which is either zero for a fresh
    /// listing or a position this engine handed out earlier.
    pub(crate) fn readdir(&self, fh: u64, offset: i64) -> Result<Vec<DirEntry>> {
        let handle = self
            .handles
            .get(&fh)
            .ok_or_else(|| Error::errno(libc::EBADF, format!("no handle {fh}")))?;
        let Handle::Dir(dir_handle) = handle.value() else {
            return Err(Error::errno(libc::ENOTDIR, "not a directory handle"));
        };

        let dir = &dir_handle.dir;
        let parent_ino = dir.parent.upgrade().map(|p| p.ino).unwrap_or(dir.ino);

        let mut entries = Vec::new();
        let mut position = 0i64;
        let mut push = |ino: Ino, kind: FileType, name: &str| {
            position += 1;
            if position > offset {
                entries.push((ino, position, kind, name.to_string()));
            }
        };
        push(dir.ino, FileType::Directory, ".");
        push(parent_ino, FileType::Directory, "..");
        for child in &dir_handle.entries {
            push(child.ino, child.file_type(), &child.name);
        }
        Ok(entries)
    }

    pub(crate) fn releasedir(&self, fh: u64) -> Result<()> {
        self.handles
            .remove(&fh)
            .map(|_| ())
            .ok_or_else(|| Error::errno(libc::EBADF, format!("no handle {fh}")))
    }

    pub(crate) fn open(&self, ino: Ino, flags: i32) -> Result<u64> {
        let inode = self.inode(ino)?;
        if inode.is_dir() {
            return Err(Error::errno(libc::EISDIR, "cannot open a directory"));
        }
        if flags & (libc::O_WRONLY | libc::O_RDWR) != 0 {
            return Err(Error::errno(libc::EROFS, "filesystem is read-only"));
        }
        let handle = FileHandle {
            reader: tokio::sync::Mutex::new(RangeReader::new(Arc::downgrade(&inode))),
        };
        Ok(self.allocate_handle(Handle::File(Arc::new(handle))))
    }

    pub(crate) async fn read(&self, fh: u64, offset: i64, size: u32) -> Result<Bytes> {
        if offset < 0 {
            return Err(Error::errno(libc::EINVAL, "negative read offset"));
        }
        // take an owned reference so the handle table is free
        // before any network wait
        let handle = {
            let entry = self
                .handles
                .get(&fh)
                .ok_or_else(|| Error::errno(libc::EBADF, format!("no handle {fh}")))?;
            match entry.value() {
                Handle::File(handle) => Arc::clone(handle),
                Handle::Dir(_) => return Err(Error::errno(libc::EISDIR, "is a directory")),
            }
        };
        let mut reader = handle.reader.lock().await;
        reader.read(&self.ctx, offset as u64, size).await
    }

    pub(crate) fn release(&self, fh: u64) -> Result<()> {
        self.handles
            .remove(&fh)
            .map(|_| ())
            .ok_or_else(|| Error::errno(libc::EBADF, format!("no handle {fh}")))
    }

    pub(crate) fn statfs(&self) -> StatFs {
        let total: u64 = self
            .inodes
            .iter()
            .filter(|kv| !kv.value().is_dir())
            .map(|kv| kv.value().attr_snapshot().size)
            .sum();
        StatFs {
            blocks: total / u64::from(BLOCK_SIZE),
            bfree: 0,
            bavail: 0,
            files: TOTAL_INODES,
            ffree: 0,
            bsize: IO_SIZE,
            namelen: 255,
            frsize: BLOCK_SIZE,
        }
    }

    /// All xattr names on the inode, null separated, namespaced
    /// `s3.` for remote metadata and `user.` for user metadata.
    pub(crate) fn listxattr(&self, ino: Ino) -> Result<Vec<u8>> {
        let inode = self.inode(ino)?;
        let mut out = Vec::new();
        for key in inode.xattrs_remote.keys() {
            out.extend_from_slice(format!("s3.{key}").as_bytes());
            out.push(0);
        }
        for key in inode.xattrs_user.keys() {
            out.extend_from_slice(format!("user.{key}").as_bytes());
            out.push(0);
        }
        Ok(out)
    }

    /// Look up one xattr. Namespaces outside `s3.` and `user.` are
    /// refused: access-denied for user callers, no-data for the
    /// kernel itself so its own probing stays quiet.
    pub(crate) fn getxattr(&self, ino: Ino, name: &str, kernel_caller: bool) -> Result<Vec<u8>> {
        let inode = self.inode(ino)?;
        let value = if let Some(key) = name.strip_prefix("s3.") {
            inode.xattrs_remote.get(key)
        } else if let Some(key) = name.strip_prefix("user.") {
            inode.xattrs_user.get(key)
        } else if kernel_caller {
            return Err(Error::errno(libc::ENODATA, format!("no xattr {name}")));
        } else {
            return Err(Error::errno(
                libc::EACCES,
                format!("xattr namespace of {name} is not exposed"),
            ));
        };
        value
            .cloned()
            .ok_or_else(|| Error::errno(libc::ENODATA, format!("no xattr {name}")))
    }

    #[cfg(test)]
    pub(crate) fn inode_for_test(&self, ino: Ino) -> Arc<Inode> {
        self.inode(ino).expect("inode should exist")
    }

    /// One-line state summary, logged on the diagnostic signal.
    pub fn diagnostics(&self) -> String {
        let mut dirs = 0u64;
        let mut files = 0u64;
        for entry in self.handles.iter() {
            match entry.value() {
                Handle::Dir(_) => dirs += 1,
                Handle::File(_) => files += 1,
            }
        }
        format!(
            "inodes={} dir_handles={dirs} file_handles={files} next_inode={} next_handle={}",
            self.inodes.len(),
            self.next_inode.load(Ordering::Relaxed),
            self.next_handle.load(Ordering::Relaxed),
        )
    }
}

// remote metadata published under the `s3.` xattr namespace
fn remote_xattrs(file: &RemoteFile) -> BTreeMap<String, Vec<u8>> {
    let mut xattrs = BTreeMap::new();
    if !file.md5.is_empty() {
        xattrs.insert("etag".to_string(), file.md5.clone().into_bytes());
    }
    if !file.file_type.is_empty() {
        xattrs.insert(
            "content-type".to_string(),
            file.file_type.clone().into_bytes(),
        );
    }
    xattrs
}
