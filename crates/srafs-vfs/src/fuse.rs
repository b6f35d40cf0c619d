// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! The FUSE dispatcher.
//!
//! A thin adapter between the kernel transport and the filesystem
//! object: every request is moved onto the async runtime, resolved
//! against the inode and handle tables, and answered through the
//! reply object it arrived with.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::sync::Arc;

use fuser::consts::*;
use fuser::{MountOption, ReplyData, ReplyDirectory, ReplyEntry, ReplyOpen, Request};
use srafs::OsError;

use crate::fs::Filesystem;

/// Options to configure the FUSE filesystem and its behavior at
/// runtime.
#[derive(Debug, Clone)]
pub struct Config {
    /// The user id that owns all files and directories.
    pub uid: u32,
    /// The group id that owns all files and directories.
    pub gid: u32,
    /// Mount options to be used when setting up.
    pub mount_options: HashSet<MountOption>,
}

/// Reply with an error to FUSE and return
macro_rules! err {
    ($reply:ident, $err:expr) => {{
        let err = $err;
        tracing::error!("{err:?}");
        let errno = err.os_error().unwrap_or(libc::EIO);
        $reply.error(errno);
        return;
    }};
}

/// Extract the ok value from a result, or reply with an error in FUSE
macro_rules! unwrap {
    ($reply:ident, $op:expr) => {{
        match $op {
            Ok(r) => r,
            Err(err) => err!($reply, err),
        }
    }};
}

/// Represents a connected FUSE session.
///
/// This implements the [`fuser::Filesystem`] trait, receives all
/// requests and arranges for their async execution against the
/// accession filesystem.
pub struct Session {
    fs: Arc<Filesystem>,
}

impl Session {
    /// Construct a new session serving the given filesystem.
    pub fn new(fs: Arc<Filesystem>) -> Self {
        Self { fs }
    }
}

impl fuser::Filesystem for Session {
    fn init(
        &mut self,
        _req: &Request<'_>,
        config: &mut fuser::KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        const DESIRED: &[(&str, u64)] = &[
            ("FUSE_ASYNC_READ", FUSE_ASYNC_READ),
            ("FUSE_EXPORT_SUPPORT", FUSE_EXPORT_SUPPORT),
            ("FUSE_FILE_OPS", FUSE_FILE_OPS),
            ("FUSE_PARALLEL_DIROPS", FUSE_PARALLEL_DIROPS),
        ];
        let all_desired = DESIRED.iter().fold(0, |prev, (_, i)| prev | i);
        if let Err(unsupported) = config.add_capabilities(all_desired) {
            let rejected = DESIRED
                .iter()
                .filter_map(|d| (d.1 & unsupported != 0).then_some(d.0));
            for name in rejected {
                tracing::warn!("FUSE feature rejected: {name}");
            }
            config
                .add_capabilities(all_desired & !unsupported)
                .expect("should accept after we remove unsupported caps");
        }
        tracing::info!("Filesystem initialized");
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_owned();
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            let Some(name) = name.to_str() else {
                reply.error(libc::EINVAL);
                return;
            };
            let attr = unwrap!(reply, fs.lookup(parent, name));
            reply.entry(&fs.ttl, &attr, 0);
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.fs.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: fuser::ReplyAttr) {
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            let attr = unwrap!(reply, fs.getattr(ino));
            reply.attr(&fs.ttl, &attr);
        });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            let fh = unwrap!(reply, fs.open(ino, flags));
            tracing::trace!("open {ino} = {fh}");
            reply.opened(fh, FOPEN_KEEP_CACHE);
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            let bytes = unwrap!(reply, fs.read(fh, offset, size).await);
            tracing::trace!("read {fh} = {}/{size}", bytes.len());
            reply.data(&bytes);
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        // flush is meaningless without write support
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            unwrap!(reply, fs.release(fh));
            reply.ok();
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            let fh = unwrap!(reply, fs.opendir(ino));
            tracing::trace!("opendir {ino} = {fh}");
            reply.opened(fh, FOPEN_CACHE_DIR);
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            let entries = unwrap!(reply, fs.readdir(fh, offset));
            for (ino, next_offset, kind, name) in entries {
                let buffer_full = reply.add(ino, next_offset, kind, name);
                if buffer_full {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: fuser::ReplyEmpty) {
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            unwrap!(reply, fs.releasedir(fh));
            reply.ok();
        });
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            let stat = fs.statfs();
            reply.statfs(
                stat.blocks,
                stat.bfree,
                stat.bavail,
                stat.files,
                stat.ffree,
                stat.bsize,
                stat.namelen,
                stat.frsize,
            );
        });
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: fuser::ReplyXattr) {
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            let names = unwrap!(reply, fs.listxattr(ino));
            if size == 0 {
                reply.size(names.len() as u32);
            } else if names.len() <= size as usize {
                reply.data(&names);
            } else {
                reply.error(libc::ERANGE);
            }
        });
    }

    fn getxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: fuser::ReplyXattr,
    ) {
        // requests issued by the kernel itself carry no process id
        let kernel_caller = req.pid() == 0;
        let name = name.to_owned();
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn(async move {
            let Some(name) = name.to_str() else {
                reply.error(libc::EINVAL);
                return;
            };
            let value = unwrap!(reply, fs.getxattr(ino, name, kernel_caller));
            if size == 0 {
                reply.size(value.len() as u32);
            } else if value.len() <= size as usize {
                reply.data(&value);
            } else {
                reply.error(libc::ERANGE);
            }
        });
    }
}
