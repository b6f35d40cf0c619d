// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

use srafs::OsError;
use thiserror::Error;

/// Errors specific to filesystem operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A generic string error.
    #[error("{0}")]
    String(String),

    /// An error bubbled up from the core client library.
    #[error(transparent)]
    Core(#[from] srafs::Error),

    /// An error that carries the errno a FUSE reply should use.
    #[error("[ERRNO {1}] {0}")]
    Errno(String, i32),
}

impl Error {
    /// Create an error that resolves to the given errno.
    pub fn errno<E: Into<String>>(errno: i32, message: E) -> Error {
        Error::Errno(message.into(), errno)
    }
}

impl OsError for Error {
    fn os_error(&self) -> Option<i32> {
        match self {
            Error::String(_) => None,
            Error::Core(err) => err.os_error(),
            Error::Errno(_, errno) => Some(*errno),
        }
    }
}

/// Result alias for operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;
