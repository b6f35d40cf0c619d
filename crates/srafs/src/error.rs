// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! Error types shared across the workspace, and the translation
//! from HTTP status codes to the errno values that filesystem
//! callers ultimately see.

use thiserror::Error;

#[cfg(test)]
#[path = "./error_test.rs"]
mod error_test;

/// Errors raised by the core client library.
#[derive(Debug, Error)]
pub enum Error {
    /// A generic string error.
    #[error("{0}")]
    String(String),

    /// An underlying I/O failure.
    #[error(transparent)]
    IO(#[from] std::io::Error),

    /// An error that carries the errno a filesystem reply should use.
    #[error("[ERRNO {1}] {0}")]
    Errno(String, i32),

    /// A JSON body that could not be parsed.
    #[error(transparent)]
    JSON(#[from] serde_json::Error),

    /// A malformed configuration file or environment override.
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// A malformed URL, typically a bad `--endpoint` override.
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// A transport-level HTTP failure (connect, timeout, TLS).
    #[error("{context}: {source}")]
    Http {
        /// What was being attempted when the transport failed.
        context: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// A non-200 reply from the locator service.
    #[error("locator replied {status}: {message}")]
    Locator {
        /// The HTTP status of the reply.
        status: u16,
        /// The decoded `message` field, or the raw body when the
        /// reply was not the documented `{status, message}` shape.
        message: String,
    },

    /// Neither cloud metadata service answered and no manual
    /// location was supplied.
    #[error("could not determine cloud location (aws: {aws}; gcp: {gcp})")]
    LocalityUnavailable {
        /// Why the AWS probe failed.
        aws: String,
        /// Why the GCP probe failed.
        gcp: String,
    },

    /// A manual location string that is not `<cloud>.<region>`.
    #[error("invalid location {0:?}, expected <cloud>.<region> such as s3.us-east-1")]
    InvalidLocation(String),
}

impl Error {
    /// Create a plain string error.
    pub fn new<S: AsRef<str>>(message: S) -> Error {
        Error::String(message.as_ref().to_owned())
    }

    /// Create an error that resolves to the given errno.
    pub fn new_errno<E: Into<String>>(errno: i32, e: E) -> Error {
        Error::Errno(e.into(), errno)
    }

    /// Wrap an HTTP transport error with context about the request.
    pub fn http<C: Into<String>>(context: C, source: reqwest::Error) -> Error {
        Error::Http {
            context: context.into(),
            source,
        }
    }
}

/// Things that can resolve to an OS errno for filesystem replies.
pub trait OsError {
    /// The errno equivalent of this error, if there is one.
    fn os_error(&self) -> Option<i32>;
}

impl OsError for Error {
    fn os_error(&self) -> Option<i32> {
        match self {
            Error::IO(err) => err.raw_os_error(),
            Error::Errno(_, errno) => Some(*errno),
            Error::Locator { status, .. } => errno_for_status(*status),
            Error::Http { source, .. } => source
                .status()
                .and_then(|s| errno_for_status(s.as_u16())),
            _ => None,
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::String(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Self::String(err.to_string())
    }
}

/// Map an HTTP status code to the errno reported to the kernel.
///
/// `None` means the status has no direct errno equivalent; readers
/// treat it as an end-of-stream condition, dropping the current
/// stream and retrying on the next read.
pub fn errno_for_status(status: u16) -> Option<i32> {
    match status {
        400 => Some(libc::EINVAL),
        403 => Some(libc::EACCES),
        404 => Some(libc::ENOENT),
        405 => Some(libc::ENOTSUP),
        500 => Some(libc::EAGAIN),
        _ => None,
    }
}

/// Result alias for operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;
