// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! The validated view of what the locator knows about a set of
//! accessions: which files exist, how big they are, and where their
//! bytes can be fetched from.

use chrono::{DateTime, Utc};

#[cfg(test)]
#[path = "./catalog_test.rs"]
mod catalog_test;

/// Where the bytes of a remote file can be fetched from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// A time-limited signed URL granting plain HTTP GET access.
    SignedUrl {
        /// The full URL.
        link: String,
        /// When the signature stops being honored, if limited.
        expires: Option<DateTime<Utc>>,
        /// Object-store service hosting the bytes (`s3`, `gs`, ...).
        service: String,
        /// Region hosting the bytes.
        region: String,
    },
    /// A requester-pays object reference that must be fetched with
    /// the caller's own signed credentials.
    RequesterPays {
        /// Bucket holding the object.
        bucket: String,
        /// Object key within the bucket.
        key: String,
        /// Region of the bucket.
        region: String,
        /// Object-store service (`s3`, `gs`, ...).
        service: String,
    },
}

impl Location {
    /// Whether this location can be used for a new request at `now`
    /// without being re-signed.
    ///
    /// Requester-pays references never go stale; signed URLs go
    /// stale when their expiry falls inside the refresh window. A
    /// signed URL without an expiry is treated as permanent.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match self {
            Location::RequesterPays { .. } => true,
            Location::SignedUrl { expires: None, .. } => true,
            Location::SignedUrl {
                expires: Some(expires),
                ..
            } => *expires - now > window,
        }
    }
}

/// One file within an accession, as reported by the locator.
#[derive(Clone, Debug)]
pub struct RemoteFile {
    /// File name, unique within its accession.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME-style type string reported by the locator.
    pub file_type: String,
    /// Remote modification time, when reported.
    pub modified: Option<DateTime<Utc>>,
    /// Opaque content hash. Recorded, never verified.
    pub md5: String,
    /// Where to fetch the bytes. `None` until signed.
    pub location: Option<Location>,
}

/// A logical group of files addressed by one accession id.
#[derive(Clone, Debug, Default)]
pub struct Accession {
    /// The opaque accession identifier.
    pub id: String,
    /// The files of this accession, in locator order.
    pub files: Vec<RemoteFile>,
    /// Accumulated validation diagnostics. Non-empty when the
    /// locator reported this accession partially or fully invalid.
    pub error_log: String,
}

impl Accession {
    /// Create an empty accession record.
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            files: Vec::new(),
            error_log: String::new(),
        }
    }

    /// Append one diagnostic line to the error log.
    pub fn log_error<S: AsRef<str>>(&mut self, message: S) {
        self.error_log.push_str(message.as_ref());
        self.error_log.push('\n');
    }

    /// Whether any diagnostics were recorded for this accession.
    pub fn has_errors(&self) -> bool {
        !self.error_log.is_empty()
    }

    /// Find a file of this accession by name.
    pub fn file(&self, name: &str) -> Option<&RemoteFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Everything the locator returned for one mount.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    /// All accessions, valid and errored alike.
    pub accessions: Vec<Accession>,
}

impl Catalog {
    /// Total size of all files in the catalog, in bytes.
    pub fn total_size(&self) -> u64 {
        self.accessions
            .iter()
            .flat_map(|a| a.files.iter())
            .map(|f| f.size)
            .sum()
    }

    /// Whether at least one accession carries usable files.
    pub fn has_files(&self) -> bool {
        self.accessions.iter().any(|a| !a.files.is_empty())
    }
}
