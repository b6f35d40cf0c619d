// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! Wire schema of the locator's retrieve endpoint, and the
//! validation pass that turns raw replies into catalog records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::catalog::{Accession, Location, RemoteFile};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./response_test.rs"]
mod response_test;

/// A complete reply from the retrieve endpoint.
#[derive(Debug, Deserialize)]
pub struct RetrieveResponse {
    /// Protocol version echoed by the service.
    #[serde(default)]
    pub version: String,
    /// One entry per accession the service resolved.
    #[serde(default)]
    pub result: Vec<BundleResult>,
}

/// The reply for a single accession.
#[derive(Debug, Deserialize)]
pub struct BundleResult {
    /// The accession id this entry answers for.
    #[serde(default)]
    pub bundle: String,
    /// Per-accession status; 200 when resolvable.
    #[serde(default)]
    pub status: u16,
    /// Diagnostic message accompanying a non-200 status.
    #[serde(default)]
    pub msg: Option<String>,
    /// The files of the accession.
    #[serde(default)]
    pub files: Vec<FileResult>,
}

/// One file entry within a bundle.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    /// File name, expected unique within the bundle.
    #[serde(default)]
    pub name: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// MIME-style type string.
    #[serde(default, rename = "type")]
    pub file_type: String,
    /// Remote modification time.
    #[serde(default)]
    pub modification_date: Option<DateTime<Utc>>,
    /// Opaque content hash.
    #[serde(default)]
    pub md5: String,
    /// Candidate locations; validation requires exactly one.
    #[serde(default)]
    pub locations: Vec<LocationResult>,
}

/// One location entry within a file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationResult {
    /// Signed URL, or bucket endpoint for requester-pays entries.
    #[serde(default)]
    pub link: String,
    /// Hosting service (`s3`, `gs`, ...).
    #[serde(default)]
    pub service: String,
    /// Hosting region.
    #[serde(default)]
    pub region: String,
    /// When the signed link stops working.
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    /// Whether a compute-environment token was required to sign.
    #[serde(default)]
    pub ce_required: bool,
    /// Whether the caller pays the egress for this object.
    #[serde(default)]
    pub pay_required: bool,
    /// Requester-pays bucket.
    #[serde(default)]
    pub bucket: String,
    /// Requester-pays object key.
    #[serde(default)]
    pub key: String,
}

/// Validate a raw reply against the accession list that was
/// requested.
///
/// An empty `requested` slice means the request was credential
/// scoped and every returned accession is accepted. Validation
/// failures never delete an accession entry: the accession keeps
/// its place with an empty file set and a diagnostic in its error
/// log, which the filesystem surfaces as an `error.log` file.
pub fn validate(requested: &[String], response: RetrieveResponse) -> Result<Vec<Accession>> {
    if response.result.is_empty() {
        return Err(Error::new("locator reply carried no results"));
    }
    let unrestricted = requested.is_empty();
    let mut accessions: Vec<Accession> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    for bundle in response.result {
        if !unrestricted && !requested.iter().any(|a| a == &bundle.bundle) {
            tracing::warn!(accession = %bundle.bundle, "dropping result that was never requested");
            continue;
        }
        if let Some(&idx) = by_id.get(&bundle.bundle) {
            let acc = &mut accessions[idx];
            acc.files.clear();
            acc.log_error(format!("locator returned {} more than once", bundle.bundle));
            continue;
        }
        let acc = validate_bundle(bundle);
        by_id.insert(acc.id.clone(), accessions.len());
        accessions.push(acc);
    }
    Ok(accessions)
}

fn validate_bundle(bundle: BundleResult) -> Accession {
    let mut acc = Accession::new(&bundle.bundle);
    if bundle.status != 200 {
        let msg = bundle
            .msg
            .unwrap_or_else(|| "no message given".to_string());
        acc.log_error(format!("status {}: {msg}", bundle.status));
        return acc;
    }
    if bundle.files.is_empty() {
        acc.log_error(format!("{} resolved to no files", acc.id));
        return acc;
    }
    let mut files = Vec::with_capacity(bundle.files.len());
    for file in bundle.files {
        match validate_file(&acc.id, file) {
            Ok(file) => files.push(file),
            Err(err) => {
                acc.log_error(err.to_string());
                return acc;
            }
        }
    }
    acc.files = files;
    acc
}

fn validate_file(accession: &str, file: FileResult) -> Result<RemoteFile> {
    if file.name.is_empty() {
        return Err(Error::new(format!("{accession}: file with an empty name")));
    }
    if file.file_type.is_empty() {
        return Err(Error::new(format!(
            "{accession}: file {} has no type",
            file.name
        )));
    }
    let count = file.locations.len();
    let mut locations = file.locations;
    let location = match locations.pop() {
        Some(location) if locations.is_empty() => location,
        _ => {
            return Err(Error::new(format!(
                "{accession}: file {} must have exactly one location, got {count}",
                file.name,
            )))
        }
    };
    if location.link.is_empty() || location.service.is_empty() || location.region.is_empty() {
        return Err(Error::new(format!(
            "{accession}: file {} has an incomplete location",
            file.name
        )));
    }
    if location.pay_required && (location.bucket.is_empty() || location.key.is_empty()) {
        return Err(Error::new(format!(
            "{accession}: requester-pays file {} is missing its bucket or key",
            file.name
        )));
    }
    let location = if location.pay_required {
        Location::RequesterPays {
            bucket: location.bucket,
            key: location.key,
            region: location.region,
            service: location.service,
        }
    } else {
        Location::SignedUrl {
            link: location.link,
            expires: location.expiration_date,
            service: location.service,
            region: location.region,
        }
    };
    Ok(RemoteFile {
        name: file.name,
        size: file.size,
        file_type: file.file_type,
        modified: file.modification_date,
        md5: file.md5,
        location: Some(location),
    })
}
