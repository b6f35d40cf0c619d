// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! Discovery of the cloud and region this process runs in.
//!
//! The locator service prices egress by caller location, so every
//! request must carry a locality: the provider-specific object-store
//! name (`s3` or `gs`), the region, and an identity token proving
//! the caller really runs there. Detection probes the provider
//! metadata services with short timeouts so that off-cloud callers
//! fail fast; a manual `<cloud>.<region>` override skips probing
//! entirely.

use std::fmt;
use std::time::Duration;

use crate::{Error, Result};

mod aws;
mod gcp;


/// Connect and read timeout for every metadata probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// How a locality proves itself to the locator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityKind {
    /// An AWS instance-identity document with its PKCS#7 signature.
    AwsPkcs7,
    /// A GCP service-account identity JWT.
    GcpJwt,
    /// An operator-supplied location with no proof attached.
    Forced,
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdentityKind::AwsPkcs7 => "aws_pkcs7",
            IdentityKind::GcpJwt => "gcp_jwt",
            IdentityKind::Forced => "forced",
        };
        f.write_str(s)
    }
}

/// Where this process runs, in the terms the locator expects.
#[derive(Clone, Debug)]
pub struct Locality {
    /// Object-store service name for this provider: `s3` or `gs`.
    pub cloud: String,
    /// Provider region (for GCP, the zone as reported).
    pub region: String,
    /// The kind of identity proof attached.
    pub kind: IdentityKind,
    /// The identity token sent in the `locality` field.
    pub token: String,
}

impl Locality {
    /// Build a locality from an operator-supplied
    /// `<cloud>.<region>` string, bypassing metadata probes.
    pub fn forced(location: &str) -> Result<Self> {
        let Some((cloud, region)) = location.split_once('.') else {
            return Err(Error::InvalidLocation(location.to_string()));
        };
        if region.is_empty() || !matches!(cloud, "s3" | "gs") {
            return Err(Error::InvalidLocation(location.to_string()));
        }
        Ok(Self {
            cloud: cloud.to_string(),
            region: region.to_string(),
            kind: IdentityKind::Forced,
            token: location.to_string(),
        })
    }

    /// Probe the AWS and then the GCP metadata services.
    ///
    /// Fails only when neither service answers, with both probe
    /// errors preserved in the result.
    pub async fn detect() -> Result<Self> {
        let client = probe_client()?;
        let aws_err = match aws::detect(&client).await {
            Ok(locality) => return Ok(locality),
            Err(err) => err,
        };
        tracing::debug!("not on aws: {aws_err}");
        let gcp_err = match gcp::detect(&client).await {
            Ok(locality) => return Ok(locality),
            Err(err) => err,
        };
        tracing::debug!("not on gcp: {gcp_err}");
        Err(Error::LocalityUnavailable {
            aws: aws_err.to_string(),
            gcp: gcp_err.to_string(),
        })
    }

    /// A human-readable `<cloud>.<region>` form for logs.
    pub fn description(&self) -> String {
        format!("{}.{}", self.cloud, self.region)
    }
}

fn probe_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(PROBE_TIMEOUT)
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|err| Error::http("building metadata probe client", err))
}
