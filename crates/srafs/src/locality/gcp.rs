// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! GCP instance metadata probe.
//!
//! The zone query establishes that the process runs on GCP at all;
//! the identity endpoint then mints a JWT scoped to the locator's
//! audience. Every request must carry the `Metadata-Flavor: Google`
//! header or the metadata service refuses to answer.

use super::{IdentityKind, Locality};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./gcp_test.rs"]
mod gcp_test;

const METADATA_BASE: &str = "http://metadata.google.internal";
const IDENTITY_BASE: &str = "http://metadata";
const ZONE_PATH: &str = "/computeMetadata/v1/instance/zone?alt=json";
const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity\
                             ?audience=https://www.ncbi.nlm.nih.gov&format=full";

const FLAVOR_HEADER: (&str, &str) = ("Metadata-Flavor", "Google");

pub(super) async fn detect(client: &reqwest::Client) -> Result<Locality> {
    detect_at(client, METADATA_BASE, IDENTITY_BASE).await
}

pub(super) async fn detect_at(
    client: &reqwest::Client,
    zone_base: &str,
    identity_base: &str,
) -> Result<Locality> {
    let body = fetch(client, &format!("{zone_base}{ZONE_PATH}")).await?;
    // the zone arrives as a JSON string, eg "projects/1234/zones/us-east1-b"
    let zone: String = serde_json::from_str(&body)?;
    let region = zone.rsplit('/').next().unwrap_or_default().to_string();
    if region.is_empty() {
        return Err(Error::new("metadata service reported an empty zone"));
    }
    let token = fetch(client, &format!("{identity_base}{IDENTITY_PATH}")).await?;
    Ok(Locality {
        cloud: "gs".to_string(),
        region,
        kind: IdentityKind::GcpJwt,
        token,
    })
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .header(FLAVOR_HEADER.0, FLAVOR_HEADER.1)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|err| Error::http(format!("probing {url}"), err))?;
    response
        .text()
        .await
        .map_err(|err| Error::http(format!("reading {url}"), err))
}
