// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! AWS instance metadata probe.
//!
//! An instance proves its locality with the instance-identity
//! document and the PKCS#7 signature the metadata service publishes
//! for it. The locator verifies the signature server-side; here the
//! two payloads are only fetched and packed into the wire format it
//! expects.

use data_encoding::BASE64;
use serde::Deserialize;

use super::{IdentityKind, Locality};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./aws_test.rs"]
mod aws_test;

const METADATA_BASE: &str = "http://169.254.169.254";
const DOCUMENT_PATH: &str = "/latest/dynamic/instance-identity/document";
const PKCS7_PATH: &str = "/latest/dynamic/instance-identity/pkcs7";

#[derive(Debug, Deserialize)]
struct IdentityDocument {
    #[serde(default)]
    region: String,
}

pub(super) async fn detect(client: &reqwest::Client) -> Result<Locality> {
    detect_at(client, METADATA_BASE).await
}

pub(super) async fn detect_at(client: &reqwest::Client, base: &str) -> Result<Locality> {
    let document = fetch(client, &format!("{base}{DOCUMENT_PATH}")).await?;
    let identity: IdentityDocument = serde_json::from_str(&document)?;
    if identity.region.is_empty() {
        return Err(Error::new("instance identity document has no region"));
    }
    let pkcs7 = fetch(client, &format!("{base}{PKCS7_PATH}")).await?;
    Ok(Locality {
        cloud: "s3".to_string(),
        region: identity.region,
        kind: IdentityKind::AwsPkcs7,
        token: compose_token(&pkcs7, &document),
    })
}

/// Pack the signature and document into the locator's token format:
/// the PEM framing and the signature body are base64'd separately,
/// then the document is appended after a literal dot.
pub(super) fn compose_token(pkcs7: &str, document: &str) -> String {
    let mut token = BASE64.encode(b"-----BEGIN PKCS7-----\n");
    token.push_str(&BASE64.encode(format!("{pkcs7}\n").as_bytes()));
    token.push_str(&BASE64.encode(b"-----END PKCS7-----\n"));
    token.push('.');
    token.push_str(&BASE64.encode(document.as_bytes()));
    token
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|err| Error::http(format!("probing {url}"), err))?;
    response
        .text()
        .await
        .map_err(|err| Error::http(format!("reading {url}"), err))
}
