// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! The locator protocol client.
//!
//! The SRA Data Locator answers multipart POSTs that carry the
//! caller's locality proof, optional access credential, and a list
//! of accessions; it replies with a JSON catalog of files and
//! time-limited download locations. This module builds those
//! requests, batches large accession lists, and validates the
//! replies into [`crate::catalog`] records.

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use url::Url;

use crate::catalog::{Accession, Catalog};
use crate::locality::Locality;
use crate::{Config, Error, Result};

mod response;
pub use response::{validate, BundleResult, FileResult, LocationResult, RetrieveResponse};

#[cfg(test)]
#[path = "./mod_test.rs"]
mod mod_test;

/// An access-credential blob, passed through to the locator as an
/// opaque file part. Loading it from disk is the caller's business.
#[derive(Clone, Debug)]
pub struct Credential {
    /// The original file name, forwarded with the part.
    pub name: String,
    /// The raw blob.
    pub bytes: Vec<u8>,
}

// error replies are usually this json shape, but not reliably so
#[derive(Debug, Deserialize)]
struct ErrorBody {
    status: Option<u16>,
    message: String,
}

/// A configured connection to one locator endpoint.
pub struct Client {
    http: reqwest::Client,
    endpoint: Url,
    locality: Locality,
    credential: Option<Credential>,
    accept_charges: Option<String>,
    filetypes: Option<String>,
    batch: usize,
}

impl Client {
    /// Build a client from the runtime settings and a locality.
    ///
    /// The underlying HTTP client is shared with the ranged-read
    /// layer, so the pool and timeout settings here govern object
    /// reads as well.
    pub fn new(config: &Config, locality: Locality) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("srafs/{}", crate::VERSION))
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.idle_timeout())
            .pool_max_idle_per_host(config.http.pool)
            .build()
            .map_err(|err| Error::http("building locator client", err))?;
        Ok(Self {
            http,
            endpoint: Url::parse(&config.sdl.endpoint)?,
            locality,
            credential: None,
            accept_charges: None,
            filetypes: None,
            batch: config.sdl.batch.max(1),
        })
    }

    /// Attach an access-credential blob to every request.
    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    /// Declare which clouds the caller accepts egress charges on
    /// (`aws`, `gcp`, or `aws,gcp`).
    pub fn with_accept_charges(mut self, accept_charges: Option<String>) -> Self {
        self.accept_charges = accept_charges;
        self
    }

    /// Restrict results to the given file types.
    pub fn with_filetypes(mut self, filetypes: Option<Vec<String>>) -> Self {
        self.filetypes = filetypes.map(|types| types.join(","));
        self
    }

    /// The shared HTTP client, for ranged object reads.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Retrieve and validate the catalog for a set of accessions.
    ///
    /// Accessions are signed in batches; a batch that fails leaves
    /// its accessions in place with the failure recorded in their
    /// error logs rather than aborting the whole retrieval. An
    /// empty accession list asks for everything the credential
    /// authorizes, in a single unbatched request.
    pub async fn retrieve(&self, accessions: &[String]) -> Result<Catalog> {
        if accessions.is_empty() {
            let response = self.post(self.form(&[], false)).await?;
            return Ok(Catalog {
                accessions: validate(&[], response)?,
            });
        }
        let mut catalog = Catalog::default();
        for batch in accessions.chunks(self.batch) {
            let outcome = match self.post(self.form(batch, false)).await {
                Ok(response) => validate(batch, response),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(mut validated) => catalog.accessions.append(&mut validated),
                Err(err) => {
                    tracing::warn!("locator batch failed: {err}");
                    catalog.accessions.extend(batch.iter().map(|id| {
                        let mut acc = Accession::new(id);
                        acc.log_error(format!("retrieval failed: {err}"));
                        acc
                    }));
                }
            }
        }
        Ok(catalog)
    }

    /// List the catalog without asking for signed locations.
    pub async fn metadata(&self, accessions: &[String]) -> Result<Catalog> {
        let response = self.post(self.form(accessions, true)).await?;
        Ok(Catalog {
            accessions: validate(accessions, response)?,
        })
    }

    /// Fetch a fresh location set for a single accession.
    ///
    /// Used by the streaming layer when a signed URL has expired or
    /// was never populated. A refresh the locator refuses surfaces
    /// as an access error so the pending read can fail cleanly.
    pub async fn sign(&self, accession: &str) -> Result<Accession> {
        let requested = [accession.to_string()];
        let response = self.post(self.form(&requested, false)).await?;
        let refreshed = validate(&requested, response)?
            .into_iter()
            .find(|acc| acc.id == accession)
            .ok_or_else(|| Error::new(format!("locator returned nothing for {accession}")))?;
        if refreshed.has_errors() {
            return Err(Error::new_errno(
                libc::EACCES,
                format!("re-signing {accession} failed: {}", refreshed.error_log.trim_end()),
            ));
        }
        Ok(refreshed)
    }

    // field order is part of the protocol; keep it stable
    fn form(&self, accessions: &[String], meta_only: bool) -> Form {
        let mut form = Form::new()
            .text("locality", self.locality.token.clone())
            .text("locality-type", self.locality.kind.to_string());
        if let Some(credential) = &self.credential {
            form = form.part(
                "ngc",
                Part::bytes(credential.bytes.clone()).file_name(credential.name.clone()),
            );
        }
        if let Some(charges) = &self.accept_charges {
            form = form.text("accept-charges", charges.clone());
        }
        if let Some(filetypes) = &self.filetypes {
            form = form.text("filetype", filetypes.clone());
        }
        if !accessions.is_empty() {
            form = form.text("acc", accessions.join(","));
        }
        if meta_only {
            form = form.text("meta-only", "yes");
        }
        form
    }

    async fn post(&self, form: Form) -> Result<RetrieveResponse> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|err| Error::http("posting to locator", err))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| Error::http("reading locator reply", err))?;
        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorBody>(&body) {
                Ok(parsed) => Error::Locator {
                    status: parsed.status.unwrap_or_else(|| status.as_u16()),
                    message: parsed.message,
                },
                Err(_) => Error::Locator {
                    status: status.as_u16(),
                    message: body,
                },
            });
        }
        serde_json::from_str(&body).map_err(Error::from)
    }
}
