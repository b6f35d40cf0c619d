// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! Ranged streaming for open file handles.
//!
//! Each open file carries one [`RangeReader`], which keeps at most
//! one HTTP body open and feeds sequential reads from it. A read
//! that lands anywhere but the stream's current position drops the
//! stream and starts a new ranged request; a signed URL that is
//! about to expire is refreshed through the locator before the
//! request goes out. Transient failures drop the stream and hand
//! the kernel a zero-byte success so it re-issues the read.

use std::sync::{Arc, Weak};

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::RequestPayer;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use dashmap::DashMap;
use srafs::catalog::Location;
use srafs::{errno_for_status, sdl, OsError};

use crate::inode::Inode;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./reader_test.rs"]
mod reader_test;

/// Shared machinery every reader needs: the locator client (which
/// also owns the pooled HTTP client used for ranged GETs), the
/// runtime settings, and lazily-built per-region S3 clients for
/// requester-pays objects.
pub(crate) struct ReadContext {
    pub sdl: Arc<sdl::Client>,
    pub config: srafs::Config,
    s3: DashMap<String, aws_sdk_s3::Client>,
}

impl ReadContext {
    pub fn new(sdl: Arc<sdl::Client>, config: srafs::Config) -> Self {
        Self {
            sdl,
            config,
            s3: DashMap::new(),
        }
    }

    async fn s3_client(&self, region: &str) -> aws_sdk_s3::Client {
        if let Some(client) = self.s3.get(region) {
            return client.clone();
        }
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(profile) = &self.config.aws.profile {
            loader = loader.profile_name(profile);
        }
        let shared = loader.load().await;
        let client = aws_sdk_s3::Client::new(&shared);
        // a concurrent build for the same region is harmless
        self.s3.insert(region.to_string(), client.clone());
        client
    }
}

// Transient failures reset the stream and let the kernel retry the
// read; fatal ones surface to the caller as they are.
enum StreamError {
    Transient(String),
    Fatal(Error),
}

type StreamResult<T> = std::result::Result<T, StreamError>;

/// A forward-only response body, from either transport.
enum BodyStream {
    Http(reqwest::Response),
    ObjectStore(aws_sdk_s3::primitives::ByteStream),
}

impl BodyStream {
    async fn chunk(&mut self) -> StreamResult<Option<Bytes>> {
        match self {
            BodyStream::Http(response) => response
                .chunk()
                .await
                .map_err(|err| StreamError::Transient(err.to_string())),
            BodyStream::ObjectStore(body) => body
                .try_next()
                .await
                .map_err(|err| StreamError::Transient(err.to_string())),
        }
    }
}

/// Streaming state for one open file handle.
pub(crate) struct RangeReader {
    inode: Weak<Inode>,
    stream: Option<BodyStream>,
    /// Unconsumed tail of the last chunk pulled off the stream.
    pending: Bytes,
    /// Absolute file offset the current stream yields next.
    read_buf_offset: u64,
    /// Bytes served sequentially from the current stream.
    seq_read_amount: u64,
    /// Reads that landed away from the stream position.
    num_ooo_read: u64,
    /// Consecutive zero-progress failures.
    failures: u32,
}

impl RangeReader {
    pub fn new(inode: Weak<Inode>) -> Self {
        Self {
            inode,
            stream: None,
            pending: Bytes::new(),
            read_buf_offset: 0,
            seq_read_amount: 0,
            num_ooo_read: 0,
            failures: 0,
        }
    }

    /// How many reads arrived out of order on this handle.
    pub fn ooo_reads(&self) -> u64 {
        self.num_ooo_read
    }

    /// Serve `size` bytes at `offset`, short reads allowed.
    pub async fn read(&mut self, ctx: &ReadContext, offset: u64, size: u32) -> Result<Bytes> {
        let inode = self
            .inode
            .upgrade()
            .ok_or_else(|| Error::errno(libc::ESTALE, "inode released under an open handle"))?;
        let attr = inode.attr_snapshot();
        if offset >= attr.size {
            return Ok(Bytes::new());
        }

        // in-memory artifacts skip the streaming machinery entirely
        if let Some(buffer) = inode.buffer() {
            let start = (offset as usize).min(buffer.len());
            let end = (start + size as usize).min(buffer.len());
            return Ok(Bytes::copy_from_slice(&buffer[start..end]));
        }

        if offset != self.read_buf_offset {
            self.close_stream();
            self.read_buf_offset = offset;
            self.seq_read_amount = 0;
            self.num_ooo_read += 1;
            tracing::trace!(
                file = %inode.name,
                ooo = self.num_ooo_read,
                "read landed away from the stream position"
            );
        }

        let wanted = (attr.size - offset).min(size as u64) as usize;
        let mut out = BytesMut::with_capacity(wanted);
        while out.len() < wanted {
            let position = offset + out.len() as u64;
            match self.next_chunk(ctx, &inode, position).await {
                Ok(Some(chunk)) => {
                    let take = chunk.len().min(wanted - out.len());
                    out.extend_from_slice(&chunk[..take]);
                    if take < chunk.len() {
                        self.pending = chunk.slice(take..);
                    }
                }
                Ok(None) => {
                    // the remote hung up before the advertised size
                    self.close_stream();
                    if out.is_empty() {
                        return self.zero_progress(&inode, ctx, "stream ended early");
                    }
                    break;
                }
                Err(StreamError::Transient(why)) => {
                    self.close_stream();
                    if out.is_empty() {
                        return self.zero_progress(&inode, ctx, &why);
                    }
                    break;
                }
                Err(StreamError::Fatal(err)) => {
                    self.close_stream();
                    return Err(err);
                }
            }
        }

        self.failures = 0;
        self.read_buf_offset += out.len() as u64;
        self.seq_read_amount += out.len() as u64;
        Ok(out.freeze())
    }

    // a read that produced nothing: let the kernel retry until the
    // budget runs out
    fn zero_progress(&mut self, inode: &Arc<Inode>, ctx: &ReadContext, why: &str) -> Result<Bytes> {
        self.failures += 1;
        if self.failures >= ctx.config.reader.retries {
            return Err(Error::errno(
                libc::EIO,
                format!("reading {} keeps failing: {why}", inode.name),
            ));
        }
        tracing::debug!(file = %inode.name, attempt = self.failures, "transient read failure: {why}");
        Ok(Bytes::new())
    }

    async fn next_chunk(
        &mut self,
        ctx: &ReadContext,
        inode: &Arc<Inode>,
        position: u64,
    ) -> StreamResult<Option<Bytes>> {
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }
        if self.stream.is_none() {
            self.stream = Some(open_stream(ctx, inode, position).await?);
        }
        let stream = self.stream.as_mut().expect("stream was just opened");
        stream.chunk().await
    }

    fn close_stream(&mut self) {
        self.stream = None;
        self.pending = Bytes::new();
    }
}

async fn open_stream(
    ctx: &ReadContext,
    inode: &Arc<Inode>,
    offset: u64,
) -> StreamResult<BodyStream> {
    let location = match inode.location().map_err(StreamError::Fatal)? {
        Some(location) if location.is_fresh(Utc::now(), ctx.config.freshness_window()) => location,
        _ => refresh_location(ctx, inode).await?,
    };
    match location {
        Location::SignedUrl { link, .. } => open_http(ctx, inode, &link, offset).await,
        Location::RequesterPays {
            bucket,
            key,
            region,
            service,
        } => {
            if service != "s3" {
                return Err(StreamError::Fatal(Error::errno(
                    libc::EACCES,
                    format!("requester-pays reads are only supported on s3, not {service}"),
                )));
            }
            open_object(ctx, inode, &bucket, &key, &region, offset).await
        }
    }
}

/// A location that is missing or about to expire is replaced before
/// use. The fresh location is written back to the inode so other
/// handles benefit from the same signature.
async fn refresh_location(ctx: &ReadContext, inode: &Arc<Inode>) -> StreamResult<Location> {
    let accession = inode.accession().map_err(StreamError::Fatal)?;
    tracing::debug!(file = %inode.name, %accession, "refreshing signed location");
    let refreshed = ctx.sdl.sign(&accession).await.map_err(|err| {
        let errno = err.os_error().unwrap_or(libc::EACCES);
        StreamError::Fatal(Error::errno(
            errno,
            format!("re-signing {accession} failed: {err}"),
        ))
    })?;
    let file = refreshed.file(&inode.name).ok_or_else(|| {
        StreamError::Fatal(Error::errno(
            libc::ENOENT,
            format!("{accession} no longer reports {}", inode.name),
        ))
    })?;
    let location = file.location.clone().ok_or_else(|| {
        StreamError::Fatal(Error::errno(
            libc::EACCES,
            format!("locator returned no location for {}", inode.name),
        ))
    })?;
    inode.set_location(location.clone());
    Ok(location)
}

async fn open_http(
    ctx: &ReadContext,
    inode: &Arc<Inode>,
    link: &str,
    offset: u64,
) -> StreamResult<BodyStream> {
    let mut request = ctx
        .sdl
        .http()
        .get(link)
        // intermediaries must not transcode the body out from
        // under the byte ranges
        .header(reqwest::header::ACCEPT_ENCODING, "identity");
    if offset > 0 {
        request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
    }
    let response = request
        .send()
        .await
        .map_err(|err| StreamError::Transient(err.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(BodyStream::Http(response));
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        inode.mark_missing();
        return Err(StreamError::Fatal(Error::errno(
            libc::ENOENT,
            format!("{} is gone from the remote", inode.name),
        )));
    }
    match errno_for_status(status.as_u16()) {
        Some(errno) => Err(StreamError::Fatal(Error::errno(
            errno,
            format!("GET for {} returned {status}", inode.name),
        ))),
        None => Err(StreamError::Transient(format!("GET returned {status}"))),
    }
}

async fn open_object(
    ctx: &ReadContext,
    inode: &Arc<Inode>,
    bucket: &str,
    key: &str,
    region: &str,
    offset: u64,
) -> StreamResult<BodyStream> {
    let client = ctx.s3_client(region).await;
    let mut request = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .request_payer(RequestPayer::Requester);
    if offset > 0 {
        request = request.range(format!("bytes={offset}-"));
    }
    match request.send().await {
        Ok(output) => Ok(BodyStream::ObjectStore(output.body)),
        Err(err) => {
            let status = match &err {
                SdkError::ServiceError(context) => Some(context.raw().status().as_u16()),
                _ => None,
            };
            match status {
                Some(404) => {
                    inode.mark_missing();
                    Err(StreamError::Fatal(Error::errno(
                        libc::ENOENT,
                        format!("{bucket}/{key} is gone from the remote"),
                    )))
                }
                Some(code) => match errno_for_status(code) {
                    Some(errno) => Err(StreamError::Fatal(Error::errno(
                        errno,
                        format!("GetObject for {bucket}/{key} returned {code}"),
                    ))),
                    None => Err(StreamError::Transient(format!("GetObject returned {code}"))),
                },
                None => Err(StreamError::Transient(err.to_string())),
            }
        }
    }
}
