// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use chrono::{Duration, Utc};
use mockito::{Matcher, Server, ServerGuard};
use srafs::catalog::Location;
use srafs::locality::Locality;
use srafs::sdl;
use srafs::OsError;

use super::{RangeReader, ReadContext};
use crate::inode::{Backing, Inode};

// the strong references that keep the tree alive for the reader
struct Tree {
    _root: Arc<Inode>,
    _accession: Arc<Inode>,
    file: Arc<Inode>,
}

fn tree(size: u64, location: Option<Location>) -> Tree {
    let root = Arc::new(Inode::new_dir(1, "", Weak::new(), SystemTime::now()));
    let accession = Arc::new(Inode::new_dir(
        2,
        "SRR000001",
        Arc::downgrade(&root),
        SystemTime::now(),
    ));
    let file = Arc::new(Inode::new_file(
        3,
        "data.bam",
        Arc::downgrade(&accession),
        size,
        SystemTime::now(),
        Backing::Remote(location),
        BTreeMap::new(),
    ));
    Tree {
        _root: root,
        _accession: accession,
        file,
    }
}

fn signed(link: String, expires_in: Option<i64>) -> Location {
    Location::SignedUrl {
        link,
        expires: expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        service: "s3".into(),
        region: "us-east-1".into(),
    }
}

fn context(server: &ServerGuard, retries: u32) -> ReadContext {
    let mut config = srafs::Config::default();
    config.sdl.endpoint = format!("{}/sdl/2/retrieve", server.url());
    config.reader.retries = retries;
    let locality = Locality::forced("s3.us-east-1").unwrap();
    let sdl = Arc::new(sdl::Client::new(&config, locality).unwrap());
    ReadContext::new(sdl, config)
}

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_sequential_reads_share_one_stream() {
    let mut server = Server::new_async().await;
    let content = body(3000);
    let get = server
        .mock("GET", "/obj")
        // sequential streaming from zero never sends a range
        .match_header("range", Matcher::Missing)
        .match_header("accept-encoding", "identity")
        .with_body(content.clone())
        .expect(1)
        .create_async()
        .await;

    let ctx = context(&server, 10);
    let tree = tree(3000, Some(signed(format!("{}/obj", server.url()), None)));
    let mut reader = RangeReader::new(Arc::downgrade(&tree.file));

    let mut collected = Vec::new();
    for chunk in 0..3 {
        let bytes = reader.read(&ctx, chunk * 1000, 1000).await.unwrap();
        assert_eq!(bytes.len(), 1000);
        collected.extend_from_slice(&bytes);
    }
    assert_eq!(collected, content);
    assert_eq!(reader.ooo_reads(), 0);
    get.assert_async().await;
}

#[tokio::test]
async fn test_out_of_order_read_reopens_with_range() {
    let mut server = Server::new_async().await;
    let content = body(4096);
    server
        .mock("GET", "/obj")
        .match_header("range", Matcher::Missing)
        .with_body(content.clone())
        .create_async()
        .await;
    let ranged = server
        .mock("GET", "/obj")
        .match_header("range", "bytes=2048-")
        .with_status(206)
        .with_body(content[2048..].to_vec())
        .expect(1)
        .create_async()
        .await;

    let ctx = context(&server, 10);
    let tree = tree(4096, Some(signed(format!("{}/obj", server.url()), None)));
    let mut reader = RangeReader::new(Arc::downgrade(&tree.file));

    let head = reader.read(&ctx, 0, 1000).await.unwrap();
    assert_eq!(&head[..], &content[..1000]);

    let tail = reader.read(&ctx, 2048, 1000).await.unwrap();
    assert_eq!(&tail[..], &content[2048..3048]);
    assert_eq!(reader.ooo_reads(), 1);
    ranged.assert_async().await;
}

#[tokio::test]
async fn test_expired_url_is_resigned_once() {
    let mut server = Server::new_async().await;
    let content = body(1000);
    let fresh_link = format!("{}/fresh", server.url());
    let sign = server
        .mock("POST", "/sdl/2/retrieve")
        .with_body(format!(
            r#"{{"version": "2", "result": [
                {{"bundle": "SRR000001", "status": 200, "files": [{{
                    "name": "data.bam",
                    "size": 1000,
                    "type": "bam",
                    "locations": [{{
                        "link": "{fresh_link}",
                        "service": "s3",
                        "region": "us-east-1",
                        "expirationDate": "2030-01-01T00:00:00Z"
                    }}]
                }}]}}
            ]}}"#
        ))
        .expect(1)
        .create_async()
        .await;
    let get = server
        .mock("GET", "/fresh")
        .with_body(content.clone())
        .expect(1)
        .create_async()
        .await;

    let ctx = context(&server, 10);
    // expired thirty seconds ago, so the reader must re-sign first
    let stale = signed(format!("{}/stale", server.url()), Some(-30));
    let tree = tree(1000, Some(stale));
    let mut reader = RangeReader::new(Arc::downgrade(&tree.file));

    let bytes = reader.read(&ctx, 0, 1000).await.unwrap();
    assert_eq!(&bytes[..], &content[..]);
    sign.assert_async().await;
    get.assert_async().await;

    // the refreshed location stuck to the inode
    match tree.file.location().unwrap().unwrap() {
        Location::SignedUrl { link, .. } => assert_eq!(link, fresh_link),
        other => panic!("expected a signed url, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_refresh_yields_eacces_then_recovers() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/sdl/2/retrieve")
        .with_body(
            r#"{"version": "2", "result": [
                {"bundle": "SRR000001", "status": 403, "msg": "denied"}
            ]}"#,
        )
        .create_async()
        .await;

    let ctx = context(&server, 10);
    let tree = tree(1000, Some(signed(format!("{}/stale", server.url()), Some(-30))));
    let mut reader = RangeReader::new(Arc::downgrade(&tree.file));

    let err = reader.read(&ctx, 0, 100).await.unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EACCES));

    // once the locator relents the same handle recovers
    server.reset_async().await;
    let content = body(1000);
    let fresh_link = format!("{}/fresh", server.url());
    server
        .mock("POST", "/sdl/2/retrieve")
        .with_body(format!(
            r#"{{"version": "2", "result": [
                {{"bundle": "SRR000001", "status": 200, "files": [{{
                    "name": "data.bam",
                    "size": 1000,
                    "type": "bam",
                    "locations": [{{
                        "link": "{fresh_link}",
                        "service": "s3",
                        "region": "us-east-1",
                        "expirationDate": "2030-01-01T00:00:00Z"
                    }}]
                }}]}}
            ]}}"#
        ))
        .create_async()
        .await;
    server
        .mock("GET", "/fresh")
        .with_body(content.clone())
        .create_async()
        .await;

    let bytes = reader.read(&ctx, 0, 100).await.unwrap();
    assert_eq!(&bytes[..], &content[..100]);
}

#[tokio::test]
async fn test_forbidden_get_is_eacces() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/obj")
        .with_status(403)
        .create_async()
        .await;

    let ctx = context(&server, 10);
    let tree = tree(1000, Some(signed(format!("{}/obj", server.url()), None)));
    let mut reader = RangeReader::new(Arc::downgrade(&tree.file));

    let err = reader.read(&ctx, 0, 100).await.unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EACCES));
}

#[tokio::test]
async fn test_missing_object_invalidates_the_inode() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/obj")
        .with_status(404)
        .create_async()
        .await;

    let ctx = context(&server, 10);
    let tree = tree(1000, Some(signed(format!("{}/obj", server.url()), None)));
    let mut reader = RangeReader::new(Arc::downgrade(&tree.file));

    let err = reader.read(&ctx, 0, 100).await.unwrap_err();
    assert_eq!(err.os_error(), Some(libc::ENOENT));
    let attr = tree.file.attr_snapshot();
    assert!(attr.invalid);
    assert_eq!(attr.size, 0);
}

#[tokio::test]
async fn test_transient_failures_exhaust_into_eio() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/obj")
        .with_status(503)
        .expect_at_least(2)
        .create_async()
        .await;

    let ctx = context(&server, 2);
    let tree = tree(1000, Some(signed(format!("{}/obj", server.url()), None)));
    let mut reader = RangeReader::new(Arc::downgrade(&tree.file));

    // the first failure is swallowed so the kernel retries
    let bytes = reader.read(&ctx, 0, 100).await.unwrap();
    assert!(bytes.is_empty());
    // the retry budget runs out on the second
    let err = reader.read(&ctx, 0, 100).await.unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EIO));
}

#[tokio::test]
async fn test_boundary_reads() {
    let mut server = Server::new_async().await;
    let content = body(1000);
    server
        .mock("GET", "/obj")
        .match_header("range", "bytes=999-")
        .with_status(206)
        .with_body(content[999..].to_vec())
        .create_async()
        .await;

    let ctx = context(&server, 10);
    let tree = tree(1000, Some(signed(format!("{}/obj", server.url()), None)));
    let mut reader = RangeReader::new(Arc::downgrade(&tree.file));

    // a read past the end never touches the network
    let empty = reader.read(&ctx, 1000, 10).await.unwrap();
    assert!(empty.is_empty());
    let empty = reader.read(&ctx, 4096, 10).await.unwrap();
    assert!(empty.is_empty());

    // the final byte is served exactly
    let last = reader.read(&ctx, 999, 10).await.unwrap();
    assert_eq!(&last[..], &content[999..]);
}

#[tokio::test]
async fn test_gcp_requester_pays_is_refused() {
    let server = Server::new_async().await;
    let ctx = context(&server, 10);
    let location = Location::RequesterPays {
        bucket: "b".into(),
        key: "k".into(),
        region: "us-central1".into(),
        service: "gs".into(),
    };
    let tree = tree(1000, Some(location));
    let mut reader = RangeReader::new(Arc::downgrade(&tree.file));

    let err = reader.read(&ctx, 0, 100).await.unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EACCES));
}
