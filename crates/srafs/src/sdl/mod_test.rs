// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

use mockito::{Matcher, Server, ServerGuard};

use super::{Client, Credential};
use crate::catalog::Location;
use crate::locality::Locality;
use crate::{Config, Error, OsError};

const ONE_FILE_BUNDLE: &str = r#"{"version": "2", "result": [
    {"bundle": "SRR000001", "status": 200, "files": [{
        "name": "data.bam",
        "size": 1000,
        "type": "bam",
        "locations": [{
            "link": "https://download.example.test/1",
            "service": "s3",
            "region": "us-east-1",
            "expirationDate": "2030-01-01T00:00:00Z"
        }]
    }]}
]}"#;

fn test_client(server: &ServerGuard) -> Client {
    let mut config = Config::default();
    config.sdl.endpoint = format!("{}/sdl/2/retrieve", server.url());
    config.sdl.batch = 1;
    let locality = Locality::forced("s3.us-east-1").unwrap();
    Client::new(&config, locality).unwrap()
}

#[tokio::test]
async fn test_retrieve_sends_locality_and_accessions() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/sdl/2/retrieve")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="locality"\s+s3\.us-east-1"#.into()),
            Matcher::Regex(r#"name="locality-type"\s+forced"#.into()),
            Matcher::Regex(r#"name="acc"\s+SRR000001"#.into()),
        ]))
        .with_body(ONE_FILE_BUNDLE)
        .create_async()
        .await;

    let client = test_client(&server);
    let catalog = client.retrieve(&["SRR000001".to_string()]).await.unwrap();

    assert_eq!(catalog.accessions.len(), 1);
    assert_eq!(catalog.accessions[0].files.len(), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_retrieve_forwards_credential_blob() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/sdl/2/retrieve")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="ngc"; filename="prj_1.ngc""#.into()),
            Matcher::Regex("not-a-real-credential".into()),
        ]))
        .with_body(ONE_FILE_BUNDLE)
        .create_async()
        .await;

    let client = test_client(&server).with_credential(Some(Credential {
        name: "prj_1.ngc".into(),
        bytes: b"not-a-real-credential".to_vec(),
    }));
    client.retrieve(&["SRR000001".to_string()]).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_metadata_only_query() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/sdl/2/retrieve")
        .match_body(Matcher::Regex(r#"name="meta-only"\s+yes"#.into()))
        .with_body(ONE_FILE_BUNDLE)
        .create_async()
        .await;

    let client = test_client(&server);
    let catalog = client.metadata(&["SRR000001".to_string()]).await.unwrap();
    assert_eq!(catalog.accessions.len(), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_failed_batch_does_not_abort_the_rest() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/sdl/2/retrieve")
        .match_body(Matcher::Regex("SRR000001".into()))
        .with_body(ONE_FILE_BUNDLE)
        .create_async()
        .await;
    server
        .mock("POST", "/sdl/2/retrieve")
        .match_body(Matcher::Regex("SRR000002".into()))
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;

    // batch size 1 puts each accession in its own request
    let client = test_client(&server);
    let catalog = client
        .retrieve(&["SRR000001".to_string(), "SRR000002".to_string()])
        .await
        .unwrap();

    assert_eq!(catalog.accessions.len(), 2);
    assert!(!catalog.accessions[0].has_errors());
    assert!(catalog.accessions[1].has_errors());
    assert!(catalog.accessions[1]
        .error_log
        .contains("retrieval failed"));
}

#[tokio::test]
async fn test_error_body_parsing() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/sdl/2/retrieve")
        .with_status(403)
        .with_body(r#"{"status": 403, "message": "denied"}"#)
        .create_async()
        .await;

    let client = test_client(&server);
    let err = client.retrieve(&[]).await.unwrap_err();
    match err {
        Error::Locator { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "denied");
        }
        other => panic!("expected a locator error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_body_fallback_to_raw_text() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/sdl/2/retrieve")
        .with_status(502)
        .with_body("<html>bad gateway</html>")
        .create_async()
        .await;

    let client = test_client(&server);
    let err = client.retrieve(&[]).await.unwrap_err();
    match err {
        Error::Locator { status, message } => {
            assert_eq!(status, 502);
            assert!(message.contains("bad gateway"));
        }
        other => panic!("expected a locator error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sign_returns_a_fresh_location() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/sdl/2/retrieve")
        .match_body(Matcher::Regex("SRR000001".into()))
        .with_body(ONE_FILE_BUNDLE)
        .create_async()
        .await;

    let client = test_client(&server);
    let refreshed = client.sign("SRR000001").await.unwrap();
    assert_eq!(refreshed.id, "SRR000001");
    match refreshed.files[0].location.as_ref().unwrap() {
        Location::SignedUrl { link, expires, .. } => {
            assert_eq!(link, "https://download.example.test/1");
            assert!(expires.is_some());
        }
        other => panic!("expected a signed url, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sign_refusal_is_an_access_error() {
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

    let client = test_client(&server);
    let err = client.sign("SRR000001").await.unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EACCES));
}
