// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

use rstest::rstest;

use super::{validate, RetrieveResponse};
use crate::catalog::Location;

fn parse(json: &str) -> RetrieveResponse {
    serde_json::from_str(json).expect("fixture should parse")
}

fn requested(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

const VALID_FILE: &str = r#"{
    "name": "data.bam",
    "size": 1000,
    "type": "bam",
    "modificationDate": "2023-04-01T10:00:00Z",
    "md5": "0123456789abcdef0123456789abcdef",
    "locations": [{
        "link": "https://download.example.test/1",
        "service": "s3",
        "region": "us-east-1",
        "expirationDate": "2023-04-01T11:00:00Z"
    }]
}"#;

#[rstest]
fn test_empty_result_is_a_batch_failure() {
    let response = parse(r#"{"version": "2", "result": []}"#);
    validate(&requested(&["SRR000001"]), response)
        .expect_err("an empty result cannot satisfy any accession");
}

#[rstest]
fn test_happy_path() {
    let response = parse(&format!(
        r#"{{"version": "2", "result": [
            {{"bundle": "SRR000001", "status": 200, "files": [{VALID_FILE}]}}
        ]}}"#
    ));
    let accessions = validate(&requested(&["SRR000001"]), response).unwrap();
    assert_eq!(accessions.len(), 1);
    let acc = &accessions[0];
    assert!(!acc.has_errors());
    assert_eq!(acc.files.len(), 1);
    let file = &acc.files[0];
    assert_eq!(file.name, "data.bam");
    assert_eq!(file.size, 1000);
    assert_eq!(file.file_type, "bam");
    assert!(file.modified.is_some());
    match file.location.as_ref().unwrap() {
        Location::SignedUrl {
            link,
            expires,
            service,
            region,
        } => {
            assert_eq!(link, "https://download.example.test/1");
            assert!(expires.is_some());
            assert_eq!(service, "s3");
            assert_eq!(region, "us-east-1");
        }
        other => panic!("expected a signed url, got {other:?}"),
    }
}

#[rstest]
fn test_unrequested_results_are_dropped() {
    let response = parse(&format!(
        r#"{{"version": "2", "result": [
            {{"bundle": "SRR000001", "status": 200, "files": [{VALID_FILE}]}},
            {{"bundle": "SRR999999", "status": 200, "files": [{VALID_FILE}]}}
        ]}}"#
    ));
    let accessions = validate(&requested(&["SRR000001"]), response).unwrap();
    assert_eq!(accessions.len(), 1);
    assert_eq!(accessions[0].id, "SRR000001");
}

#[rstest]
fn test_duplicate_results_are_rejected() {
    let response = parse(&format!(
        r#"{{"version": "2", "result": [
            {{"bundle": "SRR000001", "status": 200, "files": [{VALID_FILE}]}},
            {{"bundle": "SRR000001", "status": 200, "files": [{VALID_FILE}]}}
        ]}}"#
    ));
    let accessions = validate(&requested(&["SRR000001"]), response).unwrap();
    assert_eq!(accessions.len(), 1);
    assert!(accessions[0].files.is_empty());
    assert!(accessions[0].error_log.contains("more than once"));
}

#[rstest]
fn test_refused_accession_keeps_its_message() {
    let response = parse(
        r#"{"version": "2", "result": [
            {"bundle": "SRR000002", "status": 403, "msg": "denied"}
        ]}"#,
    );
    let accessions = validate(&requested(&["SRR000002"]), response).unwrap();
    assert_eq!(accessions.len(), 1);
    assert!(accessions[0].files.is_empty());
    assert!(accessions[0].error_log.contains("denied"));
}

#[rstest]
fn test_accession_without_files_is_an_error() {
    let response = parse(
        r#"{"version": "2", "result": [
            {"bundle": "SRR000001", "status": 200, "files": []}
        ]}"#,
    );
    let accessions = validate(&requested(&["SRR000001"]), response).unwrap();
    assert!(accessions[0].has_errors());
    assert!(accessions[0].files.is_empty());
}

#[rstest]
#[case::empty_name(r#"{"name": "", "type": "bam", "locations": [{"link": "u", "service": "s3", "region": "r"}]}"#)]
#[case::empty_type(r#"{"name": "data.bam", "type": "", "locations": [{"link": "u", "service": "s3", "region": "r"}]}"#)]
#[case::no_locations(r#"{"name": "data.bam", "type": "bam", "locations": []}"#)]
#[case::two_locations(r#"{"name": "data.bam", "type": "bam", "locations": [
    {"link": "u", "service": "s3", "region": "r"},
    {"link": "v", "service": "gs", "region": "r"}
]}"#)]
#[case::incomplete_location(r#"{"name": "data.bam", "type": "bam", "locations": [{"link": "u", "service": "", "region": "r"}]}"#)]
#[case::pay_without_bucket(r#"{"name": "data.bam", "type": "bam", "locations": [
    {"link": "u", "service": "s3", "region": "r", "payRequired": true, "bucket": "", "key": "k"}
]}"#)]
fn test_invalid_files_empty_the_accession(#[case] file: &str) {
    let response = parse(&format!(
        r#"{{"version": "2", "result": [
            {{"bundle": "SRR000001", "status": 200, "files": [{file}]}}
        ]}}"#
    ));
    let accessions = validate(&requested(&["SRR000001"]), response).unwrap();
    assert_eq!(accessions.len(), 1);
    assert!(accessions[0].files.is_empty());
    assert!(accessions[0].has_errors());
}

#[rstest]
fn test_one_bad_accession_does_not_spoil_the_other() {
    let response = parse(&format!(
        r#"{{"version": "2", "result": [
            {{"bundle": "SRR000001", "status": 200, "files": [{VALID_FILE}]}},
            {{"bundle": "SRR000002", "status": 403, "msg": "denied"}}
        ]}}"#
    ));
    let accessions = validate(&requested(&["SRR000001", "SRR000002"]), response).unwrap();
    assert_eq!(accessions.len(), 2);
    assert!(!accessions[0].has_errors());
    assert!(accessions[1].has_errors());
}

#[rstest]
fn test_requester_pays_location() {
    let response = parse(
        r#"{"version": "2", "result": [
            {"bundle": "SRR000001", "status": 200, "files": [{
                "name": "data.bam",
                "type": "bam",
                "size": 42,
                "locations": [{
                    "link": "https://b.s3.amazonaws.com/k",
                    "service": "s3",
                    "region": "us-east-1",
                    "payRequired": true,
                    "bucket": "b",
                    "key": "k"
                }]
            }]}
        ]}"#,
    );
    let accessions = validate(&requested(&["SRR000001"]), response).unwrap();
    match accessions[0].files[0].location.as_ref().unwrap() {
        Location::RequesterPays {
            bucket,
            key,
            region,
            service,
        } => {
            assert_eq!(bucket, "b");
            assert_eq!(key, "k");
            assert_eq!(region, "us-east-1");
            assert_eq!(service, "s3");
        }
        other => panic!("expected requester-pays, got {other:?}"),
    }
}

#[rstest]
fn test_credential_scoped_reply_accepts_everything() {
    let response = parse(&format!(
        r#"{{"version": "2", "result": [
            {{"bundle": "SRR000007", "status": 200, "files": [{VALID_FILE}]}}
        ]}}"#
    ));
    let accessions = validate(&[], response).unwrap();
    assert_eq!(accessions.len(), 1);
    assert_eq!(accessions[0].id, "SRR000007");
}
