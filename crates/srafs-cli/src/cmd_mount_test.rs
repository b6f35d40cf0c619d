// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

use std::io::Write;

use rstest::rstest;

use super::parse_accessions;

#[rstest]
fn test_parse_accessions_none() {
    assert!(parse_accessions(None).unwrap().is_empty());
}

#[rstest]
#[case("SRR000001", &["SRR000001"])]
#[case("SRR000001,SRR000002", &["SRR000001", "SRR000002"])]
#[case("SRR000001, SRR000002\tSRR000003\nSRR000004", &["SRR000001", "SRR000002", "SRR000003", "SRR000004"])]
#[case(",,SRR000001,,", &["SRR000001"])]
fn test_parse_accession_lists(#[case] raw: &str, #[case] expected: &[&str]) {
    assert_eq!(parse_accessions(Some(raw)).unwrap(), expected);
}

#[rstest]
fn test_parse_accessions_deduplicates_in_order() {
    let parsed = parse_accessions(Some("SRR2,SRR1,SRR2,SRR1")).unwrap();
    assert_eq!(parsed, ["SRR2", "SRR1"]);
}

#[rstest]
fn test_parse_accessions_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "SRR000001 SRR000002").unwrap();
    writeln!(file, "SRR000003").unwrap();
    let parsed = parse_accessions(Some(file.path().to_str().unwrap())).unwrap();
    assert_eq!(parsed, ["SRR000001", "SRR000002", "SRR000003"]);
}
