// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

use std::path::PathBuf;

use miette::{bail, Context, IntoDiagnostic, Result};

use crate::args;

/// Unmount a previously mounted accession filesystem
#[derive(Debug, clap::Args)]
pub struct CmdUnmount {
    /// The mounted location to release
    mountpoint: PathBuf,
}

impl CmdUnmount {
    pub fn run(&mut self) -> Result<i32> {
        let mountpoint = self
            .mountpoint
            .canonicalize()
            .into_diagnostic()
            .wrap_err("Invalid mount point")?;
        let program = if args::which("fusermount3").is_some() {
            "fusermount3"
        } else {
            "fusermount"
        };
        let status = std::process::Command::new(program)
            .arg("-u")
            .arg(&mountpoint)
            .status()
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to run {program}"))?;
        if !status.success() {
            bail!("{program} failed with {status}");
        }
        Ok(0)
    }
}
