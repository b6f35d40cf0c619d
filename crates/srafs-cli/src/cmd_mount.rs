// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fuser::MountOption;
use miette::{bail, Context, IntoDiagnostic, Result};
use srafs::locality::Locality;
use srafs::sdl;
use srafs_vfs::{Config, Filesystem, Session};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::timeout;

use crate::args;

#[cfg(test)]
#[path = "./cmd_mount_test.rs"]
mod cmd_mount_test;

/// Mount a set of accessions at the given path
#[derive(Debug, clap::Args)]
pub struct CmdMount {
    /// Override the detected cloud location (<cloud>.<region>, eg s3.us-east-1)
    #[clap(long)]
    location: Option<String>,

    /// Accessions to mount: a comma or whitespace separated list,
    /// or the path of a file containing one. Empty means whatever
    /// the credential authorizes.
    #[clap(long, short)]
    accession: Option<String>,

    /// Path to an access-credential file
    #[clap(long, alias = "ngc", value_hint = clap::ValueHint::FilePath)]
    token: Option<PathBuf>,

    /// Only expose files of these comma-separated types
    #[clap(long, value_delimiter = ',')]
    filetype: Vec<String>,

    /// Override the locator service endpoint
    #[clap(long)]
    endpoint: Option<String>,

    /// Accessions signed per locator request
    #[clap(long)]
    batch: Option<usize>,

    /// Accept egress charges on these clouds (aws, gcp, or aws,gcp)
    #[clap(long)]
    accept_charges: Option<String>,

    /// Named AWS credential profile for requester-pays reads
    #[clap(long)]
    aws_profile: Option<String>,

    /// Named GCP credential profile
    #[clap(long)]
    gcp_profile: Option<String>,

    /// Options for the mount in the form opt1,opt2=value
    #[clap(long, short, value_delimiter = ',')]
    options: Vec<String>,

    /// The location where to mount the accession tree
    mountpoint: PathBuf,
}

impl CmdMount {
    pub fn run(&mut self) -> Result<i32> {
        let calling_uid = nix::unistd::geteuid();
        let calling_gid = nix::unistd::getegid();
        if calling_uid.is_root() {
            bail!("srafs will not run as root; mount as a regular user");
        }

        let mut settings = srafs::load_config().into_diagnostic()?;
        if let Some(endpoint) = &self.endpoint {
            settings.sdl.endpoint = endpoint.clone();
        }
        if let Some(batch) = self.batch {
            settings.sdl.batch = batch;
        }
        if self.aws_profile.is_some() {
            settings.aws.profile = self.aws_profile.clone();
        }
        if self.gcp_profile.is_some() {
            settings.gcp.profile = self.gcp_profile.clone();
        }

        let accessions = parse_accessions(self.accession.as_deref())?;
        if accessions.is_empty() && self.token.is_none() {
            bail!("nothing to mount: pass --accession, or --token for credential-scoped data");
        }

        let mountpoint = self
            .mountpoint
            .canonicalize()
            .into_diagnostic()
            .wrap_err("Invalid mount point")?;

        let mount_options = self.mount_options()?;

        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .into_diagnostic()
            .wrap_err("Failed to establish runtime")?;

        let locality = match &self.location {
            Some(location) => Locality::forced(location).into_diagnostic()?,
            None => rt
                .block_on(Locality::detect())
                .into_diagnostic()
                .wrap_err("Could not determine cloud location; pass --location to override")?,
        };
        tracing::info!(location = %locality.description(), "resolved locality");

        let credential = match &self.token {
            Some(path) => Some(load_credential(path)?),
            None => None,
        };
        let sdl = Arc::new(
            sdl::Client::new(&settings, locality)
                .into_diagnostic()?
                .with_credential(credential)
                .with_accept_charges(self.accept_charges.clone())
                .with_filetypes((!self.filetype.is_empty()).then(|| self.filetype.clone())),
        );

        tracing::info!(count = accessions.len(), "retrieving catalog");
        let catalog = rt
            .block_on(sdl.retrieve(&accessions))
            .into_diagnostic()
            .wrap_err("Locator retrieval failed")?;
        if catalog.accessions.is_empty() {
            bail!("the locator returned nothing to mount");
        }
        if !catalog.has_files() {
            tracing::warn!("every accession failed validation; mounting error logs only");
        }

        let opts = Config {
            uid: calling_uid.as_raw(),
            gid: calling_gid.as_raw(),
            mount_options,
        };
        tracing::debug!("FUSE Config: {opts:#?}");
        let fs = Arc::new(Filesystem::new(settings, Arc::clone(&sdl), catalog, &opts));

        tracing::debug!("Establishing fuse session...");
        let session = Session::new(Arc::clone(&fs));
        let opts = opts.mount_options.into_iter().collect::<Vec<_>>();
        let mut fuser_session = fuser::Session::new(session, &mountpoint, &opts)
            .into_diagnostic()
            .wrap_err("Failed to create a FUSE session")?;

        let result = rt.block_on(async move {
            let mut interrupt = signal(SignalKind::interrupt())
                .into_diagnostic()
                .wrap_err("interrupt signal handler")?;
            let mut terminate = signal(SignalKind::terminate())
                .into_diagnostic()
                .wrap_err("terminate signal handler")?;
            let mut usr1 = signal(SignalKind::user_defined1())
                .into_diagnostic()
                .wrap_err("diagnostic signal handler")?;

            tracing::info!("Starting FUSE filesystem");
            let unmount_callable = Arc::new(std::sync::Mutex::new(fuser_session.unmount_callable()));
            let mut join_handle = tokio::task::spawn_blocking(move || fuser_session.run());

            let res: Result<()> = loop {
                tokio::select! {
                    res = &mut join_handle => {
                        tracing::info!("Filesystem shutting down");
                        break res
                            .into_diagnostic()
                            .wrap_err("FUSE session failed")
                            .and_then(|inner| inner.into_diagnostic().wrap_err("FUSE session failed"));
                    }
                    _ = terminate.recv() => {
                        tracing::info!("Terminate signal received, filesystem shutting down");
                        break Ok(());
                    }
                    _ = interrupt.recv() => {
                        tracing::info!("Interrupt signal received, filesystem shutting down");
                        break Ok(());
                    }
                    _ = usr1.recv() => {
                        tracing::info!(state = %fs.diagnostics(), "diagnostic signal received");
                        release_memory();
                    }
                }
            };

            // the filesystem task must be terminated for the unmount
            // to complete, otherwise this process lingers forever
            if !join_handle.is_finished() {
                unmount_callable
                    .lock()
                    .expect("unmounter lock poisoned")
                    .unmount()
                    .into_diagnostic()
                    .wrap_err("FUSE unmount failed")?;
                tracing::trace!("Joining FUSE session");
                match timeout(Duration::from_secs(5), join_handle).await {
                    Ok(joined) => {
                        joined
                            .into_diagnostic()
                            .wrap_err("FUSE join failed")?
                            .into_diagnostic()
                            .wrap_err("FUSE session failed after unmount")?;
                    }
                    Err(_) => {
                        tracing::warn!("FUSE session join timed out");
                    }
                }
            }
            res
        });

        // long running tasks may still be waiting on signals that
        // will never come; don't block forever on runtime drop
        rt.shutdown_timeout(Duration::from_secs(2));
        result?;
        Ok(0)
    }

    fn mount_options(&self) -> Result<HashSet<MountOption>> {
        let mut options: HashSet<MountOption> = [
            MountOption::RO,
            MountOption::NoDev,
            MountOption::NoSuid,
            MountOption::FSName("srafs".into()),
        ]
        .into_iter()
        .collect();
        if !fuse3_available() {
            // the nonempty option became a default and was removed in
            // fuse3 but is still needed for fuse2
            options.insert(MountOption::CUSTOM("nonempty".into()));
        }
        for option in parse_options_from_args(&self.options) {
            match option {
                MountOption::RW => bail!("this filesystem is read-only; rw is not supported"),
                MountOption::CUSTOM(opt) => {
                    bail!("Unsupported mount option, or missing value: {opt}")
                }
                other => {
                    options.insert(other);
                }
            }
        }
        Ok(options)
    }
}

fn load_credential(path: &Path) -> Result<sdl::Credential> {
    let bytes = std::fs::read(path)
        .into_diagnostic()
        .wrap_err("Failed to read credential file")?;
    let name = path
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or("credential.ngc")
        .to_string();
    Ok(sdl::Credential { name, bytes })
}

/// Accept a comma/whitespace separated accession list, or the path
/// of a file holding one. Order is preserved, repeats are dropped.
fn parse_accessions(raw: Option<&str>) -> Result<Vec<String>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let text = if Path::new(raw).is_file() {
        std::fs::read_to_string(raw)
            .into_diagnostic()
            .wrap_err("Failed to read accession file")?
    } else {
        raw.to_string()
    };
    let mut seen = HashSet::new();
    let mut accessions = Vec::new();
    for token in text.split([',', ' ', '\t', '\n', '\r']) {
        let token = token.trim();
        if !token.is_empty() && seen.insert(token.to_string()) {
            accessions.push(token.to_string());
        }
    }
    Ok(accessions)
}

fn release_memory() {
    #[cfg(target_env = "gnu")]
    // Safety: malloc_trim only walks the allocator's own free lists
    unsafe {
        libc::malloc_trim(0);
    }
}

/// Copies from the private [`fuser::MountOption::from_str`]
fn parse_options_from_args(args: &[String]) -> Vec<MountOption> {
    args.iter()
        .map(|s| match s.as_str() {
            "auto_unmount" => MountOption::AutoUnmount,
            "allow_other" => MountOption::AllowOther,
            "allow_root" => MountOption::AllowRoot,
            "default_permissions" => MountOption::DefaultPermissions,
            "dev" => MountOption::Dev,
            "nodev" => MountOption::NoDev,
            "suid" => MountOption::Suid,
            "nosuid" => MountOption::NoSuid,
            "ro" => MountOption::RO,
            "rw" => MountOption::RW,
            "exec" => MountOption::Exec,
            "noexec" => MountOption::NoExec,
            "atime" => MountOption::Atime,
            "noatime" => MountOption::NoAtime,
            "dirsync" => MountOption::DirSync,
            "sync" => MountOption::Sync,
            "async" => MountOption::Async,
            x if x.starts_with("fsname=") => MountOption::FSName(x[7..].into()),
            x if x.starts_with("subtype=") => MountOption::Subtype(x[8..].into()),
            x => MountOption::CUSTOM(x.into()),
        })
        .collect()
}

/// Checks if fusermount3 is available to be used on this system
fn fuse3_available() -> bool {
    args::which("fusermount3").is_some()
}
