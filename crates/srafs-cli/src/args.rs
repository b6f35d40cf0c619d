// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::prelude::*;

const SRAFS_LOG: &str = "SRAFS_LOG";

/// Command line flags for configuring log output
#[derive(Debug, Clone, clap::Args)]
pub struct Logging {
    /// Make output more verbose, can be specified more than once
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Shorthand for debug-level logging
    #[clap(long, global = true, conflicts_with = "silent")]
    pub debug: bool,

    /// Suppress all output except errors
    #[clap(long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    /// Additionally log output to the provided file
    #[clap(long, global = true, env = "SRAFS_LOG_FILE", value_hint = clap::ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,
}

impl Logging {
    fn show_target(&self) -> bool {
        self.verbose > 2
    }

    /// Configure the process-wide tracing subscriber from these
    /// flags, with `SRAFS_LOG` and `RUST_LOG` overrides honored.
    pub fn configure(&self) {
        let mut config = if self.silent {
            "error".to_string()
        } else if self.debug {
            "srafs=debug,info".to_string()
        } else {
            match self.verbose {
                0 => std::env::var(SRAFS_LOG).unwrap_or_else(|_| "srafs=info,warn".to_string()),
                1 => "srafs=debug,info".to_string(),
                2 => "srafs=trace,info".to_string(),
                _ => "trace".to_string(),
            }
        };
        if let Ok(overrides) = std::env::var("RUST_LOG") {
            config.push(',');
            config.push_str(&overrides);
        }

        let env_filter = tracing_subscriber::filter::EnvFilter::new(config);
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_target(self.show_target())
            .with_writer(std::io::stderr);
        let file_layer = self.log_file.as_ref().and_then(|path| {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| eprintln!("failed to open log file {path:?}: {err}"))
                .ok()?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        });
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    }
}

/// Find a program in the current PATH, if any.
pub(crate) fn which(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
