// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! Runtime settings, layered from built-in defaults, the system and
//! user configuration files, and `SRAFS_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigBase, Environment, File};
use serde::{Deserialize, Serialize};

use crate::Result;

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

static SYSTEM_CONFIG: &str = "/etc/srafs.conf";
static USER_CONFIG: &str = "~/.config/srafs/srafs.conf";

/// Settings for the SRA Data Locator service.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sdl {
    /// Full URL of the retrieve endpoint, version included.
    pub endpoint: String,
    /// Number of accessions signed per locator request.
    pub batch: usize,
}

impl Default for Sdl {
    fn default() -> Self {
        Self {
            endpoint: "https://locate.ncbi.nlm.nih.gov/sdl/2/retrieve".to_string(),
            batch: 50,
        }
    }
}

/// Settings for the shared HTTP client used for locator calls and
/// ranged object reads. Metadata probes use their own short-fused
/// client and are not affected by these values.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Http {
    /// Connect timeout in seconds.
    pub connect: u64,
    /// Idle (read) timeout in seconds.
    pub idle: u64,
    /// Idle connections kept per host.
    pub pool: usize,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            connect: 15,
            idle: 20,
            pool: 1000,
        }
    }
}

/// Settings for the ranged-read streaming layer.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Reader {
    /// Seconds before expiry at which a signed URL is refreshed.
    pub window: u64,
    /// Consecutive zero-progress retries before a read fails.
    pub retries: u32,
}

impl Default for Reader {
    fn default() -> Self {
        Self {
            window: 30,
            retries: 10,
        }
    }
}

/// Named AWS credential profile for requester-pays reads.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Aws {
    /// Profile name, or empty for the SDK default chain.
    pub profile: Option<String>,
}

/// Named GCP credential profile. Accepted for parity with the AWS
/// option; requester-pays reads against GCP are refused.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Gcp {
    /// Profile name.
    pub profile: Option<String>,
}

/// Complete configuration for a mount.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Locator service settings.
    pub sdl: Sdl,
    /// HTTP client settings.
    pub http: Http,
    /// Streaming read settings.
    pub reader: Reader,
    /// AWS credential settings.
    pub aws: Aws,
    /// GCP credential settings.
    pub gcp: Gcp,
}

impl Config {
    /// Parse a configuration from an ini-formatted string.
    pub fn load_string<S: AsRef<str>>(conf: S) -> Result<Self> {
        let s = ConfigBase::builder()
            .add_source(File::from_str(conf.as_ref(), config::FileFormat::Ini))
            .build()?;
        Ok(s.try_deserialize()?)
    }

    /// The connect timeout for locator and object-store requests.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http.connect)
    }

    /// The idle timeout for locator and object-store requests.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.http.idle)
    }

    /// How close to expiry a signed URL may be before it is
    /// refreshed rather than used.
    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reader.window as i64)
    }
}

/// Load the srafs configuration from disk.
///
/// This includes the default, user and system configurations, if
/// they exist, with `SRAFS_*` environment variables layered on top.
pub fn load_config() -> Result<Config> {
    let user_config = PathBuf::from(shellexpand::tilde(USER_CONFIG).into_owned());

    let mut builder = ConfigBase::builder().add_source(
        File::with_name(SYSTEM_CONFIG)
            .format(config::FileFormat::Ini)
            .required(false),
    );
    if let Some(name) = user_config.to_str() {
        builder = builder.add_source(
            File::with_name(name)
                .format(config::FileFormat::Ini)
                .required(false),
        );
    }
    let s = builder
        .add_source(Environment::with_prefix("SRAFS").separator("_"))
        .build()?;
    Ok(s.try_deserialize()?)
}
