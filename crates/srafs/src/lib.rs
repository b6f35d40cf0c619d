// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! Core client library for mounting sequence-read accessions.
//!
//! This crate knows how to talk to the SRA Data Locator service,
//! discover the cloud location of the running process, and turn the
//! locator's answers into a validated catalog of accessions and
//! remote files. The filesystem built on top of this data lives in
//! the `srafs-vfs` crate.

#![deny(missing_docs)]

/// The version of this crate, as reported by `srafs version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod catalog;
pub mod locality;
pub mod sdl;

mod config;
pub use self::config::{load_config, Config};
mod error;
pub use error::{errno_for_status, Error, OsError, Result};
