// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

//! The accession filesystem.
//!
//! Builds a read-only inode tree from a locator catalog and serves
//! it over FUSE, streaming file bytes with ranged HTTP requests
//! against the object store that holds them.

#![deny(missing_docs)]

mod error;
pub use error::{Error, Result};

mod fs;
pub use fs::Filesystem;
mod fuse;
pub use fuse::{Config, Session};
mod inode;
mod reader;
