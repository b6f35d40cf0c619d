// Copyright (c) Contributors to the srafs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/ncbi/srafs

use clap::Parser;
use miette::Result;

mod args;
mod cmd_mount;
mod cmd_unmount;

/// Mount sequence-read accessions as a read-only filesystem
#[derive(Debug, Parser)]
#[clap(name = "srafs", version = srafs::VERSION)]
struct Opt {
    #[clap(flatten)]
    logging: args::Logging,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    Mount(cmd_mount::CmdMount),
    Unmount(cmd_unmount::CmdUnmount),
    /// Print version information and exit
    Version,
}

fn main() {
    // because this function exits right away it does not
    // properly handle destruction of data, so we put the actual
    // logic into a separate function/scope
    std::process::exit(main2())
}

fn main2() -> i32 {
    let opt = Opt::parse();
    opt.logging.configure();

    let result: Result<i32> = match opt.command {
        Command::Mount(mut cmd) => cmd.run(),
        Command::Unmount(mut cmd) => cmd.run(),
        Command::Version => {
            println!("srafs {}", srafs::VERSION);
            Ok(0)
        }
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            // the mount process often has no visible stderr, so the
            // failure also goes to the configured log targets
            tracing::error!("{err:?}");
            eprintln!("{err:?}");
            1
        }
    }
}
