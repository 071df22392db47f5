//-
// Copyright (c) 2026, the countersign authors
//
// This file is part of countersign.
//
// Countersign is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Countersign is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with countersign. If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Process a single inbound request mail.
    ProcessMail(ProcessMailSubcommand),
}

#[derive(StructOpt)]
pub(super) struct ProcessMailSubcommand {
    /// Path of the mail file; read from standard input when omitted.
    #[structopt(long, parse(from_os_str))]
    pub(super) file: Option<PathBuf>,

    /// Path of the server's private OpenPGP key.
    #[structopt(long, parse(from_os_str))]
    pub(super) private_key: PathBuf,

    /// Passphrase of the private key; prompted for when omitted.
    #[structopt(long)]
    pub(super) passphrase: Option<String>,
}

pub fn main() {
    init_logging();

    let result = match Command::from_args() {
        Command::ProcessMail(cmd) => super::process_mail::run(cmd),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging() {
    let _ = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}][{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message,
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr())
        .apply();
}
