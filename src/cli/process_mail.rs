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

//! The `process-mail` subcommand: acquire the inbound mail and the server
//! key, stand up the crypto engine, and parse the mail. What to do with the
//! parsed request (whether to countersign, and for whom) is decided by the
//! orchestration layer sitting on top of this.

use std::fs::File;
use std::io::{self, Read};

use log::info;

use super::main::ProcessMailSubcommand;
use crate::crypt::engine::PgpEngine;
use crate::mime::parse;
use crate::support::error::Error;

pub(super) fn run(cmd: ProcessMailSubcommand) -> Result<(), Error> {
    let mail: Box<dyn Read> = match cmd.file {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin()),
    };

    let key = File::open(&cmd.private_key)?;
    let passphrase = match cmd.passphrase {
        Some(passphrase) => passphrase,
        None => rpassword::read_password_from_tty(Some("Key passphrase: "))?,
    };

    let engine = PgpEngine::new(key, &passphrase)?;
    info!("Serving with key {}", engine.fingerprint());

    let mail = parse::parse(mail)?;
    info!(
        "Parsed mail '{}': {}",
        mail.get_subject(),
        if mail.parts.is_empty() {
            format!("{} body bytes", mail.text.len())
        } else {
            format!("{} part(s)", mail.parts.len())
        },
    );

    Ok(())
}
