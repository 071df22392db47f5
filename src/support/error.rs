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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid or unsupported Content-Type")]
    InvalidContentType,
    #[error("Malformed header line")]
    InvalidHeader,
    #[error("Multipart nesting exceeds the supported depth")]
    NestingTooDeep,
    #[error("Key material contains no private key")]
    NoPrivateKey,
    #[error("Passphrase does not decrypt the private key")]
    BadPassphrase,
    #[error("Message is not encrypted")]
    MessageNotEncrypted,
    #[error("Message is not signed")]
    MessageNotSigned,
    #[error("Signature was not made by the expected key")]
    UnknownIssuer,
    #[error("No identity on the key matches the requested address")]
    UnknownIdentity,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("OpenPGP error: {0}")]
    Pgp(anyhow::Error),
}

// The OpenPGP primitive library surfaces `anyhow::Error`. Policy errors
// raised inside its verification callbacks started out as `Error`, so
// recover the precise kind before falling back to the opaque carrier.
impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<Error>() {
            Ok(e) => e,
            Err(e) => Error::Pgp(e),
        }
    }
}
