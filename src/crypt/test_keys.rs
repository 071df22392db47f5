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

//! Throwaway key material for the crypto tests.

use sequoia_openpgp as openpgp;

use openpgp::cert::prelude::*;
use openpgp::serialize::Serialize;
use openpgp::Cert;

/// Generates a certification-, signing-, and encryption-capable key with
/// unencrypted secrets.
pub fn generate(email: &str) -> Cert {
    CertBuilder::new()
        .add_userid(email)
        .add_signing_subkey()
        .add_transport_encryption_subkey()
        .generate()
        .unwrap()
        .0
}

/// Like `generate`, but with the secret key material locked behind
/// `passphrase`.
pub fn generate_locked(email: &str, passphrase: &str) -> Cert {
    CertBuilder::new()
        .add_userid(email)
        .add_signing_subkey()
        .add_transport_encryption_subkey()
        .set_password(Some(passphrase.into()))
        .generate()
        .unwrap()
        .0
}

/// The armored transferable secret key of `cert`.
pub fn armored_tsk(cert: &Cert) -> Vec<u8> {
    let mut buf = Vec::new();
    cert.as_tsk().armored().serialize(&mut buf).unwrap();
    buf
}

/// The armored public certificate of `cert`.
pub fn armored_public(cert: &Cert) -> Vec<u8> {
    let mut buf = Vec::new();
    cert.armored().serialize(&mut buf).unwrap();
    buf
}
