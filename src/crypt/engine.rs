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

//! The cryptographic envelope around the OpenPGP primitive library.
//!
//! `PgpEngine` holds the service's own key pair for the lifetime of the
//! process and enforces the gateway's policy on every inbound message:
//! mandatory encryption, mandatory signature, and sender-identity binding.
//! All other key material (client, sender, recipient) is supplied fresh per
//! call and never cached.
//!
//! The engine is immutable after construction and the underlying library
//! derives a fresh key pair for each primitive call, so a single engine can
//! be shared across concurrent request flows without locking.

use std::fmt;
use std::io::{self, Read, Write};

use sequoia_openpgp as openpgp;

use openpgp::armor;
use openpgp::cert::prelude::*;
use openpgp::crypto::{KeyPair, Password, SessionKey};
use openpgp::packet::signature::SignatureBuilder;
use openpgp::packet::{key, Key, Packet, PKESK, SKESK};
use openpgp::parse::{
    stream::{
        DecryptionHelper, DecryptorBuilder, DetachedVerifierBuilder,
        MessageLayer, MessageStructure, VerificationError, VerificationHelper,
        VerificationResult,
    },
    Parse,
};
use openpgp::policy::StandardPolicy;
use openpgp::serialize::{
    stream::{Armorer, Encryptor, LiteralWriter, Message, Signer},
    Serialize,
};
use openpgp::types::{SignatureType, SymmetricAlgorithm};
use openpgp::{Cert, Fingerprint, KeyHandle};

use crate::support::error::Error;

/// The gateway's cryptographic engine.
///
/// Created once at startup from the server's private key material; the
/// secrets are decrypted in place at construction and retained in memory
/// for the lifetime of the engine.
pub struct PgpEngine {
    cert: Cert,
    policy: StandardPolicy<'static>,
}

impl PgpEngine {
    /// Creates an engine from the server's key material, armored or binary.
    ///
    /// Fails with `Error::NoPrivateKey` if the material carries no secret
    /// key at all, and with `Error::BadPassphrase` if `passphrase` does not
    /// decrypt the secrets.
    pub fn new(
        key: impl Read + Send + Sync,
        passphrase: &str,
    ) -> Result<Self, Error> {
        let cert = Cert::from_reader(key)?;
        let password = Password::from(passphrase);

        let mut unlocked: Vec<Packet> = Vec::new();
        if let Ok(primary) =
            cert.primary_key().key().clone().parts_into_secret()
        {
            unlocked.push(Packet::SecretKey(unlock(primary, &password)?));
        }
        for ka in cert.keys().subkeys().secret() {
            let subkey = ka.key().clone().role_into_subordinate();
            unlocked.push(Packet::SecretSubkey(unlock(subkey, &password)?));
        }
        if unlocked.is_empty() {
            return Err(Error::NoPrivateKey);
        }

        let cert = cert.insert_packets(unlocked)?;
        log::info!("Server key {} unlocked", cert.fingerprint());

        Ok(PgpEngine {
            cert,
            policy: StandardPolicy::new(),
        })
    }

    /// The fingerprint of the server's primary key.
    pub fn fingerprint(&self) -> Fingerprint {
        self.cert.fingerprint()
    }

    /// Certifies the identity matching `email` on the public key read from
    /// `key`, writing the re-armored key with the added signature to `out`.
    ///
    /// Identities are matched by exact email-address equality; the first
    /// match in key-material order wins. Fails with
    /// `Error::UnknownIdentity` if no identity matches.
    pub fn sign_user_id(
        &self,
        email: &str,
        key: impl Read + Send + Sync,
        out: &mut dyn Write,
    ) -> Result<(), Error> {
        let client = Cert::from_reader(key)?;
        let userid = client
            .userids()
            .find(|ua| {
                ua.userid().email().ok().flatten().as_deref() == Some(email)
            })
            .map(|ua| ua.userid().clone())
            .ok_or(Error::UnknownIdentity)?;

        let mut signer = self.certification_keypair()?;
        let sig = SignatureBuilder::new(SignatureType::GenericCertification)
            .sign_userid_binding(
                &mut signer,
                client.primary_key().key(),
                &userid,
            )?;
        let client = client.insert_packets(vec![Packet::from(sig)])?;
        client.armored().serialize(out)?;
        Ok(())
    }

    /// Signs `message` with the server key, writing an armored detached
    /// signature to `out`.
    pub fn sign_message(
        &self,
        mut message: impl Read,
        out: impl Write + Send + Sync,
    ) -> Result<(), Error> {
        let keypair = self.signing_keypair()?;
        let sink = Message::new(out);
        let sink = Armorer::new(sink).kind(armor::Kind::Signature).build()?;
        let mut sink = Signer::new(sink, keypair).detached().build()?;
        io::copy(&mut message, &mut sink)?;
        sink.finalize()?;
        Ok(())
    }

    /// Checks a detached signature over `message` against exactly the one
    /// key read from `signer_key`.
    ///
    /// A signature made by any other key fails with
    /// `Error::UnknownIssuer`.
    pub fn check_message_signature(
        &self,
        message: impl Read + Send + Sync,
        signature: impl Read + Send + Sync,
        signer_key: impl Read + Send + Sync,
    ) -> Result<(), Error> {
        let signer = Cert::from_reader(signer_key)?;
        let mut verifier = DetachedVerifierBuilder::from_reader(signature)?
            .with_policy(
                &self.policy,
                None,
                SignatureCheck { sender: signer },
            )?;
        verifier.verify_reader(message)?;
        Ok(())
    }

    /// Encrypts `message` for the recipient key read from `recipient_key`,
    /// signed with the server key so the result is self-authenticating,
    /// and writes the armored ciphertext to `out`.
    pub fn encrypt_message(
        &self,
        mut message: impl Read,
        recipient_key: impl Read + Send + Sync,
        out: impl Write + Send + Sync,
    ) -> Result<(), Error> {
        let recipient = Cert::from_reader(recipient_key)?;
        let keypair = self.signing_keypair()?;
        let recipients = recipient
            .keys()
            .with_policy(&self.policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_transport_encryption()
            .for_storage_encryption();

        let sink = Message::new(out);
        let sink = Armorer::new(sink).build()?;
        let sink = Encryptor::for_recipients(sink, recipients).build()?;
        let sink = Signer::new(sink, keypair).build()?;
        let mut sink = LiteralWriter::new(sink).build()?;
        io::copy(&mut message, &mut sink)?;
        sink.finalize()?;
        Ok(())
    }

    /// Decrypts a message addressed to the server and proves it was both
    /// encrypted and signed by exactly the sender key read from
    /// `sender_key`.
    ///
    /// Policy, evaluated in this order: the message must be encrypted
    /// (`Error::MessageNotEncrypted`), must carry a signature
    /// (`Error::MessageNotSigned`), and the signature must have been made
    /// by a key of the supplied sender certificate
    /// (`Error::UnknownIssuer`).
    ///
    /// Plaintext is streamed to `out` as it is decrypted, but the validity
    /// of the signature over the whole body can only be established once
    /// the body has been fully consumed. `out` may therefore receive the
    /// complete plaintext before verification concludes: a non-error
    /// return from this method is the only confirmation that the content
    /// is verified, and partially drained output must not be treated as
    /// such.
    pub fn decrypt_signed_message(
        &self,
        message: impl Read + Send + Sync,
        out: &mut dyn Write,
        sender_key: impl Read + Send + Sync,
    ) -> Result<(), Error> {
        let sender = Cert::from_reader(sender_key)?;
        let helper = GatewayHelper {
            sender,
            keys: self.decryption_keypairs()?,
            fingerprint: self.cert.fingerprint(),
            failure: None,
        };
        let mut decryptor = DecryptorBuilder::from_reader(message)?
            .with_policy(&self.policy, None, helper)?;
        if let Err(e) = io::copy(&mut decryptor, out) {
            // Once plaintext has started streaming, errors from the
            // verification callbacks come out of the reader as opaque
            // `io::Error`s. The helper kept the precise policy verdict.
            return Err(match decryptor.helper_mut().failure.take() {
                Some(failure) => failure,
                None => e.into(),
            });
        }
        Ok(())
    }

    fn certification_keypair(&self) -> Result<KeyPair, Error> {
        let ka = self
            .cert
            .keys()
            .unencrypted_secret()
            .with_policy(&self.policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_certification()
            .next()
            .ok_or(Error::NoPrivateKey)?;
        Ok(ka.key().clone().into_keypair()?)
    }

    fn signing_keypair(&self) -> Result<KeyPair, Error> {
        let ka = self
            .cert
            .keys()
            .unencrypted_secret()
            .with_policy(&self.policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_signing()
            .next()
            .ok_or(Error::NoPrivateKey)?;
        Ok(ka.key().clone().into_keypair()?)
    }

    fn decryption_keypairs(&self) -> Result<Vec<KeyPair>, Error> {
        let mut keys = Vec::new();
        for ka in self
            .cert
            .keys()
            .unencrypted_secret()
            .with_policy(&self.policy, None)
            .supported()
            .for_storage_encryption()
            .for_transport_encryption()
        {
            keys.push(ka.key().clone().into_keypair()?);
        }
        if keys.is_empty() {
            return Err(Error::NoPrivateKey);
        }
        Ok(keys)
    }
}

impl fmt::Debug for PgpEngine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PgpEngine({})", self.cert.fingerprint())
    }
}

fn unlock<R: key::KeyRole>(
    key: Key<key::SecretParts, R>,
    password: &Password,
) -> Result<Key<key::SecretParts, R>, Error> {
    if key.secret().is_encrypted() {
        key.decrypt_secret(password)
            .map_err(|_| Error::BadPassphrase)
    } else {
        Ok(key)
    }
}

/// Walks the signature results of a message layer, accepting the first good
/// signature and mapping "the signer is not the supplied key" onto
/// `Error::UnknownIssuer`.
fn evaluate_signatures(
    results: Vec<VerificationResult<'_>>,
) -> Result<(), Error> {
    if results.is_empty() {
        return Err(Error::MessageNotSigned);
    }

    let mut unknown_issuer = false;
    let mut first_error: Option<Error> = None;
    for result in results {
        match result {
            Ok(_) => return Ok(()),
            Err(VerificationError::MissingKey { .. })
            | Err(VerificationError::UnboundKey { .. }) => {
                unknown_issuer = true;
            },
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(Error::Pgp(anyhow::anyhow!("{}", e)));
                }
            },
        }
    }

    if unknown_issuer {
        Err(Error::UnknownIssuer)
    } else {
        Err(first_error.unwrap_or(Error::UnknownIssuer))
    }
}

/// Verification side of `check_message_signature`: the detached signature
/// must check out against the one supplied sender certificate.
struct SignatureCheck {
    sender: Cert,
}

impl VerificationHelper for SignatureCheck {
    fn get_certs(
        &mut self,
        _ids: &[KeyHandle],
    ) -> openpgp::Result<Vec<Cert>> {
        Ok(vec![self.sender.clone()])
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        let mut results = Vec::new();
        for layer in structure.into_iter() {
            if let MessageLayer::SignatureGroup { results: r } = layer {
                results.extend(r);
            }
        }
        Ok(evaluate_signatures(results)?)
    }
}

/// Decryption and verification side of `decrypt_signed_message`,
/// implementing the gateway policy in its fixed order.
struct GatewayHelper {
    sender: Cert,
    keys: Vec<KeyPair>,
    fingerprint: Fingerprint,
    /// The policy verdict, kept where `decrypt_signed_message` can still
    /// reach it after the decryptor has wrapped the returned error in an
    /// opaque `io::Error`.
    failure: Option<Error>,
}

impl VerificationHelper for GatewayHelper {
    fn get_certs(
        &mut self,
        _ids: &[KeyHandle],
    ) -> openpgp::Result<Vec<Cert>> {
        Ok(vec![self.sender.clone()])
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        let mut encrypted = false;
        let mut results = Vec::new();
        for layer in structure.into_iter() {
            match layer {
                MessageLayer::Encryption { .. } => encrypted = true,
                MessageLayer::Compression { .. } => (),
                MessageLayer::SignatureGroup { results: r } => {
                    results.extend(r);
                },
            }
        }

        let verdict = if !encrypted {
            Err(Error::MessageNotEncrypted)
        } else {
            evaluate_signatures(results)
        };
        match verdict {
            Ok(()) => Ok(()),
            Err(e) => {
                self.failure = Some(match &e {
                    Error::MessageNotEncrypted => Error::MessageNotEncrypted,
                    Error::MessageNotSigned => Error::MessageNotSigned,
                    Error::UnknownIssuer => Error::UnknownIssuer,
                    other => Error::Pgp(anyhow::anyhow!("{}", other)),
                });
                Err(e.into())
            },
        }
    }
}

impl DecryptionHelper for GatewayHelper {
    fn decrypt<D>(
        &mut self,
        pkesks: &[PKESK],
        _skesks: &[SKESK],
        sym_algo: Option<SymmetricAlgorithm>,
        mut decrypt: D,
    ) -> openpgp::Result<Option<Fingerprint>>
    where
        D: FnMut(SymmetricAlgorithm, &SessionKey) -> bool,
    {
        // Try each session-key packet against each of the server's
        // encryption keys until one opens.
        let mut recipient = None;
        'outer: for pkesk in pkesks {
            for pair in &mut self.keys {
                if pair.public().keyid() != *pkesk.recipient() {
                    continue;
                }
                if pkesk
                    .decrypt(pair, sym_algo)
                    .map(|(algo, session_key)| decrypt(algo, &session_key))
                    .unwrap_or(false)
                {
                    recipient = Some(self.fingerprint.clone());
                    break 'outer;
                }
            }
        }

        Ok(recipient)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::super::test_keys;
    use super::*;

    const PLAINTEXT: &[u8] = b"Please certify my key.";
    const PASSPHRASE: &str = "correct horse battery staple";

    fn server_engine() -> (PgpEngine, Cert) {
        let cert = test_keys::generate_locked(
            "countersign@server.local",
            PASSPHRASE,
        );
        let engine =
            PgpEngine::new(&test_keys::armored_tsk(&cert)[..], PASSPHRASE)
                .unwrap();
        (engine, cert)
    }

    fn client_engine(email: &str) -> (PgpEngine, Cert) {
        let cert = test_keys::generate(email);
        let engine =
            PgpEngine::new(&test_keys::armored_tsk(&cert)[..], "").unwrap();
        (engine, cert)
    }

    /// Encrypts without signing, which the engine itself refuses to do.
    fn encrypt_unsigned(recipient: &Cert, plaintext: &[u8]) -> Vec<u8> {
        let policy = StandardPolicy::new();
        let mut out = Vec::new();
        let recipients = recipient
            .keys()
            .with_policy(&policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_transport_encryption()
            .for_storage_encryption();
        let message = Message::new(&mut out);
        let message = Armorer::new(message).build().unwrap();
        let message =
            Encryptor::for_recipients(message, recipients).build().unwrap();
        let mut message = LiteralWriter::new(message).build().unwrap();
        message.write_all(plaintext).unwrap();
        message.finalize().unwrap();
        out
    }

    /// Signs without encrypting.
    fn sign_unencrypted(signer_cert: &Cert, plaintext: &[u8]) -> Vec<u8> {
        let policy = StandardPolicy::new();
        let mut out = Vec::new();
        let keypair = signer_cert
            .keys()
            .unencrypted_secret()
            .with_policy(&policy, None)
            .supported()
            .for_signing()
            .next()
            .unwrap()
            .key()
            .clone()
            .into_keypair()
            .unwrap();
        let message = Message::new(&mut out);
        let message = Armorer::new(message).build().unwrap();
        let message = Signer::new(message, keypair).build().unwrap();
        let mut message = LiteralWriter::new(message).build().unwrap();
        message.write_all(plaintext).unwrap();
        message.finalize().unwrap();
        out
    }

    #[test]
    fn construct_with_wrong_passphrase_fails() {
        let cert = test_keys::generate_locked("server@x", PASSPHRASE);
        let result =
            PgpEngine::new(&test_keys::armored_tsk(&cert)[..], "wrong");
        assert_matches!(Err(Error::BadPassphrase), result);
    }

    #[test]
    fn construct_without_private_key_fails() {
        let cert = test_keys::generate("server@x");
        let result = PgpEngine::new(
            &test_keys::armored_public(&cert)[..],
            PASSPHRASE,
        );
        assert_matches!(Err(Error::NoPrivateKey), result);
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let (server, server_cert) = server_engine();
        let (client, client_cert) = client_engine("client@example.org");

        let mut ciphertext = Vec::new();
        server
            .encrypt_message(
                PLAINTEXT,
                &test_keys::armored_public(&client_cert)[..],
                &mut ciphertext,
            )
            .unwrap();

        let mut plaintext = Vec::new();
        client
            .decrypt_signed_message(
                &ciphertext[..],
                &mut plaintext,
                &test_keys::armored_public(&server_cert)[..],
            )
            .unwrap();
        assert_eq!(PLAINTEXT, &plaintext[..]);
    }

    #[test]
    fn decrypt_unsigned_message_fails() {
        let (server, _) = server_engine();
        let client_cert = test_keys::generate("client@example.org");
        let ciphertext = encrypt_unsigned(&server.cert, PLAINTEXT);

        let mut out = Vec::new();
        let result = server.decrypt_signed_message(
            &ciphertext[..],
            &mut out,
            &test_keys::armored_public(&client_cert)[..],
        );
        assert_matches!(Err(Error::MessageNotSigned), result);
    }

    #[test]
    fn decrypt_unencrypted_message_fails() {
        let (server, _) = server_engine();
        let client_cert = test_keys::generate("client@example.org");
        let signed = sign_unencrypted(&client_cert, PLAINTEXT);

        let mut out = Vec::new();
        let result = server.decrypt_signed_message(
            &signed[..],
            &mut out,
            &test_keys::armored_public(&client_cert)[..],
        );
        assert_matches!(Err(Error::MessageNotEncrypted), result);
    }

    #[test]
    fn decrypt_with_wrong_sender_fails() {
        let (server, _) = server_engine();
        let (client, client_cert) = client_engine("client@example.org");
        let impostor = test_keys::generate("impostor@example.org");

        let mut ciphertext = Vec::new();
        server
            .encrypt_message(
                PLAINTEXT,
                &test_keys::armored_public(&client_cert)[..],
                &mut ciphertext,
            )
            .unwrap();

        // The message really was signed by the server, but the caller
        // claims it came from the impostor.
        let mut out = Vec::new();
        let result = client.decrypt_signed_message(
            &ciphertext[..],
            &mut out,
            &test_keys::armored_public(&impostor)[..],
        );
        assert_matches!(Err(Error::UnknownIssuer), result);
    }

    #[test]
    fn decrypt_tampered_ciphertext_fails() {
        let (server, server_cert) = server_engine();
        let (client, client_cert) = client_engine("client@example.org");

        let mut ciphertext = Vec::new();
        server
            .encrypt_message(
                PLAINTEXT,
                &test_keys::armored_public(&client_cert)[..],
                &mut ciphertext,
            )
            .unwrap();

        // Corrupt one character in the middle of the armored body.
        let mid = ciphertext.len() / 2;
        ciphertext[mid] = if b'A' == ciphertext[mid] { b'B' } else { b'A' };

        let mut out = Vec::new();
        let result = client.decrypt_signed_message(
            &ciphertext[..],
            &mut out,
            &test_keys::armored_public(&server_cert)[..],
        );
        assert!(result.is_err());
    }

    #[test]
    fn policy_error_survives_streamed_decryption() {
        // Larger than what the decryptor will buffer before releasing
        // plaintext, so the verdict only lands after the sink has already
        // received data. The precise error kind must survive that path.
        let (server, _) = server_engine();
        let client_cert = test_keys::generate("client@example.org");
        let plaintext = vec![0u8; 26 << 20];
        let ciphertext = encrypt_unsigned(&server.cert, &plaintext);

        let mut out = Vec::new();
        let result = server.decrypt_signed_message(
            &ciphertext[..],
            &mut out,
            &test_keys::armored_public(&client_cert)[..],
        );
        assert_matches!(Err(Error::MessageNotSigned), result);
    }

    #[test]
    fn debug_formatting_shows_fingerprint() {
        let (server, _) = server_engine();
        assert_eq!(
            format!("PgpEngine({})", server.fingerprint()),
            format!("{:?}", server)
        );
    }

    #[test]
    fn detached_sign_and_check() {
        let (server, server_cert) = server_engine();

        let mut signature = Vec::new();
        server.sign_message(PLAINTEXT, &mut signature).unwrap();
        assert!(signature.starts_with(b"-----BEGIN PGP SIGNATURE-----"));

        server
            .check_message_signature(
                PLAINTEXT,
                &signature[..],
                &test_keys::armored_public(&server_cert)[..],
            )
            .unwrap();
    }

    #[test]
    fn detached_check_with_wrong_key_fails() {
        let (server, _) = server_engine();
        let other = test_keys::generate("other@example.org");

        let mut signature = Vec::new();
        server.sign_message(PLAINTEXT, &mut signature).unwrap();

        let result = server.check_message_signature(
            PLAINTEXT,
            &signature[..],
            &test_keys::armored_public(&other)[..],
        );
        assert_matches!(Err(Error::UnknownIssuer), result);
    }

    #[test]
    fn sign_user_id_unknown_email_fails() {
        let (server, _) = server_engine();
        let client_cert = test_keys::generate("client@example.org");

        let mut out = Vec::new();
        let result = server.sign_user_id(
            "somebody-else@example.org",
            &test_keys::armored_public(&client_cert)[..],
            &mut out,
        );
        assert_matches!(Err(Error::UnknownIdentity), result);
    }

    #[test]
    fn sign_user_id_adds_certification() {
        let (server, _) = server_engine();
        let client_cert = test_keys::generate("client@example.org");

        let mut out = Vec::new();
        server
            .sign_user_id(
                "client@example.org",
                &test_keys::armored_public(&client_cert)[..],
                &mut out,
            )
            .unwrap();

        let signed = Cert::from_bytes(&out).unwrap();
        let userid = signed.userids().next().unwrap();
        assert!(userid.certifications().any(|sig| {
            sig.get_issuers()
                .contains(&KeyHandle::from(server.fingerprint()))
        }));
    }
}
