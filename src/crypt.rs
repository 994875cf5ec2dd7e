//-
// Copyright (c) 2016, Jason Lingle
//
// This file is part of autocrypt-codec.
//
// autocrypt-codec is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// autocrypt-codec is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with autocrypt-codec. If not, see <http://www.gnu.org/licenses/>.

//! Implements the codec's collaborators through GPG.

use std::collections::HashMap;
use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gpgme::{Context, EncryptFlags, ExportMode, Key, PinentryMode, Protocol};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::header::PreferEncrypt;
use crate::profile::{Crypto, KeyRing, PeerStore};

/// A profile backed by the user's GnuPG keyring.
///
/// Own accounts are addresses with a secret key in the keyring; peers are
/// addresses with a public key. Peer preferences learned from `Autocrypt`
/// headers are only kept for the lifetime of the value.
#[derive(Debug)]
pub struct GpgProfile {
    ctx: Context,
    prefer_encrypt: HashMap<String, Option<PreferEncrypt>>,
}

impl GpgProfile {
    /// Creates a `GpgProfile` on the default GnuPG home.
    pub fn new() -> Result<GpgProfile> {
        let mut ctx = Context::from_protocol(Protocol::OpenPgp)?;
        ctx.set_armor(true);
        Ok(GpgProfile { ctx, prefer_encrypt: HashMap::new() })
    }

    /// The preference most recently recorded for `addr`, if any.
    pub fn prefer_encrypt(&self, addr: &str) -> Option<PreferEncrypt> {
        self.prefer_encrypt.get(&addr.to_lowercase()).copied().flatten()
    }

    fn public_keys(&mut self, addr: &str) -> Result<Vec<Key>> {
        let keys = self.ctx.find_keys(vec![format!("<{}>", addr)])?
            .collect::<gpgme::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn secret_keys(&mut self, addr: &str) -> Result<Vec<Key>> {
        let keys = self.ctx.find_secret_keys(vec![format!("<{}>", addr)])?
            .collect::<gpgme::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn first_public_key(&mut self, addr: &str) -> Result<Key> {
        self.public_keys(addr)?.into_iter().next()
            .ok_or_else(|| Error::UnknownPeer(addr.to_owned()))
    }

    fn first_secret_key(&mut self, addr: &str) -> Result<Key> {
        self.secret_keys(addr)?.into_iter().next()
            .ok_or_else(|| Error::UnknownAccount(addr.to_owned()))
    }

    /// Exports `key` unarmored, as base64 keydata.
    fn keydata(&mut self, key: &Key) -> Result<String> {
        let mut out = Vec::new();
        self.ctx.set_armor(false);
        let res = self.ctx.export_keys(Some(key), ExportMode::empty(),
                                       &mut out);
        self.ctx.set_armor(true);
        res?;
        Ok(STANDARD.encode(out))
    }

    /// Runs `f` with loopback pinentry answering every passphrase request
    /// with `passphrase`.
    fn with_passphrase<T>(&mut self, passphrase: &str,
                          f: impl FnOnce(&mut Context) -> gpgme::Result<T>)
                          -> Result<T> {
        self.ctx.set_pinentry_mode(PinentryMode::Loopback)?;
        let provider = |_: gpgme::PassphraseRequest<'_>,
                        out: &mut dyn Write| -> gpgme::Result<()> {
            out.write_all(passphrase.as_bytes())?;
            Ok(())
        };
        let res = self.ctx.with_passphrase_provider(provider, f);
        self.ctx.set_pinentry_mode(PinentryMode::Default)?;
        Ok(res?)
    }
}

fn armored(ciphertext: Vec<u8>) -> Result<String> {
    String::from_utf8(ciphertext).map_err(Error::crypto)
}

impl Crypto for GpgProfile {
    type SecretKey = Key;

    #[instrument(skip(self, plaintext))]
    fn sign_and_encrypt(&mut self, plaintext: &[u8], sender: &str,
                        recipients: &[String]) -> Result<String> {
        let signer = self.first_secret_key(sender)?;
        // The sender can read their own copy.
        let mut keys = vec![self.first_public_key(sender)?];
        for recipient in recipients {
            keys.push(self.first_public_key(recipient)?);
        }

        self.ctx.clear_signers();
        self.ctx.add_signer(&signer)?;
        let mut out = Vec::new();
        let (enc, _) = self.ctx.sign_and_encrypt_with_flags(
            &keys, plaintext, &mut out, EncryptFlags::ALWAYS_TRUST)?;

        if let Some(ik) = enc.invalid_recipients().next() {
            return Err(Error::UnknownPeer(
                ik.fingerprint().unwrap_or("???").to_owned()));
        }
        armored(out)
    }

    fn decrypt(&mut self, ciphertext: &str, key: Option<&Key>)
               -> Result<Vec<u8>> {
        // GPG picks the secret key itself; the one found for the recipient
        // only tells us that one is present.
        if let Some(key) = key {
            debug!(fingerprint = key.fingerprint().unwrap_or("???"),
                   "decrypting");
        }
        let mut out = Vec::new();
        self.ctx.decrypt(ciphertext.as_bytes(), &mut out)?;
        Ok(out)
    }

    fn sym_encrypt(&mut self, plaintext: &[u8], passphrase: &str)
                   -> Result<String> {
        let mut out = Vec::new();
        self.with_passphrase(passphrase, |ctx| {
            ctx.encrypt_symmetric(plaintext, &mut out)
        })?;
        armored(out)
    }

    fn sym_decrypt(&mut self, ciphertext: &str, passphrase: &str)
                   -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.with_passphrase(passphrase, |ctx| {
            ctx.decrypt(ciphertext.as_bytes(), &mut out).map(|_| ())
        })?;
        Ok(out)
    }
}

impl KeyRing for GpgProfile {
    fn is_account(&mut self, addr: &str) -> Result<bool> {
        Ok(!self.secret_keys(addr)?.is_empty())
    }

    fn is_peer(&mut self, addr: &str) -> Result<bool> {
        Ok(!self.public_keys(addr)?.is_empty())
    }

    fn own_public_keydata(&mut self, addr: &str) -> Result<String> {
        if !self.is_account(addr)? {
            return Err(Error::UnknownAccount(addr.to_owned()));
        }
        let key = self.first_public_key(addr)?;
        self.keydata(&key)
    }

    fn peer_keydata(&mut self, addr: &str) -> Result<String> {
        let key = self.first_public_key(addr)?;
        self.keydata(&key)
    }

    fn find_secret_key(&mut self, addr: &str) -> Result<Option<Key>> {
        Ok(self.secret_keys(addr)?.into_iter().next())
    }

    fn secret_key_armor(&mut self, addr: &str) -> Result<String> {
        let key = self.first_secret_key(addr)?;
        let mut out = Vec::new();
        self.ctx.export_keys(Some(&key), ExportMode::SECRET, &mut out)?;
        armored(out)
    }
}

impl PeerStore for GpgProfile {
    #[instrument(skip(self, keydata))]
    fn upsert_peer(&mut self, addr: &str, keydata: &str,
                   prefer_encrypt: Option<PreferEncrypt>) -> Result<()> {
        let key = STANDARD.decode(keydata).map_err(Error::crypto)?;
        let res = self.ctx.import(&key[..])?;
        debug!(considered = res.considered(), imported = res.imported(),
               unchanged = res.unchanged(), "imported peer key");
        self.prefer_encrypt.insert(addr.to_lowercase(), prefer_encrypt);
        Ok(())
    }
}
