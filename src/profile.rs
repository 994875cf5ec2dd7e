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

//! The collaborators the codec consumes.
//!
//! The codec itself never touches key material or ciphertext internals; it
//! hands bytes to a `Crypto` implementation, looks keys up through a
//! `KeyRing`, and reports learned keys to a `PeerStore`. The production
//! implementation lives in `crypt` (GnuPG); tests provide an in-memory one.
//!
//! All calls are blocking and are made without any internal timeout or
//! retry. Implementations that share storage between threads are
//! responsible for serialising concurrent upserts of the same address.

use crate::error::Result;
use crate::header::PreferEncrypt;

/// Abstracts away public-key and passphrase-based encryption.
pub trait Crypto {
    /// Handle on a secret key that can be passed back to `decrypt`.
    type SecretKey;

    /// Signs `plaintext` with `sender`'s key and encrypts it to every
    /// recipient, returning ASCII-armored ciphertext.
    fn sign_and_encrypt(&mut self, plaintext: &[u8], sender: &str,
                        recipients: &[String]) -> Result<String>;

    /// Decrypts armored ciphertext, optionally with a specific secret key.
    fn decrypt(&mut self, ciphertext: &str, key: Option<&Self::SecretKey>)
               -> Result<Vec<u8>>;

    /// Encrypts `plaintext` under `passphrase`, returning ASCII-armored
    /// ciphertext whose first line is the `BEGIN PGP MESSAGE` armor header.
    fn sym_encrypt(&mut self, plaintext: &[u8], passphrase: &str)
                   -> Result<String>;

    /// Inverse of `sym_encrypt`.
    fn sym_decrypt(&mut self, ciphertext: &str, passphrase: &str)
                   -> Result<Vec<u8>>;
}

/// Key lookup for the local user's accounts and known peers.
///
/// Keydata is the base64 encoding of an unarmored OpenPGP public key, exactly
/// as it travels in an `Autocrypt` header.
pub trait KeyRing: Crypto {
    /// Whether `addr` is one of the user's own accounts.
    fn is_account(&mut self, addr: &str) -> Result<bool>;

    /// Whether a key for `addr` is known.
    fn is_peer(&mut self, addr: &str) -> Result<bool>;

    fn own_public_keydata(&mut self, addr: &str) -> Result<String>;

    fn peer_keydata(&mut self, addr: &str) -> Result<String>;

    /// Returns the secret key for `addr`, if the user has one.
    fn find_secret_key(&mut self, addr: &str)
                       -> Result<Option<Self::SecretKey>>;

    /// Exports the ASCII-armored secret key of an own account.
    fn secret_key_armor(&mut self, addr: &str) -> Result<String>;
}

/// Storage of what is known about peers.
pub trait PeerStore {
    /// Inserts or replaces the key and preference recorded for `addr`.
    fn upsert_peer(&mut self, addr: &str, keydata: &str,
                   prefer_encrypt: Option<PreferEncrypt>) -> Result<()>;
}

/// Everything the encode and decode pipelines need from the caller.
pub trait Profile: KeyRing + PeerStore {}

impl<T: KeyRing + PeerStore> Profile for T {}
