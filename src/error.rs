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

//! Error type shared by every codec operation.

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while encoding or decoding an Autocrypt
/// message.
#[derive(Debug,Error)]
pub enum Error {
    /// A header value is missing `addr` or `keydata`, or a field cannot be
    /// generated from the given input.
    #[error("malformed Autocrypt header value: {0}")]
    Grammar(String),

    /// The message carries more than one `Autocrypt` header, so there is no
    /// single sender key to import.
    #[error("ambiguous sender key: message carries {0} Autocrypt headers")]
    AmbiguousHeader(usize),

    /// The message claims to be an Autocrypt message of some kind but its
    /// structure does not match that kind.
    #[error("message does not match its Autocrypt kind: {0}")]
    Classification(String),

    /// None of the recipients has a secret key in the profile.
    #[error("no secret key found for any recipient of {0:?}")]
    KeyNotFound(Vec<String>),

    /// The setup payload names a passphrase format other than `numeric9x4`.
    #[error("unexpected passphrase format {found:?}")]
    FormatMismatch {
        /// The line found where the format tag was expected.
        found: String,
    },

    /// The `Passphrase-Begin` prefix embedded in the setup payload does not
    /// match the passphrase supplied by the caller.
    #[error("passphrase does not start with {expected:?}")]
    PassphraseMismatch {
        /// The prefix embedded in the payload.
        expected: String,
    },

    /// The `Autocrypt-Setup-Message` header is absent or names an
    /// unsupported version.
    #[error("unsupported setup message version {0:?}")]
    VersionMismatch(Option<String>),

    /// The sender is not one of the profile's own accounts.
    #[error("unknown account {0}")]
    UnknownAccount(String),

    /// A recipient has no known key in the profile.
    #[error("unknown peer {0}")]
    UnknownPeer(String),

    /// Raw message text could not be parsed into a message entity.
    #[error("malformed MIME message: {0}")]
    Mime(String),

    /// A typed-in setup code does not have the expected shape.
    #[error("invalid setup code: {0}")]
    InvalidPassphrase(String),

    /// A setup message was decoded without supplying its setup code.
    #[error("a setup code is required to decode a setup message")]
    PassphraseRequired,

    /// Failure reported by the crypto or key-storage collaborator.
    #[error("crypto backend failed: {0}")]
    Crypto(#[source] Box<dyn StdError + Send + Sync>),

    /// I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Wraps an arbitrary collaborator error without altering it.
    pub fn crypto<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Error::Crypto(err.into())
    }
}

#[cfg(feature = "gpg")]
impl From<gpgme::Error> for Error {
    fn from(err: gpgme::Error) -> Self {
        Error::Crypto(Box::new(err))
    }
}
