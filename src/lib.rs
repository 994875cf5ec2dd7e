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

//! Encoding and decoding of Autocrypt email messages.
//!
//! The crate covers the message-level protocol: the `Autocrypt` header
//! grammar and its folding, PGP/MIME encryption of outbound messages, gossip
//! of recipients' keys, classification and decoding of inbound messages, and
//! the setup message used to move a secret key between devices.
//!
//! Key material, encryption and peer storage are consumed through the traits
//! in `profile`. With the `gpg` feature, `crypt::GpgProfile` implements them
//! on top of GnuPG.
//!
//! Raw message text enters the crate only through `mime::Message::parse`;
//! every other operation works on the parsed `Message`.
//!
//! The crate emits `tracing` events and spans but never installs a
//! subscriber; that is left to the application.

pub mod error;
pub mod mime;
pub mod header;
pub mod profile;
pub mod envelope;
pub mod gossip;
pub mod encode;
pub mod decode;
pub mod setup;
#[cfg(feature = "gpg")]
pub mod crypt;

#[cfg(test)]
mod testing;

pub use crate::decode::{classify, decode_message, Decoded, MessageKind};
pub use crate::encode::{encode_autocrypt_message, encode_gossip_message};
pub use crate::envelope::Envelope;
pub use crate::error::{Error, Result};
pub use crate::header::{HeaderValue, PreferEncrypt};
pub use crate::mime::Message;
pub use crate::profile::{Crypto, KeyRing, PeerStore, Profile};
pub use crate::setup::{build_setup_message, parse_setup_message, Passphrase,
                       Validation};
