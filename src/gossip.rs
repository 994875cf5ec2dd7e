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

//! Gossip: propagating recipients' keys to each other inside the encrypted
//! body of a message.
//!
//! A gossip header carries only `addr` and `keydata`. Any `prefer-encrypt`
//! attribute found on one is ignored.

use tracing::{debug, instrument};

use crate::error::Result;
use crate::header::{self, HeaderValue, AUTOCRYPT_GOSSIP};
use crate::mime::Message;
use crate::profile::{KeyRing, PeerStore};

/// Renders one gossip header value.
pub fn gossip_header_value(addr: &str, keydata: &str) -> Result<String> {
    header::generate_header_value(addr, keydata, None)
}

/// Renders a gossip header value for every recipient, using the keys the
/// profile knows for them.
pub fn gossip_header_values<K: KeyRing>(profile: &mut K, recipients: &[String])
                                        -> Result<Vec<String>> {
    recipients.iter()
        .map(|r| {
            debug!(recipient = %r, "generating gossip header");
            let keydata = profile.peer_keydata(r)?;
            gossip_header_value(r, &keydata)
        })
        .collect()
}

/// Builds the plaintext inner message of a gossip-bearing message: `body`
/// as `text/plain` with one folded `Autocrypt-Gossip` header per recipient.
pub fn gossip_plaintext_message<K: KeyRing>(
    profile: &mut K, recipients: &[String], body: &str) -> Result<Message>
{
    let mut msg = Message::text(body);
    for value in gossip_header_values(profile, recipients)? {
        msg.add_header(AUTOCRYPT_GOSSIP, &header::header_wrap(&value)?);
    }
    Ok(msg)
}

/// Collects every `Autocrypt-Gossip` header value of `msg`, in header order.
pub fn extract_gossip_values(msg: &Message) -> Vec<String> {
    msg.header_all(AUTOCRYPT_GOSSIP)
        .map(|v| v.trim().to_owned())
        .collect()
}

/// Parses every gossip value and records each key in `store`.
///
/// All values are parsed before anything is stored, so a malformed value
/// leaves the store untouched. Returns the imported addresses.
#[instrument(skip_all, fields(count = values.len()))]
pub fn import_gossip<S: PeerStore>(values: &[String], store: &mut S)
                                   -> Result<Vec<String>> {
    let parsed = values.iter()
        .map(|v| HeaderValue::parse(v))
        .collect::<Result<Vec<_>>>()?;

    let mut imported = Vec::with_capacity(parsed.len());
    for hv in parsed {
        debug!(addr = %hv.addr, "importing keydata from gossip header");
        store.upsert_peer(&hv.addr, &hv.keydata, None)?;
        imported.push(hv.addr);
    }
    Ok(imported)
}
