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

//! The Autocrypt header-value grammar.
//!
//! An `Autocrypt` or `Autocrypt-Gossip` header value is a `; `-separated list
//! of `key=value` attributes, always emitted in the order `addr`,
//! `prefer-encrypt` (only when set to `mutual`), `keydata`:
//!
//! ```text
//! addr=alice@example.org; prefer-encrypt=mutual; keydata=mQENBFn...
//! ```
//!
//! `keydata` is base64 and may itself end in `=` padding, so attributes are
//! recognised by their `key=` prefix rather than by splitting on every `=`.
//! Because the key is long, the header is folded onto continuation lines; only
//! `keydata` is ever folded, at a fixed column width.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::mime::Message;

/// Header carrying the sender's own key.
pub const AUTOCRYPT: &str = "Autocrypt";
/// Header carrying a third party's key inside an encrypted body.
pub const AUTOCRYPT_GOSSIP: &str = "Autocrypt-Gossip";
/// Header marking a setup message; its value is the version tag.
pub const AUTOCRYPT_SETUP_MESSAGE: &str = "Autocrypt-Setup-Message";
/// Directive line injected into the secret key of a setup message.
pub const AUTOCRYPT_PREFER_ENCRYPT: &str = "Autocrypt-Prefer-Encrypt";

/// Number of keydata characters per folded line.
pub const KEYDATA_LINE_LEN: usize = 76;
/// Continuation sequence inserted between folded keydata lines.
pub const CONTINUATION: &str = "\n ";

const ADDR: &str = "addr=";
const PREFER_ENCRYPT: &str = "prefer-encrypt=";
const KEYDATA: &str = "keydata=";

/// The sender's stated encryption preference.
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash)]
pub enum PreferEncrypt {
    Mutual,
    NoPreference,
}

impl PreferEncrypt {
    pub fn as_str(self) -> &'static str {
        match self {
            PreferEncrypt::Mutual => "mutual",
            PreferEncrypt::NoPreference => "nopreference",
        }
    }
}

impl fmt::Display for PreferEncrypt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreferEncrypt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "mutual" => Ok(PreferEncrypt::Mutual),
            "nopreference" => Ok(PreferEncrypt::NoPreference),
            other => Err(Error::Grammar(
                format!("unknown prefer-encrypt value {:?}", other))),
        }
    }
}

/// One parsed `Autocrypt` or `Autocrypt-Gossip` header occurrence.
///
/// `keydata` is held unfolded.
#[derive(Clone,Debug,PartialEq,Eq)]
pub struct HeaderValue {
    pub addr: String,
    pub prefer_encrypt: Option<PreferEncrypt>,
    pub keydata: String,
}

impl HeaderValue {
    /// Parses a raw, possibly folded, header value.
    pub fn parse(raw: &str) -> Result<Self> {
        parse_header_value(raw)
    }

    /// Renders the value with `keydata` folded for use in a message header.
    pub fn to_folded(&self) -> Result<String> {
        let unfolded = generate_header_value(
            &self.addr, &self.keydata, self.prefer_encrypt)?;
        header_wrap(&unfolded)
    }
}

/// Generates the single-line form of a header value.
///
/// `prefer-encrypt` is only emitted for `mutual`; `nopreference` is the
/// meaning of an absent attribute and is therefore left out.
pub fn generate_header_value(addr: &str, keydata: &str,
                             prefer_encrypt: Option<PreferEncrypt>)
                             -> Result<String> {
    if addr.trim().is_empty() {
        return Err(Error::Grammar("empty addr".to_owned()));
    }
    if keydata.trim().is_empty() {
        return Err(Error::Grammar("empty keydata".to_owned()));
    }

    Ok(render(addr.trim(), prefer_encrypt, keydata))
}

fn render(addr: &str, prefer_encrypt: Option<PreferEncrypt>, keydata: &str)
          -> String {
    let mut value = format!("{}{}", ADDR, addr);
    if Some(PreferEncrypt::Mutual) == prefer_encrypt {
        value.push_str("; ");
        value.push_str(PREFER_ENCRYPT);
        value.push_str(PreferEncrypt::Mutual.as_str());
    }
    value.push_str("; ");
    value.push_str(KEYDATA);
    value.push_str(keydata);
    value
}

/// Parses a header value, folded or not.
///
/// Attributes are split on `;` followed by optional folding whitespace, and
/// recognised by their `key=` prefix. Unknown attributes are ignored. An
/// unknown `prefer-encrypt` value is treated as no preference. Fails if
/// `addr` or `keydata` is absent or repeated.
pub fn parse_header_value(raw: &str) -> Result<HeaderValue> {
    let mut addr = None;
    let mut prefer_encrypt = None;
    let mut keydata = None;

    for field in raw.split(';').map(str::trim_start) {
        if let Some(value) = field.strip_prefix(ADDR) {
            set_once(&mut addr, "addr", value.trim().to_owned())?;
        } else if let Some(value) = field.strip_prefix(PREFER_ENCRYPT) {
            prefer_encrypt = match value.parse::<PreferEncrypt>() {
                Ok(pe) => Some(pe),
                Err(err) => {
                    debug!(%err, "treating prefer-encrypt as absent");
                    None
                },
            };
        } else if let Some(value) = field.strip_prefix(KEYDATA) {
            // base64 never contains whitespace, so any is folding.
            let value = value.chars()
                .filter(|ch| !ch.is_whitespace())
                .collect::<String>();
            set_once(&mut keydata, "keydata", value)?;
        } else if !field.trim().is_empty() {
            debug!(attribute = field.split('=').next().unwrap_or(""),
                   "ignoring unknown header attribute");
        }
    }

    let addr = addr.filter(|a| !a.is_empty())
        .ok_or_else(|| Error::Grammar("missing addr".to_owned()))?;
    let keydata = keydata.filter(|k| !k.is_empty())
        .ok_or_else(|| Error::Grammar("missing keydata".to_owned()))?;
    Ok(HeaderValue { addr, prefer_encrypt, keydata })
}

fn set_once(slot: &mut Option<String>, name: &str, value: String)
            -> Result<()> {
    if slot.is_some() {
        return Err(Error::Grammar(format!("repeated {} attribute", name)));
    }
    *slot = Some(value);
    Ok(())
}

/// Folds `value` by inserting `continuation` after every `max_line_len`
/// characters. Nothing is inserted before the first or after the last line.
pub fn wrap_keydata(value: &str, max_line_len: usize, continuation: &str)
                    -> String {
    if 0 == max_line_len {
        return value.to_owned();
    }

    let mut wrapped = String::with_capacity(
        value.len() + value.len() / max_line_len * continuation.len());
    for (ix, ch) in value.chars().enumerate() {
        if ix > 0 && 0 == ix % max_line_len {
            wrapped.push_str(continuation);
        }
        wrapped.push(ch);
    }
    wrapped
}

/// Exact inverse of `wrap_keydata`.
pub fn unwrap_keydata(value: &str, continuation: &str) -> String {
    if continuation.is_empty() {
        return value.to_owned();
    }
    value.replace(continuation, "")
}

/// Folds the `keydata` attribute of a header value so that it starts on its
/// own continuation line and no line exceeds `KEYDATA_LINE_LEN` characters of
/// key material. All other attributes are left on the first line.
pub fn header_wrap(value: &str) -> Result<String> {
    let parsed = parse_header_value(value)?;
    let folded = format!(
        "{}{}", CONTINUATION,
        wrap_keydata(&parsed.keydata, KEYDATA_LINE_LEN, CONTINUATION));
    Ok(render(&parsed.addr, parsed.prefer_encrypt, &folded))
}

/// Reverses `header_wrap`, producing the single-line form.
pub fn header_unwrap(value: &str) -> Result<String> {
    let parsed = parse_header_value(value)?;
    generate_header_value(&parsed.addr, &parsed.keydata, parsed.prefer_encrypt)
}

/// Rewrites every `Autocrypt` and `Autocrypt-Gossip` header of `msg` into its
/// single-line form.
pub fn unfold_message_keydata(msg: &mut Message) -> Result<()> {
    for header in msg.headers_mut() {
        if header.name.eq_ignore_ascii_case(AUTOCRYPT) ||
            header.name.eq_ignore_ascii_case(AUTOCRYPT_GOSSIP)
        {
            header.value = header_unwrap(&header.value)?;
        }
    }
    Ok(())
}
