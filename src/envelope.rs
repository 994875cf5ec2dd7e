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

//! Assembles outbound messages: standard envelope headers, the `Autocrypt`
//! header, and the PGP/MIME structure around a ciphertext.
//!
//! Relevant standards:
//!   [RFC 3156] PGP/MIME

use tracing::debug;

use crate::error::{Error, Result};
use crate::header::{self, PreferEncrypt, AUTOCRYPT};
use crate::mime::{Body, Message, SeparatorGen};

const PGP_MIME_PREAMBLE: &str = "This is an OpenPGP/MIME encrypted message.";
const PAYLOAD_NAME: &str = "encrypted.asc";

/// Addressing information and optional extras for an outbound message.
#[derive(Clone,Debug,Default,PartialEq,Eq)]
pub struct Envelope {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    /// Preformatted `Date` value.
    pub date: Option<String>,
    pub message_id: Option<String>,
    /// Emit `Delivered-To` with the first recipient.
    pub delivered_to: bool,
    /// Appended verbatim after the standard headers. Repeated names are
    /// kept.
    pub extra: Vec<(String, String)>,
}

impl Envelope {
    pub fn new<S: AsRef<str>>(sender: &str, recipients: &[S], subject: &str)
                              -> Self {
        Envelope {
            sender: sender.to_owned(),
            recipients: recipients.iter()
                .map(|r| r.as_ref().to_owned())
                .collect(),
            subject: subject.to_owned(),
            ..Envelope::default()
        }
    }

    pub fn with_date(mut self, date: &str) -> Self {
        self.date = Some(date.to_owned());
        self
    }

    pub fn with_message_id(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_owned());
        self
    }

    pub fn with_delivered_to(mut self) -> Self {
        self.delivered_to = true;
        self
    }

    pub fn with_extra_header(mut self, name: &str, value: &str) -> Self {
        self.extra.push((name.to_owned(), value.to_owned()));
        self
    }
}

/// Attaches the envelope headers to `msg`.
///
/// Standard headers replace any existing header of the same name; extra
/// headers are always appended.
pub fn add_envelope_headers(msg: &mut Message, envelope: &Envelope) {
    if envelope.delivered_to {
        if let Some(first) = envelope.recipients.first() {
            msg.set_header("Delivered-To", first);
        }
    }
    msg.set_header("Subject", &envelope.subject);
    msg.set_header("From", &envelope.sender);
    msg.set_header("To", &envelope.recipients.join(", "));
    if let Some(ref date) = envelope.date {
        msg.set_header("Date", date);
    }
    if let Some(ref message_id) = envelope.message_id {
        msg.set_header("Message-ID", message_id);
    }
    for (name, value) in &envelope.extra {
        msg.add_header(name, value);
    }
    debug!(headers = msg.headers().len(), "added envelope headers");
}

/// Attaches the sender's `Autocrypt` header, with `keydata` folded.
///
/// A message only ever carries one `Autocrypt` header; an existing one is
/// replaced.
pub fn add_autocrypt_header(msg: &mut Message, sender: &str, keydata: &str,
                            prefer_encrypt: Option<PreferEncrypt>)
                            -> Result<()> {
    let value = header::generate_header_value(sender, keydata, prefer_encrypt)?;
    msg.set_header(AUTOCRYPT, &header::header_wrap(&value)?);
    Ok(())
}

/// Wraps armored ciphertext in a `multipart/encrypted` entity.
///
/// See: [RFC 3156] Section 4
pub fn encrypted_message<SGEN: SeparatorGen>(ciphertext: &str, sgen: &mut SGEN)
                                             -> Message {
    // Part 1: Version identification
    let mut version = Message::new(
        Body::Text("Version: 1".to_owned()));
    version.add_header("Content-Type", "application/pgp-encrypted");
    version.add_header("Content-Description",
                       "PGP/MIME version identification");

    // Part 2: Encrypted payload
    let mut payload = Message::new(
        Body::Text(ciphertext.to_owned()));
    payload.add_header("Content-Type", &format!(
        "application/octet-stream; name=\"{}\"", PAYLOAD_NAME));
    payload.add_header("Content-Description", "OpenPGP encrypted message");
    payload.add_header("Content-Disposition", &format!(
        "inline; filename=\"{}\"", PAYLOAD_NAME));

    let mut msg = Message::multipart(
        "encrypted", &[("protocol", "application/pgp-encrypted")], sgen,
        PGP_MIME_PREAMBLE, vec![version, payload]);
    msg.add_header("MIME-Version", "1.0");
    msg
}

/// Extracts the armored ciphertext from a `multipart/encrypted` message.
pub fn encrypted_payload(msg: &Message) -> Result<&str> {
    if !msg.is_content_type("multipart", "encrypted") {
        return Err(Error::Classification(
            "body is not multipart/encrypted".to_owned()));
    }

    msg.parts().iter()
        .find(|part| part.is_content_type("application", "octet-stream"))
        .and_then(Message::body_text)
        .ok_or_else(|| Error::Classification(
            "multipart/encrypted without an encrypted payload".to_owned()))
}
