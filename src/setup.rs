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

//! The Autocrypt Setup Message: an export of an account's secret key,
//! symmetrically encrypted under a numeric setup code, used to move an
//! identity to another device.
//!
//! The payload has two layers. The inner layer is the armored secret key
//! with an `Autocrypt-Prefer-Encrypt` directive as its second line. The
//! outer layer is that text encrypted under the setup code, with
//! `Passphrase-Format` and `Passphrase-Begin` lines spliced in right after
//! the armor header line. The begin line lets a user notice a mistyped code
//! before any decryption is attempted.

use std::fmt;

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::envelope::{self, Envelope};
use crate::error::{Error, Result};
use crate::header::{PreferEncrypt, AUTOCRYPT_PREFER_ENCRYPT,
                    AUTOCRYPT_SETUP_MESSAGE};
use crate::mime::{Body, Message, SeparatorGen};
use crate::profile::Profile;

/// The only setup message version understood.
pub const SETUP_VERSION: &str = "v1";
pub const SETUP_SUBJECT: &str = "Autocrypt Setup Message";
pub const PASSPHRASE_FORMAT: &str = "Passphrase-Format: numeric9x4";
pub const PASSPHRASE_BEGIN: &str = "Passphrase-Begin: ";

pub const PASSPHRASE_WORD_LEN: usize = 4;
pub const PASSPHRASE_NUM_WORDS: usize = 9;
pub const PASSPHRASE_LEN: usize = PASSPHRASE_WORD_LEN * PASSPHRASE_NUM_WORDS;
pub const PASSPHRASE_NUM_BLOCKS: usize = 3;
/// Number of leading characters of the setup code sent in cleartext.
pub const PASSPHRASE_BEGIN_LEN: usize = 2;

const PGP_MESSAGE_BEGIN: &str = "-----BEGIN PGP MESSAGE-----";
const PGP_MESSAGE_END: &str = "-----END PGP MESSAGE-----";

const SETUP_CONTENT_TYPE: &str = "application/autocrypt-setup";
const SETUP_FILENAME: &str = "autocrypt-setup-message.html";

const SETUP_DESCRIPTION: &str = "\
This message contains all information to transfer your Autocrypt settings
along with your secret key securely from your original device.

To set up your new device for Autocrypt, please follow the instructions
that should be presented by your new device.

You can keep this message and use it as a backup for your secret key. If
you want to do this, you should write down the Setup Code and store it
securely.";

const SETUP_HTML_INTRO: &str = "\
<!DOCTYPE html>
<html><body>
<h1>Autocrypt Setup Message</h1>
<p>This is the Autocrypt setup file used to transfer settings and keys
between clients. You can decrypt it using the Setup Code presented on your
old device, and then import the contained key into your keyring.</p>
<pre>";

const SETUP_HTML_OUTRO: &str = "\
</pre>
</body></html>
";

/// How setup payload checks react to a mismatch.
#[derive(Clone,Copy,Debug,Default,PartialEq,Eq)]
pub enum Validation {
    /// Any mismatch aborts decoding with a typed error.
    #[default]
    Strict,
    /// Mismatches are logged at `warn` and decoding proceeds.
    Lenient,
}

impl Validation {
    fn check(self, err: Error) -> Result<()> {
        match self {
            Validation::Strict => Err(err),
            Validation::Lenient => {
                warn!("ignoring setup message check: {}", err);
                Ok(())
            },
        }
    }
}

/// A setup code: 36 decimal digits in 9 dash-separated words of 4.
///
/// The dashed line is the symmetric secret. `Debug` never reveals it.
#[derive(Clone,PartialEq,Eq)]
pub struct Passphrase(String);

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(..)")
    }
}

impl Passphrase {
    /// Generates a fresh setup code from the thread-local CSPRNG.
    pub fn generate() -> Self {
        Passphrase::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng>(rng: &mut R) -> Self {
        let digits: Vec<char> = (0..PASSPHRASE_LEN)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        Passphrase::from_digits(&digits)
    }

    /// Parses a typed setup code.
    ///
    /// Accepts the dashed form, the display blocks, or bare digits; dashes
    /// and whitespace are ignored, anything else is rejected.
    pub fn parse(typed: &str) -> Result<Self> {
        let mut digits = Vec::with_capacity(PASSPHRASE_LEN);
        for ch in typed.chars() {
            match ch {
                '0'..='9' => digits.push(ch),
                '-' => (),
                _ if ch.is_whitespace() => (),
                _ => return Err(Error::InvalidPassphrase(format!(
                    "unexpected character {:?}", ch))),
            }
        }

        if PASSPHRASE_LEN != digits.len() {
            return Err(Error::InvalidPassphrase(format!(
                "expected {} digits, got {}", PASSPHRASE_LEN, digits.len())));
        }
        Ok(Passphrase::from_digits(&digits))
    }

    fn from_digits(digits: &[char]) -> Self {
        let words: Vec<String> = digits.chunks(PASSPHRASE_WORD_LEN)
            .map(|word| word.iter().collect())
            .collect();
        Passphrase(words.join("-"))
    }

    /// The dashed line, used as the symmetric encryption secret.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The dashed line split into near-equal blocks for display, joined by
    /// newlines.
    pub fn display_blocks(&self) -> String {
        let len = self.0.len();
        let block_len = (len + PASSPHRASE_NUM_BLOCKS - 1)
            / PASSPHRASE_NUM_BLOCKS;
        // The passphrase is ASCII, so byte chunks are char chunks.
        self.0.as_bytes().chunks(block_len)
            .map(|block| String::from_utf8_lossy(block).into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The part of the code embedded in cleartext in the payload.
    pub fn begin_prefix(&self) -> &str {
        &self.0[..PASSPHRASE_BEGIN_LEN]
    }
}

/// Inserts `line` as line number `index` of `text`.
fn insert_line(text: &str, index: usize, line: &str) -> String {
    let mut lines: Vec<&str> = text.split('\n').collect();
    let index = index.min(lines.len());
    lines.insert(index, line);
    lines.join("\n")
}

/// Builds a setup message for `sender`, an own account.
///
/// If `passphrase` is `None` a fresh one is generated. Returns the message
/// and the passphrase, which the caller must show to the user out of band.
#[instrument(skip_all, fields(sender = %sender, %prefer_encrypt))]
pub fn build_setup_message<P: Profile, SGEN: SeparatorGen>(
    profile: &mut P, sgen: &mut SGEN, sender: &str,
    prefer_encrypt: PreferEncrypt, passphrase: Option<Passphrase>)
    -> Result<(Message, Passphrase)>
{
    if !profile.is_account(sender)? {
        return Err(Error::UnknownAccount(sender.to_owned()));
    }
    let passphrase = passphrase.unwrap_or_else(Passphrase::generate);

    let secret_key = profile.secret_key_armor(sender)?;
    let inner = insert_line(&secret_key, 1, &format!(
        "{}: {}", AUTOCRYPT_PREFER_ENCRYPT, prefer_encrypt));
    let ciphertext = profile.sym_encrypt(inner.as_bytes(),
                                         passphrase.as_str())?;
    let payload = insert_line(&ciphertext, 1, &format!(
        "{}\n{}{}", PASSPHRASE_FORMAT, PASSPHRASE_BEGIN,
        passphrase.begin_prefix()));

    let mut attachment = Message::new(Body::Text(format!(
        "{}\n{}\n{}", SETUP_HTML_INTRO, payload, SETUP_HTML_OUTRO)));
    attachment.add_header("Content-Type", SETUP_CONTENT_TYPE);
    attachment.add_header("Content-Disposition", &format!(
        "attachment; filename=\"{}\"", SETUP_FILENAME));

    let mut msg = Message::multipart(
        "mixed", &[], sgen, "",
        vec![Message::text(SETUP_DESCRIPTION), attachment]);
    msg.add_header("MIME-Version", "1.0");
    let envelope = Envelope::new(sender, &[sender], SETUP_SUBJECT)
        .with_extra_header(AUTOCRYPT_SETUP_MESSAGE, SETUP_VERSION);
    envelope::add_envelope_headers(&mut msg, &envelope);

    info!("generated Autocrypt setup message");
    Ok((msg, passphrase))
}

/// Locates the text carrying the armored payload: the
/// `application/autocrypt-setup` part, else the last part, else the body.
fn setup_attachment(msg: &Message) -> Option<&str> {
    let parts = msg.parts();
    parts.iter()
        .find(|p| p.is_content_type("application", "autocrypt-setup"))
        .or_else(|| parts.last())
        .map_or_else(|| msg.body_text(), Message::body_text)
}

/// Extracts the armored block, delimiters included.
fn extract_armor(text: &str) -> Result<&str> {
    let start = text.find(PGP_MESSAGE_BEGIN);
    let end = start.and_then(|s| text[s..].find(PGP_MESSAGE_END)
                             .map(|e| s + e + PGP_MESSAGE_END.len()));
    match (start, end) {
        (Some(start), Some(end)) => Ok(&text[start..end]),
        _ => Err(Error::Classification(
            "setup message carries no PGP message block".to_owned())),
    }
}

/// The passphrase lines taken out of an armored setup payload.
#[derive(Debug,Default)]
struct PayloadTags {
    format: Option<String>,
    begin: Option<String>,
}

/// Removes the `Passphrase-Format` and `Passphrase-Begin` lines from the
/// armor header block, returning them along with the remaining armor.
fn strip_payload_tags(armor: &str) -> (PayloadTags, String) {
    let mut tags = PayloadTags::default();
    let mut kept = Vec::new();
    let mut in_header_block = true;
    for (ix, line) in armor.split('\n').enumerate() {
        let trimmed = line.trim_end_matches('\r');
        if ix > 0 && in_header_block {
            if trimmed.is_empty() {
                in_header_block = false;
            } else if trimmed.starts_with("Passphrase-Format:") {
                tags.format = Some(trimmed.to_owned());
                continue;
            } else if trimmed.starts_with(PASSPHRASE_BEGIN.trim_end()) {
                tags.begin = Some(trimmed.to_owned());
                continue;
            }
        }
        kept.push(line);
    }
    (tags, kept.join("\n"))
}

/// Decodes a setup message with the setup code typed by the user, returning
/// the decrypted inner layer: the armored secret key including its
/// `Autocrypt-Prefer-Encrypt` line.
///
/// The version, format and begin-prefix checks all run before symmetric
/// decryption is attempted.
#[instrument(skip_all, fields(?validation))]
pub fn parse_setup_message<P: Profile>(
    profile: &mut P, msg: &Message, passphrase: &Passphrase,
    validation: Validation) -> Result<String>
{
    let version = msg.header(AUTOCRYPT_SETUP_MESSAGE).map(str::trim);
    if Some(SETUP_VERSION) != version {
        validation.check(Error::VersionMismatch(version.map(str::to_owned)))?;
    }

    let text = setup_attachment(msg).ok_or_else(|| Error::Classification(
        "setup message has no attachment".to_owned()))?;
    let (tags, armor) = strip_payload_tags(extract_armor(text)?);

    if Some(PASSPHRASE_FORMAT) != tags.format.as_deref() {
        validation.check(Error::FormatMismatch {
            found: tags.format.unwrap_or_default(),
        })?;
    }

    let expected = tags.begin.as_deref()
        .and_then(|b| b.strip_prefix(PASSPHRASE_BEGIN.trim_end()))
        .map(str::trim)
        .unwrap_or("");
    if expected != passphrase.begin_prefix() {
        validation.check(Error::PassphraseMismatch {
            expected: expected.to_owned(),
        })?;
    }

    debug!("decrypting setup payload");
    let plaintext = profile.sym_decrypt(&armor, passphrase.as_str())?;
    let plaintext = String::from_utf8(plaintext).map_err(Error::crypto)?;
    info!("parsed Autocrypt setup message");
    Ok(plaintext)
}

/// Removes the `Autocrypt-Prefer-Encrypt` directive from the decrypted
/// inner layer of a setup message.
///
/// Returns the parsed preference, or `None` if the directive is absent or
/// has an unknown value, along with the remaining secret key text.
pub fn split_prefer_encrypt(plaintext: &str) -> (Option<PreferEncrypt>, String) {
    let mut prefer_encrypt = None;
    let mut found = false;
    let mut kept = Vec::new();
    for line in plaintext.split('\n') {
        if !found {
            if let Some(value) = line.strip_prefix(AUTOCRYPT_PREFER_ENCRYPT)
                .and_then(|rest| rest.strip_prefix(':'))
            {
                found = true;
                prefer_encrypt = value.trim().parse().ok();
                continue;
            }
        }
        kept.push(line);
    }
    (prefer_encrypt, kept.join("\n"))
}
