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

//! Decoding of inbound messages.
//!
//! A message is first classified by its marker headers, then routed to the
//! matching decode path. Keys learned along the way are reported to the
//! profile's `PeerStore` as a side effect.

use tracing::{debug, info, instrument, warn};

use crate::envelope;
use crate::error::{Error, Result};
use crate::gossip;
use crate::header::{HeaderValue, AUTOCRYPT, AUTOCRYPT_GOSSIP,
                    AUTOCRYPT_SETUP_MESSAGE};
use crate::mime::Message;
use crate::profile::{KeyRing, Profile};
use crate::setup::{self, Passphrase, Validation, SETUP_VERSION};

/// What kind of Autocrypt message an inbound message is.
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash)]
pub enum MessageKind {
    /// No Autocrypt markers; nothing to decrypt or import.
    PlainEmail,
    /// Carries exactly one `Autocrypt` header.
    AutocryptHeadered,
    /// Carries `Autocrypt-Gossip` headers but no `Autocrypt` header.
    GossipBearing,
    /// Carries `Autocrypt-Setup-Message: v1`.
    SetupMessage,
}

/// The result of decoding one message.
#[derive(Clone,Debug,PartialEq,Eq)]
pub enum Decoded {
    /// The message, unchanged.
    Plain(String),
    /// The decrypted inner message.
    Autocrypt(String),
    /// The decrypted inner message, or the message itself if it was not
    /// encrypted, and the addresses whose keys were imported from gossip.
    Gossip {
        plaintext: String,
        imported: Vec<String>,
    },
    /// The decrypted inner layer of a setup message: the armored secret key
    /// with its `Autocrypt-Prefer-Encrypt` directive.
    SetupKey(String),
}

/// Classifies `msg` by its marker headers.
///
/// A setup message is recognised regardless of any other header. More than
/// one `Autocrypt` header is rejected, since there would be no single sender
/// key to import.
pub fn classify(msg: &Message) -> Result<MessageKind> {
    if Some(SETUP_VERSION) ==
        msg.header(AUTOCRYPT_SETUP_MESSAGE).map(str::trim)
    {
        return Ok(MessageKind::SetupMessage);
    }

    match msg.header_all(AUTOCRYPT).count() {
        0 if msg.header(AUTOCRYPT_GOSSIP).is_some() =>
            Ok(MessageKind::GossipBearing),
        0 => Ok(MessageKind::PlainEmail),
        1 => Ok(MessageKind::AutocryptHeadered),
        n => Err(Error::AmbiguousHeader(n)),
    }
}

/// Decodes `msg` according to its classification.
///
/// `passphrase` is only consulted for setup messages, which fail with
/// `PassphraseRequired` without one; callers that want to prompt should
/// `classify` first.
#[instrument(skip_all, fields(from = msg.header("From").unwrap_or("")))]
pub fn decode_message<P: Profile>(
    profile: &mut P, msg: &Message, passphrase: Option<&Passphrase>,
    validation: Validation) -> Result<Decoded>
{
    let kind = classify(msg)?;
    info!(?kind, "decoding message");
    match kind {
        MessageKind::SetupMessage => {
            let passphrase = passphrase.ok_or(Error::PassphraseRequired)?;
            setup::parse_setup_message(profile, msg, passphrase, validation)
                .map(Decoded::SetupKey)
        },
        MessageKind::AutocryptHeadered => decode_autocrypt(profile, msg),
        MessageKind::GossipBearing => decode_gossip(profile, msg),
        MessageKind::PlainEmail => Ok(Decoded::Plain(msg.to_string())),
    }
}

/// Parses `raw` and decodes it.
pub fn decode_raw<P: Profile>(
    profile: &mut P, raw: &str, passphrase: Option<&Passphrase>,
    validation: Validation) -> Result<Decoded>
{
    decode_message(profile, &Message::parse(raw)?, passphrase, validation)
}

/// Returns the bare address of a mailbox such as `Name <a@x>`.
fn addr_spec(mailbox: &str) -> &str {
    let mailbox = mailbox.trim();
    match (mailbox.rfind('<'), mailbox.rfind('>')) {
        (Some(start), Some(end)) if start < end => &mailbox[start + 1..end],
        _ => mailbox,
    }
}

/// Splits an address list on the commas that are outside quoted strings and
/// comments.
fn split_address_list(value: &str) -> Vec<&str> {
    let mut mailboxes = Vec::new();
    let mut start = 0;
    let mut in_quote = false;
    let mut backslash = false;
    let mut comment_depth = 0u32;
    for (ix, ch) in value.char_indices() {
        match ch {
            _ if backslash => backslash = false,
            '\\' => backslash = true,
            '"' if 0 == comment_depth => in_quote = !in_quote,
            '(' if !in_quote => comment_depth += 1,
            ')' if !in_quote => comment_depth = comment_depth.saturating_sub(1),
            ',' if !in_quote && 0 == comment_depth => {
                mailboxes.push(&value[start..ix]);
                start = ix + 1;
            },
            _ => (),
        }
    }
    mailboxes.push(&value[start..]);
    mailboxes
}

/// The addresses in every header named by `names`, in header order.
fn addresses(msg: &Message, names: &[&str]) -> Vec<String> {
    names.iter()
        .flat_map(|name| msg.header_all(name))
        .flat_map(split_address_list)
        .map(addr_spec)
        .filter(|a| !a.is_empty())
        .map(str::to_owned)
        .collect()
}

/// The addresses in the `To` header, in header order.
fn recipients(msg: &Message) -> Vec<String> {
    addresses(msg, &["To"])
}

/// Finds the secret key of the first `To` address the profile has one for.
pub fn find_secret_key<K: KeyRing>(profile: &mut K, msg: &Message)
                                   -> Result<K::SecretKey> {
    let recipients = recipients(msg);
    for recipient in &recipients {
        debug!(%recipient, "searching secret key");
        if let Some(key) = profile.find_secret_key(recipient)? {
            debug!(%recipient, "found secret key");
            return Ok(key);
        }
    }
    Err(Error::KeyNotFound(recipients))
}

/// Decrypts the PGP/MIME body of `msg`.
pub fn decrypt_message<K: KeyRing>(profile: &mut K, msg: &Message,
                                   key: Option<&K::SecretKey>)
                                   -> Result<String> {
    let ciphertext = envelope::encrypted_payload(msg)?;
    let plaintext = profile.decrypt(ciphertext, key)?;
    String::from_utf8(plaintext).map_err(Error::crypto)
}

fn decode_autocrypt<P: Profile>(profile: &mut P, msg: &Message)
                                -> Result<Decoded> {
    let value = msg.header(AUTOCRYPT).ok_or_else(|| Error::Classification(
        "no Autocrypt header".to_owned()))?;
    let hv = HeaderValue::parse(value)?;

    let from = msg.header("From").map(addr_spec);
    if from.map_or(false, |f| f.eq_ignore_ascii_case(&hv.addr)) {
        profile.upsert_peer(&hv.addr, &hv.keydata, hv.prefer_encrypt)?;
        debug!(addr = %hv.addr, "imported keydata from Autocrypt header");
    } else {
        warn!(addr = %hv.addr, ?from,
              "Autocrypt header does not match sender, not importing");
    }

    let key = find_secret_key(profile, msg)?;
    let plaintext = decrypt_message(profile, msg, Some(&key))?;

    // The inner message is not necessarily MIME; if it is not, it cannot
    // carry gossip either.
    let gossip_values = Message::parse(&plaintext).ok()
        .map(|inner| gossip::extract_gossip_values(&inner))
        .unwrap_or_default();
    if gossip_values.is_empty() {
        info!("parsed Autocrypt message");
        return Ok(Decoded::Autocrypt(plaintext));
    }

    let imported = import_accepted_gossip(profile, msg, &gossip_values)?;
    info!(imported = imported.len(), "parsed Autocrypt gossip message");
    Ok(Decoded::Gossip { plaintext, imported })
}

fn decode_gossip<P: Profile>(profile: &mut P, msg: &Message)
                             -> Result<Decoded> {
    let mut values = gossip::extract_gossip_values(msg);
    let plaintext = if msg.is_content_type("multipart", "encrypted") {
        let key = find_secret_key(profile, msg)?;
        let plaintext = decrypt_message(profile, msg, Some(&key))?;
        if let Ok(inner) = Message::parse(&plaintext) {
            values.extend(gossip::extract_gossip_values(&inner));
        }
        plaintext
    } else {
        msg.to_string()
    };

    let imported = import_accepted_gossip(profile, msg, &values)?;
    info!(imported = imported.len(), "parsed Autocrypt gossip message");
    Ok(Decoded::Gossip { plaintext, imported })
}

/// Imports the gossip values that name another recipient of `outer`.
///
/// Entries for the profile's own accounts and for addresses not in `To` or
/// `Cc` are skipped. Every value is parsed first, so a malformed one
/// fails the whole import.
fn import_accepted_gossip<P: Profile>(profile: &mut P, outer: &Message,
                                      values: &[String])
                                      -> Result<Vec<String>> {
    let recipients = addresses(outer, &["To", "Cc"]);
    let mut accepted = Vec::with_capacity(values.len());
    for value in values {
        let hv = HeaderValue::parse(value)?;
        if profile.is_account(&hv.addr)? {
            debug!(addr = %hv.addr, "skipping gossip about own account");
        } else if !recipients.iter()
            .any(|r| r.eq_ignore_ascii_case(&hv.addr))
        {
            warn!(addr = %hv.addr, "skipping gossip about non-recipient");
        } else {
            accepted.push(value.clone());
        }
    }
    gossip::import_gossip(&accepted, profile)
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::encode;
    use crate::envelope::Envelope;
    use crate::header::PreferEncrypt;
    use crate::testing::{DetSeparatorGen, FakeProfile};

    const A_KEY: &str = "QUFBQQ==";
    const B_KEY: &str = "QkJCQg==";
    const C_KEY: &str = "Q0NDQw==";

    fn sender_profile() -> FakeProfile {
        FakeProfile::default()
            .with_account("a@x", A_KEY)
            .with_peer("b@y", B_KEY)
            .with_peer("c@z", C_KEY)
    }

    fn parse(raw: &str) -> Message {
        Message::parse(raw).unwrap()
    }

    fn decode(profile: &mut FakeProfile, msg: &Message) -> Result<Decoded> {
        decode_message(profile, msg, None, Validation::Strict)
    }

    #[test]
    fn classification() {
        assert_eq!(MessageKind::PlainEmail,
                   classify(&parse("From: a@x\n\nhi\n")).unwrap());
        assert_eq!(MessageKind::AutocryptHeadered,
                   classify(&parse("Autocrypt: addr=a@x; keydata=QQ==\n\
                                    \n\
                                    hi\n")).unwrap());
        assert_eq!(MessageKind::GossipBearing,
                   classify(&parse("Autocrypt-Gossip: addr=a@x; keydata=QQ==\n\
                                    \n\
                                    hi\n")).unwrap());
        assert_matches!(
            classify(&parse("Autocrypt: addr=a@x; keydata=QQ==\n\
                             autocrypt: addr=b@y; keydata=Qg==\n\
                             \n\
                             hi\n")),
            Err(Error::AmbiguousHeader(2)));
        assert_eq!(MessageKind::SetupMessage,
                   classify(&parse("Autocrypt: addr=a@x; keydata=QQ==\n\
                                    Autocrypt: addr=b@y; keydata=Qg==\n\
                                    Autocrypt-Setup-Message: v1\n\
                                    \n\
                                    hi\n")).unwrap());
        assert_eq!(MessageKind::PlainEmail,
                   classify(&parse("Autocrypt-Setup-Message: v2\n\
                                    \n\
                                    hi\n")).unwrap());
    }

    #[test]
    fn plain_email_returned_unchanged() {
        let raw = "From: a@x\nTo: b@y\n\nhi\n";
        let mut profile = FakeProfile::default().with_account("b@y", B_KEY);
        assert_eq!(Decoded::Plain(raw.to_owned()),
                   decode(&mut profile, &parse(raw)).unwrap());
        assert!(profile.upserts.is_empty());
    }

    #[test]
    fn autocrypt_message_decoded_and_sender_imported() {
        let envelope = Envelope::new("a@x", &["b@y"], "hello");
        let msg = encode::encode_autocrypt_message(
            &mut sender_profile(), &mut DetSeparatorGen::default(),
            &envelope, "hi", Some(PreferEncrypt::Mutual)).unwrap();

        let mut bob = FakeProfile::default().with_account("b@y", B_KEY);
        let decoded = decode(&mut bob, &parse(&msg.to_string())).unwrap();
        let plaintext = match decoded {
            Decoded::Autocrypt(plaintext) => plaintext,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(Some("hi"), parse(&plaintext).body_text());
        assert_eq!(vec![("a@x".to_owned(), A_KEY.to_owned(),
                         Some(PreferEncrypt::Mutual))],
                   bob.upserts);
    }

    #[test]
    fn gossip_imported_for_other_recipients_only() {
        let envelope = Envelope::new("a@x", &["b@y", "c@z"], "group");
        let msg = encode::encode_gossip_message(
            &mut sender_profile(), &mut DetSeparatorGen::default(),
            &envelope, "hi all", None).unwrap();

        let mut bob = FakeProfile::default().with_account("b@y", B_KEY);
        let decoded = decode(&mut bob, &parse(&msg.to_string())).unwrap();
        assert_matches!(decoded, Decoded::Gossip { ref imported, .. }
                        if imported == &["c@z".to_owned()]);

        assert_eq!(vec![("a@x".to_owned(), A_KEY.to_owned(), None),
                        ("c@z".to_owned(), C_KEY.to_owned(), None)],
                   bob.upserts);
        assert!(!bob.peers.contains_key("b@y"));
    }

    #[test]
    fn mismatched_sender_not_imported() {
        let envelope = Envelope::new("a@x", &["b@y"], "hello");
        let mut msg = encode::encode_autocrypt_message(
            &mut sender_profile(), &mut DetSeparatorGen::default(),
            &envelope, "hi", None).unwrap();
        msg.set_header("From", "Mallory <m@evil>");

        let mut bob = FakeProfile::default().with_account("b@y", B_KEY);
        assert_matches!(decode(&mut bob, &msg), Ok(Decoded::Autocrypt(_)));
        assert!(bob.upserts.is_empty());
    }

    #[test]
    fn display_name_sender_imported() {
        let envelope = Envelope::new("a@x", &["b@y"], "hello");
        let mut msg = encode::encode_autocrypt_message(
            &mut sender_profile(), &mut DetSeparatorGen::default(),
            &envelope, "hi", None).unwrap();
        msg.set_header("From", "Alice <A@X>");
        msg.set_header("To", "Bob <b@y>");

        let mut bob = FakeProfile::default().with_account("b@y", B_KEY);
        assert_matches!(decode(&mut bob, &msg), Ok(Decoded::Autocrypt(_)));
        assert_eq!(1, bob.upserts.len());
    }

    #[test]
    fn missing_secret_key() {
        let envelope = Envelope::new("a@x", &["c@z", "b@y"], "hello");
        let msg = encode::encode_autocrypt_message(
            &mut sender_profile(), &mut DetSeparatorGen::default(),
            &envelope, "hi", None).unwrap();

        let mut dave = FakeProfile::default().with_account("d@w", "RA==");
        assert_matches!(decode(&mut dave, &msg),
                        Err(Error::KeyNotFound(ref r))
                            if r == &["c@z".to_owned(), "b@y".to_owned()]);
    }

    #[test]
    fn first_matching_recipient_key_used() {
        let msg = parse("To: c@z, Bob <b@y>\n\nhi\n");
        let mut profile = FakeProfile::default()
            .with_account("b@y", B_KEY)
            .with_account("c@z", C_KEY);
        assert_eq!("c@z", find_secret_key(&mut profile, &msg).unwrap());

        let mut profile = FakeProfile::default().with_account("b@y", B_KEY);
        assert_eq!("b@y", find_secret_key(&mut profile, &msg).unwrap());
    }

    #[test]
    fn quoted_display_names_keep_their_commas() {
        let msg = parse("To: \"Doe, Jane\" <j@d>, Bob (Smith, B.) <b@y>\n\
                         \n\
                         hi\n");
        assert_eq!(vec!["j@d".to_owned(), "b@y".to_owned()], recipients(&msg));

        let mut dave = FakeProfile::default().with_account("d@w", "RA==");
        assert_matches!(find_secret_key(&mut dave, &msg),
                        Err(Error::KeyNotFound(ref r))
                            if r == &["j@d".to_owned(), "b@y".to_owned()]);
    }

    #[test]
    fn gossip_accepted_for_cc_recipients() {
        let raw = format!("From: a@x\nTo: \"Bee, B\" <b@y>\nCc: c@z\n\
                           Autocrypt-Gossip: addr=c@z; keydata={}\n\
                           \n\
                           hi\n", C_KEY);
        let mut bob = FakeProfile::default().with_account("b@y", B_KEY);
        assert_matches!(
            decode_raw(&mut bob, &raw, None, Validation::Strict),
            Ok(Decoded::Gossip { ref imported, .. })
                if imported == &["c@z".to_owned()]);
        assert_eq!(vec![("c@z".to_owned(), C_KEY.to_owned(), None)],
                   bob.upserts);
    }

    #[test]
    fn malformed_autocrypt_header_rejected() {
        let msg = parse("From: a@x\nTo: b@y\nAutocrypt: addr=a@x\n\nhi\n");
        let mut bob = FakeProfile::default().with_account("b@y", B_KEY);
        assert_matches!(decode(&mut bob, &msg), Err(Error::Grammar(_)));
        assert!(bob.upserts.is_empty());
    }

    #[test]
    fn unencrypted_gossip_bearing_message() {
        let raw = format!("From: a@x\nTo: b@y, c@z\n\
                           Autocrypt-Gossip: addr=c@z; keydata={}\n\
                           Autocrypt-Gossip: addr=e@v; keydata=RQ==\n\
                           \n\
                           hi\n", C_KEY);
        let mut bob = FakeProfile::default().with_account("b@y", B_KEY);
        let decoded = decode_raw(&mut bob, &raw, None, Validation::Strict)
            .unwrap();
        assert_eq!(Decoded::Gossip {
            plaintext: raw.clone(),
            imported: vec!["c@z".to_owned()],
        }, decoded);
    }

    #[test]
    fn setup_message_requires_passphrase() {
        let mut alice = sender_profile();
        let (msg, passphrase) = setup::build_setup_message(
            &mut alice, &mut DetSeparatorGen::default(), "a@x",
            PreferEncrypt::Mutual, None).unwrap();

        assert_matches!(decode(&mut alice, &msg),
                        Err(Error::PassphraseRequired));
        assert_matches!(
            decode_message(&mut alice, &msg, Some(&passphrase),
                           Validation::Strict),
            Ok(Decoded::SetupKey(ref key))
                if key.contains("Autocrypt-Prefer-Encrypt: mutual"));
    }
}
