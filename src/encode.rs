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

//! Builds outbound Autocrypt messages.
//!
//! The body is wrapped in a `text/plain` entity, signed and encrypted by the
//! crypto collaborator, placed in a PGP/MIME structure, and given envelope
//! and `Autocrypt` headers.

use tracing::{info, instrument, trace};

use crate::envelope::{self, Envelope};
use crate::error::{Error, Result};
use crate::gossip;
use crate::header::PreferEncrypt;
use crate::mime::{Message, SeparatorGen};
use crate::profile::Profile;

/// Encrypts `body` from the envelope's sender to its recipients.
///
/// Fails unless the sender is one of the profile's accounts and every
/// recipient is a known peer.
#[instrument(skip_all, fields(sender = %envelope.sender,
                              recipients = envelope.recipients.len()))]
pub fn encode_autocrypt_message<P: Profile, SGEN: SeparatorGen>(
    profile: &mut P, sgen: &mut SGEN, envelope: &Envelope, body: &str,
    prefer_encrypt: Option<PreferEncrypt>) -> Result<Message>
{
    check_participants(profile, envelope)?;
    let msg = seal(profile, sgen, envelope, &Message::text(body),
                   prefer_encrypt)?;
    info!("generated Autocrypt message");
    Ok(msg)
}

/// Like `encode_autocrypt_message`, but the encrypted inner message also
/// carries an `Autocrypt-Gossip` header for every recipient, so that each
/// recipient learns the others' keys.
#[instrument(skip_all, fields(sender = %envelope.sender,
                              recipients = envelope.recipients.len()))]
pub fn encode_gossip_message<P: Profile, SGEN: SeparatorGen>(
    profile: &mut P, sgen: &mut SGEN, envelope: &Envelope, body: &str,
    prefer_encrypt: Option<PreferEncrypt>) -> Result<Message>
{
    check_participants(profile, envelope)?;
    let inner = gossip::gossip_plaintext_message(
        profile, &envelope.recipients, body)?;
    let msg = seal(profile, sgen, envelope, &inner, prefer_encrypt)?;
    info!("generated Autocrypt gossip message");
    Ok(msg)
}

fn check_participants<P: Profile>(profile: &mut P, envelope: &Envelope)
                                  -> Result<()> {
    if !profile.is_account(&envelope.sender)? {
        return Err(Error::UnknownAccount(envelope.sender.clone()));
    }
    for recipient in &envelope.recipients {
        if !profile.is_peer(recipient)? {
            return Err(Error::UnknownPeer(recipient.clone()));
        }
    }
    Ok(())
}

fn seal<P: Profile, SGEN: SeparatorGen>(
    profile: &mut P, sgen: &mut SGEN, envelope: &Envelope, inner: &Message,
    prefer_encrypt: Option<PreferEncrypt>) -> Result<Message>
{
    let keydata = profile.own_public_keydata(&envelope.sender)?;
    let plaintext = inner.to_string();
    trace!(%plaintext, "encrypting inner message");
    let ciphertext = profile.sign_and_encrypt(
        plaintext.as_bytes(), &envelope.sender, &envelope.recipients)?;

    let mut msg = envelope::encrypted_message(&ciphertext, sgen);
    envelope::add_envelope_headers(&mut msg, envelope);
    envelope::add_autocrypt_header(&mut msg, &envelope.sender, &keydata,
                                   prefer_encrypt)?;
    Ok(msg)
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::envelope::encrypted_payload;
    use crate::gossip::extract_gossip_values;
    use crate::header::{parse_header_value, AUTOCRYPT, AUTOCRYPT_GOSSIP};
    use crate::profile::Crypto;
    use crate::testing::{DetSeparatorGen, FakeProfile};

    fn profile() -> FakeProfile {
        FakeProfile::default()
            .with_account("a@x", "QUFBQQ==")
            .with_peer("b@y", "QkJCQg==")
            .with_peer("c@z", "Q0NDQw==")
    }

    #[test]
    fn autocrypt_message_header_and_body() {
        let mut profile = profile();
        let envelope = Envelope::new("a@x", &["b@y"], "hello");
        let msg = encode_autocrypt_message(
            &mut profile, &mut DetSeparatorGen::default(), &envelope, "hi",
            Some(PreferEncrypt::Mutual)).unwrap();

        let hv = parse_header_value(msg.header(AUTOCRYPT).unwrap()).unwrap();
        assert_eq!("a@x", hv.addr);
        assert_eq!(Some(PreferEncrypt::Mutual), hv.prefer_encrypt);
        assert_eq!("QUFBQQ==", hv.keydata);
        assert_eq!(Some("a@x"), msg.header("From"));
        assert_eq!(Some("b@y"), msg.header("To"));
        assert_eq!(Some("hello"), msg.header("Subject"));

        // Round-trip through wire text, then through the collaborator.
        let wire = Message::parse(&msg.to_string()).unwrap();
        let ciphertext = encrypted_payload(&wire).unwrap();
        let plaintext = profile.decrypt(ciphertext, Some(&"b@y".to_owned()))
            .unwrap();
        let inner = Message::parse(
            std::str::from_utf8(&plaintext).unwrap()).unwrap();
        assert_eq!(Some("hi"), inner.body_text());
        assert!(inner.is_content_type("text", "plain"));
    }

    #[test]
    fn unknown_sender_rejected() {
        let envelope = Envelope::new("mallory@x", &["b@y"], "s");
        assert_matches!(
            encode_autocrypt_message(&mut profile(),
                                     &mut DetSeparatorGen::default(),
                                     &envelope, "hi", None),
            Err(Error::UnknownAccount(ref a)) if a == "mallory@x");
    }

    #[test]
    fn unknown_recipient_rejected() {
        let envelope = Envelope::new("a@x", &["b@y", "d@w"], "s");
        assert_matches!(
            encode_gossip_message(&mut profile(),
                                  &mut DetSeparatorGen::default(),
                                  &envelope, "hi", None),
            Err(Error::UnknownPeer(ref p)) if p == "d@w");
    }

    #[test]
    fn gossip_headers_only_inside_ciphertext() {
        let mut profile = profile();
        let envelope = Envelope::new("a@x", &["b@y", "c@z"], "group");
        let msg = encode_gossip_message(
            &mut profile, &mut DetSeparatorGen::default(), &envelope, "hi all",
            None).unwrap();

        assert_eq!(None, msg.header(AUTOCRYPT_GOSSIP));
        assert_eq!(1, msg.header_all(AUTOCRYPT).count());

        let ciphertext = encrypted_payload(&msg).unwrap();
        let plaintext = profile.decrypt(ciphertext, None).unwrap();
        let inner = Message::parse(
            std::str::from_utf8(&plaintext).unwrap()).unwrap();
        let gossip: Vec<_> = extract_gossip_values(&inner).iter()
            .map(|v| parse_header_value(v).unwrap())
            .map(|hv| (hv.addr, hv.keydata))
            .collect();
        assert_eq!(vec![("b@y".to_owned(), "QkJCQg==".to_owned()),
                        ("c@z".to_owned(), "Q0NDQw==".to_owned())],
                   gossip);
    }
}
