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

use std::env;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Read, Write, stdin, stdout, stderr};
use std::process::exit;

use getopts::{Matches, Options};
use tracing::info;
use uuid::Uuid;

use autocrypt_codec::crypt::GpgProfile;
use autocrypt_codec::decode::{self, Decoded, MessageKind};
use autocrypt_codec::encode;
use autocrypt_codec::envelope::Envelope;
use autocrypt_codec::error::{Error, Result};
use autocrypt_codec::header::PreferEncrypt;
use autocrypt_codec::mime::{Message, UuidSeparatorGen};
use autocrypt_codec::setup::{self, Passphrase, Validation};

const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_IOERR: i32 = 71;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()))
        .with_writer(io::stderr)
        .init();

    let args: Vec<_> = env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "autocrypt".into());

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("f", "from", "sender address (send, setup)", "ADDR");
    opts.optmulti("t", "to", "recipient address (send)", "ADDR");
    opts.optopt("s", "subject", "subject line (send)", "TEXT");
    opts.optflag("g", "gossip",
                 "include every recipient's key in the message (send)");
    opts.optflag("m", "mutual", "advertise prefer-encrypt=mutual");
    opts.optopt("p", "passphrase",
                "setup code (setup, decode)", "CODE");
    opts.optflag("l", "lenient",
                 "only warn about setup message validation failures");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            let _ = writeln!(stderr(), "Invalid usage: {}", f);
            print_usage(stderr(), &program, &opts);
            exit(EX_USAGE);
        }
    };

    if matches.opt_present("h") {
        print_usage(stdout(), &program, &opts);
        exit(0);
    }

    let command = match matches.free.as_slice() {
        [command] => command.clone(),
        _ => {
            let _ = writeln!(stderr(), "Expected exactly one command.");
            print_usage(stderr(), &program, &opts);
            exit(EX_USAGE);
        }
    };

    let res = match command.as_str() {
        "decode" => run_decode(&matches),
        "send" => run_send(&matches),
        "setup" => run_setup(&matches),
        "passphrase" => {
            println!("{}", Passphrase::generate().display_blocks());
            Ok(())
        },
        _ => {
            let _ = writeln!(stderr(), "Unknown command: {}", command);
            print_usage(stderr(), &program, &opts);
            exit(EX_USAGE);
        }
    };

    if let Err(err) = res {
        let _ = writeln!(stderr(), "Error: {}", err);
        exit(match err {
            Error::Io(_) => EX_IOERR,
            _ => EX_DATAERR,
        });
    }
}

fn print_usage<W : Write>(mut dst: W, program: &str, opts: &Options) {
    let brief = format!(
        "Usage: {} [options] <command>\n\n\
         Commands:\n    \
             decode      decode the message on stdin\n    \
             send        encrypt the body on stdin to --to\n    \
             setup       generate a setup message for --from\n    \
             passphrase  print a fresh setup code", program);
    let _ = write!(dst, "{}", opts.usage(&brief));
}

fn usage_error(msg: &str) -> ! {
    let _ = writeln!(stderr(), "{}", msg);
    exit(EX_USAGE);
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    stdin().read_to_string(&mut text)?;
    Ok(text)
}

fn passphrase_opt(matches: &Matches) -> Result<Option<Passphrase>> {
    matches.opt_str("p").map(|p| Passphrase::parse(&p)).transpose()
}

/// Asks for the setup code on the controlling terminal, since stdin carries
/// the message.
fn prompt_passphrase() -> Result<Passphrase> {
    let mut tty = OpenOptions::new().read(true).write(true)
        .open("/dev/tty")?;
    write!(tty, "Setup code: ")?;
    tty.flush()?;
    let mut line = String::new();
    BufReader::new(tty).read_line(&mut line)?;
    Passphrase::parse(&line)
}

fn run_decode(matches: &Matches) -> Result<()> {
    let validation = if matches.opt_present("l") {
        Validation::Lenient
    } else {
        Validation::Strict
    };
    let msg = Message::parse(&read_stdin()?)?;
    let mut profile = GpgProfile::new()?;

    let mut passphrase = passphrase_opt(matches)?;
    if passphrase.is_none() &&
        MessageKind::SetupMessage == decode::classify(&msg)?
    {
        passphrase = Some(prompt_passphrase()?);
    }

    let out = match decode::decode_message(&mut profile, &msg,
                                           passphrase.as_ref(), validation)? {
        Decoded::Plain(text) | Decoded::Autocrypt(text) |
        Decoded::SetupKey(text) => text,
        Decoded::Gossip { plaintext, imported } => {
            info!(?imported, "imported gossip keys");
            plaintext
        },
    };
    stdout().write_all(out.as_bytes())?;
    Ok(())
}

fn run_send(matches: &Matches) -> Result<()> {
    let sender = matches.opt_str("f")
        .unwrap_or_else(|| usage_error("send requires --from"));
    let recipients = matches.opt_strs("t");
    if recipients.is_empty() {
        usage_error("send requires at least one --to");
    }
    let subject = matches.opt_str("s").unwrap_or_default();
    let prefer_encrypt = if matches.opt_present("m") {
        Some(PreferEncrypt::Mutual)
    } else {
        None
    };

    let domain = sender.rsplit('@').next().unwrap_or("localhost");
    let envelope = Envelope::new(&sender, &recipients, &subject)
        .with_message_id(&format!("<{}@{}>", Uuid::new_v4(), domain));
    let body = read_stdin()?;

    let mut profile = GpgProfile::new()?;
    let msg = if matches.opt_present("g") {
        encode::encode_gossip_message(&mut profile, &mut UuidSeparatorGen,
                                      &envelope, &body, prefer_encrypt)?
    } else {
        encode::encode_autocrypt_message(&mut profile, &mut UuidSeparatorGen,
                                         &envelope, &body, prefer_encrypt)?
    };
    write!(stdout(), "{}", msg)?;
    Ok(())
}

fn run_setup(matches: &Matches) -> Result<()> {
    let sender = matches.opt_str("f")
        .unwrap_or_else(|| usage_error("setup requires --from"));
    let prefer_encrypt = if matches.opt_present("m") {
        PreferEncrypt::Mutual
    } else {
        PreferEncrypt::NoPreference
    };

    let mut profile = GpgProfile::new()?;
    let (msg, passphrase) = setup::build_setup_message(
        &mut profile, &mut UuidSeparatorGen, &sender, prefer_encrypt,
        passphrase_opt(matches)?)?;
    write!(stdout(), "{}", msg)?;
    writeln!(stderr(), "Setup code:\n{}", passphrase.display_blocks())?;
    Ok(())
}
