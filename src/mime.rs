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

//! A small MIME message entity and the one place raw message text is parsed.
//!
//! This is not a full MIME implementation; it only supports what the Autocrypt
//! codec needs to inspect and build messages: an ordered header list in which
//! repeated names are preserved, and bodies that are either opaque text or
//! (possibly nested) multiparts.
//!
//! Both UNIX and DOS line-endings are accepted on input. The parsed entity
//! stores LF only, and rendering always produces LF.
//!
//! Folded headers keep their interior line breaks: a header written as
//! `Autocrypt: addr=a@b;\n keydata=...` is stored with the `"\n "` intact, so
//! that header-value grammars layered on top can see where folding happened.
//!
//! Relevant standards:
//!   [RFC 5322]        Header fields and folding
//!   [RFC 2045]        Defines the Content-* headers
//!   [RFC 2046]        Defines Multipart syntax

use std::fmt;
use std::iter::Peekable;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum depth of multipart nesting before a multipart is kept as opaque
/// text instead of being descended into.
const MAX_DEPTH: usize = 64;

/// Identifies the type of a line.
///
/// This enumeration is ordered; a body part ends on a class >=
/// `MultipartDelim`, whereas a multipart itself ends on a class >=
/// `MultipartEnd`. Delimiters of enclosing multiparts rank above both so that
/// a missing terminator of an inner multipart does not swallow its parent.
#[derive(Clone,Copy,Debug,PartialEq,Eq,PartialOrd,Ord)]
pub enum LineClass {
    /// The line did not match any active delimiter.
    Generic,
    /// The line is a delimiter of the innermost multipart.
    MultipartDelim,
    /// The line is the terminator of the innermost multipart.
    MultipartEnd,
    /// The line is a delimiter or terminator of an enclosing multipart.
    OuterDelim,
    /// The end of the input was reached.
    Eof,
}

/// Indicates the ending character(s) on a line.
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum LineEnding {
    /// Carriage-Return followed by Line-Feed, as required by RFC 5322.
    CRLF,
    /// Bare Line-Feed.
    LF,
    /// No line ending; the input ended without one.
    Nil,
}

/// A line read from a `LineReader`.
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct Line<'a> {
    /// The classification of this line.
    pub class: LineClass,
    /// The text of this line, without its line ending.
    pub text: &'a str,
    /// The line ending which delimited this line.
    pub ending: LineEnding,
}

/// Returns whether the given character is "linear whitespace".
fn is_lwsp(ch: char) -> bool {
    ' ' == ch || '\t' == ch
}

impl<'a> Line<'a> {
    /// Returns whether the given line is the first line of a header (assuming
    /// it is in a header block).
    pub fn is_start_of_header(&self) -> bool {
        LineClass::Generic == self.class &&
            self.text.chars().next().map_or(false, |ch| !is_lwsp(ch)) &&
            self.split_header().is_some()
    }

    /// Returns whether the given line is a header continuation (assuming it is
    /// in a header block).
    pub fn is_header_continuation(&self) -> bool {
        LineClass::Generic == self.class &&
            self.text.chars().next().map_or(false, is_lwsp)
    }

    /// Returns whether this line is a generic blank line.
    pub fn is_blank(&self) -> bool {
        LineClass::Generic == self.class && self.text.is_empty()
    }

    /// Like `split_header`, but operates on a plain slice.
    pub fn split_header_slice(text: &str) -> Option<(&str, &str)> {
        // [RFC 5322, section 2.2]
        //
        // > A field name MUST be composed of printable US-ASCII characters
        // > (i.e., characters that have values between 33 and 126,
        // > inclusive), except colon.
        let colon = text.find(':')?;
        let name = &text[..colon];
        if name.is_empty() || !name.bytes().all(|b| b >= 33 && b <= 126) {
            return None;
        }
        Some((name, &text[colon + 1..]))
    }

    /// Attempts to interpret this line as a header, splitting it into its name
    /// and value parts. Leading whitespace in the value is not removed.
    pub fn split_header(&self) -> Option<(&'a str, &'a str)> {
        Line::split_header_slice(self.text)
    }
}

/// Reads physical lines from in-memory message text.
pub struct LineReader<'a> {
    src: &'a str,
    pos: usize,
    curr_class: LineClass,
    curr_text: &'a str,
    curr_ending: LineEnding,
    /// Boundaries of the multiparts currently open, innermost last.
    delims: Vec<String>,
}

impl<'a> LineReader<'a> {
    /// Creates a new `LineReader` positioned on the first line of `src`.
    pub fn new(src: &'a str) -> Self {
        let mut this = LineReader {
            src,
            pos: 0,
            curr_class: LineClass::Generic,
            curr_text: "",
            curr_ending: LineEnding::Nil,
            delims: Vec::new(),
        };
        this.read_next();
        this
    }

    /// Returns the current line from this reader.
    ///
    /// This does not advance the reader.
    pub fn curr(&self) -> Line<'a> {
        Line {
            class: self.curr_class,
            ending: self.curr_ending,
            text: self.curr_text,
        }
    }

    /// Discards the current line and reads the next one.
    ///
    /// If at EOF, this has no effect.
    pub fn read_next(&mut self) {
        if self.pos >= self.src.len() {
            self.curr_class = LineClass::Eof;
            self.curr_text = "";
            self.curr_ending = LineEnding::Nil;
            return;
        }

        let rest = &self.src[self.pos..];
        let (text, ending, consumed) = match rest.find('\n') {
            Some(ix) => match rest[..ix].strip_suffix('\r') {
                Some(text) => (text, LineEnding::CRLF, ix + 1),
                None => (&rest[..ix], LineEnding::LF, ix + 1),
            },
            None => (rest, LineEnding::Nil, rest.len()),
        };
        self.pos += consumed;
        self.curr_text = text;
        self.curr_ending = ending;
        self.curr_class = self.classify(text);
    }

    /// Enters a multipart whose parts are delimited by `delim`.
    pub fn push_multipart_delim(&mut self, delim: String) {
        self.delims.push(delim);
        self.reclassify();
    }

    /// Leaves the innermost multipart.
    pub fn pop_multipart_delim(&mut self) {
        self.delims.pop();
        self.reclassify();
    }

    /// Reads a logical header line, assuming the current line is in a header
    /// block.
    ///
    /// If the current line is not the start of a header, returns false and
    /// consumes nothing. Otherwise, accumulates the header into `accum` and
    /// consumes all of its physical lines. Interior line breaks of a folded
    /// header are kept as `"\n"`.
    pub fn read_header(&mut self, accum: &mut String) -> bool {
        if !self.curr().is_start_of_header() {
            return false;
        }

        accum.clear();
        accum.push_str(self.curr_text);
        self.read_next();
        while self.curr().is_header_continuation() {
            accum.push('\n');
            accum.push_str(self.curr_text);
            self.read_next();
        }
        true
    }

    fn reclassify(&mut self) {
        if LineClass::Eof != self.curr_class {
            self.curr_class = self.classify(self.curr_text);
        }
    }

    fn classify(&self, text: &str) -> LineClass {
        for (ix, delim) in self.delims.iter().enumerate().rev() {
            let rest = match text.strip_prefix("--")
                .and_then(|t| t.strip_prefix(delim.as_str()))
            {
                Some(rest) => rest.trim_end_matches(is_lwsp),
                None => continue,
            };
            // Only linear whitespace may follow the boundary; anything else
            // makes this a longer boundary or plain text.
            let is_end = match rest {
                "" => false,
                "--" => true,
                _ => continue,
            };

            return if ix + 1 != self.delims.len() {
                LineClass::OuterDelim
            } else if is_end {
                LineClass::MultipartEnd
            } else {
                LineClass::MultipartDelim
            };
        }
        LineClass::Generic
    }
}

/// Trait for generating multipart separators.
///
/// In practical use, this will always be `UuidSeparatorGen`, but the tests
/// provide their own deterministic implementation.
pub trait SeparatorGen {
    /// Generates a new, unique multipart separator. The separator must be safe
    /// to splice into a quoted-string without escaping, and must not exceed
    /// 70 characters in length.
    fn gen(&mut self) -> String;
}

/// Separator generator based on random UUIDs.
#[derive(Clone,Copy,Debug,Default)]
pub struct UuidSeparatorGen;
impl SeparatorGen for UuidSeparatorGen {
    fn gen(&mut self) -> String {
        format!("Autocrypt-{}", Uuid::new_v4())
    }
}

/// One header field. The value excludes the leading whitespace after the
/// colon and keeps folding line breaks.
#[derive(Clone,Debug,PartialEq,Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// The body of a multipart entity.
#[derive(Clone,Debug,Default,PartialEq,Eq)]
pub struct Multipart {
    pub boundary: String,
    pub preamble: String,
    pub parts: Vec<Message>,
    pub epilogue: String,
}

#[derive(Clone,Debug,PartialEq,Eq)]
pub enum Body {
    /// Anything that is not a multipart, kept verbatim.
    Text(String),
    Multipart(Multipart),
}

/// A parsed message or body part.
#[derive(Clone,Debug,PartialEq,Eq)]
pub struct Message {
    headers: Vec<Header>,
    body: Body,
}

impl Message {
    /// Creates a message with the given body and no headers.
    pub fn new(body: Body) -> Self {
        Message { headers: Vec::new(), body }
    }

    /// Creates a `text/plain` entity.
    pub fn text(content: &str) -> Self {
        let mut msg = Message::new(Body::Text(content.to_owned()));
        msg.add_header("Content-Type", "text/plain; charset=\"utf-8\"");
        msg.add_header("Content-Transfer-Encoding", "8bit");
        msg
    }

    /// Creates a `multipart/<subtype>` entity with a fresh boundary.
    ///
    /// `params` are extra Content-Type parameters, emitted before the
    /// boundary.
    pub fn multipart<SGEN: SeparatorGen>(
        subtype: &str, params: &[(&str, &str)], sgen: &mut SGEN,
        preamble: &str, parts: Vec<Message>) -> Self
    {
        let boundary = sgen.gen();
        let mut content_type = format!("multipart/{}", subtype);
        for (name, value) in params {
            content_type.push_str(&format!("; {}=\"{}\"", name, value));
        }
        content_type.push_str(&format!(";\n boundary=\"{}\"", boundary));

        let mut msg = Message::new(Body::Multipart(Multipart {
            boundary,
            preamble: preamble.to_owned(),
            parts,
            epilogue: String::new(),
        }));
        msg.add_header("Content-Type", &content_type);
        msg
    }

    /// Parses raw message text.
    ///
    /// This is the only entry point from wire text into the codec; everything
    /// else operates on the parsed `Message`.
    pub fn parse(raw: &str) -> Result<Message> {
        let mut reader = LineReader::new(raw);
        let first = reader.curr();
        if LineClass::Eof == first.class {
            return Err(Error::Mime("empty message".to_owned()));
        }
        if !first.is_start_of_header() && !first.is_blank() {
            return Err(Error::Mime(
                "message does not start with a header block".to_owned()));
        }

        Ok(parse_entity(&mut reader, 0))
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut [Header] {
        &mut self.headers
    }

    /// Returns the value of the first header named `name`, compared
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Returns the values of every header named `name`, in header order.
    pub fn header_all<'s>(&'s self, name: &str)
                          -> impl Iterator<Item = &'s str> + 's {
        let name = name.to_owned();
        self.headers.iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(&name))
            .map(|h| h.value.as_str())
    }

    /// Appends a header. Existing headers of the same name are kept.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push(Header {
            name: name.to_owned(),
            value: value.to_owned(),
        });
    }

    /// Replaces the first header named `name`, or appends one if there is
    /// none.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self.headers.iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
        {
            Some(h) => h.value = value.to_owned(),
            None => self.add_header(name, value),
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns the body text if this is not a multipart.
    pub fn body_text(&self) -> Option<&str> {
        match self.body {
            Body::Text(ref text) => Some(text),
            Body::Multipart(_) => None,
        }
    }

    /// Returns the parts of a multipart, or an empty slice.
    pub fn parts(&self) -> &[Message] {
        match self.body {
            Body::Text(_) => &[],
            Body::Multipart(ref mp) => &mp.parts,
        }
    }

    /// Extracts and parses the Content-Type header.
    pub fn content_type(&self) -> Option<ContentType> {
        self.header("Content-Type").and_then(parse_content_type)
    }

    /// Returns whether the Content-Type is `toplevel/subtype`.
    pub fn is_content_type(&self, toplevel: &str, subtype: &str) -> bool {
        self.content_type().map_or(false, |ct| {
            ct.is_toplevel_type(toplevel) && ct.is_subtype(subtype)
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for header in &self.headers {
            writeln!(f, "{}: {}", header.name, header.value)?;
        }
        writeln!(f)?;

        match self.body {
            Body::Text(ref text) => f.write_str(text),
            Body::Multipart(ref mp) => {
                if !mp.preamble.is_empty() {
                    writeln!(f, "{}", mp.preamble)?;
                }
                for part in &mp.parts {
                    writeln!(f, "--{}", mp.boundary)?;
                    writeln!(f, "{}", part)?;
                }
                writeln!(f, "--{}--", mp.boundary)?;
                f.write_str(&mp.epilogue)
            },
        }
    }
}

/// Parses one entity starting at the current line. Consumes up to, but not
/// including, the first line whose class is greater than `Generic`.
fn parse_entity(src: &mut LineReader<'_>, depth: usize) -> Message {
    let mut msg = Message::new(Body::Text(String::new()));

    let mut header = String::new();
    while src.read_header(&mut header) {
        if let Some((name, value)) = Line::split_header_slice(&header) {
            msg.add_header(name, value.trim_start());
        }
    }
    // The blank line separating headers from the body. A header block ended
    // by anything else means the body starts without a separator.
    if src.curr().is_blank() {
        src.read_next();
    }

    let boundary = msg.content_type()
        .filter(|ct| ct.is_toplevel_type("multipart"))
        .and_then(|ct| ct.param("boundary").map(str::to_owned));
    msg.body = match boundary {
        Some(boundary) if depth < MAX_DEPTH =>
            Body::Multipart(parse_multipart(src, depth, boundary)),
        _ => Body::Text(read_section(src)),
    };
    msg
}

fn parse_multipart(src: &mut LineReader<'_>, depth: usize,
                   boundary: String) -> Multipart {
    src.push_multipart_delim(boundary.clone());
    let preamble = read_section(src);
    let mut parts = Vec::new();
    loop {
        match src.curr().class {
            LineClass::MultipartDelim => {
                src.read_next();
                parts.push(parse_entity(src, depth + 1));
            },
            LineClass::MultipartEnd => {
                src.read_next();
                break;
            },
            // Unterminated multipart; keep what we have.
            _ => break,
        }
    }
    src.pop_multipart_delim();
    let epilogue = read_section(src);

    Multipart { boundary, preamble, parts, epilogue }
}

/// Collects generic lines up to the next delimiter or EOF.
///
/// The line break preceding a delimiter belongs to the delimiter, so text
/// only ends with a newline if it was terminated by EOF after one.
fn read_section(src: &mut LineReader<'_>) -> String {
    let mut text = String::new();
    let mut first = true;
    let mut last_ending = LineEnding::Nil;
    while LineClass::Generic == src.curr().class {
        if !first {
            text.push('\n');
        }
        first = false;
        text.push_str(src.curr().text);
        last_ending = src.curr().ending;
        src.read_next();
    }

    if LineClass::Eof == src.curr().class && LineEnding::Nil != last_ending {
        text.push('\n');
    }
    text
}

/// A deserialised representation of the Content-Type header.
#[derive(Clone,Debug,PartialEq,Eq)]
pub struct ContentType {
    /// The top-level content type, eg, "multipart" or "text".
    pub toplevel: String,
    /// The content subtype, eg, "encrypted" or "plain".
    pub subtype: String,
    /// Parameters in the order they appear.
    pub params: Vec<(String, String)>,
}

impl ContentType {
    /// Returns whether this `ContentType` has a top-level type matching `tl`.
    pub fn is_toplevel_type(&self, tl: &str) -> bool {
        tl.eq_ignore_ascii_case(&self.toplevel)
    }

    /// Returns whether this `ContentType` has a subtype matching `st`.
    ///
    /// The actual subtype may be an X- prefix to `st`.
    pub fn is_subtype(&self, st: &str) -> bool {
        st.eq_ignore_ascii_case(&self.subtype) ||
            (self.subtype.len() > 2 &&
             self.subtype.is_char_boundary(2) &&
             self.subtype[..2].eq_ignore_ascii_case("x-") &&
             st.eq_ignore_ascii_case(&self.subtype[2..]))
    }

    /// Returns the value of the parameter `name`. If it occurs more than
    /// once, the last occurrence wins.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().rev()
            .find(|&(attr, _)| attr.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone,Copy,Debug,PartialEq,Eq)]
enum ContentTypeChar {
    Literal(char),
    Delimiter,
    Slash, Semicolon, Equals,
    Nil,
}

/// An iterator which lexes the Content-Type header, as per [RFC 2045].
///
/// This lexer is generally permissive. It permits mixing quoted strings with
/// tokens in the same word. Unclosed quotes, unbalanced comments, and
/// trailing backslashes are silently ignored.
struct ContentTypeLexer<T: Iterator<Item = char>> {
    src: T,
    comment_depth: u32,
    in_quote: bool,
    backslash: bool,
}

impl<T: Iterator<Item = char>> Iterator for ContentTypeLexer<T> {
    type Item = ContentTypeChar;

    fn next(&mut self) -> Option<ContentTypeChar> {
        use self::ContentTypeChar::*;

        self.src.next().map(|ch| match ch {
            // Backslash escapes occur within comments and quoted-strings.
            _ if self.backslash => {
                self.backslash = false;
                if self.comment_depth > 0 { Nil } else { Literal(ch) }
            },
            '\\' => {
                self.backslash = true;
                Nil
            },

            '"' => {
                self.in_quote = !self.in_quote;
                Nil
            },
            // Folding inside a quoted-string is deleted.
            '\r' | '\n' if self.in_quote => Nil,
            _ if self.in_quote => {
                if self.comment_depth > 0 { Nil } else { Literal(ch) }
            },

            // Comments nest and count as delimiters
            '(' => {
                self.comment_depth += 1;
                Nil
            },
            ')' => {
                self.comment_depth = self.comment_depth.saturating_sub(1);
                Delimiter
            },
            _ if self.comment_depth > 0 => Nil,

            '/' => Slash,
            '=' => Equals,
            ';' => Semicolon,
            ' ' | '\t' | '\r' | '\n' => Delimiter,
            _ => Literal(ch),
        })
    }
}

/// Parses a Content-Type header value.
///
/// If it successfully parses the Content-Type, at the very least it is
/// guaranteed that there is a non-empty toplevel type and subtype.
pub fn parse_content_type(data: &str) -> Option<ContentType> {
    use self::ContentTypeChar::*;
    type CTC = ContentTypeChar;

    let mut it = ContentTypeLexer {
        src: data.chars(),
        comment_depth: 0,
        in_quote: false,
        backslash: false,
    }.filter(|ch| Nil != *ch).peekable();

    fn skip_delims<T: Iterator<Item = CTC>>(it: &mut Peekable<T>) {
        while Some(&Delimiter) == it.peek() {
            it.next();
        }
    }

    fn skip_to<T: Iterator<Item = CTC>>(it: &mut Peekable<T>, ch: CTC) {
        while it.peek().map_or(false, |a| &ch != a) {
            it.next();
        }
        it.next();
    }

    fn read_word<T: Iterator<Item = CTC>>(it: &mut Peekable<T>) -> String {
        skip_delims(it);

        let mut dst = String::new();
        while let Some(&Literal(ch)) = it.peek() {
            dst.push(ch);
            it.next();
        }
        dst
    }

    let toplevel = read_word(&mut it);
    skip_to(&mut it, Slash);
    let subtype = read_word(&mut it);
    skip_to(&mut it, Semicolon);

    let mut params = Vec::new();
    while it.peek().is_some() {
        let attr = read_word(&mut it);
        skip_to(&mut it, Equals);
        let value = read_word(&mut it);
        skip_to(&mut it, Semicolon);

        if !attr.is_empty() {
            params.push((attr, value));
        }
    }

    if !toplevel.is_empty() && !subtype.is_empty() {
        Some(ContentType { toplevel, subtype, params })
    } else {
        None
    }
}
