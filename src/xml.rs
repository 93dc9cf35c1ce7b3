//! Small XML tree reader shared by the feed and OPML parsers.
//!
//! Documents are transcoded to UTF-8 first (see [`decode_text`]) and then read into a
//! throwaway [`Element`] tree. Element and attribute names are namespace-stripped local
//! names, so `<dc:date>` is looked up as `date`.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Maximum element nesting accepted before a document is rejected.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Syntax(#[from] quick_xml::Error),
    #[error("document has no root element")]
    Empty,
    #[error("document ends inside <{0}>")]
    Truncated(String),
    #[error("nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// How forgiving the reader is about malformed markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// End tags must match and entities must resolve.
    Strict,
    /// Mismatched end tags close the elements they skip over and unmatched end tags
    /// are ignored. Attribute values may be unquoted. Entities that do not resolve are
    /// kept verbatim while the rest of the text is still unescaped.
    Lenient,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    /// Character data directly inside this element, CDATA included, trimmed once the
    /// element closes.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    /// Reads the first root element of `text`. Anything after the root closes is ignored.
    pub fn parse(text: &str, mode: Mode) -> Result<Element, XmlError> {
        let mut reader = Reader::from_str(text);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        if mode == Mode::Lenient {
            config.check_end_names = false;
            config.allow_unmatched_ends = true;
        }

        let mut open: Vec<Element> = Vec::new();
        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    if open.len() >= MAX_DEPTH {
                        return Err(XmlError::TooDeep(MAX_DEPTH));
                    }
                    open.push(Element::from_start(&start, &reader, mode)?);
                }
                Event::End(end) => {
                    let local = end.local_name();
                    let name = String::from_utf8_lossy(local.as_ref());
                    let Some(depth) = open.iter().rposition(|element| element.name == name)
                    else {
                        continue;
                    };
                    while open.len() > depth {
                        let Some(mut closed) = open.pop() else { break };
                        trim_in_place(&mut closed.text);
                        match open.last_mut() {
                            Some(parent) => parent.children.push(closed),
                            None => return Ok(closed),
                        }
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = open.last_mut() {
                        match mode {
                            Mode::Strict => current.text.push_str(&text.unescape()?),
                            Mode::Lenient => current
                                .text
                                .push_str(&unescape_lenient(&String::from_utf8_lossy(&text))),
                        }
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = open.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        match open.pop() {
            Some(unclosed) => Err(XmlError::Truncated(unclosed.name)),
            None => Err(XmlError::Empty),
        }
    }

    fn from_start(
        start: &BytesStart<'_>,
        reader: &Reader<&[u8]>,
        mode: Mode,
    ) -> Result<Self, XmlError> {
        let lenient = mode == Mode::Lenient;
        let mut attributes = if lenient {
            start.html_attributes()
        } else {
            start.attributes()
        };
        attributes.with_checks(!lenient);

        let mut attrs = Vec::new();
        for attr in attributes {
            let attr = match attr {
                Ok(attr) => attr,
                Err(_) if lenient => continue,
                Err(err) => return Err(quick_xml::Error::from(err).into()),
            };
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = if lenient {
                unescape_lenient(&String::from_utf8_lossy(&attr.value)).into_owned()
            } else {
                attr.decode_and_unescape_value(reader.decoder())?.into_owned()
            };
            attrs.push((key, value));
        }

        Ok(Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attrs,
            text: String::new(),
            children: Vec::new(),
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Text of the first child called `name`, or `""` when there is none.
    pub fn child_text(&self, name: &str) -> &str {
        self.child(name).map_or("", |child| child.text.as_str())
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn trim_in_place(text: &mut String) {
    let trimmed = text.trim();
    if trimmed.len() != text.len() {
        *text = trimmed.to_string();
    }
}

/// Resolves each entity on its own; one that does not resolve is kept as written.
fn unescape_lenient(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        let resolved = rest.find(';').and_then(|end| {
            let value = unescape(&rest[..=end]).ok()?;
            Some((value.into_owned(), end + 1))
        });
        match resolved {
            Some((value, len)) => {
                out.push_str(&value);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Transcodes a raw document to UTF-8.
///
/// A byte-order mark takes precedence, then the `encoding` label of the XML
/// declaration. Unknown labels, and UTF-16 labels on a document whose declaration was
/// readable as ASCII, fall back to UTF-8. Invalid sequences are replaced, not rejected.
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let encoding = declared_encoding(bytes)
        .and_then(Encoding::for_label)
        .map_or(UTF_8, Encoding::output_encoding);
    let (text, _, _) = encoding.decode(bytes);
    text
}

fn declared_encoding(bytes: &[u8]) -> Option<&[u8]> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let head = bytes.strip_prefix(b"<?xml")?;
    let end = head.windows(2).position(|window| window == b"?>")?;
    let declaration = &head[..end];

    let at = declaration
        .windows(8)
        .position(|window| window == b"encoding")?;
    let rest = declaration[at + 8..].trim_ascii_start();
    let rest = rest.strip_prefix(b"=")?.trim_ascii_start();
    let (&quote, rest) = rest.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let close = rest.iter().position(|&byte| byte == quote)?;
    Some(&rest[..close])
}
