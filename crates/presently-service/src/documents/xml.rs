use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use thiserror::Error;

/// An error encountered while parsing a document description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (at byte {position})")]
pub struct ParseError {
    /// The byte offset into the input at which the error was detected.
    pub position: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("malformed XML: {0}")]
    Malformed(String),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("expected element `{expected}`, found `{found}`")]
    UnexpectedElement {
        expected: &'static str,
        found: String,
    },
    #[error("unrecognized element `{found}` in `{parent}`")]
    UnknownElement { parent: &'static str, found: String },
    #[error("too many specs in `{0}`")]
    TooManySpecs(&'static str),
    #[error("no spec in `{0}`")]
    NoSpec(&'static str),
    #[error("missing attribute `{attribute}` on `{element}`")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("invalid value {value:?} for attribute `{attribute}`: {reason}")]
    InvalidAttribute {
        attribute: &'static str,
        value: String,
        reason: String,
    },
}

/// A child element, read from either `<Tag/>` or `<Tag>…</Tag>`.
pub(crate) struct Child {
    pub element: BytesStart<'static>,
    /// The byte offset right after the start tag.
    pub position: usize,
}

/// Reads a single element and the elements directly nested inside it.
pub(crate) struct ElementReader<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

impl<R: BufRead> ElementReader<R> {
    /// Skips to the root element, which must be `tag`.
    pub fn open(inner: R, tag: &'static str) -> Result<Self, ParseError> {
        let mut reader = Reader::from_reader(inner);
        reader.trim_text(true);
        let mut this = Self {
            reader,
            buf: Vec::new(),
        };

        loop {
            match this.next_event()? {
                Event::Start(e) if e.name().as_ref() == tag.as_bytes() => return Ok(this),
                Event::Empty(e) if e.name().as_ref() == tag.as_bytes() => {
                    return Err(this.error(ParseErrorKind::NoSpec(tag)));
                }
                Event::Start(e) | Event::Empty(e) => {
                    return Err(this.error(ParseErrorKind::UnexpectedElement {
                        expected: tag,
                        found: element_name(&e),
                    }));
                }
                Event::Eof => return Err(this.error(ParseErrorKind::UnexpectedEof)),
                // declarations, comments and the like
                _ => {}
            }
        }
    }

    /// Returns the next nested element, or `None` once the closing tag was reached.
    ///
    /// Content nested deeper than one level is skipped.
    pub fn next_child(&mut self) -> Result<Option<Child>, ParseError> {
        loop {
            let (element, has_content) = match self.next_event()? {
                Event::Start(e) => (e.into_owned(), true),
                Event::Empty(e) => (e.into_owned(), false),
                Event::End(_) => return Ok(None),
                Event::Eof => return Err(self.error(ParseErrorKind::UnexpectedEof)),
                _ => continue,
            };
            let position = self.position();
            if has_content {
                let mut skipped = Vec::new();
                self.reader
                    .read_to_end_into(QName(element.name().as_ref()), &mut skipped)
                    .map_err(|err| self.error(ParseErrorKind::Malformed(err.to_string())))?;
            }
            return Ok(Some(Child { element, position }));
        }
    }

    pub fn position(&self) -> usize {
        self.reader.buffer_position() as usize
    }

    pub fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            position: self.position(),
            kind,
        }
    }

    fn next_event(&mut self) -> Result<Event<'static>, ParseError> {
        self.buf.clear();
        let event = self
            .reader
            .read_event_into(&mut self.buf)
            .map(Event::into_owned);
        event.map_err(|err| self.error(ParseErrorKind::Malformed(err.to_string())))
    }
}

pub(crate) fn element_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.name().as_ref()).into_owned()
}

pub(crate) fn required_attribute(
    element: &BytesStart<'_>,
    element_name: &'static str,
    attribute: &'static str,
) -> Result<String, ParseErrorKind> {
    let value = element
        .try_get_attribute(attribute)
        .map_err(|err| ParseErrorKind::Malformed(err.to_string()))?
        .ok_or(ParseErrorKind::MissingAttribute {
            element: element_name,
            attribute,
        })?;
    let value = value
        .unescape_value()
        .map_err(|err| ParseErrorKind::Malformed(err.to_string()))?;
    Ok(value.into_owned())
}

pub(crate) fn page_number(
    element: &BytesStart<'_>,
    element_name: &'static str,
) -> Result<u32, ParseErrorKind> {
    let value = required_attribute(element, element_name, "page_number")?;
    value
        .parse()
        .map_err(|err: std::num::ParseIntError| ParseErrorKind::InvalidAttribute {
            attribute: "page_number",
            value: value.clone(),
            reason: err.to_string(),
        })
}
