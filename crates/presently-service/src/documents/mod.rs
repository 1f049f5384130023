//! Futures that fetch source documents, and their persisted descriptions.
//!
//! A document is described by a [`GeneralDocumentFuture`], which wraps exactly one concrete
//! document future. Descriptions are persisted as a `<Document>` element holding a single child:
//!
//! ```xml
//! <Document>
//!   <FilesystemDocument path="scans/city.pdf" page_number="0"/>
//! </Document>
//! ```
//!
//! File system paths below the `path_base` given to [`GeneralDocumentFuture::write_xml`] are
//! stored relative to it, and resolved against the `path_base` given to
//! [`GeneralDocumentFuture::parse`]. The identity of a document future always uses the absolute
//! path, so writing and parsing a description preserves its [`FutureKey`].

use std::fmt;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use thiserror::Error;
use url::Url;

use crate::caching::CachePackage;
use crate::pipeline::{ComputationError, Future, FutureKey, Present, RobustHash, SharedFuture};

mod filesystem;
mod uri;
mod xml;

pub use filesystem::FutureDocumentFromFilesystem;
pub use uri::FutureDocumentFromUri;
pub use xml::{ParseError, ParseErrorKind};

use xml::{ElementReader, element_name};

/// Where a [`SourceDocument`] was fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentLocation {
    Path(PathBuf),
    Uri(Url),
}

impl fmt::Display for DocumentLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Uri(uri) => write!(f, "{uri}"),
        }
    }
}

/// The raw contents of a fetched document.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub location: DocumentLocation,
    pub page_number: u32,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDocument")
            .field("location", &self.location)
            .field("page_number", &self.page_number)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// An error fetching a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read document {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("`{0}` does not name a local file")]
    InvalidFileUri(Url),
    #[error("unsupported URI scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("failed to download document")]
    Download(#[from] reqwest::Error),
}

/// One of the concrete document futures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFuture {
    Filesystem(FutureDocumentFromFilesystem),
    Uri(FutureDocumentFromUri),
}

impl From<FutureDocumentFromFilesystem> for DocumentFuture {
    fn from(future: FutureDocumentFromFilesystem) -> Self {
        Self::Filesystem(future)
    }
}

impl From<FutureDocumentFromUri> for DocumentFuture {
    fn from(future: FutureDocumentFromUri) -> Self {
        Self::Uri(future)
    }
}

impl Future for DocumentFuture {
    fn realize(&self, tag: &str) -> Present {
        match self {
            Self::Filesystem(future) => future.realize(tag),
            Self::Uri(future) => future.realize(tag),
        }
    }

    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        match self {
            Self::Filesystem(future) => future.accumulate_robust_hash(hash),
            Self::Uri(future) => future.accumulate_robust_hash(hash),
        }
    }
}

/// A description of a source document, independent of where it is fetched from.
#[derive(Debug, Clone)]
pub struct GeneralDocumentFuture {
    document: Arc<DocumentFuture>,
}

impl GeneralDocumentFuture {
    const TAG: &'static str = "Document";

    pub fn new(document: impl Into<DocumentFuture>) -> Self {
        Self {
            document: Arc::new(document.into()),
        }
    }

    pub fn document_future(&self) -> &DocumentFuture {
        &self.document
    }

    /// Writes the `<Document>` description of this future.
    pub fn write_xml(&self, writer: impl io::Write, path_base: &Path) -> io::Result<()> {
        let child = match &*self.document {
            DocumentFuture::Filesystem(future) => future.to_element(path_base),
            DocumentFuture::Uri(future) => future.to_element(),
        };

        let mut writer = Writer::new_with_indent(writer, b' ', 2);
        for event in [
            Event::Start(BytesStart::new(Self::TAG)),
            Event::Empty(child),
            Event::End(BytesEnd::new(Self::TAG)),
        ] {
            writer
                .write_event(event)
                .map_err(|err| io::Error::other(err.to_string()))?;
        }
        Ok(())
    }

    /// Parses a `<Document>` description.
    ///
    /// The element must contain exactly one recognized document spec.
    pub fn parse(reader: impl BufRead, path_base: &Path) -> Result<Self, ParseError> {
        let mut reader = ElementReader::open(reader, Self::TAG)?;
        let mut document = None;

        while let Some(child) = reader.next_child()? {
            let name = child.element.name();
            let parsed = if name.as_ref() == FutureDocumentFromFilesystem::TAG.as_bytes() {
                FutureDocumentFromFilesystem::from_element(&child.element, path_base)
                    .map(DocumentFuture::from)
            } else if name.as_ref() == FutureDocumentFromUri::TAG.as_bytes() {
                FutureDocumentFromUri::from_element(&child.element).map(DocumentFuture::from)
            } else {
                Err(ParseErrorKind::UnknownElement {
                    parent: Self::TAG,
                    found: element_name(&child.element),
                })
            };
            let error = |kind| ParseError {
                position: child.position,
                kind,
            };

            let parsed = parsed.map_err(error)?;
            if document.is_some() {
                return Err(error(ParseErrorKind::TooManySpecs(Self::TAG)));
            }
            document = Some(parsed);
        }

        match document {
            Some(document) => Ok(Self::new(document)),
            None => Err(reader.error(ParseErrorKind::NoSpec(Self::TAG))),
        }
    }

    /// A future that fetches the document through the document fetch cache.
    pub fn get_synchronous_future(&self, package: &CachePackage) -> SharedFuture {
        package.get_synchronous_future(self.document.clone())
    }

    /// A future that fetches the document on the compute scheduler.
    pub fn get_asynchronous_future(&self, package: &CachePackage) -> SharedFuture {
        package.get_asynchronous_future(self.document.clone())
    }

    /// Fetches the document on the calling thread.
    pub fn realize_synchronously(
        &self,
        package: &CachePackage,
    ) -> Result<Arc<SourceDocument>, ComputationError> {
        self.get_synchronous_future(package)
            .realize("GeneralDocumentFuture::realize_synchronously")
            .into_typed()
    }

    pub fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        self.document.accumulate_robust_hash(hash);
    }

    pub fn robust_hash(&self) -> FutureKey {
        self.document.robust_hash()
    }
}
