use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use quick_xml::events::BytesStart;

use crate::pipeline::{Future, Present, RobustHash};

use super::xml::{self, ParseErrorKind};
use super::{DocumentError, DocumentLocation, SourceDocument};

/// Reads a document from the local file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutureDocumentFromFilesystem {
    path: PathBuf,
    page_number: u32,
}

impl FutureDocumentFromFilesystem {
    pub(crate) const TAG: &'static str = "FilesystemDocument";

    /// Creates a future reading `path`, made absolute against the current directory.
    pub fn new(path: impl AsRef<Path>, page_number: u32) -> io::Result<Self> {
        Ok(Self {
            path: std::path::absolute(path)?,
            page_number,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub(crate) fn to_element(&self, path_base: &Path) -> BytesStart<'static> {
        // Paths below the base are stored relative to it, so descriptions can be moved together
        // with their documents.
        let path = self.path.strip_prefix(path_base).unwrap_or(&self.path);
        let mut element = BytesStart::new(Self::TAG);
        element.push_attribute(("path", path.to_string_lossy().as_ref()));
        element.push_attribute(("page_number", self.page_number.to_string().as_str()));
        element
    }

    pub(crate) fn from_element(
        element: &BytesStart<'_>,
        path_base: &Path,
    ) -> Result<Self, ParseErrorKind> {
        let path = xml::required_attribute(element, Self::TAG, "path")?;
        let page_number = xml::page_number(element, Self::TAG)?;
        // A relative base resolves against the current directory, like paths passed to `new`.
        let resolved = std::path::absolute(path_base.join(&path)).map_err(|err| {
            ParseErrorKind::InvalidAttribute {
                attribute: "path",
                value: path,
                reason: err.to_string(),
            }
        })?;
        Ok(Self {
            path: resolved,
            page_number,
        })
    }

    fn read(&self) -> Result<SourceDocument, DocumentError> {
        let bytes = fs::read(&self.path).map_err(|source| DocumentError::Read {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), size = bytes.len(), "Read document");
        Ok(SourceDocument {
            location: DocumentLocation::Path(self.path.clone()),
            page_number: self.page_number,
            bytes,
        })
    }
}

impl Future for FutureDocumentFromFilesystem {
    fn realize(&self, _tag: &str) -> Present {
        Present::from_result(self.read())
    }

    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_tag("FutureDocumentFromFilesystem");
        hash.accumulate_path("path", &self.path);
        hash.accumulate_int("page_number", i64::from(self.page_number));
    }
}
