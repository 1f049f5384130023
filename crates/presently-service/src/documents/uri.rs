use std::fs;
use std::sync::OnceLock;
use std::time::Duration;

use quick_xml::events::BytesStart;
use url::Url;

use crate::pipeline::{Future, Present, RobustHash};

use super::xml::{self, ParseErrorKind};
use super::{DocumentError, DocumentLocation, SourceDocument};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// The blocking client shared by all downloads.
fn http_client() -> Result<&'static reqwest::blocking::Client, DocumentError> {
    static CLIENT: OnceLock<reqwest::blocking::Client> = OnceLock::new();
    if let Some(client) = CLIENT.get() {
        return Ok(client);
    }
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(DOWNLOAD_TIMEOUT)
        .build()?;
    Ok(CLIENT.get_or_init(|| client))
}

/// Fetches a document from a URI.
///
/// `file` URIs are read from the local file system, `http` and `https` URIs are downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutureDocumentFromUri {
    uri: Url,
    page_number: u32,
}

impl FutureDocumentFromUri {
    pub(crate) const TAG: &'static str = "UriDocument";

    pub fn new(uri: Url, page_number: u32) -> Self {
        Self { uri, page_number }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub(crate) fn to_element(&self) -> BytesStart<'static> {
        let mut element = BytesStart::new(Self::TAG);
        element.push_attribute(("uri", self.uri.as_str()));
        element.push_attribute(("page_number", self.page_number.to_string().as_str()));
        element
    }

    pub(crate) fn from_element(element: &BytesStart<'_>) -> Result<Self, ParseErrorKind> {
        let uri = xml::required_attribute(element, Self::TAG, "uri")?;
        let uri = Url::parse(&uri).map_err(|err| ParseErrorKind::InvalidAttribute {
            attribute: "uri",
            value: uri.clone(),
            reason: err.to_string(),
        })?;
        let page_number = xml::page_number(element, Self::TAG)?;
        Ok(Self { uri, page_number })
    }

    fn fetch(&self) -> Result<SourceDocument, DocumentError> {
        let bytes = match self.uri.scheme() {
            "file" => {
                let path = self
                    .uri
                    .to_file_path()
                    .map_err(|()| DocumentError::InvalidFileUri(self.uri.clone()))?;
                fs::read(&path).map_err(|source| DocumentError::Read { path, source })?
            }
            "http" | "https" => {
                let response = http_client()?
                    .get(self.uri.clone())
                    .send()?
                    .error_for_status()?;
                response.bytes()?.to_vec()
            }
            scheme => return Err(DocumentError::UnsupportedScheme(scheme.to_owned())),
        };
        tracing::debug!(uri = %self.uri, size = bytes.len(), "Fetched document");

        Ok(SourceDocument {
            location: DocumentLocation::Uri(self.uri.clone()),
            page_number: self.page_number,
            bytes,
        })
    }
}

impl Future for FutureDocumentFromUri {
    fn realize(&self, _tag: &str) -> Present {
        Present::from_result(self.fetch())
    }

    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_tag("FutureDocumentFromUri");
        hash.accumulate_str("uri", self.uri.as_str());
        hash.accumulate_int("page_number", i64::from(self.page_number));
    }
}
