use std::fs;

use presently_service::documents::{
    DocumentError, DocumentLocation, FutureDocumentFromFilesystem, FutureDocumentFromUri,
    GeneralDocumentFuture, SourceDocument,
};
use presently_test::{self as test, DocumentServer};

use crate::utils::default_package;

#[tokio::test(flavor = "multi_thread")]
async fn test_download_once() {
    test::setup();
    let server = DocumentServer::new([("city.pdf", b"%PDF-1.7 city".as_slice())]);
    let package = default_package();
    let document = GeneralDocumentFuture::new(FutureDocumentFromUri::new(
        server.url("documents/city.pdf"),
        0,
    ));

    let mut completions = Vec::new();
    let mut presents = Vec::new();
    for _ in 0..3 {
        let present = document.get_asynchronous_future(&package).realize("test");
        completions.push(present.as_async_ref().unwrap().completion());
        presents.push(present);
    }
    for completion in completions {
        let completed = completion.await.unwrap();
        let fetched = completed.wait().into_typed::<SourceDocument>().unwrap();
        assert_eq!(fetched.bytes, b"%PDF-1.7 city");
        assert_eq!(fetched.location, DocumentLocation::Uri(server.url("documents/city.pdf")));
    }

    assert_eq!(
        server.all_hits(),
        [("/documents/city.pdf".to_owned(), 1)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_download_error_status() {
    test::setup();
    let server = DocumentServer::new([]);
    let package = default_package();
    let document = GeneralDocumentFuture::new(FutureDocumentFromUri::new(
        server.url("respond_statuscode/500/city.pdf"),
        0,
    ));

    let present = document.get_asynchronous_future(&package).realize("test");
    let completed = present.as_async_ref().unwrap().completion().await.unwrap();
    let err = completed.wait().into_result().unwrap_err();

    let inner = err.inner().unwrap().downcast_ref::<DocumentError>().unwrap();
    assert!(matches!(inner, DocumentError::Download(_)), "{inner:?}");
}

#[test]
fn test_parse_and_fetch() {
    test::setup();
    let dir = test::tempdir();
    fs::create_dir(dir.path().join("scans")).unwrap();
    fs::write(dir.path().join("scans/city.pdf"), b"%PDF-1.7").unwrap();

    let xml = r#"<Document><FilesystemDocument path="scans/city.pdf" page_number="3"/></Document>"#;
    let document = GeneralDocumentFuture::parse(xml.as_bytes(), dir.path()).unwrap();
    let expected = FutureDocumentFromFilesystem::new(dir.path().join("scans/city.pdf"), 3).unwrap();
    assert_eq!(document.robust_hash(), GeneralDocumentFuture::new(expected).robust_hash());

    let package = default_package();
    let fetched = document.realize_synchronously(&package).unwrap();
    assert_eq!(fetched.page_number, 3);
    assert_eq!(fetched.bytes, b"%PDF-1.7");
}
