mod common;

use common::*;
use folio::{
    ArchiveError, Diagnostic, Error, LoadOptions, MalformedPackageError, MediaOverlayError, TocError, cover_image,
    read_epub, read_epub_from_bytes, read_epub_with,
};
use tempfile::TempDir;

#[test]
fn test_book_one_loads_without_audio() {
    let dir = TempDir::new().unwrap();
    let path = book_one().write_to(dir.path(), "bookOne.epub");

    let loaded = read_epub(&path).expect("Failed to read EPUB");
    let book = &loaded.book;

    assert_eq!(book.title(), "Book One");
    assert_eq!(book.metadata().author(), Some("Test Author"));
    assert_eq!(book.identity(), "urn:uuid:book-one");
    assert_eq!(book.spine_len(), 10);
    assert!(!book.has_audio());
    assert!(!loaded.is_degraded());

    for item in book.spine() {
        assert!(book.resource(&item.resource_id).is_some());
    }
    assert_eq!(book.spine_resource(0).unwrap().path, "OEBPS/text/ch1.xhtml");
    assert!(book.spine_resource(0).unwrap().size.is_some());

    assert_eq!(book.toc().len(), 10);
    assert_eq!(book.toc()[3].title, "Chapter 4");
    assert_eq!(book.toc()[3].target.resource_id, "ch4");
}

#[test]
fn test_book_two_overlays() {
    let loaded = read_epub_from_bytes(book_two().to_bytes()).unwrap();
    let book = &loaded.book;

    assert!(book.has_audio());
    assert!(book.media_overlay(0).is_none());
    assert!(book.media_overlay(1).is_none());

    let overlay = book.media_overlay(2).expect("spine item 2 is narrated");
    let fragments: Vec<_> = overlay.entries().iter().map(|e| e.fragment_id.as_str()).collect();
    assert_eq!(fragments, ["frag1", "frag2"]);
    assert_eq!(overlay.entries()[0].end, 3.2);
    assert_eq!(overlay.entries()[1].end, 7.0);
    assert_eq!(overlay.entries()[0].audio_path.as_deref(), Some("OEBPS/audio/ch3.mp3"));

    assert_eq!(overlay.locate(5.0).map(|i| overlay.entries()[i].fragment_id.as_str()), Some("frag2"));
    assert_eq!(overlay.locate(8.0), None);

    // NCX outline with a nested section link into the same document.
    let flat: Vec<_> = book
        .toc_flat()
        .into_iter()
        .map(|(depth, e)| (depth, e.title.clone(), e.target.fragment.clone()))
        .collect();
    assert_eq!(flat.len(), 5);
    assert_eq!(flat[3], (1, "Second part".to_string(), Some("frag2".to_string())));
}

#[test]
fn test_unknown_spine_item_fails() {
    let result = read_epub_from_bytes(missing_spine_item().to_bytes());
    assert!(matches!(
        result,
        Err(Error::MalformedPackage(MalformedPackageError::UnknownSpineItem(ref id))) if id == "chap9"
    ));
}

#[test]
fn test_cyclic_toc_degrades() {
    let loaded = read_epub_from_bytes(cyclic_toc().to_bytes()).unwrap();

    assert!(loaded.book.toc().is_empty());
    assert_eq!(loaded.book.spine_len(), 2);
    assert!(loaded.is_degraded());
    assert!(matches!(loaded.diagnostics[..], [Diagnostic::Toc(TocError::Cycle(_))]));
}

#[test]
fn test_unresolved_toc_entries_are_pruned() {
    let items = [
        Item::xhtml("nav", "nav.xhtml").properties("nav"),
        Item::xhtml("ch1", "ch1.xhtml"),
    ];
    let fixture = EpubFixture::new()
        .file(
            "OEBPS/content.opf",
            package_opf("Pruned", "urn:uuid:pruned", &items, &["ch1"], None),
        )
        .file(
            "OEBPS/nav.xhtml",
            nav_document(&[("One", "ch1.xhtml"), ("Ghost", "ghost.xhtml#x")]),
        )
        .file("OEBPS/ch1.xhtml", chapter("One", &["p1"]));

    let loaded = read_epub_from_bytes(fixture.to_bytes()).unwrap();
    assert_eq!(loaded.book.toc().len(), 1);
    assert_eq!(loaded.book.toc()[0].title, "One");
    assert!(matches!(
        &loaded.diagnostics[..],
        [Diagnostic::Toc(TocError::UnresolvedTarget { title, .. })] if title == "Ghost"
    ));
}

#[test]
fn test_broken_overlay_disables_narration_for_item() {
    let items = [
        Item::xhtml("ch1", "ch1.xhtml").overlay("s1"),
        Item::xhtml("ch2", "ch2.xhtml").overlay("s2"),
        Item::new("s1", "ch1.smil", "application/smil+xml"),
        Item::new("s2", "ch2.smil", "application/smil+xml"),
    ];
    let fixture = EpubFixture::new()
        .file(
            "OEBPS/content.opf",
            package_opf("Half Narrated", "urn:uuid:half", &items, &["ch1", "ch2"], None),
        )
        .file("OEBPS/ch1.xhtml", chapter("One", &["a", "b"]))
        .file("OEBPS/ch2.xhtml", chapter("Two", &["a"]))
        .file(
            "OEBPS/ch1.smil",
            smil("ch1.xhtml", "one.mp3", &[("b", "5s", "6s"), ("a", "0s", "1s")]),
        )
        .file("OEBPS/ch2.smil", smil("ch2.xhtml", "two.mp3", &[("a", "0s", "1s")]));

    let loaded = read_epub_from_bytes(fixture.to_bytes()).unwrap();
    assert!(loaded.book.media_overlay(0).is_none());
    assert!(loaded.book.media_overlay(1).is_some());
    assert!(loaded.book.has_audio());
    assert!(matches!(
        loaded.diagnostics[..],
        [Diagnostic::MediaOverlay(MediaOverlayError::UnsortedRanges { index: 1, .. })]
    ));
}

#[test]
fn test_missing_container_fails() {
    let fixture = EpubFixture::default().file("OEBPS/content.opf", "<package/>");
    assert!(matches!(
        read_epub_from_bytes(fixture.to_bytes()),
        Err(Error::MalformedPackage(MalformedPackageError::MissingContainer))
    ));
}

#[test]
fn test_truncated_package_fails() {
    let items = [Item::xhtml("ch1", "ch1.xhtml")];
    let opf = package_opf("Cut Short", "urn:uuid:cut", &items, &["ch1"], None);
    let truncated = &opf[..opf.find("</spine>").unwrap()];
    let fixture = EpubFixture::new()
        .file("OEBPS/content.opf", truncated)
        .file("OEBPS/ch1.xhtml", chapter("One", &["p1"]));

    assert!(matches!(
        read_epub_from_bytes(fixture.to_bytes()),
        Err(Error::MalformedPackage(MalformedPackageError::Xml { .. }))
    ));
}

#[test]
fn test_not_a_zip_fails() {
    assert!(matches!(
        read_epub_from_bytes(b"definitely not a zip archive".to_vec()),
        Err(Error::Archive(ArchiveError::CorruptZip(_)))
    ));

    let dir = TempDir::new().unwrap();
    assert!(matches!(
        read_epub(dir.path().join("missing.epub")),
        Err(Error::Archive(ArchiveError::NotFound(_)))
    ));
}

#[test]
fn test_extract_and_remove_source() {
    let dir = TempDir::new().unwrap();
    let path = book_one().write_to(dir.path(), "bookOne.epub");
    let work = dir.path().join("unzipped");

    let loaded = read_epub_with(&path, &LoadOptions::extract_and_remove(&work)).unwrap();
    assert_eq!(loaded.book.spine_len(), 10);
    assert!(!path.exists(), "source should be removed after a successful load");
    assert!(work.join("OEBPS/content.opf").exists());
    assert!(!loaded.resource_bytes("ch1").unwrap().is_empty());
}

#[test]
fn test_failed_load_keeps_source() {
    let dir = TempDir::new().unwrap();
    let path = missing_spine_item().write_to(dir.path(), "broken.epub");

    let result = read_epub_with(&path, &LoadOptions::extract_and_remove(dir.path().join("work")));
    assert!(result.is_err());
    assert!(path.exists(), "source must survive a failed load");
}

#[test]
fn test_cover_image() {
    let items = [
        Item::xhtml("ch1", "ch1.xhtml"),
        Item::new("cover", "images/cover.png", "image/png").properties("cover-image"),
    ];
    let dir = TempDir::new().unwrap();
    let path = EpubFixture::new()
        .file(
            "OEBPS/content.opf",
            package_opf("Covered", "urn:uuid:covered", &items, &["ch1"], None),
        )
        .file("OEBPS/ch1.xhtml", chapter("One", &["p1"]))
        .file("OEBPS/images/cover.png", b"\x89PNG fake")
        .write_to(dir.path(), "covered.epub");

    assert_eq!(cover_image(&path).unwrap().as_deref(), Some(&b"\x89PNG fake"[..]));

    let loaded = read_epub(&path).unwrap();
    assert_eq!(loaded.book.cover_resource().unwrap().path, "OEBPS/images/cover.png");

    let plain = book_one().write_to(dir.path(), "plain.epub");
    assert_eq!(cover_image(&plain).unwrap(), None);
}

#[test]
fn test_identity_falls_back_to_digest() {
    let items = [Item::xhtml("ch1", "ch1.xhtml")];
    let fixture = EpubFixture::new()
        .file("OEBPS/content.opf", package_opf("Anonymous", "", &items, &["ch1"], None))
        .file("OEBPS/ch1.xhtml", chapter("One", &["p1"]));

    let first = read_epub_from_bytes(fixture.to_bytes()).unwrap();
    let second = read_epub_from_bytes(fixture.to_bytes()).unwrap();
    assert_eq!(first.book.identity().len(), 40);
    assert_eq!(first.book.identity(), second.book.identity());
}
