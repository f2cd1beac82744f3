//! EPUB archives built on the fly for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// Files of an EPUB, written in order with `mimetype` stored first.
#[derive(Default)]
pub struct EpubFixture {
    files: Vec<(String, Vec<u8>)>,
}

impl EpubFixture {
    pub fn new() -> Self {
        Self::default().file("META-INF/container.xml", CONTAINER_XML)
    }

    pub fn file(mut self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.files.push((path.to_string(), content.as_ref().to_vec()));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        for (path, content) in &self.files {
            zip.start_file(path.as_str(), deflated).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.to_bytes()).unwrap();
        path
    }
}

pub fn chapter(title: &str, fragments: &[&str]) -> String {
    let mut body = String::new();
    for id in fragments {
        body.push_str(&format!("<p id=\"{id}\">{title} {id}</p>\n"));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{title}</title></head>
<body><h1>{title}</h1>
{body}</body></html>"#
    )
}

/// A manifest `<item>`.
pub struct Item<'a> {
    pub id: &'a str,
    pub href: &'a str,
    pub media_type: &'a str,
    pub properties: Option<&'a str>,
    pub media_overlay: Option<&'a str>,
}

impl<'a> Item<'a> {
    pub fn new(id: &'a str, href: &'a str, media_type: &'a str) -> Self {
        Self {
            id,
            href,
            media_type,
            properties: None,
            media_overlay: None,
        }
    }

    pub fn xhtml(id: &'a str, href: &'a str) -> Self {
        Self::new(id, href, "application/xhtml+xml")
    }

    pub fn properties(mut self, properties: &'a str) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn overlay(mut self, overlay: &'a str) -> Self {
        self.media_overlay = Some(overlay);
        self
    }
}

pub fn package_opf(title: &str, identifier: &str, items: &[Item<'_>], spine: &[&str], toc: Option<&str>) -> String {
    let mut manifest = String::new();
    for item in items {
        manifest.push_str(&format!(
            r#"    <item id="{}" href="{}" media-type="{}""#,
            item.id, item.href, item.media_type
        ));
        if let Some(props) = item.properties {
            manifest.push_str(&format!(r#" properties="{props}""#));
        }
        if let Some(overlay) = item.media_overlay {
            manifest.push_str(&format!(r#" media-overlay="{overlay}""#));
        }
        manifest.push_str("/>\n");
    }

    let mut itemrefs = String::new();
    for idref in spine {
        itemrefs.push_str(&format!("    <itemref idref=\"{idref}\"/>\n"));
    }
    let toc_attr = toc.map(|id| format!(r#" toc="{id}""#)).unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{title}</dc:title>
    <dc:creator>Test Author</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier id="bookid">{identifier}</dc:identifier>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine{toc_attr}>
{itemrefs}  </spine>
</package>"#
    )
}

pub fn nav_document(entries: &[(&str, &str)]) -> String {
    let mut items = String::new();
    for (title, href) in entries {
        items.push_str(&format!("      <li><a href=\"{href}\">{title}</a></li>\n"));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="toc">
    <ol>
{items}    </ol>
  </nav>
</body>
</html>"#
    )
}

pub fn smil(text_href: &str, audio_href: &str, ranges: &[(&str, &str, &str)]) -> String {
    let mut pars = String::new();
    for (fragment, begin, end) in ranges {
        pars.push_str(&format!(
            r#"    <par><text src="{text_href}#{fragment}"/><audio src="{audio_href}" clipBegin="{begin}" clipEnd="{end}"/></par>
"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<smil xmlns="http://www.w3.org/ns/SMIL" version="3.0">
  <body>
{pars}  </body>
</smil>"#
    )
}

/// Ten chapters, EPUB 3 nav, no narration.
pub fn book_one() -> EpubFixture {
    book_with_chapters("Book One", "urn:uuid:book-one", 10)
}

pub fn book_with_chapters(title: &str, identifier: &str, count: usize) -> EpubFixture {
    let ids: Vec<String> = (1..=count).map(|i| format!("ch{i}")).collect();
    let hrefs: Vec<String> = ids.iter().map(|id| format!("text/{id}.xhtml")).collect();

    let mut items = vec![Item::xhtml("nav", "nav.xhtml").properties("nav")];
    items.extend(ids.iter().zip(&hrefs).map(|(id, href)| Item::xhtml(id, href)));
    let spine: Vec<&str> = ids.iter().map(String::as_str).collect();
    let titles: Vec<String> = (1..=count).map(|i| format!("Chapter {i}")).collect();
    let nav_entries: Vec<(&str, &str)> = titles
        .iter()
        .zip(&hrefs)
        .map(|(t, h)| (t.as_str(), h.as_str()))
        .collect();

    let mut fixture = EpubFixture::new()
        .file("OEBPS/content.opf", package_opf(title, identifier, &items, &spine, None))
        .file("OEBPS/nav.xhtml", nav_document(&nav_entries));
    for (title, href) in titles.iter().zip(&hrefs) {
        fixture = fixture.file(&format!("OEBPS/{href}"), chapter(title, &["p1"]));
    }
    fixture
}

/// Four chapters; the third (spine index 2) is narrated:
/// `[0.0, 3.2) -> frag1`, `[3.2, 7.0) -> frag2`.
pub fn book_two() -> EpubFixture {
    let items = [
        Item::new("ncx", "toc.ncx", "application/x-dtbncx+xml"),
        Item::xhtml("ch1", "text/ch1.xhtml"),
        Item::xhtml("ch2", "text/ch2.xhtml"),
        Item::xhtml("ch3", "text/ch3.xhtml").overlay("ch3-smil"),
        Item::xhtml("ch4", "text/ch4.xhtml").overlay("ch4-smil"),
        Item::new("ch3-smil", "smil/ch3.smil", "application/smil+xml"),
        Item::new("ch4-smil", "smil/ch4.smil", "application/smil+xml"),
        Item::new("ch3-audio", "audio/ch3.mp3", "audio/mpeg"),
        Item::new("ch4-audio", "audio/ch4.mp3", "audio/mpeg"),
    ];
    let ncx = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1" playOrder="1"><navLabel><text>One</text></navLabel><content src="text/ch1.xhtml"/></navPoint>
    <navPoint id="n2" playOrder="2"><navLabel><text>Two</text></navLabel><content src="text/ch2.xhtml"/></navPoint>
    <navPoint id="n3" playOrder="3"><navLabel><text>Three</text></navLabel><content src="text/ch3.xhtml"/>
      <navPoint id="n3a" playOrder="4"><navLabel><text>Second part</text></navLabel><content src="text/ch3.xhtml#frag2"/></navPoint>
    </navPoint>
    <navPoint id="n4" playOrder="5"><navLabel><text>Four</text></navLabel><content src="text/ch4.xhtml"/></navPoint>
  </navMap>
</ncx>"#;

    EpubFixture::new()
        .file(
            "OEBPS/content.opf",
            package_opf(
                "Book Two",
                "urn:uuid:book-two",
                &items,
                &["ch1", "ch2", "ch3", "ch4"],
                Some("ncx"),
            ),
        )
        .file("OEBPS/toc.ncx", ncx)
        .file("OEBPS/text/ch1.xhtml", chapter("One", &["p1"]))
        .file("OEBPS/text/ch2.xhtml", chapter("Two", &["p1"]))
        .file("OEBPS/text/ch3.xhtml", chapter("Three", &["frag1", "frag2"]))
        .file("OEBPS/text/ch4.xhtml", chapter("Four", &["f1"]))
        .file(
            "OEBPS/smil/ch3.smil",
            smil(
                "../text/ch3.xhtml",
                "../audio/ch3.mp3",
                &[("frag1", "0:00:00.000", "0:00:03.200"), ("frag2", "3.2s", "7s")],
            ),
        )
        .file(
            "OEBPS/smil/ch4.smil",
            smil("../text/ch4.xhtml", "../audio/ch4.mp3", &[("f1", "0s", "2s")]),
        )
        .file("OEBPS/audio/ch3.mp3", b"ID3")
        .file("OEBPS/audio/ch4.mp3", b"ID3")
}

/// The spine names `chap9`, which the manifest does not declare.
pub fn missing_spine_item() -> EpubFixture {
    let items = [Item::xhtml("ch1", "ch1.xhtml")];
    EpubFixture::new()
        .file(
            "OEBPS/content.opf",
            package_opf("Broken", "urn:uuid:broken", &items, &["ch1", "chap9"], None),
        )
        .file("OEBPS/ch1.xhtml", chapter("One", &["p1"]))
}

/// An NCX whose navPoint nests a copy of itself.
pub fn cyclic_toc() -> EpubFixture {
    let items = [
        Item::new("ncx", "toc.ncx", "application/x-dtbncx+xml"),
        Item::xhtml("ch1", "ch1.xhtml"),
        Item::xhtml("ch2", "ch2.xhtml"),
    ];
    let ncx = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="loop"><navLabel><text>One</text></navLabel><content src="ch1.xhtml"/>
      <navPoint id="loop"><navLabel><text>One</text></navLabel><content src="ch1.xhtml"/></navPoint>
    </navPoint>
  </navMap>
</ncx>"#;
    EpubFixture::new()
        .file(
            "OEBPS/content.opf",
            package_opf("Loops", "urn:uuid:loops", &items, &["ch1", "ch2"], Some("ncx")),
        )
        .file("OEBPS/toc.ncx", ncx)
        .file("OEBPS/ch1.xhtml", chapter("One", &["p1"]))
        .file("OEBPS/ch2.xhtml", chapter("Two", &["p1"]))
}
