//! OPF package document: metadata, manifest and spine.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::book::Metadata;
use crate::epub::smil::parse_clock;
use crate::error::MalformedPackageError;
use crate::util::{OpenElements, attr, attr_exact, local_name, parent_dir, resolve_entity, resolve_href};

/// A manifest `<item>`, with its href resolved to an archive path.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub path: String,
    pub media_type: String,
    pub properties: Vec<String>,
    pub media_overlay: Option<String>,
}

/// A spine `<itemref>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineRef {
    pub idref: String,
    pub linear: bool,
}

/// Parsed OPF package data.
#[derive(Debug, Clone)]
pub struct PackageDocument {
    pub metadata: Metadata,
    /// Manifest items in declaration order.
    pub manifest: Vec<ManifestItem>,
    pub spine: Vec<SpineRef>,
    /// Manifest id named by the spine `toc` attribute (EPUB 2 NCX).
    pub ncx_id: Option<String>,
}

impl PackageDocument {
    pub fn item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// The EPUB 3 navigation document (`properties="nav"`).
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.manifest
            .iter()
            .find(|item| item.properties.iter().any(|p| p == "nav"))
    }

    pub fn ncx_item(&self) -> Option<&ManifestItem> {
        self.ncx_id
            .as_deref()
            .and_then(|id| self.item(id))
            .or_else(|| {
                self.manifest
                    .iter()
                    .find(|item| item.media_type == "application/x-dtbncx+xml")
            })
    }
}

/// Which metadata element is collecting text.
enum Capture {
    Dc { name: String, id: Option<String> },
    Meta(String),
}

/// Parse the package document found at `opf_path`.
///
/// Unknown elements and attributes are skipped so newer packages still load.
pub fn parse_opf(content: &str, opf_path: &str) -> Result<PackageDocument, MalformedPackageError> {
    let base = parent_dir(opf_path);
    // Text is trimmed per element, not per event, so entity references
    // between words keep their surrounding spaces.
    let mut reader = Reader::from_str(content);

    let mut metadata = Metadata::default();
    let mut manifest: Vec<ManifestItem> = Vec::new();
    let mut spine: Vec<SpineRef> = Vec::new();
    let mut ncx_id: Option<String> = None;
    let mut unique_identifier: Option<String> = None;
    let mut identifiers: Vec<(Option<String>, String)> = Vec::new();
    let mut epub2_cover_id: Option<String> = None;
    let mut saw_package = false;
    let mut elements = OpenElements::default();

    let mut in_metadata = false;
    let mut capture: Option<Capture> = None;
    let mut buf_text = String::new();

    let xml_error = |source| MalformedPackageError::Xml {
        document: opf_path.to_string(),
        source,
    };

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        elements.track(&event);
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"package" => {
                        saw_package = true;
                        unique_identifier = attr(e, b"unique-identifier");
                    }
                    b"metadata" if !is_empty => in_metadata = true,
                    b"title" | b"creator" | b"language" | b"identifier" | b"publisher"
                    | b"description" | b"subject" | b"date" | b"rights"
                        if in_metadata && !is_empty =>
                    {
                        let local = local_name(name.as_ref());
                        capture = Some(Capture::Dc {
                            name: String::from_utf8_lossy(local).into_owned(),
                            id: attr(e, b"id"),
                        });
                        buf_text.clear();
                    }
                    b"meta" if in_metadata => {
                        if let Some(cover) = epub2_cover(e) {
                            epub2_cover_id = Some(cover);
                        } else if !is_empty
                            && attr(e, b"refines").is_none()
                            && let Some(property) = attr(e, b"property")
                        {
                            capture = Some(Capture::Meta(property));
                            buf_text.clear();
                        }
                    }
                    b"item" => {
                        if let Some(item) = manifest_item(e, base) {
                            manifest.push(item);
                        }
                    }
                    b"itemref" => {
                        if let Some(idref) = attr(e, b"idref").filter(|id| !id.is_empty()) {
                            let linear = attr(e, b"linear").is_none_or(|v| v != "no");
                            spine.push(SpineRef { idref, linear });
                        }
                    }
                    b"spine" => {
                        ncx_id = attr(e, b"toc");
                        metadata.page_progression = attr(e, b"page-progression-direction");
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if capture.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::CData(e) => {
                if capture.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                if capture.is_some()
                    && let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    buf_text.push_str(&resolved);
                }
            }
            Event::End(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"metadata" {
                    in_metadata = false;
                }

                let closes_capture = match &capture {
                    Some(Capture::Dc { name, .. }) => local == name.as_bytes(),
                    Some(Capture::Meta(_)) => local == b"meta",
                    None => false,
                };
                if closes_capture && let Some(done) = capture.take() {
                    let text = buf_text.trim().to_string();
                    apply_capture(&mut metadata, &mut identifiers, done, text);
                    buf_text.clear();
                }
            }
            Event::Eof => {
                elements.check_closed().map_err(xml_error)?;
                break;
            }
            _ => {}
        }
    }

    if !saw_package {
        return Err(MalformedPackageError::MissingPackage(opf_path.to_string()));
    }

    // Prefer the identifier the package names as unique.
    metadata.identifier = identifiers
        .iter()
        .find(|(id, _)| id.is_some() && *id == unique_identifier)
        .or_else(|| identifiers.first())
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    // Cover: EPUB 3 property takes priority over the EPUB 2 meta.
    metadata.cover_resource_id = manifest
        .iter()
        .find(|item| item.properties.iter().any(|p| p == "cover-image"))
        .map(|item| item.id.clone())
        .or_else(|| epub2_cover_id.filter(|id| manifest.iter().any(|item| &item.id == id)));

    Ok(PackageDocument {
        metadata,
        manifest,
        spine,
        ncx_id,
    })
}

fn apply_capture(
    metadata: &mut Metadata,
    identifiers: &mut Vec<(Option<String>, String)>,
    capture: Capture,
    text: String,
) {
    if text.is_empty() {
        return;
    }
    match capture {
        Capture::Dc { name, id } => match name.as_str() {
            "title" if metadata.title.is_empty() => metadata.title = text,
            "creator" => metadata.authors.push(text),
            "language" if metadata.language.is_empty() => metadata.language = text,
            "identifier" => identifiers.push((id, text)),
            "publisher" => metadata.publisher = Some(text),
            "description" => metadata.description = Some(text),
            "subject" => metadata.subjects.push(text),
            "date" => metadata.date = Some(text),
            "rights" => metadata.rights = Some(text),
            _ => {}
        },
        Capture::Meta(property) => match property.as_str() {
            "media:duration" => metadata.narration_duration = parse_clock(&text),
            "media:active-class" => metadata.active_class = Some(text),
            _ => {}
        },
    }
}

/// `<meta name="cover" content="cover-id"/>`
fn epub2_cover(e: &BytesStart<'_>) -> Option<String> {
    (attr_exact(e, b"name").as_deref() == Some("cover"))
        .then(|| attr(e, b"content"))
        .flatten()
        .filter(|id| !id.is_empty())
}

fn manifest_item(e: &BytesStart<'_>, base: &str) -> Option<ManifestItem> {
    let id = attr(e, b"id").filter(|id| !id.is_empty())?;
    let href = attr(e, b"href").unwrap_or_default();
    let path = resolve_href(base, &href);
    Some(ManifestItem {
        id,
        path,
        href,
        media_type: attr(e, b"media-type").unwrap_or_default(),
        properties: attr(e, b"properties")
            .map(|p| p.split_ascii_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        media_overlay: attr(e, b"media-overlay").filter(|id| !id.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opf_metadata() {
        let opf = r##"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="isbn">urn:isbn:1234567890</dc:identifier>
    <dc:identifier id="uid">urn:uuid:abc</dc:identifier>
    <dc:title>Test &amp; Book</dc:title>
    <dc:creator>Author One</dc:creator>
    <dc:creator>Author Two</dc:creator>
    <dc:language>en</dc:language>
    <dc:publisher>Test Publisher</dc:publisher>
    <dc:subject>Fiction</dc:subject>
    <dc:date>2024-01-15</dc:date>
    <meta property="media:duration">0:01:30.500</meta>
    <meta property="media:duration" refines="#ch1-mo">0:00:10</meta>
    <meta property="media:active-class">-epub-media-overlay-active</meta>
    <meta property="dcterms:modified">2024-01-15T00:00:00Z</meta>
    <x-unknown foo="bar">ignored</x-unknown>
  </metadata>
  <manifest>
    <item id="chapter1" href="text/chapter1.xhtml" media-type="application/xhtml+xml" media-overlay="ch1-mo"/>
    <item id="ch1-mo" href="smil/ch1.smil" media-type="application/smil+xml"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
  </manifest>
  <spine toc="ncx" page-progression-direction="ltr">
    <itemref idref="chapter1"/>
    <itemref idref="nav" linear="no"/>
  </spine>
</package>"##;

        let doc = parse_opf(opf, "OEBPS/content.opf").unwrap();

        assert_eq!(doc.metadata.title, "Test & Book");
        assert_eq!(doc.metadata.authors, vec!["Author One", "Author Two"]);
        assert_eq!(doc.metadata.language, "en");
        assert_eq!(doc.metadata.identifier, "urn:uuid:abc");
        assert_eq!(doc.metadata.publisher.as_deref(), Some("Test Publisher"));
        assert_eq!(doc.metadata.subjects, vec!["Fiction"]);
        assert_eq!(doc.metadata.narration_duration, Some(90.5));
        assert_eq!(
            doc.metadata.active_class.as_deref(),
            Some("-epub-media-overlay-active")
        );
        assert_eq!(doc.metadata.page_progression.as_deref(), Some("ltr"));

        assert_eq!(doc.manifest.len(), 4);
        let chapter = doc.item("chapter1").unwrap();
        assert_eq!(chapter.path, "OEBPS/text/chapter1.xhtml");
        assert_eq!(chapter.media_overlay.as_deref(), Some("ch1-mo"));

        assert_eq!(
            doc.spine,
            vec![
                SpineRef { idref: "chapter1".into(), linear: true },
                SpineRef { idref: "nav".into(), linear: false },
            ]
        );
        assert_eq!(doc.ncx_item().unwrap().path, "OEBPS/toc.ncx");
        assert_eq!(doc.nav_item().unwrap().path, "OEBPS/nav.xhtml");
    }

    #[test]
    fn test_parse_opf_cover_epub3() {
        let opf = r#"<package version="3.0">
  <metadata><dc:title xmlns:dc="http://purl.org/dc/elements/1.1/">Book</dc:title></metadata>
  <manifest>
    <item id="cover-img" href="images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="ch1"/></spine>
</package>"#;

        let doc = parse_opf(opf, "content.opf").unwrap();
        assert_eq!(doc.metadata.cover_resource_id.as_deref(), Some("cover-img"));
    }

    #[test]
    fn test_parse_opf_cover_epub2() {
        let opf = r#"<package version="2.0">
  <metadata>
    <dc:title xmlns:dc="http://purl.org/dc/elements/1.1/">Book</dc:title>
    <meta name="cover" content="cover-id"/>
  </metadata>
  <manifest>
    <item id="cover-id" href="cover.png" media-type="image/png"/>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="ch1"/></spine>
</package>"#;

        let doc = parse_opf(opf, "content.opf").unwrap();
        assert_eq!(doc.metadata.cover_resource_id.as_deref(), Some("cover-id"));
    }

    #[test]
    fn test_parse_opf_not_well_formed() {
        let opf = r#"<package><metadata><dc:title>Book</metadata></package>"#;
        assert!(matches!(
            parse_opf(opf, "content.opf"),
            Err(MalformedPackageError::Xml { .. })
        ));
    }

    #[test]
    fn test_parse_opf_truncated() {
        let opf = r#"<package version="3.0">
  <metadata><dc:title xmlns:dc="http://purl.org/dc/elements/1.1/">Book</dc:title></metadata>
  <manifest><item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/></manifest>
  <spine><itemref idref="ch1"/>"#;
        assert!(matches!(
            parse_opf(opf, "content.opf"),
            Err(MalformedPackageError::Xml { .. })
        ));
    }

    #[test]
    fn test_parse_opf_without_package_element() {
        let opf = r#"<html><body>not a package</body></html>"#;
        assert!(matches!(
            parse_opf(opf, "content.opf"),
            Err(MalformedPackageError::MissingPackage(_))
        ));
    }
}
