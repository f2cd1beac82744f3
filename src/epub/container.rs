//! META-INF/container.xml: the pointer to the package document.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::MalformedPackageError;
use crate::util::{OpenElements, attr, decode_text, local_name};

pub const CONTAINER_PATH: &str = "META-INF/container.xml";

const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Find the package document path.
///
/// With several rootfiles the first one declared as an OPF package wins,
/// otherwise the first rootfile.
pub fn parse_container_xml(bytes: &[u8]) -> Result<String, MalformedPackageError> {
    let content = decode_text(bytes);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    let mut first: Option<String> = None;
    let mut package: Option<String> = None;
    let mut elements = OpenElements::default();
    let xml_error = |source| MalformedPackageError::Xml {
        document: CONTAINER_PATH.to_string(),
        source,
    };

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        elements.track(&event);
        match event {
            Event::Empty(e) | Event::Start(e) if local_name(e.name().as_ref()) == b"rootfile" => {
                let Some(path) = attr(&e, b"full-path").filter(|p| !p.is_empty()) else {
                    continue;
                };
                if package.is_none() && attr(&e, b"media-type").as_deref() == Some(PACKAGE_MEDIA_TYPE) {
                    package = Some(path.clone());
                }
                first.get_or_insert(path);
            }
            Event::Eof => {
                elements.check_closed().map_err(xml_error)?;
                break;
            }
            _ => {}
        }
    }

    package.or(first).ok_or(MalformedPackageError::MissingRootfile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_xml() {
        let container = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

        assert_eq!(parse_container_xml(container).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn test_parse_container_xml_with_bom() {
        let mut container = vec![0xEF, 0xBB, 0xBF];
        container.extend_from_slice(
            br#"<container><rootfiles><rootfile full-path="content.opf"/></rootfiles></container>"#,
        );
        assert_eq!(parse_container_xml(&container).unwrap(), "content.opf");
    }

    #[test]
    fn test_prefers_opf_rootfile() {
        let container = br#"<container><rootfiles>
    <rootfile full-path="book.pdf" media-type="application/pdf"/>
    <rootfile full-path="OPS/package.opf" media-type="application/oebps-package+xml"/>
</rootfiles></container>"#;
        assert_eq!(parse_container_xml(container).unwrap(), "OPS/package.opf");
    }

    #[test]
    fn test_missing_rootfile() {
        let container = br#"<container><rootfiles/></container>"#;
        assert!(matches!(
            parse_container_xml(container),
            Err(MalformedPackageError::MissingRootfile)
        ));
    }

    #[test]
    fn test_truncated_container() {
        let container = br#"<container><rootfiles>
    <rootfile full-path="content.opf" media-type="application/oebps-package+xml"/>"#;
        assert!(matches!(
            parse_container_xml(container),
            Err(MalformedPackageError::Xml { .. })
        ));
    }

    #[test]
    fn test_malformed_container() {
        let container = br#"<container><rootfiles></container>"#;
        assert!(matches!(
            parse_container_xml(container),
            Err(MalformedPackageError::Xml { .. })
        ));
    }
}
