//! Shared helpers for XML documents and archive paths.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;
use quick_xml::errors::IllFormedError;
use quick_xml::events::{BytesStart, Event};

/// Decode document bytes to a string, handling legacy encodings.
///
/// Tries UTF-8 first (a BOM is consumed by `encoding_rs`), then the encoding
/// named in the XML declaration, then falls back to Windows-1252.
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);
    if !malformed {
        return result;
    }

    if let Some(label) = xml_declared_encoding(bytes)
        && let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Pull the `encoding="..."` value out of an XML declaration, if any.
fn xml_declared_encoding(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(200)];
    let head = String::from_utf8_lossy(head);
    let decl_end = head.find("?>")?;
    let decl = &head[..decl_end];
    let start = decl.find("encoding=")? + "encoding=".len();
    let rest = &decl[start..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let value = &rest[1..];
    let end = value.find(quote)?;
    Some(value[..end].to_string())
}

/// Extract local name from namespaced XML name (e.g., "dc:title" -> "title").
pub fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Look up an attribute by local name, unescaped.
pub fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| local_name(a.key.as_ref()) == key)
        .map(|a| {
            let raw = String::from_utf8_lossy(a.value.as_ref());
            unescape(&raw).into_owned()
        })
}

/// Look up an attribute by its exact (possibly prefixed) name.
pub fn attr_exact(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| {
            let raw = String::from_utf8_lossy(a.value.as_ref());
            unescape(&raw).into_owned()
        })
}

/// Elements opened but not yet closed.
///
/// The reader reports `Eof` even with elements still open, so a truncated
/// document would otherwise parse as a shorter valid one.
#[derive(Debug, Default)]
pub struct OpenElements {
    names: Vec<String>,
}

impl OpenElements {
    pub fn track(&mut self, event: &Event<'_>) {
        match event {
            Event::Start(e) => self
                .names
                .push(String::from_utf8_lossy(e.name().as_ref()).into_owned()),
            Event::End(_) => {
                self.names.pop();
            }
            _ => {}
        }
    }

    /// Call at `Eof`: fails with the innermost element left open.
    pub fn check_closed(&self) -> Result<(), quick_xml::Error> {
        match self.names.last() {
            Some(name) => Err(IllFormedError::MissingEndTag(name.clone()).into()),
            None => Ok(()),
        }
    }
}

/// Replace the predefined and numeric entities in attribute text.
fn unescape(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        match tail.find(';').and_then(|semi| resolve_entity(&tail[..semi]).map(|r| (semi, r))) {
            Some((semi, resolved)) => {
                out.push_str(&resolved);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Resolve XML entity references.
pub fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x") {
        u32::from_str_radix(hex, 16).ok()?
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()?
    } else {
        return None;
    };
    char::from_u32(code).map(|c| c.to_string())
}

/// Directory part of an archive path, with trailing slash ("OEBPS/content.opf" -> "OEBPS/").
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    }
}

/// Split "chapter.xhtml#frag" into ("chapter.xhtml", Some("frag")).
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, frag)) if !frag.is_empty() => (path, Some(frag)),
        Some((path, _)) => (path, None),
        None => (href, None),
    }
}

/// Resolve an href relative to a base directory into a normalized archive
/// path. Percent-encoding is decoded; `.` and `..` segments are collapsed.
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let decoded = percent_decode_str(href).decode_utf8_lossy();
    let joined = if decoded.starts_with('/') {
        decoded.trim_start_matches('/').to_string()
    } else {
        format!("{base_dir}{decoded}")
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}
