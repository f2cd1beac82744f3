//! Table of contents: EPUB 2 NCX and EPUB 3 navigation documents.
//!
//! Parsing yields [`RawTocEntry`] trees with archive paths; [`resolve_toc`]
//! then maps those paths onto manifest ids, pruning what does not resolve.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::warn;

use crate::book::{TocEntry, TocTarget};
use crate::error::TocError;
use crate::util::{OpenElements, attr, local_name, parent_dir, resolve_entity, resolve_href, split_fragment};

/// Deepest nesting accepted before the outline is treated as cyclic.
pub const MAX_TOC_DEPTH: usize = 256;

/// A TOC entry before manifest resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTocEntry {
    pub title: String,
    /// Archive path of the target document, empty for label-only headings.
    pub path: String,
    pub fragment: Option<String>,
    pub play_order: Option<usize>,
    pub children: Vec<RawTocEntry>,
}

/// An entry still open while walking the document.
#[derive(Default)]
struct OpenEntry {
    id: Option<String>,
    title: String,
    href: Option<String>,
    play_order: Option<usize>,
    children: Vec<RawTocEntry>,
}

impl OpenEntry {
    fn close(self, base: &str) -> RawTocEntry {
        let (path, fragment) = match self.href.as_deref() {
            Some(href) => {
                let (doc, fragment) = split_fragment(href);
                (resolve_href(base, doc), fragment.map(str::to_string))
            }
            None => (String::new(), None),
        };
        RawTocEntry {
            title: normalize_whitespace(&self.title),
            path,
            fragment,
            play_order: self.play_order,
            children: self.children,
        }
    }
}

/// Stack of open entries; index 0 is the synthetic root.
struct Outline {
    base: String,
    stack: Vec<OpenEntry>,
}

impl Outline {
    fn new(doc_path: &str) -> Self {
        Self {
            base: parent_dir(doc_path).to_string(),
            stack: vec![OpenEntry::default()],
        }
    }

    fn open(&mut self, entry: OpenEntry) -> Result<(), TocError> {
        if self.stack.len() > MAX_TOC_DEPTH {
            return Err(TocError::Cycle(entry.id.unwrap_or_default()));
        }
        if let Some(id) = entry.id.as_deref()
            && self.stack.iter().any(|open| open.id.as_deref() == Some(id))
        {
            return Err(TocError::Cycle(id.to_string()));
        }
        self.stack.push(entry);
        Ok(())
    }

    fn current(&mut self) -> Option<&mut OpenEntry> {
        // The root never collects labels.
        if self.stack.len() > 1 { self.stack.last_mut() } else { None }
    }

    fn close(&mut self) -> Result<(), TocError> {
        if self.stack.len() <= 1 {
            return Ok(());
        }
        let Some(open) = self.stack.pop() else {
            return Ok(());
        };
        let entry = open.close(&self.base);

        // An entry repeating an ancestor's label and target refers back to it.
        let repeats_ancestor = self.stack.iter().skip(1).any(|ancestor| {
            let (path, fragment) = match ancestor.href.as_deref() {
                Some(href) => {
                    let (doc, fragment) = split_fragment(href);
                    (resolve_href(&self.base, doc), fragment.map(str::to_string))
                }
                None => (String::new(), None),
            };
            normalize_whitespace(&ancestor.title) == entry.title
                && path == entry.path
                && fragment == entry.fragment
        });
        if repeats_ancestor && !entry.path.is_empty() {
            return Err(TocError::Cycle(entry.title));
        }

        if let Some(parent) = self.stack.last_mut() {
            if entry.path.is_empty() && entry.title.is_empty() {
                parent.children.extend(entry.children);
            } else {
                parent.children.push(entry);
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Vec<RawTocEntry> {
        while self.stack.len() > 1 {
            if self.close().is_err() {
                break;
            }
        }
        self.stack
            .pop()
            .map(|root| root.children)
            .unwrap_or_default()
    }
}

/// Parse an NCX document (`navMap` / `navPoint`).
pub fn parse_ncx(content: &str, ncx_path: &str) -> Result<Vec<RawTocEntry>, TocError> {
    let mut reader = Reader::from_str(content);
    let mut outline = Outline::new(ncx_path);
    let mut elements = OpenElements::default();
    let mut in_text = false;
    let mut in_nav_map = false;

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        elements.track(&event);
        match event {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"navMap" => in_nav_map = true,
                b"navPoint" if in_nav_map => outline.open(OpenEntry {
                    id: attr(&e, b"id"),
                    play_order: attr(&e, b"playOrder").and_then(|v| v.trim().parse().ok()),
                    ..Default::default()
                })?,
                b"text" => in_text = true,
                b"content" => set_href(&mut outline, attr(&e, b"src")),
                _ => {}
            },
            Event::Empty(e) => {
                if local_name(e.name().as_ref()) == b"content" {
                    set_href(&mut outline, attr(&e, b"src"));
                }
            }
            Event::Text(e) => {
                if in_text && let Some(open) = outline.current() {
                    open.title.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if in_text
                    && let Some(open) = outline.current()
                    && let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    open.title.push_str(&resolved);
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"text" => in_text = false,
                b"navPoint" if in_nav_map => outline.close()?,
                b"navMap" => in_nav_map = false,
                _ => {}
            },
            Event::Eof => {
                elements.check_closed().map_err(xml_error)?;
                break;
            }
            _ => {}
        }
    }

    Ok(outline.finish())
}

/// Parse an EPUB 3 navigation document (`nav epub:type="toc"`, nested `ol/li`).
pub fn parse_nav(content: &str, nav_path: &str) -> Result<Vec<RawTocEntry>, TocError> {
    let mut reader = Reader::from_str(content);
    let mut outline = Outline::new(nav_path);
    let mut elements = OpenElements::default();

    // Depth of nested <nav> while inside the toc nav; 0 when outside.
    let mut toc_nav_depth = 0usize;
    let mut nav_depth = 0usize;
    let mut label_depth = 0usize;

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        elements.track(&event);
        match event {
            Event::Start(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"nav" {
                    nav_depth += 1;
                    let is_toc = attr(&e, b"type")
                        .is_some_and(|t| t.split_ascii_whitespace().any(|t| t == "toc"));
                    if toc_nav_depth == 0 && is_toc {
                        toc_nav_depth = nav_depth;
                    }
                    continue;
                }
                if toc_nav_depth == 0 {
                    continue;
                }
                match local {
                    b"li" => outline.open(OpenEntry {
                        id: attr(&e, b"id"),
                        ..Default::default()
                    })?,
                    b"a" | b"span" if label_depth == 0 => {
                        label_depth = 1;
                        if local == b"a" {
                            set_href(&mut outline, attr(&e, b"href"));
                        }
                    }
                    _ if label_depth > 0 => label_depth += 1,
                    _ => {}
                }
            }
            Event::Text(e) => {
                if label_depth > 0 && let Some(open) = outline.current() {
                    open.title.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if label_depth > 0
                    && let Some(open) = outline.current()
                    && let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    open.title.push_str(&resolved);
                }
            }
            Event::End(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"nav" {
                    if nav_depth == toc_nav_depth {
                        toc_nav_depth = 0;
                    }
                    nav_depth = nav_depth.saturating_sub(1);
                    continue;
                }
                if toc_nav_depth == 0 {
                    continue;
                }
                if label_depth > 0 {
                    label_depth -= 1;
                } else if local == b"li" {
                    outline.close()?;
                }
            }
            Event::Eof => {
                elements.check_closed().map_err(xml_error)?;
                break;
            }
            _ => {}
        }
    }

    Ok(outline.finish())
}

fn xml_error(e: quick_xml::Error) -> TocError {
    TocError::Xml(e.to_string())
}

fn set_href(outline: &mut Outline, href: Option<String>) {
    if let Some(open) = outline.current()
        && open.href.is_none()
    {
        open.href = href.filter(|h| !h.is_empty());
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map raw entries onto manifest ids.
///
/// `manifest_paths` maps archive path -> manifest id. Entries whose document
/// is not in the manifest are dropped and reported; their children are kept
/// in their place, as are the children of label-only headings.
pub fn resolve_toc(
    raw: Vec<RawTocEntry>,
    manifest_paths: &HashMap<String, String>,
    diagnostics: &mut Vec<TocError>,
) -> Vec<TocEntry> {
    let mut out = Vec::with_capacity(raw.len());
    for entry in raw {
        let children = resolve_toc(entry.children, manifest_paths, diagnostics);
        match manifest_paths.get(&entry.path) {
            Some(resource_id) => out.push(TocEntry {
                title: entry.title,
                target: TocTarget {
                    resource_id: resource_id.clone(),
                    fragment: entry.fragment,
                },
                children,
                play_order: entry.play_order,
            }),
            None => {
                // Label-only headings have no target to resolve.
                if !entry.path.is_empty() {
                    warn!(title = %entry.title, href = %entry.path, "pruning unresolved TOC entry");
                    diagnostics.push(TocError::UnresolvedTarget {
                        title: entry.title,
                        href: entry.path,
                    });
                }
                out.extend(children);
            }
        }
    }
    out
}
