//! EPUB load pipeline: container -> package -> TOC -> media overlays -> [`Book`].
//!
//! Fatal problems (archive, container, package, spine) abort the load with an
//! [`Error`]. TOC and media overlay problems degrade the book instead and are
//! returned as [`Diagnostic`]s on the [`LoadedBook`].

mod container;
mod opf;
mod smil;
mod toc;

pub use container::{CONTAINER_PATH, parse_container_xml};
pub use opf::{ManifestItem, PackageDocument, SpineRef, parse_opf};
pub use smil::{parse_clock, parse_smil};
pub use toc::{MAX_TOC_DEPTH, RawTocEntry, parse_nav, parse_ncx, resolve_toc};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archive::{ArchiveMode, FileTree, ZipTree, load_tree, remove_source};
use crate::book::{Book, MediaOverlay, Resource, TocEntry};
use crate::error::{
    ArchiveError, Diagnostic, Error, MalformedPackageError, MediaOverlayError, Result, TocError,
};
use crate::util::decode_text;

/// Options for [`read_epub_with`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub mode: ArchiveMode,
    /// Delete the source archive once the book has been built.
    pub remove_source: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mode: ArchiveMode::InPlace,
            remove_source: false,
        }
    }
}

impl LoadOptions {
    /// Extract into `dir` and delete the archive afterwards, so it is only
    /// ever unzipped once.
    pub fn extract_and_remove(dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: ArchiveMode::Extract(dir.into()),
            remove_source: true,
        }
    }
}

/// A successfully built book plus the file tree its resources live in.
#[derive(Clone)]
pub struct LoadedBook {
    pub book: Arc<Book>,
    pub tree: Arc<dyn FileTree>,
    /// Non-fatal problems absorbed while building the book.
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadedBook {
    /// True when part of the book (TOC, narration) had to be dropped.
    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// Raw bytes of a manifest resource.
    pub fn resource_bytes(&self, id: &str) -> std::result::Result<Vec<u8>, ArchiveError> {
        let resource = self
            .book
            .resource(id)
            .ok_or_else(|| ArchiveError::MissingEntry(id.to_string()))?;
        self.tree.read(&resource.path)
    }
}

impl std::fmt::Debug for LoadedBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedBook")
            .field("book", &self.book.title())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

/// Read an EPUB file in place.
///
/// # Example
///
/// ```no_run
/// let loaded = folio::read_epub("path/to/book.epub")?;
/// println!("Title: {}", loaded.book.title());
/// # Ok::<(), folio::Error>(())
/// ```
pub fn read_epub<P: AsRef<Path>>(path: P) -> Result<LoadedBook> {
    read_epub_with(path, &LoadOptions::default())
}

/// Read an EPUB file, optionally extracting it and removing the source.
///
/// The source archive is only removed after the book has been fully built.
/// Failing to remove it is logged and does not fail the load.
pub fn read_epub_with<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<LoadedBook> {
    let path = path.as_ref();
    let tree = load_tree(path, &options.mode)?;
    let loaded = read_epub_from_tree(tree)?;
    if options.remove_source {
        discard_source(path);
    }
    Ok(loaded)
}

/// Returns whether the archive was removed.
fn discard_source(path: &Path) -> bool {
    match remove_source(path) {
        Ok(()) => true,
        Err(err) => {
            warn!(archive = %path.display(), error = %err, "could not remove source archive");
            false
        }
    }
}

/// Read an EPUB held in memory.
pub fn read_epub_from_bytes(data: Vec<u8>) -> Result<LoadedBook> {
    let tree: Arc<dyn FileTree> = Arc::new(ZipTree::from_bytes(data)?);
    read_epub_from_tree(tree)
}

/// Build a [`Book`] from an already opened file tree.
pub fn read_epub_from_tree(tree: Arc<dyn FileTree>) -> Result<LoadedBook> {
    // 1. Find the package document from container.xml
    let container = tree
        .read(CONTAINER_PATH)
        .map_err(|_| MalformedPackageError::MissingContainer)?;
    let opf_path = parse_container_xml(&container)?;

    // 2. Parse the package document
    let opf_bytes = tree.read(&opf_path).map_err(|e| match e {
        ArchiveError::MissingEntry(_) => Error::from(MalformedPackageError::MissingPackage(opf_path.clone())),
        other => Error::from(other),
    })?;
    let package = parse_opf(&decode_text(&opf_bytes), &opf_path)?;
    debug!(
        opf = %opf_path,
        manifest = package.manifest.len(),
        spine = package.spine.len(),
        "parsed package document"
    );

    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    // 3. Table of contents (non-fatal)
    let manifest_paths: HashMap<String, String> = package
        .manifest
        .iter()
        .map(|item| (item.path.clone(), item.id.clone()))
        .collect();
    let toc = load_toc(tree.as_ref(), &package, &manifest_paths, &mut diagnostics);

    // 4. Media overlays per spine item (non-fatal)
    let overlays = load_overlays(tree.as_ref(), &package, &mut diagnostics);

    // 5. Assemble; spine references are validated here
    let mut builder = Book::builder(package.metadata.clone())
        .package_document(&opf_bytes)
        .toc(toc);
    for item in &package.manifest {
        let mut resource = Resource::new(&item.id, &item.path, &item.media_type);
        resource.size = tree.size(&item.path);
        resource.properties = item.properties.clone();
        resource.media_overlay = item.media_overlay.clone();
        builder = builder.resource(resource);
    }
    for itemref in &package.spine {
        builder = builder.spine_item(&itemref.idref, itemref.linear);
    }
    for (index, overlay) in overlays {
        builder = builder.overlay(index, overlay);
    }
    let book = builder.build()?;

    info!(
        title = %book.title(),
        spine = book.spine_len(),
        has_audio = book.has_audio(),
        degraded = !diagnostics.is_empty(),
        "book loaded"
    );

    Ok(LoadedBook {
        book: Arc::new(book),
        tree,
        diagnostics,
    })
}

/// Parse the navigation document, preferring EPUB 3 nav over NCX.
///
/// A failed document (cycle, malformed XML) yields an empty outline for that
/// document; the NCX is still tried when the nav document produced nothing.
fn load_toc(
    tree: &dyn FileTree,
    package: &PackageDocument,
    manifest_paths: &HashMap<String, String>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<TocEntry> {
    type ParseFn = fn(&str, &str) -> std::result::Result<Vec<RawTocEntry>, TocError>;
    let mut candidates: Vec<(&ManifestItem, ParseFn)> = Vec::new();
    if let Some(nav) = package.nav_item() {
        candidates.push((nav, parse_nav));
    }
    if let Some(ncx) = package.ncx_item() {
        candidates.push((ncx, parse_ncx));
    }

    for (item, parse) in candidates {
        let raw = tree
            .read(&item.path)
            .map_err(|_| TocError::Missing(item.path.clone()))
            .and_then(|bytes| parse(&decode_text(&bytes), &item.path));

        match raw {
            Ok(raw) => {
                let mut toc_errors = Vec::new();
                let toc = resolve_toc(raw, manifest_paths, &mut toc_errors);
                diagnostics.extend(toc_errors.into_iter().map(Diagnostic::from));
                if !toc.is_empty() {
                    return toc;
                }
            }
            Err(err) => {
                warn!(document = %item.path, error = %err, "table of contents dropped");
                diagnostics.push(err.into());
            }
        }
    }
    Vec::new()
}

/// Parse the SMIL overlay of each spine item that declares one.
fn load_overlays(
    tree: &dyn FileTree,
    package: &PackageDocument,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<(usize, MediaOverlay)> {
    let mut overlays = Vec::new();

    for (index, itemref) in package.spine.iter().enumerate() {
        let Some(item) = package.item(&itemref.idref) else {
            continue;
        };
        let Some(overlay_id) = item.media_overlay.as_deref() else {
            continue;
        };

        let result = package
            .item(overlay_id)
            .ok_or_else(|| MediaOverlayError::MissingDocument {
                resource: item.path.clone(),
                overlay: overlay_id.to_string(),
            })
            .and_then(|smil| {
                tree.read(&smil.path)
                    .map_err(|_| MediaOverlayError::MissingDocument {
                        resource: item.path.clone(),
                        overlay: smil.path.clone(),
                    })
                    .and_then(|bytes| parse_smil(&decode_text(&bytes), &smil.path, &item.path))
            });

        match result {
            Ok(overlay) if !overlay.is_empty() => overlays.push((index, overlay)),
            Ok(_) => debug!(resource = %item.path, "media overlay has no entries"),
            Err(err) => {
                warn!(resource = %item.path, error = %err, "narration disabled for spine item");
                diagnostics.push(err.into());
            }
        }
    }

    overlays
}

/// Read only the cover image bytes of an archive, without building a book.
pub fn cover_image<P: AsRef<Path>>(path: P) -> Result<Option<Vec<u8>>> {
    let tree = load_tree(path.as_ref(), &ArchiveMode::InPlace)?;
    let container = tree
        .read(CONTAINER_PATH)
        .map_err(|_| MalformedPackageError::MissingContainer)?;
    let opf_path = parse_container_xml(&container)?;
    let opf_bytes = tree.read(&opf_path)?;
    let package = parse_opf(&decode_text(&opf_bytes), &opf_path)?;

    let Some(cover) = package
        .metadata
        .cover_resource_id
        .as_deref()
        .and_then(|id| package.item(id))
    else {
        return Ok(None);
    };
    Ok(tree.read(&cover.path).ok())
}
