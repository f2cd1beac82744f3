//! The immutable book model produced by the load pipeline.
//!
//! Resources live in one map keyed by manifest id; the spine, the table of
//! contents and the media overlays refer to them by id only.

mod overlay;

pub use overlay::{MediaOverlay, MediaOverlayEntry};

use std::collections::HashMap;

use serde::Serialize;

use crate::error::MalformedPackageError;

/// Book metadata (Dublin Core plus the package properties a reader needs).
#[derive(Debug, Clone, Default, Serialize)]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
    pub identifier: String,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub subjects: Vec<String>,
    pub date: Option<String>,
    pub rights: Option<String>,
    /// Manifest id of the cover image.
    pub cover_resource_id: Option<String>,
    /// `ltr`, `rtl` or absent.
    pub page_progression: Option<String>,
    /// Total narration length from `media:duration`, in seconds.
    pub narration_duration: Option<f64>,
    /// CSS class the renderer applies to the active narration fragment.
    pub active_class: Option<String>,
}

impl Metadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// First listed author, if any.
    pub fn author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }
}

/// A manifest resource (content document, image, stylesheet, audio, SMIL...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub id: String,
    /// Path inside the archive ("OEBPS/text/ch01.xhtml").
    pub path: String,
    pub media_type: String,
    pub size: Option<u64>,
    pub properties: Vec<String>,
    /// Manifest id of the SMIL document narrating this resource.
    pub media_overlay: Option<String>,
    /// Declaration order in the manifest.
    pub order: usize,
}

impl Resource {
    pub fn new(id: impl Into<String>, path: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            media_type: media_type.into(),
            size: None,
            properties: Vec::new(),
            media_overlay: None,
            order: 0,
        }
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }
}

/// An entry in the reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpineItem {
    pub resource_id: String,
    pub linear: bool,
}

/// Where a TOC entry points: a manifest resource plus an optional anchor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TocTarget {
    pub resource_id: String,
    pub fragment: Option<String>,
}

/// A table of contents entry (hierarchical).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub title: String,
    pub target: TocTarget,
    pub children: Vec<TocEntry>,
    /// Play order for sorting (from NCX playOrder attribute)
    pub play_order: Option<usize>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            target: TocTarget {
                resource_id: resource_id.into(),
                fragment: None,
            },
            children: Vec::new(),
            play_order: None,
        }
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.target.fragment = Some(fragment.into());
        self
    }

    pub fn with_child(mut self, child: TocEntry) -> Self {
        self.children.push(child);
        self
    }
}

/// A parsed book. Immutable once built; open the archive again to get a
/// different one.
#[derive(Debug, Clone, Serialize)]
pub struct Book {
    identity: String,
    metadata: Metadata,
    spine: Vec<SpineItem>,
    resources: HashMap<String, Resource>,
    #[serde(skip)]
    by_path: HashMap<String, String>,
    toc: Vec<TocEntry>,
    #[serde(skip)]
    overlays: HashMap<usize, MediaOverlay>,
}

impl Book {
    pub fn builder(metadata: Metadata) -> BookBuilder {
        BookBuilder {
            metadata,
            package_digest: None,
            spine: Vec::new(),
            resources: Vec::new(),
            toc: Vec::new(),
            overlays: HashMap::new(),
        }
    }

    /// Key under which reader state for this book is persisted.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    pub fn spine(&self) -> &[SpineItem] {
        &self.spine
    }

    pub fn spine_len(&self) -> usize {
        self.spine.len()
    }

    pub fn spine_item(&self, index: usize) -> Option<&SpineItem> {
        self.spine.get(index)
    }

    /// The resource behind a spine position.
    pub fn spine_resource(&self, index: usize) -> Option<&Resource> {
        self.spine
            .get(index)
            .and_then(|item| self.resources.get(&item.resource_id))
    }

    /// First spine position that reads `resource_id`.
    pub fn spine_index_of(&self, resource_id: &str) -> Option<usize> {
        self.spine.iter().position(|item| item.resource_id == resource_id)
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn resource_by_path(&self, path: &str) -> Option<&Resource> {
        self.by_path.get(path).and_then(|id| self.resources.get(id))
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    /// Depth-first walk of the TOC, paired with each entry's depth.
    pub fn toc_flat(&self) -> Vec<(usize, &TocEntry)> {
        fn walk<'a>(entries: &'a [TocEntry], depth: usize, out: &mut Vec<(usize, &'a TocEntry)>) {
            for entry in entries {
                out.push((depth, entry));
                walk(&entry.children, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.toc, 0, &mut out);
        out
    }

    pub fn cover_resource(&self) -> Option<&Resource> {
        self.metadata
            .cover_resource_id
            .as_deref()
            .and_then(|id| self.resources.get(id))
    }

    /// Narration for a spine position; `None` when absent or disabled.
    pub fn media_overlay(&self, spine_index: usize) -> Option<&MediaOverlay> {
        self.overlays.get(&spine_index).filter(|o| !o.is_empty())
    }

    /// True iff at least one spine item has a non-empty media overlay.
    pub fn has_audio(&self) -> bool {
        self.overlays.values().any(|o| !o.is_empty())
    }
}

/// Assembles a [`Book`], validating cross references once at the end.
pub struct BookBuilder {
    metadata: Metadata,
    package_digest: Option<String>,
    spine: Vec<SpineItem>,
    resources: Vec<Resource>,
    toc: Vec<TocEntry>,
    overlays: HashMap<usize, MediaOverlay>,
}

impl BookBuilder {
    /// The package document the book was read from. Its digest becomes the
    /// identity when the metadata carries no identifier.
    pub fn package_document(mut self, bytes: &[u8]) -> Self {
        self.package_digest = Some(sha1_hex(&[bytes]));
        self
    }

    pub fn resource(mut self, mut resource: Resource) -> Self {
        resource.order = self.resources.len();
        self.resources.push(resource);
        self
    }

    pub fn spine_item(mut self, resource_id: impl Into<String>, linear: bool) -> Self {
        self.spine.push(SpineItem {
            resource_id: resource_id.into(),
            linear,
        });
        self
    }

    pub fn toc(mut self, toc: Vec<TocEntry>) -> Self {
        self.toc = toc;
        self
    }

    pub fn overlay(mut self, spine_index: usize, overlay: MediaOverlay) -> Self {
        self.overlays.insert(spine_index, overlay);
        self
    }

    pub fn build(self) -> Result<Book, MalformedPackageError> {
        if self.metadata.title.trim().is_empty() {
            return Err(MalformedPackageError::MissingMetadata("title"));
        }
        if self.spine.is_empty() {
            return Err(MalformedPackageError::EmptySpine);
        }

        let mut resources = HashMap::with_capacity(self.resources.len());
        let mut by_path = HashMap::with_capacity(self.resources.len());
        for resource in self.resources {
            by_path.insert(resource.path.clone(), resource.id.clone());
            resources.insert(resource.id.clone(), resource);
        }

        if let Some(missing) = self
            .spine
            .iter()
            .find(|item| !resources.contains_key(&item.resource_id))
        {
            return Err(MalformedPackageError::UnknownSpineItem(missing.resource_id.clone()));
        }

        let spine_len = self.spine.len();
        let overlays = self
            .overlays
            .into_iter()
            .filter(|(index, overlay)| *index < spine_len && !overlay.is_empty())
            .collect();

        // Identifier, then package digest, then title and spine for books
        // assembled without a package document.
        let identity = if !self.metadata.identifier.trim().is_empty() {
            self.metadata.identifier.clone()
        } else if let Some(digest) = self.package_digest {
            digest
        } else {
            let mut parts = vec![self.metadata.title.as_bytes()];
            parts.extend(self.spine.iter().map(|item| item.resource_id.as_bytes()));
            sha1_hex(&parts)
        };

        Ok(Book {
            identity,
            metadata: self.metadata,
            spine: self.spine,
            resources,
            by_path,
            toc: self.toc,
            overlays,
        })
    }
}

fn sha1_hex(parts: &[&[u8]]) -> String {
    let mut hasher = sha1_smol::Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.digest().to_string()
}
