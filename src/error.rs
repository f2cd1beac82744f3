//! Error types for folio operations.
//!
//! Fatal errors ([`ArchiveError`], [`MalformedPackageError`]) abort a load and
//! no [`Book`](crate::Book) is produced. Non-fatal errors ([`TocError`],
//! [`MediaOverlayError`], [`PositionOutOfRangeError`]) are absorbed by the
//! pipeline and surfaced as [`Diagnostic`] values instead of being returned.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while opening or extracting the zip container.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("corrupt zip archive: {0}")]
    CorruptZip(String),

    #[error("unsupported compression method {method} for {path}")]
    UnsupportedCompression { path: String, method: String },

    #[error("file not found in archive: {0}")]
    MissingEntry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => ArchiveError::Io(e),
            zip::result::ZipError::FileNotFound => ArchiveError::MissingEntry(String::new()),
            other => ArchiveError::CorruptZip(other.to_string()),
        }
    }
}

/// Errors in the container pointer, package document, manifest or spine.
#[derive(Error, Debug)]
pub enum MalformedPackageError {
    #[error("META-INF/container.xml is missing or unreadable")]
    MissingContainer,

    #[error("no rootfile found in container.xml")]
    MissingRootfile,

    #[error("package document not found: {0}")]
    MissingPackage(String),

    #[error("XML parsing error in {document}: {source}")]
    Xml {
        document: String,
        #[source]
        source: quick_xml::Error,
    },

    #[error("invalid text encoding in {0}")]
    Encoding(String),

    #[error("spine references unknown manifest item: {0}")]
    UnknownSpineItem(String),

    #[error("spine is empty")]
    EmptySpine,

    #[error("missing required metadata: {0}")]
    MissingMetadata(&'static str),
}

/// Non-fatal table of contents problems. The book loads with a partial or
/// empty outline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TocError {
    #[error("navigation document not found: {0}")]
    Missing(String),

    #[error("XML parsing error in navigation document: {0}")]
    Xml(String),

    #[error("cycle detected at TOC entry {0:?}")]
    Cycle(String),

    #[error("TOC entry {title:?} points at unknown resource {href}")]
    UnresolvedTarget { title: String, href: String },
}

/// Non-fatal media overlay problems. Narration is disabled for the affected
/// spine item only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaOverlayError {
    #[error("media overlay document {overlay} for {resource} not found")]
    MissingDocument { resource: String, overlay: String },

    #[error("XML parsing error in media overlay {overlay}: {message}")]
    Xml { overlay: String, message: String },

    #[error("media overlay {overlay} has unsorted or overlapping ranges at entry {index}")]
    UnsortedRanges { overlay: String, index: usize },

    #[error("invalid clock value {value:?} in media overlay {overlay}")]
    InvalidClock { overlay: String, value: String },
}

/// A persisted or requested position pointed outside the current spine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("spine index {index} out of range for spine of length {len}, clamped to {clamped}")]
pub struct PositionOutOfRangeError {
    pub index: usize,
    pub len: usize,
    pub clamped: usize,
}

/// Navigation requests that cannot be honored at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavigationError {
    #[error("no book is attached to the navigation tracker")]
    NoBook,

    #[error("percentage {0} is not a finite number")]
    InvalidPercentage(f64),

    #[error("resource {0} is not part of the book")]
    UnknownResource(String),
}

/// Errors from the persisted key-value state.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("stored value under {key} is invalid: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A degraded-but-usable condition reported during a load or while reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    #[error(transparent)]
    Toc(#[from] TocError),

    #[error(transparent)]
    MediaOverlay(#[from] MediaOverlayError),

    #[error(transparent)]
    PositionOutOfRange(#[from] PositionOutOfRangeError),
}

/// Crate-level error for operations that fail outright.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    MalformedPackage(#[from] MalformedPackageError),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid reader configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("load was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
