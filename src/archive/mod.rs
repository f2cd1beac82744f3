//! Archive loading: the zip container exposed as a file tree.
//!
//! An archive is either read in place ([`ZipTree`], random access into the
//! zip through a [`ByteSource`]) or extracted into a working directory first
//! ([`DirTree`]). Everything downstream only sees the [`FileTree`] trait.

mod source;

pub use source::{ByteSource, FileSource, MemorySource, SourceCursor};

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use zip::{CompressionMethod, ZipArchive};

use crate::error::ArchiveError;

/// Read-only view over the files of an opened archive.
///
/// Paths are archive-relative and `/`-separated ("OEBPS/text/ch01.xhtml").
pub trait FileTree: Send + Sync {
    /// Read the complete contents of a file.
    fn read(&self, path: &str) -> Result<Vec<u8>, ArchiveError>;

    /// Whether a file exists at `path`.
    fn contains(&self, path: &str) -> bool;

    /// Uncompressed size of a file, when known.
    fn size(&self, path: &str) -> Option<u64>;

    /// All file paths, sorted.
    fn paths(&self) -> Vec<String>;
}

/// How the loader should expose the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Read entries straight out of the zip file.
    InPlace,
    /// Extract everything under the given directory, then read from disk.
    Extract(PathBuf),
}

/// Open an archive on disk as a file tree.
pub fn load_tree(path: &Path, mode: &ArchiveMode) -> Result<Arc<dyn FileTree>, ArchiveError> {
    if !path.is_file() {
        return Err(ArchiveError::NotFound(path.to_path_buf()));
    }
    match mode {
        ArchiveMode::InPlace => Ok(Arc::new(ZipTree::open(path)?)),
        ArchiveMode::Extract(dest) => Ok(Arc::new(extract_archive(path, dest)?)),
    }
}

// ----------------------------------------------------------------------------
// In-place zip access
// ----------------------------------------------------------------------------

/// A zip archive read in place.
///
/// The central directory is scanned once; afterwards each read decompresses a
/// single entry straight from the byte source without shared cursor state.
pub struct ZipTree {
    source: Arc<dyn ByteSource>,
    index: HashMap<String, ZipEntryLoc>,
}

/// Largest expansion deflate can produce per compressed byte.
const MAX_DEFLATE_RATIO: u64 = 1032;

/// Upper bound on buffer space reserved from a header-declared size.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

#[derive(Clone, Copy)]
struct ZipEntryLoc {
    data_offset: u64,
    compressed_size: u64,
    size: u64,
    compression: CompressionMethod,
}

impl ZipEntryLoc {
    /// The declared uncompressed size, unless the headers contradict it.
    fn plausible_size(&self) -> Option<u64> {
        let plausible = match self.compression {
            CompressionMethod::Stored => self.size == self.compressed_size,
            CompressionMethod::Deflated => self.size <= self.compressed_size.saturating_mul(MAX_DEFLATE_RATIO),
            _ => false,
        };
        plausible.then_some(self.size)
    }
}

impl ZipTree {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = fs::File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ArchiveError::NotFound(path.to_path_buf()),
            _ => ArchiveError::Io(e),
        })?;
        Self::from_source(Arc::new(FileSource::new(file)?))
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ArchiveError> {
        Self::from_source(Arc::new(MemorySource::new(data)))
    }

    pub fn from_source(source: Arc<dyn ByteSource>) -> Result<Self, ArchiveError> {
        let mut archive = ZipArchive::new(SourceCursor::new(source.clone()))?;
        let mut index = HashMap::with_capacity(archive.len());

        for i in 0..archive.len() {
            let file = archive.by_index_raw(i)?;
            if file.is_dir() {
                continue;
            }
            index.insert(
                file.name().to_string(),
                ZipEntryLoc {
                    data_offset: file.data_start(),
                    compressed_size: file.compressed_size(),
                    size: file.size(),
                    compression: file.compression(),
                },
            );
        }

        debug!(entries = index.len(), "indexed zip central directory");
        Ok(Self { source, index })
    }
}

impl FileTree for ZipTree {
    fn read(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let loc = self
            .index
            .get(path)
            .ok_or_else(|| ArchiveError::MissingEntry(path.to_string()))?;

        let in_bounds = loc
            .data_offset
            .checked_add(loc.compressed_size)
            .is_some_and(|end| end <= self.source.len());
        if !in_bounds {
            return Err(ArchiveError::CorruptZip(format!("{path}: entry data runs past the end of the archive")));
        }

        let compressed = self.source.read_at(loc.data_offset, loc.compressed_size as usize)?;
        match loc.compression {
            CompressionMethod::Stored => Ok(compressed),
            CompressionMethod::Deflated => {
                let mut decoder = flate2::read::DeflateDecoder::new(&compressed[..]);
                let capacity = loc.plausible_size().unwrap_or(0).min(MAX_PREALLOC);
                let mut out = Vec::with_capacity(capacity as usize);
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| ArchiveError::CorruptZip(format!("{path}: {e}")))?;
                Ok(out)
            }
            method => Err(ArchiveError::UnsupportedCompression {
                path: path.to_string(),
                method: format!("{method:?}"),
            }),
        }
    }

    fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    fn size(&self, path: &str) -> Option<u64> {
        self.index.get(path).and_then(ZipEntryLoc::plausible_size)
    }

    fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.index.keys().cloned().collect();
        paths.sort();
        paths
    }
}

// ----------------------------------------------------------------------------
// Extracted directory
// ----------------------------------------------------------------------------

/// An archive extracted into a working directory.
pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> Option<PathBuf> {
        let mut full = self.root.clone();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => return None,
                s => full.push(s),
            }
        }
        Some(full)
    }
}

impl FileTree for DirTree {
    fn read(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let full = self
            .full_path(path)
            .ok_or_else(|| ArchiveError::MissingEntry(path.to_string()))?;
        fs::read(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ArchiveError::MissingEntry(path.to_string()),
            _ => ArchiveError::Io(e),
        })
    }

    fn contains(&self, path: &str) -> bool {
        self.full_path(path).is_some_and(|p| p.is_file())
    }

    fn size(&self, path: &str) -> Option<u64> {
        let full = self.full_path(path)?;
        fs::metadata(full).ok().map(|m| m.len())
    }

    fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let rel: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
                    paths.push(rel.join("/"));
                }
            }
        }
        paths.sort();
        paths
    }
}

/// Extract every entry of `archive` beneath `dest`.
///
/// Entries whose names would escape `dest` (absolute paths, `..`) make the
/// archive corrupt rather than being written.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<DirTree, ArchiveError> {
    let file = fs::File::open(archive).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ArchiveError::NotFound(archive.to_path_buf()),
        _ => ArchiveError::Io(e),
    })?;
    let mut zip = ZipArchive::new(file)?;
    fs::create_dir_all(dest)?;

    for i in 0..zip.len() {
        let mut entry = match zip.by_index(i) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::UnsupportedArchive(msg)) => {
                return Err(ArchiveError::UnsupportedCompression {
                    path: format!("entry #{i}"),
                    method: msg.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let Some(rel) = entry.enclosed_name() else {
            return Err(ArchiveError::CorruptZip(format!(
                "entry {} escapes the extraction directory",
                entry.name()
            )));
        };
        let out_path = dest.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| ArchiveError::CorruptZip(format!("{}: {e}", entry.name())))?;
    }

    debug!(archive = %archive.display(), dest = %dest.display(), "extracted archive");
    Ok(DirTree::new(dest))
}

/// Delete the source archive. Only called once a load has fully succeeded.
pub fn remove_source(path: &Path) -> Result<(), ArchiveError> {
    fs::remove_file(path)?;
    debug!(archive = %path.display(), "removed source archive");
    Ok(())
}
