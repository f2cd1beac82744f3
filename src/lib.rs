//! # folio
//!
//! The core of an EPUB reader: archive loading, package and TOC parsing, an
//! immutable book model, reading position tracking and media overlay
//! ("audio-eBook") synchronization. Rendering is left to the host.
//!
//! ## Features
//!
//! - EPUB 2 and 3 packages, read in place or extracted to a directory
//! - NCX and EPUB 3 navigation documents, with cycle detection
//! - SMIL media overlays, narrated fragment derived from the playback clock
//! - Vertical (continuous) and horizontal (paginated) position tracking
//! - Reading positions persisted per book through a host key-value store
//!
//! ## Quick Start
//!
//! ```no_run
//! use folio::read_epub;
//!
//! let loaded = read_epub("book.epub")?;
//! let book = &loaded.book;
//! println!("{} ({} spine items)", book.title(), book.spine_len());
//! for (depth, entry) in book.toc_flat() {
//!     println!("{}{}", "  ".repeat(depth), entry.title);
//! }
//! # Ok::<(), folio::Error>(())
//! ```
//!
//! ## Reading Sessions
//!
//! A [`ReaderSession`] loads on a background thread and publishes the book in
//! one step, then drives navigation and narration against it:
//!
//! ```no_run
//! use folio::{LoadOptions, LoadOutcome, PositionStore, ReaderConfig, ReaderSession};
//!
//! let mut session = ReaderSession::new(ReaderConfig::default(), PositionStore::in_memory());
//! session.open("book.epub", LoadOptions::default())?;
//! match session.wait() {
//!     Some(LoadOutcome::Failed(err)) => eprintln!("cannot open: {err}"),
//!     Some(_) => {
//!         session.layout_settled(12)?;
//!         session.next_page()?;
//!     }
//!     None => {}
//! }
//! # Ok::<(), folio::Error>(())
//! ```

pub mod archive;
pub mod book;
pub mod config;
pub mod epub;
pub mod error;
pub mod narration;
pub mod navigation;
pub mod session;
pub mod store;
pub(crate) mod util;

pub use book::{Book, MediaOverlay, MediaOverlayEntry, Metadata, Resource, SpineItem, TocEntry, TocTarget};
pub use config::{EffectiveConfig, Preferences, ReaderConfig, ScrollDirection};
pub use epub::{LoadOptions, LoadedBook, cover_image, read_epub, read_epub_from_bytes, read_epub_with};
pub use error::{
    ArchiveError, Diagnostic, Error, MalformedPackageError, MediaOverlayError, NavigationError,
    PositionOutOfRangeError, Result, TocError,
};
pub use narration::{NarrationState, SyncEngine, SyncEvent};
pub use navigation::{NavigationState, NavigationTracker, PositionOffset, ReadingPosition};
pub use session::{LoadOutcome, ReaderSession};
pub use store::{KeyValueStore, MemoryStore, PositionStore};
