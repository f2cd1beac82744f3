//! A reading session: one book at a time, loaded off the interactive thread.
//!
//! [`ReaderSession::open`] starts a worker thread that builds the whole book
//! and sends it back over a channel in one message. The interactive side picks
//! it up with [`ReaderSession::poll`] (or [`ReaderSession::wait`]); until then
//! no part of the book is visible. Every open bumps a generation counter, and
//! a result whose generation is stale (the session was closed or another book
//! opened meanwhile) is dropped on arrival.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use tracing::{debug, info, warn};

use crate::book::{Book, TocEntry};
use crate::config::{EffectiveConfig, Preferences, ReaderConfig, ScrollDirection};
use crate::epub::{LoadOptions, LoadedBook, read_epub_with};
use crate::error::{ArchiveError, Diagnostic, Error, PositionOutOfRangeError, Result};
use crate::narration::{NarrationState, SyncEngine, SyncEvent};
use crate::navigation::{NavigationTracker, PositionOffset, ReadingPosition};
use crate::store::PositionStore;

/// Receives every non-fatal problem as it is absorbed.
pub type DiagnosticSink = Box<dyn Fn(&Diagnostic) + Send>;

/// Called once a book has been published to the session.
pub type LoadListener = Box<dyn FnMut(&Book) + Send>;

/// Result of one load, as seen by the host.
#[derive(Debug)]
pub enum LoadOutcome {
    Ready,
    /// The book is usable but lost its TOC, some narration, or its saved
    /// position.
    Degraded(Vec<Diagnostic>),
    /// No book was produced; the session is dismissed.
    Failed(Error),
}

impl LoadOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, LoadOutcome::Failed(_))
    }
}

struct PendingLoad {
    generation: u64,
    path: PathBuf,
    receiver: Receiver<(u64, Result<LoadedBook>)>,
}

/// Ties the loader, the navigation tracker and the sync engine together.
pub struct ReaderSession {
    config: ReaderConfig,
    effective: EffectiveConfig,
    preferences: Preferences,
    store: PositionStore,
    generation: u64,
    pending: Option<PendingLoad>,
    loaded: Option<LoadedBook>,
    tracker: NavigationTracker,
    sync: Option<SyncEngine>,
    events: Vec<SyncEvent>,
    diagnostics: Vec<Diagnostic>,
    sink: Option<DiagnosticSink>,
    listener: Option<LoadListener>,
    reader_open: bool,
    reader_ready: bool,
    dismissed: bool,
}

impl std::fmt::Debug for ReaderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSession")
            .field("effective", &self.effective)
            .field("generation", &self.generation)
            .field("loading", &self.pending.is_some())
            .field("book", &self.loaded.as_ref().map(|l| l.book.title().to_string()))
            .field("reader_open", &self.reader_open)
            .field("reader_ready", &self.reader_ready)
            .field("dismissed", &self.dismissed)
            .finish_non_exhaustive()
    }
}

impl ReaderSession {
    /// Create a session. Stored preferences, if any, decide the effective
    /// scroll direction.
    pub fn new(config: ReaderConfig, store: PositionStore) -> Self {
        let preferences = match store.load_preferences() {
            Ok(Some(prefs)) => prefs,
            Ok(None) => Preferences::first_run(),
            Err(err) => {
                warn!(error = %err, "ignoring unreadable preferences");
                Preferences::first_run()
            }
        };
        let effective = config.resolve(Some(preferences.scroll_direction));
        let tracker = NavigationTracker::new(effective.scroll_direction);

        Self {
            config,
            effective,
            preferences,
            store,
            generation: 0,
            pending: None,
            loaded: None,
            tracker,
            sync: None,
            events: Vec::new(),
            diagnostics: Vec::new(),
            sink: None,
            listener: None,
            reader_open: false,
            reader_ready: false,
            dismissed: false,
        }
    }

    pub fn with_diagnostic_sink(mut self, sink: DiagnosticSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn on_finished_loading(mut self, listener: LoadListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn effective_config(&self) -> &EffectiveConfig {
        &self.effective
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn is_reader_open(&self) -> bool {
        self.reader_open
    }

    pub fn is_reader_ready(&self) -> bool {
        self.reader_ready
    }

    /// Set after a fatal load failure; the host should close the reader.
    pub fn is_dismissed(&self) -> bool {
        self.dismissed
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn book(&self) -> Option<&Arc<Book>> {
        self.loaded.as_ref().map(|l| &l.book)
    }

    pub fn loaded(&self) -> Option<&LoadedBook> {
        self.loaded.as_ref()
    }

    /// Diagnostics absorbed since the current book was opened.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn tracker(&self) -> &NavigationTracker {
        &self.tracker
    }

    pub fn position(&self) -> Option<&ReadingPosition> {
        self.tracker.position()
    }

    pub fn narration(&self) -> Option<NarrationState> {
        self.sync.as_ref().map(SyncEngine::state)
    }

    /// An audio player is needed for narration or for text-to-speech.
    pub fn needs_audio_player(&self) -> bool {
        self.book().is_some_and(|book| book.has_audio()) || self.effective.enable_tts
    }

    /// Start loading a book in the background, replacing the current one.
    pub fn open(&mut self, path: impl AsRef<Path>, options: LoadOptions) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        self.reset_book();
        self.generation += 1;
        let generation = self.generation;

        let (sender, receiver) = mpsc::channel();
        let worker_path = path.clone();
        thread::Builder::new()
            .name("folio-load".to_string())
            .spawn(move || {
                let result = read_epub_with(&worker_path, &options);
                let _ = sender.send((generation, result));
            })
            .map_err(ArchiveError::Io)?;

        info!(path = %path.display(), generation, "loading book");
        self.pending = Some(PendingLoad {
            generation,
            path,
            receiver,
        });
        self.reader_open = true;
        self.reader_ready = false;
        self.dismissed = false;
        Ok(())
    }

    /// Non-blocking check for a finished load.
    pub fn poll(&mut self) -> Option<LoadOutcome> {
        let pending = self.pending.as_ref()?;
        let message = match pending.receiver.try_recv() {
            Ok(message) => message,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => (pending.generation, Err(Error::Cancelled)),
        };
        self.receive(message)
    }

    /// Block until the pending load finishes.
    pub fn wait(&mut self) -> Option<LoadOutcome> {
        let pending = self.pending.as_ref()?;
        let message = pending
            .receiver
            .recv()
            .unwrap_or((pending.generation, Err(Error::Cancelled)));
        self.receive(message)
    }

    /// Tear the session down. A load still in flight is discarded when it
    /// arrives.
    pub fn close(&mut self) -> Result<()> {
        self.persist_position()?;
        self.generation += 1;
        self.reset_book();
        self.reader_open = false;
        Ok(())
    }

    fn receive(&mut self, (generation, result): (u64, Result<LoadedBook>)) -> Option<LoadOutcome> {
        let pending = self.pending.take()?;
        if generation != self.generation || pending.generation != generation {
            debug!(generation, current = self.generation, "discarding stale load result");
            return None;
        }

        match result {
            Ok(loaded) => Some(self.publish(loaded)),
            Err(err) => {
                warn!(path = %pending.path.display(), error = %err, "book failed to load");
                self.reader_open = false;
                self.reader_ready = false;
                self.dismissed = true;
                Some(LoadOutcome::Failed(err))
            }
        }
    }

    fn publish(&mut self, loaded: LoadedBook) -> LoadOutcome {
        let book = Arc::clone(&loaded.book);
        for diagnostic in &loaded.diagnostics {
            self.report(diagnostic.clone());
        }

        let restored = match self.store.load_position(book.identity()) {
            Ok(position) => position,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable reading position");
                None
            }
        };
        if let Some(err) = self.tracker.attach(Arc::clone(&book), restored) {
            self.report(err.into());
        }

        let spine_index = self.tracker.position().map_or(0, |p| p.spine_index);
        self.sync = book.has_audio().then(|| SyncEngine::new(Arc::clone(&book), spine_index));
        self.loaded = Some(loaded);
        self.reader_ready = true;

        if let Some(listener) = self.listener.as_mut() {
            listener(&book);
        }

        if self.diagnostics.is_empty() {
            LoadOutcome::Ready
        } else {
            LoadOutcome::Degraded(self.diagnostics.clone())
        }
    }

    fn reset_book(&mut self) {
        self.pending = None;
        self.loaded = None;
        self.sync = None;
        self.events.clear();
        self.diagnostics.clear();
        self.tracker.detach();
        self.reader_ready = false;
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        if let Some(sink) = &self.sink {
            sink(&diagnostic);
        }
        self.diagnostics.push(diagnostic);
    }

    /// Write the current position under the book identity.
    pub fn persist_position(&self) -> Result<()> {
        if let (Some(book), Some(position)) = (self.book(), self.tracker.position()) {
            self.store.save_position(book.identity(), position)?;
        }
        Ok(())
    }

    /// Narration events produced by navigation since the last call.
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    /// Keep narration on the spine item being read, then persist.
    fn after_move(&mut self) -> Result<()> {
        if let (Some(sync), Some(position)) = (self.sync.as_mut(), self.tracker.position()) {
            let events = sync.set_spine_index(position.spine_index);
            self.events.extend(events);
        }
        self.persist_position()
    }

    pub fn next_page(&mut self) -> Result<bool> {
        let moved = self.tracker.next_page()?;
        self.after_move()?;
        Ok(moved)
    }

    pub fn previous_page(&mut self) -> Result<bool> {
        let moved = self.tracker.previous_page()?;
        self.after_move()?;
        Ok(moved)
    }

    pub fn jump_to_toc(&mut self, entry: &TocEntry) -> Result<()> {
        self.tracker.jump_to_toc(entry)?;
        self.after_move()
    }

    pub fn jump_to_percentage(&mut self, percentage: f64) -> Result<()> {
        self.tracker.jump_to_percentage(percentage)?;
        self.after_move()
    }

    pub fn jump_to_spine(&mut self, spine_index: usize, offset: PositionOffset) -> Result<()> {
        if let Some(err) = self.tracker.jump_to_spine(spine_index, offset)? {
            self.report_clamp(err);
        }
        self.after_move()
    }

    pub fn layout_settled(&mut self, page_count: usize) -> Result<()> {
        Ok(self.tracker.layout_settled(page_count)?)
    }

    pub fn report_offset(&mut self, fraction: f64) -> Result<()> {
        self.tracker.report_offset(fraction)?;
        self.persist_position()
    }

    /// Switch scroll direction when the configuration allows it, remembering
    /// the choice. Returns false when changing direction is disabled.
    pub fn change_scroll_direction(&mut self, direction: ScrollDirection) -> Result<bool> {
        if !self.effective.can_change_scroll_direction {
            return Ok(false);
        }
        self.tracker.change_scroll_direction(direction)?;
        self.effective.scroll_direction = direction;
        self.preferences.scroll_direction = direction;
        self.store.save_preferences(&self.preferences)?;
        self.persist_position()?;
        Ok(true)
    }

    /// Playback clock update. Auto-advance moves the reading position to the
    /// narrated item, onto the first narrated fragment.
    pub fn tick(&mut self, time: f64) -> Result<Vec<SyncEvent>> {
        let Some(sync) = self.sync.as_mut() else {
            return Ok(Vec::new());
        };
        let events = sync.tick(time);
        let highlighted = sync.highlighted().map(str::to_string);

        for event in &events {
            if let SyncEvent::AdvanceSpine { to, .. } = event {
                let offset = highlighted
                    .clone()
                    .map_or(PositionOffset::Percentage(0.0), PositionOffset::Fragment);
                if let Some(err) = self.tracker.jump_to_spine(*to, offset)? {
                    self.report_clamp(err);
                }
                self.persist_position()?;
            }
        }
        Ok(events)
    }

    /// Seek within the current item's narration.
    pub fn seek(&mut self, time: f64) -> Vec<SyncEvent> {
        self.sync.as_mut().map(|sync| sync.seek(time)).unwrap_or_default()
    }

    fn report_clamp(&mut self, err: PositionOutOfRangeError) {
        self.report(err.into());
    }
}
