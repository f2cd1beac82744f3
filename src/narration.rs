//! Media overlay synchronization.
//!
//! The [`SyncEngine`] follows the playback clock of the current spine item and
//! derives which text fragment is being narrated. The highlighted fragment is
//! never stored: it is looked up from the clock on demand, so it cannot drift
//! from the overlay ranges.
//!
//! Crossing the end of an item during continuous playback yields a
//! [`SyncEvent::AdvanceSpine`]; moving the reading position is left to
//! whoever consumes the event.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::book::{Book, MediaOverlay, MediaOverlayEntry};

/// Snapshot of the narration state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationState {
    pub spine_index: usize,
    /// Playback time within the current item, in seconds.
    pub time: f64,
    /// Fragment whose range contains `time`, if any.
    pub highlighted: Option<String>,
}

/// Something the audio or navigation side has to react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SyncEvent {
    HighlightChanged {
        from: Option<String>,
        to: Option<String>,
    },
    /// Playback ran past the last range of `from` and continues in `to`.
    AdvanceSpine { from: usize, to: usize },
    /// Playback ran past the last range of the last narrated item.
    Finished,
}

/// Pairs a playback clock with the media overlay of the current spine item.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    book: Arc<Book>,
    spine_index: usize,
    time: f64,
    finished: bool,
}

impl SyncEngine {
    pub fn new(book: Arc<Book>, spine_index: usize) -> Self {
        let spine_index = spine_index.min(book.spine_len().saturating_sub(1));
        let time = book.media_overlay(spine_index).map_or(0.0, MediaOverlay::start);
        Self {
            book,
            spine_index,
            time,
            finished: false,
        }
    }

    pub fn spine_index(&self) -> usize {
        self.spine_index
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Overlay of the current item; `None` when narration is disabled for it.
    pub fn overlay(&self) -> Option<&MediaOverlay> {
        self.book.media_overlay(self.spine_index)
    }

    pub fn is_enabled(&self) -> bool {
        self.overlay().is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The entry being narrated right now.
    pub fn current_entry(&self) -> Option<&MediaOverlayEntry> {
        let overlay = self.overlay()?;
        overlay.locate(self.time).map(|i| &overlay.entries()[i])
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.current_entry().map(|e| e.fragment_id.as_str())
    }

    pub fn state(&self) -> NarrationState {
        NarrationState {
            spine_index: self.spine_index,
            time: self.time,
            highlighted: self.highlighted().map(str::to_string),
        }
    }

    /// Playback clock update.
    ///
    /// Running past the end of the current item advances to the next spine
    /// item that has narration, starting at its first range.
    pub fn tick(&mut self, time: f64) -> Vec<SyncEvent> {
        if !time.is_finite() || self.finished {
            return Vec::new();
        }
        let Some(end) = self.overlay().map(MediaOverlay::end) else {
            return Vec::new();
        };

        let before = self.highlighted_owned();
        let mut events = Vec::new();
        self.time = time.max(0.0);

        if self.time >= end {
            match self.next_narrated_index() {
                Some(next) => {
                    let from = self.spine_index;
                    debug!(from, to = next, "narration advancing to next spine item");
                    self.enter(next);
                    events.push(SyncEvent::AdvanceSpine { from, to: next });
                }
                None => {
                    debug!(spine_index = self.spine_index, "narration finished");
                    self.finished = true;
                    push_highlight_change(&mut events, before, None);
                    events.push(SyncEvent::Finished);
                    return events;
                }
            }
        }

        let after = self.highlighted_owned();
        trace!(time = self.time, highlighted = ?after, "narration tick");
        push_highlight_change(&mut events, before, after);
        events
    }

    /// Jump the clock within the current item. Never changes spine items.
    pub fn seek(&mut self, time: f64) -> Vec<SyncEvent> {
        if !time.is_finite() {
            return Vec::new();
        }
        let before = self.highlighted_owned();
        self.time = time.max(0.0);
        self.finished = false;
        let mut events = Vec::new();
        push_highlight_change(&mut events, before, self.highlighted_owned());
        events
    }

    /// Seek to the start of a fragment's range; `None` when the current item
    /// has no range for `fragment_id`.
    pub fn seek_to_fragment(&mut self, fragment_id: &str) -> Option<Vec<SyncEvent>> {
        let overlay = self.overlay()?;
        let index = overlay.index_of(fragment_id)?;
        let start = overlay.entries()[index].start;
        Some(self.seek(start))
    }

    /// Follow the reading position to another spine item.
    pub fn set_spine_index(&mut self, spine_index: usize) -> Vec<SyncEvent> {
        let spine_index = spine_index.min(self.book.spine_len().saturating_sub(1));
        if spine_index == self.spine_index {
            return Vec::new();
        }
        let before = self.highlighted_owned();
        self.enter(spine_index);
        let mut events = Vec::new();
        push_highlight_change(&mut events, before, self.highlighted_owned());
        events
    }

    fn enter(&mut self, spine_index: usize) {
        self.spine_index = spine_index;
        self.time = self.overlay().map_or(0.0, MediaOverlay::start);
        self.finished = false;
    }

    fn next_narrated_index(&self) -> Option<usize> {
        (self.spine_index + 1..self.book.spine_len()).find(|&i| self.book.media_overlay(i).is_some())
    }

    fn highlighted_owned(&self) -> Option<String> {
        self.highlighted().map(str::to_string)
    }
}

fn push_highlight_change(events: &mut Vec<SyncEvent>, from: Option<String>, to: Option<String>) {
    if from != to {
        events.push(SyncEvent::HighlightChanged { from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{Metadata, Resource};

    fn overlay(ranges: &[(&str, f64, f64)]) -> MediaOverlay {
        MediaOverlay::new(
            ranges
                .iter()
                .map(|(id, start, end)| MediaOverlayEntry::new(*id, *start, *end))
                .collect(),
        )
        .unwrap()
    }

    fn narrated_book() -> Arc<Book> {
        let mut builder = Book::builder(Metadata::new("Narrated"));
        for i in 0..4 {
            let id = format!("ch{i}");
            builder = builder
                .resource(Resource::new(&id, format!("{id}.xhtml"), "application/xhtml+xml"))
                .spine_item(id, true);
        }
        Arc::new(
            builder
                .overlay(1, overlay(&[("a1", 0.0, 2.0), ("a2", 2.0, 4.0)]))
                .overlay(2, overlay(&[("frag1", 0.0, 3.2), ("frag2", 3.2, 7.0)]))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_seek_resolves_highlight() {
        let mut engine = SyncEngine::new(narrated_book(), 2);
        assert_eq!(engine.highlighted(), Some("frag1"));

        let events = engine.seek(5.0);
        assert_eq!(engine.highlighted(), Some("frag2"));
        assert_eq!(
            events,
            vec![SyncEvent::HighlightChanged {
                from: Some("frag1".into()),
                to: Some("frag2".into())
            }]
        );

        engine.seek(8.0);
        assert_eq!(engine.highlighted(), None);
        assert_eq!(engine.spine_index(), 2);
    }

    #[test]
    fn test_disabled_item_is_silent() {
        let mut engine = SyncEngine::new(narrated_book(), 0);
        assert!(!engine.is_enabled());
        assert!(engine.tick(1.0).is_empty());
        assert_eq!(engine.highlighted(), None);
    }

    #[test]
    fn test_tick_auto_advances() {
        let mut engine = SyncEngine::new(narrated_book(), 1);
        assert!(engine.tick(1.0).is_empty());
        assert_eq!(engine.highlighted(), Some("a1"));

        let events = engine.tick(4.0);
        assert_eq!(events[0], SyncEvent::AdvanceSpine { from: 1, to: 2 });
        assert_eq!(engine.spine_index(), 2);
        assert_eq!(engine.highlighted(), Some("frag1"));

        let events = engine.tick(7.5);
        assert_eq!(events.last(), Some(&SyncEvent::Finished));
        assert!(engine.is_finished());
        assert!(engine.tick(1.0).is_empty());
    }

    #[test]
    fn test_follow_navigation() {
        let mut engine = SyncEngine::new(narrated_book(), 0);
        let events = engine.set_spine_index(1);
        assert_eq!(
            events,
            vec![SyncEvent::HighlightChanged {
                from: None,
                to: Some("a1".into())
            }]
        );
        assert!(engine.seek_to_fragment("a2").is_some());
        assert_eq!(engine.time(), 2.0);
        assert!(engine.seek_to_fragment("frag1").is_none());
    }
}
