//! Reading position tracking.
//!
//! The [`NavigationTracker`] turns movement requests into [`ReadingPosition`]s
//! and follows the renderer through a small state machine:
//!
//! ```text
//! Idle --attach--> Navigating --layout_settled--> Settled
//!                      ^                             |
//!                      +------- movement request ----+
//! ```
//!
//! The spine index of the current position is always valid for the attached
//! book; out-of-range requests are clamped, never rejected.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::book::{Book, TocEntry};
use crate::config::ScrollDirection;
use crate::error::{NavigationError, PositionOutOfRangeError};

/// Where inside a spine resource the reader is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum PositionOffset {
    /// Byte offset into the resource.
    Byte(u64),
    /// Element id inside the resource.
    Fragment(String),
    /// Fraction of the laid out resource, `0.0..=1.0`.
    Percentage(f64),
}

impl Default for PositionOffset {
    fn default() -> Self {
        PositionOffset::Percentage(0.0)
    }
}

/// The durable pointer to where the user is in a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPosition {
    pub spine_index: usize,
    #[serde(default)]
    pub offset: PositionOffset,
    #[serde(default)]
    pub direction: ScrollDirection,
}

impl ReadingPosition {
    pub fn new(spine_index: usize, direction: ScrollDirection) -> Self {
        Self {
            spine_index,
            offset: PositionOffset::default(),
            direction,
        }
    }

    pub fn with_offset(mut self, offset: PositionOffset) -> Self {
        self.offset = offset;
        self
    }
}

/// Tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigationState {
    /// No book attached yet.
    Idle,
    /// A movement was requested and the renderer has not settled.
    Navigating,
    /// The renderer reported layout for the current position.
    Settled,
}

/// Maintains the current reading position for one attached book.
#[derive(Debug)]
pub struct NavigationTracker {
    book: Option<Arc<Book>>,
    state: NavigationState,
    position: ReadingPosition,
    direction: ScrollDirection,
    /// Page count of the current spine item, once the renderer reports it.
    page_count: Option<usize>,
}

impl NavigationTracker {
    pub fn new(direction: ScrollDirection) -> Self {
        Self {
            book: None,
            state: NavigationState::Idle,
            position: ReadingPosition::new(0, direction),
            direction,
            page_count: None,
        }
    }

    pub fn state(&self) -> NavigationState {
        self.state
    }

    pub fn book(&self) -> Option<&Arc<Book>> {
        self.book.as_ref()
    }

    pub fn direction(&self) -> ScrollDirection {
        self.direction
    }

    /// Current position; `None` while idle.
    pub fn position(&self) -> Option<&ReadingPosition> {
        self.book.as_ref().map(|_| &self.position)
    }

    pub fn page_count(&self) -> Option<usize> {
        self.page_count
    }

    /// Attach a freshly loaded book, replacing any previous one, and restore
    /// a persisted position.
    ///
    /// A persisted spine index past the end of the spine is clamped to the
    /// last item and reported.
    pub fn attach(&mut self, book: Arc<Book>, restored: Option<ReadingPosition>) -> Option<PositionOutOfRangeError> {
        let mut position = restored.unwrap_or_else(|| ReadingPosition::new(0, self.direction));
        position.direction = self.direction;

        let clamped = clamp_index(position.spine_index, book.spine_len());
        let error = clamped.err();
        if let Some(err) = &error {
            warn!(index = err.index, len = err.len, clamped = err.clamped, "restored position out of range");
            position.spine_index = err.clamped;
            position.offset = PositionOffset::default();
        }

        debug!(spine_index = position.spine_index, "book attached");
        self.book = Some(book);
        self.position = position;
        self.page_count = None;
        self.state = NavigationState::Navigating;
        error
    }

    /// Drop the attached book and go back to idle.
    pub fn detach(&mut self) {
        self.book = None;
        self.page_count = None;
        self.position = ReadingPosition::new(0, self.direction);
        self.state = NavigationState::Idle;
    }

    /// Renderer feedback: the current spine item is laid out in `page_count`
    /// pages (screens, in vertical mode).
    pub fn layout_settled(&mut self, page_count: usize) -> Result<(), NavigationError> {
        self.require_book()?;
        self.page_count = Some(page_count.max(1));
        self.state = NavigationState::Settled;
        Ok(())
    }

    /// Renderer feedback: the user scrolled to `fraction` of the current item.
    ///
    /// Continuous scrolling does not leave the settled state.
    pub fn report_offset(&mut self, fraction: f64) -> Result<(), NavigationError> {
        self.require_book()?;
        if !fraction.is_finite() {
            return Err(NavigationError::InvalidPercentage(fraction));
        }
        self.position.offset = PositionOffset::Percentage(fraction.clamp(0.0, 1.0));
        Ok(())
    }

    /// Zero-based page of the current item, when the layout is known.
    pub fn current_page(&self) -> Option<usize> {
        let count = self.page_count?;
        let fraction = self.item_fraction();
        Some(((fraction * count as f64).floor() as usize).min(count - 1))
    }

    /// Move one page forward, into the next spine item at the end of this
    /// one. Returns false at the end of the book.
    pub fn next_page(&mut self) -> Result<bool, NavigationError> {
        let len = self.require_book()?.spine_len();
        let count = self.page_count.unwrap_or(1);
        let page = self.current_page().unwrap_or(0);

        if page + 1 < count {
            let offset = PositionOffset::Percentage((page + 1) as f64 / count as f64);
            self.move_within(offset);
            return Ok(true);
        }
        if self.position.spine_index + 1 < len {
            self.move_to(self.position.spine_index + 1, PositionOffset::Percentage(0.0));
            return Ok(true);
        }
        Ok(false)
    }

    /// Move one page back, onto the last page of the previous spine item at
    /// the start of this one. Returns false at the start of the book.
    pub fn previous_page(&mut self) -> Result<bool, NavigationError> {
        self.require_book()?;
        let count = self.page_count.unwrap_or(1);
        let page = self.current_page().unwrap_or(0);

        if page > 0 {
            let offset = PositionOffset::Percentage((page - 1) as f64 / count as f64);
            self.move_within(offset);
            return Ok(true);
        }
        if self.position.spine_index > 0 {
            self.move_to(self.position.spine_index - 1, PositionOffset::Percentage(1.0));
            return Ok(true);
        }
        Ok(false)
    }

    /// Jump to a spine index, clamping past-the-end requests to the last item.
    pub fn jump_to_spine(
        &mut self,
        spine_index: usize,
        offset: PositionOffset,
    ) -> Result<Option<PositionOutOfRangeError>, NavigationError> {
        let len = self.require_book()?.spine_len();
        let (index, error) = match clamp_index(spine_index, len) {
            Ok(index) => (index, None),
            Err(err) => {
                debug!(index = err.index, clamped = err.clamped, "jump clamped to spine");
                (err.clamped, Some(err))
            }
        };
        self.move_to(index, offset);
        Ok(error)
    }

    /// Jump to the target of a TOC entry.
    ///
    /// A target outside the spine lands on the spine item nearest to it in
    /// manifest order.
    pub fn jump_to_toc(&mut self, entry: &TocEntry) -> Result<(), NavigationError> {
        let book = self.require_book()?;
        let resource_id = &entry.target.resource_id;
        let index = match book.spine_index_of(resource_id) {
            Some(index) => index,
            None => nearest_spine_index(book, resource_id)
                .ok_or_else(|| NavigationError::UnknownResource(resource_id.clone()))?,
        };
        let offset = match &entry.target.fragment {
            Some(fragment) => PositionOffset::Fragment(fragment.clone()),
            None => PositionOffset::Percentage(0.0),
        };
        self.move_to(index, offset);
        Ok(())
    }

    /// Jump to a fraction of the whole book, `0.0..=1.0` (clamped).
    pub fn jump_to_percentage(&mut self, percentage: f64) -> Result<(), NavigationError> {
        if !percentage.is_finite() {
            return Err(NavigationError::InvalidPercentage(percentage));
        }
        let book = self.require_book()?;
        let weights = spine_weights(book);
        let total: f64 = weights.iter().sum();
        let target = percentage.clamp(0.0, 1.0) * total;

        let mut start = 0.0;
        let mut index = weights.len() - 1;
        let mut fraction = 1.0;
        for (i, weight) in weights.iter().enumerate() {
            if target < start + weight {
                index = i;
                fraction = ((target - start) / weight).clamp(0.0, 1.0);
                break;
            }
            start += weight;
        }
        self.move_to(index, PositionOffset::Percentage(fraction));
        Ok(())
    }

    /// Progress through the whole book, `0.0..=1.0`.
    pub fn book_progress(&self) -> Option<f64> {
        let book = self.book.as_ref()?;
        let weights = spine_weights(book);
        let total: f64 = weights.iter().sum();
        let before: f64 = weights[..self.position.spine_index].iter().sum();
        let current = weights[self.position.spine_index] * self.item_fraction();
        Some(((before + current) / total).clamp(0.0, 1.0))
    }

    /// Switch layout direction, keeping the resource-relative position.
    pub fn change_scroll_direction(&mut self, direction: ScrollDirection) -> Result<(), NavigationError> {
        self.require_book()?;
        if direction == self.direction {
            return Ok(());
        }
        if !matches!(self.position.offset, PositionOffset::Fragment(_)) {
            self.position.offset = PositionOffset::Percentage(self.item_fraction());
        }
        self.direction = direction;
        self.position.direction = direction;
        self.page_count = None;
        self.state = NavigationState::Navigating;
        Ok(())
    }

    fn require_book(&self) -> Result<&Arc<Book>, NavigationError> {
        self.book.as_ref().ok_or(NavigationError::NoBook)
    }

    /// Fraction of the current item, as far as the offset tells.
    fn item_fraction(&self) -> f64 {
        match &self.position.offset {
            PositionOffset::Percentage(f) => f.clamp(0.0, 1.0),
            PositionOffset::Byte(byte) => self
                .book
                .as_ref()
                .and_then(|book| book.spine_resource(self.position.spine_index))
                .and_then(|resource| resource.size)
                .filter(|size| *size > 0)
                .map(|size| (*byte as f64 / size as f64).clamp(0.0, 1.0))
                .unwrap_or(0.0),
            PositionOffset::Fragment(_) => 0.0,
        }
    }

    fn move_within(&mut self, offset: PositionOffset) {
        self.position.offset = offset;
        self.state = NavigationState::Navigating;
    }

    fn move_to(&mut self, spine_index: usize, offset: PositionOffset) {
        if spine_index != self.position.spine_index {
            self.page_count = None;
        }
        self.position.spine_index = spine_index;
        self.move_within(offset);
    }
}

fn clamp_index(index: usize, len: usize) -> Result<usize, PositionOutOfRangeError> {
    if index < len {
        Ok(index)
    } else {
        Err(PositionOutOfRangeError {
            index,
            len,
            clamped: len.saturating_sub(1),
        })
    }
}

/// Relative length of each spine item: resource sizes when every item has
/// one, otherwise equal shares.
fn spine_weights(book: &Book) -> Vec<f64> {
    let sizes: Option<Vec<f64>> = (0..book.spine_len())
        .map(|i| {
            book.spine_resource(i)
                .and_then(|r| r.size)
                .filter(|size| *size > 0)
                .map(|size| size as f64)
        })
        .collect();
    sizes.unwrap_or_else(|| vec![1.0; book.spine_len()])
}

fn nearest_spine_index(book: &Book, resource_id: &str) -> Option<usize> {
    let order = book.resource(resource_id)?.order;
    (0..book.spine_len())
        .filter_map(|i| book.spine_resource(i).map(|r| (i, r.order.abs_diff(order))))
        .min_by_key(|(_, distance)| *distance)
        .map(|(i, _)| i)
}
