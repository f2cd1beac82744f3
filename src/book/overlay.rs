//! Media overlay ranges for one spine item.

use serde::Serialize;

/// One narrated text fragment: `[start, end)` in seconds of its audio clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaOverlayEntry {
    pub fragment_id: String,
    pub start: f64,
    pub end: f64,
    /// Archive path of the audio file this clip comes from.
    pub audio_path: Option<String>,
}

impl MediaOverlayEntry {
    pub fn new(fragment_id: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            start,
            end,
            audio_path: None,
        }
    }

    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time < self.end
    }
}

/// Sorted, non-overlapping narration ranges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaOverlay {
    entries: Vec<MediaOverlayEntry>,
}

impl MediaOverlay {
    /// Validate ordering: every range well-formed and `end(i) <= start(i+1)`.
    ///
    /// On violation returns the index of the first offending entry.
    pub fn new(entries: Vec<MediaOverlayEntry>) -> Result<Self, usize> {
        for (i, entry) in entries.iter().enumerate() {
            if !entry.start.is_finite() || !entry.end.is_finite() || entry.start < 0.0 || entry.end < entry.start {
                return Err(i);
            }
            if let Some(next) = entries.get(i + 1)
                && entry.end > next.start
            {
                return Err(i + 1);
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[MediaOverlayEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start of the first range.
    pub fn start(&self) -> f64 {
        self.entries.first().map_or(0.0, |e| e.start)
    }

    /// End of the last range.
    pub fn end(&self) -> f64 {
        self.entries.last().map_or(0.0, |e| e.end)
    }

    /// Index of the entry whose range contains `time`, by binary search.
    pub fn locate(&self, time: f64) -> Option<usize> {
        if time.is_nan() {
            return None;
        }
        let after = self.entries.partition_point(|e| e.start <= time);
        let candidate = after.checked_sub(1)?;
        self.entries[candidate].contains(time).then_some(candidate)
    }

    pub fn index_of(&self, fragment_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.fragment_id == fragment_id)
    }
}
