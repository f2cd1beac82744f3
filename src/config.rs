//! Reader configuration and persisted user preferences.
//!
//! [`ReaderConfig`] is what the host passes in when opening a book.
//! [`Preferences`] is the user-tunable state kept between sessions; the host
//! registers [`Preferences::first_run`] itself, the core never writes defaults
//! on its own. [`ReaderConfig::resolve`] merges the two into the
//! [`EffectiveConfig`] the session actually runs with.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Page indicator height used unless bars are hidden permanently.
pub const DEFAULT_PAGE_INDICATOR_HEIGHT: f32 = 20.0;

/// Largest font size step.
pub const MAX_FONT_SIZE: u8 = 4;

/// Largest audio rate step.
pub const MAX_AUDIO_RATE: u8 = 3;

/// How resources are laid out by the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScrollDirection {
    /// Continuous vertical scrolling, offsets tracked as a fraction.
    Vertical,
    /// Discrete horizontal pages.
    Horizontal,
    /// Vertical, but yields to an explicitly configured direction.
    #[default]
    DefaultVertical,
}

impl ScrollDirection {
    /// `DefaultVertical` lays out exactly like `Vertical`.
    pub fn is_vertical(self) -> bool {
        !matches!(self, ScrollDirection::Horizontal)
    }

    pub fn is_paginated(self) -> bool {
        matches!(self, ScrollDirection::Horizontal)
    }
}

/// Options recognized when opening a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReaderConfig {
    pub scroll_direction: ScrollDirection,
    pub can_change_scroll_direction: bool,
    #[serde(rename = "enableTTS")]
    pub enable_tts: bool,
    pub hide_bars: bool,
    pub should_hide_navigation_on_tap: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            scroll_direction: ScrollDirection::DefaultVertical,
            can_change_scroll_direction: true,
            enable_tts: true,
            hide_bars: false,
            should_hide_navigation_on_tap: true,
        }
    }
}

impl ReaderConfig {
    /// Parse a configuration bundle. Unknown keys are ignored and missing keys
    /// take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Merge with the persisted scroll direction.
    ///
    /// When the user may change direction, the persisted one wins, except that
    /// a persisted `DefaultVertical` yields to an explicitly configured
    /// direction. `hide_bars` first forces the navigation bar hidden at setup,
    /// then hides bars for good: tapping no longer toggles them and the page
    /// indicator collapses.
    pub fn resolve(&self, persisted: Option<ScrollDirection>) -> EffectiveConfig {
        let mut scroll_direction = self.scroll_direction;
        if self.can_change_scroll_direction {
            let mut direction = persisted.unwrap_or_default();
            if direction == ScrollDirection::DefaultVertical
                && self.scroll_direction != ScrollDirection::DefaultVertical
            {
                direction = self.scroll_direction;
            }
            scroll_direction = direction;
        }

        let should_hide_navigation_on_tap = self.hide_bars || self.should_hide_navigation_on_tap;
        let navigation_bar_hidden = should_hide_navigation_on_tap;

        let (should_hide_navigation_on_tap, bars_hidden, page_indicator_height) = if self.hide_bars {
            (false, true, 0.0)
        } else {
            (should_hide_navigation_on_tap, false, DEFAULT_PAGE_INDICATOR_HEIGHT)
        };

        EffectiveConfig {
            scroll_direction,
            can_change_scroll_direction: self.can_change_scroll_direction,
            enable_tts: self.enable_tts,
            should_hide_navigation_on_tap,
            navigation_bar_hidden,
            bars_hidden,
            page_indicator_height,
        }
    }
}

/// Configuration after merging with persisted preferences.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    pub scroll_direction: ScrollDirection,
    pub can_change_scroll_direction: bool,
    pub enable_tts: bool,
    pub should_hide_navigation_on_tap: bool,
    /// Whether the navigation bar starts hidden.
    pub navigation_bar_hidden: bool,
    /// Bars are hidden for the whole session.
    pub bars_hidden: bool,
    pub page_indicator_height: f32,
}

/// Highlight style of the narrated fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaOverlayStyle {
    #[default]
    Default,
    Underline,
    TextColor,
}

/// User preferences persisted between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub font_family: String,
    /// Size step, `0..=MAX_FONT_SIZE`.
    pub font_size: u8,
    pub night_mode: bool,
    /// Playback rate step, `0..=MAX_AUDIO_RATE`.
    pub audio_rate: u8,
    pub highlight_style: u8,
    /// Selected tab of the TOC menu.
    pub toc_menu: u8,
    pub media_overlay_style: MediaOverlayStyle,
    pub scroll_direction: ScrollDirection,
}

impl Default for Preferences {
    fn default() -> Self {
        Self::first_run()
    }
}

impl Preferences {
    /// Values registered on first launch.
    pub fn first_run() -> Self {
        Self {
            font_family: "andada".to_string(),
            font_size: 2,
            night_mode: false,
            audio_rate: 1,
            highlight_style: 0,
            toc_menu: 0,
            media_overlay_style: MediaOverlayStyle::Default,
            scroll_direction: ScrollDirection::DefaultVertical,
        }
    }

    /// Clamp stepped values into range.
    pub fn normalized(mut self) -> Self {
        self.font_size = self.font_size.min(MAX_FONT_SIZE);
        self.audio_rate = self.audio_rate.min(MAX_AUDIO_RATE);
        self
    }
}
