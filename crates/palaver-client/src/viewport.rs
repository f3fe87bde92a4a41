//! Scroll position of the chat window.
//!
//! The window shows `height` lines ending `offset` lines above a boundary.
//! While following, the boundary is the bottom of the formatted content.
//! On leaving follow mode the boundary is pinned to the newest entry at that
//! moment, so appended messages land below it and prepended history lands
//! above it: the lines on screen stay put either way. Scrolling down moves
//! the pin forward through anything appended meanwhile before following
//! again.

use palaver_store::EntryKey;
use tracing::trace;

use crate::render::Line;

/// Formatted content of the chat window plus where each entry ends.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    lines: Vec<Line>,
    /// Exclusive end line of every entry, in display order.
    ends: Vec<(EntryKey, usize)>,
    /// Lines before the first entry (header, placeholder).
    preamble: usize,
}

impl Layout {
    pub fn new(lines: Vec<Line>, ends: Vec<(EntryKey, usize)>, preamble: usize) -> Self {
        Self {
            lines,
            ends,
            preamble,
        }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn total(&self) -> usize {
        self.lines.len()
    }

    pub fn last_key(&self) -> Option<EntryKey> {
        self.ends.last().map(|(key, _)| *key)
    }

    /// First entry ending strictly below `line`, with its end.
    fn entry_ending_after(&self, line: usize) -> Option<(EntryKey, usize)> {
        let idx = self.ends.partition_point(|(_, end)| *end <= line);
        self.ends.get(idx).copied()
    }

    /// End line of the newest entry not newer than `key`.
    fn end_of(&self, key: EntryKey) -> usize {
        let idx = self.ends.partition_point(|(k, _)| *k <= key);
        match idx {
            0 => self.preamble.min(self.total()),
            n => self.ends[n - 1].1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Following,
    Scrolled,
}

#[derive(Debug, Clone)]
pub struct Viewport {
    offset: usize,
    height: usize,
    /// Pinned boundary while scrolled.
    anchor: Option<EntryKey>,
    prefetch_threshold: usize,
}

impl Viewport {
    pub fn new(height: usize, prefetch_threshold: usize) -> Self {
        Self {
            offset: 0,
            height: height.max(1),
            anchor: None,
            prefetch_threshold,
        }
    }

    pub fn mode(&self) -> ViewMode {
        if self.anchor.is_some() {
            ViewMode::Scrolled
        } else {
            ViewMode::Following
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Jump back to the newest content.
    pub fn follow(&mut self) {
        self.offset = 0;
        self.anchor = None;
    }

    /// Scroll towards older content.
    ///
    /// Returns `true` when the window came within the prefetch threshold of
    /// the oldest loaded line and more history should be requested.
    pub fn scroll_up(&mut self, lines: usize, layout: &Layout) -> bool {
        if self.anchor.is_none() {
            self.anchor = layout.last_key();
        }
        self.offset = self.offset.saturating_add(lines);
        self.clamp(layout);

        let max = self.max_offset(layout);
        let wants_more = max - self.offset <= self.prefetch_threshold;
        trace!(offset = self.offset, max, wants_more, "Scrolled up");
        wants_more
    }

    /// Scroll towards newer content, following again at the bottom.
    ///
    /// Lines appended below the pinned boundary are scrolled through rather
    /// than skipped.
    pub fn scroll_down(&mut self, lines: usize, layout: &Layout) {
        self.clamp(layout);
        if self.anchor.is_none() {
            return;
        }
        let target = (self.boundary(layout) - self.offset).saturating_add(lines);
        match layout.entry_ending_after(target) {
            Some((key, end)) => {
                self.anchor = Some(key);
                self.offset = end - target;
            }
            None => self.follow(),
        }
        self.clamp(layout);
        trace!(offset = self.offset, mode = ?self.mode(), "Scrolled down");
    }

    pub fn resize(&mut self, height: usize, layout: &Layout) {
        self.height = height.max(1);
        self.clamp(layout);
    }

    /// Bring the offset back into range after the content changed.
    pub fn clamp(&mut self, layout: &Layout) {
        let max = self.max_offset(layout);
        if self.offset > max {
            self.offset = max;
        }
        if self.offset == 0 {
            self.anchor = None;
        }
    }

    /// Lines currently on screen.
    pub fn visible<'a>(&mut self, layout: &'a Layout) -> &'a [Line] {
        self.clamp(layout);
        let end = self.boundary(layout) - self.offset;
        let start = end.saturating_sub(self.height);
        &layout.lines()[start..end]
    }

    fn boundary(&self, layout: &Layout) -> usize {
        match self.anchor {
            None => layout.total(),
            Some(key) => layout.end_of(key),
        }
    }

    fn max_offset(&self, layout: &Layout) -> usize {
        self.boundary(layout).saturating_sub(self.height)
    }
}

#[cfg(test)]
mod tests {
    use palaver_shared::MessageId;
    use proptest::prelude::*;

    use super::*;

    /// One line per message id.
    fn layout(ids: impl IntoIterator<Item = u64>) -> Layout {
        let mut lines = Vec::new();
        let mut ends = Vec::new();
        for id in ids {
            lines.push(Line::plain(format!("m{id}")));
            ends.push((EntryKey::message(MessageId(id)), lines.len()));
        }
        Layout::new(lines, ends, 0)
    }

    fn texts(lines: &[Line]) -> Vec<String> {
        lines.iter().map(Line::text).collect()
    }

    #[test]
    fn test_following_shows_bottom() {
        let layout = layout(1..=20);
        let mut viewport = Viewport::new(5, 2);
        assert_eq!(texts(viewport.visible(&layout)), ["m16", "m17", "m18", "m19", "m20"]);
        assert_eq!(viewport.mode(), ViewMode::Following);
    }

    #[test]
    fn test_scroll_up_clamps_and_requests_history() {
        let layout = layout(1..=20);
        let mut viewport = Viewport::new(5, 2);

        assert!(!viewport.scroll_up(3, &layout));
        assert_eq!(viewport.mode(), ViewMode::Scrolled);
        assert_eq!(texts(viewport.visible(&layout)), ["m13", "m14", "m15", "m16", "m17"]);

        assert!(viewport.scroll_up(100, &layout));
        assert_eq!(viewport.offset(), 15);
        assert_eq!(texts(viewport.visible(&layout))[0], "m1");
    }

    #[test]
    fn test_scroll_down_to_bottom_follows_again() {
        let layout = layout(1..=20);
        let mut viewport = Viewport::new(5, 2);
        viewport.scroll_up(4, &layout);
        viewport.scroll_down(10, &layout);
        assert_eq!(viewport.offset(), 0);
        assert_eq!(viewport.mode(), ViewMode::Following);
    }

    #[test]
    fn test_scroll_down_walks_through_appended_lines() {
        let before = layout(1..=20);
        let mut viewport = Viewport::new(5, 2);
        viewport.scroll_up(10, &before);
        assert_eq!(texts(viewport.visible(&before)), ["m6", "m7", "m8", "m9", "m10"]);

        let after = layout(1..=25);
        viewport.clamp(&after);
        viewport.scroll_down(10, &after);
        assert_eq!(viewport.mode(), ViewMode::Scrolled);
        assert_eq!(texts(viewport.visible(&after)), ["m16", "m17", "m18", "m19", "m20"]);

        viewport.scroll_down(3, &after);
        assert_eq!(texts(viewport.visible(&after)), ["m19", "m20", "m21", "m22", "m23"]);

        viewport.scroll_down(5, &after);
        assert_eq!(viewport.mode(), ViewMode::Following);
        assert_eq!(texts(viewport.visible(&after)), ["m21", "m22", "m23", "m24", "m25"]);
    }

    #[test]
    fn test_short_content_never_scrolls() {
        let layout = layout(1..=3);
        let mut viewport = Viewport::new(10, 2);
        assert!(viewport.scroll_up(1, &layout));
        assert_eq!(viewport.mode(), ViewMode::Following);
        assert_eq!(texts(viewport.visible(&layout)), ["m1", "m2", "m3"]);
    }

    #[test]
    fn test_scrolled_view_stable_when_new_message_arrives() {
        let before = layout(1..=15);
        let mut viewport = Viewport::new(5, 2);
        viewport.scroll_up(4, &before);
        let seen = texts(viewport.visible(&before));

        let after = layout(1..=16);
        viewport.clamp(&after);
        assert_eq!(viewport.mode(), ViewMode::Scrolled);
        assert_eq!(texts(viewport.visible(&after)), seen);
    }

    #[test]
    fn test_scrolled_view_stable_when_history_prepended() {
        let before = layout(10..=30);
        let mut viewport = Viewport::new(5, 2);
        viewport.scroll_up(6, &before);
        let seen = texts(viewport.visible(&before));

        let after = layout(1..=30);
        viewport.clamp(&after);
        assert_eq!(texts(viewport.visible(&after)), seen);
        assert!(!viewport.scroll_up(0, &after));
    }

    #[test]
    fn test_resize_clamps_offset() {
        let layout = layout(1..=10);
        let mut viewport = Viewport::new(3, 0);
        viewport.scroll_up(7, &layout);
        assert_eq!(viewport.offset(), 7);

        viewport.resize(8, &layout);
        assert_eq!(viewport.offset(), 2);
        assert_eq!(viewport.visible(&layout).len(), 8);

        viewport.resize(0, &layout);
        assert_eq!(viewport.height(), 1);
    }

    #[test]
    fn test_follow_resets() {
        let layout = layout(1..=10);
        let mut viewport = Viewport::new(3, 0);
        viewport.scroll_up(4, &layout);
        viewport.follow();
        assert_eq!(viewport.offset(), 0);
        assert_eq!(viewport.mode(), ViewMode::Following);
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Up(usize),
        Down(usize),
        Resize(usize),
        Append(u64),
        Prepend(u64),
    }

    fn arb_step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0usize..12).prop_map(Step::Up),
            (0usize..12).prop_map(Step::Down),
            (0usize..15).prop_map(Step::Resize),
            (1u64..5).prop_map(Step::Append),
            (1u64..5).prop_map(Step::Prepend),
        ]
    }

    proptest! {
        /// The offset stays within `[0, total - height]` and is zero exactly
        /// while following. Content arriving around a scrolled window never
        /// changes what it shows.
        #[test]
        fn prop_offset_in_range_and_scrolled_view_stable(
            initial in 0u64..40,
            height in 1usize..10,
            steps in prop::collection::vec(arb_step(), 0..40),
        ) {
            let (mut first, mut last) = (1000u64, 1000 + initial);
            let mut current = layout(first..last);
            let mut viewport = Viewport::new(height, 2);

            for step in steps {
                let seen = texts(viewport.visible(&current));
                let was = viewport.mode();
                let grown = match step {
                    Step::Up(n) => {
                        viewport.scroll_up(n, &current);
                        false
                    }
                    Step::Down(n) => {
                        viewport.scroll_down(n, &current);
                        false
                    }
                    Step::Resize(h) => {
                        viewport.resize(h, &current);
                        false
                    }
                    Step::Append(n) => {
                        last += n;
                        true
                    }
                    Step::Prepend(n) => {
                        first -= n;
                        true
                    }
                };
                if grown {
                    current = layout(first..last);
                    viewport.clamp(&current);
                    if was == ViewMode::Scrolled {
                        prop_assert_eq!(viewport.mode(), ViewMode::Scrolled);
                        prop_assert_eq!(texts(viewport.visible(&current)), seen);
                    }
                }

                let max = current.total().saturating_sub(viewport.height());
                prop_assert!(viewport.offset() <= max);
                prop_assert_eq!(
                    viewport.offset() == 0,
                    viewport.mode() == ViewMode::Following
                );
            }
        }
    }
}
