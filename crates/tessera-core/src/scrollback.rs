//! Scrollback buffer: lines that have scrolled off the top of the page.
//!
//! A `VecDeque` ring with a configurable line capacity. Pushing over
//! capacity evicts the oldest line and hands it back to the caller so that
//! shared resources referenced by its cells (hyperlinks, image fragments)
//! can be released.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::grid::Line;

/// Scrollback ring. Capacity `0` disables scrollback entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scrollback {
    lines: VecDeque<Line>,
    capacity: usize,
}

impl Scrollback {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, evicting the oldest lines when shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.lines.len() > capacity {
            self.lines.pop_front();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Push a line, returning the evicted oldest line when over capacity.
    pub fn push_line(&mut self, line: Line) -> Option<Line> {
        if self.capacity == 0 {
            return Some(line);
        }
        let evicted = if self.lines.len() == self.capacity {
            self.lines.pop_front()
        } else {
            None
        };
        self.lines.push_back(line);
        evicted
    }

    /// Pop the most recent line (used when the viewport grows back).
    pub fn pop_newest(&mut self) -> Option<Line> {
        self.lines.pop_back()
    }

    /// Get a line by index (0 = oldest).
    #[must_use]
    pub fn line(&self, index: usize) -> Option<&Line> {
        self.lines.get(index)
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter()
    }

    /// Indices of marked lines, oldest first (scrollback navigation).
    pub fn marked_lines(&self) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.marked())
            .map(|(i, _)| i)
            .collect()
    }

    /// Drain all lines oldest-first (reflow rebuilds the buffer).
    pub fn drain(&mut self) -> impl Iterator<Item = Line> + '_ {
        self.lines.drain(..)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::grid::LineFlags;

    fn make_line(text: &str) -> Line {
        Line {
            cells: text.chars().map(Cell::new).collect(),
            flags: LineFlags::empty(),
        }
    }

    #[test]
    fn capacity_zero_rejects_lines() {
        let mut sb = Scrollback::new(0);
        let rejected = sb.push_line(make_line("hello"));
        assert!(rejected.is_some());
        assert!(sb.is_empty());
    }

    #[test]
    fn push_and_retrieve_in_order() {
        let mut sb = Scrollback::new(10);
        sb.push_line(make_line("first"));
        sb.push_line(make_line("second"));
        assert_eq!(sb.len(), 2);
        assert_eq!(sb.line(0).map(|l| l.text()), Some("first".to_string()));
        assert_eq!(sb.line(1).map(|l| l.text()), Some("second".to_string()));
    }

    #[test]
    fn bounded_capacity_evicts_oldest() {
        let mut sb = Scrollback::new(2);
        assert!(sb.push_line(make_line("a")).is_none());
        assert!(sb.push_line(make_line("b")).is_none());
        let evicted = sb.push_line(make_line("c"));
        assert_eq!(evicted.map(|l| l.text()), Some("a".to_string()));
        assert_eq!(sb.len(), 2);
        assert_eq!(sb.line(0).map(|l| l.text()), Some("b".to_string()));
    }

    #[test]
    fn pop_newest_returns_most_recent() {
        let mut sb = Scrollback::new(10);
        sb.push_line(make_line("old"));
        sb.push_line(make_line("new"));
        assert_eq!(sb.pop_newest().map(|l| l.text()), Some("new".to_string()));
        assert_eq!(sb.len(), 1);
        let mut empty = Scrollback::new(10);
        assert!(empty.pop_newest().is_none());
    }

    #[test]
    fn set_capacity_evicts_excess() {
        let mut sb = Scrollback::new(10);
        for i in 0..5 {
            sb.push_line(make_line(&format!("line{i}")));
        }
        sb.set_capacity(2);
        assert_eq!(sb.len(), 2);
        assert_eq!(sb.line(0).map(|l| l.text()), Some("line3".to_string()));
    }

    #[test]
    fn marked_lines_are_found() {
        let mut sb = Scrollback::new(10);
        sb.push_line(make_line("plain"));
        let mut marked = make_line("prompt");
        marked.flags |= LineFlags::MARKED;
        sb.push_line(marked);
        sb.push_line(make_line("plain"));
        assert_eq!(sb.marked_lines(), vec![1]);
    }

    #[test]
    fn drain_empties_oldest_first() {
        let mut sb = Scrollback::new(10);
        sb.push_line(make_line("a"));
        sb.push_line(make_line("b"));
        let texts: Vec<String> = sb.drain().map(|l| l.text()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert!(sb.is_empty());
    }
}
