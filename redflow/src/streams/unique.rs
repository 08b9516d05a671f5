//! Suppress values already seen among the last few.

use std::collections::VecDeque;

/// Remembers the last `history` distinct values.
///
/// `None` history remembers every value ever seen.
#[derive(Debug, Clone)]
pub struct Unique<T> {
    seen: VecDeque<T>,
    history: Option<usize>,
}

impl<T: PartialEq + Clone> Unique<T> {
    /// Creates a filter remembering up to `history` values.
    #[must_use]
    pub const fn new(history: Option<usize>) -> Self {
        Self {
            seen: VecDeque::new(),
            history,
        }
    }

    /// Returns true if `value` is new, recording it.
    ///
    /// A repeated value is reported as not new and its position in the
    /// history is left as it is.
    pub fn observe(&mut self, value: &T) -> bool {
        if self.seen.contains(value) {
            return false;
        }
        if self.history == Some(0) {
            return true;
        }
        self.seen.push_back(value.clone());
        if let Some(limit) = self.history {
            while self.seen.len() > limit {
                self.seen.pop_front();
            }
        }
        true
    }

    /// Forgets every remembered value.
    pub fn clear(&mut self) {
        self.seen.clear();
    }

    /// Number of remembered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True if nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Iterator adapter returned by [`unique`].
#[derive(Debug)]
pub struct UniqueIter<I: Iterator> {
    inner: I,
    filter: Unique<I::Item>,
}

impl<I> Iterator for UniqueIter<I>
where
    I: Iterator,
    I::Item: PartialEq + Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let filter = &mut self.filter;
        self.inner.by_ref().find(|v| filter.observe(v))
    }
}

/// Drops items equal to one of the last `history` emitted items.
pub fn unique<I>(stream: I, history: Option<usize>) -> UniqueIter<I>
where
    I: Iterator,
    I::Item: PartialEq + Clone,
{
    UniqueIter {
        inner: stream,
        filter: Unique::new(history),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_of_one() {
        let out: Vec<_> = unique(vec![1, 1, 2, 2, 1, 1].into_iter(), Some(1)).collect();
        assert_eq!(out, vec![1, 2, 1]);
    }

    #[test]
    fn test_unbounded_history() {
        let out: Vec<_> = unique(vec![1, 2, 1, 3, 2].into_iter(), None).collect();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_history_emits_everything() {
        let out: Vec<_> = unique(vec![1, 1].into_iter(), Some(0)).collect();
        assert_eq!(out, vec![1, 1]);
    }

    #[test]
    fn test_clear_forgets() {
        let mut u = Unique::new(Some(2));
        assert!(u.observe(&"cal-a"));
        assert!(!u.observe(&"cal-a"));
        u.clear();
        assert!(u.is_empty());
        assert!(u.observe(&"cal-a"));
    }
}
