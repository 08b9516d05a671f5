//! Inspect the head of a stream without losing it.

use std::collections::VecDeque;

/// A stream whose first items were read ahead and are yielded again first.
#[derive(Debug)]
pub struct Replay<I: Iterator> {
    head: VecDeque<I::Item>,
    rest: I,
}

impl<I: Iterator> Replay<I> {
    /// The items that will be replayed before the rest of the stream.
    pub fn head(&self) -> impl Iterator<Item = &I::Item> {
        self.head.iter()
    }
}

impl<I: Iterator> Iterator for Replay<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.head.pop_front().or_else(|| self.rest.next())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lo, hi) = self.rest.size_hint();
        let n = self.head.len();
        (lo.saturating_add(n), hi.and_then(|h| h.checked_add(n)))
    }
}

/// Reads the first item of `stream` and returns it with a stream that still
/// yields it first.
///
/// ```
/// use redflow::streams::peek;
///
/// let (first, replay) = peek(vec![1, 2, 3].into_iter());
/// assert_eq!(first, Some(1));
/// assert_eq!(replay.collect::<Vec<_>>(), vec![1, 2, 3]);
/// ```
pub fn peek<I>(stream: I) -> (Option<I::Item>, Replay<I>)
where
    I: Iterator,
    I::Item: Clone,
{
    let (mut head, replay) = peek_n(stream, 1);
    (head.pop(), replay)
}

/// Reads up to `n` items ahead. Fewer are returned if the stream ends first.
pub fn peek_n<I>(mut stream: I, n: usize) -> (Vec<I::Item>, Replay<I>)
where
    I: Iterator,
    I::Item: Clone,
{
    let head: VecDeque<I::Item> = stream.by_ref().take(n).collect();
    let peeked = head.iter().cloned().collect();
    (peeked, Replay { head, rest: stream })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_replays_first_item() {
        let (first, replay) = peek(vec!["start", "event", "stop"].into_iter());
        assert_eq!(first, Some("start"));
        assert_eq!(replay.collect::<Vec<_>>(), vec!["start", "event", "stop"]);
    }

    #[test]
    fn test_peek_empty_stream() {
        let (first, mut replay) = peek(std::iter::empty::<u8>());
        assert!(first.is_none());
        assert!(replay.next().is_none());
    }

    #[test]
    fn test_peek_n_short_stream() {
        let (head, replay) = peek_n(vec![1].into_iter(), 3);
        assert_eq!(head, vec![1]);
        assert_eq!(replay.size_hint(), (1, Some(1)));
        assert_eq!(replay.collect::<Vec<_>>(), vec![1]);
    }
}
