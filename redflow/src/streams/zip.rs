//! Joining several streams, positionally or by latest value.

use crate::errors::ConfigError;

/// Strict positional pairing of several streams.
///
/// The `n`th item is the `n`th item of every stream. The first stream to run
/// out ends the zip; that is not an error.
#[derive(Debug)]
pub struct Zip<I> {
    streams: Vec<I>,
    done: bool,
}

impl<I: Iterator> Iterator for Zip<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.streams.is_empty() {
            return None;
        }
        let row: Option<Vec<_>> = self.streams.iter_mut().map(Iterator::next).collect();
        if row.is_none() {
            self.done = true;
        }
        row
    }
}

/// Zips `streams` positionally.
#[must_use]
pub fn zip<I: Iterator>(streams: Vec<I>) -> Zip<I> {
    Zip {
        streams,
        done: false,
    }
}

/// The most recent value of a stream that is advanced on demand.
///
/// Once the stream is exhausted the last value is held.
#[derive(Debug)]
pub struct Latest<I: Iterator> {
    stream: I,
    value: Option<I::Item>,
    exhausted: bool,
}

impl<I: Iterator> Latest<I> {
    /// Wraps a stream with no value seen yet.
    pub const fn new(stream: I) -> Self {
        Self {
            stream,
            value: None,
            exhausted: false,
        }
    }

    /// Pulls at most one item and returns the latest value, if any.
    pub fn advance(&mut self) -> Option<&I::Item> {
        if !self.exhausted {
            match self.stream.next() {
                Some(v) => self.value = Some(v),
                None => self.exhausted = true,
            }
        }
        self.value.as_ref()
    }

    /// The latest value without pulling.
    pub const fn get(&self) -> Option<&I::Item> {
        self.value.as_ref()
    }

    /// True once the underlying stream has ended.
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Pairs each item of the primary stream with the latest item of every other.
///
/// Each primary pull advances every other stream by at most one item. Until
/// every other stream has produced something, emissions are suppressed.
/// Only the primary stream ending ends the combinator.
pub struct ZipLatest<I: Iterator> {
    primary: I,
    others: Vec<Latest<I>>,
    emit_on: usize,
}

impl<I: Iterator> std::fmt::Debug for ZipLatest<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipLatest")
            .field("emit_on", &self.emit_on)
            .field("slots", &(self.others.len() + 1))
            .finish_non_exhaustive()
    }
}

impl<I> Iterator for ZipLatest<I>
where
    I: Iterator,
    I::Item: Clone,
{
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.primary.next()?;
            let mut complete = true;
            for other in &mut self.others {
                complete &= other.advance().is_some();
            }
            if !complete {
                continue;
            }
            let mut row: Vec<I::Item> = self.others.iter().filter_map(|o| o.get().cloned()).collect();
            row.insert(self.emit_on, item);
            return Some(row);
        }
    }
}

/// Combines `streams`, emitting whenever stream `emit_on` yields.
///
/// Returns an error if `emit_on` is not a valid stream index.
pub fn zip_latest<I: Iterator>(mut streams: Vec<I>, emit_on: usize) -> Result<ZipLatest<I>, ConfigError> {
    if emit_on >= streams.len() {
        return Err(ConfigError::invalid_parameter(
            "emit_on",
            format!("index {emit_on} out of range for {} streams", streams.len()),
        ));
    }
    let primary = streams.remove(emit_on);
    Ok(ZipLatest {
        primary,
        others: streams.into_iter().map(Latest::new).collect(),
        emit_on,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_truncates_to_shortest() {
        let rows: Vec<_> = zip(vec![vec![1, 2, 3].into_iter(), vec![10, 20].into_iter()]).collect();
        assert_eq!(rows, vec![vec![1, 10], vec![2, 20]]);
    }

    #[test]
    fn test_zip_empty() {
        let mut z = zip::<std::vec::IntoIter<u8>>(vec![]);
        assert!(z.next().is_none());
    }

    #[test]
    fn test_zip_latest_holds_last_value() {
        let streams = vec![vec![1, 2, 3, 4].into_iter(), vec![100].into_iter()];
        let rows: Vec<_> = zip_latest(streams, 0).unwrap().collect();
        assert_eq!(rows, vec![vec![1, 100], vec![2, 100], vec![3, 100], vec![4, 100]]);
    }

    #[test]
    fn test_zip_latest_emit_on_second_stream() {
        let streams = vec![vec![7, 8].into_iter(), vec![1, 2, 3].into_iter()];
        let rows: Vec<_> = zip_latest(streams, 1).unwrap().collect();
        assert_eq!(rows, vec![vec![7, 1], vec![8, 2], vec![8, 3]]);
    }

    #[test]
    fn test_zip_latest_suppresses_until_filled() {
        let streams = vec![vec![1, 2].into_iter(), Vec::new().into_iter()];
        assert_eq!(zip_latest(streams, 0).unwrap().count(), 0);
    }

    #[test]
    fn test_zip_latest_rejects_bad_index() {
        let err = zip_latest(vec![vec![1].into_iter()], 1).unwrap_err();
        assert_eq!(err.info.code, "CONFIG-PARAMETER");
    }

    #[test]
    fn test_zip_latest_debug_without_item_debug() {
        #[derive(Clone)]
        struct Frame;
        let streams = vec![vec![Frame].into_iter(), vec![Frame, Frame].into_iter()];
        let zipped = zip_latest(streams, 1).unwrap();
        assert_eq!(format!("{zipped:?}"), "ZipLatest { emit_on: 1, slots: 2, .. }");
        assert_eq!(zipped.count(), 2);
    }

    #[test]
    fn test_latest_advance() {
        let mut latest = Latest::new(vec![1, 2].into_iter());
        assert!(latest.get().is_none());
        assert_eq!(latest.advance(), Some(&1));
        assert_eq!(latest.advance(), Some(&2));
        assert_eq!(latest.advance(), Some(&2));
        assert!(latest.is_exhausted());
    }
}
