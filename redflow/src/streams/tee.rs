//! Stream duplication with a shared buffer and per-branch cursors.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Buffered items past which a lagging branch is reported.
const DEFAULT_WARN_THRESHOLD: usize = 10_000;

struct Arena<T> {
    source: Option<Box<dyn Iterator<Item = T> + Send>>,
    /// Items not yet seen by every live branch. `buffer[0]` has position `base`.
    buffer: VecDeque<T>,
    base: usize,
    /// Next position per branch, `None` once the branch is dropped.
    cursors: Vec<Option<usize>>,
    warn_threshold: usize,
    warned: bool,
}

impl<T> Arena<T> {
    /// Drops every item all live branches have already read.
    fn trim(&mut self) {
        let min = self.cursors.iter().flatten().copied().min();
        let keep_from = min.unwrap_or(self.base + self.buffer.len());
        while self.base < keep_from && self.buffer.pop_front().is_some() {
            self.base += 1;
        }
        if !self.warned && self.buffer.len() > self.warn_threshold {
            self.warned = true;
            warn!(
                buffered = self.buffer.len(),
                "tee branch is lagging; buffer keeps growing until it is consumed or dropped"
            );
        }
    }
}

impl<T: Clone> Arena<T> {
    fn next_for(&mut self, branch: usize) -> Option<T> {
        let pos = self.cursors.get(branch).copied().flatten()?;
        let offset = pos - self.base;
        let item = if offset < self.buffer.len() {
            self.buffer[offset].clone()
        } else {
            let item = self.source.as_mut()?.next();
            let Some(item) = item else {
                self.source = None;
                return None;
            };
            self.buffer.push_back(item.clone());
            item
        };
        self.cursors[branch] = Some(pos + 1);
        self.trim();
        Some(item)
    }
}

/// One of the streams returned by [`tee`].
///
/// Advancing a branch never advances another one. Items a branch has not
/// read yet stay buffered until it reads them or is dropped.
pub struct TeeBranch<T> {
    arena: Arc<Mutex<Arena<T>>>,
    id: usize,
}

impl<T: Clone> TeeBranch<T> {
    /// Number of items currently held for lagging branches.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.arena.lock().buffer.len()
    }

    /// Number of items this branch still has buffered ahead of it.
    #[must_use]
    pub fn pending(&self) -> usize {
        let arena = self.arena.lock();
        arena.cursors[self.id].map_or(0, |pos| arena.base + arena.buffer.len() - pos)
    }
}

impl<T: Clone> Iterator for TeeBranch<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.arena.lock().next_for(self.id)
    }
}

impl<T> Drop for TeeBranch<T> {
    fn drop(&mut self) {
        let mut arena = self.arena.lock();
        if let Some(cursor) = arena.cursors.get_mut(self.id) {
            *cursor = None;
        }
        arena.trim();
    }
}

impl<T> std::fmt::Debug for TeeBranch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeBranch").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Duplicates `source` into `n` independently advanceable branches.
///
/// Every branch yields every item exactly once, in source order. The shared
/// buffer is unbounded: a branch that is never consumed (and never dropped)
/// keeps every item alive. A warning is logged once when the buffer exceeds
/// 10 000 items.
#[must_use]
pub fn tee<I>(source: I, n: usize) -> Vec<TeeBranch<I::Item>>
where
    I: Iterator + Send + 'static,
    I::Item: Clone,
{
    tee_with_threshold(source, n, DEFAULT_WARN_THRESHOLD)
}

/// Like [`tee`], with a custom lag warning threshold.
#[must_use]
pub fn tee_with_threshold<I>(source: I, n: usize, warn_threshold: usize) -> Vec<TeeBranch<I::Item>>
where
    I: Iterator + Send + 'static,
    I::Item: Clone,
{
    let arena = Arc::new(Mutex::new(Arena {
        source: Some(Box::new(source)),
        buffer: VecDeque::new(),
        base: 0,
        cursors: vec![Some(0); n],
        warn_threshold,
        warned: false,
    }));
    (0..n)
        .map(|id| TeeBranch {
            arena: Arc::clone(&arena),
            id,
        })
        .collect()
}
