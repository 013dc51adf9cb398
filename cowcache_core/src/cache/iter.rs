use std::iter::FusedIterator;
use std::sync::Arc;

use super::stable_store::StableStore;

/// Shared cursor over one enumeration snapshot: a reference to the stable
/// store generation current at capture plus a shallow copy of the pending
/// buffer. Walks the stable entries in insertion order, then the pending
/// ones. Owns everything it touches, so it never blocks or observes writers.
struct Snapshot<K, V, S> {
    stable: Arc<StableStore<K, V, S>>,
    pending: Vec<(K, V)>,
    pos: usize,
}

impl<K, V, S> Snapshot<K, V, S> {
    fn next_entry(&mut self) -> Option<&(K, V)> {
        let stable_len = self.stable.len();
        let entry = if self.pos < stable_len {
            self.stable.entry(self.pos)
        } else {
            self.pending.get(self.pos - stable_len)?
        };
        self.pos += 1;
        Some(entry)
    }

    fn remaining(&self) -> usize {
        (self.stable.len() + self.pending.len()).saturating_sub(self.pos)
    }
}

/// Owning iterator over a point-in-time view of the cache, yielding cloned
/// key/value pairs. Created by [`CowCache::iter`](super::cow_cache::CowCache::iter).
pub struct Iter<K, V, S> {
    inner: Snapshot<K, V, S>,
}

impl<K, V, S> Iter<K, V, S> {
    pub(crate) fn new(stable: Arc<StableStore<K, V, S>>, pending: Vec<(K, V)>) -> Self {
        Self {
            inner: Snapshot { stable, pending, pos: 0 },
        }
    }
}

impl<K: Clone, V: Clone, S> Iterator for Iter<K, V, S> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        let (key, value) = self.inner.next_entry()?;
        Some((key.clone(), value.clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.inner.remaining();
        (remaining, Some(remaining))
    }
}

impl<K: Clone, V: Clone, S> ExactSizeIterator for Iter<K, V, S> {}
impl<K: Clone, V: Clone, S> FusedIterator for Iter<K, V, S> {}

/// Owning iterator over the keys of one cache snapshot.
pub struct Keys<K, V, S> {
    inner: Snapshot<K, V, S>,
}

impl<K, V, S> Keys<K, V, S> {
    pub(crate) fn new(stable: Arc<StableStore<K, V, S>>, pending: Vec<(K, V)>) -> Self {
        Self {
            inner: Snapshot { stable, pending, pos: 0 },
        }
    }
}

impl<K: Clone, V, S> Iterator for Keys<K, V, S> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        let (key, _) = self.inner.next_entry()?;
        Some(key.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.inner.remaining();
        (remaining, Some(remaining))
    }
}

impl<K: Clone, V, S> ExactSizeIterator for Keys<K, V, S> {}
impl<K: Clone, V, S> FusedIterator for Keys<K, V, S> {}

/// Owning iterator over the values of one cache snapshot.
pub struct Values<K, V, S> {
    inner: Snapshot<K, V, S>,
}

impl<K, V, S> Values<K, V, S> {
    pub(crate) fn new(stable: Arc<StableStore<K, V, S>>, pending: Vec<(K, V)>) -> Self {
        Self {
            inner: Snapshot { stable, pending, pos: 0 },
        }
    }
}

impl<K, V: Clone, S> Iterator for Values<K, V, S> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        let (_, value) = self.inner.next_entry()?;
        Some(value.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.inner.remaining();
        (remaining, Some(remaining))
    }
}

impl<K, V: Clone, S> ExactSizeIterator for Values<K, V, S> {}
impl<K, V: Clone, S> FusedIterator for Values<K, V, S> {}
