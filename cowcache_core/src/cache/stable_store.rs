use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};

/// Slot marker for an unoccupied index cell.
const EMPTY: u32 = u32::MAX;

/// Immutable open-addressed map backing the lock-free read path.
///
/// Entries live in a dense slice in first-insertion order; `slots` is a
/// power-of-two probe table of indexes into that slice. The store is never
/// mutated after construction. Growing it means building a replacement from
/// the old entries plus the new ones and publishing that instead, so readers
/// holding a reference keep a consistent view for as long as they like.
pub struct StableStore<K, V, S> {
    entries: Box<[(K, V)]>,
    /// Probe table, linear probing. Kept at most half full so lookups
    /// always terminate on an `EMPTY` cell.
    slots: Box<[u32]>,
    mask: usize,
    hasher: S,
}

impl<K, V, S> StableStore<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// An empty store carrying the hasher every later generation inherits.
    pub fn empty(hasher: S) -> Self {
        Self {
            entries: Vec::new().into_boxed_slice(),
            slots: Vec::new().into_boxed_slice(),
            mask: 0,
            hasher,
        }
    }

    /// Builds a store from arbitrary pairs. Duplicate keys resolve to the
    /// value seen last, keeping the position of the first occurrence.
    pub fn from_entries(pairs: Vec<(K, V)>, hasher: S) -> Self {
        let slot_count = slot_count_for(pairs.len());
        let mask = slot_count - 1;
        let mut slots = vec![EMPTY; slot_count];
        let mut entries: Vec<(K, V)> = Vec::with_capacity(pairs.len());

        for (key, value) in pairs {
            let mut idx = (hasher.hash_one(&key) as usize) & mask;
            loop {
                match slots[idx] {
                    EMPTY => {
                        // The sentinel is not a valid entry index.
                        debug_assert!(entries.len() < EMPTY as usize);
                        slots[idx] = entries.len() as u32;
                        entries.push((key, value));
                        break;
                    }
                    occupied => {
                        let entry = &mut entries[occupied as usize];
                        if entry.0 == key {
                            entry.1 = value;
                            break;
                        }
                        idx = (idx + 1) & mask;
                    }
                }
            }
        }

        Self {
            entries: entries.into_boxed_slice(),
            slots: slots.into_boxed_slice(),
            mask,
            hasher,
        }
    }

    /// Builds the next generation: every entry of `self` followed by the
    /// batch of pending pairs. Callers guarantee the batch keys are not
    /// already present.
    pub fn merged<I>(&self, pending: I) -> Self
    where
        K: Clone,
        V: Clone,
        S: Clone,
        I: IntoIterator<Item = (K, V)>,
        I::IntoIter: ExactSizeIterator,
    {
        let pending = pending.into_iter();
        let mut pairs = Vec::with_capacity(self.entries.len() + pending.len());
        pairs.extend(self.entries.iter().cloned());
        pairs.extend(pending);
        Self::from_entries(pairs, self.hasher.clone())
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.entries.is_empty() {
            return None;
        }

        let mut idx = (self.hasher.hash_one(key) as usize) & self.mask;
        loop {
            match self.slots[idx] {
                EMPTY => return None,
                occupied => {
                    let (k, v) = &self.entries[occupied as usize];
                    if k.borrow() == key {
                        return Some(v);
                    }
                    idx = (idx + 1) & self.mask;
                }
            }
        }
    }
}

// The snapshot iterators use these without `Hash`/`BuildHasher` bounds.
impl<K, V, S> StableStore<K, V, S> {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entry at `index` in insertion order. Indexes below `len()` only.
    #[inline]
    pub fn entry(&self, index: usize) -> &(K, V) {
        &self.entries[index]
    }

    #[inline]
    pub fn hasher(&self) -> &S {
        &self.hasher
    }
}

/// Probe table size for `len` occupied entries: power of two, at most half
/// full. u32 slot indexes cap a store at `u32::MAX` entries, far beyond the
/// in-memory sizes this cache is built for.
fn slot_count_for(len: usize) -> usize {
    (len * 2).next_power_of_two().max(16)
}
