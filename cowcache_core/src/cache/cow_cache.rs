use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::DEFAULT_COPY_DELAY;
use crate::error::{CacheError, Result};

use super::iter::{Iter, Keys, Values};
use super::stable_store::StableStore;

/// A thread-safe, append-mostly key/value cache with lock-free reads.
///
/// Lookups probe an immutable stable store published through an
/// [`ArcSwap`], so the hot path costs one atomic load and a hash probe, the
/// same as an unsynchronized map. Writes go through a single mutex: they are
/// either buffered and folded into a fresh store generation once the copy
/// delay elapses, or they rebuild and republish the store on the spot.
///
/// Keys can be added but never updated or removed. That restriction is what
/// lets readers skip synchronization entirely: a published store generation
/// is never mutated, only superseded.
///
/// The cache is `Send + Sync`; share it between threads behind an `Arc`.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use cowcache_core::CowCache;
///
/// let cache = Arc::new(CowCache::<String, u64>::new());
///
/// let writer = {
///     let cache = Arc::clone(&cache);
///     thread::spawn(move || {
///         cache.try_insert("pi".to_string(), 314);
///     })
/// };
/// writer.join().unwrap();
///
/// // Reads see buffered writes immediately, merged or not.
/// assert_eq!(cache.get("pi"), Some(314));
/// ```
pub struct CowCache<K, V, S = ahash::RandomState>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<K, V, S>>,
}

/// State reachable from both cache handles and the merge service thread.
struct Shared<K, V, S> {
    /// Current published store generation. Swapped whole, never mutated.
    stable: ArcSwap<StableStore<K, V, S>>,
    /// Serializes writers, merges and the slow read path.
    sync: Mutex<WriteState<K, V, S>>,
    /// Wakes the merge service when the deadline moves or shutdown is set.
    merge_signal: Condvar,
}

struct WriteState<K, V, S> {
    /// Writes awaiting publication. `Some` exactly while a merge is armed.
    pending: Option<HashMap<K, V, S>>,
    /// When the merge service should fold `pending` into a new store.
    /// Rearmed to `now + copy_delay` by every buffered write.
    deadline: Option<Instant>,
    copy_delay: Duration,
    worker: Option<JoinHandle<()>>,
    shutdown: bool,
}

impl<K, V> CowCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache with the default hasher and
    /// [`DEFAULT_COPY_DELAY`].
    pub fn new() -> Self {
        Self::with_hasher(ahash::RandomState::new())
    }

    /// Creates an empty cache batching writes for the given window. A zero
    /// delay disables buffering: every write republishes immediately.
    pub fn with_copy_delay(copy_delay: Duration) -> Self {
        Self::from_store(
            copy_delay,
            StableStore::empty(ahash::RandomState::new()),
        )
    }

    /// Starts building a cache with non-default settings.
    pub fn builder() -> CowCacheBuilder<K, V> {
        CowCacheBuilder::new()
    }
}

impl<K, V, S> CowCache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Creates an empty cache hashing with `hasher`. The pending buffer and
    /// every store generation share it.
    pub fn with_hasher(hasher: S) -> Self {
        Self::from_store(DEFAULT_COPY_DELAY, StableStore::empty(hasher))
    }

    fn from_store(copy_delay: Duration, store: StableStore<K, V, S>) -> Self {
        Self {
            shared: Arc::new(Shared {
                stable: ArcSwap::new(Arc::new(store)),
                sync: Mutex::new(WriteState {
                    pending: None,
                    deadline: None,
                    copy_delay,
                    worker: None,
                    shutdown: false,
                }),
                merge_signal: Condvar::new(),
            }),
        }
    }

    /// Returns a clone of the value for `key`, if present.
    ///
    /// Hits against the published store take no lock at all. Only on a miss
    /// does the lookup briefly take the write lock to consult the pending
    /// buffer, so a thread always sees its own completed writes.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(value) = self.shared.stable.load().get(key) {
            return Some(value.clone());
        }

        let state = self.shared.sync.lock();
        self.lookup_locked(&state, key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.shared.stable.load().get(key).is_some() {
            return true;
        }

        let state = self.shared.sync.lock();
        self.contains_locked(&state, key)
    }

    /// Adds a key/value pair, failing with [`CacheError::DuplicateKey`] if
    /// the key is already present.
    ///
    /// The write lands in the pending buffer and becomes part of the
    /// published store once the copy delay elapses. Every buffered write
    /// pushes that deadline out again, so a steady stream of inserts inside
    /// the window keeps deferring the merge. Reads see the value right away
    /// either way.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        if self.try_insert(key, value) {
            Ok(())
        } else {
            Err(CacheError::DuplicateKey)
        }
    }

    /// Like [`insert`](Self::insert), but merges into a new published store
    /// before returning instead of waiting out the copy delay.
    pub fn insert_now(&self, key: K, value: V) -> Result<()> {
        if self.try_insert_now(key, value) {
            Ok(())
        } else {
            Err(CacheError::DuplicateKey)
        }
    }

    /// Adds a key/value pair unless the key is already present. Returns
    /// whether the pair was added; a duplicate changes nothing.
    pub fn try_insert(&self, key: K, value: V) -> bool {
        self.try_insert_inner(key, value, true)
    }

    /// Like [`try_insert`](Self::try_insert), but publishes immediately.
    pub fn try_insert_now(&self, key: K, value: V) -> bool {
        self.try_insert_inner(key, value, false)
    }

    fn try_insert_inner(&self, key: K, value: V, delay_copy: bool) -> bool {
        // Fail fast against the published store before taking the lock.
        if self.shared.stable.load().get(&key).is_some() {
            return false;
        }

        let mut state = self.shared.sync.lock();
        if self.contains_locked(&state, &key) {
            return false;
        }
        self.insert_locked(&mut state, key, value, delay_copy);
        true
    }

    /// Returns the value for `key`, inserting `value` if absent.
    ///
    /// Exactly one of any set of racing callers inserts; the rest get a
    /// clone of the winning value.
    pub fn get_or_insert(&self, key: K, value: V) -> V {
        self.get_or_insert_with(key, move || value)
    }

    /// Returns the value for `key`, computing and inserting it if absent.
    ///
    /// The factory only runs when the key is missing, and it runs while the
    /// cache lock is held: keep it cheap and never let it call back into
    /// the cache.
    pub fn get_or_insert_with<F>(&self, key: K, make_value: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.shared.stable.load().get(&key) {
            return value.clone();
        }

        let mut state = self.shared.sync.lock();
        if let Some(value) = self.lookup_locked(&state, &key) {
            return value;
        }

        let value = make_value();
        self.insert_locked(&mut state, key, value.clone(), true);
        value
    }

    /// True while buffered writes are waiting to be folded into the
    /// published store.
    pub fn is_copy_pending(&self) -> bool {
        self.shared.sync.lock().pending.is_some()
    }

    /// Number of entries, counting both the published store and the pending
    /// buffer.
    pub fn len(&self) -> usize {
        let state = self.shared.sync.lock();
        let pending = state.pending.as_ref().map_or(0, |pending| pending.len());
        self.shared.stable.load().len() + pending
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current batching window for buffered writes.
    pub fn copy_delay(&self) -> Duration {
        self.shared.sync.lock().copy_delay
    }

    /// Changes the batching window.
    ///
    /// With writes currently buffered, a zero delay merges them before
    /// returning and a nonzero delay reschedules the armed deadline to
    /// `now + copy_delay`, whether that moves it closer or further out.
    /// Otherwise only future writes are affected.
    pub fn set_copy_delay(&self, copy_delay: Duration) {
        let mut state = self.shared.sync.lock();
        state.copy_delay = copy_delay;

        if state.pending.is_some() {
            if copy_delay.is_zero() {
                debug!("copy delay cleared, merging pending writes now");
                Self::merge_locked(&self.shared, &mut state);
            } else {
                state.deadline = Some(merge_deadline(copy_delay));
                self.shared.merge_signal.notify_one();
            }
        }
    }

    /// Iterates over a point-in-time view of the cache.
    ///
    /// The snapshot is taken under the lock (a reference to the current
    /// store generation plus a shallow copy of the pending buffer), then
    /// iterated without it. Writes landing afterwards are not reflected,
    /// and iterating the same snapshot never blocks writers or readers.
    pub fn iter(&self) -> Iter<K, V, S> {
        let (stable, pending) = self.snapshot();
        Iter::new(stable, pending)
    }

    /// Iterates over the keys of a point-in-time view of the cache.
    pub fn keys(&self) -> Keys<K, V, S> {
        let (stable, pending) = self.snapshot();
        Keys::new(stable, pending)
    }

    /// Iterates over the values of a point-in-time view of the cache.
    pub fn values(&self) -> Values<K, V, S> {
        let (stable, pending) = self.snapshot();
        Values::new(stable, pending)
    }

    fn snapshot(&self) -> (Arc<StableStore<K, V, S>>, Vec<(K, V)>) {
        let state = self.shared.sync.lock();
        let stable = self.shared.stable.load_full();
        let pending = state
            .pending
            .as_ref()
            .map(|pending| {
                pending
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        (stable, pending)
    }

    /// Slow-path lookup. The `state` borrow proves the lock is held, which
    /// makes the pending check and the store recheck one atomic step: a
    /// merge cannot move the key between them.
    fn lookup_locked<Q>(&self, state: &WriteState<K, V, S>, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(pending) = state.pending.as_ref() {
            if let Some(value) = pending.get(key) {
                return Some(value.clone());
            }
        }
        self.shared.stable.load().get(key).cloned()
    }

    fn contains_locked<Q>(&self, state: &WriteState<K, V, S>, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(pending) = state.pending.as_ref() {
            if pending.contains_key(key) {
                return true;
            }
        }
        self.shared.stable.load().get(key).is_some()
    }

    /// Commits a key already verified absent under this same lock hold.
    fn insert_locked(&self, state: &mut WriteState<K, V, S>, key: K, value: V, delay_copy: bool) {
        // Zero delay disables buffering outright.
        let delay_copy = delay_copy && !state.copy_delay.is_zero();

        match state.pending.as_mut() {
            Some(pending) => {
                pending.insert(key, value);
                if delay_copy {
                    self.arm_merge_timer(state);
                } else {
                    Self::merge_locked(&self.shared, state);
                }
            }
            None if delay_copy => {
                let stable = self.shared.stable.load();
                let mut pending = HashMap::with_hasher(stable.hasher().clone());
                pending.insert(key, value);
                state.pending = Some(pending);
                self.arm_merge_timer(state);
            }
            None => {
                // Nothing buffered: republish directly, the timer stays idle.
                let stable = self.shared.stable.load_full();
                let next = stable.merged([(key, value)]);
                self.shared.stable.store(Arc::new(next));
            }
        }
    }

    /// Schedules the merge for one copy delay from now, starting the merge
    /// service on first use. Rearming an already armed deadline is the
    /// debounce: the service only fires after a quiet window.
    fn arm_merge_timer(&self, state: &mut WriteState<K, V, S>) {
        state.deadline = Some(merge_deadline(state.copy_delay));
        if state.worker.is_none() {
            let shared = Arc::clone(&self.shared);
            state.worker = Some(thread::spawn(move || Self::merge_service(shared)));
        }
        self.shared.merge_signal.notify_one();
    }

    /// Folds the pending buffer into a fresh store generation and publishes
    /// it. Requires the lock, and leaves the deadline disarmed.
    fn merge_locked(shared: &Shared<K, V, S>, state: &mut WriteState<K, V, S>) {
        state.deadline = None;
        if let Some(pending) = state.pending.take() {
            let stable = shared.stable.load_full();
            let pending_len = pending.len();
            let next = stable.merged(pending);
            // A key reaching both stores would collapse the counts here.
            debug_assert_eq!(next.len(), stable.len() + pending_len);
            trace!(
                "published store generation with {} entries ({} merged)",
                next.len(),
                pending_len
            );
            shared.stable.store(Arc::new(next));
        }
    }

    /// Body of the merge service thread. Parks until the armed deadline (or
    /// any state change) and merges once the deadline has passed. Spawned
    /// lazily by the first buffered write, lives until the cache is dropped.
    fn merge_service(shared: Arc<Shared<K, V, S>>) {
        debug!("merge service started");
        let mut state = shared.sync.lock();
        while !state.shutdown {
            // Armed deadline and pending buffer exist strictly together.
            debug_assert_eq!(state.deadline.is_some(), state.pending.is_some());
            match state.deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    Self::merge_locked(&shared, &mut state);
                }
                Some(deadline) => {
                    let _ = shared.merge_signal.wait_until(&mut state, deadline);
                }
                None => {
                    shared.merge_signal.wait(&mut state);
                }
            }
        }
        debug!("merge service stopped");
    }
}

impl<K, V, S> Default for CowCache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

/// Builds the initial store from the pairs directly; duplicate keys resolve
/// to the value seen last, like `HashMap::from_iter`.
impl<K, V, S> FromIterator<(K, V)> for CowCache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Default + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let store = StableStore::from_entries(iter.into_iter().collect(), S::default());
        Self::from_store(DEFAULT_COPY_DELAY, store)
    }
}

impl<'a, K, V, S> IntoIterator for &'a CowCache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    type Item = (K, V);
    type IntoIter = Iter<K, V, S>;

    fn into_iter(self) -> Iter<K, V, S> {
        self.iter()
    }
}

impl<K, V, S> fmt::Debug for CowCache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.sync.lock();
        let pending = state.pending.as_ref().map_or(0, |pending| pending.len());
        f.debug_struct("CowCache")
            .field("stable_len", &self.shared.stable.load().len())
            .field("pending_len", &pending)
            .field("copy_delay", &state.copy_delay)
            .finish()
    }
}

impl<K, V, S> Drop for CowCache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let worker = {
            let mut state = self.shared.sync.lock();
            state.shutdown = true;
            state.worker.take()
        };
        if let Some(worker) = worker {
            self.shared.merge_signal.notify_all();
            _ = worker.join();
        }
    }
}

/// Configures a [`CowCache`] before construction.
///
/// ```
/// use std::time::Duration;
///
/// use cowcache_core::CowCache;
///
/// let cache = CowCache::<String, u32>::builder()
///     .copy_delay(Duration::from_millis(100))
///     .entries([("one".to_string(), 1), ("two".to_string(), 2)])
///     .build();
///
/// assert_eq!(cache.len(), 2);
/// assert!(!cache.is_copy_pending());
/// ```
pub struct CowCacheBuilder<K, V, S = ahash::RandomState> {
    copy_delay: Duration,
    hasher: S,
    entries: Vec<(K, V)>,
}

impl<K, V> CowCacheBuilder<K, V> {
    pub fn new() -> Self {
        Self {
            copy_delay: DEFAULT_COPY_DELAY,
            hasher: ahash::RandomState::new(),
            entries: Vec::new(),
        }
    }
}

impl<K, V> Default for CowCacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> CowCacheBuilder<K, V, S> {
    /// Swaps in the hasher shared by the pending buffer and every store
    /// generation.
    pub fn hasher<S2>(self, hasher: S2) -> CowCacheBuilder<K, V, S2> {
        CowCacheBuilder {
            copy_delay: self.copy_delay,
            hasher,
            entries: self.entries,
        }
    }

    /// Batching window for buffered writes. Zero disables buffering.
    pub fn copy_delay(mut self, copy_delay: Duration) -> Self {
        self.copy_delay = copy_delay;
        self
    }

    /// Appends pairs seeding the initial published store. Duplicate keys
    /// resolve to the value seen last.
    pub fn entries<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.entries.extend(entries);
        self
    }
}

impl<K, V, S> CowCacheBuilder<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub fn build(self) -> CowCache<K, V, S> {
        let store = StableStore::from_entries(self.entries, self.hasher);
        CowCache::from_store(self.copy_delay, store)
    }
}

/// Deadline one `copy_delay` out from now. Delays too large for `Instant`
/// arithmetic (`Duration::MAX` reads as "never merge on its own") park the
/// deadline decades away instead of overflowing.
fn merge_deadline(copy_delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(copy_delay)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}
