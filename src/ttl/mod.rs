//! Key-value store whose unused entries expire after a time to live.
//!
//! Specializes [`RankedMap`] to timestamp ranks: every entry's rank is its
//! expiration deadline, the heap keeps the next-to-expire entry at the
//! front, and a single lazily armed timer drains the expired prefix to the
//! consumer. Reads and writes push the deadline forward, subject to a slack
//! policy that suppresses redundant rank updates.
//!
//! ## Architecture
//!
//! ```text
//!   TtlMap ──┬── Arc<Mutex<Shared>> ──► RankedMap<K, Timestamp, V>
//!            │                          + armed flag (one timer at a time)
//!            ├── Arc<dyn TimeSource> ──► now() + single wakeup slot
//!            └── Arc<dispatch> ────────► channel send or callback
//!
//!   wakeup at D:  build ExpiredDrain ──► consumer iterates:
//!                 yield items with rank ≤ now, delete on advance
//!                 drop: disarm, re-arm for the new front if items remain
//! ```
//!
//! ## Deadline policy
//!
//! With `ttl` and `accuracy` (`0 ≤ accuracy < ttl`):
//!
//! - insert and refresh assign `rank = now + ttl + accuracy/2`
//! - a refreshing access updates the rank only when `rank < now + ttl`,
//!   so an entry's rank changes at most once per `accuracy/2`
//! - the timer is armed for `first.rank − now + accuracy/2`
//!
//! Every entry therefore lives between `ttl` and `ttl + accuracy` past its
//! last refreshing access, and wakeups are batched instead of firing per
//! entry.
//!
//! ## Ownership
//!
//! The map is single-owner: no method, including iterating an
//! [`ExpiredDrain`], may run concurrently with another method of the same
//! map. The internal lock exists to make the timer-thread handoff sound,
//! not to license concurrent callers. With the channel construction the
//! rendezvous send blocks the timer thread until the consumer picks the
//! drain up, which is the synchronization point.
mod clock;
mod timer;

pub use clock::{ManualClock, SystemClock, TimeSource, TimerJob, Timestamp};

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;

use crate::ds::ranked_map::{MapItem, RankedMap};
use crate::error::ConfigError;

/// Handle to a TTL map entry; see [`MapItem`] for handle semantics.
pub type TtlItem<K, V> = MapItem<K, Timestamp, V>;

/// Smallest accepted time to live.
pub const MIN_TTL: Duration = Duration::from_millis(1);

type DispatchFn<K, V> = dyn Fn(ExpiredDrain<K, V>) + Send + Sync;

struct Shared<K, V> {
    map: RankedMap<K, Timestamp, V>,
    ttl: Duration,
    half_accuracy: Duration,
    /// True while a wakeup is scheduled or its drain is still alive.
    armed: bool,
}

/// Key-value store with timer-driven expiry of unused entries.
///
/// Constructed either with a rendezvous channel that receives one
/// [`ExpiredDrain`] per wakeup ([`TtlMap::new`]) or with a callback invoked
/// from the timer context ([`TtlMap::with_handler`]).
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
/// use rankkit::ttl::{ManualClock, TtlMap};
///
/// let clock = ManualClock::new();
/// let expired = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&expired);
///
/// let map = TtlMap::with_handler_and_clock(
///     Duration::from_secs(1),
///     Duration::ZERO,
///     Arc::new(clock.clone()),
///     move |drain| {
///         for item in drain {
///             sink.lock().unwrap().push(item.key());
///         }
///     },
/// );
///
/// map.set(1u32, "payload");
/// clock.advance(Duration::from_secs(2));
///
/// assert_eq!(*expired.lock().unwrap(), [1]);
/// assert!(map.is_empty());
/// ```
pub struct TtlMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    shared: Arc<Mutex<Shared<K, V>>>,
    source: Arc<dyn TimeSource>,
    dispatch: Arc<DispatchFn<K, V>>,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Creates a map that delivers expired entries over a rendezvous
    /// channel, one [`ExpiredDrain`] per timer wakeup.
    ///
    /// The consumer must iterate (or drop) each received drain before the
    /// next wakeup can be delivered; the send blocks the timer thread until
    /// the consumer accepts, which couples wakeup cadence to consumer
    /// throughput.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is below [`MIN_TTL`] or `accuracy >= ttl`.
    pub fn new(ttl: Duration, accuracy: Duration) -> (Self, Receiver<ExpiredDrain<K, V>>) {
        Self::try_new(ttl, accuracy).unwrap_or_else(|err| panic!("ttl map: {err}"))
    }

    /// Fallible variant of [`TtlMap::new`].
    pub fn try_new(
        ttl: Duration,
        accuracy: Duration,
    ) -> Result<(Self, Receiver<ExpiredDrain<K, V>>), ConfigError> {
        let (tx, rx) = bounded(0);
        let map = Self::build(
            ttl,
            accuracy,
            Arc::new(SystemClock::new()),
            Arc::new(move |drain: ExpiredDrain<K, V>| {
                if let Err(err) = tx.send(drain) {
                    // receiver gone: let the drain disarm without re-arming,
                    // otherwise the timer would spin against a closed channel
                    let mut drain = err.into_inner();
                    drain.rearm = false;
                }
            }),
        )?;
        Ok((map, rx))
    }

    /// Creates a map that hands each wakeup's [`ExpiredDrain`] to `handler`,
    /// invoked synchronously from the timer context.
    ///
    /// The handler must iterate the drain itself and must not run
    /// concurrently with other methods of the map; synchronization is the
    /// caller's responsibility.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is below [`MIN_TTL`] or `accuracy >= ttl`.
    pub fn with_handler(
        ttl: Duration,
        accuracy: Duration,
        handler: impl FnMut(ExpiredDrain<K, V>) + Send + 'static,
    ) -> Self {
        Self::try_with_handler(ttl, accuracy, handler)
            .unwrap_or_else(|err| panic!("ttl map: {err}"))
    }

    /// Fallible variant of [`TtlMap::with_handler`].
    pub fn try_with_handler(
        ttl: Duration,
        accuracy: Duration,
        handler: impl FnMut(ExpiredDrain<K, V>) + Send + 'static,
    ) -> Result<Self, ConfigError> {
        Self::try_with_handler_and_clock(ttl, accuracy, Arc::new(SystemClock::new()), handler)
    }

    /// Like [`TtlMap::with_handler`] with an explicit time source, e.g. a
    /// [`ManualClock`] in tests.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is below [`MIN_TTL`] or `accuracy >= ttl`.
    pub fn with_handler_and_clock(
        ttl: Duration,
        accuracy: Duration,
        source: Arc<dyn TimeSource>,
        handler: impl FnMut(ExpiredDrain<K, V>) + Send + 'static,
    ) -> Self {
        Self::try_with_handler_and_clock(ttl, accuracy, source, handler)
            .unwrap_or_else(|err| panic!("ttl map: {err}"))
    }

    /// Fallible variant of [`TtlMap::with_handler_and_clock`].
    pub fn try_with_handler_and_clock(
        ttl: Duration,
        accuracy: Duration,
        source: Arc<dyn TimeSource>,
        handler: impl FnMut(ExpiredDrain<K, V>) + Send + 'static,
    ) -> Result<Self, ConfigError> {
        let handler = Mutex::new(handler);
        Self::build(
            ttl,
            accuracy,
            source,
            Arc::new(move |drain| (&mut *handler.lock())(drain)),
        )
    }

    fn build(
        ttl: Duration,
        accuracy: Duration,
        source: Arc<dyn TimeSource>,
        dispatch: Arc<DispatchFn<K, V>>,
    ) -> Result<Self, ConfigError> {
        if ttl < MIN_TTL {
            return Err(ConfigError::new(format!(
                "time-to-live {ttl:?} is below the {MIN_TTL:?} minimum"
            )));
        }
        if accuracy >= ttl {
            return Err(ConfigError::new(format!(
                "accuracy {accuracy:?} must be below the time-to-live {ttl:?}"
            )));
        }
        Ok(Self {
            shared: Arc::new(Mutex::new(Shared {
                map: RankedMap::new(),
                ttl,
                half_accuracy: accuracy / 2,
                armed: false,
            })),
            source,
            dispatch,
        })
    }

    /// Returns the null handle, which refers to no entry.
    pub fn null_item(&self) -> TtlItem<K, V> {
        TtlItem::null()
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.shared.lock().map.len()
    }

    /// Returns `true` if the map has no live entries.
    pub fn is_empty(&self) -> bool {
        self.shared.lock().map.is_empty()
    }

    /// Returns `true` if `key` is mapped, without refreshing it.
    pub fn exists(&self, key: &K) -> bool {
        self.shared.lock().map.exists(key)
    }

    /// Upserts an entry and refreshes its deadline, returning its handle.
    pub fn set(&self, key: K, value: V) -> TtlItem<K, V> {
        let now = self.source.now();
        let mut shared = self.shared.lock();
        let item = if shared.map.exists(&key) {
            let item = shared.map.get(&key);
            refresh(&mut shared, &item, now);
            *item.value() = value;
            item
        } else {
            let deadline = now + shared.ttl + shared.half_accuracy;
            shared.map.set(key, deadline, value)
        };
        self.check_timer(&mut shared, now);
        item
    }

    /// Looks up `key`, inserting a default value when missing, and
    /// refreshes the entry's deadline. Returns the handle and whether the
    /// key already existed.
    pub fn get_or_create(&self, key: K) -> (TtlItem<K, V>, bool)
    where
        V: Default,
    {
        self.get_or_create_with(key, V::default)
    }

    /// Like [`get_or_create`](TtlMap::get_or_create) with an explicit value
    /// constructor, only invoked on insertion.
    pub fn get_or_create_with(
        &self,
        key: K,
        make: impl FnOnce() -> V,
    ) -> (TtlItem<K, V>, bool) {
        let now = self.source.now();
        let mut shared = self.shared.lock();
        let deadline = now + shared.ttl + shared.half_accuracy;
        let (item, existed) = shared.map.get_or_create_with(key, deadline, make);
        if existed {
            refresh(&mut shared, &item, now);
        }
        self.check_timer(&mut shared, now);
        (item, existed)
    }

    /// Returns a handle for `key`, refreshing the entry's deadline when
    /// mapped; the null handle otherwise.
    pub fn get(&self, key: &K) -> TtlItem<K, V> {
        let now = self.source.now();
        let mut shared = self.shared.lock();
        let item = shared.map.get(key);
        if item.present() {
            refresh(&mut shared, &item, now);
        }
        item
    }

    /// Returns a handle for `key` without refreshing its deadline; the null
    /// handle when unmapped.
    pub fn get_no_touch(&self, key: &K) -> TtlItem<K, V> {
        self.shared.lock().map.get(key)
    }

    /// Refreshes a live entry's deadline through its handle.
    ///
    /// # Panics
    ///
    /// Panics if the item is absent or null.
    pub fn touch(&self, item: &TtlItem<K, V>) {
        assert!(item.present(), "ttl map: touch of absent item");
        let now = self.source.now();
        let mut shared = self.shared.lock();
        refresh(&mut shared, item, now);
    }

    /// Deletes an entry through its handle.
    ///
    /// The timer may stay armed for the deleted entry's deadline; the
    /// wakeup finds nothing expired and re-arms for the new front.
    ///
    /// # Panics
    ///
    /// Panics if the item is absent or null.
    pub fn delete(&self, item: &TtlItem<K, V>) {
        self.shared.lock().map.delete(item);
    }

    /// Deletes the entry mapped to `key`, reporting whether one existed.
    pub fn delete_key(&self, key: &K) -> bool {
        self.shared.lock().map.delete_key(key)
    }

    /// Removes every entry.
    ///
    /// An armed timer is left alone; its wakeup finds the map empty and
    /// does nothing.
    pub fn clear(&self) {
        self.shared.lock().map.clear();
    }

    /// Returns handles to every live entry, in unspecified order.
    pub fn items(&self) -> Vec<TtlItem<K, V>> {
        self.shared.lock().map.iter().collect()
    }

    fn check_timer(&self, shared: &mut Shared<K, V>, now: Timestamp) {
        check_timer(&self.shared, shared, &self.source, &self.dispatch, now);
    }
}

impl<K, V> Drop for TtlMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        // drop the pending wakeup job: it holds the time source, and for the
        // system clock that keeps the worker thread alive
        self.source.cancel_scheduled();
    }
}

impl<K, V> fmt::Debug for TtlMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlMap").finish_non_exhaustive()
    }
}

/// Applies the refresh policy: push the deadline forward only when it has
/// drifted inside the ttl window.
fn refresh<K, V>(shared: &mut Shared<K, V>, item: &TtlItem<K, V>, now: Timestamp)
where
    K: Eq + Hash + Clone,
{
    if item.rank() < now + shared.ttl {
        let deadline = now + shared.ttl + shared.half_accuracy;
        shared.map.set_rank(item, deadline);
    }
}

/// Arms the wakeup timer when none is pending and the map is non-empty.
fn check_timer<K, V>(
    shared_arc: &Arc<Mutex<Shared<K, V>>>,
    shared: &mut Shared<K, V>,
    source: &Arc<dyn TimeSource>,
    dispatch: &Arc<DispatchFn<K, V>>,
    now: Timestamp,
) where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    if shared.armed || shared.map.is_empty() {
        return;
    }
    shared.armed = true;
    let front = shared.map.first().rank();
    let delay = front.saturating_since(now) + shared.half_accuracy;

    let weak = Arc::downgrade(shared_arc);
    let job_source = Arc::clone(source);
    let job_dispatch = Arc::clone(dispatch);
    source.schedule(
        delay,
        Box::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let drain = ExpiredDrain {
                shared,
                source: Arc::clone(&job_source),
                dispatch: Arc::clone(&job_dispatch),
                now: None,
                yielded: None,
                rearm: true,
            };
            (*job_dispatch)(drain);
        }),
    );
}

/// One timer wakeup's worth of expired entries, in ascending deadline
/// order.
///
/// Lazily drains the map: each step yields the front entry if its deadline
/// has passed and deletes it when the iterator advances. Stopping early
/// leaves the last-yielded entry and everything behind it in the map; the
/// next wakeup picks them up again.
///
/// Dropping the drain releases the single-timer slot and re-arms the timer
/// for the new front entry, if any.
pub struct ExpiredDrain<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    shared: Arc<Mutex<Shared<K, V>>>,
    source: Arc<dyn TimeSource>,
    dispatch: Arc<DispatchFn<K, V>>,
    /// Wakeup time, fixed at the first step so one drain sees one instant.
    now: Option<Timestamp>,
    yielded: Option<TtlItem<K, V>>,
    rearm: bool,
}

impl<K, V> Iterator for ExpiredDrain<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    type Item = TtlItem<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut shared = self.shared.lock();
        if let Some(prev) = self.yielded.take() {
            // tolerate the consumer having deleted the entry itself
            if prev.present() {
                shared.map.delete(&prev);
            }
        }
        if shared.map.is_empty() {
            return None;
        }
        let now = match self.now {
            Some(now) => now,
            None => {
                let now = self.source.now();
                self.now = Some(now);
                now
            }
        };
        let item = shared.map.first();
        if now < item.rank() {
            return None;
        }
        self.yielded = Some(item.clone());
        Some(item)
    }
}

impl<K, V> Drop for ExpiredDrain<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        // an early-terminated drain leaves its last yield in the map; the
        // re-armed timer delivers it again
        shared.armed = false;
        if self.rearm {
            let now = self.now.unwrap_or_else(|| self.source.now());
            check_timer(&self.shared, &mut shared, &self.source, &self.dispatch, now);
        }
    }
}

impl<K, V> fmt::Debug for ExpiredDrain<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiredDrain").finish_non_exhaustive()
    }
}
