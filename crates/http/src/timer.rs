//! Hashed timer wheel.
//!
//! A [`TimerWheel`] is a fixed ring of buckets, one per `granularity` step, covering
//! `max_horizon` into the future. Bucket 0 always represents the wheel's current
//! epoch. Inserting is O(1); [`TimerWheel::sweep`] walks forward one bucket per
//! elapsed granularity step, so a late sweep (a stalled loop) still drains every
//! bucket in time order and never skips one.
//!
//! Entries are plain handles (task ids in the scheduler). Each bucket holds
//! `(key, sequence)` pairs and the wheel remembers the live sequence of every armed
//! key; a bucket entry whose sequence is no longer live was disarmed or moved and is
//! skipped. This keeps a key in at most one bucket without any linked-list surgery.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tracing::trace;

#[derive(Debug)]
pub struct TimerWheel<K> {
    /// Ring of buckets, `head` is bucket 0.
    buckets: Vec<Vec<(K, u64)>>,
    head: usize,
    /// Instant represented by bucket 0.
    epoch: Instant,
    granularity: Duration,
    /// Live sequence number of each armed key.
    armed: HashMap<K, u64>,
    next_seq: u64,
}

impl<K: Copy + Eq + Hash> TimerWheel<K> {
    /// Creates a wheel whose epoch starts now.
    ///
    /// # Panics
    /// Panics when `granularity` is zero.
    pub fn new(max_horizon: Duration, granularity: Duration) -> Self {
        Self::with_epoch(max_horizon, granularity, Instant::now())
    }

    /// Creates a wheel whose bucket 0 starts at `epoch`.
    ///
    /// # Panics
    /// Panics when `granularity` is zero.
    pub fn with_epoch(max_horizon: Duration, granularity: Duration, epoch: Instant) -> Self {
        assert!(!granularity.is_zero(), "timer wheel granularity must be non-zero");

        let slots = usize::try_from(max_horizon.as_nanos() / granularity.as_nanos()).unwrap_or(usize::MAX - 1) + 1;
        Self {
            buckets: (0..slots).map(|_| Vec::new()).collect(),
            head: 0,
            epoch,
            granularity,
            armed: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Arms `key` to fire `delay` from now.
    pub fn insert(&mut self, delay: Duration, key: K) {
        self.insert_at(Instant::now(), delay, key);
    }

    /// Arms `key` to fire `delay` after `now`. A key that is already armed moves.
    ///
    /// Delays beyond the horizon land in the last bucket.
    pub fn insert_at(&mut self, now: Instant, delay: Duration, key: K) {
        let elapsed = now.saturating_duration_since(self.epoch) + delay;
        let index = usize::try_from(elapsed.as_nanos() / self.granularity.as_nanos())
            .unwrap_or(usize::MAX)
            .min(self.buckets.len() - 1);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.armed.insert(key, seq);

        let slot = (self.head + index) % self.buckets.len();
        self.buckets[slot].push((key, seq));
        trace!(bucket = index, "timer armed");
    }

    /// Disarms `key`. Returns false when it was not armed.
    pub fn remove(&mut self, key: K) -> bool {
        self.armed.remove(&key).is_some()
    }

    /// Fires every entry whose bucket has been reached by `now`, oldest bucket first
    /// and in insertion order within a bucket.
    pub fn sweep<F>(&mut self, now: Instant, mut on_expire: F)
    where
        F: FnMut(K),
    {
        while self.epoch <= now {
            let bucket = std::mem::take(&mut self.buckets[self.head]);
            for (key, seq) in bucket {
                if self.armed.get(&key) == Some(&seq) {
                    self.armed.remove(&key);
                    on_expire(key);
                }
            }

            self.head = (self.head + 1) % self.buckets.len();
            self.epoch += self.granularity;
        }
    }

    /// Number of armed keys.
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn contains(&self, key: K) -> bool {
        self.armed.contains_key(&key)
    }

    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}
