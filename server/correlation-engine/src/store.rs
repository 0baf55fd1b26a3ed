//! TTL-windowed stores: the correlation cache and the suppression ledger.
//!
//! Both are traits so the pipeline can run against in-memory fakes. The memory
//! implementations shard their maps behind `parking_lot` mutexes; every
//! operation on one key happens under that key's shard lock, so reads and
//! writes are linearizable per key and never block unrelated shards.
//!
//! Times passed in are processing times (when the engine received the event),
//! the same clock the background sweep uses. Expiry is lazy (checked on every
//! read) with an optional sweep via `purge_expired`. A missing or expired key
//! is `None`, never an error.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::fingerprint::{CorrelationKey, SuppressionKey};
use crate::types::{CorrelationEntry, NormalizedEvent, SuppressionEntry};

const SHARDS: usize = 16;

/// Default bound on distinct groups kept by `observe_grouped`.
pub const DEFAULT_MAX_GROUPS: usize = 256;

/// Outside the window in either direction. A stamp ahead of `now` by more
/// than the window expires too, so one bad clock cannot pin an entry.
fn expired(at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
  now.signed_duration_since(at).abs() > window
}

struct ShardedMap<V> {
  shards: Vec<Mutex<HashMap<String, V>>>,
}

impl<V> ShardedMap<V> {
  fn new() -> Self {
    Self {
      shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
    }
  }

  fn shard(&self, key: &str) -> &Mutex<HashMap<String, V>> {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    &self.shards[(h.finish() as usize) % self.shards.len()]
  }

  fn len(&self) -> usize {
    self.shards.iter().map(|s| s.lock().len()).sum()
  }

  fn retain(&self, mut keep: impl FnMut(&mut V) -> bool) -> usize {
    let mut removed = 0;
    for shard in &self.shards {
      let mut map = shard.lock();
      let before = map.len();
      map.retain(|_, v| keep(v));
      removed += before - map.len();
    }
    removed
  }
}

// ---------------------------------------------------------------------------
// Correlation store
// ---------------------------------------------------------------------------

pub trait CorrelationStore: Send + Sync {
  /// Live events under `key`, or `None` when absent or expired.
  fn get(&self, key: &CorrelationKey, now: DateTime<Utc>) -> Option<CorrelationEntry>;

  /// Record `event` under `key` as seen at `now`.
  fn put(&self, key: &CorrelationKey, event: NormalizedEvent, now: DateTime<Utc>);

  /// `get` followed by `put`. Implementations should make this atomic per key.
  fn observe(
    &self,
    key: &CorrelationKey,
    event: NormalizedEvent,
    now: DateTime<Utc>,
  ) -> Option<CorrelationEntry> {
    let prior = self.get(key, now);
    self.put(key, event, now);
    prior
  }

  /// Like `observe`, but `key` keeps only the newest event per `group`, so a
  /// burst from one group cannot push the others out. Falls back to `observe`.
  fn observe_grouped(
    &self,
    key: &CorrelationKey,
    _group: &str,
    event: NormalizedEvent,
    now: DateTime<Utc>,
  ) -> Option<CorrelationEntry> {
    self.observe(key, event, now)
  }

  /// Drop every expired entry; returns how many keys were removed.
  fn purge_expired(&self, now: DateTime<Utc>) -> usize;

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

struct Stored {
  at: DateTime<Utc>,
  group: Option<String>,
  event: NormalizedEvent,
}

#[derive(Default)]
struct Slot {
  events: VecDeque<Stored>,
}

impl Slot {
  fn evict(&mut self, now: DateTime<Utc>, window: Duration) {
    self.events.retain(|s| !expired(s.at, now, window));
  }

  fn entry(&self) -> Option<CorrelationEntry> {
    let inserted_at = self.events.iter().map(|s| s.at).max()?;
    Some(CorrelationEntry {
      events: self.events.iter().map(|s| s.event.clone()).collect(),
      inserted_at,
    })
  }

  fn push(&mut self, stored: Stored, cap: usize) {
    self.events.push_back(stored);
    while self.events.len() > cap {
      self.events.pop_front();
    }
  }
}

/// In-memory correlation cache keeping up to `max_events` recent events per
/// key, or up to `max_groups` groups per key for grouped writes.
pub struct MemoryCorrelationStore {
  window: Duration,
  max_events: usize,
  max_groups: usize,
  map: ShardedMap<Slot>,
}

impl MemoryCorrelationStore {
  pub fn new(window: Duration, max_events: usize) -> Self {
    Self {
      window,
      max_events: max_events.max(1),
      max_groups: DEFAULT_MAX_GROUPS,
      map: ShardedMap::new(),
    }
  }

  pub fn with_max_groups(mut self, max_groups: usize) -> Self {
    self.max_groups = max_groups.max(1);
    self
  }

  fn read(&self, map: &mut HashMap<String, Slot>, key: &str, now: DateTime<Utc>) -> Option<CorrelationEntry> {
    let slot = map.get_mut(key)?;
    slot.evict(now, self.window);
    if slot.events.is_empty() {
      map.remove(key);
      return None;
    }
    slot.entry()
  }

  fn write(&self, map: &mut HashMap<String, Slot>, key: &str, event: NormalizedEvent, now: DateTime<Utc>) {
    let slot = map.entry(key.to_string()).or_default();
    slot.evict(now, self.window);
    slot.push(Stored { at: now, group: None, event }, self.max_events);
  }

  fn write_grouped(
    &self,
    map: &mut HashMap<String, Slot>,
    key: &str,
    group: &str,
    event: NormalizedEvent,
    now: DateTime<Utc>,
  ) {
    let slot = map.entry(key.to_string()).or_default();
    slot.evict(now, self.window);
    slot.events.retain(|s| s.group.as_deref() != Some(group));
    slot.push(
      Stored {
        at: now,
        group: Some(group.to_string()),
        event,
      },
      self.max_groups,
    );
  }
}

impl CorrelationStore for MemoryCorrelationStore {
  fn get(&self, key: &CorrelationKey, now: DateTime<Utc>) -> Option<CorrelationEntry> {
    let mut map = self.map.shard(&key.0).lock();
    self.read(&mut map, &key.0, now)
  }

  fn put(&self, key: &CorrelationKey, event: NormalizedEvent, now: DateTime<Utc>) {
    let mut map = self.map.shard(&key.0).lock();
    self.write(&mut map, &key.0, event, now);
  }

  fn observe(
    &self,
    key: &CorrelationKey,
    event: NormalizedEvent,
    now: DateTime<Utc>,
  ) -> Option<CorrelationEntry> {
    let mut map = self.map.shard(&key.0).lock();
    let prior = self.read(&mut map, &key.0, now);
    self.write(&mut map, &key.0, event, now);
    prior
  }

  fn observe_grouped(
    &self,
    key: &CorrelationKey,
    group: &str,
    event: NormalizedEvent,
    now: DateTime<Utc>,
  ) -> Option<CorrelationEntry> {
    let mut map = self.map.shard(&key.0).lock();
    let prior = self.read(&mut map, &key.0, now);
    self.write_grouped(&mut map, &key.0, group, event, now);
    prior
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> usize {
    let window = self.window;
    self.map.retain(|slot| {
      slot.evict(now, window);
      !slot.events.is_empty()
    })
  }

  fn len(&self) -> usize {
    self.map.len()
  }
}

// ---------------------------------------------------------------------------
// Suppression store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressionOutcome {
  /// No live entry existed; a fresh one was recorded for the candidate incident.
  Fresh(SuppressionEntry),
  /// A live entry absorbed the duplicate; carries the updated entry.
  Duplicate(SuppressionEntry),
}

pub trait SuppressionStore: Send + Sync {
  fn get(&self, key: &SuppressionKey, now: DateTime<Utc>) -> Option<SuppressionEntry>;

  fn put(&self, key: &SuppressionKey, entry: SuppressionEntry);

  /// Emit-or-update decision for one candidate. Implementations should make this
  /// atomic per key so that concurrent duplicates resolve to one incident id.
  fn record(&self, key: &SuppressionKey, candidate_id: &str, now: DateTime<Utc>) -> SuppressionOutcome {
    match self.get(key, now) {
      Some(entry) => {
        let updated = bump(entry, now);
        self.put(key, updated.clone());
        SuppressionOutcome::Duplicate(updated)
      }
      None => {
        let entry = fresh(candidate_id, now);
        self.put(key, entry.clone());
        SuppressionOutcome::Fresh(entry)
      }
    }
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> usize;

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn fresh(incident_id: &str, now: DateTime<Utc>) -> SuppressionEntry {
  SuppressionEntry {
    incident_id: incident_id.to_string(),
    last_emitted_at: now,
    suppressed_count: 0,
  }
}

fn bump(mut entry: SuppressionEntry, now: DateTime<Utc>) -> SuppressionEntry {
  entry.suppressed_count += 1;
  entry.last_emitted_at = entry.last_emitted_at.max(now);
  entry
}

pub struct MemorySuppressionStore {
  window: Duration,
  map: ShardedMap<SuppressionEntry>,
}

impl MemorySuppressionStore {
  pub fn new(window: Duration) -> Self {
    Self {
      window,
      map: ShardedMap::new(),
    }
  }
}

impl SuppressionStore for MemorySuppressionStore {
  fn get(&self, key: &SuppressionKey, now: DateTime<Utc>) -> Option<SuppressionEntry> {
    let mut map = self.map.shard(&key.0).lock();
    let entry = map.get(&key.0).cloned()?;
    if expired(entry.last_emitted_at, now, self.window) {
      map.remove(&key.0);
      return None;
    }
    Some(entry)
  }

  fn put(&self, key: &SuppressionKey, entry: SuppressionEntry) {
    self.map.shard(&key.0).lock().insert(key.0.clone(), entry);
  }

  fn record(&self, key: &SuppressionKey, candidate_id: &str, now: DateTime<Utc>) -> SuppressionOutcome {
    let mut map = self.map.shard(&key.0).lock();
    if let Some(e) = map.get_mut(&key.0) {
      if !expired(e.last_emitted_at, now, self.window) {
        *e = bump(e.clone(), now);
        return SuppressionOutcome::Duplicate(e.clone());
      }
    }
    let entry = fresh(candidate_id, now);
    map.insert(key.0.clone(), entry.clone());
    SuppressionOutcome::Fresh(entry)
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> usize {
    let window = self.window;
    self.map.retain(|e| !expired(e.last_emitted_at, now, window))
  }

  fn len(&self) -> usize {
    self.map.len()
  }
}
