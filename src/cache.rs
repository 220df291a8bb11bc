use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::dns::enums::{RecordClass, RecordType};
use crate::dns::{Name, Record};
use crate::dnssec::ValidationVerdict;

/// Question identity: lowercased owner plus type and class, with the hash
/// precomputed once. The type and class ordinals are folded in with small
/// prime multipliers so that the four lookups a resolver does per name
/// (A/AAAA/NS/DS) land in different shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub name: String,
    pub rtype: RecordType,
    pub class: RecordClass,
    hash: u64,
}

impl CacheKey {
    pub fn new(name: &Name, rtype: RecordType, class: RecordClass) -> Self {
        let name = name.key();
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        let hash = hasher
            .finish()
            .wrapping_add(31u64.wrapping_mul(rtype.to_u16() as u64))
            .wrapping_add(37u64.wrapping_mul(class.to_u16() as u64));
        Self { name, rtype, class, hash }
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.class, self.rtype)
    }
}

/// One cached rrset with its validation verdict and absolute expiry.
#[derive(Debug, Clone)]
struct CacheEntry {
    records: Vec<Record>,
    verdict: ValidationVerdict,
    expires_at: Instant,
}

impl CacheEntry {
    /// Time left, or `None` once `now` has reached the expiry instant.
    fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.expires_at.checked_duration_since(now) {
            Some(left) if !left.is_zero() => Some(left),
            _ => None,
        }
    }
}

/// Why a name/type pair is negatively cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegativeKind {
    /// The name does not exist.
    NxDomain,
    /// The name exists but not with this type.
    NoData,
    /// Validation failed; cached briefly to suppress retry storms.
    Bogus(String),
}

/// A cached negative outcome: the SOA that authorizes it and, when the
/// zone is signed, the denial proof records.
#[derive(Debug, Clone)]
pub struct NegativeEntry {
    pub kind: NegativeKind,
    pub soa: Option<Record>,
    pub proof: Vec<Record>,
    pub verdict: ValidationVerdict,
    expires_at: Instant,
}

impl NegativeEntry {
    /// The expiry is assigned on insertion.
    pub fn new(
        kind: NegativeKind,
        soa: Option<Record>,
        proof: Vec<Record>,
        verdict: ValidationVerdict,
    ) -> Self {
        Self {
            kind,
            soa,
            proof,
            verdict,
            expires_at: Instant::now(),
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

/// TTL-expiring store of verdict-tagged rrsets plus negative outcomes.
///
/// Entries are observable only before their expiry; reads past expiry both
/// miss and evict. On key collision the entry with the later expiry wins,
/// so a short-lived set never clobbers a longer-lived verified one.
pub struct RecordCache {
    entries: DashMap<CacheKey, CacheEntry>,
    negatives: DashMap<CacheKey, NegativeEntry>,
    max_entries: usize,
    max_ttl: u32,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl RecordCache {
    pub fn new(max_entries: usize, max_ttl: u32) -> Self {
        Self {
            entries: DashMap::new(),
            negatives: DashMap::new(),
            max_entries,
            max_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Insert an rrset under `key`. Records whose identity does not match
    /// the key are dropped rather than cached under the wrong question.
    pub fn insert(
        &self,
        key: CacheKey,
        records: Vec<Record>,
        verdict: ValidationVerdict,
        ttl: u32,
    ) {
        let records: Vec<Record> = records
            .into_iter()
            .filter(|r| {
                r.rtype() == key.rtype && r.class == key.class && r.name.key() == key.name
            })
            .collect();
        if records.is_empty() {
            return;
        }

        let ttl = ttl.min(self.max_ttl);
        let entry = CacheEntry {
            records,
            verdict,
            expires_at: Instant::now() + Duration::from_secs(ttl as u64),
        };

        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.make_room();
        }

        use dashmap::mapref::entry::Entry;
        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                self.insertions.fetch_add(1, Ordering::Relaxed);
            }
            Entry::Occupied(mut slot) => {
                if entry.expires_at > slot.get().expires_at {
                    slot.insert(entry);
                    self.insertions.fetch_add(1, Ordering::Relaxed);
                } else {
                    trace!("cache insert superseded by longer-lived entry for {}", slot.key());
                }
            }
        }
    }

    /// Fetch the rrset for `key`, TTLs rewritten to the whole seconds that
    /// remain. Expired entries are evicted in-line and report a miss.
    pub fn get(&self, key: &CacheKey) -> Option<(Vec<Record>, ValidationVerdict)> {
        let now = Instant::now();
        let result = match self.entries.get(key) {
            Some(entry) => match entry.remaining(now) {
                Some(left) => {
                    let ttl = left.as_secs() as u32;
                    let records = entry
                        .records
                        .iter()
                        .filter(|r| r.rtype() == key.rtype)
                        .cloned()
                        .map(|mut r| {
                            r.ttl = ttl;
                            r
                        })
                        .collect();
                    Some((records, entry.verdict.clone()))
                }
                None => None,
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match result {
            Some(found) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(found)
            }
            None => {
                self.entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remaining lifetime of an entry, used for candidate ordering.
    pub fn remaining_ttl(&self, key: &CacheKey) -> Option<Duration> {
        self.entries.get(key).and_then(|e| e.remaining(Instant::now()))
    }

    pub fn insert_negative(&self, key: CacheKey, mut entry: NegativeEntry, ttl: u32) {
        let ttl = ttl.min(self.max_ttl);
        entry.expires_at = Instant::now() + Duration::from_secs(ttl as u64);
        self.negatives.insert(key, entry);
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_negative(&self, key: &CacheKey) -> Option<NegativeEntry> {
        let now = Instant::now();
        let hit = match self.negatives.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value().clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match hit {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.negatives.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Eagerly drop every expired entry. Safe to run concurrently with
    /// reads and inserts.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.entries.len() + self.negatives.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.negatives.retain(|_, entry| entry.expires_at > now);
        let removed = before - (self.entries.len() + self.negatives.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("cache sweep evicted {} entries", removed);
        }
    }

    pub fn flush(&self) {
        self.entries.clear();
        self.negatives.clear();
        debug!("cache flushed");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Capacity pressure: sweep first, then shed the entries closest to
    /// expiry until a sixteenth of the capacity is free.
    fn make_room(&self) {
        self.sweep();
        let target = self.max_entries - self.max_entries / 16;
        if self.entries.len() < target {
            return;
        }
        let mut by_expiry: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().expires_at))
            .collect();
        by_expiry.sort_by_key(|(_, at)| *at);
        let shed = self.entries.len() - target + 1;
        for (key, _) in by_expiry.into_iter().take(shed) {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        debug!("cache at capacity, shed {} earliest-expiry entries", shed);
    }
}
