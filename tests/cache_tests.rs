mod common;

use std::time::Duration;

use common::{a, name, soa};
use ratatosk::cache::{CacheKey, NegativeEntry, NegativeKind, RecordCache};
use ratatosk::dns::enums::{RecordClass, RecordType};
use ratatosk::dnssec::ValidationVerdict;

fn key(owner: &str, rtype: RecordType) -> CacheKey {
    CacheKey::new(&name(owner), rtype, RecordClass::IN)
}

#[test]
fn read_back_adjusts_ttl_to_remaining_seconds() {
    let cache = RecordCache::new(1024, 86_400);
    cache.insert(
        key("example.com", RecordType::A),
        vec![a("example.com", 300, [93, 184, 216, 34])],
        ValidationVerdict::Secure,
        300,
    );

    let (records, verdict) = cache.get(&key("example.com", RecordType::A)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(verdict, ValidationVerdict::Secure);
    // Read immediately: the visible TTL is the remaining whole seconds.
    assert!(records[0].ttl <= 300 && records[0].ttl >= 299);
}

#[test]
fn keys_are_case_insensitive() {
    let cache = RecordCache::new(1024, 86_400);
    cache.insert(
        key("Example.COM", RecordType::A),
        vec![a("example.com", 60, [10, 0, 0, 1])],
        ValidationVerdict::Unsigned,
        60,
    );
    assert!(cache.get(&key("EXAMPLE.com", RecordType::A)).is_some());
}

#[test]
fn expired_entries_miss_and_are_evicted() {
    let cache = RecordCache::new(1024, 86_400);
    cache.insert(
        key("gone.example", RecordType::A),
        vec![a("gone.example", 0, [10, 0, 0, 1])],
        ValidationVerdict::Unsigned,
        0,
    );
    assert_eq!(cache.len(), 1);
    assert!(cache.get(&key("gone.example", RecordType::A)).is_none());
    assert_eq!(cache.len(), 0, "expired entry evicted on access");
}

#[test]
fn sweep_evicts_eagerly() {
    let cache = RecordCache::new(1024, 86_400);
    cache.insert(
        key("stale.example", RecordType::A),
        vec![a("stale.example", 0, [10, 0, 0, 1])],
        ValidationVerdict::Unsigned,
        0,
    );
    cache.insert(
        key("fresh.example", RecordType::A),
        vec![a("fresh.example", 300, [10, 0, 0, 2])],
        ValidationVerdict::Unsigned,
        300,
    );
    cache.sweep();
    assert_eq!(cache.len(), 1);
    assert!(cache.get(&key("fresh.example", RecordType::A)).is_some());
}

#[test]
fn later_expiry_supersedes_earlier() {
    let cache = RecordCache::new(1024, 86_400);
    let k = key("ttl.example", RecordType::A);
    cache.insert(
        k.clone(),
        vec![a("ttl.example", 300, [10, 0, 0, 1])],
        ValidationVerdict::Secure,
        300,
    );
    // A shorter-lived set must not clobber the longer-lived one.
    cache.insert(
        k.clone(),
        vec![a("ttl.example", 30, [10, 0, 0, 2])],
        ValidationVerdict::Unsigned,
        30,
    );
    let (records, verdict) = cache.get(&k).unwrap();
    assert_eq!(verdict, ValidationVerdict::Secure);
    assert!(records[0].ttl > 250);

    // And a longer-lived one does win.
    cache.insert(
        k.clone(),
        vec![a("ttl.example", 600, [10, 0, 0, 3])],
        ValidationVerdict::Secure,
        600,
    );
    let (records, _) = cache.get(&k).unwrap();
    assert!(records[0].ttl > 550);
}

#[test]
fn records_not_matching_the_key_are_dropped() {
    let cache = RecordCache::new(1024, 86_400);
    let k = key("mixed.example", RecordType::A);
    cache.insert(
        k.clone(),
        vec![
            a("mixed.example", 120, [10, 0, 0, 1]),
            a("other.example", 120, [10, 0, 0, 2]),
            common::ns("mixed.example", 120, "ns.mixed.example"),
        ],
        ValidationVerdict::Unsigned,
        120,
    );
    let (records, _) = cache.get(&k).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, name("mixed.example"));
    assert_eq!(records[0].rtype(), RecordType::A);
}

#[test]
fn ttl_cap_applies() {
    let cache = RecordCache::new(1024, 60);
    cache.insert(
        key("capped.example", RecordType::A),
        vec![a("capped.example", 10_000, [10, 0, 0, 1])],
        ValidationVerdict::Unsigned,
        10_000,
    );
    let (records, _) = cache.get(&key("capped.example", RecordType::A)).unwrap();
    assert!(records[0].ttl <= 60);
}

#[test]
fn negative_entries_roundtrip_and_expire() {
    let cache = RecordCache::new(1024, 86_400);
    let k = key("missing.example", RecordType::AAAA);
    cache.insert_negative(
        k.clone(),
        NegativeEntry::new(
            NegativeKind::NoData,
            Some(soa("example", 300, 60)),
            vec![soa("example", 300, 60)],
            ValidationVerdict::Secure,
        ),
        60,
    );
    let entry = cache.get_negative(&k).unwrap();
    assert_eq!(entry.kind, NegativeKind::NoData);
    assert_eq!(entry.verdict, ValidationVerdict::Secure);
    assert!(entry.soa.is_some());

    let short = key("brief.example", RecordType::A);
    cache.insert_negative(
        short.clone(),
        NegativeEntry::new(NegativeKind::NxDomain, None, Vec::new(), ValidationVerdict::Unsigned),
        0,
    );
    assert!(cache.get_negative(&short).is_none());
}

#[test]
fn capacity_pressure_sheds_entries() {
    let cache = RecordCache::new(8, 86_400);
    for i in 0..32 {
        let owner = format!("host{}.example", i);
        cache.insert(
            CacheKey::new(&name(&owner), RecordType::A, RecordClass::IN),
            vec![a(&owner, 300, [10, 0, (i / 256) as u8, (i % 256) as u8])],
            ValidationVerdict::Unsigned,
            300,
        );
    }
    assert!(cache.len() <= 8);
    assert!(cache.stats().evictions > 0);
}

#[test]
fn stats_track_hits_and_misses() {
    let cache = RecordCache::new(1024, 86_400);
    let k = key("stats.example", RecordType::A);
    assert!(cache.get(&k).is_none());
    cache.insert(
        k.clone(),
        vec![a("stats.example", 300, [10, 0, 0, 1])],
        ValidationVerdict::Unsigned,
        300,
    );
    assert!(cache.get(&k).is_some());
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.insertions, 1);
}

#[test]
fn remaining_ttl_reports_time_left() {
    let cache = RecordCache::new(1024, 86_400);
    let k = key("left.example", RecordType::A);
    cache.insert(
        k.clone(),
        vec![a("left.example", 120, [10, 0, 0, 1])],
        ValidationVerdict::Unsigned,
        120,
    );
    let left = cache.remaining_ttl(&k).unwrap();
    assert!(left <= Duration::from_secs(120));
    assert!(left > Duration::from_secs(118));
}
