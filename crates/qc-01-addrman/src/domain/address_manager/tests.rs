//! Tests for Address Manager
//!
//! Reference: Bitcoin Core's `addrman_tests.cpp` - New/Tried segregation tests

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use super::*;
use crate::adapters::SeededRandomSource;
use crate::domain::{AddrManError, NetAddress, ServiceFlags, Timestamp};

const NOW: u64 = 1_700_000_000;
const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

fn manager(seed: u64) -> AddrMan {
    AddrMan::with_key(
        AddrManConfig::for_testing(),
        Arc::new(SeededRandomSource::new(seed)),
        SecretKey::new([seed as u8; KEY_SIZE]),
    )
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn src(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn net(s: &str, seen: u64) -> NetAddress {
    NetAddress::new(addr(s), Timestamp::new(seen))
}

/// Public endpoint in its own /16, reported by a source in its own /16.
fn spread(i: u32) -> (NetAddress, IpAddr) {
    let a = 1 + (i / 200) as u8;
    let b = (i % 200) as u8;
    let address = NetAddress::new(
        SocketAddr::new(IpAddr::from([a, b, 7, 7]), 8333),
        Timestamp::new(NOW - HOUR),
    );
    let source = IpAddr::from([100 + a, b, 9, 9]);
    (address, source)
}

fn now() -> Timestamp {
    Timestamp::new(NOW)
}

// =============================================================================
// TEST GROUP 1: Basic New/Tried Segregation
// =============================================================================

#[test]
fn test_empty_cache() {
    let mut man = manager(1);
    assert_eq!(man.size(), 0);
    assert!(man.select(now()).is_none());
    assert!(man.get_addr(now()).is_empty());
    assert!(man.check().is_ok());
}

#[test]
fn test_add_then_good_moves_to_tried() {
    let mut man = manager(1);
    let a = addr("1.2.3.4:8333");

    assert!(man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now()));
    assert_eq!(man.size(), 1);
    assert_eq!((man.new_count(), man.tried_count()), (1, 0));
    assert!(!man.find(&a).unwrap().in_tried);

    let outcome = man.good(&a, now());
    assert_eq!(outcome, GoodOutcome::Promoted { evicted: None });
    assert_eq!(man.size(), 1);
    assert_eq!((man.new_count(), man.tried_count()), (0, 1));

    let record = man.find(&a).unwrap();
    assert!(record.in_tried);
    assert_eq!(record.ref_count, 0);
    assert_eq!(record.last_success, Some(now()));
    assert_eq!(record.attempts, 0);
}

#[test]
fn test_good_on_tried_record_only_refreshes() {
    let mut man = manager(2);
    let a = addr("1.2.3.4:8333");
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());
    man.good(&a, now());

    man.attempt(&a, now().add_secs(10));
    assert_eq!(man.good(&a, now().add_secs(20)), GoodOutcome::Refreshed);
    let record = man.find(&a).unwrap();
    assert_eq!(record.attempts, 0);
    assert_eq!(record.last_success, Some(now().add_secs(20)));
    assert_eq!(man.tried_count(), 1);
}

#[test]
fn test_good_requires_exact_port() {
    let mut man = manager(3);
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());

    assert_eq!(man.good(&addr("1.2.3.4:9999"), now()), GoodOutcome::Unknown);
    assert_eq!(man.good(&addr("4.3.2.1:8333"), now()), GoodOutcome::Unknown);
    assert_eq!(man.tried_count(), 0);
}

#[test]
fn test_ipv4_mapped_lookup_is_canonical() {
    let mut man = manager(4);
    man.add(net("[::ffff:1.2.3.4]:8333", NOW - HOUR), src("5.6.7.8"), 0, now());
    assert!(man.contains(&addr("1.2.3.4:8333")));
    assert!(!man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now()));
    assert_eq!(man.size(), 1);
}

// =============================================================================
// TEST GROUP 2: Add Policy
// =============================================================================

#[test]
fn test_non_routable_rejected_by_default() {
    let mut man = AddrMan::new(
        AddrManConfig::default(),
        Arc::new(SeededRandomSource::new(5)),
    );
    assert!(!man.add(net("192.168.1.10:8333", NOW), src("5.6.7.8"), 0, now()));
    assert!(!man.add(net("127.0.0.1:8333", NOW), src("5.6.7.8"), 0, now()));
    assert_eq!(man.size(), 0);

    assert!(man.add(net("8.8.8.8:8333", NOW), src("5.6.7.8"), 0, now()));
    assert_eq!(man.size(), 1);
}

#[test]
fn test_non_routable_allowed_for_testing() {
    let mut man = manager(5);
    assert!(man.add(net("192.168.1.10:8333", NOW), src("10.0.0.1"), 0, now()));
    assert_eq!(man.size(), 1);
}

#[test]
fn test_time_penalty_applied_to_new_record() {
    let mut man = manager(6);
    man.add(net("1.2.3.4:8333", NOW), src("5.6.7.8"), 2 * HOUR, now());
    let record = man.find(&addr("1.2.3.4:8333")).unwrap();
    assert_eq!(record.address.time, Timestamp::new(NOW - 2 * HOUR));
}

#[test]
fn test_duplicate_add_is_idempotent() {
    let mut man = manager(7);
    let a = net("1.2.3.4:8333", NOW - HOUR);

    assert!(man.add(a.clone(), src("5.6.7.8"), 0, now()));
    let before = man.find(&a.addr).unwrap();

    assert!(!man.add(a.clone(), src("5.6.7.8"), 0, now()));
    let after = man.find(&a.addr).unwrap();

    assert_eq!(man.size(), 1);
    assert_eq!(before, after);
    assert_eq!(after.ref_count, 1);
}

#[test]
fn test_re_add_keeps_later_timestamp() {
    let mut man = manager(8);
    let a = addr("1.2.3.4:8333");

    man.add(net("1.2.3.4:8333", NOW - 3 * DAY), src("5.6.7.8"), 0, now());
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());

    assert_eq!(man.size(), 1);
    assert_eq!(man.find(&a).unwrap().address.time, Timestamp::new(NOW - HOUR));
}

#[test]
fn test_re_add_within_update_interval_keeps_stored_time() {
    let mut man = manager(9);
    let a = addr("1.2.3.4:8333");

    man.add(net("1.2.3.4:8333", NOW - 2 * HOUR), src("5.6.7.8"), 0, now());
    // Online address: updates only once the claim is more than an hour newer.
    man.add(net("1.2.3.4:8333", NOW - 90 * 60), src("5.6.7.8"), 0, now());

    assert_eq!(man.find(&a).unwrap().address.time, Timestamp::new(NOW - 2 * HOUR));
}

#[test]
fn test_re_add_merges_services() {
    let mut man = manager(10);
    let a = addr("1.2.3.4:8333");

    man.add(
        net("1.2.3.4:8333", NOW - HOUR).with_services(ServiceFlags::NETWORK),
        src("5.6.7.8"),
        0,
        now(),
    );
    man.add(
        net("1.2.3.4:8333", NOW - HOUR).with_services(ServiceFlags::COMPACT_FILTERS),
        src("5.6.7.8"),
        0,
        now(),
    );

    let services = man.find(&a).unwrap().address.services;
    assert!(services.contains(ServiceFlags::NETWORK));
    assert!(services.contains(ServiceFlags::COMPACT_FILTERS));
}

#[test]
fn test_references_bounded_per_address() {
    let mut man = manager(11);
    let a = addr("1.2.3.4:8333");

    // Fresh claims from many informant groups.
    for i in 0..200u64 {
        let source = IpAddr::from([20 + (i % 200) as u8, (i / 200) as u8, 1, 1]);
        man.add(net("1.2.3.4:8333", NOW - 60 * DAY + i * DAY / 4), source, 0, now());
    }

    let record = man.find(&a).unwrap();
    assert!(record.ref_count >= 1);
    assert!(record.ref_count <= NEW_BUCKETS_PER_ADDRESS);
    assert_eq!(man.size(), 1);
    assert_eq!(man.stats().new_slots_used, record.ref_count as usize);
    assert!(man.check().is_ok());
}

#[test]
fn test_no_new_info_does_not_add_reference() {
    let mut man = manager(12);
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());
    // Same time from a different informant group carries nothing new.
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("50.60.70.80"), 0, now());
    man.add(net("1.2.3.4:8333", 0), src("60.60.70.80"), 0, now());

    assert_eq!(man.find(&addr("1.2.3.4:8333")).unwrap().ref_count, 1);
}

#[test]
fn test_tried_record_gets_no_new_references() {
    let mut man = manager(13);
    let a = addr("1.2.3.4:8333");
    man.add(net("1.2.3.4:8333", NOW - 2 * DAY), src("5.6.7.8"), 0, now());
    man.good(&a, now());

    assert!(!man.add(net("1.2.3.4:8333", NOW), src("50.6.7.8"), 0, now()));
    let record = man.find(&a).unwrap();
    assert!(record.in_tried);
    assert_eq!(record.ref_count, 0);
    assert_eq!(man.stats().new_slots_used, 0);
}

// =============================================================================
// TEST GROUP 3: Attempt / Connected
// =============================================================================

#[test]
fn test_attempt_counts_failures() {
    let mut man = manager(14);
    let a = addr("1.2.3.4:8333");
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());

    man.attempt(&a, now());
    man.attempt(&a, now().add_secs(5));
    let record = man.find(&a).unwrap();
    assert_eq!(record.attempts, 2);
    assert_eq!(record.last_try, Some(now().add_secs(5)));
    assert!(!record.in_tried);

    // Unknown endpoint is ignored.
    man.attempt(&addr("9.9.9.9:1"), now());
    assert_eq!(man.size(), 1);
}

#[test]
fn test_connected_updates_coarsely() {
    let mut man = manager(15);
    let a = addr("1.2.3.4:8333");
    man.add(net("1.2.3.4:8333", NOW - 10 * 60), src("5.6.7.8"), 0, now());

    man.connected(&a, now());
    assert_eq!(man.find(&a).unwrap().address.time, Timestamp::new(NOW - 10 * 60));

    man.connected(&a, now().add_secs(30 * 60));
    assert_eq!(man.find(&a).unwrap().address.time, now().add_secs(30 * 60));
}

#[test]
fn test_repeated_failures_after_old_success_make_record_terrible() {
    let mut man = manager(40);
    let a = addr("1.2.3.4:8333");
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());
    man.good(&a, now());

    let start = now().add_secs(8 * DAY);
    let judged_at = start.add_secs(20 * 60);
    for i in 0..9 {
        man.attempt(&a, start.add_secs(i * 60));
    }
    assert!(!man.find(&a).unwrap().is_terrible(judged_at));

    man.attempt(&a, start.add_secs(9 * 60));
    let record = man.find(&a).unwrap();
    assert_eq!(record.attempts, 10);
    assert!(record.is_terrible(judged_at));
    assert!(man.select(judged_at).is_none());

    // A fresh success clears the failure streak.
    assert_eq!(man.good(&a, judged_at), GoodOutcome::Refreshed);
    let later = judged_at.add_secs(2 * HOUR);
    assert!(!man.find(&a).unwrap().is_terrible(later));
    assert_eq!(man.select(later).unwrap().addr, a);
}

// =============================================================================
// TEST GROUP 4: Tried Collisions (Eviction Safety)
// =============================================================================

/// Two endpoints in one /16 that share a Tried slot under `key`.
fn tried_collision(key: &SecretKey) -> (SocketAddr, SocketAddr) {
    let mut seen: HashMap<(usize, usize), SocketAddr> = HashMap::new();
    for c in 0..=255u8 {
        for d in 1..=255u8 {
            let candidate = SocketAddr::new(IpAddr::from([1, 2, c, d]), 8333);
            let bucket = tried_bucket(key, &candidate);
            let slot = (bucket, bucket_position(key, false, bucket, &candidate));
            if let Some(first) = seen.insert(slot, candidate) {
                return (first, candidate);
            }
        }
    }
    unreachable!("a /16 has more endpoints than tried slots")
}

#[test]
fn test_tried_collision_demotes_occupant() {
    let mut man = manager(16);
    let (first, second) = tried_collision(&SecretKey::new([16; KEY_SIZE]));

    man.add(NetAddress::new(first, Timestamp::new(NOW - HOUR)), src("5.6.7.8"), 0, now());
    man.add(NetAddress::new(second, Timestamp::new(NOW - HOUR)), src("50.6.7.8"), 0, now());
    assert_eq!(man.size(), 2);

    man.good(&first, now());
    let outcome = man.good(&second, now());

    assert_eq!(outcome, GoodOutcome::Promoted { evicted: Some(first) });
    assert_eq!(man.size(), 2);
    assert_eq!((man.new_count(), man.tried_count()), (1, 1));

    let demoted = man.find(&first).unwrap();
    assert!(!demoted.in_tried);
    assert_eq!(demoted.ref_count, 1);
    assert!(man.find(&second).unwrap().in_tried);
    assert!(man.check().is_ok());
}

#[test]
fn test_evicted_records_stay_in_new() {
    let mut man = manager(17);
    let mut added = Vec::new();
    for i in 0..120 {
        let (address, source) = spread(i);
        if man.add(address.clone(), source, 0, now()) {
            added.push(address.addr);
        }
    }
    let before = man.size();

    let mut evictions = 0;
    for a in &added {
        if let GoodOutcome::Promoted { evicted: Some(evicted) } = man.good(a, now()) {
            evictions += 1;
            let record = man.find(&evicted).expect("evicted record retained");
            assert!(!record.in_tried);
            assert!(record.ref_count >= 1);
        }
    }

    // A demotion may displace one unrelated single-reference New record.
    assert!(man.size() + evictions >= before);
    assert_eq!(man.new_count() + man.tried_count(), man.size());
    assert!(man.tried_count() > 0);
    assert!(man.check().is_ok());
}

// =============================================================================
// TEST GROUP 5: Selection
// =============================================================================

#[test]
fn test_select_returns_only_record() {
    let mut man = manager(18);
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());

    let picked = man.select(now()).unwrap();
    assert_eq!(picked.addr, addr("1.2.3.4:8333"));
}

#[test]
fn test_select_never_returns_terrible() {
    let mut man = manager(19);
    // Unknown last-seen time: terrible from the start.
    man.add(net("1.2.3.4:8333", 0), src("5.6.7.8"), 0, now());
    assert_eq!(man.size(), 1);
    assert!(man.select(now()).is_none());
}

#[test]
fn test_select_splits_tables_evenly() {
    let mut man = manager(20);
    let mut added = Vec::new();
    for i in 0..110 {
        let (address, source) = spread(i);
        if man.add(address.clone(), source, 0, now()) {
            added.push(address.addr);
        }
    }
    for a in added.iter().take(50) {
        man.good(a, now());
    }
    // A few terrible entries in New.
    for i in 0..5u8 {
        man.add(
            NetAddress::new(SocketAddr::new(IpAddr::from([200, i, 1, 1]), 8333), Timestamp::ZERO),
            IpAddr::from([210, i, 1, 1]),
            0,
            now(),
        );
    }
    assert!(man.tried_count() >= 40);
    assert!(man.new_count() >= 40);

    let later = now().add_secs(HOUR);
    let mut from_tried = 0;
    for _ in 0..1000 {
        let picked = man.select(later).expect("pool is healthy");
        let record = man.find(&picked.addr).unwrap();
        assert!(!record.is_terrible(later));
        if record.in_tried {
            from_tried += 1;
        }
    }
    assert!((400..=600).contains(&from_tried), "tried picks: {from_tried}");
}

#[test]
fn test_select_is_uniform_over_tried_slots() {
    let mut man = manager(22);
    // Forty peers of one /16 share its eight tried buckets.
    for i in 0..40u8 {
        let peer = SocketAddr::new(IpAddr::from([1, 2, i, 1]), 8333);
        man.add(
            NetAddress::new(peer, Timestamp::new(NOW - HOUR)),
            IpAddr::from([50 + i, 1, 1, 1]),
            0,
            now(),
        );
        man.good(&peer, now());
    }
    let lone = addr("9.9.9.9:8333");
    man.add(net("9.9.9.9:8333", NOW - HOUR), src("60.1.1.1"), 0, now());
    man.good(&lone, now());
    assert!(man.find(&lone).unwrap().in_tried);
    let tried = man.tried_count();
    assert!(tried >= 20);

    let later = now().add_secs(DAY);
    let (mut tried_picks, mut lone_picks) = (0u32, 0u32);
    for _ in 0..10_000 {
        let picked = man.select(later).unwrap();
        if man.find(&picked.addr).unwrap().in_tried {
            tried_picks += 1;
            if picked.addr == lone {
                lone_picks += 1;
            }
        }
    }

    let share = f64::from(lone_picks) / f64::from(tried_picks);
    let expected = 1.0 / tried as f64;
    assert!(
        share > 0.5 * expected && share < 2.0 * expected,
        "lone share {share:.4}, expected about {expected:.4}"
    );
}

#[test]
fn test_select_prefers_new_when_tried_empty() {
    let mut man = manager(21);
    for i in 0..10 {
        let (address, source) = spread(i);
        man.add(address, source, 0, now());
    }
    for _ in 0..50 {
        let picked = man.select(now()).unwrap();
        assert!(!man.find(&picked.addr).unwrap().in_tried);
    }
}

// =============================================================================
// TEST GROUP 6: GetAddr
// =============================================================================

#[test]
fn test_get_addr_samples_fraction_without_repeats() {
    let mut man = manager(22);
    for i in 0..200 {
        let (address, source) = spread(i);
        man.add(address, source, 0, now());
    }
    let size = man.size();
    let sample = man.get_addr(now());

    assert_eq!(sample.len(), GETADDR_MAX_PCT * size / 100);
    let unique: HashSet<SocketAddr> = sample.iter().map(|a| a.addr).collect();
    assert_eq!(unique.len(), sample.len());
    assert!(sample.iter().all(|a| man.contains(&a.addr)));
    assert!(man.check().is_ok());
}

#[test]
fn test_get_addr_skips_terrible() {
    let mut man = manager(23);
    for i in 0..100u8 {
        man.add(
            NetAddress::new(SocketAddr::new(IpAddr::from([30, i, 1, 1]), 8333), Timestamp::ZERO),
            IpAddr::from([40, i, 1, 1]),
            0,
            now(),
        );
    }
    assert!(man.size() > 0);
    assert!(man.get_addr(now()).is_empty());
}

// =============================================================================
// TEST GROUP 7: Persistence
// =============================================================================

#[test]
fn test_serialize_clear_deserialize_preserves_classification() {
    let mut man = manager(24);
    let a = addr("1.2.3.4:8333");
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());
    man.good(&a, now());

    let data = man.serialize().unwrap();
    man.clear();
    assert_eq!(man.size(), 0);

    let report = man.deserialize(&data).unwrap();
    assert_eq!(report.tried_count, 1);
    assert_eq!(report.new_count, 0);
    assert_eq!(man.size(), 1);
    assert!(man.find(&a).unwrap().in_tried);
}

#[test]
fn test_round_trip_preserves_structure() {
    let mut man = manager(25);
    for i in 0..150 {
        let (address, source) = spread(i);
        man.add(address, source, 0, now());
    }
    // Second references for some records.
    for i in 0..40 {
        let (mut address, _) = spread(i);
        address.time = Timestamp::new(NOW);
        man.add(address, IpAddr::from([77, i as u8, 1, 1]), 0, now());
    }
    for i in (0..150).step_by(3) {
        let (address, _) = spread(i);
        man.attempt(&address.addr, now());
        man.good(&address.addr, now());
    }

    let data = man.serialize().unwrap();
    let mut restored = manager(99);
    let report = restored.deserialize(&data).unwrap();

    assert_eq!(report.lost_new, 0);
    assert_eq!(report.lost_tried, 0);
    assert!(restored == man);
    assert_eq!(restored.serialize().unwrap(), data);
}

#[test]
fn test_failed_load_leaves_empty_cache() {
    let mut man = manager(26);
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());
    let data = man.serialize().unwrap();
    let old_key = man.key.clone();

    let err = man.deserialize(&data[..data.len() - 1]).unwrap_err();
    assert!(matches!(err, AddrManError::Truncated));
    assert_eq!(man.size(), 0);
    assert!(man.key != old_key);
    assert!(man.check().is_ok());

    // Still usable afterwards.
    assert!(man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now()));
}

#[test]
fn test_rejects_bad_key_size() {
    let mut man = manager(27);
    let mut data = man.serialize().unwrap();
    data[1] = 16;
    assert!(matches!(
        man.deserialize(&data),
        Err(AddrManError::UnsupportedKeySize(16))
    ));
}

#[test]
fn test_rejects_oversized_tables() {
    let mut man = manager(28);
    let mut data = man.serialize().unwrap();
    // new count follows version, key size and key
    data[34..38].copy_from_slice(&u32::MAX.to_le_bytes());
    assert!(matches!(
        man.deserialize(&data),
        Err(AddrManError::TableTooLarge { .. })
    ));
}

#[test]
fn test_rejects_duplicate_address() {
    let mut man = manager(29);
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());
    man.add(net("4.3.2.1:8333", NOW - HOUR), src("50.6.7.8"), 0, now());
    let mut data = man.serialize().unwrap();

    // Header is 46 bytes, each record 74; copy the first IP over the second.
    let first_ip: Vec<u8> = data[46..62].to_vec();
    data[120..136].copy_from_slice(&first_ip);

    assert!(matches!(
        man.deserialize(&data),
        Err(AddrManError::DuplicateAddress(_))
    ));
    assert_eq!(man.size(), 0);
}

#[test]
fn test_unknown_version_rebuckets_new_records() {
    let mut man = manager(30);
    let mut added = 0;
    for i in 0..20 {
        let (address, source) = spread(i);
        if man.add(address, source, 0, now()) {
            added += 1;
        }
    }
    let mut data = man.serialize().unwrap();
    data[0] = FORMAT_VERSION + 1;

    let mut restored = manager(31);
    let report = restored.deserialize(&data).unwrap();
    assert_eq!(report.new_count + report.lost_new, added);
    assert!(restored.check().is_ok());
    assert_eq!(restored.stats().new_slots_used, restored.new_count());
}

#[test]
fn test_trailing_bytes_are_ignored() {
    let mut man = manager(32);
    man.add(net("1.2.3.4:8333", NOW - HOUR), src("5.6.7.8"), 0, now());
    let mut data = man.serialize().unwrap();
    data.extend_from_slice(&[0xAB; 7]);

    let mut restored = manager(33);
    restored.deserialize(&data).unwrap();
    assert!(restored == man);
}

// =============================================================================
// TEST GROUP 8: Misc
// =============================================================================

#[test]
fn test_clear_rotates_key_and_empties() {
    let mut man = AddrMan::new(
        AddrManConfig::for_testing(),
        Arc::new(SeededRandomSource::new(34)),
    );
    for i in 0..10 {
        let (address, source) = spread(i);
        man.add(address, source, 0, now());
    }
    let before = man.key.clone();
    man.clear();
    assert_eq!(man.size(), 0);
    assert_eq!(man.stats(), AddrManStats::default());
    assert_ne!(man.key, before);
}
