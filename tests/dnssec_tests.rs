mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use common::{
    MockTransport, Reply, ServerBehavior, ZoneKey, a, addr, name, ns, nsec, nsec3_covering,
    nsec3_matching, soa, TEST_NOW,
};
use ratatosk::dns::Name;
use ratatosk::dns::enums::{RecordClass, RecordType};
use ratatosk::dnssec::denial::nsec3_hash;
use ratatosk::dnssec::{TrustAnchor, ValidationVerdict};
use ratatosk::{Recursor, ResolveError, ResolverConfig};

struct Fixture {
    transport: Arc<MockTransport>,
    root_addr: SocketAddr,
    example_addr: SocketAddr,
    root_key: ZoneKey,
}

/// A root → com → example.com hierarchy signed end to end with Ed25519.
/// `corrupt_leaf` breaks the signature over the leaf A rrset;
/// `insecure_example` removes example.com's DS and serves the leaf
/// unsigned, with a signed NSEC proving the delegation break.
fn signed_fixture(corrupt_leaf: bool, insecure_example: bool) -> Fixture {
    let root_addr = addr("192.0.2.1:53");
    let com_addr = addr("192.0.2.2:53");
    let example_addr = addr("192.0.2.3:53");

    let root_key = ZoneKey::generate(".");
    let com_key = ZoneKey::generate("com");
    let example_key = ZoneKey::generate("example.com");

    // Root zone: its own DNSKEY and the DS introducing com.
    let root_dnskey = root_key.dnskey_record(3600);
    let root_dnskey_reply = Reply::answer(vec![
        root_dnskey.clone(),
        root_key.sign(&[root_dnskey.clone()]),
    ]);
    let com_ds = com_key.ds_record(3600);
    let com_ds_reply = Reply::answer(vec![com_ds.clone(), root_key.sign(&[com_ds.clone()])]);
    let com_referral = Reply::referral(
        vec![ns("com", 3600, "ns.com")],
        vec![a("ns.com", 3600, [192, 0, 2, 2])],
    );

    let root_responder: ServerBehavior = ServerBehavior::answering(Box::new(move |q| {
        match (q.name.key().as_str(), q.qtype) {
            (".", RecordType::DNSKEY) => Some(root_dnskey_reply.clone()),
            ("com", RecordType::DS) => Some(com_ds_reply.clone()),
            _ if name("com").zone_of(&q.name) => Some(com_referral.clone()),
            _ => None,
        }
    }));

    // com zone: its DNSKEY, the DS (or proven absence) for example.com.
    let com_dnskey = com_key.dnskey_record(3600);
    let com_dnskey_reply = Reply::answer(vec![
        com_dnskey.clone(),
        com_key.sign(&[com_dnskey.clone()]),
    ]);
    let example_ds_reply = if insecure_example {
        let com_soa = soa("com", 300, 300);
        let break_proof = nsec("example.com", 300, "zzz.com", &[RecordType::NS]);
        Reply::nodata(vec![
            com_soa.clone(),
            com_key.sign(&[com_soa]),
            break_proof.clone(),
            com_key.sign(&[break_proof]),
        ])
    } else {
        let example_ds = example_key.ds_record(3600);
        Reply::answer(vec![example_ds.clone(), com_key.sign(&[example_ds])])
    };
    let example_referral = Reply::referral(
        vec![ns("example.com", 3600, "ns.example.com")],
        vec![a("ns.example.com", 3600, [192, 0, 2, 3])],
    );

    let com_responder: ServerBehavior = ServerBehavior::answering(Box::new(move |q| {
        match (q.name.key().as_str(), q.qtype) {
            ("com", RecordType::DNSKEY) => Some(com_dnskey_reply.clone()),
            ("example.com", RecordType::DS) => Some(example_ds_reply.clone()),
            _ if name("example.com").zone_of(&q.name) => Some(example_referral.clone()),
            _ => None,
        }
    }));

    // example.com zone: DNSKEY, the leaf A rrset, and an NSEC3-proven
    // NXDOMAIN for missing.example.com.
    let example_dnskey = example_key.dnskey_record(3600);
    let example_dnskey_reply = Reply::answer(vec![
        example_dnskey.clone(),
        example_key.sign(&[example_dnskey.clone()]),
    ]);

    let leaf = a("www.example.com", 300, [93, 184, 216, 34]);
    let leaf_reply = if insecure_example {
        Reply::answer(vec![leaf.clone()])
    } else if corrupt_leaf {
        Reply::answer(vec![leaf.clone(), example_key.sign_corrupt(&[leaf.clone()])])
    } else {
        Reply::answer(vec![leaf.clone(), example_key.sign(&[leaf.clone()])])
    };

    let apex_hash = nsec3_hash(&name("example.com"), &[], 1).unwrap();
    let missing_hash = nsec3_hash(&name("missing.example.com"), &[], 1).unwrap();
    let wildcard_hash = nsec3_hash(&name("*.example.com"), &[], 1).unwrap();
    let apex_nsec3 = nsec3_matching(
        "example.com",
        &apex_hash,
        300,
        &[RecordType::NS, RecordType::SOA, RecordType::DNSKEY],
    );
    let missing_cover = nsec3_covering("example.com", &missing_hash, 300);
    let wildcard_cover = nsec3_covering("example.com", &wildcard_hash, 300);
    let example_soa = soa("example.com", 300, 300);
    let nxdomain_reply = Reply::nxdomain(vec![
        example_soa.clone(),
        example_key.sign(&[example_soa]),
        apex_nsec3.clone(),
        example_key.sign(&[apex_nsec3]),
        missing_cover.clone(),
        example_key.sign(&[missing_cover]),
        wildcard_cover.clone(),
        example_key.sign(&[wildcard_cover]),
    ]);

    let example_responder: ServerBehavior = ServerBehavior::answering(Box::new(move |q| {
        match (q.name.key().as_str(), q.qtype) {
            ("example.com", RecordType::DNSKEY) => Some(example_dnskey_reply.clone()),
            ("www.example.com", RecordType::A) => Some(leaf_reply.clone()),
            ("missing.example.com", _) => Some(nxdomain_reply.clone()),
            _ => None,
        }
    }));

    let transport = Arc::new(
        MockTransport::new()
            .server(root_addr, root_responder)
            .server(com_addr, com_responder)
            .server(example_addr, example_responder),
    );

    Fixture { transport, root_addr, example_addr, root_key }
}

fn validating_recursor(fixture: &Fixture) -> Recursor {
    let config = ResolverConfig {
        root_hints: vec![fixture.root_addr],
        validation_enabled: true,
        ..ResolverConfig::default()
    };
    let mut recursor = Recursor::with_transport(config, fixture.transport.clone()).unwrap();
    recursor.set_validation_time(TEST_NOW);
    recursor.set_trust_anchors(vec![TrustAnchor::from_key(
        Name::root(),
        fixture.root_key.dnskey.clone(),
    )]);
    recursor
}

#[tokio::test]
async fn full_chain_validates_as_secure() {
    let fixture = signed_fixture(false, false);
    let recursor = validating_recursor(&fixture);

    let resolution = recursor
        .resolve(name("www.example.com"), RecordType::A, RecordClass::IN, true)
        .await
        .unwrap();
    assert_eq!(resolution.verdict, ValidationVerdict::Secure);
    assert!(resolution.records.iter().any(|r| r.rtype() == RecordType::A));
}

#[tokio::test]
async fn corrupted_signature_is_bogus_and_briefly_cached() {
    let fixture = signed_fixture(true, false);
    let recursor = validating_recursor(&fixture);

    let err = recursor
        .resolve(name("www.example.com"), RecordType::A, RecordClass::IN, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Bogus(_)), "got {:?}", err);

    // Retry is absorbed by the bogus cache instead of hammering servers.
    let queries_before = fixture.transport.queries_to(fixture.example_addr);
    let err = recursor
        .resolve(name("www.example.com"), RecordType::A, RecordClass::IN, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Bogus(_)));
    assert_eq!(
        fixture.transport.queries_to(fixture.example_addr),
        queries_before
    );
}

#[tokio::test]
async fn proven_missing_ds_yields_insecure() {
    let fixture = signed_fixture(false, true);
    let recursor = validating_recursor(&fixture);

    let resolution = recursor
        .resolve(name("www.example.com"), RecordType::A, RecordClass::IN, false)
        .await
        .unwrap();
    assert_eq!(resolution.verdict, ValidationVerdict::Insecure);
}

#[tokio::test]
async fn nsec3_nxdomain_validates_as_secure() {
    let fixture = signed_fixture(false, false);
    let recursor = validating_recursor(&fixture);

    let err = recursor
        .resolve(name("missing.example.com"), RecordType::A, RecordClass::IN, true)
        .await
        .unwrap_err();
    match err {
        ResolveError::NameError { verdict } => assert_eq!(verdict, ValidationVerdict::Secure),
        other => panic!("expected NameError, got {:?}", other),
    }
}

#[tokio::test]
async fn no_covering_anchor_is_indeterminate() {
    let fixture = signed_fixture(false, false);
    let recursor = validating_recursor(&fixture);
    recursor.set_trust_anchors(Vec::new());

    let resolution = recursor
        .resolve(name("www.example.com"), RecordType::A, RecordClass::IN, false)
        .await
        .unwrap();
    assert_eq!(resolution.verdict, ValidationVerdict::Indeterminate);

    recursor.flush_cache();
    let err = recursor
        .resolve(name("www.example.com"), RecordType::A, RecordClass::IN, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Indeterminate), "got {:?}", err);
}

#[tokio::test]
async fn expired_signatures_are_bogus() {
    let fixture = signed_fixture(false, false);
    let config = ResolverConfig {
        root_hints: vec![fixture.root_addr],
        validation_enabled: true,
        ..ResolverConfig::default()
    };
    let mut recursor = Recursor::with_transport(config, fixture.transport.clone()).unwrap();
    // Far beyond every signature's expiration window.
    recursor.set_validation_time(TEST_NOW + 10 * 86_400);
    recursor.set_trust_anchors(vec![TrustAnchor::from_key(
        Name::root(),
        fixture.root_key.dnskey.clone(),
    )]);

    let err = recursor
        .resolve(name("www.example.com"), RecordType::A, RecordClass::IN, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Bogus(_)), "got {:?}", err);
}
