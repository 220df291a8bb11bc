//! Shared test fixtures: record builders, an in-process scriptable
//! transport, and Ed25519-signed miniature zones.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ring::signature::{Ed25519KeyPair, KeyPair};

use ratatosk::dns::enums::{RecordClass, RecordType};
use ratatosk::dns::rdata::{Dnskey, Ds, Nsec, Nsec3, Rdata, Rrsig, Soa};
use ratatosk::dns::{Message, Name, Question, Record, RrSet};
use ratatosk::dnssec::key_tag;
use ratatosk::transport::Transport;

/// Signature validity midpoint used by every signed fixture.
pub const TEST_NOW: u32 = 1_700_000_000;

pub fn name(s: &str) -> Name {
    Name::parse(s).unwrap()
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

pub fn a(owner: &str, ttl: u32, ip: [u8; 4]) -> Record {
    Record::new(
        name(owner),
        RecordClass::IN,
        ttl,
        Rdata::A(ip.into()),
    )
}

pub fn ns(owner: &str, ttl: u32, host: &str) -> Record {
    Record::new(name(owner), RecordClass::IN, ttl, Rdata::NS(name(host)))
}

pub fn cname(owner: &str, ttl: u32, target: &str) -> Record {
    Record::new(name(owner), RecordClass::IN, ttl, Rdata::CNAME(name(target)))
}

pub fn soa(owner: &str, ttl: u32, minimum: u32) -> Record {
    Record::new(
        name(owner),
        RecordClass::IN,
        ttl,
        Rdata::SOA(Soa {
            mname: name(&format!("ns.{}", owner)),
            rname: name(&format!("hostmaster.{}", owner)),
            serial: 1,
            refresh: 7200,
            retry: 900,
            expire: 1_209_600,
            minimum,
        }),
    )
}

pub fn nsec(owner: &str, ttl: u32, next: &str, types: &[RecordType]) -> Record {
    Record::new(
        name(owner),
        RecordClass::IN,
        ttl,
        Rdata::NSEC(Nsec { next: name(next), types: types.to_vec() }),
    )
}

/// What one scripted server says to one question. `None` falls through to
/// a SERVFAIL.
pub type Responder = Box<dyn Fn(&Question) -> Option<Reply> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Reply {
    pub rcode: u8,
    pub aa: bool,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Reply {
    pub fn answer(records: Vec<Record>) -> Self {
        Self { aa: true, answers: records, ..Self::default() }
    }

    pub fn referral(authorities: Vec<Record>, additionals: Vec<Record>) -> Self {
        Self { authorities, additionals, ..Self::default() }
    }

    pub fn nxdomain(authorities: Vec<Record>) -> Self {
        Self { rcode: 3, aa: true, authorities, ..Self::default() }
    }

    pub fn nodata(authorities: Vec<Record>) -> Self {
        Self { aa: true, authorities, ..Self::default() }
    }
}

pub struct ServerBehavior {
    pub responder: Responder,
    /// UDP answers come back truncated and empty; TCP carries the payload.
    pub truncate_udp: bool,
    /// Echo the question name with every letter's case flipped.
    pub flip_echo_case: bool,
    /// Respond under a different transaction id.
    pub break_txid: bool,
    pub delay: Option<Duration>,
    queries: AtomicUsize,
}

impl ServerBehavior {
    pub fn answering(responder: Responder) -> Self {
        Self {
            responder,
            truncate_udp: false,
            flip_echo_case: false,
            break_txid: false,
            delay: None,
            queries: AtomicUsize::new(0),
        }
    }
}

/// A fleet of scripted authoritative servers reachable by address.
#[derive(Default)]
pub struct MockTransport {
    servers: HashMap<SocketAddr, ServerBehavior>,
    pub udp_exchanges: AtomicUsize,
    pub tcp_exchanges: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(mut self, address: SocketAddr, behavior: ServerBehavior) -> Self {
        self.servers.insert(address, behavior);
        self
    }

    pub fn queries_to(&self, address: SocketAddr) -> usize {
        self.servers
            .get(&address)
            .map(|b| b.queries.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    async fn respond(
        &self,
        server: SocketAddr,
        payload: &[u8],
        via_tcp: bool,
    ) -> io::Result<Vec<u8>> {
        let behavior = self
            .servers
            .get(&server)
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no such server"))?;
        behavior.queries.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = behavior.delay {
            tokio::time::sleep(delay).await;
        }

        let query = Message::parse(payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let question = query.questions.first().cloned().expect("query has a question");

        let mut echoed = question.clone();
        if behavior.flip_echo_case {
            echoed.name = Name::from_labels(
                echoed
                    .name
                    .labels()
                    .iter()
                    .map(|l| {
                        l.chars()
                            .map(|c| {
                                if c.is_ascii_uppercase() {
                                    c.to_ascii_lowercase()
                                } else {
                                    c.to_ascii_uppercase()
                                }
                            })
                            .collect()
                    })
                    .collect(),
            );
        }

        let id = if behavior.break_txid {
            query.header.id.wrapping_add(1)
        } else {
            query.header.id
        };

        let mut response = Message::query(id, echoed);
        response.header.qr = true;

        if behavior.truncate_udp && !via_tcp {
            response.header.tc = true;
        } else {
            let reply = (behavior.responder)(&question).unwrap_or(Reply {
                rcode: 2,
                ..Reply::default()
            });
            response.header.aa = reply.aa;
            response.header.rcode = reply.rcode;
            response.answers = reply.answers;
            response.authorities = reply.authorities;
            response.additionals = reply.additionals;
        }

        response
            .serialize()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn udp_exchange(
        &self,
        server: SocketAddr,
        payload: &[u8],
        _wait: Duration,
    ) -> io::Result<Vec<u8>> {
        self.udp_exchanges.fetch_add(1, Ordering::Relaxed);
        self.respond(server, payload, false).await
    }

    async fn tcp_exchange(
        &self,
        server: SocketAddr,
        payload: &[u8],
        _wait: Duration,
    ) -> io::Result<Vec<u8>> {
        self.tcp_exchanges.fetch_add(1, Ordering::Relaxed);
        self.respond(server, payload, true).await
    }
}

/// One zone's Ed25519 signing key with its DNSKEY/DS material.
pub struct ZoneKey {
    pub zone: Name,
    keypair: Ed25519KeyPair,
    pub dnskey: Dnskey,
    pub tag: u16,
}

impl ZoneKey {
    pub fn generate(zone: &str) -> Self {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let dnskey = Dnskey {
            flags: 257,
            protocol: 3,
            algorithm: 15,
            public_key: keypair.public_key().as_ref().to_vec(),
        };
        let tag = key_tag(&dnskey);
        Self { zone: name(zone), keypair, dnskey, tag }
    }

    pub fn dnskey_record(&self, ttl: u32) -> Record {
        Record::new(self.zone.clone(), RecordClass::IN, ttl, Rdata::DNSKEY(self.dnskey.clone()))
    }

    pub fn ds(&self) -> Ds {
        let mut image = self.zone.to_canonical_wire();
        image.extend_from_slice(&self.dnskey.rdata_wire());
        let digest = ring::digest::digest(&ring::digest::SHA256, &image);
        Ds {
            key_tag: self.tag,
            algorithm: 15,
            digest_type: 2,
            digest: digest.as_ref().to_vec(),
        }
    }

    pub fn ds_record(&self, ttl: u32) -> Record {
        Record::new(self.zone.clone(), RecordClass::IN, ttl, Rdata::DS(self.ds()))
    }

    /// RRSIG over the (single) rrset in `records`, valid around TEST_NOW.
    pub fn sign(&self, records: &[Record]) -> Record {
        let set = RrSet::group(records).into_iter().next().expect("rrset to sign");
        let rrsig = Rrsig {
            type_covered: set.rtype,
            algorithm: 15,
            labels: set.name.label_count() as u8,
            original_ttl: set.min_ttl(),
            expiration: TEST_NOW + 86_400,
            inception: TEST_NOW - 3_600,
            key_tag: self.tag,
            signer_name: self.zone.clone(),
            signature: Vec::new(),
        };

        let mut data = rrsig.signed_prefix();
        for record in set.canonically_ordered() {
            record.write_canonical(rrsig.original_ttl, &mut data);
        }
        let signature = self.keypair.sign(&data).as_ref().to_vec();

        Record::new(
            set.name.clone(),
            set.class,
            set.min_ttl(),
            Rdata::RRSIG(Rrsig { signature, ..rrsig }),
        )
    }

    /// A signature with one bit flipped, guaranteed invalid.
    pub fn sign_corrupt(&self, records: &[Record]) -> Record {
        let mut record = self.sign(records);
        if let Rdata::RRSIG(sig) = &mut record.rdata {
            sig.signature[0] ^= 0x01;
        }
        record
    }
}

/// `(hash - 1, hash + 1)` as big-endian big integers, for building NSEC3
/// intervals that cover exactly one hash.
pub fn interval_around(hash: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut below = hash.to_vec();
    for byte in below.iter_mut().rev() {
        if *byte > 0 {
            *byte -= 1;
            break;
        }
        *byte = 0xFF;
    }
    let mut above = hash.to_vec();
    for byte in above.iter_mut().rev() {
        if *byte < 0xFF {
            *byte += 1;
            break;
        }
        *byte = 0;
    }
    (below, above)
}

/// NSEC3 record whose interval covers `target_hash`, carrying the zone's
/// usual parameters (no salt, one iteration).
pub fn nsec3_covering(zone: &str, target_hash: &[u8], ttl: u32) -> Record {
    let (below, above) = interval_around(target_hash);
    let label = ratatosk::dnssec::denial::nsec3_hash_label(&below);
    Record::new(
        name(&format!("{}.{}", label, zone)),
        RecordClass::IN,
        ttl,
        Rdata::NSEC3(Nsec3 {
            hash_algorithm: 1,
            flags: 0,
            iterations: 1,
            salt: Vec::new(),
            next_hashed: above,
            types: vec![RecordType::A],
        }),
    )
}

/// NSEC3 record whose owner hash matches `owner_hash` exactly.
pub fn nsec3_matching(zone: &str, owner_hash: &[u8], ttl: u32, types: &[RecordType]) -> Record {
    let (_, above) = interval_around(owner_hash);
    let label = ratatosk::dnssec::denial::nsec3_hash_label(owner_hash);
    Record::new(
        name(&format!("{}.{}", label, zone)),
        RecordClass::IN,
        ttl,
        Rdata::NSEC3(Nsec3 {
            hash_algorithm: 1,
            flags: 0,
            iterations: 1,
            salt: Vec::new(),
            next_hashed: above,
            types: types.to_vec(),
        }),
    )
}
