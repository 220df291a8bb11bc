mod common;

use common::name;
use ratatosk::dns::enums::{RecordClass, RecordType, ResponseCode};
use ratatosk::dns::rdata::{Dnskey, Ds, Nsec, Nsec3, Rdata, Rrsig, Soa};
use ratatosk::dns::{Header, Message, Question, Record};

fn record(owner: &str, ttl: u32, rdata: Rdata) -> Record {
    Record::new(name(owner), RecordClass::IN, ttl, rdata)
}

fn sample_records() -> Vec<Record> {
    vec![
        record("a.example", 300, Rdata::A([192, 0, 2, 1].into())),
        record("a.example", 300, Rdata::AAAA("2001:db8::1".parse().unwrap())),
        record("example", 3600, Rdata::NS(name("ns1.example"))),
        record("www.example", 60, Rdata::CNAME(name("a.example"))),
        record("old.example", 60, Rdata::DNAME(name("new.example"))),
        record(
            "example",
            120,
            Rdata::MX { preference: 10, exchange: name("mail.example") },
        ),
        record("example", 60, Rdata::TXT(vec![b"v=spf1 -all".to_vec()])),
        record(
            "example",
            3600,
            Rdata::SOA(Soa {
                mname: name("ns1.example"),
                rname: name("hostmaster.example"),
                serial: 2024_01_01,
                refresh: 7200,
                retry: 900,
                expire: 1_209_600,
                minimum: 300,
            }),
        ),
        record(
            "child.example",
            3600,
            Rdata::DS(Ds {
                key_tag: 12345,
                algorithm: 15,
                digest_type: 2,
                digest: vec![0xAB; 32],
            }),
        ),
        record(
            "example",
            3600,
            Rdata::DNSKEY(Dnskey {
                flags: 257,
                protocol: 3,
                algorithm: 15,
                public_key: vec![0x11; 32],
            }),
        ),
        record(
            "a.example",
            300,
            Rdata::RRSIG(Rrsig {
                type_covered: RecordType::A,
                algorithm: 15,
                labels: 2,
                original_ttl: 300,
                expiration: 1_700_100_000,
                inception: 1_700_000_000,
                key_tag: 12345,
                signer_name: name("example"),
                signature: vec![0x55; 64],
            }),
        ),
        record(
            "a.example",
            300,
            Rdata::NSEC(Nsec {
                next: name("b.example"),
                types: vec![RecordType::A, RecordType::AAAA, RecordType::RRSIG],
            }),
        ),
        record(
            "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom.example",
            300,
            Rdata::NSEC3(Nsec3 {
                hash_algorithm: 1,
                flags: 1,
                iterations: 5,
                salt: vec![0xAA, 0xBB],
                next_hashed: vec![0x0F; 20],
                types: vec![RecordType::A, RecordType::NS],
            }),
        ),
        record("weird.example", 60, Rdata::Opaque { rtype: 4242, data: vec![1, 2, 3, 4] }),
    ]
}

#[test]
fn full_message_roundtrip() {
    let mut message = Message::query(
        0x4242,
        Question::new(name("a.example"), RecordType::ANY, RecordClass::IN),
    );
    message.header.qr = true;
    message.header.aa = true;
    message.answers = sample_records();
    message.authorities = vec![record("example", 3600, Rdata::NS(name("ns1.example")))];
    message.set_edns(4096, true);

    let wire = message.serialize().unwrap();
    let parsed = Message::parse(&wire).unwrap();

    assert_eq!(parsed.header.id, 0x4242);
    assert!(parsed.header.aa);
    assert_eq!(parsed.answers, message.answers);
    assert_eq!(parsed.authorities, message.authorities);
    assert!(parsed.edns.unwrap().dnssec_ok);

    // Encoding what we decoded yields identical bytes (we never compress).
    let again = Message::parse(&wire).unwrap().serialize().unwrap();
    assert_eq!(wire, again);
}

#[test]
fn parses_compressed_owner_names() {
    // Hand-built response: question "a.example" A/IN, one answer whose
    // owner is a pointer back to the question name at offset 12.
    let header = Header {
        id: 7,
        qr: true,
        qdcount: 1,
        ancount: 1,
        ..Header::default()
    };
    let mut wire = Vec::new();
    header.write(&mut wire).unwrap();
    name("a.example").write_wire(&mut wire);
    wire.extend_from_slice(&RecordType::A.to_u16().to_be_bytes());
    wire.extend_from_slice(&RecordClass::IN.to_u16().to_be_bytes());

    wire.extend_from_slice(&[0xC0, 12]); // pointer to the question name
    wire.extend_from_slice(&RecordType::A.to_u16().to_be_bytes());
    wire.extend_from_slice(&RecordClass::IN.to_u16().to_be_bytes());
    wire.extend_from_slice(&300u32.to_be_bytes());
    wire.extend_from_slice(&4u16.to_be_bytes());
    wire.extend_from_slice(&[192, 0, 2, 7]);

    let parsed = Message::parse(&wire).unwrap();
    assert_eq!(parsed.answers.len(), 1);
    assert_eq!(parsed.answers[0].name, name("a.example"));
    assert_eq!(parsed.answers[0].rdata, Rdata::A([192, 0, 2, 7].into()));
}

#[test]
fn question_casing_survives_roundtrip() {
    let question = Question::new(name("WwW.ExAmPlE.CoM"), RecordType::A, RecordClass::IN);
    let message = Message::query(1, question.clone());
    let parsed = Message::parse(&message.serialize().unwrap()).unwrap();
    assert!(parsed.questions[0].name.eq_case_sensitive(&question.name));
}

#[test]
fn extended_rcode_folds_in() {
    let mut message = Message::query(
        9,
        Question::new(name("x.example"), RecordType::A, RecordClass::IN),
    );
    message.header.qr = true;
    message.header.rcode = 3;
    message.set_edns(1232, false);
    let parsed = Message::parse(&message.serialize().unwrap()).unwrap();
    assert_eq!(parsed.response_code(), ResponseCode::NXDomain);

    // BADVERS-style extended code: high bits live in the OPT ttl.
    if let Some(edns) = &mut message.edns {
        edns.extended_rcode = 1;
    }
    message.header.rcode = 0;
    let parsed = Message::parse(&message.serialize().unwrap()).unwrap();
    assert_eq!(parsed.response_code(), ResponseCode::Unknown(16));
}

#[test]
fn truncated_buffers_are_rejected() {
    let message = Message::query(
        1,
        Question::new(name("cut.example"), RecordType::A, RecordClass::IN),
    );
    let wire = message.serialize().unwrap();
    for cut in [0, 5, 11, wire.len() - 1] {
        assert!(Message::parse(&wire[..cut]).is_err(), "cut at {}", cut);
    }
}
