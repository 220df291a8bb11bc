use std::fmt;

use super::enums::{RecordClass, RecordType};
use super::rdata::Rdata;
use super::{Name, ParseError, read_u16, read_u32};

/// A single resource record. Immutable once parsed; the cache clones and
/// rewrites `ttl` on the copies it hands out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub name: Name,
    pub class: RecordClass,
    pub ttl: u32,
    pub rdata: Rdata,
}

impl Record {
    pub fn new(name: Name, class: RecordClass, ttl: u32, rdata: Rdata) -> Self {
        Self { name, class, ttl, rdata }
    }

    pub fn rtype(&self) -> RecordType {
        self.rdata.rtype()
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        self.name.write_wire(out);
        out.extend_from_slice(&self.rtype().to_u16().to_be_bytes());
        out.extend_from_slice(&self.class.to_u16().to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        let len_at = out.len();
        out.extend_from_slice(&[0, 0]);
        self.rdata.write(out);
        let rdlen = (out.len() - len_at - 2) as u16;
        out[len_at..len_at + 2].copy_from_slice(&rdlen.to_be_bytes());
    }

    /// Canonical owner + type + class + `original_ttl` + canonical rdata,
    /// the per-record unit hashed into signature input (RFC 4034 §3.1.8.1).
    pub fn write_canonical(&self, original_ttl: u32, out: &mut Vec<u8>) {
        self.name.write_canonical(out);
        out.extend_from_slice(&self.rtype().to_u16().to_be_bytes());
        out.extend_from_slice(&self.class.to_u16().to_be_bytes());
        out.extend_from_slice(&original_ttl.to_be_bytes());
        let len_at = out.len();
        out.extend_from_slice(&[0, 0]);
        self.rdata.write_canonical(out);
        let rdlen = (out.len() - len_at - 2) as u16;
        out[len_at..len_at + 2].copy_from_slice(&rdlen.to_be_bytes());
    }

    pub fn read(buf: &[u8], pos: &mut usize) -> Result<Self, ParseError> {
        let name = Name::read_wire(buf, pos)?;
        let rtype = RecordType::from_u16(read_u16(buf, pos)?);
        let class = RecordClass::from_u16(read_u16(buf, pos)?);
        let ttl = read_u32(buf, pos)?;
        let rdlen = read_u16(buf, pos)? as usize;
        let rdata = Rdata::read(rtype, buf, pos, rdlen)?;
        Ok(Self { name, class, ttl, rdata })
    }

    /// Canonical rdata image used for duplicate elimination and the
    /// rdata ordering within a signed set.
    pub fn canonical_rdata(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.rdata.write_canonical(&mut out);
        out
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.name, self.ttl, self.class, self.rtype())
    }
}

/// All records sharing `(owner, type, class)`: the unit a signature
/// covers. Construction deduplicates on canonical rdata.
#[derive(Clone, Debug)]
pub struct RrSet {
    pub name: Name,
    pub rtype: RecordType,
    pub class: RecordClass,
    records: Vec<Record>,
}

impl RrSet {
    pub fn new(name: Name, rtype: RecordType, class: RecordClass) -> Self {
        Self { name, rtype, class, records: Vec::new() }
    }

    /// Group a record list into rrsets, preserving first-seen order of the
    /// sets and dropping duplicate rdata.
    pub fn group(records: &[Record]) -> Vec<RrSet> {
        let mut sets: Vec<RrSet> = Vec::new();
        for record in records {
            match sets.iter_mut().find(|s| {
                s.rtype == record.rtype() && s.class == record.class && s.name == record.name
            }) {
                Some(set) => set.push(record.clone()),
                None => {
                    let mut set = RrSet::new(record.name.clone(), record.rtype(), record.class);
                    set.push(record.clone());
                    sets.push(set);
                }
            }
        }
        sets
    }

    pub fn push(&mut self, record: Record) {
        let image = record.canonical_rdata();
        if self.records.iter().any(|r| r.canonical_rdata() == image) {
            return;
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Smallest TTL across the set; the TTL the whole set is cached under.
    pub fn min_ttl(&self) -> u32 {
        self.records.iter().map(|r| r.ttl).min().unwrap_or(0)
    }

    /// Records ordered by canonical rdata image (RFC 4034 §6.3), as
    /// signature verification requires.
    pub fn canonically_ordered(&self) -> Vec<&Record> {
        let mut ordered: Vec<&Record> = self.records.iter().collect();
        ordered.sort_by_key(|r| r.canonical_rdata());
        ordered
    }
}

impl fmt::Display for RrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} ({} records)", self.name, self.class, self.rtype, self.records.len())
    }
}
