use std::net::{Ipv4Addr, Ipv6Addr};

use super::enums::RecordType;
use super::{Name, ParseError, read_bytes, read_u8, read_u16, read_u32};

/// SOA rdata (RFC 1035 §3.3.13). `minimum` doubles as the negative-caching
/// TTL bound of RFC 2308.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Soa {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// DS rdata (RFC 4034 §5.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ds {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

/// DNSKEY rdata (RFC 4034 §2.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dnskey {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
}

impl Dnskey {
    /// Bit 7: zone key. Must be set for keys used in validation.
    pub fn is_zone_key(&self) -> bool {
        self.flags & 0x0100 != 0
    }

    /// Bit 15: secure entry point, conventionally the KSK.
    pub fn is_sep(&self) -> bool {
        self.flags & 0x0001 != 0
    }

    pub fn is_revoked(&self) -> bool {
        self.flags & 0x0080 != 0
    }

    /// RDATA wire image, the input to key tags and DS digests.
    pub fn rdata_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.public_key.len());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.push(self.protocol);
        out.push(self.algorithm);
        out.extend_from_slice(&self.public_key);
        out
    }
}

/// RRSIG rdata (RFC 4034 §3.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rrsig {
    pub type_covered: RecordType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: Name,
    pub signature: Vec<u8>,
}

impl Rrsig {
    /// The RRSIG RDATA up to and excluding the signature, with the signer
    /// name in canonical form. This prefixes the signed data (RFC 4034 §3.1.8.1).
    pub fn signed_prefix(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.type_covered.to_u16().to_be_bytes());
        out.push(self.algorithm);
        out.push(self.labels);
        out.extend_from_slice(&self.original_ttl.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        out.extend_from_slice(&self.inception.to_be_bytes());
        out.extend_from_slice(&self.key_tag.to_be_bytes());
        self.signer_name.write_canonical(&mut out);
        out
    }
}

/// NSEC rdata (RFC 4034 §4.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nsec {
    pub next: Name,
    pub types: Vec<RecordType>,
}

impl Nsec {
    pub fn covers_type(&self, rtype: RecordType) -> bool {
        self.types.contains(&rtype)
    }
}

/// NSEC3 rdata (RFC 5155 §3.1). `next_hashed` is the raw hash, not its
/// base32 presentation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nsec3 {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    pub next_hashed: Vec<u8>,
    pub types: Vec<RecordType>,
}

impl Nsec3 {
    pub fn opt_out(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn covers_type(&self, rtype: RecordType) -> bool {
        self.types.contains(&rtype)
    }
}

/// NSEC3PARAM rdata (RFC 5155 §4.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nsec3Param {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
}

/// Tagged rdata over the record types the resolver understands. Everything
/// else is carried opaquely so unknown types survive a round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rdata {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    NS(Name),
    CNAME(Name),
    DNAME(Name),
    PTR(Name),
    MX { preference: u16, exchange: Name },
    TXT(Vec<Vec<u8>>),
    SOA(Soa),
    DS(Ds),
    DNSKEY(Dnskey),
    RRSIG(Rrsig),
    NSEC(Nsec),
    NSEC3(Nsec3),
    NSEC3PARAM(Nsec3Param),
    Opaque { rtype: u16, data: Vec<u8> },
}

impl Rdata {
    pub fn rtype(&self) -> RecordType {
        match self {
            Self::A(_) => RecordType::A,
            Self::AAAA(_) => RecordType::AAAA,
            Self::NS(_) => RecordType::NS,
            Self::CNAME(_) => RecordType::CNAME,
            Self::DNAME(_) => RecordType::DNAME,
            Self::PTR(_) => RecordType::PTR,
            Self::MX { .. } => RecordType::MX,
            Self::TXT(_) => RecordType::TXT,
            Self::SOA(_) => RecordType::SOA,
            Self::DS(_) => RecordType::DS,
            Self::DNSKEY(_) => RecordType::DNSKEY,
            Self::RRSIG(_) => RecordType::RRSIG,
            Self::NSEC(_) => RecordType::NSEC,
            Self::NSEC3(_) => RecordType::NSEC3,
            Self::NSEC3PARAM(_) => RecordType::NSEC3PARAM,
            Self::Opaque { rtype, .. } => RecordType::from_u16(*rtype),
        }
    }

    /// Decode rdata. `buf` is the whole message so names may follow
    /// compression pointers; `pos` sits at the rdata start and `rdlen`
    /// bounds it.
    pub fn read(
        rtype: RecordType,
        buf: &[u8],
        pos: &mut usize,
        rdlen: usize,
    ) -> Result<Self, ParseError> {
        let end = *pos + rdlen;
        if end > buf.len() {
            return Err(ParseError::UnexpectedEnd);
        }
        let rdata = match rtype {
            RecordType::A => {
                let octets = read_bytes(buf, pos, 4)?;
                Self::A(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
            }
            RecordType::AAAA => {
                let octets = read_bytes(buf, pos, 16)?;
                let mut segments = [0u8; 16];
                segments.copy_from_slice(octets);
                Self::AAAA(Ipv6Addr::from(segments))
            }
            RecordType::NS => Self::NS(Name::read_wire(buf, pos)?),
            RecordType::CNAME => Self::CNAME(Name::read_wire(buf, pos)?),
            RecordType::DNAME => Self::DNAME(Name::read_wire(buf, pos)?),
            RecordType::PTR => Self::PTR(Name::read_wire(buf, pos)?),
            RecordType::MX => {
                let preference = read_u16(buf, pos)?;
                let exchange = Name::read_wire(buf, pos)?;
                Self::MX { preference, exchange }
            }
            RecordType::TXT => {
                let mut strings = Vec::new();
                while *pos < end {
                    let len = read_u8(buf, pos)? as usize;
                    strings.push(read_bytes(buf, pos, len)?.to_vec());
                }
                Self::TXT(strings)
            }
            RecordType::SOA => Self::SOA(Soa {
                mname: Name::read_wire(buf, pos)?,
                rname: Name::read_wire(buf, pos)?,
                serial: read_u32(buf, pos)?,
                refresh: read_u32(buf, pos)?,
                retry: read_u32(buf, pos)?,
                expire: read_u32(buf, pos)?,
                minimum: read_u32(buf, pos)?,
            }),
            RecordType::DS => {
                let key_tag = read_u16(buf, pos)?;
                let algorithm = read_u8(buf, pos)?;
                let digest_type = read_u8(buf, pos)?;
                if end < *pos {
                    return Err(ParseError::BadRdata("DS digest"));
                }
                let digest = read_bytes(buf, pos, end - *pos)?.to_vec();
                Self::DS(Ds { key_tag, algorithm, digest_type, digest })
            }
            RecordType::DNSKEY => {
                let flags = read_u16(buf, pos)?;
                let protocol = read_u8(buf, pos)?;
                let algorithm = read_u8(buf, pos)?;
                if end < *pos {
                    return Err(ParseError::BadRdata("DNSKEY public key"));
                }
                let public_key = read_bytes(buf, pos, end - *pos)?.to_vec();
                Self::DNSKEY(Dnskey { flags, protocol, algorithm, public_key })
            }
            RecordType::RRSIG => {
                let type_covered = RecordType::from_u16(read_u16(buf, pos)?);
                let algorithm = read_u8(buf, pos)?;
                let labels = read_u8(buf, pos)?;
                let original_ttl = read_u32(buf, pos)?;
                let expiration = read_u32(buf, pos)?;
                let inception = read_u32(buf, pos)?;
                let key_tag = read_u16(buf, pos)?;
                // RFC 4034 §3.1.7: no compression in the signer field, so
                // the cursor math below stays within this rdata.
                let signer_name = Name::read_wire(buf, pos)?;
                if end < *pos {
                    return Err(ParseError::BadRdata("RRSIG signature"));
                }
                let signature = read_bytes(buf, pos, end - *pos)?.to_vec();
                Self::RRSIG(Rrsig {
                    type_covered,
                    algorithm,
                    labels,
                    original_ttl,
                    expiration,
                    inception,
                    key_tag,
                    signer_name,
                    signature,
                })
            }
            RecordType::NSEC => {
                let next = Name::read_wire(buf, pos)?;
                let types = read_type_bitmap(buf, pos, end)?;
                Self::NSEC(Nsec { next, types })
            }
            RecordType::NSEC3 => {
                let hash_algorithm = read_u8(buf, pos)?;
                let flags = read_u8(buf, pos)?;
                let iterations = read_u16(buf, pos)?;
                let salt_len = read_u8(buf, pos)? as usize;
                let salt = read_bytes(buf, pos, salt_len)?.to_vec();
                let hash_len = read_u8(buf, pos)? as usize;
                let next_hashed = read_bytes(buf, pos, hash_len)?.to_vec();
                let types = read_type_bitmap(buf, pos, end)?;
                Self::NSEC3(Nsec3 {
                    hash_algorithm,
                    flags,
                    iterations,
                    salt,
                    next_hashed,
                    types,
                })
            }
            RecordType::NSEC3PARAM => {
                let hash_algorithm = read_u8(buf, pos)?;
                let flags = read_u8(buf, pos)?;
                let iterations = read_u16(buf, pos)?;
                let salt_len = read_u8(buf, pos)? as usize;
                let salt = read_bytes(buf, pos, salt_len)?.to_vec();
                Self::NSEC3PARAM(Nsec3Param { hash_algorithm, flags, iterations, salt })
            }
            other => Self::Opaque {
                rtype: other.to_u16(),
                data: read_bytes(buf, pos, rdlen)?.to_vec(),
            },
        };
        if *pos != end {
            return Err(ParseError::BadRdata("trailing rdata octets"));
        }
        Ok(rdata)
    }

    /// Append the uncompressed wire form, casing preserved.
    pub fn write(&self, out: &mut Vec<u8>) {
        self.write_inner(out, false);
    }

    /// Append the canonical form of RFC 4034 §6.2: embedded names in the
    /// pre-DNSSEC types are lowercased, everything else is the plain wire
    /// image (RFC 6840 §5.1 leaves the RRSIG signer name untouched).
    pub fn write_canonical(&self, out: &mut Vec<u8>) {
        self.write_inner(out, true);
    }

    fn write_inner(&self, out: &mut Vec<u8>, canonical: bool) {
        let write_name = |name: &Name, out: &mut Vec<u8>| {
            if canonical {
                name.write_canonical(out);
            } else {
                name.write_wire(out);
            }
        };
        match self {
            Self::A(addr) => out.extend_from_slice(&addr.octets()),
            Self::AAAA(addr) => out.extend_from_slice(&addr.octets()),
            Self::NS(name) | Self::CNAME(name) | Self::DNAME(name) | Self::PTR(name) => {
                write_name(name, out)
            }
            Self::MX { preference, exchange } => {
                out.extend_from_slice(&preference.to_be_bytes());
                write_name(exchange, out);
            }
            Self::TXT(strings) => {
                for s in strings {
                    out.push(s.len() as u8);
                    out.extend_from_slice(s);
                }
            }
            Self::SOA(soa) => {
                write_name(&soa.mname, out);
                write_name(&soa.rname, out);
                out.extend_from_slice(&soa.serial.to_be_bytes());
                out.extend_from_slice(&soa.refresh.to_be_bytes());
                out.extend_from_slice(&soa.retry.to_be_bytes());
                out.extend_from_slice(&soa.expire.to_be_bytes());
                out.extend_from_slice(&soa.minimum.to_be_bytes());
            }
            Self::DS(ds) => {
                out.extend_from_slice(&ds.key_tag.to_be_bytes());
                out.push(ds.algorithm);
                out.push(ds.digest_type);
                out.extend_from_slice(&ds.digest);
            }
            Self::DNSKEY(key) => out.extend_from_slice(&key.rdata_wire()),
            Self::RRSIG(sig) => {
                out.extend_from_slice(&sig.type_covered.to_u16().to_be_bytes());
                out.push(sig.algorithm);
                out.push(sig.labels);
                out.extend_from_slice(&sig.original_ttl.to_be_bytes());
                out.extend_from_slice(&sig.expiration.to_be_bytes());
                out.extend_from_slice(&sig.inception.to_be_bytes());
                out.extend_from_slice(&sig.key_tag.to_be_bytes());
                // Signer casing is preserved either way; see write_canonical.
                sig.signer_name.write_wire(out);
                out.extend_from_slice(&sig.signature);
            }
            Self::NSEC(nsec) => {
                write_name(&nsec.next, out);
                write_type_bitmap(&nsec.types, out);
            }
            Self::NSEC3(nsec3) => {
                out.push(nsec3.hash_algorithm);
                out.push(nsec3.flags);
                out.extend_from_slice(&nsec3.iterations.to_be_bytes());
                out.push(nsec3.salt.len() as u8);
                out.extend_from_slice(&nsec3.salt);
                out.push(nsec3.next_hashed.len() as u8);
                out.extend_from_slice(&nsec3.next_hashed);
                write_type_bitmap(&nsec3.types, out);
            }
            Self::NSEC3PARAM(param) => {
                out.push(param.hash_algorithm);
                out.push(param.flags);
                out.extend_from_slice(&param.iterations.to_be_bytes());
                out.push(param.salt.len() as u8);
                out.extend_from_slice(&param.salt);
            }
            Self::Opaque { data, .. } => out.extend_from_slice(data),
        }
    }
}

/// Decode an RFC 4034 §4.1.2 type bitmap running to `end`.
fn read_type_bitmap(buf: &[u8], pos: &mut usize, end: usize) -> Result<Vec<RecordType>, ParseError> {
    let mut types = Vec::new();
    while *pos < end {
        let window = read_u8(buf, pos)? as u16;
        let len = read_u8(buf, pos)? as usize;
        if len == 0 || len > 32 {
            return Err(ParseError::BadRdata("type bitmap window length"));
        }
        let octets = read_bytes(buf, pos, len)?;
        for (i, &octet) in octets.iter().enumerate() {
            for bit in 0..8 {
                if octet & (0x80 >> bit) != 0 {
                    types.push(RecordType::from_u16(window * 256 + (i as u16) * 8 + bit));
                }
            }
        }
    }
    Ok(types)
}

fn write_type_bitmap(types: &[RecordType], out: &mut Vec<u8>) {
    let mut values: Vec<u16> = types.iter().map(|t| t.to_u16()).collect();
    values.sort_unstable();
    values.dedup();

    let mut idx = 0;
    while idx < values.len() {
        let window = values[idx] / 256;
        let mut octets = [0u8; 32];
        let mut max_octet = 0usize;
        while idx < values.len() && values[idx] / 256 == window {
            let low = values[idx] % 256;
            let octet = (low / 8) as usize;
            octets[octet] |= 0x80 >> (low % 8);
            max_octet = max_octet.max(octet);
            idx += 1;
        }
        out.push(window as u8);
        out.push((max_octet + 1) as u8);
        out.extend_from_slice(&octets[..=max_octet]);
    }
}
