use base32::Alphabet;
use ring::digest;
use tracing::{debug, trace};

use super::constants::MAX_NSEC3_ITERATIONS;
use super::errors::{DnssecError, Result};
use crate::dns::enums::RecordType;
use crate::dns::rdata::{Nsec, Nsec3, Rdata};
use crate::dns::{Name, Record};

/// What the absence of a DS rrset at a name means for the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsAbsence {
    /// The name is not a delegation point; the parent zone continues.
    NotDelegation,
    /// A delegation exists without DS: the child is provably insecure.
    InsecureDelegation,
}

/// The NSEC/NSEC3 material of one response, borrowed out of its records.
/// Signature validity of these sets is the caller's business; this module
/// only checks what the intervals and bitmaps prove.
pub struct DenialRecords<'a> {
    nsecs: Vec<(&'a Name, &'a Nsec)>,
    nsec3s: Vec<(&'a Name, &'a Nsec3)>,
}

impl<'a> DenialRecords<'a> {
    pub fn collect(records: &'a [Record]) -> Self {
        let mut nsecs = Vec::new();
        let mut nsec3s = Vec::new();
        for record in records {
            match &record.rdata {
                Rdata::NSEC(nsec) => nsecs.push((&record.name, nsec)),
                Rdata::NSEC3(nsec3) => nsec3s.push((&record.name, nsec3)),
                _ => {}
            }
        }
        Self { nsecs, nsec3s }
    }

    pub fn is_empty(&self) -> bool {
        self.nsecs.is_empty() && self.nsec3s.is_empty()
    }

    /// Prove that `qname` does not exist (RFC 4035 §5.4, RFC 5155 §8.4):
    /// the name itself is covered and so is the wildcard at the closest
    /// encloser.
    pub fn prove_name_error(&self, qname: &Name) -> Result<()> {
        if !self.nsecs.is_empty() {
            let (owner, _) = self
                .nsecs
                .iter()
                .find(|(owner, nsec)| name_covered(owner, &nsec.next, qname))
                .ok_or(DnssecError::DenialNotProven)?;

            // The covering interval's endpoints bound the closest encloser.
            let encloser = owner.common_ancestor(qname);
            let wildcard = encloser.prepend("*");
            if self
                .nsecs
                .iter()
                .any(|(owner, nsec)| name_covered(owner, &nsec.next, &wildcard))
            {
                debug!("NSEC proves {} does not exist", qname);
                return Ok(());
            }
            return Err(DnssecError::WildcardNotProven);
        }

        if !self.nsec3s.is_empty() {
            let (encloser, next_closer) = self.closest_encloser(qname)?;
            trace!("NSEC3 closest encloser of {} is {}", qname, encloser);
            if !self.nsec3_covers(&next_closer)? {
                return Err(DnssecError::DenialNotProven);
            }
            let wildcard = encloser.prepend("*");
            if !self.nsec3_covers(&wildcard)? {
                return Err(DnssecError::WildcardNotProven);
            }
            debug!("NSEC3 proves {} does not exist", qname);
            return Ok(());
        }

        Err(DnssecError::DenialNotProven)
    }

    /// Prove that `qname` exists but carries neither `qtype` nor CNAME.
    pub fn prove_no_data(&self, qname: &Name, qtype: RecordType) -> Result<()> {
        for (owner, nsec) in &self.nsecs {
            let matches_name = **owner == *qname
                || (owner.is_wildcard() && owner.parent().map(|p| p.zone_of(qname)).unwrap_or(false));
            if matches_name && !nsec.covers_type(qtype) && !nsec.covers_type(RecordType::CNAME) {
                debug!("NSEC proves {} has no {} rrset", qname, qtype);
                return Ok(());
            }
        }

        if let Some((_, nsec3)) = self.nsec3_matching(qname)? {
            if !nsec3.covers_type(qtype) && !nsec3.covers_type(RecordType::CNAME) {
                debug!("NSEC3 proves {} has no {} rrset", qname, qtype);
                return Ok(());
            }
        }

        // Opt-out covering of the name is acceptable for DS only
        // (RFC 5155 §8.6).
        if qtype == RecordType::DS {
            for (owner, nsec3) in &self.nsec3s {
                if !nsec3.opt_out() {
                    continue;
                }
                let hashed = nsec3_hash(qname, &nsec3.salt, nsec3.iterations)?;
                if let Some(owner_hash) = nsec3_owner_hash(owner) {
                    if hash_covered(&owner_hash, &nsec3.next_hashed, &hashed) {
                        debug!("opt-out NSEC3 covers {} for DS", qname);
                        return Ok(());
                    }
                }
            }
        }

        Err(DnssecError::DenialNotProven)
    }

    /// Decide what a proven DS absence at `child` means.
    pub fn classify_ds_absence(&self, child: &Name) -> Result<DsAbsence> {
        for (owner, nsec) in &self.nsecs {
            if **owner == *child {
                if nsec.covers_type(RecordType::DS) {
                    return Err(DnssecError::DenialNotProven);
                }
                return Ok(if nsec.covers_type(RecordType::NS) {
                    DsAbsence::InsecureDelegation
                } else {
                    DsAbsence::NotDelegation
                });
            }
        }

        if let Some((_, nsec3)) = self.nsec3_matching(child)? {
            if nsec3.covers_type(RecordType::DS) {
                return Err(DnssecError::DenialNotProven);
            }
            return Ok(if nsec3.covers_type(RecordType::NS) {
                DsAbsence::InsecureDelegation
            } else {
                DsAbsence::NotDelegation
            });
        }

        // An opt-out interval covering the child admits an unsigned
        // delegation underneath it.
        for (owner, nsec3) in &self.nsec3s {
            if !nsec3.opt_out() {
                continue;
            }
            let hashed = nsec3_hash(child, &nsec3.salt, nsec3.iterations)?;
            if let Some(owner_hash) = nsec3_owner_hash(owner) {
                if hash_covered(&owner_hash, &nsec3.next_hashed, &hashed) {
                    return Ok(DsAbsence::InsecureDelegation);
                }
            }
        }

        Err(DnssecError::DenialNotProven)
    }

    /// Prove that a wildcard-expanded answer had no closer match: the next
    /// closer name of `qname` below the synthesis source must be covered.
    pub fn prove_wildcard_expansion(&self, qname: &Name, source_labels: u8) -> Result<()> {
        let labels = qname.label_count();
        if source_labels as usize >= labels {
            return Ok(());
        }
        let skip = labels - source_labels as usize - 1;
        let next_closer = Name::from_labels(qname.labels()[skip..].to_vec());

        if self
            .nsecs
            .iter()
            .any(|(owner, nsec)| name_covered(owner, &nsec.next, &next_closer))
        {
            return Ok(());
        }
        if !self.nsec3s.is_empty() && self.nsec3_covers(&next_closer)? {
            return Ok(());
        }
        Err(DnssecError::WildcardNotProven)
    }

    /// RFC 5155 §8.3: walk up from `qname` to the first ancestor whose
    /// hash owns an NSEC3 record. Returns `(closest_encloser, next_closer)`.
    fn closest_encloser(&self, qname: &Name) -> Result<(Name, Name)> {
        let mut child = qname.clone();
        let mut ancestor = qname.parent();
        while let Some(candidate) = ancestor {
            if self.nsec3_matching(&candidate)?.is_some() {
                return Ok((candidate, child));
            }
            child = candidate.clone();
            ancestor = candidate.parent();
        }
        Err(DnssecError::DenialNotProven)
    }

    /// The NSEC3 whose owner hash equals the hash of `name`, if any.
    fn nsec3_matching(&self, name: &Name) -> Result<Option<(&Name, &Nsec3)>> {
        for (owner, nsec3) in &self.nsec3s {
            let hashed = nsec3_hash(name, &nsec3.salt, nsec3.iterations)?;
            if nsec3_owner_hash(owner).map(|h| h == hashed).unwrap_or(false) {
                return Ok(Some((owner, nsec3)));
            }
        }
        Ok(None)
    }

    fn nsec3_covers(&self, name: &Name) -> Result<bool> {
        for (owner, nsec3) in &self.nsec3s {
            let hashed = nsec3_hash(name, &nsec3.salt, nsec3.iterations)?;
            if let Some(owner_hash) = nsec3_owner_hash(owner) {
                if hash_covered(&owner_hash, &nsec3.next_hashed, &hashed) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// Does the interval `(owner, next)` cover `name` in canonical order,
/// wrapping at the end of the zone?
fn name_covered(owner: &Name, next: &Name, name: &Name) -> bool {
    use std::cmp::Ordering::*;
    match owner.canonical_cmp(next) {
        Less => owner.canonical_cmp(name) == Less && name.canonical_cmp(next) == Less,
        // Last interval of the zone, or a single-record chain covering
        // everything but the owner itself.
        Greater => owner.canonical_cmp(name) == Less || name.canonical_cmp(next) == Less,
        Equal => name != owner,
    }
}

/// Hash-space coverage with the same wrap rule.
fn hash_covered(owner: &[u8], next: &[u8], target: &[u8]) -> bool {
    if owner < next {
        owner < target && target < next
    } else if owner > next {
        target > owner || target < next
    } else {
        target != owner
    }
}

/// The iterated SHA-1 of RFC 5155 §5 over the canonical owner name.
pub fn nsec3_hash(name: &Name, salt: &[u8], iterations: u16) -> Result<Vec<u8>> {
    if iterations > MAX_NSEC3_ITERATIONS {
        return Err(DnssecError::ExcessiveIterations(iterations));
    }
    let mut input = name.to_canonical_wire();
    input.extend_from_slice(salt);
    let mut hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &input);
    for _ in 0..iterations {
        let mut next = hash.as_ref().to_vec();
        next.extend_from_slice(salt);
        hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &next);
    }
    Ok(hash.as_ref().to_vec())
}

/// Base32hex presentation of an NSEC3 hash, as used in owner labels.
pub fn nsec3_hash_label(hash: &[u8]) -> String {
    base32::encode(Alphabet::Rfc4648HexLower { padding: false }, hash)
}

/// Recover the raw hash from an NSEC3 owner's first label.
fn nsec3_owner_hash(owner: &Name) -> Option<Vec<u8>> {
    let label = owner.labels().first()?;
    base32::decode(
        Alphabet::Rfc4648HexLower { padding: false },
        &label.to_ascii_lowercase(),
    )
}
