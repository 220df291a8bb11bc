use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::algorithm::Algorithm;
use super::denial::{DenialRecords, DsAbsence};
use super::digest::DigestType;
use super::errors::{DnssecError, Result};
use super::key_tag::key_tag;
use super::trust_anchor::TrustAnchorSet;
use crate::dns::enums::RecordType;
use crate::dns::rdata::{Dnskey, Ds, Rdata, Rrsig};
use crate::dns::{Name, Record, RrSet};

/// Result of a supporting DNSKEY/DS fetch issued by the validator.
#[derive(Debug, Clone)]
pub enum Fetched {
    /// The rrset exists: answer-section records including their RRSIGs.
    Records(Vec<Record>),
    /// The rrset does not exist: the authority section as received
    /// (SOA, NSEC/NSEC3 and their RRSIGs).
    Absent(Vec<Record>),
}

/// The validator's narrow view of the resolver: fetch one rrset, chasing
/// referrals but performing no validation of its own.
#[async_trait]
pub trait SupportFetch: Send + Sync {
    async fn fetch(&self, name: Name, rtype: RecordType)
    -> std::result::Result<Fetched, String>;
}

/// A validated DNSKEY rrset together with the zone that owns it.
#[derive(Debug, Clone)]
pub struct ZoneKeys {
    pub zone: Name,
    pub keys: Vec<Dnskey>,
}

/// How the walk from a trust anchor toward a zone ended.
#[derive(Debug, Clone)]
pub enum ChainOutcome {
    /// Reached the zone; these keys may verify its signatures.
    Secure(ZoneKeys),
    /// A delegation along the path is provably unsigned.
    Insecure { cut: Name },
    Bogus(String),
    /// No configured anchor covers the zone.
    Indeterminate,
}

/// Walks DS → DNSKEY links from the nearest covering trust anchor down to
/// a signer zone, validating every rrset it consumes along the way.
pub struct ChainBuilder<'a> {
    pub fetch: &'a dyn SupportFetch,
    pub anchors: &'a TrustAnchorSet,
    pub now: u32,
}

impl ChainBuilder<'_> {
    pub async fn authenticate(&self, signer: &Name) -> ChainOutcome {
        let Some((anchor_zone, anchors)) = self.anchors.covering(signer) else {
            return ChainOutcome::Indeterminate;
        };
        trace!("anchoring chain for {} at {}", signer, anchor_zone);

        // Bootstrap: the anchor zone's DNSKEY rrset must be introduced by
        // one of the configured anchors and self-signed by that key.
        let apex_keys = match self.fetch_dnskeys(&anchor_zone).await {
            Ok(set) => set,
            Err(e) => return ChainOutcome::Bogus(e.to_string()),
        };
        let entry_key = apex_keys.iter().find_map(|r| match &r.rdata {
            Rdata::DNSKEY(key) if anchors.iter().any(|a| a.matches(&anchor_zone, key)) => {
                Some(key.clone())
            }
            _ => None,
        });
        let Some(entry_key) = entry_key else {
            return ChainOutcome::Bogus(format!(
                "no DNSKEY of {} matches a configured trust anchor",
                anchor_zone
            ));
        };
        let mut zone_keys = match self
            .verify_dnskey_set(&anchor_zone, apex_keys, &entry_key)
            .await
        {
            Ok(keys) => keys,
            Err(e) => return ChainOutcome::Bogus(e.to_string()),
        };

        // Descend one label at a time; keys only change where a signed
        // delegation (DS) is crossed.
        let mut cursor = anchor_zone;
        while cursor != *signer {
            let depth = cursor.label_count();
            let labels = signer.labels();
            let child = Name::from_labels(labels[labels.len() - depth - 1..].to_vec());

            match self.cross_cut(&zone_keys, &child).await {
                Ok(Some(child_keys)) => zone_keys = child_keys,
                Ok(None) => {} // not a delegation point; same zone continues
                Err(DnssecError::MissingDs) => {
                    debug!("provably insecure delegation at {}", child);
                    return ChainOutcome::Insecure { cut: child };
                }
                Err(e) => return ChainOutcome::Bogus(e.to_string()),
            }
            cursor = child;
        }

        ChainOutcome::Secure(zone_keys)
    }

    /// Handle the DS lookup at `child`. `Ok(Some)` crosses into the child
    /// zone, `Ok(None)` stays in the parent, `Err(MissingDs)` is the
    /// proven-insecure signal.
    async fn cross_cut(&self, parent: &ZoneKeys, child: &Name) -> Result<Option<ZoneKeys>> {
        let fetched = self
            .fetch
            .fetch(child.clone(), RecordType::DS)
            .await
            .map_err(DnssecError::FetchFailed)?;

        match fetched {
            Fetched::Records(records) => {
                let (ds_set, sigs) = split_rrset(&records, child, RecordType::DS)?;
                verify_rrset(&ds_set, &sigs, parent, self.now)?;
                let ds_records: Vec<Ds> = ds_set
                    .records()
                    .iter()
                    .filter_map(|r| match &r.rdata {
                        Rdata::DS(ds) => Some(ds.clone()),
                        _ => None,
                    })
                    .collect();

                let child_keys = self.fetch_dnskeys(child).await?;
                let entry_key = select_ksk(child, &child_keys, &ds_records)?;
                let validated = self.verify_dnskey_set(child, child_keys, &entry_key).await?;
                Ok(Some(validated))
            }
            Fetched::Absent(authority) => {
                // The absence itself must be signed by the parent zone.
                verify_denial_sets(&authority, parent, self.now)?;
                let denial = DenialRecords::collect(&authority);
                match denial.classify_ds_absence(child)? {
                    DsAbsence::InsecureDelegation => Err(DnssecError::MissingDs),
                    DsAbsence::NotDelegation => Ok(None),
                }
            }
        }
    }

    async fn fetch_dnskeys(&self, zone: &Name) -> Result<Vec<Record>> {
        match self
            .fetch
            .fetch(zone.clone(), RecordType::DNSKEY)
            .await
            .map_err(DnssecError::FetchFailed)?
        {
            Fetched::Records(records) => Ok(records),
            Fetched::Absent(_) => Err(DnssecError::MissingDnskey),
        }
    }

    /// Verify a DNSKEY rrset with the entry key (anchor- or DS-matched
    /// KSK) and return the full validated set.
    async fn verify_dnskey_set(
        &self,
        zone: &Name,
        records: Vec<Record>,
        entry_key: &Dnskey,
    ) -> Result<ZoneKeys> {
        let (key_set, sigs) = split_rrset(&records, zone, RecordType::DNSKEY)?;
        let entry = ZoneKeys {
            zone: zone.clone(),
            keys: vec![entry_key.clone()],
        };
        verify_rrset(&key_set, &sigs, &entry, self.now)?;

        let keys = key_set
            .records()
            .iter()
            .filter_map(|r| match &r.rdata {
                Rdata::DNSKEY(key) => Some(key.clone()),
                _ => None,
            })
            .collect();
        debug!("validated DNSKEY rrset for {}", zone);
        Ok(ZoneKeys { zone: zone.clone(), keys })
    }

}

/// Every NSEC/NSEC3 rrset backing a denial must itself verify.
pub(crate) fn verify_denial_sets(authority: &[Record], keys: &ZoneKeys, now: u32) -> Result<()> {
    let mut checked = 0usize;
    for set in RrSet::group(authority) {
        if !matches!(set.rtype, RecordType::NSEC | RecordType::NSEC3) {
            continue;
        }
        let sigs = covering_sigs(authority, &set.name, set.rtype);
        verify_rrset(&set, &sigs, keys, now)?;
        checked += 1;
    }
    if checked == 0 {
        return Err(DnssecError::DenialNotProven);
    }
    Ok(())
}

/// Pick the child DNSKEY introduced by the strongest matching DS.
fn select_ksk(zone: &Name, key_records: &[Record], ds_records: &[Ds]) -> Result<Dnskey> {
    let mut usable: Vec<&Ds> = ds_records
        .iter()
        .filter(|ds| {
            Algorithm::from_u8(ds.algorithm).is_supported()
                && DigestType::from_u8(ds.digest_type).is_supported()
        })
        .collect();
    if usable.is_empty() {
        return Err(DnssecError::UnsupportedAlgorithm(
            ds_records.first().map(|ds| ds.algorithm).unwrap_or(0),
        ));
    }
    // RFC 4509 §3: a stronger supported digest supersedes weaker ones.
    let best_rank = usable
        .iter()
        .map(|ds| DigestType::from_u8(ds.digest_type).rank())
        .max()
        .unwrap_or(0);
    usable.retain(|ds| DigestType::from_u8(ds.digest_type).rank() == best_rank);

    for ds in usable {
        for record in key_records {
            let Rdata::DNSKEY(key) = &record.rdata else {
                continue;
            };
            if key_tag(key) != ds.key_tag || key.algorithm != ds.algorithm {
                continue;
            }
            let mut image = zone.to_canonical_wire();
            image.extend_from_slice(&key.rdata_wire());
            let digest = DigestType::from_u8(ds.digest_type)
                .hash(&image)
                .ok_or(DnssecError::UnsupportedDigest(ds.digest_type))?;
            if digest == ds.digest {
                return Ok(key.clone());
            }
        }
    }
    Err(DnssecError::DigestMismatch)
}

/// Split `records` into the rrset `(owner, rtype)` and the RRSIGs covering
/// it.
pub(crate) fn split_rrset(
    records: &[Record],
    owner: &Name,
    rtype: RecordType,
) -> Result<(RrSet, Vec<Rrsig>)> {
    let mut set = RrSet::new(owner.clone(), rtype, crate::dns::enums::RecordClass::IN);
    for record in records {
        if record.rtype() == rtype && record.name == *owner {
            set.push(record.clone());
        }
    }
    if set.is_empty() {
        return Err(DnssecError::Malformed("expected rrset missing"));
    }
    Ok((set, covering_sigs(records, owner, rtype)))
}

/// RRSIGs in `records` that cover `(owner, rtype)`.
pub(crate) fn covering_sigs(records: &[Record], owner: &Name, rtype: RecordType) -> Vec<Rrsig> {
    records
        .iter()
        .filter(|r| r.name == *owner)
        .filter_map(|r| match &r.rdata {
            Rdata::RRSIG(sig) if sig.type_covered == rtype => Some(sig.clone()),
            _ => None,
        })
        .collect()
}

/// Verify one rrset against a validated key set (RFC 4035 §5.3).
///
/// Signatures by unsupported algorithms are skipped, not fatal; any one
/// verifying signature makes the set good. Key-tag collisions are handled
/// by trying every matching key.
pub(crate) fn verify_rrset(
    rrset: &RrSet,
    sigs: &[Rrsig],
    keys: &ZoneKeys,
    now: u32,
) -> Result<()> {
    if sigs.is_empty() {
        return Err(DnssecError::MissingRrsig);
    }

    let mut last_err = DnssecError::MissingDnskey;
    for sig in sigs {
        if sig.signer_name != keys.zone {
            trace!(
                "RRSIG signer {} does not match key owner {}",
                sig.signer_name, keys.zone
            );
            continue;
        }
        if now < sig.inception {
            last_err = DnssecError::SignatureNotYetValid;
            continue;
        }
        if now > sig.expiration {
            last_err = DnssecError::SignatureExpired;
            continue;
        }
        let algorithm = Algorithm::from_u8(sig.algorithm);
        if !algorithm.is_supported() {
            last_err = DnssecError::UnsupportedAlgorithm(sig.algorithm);
            continue;
        }

        let signed = signed_data(rrset, sig);
        for key in &keys.keys {
            if key_tag(key) != sig.key_tag
                || key.algorithm != sig.algorithm
                || !key.is_zone_key()
                || key.is_revoked()
            {
                continue;
            }
            if algorithm.verify(&key.public_key, &signed, &sig.signature) {
                trace!("verified {} with key tag {}", rrset, sig.key_tag);
                return Ok(());
            }
            last_err = DnssecError::VerifyFailed;
        }
    }

    warn!("no signature over {} verified: {}", rrset, last_err);
    Err(last_err)
}

/// The exact byte string a signature covers (RFC 4034 §3.1.8.1): the
/// RRSIG RDATA prefix, then each record in canonical order with the
/// original TTL and, for wildcard expansions, the synthesis source as
/// owner.
pub(crate) fn signed_data(rrset: &RrSet, sig: &Rrsig) -> Vec<u8> {
    let mut data = sig.signed_prefix();
    let owner = signature_owner(&rrset.name, sig.labels);
    for record in rrset.canonically_ordered() {
        let mut stand_in = record.clone();
        stand_in.name = owner.clone();
        stand_in.write_canonical(sig.original_ttl, &mut data);
    }
    data
}

/// Owner name as counted by the RRSIG labels field: the wildcard source
/// when the answer was synthesized (RFC 4035 §5.3.2).
fn signature_owner(owner: &Name, sig_labels: u8) -> Name {
    let count = owner.label_count();
    if (sig_labels as usize) >= count {
        return owner.clone();
    }
    let tail = Name::from_labels(owner.labels()[count - sig_labels as usize..].to_vec());
    tail.prepend("*")
}
