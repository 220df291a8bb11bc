use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace, warn};

use super::chain::{
    ChainBuilder, ChainOutcome, SupportFetch, covering_sigs, verify_denial_sets, verify_rrset,
};
use super::denial::DenialRecords;
use super::trust_anchor::TrustAnchorSet;
use super::ValidationVerdict;
use crate::dns::enums::RecordType;
use crate::dns::rdata::Rdata;
use crate::dns::{Name, Question, Record, RrSet};

/// The flavor of negative answer being proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    /// The name does not exist at all.
    NameError,
    /// The name exists without the queried type.
    NoData,
}

/// Validates responses against the configured trust anchors, fetching
/// supporting DNSKEY/DS rrsets through the resolver it is handed.
pub struct DnssecValidator {
    anchors: Arc<TrustAnchorSet>,
    /// Fixed validation time, for tests; wall clock otherwise.
    current_time: Option<u32>,
}

impl DnssecValidator {
    pub fn new(anchors: Arc<TrustAnchorSet>) -> Self {
        Self { anchors, current_time: None }
    }

    /// Pin the validation clock. Validity windows compare against this.
    pub fn set_current_time(&mut self, time: u32) {
        self.current_time = Some(time);
    }

    pub fn anchors(&self) -> &Arc<TrustAnchorSet> {
        &self.anchors
    }

    fn now(&self) -> u32 {
        self.current_time.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0)
        })
    }

    /// Validate a positive answer: every answer rrset must carry a
    /// signature chaining to a trust anchor, and wildcard expansions must
    /// prove the absence of a closer match.
    pub async fn validate_answer(
        &self,
        fetch: &dyn SupportFetch,
        question: &Question,
        answer: &[Record],
        authority: &[Record],
    ) -> ValidationVerdict {
        debug!("validating answer for {}", question);
        let has_sigs = answer
            .iter()
            .chain(authority)
            .any(|r| matches!(r.rdata, Rdata::RRSIG(_)));
        if !has_sigs {
            return self.classify_unsigned(fetch, &question.name).await;
        }

        let builder = ChainBuilder {
            fetch,
            anchors: &self.anchors,
            now: self.now(),
        };
        let mut chains: HashMap<String, ChainOutcome> = HashMap::new();
        let mut saw_insecure = false;
        let mut saw_indeterminate = false;

        for rrset in RrSet::group(answer) {
            if rrset.rtype == RecordType::RRSIG {
                continue;
            }
            let sigs = covering_sigs(answer, &rrset.name, rrset.rtype);
            if sigs.is_empty() {
                return ValidationVerdict::Bogus(format!("{} has no covering RRSIG", rrset));
            }

            let mut verified = false;
            let mut failure = String::new();
            for sig in &sigs {
                let signer_key = sig.signer_name.key();
                if !chains.contains_key(&signer_key) {
                    let outcome = builder.authenticate(&sig.signer_name).await;
                    chains.insert(signer_key.clone(), outcome);
                }
                match &chains[&signer_key] {
                    ChainOutcome::Secure(keys) => {
                        match verify_rrset(&rrset, std::slice::from_ref(sig), keys, self.now()) {
                            Ok(()) => {
                                if (sig.labels as usize) < rrset.name.label_count() {
                                    let denial = DenialRecords::collect(authority);
                                    if let Err(e) = verify_denial_sets(authority, keys, self.now())
                                        .and_then(|_| {
                                            denial.prove_wildcard_expansion(
                                                &rrset.name,
                                                sig.labels,
                                            )
                                        })
                                    {
                                        return ValidationVerdict::Bogus(format!(
                                            "wildcard expansion of {} unproven: {}",
                                            rrset.name, e
                                        ));
                                    }
                                }
                                verified = true;
                                break;
                            }
                            Err(e) => failure = e.to_string(),
                        }
                    }
                    ChainOutcome::Insecure { cut } => {
                        trace!("{} sits below insecure cut {}", rrset.name, cut);
                        saw_insecure = true;
                        verified = true;
                        break;
                    }
                    ChainOutcome::Indeterminate => {
                        saw_indeterminate = true;
                        verified = true;
                        break;
                    }
                    ChainOutcome::Bogus(reason) => failure = reason.clone(),
                }
            }
            if !verified {
                warn!("validation failed for {}: {}", rrset, failure);
                return ValidationVerdict::Bogus(failure);
            }
        }

        if saw_indeterminate {
            ValidationVerdict::Indeterminate
        } else if saw_insecure {
            ValidationVerdict::Insecure
        } else {
            ValidationVerdict::Secure
        }
    }

    /// Validate a negative answer: the SOA and denial rrsets must verify
    /// and the NSEC/NSEC3 material must actually prove the denial.
    pub async fn validate_negative(
        &self,
        fetch: &dyn SupportFetch,
        question: &Question,
        kind: DenialKind,
        authority: &[Record],
    ) -> ValidationVerdict {
        debug!("validating {:?} for {}", kind, question);
        let has_sigs = authority.iter().any(|r| matches!(r.rdata, Rdata::RRSIG(_)));
        if !has_sigs {
            return self.classify_unsigned(fetch, &question.name).await;
        }

        let Some(soa) = authority.iter().find(|r| r.rtype() == RecordType::SOA) else {
            return ValidationVerdict::Bogus("negative answer without SOA".to_string());
        };
        let soa_sigs = covering_sigs(authority, &soa.name, RecordType::SOA);
        let Some(signer) = soa_sigs.first().map(|s| s.signer_name.clone()) else {
            return ValidationVerdict::Bogus("SOA has no covering RRSIG".to_string());
        };

        let builder = ChainBuilder {
            fetch,
            anchors: &self.anchors,
            now: self.now(),
        };
        let keys = match builder.authenticate(&signer).await {
            ChainOutcome::Secure(keys) => keys,
            ChainOutcome::Insecure { .. } => return ValidationVerdict::Insecure,
            ChainOutcome::Indeterminate => return ValidationVerdict::Indeterminate,
            ChainOutcome::Bogus(reason) => return ValidationVerdict::Bogus(reason),
        };

        let soa_set = {
            let mut set = RrSet::new(soa.name.clone(), RecordType::SOA, soa.class);
            set.push(soa.clone());
            set
        };
        if let Err(e) = verify_rrset(&soa_set, &soa_sigs, &keys, self.now()) {
            return ValidationVerdict::Bogus(format!("SOA verification failed: {}", e));
        }
        if let Err(e) = verify_denial_sets(authority, &keys, self.now()) {
            return ValidationVerdict::Bogus(format!("denial rrset verification failed: {}", e));
        }

        let denial = DenialRecords::collect(authority);
        let proven = match kind {
            DenialKind::NameError => denial.prove_name_error(&question.name),
            DenialKind::NoData => denial.prove_no_data(&question.name, question.qtype),
        };
        match proven {
            Ok(()) => ValidationVerdict::Secure,
            Err(e) => ValidationVerdict::Bogus(format!("denial not proven: {}", e)),
        }
    }

    /// An unsigned response is only acceptable when the chain from the
    /// covering anchor provably breaks above the name.
    async fn classify_unsigned(&self, fetch: &dyn SupportFetch, name: &Name) -> ValidationVerdict {
        if self.anchors.covering(name).is_none() {
            return ValidationVerdict::Indeterminate;
        }
        let builder = ChainBuilder {
            fetch,
            anchors: &self.anchors,
            now: self.now(),
        };
        match builder.authenticate(name).await {
            ChainOutcome::Insecure { cut } => {
                debug!("{} is below the insecure cut {}", name, cut);
                ValidationVerdict::Insecure
            }
            ChainOutcome::Secure(_) => ValidationVerdict::Bogus(format!(
                "{} is in a signed zone but the answer carries no signatures",
                name
            )),
            ChainOutcome::Indeterminate => ValidationVerdict::Indeterminate,
            ChainOutcome::Bogus(reason) => ValidationVerdict::Bogus(reason),
        }
    }
}
