use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, trace, warn};

use super::Recursor;
use super::context::QueryContext;
use crate::cache::{CacheKey, NegativeEntry, NegativeKind};
use crate::dns::enums::{RecordClass, RecordType, ResponseCode};
use crate::dns::rdata::Rdata;
use crate::dns::{Message, Name, Question, Record, RrSet};
use crate::dnssec::ValidationVerdict;
use crate::error::{ResolveError, Result};
use crate::transport::DispatchOptions;

/// Longest alias chain assembled purely from cache.
const MAX_CACHED_ALIAS_HOPS: usize = 12;

/// Cap on distinct endpoints tried for one zone in one pass.
const MAX_SERVERS_PER_ZONE: usize = 6;

/// Terminal states of the referral walk.
#[derive(Debug)]
pub(crate) enum IterationOutcome {
    /// The question was answered; `records` holds the full alias chain,
    /// the final rrset and their RRSIGs.
    Answer {
        records: Vec<Record>,
        authority: Vec<Record>,
    },
    NxDomain {
        authority: Vec<Record>,
    },
    NoData {
        authority: Vec<Record>,
    },
}

enum Classified {
    Answer {
        records: Vec<Record>,
        authority: Vec<Record>,
    },
    /// The chain continues at `target`, which this response did not cover.
    Alias {
        target: Name,
        records: Vec<Record>,
    },
    Referral {
        zone: Name,
    },
    NxDomain {
        authority: Vec<Record>,
    },
    NoData {
        authority: Vec<Record>,
    },
}

impl Recursor {
    /// Resolve one question: negative cache, then positive cache, then the
    /// network. This is the entry point shared by the public resolve path,
    /// name-server address resolution and the validator's supporting
    /// fetches, so it returns a boxed future to allow the recursion.
    pub(crate) fn lookup<'a>(
        &'a self,
        ctx: &'a QueryContext,
        question: Question,
    ) -> BoxFuture<'a, Result<IterationOutcome>> {
        async move {
            ctx.check_deadline()?;

            let key = CacheKey::new(&question.name, question.qtype, question.qclass);
            if let Some(negative) = self.cache.get_negative(&key) {
                trace!("negative cache hit for {}", key);
                return match negative.kind {
                    NegativeKind::NxDomain => Ok(IterationOutcome::NxDomain {
                        authority: negative.proof,
                    }),
                    NegativeKind::NoData => Ok(IterationOutcome::NoData {
                        authority: negative.proof,
                    }),
                    NegativeKind::Bogus(reason) => Err(ResolveError::Bogus(reason)),
                };
            }
            if let Some((records, _)) = self.answer_from_cache(&question) {
                trace!("cache hit for {}", key);
                return Ok(IterationOutcome::Answer {
                    records,
                    authority: Vec::new(),
                });
            }

            self.iterate(ctx, question).await
        }
        .boxed()
    }

    /// Assemble an answer purely from cached rrsets, following cached
    /// CNAMEs and picking up cached RRSIGs. Returns the records and the
    /// weakest verdict along the chain.
    pub(crate) fn answer_from_cache(
        &self,
        question: &Question,
    ) -> Option<(Vec<Record>, ValidationVerdict)> {
        let mut chain = Vec::new();
        let mut verdict = ValidationVerdict::Secure;
        let mut cursor = question.name.clone();

        for _ in 0..MAX_CACHED_ALIAS_HOPS {
            let key = CacheKey::new(&cursor, question.qtype, question.qclass);
            if let Some((records, entry_verdict)) = self.cache.get(&key) {
                chain.extend(records);
                chain.extend(self.cached_sigs(&cursor, question.qtype, question.qclass));
                return Some((chain, verdict.meet(entry_verdict)));
            }
            if question.qtype == RecordType::CNAME {
                return None;
            }
            let alias_key = CacheKey::new(&cursor, RecordType::CNAME, question.qclass);
            let (aliases, alias_verdict) = self.cache.get(&alias_key)?;
            let target = aliases.iter().find_map(|r| match &r.rdata {
                Rdata::CNAME(target) => Some(target.clone()),
                _ => None,
            })?;
            chain.extend(self.cached_sigs(&cursor, RecordType::CNAME, question.qclass));
            chain.extend(aliases);
            verdict = verdict.meet(alias_verdict);
            cursor = target;
        }
        None
    }

    /// Cached RRSIGs at `owner` covering `rtype`.
    fn cached_sigs(&self, owner: &Name, rtype: RecordType, class: RecordClass) -> Vec<Record> {
        let key = CacheKey::new(owner, RecordType::RRSIG, class);
        match self.cache.get(&key) {
            Some((sigs, _)) => sigs
                .into_iter()
                .filter(|r| matches!(&r.rdata, Rdata::RRSIG(sig) if sig.type_covered == rtype))
                .collect(),
            None => Vec::new(),
        }
    }

    /// The iterative referral walk: pick the deepest known zone cut, query
    /// its servers, and classify until a terminal state is reached.
    async fn iterate(&self, ctx: &QueryContext, question: Question) -> Result<IterationOutcome> {
        let mut chain: Vec<Record> = Vec::new();
        let mut current = question.clone();

        loop {
            ctx.check_deadline()?;

            let (zone, servers) = self.zone_servers(ctx, &current).await?;
            debug!("querying zone {} for {}", zone, current);
            let response = self.query_zone(ctx, &zone, servers, &current).await?;

            match self.classify(ctx, &zone, &current, response)? {
                Classified::Answer { mut records, authority } => {
                    chain.append(&mut records);
                    return Ok(IterationOutcome::Answer { records: chain, authority });
                }
                Classified::Alias { target, mut records } => {
                    ctx.enter_alias(&target)?;
                    ctx.consume_depth()?;
                    self.cache_rrsets(&records, ValidationVerdict::Unsigned);
                    chain.append(&mut records);
                    current = Question::new(target, question.qtype, question.qclass);
                }
                Classified::Referral { zone: child } => {
                    ctx.consume_depth()?;
                    trace!("descending to zone cut {}", child);
                }
                Classified::NxDomain { authority } => {
                    self.cache_negative(
                        &current,
                        NegativeKind::NxDomain,
                        &authority,
                        ValidationVerdict::Unsigned,
                    );
                    return Ok(IterationOutcome::NxDomain { authority });
                }
                Classified::NoData { authority } => {
                    self.cache_negative(
                        &current,
                        NegativeKind::NoData,
                        &authority,
                        ValidationVerdict::Unsigned,
                    );
                    return Ok(IterationOutcome::NoData { authority });
                }
            }
        }
    }

    /// Deepest zone cut known for the question, with server addresses.
    /// DS questions are steered at the parent side of their cut, because
    /// DS lives in the parent zone.
    async fn zone_servers(
        &self,
        ctx: &QueryContext,
        question: &Question,
    ) -> Result<(Name, Vec<SocketAddr>)> {
        let base = if question.qtype == RecordType::DS {
            question.name.parent().unwrap_or_else(Name::root)
        } else {
            question.name.clone()
        };

        let mut zone = Some(base);
        while let Some(cut) = zone {
            let key = CacheKey::new(&cut, RecordType::NS, question.qclass);
            if let Some((ns_records, _)) = self.cache.get(&key) {
                let addrs = self.server_addresses(ctx, &cut, &ns_records).await?;
                if !addrs.is_empty() {
                    return Ok((cut, self.order_candidates(addrs)));
                }
                debug!("no usable addresses for cached cut {}, walking up", cut);
            }
            zone = cut.parent();
        }

        Ok((Name::root(), self.order_candidates(self.config.root_hints.clone())))
    }

    /// Addresses for a zone's name servers: glue and cached addresses
    /// first (longest remaining TTL first), recursive resolution as a
    /// last resort, and never for in-bailiwick servers without glue.
    async fn server_addresses(
        &self,
        ctx: &QueryContext,
        zone: &Name,
        ns_records: &[Record],
    ) -> Result<Vec<SocketAddr>> {
        let mut cached: Vec<(SocketAddr, Duration)> = Vec::new();
        let mut uncached: Vec<Name> = Vec::new();

        for record in ns_records {
            let Rdata::NS(host) = &record.rdata else {
                continue;
            };
            let mut found = false;
            for rtype in [RecordType::A, RecordType::AAAA] {
                let key = CacheKey::new(host, rtype, record.class);
                let Some((addresses, _)) = self.cache.get(&key) else {
                    continue;
                };
                let ttl = self.cache.remaining_ttl(&key).unwrap_or_default();
                for address in addresses {
                    if let Some(ip) = address_of(&address.rdata) {
                        cached.push((SocketAddr::new(ip, 53), ttl));
                        found = true;
                    }
                }
            }
            if !found {
                if zone.zone_of(host) {
                    trace!("skipping in-bailiwick server {} without glue", host);
                } else {
                    uncached.push(host.clone());
                }
            }
        }

        cached.sort_by(|a, b| b.1.cmp(&a.1));
        let mut addrs: Vec<SocketAddr> = cached.into_iter().map(|(addr, _)| addr).collect();

        if addrs.is_empty() {
            // Resolve a couple of server names recursively; each costs a
            // hop from the shared budget.
            for host in uncached.into_iter().take(2) {
                ctx.consume_depth()?;
                match self
                    .lookup(ctx, Question::new(host.clone(), RecordType::A, RecordClass::IN))
                    .await
                {
                    Ok(IterationOutcome::Answer { records, .. }) => {
                        self.cache_rrsets(&records, ValidationVerdict::Unsigned);
                        addrs.extend(
                            records
                                .iter()
                                .filter_map(|r| address_of(&r.rdata))
                                .map(|ip| SocketAddr::new(ip, 53)),
                        );
                    }
                    Ok(_) => trace!("no address for server {}", host),
                    Err(e) => debug!("resolving server {} failed: {}", host, e),
                }
                if !addrs.is_empty() {
                    break;
                }
            }
        }

        addrs.dedup();
        Ok(addrs)
    }

    /// Order candidates: endpoints in backoff go last, and the head of the
    /// healthy span rotates per call so load spreads across equals.
    fn order_candidates(&self, mut addrs: Vec<SocketAddr>) -> Vec<SocketAddr> {
        use std::sync::atomic::Ordering;
        addrs.sort_by_key(|addr| !self.quality(*addr).is_usable());
        let healthy = addrs.partition_point(|addr| self.quality(*addr).is_usable());
        if healthy > 1 {
            let turn = self.rotation.fetch_add(1, Ordering::Relaxed) % healthy;
            addrs[..healthy].rotate_left(turn);
        }
        addrs
    }

    /// Query the zone's servers with bounded fan-out, first well-formed
    /// response wins. SERVFAIL-class answers count as server failures.
    async fn query_zone(
        &self,
        ctx: &QueryContext,
        zone: &Name,
        servers: Vec<SocketAddr>,
        question: &Question,
    ) -> Result<Message> {
        let options = DispatchOptions {
            udp_payload_size: self.config.udp_payload_size,
            dnssec_ok: self.config.validation_enabled || ctx.require_dnssec,
            timeout: self.config.server_timeout.min(ctx.remaining()),
            max_retries: self.config.max_retries,
            case_randomization: self.config.case_randomization,
        };

        let candidates: Vec<SocketAddr> = servers
            .into_iter()
            .filter(|&server| ctx.mark_server(server, &question.name, question.qtype))
            .take(MAX_SERVERS_PER_ZONE)
            .collect();
        if candidates.is_empty() {
            return Err(ResolveError::ServerFailure(format!(
                "no unvisited servers for zone {}",
                zone
            )));
        }

        let mut last = ResolveError::ServerFailure(format!("no servers for zone {}", zone));
        for batch in candidates.chunks(self.config.query_fanout.max(1)) {
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|&server| {
                    let options = options.clone();
                    async move { (server, self.dispatcher.query(server, question, &options).await) }
                })
                .collect();

            while let Some((server, result)) = in_flight.next().await {
                match result {
                    Ok(response) => {
                        let rcode = response.response_code();
                        if matches!(
                            rcode,
                            ResponseCode::ServFail
                                | ResponseCode::Refused
                                | ResponseCode::NotImp
                                | ResponseCode::FormErr
                        ) {
                            debug!("{} answered {} for {}", server, rcode, question);
                            self.quality(server).record_failure();
                            last = ResolveError::ServerFailure(format!(
                                "{} answered {}",
                                server, rcode
                            ));
                            continue;
                        }
                        self.quality(server).record_success();
                        return Ok(response);
                    }
                    Err(e) => {
                        debug!("query to {} failed: {}", server, e);
                        self.quality(server).record_failure();
                        last = e.into();
                    }
                }
            }
        }
        warn!("all servers for zone {} failed", zone);
        Err(last)
    }

    /// Decide what a response means for the current question, following
    /// any alias chain present inside the response itself and caching
    /// referral NS/glue as a side effect.
    fn classify(
        &self,
        ctx: &QueryContext,
        zone: &Name,
        question: &Question,
        response: Message,
    ) -> Result<Classified> {
        if response.response_code() == ResponseCode::NXDomain {
            return Ok(Classified::NxDomain {
                authority: response.authorities,
            });
        }

        let mut collected: Vec<Record> = Vec::new();
        let mut cursor = question.name.clone();

        loop {
            // Direct hit at the cursor?
            let direct: Vec<Record> = response
                .answers
                .iter()
                .filter(|r| {
                    r.name == cursor
                        && (r.rtype() == question.qtype
                            || (question.qtype == RecordType::ANY && r.rtype() != RecordType::RRSIG))
                })
                .cloned()
                .collect();
            if !direct.is_empty() {
                collected.extend(direct);
                collected.extend(sigs_in(&response.answers, &cursor, question.qtype));
                return Ok(Classified::Answer {
                    records: collected,
                    authority: response.authorities,
                });
            }

            // CNAME at the cursor?
            if question.qtype != RecordType::CNAME {
                let cnames: Vec<Record> = response
                    .answers
                    .iter()
                    .filter(|r| r.name == cursor && r.rtype() == RecordType::CNAME)
                    .cloned()
                    .collect();
                if let Some(target) = cnames.iter().find_map(|r| match &r.rdata {
                    Rdata::CNAME(target) => Some(target.clone()),
                    _ => None,
                }) {
                    collected.extend(sigs_in(&response.answers, &cursor, RecordType::CNAME));
                    collected.extend(cnames);
                    // Does this same response continue the chain?
                    let continues = response
                        .answers
                        .iter()
                        .any(|r| r.name == target && r.rtype() != RecordType::RRSIG);
                    if continues {
                        ctx.enter_alias(&target)?;
                        ctx.consume_depth()?;
                        cursor = target;
                        continue;
                    }
                    return Ok(Classified::Alias { target, records: collected });
                }

                // DNAME above the cursor?
                let dname = response.answers.iter().find_map(|r| match &r.rdata {
                    Rdata::DNAME(target) if r.name.zone_of(&cursor) && r.name != cursor => {
                        Some((r.clone(), target.clone()))
                    }
                    _ => None,
                });
                if let Some((record, target_zone)) = dname {
                    let Some(target) = cursor.rebase(&record.name, &target_zone) else {
                        return Err(ResolveError::ServerFailure(
                            "DNAME substitution does not apply to the query name".to_string(),
                        ));
                    };
                    collected.extend(sigs_in(&response.answers, &record.name, RecordType::DNAME));
                    collected.push(record);
                    return Ok(Classified::Alias { target, records: collected });
                }
            }

            break;
        }

        // No usable answer records: referral, NoData, or a lame response.
        let ns_sets: Vec<RrSet> = RrSet::group(&response.authorities)
            .into_iter()
            .filter(|s| s.rtype == RecordType::NS)
            .collect();
        if let Some(delegation) = ns_sets
            .iter()
            .find(|s| s.name.zone_of(&cursor) && s.name.label_count() > zone.label_count())
        {
            self.cache_referral(delegation, &response.additionals);
            return Ok(Classified::Referral {
                zone: delegation.name.clone(),
            });
        }

        if response
            .authorities
            .iter()
            .any(|r| r.rtype() == RecordType::SOA)
        {
            return Ok(Classified::NoData {
                authority: response.authorities,
            });
        }

        Err(ResolveError::ServerFailure(format!(
            "unclassifiable response from zone {} for {}",
            zone, question
        )))
    }

    /// Cache a delegation: the NS rrset under the child zone and any glue
    /// addresses that sit inside it.
    fn cache_referral(&self, delegation: &RrSet, additionals: &[Record]) {
        let ttl = delegation.min_ttl();
        self.cache.insert(
            CacheKey::new(&delegation.name, RecordType::NS, delegation.class),
            delegation.records().to_vec(),
            ValidationVerdict::Unsigned,
            ttl,
        );
        for glue in RrSet::group(additionals) {
            if !glue.rtype.is_address() || !delegation.name.zone_of(&glue.name) {
                continue;
            }
            let ttl = glue.min_ttl();
            self.cache.insert(
                CacheKey::new(&glue.name, glue.rtype, glue.class),
                glue.into_records(),
                ValidationVerdict::Unsigned,
                ttl,
            );
        }
    }

    /// Cache every rrset in `records` under its own key, RRSIGs included
    /// (they live under the RRSIG key of their owner).
    pub(crate) fn cache_rrsets(&self, records: &[Record], verdict: ValidationVerdict) {
        for set in RrSet::group(records) {
            let ttl = set.min_ttl();
            let verdict = if set.rtype == RecordType::RRSIG {
                ValidationVerdict::Unsigned
            } else {
                verdict.clone()
            };
            self.cache.insert(
                CacheKey::new(&set.name, set.rtype, set.class),
                set.into_records(),
                verdict,
                ttl,
            );
        }
    }

    /// Cache a negative outcome under the question key, bounded by the
    /// SOA negative TTL (RFC 2308 §5).
    pub(crate) fn cache_negative(
        &self,
        question: &Question,
        kind: NegativeKind,
        authority: &[Record],
        verdict: ValidationVerdict,
    ) {
        let soa = authority.iter().find(|r| r.rtype() == RecordType::SOA);
        let ttl = soa
            .map(|r| match &r.rdata {
                Rdata::SOA(soa) => r.ttl.min(soa.minimum),
                _ => r.ttl,
            })
            .unwrap_or(0)
            .min(self.config.negative_max_ttl);
        if ttl == 0 {
            return;
        }
        self.cache.insert_negative(
            CacheKey::new(&question.name, question.qtype, question.qclass),
            NegativeEntry::new(kind, soa.cloned(), authority.to_vec(), verdict),
            ttl,
        );
    }
}

fn address_of(rdata: &Rdata) -> Option<IpAddr> {
    match rdata {
        Rdata::A(addr) => Some(IpAddr::V4(*addr)),
        Rdata::AAAA(addr) => Some(IpAddr::V6(*addr)),
        _ => None,
    }
}

/// RRSIGs in `records` covering `(owner, rtype)`, as records.
fn sigs_in(records: &[Record], owner: &Name, rtype: RecordType) -> Vec<Record> {
    records
        .iter()
        .filter(|r| {
            r.name == *owner
                && matches!(&r.rdata, Rdata::RRSIG(sig) if sig.type_covered == rtype)
        })
        .cloned()
        .collect()
}
