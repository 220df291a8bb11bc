mod context;
mod engine;

pub use context::QueryContext;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::cache::{CacheKey, NegativeEntry, NegativeKind, RecordCache};
use crate::config::ResolverConfig;
use crate::dns::enums::{RecordClass, RecordType};
use crate::dns::{Name, Question, Record};
use crate::dnssec::{
    DenialKind, DnssecValidator, Fetched, SupportFetch, TrustAnchor, TrustAnchorSet,
    ValidationVerdict,
};
use crate::error::{ResolveError, Result};
use crate::transport::{Dispatcher, Transport, UdpTcpTransport};
use engine::IterationOutcome;

/// A completed resolution: the answer chain and its validation verdict.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub records: Vec<Record>,
    pub verdict: ValidationVerdict,
}

/// Recent behavior of one authoritative endpoint, used only to order
/// candidates and keep a failing server benched through a backoff window.
pub(crate) struct ServerQuality {
    consecutive_failures: AtomicU32,
    last_failure: Mutex<Option<Instant>>,
}

impl ServerQuality {
    fn new() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub(crate) fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(Instant::now());
    }

    /// Three straight failures bench a server; it returns on an
    /// exponential schedule capped at a minute.
    pub(crate) fn is_usable(&self) -> bool {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures < 3 {
            return true;
        }
        let backoff = Duration::from_secs((5u64 << (failures - 3).min(4)).min(60));
        match *self.last_failure.lock() {
            Some(at) => at.elapsed() >= backoff,
            None => true,
        }
    }
}

type SharedOutcome = Result<Resolution>;

/// The recursive resolver: cache-first lookups, an iterative referral
/// walk over authoritative servers, DNSSEC validation, and single-flight
/// coalescing of concurrent identical questions.
pub struct Recursor {
    pub(crate) config: ResolverConfig,
    pub(crate) cache: RecordCache,
    pub(crate) dispatcher: Dispatcher,
    validator: DnssecValidator,
    in_flight: DashMap<CacheKey, broadcast::Sender<SharedOutcome>>,
    quality: DashMap<SocketAddr, Arc<ServerQuality>>,
    pub(crate) rotation: AtomicUsize,
    shutdown: broadcast::Sender<()>,
}

impl Recursor {
    /// A socket-backed resolver aimed at the configured root hints.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(UdpTcpTransport::default()))
    }

    /// Same, with the byte transport swapped out (tests drive this with
    /// an in-process mock).
    pub fn with_transport(
        config: ResolverConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let anchors = if config.validation_enabled {
            TrustAnchorSet::with_root_anchors()
        } else {
            TrustAnchorSet::empty()
        };
        let (shutdown, _) = broadcast::channel(1);
        info!(
            "recursor ready: {} root hints, validation {}",
            config.root_hints.len(),
            if config.validation_enabled { "on" } else { "off" }
        );
        Ok(Self {
            cache: RecordCache::new(config.max_cache_entries, config.max_ttl),
            dispatcher: Dispatcher::new(transport),
            validator: DnssecValidator::new(Arc::new(anchors)),
            in_flight: DashMap::new(),
            quality: DashMap::new(),
            rotation: AtomicUsize::new(0),
            shutdown,
            config,
        })
    }

    /// Swap the trust-anchor set atomically; in-progress resolves keep the
    /// snapshot they started with.
    pub fn set_trust_anchors(&self, anchors: Vec<TrustAnchor>) {
        self.validator.anchors().replace(anchors);
    }

    /// Pin the validator's clock (signature validity windows compare
    /// against it).
    pub fn set_validation_time(&mut self, time: u32) {
        self.validator.set_current_time(time);
    }

    /// Warm the cache with known-good rrsets (grouped per owner/type and
    /// tagged with `verdict`).
    pub fn prime_cache(&self, records: &[Record], verdict: ValidationVerdict) {
        self.cache_rrsets(records, verdict);
    }

    pub fn flush_cache(&self) {
        self.cache.flush();
    }

    pub fn sweep_now(&self) {
        self.cache.sweep();
    }

    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    /// Cancel everything: outstanding resolves complete with `Cancelled`.
    pub fn shutdown(&self) {
        debug!("shutting down recursor");
        let _ = self.shutdown.send(());
    }

    /// Periodic eager eviction until shutdown.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let recursor = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => recursor.cache.sweep(),
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    pub(crate) fn quality(&self, server: SocketAddr) -> Arc<ServerQuality> {
        self.quality
            .entry(server)
            .or_insert_with(|| Arc::new(ServerQuality::new()))
            .clone()
    }

    /// Resolve a question. Concurrent callers of the same cold key share
    /// one in-flight resolution; negative outcomes surface as typed errors
    /// carrying the validation verdict.
    pub async fn resolve(
        &self,
        name: Name,
        qtype: RecordType,
        qclass: RecordClass,
        require_dnssec: bool,
    ) -> Result<Resolution> {
        let question = Question::new(name, qtype, qclass);
        loop {
            let key = CacheKey::new(&question.name, qtype, qclass);

            if let Some(negative) = self.cache.get_negative(&key) {
                trace!("negative cache answer for {}", key);
                return Err(negative_error(negative.kind, negative.verdict));
            }
            if let Some((records, verdict)) = self.answer_from_cache(&question) {
                trace!("cache answer for {}", key);
                if require_dnssec && matches!(verdict, ValidationVerdict::Indeterminate) {
                    return Err(ResolveError::Indeterminate);
                }
                return Ok(Resolution { records, verdict });
            }

            // Single flight: the first caller publishes its channel before
            // touching the network, everyone else subscribes.
            use dashmap::mapref::entry::Entry;
            let leader = match self.in_flight.entry(key.clone()) {
                Entry::Occupied(waiting) => {
                    let rx = waiting.get().subscribe();
                    drop(waiting);
                    Err(rx)
                }
                Entry::Vacant(slot) => {
                    let (tx, _) = broadcast::channel(8);
                    slot.insert(tx.clone());
                    Ok(tx)
                }
            };

            match leader {
                Err(mut rx) => {
                    debug!("coalescing onto in-flight resolution of {}", key);
                    match rx.recv().await {
                        Ok(result) => return result,
                        // The leader finished (or was cancelled) before we
                        // subscribed; the cache has the outcome now.
                        Err(_) => continue,
                    }
                }
                Ok(tx) => {
                    let result = self.drive(question.clone(), require_dnssec).await;
                    self.in_flight.remove(&key);
                    let _ = tx.send(result.clone());
                    return result;
                }
            }
        }
    }

    /// Run one resolution under the per-resolve deadline and the process
    /// shutdown signal.
    async fn drive(&self, question: Question, require_dnssec: bool) -> Result<Resolution> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = shutdown.recv() => Err(ResolveError::Cancelled),
            outcome = tokio::time::timeout(
                self.config.query_timeout,
                self.resolve_uncached(question, require_dnssec),
            ) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ResolveError::Timeout),
            },
        }
    }

    async fn resolve_uncached(
        &self,
        question: Question,
        require_dnssec: bool,
    ) -> Result<Resolution> {
        let ctx = QueryContext::new(
            question.clone(),
            require_dnssec,
            self.config.max_depth,
            self.config.query_timeout,
        );
        let validating = self.config.validation_enabled || require_dnssec;
        let outcome = self.lookup(&ctx, question.clone()).await?;

        match outcome {
            IterationOutcome::Answer { records, authority } => {
                let verdict = if validating {
                    let fetch = FetchAdapter { recursor: self, ctx: &ctx };
                    self.validator
                        .validate_answer(&fetch, &question, &records, &authority)
                        .await
                } else {
                    ValidationVerdict::Unsigned
                };

                if let ValidationVerdict::Bogus(reason) = &verdict {
                    self.cache_bogus(&question, reason.clone());
                    return Err(ResolveError::Bogus(reason.clone()));
                }
                if require_dnssec && matches!(verdict, ValidationVerdict::Indeterminate) {
                    return Err(ResolveError::Indeterminate);
                }
                self.cache_rrsets(&records, verdict.clone());
                Ok(Resolution { records, verdict })
            }
            IterationOutcome::NxDomain { authority } => {
                self.finish_negative(
                    &ctx,
                    &question,
                    NegativeKind::NxDomain,
                    authority,
                    validating,
                    require_dnssec,
                )
                .await
            }
            IterationOutcome::NoData { authority } => {
                self.finish_negative(
                    &ctx,
                    &question,
                    NegativeKind::NoData,
                    authority,
                    validating,
                    require_dnssec,
                )
                .await
            }
        }
    }

    async fn finish_negative(
        &self,
        ctx: &QueryContext,
        question: &Question,
        kind: NegativeKind,
        authority: Vec<Record>,
        validating: bool,
        require_dnssec: bool,
    ) -> Result<Resolution> {
        let denial_kind = match kind {
            NegativeKind::NxDomain => DenialKind::NameError,
            _ => DenialKind::NoData,
        };
        let verdict = if validating {
            let fetch = FetchAdapter { recursor: self, ctx };
            self.validator
                .validate_negative(&fetch, question, denial_kind, &authority)
                .await
        } else {
            ValidationVerdict::Unsigned
        };

        if let ValidationVerdict::Bogus(reason) = &verdict {
            self.cache_bogus(question, reason.clone());
            return Err(ResolveError::Bogus(reason.clone()));
        }
        if require_dnssec && matches!(verdict, ValidationVerdict::Indeterminate) {
            return Err(ResolveError::Indeterminate);
        }

        self.cache_negative(question, kind.clone(), &authority, verdict.clone());
        Err(negative_error(kind, verdict))
    }

    fn cache_bogus(&self, question: &Question, reason: String) {
        self.cache.insert_negative(
            CacheKey::new(&question.name, question.qtype, question.qclass),
            NegativeEntry::new(
                NegativeKind::Bogus(reason.clone()),
                None,
                Vec::new(),
                ValidationVerdict::Bogus(reason),
            ),
            self.config.bogus_ttl,
        );
    }
}

fn negative_error(kind: NegativeKind, verdict: ValidationVerdict) -> ResolveError {
    match kind {
        NegativeKind::NxDomain => ResolveError::NameError { verdict },
        NegativeKind::NoData => ResolveError::NoData { verdict },
        NegativeKind::Bogus(reason) => ResolveError::Bogus(reason),
    }
}

/// The validator's window onto the resolver: supporting DNSKEY/DS fetches
/// ride the same context, so they share the resolve's depth budget and
/// deadline.
struct FetchAdapter<'a> {
    recursor: &'a Recursor,
    ctx: &'a QueryContext,
}

#[async_trait]
impl SupportFetch for FetchAdapter<'_> {
    async fn fetch(
        &self,
        name: Name,
        rtype: RecordType,
    ) -> std::result::Result<Fetched, String> {
        let question = Question::new(name, rtype, RecordClass::IN);
        match self.recursor.lookup(self.ctx, question).await {
            Ok(IterationOutcome::Answer { records, .. }) => {
                // Keep DNSKEY/DS material around for the next resolve.
                self.recursor
                    .cache_rrsets(&records, ValidationVerdict::Unsigned);
                Ok(Fetched::Records(records))
            }
            Ok(IterationOutcome::NxDomain { authority })
            | Ok(IterationOutcome::NoData { authority }) => Ok(Fetched::Absent(authority)),
            Err(e) => Err(e.to_string()),
        }
    }
}
