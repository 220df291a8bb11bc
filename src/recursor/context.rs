use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::dns::enums::RecordType;
use crate::dns::{Name, Question};
use crate::error::ResolveError;

/// Per-resolve bookkeeping: one owned value carries the budgets and the
/// visited sets through every hop, alias rewrite and supporting fetch of
/// a single resolution.
pub struct QueryContext {
    pub question: Question,
    pub require_dnssec: bool,
    deadline: Instant,
    /// Hops remaining; referrals, alias rewrites and supporting lookups
    /// all draw from the same budget.
    depth: AtomicI32,
    /// Alias targets already entered, for CNAME/DNAME loop detection.
    aliases: Mutex<HashSet<Name>>,
    /// `(server, qname, qtype)` triples already queried.
    visited: Mutex<HashSet<(SocketAddr, String, u16)>>,
}

impl QueryContext {
    pub fn new(
        question: Question,
        require_dnssec: bool,
        max_depth: u8,
        timeout: Duration,
    ) -> Self {
        let mut aliases = HashSet::new();
        aliases.insert(question.name.clone());
        Self {
            question,
            require_dnssec,
            deadline: Instant::now() + timeout,
            depth: AtomicI32::new(max_depth as i32),
            aliases: Mutex::new(aliases),
            visited: Mutex::new(HashSet::new()),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the per-resolve deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn check_deadline(&self) -> Result<(), ResolveError> {
        if Instant::now() >= self.deadline {
            Err(ResolveError::Timeout)
        } else {
            Ok(())
        }
    }

    /// Spend one hop of the depth budget.
    pub fn consume_depth(&self) -> Result<(), ResolveError> {
        if self.depth.fetch_sub(1, Ordering::Relaxed) <= 0 {
            Err(ResolveError::DepthExceeded)
        } else {
            Ok(())
        }
    }

    /// Record entering an alias target; an already-seen target is a loop.
    pub fn enter_alias(&self, target: &Name) -> Result<(), ResolveError> {
        if !self.aliases.lock().insert(target.clone()) {
            return Err(ResolveError::LoopDetected(format!(
                "alias chain revisits {}",
                target
            )));
        }
        trace!("following alias to {}", target);
        Ok(())
    }

    /// Mark a `(server, qname, qtype)` triple; `false` means this exact
    /// query was already sent and must not be repeated.
    pub fn mark_server(&self, server: SocketAddr, qname: &Name, qtype: RecordType) -> bool {
        self.visited
            .lock()
            .insert((server, qname.key(), qtype.to_u16()))
    }
}
