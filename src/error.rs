use std::error::Error as StdError;
use std::fmt;

use crate::dnssec::ValidationVerdict;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Pre-flight configuration problems.
#[derive(Debug, Clone)]
pub enum ConfigError {
    NoRootHints,
    InvalidTimeout(String),
    InvalidFanout(String),
    InvalidDepth(String),
    InvalidCacheSize(String),
    ParseError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoRootHints => write!(f, "no root hints configured"),
            ConfigError::InvalidTimeout(what) => write!(f, "invalid timeout: {}", what),
            ConfigError::InvalidFanout(what) => write!(f, "invalid query fan-out: {}", what),
            ConfigError::InvalidDepth(what) => write!(f, "invalid depth budget: {}", what),
            ConfigError::InvalidCacheSize(what) => write!(f, "invalid cache size: {}", what),
            ConfigError::ParseError(what) => write!(f, "parse error: {}", what),
        }
    }
}

impl StdError for ConfigError {}

/// Terminal outcomes of a resolve. `Clone` because results are fanned out
/// to every waiter coalesced onto one in-flight resolution.
#[derive(Debug, Clone)]
pub enum ResolveError {
    /// The name does not exist (proven when the verdict says so).
    NameError { verdict: ValidationVerdict },
    /// The name exists without the queried type.
    NoData { verdict: ValidationVerdict },
    Timeout,
    /// Every candidate server failed or answered SERVFAIL.
    ServerFailure(String),
    /// DNSSEC validation failed; the answer was withheld.
    Bogus(String),
    /// No trust anchor covers the name and validation was required.
    Indeterminate,
    LoopDetected(String),
    DepthExceeded,
    Cancelled,
    Config(ConfigError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NameError { .. } => write!(f, "name does not exist"),
            ResolveError::NoData { .. } => write!(f, "name exists but has no such rrset"),
            ResolveError::Timeout => write!(f, "resolution timed out"),
            ResolveError::ServerFailure(what) => write!(f, "all servers failed: {}", what),
            ResolveError::Bogus(what) => write!(f, "DNSSEC validation failed: {}", what),
            ResolveError::Indeterminate => write!(f, "no applicable trust anchor"),
            ResolveError::LoopDetected(what) => write!(f, "loop detected: {}", what),
            ResolveError::DepthExceeded => write!(f, "referral depth budget exhausted"),
            ResolveError::Cancelled => write!(f, "resolution cancelled"),
            ResolveError::Config(err) => write!(f, "configuration error: {}", err),
        }
    }
}

impl StdError for ResolveError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ResolveError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for ResolveError {
    fn from(err: ConfigError) -> Self {
        ResolveError::Config(err)
    }
}

impl From<TransportError> for ResolveError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ResolveError::Timeout,
            other => ResolveError::ServerFailure(other.to_string()),
        }
    }
}
