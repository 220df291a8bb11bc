pub mod algorithm;
pub mod chain;
pub mod denial;
pub mod digest;
pub mod errors;
pub mod key_tag;
pub mod trust_anchor;
pub mod validator;

pub use algorithm::Algorithm;
pub use chain::{Fetched, SupportFetch};
pub use digest::DigestType;
pub use errors::DnssecError;
pub use key_tag::key_tag;
pub use trust_anchor::{AnchorSource, TrustAnchor, TrustAnchorSet};
pub use validator::{DenialKind, DnssecValidator};

/// Outcome of validating one answer set (RFC 4035 §4.3, RFC 4033 §5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    /// Validation was not performed; no DNSSEC material was consulted.
    Unsigned,
    /// Every required signature chains to a trust anchor.
    Secure,
    /// A proven delegation break: the zone is legitimately unsigned.
    Insecure,
    /// A required proof failed; the answer must not be served.
    Bogus(String),
    /// No trust anchor covers the name.
    Indeterminate,
}

impl ValidationVerdict {
    /// True when an answer with this verdict may be handed to callers.
    pub fn is_servable(&self) -> bool {
        !matches!(self, Self::Bogus(_))
    }

    /// Combine verdicts along an alias chain: the weakest link decides.
    pub fn meet(self, other: ValidationVerdict) -> ValidationVerdict {
        fn weakness(v: &ValidationVerdict) -> u8 {
            match v {
                ValidationVerdict::Bogus(_) => 4,
                ValidationVerdict::Indeterminate => 3,
                ValidationVerdict::Unsigned => 2,
                ValidationVerdict::Insecure => 1,
                ValidationVerdict::Secure => 0,
            }
        }
        if weakness(&other) > weakness(&self) { other } else { self }
    }
}

/// Limits from the DNSSEC RFC family.
pub mod constants {
    /// NSEC3 iteration count above which a zone is treated as bogus
    /// (RFC 5155 guidance, tightened per RFC 9276).
    pub const MAX_NSEC3_ITERATIONS: u16 = 2500;

    /// EDNS payload floor a validating resolver should advertise
    /// (RFC 4035 §4.1).
    pub const DNSSEC_UDP_SIZE: u16 = 4096;
}
