use std::fmt;

/// Reasons a proof or chain fails to assemble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnssecError {
    /// No RRSIG covers the rrset.
    MissingRrsig,
    /// No DNSKEY matches the signature's key tag and algorithm.
    MissingDnskey,
    /// No DS links the child zone to its parent.
    MissingDs,
    /// Signature window has passed.
    SignatureExpired,
    /// Signature window has not opened.
    SignatureNotYetValid,
    /// The cryptographic verification itself failed.
    VerifyFailed,
    /// No DNSKEY digest matched any DS at the parent.
    DigestMismatch,
    UnsupportedAlgorithm(u8),
    UnsupportedDigest(u8),
    /// NSEC3 iteration count above the accepted ceiling.
    ExcessiveIterations(u16),
    /// The NSEC/NSEC3 records do not prove the claimed denial.
    DenialNotProven,
    /// The wildcard expansion lacks its no-closer-match proof.
    WildcardNotProven,
    /// No configured trust anchor covers the name.
    NoCoveringAnchor,
    /// A supporting DNSKEY/DS fetch failed.
    FetchFailed(String),
    Malformed(&'static str),
}

impl fmt::Display for DnssecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRrsig => write!(f, "no RRSIG covers the rrset"),
            Self::MissingDnskey => write!(f, "no DNSKEY matches the signature"),
            Self::MissingDs => write!(f, "no DS record links the zone cut"),
            Self::SignatureExpired => write!(f, "signature has expired"),
            Self::SignatureNotYetValid => write!(f, "signature is not yet valid"),
            Self::VerifyFailed => write!(f, "signature verification failed"),
            Self::DigestMismatch => write!(f, "DNSKEY digest does not match any DS"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm {}", alg),
            Self::UnsupportedDigest(digest) => write!(f, "unsupported digest type {}", digest),
            Self::ExcessiveIterations(n) => write!(f, "NSEC3 iteration count {} too high", n),
            Self::DenialNotProven => write!(f, "denial of existence not proven"),
            Self::WildcardNotProven => write!(f, "wildcard expansion not proven"),
            Self::NoCoveringAnchor => write!(f, "no trust anchor covers the name"),
            Self::FetchFailed(what) => write!(f, "supporting fetch failed: {}", what),
            Self::Malformed(what) => write!(f, "malformed DNSSEC record: {}", what),
        }
    }
}

impl std::error::Error for DnssecError {}

pub type Result<T> = std::result::Result<T, DnssecError>;
