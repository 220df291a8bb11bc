use std::fmt;

use ring::digest;

/// DS digest algorithms (RFC 4034, 4509, 5933, 6605).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestType {
    Sha1,
    Sha256,
    Gost94,
    Sha384,
    Unknown(u8),
}

impl DigestType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Sha1,
            2 => Self::Sha256,
            3 => Self::Gost94,
            4 => Self::Sha384,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Sha1 => 1,
            Self::Sha256 => 2,
            Self::Gost94 => 3,
            Self::Sha384 => 4,
            Self::Unknown(value) => value,
        }
    }

    pub fn is_supported(self) -> bool {
        matches!(self, Self::Sha1 | Self::Sha256 | Self::Sha384)
    }

    /// Preference order for RFC 4509 §3: when a zone publishes several DS
    /// records, the strongest supported digest is authoritative and weaker
    /// ones may be ignored.
    pub fn rank(self) -> u8 {
        match self {
            Self::Sha384 => 3,
            Self::Sha256 => 2,
            Self::Sha1 => 1,
            _ => 0,
        }
    }

    pub fn hash(self, data: &[u8]) -> Option<Vec<u8>> {
        let algorithm = match self {
            Self::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => &digest::SHA256,
            Self::Sha384 => &digest::SHA384,
            _ => return None,
        };
        Some(digest::digest(algorithm, data).as_ref().to_vec())
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "SHA1"),
            Self::Sha256 => write!(f, "SHA256"),
            Self::Gost94 => write!(f, "GOST94"),
            Self::Sha384 => write!(f, "SHA384"),
            Self::Unknown(value) => write!(f, "DIGEST{}", value),
        }
    }
}
