use std::fmt;

use ring::signature::{self, VerificationAlgorithm};

/// DNSSEC signing algorithm numbers (RFC 4034, 5155, 5702, 5933, 6605,
/// 8080) with the verification backends this resolver can actually run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    RsaMd5,
    Dsa,
    RsaSha1,
    DsaNsec3Sha1,
    RsaSha1Nsec3Sha1,
    RsaSha256,
    RsaSha512,
    EccGost,
    EcdsaP256Sha256,
    EcdsaP384Sha384,
    Ed25519,
    Ed448,
    Unknown(u8),
}

impl Algorithm {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::RsaMd5,
            3 => Self::Dsa,
            5 => Self::RsaSha1,
            6 => Self::DsaNsec3Sha1,
            7 => Self::RsaSha1Nsec3Sha1,
            8 => Self::RsaSha256,
            10 => Self::RsaSha512,
            12 => Self::EccGost,
            13 => Self::EcdsaP256Sha256,
            14 => Self::EcdsaP384Sha384,
            15 => Self::Ed25519,
            16 => Self::Ed448,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::RsaMd5 => 1,
            Self::Dsa => 3,
            Self::RsaSha1 => 5,
            Self::DsaNsec3Sha1 => 6,
            Self::RsaSha1Nsec3Sha1 => 7,
            Self::RsaSha256 => 8,
            Self::RsaSha512 => 10,
            Self::EccGost => 12,
            Self::EcdsaP256Sha256 => 13,
            Self::EcdsaP384Sha384 => 14,
            Self::Ed25519 => 15,
            Self::Ed448 => 16,
            Self::Unknown(value) => value,
        }
    }

    /// Algorithms this build can verify. Ed448 and GOST are recognized but
    /// have no backend; per RFC 6840 §5.2 their presence alone never makes
    /// an answer bogus.
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            Self::RsaSha1
                | Self::RsaSha1Nsec3Sha1
                | Self::RsaSha256
                | Self::RsaSha512
                | Self::EcdsaP256Sha256
                | Self::EcdsaP384Sha384
                | Self::Ed25519
        )
    }

    fn backend(self) -> Option<&'static dyn VerificationAlgorithm> {
        match self {
            Self::RsaSha1 | Self::RsaSha1Nsec3Sha1 => {
                Some(&signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY)
            }
            Self::RsaSha256 => Some(&signature::RSA_PKCS1_2048_8192_SHA256),
            Self::RsaSha512 => Some(&signature::RSA_PKCS1_2048_8192_SHA512),
            Self::EcdsaP256Sha256 => Some(&signature::ECDSA_P256_SHA256_FIXED),
            Self::EcdsaP384Sha384 => Some(&signature::ECDSA_P384_SHA384_FIXED),
            Self::Ed25519 => Some(&signature::ED25519),
            _ => None,
        }
    }

    /// Verify `signature_bytes` over `signed_data` with a DNSKEY public
    /// key in its wire form (RFC 3110 for RSA, raw point/key otherwise).
    pub fn verify(self, public_key: &[u8], signed_data: &[u8], signature_bytes: &[u8]) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        let key = match self {
            Self::RsaSha1 | Self::RsaSha1Nsec3Sha1 | Self::RsaSha256 | Self::RsaSha512 => {
                match rsa_key_from_rfc3110(public_key) {
                    Some(der) => der,
                    None => return false,
                }
            }
            // The DNSKEY carries the bare x||y point; ring wants the
            // uncompressed-point tag in front.
            Self::EcdsaP256Sha256 | Self::EcdsaP384Sha384 => {
                let mut point = Vec::with_capacity(public_key.len() + 1);
                point.push(0x04);
                point.extend_from_slice(public_key);
                point
            }
            _ => public_key.to_vec(),
        };
        signature::UnparsedPublicKey::new(backend, key)
            .verify(signed_data, signature_bytes)
            .is_ok()
    }
}

/// Re-encode an RFC 3110 RSA key (exponent length, exponent, modulus) as
/// the DER `RSAPublicKey` structure ring expects.
fn rsa_key_from_rfc3110(key: &[u8]) -> Option<Vec<u8>> {
    let (exp_len, exp_start) = match *key.first()? {
        0 => {
            if key.len() < 3 {
                return None;
            }
            (u16::from_be_bytes([key[1], key[2]]) as usize, 3)
        }
        len => (len as usize, 1),
    };
    let exponent = key.get(exp_start..exp_start + exp_len)?;
    let modulus = key.get(exp_start + exp_len..)?;
    if modulus.is_empty() {
        return None;
    }

    let mut body = Vec::new();
    der_integer(modulus, &mut body);
    der_integer(exponent, &mut body);

    let mut der = Vec::with_capacity(body.len() + 4);
    der.push(0x30);
    der_length(body.len(), &mut der);
    der.extend_from_slice(&body);
    Some(der)
}

fn der_integer(value: &[u8], out: &mut Vec<u8>) {
    let value = {
        let mut v = value;
        while v.len() > 1 && v[0] == 0 {
            v = &v[1..];
        }
        v
    };
    let pad = value.first().map(|&b| b & 0x80 != 0).unwrap_or(false);
    out.push(0x02);
    der_length(value.len() + pad as usize, out);
    if pad {
        out.push(0);
    }
    out.extend_from_slice(value);
}

fn der_length(len: usize, out: &mut Vec<u8>) {
    if len < 128 {
        out.push(len as u8);
    } else if len < 256 {
        out.push(0x81);
        out.push(len as u8);
    } else {
        out.push(0x82);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RsaMd5 => write!(f, "RSAMD5"),
            Self::Dsa => write!(f, "DSA"),
            Self::RsaSha1 => write!(f, "RSASHA1"),
            Self::DsaNsec3Sha1 => write!(f, "DSA-NSEC3-SHA1"),
            Self::RsaSha1Nsec3Sha1 => write!(f, "RSASHA1-NSEC3-SHA1"),
            Self::RsaSha256 => write!(f, "RSASHA256"),
            Self::RsaSha512 => write!(f, "RSASHA512"),
            Self::EccGost => write!(f, "ECC-GOST"),
            Self::EcdsaP256Sha256 => write!(f, "ECDSAP256SHA256"),
            Self::EcdsaP384Sha384 => write!(f, "ECDSAP384SHA384"),
            Self::Ed25519 => write!(f, "ED25519"),
            Self::Ed448 => write!(f, "ED448"),
            Self::Unknown(value) => write!(f, "ALG{}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_mapping() {
        assert_eq!(Algorithm::from_u8(8), Algorithm::RsaSha256);
        assert_eq!(Algorithm::from_u8(13), Algorithm::EcdsaP256Sha256);
        assert_eq!(Algorithm::from_u8(15), Algorithm::Ed25519);
        assert_eq!(Algorithm::from_u8(200), Algorithm::Unknown(200));
        assert_eq!(Algorithm::Ed448.to_u8(), 16);
    }

    #[test]
    fn support_table() {
        assert!(Algorithm::RsaSha256.is_supported());
        assert!(Algorithm::Ed25519.is_supported());
        assert!(!Algorithm::Ed448.is_supported());
        assert!(!Algorithm::EccGost.is_supported());
        assert!(!Algorithm::RsaMd5.is_supported());
    }

    #[test]
    fn rfc3110_der_conversion() {
        // Single-byte exponent length: e = 65537, n = 0x00BC.. (high bit).
        let key = [3, 0x01, 0x00, 0x01, 0xBC, 0x01];
        let der = rsa_key_from_rfc3110(&key).unwrap();
        // SEQUENCE { INTEGER 00 BC 01, INTEGER 01 00 01 }
        assert_eq!(der, vec![0x30, 0x0A, 0x02, 0x03, 0x00, 0xBC, 0x01, 0x02, 0x03, 0x01, 0x00, 0x01]);
    }
}
