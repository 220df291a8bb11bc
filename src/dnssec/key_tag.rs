use crate::dns::rdata::Dnskey;

/// Key tag of a DNSKEY (RFC 4034 Appendix B): a ones-complement-style
/// checksum over the RDATA, with the RSA/MD5 legacy carve-out of taking
/// the low bits of the modulus instead.
pub fn key_tag(key: &Dnskey) -> u16 {
    if key.algorithm == 1 {
        let pk = &key.public_key;
        return match pk.len() {
            0 | 1 => 0,
            n => u16::from_be_bytes([pk[n - 2], pk[n - 1]]),
        };
    }

    let rdata = key.rdata_wire();
    let mut acc: u32 = 0;
    for pair in rdata.chunks(2) {
        acc += (pair[0] as u32) << 8;
        if let Some(&low) = pair.get(1) {
            acc += low as u32;
        }
    }
    acc += acc >> 16;
    (acc & 0xFFFF) as u16
}
