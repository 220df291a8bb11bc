use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use rand::Rng;

use super::ParseError;

/// Maximum number of compression pointers followed while reading one name.
const MAX_POINTER_HOPS: usize = 64;

/// A domain name: an ordered sequence of labels.
///
/// Labels are stored exactly as they appeared on the wire or in the input
/// string; equality, hashing and ordering are case-insensitive, so a name
/// read back from a 0x20-randomized query compares equal to the original
/// while `eq_case_sensitive` can still tell them apart.
#[derive(Clone, Debug, Default)]
pub struct Name {
    labels: Vec<String>,
}

impl Name {
    /// The root name (zero labels).
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    pub fn from_labels(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Parse a dotted presentation name. A trailing dot is accepted and
    /// ignored; `"."` and `""` both yield the root.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.strip_suffix('.').unwrap_or(input);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut labels = Vec::new();
        let mut total = 1usize;
        for label in trimmed.split('.') {
            if label.len() > 63 {
                return Err(ParseError::LabelTooLong(label.len()));
            }
            total += label.len() + 1;
            labels.push(label.to_string());
        }
        if total > 255 {
            return Err(ParseError::NameTooLong(total));
        }
        Ok(Self { labels })
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Strip the leftmost label. `None` at the root.
    pub fn parent(&self) -> Option<Name> {
        if self.labels.is_empty() {
            None
        } else {
            Some(Name {
                labels: self.labels[1..].to_vec(),
            })
        }
    }

    /// True when `self` is an ancestor of `other` or the same name.
    pub fn zone_of(&self, other: &Name) -> bool {
        if self.labels.len() > other.labels.len() {
            return false;
        }
        let offset = other.labels.len() - self.labels.len();
        self.labels
            .iter()
            .zip(&other.labels[offset..])
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Deepest name that is an ancestor-or-equal of both inputs.
    pub fn common_ancestor(&self, other: &Name) -> Name {
        let mut shared = Vec::new();
        for (a, b) in self.labels.iter().rev().zip(other.labels.iter().rev()) {
            if a.eq_ignore_ascii_case(b) {
                shared.push(a.clone());
            } else {
                break;
            }
        }
        shared.reverse();
        Name { labels: shared }
    }

    /// Prepend a label, as in synthesizing `*.zone` or `child.zone`.
    pub fn prepend(&self, label: &str) -> Name {
        let mut labels = Vec::with_capacity(self.labels.len() + 1);
        labels.push(label.to_string());
        labels.extend(self.labels.iter().cloned());
        Name { labels }
    }

    pub fn is_wildcard(&self) -> bool {
        self.labels.first().map(|l| l == "*").unwrap_or(false)
    }

    /// Rewrite `self` by replacing the `old` suffix with `new`, the DNAME
    /// substitution of RFC 6672. `None` when `old` is not a proper suffix.
    pub fn rebase(&self, old: &Name, new: &Name) -> Option<Name> {
        if !old.zone_of(self) || self.labels.len() == old.labels.len() {
            return None;
        }
        let keep = self.labels.len() - old.labels.len();
        let mut labels = self.labels[..keep].to_vec();
        labels.extend(new.labels.iter().cloned());
        Some(Name { labels })
    }

    /// Lowercased dotted form used for cache keys and log lines.
    pub fn key(&self) -> String {
        if self.labels.is_empty() {
            ".".to_string()
        } else {
            self.labels
                .iter()
                .map(|l| l.to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join(".")
        }
    }

    /// Append the uncompressed wire form, casing preserved.
    pub fn write_wire(&self, out: &mut Vec<u8>) {
        for label in &self.labels {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
    }

    /// Append the canonical wire form of RFC 4034 §6.2: lowercased,
    /// uncompressed. This is the byte form signatures are computed over.
    pub fn write_canonical(&self, out: &mut Vec<u8>) {
        for label in &self.labels {
            out.push(label.len() as u8);
            for &b in label.as_bytes() {
                out.push(b.to_ascii_lowercase());
            }
        }
        out.push(0);
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_wire(&mut out);
        out
    }

    pub fn to_canonical_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_canonical(&mut out);
        out
    }

    pub fn encoded_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// Read a name from `buf` at `*pos`, following compression pointers.
    /// `*pos` advances past the name as it appears in place; pointer
    /// targets do not move the cursor.
    pub fn read_wire(buf: &[u8], pos: &mut usize) -> Result<Name, ParseError> {
        let mut labels = Vec::new();
        let mut cursor = *pos;
        let mut jumped = false;
        let mut hops = 0usize;
        let mut total = 1usize;

        loop {
            let len = *buf.get(cursor).ok_or(ParseError::UnexpectedEnd)? as usize;
            if len == 0 {
                cursor += 1;
                if !jumped {
                    *pos = cursor;
                }
                return Ok(Name { labels });
            }
            if len & 0xC0 == 0xC0 {
                let low = *buf.get(cursor + 1).ok_or(ParseError::UnexpectedEnd)? as usize;
                let target = ((len & 0x3F) << 8) | low;
                if !jumped {
                    *pos = cursor + 2;
                }
                hops += 1;
                if hops > MAX_POINTER_HOPS || target >= buf.len() {
                    return Err(ParseError::BadPointer(target as u16));
                }
                cursor = target;
                jumped = true;
                continue;
            }
            if len > 63 {
                return Err(ParseError::LabelTooLong(len));
            }
            if cursor + 1 + len > buf.len() {
                return Err(ParseError::UnexpectedEnd);
            }
            total += len + 1;
            if total > 255 {
                return Err(ParseError::NameTooLong(total));
            }
            labels.push(String::from_utf8_lossy(&buf[cursor + 1..cursor + 1 + len]).into_owned());
            cursor += 1 + len;
        }
    }

    /// A copy with every ASCII letter's case drawn from `rng` (the 0x20
    /// anti-spoofing scheme).
    pub fn randomize_case<R: Rng>(&self, rng: &mut R) -> Name {
        let labels = self
            .labels
            .iter()
            .map(|label| {
                label
                    .chars()
                    .map(|c| {
                        if c.is_ascii_alphabetic() && rng.random::<bool>() {
                            c.to_ascii_uppercase()
                        } else if c.is_ascii_alphabetic() {
                            c.to_ascii_lowercase()
                        } else {
                            c
                        }
                    })
                    .collect()
            })
            .collect();
        Name { labels }
    }

    /// Byte-exact comparison, used to verify the 0x20 casing echo.
    pub fn eq_case_sensitive(&self, other: &Name) -> bool {
        self.labels == other.labels
    }

    /// Canonical DNS ordering of RFC 4034 §6.1: compare label sequences
    /// right to left, each label case-insensitively as raw bytes.
    pub fn canonical_cmp(&self, other: &Name) -> Ordering {
        let mut a = self.labels.iter().rev();
        let mut b = other.labels.iter().rev();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(la), Some(lb)) => {
                    let la = la.as_bytes().iter().map(|b| b.to_ascii_lowercase());
                    let lb = lb.as_bytes().iter().map(|b| b.to_ascii_lowercase());
                    match la.cmp(lb) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
            }
        }
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(&other.labels)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in &self.labels {
            for b in label.as_bytes() {
                state.write_u8(b.to_ascii_lowercase());
            }
            state.write_u8(b'.');
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical_cmp(other)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return write!(f, ".");
        }
        write!(f, "{}", self.labels.join("."))
    }
}

impl std::str::FromStr for Name {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_identity() {
        let a = Name::parse("Example.COM").unwrap();
        let b = Name::parse("example.com").unwrap();
        assert_eq!(a, b);
        assert!(!a.eq_case_sensitive(&b));
        assert_eq!(a.key(), "example.com");
    }

    #[test]
    fn parent_walk_reaches_root() {
        let mut name = Name::parse("a.b.example.com").unwrap();
        let mut steps = 0;
        while let Some(parent) = name.parent() {
            name = parent;
            steps += 1;
        }
        assert_eq!(steps, 4);
        assert!(name.is_root());
    }

    #[test]
    fn zone_containment() {
        let zone = Name::parse("example.com").unwrap();
        assert!(zone.zone_of(&Name::parse("www.example.com").unwrap()));
        assert!(zone.zone_of(&zone));
        assert!(!zone.zone_of(&Name::parse("example.org").unwrap()));
        assert!(Name::root().zone_of(&zone));
    }

    #[test]
    fn canonical_order_is_rightmost_first() {
        // RFC 4034 §6.1 example ordering.
        let sorted = ["example", "a.example", "yljkjljk.a.example", "z.a.example", "zabc.a.example", "z.example"];
        for pair in sorted.windows(2) {
            let a = Name::parse(pair[0]).unwrap();
            let b = Name::parse(pair[1]).unwrap();
            assert_eq!(a.canonical_cmp(&b), Ordering::Less, "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn dname_rebase() {
        let qname = Name::parse("www.a.example.com").unwrap();
        let old = Name::parse("example.com").unwrap();
        let new = Name::parse("example.net").unwrap();
        let rebased = qname.rebase(&old, &new).unwrap();
        assert_eq!(rebased, Name::parse("www.a.example.net").unwrap());
        assert!(old.rebase(&old, &new).is_none());
    }

    #[test]
    fn wire_roundtrip_with_pointer() {
        // "www.example.com" followed by a pointer back to "example.com".
        let mut buf = Vec::new();
        Name::parse("www.example.com").unwrap().write_wire(&mut buf);
        let ptr_at = buf.len();
        buf.extend_from_slice(&[0xC0, 4]); // offset of "example.com"

        let mut pos = 0;
        let first = Name::read_wire(&buf, &mut pos).unwrap();
        assert_eq!(first, Name::parse("www.example.com").unwrap());
        assert_eq!(pos, ptr_at);

        let second = Name::read_wire(&buf, &mut pos).unwrap();
        assert_eq!(second, Name::parse("example.com").unwrap());
        assert_eq!(pos, ptr_at + 2);
    }
}
