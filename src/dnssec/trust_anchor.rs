use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use parking_lot::RwLock;
use tracing::debug;

use super::digest::DigestType;
use super::key_tag::key_tag;
use crate::dns::Name;
use crate::dns::rdata::{Dnskey, Ds};

/// The key material an anchor pins: a full DNSKEY or a DS-style digest.
#[derive(Debug, Clone)]
pub enum AnchorSource {
    Key(Dnskey),
    Delegation(Ds),
}

/// An externally configured entry point into the chain of trust.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pub zone: Name,
    pub source: AnchorSource,
}

impl TrustAnchor {
    pub fn from_key(zone: Name, key: Dnskey) -> Self {
        Self { zone, source: AnchorSource::Key(key) }
    }

    pub fn from_ds(zone: Name, ds: Ds) -> Self {
        Self { zone, source: AnchorSource::Delegation(ds) }
    }

    pub fn key_tag(&self) -> u16 {
        match &self.source {
            AnchorSource::Key(key) => key_tag(key),
            AnchorSource::Delegation(ds) => ds.key_tag,
        }
    }

    /// Does `key`, owned by `owner`, match this anchor?
    pub fn matches(&self, owner: &Name, key: &Dnskey) -> bool {
        if self.zone != *owner {
            return false;
        }
        match &self.source {
            AnchorSource::Key(anchor_key) => {
                anchor_key.algorithm == key.algorithm && anchor_key.public_key == key.public_key
            }
            AnchorSource::Delegation(ds) => {
                if ds.key_tag != key_tag(key) || ds.algorithm != key.algorithm {
                    return false;
                }
                let mut image = owner.to_canonical_wire();
                image.extend_from_slice(&key.rdata_wire());
                DigestType::from_u8(ds.digest_type)
                    .hash(&image)
                    .map(|digest| digest == ds.digest)
                    .unwrap_or(false)
            }
        }
    }
}

/// Process-wide anchor set. Read-mostly; `replace` swaps the whole map
/// behind the lock so resolves holding a snapshot never see a half-built
/// configuration.
pub struct TrustAnchorSet {
    anchors: RwLock<Arc<HashMap<String, Vec<TrustAnchor>>>>,
}

impl TrustAnchorSet {
    /// An empty set; validation against it is always indeterminate.
    pub fn empty() -> Self {
        Self {
            anchors: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// The IANA root KSKs (key tags 20326 and 19036), the anchors nearly
    /// every deployment starts from.
    pub fn with_root_anchors() -> Self {
        let set = Self::empty();
        let root = Name::root();
        let decode = |b64: &str| {
            base64::engine::general_purpose::STANDARD
                .decode(b64)
                .expect("IANA anchor key material is valid base64")
        };

        // Root KSK-2024.
        let ksk_2024 = Dnskey {
            flags: 257,
            protocol: 3,
            algorithm: 8,
            public_key: decode(
                "AwEAAaz/tAm8yTn4Mfeh5eyI96WSVexTBAvkMgJzkKTOiW1vkIbzxeF3\
                 +/4RgWOq7HrxRixHlFlExOLAJr5emLvN7SWXgnLh4+B5xQlNVz8Og8kv\
                 ArMtNROxVQuCaSnIDdD5LKyWbRd2n9WGe2R8PzgCmr3EgVLrjyBxWezF\
                 0jLHwVN8efS3rCj/EWgvIWgb9tarpVUDK/b58Da+sqqls3eNbuv7pr+e\
                 oZG+SrDK6nWeL3c6H5Apxz7LjVc1uTIdsIXxuOLYA4/ilBmSVIzuDWfd\
                 RUfhHdY6+cn8HFRm+2hM8AnXGXws9555KrUB5qihylGa8subX2Nn6UwN\
                 R1AkUTV74bU=",
            ),
        };

        // Root KSK-2017, still published through the rollover overlap.
        let ksk_2017 = Dnskey {
            flags: 257,
            protocol: 3,
            algorithm: 8,
            public_key: decode(
                "AwEAAagAIKlVZrpC6Ia7gEzahOR+9W29euxhJhVVLOyQbSEW0O8gcCjF\
                 FVQUTf6v58fLjwBd0YI0EzrAcQqBGCzh/RStIoO8g0NfnfL2MTJRkxoX\
                 bfDaUeVPQuYEhg37NZWAJQ9VnMVDxP/VHL496M/QZxkjf5/Efucp2gaD\
                 X6RS6CXpoY68LsvPVjR0ZSwzz1apAzvN9dlzEheX7ICJBBtuA6G3LQpz\
                 W5hOA2hzCTMjJPJ8LbqF6dsV6DoBQzgul0sGIcGOYl7OyQdXfZ57relS\
                 Qageu+ipAdTTJ25AsRTAoub8ONGcLmqrAmRLKBP1dfwhYB4N7knNnulq\
                 QxA+Uk1ihz0=",
            ),
        };

        set.replace(vec![
            TrustAnchor::from_key(root.clone(), ksk_2024),
            TrustAnchor::from_key(root, ksk_2017),
        ]);
        set
    }

    /// Swap in a complete new anchor set atomically.
    pub fn replace(&self, anchors: Vec<TrustAnchor>) {
        let mut map: HashMap<String, Vec<TrustAnchor>> = HashMap::new();
        for anchor in anchors {
            map.entry(anchor.zone.key()).or_default().push(anchor);
        }
        debug!("installing trust anchors for {} zones", map.len());
        *self.anchors.write() = Arc::new(map);
    }

    pub fn add(&self, anchor: TrustAnchor) {
        let mut guard = self.anchors.write();
        let mut map = (**guard).clone();
        map.entry(anchor.zone.key()).or_default().push(anchor);
        *guard = Arc::new(map);
    }

    fn snapshot(&self) -> Arc<HashMap<String, Vec<TrustAnchor>>> {
        self.anchors.read().clone()
    }

    /// Deepest anchored zone that is an ancestor-or-equal of `name`,
    /// together with its anchors.
    pub fn covering(&self, name: &Name) -> Option<(Name, Vec<TrustAnchor>)> {
        let snapshot = self.snapshot();
        let mut zone = Some(name.clone());
        while let Some(candidate) = zone {
            if let Some(anchors) = snapshot.get(&candidate.key()) {
                return Some((candidate, anchors.clone()));
            }
            zone = candidate.parent();
        }
        None
    }

    pub fn anchors_for(&self, zone: &Name) -> Vec<TrustAnchor> {
        self.snapshot().get(&zone.key()).cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn zone_count(&self) -> usize {
        self.snapshot().len()
    }
}
