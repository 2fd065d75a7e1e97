//! Request fingerprints and the cache keys derived from them.

use std::fmt;

use prost::Message;

/// Deterministic identity of one request sent to one target.
///
/// BLAKE3 over the length-prefixed target followed by the encoded request,
/// rendered as 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute<M: Message>(target: &str, request: &M) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(target.len() as u64).to_le_bytes());
        hasher.update(target.as_bytes());
        hasher.update(&request.encode_to_vec());
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Key holding the number of messages in the entry.
    pub fn count_key(&self) -> String {
        format!("{}-num", self.0)
    }

    /// Key holding message `index` of the entry.
    pub fn index_key(&self, index: usize) -> String {
        format!("{}-{}", self.0, index)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Probe {
        #[prost(string, tag = "1")]
        matcher: String,
        #[prost(int64, tag = "2")]
        min_time: i64,
    }

    fn probe(matcher: &str, min_time: i64) -> Probe {
        Probe {
            matcher: matcher.to_string(),
            min_time,
        }
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = Fingerprint::compute("store-1:10901", &probe("up", 0));
        let b = Fingerprint::compute("store-1:10901", &probe("up", 0));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_depends_on_target_and_request() {
        let base = Fingerprint::compute("store-1:10901", &probe("up", 0));
        assert_ne!(base, Fingerprint::compute("store-2:10901", &probe("up", 0)));
        assert_ne!(base, Fingerprint::compute("store-1:10901", &probe("up", 1)));
    }

    #[test]
    fn test_key_layout() {
        let fp = Fingerprint::compute("t", &probe("up", 0));
        assert_eq!(fp.count_key(), format!("{}-num", fp));
        assert_eq!(fp.index_key(2), format!("{}-2", fp));
    }
}
