//! Chunked response entries.
//!
//! One entry spans `count + 1` backend keys: the count key holding the
//! decimal number of messages, then one key per message in order. An entry
//! is only usable when every one of its keys comes back.

use std::collections::HashMap;

use prost::Message;
use strata_cache::CacheBackend;

use crate::fingerprint::Fingerprint;

/// Upper bound on the declared message count accepted from a backend.
const MAX_ENTRY_MESSAGES: usize = 1 << 20;

/// Why a stored entry could not be replayed.
///
/// All of these are treated as a plain cache miss.
#[derive(Debug, thiserror::Error)]
pub enum EntryMiss {
    #[error("count key not found")]
    CountMissing,

    #[error("malformed message count {0:?}")]
    MalformedCount(String),

    #[error("wrong number of keys: expected {expected}, got {got}")]
    WrongKeyCount { expected: usize, got: usize },

    #[error("decoding message {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: prost::DecodeError,
    },
}

/// Lay out encoded messages as a complete entry under `fingerprint`.
pub fn encode_entry(fingerprint: &Fingerprint, messages: Vec<Vec<u8>>) -> HashMap<String, Vec<u8>> {
    let mut keys = HashMap::with_capacity(messages.len() + 1);
    keys.insert(
        fingerprint.count_key(),
        messages.len().to_string().into_bytes(),
    );
    for (index, message) in messages.into_iter().enumerate() {
        keys.insert(fingerprint.index_key(index), message);
    }
    keys
}

fn parse_count(raw: &[u8]) -> Result<usize, EntryMiss> {
    let malformed = || EntryMiss::MalformedCount(String::from_utf8_lossy(raw).into_owned());
    let count = std::str::from_utf8(raw)
        .map_err(|_| malformed())?
        .trim()
        .parse::<usize>()
        .map_err(|_| malformed())?;
    if count > MAX_ENTRY_MESSAGES {
        return Err(malformed());
    }
    Ok(count)
}

/// Read back the complete entry stored under `fingerprint`.
pub async fn fetch_entry<M, B>(backend: &B, fingerprint: &Fingerprint) -> Result<Vec<M>, EntryMiss>
where
    M: Message + Default,
    B: CacheBackend + ?Sized,
{
    let count_key = fingerprint.count_key();
    let found = backend.fetch(std::slice::from_ref(&count_key)).await;
    let count = parse_count(found.get(&count_key).ok_or(EntryMiss::CountMissing)?)?;
    if count == 0 {
        return Ok(Vec::new());
    }

    let keys: Vec<String> = (0..count).map(|i| fingerprint.index_key(i)).collect();
    let mut found = backend.fetch(&keys).await;
    if found.len() != count {
        return Err(EntryMiss::WrongKeyCount {
            expected: count,
            got: found.len(),
        });
    }

    keys.iter()
        .enumerate()
        .map(|(index, key)| {
            let data = found.remove(key).ok_or(EntryMiss::WrongKeyCount {
                expected: count,
                got: index,
            })?;
            M::decode(data.as_slice()).map_err(|source| EntryMiss::Decode { index, source })
        })
        .collect()
}
