//! Example database: persistence of interesting choice sequences.
//!
//! Examples are stored as opaque byte strings (see [`serialization`]) under
//! a [`DatabaseKey`] derived from the test's identity. Every backend
//! implements [`ExampleDatabase`]:
//! - [`DirectoryDatabase`]: one immutable file per example, written by
//!   atomic rename, safe for concurrent processes
//! - [`InMemoryDatabase`]: process-local, for tests and ephemeral runs
//! - [`ReadOnlyDatabase`]: drops all writes, used for derandomized runs
//! - [`BackgroundDatabase`]: performs writes on a worker thread
//!
//! Reads never fail because of one bad entry; unreadable entries are
//! logged and skipped.

pub mod background;
pub mod directory;
pub mod memory;
pub mod serialization;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::choice::{ChoiceType, ChoiceValue};

pub use self::background::BackgroundDatabase;
pub use self::directory::DirectoryDatabase;
pub use self::memory::InMemoryDatabase;
pub use self::serialization::{choices_from_bytes, choices_to_bytes};

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("database corruption: {0}")]
    Corruption(String),
}

/// Sub-key for examples superseded by a smaller failure.
pub const SECONDARY: &str = "secondary";

/// Sub-key for the best-scoring examples of targeted search.
pub const PARETO: &str = "pareto";

/// Identifies the examples belonging to one test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatabaseKey {
    primary_hash: [u8; 32],
    sub_key: Option<String>,
}

impl DatabaseKey {
    /// Key for a test identified by `name`, with optional extra identifying data.
    pub fn for_test(name: &str, additional_data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(additional_data);
        DatabaseKey { primary_hash: hasher.finalize().into(), sub_key: None }
    }

    /// The corpus stored alongside this one under `sub_key`.
    pub fn with_sub_key(&self, sub_key: &str) -> Self {
        DatabaseKey { primary_hash: self.primary_hash, sub_key: Some(sub_key.to_string()) }
    }

    /// The key without any sub-key.
    pub fn primary(&self) -> Self {
        DatabaseKey { primary_hash: self.primary_hash, sub_key: None }
    }

    pub fn sub_key(&self) -> Option<&str> {
        self.sub_key.as_deref()
    }

    pub fn hash_bytes(&self) -> &[u8; 32] {
        &self.primary_hash
    }

    /// Stable seed derived from the test identity, for derandomized runs.
    pub fn seed(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.primary_hash[..8]);
        u64::from_be_bytes(bytes)
    }

    pub fn to_hex(&self) -> String {
        let primary = hex::encode(self.primary_hash);
        match &self.sub_key {
            Some(sub) => format!("{}.{}", primary, sub),
            None => primary,
        }
    }

    pub fn from_hex(text: &str) -> DatabaseResult<Self> {
        let (primary, sub_key) = match text.split_once('.') {
            Some((primary, sub)) => (primary, Some(sub.to_string())),
            None => (text, None),
        };
        if primary.len() != 64 {
            return Err(DatabaseError::InvalidKey(format!("expected 64 hex digits, got {}", primary.len())));
        }
        let primary_hash: [u8; 32] = hex::decode(primary)
            .map_err(|e| DatabaseError::InvalidKey(format!("invalid hex: {}", e)))?
            .try_into()
            .map_err(|_| DatabaseError::InvalidKey("hash has the wrong length".to_string()))?;
        Ok(DatabaseKey { primary_hash, sub_key })
    }
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Storage of example byte strings grouped by key.
///
/// `save` and `delete` are idempotent. `fetch` returns each stored value
/// once, in a deterministic order for a given set of contents.
pub trait ExampleDatabase: Send + fmt::Debug {
    fn save(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()>;

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>>;

    fn delete(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()>;

    /// Move `value` from `src` to `dest`. Saving first means a crash in
    /// between leaves the value in both places rather than in neither.
    fn move_value(&mut self, src: &DatabaseKey, dest: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        if src == dest {
            return self.save(src, value);
        }
        self.save(dest, value)?;
        self.delete(src, value)
    }

    /// Block until previously requested writes are visible to `fetch`.
    fn flush(&mut self) -> DatabaseResult<()> {
        Ok(())
    }
}

impl<D: ExampleDatabase + ?Sized> ExampleDatabase for Box<D> {
    fn save(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        (**self).save(key, value)
    }

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>> {
        (**self).fetch(key)
    }

    fn delete(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        (**self).delete(key, value)
    }

    fn move_value(&mut self, src: &DatabaseKey, dest: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        (**self).move_value(src, dest, value)
    }

    fn flush(&mut self) -> DatabaseResult<()> {
        (**self).flush()
    }
}

/// Serves reads from the wrapped database and silently drops every write.
#[derive(Debug)]
pub struct ReadOnlyDatabase<D> {
    inner: D,
}

impl<D: ExampleDatabase> ReadOnlyDatabase<D> {
    pub fn new(inner: D) -> Self {
        ReadOnlyDatabase { inner }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D: ExampleDatabase> ExampleDatabase for ReadOnlyDatabase<D> {
    fn save(&mut self, _key: &DatabaseKey, _value: &[u8]) -> DatabaseResult<()> {
        Ok(())
    }

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>> {
        self.inner.fetch(key)
    }

    fn delete(&mut self, _key: &DatabaseKey, _value: &[u8]) -> DatabaseResult<()> {
        Ok(())
    }

    fn move_value(&mut self, _src: &DatabaseKey, _dest: &DatabaseKey, _value: &[u8]) -> DatabaseResult<()> {
        Ok(())
    }
}

fn kind_signature(values: &[ChoiceValue]) -> Vec<ChoiceType> {
    values.iter().map(ChoiceValue::choice_type).collect()
}

/// Bring the number of entries under `key` down to `max_entries`.
///
/// Entries in `protected` are never removed. Undecodable entries go first,
/// then entries whose sequence of choice kinds duplicates another entry's,
/// then the rest; within each group the largest go first. Returns the
/// number of entries removed.
pub fn evict_excess(
    db: &mut dyn ExampleDatabase,
    key: &DatabaseKey,
    max_entries: usize,
    protected: &HashSet<Vec<u8>>,
) -> DatabaseResult<usize> {
    let entries = db.fetch(key)?;
    if entries.len() <= max_entries {
        return Ok(0);
    }

    let decoded: Vec<(Vec<u8>, Option<Vec<ChoiceValue>>)> = entries
        .into_iter()
        .map(|bytes| {
            let values = choices_from_bytes(&bytes).ok();
            (bytes, values)
        })
        .collect();

    let mut signatures: BTreeMap<Vec<ChoiceType>, usize> = BTreeMap::new();
    for (_, values) in &decoded {
        if let Some(values) = values {
            *signatures.entry(kind_signature(values)).or_default() += 1;
        }
    }

    let total = decoded.len();
    // (undecodable, duplicate signature, choice count, byte length); higher evicts first.
    let mut candidates: Vec<((bool, bool, usize, usize), Vec<u8>)> = decoded
        .into_iter()
        .filter(|(bytes, _)| !protected.contains(bytes))
        .map(|(bytes, values)| {
            let priority = match &values {
                None => (true, true, usize::MAX, bytes.len()),
                Some(values) => {
                    let duplicated = signatures.get(&kind_signature(values)).map_or(false, |&n| n > 1);
                    (false, duplicated, values.len(), bytes.len())
                }
            };
            (priority, bytes)
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let excess = total.saturating_sub(max_entries);
    let mut removed = 0;
    for (_, bytes) in candidates.into_iter().take(excess) {
        db.delete(key, &bytes)?;
        removed += 1;
    }
    if removed > 0 {
        log::debug!("evicted {} entries from {}", removed, key);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_hex_round_trip() {
        let key = DatabaseKey::for_test("test_function", b"data");
        assert_eq!(DatabaseKey::from_hex(&key.to_hex()).unwrap(), key);
        let secondary = key.with_sub_key(SECONDARY);
        assert_eq!(DatabaseKey::from_hex(&secondary.to_hex()).unwrap(), secondary);
        assert_eq!(secondary.primary(), key);
        assert!(DatabaseKey::from_hex("abc").is_err());
    }

    #[test]
    fn distinct_tests_have_distinct_keys() {
        let a = DatabaseKey::for_test("a", b"");
        let b = DatabaseKey::for_test("b", b"");
        assert_ne!(a, b);
        assert_ne!(a.seed(), b.seed());
        assert_eq!(a.seed(), DatabaseKey::for_test("a", b"").seed());
    }

    #[test]
    fn read_only_database_ignores_writes() {
        let mut inner = InMemoryDatabase::new();
        let key = DatabaseKey::for_test("t", b"");
        inner.save(&key, b"kept").unwrap();
        let mut db = ReadOnlyDatabase::new(inner);
        db.save(&key, b"dropped").unwrap();
        db.delete(&key, b"kept").unwrap();
        assert_eq!(db.fetch(&key).unwrap(), vec![b"kept".to_vec()]);
    }

    #[test]
    fn eviction_keeps_protected_and_prefers_duplicates() {
        let mut db = InMemoryDatabase::new();
        let key = DatabaseKey::for_test("t", b"");
        let small = choices_to_bytes(&[ChoiceValue::Integer(1)]);
        let dup_a = choices_to_bytes(&[ChoiceValue::Boolean(true), ChoiceValue::Boolean(false)]);
        let dup_b = choices_to_bytes(&[ChoiceValue::Boolean(false), ChoiceValue::Boolean(true)]);
        let unique = choices_to_bytes(&[ChoiceValue::Bytes(vec![1, 2, 3]), ChoiceValue::Index(0), ChoiceValue::Index(2)]);
        for value in [&small, &dup_a, &dup_b, &unique] {
            db.save(&key, value).unwrap();
        }
        db.save(&key, b"garbage").unwrap();

        let protected: HashSet<Vec<u8>> = [small.clone()].into_iter().collect();
        let removed = evict_excess(&mut db, &key, 3, &protected).unwrap();
        assert_eq!(removed, 2);
        let remaining = db.fetch(&key).unwrap();
        assert!(remaining.contains(&small));
        assert!(remaining.contains(&unique));
        assert!(!remaining.contains(&b"garbage".to_vec()));
        assert_eq!(remaining.len(), 3);
    }
}
