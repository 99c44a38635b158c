use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use super::{DatabaseError, DatabaseKey, DatabaseResult, ExampleDatabase};

type Store = HashMap<DatabaseKey, BTreeSet<Vec<u8>>>;

/// Process-local database. Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    data: Arc<RwLock<Store>>,
}

impl fmt::Debug for InMemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDatabase").field("keys", &self.key_count()).finish()
    }
}

fn poisoned<T>(_: T) -> DatabaseError {
    DatabaseError::Corruption("in-memory store lock poisoned".to_string())
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_count(&self) -> usize {
        self.data.read().map(|data| data.len()).unwrap_or(0)
    }

    pub fn example_count(&self) -> usize {
        self.data.read().map(|data| data.values().map(BTreeSet::len).sum()).unwrap_or(0)
    }
}

impl ExampleDatabase for InMemoryDatabase {
    fn save(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.entry(key.clone()).or_default().insert(value.to_vec());
        Ok(())
    }

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(key).map(|values| values.iter().cloned().collect()).unwrap_or_default())
    }

    fn delete(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        if let Some(values) = data.get_mut(key) {
            values.remove(value);
            if values.is_empty() {
                data.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_fetch_delete() {
        let mut db = InMemoryDatabase::new();
        let key = DatabaseKey::for_test("test", b"");
        db.save(&key, b"example").unwrap();
        db.save(&key, b"example").unwrap();
        assert_eq!(db.fetch(&key).unwrap(), vec![b"example".to_vec()]);
        db.delete(&key, b"example").unwrap();
        assert!(db.fetch(&key).unwrap().is_empty());
        assert_eq!(db.key_count(), 0);
    }

    #[test]
    fn clones_share_storage() {
        let mut db = InMemoryDatabase::new();
        let view = db.clone();
        let key = DatabaseKey::for_test("test", b"");
        db.save(&key, b"a").unwrap();
        db.move_value(&key, &key.with_sub_key("secondary"), b"a").unwrap();
        assert!(view.fetch(&key).unwrap().is_empty());
        assert_eq!(view.fetch(&key.with_sub_key("secondary")).unwrap().len(), 1);
        assert_eq!(view.example_count(), 1);
    }
}
