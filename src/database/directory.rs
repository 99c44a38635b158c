use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::{DatabaseKey, DatabaseResult, ExampleDatabase};

/// File-backed database.
///
/// Layout: `<base>/<key hex>/<value hash>`, one file per stored value, named
/// by the hex of the first 16 bytes of the value's SHA-256. Files are never
/// modified in place: a value is written to a temporary file in the key
/// directory and renamed into place, so concurrent readers and writers in
/// other processes never observe a partial file.
#[derive(Debug, Clone)]
pub struct DirectoryDatabase {
    base_path: PathBuf,
}

fn value_name(value: &[u8]) -> String {
    hex::encode(&Sha256::digest(value)[..16])
}

impl DirectoryDatabase {
    pub fn new<P: AsRef<Path>>(base_path: P) -> DatabaseResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(DirectoryDatabase { base_path })
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    fn key_dir(&self, key: &DatabaseKey) -> PathBuf {
        self.base_path.join(key.to_hex())
    }

    fn value_path(&self, key: &DatabaseKey, value: &[u8]) -> PathBuf {
        self.key_dir(key).join(value_name(value))
    }

    fn atomic_write(&self, dir: &Path, path: &Path, value: &[u8]) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(value)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Read one stored value, or `None` if it is gone or does not match its name.
    fn read_entry(&self, path: &Path) -> Option<Vec<u8>> {
        let name = path.file_name()?.to_str()?;
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("skipping unreadable database entry {}: {}", path.display(), e);
                return None;
            }
        };
        if value_name(&data) != name {
            log::warn!("skipping database entry {} whose contents do not match its name", path.display());
            return None;
        }
        Some(data)
    }
}

impl ExampleDatabase for DirectoryDatabase {
    fn save(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        let path = self.value_path(key, value);
        if path.exists() {
            return Ok(());
        }
        self.atomic_write(&self.key_dir(key), &path, value)?;
        log::debug!("saved {} bytes to {}", value.len(), path.display());
        Ok(())
    }

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>> {
        let dir = self.key_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    log::warn!("skipping unreadable entry in {}: {}", dir.display(), e);
                    None
                }
            })
            // In-flight temporary files start with a dot.
            .filter(|path| path.file_name().and_then(|n| n.to_str()).map_or(false, |n| !n.starts_with('.')))
            .collect();
        paths.sort();
        Ok(paths.iter().filter_map(|path| self.read_entry(path)).collect())
    }

    fn delete(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        match fs::remove_file(self.value_path(key, value)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn move_value(&mut self, src: &DatabaseKey, dest: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        if src == dest {
            return self.save(src, value);
        }
        let from = self.value_path(src, value);
        let to = self.value_path(dest, value);
        fs::create_dir_all(self.key_dir(dest))?;
        match fs::rename(&from, &to) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.save(dest, value)?;
                self.delete(src, value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persists_across_instances() {
        let dir = tempdir().unwrap();
        let key = DatabaseKey::for_test("test", b"");
        let mut db = DirectoryDatabase::new(dir.path()).unwrap();
        db.save(&key, b"example").unwrap();
        let reopened = DirectoryDatabase::new(dir.path()).unwrap();
        assert_eq!(reopened.fetch(&key).unwrap(), vec![b"example".to_vec()]);
    }

    #[test]
    fn missing_key_is_empty() {
        let dir = tempdir().unwrap();
        let db = DirectoryDatabase::new(dir.path()).unwrap();
        assert!(db.fetch(&DatabaseKey::for_test("nothing", b"")).unwrap().is_empty());
    }

    #[test]
    fn mismatched_file_is_skipped() {
        let dir = tempdir().unwrap();
        let key = DatabaseKey::for_test("test", b"");
        let mut db = DirectoryDatabase::new(dir.path()).unwrap();
        db.save(&key, b"good").unwrap();
        fs::write(dir.path().join(key.to_hex()).join("0123456789abcdef0123456789abcdef"), b"bad").unwrap();
        assert_eq!(db.fetch(&key).unwrap(), vec![b"good".to_vec()]);
    }

    #[test]
    fn move_value_renames() {
        let dir = tempdir().unwrap();
        let key = DatabaseKey::for_test("test", b"");
        let secondary = key.with_sub_key("secondary");
        let mut db = DirectoryDatabase::new(dir.path()).unwrap();
        db.save(&key, b"v").unwrap();
        db.move_value(&key, &secondary, b"v").unwrap();
        assert!(db.fetch(&key).unwrap().is_empty());
        assert_eq!(db.fetch(&secondary).unwrap(), vec![b"v".to_vec()]);
        db.delete(&secondary, b"v").unwrap();
        db.delete(&secondary, b"v").unwrap();
    }
}
