//! Example database behaviour through the public API, including several
//! writers sharing one directory.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use conjecture_engine::database::{
    choices_from_bytes, choices_to_bytes, evict_excess, BackgroundDatabase, ReadOnlyDatabase, SECONDARY,
};
use conjecture_engine::{
    ChoiceValue, ConjectureData, ConjectureRunner, DatabaseError, DatabaseKey, DatabaseSetting, DirectoryDatabase,
    ExampleDatabase, InMemoryDatabase, Settings, TestFailure, TestResult,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn encoded(values: &[i128]) -> Vec<u8> {
    let values: Vec<ChoiceValue> = values.iter().copied().map(ChoiceValue::Integer).collect();
    choices_to_bytes(&values)
}

fn sorted(mut entries: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    entries.sort();
    entries
}

#[test]
fn directory_database_round_trip() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let key = DatabaseKey::for_test("round_trip", b"");
    let mut db = DirectoryDatabase::new(dir.path()).unwrap();

    db.save(&key, &encoded(&[1, 2, 3])).unwrap();
    db.save(&key, &encoded(&[4])).unwrap();
    db.save(&key, &encoded(&[4])).unwrap();
    assert_eq!(sorted(db.fetch(&key).unwrap()), sorted(vec![encoded(&[1, 2, 3]), encoded(&[4])]));

    db.delete(&key, &encoded(&[4])).unwrap();
    db.delete(&key, &encoded(&[4])).unwrap();
    assert_eq!(db.fetch(&key).unwrap(), vec![encoded(&[1, 2, 3])]);

    let secondary = key.with_sub_key(SECONDARY);
    db.move_value(&key, &secondary, &encoded(&[1, 2, 3])).unwrap();
    assert!(db.fetch(&key).unwrap().is_empty());
    assert_eq!(db.fetch(&secondary).unwrap(), vec![encoded(&[1, 2, 3])]);
}

#[test]
fn concurrent_writers_lose_nothing() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let key = DatabaseKey::for_test("concurrent", b"");
    let writers = 4;
    let per_writer = 25;
    let barrier = Arc::new(Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let path = dir.path().to_path_buf();
            let key = key.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<(), DatabaseError> {
                let mut db = DirectoryDatabase::new(path)?;
                barrier.wait();
                for i in 0..per_writer {
                    db.save(&key, &encoded(&[w as i128, i as i128]))?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let db = DirectoryDatabase::new(dir.path()).unwrap();
    let stored: HashSet<Vec<u8>> = db.fetch(&key).unwrap().into_iter().collect();
    assert_eq!(stored.len(), writers * per_writer);
    for w in 0..writers {
        for i in 0..per_writer {
            assert!(stored.contains(&encoded(&[w as i128, i as i128])));
        }
    }
}

#[test]
fn background_writes_are_visible_after_flush() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let key = DatabaseKey::for_test("background", b"");
    let mut db = BackgroundDatabase::new(DirectoryDatabase::new(dir.path()).unwrap()).unwrap();
    for i in 0..10 {
        db.save(&key, &encoded(&[i])).unwrap();
    }
    db.delete(&key, &encoded(&[0])).unwrap();
    db.flush().unwrap();
    drop(db);

    let reopened = DirectoryDatabase::new(dir.path()).unwrap();
    assert_eq!(reopened.fetch(&key).unwrap().len(), 9);
}

#[test]
fn eviction_never_removes_protected_entries() {
    let mut db = InMemoryDatabase::new();
    let key = DatabaseKey::for_test("evict", b"");
    let entries: Vec<Vec<u8>> = (1..=10).map(|n| encoded(&vec![7; n])).collect();
    for entry in &entries {
        db.save(&key, entry).unwrap();
    }
    let protected: HashSet<Vec<u8>> = [entries[9].clone()].into_iter().collect();

    let removed = evict_excess(&mut db, &key, 4, &protected).unwrap();
    assert_eq!(removed, 6);
    let left: HashSet<Vec<u8>> = db.fetch(&key).unwrap().into_iter().collect();
    assert_eq!(left.len(), 4);
    assert!(left.contains(&entries[9]));
    assert!(left.contains(&entries[0]));
}

#[test]
fn read_only_wrapper_still_reads() {
    let mut inner = InMemoryDatabase::new();
    let key = DatabaseKey::for_test("read_only", b"");
    inner.save(&key, &encoded(&[1])).unwrap();
    let mut db = ReadOnlyDatabase::new(inner);
    db.save(&key, &encoded(&[2])).unwrap();
    db.delete(&key, &encoded(&[1])).unwrap();
    assert_eq!(db.fetch(&key).unwrap(), vec![encoded(&[1])]);
}

#[test]
fn runner_discards_corrupt_entries_and_saves_failures() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::default()
        .with_database(DatabaseSetting::Directory(dir.path().to_path_buf()))
        .with_seed(7)
        .with_deadline(None);
    let test = |data: &mut ConjectureData<'_>| -> TestResult {
        let n = data.draw_integer(Some(0), Some(1000))?;
        if n >= 300 {
            return Err(TestFailure::failed("n"));
        }
        Ok(())
    };

    let runner = ConjectureRunner::new("corrupt", test, settings).unwrap();
    let key = runner.database_key().clone();
    {
        let mut db = DirectoryDatabase::new(dir.path()).unwrap();
        db.save(&key, &[0xFF, 0x00, 0x01]).unwrap();
    }

    let report = runner.run().unwrap();
    assert_eq!(report.failures[0].choices, vec![ChoiceValue::Integer(300)]);

    let db = DirectoryDatabase::new(dir.path()).unwrap();
    let saved = db.fetch(&key).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(choices_from_bytes(&saved[0]).unwrap(), vec![ChoiceValue::Integer(300)]);
}
