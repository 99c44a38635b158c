use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::{DatabaseError, DatabaseKey, DatabaseResult, ExampleDatabase};

enum Command {
    Save(DatabaseKey, Vec<u8>),
    Delete(DatabaseKey, Vec<u8>),
    Move(DatabaseKey, DatabaseKey, Vec<u8>),
    Flush(Sender<()>),
}

/// Wraps another database and performs its writes on a worker thread.
///
/// Writes return immediately. `fetch` and `flush` wait for every write
/// queued before them, so a caller always reads its own writes. Dropping
/// the wrapper drains the queue.
pub struct BackgroundDatabase<D: ExampleDatabase + 'static> {
    inner: Arc<Mutex<D>>,
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl<D: ExampleDatabase + 'static> fmt::Debug for BackgroundDatabase<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundDatabase").field("inner", &self.inner).finish()
    }
}

fn worker_gone() -> DatabaseError {
    DatabaseError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "database worker has stopped"))
}

fn run_worker<D: ExampleDatabase>(inner: Arc<Mutex<D>>, commands: Receiver<Command>) {
    for command in commands {
        let Ok(mut db) = inner.lock() else {
            log::warn!("background database lock poisoned; dropping queued writes");
            return;
        };
        let result = match command {
            Command::Save(key, value) => db.save(&key, &value),
            Command::Delete(key, value) => db.delete(&key, &value),
            Command::Move(src, dest, value) => db.move_value(&src, &dest, &value),
            Command::Flush(done) => {
                let result = db.flush();
                let _ = done.send(());
                result
            }
        };
        if let Err(e) = result {
            log::warn!("background database write failed: {}", e);
        }
    }
}

impl<D: ExampleDatabase + 'static> BackgroundDatabase<D> {
    pub fn new(inner: D) -> DatabaseResult<Self> {
        let inner = Arc::new(Mutex::new(inner));
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("example-database-writer".to_string())
            .spawn(move || run_worker(shared, receiver))?;
        Ok(BackgroundDatabase { inner, sender: Some(sender), worker: Some(worker) })
    }

    fn send(&self, command: Command) -> DatabaseResult<()> {
        self.sender.as_ref().ok_or_else(worker_gone)?.send(command).map_err(|_| worker_gone())
    }

    fn wait_for_writes(&self) -> DatabaseResult<()> {
        let (done, finished) = mpsc::channel();
        self.send(Command::Flush(done))?;
        finished.recv().map_err(|_| worker_gone())
    }
}

impl<D: ExampleDatabase + 'static> ExampleDatabase for BackgroundDatabase<D> {
    fn save(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        self.send(Command::Save(key.clone(), value.to_vec()))
    }

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>> {
        self.wait_for_writes()?;
        let db = self
            .inner
            .lock()
            .map_err(|_| DatabaseError::Corruption("background database lock poisoned".to_string()))?;
        db.fetch(key)
    }

    fn delete(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        self.send(Command::Delete(key.clone(), value.to_vec()))
    }

    fn move_value(&mut self, src: &DatabaseKey, dest: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        self.send(Command::Move(src.clone(), dest.clone(), value.to_vec()))
    }

    fn flush(&mut self) -> DatabaseResult<()> {
        self.wait_for_writes()
    }
}

impl<D: ExampleDatabase + 'static> Drop for BackgroundDatabase<D> {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish the queue and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("background database worker panicked");
            }
        }
    }
}
