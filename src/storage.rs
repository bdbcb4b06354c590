use std::path::PathBuf;

use bevy::log::info;
use crossbeam_channel::{Receiver, Sender};

use crate::persistence::{MapDocument, MapStore, StorageError};

pub enum StorageCompletion {
    Loaded {
        name: String,
        result: Result<Option<MapDocument>, StorageError>,
    },
    Saved {
        name: String,
        result: Result<PathBuf, StorageError>,
    },
}

/// Runs map reads and writes off the frame thread. Results come back through
/// `poll`, which the session calls once per tick, so completions are always
/// applied on the frame thread.
pub struct StorageWorker {
    store: MapStore,
    tx: Sender<StorageCompletion>,
    rx: Receiver<StorageCompletion>,
    in_flight: usize,
}

impl StorageWorker {
    pub fn new(store: MapStore) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            store,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn begin_load(&mut self, name: &str) {
        let store = self.store.clone();
        let tx = self.tx.clone();
        let name = name.to_string();
        self.in_flight += 1;
        info!("[Gridwright storage] Loading '{name}'");
        std::thread::spawn(move || {
            let result = store.read(&name);
            let _ = tx.send(StorageCompletion::Loaded { name, result });
        });
    }

    /// `document` is an owned snapshot, so later edits cannot leak into the write.
    pub fn begin_save(&mut self, name: &str, document: MapDocument) {
        let store = self.store.clone();
        let tx = self.tx.clone();
        let name = name.to_string();
        self.in_flight += 1;
        info!("[Gridwright storage] Saving '{name}'");
        std::thread::spawn(move || {
            let result = store.write(&name, &document);
            let _ = tx.send(StorageCompletion::Saved { name, result });
        });
    }

    pub fn poll(&mut self) -> Vec<StorageCompletion> {
        let done: Vec<_> = self.rx.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(done.len());
        done
    }

    #[cfg(test)]
    pub fn wait(&mut self, timeout: std::time::Duration) -> Option<StorageCompletion> {
        let done = self.rx.recv_timeout(timeout).ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn save_then_load_completes_through_the_queue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut worker = StorageWorker::new(MapStore::new(dir.path()));
        let doc = MapDocument::default();

        worker.begin_save("map", doc.clone());
        assert_eq!(worker.in_flight(), 1);
        match worker.wait(Duration::from_secs(5)) {
            Some(StorageCompletion::Saved { name, result }) => {
                assert_eq!(name, "map");
                assert!(result.is_ok());
            }
            _ => panic!("expected save completion"),
        }

        worker.begin_load("map");
        match worker.wait(Duration::from_secs(5)) {
            Some(StorageCompletion::Loaded { result, .. }) => assert_eq!(result, Ok(Some(doc))),
            _ => panic!("expected load completion"),
        }
        assert_eq!(worker.in_flight(), 0);
        assert!(worker.poll().is_empty());
    }
}
