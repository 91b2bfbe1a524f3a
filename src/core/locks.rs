//! Per-key mutual exclusion.
//!
//! Ingestion serializes work on narrow keys (an identifying property, a statement id,
//! an `(actor, activity, registration)` triple, a state document key) so unrelated
//! learners never contend. Each key maps to its own mutex; the table itself is only
//! held long enough to fetch, insert or retire an entry.

use crate::core::error::LrsError;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct KeyedLocks {
    entries: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire_entry(&self, key: &str) -> Result<Arc<Mutex<()>>, LrsError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LrsError::LockPoisoned("keyed lock table".to_string()))?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Ok(Arc::clone(entry))
    }

    /// Drops the table's entry once no other caller holds or waits on it.
    fn retire_entry(&self, key: &str, entry: Arc<Mutex<()>>) {
        if let Ok(mut entries) = self.entries.lock() {
            // One reference in the table, one here: nobody else is interested.
            if Arc::strong_count(&entry) == 2 {
                entries.remove(key);
            }
        }
    }

    /// Runs `f` while holding the lock for `key`.
    pub fn with_lock<F, R>(&self, key: &str, f: F) -> Result<R, LrsError>
    where
        F: FnOnce() -> Result<R, LrsError>,
    {
        let entry = self.acquire_entry(key)?;
        let result = {
            let _guard = entry
                .lock()
                .map_err(|_| LrsError::LockPoisoned(format!("key '{}'", key)))?;
            f()
        };
        self.retire_entry(key, entry);
        result
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(Mutex::new(0u32));
        let max_inside = Arc::new(Mutex::new(0u32));
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                locks
                    .with_lock("k", || {
                        let now = {
                            let mut n = inside.lock().unwrap();
                            *n += 1;
                            *n
                        };
                        {
                            let mut m = max_inside.lock().unwrap();
                            *m = (*m).max(now);
                        }
                        thread::sleep(std::time::Duration::from_millis(2));
                        *inside.lock().unwrap() -= 1;
                        Ok(())
                    })
                    .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*max_inside.lock().unwrap(), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn distinct_keys_nest_without_deadlock() {
        let locks = KeyedLocks::new();
        let out = locks
            .with_lock("a", || locks.with_lock("b", || Ok(locks.len())))
            .unwrap();
        assert_eq!(out, 2);
        assert!(locks.is_empty());
    }

    #[test]
    fn error_from_closure_still_releases() {
        let locks = KeyedLocks::new();
        let err = locks
            .with_lock("k", || -> Result<(), LrsError> { Err(LrsError::validation("nope")) })
            .unwrap_err();
        assert!(matches!(err, LrsError::ValidationError(_)));
        assert!(locks.with_lock("k", || Ok(1)).is_ok());
    }
}
