//! In-process [`CacheBackend`] used by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CacheBackend, CacheError};

#[derive(Default)]
pub struct MemoryBackend {
    lists: Mutex<HashMap<String, Vec<String>>>,
    ttls: Mutex<HashMap<String, u64>>,
    outage: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn fail_with_outage(&self, on: bool) {
        self.outage.store(on, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Vec<String> {
        self.lists.lock().unwrap().get(key).cloned().unwrap_or_default()
    }

    pub fn push_raw(&self, key: &str, value: &str) {
        self.lists.lock().unwrap().entry(key.to_owned()).or_default().push(value.to_owned());
    }

    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        self.ttls.lock().unwrap().get(key).copied()
    }

    fn enter(&self) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.outage.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout);
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn tail(&self, key: &str, limit: usize) -> Result<Vec<String>, CacheError> {
        self.enter()?;
        let lists = self.lists.lock().unwrap();
        let list = lists.get(key).map(Vec::as_slice).unwrap_or_default();
        Ok(list[list.len().saturating_sub(limit)..].to_vec())
    }

    async fn append(&self, key: &str, values: Vec<String>, ttl_seconds: u64) -> Result<(), CacheError> {
        self.enter()?;
        self.lists.lock().unwrap().entry(key.to_owned()).or_default().extend(values);
        self.ttls.lock().unwrap().insert(key.to_owned(), ttl_seconds);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.enter()?;
        self.lists.lock().unwrap().remove(key);
        self.ttls.lock().unwrap().remove(key);
        Ok(())
    }
}
