use std::{
  collections::HashMap,
  sync::{Mutex, MutexGuard, PoisonError},
};

use super::Cache;
use crate::Result;

/// Unbounded map living as long as the process.
#[derive(Debug, Default)]
pub struct MemoryCache {
  store: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  // a panic while holding the lock cannot leave the map half-updated
  fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
    self.store.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Cache for MemoryCache {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.lock().get(key).cloned())
  }

  fn put(&self, key: &str, value: &[u8]) -> Result<()> {
    self.lock().insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self.lock().remove(key);
    Ok(())
  }

  fn backend(&self) -> &'static str {
    "memory"
  }
}
