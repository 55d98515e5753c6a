//! Content addressed store for prediction results.
//!
//! Keys are hex digests, values are opaque bytes. `put` always overwrites and nothing expires.

pub mod memory;
pub mod remote;
pub mod resp;

use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

pub use memory::MemoryCache;
pub use remote::RemoteCache;

use crate::Result;

/// Implementations must tolerate concurrent calls from many request threads.
pub trait Cache: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
  fn put(&self, key: &str, value: &[u8]) -> Result<()>;
  fn delete(&self, key: &str) -> Result<()>;
  /// Short name for logs.
  fn backend(&self) -> &'static str;
}

/// Picks the backend at startup: the remote store if it answers a `PING`, the in-process map
/// otherwise. Never fails.
pub fn select_backend(addr: Option<&str>, timeout: Duration) -> Arc<dyn Cache> {
  let addr = match addr {
    Some(addr) => addr,
    None => {
      info!("no cache address configured, using in-process cache");
      return Arc::new(MemoryCache::new());
    }
  };
  match RemoteCache::connect(addr, timeout).and_then(|cache| cache.ping().map(|_| cache)) {
    Ok(cache) => {
      info!(addr, "using remote cache");
      Arc::new(cache)
    }
    Err(err) => {
      warn!(addr, %err, "remote cache unreachable, falling back to in-process cache");
      Arc::new(MemoryCache::new())
    }
  }
}
