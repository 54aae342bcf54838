use std::num::NonZeroUsize;

use lru::LruCache;
use serde_json::Value;

use crate::core::Hash32;
use crate::engine::Process;
use crate::error::Flow;

/// Remembers the results of an expensive, idempotent process, keyed by its
/// input.
///
/// At most `capacity` results are kept, the least recently used ones are
/// evicted first. Failures and control signals are never remembered.
pub struct Memoize<P> {
    inner: P,
    cache: LruCache<Hash32, Value>,
    hits: u64,
}

impl<P: Process> Memoize<P> {
    pub fn new(inner: P, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: LruCache::new(capacity),
            hits: 0,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}

impl<P: Process> Process for Memoize<P> {
    fn name(&self) -> String {
        format!("Memoize({})", self.inner.name())
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        let key = Hash32::of_value(&value);
        if let Some(hit) = self.cache.get(&key) {
            self.hits += 1;
            tracing::trace!(key = ?key, "memo hit");
            return Ok(hit.clone());
        }

        let result = self.inner.process(value)?;
        self.cache.put(key, result.clone());
        Ok(result)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}
