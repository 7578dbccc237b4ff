//! Compiled-program caching
//!
//! `compile_module` consults a process-wide LRU cache keyed by a structural
//! fingerprint of the entry-point AST and the optimizer level. Compilation
//! is deterministic (identical AST and level produce byte-identical
//! images), so a cached program is indistinguishable from a fresh one.
//!
//! The cache uses LRU eviction for bounded memory; capacity comes from
//! `GLYPH_BYTECODE_CACHE_SIZE` when set.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock, RwLock};

use lru::LruCache;
use tracing::warn;

use super::program::BytecodeProgram;

/// Statistics for cache monitoring
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a cached program
    pub hits: u64,
    /// Lookups that missed
    pub misses: u64,
}

/// Process-wide cache of compiled entry points
static PROGRAM_CACHE: LazyLock<RwLock<LruCache<u64, Arc<BytecodeProgram>>>> =
    LazyLock::new(|| RwLock::new(LruCache::new(cache_size())));

/// Global statistics
static CACHE_STATS: LazyLock<RwLock<CacheStats>> =
    LazyLock::new(|| RwLock::new(CacheStats::default()));

fn cache_size() -> NonZeroUsize {
    std::env::var("GLYPH_BYTECODE_CACHE_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .and_then(NonZeroUsize::new)
        .unwrap_or(NonZeroUsize::new(1024).expect("1024 is non-zero"))
}

/// Structural fingerprint of a hashable entry (AST plus optimizer level)
pub fn fingerprint<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Look up a compiled program by fingerprint
pub fn lookup(key: u64) -> Option<Arc<BytecodeProgram>> {
    let Ok(mut cache) = PROGRAM_CACHE.write() else {
        warn!(target: "glyphcore::cache", "program cache lock poisoned");
        return None;
    };
    let hit = cache.get(&key).cloned();
    if let Ok(mut stats) = CACHE_STATS.write() {
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
    }
    hit
}

/// Insert a compiled program under its fingerprint
pub fn insert(key: u64, program: Arc<BytecodeProgram>) {
    let Ok(mut cache) = PROGRAM_CACHE.write() else {
        warn!(target: "glyphcore::cache", "program cache lock poisoned");
        return;
    };
    cache.put(key, program);
}

/// Snapshot of the hit/miss counters
pub fn stats() -> CacheStats {
    CACHE_STATS
        .read()
        .map(|s| s.clone())
        .unwrap_or_default()
}

/// Drop every cached program and reset the counters
pub fn clear() {
    if let Ok(mut cache) = PROGRAM_CACHE.write() {
        cache.clear();
    }
    if let Ok(mut stats) = CACHE_STATS.write() {
        *stats = CacheStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcodes::Opcode;
    use crate::bytecode::program::ProgramBuilder;

    #[test]
    fn test_fingerprint_is_structural() {
        let a = ("route", "GET /users", 1u8);
        let b = ("route", "GET /users", 1u8);
        let c = ("route", "GET /posts", 1u8);
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut builder = ProgramBuilder::new();
        builder.emit(Opcode::Halt);
        let program = builder.build_arc();

        let key = fingerprint(&"test_insert_and_lookup");
        assert!(lookup(key).is_none());
        insert(key, program.clone());
        let cached = lookup(key).expect("just inserted");
        assert!(Arc::ptr_eq(&cached, &program));
    }
}
