use serde::Serialize;

/// Snapshot of cache sizes and counters, for budget policies and profiling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub targets: u64,
    pub sources: u64,
    pub hash_cache_entries: u64,
    pub palettes: u64,

    pub target_memory: u64,
    pub source_memory: u64,
    pub hash_cache_memory: u64,
    pub hash_cache_replacement_memory: u64,

    pub source_hits: u64,
    pub source_misses: u64,
    pub source_evictions: u64,
    pub hash_cache_hits: u64,
    pub hash_cache_misses: u64,

    pub target_hits: u64,
    pub target_misses: u64,
    pub target_evictions: u64,
    pub target_migrations: u64,
    pub dirty_flushes: u64,

    pub surface_offset_hits: u64,
    pub surface_offset_misses: u64,
}

/// Running counters. Sizes are filled in when a snapshot is taken.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub source_hits: u64,
    pub source_misses: u64,
    pub source_evictions: u64,
    pub hash_cache_hits: u64,
    pub hash_cache_misses: u64,
    pub target_hits: u64,
    pub target_misses: u64,
    pub target_evictions: u64,
    pub target_migrations: u64,
    pub dirty_flushes: u64,
}

impl Counters {
    pub fn fill(&self, stats: &mut CacheStats) {
        stats.source_hits = self.source_hits;
        stats.source_misses = self.source_misses;
        stats.source_evictions = self.source_evictions;
        stats.hash_cache_hits = self.hash_cache_hits;
        stats.hash_cache_misses = self.hash_cache_misses;
        stats.target_hits = self.target_hits;
        stats.target_misses = self.target_misses;
        stats.target_evictions = self.target_evictions;
        stats.target_migrations = self.target_migrations;
        stats.dirty_flushes = self.dirty_flushes;
    }
}
