use gs_mem::{Psm, Tex0, Texa};
use hashbrown::HashMap;
use tracing::{debug, trace};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::source::normalize_texa;
use crate::{GpuBackend, SourceRegion, TextureId};

/// Identity of an uploaded texture: its content plus the state that affects how it samples.
///
/// The base pointer is deliberately absent so identical textures stored at different
/// addresses share one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashCacheKey {
    pub tex_hash: u64,
    pub clut_hash: u64,
    pub psm: Psm,
    pub tw: u8,
    pub th: u8,
    pub texa: Texa,
    pub region: SourceRegion,
    pub levels: u32,
}

impl HashCacheKey {
    /// `levels` holds the texels of each uploaded mip level, base first.
    pub fn new(
        tex0: &Tex0,
        texa: &Texa,
        levels: &[Vec<u32>],
        clut: Option<&[u32]>,
        region: SourceRegion,
    ) -> Self {
        let mut hasher = Xxh3::new();
        for level in levels {
            hasher.update(bytemuck::cast_slice(level));
        }
        Self {
            tex_hash: hasher.digest(),
            clut_hash: clut.map_or(0, |clut| xxh3_64(bytemuck::cast_slice(clut))),
            psm: tex0.psm,
            tw: tex0.tw,
            th: tex0.th,
            texa: normalize_texa(tex0.psm, texa),
            region,
            levels: levels.len() as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashCacheEntry {
    pub texture: TextureId,
    /// Sources currently using the entry.
    pub refcount: u32,
    pub age: u32,
    /// Set once the texture was swapped for an externally loaded replacement.
    pub is_replacement: bool,
    pub bytes: u64,
}

/// Content-addressed store of uploaded textures.
#[derive(Debug, Default)]
pub struct HashCache {
    entries: HashMap<HashCacheKey, HashCacheEntry>,
    memory: u64,
    replacement_memory: u64,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes of textures uploaded from memory.
    pub fn memory_usage(&self) -> u64 {
        self.memory
    }

    /// Bytes of injected replacement textures.
    pub fn replacement_memory_usage(&self) -> u64 {
        self.replacement_memory
    }

    pub fn entry(&self, key: &HashCacheKey) -> Option<&HashCacheEntry> {
        self.entries.get(key)
    }

    /// Current texture of `key`, without taking a reference.
    pub fn texture(&self, key: &HashCacheKey) -> Option<TextureId> {
        self.entries.get(key).map(|e| e.texture)
    }

    /// Takes a reference on an existing entry.
    pub fn acquire(&mut self, key: &HashCacheKey) -> Option<TextureId> {
        let entry = self.entries.get_mut(key)?;
        entry.refcount += 1;
        entry.age = 0;
        trace!(hash = key.tex_hash, refcount = entry.refcount, "hash cache hit");
        Some(entry.texture)
    }

    /// Adds a freshly uploaded texture holding one reference.
    pub fn insert(&mut self, key: HashCacheKey, texture: TextureId, bytes: u64) {
        self.memory += bytes;
        let previous = self.entries.insert(
            key,
            HashCacheEntry {
                texture,
                refcount: 1,
                age: 0,
                is_replacement: false,
                bytes,
            },
        );
        debug_assert!(previous.is_none(), "hash cache entry inserted twice");
    }

    pub fn release(&mut self, key: &HashCacheKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.refcount = entry.refcount.saturating_sub(1);
        }
    }

    /// Swaps the texture behind `key` for a replacement. Every source referencing the key
    /// samples the new texture from now on. Unknown keys get an unreferenced entry.
    pub fn inject(
        &mut self,
        backend: &mut impl GpuBackend,
        key: HashCacheKey,
        texture: TextureId,
        bytes: u64,
    ) {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                if entry.is_replacement {
                    self.replacement_memory -= entry.bytes;
                } else {
                    self.memory -= entry.bytes;
                }
                backend.destroy_texture(entry.texture);
                entry.texture = texture;
                entry.bytes = bytes;
                entry.is_replacement = true;
            }
            None => {
                self.entries.insert(
                    key,
                    HashCacheEntry {
                        texture,
                        refcount: 0,
                        age: 0,
                        is_replacement: true,
                        bytes,
                    },
                );
            }
        }
        self.replacement_memory += bytes;
        debug!(hash = key.tex_hash, bytes, "injected replacement texture");
    }

    /// Ages every entry and purges unreferenced ones older than `max_age`.
    pub fn inc_age(&mut self, backend: &mut impl GpuBackend, max_age: u32) {
        for entry in self.entries.values_mut() {
            entry.age = entry.age.saturating_add(1);
        }
        self.purge_where(backend, |e| e.refcount == 0 && e.age > max_age);
    }

    /// Purges unreferenced entries, oldest first, until usage fits `budget`.
    pub fn evict_to_budget(&mut self, backend: &mut impl GpuBackend, budget: u64) {
        if self.memory + self.replacement_memory <= budget {
            return;
        }
        let mut candidates: Vec<(u32, HashCacheKey)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.refcount == 0)
            .map(|(k, e)| (e.age, *k))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, key) in candidates {
            if self.memory + self.replacement_memory <= budget {
                break;
            }
            self.remove(backend, &key);
        }
    }

    pub fn clear(&mut self, backend: &mut impl GpuBackend) {
        for (_, entry) in self.entries.drain() {
            backend.destroy_texture(entry.texture);
        }
        self.memory = 0;
        self.replacement_memory = 0;
    }

    fn purge_where(
        &mut self,
        backend: &mut impl GpuBackend,
        mut pred: impl FnMut(&HashCacheEntry) -> bool,
    ) {
        let doomed: Vec<HashCacheKey> = self
            .entries
            .iter()
            .filter(|(_, e)| pred(e))
            .map(|(k, _)| *k)
            .collect();
        for key in doomed {
            self.remove(backend, &key);
        }
    }

    fn remove(&mut self, backend: &mut impl GpuBackend, key: &HashCacheKey) {
        if let Some(entry) = self.entries.remove(key) {
            if entry.is_replacement {
                self.replacement_memory -= entry.bytes;
            } else {
                self.memory -= entry.bytes;
            }
            backend.destroy_texture(entry.texture);
            trace!(hash = key.tex_hash, age = entry.age, "purged hash cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SoftwareBackend, TextureDesc, TextureKind};

    fn key(seed: u32) -> HashCacheKey {
        let tex0 = Tex0::new(0, 1, Psm::Ct32, 3, 3);
        HashCacheKey::new(
            &tex0,
            &Texa::default(),
            &[vec![seed; 64]],
            None,
            SourceRegion::default(),
        )
    }

    fn texture(backend: &mut SoftwareBackend) -> TextureId {
        backend
            .create_texture(&TextureDesc::new(TextureKind::Texture, 8, 8))
            .unwrap()
    }

    #[test]
    fn keys_ignore_base_pointer_and_irrelevant_texa() {
        let texels = [vec![7u32; 64]];
        let a = HashCacheKey::new(
            &Tex0::new(0, 1, Psm::Ct32, 3, 3),
            &Texa::default(),
            &texels,
            None,
            SourceRegion::default(),
        );
        let b = HashCacheKey::new(
            &Tex0::new(0x200, 1, Psm::Ct32, 3, 3),
            &Texa {
                ta0: 1,
                aem: true,
                ta1: 2,
            },
            &texels,
            None,
            SourceRegion::default(),
        );
        assert_eq!(a, b);
        assert_ne!(a, key(8));
    }

    #[test]
    fn unreferenced_entries_age_out() {
        let mut backend = SoftwareBackend::new();
        let mut cache = HashCache::new();
        let tex = texture(&mut backend);
        cache.insert(key(1), tex, 256);
        cache.release(&key(1));

        cache.inc_age(&mut backend, 1);
        assert_eq!(cache.len(), 1);
        cache.inc_age(&mut backend, 1);
        assert!(cache.is_empty());
        assert!(!backend.contains(tex));
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn referenced_entries_survive_budget_eviction() {
        let mut backend = SoftwareBackend::new();
        let mut cache = HashCache::new();
        let (a, b) = (texture(&mut backend), texture(&mut backend));
        cache.insert(key(1), a, 256);
        cache.insert(key(2), b, 256);
        cache.release(&key(2));

        cache.evict_to_budget(&mut backend, 0);
        assert_eq!(cache.texture(&key(1)), Some(a));
        assert_eq!(cache.texture(&key(2)), None);
        assert_eq!(cache.memory_usage(), 256);
    }

    #[test]
    fn inject_swaps_texture_in_place() {
        let mut backend = SoftwareBackend::new();
        let mut cache = HashCache::new();
        let (old, new) = (texture(&mut backend), texture(&mut backend));
        cache.insert(key(1), old, 256);

        cache.inject(&mut backend, key(1), new, 1024);
        assert_eq!(cache.texture(&key(1)), Some(new));
        assert!(!backend.contains(old));
        assert_eq!(cache.memory_usage(), 0);
        assert_eq!(cache.replacement_memory_usage(), 1024);
        assert_eq!(cache.entry(&key(1)).map(|e| e.refcount), Some(1));
    }
}
