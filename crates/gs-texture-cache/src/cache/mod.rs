//! The cache façade: registries of targets and sources plus the stores they share.
//!
//! The `impl TextureCache` is split by concern: lookups in `lookup.rs`, write handling in
//! `invalidate.rs`, and GPU-to-memory copies in `readback.rs`.

use std::fmt;

use gs_mem::{GsPageMapper, LocalMemory, PageMapper, Rect, SurfaceDesc};
use tracing::{debug, trace, warn};

use crate::source::SourceMap;
use crate::stats::Counters;
use crate::{
    Arena, CacheConfig, CacheError, CachePolicy, CacheStats, DefaultPolicy, FramePreload,
    GpuBackend, HashCache, HashCacheKey, PaletteMap, Result, Source, SourceHandle, SourceTexture,
    SurfaceOffset, SurfaceOffsetCache, SurfaceOffsetKey, Target, TargetHandle, TargetKind,
    TexturePreloading, TextureId, TransferLog,
};

mod invalidate;
mod lookup;
mod readback;

/// Parameters of [`TextureCache::lookup_target`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetRequest {
    pub desc: SurfaceDesc,
    pub width: u32,
    pub height: u32,
    pub kind: TargetKind,
    /// Resolution multiplier; the configured upscale multiplier when `None`.
    pub scale: Option<f32>,
    /// The draw will write to the target.
    pub used: bool,
    /// Frame buffer write mask. Masked bits keep the memory contents, so a non-zero mask
    /// forces a preload.
    pub fbmask: u32,
    /// The target is being scanned out.
    pub is_frame: bool,
    pub preload: bool,
    /// The draw overwrites the whole target; skips the preload.
    pub is_clear: bool,
}

impl TargetRequest {
    pub fn new(desc: SurfaceDesc, width: u32, height: u32, kind: TargetKind) -> Self {
        Self {
            desc,
            width,
            height,
            kind,
            scale: None,
            used: false,
            fbmask: 0,
            is_frame: false,
            preload: false,
            is_clear: false,
        }
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn used(mut self, used: bool) -> Self {
        self.used = used;
        self
    }

    pub fn fbmask(mut self, fbmask: u32) -> Self {
        self.fbmask = fbmask;
        self
    }

    pub fn frame(mut self, is_frame: bool) -> Self {
        self.is_frame = is_frame;
        self
    }

    pub fn preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    pub fn clear(mut self, is_clear: bool) -> Self {
        self.is_clear = is_clear;
        self
    }
}

/// GPU resources shadowing GS local memory.
///
/// Single-threaded: every operation runs to completion on the caller's thread, and backend
/// calls are treated as complete once issued.
pub struct TextureCache<B: GpuBackend, M: PageMapper = GsPageMapper> {
    backend: B,
    mapper: M,
    config: CacheConfig,
    policy: Box<dyn CachePolicy>,
    targets: Arena<Target>,
    sources: SourceMap,
    hash_cache: HashCache,
    palettes: PaletteMap,
    offsets: SurfaceOffsetCache,
    transfers: TransferLog,
    /// Index of the current draw, advanced by [`TextureCache::begin_draw`].
    draw: u64,
    counters: Counters,
}

impl<B: GpuBackend + fmt::Debug, M: PageMapper> fmt::Debug for TextureCache<B, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureCache")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("targets", &self.targets.len())
            .field("sources", &self.sources.len())
            .field("hash_cache", &self.hash_cache.len())
            .field("palettes", &self.palettes.len())
            .field("draw", &self.draw)
            .finish_non_exhaustive()
    }
}

impl<B: GpuBackend> TextureCache<B, GsPageMapper> {
    pub fn new(backend: B, config: CacheConfig) -> Result<Self> {
        Self::with_mapper(backend, GsPageMapper, config)
    }
}

impl<B: GpuBackend, M: PageMapper> TextureCache<B, M> {
    pub fn with_mapper(backend: B, mapper: M, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            mapper,
            policy: Box::new(DefaultPolicy),
            targets: Arena::new(),
            sources: SourceMap::default(),
            hash_cache: HashCache::new(),
            palettes: PaletteMap::new(config.palette_map_capacity),
            offsets: SurfaceOffsetCache::new(config.surface_offset_cache_capacity),
            transfers: TransferLog::new(config.transfer_log_capacity, config.transfer_log_window),
            draw: 0,
            counters: Counters::default(),
            config,
        })
    }

    pub fn set_policy(&mut self, policy: Box<dyn CachePolicy>) {
        self.policy = policy;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Texture replacement loaders create their textures through this.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn set_preloading(&mut self, preloading: TexturePreloading) {
        if self.config.preloading != preloading {
            // Existing sources keep their hash-cache references until destroyed.
            debug!(from = ?self.config.preloading, to = ?preloading, "texture preloading changed");
        }
        self.config.preloading = preloading;
    }

    pub fn set_frame_preload(&mut self, frame_preload: FramePreload) {
        self.config.frame_preload = frame_preload;
    }

    /// Applies to targets created from now on.
    pub fn set_upscale_multiplier(&mut self, multiplier: f32) -> Result<()> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(CacheError::InvalidConfig("upscale multiplier must be positive"));
        }
        self.config.upscale_multiplier = multiplier;
        Ok(())
    }

    pub fn set_max_ages(&mut self, source: u32, target: u32, hash_cache: u32) {
        self.config.source_max_age = source;
        self.config.target_max_age = target;
        self.config.hash_cache_max_age = hash_cache;
    }

    pub fn set_hash_cache_budget(&mut self, bytes: u64) {
        self.config.hash_cache_budget = bytes;
        self.hash_cache.evict_to_budget(&mut self.backend, bytes);
    }

    pub fn set_surface_offset_cache_capacity(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "surface offset cache capacity must be non-zero",
            ));
        }
        self.config.surface_offset_cache_capacity = capacity;
        self.offsets.set_capacity(capacity);
        Ok(())
    }

    pub fn set_palette_map_capacity(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(CacheError::InvalidConfig("palette map capacity must be non-zero"));
        }
        self.config.palette_map_capacity = capacity;
        self.palettes.set_capacity(capacity);
        Ok(())
    }

    pub fn set_transfer_log(&mut self, window: u64, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(CacheError::InvalidConfig("transfer log capacity must be non-zero"));
        }
        self.config.transfer_log_window = window;
        self.config.transfer_log_capacity = capacity;
        self.transfers.set_window(window);
        self.transfers.set_capacity(capacity);
        Ok(())
    }

    pub fn target(&self, handle: TargetHandle) -> Option<&Target> {
        self.targets.get(handle)
    }

    pub fn targets(&self) -> impl Iterator<Item = (TargetHandle, &Target)> {
        self.targets.iter()
    }

    pub fn source(&self, handle: SourceHandle) -> Option<&Source> {
        self.sources.get(handle)
    }

    pub fn sources(&self) -> impl Iterator<Item = (SourceHandle, &Source)> {
        self.sources.iter()
    }

    /// The texture a source samples from right now.
    ///
    /// Hash-cache sources resolve through their key, so injected replacements are seen
    /// immediately. Sources sharing a target follow the target's current texture and
    /// return `None` once it has been evicted.
    pub fn source_texture(&self, handle: SourceHandle) -> Option<TextureId> {
        match self.sources.get(handle)?.texture() {
            SourceTexture::Owned(id) => Some(*id),
            SourceTexture::Hashed(key) => self.hash_cache.texture(key),
            SourceTexture::Target {
                target,
                shared: true,
                ..
            } => self.targets.get(*target).map(Target::texture),
            SourceTexture::Target { texture, .. } => Some(*texture),
        }
    }

    pub fn hash_cache(&self) -> &HashCache {
        &self.hash_cache
    }

    pub fn transfer_log(&self) -> &TransferLog {
        &self.transfers
    }

    pub fn draw_index(&self) -> u64 {
        self.draw
    }

    /// Translates `a_rect` of `a` into the coordinates of `b`, clipped to `b_rect`.
    pub fn surface_offset(
        &mut self,
        a: SurfaceDesc,
        a_rect: Rect,
        b: SurfaceDesc,
        b_rect: Rect,
    ) -> SurfaceOffset {
        self.offsets.get_or_compute(
            &self.mapper,
            &SurfaceOffsetKey {
                a,
                a_rect,
                b,
                b_rect,
            },
        )
    }

    /// Swaps the texture behind a hash-cache entry for a decoded replacement. Takes
    /// ownership of `texture`, which must come from this cache's backend.
    pub fn inject_hash_cache_texture(&mut self, key: HashCacheKey, texture: TextureId, bytes: u64) {
        self.hash_cache.inject(&mut self.backend, key, texture, bytes);
    }

    /// Per-frame tick: ages every surface and purges whatever outlived its limit.
    ///
    /// Expired targets are dropped without being read back.
    pub fn inc_age(&mut self) {
        let max_age = self.config.source_max_age;
        let mut expired = Vec::new();
        for (handle, source) in self.sources.iter_mut() {
            source.base.age = source.base.age.saturating_add(1);
            if source.base.age > max_age {
                expired.push(handle);
            }
        }
        for handle in expired {
            self.destroy_source(handle);
        }

        let max_age = self.config.target_max_age;
        let mut expired = Vec::new();
        for (handle, target) in self.targets.iter_mut() {
            target.base.age = target.base.age.saturating_add(1);
            if target.base.age > max_age {
                expired.push(handle);
            }
        }
        for handle in expired {
            self.evict_target(handle);
        }

        self.hash_cache
            .inc_age(&mut self.backend, self.config.hash_cache_max_age);
        self.hash_cache
            .evict_to_budget(&mut self.backend, self.config.hash_cache_budget);
        self.palettes.purge(&mut self.backend);
    }

    /// Releases every resource the cache holds.
    pub fn remove_all(&mut self) {
        let sources = self.sources.drain();
        let targets = self.targets.drain();
        debug!(
            sources = sources.len(),
            targets = targets.len(),
            "removing all cached surfaces"
        );
        for source in sources {
            release_source(&mut self.backend, &mut self.hash_cache, source);
        }
        for target in targets {
            target.destroy(&mut self.backend);
        }
        self.hash_cache.clear(&mut self.backend);
        self.palettes.clear(&mut self.backend);
        self.offsets.clear();
        self.transfers.clear();
    }

    /// Writes every target's valid contents back to `mem`, then releases everything.
    ///
    /// Targets that fail to read back are still released; the first error is returned.
    pub fn readback_all(&mut self, mem: &mut LocalMemory) -> Result<()> {
        let mut result = Ok(());
        for handle in self.targets.handles() {
            let Some(valid) = self.targets.get(handle).map(Target::valid) else {
                continue;
            };
            if let Err(err) = self.read_target(handle, &valid, mem) {
                warn!(?handle, %err, "target readback failed");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        self.remove_all();
        result
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            targets: self.targets.len() as u64,
            sources: self.sources.len() as u64,
            hash_cache_entries: self.hash_cache.len() as u64,
            palettes: self.palettes.len() as u64,
            target_memory: self.targets.iter().map(|(_, t)| t.texture_bytes()).sum(),
            source_memory: self.sources.iter().map(|(_, s)| s.owned_bytes()).sum(),
            hash_cache_memory: self.hash_cache.memory_usage(),
            hash_cache_replacement_memory: self.hash_cache.replacement_memory_usage(),
            surface_offset_hits: self.offsets.hits(),
            surface_offset_misses: self.offsets.misses(),
            ..CacheStats::default()
        };
        self.counters.fill(&mut stats);
        stats
    }

    pub(crate) fn destroy_source(&mut self, handle: SourceHandle) {
        if let Some(source) = self.sources.remove(handle) {
            trace!(?handle, tbp0 = source.tex0().tbp0, "destroyed source");
            self.counters.source_evictions += 1;
            release_source(&mut self.backend, &mut self.hash_cache, source);
        }
    }

    /// Drops a target along with every source sampling its texture directly.
    pub(crate) fn evict_target(&mut self, handle: TargetHandle) {
        let Some(target) = self.targets.remove(handle) else {
            return;
        };
        let dependents: Vec<SourceHandle> = self
            .sources
            .iter()
            .filter(|(_, s)| s.shares_target() && s.from_target() == Some(handle))
            .map(|(h, _)| h)
            .collect();
        for source in dependents {
            self.destroy_source(source);
        }
        debug!(
            ?handle,
            bp = target.desc().bp,
            bw = target.desc().bw,
            psm = ?target.desc().psm,
            kind = ?target.kind(),
            "evicted target"
        );
        self.counters.target_evictions += 1;
        target.destroy(&mut self.backend);
    }

    /// Applies a target's pending writes.
    pub(crate) fn flush_target(
        &mut self,
        mem: &LocalMemory,
        handle: TargetHandle,
        reset_age: bool,
    ) -> Result<()> {
        let target = self
            .targets
            .get_mut(handle)
            .ok_or(CacheError::StaleHandle)?;
        if target.update(&mut self.backend, mem, &self.mapper, reset_age)? {
            self.counters.dirty_flushes += 1;
        }
        Ok(())
    }
}

fn release_source(backend: &mut impl GpuBackend, hash_cache: &mut HashCache, source: Source) {
    match source.texture {
        SourceTexture::Owned(id) => backend.destroy_texture(id),
        SourceTexture::Hashed(key) => hash_cache.release(&key),
        SourceTexture::Target {
            texture,
            shared: false,
            ..
        } => backend.destroy_texture(texture),
        SourceTexture::Target { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SoftwareBackend;
    use gs_mem::Psm;
    use pretty_assertions::assert_eq;

    fn cache() -> TextureCache<SoftwareBackend> {
        TextureCache::new(SoftwareBackend::new(), CacheConfig::default()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let config = CacheConfig {
            palette_map_capacity: 0,
            ..CacheConfig::default()
        };
        let err = TextureCache::new(SoftwareBackend::new(), config).unwrap_err();
        assert_eq!(err, CacheError::InvalidConfig("palette map capacity must be non-zero"));
    }

    #[test]
    fn targets_age_out_without_use() {
        let mut cache = cache();
        cache.set_max_ages(3, 1, 30);
        let mem = LocalMemory::new();
        let desc = SurfaceDesc::new(0, 1, Psm::Ct32);
        let req = TargetRequest::new(desc, 64, 32, TargetKind::RenderTarget);
        let t = cache.lookup_target(&mem, &req).unwrap();

        cache.inc_age();
        assert!(cache.target(t).is_some());
        cache.inc_age();
        assert!(cache.target(t).is_none());
        assert_eq!(cache.backend().texture_count(), 0);
        assert_eq!(cache.stats().target_evictions, 1);
    }

    #[test]
    fn remove_all_releases_every_texture() {
        let mut cache = cache();
        let mut mem = LocalMemory::new();
        let desc = SurfaceDesc::new(0, 1, Psm::Ct32);
        let req = TargetRequest::new(desc, 64, 32, TargetKind::RenderTarget);
        cache.lookup_target(&mem, &req).unwrap();
        let tex0 = gs_mem::Tex0::new(0x100, 1, Psm::T8, 4, 4);
        cache
            .lookup_source(&mut mem, &tex0, &Default::default(), &Default::default(), None, None)
            .unwrap();
        assert!(cache.backend().texture_count() >= 2);

        cache.remove_all();
        assert_eq!(cache.stats().targets, 0);
        assert_eq!(cache.stats().sources, 0);
        assert_eq!(cache.stats().palettes, 0);
        assert_eq!(cache.backend().texture_count(), 0);
    }

    #[test]
    fn setters_validate() {
        let mut cache = cache();
        assert!(cache.set_upscale_multiplier(-1.0).is_err());
        cache.set_upscale_multiplier(2.0).unwrap();
        assert_eq!(cache.config().upscale_multiplier, 2.0);
        assert!(cache.set_transfer_log(2, 0).is_err());
    }
}
