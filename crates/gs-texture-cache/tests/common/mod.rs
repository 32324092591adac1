#![allow(dead_code)]

use gs_mem::{ChannelMask, Clamp, GsPageMapper, LocalMemory, Rect, SurfaceDesc, Tex0, Texa};
use gs_texture_cache::{
    CacheConfig, GpuBackend, SoftwareBackend, SourceHandle, TargetHandle, TargetKind, TargetRequest,
    TextureCache, TexturePreloading,
};

pub type Cache = TextureCache<SoftwareBackend>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn cache() -> Cache {
    init_tracing();
    TextureCache::new(SoftwareBackend::new(), CacheConfig::default()).unwrap()
}

pub fn full_preload_cache() -> Cache {
    init_tracing();
    let config = CacheConfig {
        preloading: TexturePreloading::Full,
        ..CacheConfig::default()
    };
    TextureCache::new(SoftwareBackend::new(), config).unwrap()
}

/// Looks up a render target and marks all of it drawn with `color`.
pub fn drawn_target(
    cache: &mut Cache,
    mem: &LocalMemory,
    desc: SurfaceDesc,
    width: u32,
    height: u32,
    color: u32,
) -> TargetHandle {
    let t = cache
        .lookup_target(
            mem,
            &TargetRequest::new(desc, width, height, TargetKind::RenderTarget),
        )
        .unwrap();
    let texture = cache.target(t).unwrap().texture();
    cache.backend_mut().clear_render_target(texture, color).unwrap();
    let rect = Rect::from_size(width as i32, height as i32);
    cache.mark_drawn(t, &rect, ChannelMask::RGBA).unwrap();
    t
}

pub fn lookup(cache: &mut Cache, mem: &mut LocalMemory, tex0: &Tex0) -> SourceHandle {
    cache
        .lookup_source(mem, tex0, &Texa::default(), &Clamp::default(), None, None)
        .unwrap()
}

/// Writes `value` over `rect` of `desc`.
pub fn fill(mem: &mut LocalMemory, desc: &SurfaceDesc, rect: &Rect, value: u32) {
    for y in rect.top..rect.bottom {
        for x in rect.left..rect.right {
            mem.write_texel(&GsPageMapper, desc, x as u32, y as u32, value);
        }
    }
}

/// Writes a texel pattern unique to each position.
pub fn pattern(mem: &mut LocalMemory, desc: &SurfaceDesc, rect: &Rect, seed: u32) {
    for y in rect.top..rect.bottom {
        for x in rect.left..rect.right {
            let value = seed ^ ((y as u32) << 12) ^ (x as u32);
            mem.write_texel(&GsPageMapper, desc, x as u32, y as u32, value);
        }
    }
}
