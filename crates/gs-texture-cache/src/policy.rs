use gs_mem::{SurfaceDesc, Tex0};

/// Per-title adjustments to cache decisions.
///
/// Hosts install one through [`crate::TextureCache::set_policy`]. Every hook receives the
/// cache's own decision and returns the one to use.
pub trait CachePolicy {
    fn target_scale(&self, _desc: &SurfaceDesc, scale: f32) -> f32 {
        scale
    }

    fn preload_target(&self, _desc: &SurfaceDesc, _is_frame: bool, preload: bool) -> bool {
        preload
    }

    fn use_hash_cache(&self, _tex0: &Tex0, enabled: bool) -> bool {
        enabled
    }

    /// Whether content of an overlapped target at `old` is copied into the new target at
    /// `new` before the old one is evicted.
    fn migrate_overlap(&self, _old: &SurfaceDesc, _new: &SurfaceDesc) -> bool {
        true
    }
}

/// No adjustments.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl CachePolicy for DefaultPolicy {}
