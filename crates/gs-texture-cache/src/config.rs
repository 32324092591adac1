use serde::{Deserialize, Serialize};

use crate::{CacheError, Result};

/// How sampled textures are brought in from local memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TexturePreloading {
    /// Upload whole textures, without deduplication.
    Off,
    /// Upload only the region a draw samples.
    #[default]
    Partial,
    /// Upload whole textures and deduplicate them through the hash cache.
    Full,
}

/// Whether newly created targets start with the contents of local memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePreload {
    /// Never preload; new targets start cleared.
    Never,
    /// Preload when the lookup asks for it.
    #[default]
    Requested,
    /// Preload every new target unless the lookup is a clear.
    Always,
}

impl FramePreload {
    pub fn resolve(self, requested: bool) -> bool {
        match self {
            FramePreload::Never => false,
            FramePreload::Requested => requested,
            FramePreload::Always => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub preloading: TexturePreloading,
    pub frame_preload: FramePreload,
    /// Resolution multiplier applied to new targets.
    pub upscale_multiplier: f32,
    /// Frames a source survives without being looked up.
    pub source_max_age: u32,
    /// Frames a target survives without being bound.
    pub target_max_age: u32,
    /// Frames an unreferenced hash-cache entry survives.
    pub hash_cache_max_age: u32,
    /// Bytes of uploaded textures kept in the hash cache before old entries are purged.
    pub hash_cache_budget: u64,
    pub surface_offset_cache_capacity: usize,
    /// Entries per palette map (16- and 256-colour palettes are counted separately).
    pub palette_map_capacity: usize,
    /// Draws a recorded transfer stays in the log.
    pub transfer_log_window: u64,
    pub transfer_log_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            preloading: TexturePreloading::default(),
            frame_preload: FramePreload::default(),
            upscale_multiplier: 1.0,
            source_max_age: 3,
            target_max_age: 30,
            hash_cache_max_age: 30,
            hash_cache_budget: 512 * 1024 * 1024,
            surface_offset_cache_capacity: 0xFFFF,
            palette_map_capacity: 0xFFFF,
            transfer_log_window: 2,
            transfer_log_capacity: 256,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.upscale_multiplier.is_finite() || self.upscale_multiplier <= 0.0 {
            return Err(CacheError::InvalidConfig(
                "upscale multiplier must be positive",
            ));
        }
        if self.surface_offset_cache_capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "surface offset cache capacity must be non-zero",
            ));
        }
        if self.palette_map_capacity == 0 {
            return Err(CacheError::InvalidConfig("palette map capacity must be non-zero"));
        }
        if self.transfer_log_capacity == 0 {
            return Err(CacheError::InvalidConfig("transfer log capacity must be non-zero"));
        }
        Ok(())
    }

    pub fn hash_cache_enabled(&self) -> bool {
        self.preloading == TexturePreloading::Full
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: CacheConfig =
            serde_json::from_str(r#"{"preloading":"full","upscale_multiplier":2.0}"#).unwrap();
        assert_eq!(cfg.preloading, TexturePreloading::Full);
        assert_eq!(cfg.upscale_multiplier, 2.0);
        assert_eq!(cfg.source_max_age, CacheConfig::default().source_max_age);
        assert!(cfg.hash_cache_enabled());
    }

    #[test]
    fn rejects_bad_values() {
        let cfg = CacheConfig {
            upscale_multiplier: 0.0,
            ..CacheConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CacheError::InvalidConfig(_))));
        CacheConfig::default().validate().unwrap();
    }

    #[test]
    fn frame_preload_resolution() {
        assert!(!FramePreload::Never.resolve(true));
        assert!(FramePreload::Requested.resolve(true));
        assert!(!FramePreload::Requested.resolve(false));
        assert!(FramePreload::Always.resolve(false));
    }
}
