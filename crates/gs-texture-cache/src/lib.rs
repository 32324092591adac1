//! Texture and render-target cache for an emulated GS.
//!
//! [`TextureCache`] shadows regions of GS local memory with GPU resources:
//!
//! - *targets* ([`Target`]): render targets and depth buffers the GS draws into
//! - *sources* ([`Source`]): textures sampled by draws, uploaded from memory or taken from a
//!   target
//!
//! Uploaded sources are deduplicated by content through the hash cache, and indexed formats
//! share palettes through the palette map. Writes reach the cache through two entry points:
//! [`TextureCache::invalidate_video_mem`] after the GS has written pixels, and
//! [`TextureCache::invalidate_local_mem`] after the host wrote memory directly. The latter
//! queues dirty rectangles that are applied the next time a target is bound.
//!
//! All GPU work goes through the [`GpuBackend`] trait; [`SoftwareBackend`] keeps textures in
//! host memory and is what the tests render with.

#![forbid(unsafe_code)]

mod arena;
mod backend;
mod cache;
mod config;
mod dirty;
mod error;
mod hash_cache;
mod offset;
mod palette;
mod policy;
mod source;
mod stats;
mod surface;
mod target;
mod transfer_log;

pub use arena::{Arena, Handle};
pub use backend::{software::SoftwareBackend, GpuBackend, TextureDesc, TextureId, TextureKind};
pub use cache::{TargetRequest, TextureCache};
pub use config::{CacheConfig, FramePreload, TexturePreloading};
pub use dirty::{DirtyRect, DirtyRectList};
pub use error::{BackendError, CacheError, Result};
pub use hash_cache::{HashCache, HashCacheEntry, HashCacheKey};
pub use offset::{SurfaceOffset, SurfaceOffsetCache, SurfaceOffsetKey};
pub use palette::{Palette, PaletteMap};
pub use policy::{CachePolicy, DefaultPolicy};
pub use source::{MipChain, Source, SourceHandle, SourceRegion, SourceTexture};
pub use stats::CacheStats;
pub use surface::SurfaceBase;
pub use target::{Target, TargetHandle, TargetKind};
pub use transfer_log::{TransferLog, TransferRecord};

pub use gs_mem;
