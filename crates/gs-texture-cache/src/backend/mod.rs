//! GPU backend abstraction.
//!
//! The cache only ever creates, copies, clears, uploads to and downloads from textures; the
//! trait is kept to those primitives so it can sit on top of any host graphics API.

use gs_mem::{ChannelMask, Rect};

use crate::BackendError;

pub mod software;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    RenderTarget,
    DepthStencil,
    Texture,
    Palette,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    /// Mip levels, including the base level.
    pub levels: u32,
}

impl TextureDesc {
    pub fn new(kind: TextureKind, width: u32, height: u32) -> Self {
        Self {
            kind,
            width,
            height,
            levels: 1,
        }
    }

    pub fn with_levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }

    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    /// Bytes used by every level at four bytes per texel.
    pub fn byte_size(&self) -> u64 {
        (0..self.levels.max(1))
            .map(|level| {
                let (w, h) = self.level_size(level);
                u64::from(w) * u64::from(h) * 4
            })
            .sum()
    }
}

/// Texture operations the cache needs from the host GPU.
///
/// Texels are `u32`: RGBA8 (`0xAABBGGRR`) for colour textures, the raw value for depth.
/// Every operation completes before returning as far as the cache is concerned.
pub trait GpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, BackendError>;

    /// Destroying an unknown id is a no-op.
    fn destroy_texture(&mut self, id: TextureId);

    fn texture_size(&self, id: TextureId) -> Option<(u32, u32)>;

    /// Copies `src_rect` of `src` to `(dst_x, dst_y)` in `dst`. Both rectangles are clipped to
    /// their textures.
    fn copy_rect(
        &mut self,
        src: TextureId,
        src_rect: &Rect,
        dst: TextureId,
        dst_x: i32,
        dst_y: i32,
    ) -> Result<(), BackendError>;

    /// Scaled copy writing only the channels in `mask`.
    fn stretch_rect(
        &mut self,
        src: TextureId,
        src_rect: &Rect,
        dst: TextureId,
        dst_rect: &Rect,
        mask: ChannelMask,
    ) -> Result<(), BackendError>;

    fn clear_render_target(&mut self, id: TextureId, color: u32) -> Result<(), BackendError>;

    fn clear_depth(&mut self, id: TextureId, depth: u32) -> Result<(), BackendError>;

    /// Writes row-major `texels` into `rect` of mip `level`.
    fn upload(
        &mut self,
        id: TextureId,
        level: u32,
        rect: &Rect,
        texels: &[u32],
    ) -> Result<(), BackendError>;

    /// Reads `rect` of the base level, blocking until the data is available.
    fn download(&mut self, id: TextureId, rect: &Rect) -> Result<Vec<u32>, BackendError>;

    /// Bytes currently allocated for textures.
    fn memory_usage(&self) -> u64;
}
