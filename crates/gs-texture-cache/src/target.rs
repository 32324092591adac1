use gs_mem::{ChannelMask, LocalMemory, PageMapper, Psm, Rect, SurfaceDesc, Texa};
use tracing::trace;

use crate::surface::scaled_size;
use crate::{
    DirtyRect, DirtyRectList, GpuBackend, Handle, Result, SurfaceBase, TextureDesc, TextureId,
    TextureKind,
};

pub type TargetHandle = Handle<Target>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    RenderTarget,
    DepthStencil,
}

impl TargetKind {
    pub fn texture_kind(self) -> TextureKind {
        match self {
            TargetKind::RenderTarget => TextureKind::RenderTarget,
            TargetKind::DepthStencil => TextureKind::DepthStencil,
        }
    }

    pub fn other(self) -> Self {
        match self {
            TargetKind::RenderTarget => TargetKind::DepthStencil,
            TargetKind::DepthStencil => TargetKind::RenderTarget,
        }
    }
}

// 16-bit colour is stored with the alpha bit expanded to 0x80.
const TARGET_TEXA: Texa = Texa {
    ta0: 0,
    aem: false,
    ta1: 0x80,
};

/// Converts a raw texel read from local memory into a target texel.
pub(crate) fn memory_to_texture(psm: Psm, raw: u32) -> u32 {
    match psm {
        Psm::Ct16 | Psm::Ct16S => psm.texel_to_rgba(raw, &TARGET_TEXA),
        _ => raw << psm.info().fshift,
    }
}

/// Inverse of [`memory_to_texture`].
pub(crate) fn texture_to_memory(psm: Psm, value: u32) -> u32 {
    match psm {
        Psm::Ct16 | Psm::Ct16S => psm.rgba_to_texel(value),
        _ => {
            let info = psm.info();
            (value & info.fmsk) >> info.fshift
        }
    }
}

/// A render target or depth buffer shadowing part of local memory.
#[derive(Debug)]
pub struct Target {
    pub(crate) base: SurfaceBase,
    kind: TargetKind,
    texture: TextureId,
    valid: Rect,
    drawn: Rect,
    valid_bits: ChannelMask,
    pub(crate) dirty: DirtyRectList,
    pub(crate) is_frame: bool,
    pub(crate) used: bool,
}

impl Target {
    /// Allocates the texture for a `width` x `height` target at `scale`. The texture content
    /// is undefined and nothing is valid yet.
    pub(crate) fn create(
        backend: &mut impl GpuBackend,
        mapper: &impl PageMapper,
        desc: SurfaceDesc,
        kind: TargetKind,
        width: u32,
        height: u32,
        scale: f32,
    ) -> Result<Self> {
        let (w, h) = scaled_size(width, height, scale);
        let texture = backend.create_texture(&TextureDesc::new(kind.texture_kind(), w, h))?;
        Ok(Self {
            base: SurfaceBase::new(mapper, desc, Texa::default(), width, height, scale),
            kind,
            texture,
            valid: Rect::EMPTY,
            drawn: Rect::EMPTY,
            valid_bits: ChannelMask::empty(),
            dirty: DirtyRectList::default(),
            is_frame: false,
            used: false,
        })
    }

    pub fn base(&self) -> &SurfaceBase {
        &self.base
    }

    pub fn desc(&self) -> &SurfaceDesc {
        self.base.desc()
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    /// Area of the texture known to hold correct data.
    pub fn valid(&self) -> Rect {
        self.valid
    }

    /// Area written by draws.
    pub fn drawn(&self) -> Rect {
        self.drawn
    }

    pub fn valid_bits(&self) -> ChannelMask {
        self.valid_bits
    }

    pub fn dirty(&self) -> &DirtyRectList {
        &self.dirty
    }

    pub fn is_frame(&self) -> bool {
        self.is_frame
    }

    pub fn used(&self) -> bool {
        self.used
    }

    pub fn extent(&self) -> Rect {
        self.base.unscaled_rect()
    }

    pub fn texture_bytes(&self) -> u64 {
        let (w, h) = self.base.scaled_size();
        u64::from(w) * u64::from(h) * 4
    }

    pub fn update_validity(&mut self, rect: &Rect) {
        let rect = rect.intersect(&self.extent());
        self.valid = self.valid.union(&rect);
    }

    pub fn resize_validity(&mut self, rect: &Rect) {
        self.valid = rect.intersect(&self.extent());
    }

    pub fn update_drawn(&mut self, rect: &Rect) {
        let rect = rect.intersect(&self.extent());
        self.drawn = self.drawn.union(&rect);
        self.update_validity(&rect);
    }

    pub fn update_valid_bits(&mut self, channels: ChannelMask) {
        self.valid_bits |= channels & self.desc().psm.channels();
    }

    /// Reallocates the texture for a new extent and scale, carrying over the overlapping
    /// content.
    pub(crate) fn resize_texture(
        &mut self,
        backend: &mut impl GpuBackend,
        mapper: &impl PageMapper,
        width: u32,
        height: u32,
        scale: f32,
    ) -> Result<()> {
        let (w, h) = scaled_size(width, height, scale);
        let texture = backend.create_texture(&TextureDesc::new(self.kind.texture_kind(), w, h))?;

        let keep = self
            .extent()
            .intersect(&Rect::from_size(width as i32, height as i32));
        let copied = self.clear_texture(backend, texture).and_then(|()| {
            backend.stretch_rect(
                self.texture,
                &keep.scale(self.base.scale()),
                texture,
                &keep.scale(scale),
                ChannelMask::RGBA,
            )
        });
        if let Err(err) = copied {
            backend.destroy_texture(texture);
            return Err(err.into());
        }

        trace!(
            bp = self.desc().bp,
            old = ?self.base.unscaled_size(),
            new = ?(width, height),
            scale,
            "resized target texture"
        );
        backend.destroy_texture(self.texture);
        self.texture = texture;
        let desc = *self.desc();
        self.base.set_layout(mapper, desc, width, height, scale);
        self.valid = self.valid.intersect(&self.extent());
        self.drawn = self.drawn.intersect(&self.extent());
        Ok(())
    }

    pub(crate) fn clear_texture(
        &self,
        backend: &mut impl GpuBackend,
        texture: TextureId,
    ) -> std::result::Result<(), crate::BackendError> {
        match self.kind {
            TargetKind::RenderTarget => backend.clear_render_target(texture, 0),
            TargetKind::DepthStencil => backend.clear_depth(texture, 0),
        }
    }

    /// Applies pending host writes to the texture, oldest first.
    ///
    /// Returns whether anything was flushed. On failure the unapplied writes stay queued.
    pub fn update(
        &mut self,
        backend: &mut impl GpuBackend,
        mem: &LocalMemory,
        mapper: &impl PageMapper,
        reset_age: bool,
    ) -> Result<bool> {
        if reset_age {
            self.base.age = 0;
        }
        if self.dirty.is_empty() {
            return Ok(false);
        }

        let entries = self.dirty.take();
        for (i, entry) in entries.iter().enumerate() {
            if let Err(err) = self.apply_dirty(backend, mem, mapper, entry) {
                for rest in &entries[i..] {
                    self.dirty.push(*rest);
                }
                return Err(err);
            }
        }
        trace!(
            bp = self.desc().bp,
            entries = entries.len(),
            valid = ?self.valid,
            "flushed dirty rects"
        );
        Ok(true)
    }

    /// [`Target::update`], but only when a pending write touches `rect`.
    pub fn update_if_dirty_intersects(
        &mut self,
        backend: &mut impl GpuBackend,
        mem: &LocalMemory,
        mapper: &impl PageMapper,
        rect: &Rect,
    ) -> Result<bool> {
        if self.dirty.intersects(rect) {
            self.update(backend, mem, mapper, false)
        } else {
            Ok(false)
        }
    }

    fn apply_dirty(
        &mut self,
        backend: &mut impl GpuBackend,
        mem: &LocalMemory,
        mapper: &impl PageMapper,
        entry: &DirtyRect,
    ) -> Result<()> {
        let rect = entry.rect.intersect(&self.extent());
        let channels = entry.channels & self.desc().psm.channels();
        if rect.is_empty() || channels.is_empty() {
            return Ok(());
        }

        let desc = *self.desc();
        let texels: Vec<u32> = mem
            .read_rect(mapper, &desc, &rect)
            .into_iter()
            .map(|raw| memory_to_texture(desc.psm, raw))
            .collect();

        let scale = self.base.scale();
        if scale == 1.0 && channels == desc.psm.channels() {
            backend.upload(self.texture, 0, &rect, &texels)?;
        } else {
            let size = Rect::from_size(rect.width(), rect.height());
            let staging = backend.create_texture(&TextureDesc::new(
                TextureKind::Texture,
                rect.width() as u32,
                rect.height() as u32,
            ))?;
            let result = backend.upload(staging, 0, &size, &texels).and_then(|()| {
                backend.stretch_rect(staging, &size, self.texture, &rect.scale(scale), channels)
            });
            backend.destroy_texture(staging);
            result?;
        }

        self.update_validity(&rect);
        self.valid_bits |= channels;
        Ok(())
    }

    pub(crate) fn destroy(self, backend: &mut impl GpuBackend) {
        backend.destroy_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SoftwareBackend;
    use gs_mem::GsPageMapper;

    fn target(backend: &mut SoftwareBackend, scale: f32) -> Target {
        Target::create(
            backend,
            &GsPageMapper,
            SurfaceDesc::new(0, 1, Psm::Ct32),
            TargetKind::RenderTarget,
            64,
            32,
            scale,
        )
        .unwrap()
    }

    #[test]
    fn validity_is_clipped_to_extent() {
        let mut backend = SoftwareBackend::new();
        let mut t = target(&mut backend, 1.0);
        t.update_validity(&Rect::new(-4, -4, 100, 8));
        assert_eq!(t.valid(), Rect::new(0, 0, 64, 8));
        t.update_drawn(&Rect::new(0, 16, 8, 40));
        assert_eq!(t.valid(), Rect::new(0, 0, 64, 32));
        assert_eq!(t.drawn(), Rect::new(0, 16, 8, 32));
        t.resize_validity(&Rect::new(0, 0, 8, 8));
        assert_eq!(t.valid(), Rect::new(0, 0, 8, 8));
    }

    #[test]
    fn valid_bits_follow_format() {
        let mut backend = SoftwareBackend::new();
        let mut t = Target::create(
            &mut backend,
            &GsPageMapper,
            SurfaceDesc::new(0, 1, Psm::Ct24),
            TargetKind::RenderTarget,
            64,
            32,
            1.0,
        )
        .unwrap();
        t.update_valid_bits(ChannelMask::RGBA);
        assert_eq!(t.valid_bits(), ChannelMask::RGB);
    }

    #[test]
    fn update_flushes_scaled_writes() {
        let mut backend = SoftwareBackend::new();
        let mut mem = LocalMemory::new();
        let mut t = target(&mut backend, 2.0);
        let desc = *t.desc();
        mem.write_texel(&GsPageMapper, &desc, 1, 1, 0xFF00_FF00);
        t.dirty.push(DirtyRect {
            rect: Rect::new(0, 0, 2, 2),
            channels: ChannelMask::RGBA,
        });

        assert!(t.update(&mut backend, &mem, &GsPageMapper, true).unwrap());
        assert!(t.dirty().is_empty());
        assert_eq!(t.valid(), Rect::new(0, 0, 2, 2));
        assert_eq!(backend.pixel(t.texture(), 2, 2), Some(0xFF00_FF00));
        assert_eq!(backend.pixel(t.texture(), 3, 3), Some(0xFF00_FF00));
        assert_eq!(backend.pixel(t.texture(), 1, 1), Some(0));
    }

    #[test]
    fn failed_flush_keeps_writes_queued() {
        let mut backend = SoftwareBackend::new();
        let mem = LocalMemory::new();
        let mut t = target(&mut backend, 2.0);
        backend.set_budget(Some(backend.memory_usage()));
        t.dirty.push(DirtyRect {
            rect: Rect::new(0, 0, 4, 4),
            channels: ChannelMask::RGBA,
        });

        let err = t.update(&mut backend, &mem, &GsPageMapper, false).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(t.dirty().len(), 1);
    }

    #[test]
    fn resize_preserves_content() {
        let mut backend = SoftwareBackend::new();
        let mut t = target(&mut backend, 1.0);
        backend.clear_render_target(t.texture(), 0x1234_5678).unwrap();
        t.update_validity(&Rect::from_size(64, 32));

        t.resize_texture(&mut backend, &GsPageMapper, 64, 64, 1.0).unwrap();
        assert_eq!(backend.texture_size(t.texture()), Some((64, 64)));
        assert_eq!(backend.pixel(t.texture(), 10, 10), Some(0x1234_5678));
        assert_eq!(backend.pixel(t.texture(), 10, 40), Some(0));
        assert_eq!(t.base().block_range().end, 63);
    }

    #[test]
    fn depth_and_16bit_conversions() {
        assert_eq!(texture_to_memory(Psm::Z24, 0xFF12_3456), 0x12_3456);
        assert_eq!(memory_to_texture(Psm::Ct16, 0x801F) >> 24, 0x80);
        assert_eq!(texture_to_memory(Psm::Ct16, memory_to_texture(Psm::Ct16, 0x801F)), 0x801F);
    }
}
