use gs_mem::{ChannelMask, LocalMemory, PageMapper, Rect};
use tracing::trace;

use super::TextureCache;
use crate::target::texture_to_memory;
use crate::{CacheError, GpuBackend, Result, TargetHandle, TextureDesc, TextureKind};

impl<B: GpuBackend, M: PageMapper> TextureCache<B, M> {
    /// Copies `rect` of a target back into local memory.
    ///
    /// Only the valid part of `rect` is written, and for 32-bit formats only the channels the
    /// target holds valid; other bits keep their memory contents. Blocks until the backend has
    /// delivered the texels.
    pub fn read_target(
        &mut self,
        handle: TargetHandle,
        rect: &Rect,
        mem: &mut LocalMemory,
    ) -> Result<()> {
        self.flush_target(mem, handle, false)?;
        let target = self.targets.get(handle).ok_or(CacheError::StaleHandle)?;
        let rect = rect.intersect(&target.valid());
        let bits = target.valid_bits();
        if rect.is_empty() || bits.is_empty() {
            return Ok(());
        }
        let desc = *target.desc();
        let (texture, scale) = (target.texture(), target.base.scale());

        let texels = if scale == 1.0 {
            self.backend.download(texture, &rect)?
        } else {
            let size = Rect::from_size(rect.width(), rect.height());
            let scratch = self.backend.create_texture(&TextureDesc::new(
                TextureKind::RenderTarget,
                rect.width() as u32,
                rect.height() as u32,
            ))?;
            let result = self
                .backend
                .stretch_rect(texture, &rect.scale(scale), scratch, &size, ChannelMask::RGBA)
                .and_then(|()| self.backend.download(scratch, &size));
            self.backend.destroy_texture(scratch);
            result?
        };

        let info = desc.psm.info();
        let keep = if info.bpp == 32 {
            !((bits.word_mask() & info.fmsk) >> info.fshift)
        } else {
            0
        };
        let width = rect.width() as usize;
        for (i, &texel) in texels.iter().enumerate() {
            let x = (rect.left + (i % width) as i32) as u32;
            let y = (rect.top + (i / width) as i32) as u32;
            let mut value = texture_to_memory(desc.psm, texel);
            if keep != 0 {
                let old = mem.read_texel(&self.mapper, &desc, x, y);
                value = (old & keep) | (value & !keep);
            }
            mem.write_texel(&self.mapper, &desc, x, y, value);
        }
        trace!(?handle, bp = desc.bp, ?rect, ?bits, "read back target");
        Ok(())
    }
}
