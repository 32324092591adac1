use gs_mem::{ChannelMask, Rect};
use hashbrown::HashMap;

use super::{GpuBackend, TextureDesc, TextureId};
use crate::BackendError;

#[derive(Debug)]
struct SoftTexture {
    desc: TextureDesc,
    levels: Vec<Vec<u32>>,
}

impl SoftTexture {
    fn bounds(&self) -> Rect {
        Rect::from_size(self.desc.width as i32, self.desc.height as i32)
    }

    fn texel(&self, x: i32, y: i32) -> u32 {
        self.levels[0][y as usize * self.desc.width as usize + x as usize]
    }

    fn texel_mut(&mut self, x: i32, y: i32) -> &mut u32 {
        let width = self.desc.width as usize;
        &mut self.levels[0][y as usize * width + x as usize]
    }
}

/// Host-memory implementation of [`GpuBackend`].
///
/// An optional byte budget makes allocations fail once exceeded, which is how tests exercise
/// the cache's allocation-failure path.
#[derive(Debug, Default)]
pub struct SoftwareBackend {
    textures: HashMap<TextureId, SoftTexture>,
    next_id: u64,
    used: u64,
    budget: Option<u64>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(budget: u64) -> Self {
        Self {
            budget: Some(budget),
            ..Self::default()
        }
    }

    pub fn set_budget(&mut self, budget: Option<u64>) {
        self.budget = budget;
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn contains(&self, id: TextureId) -> bool {
        self.textures.contains_key(&id)
    }

    pub fn desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(&id).map(|t| t.desc)
    }

    /// Base-level texel, or `None` outside the texture.
    pub fn pixel(&self, id: TextureId, x: u32, y: u32) -> Option<u32> {
        let tex = self.textures.get(&id)?;
        (x < tex.desc.width && y < tex.desc.height).then(|| tex.texel(x as i32, y as i32))
    }

    fn get(&self, id: TextureId) -> Result<&SoftTexture, BackendError> {
        self.textures
            .get(&id)
            .ok_or(BackendError::UnknownTexture(id))
    }

    fn get_mut(&mut self, id: TextureId) -> Result<&mut SoftTexture, BackendError> {
        self.textures
            .get_mut(&id)
            .ok_or(BackendError::UnknownTexture(id))
    }

    fn fill(&mut self, id: TextureId, value: u32) -> Result<(), BackendError> {
        let tex = self.get_mut(id)?;
        tex.levels[0].fill(value);
        Ok(())
    }
}

impl GpuBackend for SoftwareBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, BackendError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::InvalidDesc("zero-sized texture"));
        }
        if desc.levels == 0 {
            return Err(BackendError::InvalidDesc("texture without mip levels"));
        }

        let bytes = desc.byte_size();
        if let Some(budget) = self.budget {
            let available = budget.saturating_sub(self.used);
            if bytes > available {
                return Err(BackendError::OutOfMemory {
                    requested: bytes,
                    available,
                });
            }
        }

        let levels = (0..desc.levels)
            .map(|level| {
                let (w, h) = desc.level_size(level);
                vec![0u32; w as usize * h as usize]
            })
            .collect();

        self.next_id += 1;
        let id = TextureId(self.next_id);
        self.textures.insert(id, SoftTexture { desc: *desc, levels });
        self.used += bytes;
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if let Some(tex) = self.textures.remove(&id) {
            self.used -= tex.desc.byte_size();
        }
    }

    fn texture_size(&self, id: TextureId) -> Option<(u32, u32)> {
        self.textures
            .get(&id)
            .map(|t| (t.desc.width, t.desc.height))
    }

    fn copy_rect(
        &mut self,
        src: TextureId,
        src_rect: &Rect,
        dst: TextureId,
        dst_x: i32,
        dst_y: i32,
    ) -> Result<(), BackendError> {
        let src_rect = src_rect.intersect(&self.get(src)?.bounds());
        let dst_rect = Rect::new(
            dst_x,
            dst_y,
            dst_x + src_rect.width(),
            dst_y + src_rect.height(),
        );
        self.stretch_rect(src, &src_rect, dst, &dst_rect, ChannelMask::RGBA)
    }

    fn stretch_rect(
        &mut self,
        src: TextureId,
        src_rect: &Rect,
        dst: TextureId,
        dst_rect: &Rect,
        mask: ChannelMask,
    ) -> Result<(), BackendError> {
        if src_rect.is_empty() || dst_rect.is_empty() {
            return Ok(());
        }

        // Sample everything first so copies within one texture see the original texels.
        let source = self.get(src)?;
        let src_bounds = source.bounds();
        let dst_bounds = self.get(dst)?.bounds();
        let clipped = dst_rect.intersect(&dst_bounds);
        let (sw, sh) = (src_rect.width() as i64, src_rect.height() as i64);
        let (dw, dh) = (dst_rect.width() as i64, dst_rect.height() as i64);

        let mut samples = Vec::with_capacity(clipped.area() as usize);
        for y in clipped.top..clipped.bottom {
            let sy = src_rect.top + ((i64::from(y - dst_rect.top) * sh) / dh) as i32;
            for x in clipped.left..clipped.right {
                let sx = src_rect.left + ((i64::from(x - dst_rect.left) * sw) / dw) as i32;
                let inside = sx >= src_bounds.left
                    && sx < src_bounds.right
                    && sy >= src_bounds.top
                    && sy < src_bounds.bottom;
                samples.push(inside.then(|| source.texel(sx, sy)));
            }
        }

        let word_mask = mask.word_mask();
        let target = self.get_mut(dst)?;
        let mut samples = samples.into_iter();
        for y in clipped.top..clipped.bottom {
            for x in clipped.left..clipped.right {
                if let Some(Some(value)) = samples.next() {
                    let texel = target.texel_mut(x, y);
                    *texel = (*texel & !word_mask) | (value & word_mask);
                }
            }
        }
        Ok(())
    }

    fn clear_render_target(&mut self, id: TextureId, color: u32) -> Result<(), BackendError> {
        self.fill(id, color)
    }

    fn clear_depth(&mut self, id: TextureId, depth: u32) -> Result<(), BackendError> {
        self.fill(id, depth)
    }

    fn upload(
        &mut self,
        id: TextureId,
        level: u32,
        rect: &Rect,
        texels: &[u32],
    ) -> Result<(), BackendError> {
        let tex = self.get_mut(id)?;
        if level >= tex.desc.levels {
            return Err(BackendError::OutOfBounds(id));
        }
        let (w, h) = tex.desc.level_size(level);
        if !Rect::from_size(w as i32, h as i32).contains(rect) || rect.left < 0 || rect.top < 0 {
            return Err(BackendError::OutOfBounds(id));
        }
        let expected = rect.area() as usize;
        if texels.len() != expected {
            return Err(BackendError::UploadSize {
                expected,
                actual: texels.len(),
            });
        }

        let row = rect.width() as usize;
        let data = &mut tex.levels[level as usize];
        for (i, y) in (rect.top..rect.bottom).enumerate() {
            let start = y as usize * w as usize + rect.left as usize;
            data[start..start + row].copy_from_slice(&texels[i * row..(i + 1) * row]);
        }
        Ok(())
    }

    fn download(&mut self, id: TextureId, rect: &Rect) -> Result<Vec<u32>, BackendError> {
        let tex = self.get(id)?;
        if !tex.bounds().contains(rect) {
            return Err(BackendError::OutOfBounds(id));
        }
        let mut out = Vec::with_capacity(rect.area() as usize);
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                out.push(tex.texel(x, y));
            }
        }
        Ok(out)
    }

    fn memory_usage(&self) -> u64 {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextureKind;

    fn rt(backend: &mut SoftwareBackend, w: u32, h: u32) -> TextureId {
        backend
            .create_texture(&TextureDesc::new(TextureKind::RenderTarget, w, h))
            .unwrap()
    }

    #[test]
    fn budget_limits_allocation() {
        let mut backend = SoftwareBackend::with_budget(64 * 4);
        let a = rt(&mut backend, 8, 8);
        let err = backend
            .create_texture(&TextureDesc::new(TextureKind::Texture, 1, 1))
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::OutOfMemory {
                requested: 4,
                available: 0
            }
        );
        backend.destroy_texture(a);
        assert_eq!(backend.memory_usage(), 0);
        rt(&mut backend, 8, 8);
    }

    #[test]
    fn stretch_honours_channel_mask() {
        let mut backend = SoftwareBackend::new();
        let src = rt(&mut backend, 2, 2);
        let dst = rt(&mut backend, 4, 4);
        backend.clear_render_target(src, 0xAABB_CCDD).unwrap();
        backend.clear_render_target(dst, 0x1122_3344).unwrap();
        backend
            .stretch_rect(src, &Rect::from_size(2, 2), dst, &Rect::from_size(4, 4), ChannelMask::A)
            .unwrap();
        assert_eq!(backend.pixel(dst, 3, 3), Some(0xAA22_3344));
    }

    #[test]
    fn overlapping_copy_within_texture() {
        let mut backend = SoftwareBackend::new();
        let tex = rt(&mut backend, 4, 1);
        backend
            .upload(tex, 0, &Rect::from_size(4, 1), &[1, 2, 3, 4])
            .unwrap();
        backend
            .copy_rect(tex, &Rect::from_size(3, 1), tex, 1, 0)
            .unwrap();
        assert_eq!(
            backend.download(tex, &Rect::from_size(4, 1)).unwrap(),
            vec![1, 1, 2, 3]
        );
    }
}
