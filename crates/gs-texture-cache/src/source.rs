use std::rc::Rc;

use gs_mem::{BlockRange, Clamp, Psm, Rect, Tex0, Texa, WrapMode, BLOCKS_PER_PAGE, MAX_PAGES};

use crate::{Arena, Handle, HashCacheKey, Palette, SurfaceBase, TargetHandle, TextureId};

pub type SourceHandle = Handle<Source>;

/// Texel window sampled under region clamp / region repeat, per axis.
///
/// `None` on an axis means the whole texture is sampled along it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SourceRegion {
    pub x: Option<(u32, u32)>,
    pub y: Option<(u32, u32)>,
}

impl SourceRegion {
    pub fn from_clamp(clamp: &Clamp, tw: u32, th: u32) -> Self {
        Self {
            x: region_axis(clamp.wms, clamp.minu, clamp.maxu, tw),
            y: region_axis(clamp.wmt, clamp.minv, clamp.maxv, th),
        }
    }

    pub fn has_either(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }

    /// Rectangle of texels sampled from a `tw` x `th` texture.
    pub fn rect(&self, tw: u32, th: u32) -> Rect {
        let (l, r) = self.x.unwrap_or((0, tw));
        let (t, b) = self.y.unwrap_or((0, th));
        Rect::new(l as i32, t as i32, r as i32, b as i32)
    }
}

fn region_axis(mode: WrapMode, min: u32, max: u32, size: u32) -> Option<(u32, u32)> {
    let (lo, hi) = match mode {
        WrapMode::RegionClamp if min <= max => (min, max + 1),
        // u' = (u & mask) | fix; contiguous only when the mask covers low bits.
        WrapMode::RegionRepeat => {
            let (mask, fix) = (min, max);
            if mask & mask.wrapping_add(1) != 0 || fix & mask != 0 {
                return None;
            }
            (fix, fix + mask + 1)
        }
        _ => return None,
    };
    if lo == 0 && hi >= size {
        None
    } else {
        Some((lo, hi))
    }
}

/// Descriptors of mip levels 1 and up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MipChain {
    pub levels: Vec<Tex0>,
}

impl MipChain {
    pub fn new(levels: Vec<Tex0>) -> Self {
        Self { levels }
    }

    /// Levels including the base.
    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32 + 1
    }
}

/// Where a source's texels live.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceTexture {
    /// Uploaded from memory into a texture owned by the source.
    Owned(TextureId),
    /// Uploaded texture shared through the hash cache. Resolved through the key so injected
    /// replacements are picked up.
    Hashed(HashCacheKey),
    /// Taken from a target. `shared` sources sample the target's own texture; otherwise the
    /// texels were copied into a texture owned by the source.
    Target {
        target: TargetHandle,
        texture: TextureId,
        shared: bool,
    },
}

/// A texture sampled by draws.
#[derive(Debug)]
pub struct Source {
    pub(crate) base: SurfaceBase,
    tex0: Tex0,
    region: SourceRegion,
    mips: Option<MipChain>,
    pub(crate) texture: SourceTexture,
    pub(crate) palette: Option<Rc<Palette>>,
    valid_mips: u32,
    pages: Vec<u32>,
    bytes: u64,
}

/// TEXA only changes how CT24/CT16 sample; other formats compare equal under any TEXA.
pub(crate) fn normalize_texa(psm: Psm, texa: &Texa) -> Texa {
    if psm.uses_texa() {
        *texa
    } else {
        Texa::default()
    }
}

impl Source {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        base: SurfaceBase,
        tex0: Tex0,
        region: SourceRegion,
        mips: Option<MipChain>,
        texture: SourceTexture,
        valid_mips: u32,
        pages: Vec<u32>,
        bytes: u64,
    ) -> Self {
        Self {
            base,
            tex0,
            region,
            mips,
            texture,
            palette: None,
            valid_mips,
            pages,
            bytes,
        }
    }

    pub fn base(&self) -> &SurfaceBase {
        &self.base
    }

    pub fn tex0(&self) -> &Tex0 {
        &self.tex0
    }

    pub fn region(&self) -> &SourceRegion {
        &self.region
    }

    /// Sampled rectangle in unscaled texels.
    pub fn rect(&self) -> Rect {
        self.region.rect(self.tex0.width(), self.tex0.height())
    }

    pub fn mips(&self) -> Option<&MipChain> {
        self.mips.as_ref()
    }

    /// Bit `n` set when mip level `n` holds uploaded data.
    pub fn valid_mips(&self) -> u32 {
        self.valid_mips
    }

    pub fn texture(&self) -> &SourceTexture {
        &self.texture
    }

    pub fn palette(&self) -> Option<&Rc<Palette>> {
        self.palette.as_ref()
    }

    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    /// The target this source was built from. The target may since have been evicted.
    pub fn from_target(&self) -> Option<TargetHandle> {
        match self.texture {
            SourceTexture::Target { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn shares_target(&self) -> bool {
        matches!(self.texture, SourceTexture::Target { shared: true, .. })
    }

    pub fn hash_key(&self) -> Option<&HashCacheKey> {
        match &self.texture {
            SourceTexture::Hashed(key) => Some(key),
            _ => None,
        }
    }

    /// Bytes of texture memory owned by this source alone.
    pub fn owned_bytes(&self) -> u64 {
        self.bytes
    }

    /// Whether this source was created for exactly this sampling state. Palettes are not
    /// compared; indexed sources get their palette swapped on reuse.
    pub(crate) fn matches(
        &self,
        tex0: &Tex0,
        texa: &Texa,
        region: &SourceRegion,
        mips: Option<&MipChain>,
    ) -> bool {
        let a = &self.tex0;
        a.tbp0 == tex0.tbp0
            && a.tbw == tex0.tbw
            && a.psm == tex0.psm
            && a.tw == tex0.tw
            && a.th == tex0.th
            && *self.base.texa() == normalize_texa(tex0.psm, texa)
            && self.region == *region
            && self.mips.as_ref() == mips
    }

    pub fn overlaps(&self, range: &BlockRange) -> bool {
        self.base.overlaps(range)
    }
}

/// Sources indexed by every page they touch.
#[derive(Debug)]
pub(crate) struct SourceMap {
    sources: Arena<Source>,
    pages: Vec<Vec<SourceHandle>>,
}

impl Default for SourceMap {
    fn default() -> Self {
        Self {
            sources: Arena::new(),
            pages: vec![Vec::new(); MAX_PAGES as usize],
        }
    }
}

impl SourceMap {
    pub fn insert(&mut self, source: Source) -> SourceHandle {
        let pages = source.pages.clone();
        let handle = self.sources.insert(source);
        for page in pages {
            self.pages[page as usize].push(handle);
        }
        handle
    }

    pub fn remove(&mut self, handle: SourceHandle) -> Option<Source> {
        let source = self.sources.remove(handle)?;
        for &page in &source.pages {
            self.pages[page as usize].retain(|&h| h != handle);
        }
        Some(source)
    }

    pub fn get(&self, handle: SourceHandle) -> Option<&Source> {
        self.sources.get(handle)
    }

    pub fn get_mut(&mut self, handle: SourceHandle) -> Option<&mut Source> {
        self.sources.get_mut(handle)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceHandle, &Source)> {
        self.sources.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SourceHandle, &mut Source)> {
        self.sources.iter_mut()
    }

    pub fn handles(&self) -> Vec<SourceHandle> {
        self.sources.handles()
    }

    pub fn on_page(&self, page: u32) -> &[SourceHandle] {
        &self.pages[(page % MAX_PAGES) as usize]
    }

    /// Sources registered on any page of `range`, without duplicates.
    pub fn in_range(&self, range: &BlockRange) -> Vec<SourceHandle> {
        let first = range.start / BLOCKS_PER_PAGE;
        let last = range.end / BLOCKS_PER_PAGE;
        let mut out: Vec<SourceHandle> = (first..=last.min(first + MAX_PAGES - 1))
            .flat_map(|page| self.on_page(page).iter().copied())
            .collect();
        out.sort_by_key(|h| (h.index(), h.generation()));
        out.dedup();
        out
    }

    pub fn drain(&mut self) -> Vec<Source> {
        for page in &mut self.pages {
            page.clear();
        }
        self.sources.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_mem::{GsPageMapper, PageMapper};

    #[test]
    fn region_clamp_and_repeat() {
        let clamp = Clamp {
            wms: WrapMode::RegionClamp,
            wmt: WrapMode::RegionRepeat,
            minu: 16,
            maxu: 47,
            minv: 15,
            maxv: 32,
        };
        let region = SourceRegion::from_clamp(&clamp, 256, 256);
        assert_eq!(region.x, Some((16, 48)));
        assert_eq!(region.y, Some((32, 48)));
        assert_eq!(region.rect(256, 256), Rect::new(16, 32, 48, 48));

        let full = Clamp {
            wms: WrapMode::RegionClamp,
            minu: 0,
            maxu: 255,
            ..Clamp::default()
        };
        assert!(!SourceRegion::from_clamp(&full, 256, 256).has_either());
    }

    #[test]
    fn non_contiguous_repeat_is_unbounded() {
        let clamp = Clamp {
            wms: WrapMode::RegionRepeat,
            minu: 0b101,
            maxu: 0,
            ..Clamp::default()
        };
        assert_eq!(SourceRegion::from_clamp(&clamp, 64, 64).x, None);
    }

    #[test]
    fn texa_only_matters_for_expanding_formats() {
        let texa = Texa {
            ta0: 0x40,
            aem: true,
            ta1: 0x80,
        };
        assert_eq!(normalize_texa(Psm::Ct32, &texa), Texa::default());
        assert_eq!(normalize_texa(Psm::Ct24, &texa), texa);
    }

    #[test]
    fn map_indexes_sources_by_page() {
        let tex0 = Tex0::new(32, 1, Psm::Ct32, 6, 6);
        let desc = tex0.desc();
        let pages = GsPageMapper.pages(&desc, &tex0.rect());
        let base = SurfaceBase::new(&GsPageMapper, desc, Texa::default(), 64, 64, 1.0);
        let source = Source::new(
            base,
            tex0,
            SourceRegion::default(),
            None,
            SourceTexture::Owned(TextureId(1)),
            1,
            pages,
            0,
        );

        let mut map = SourceMap::default();
        let h = map.insert(source);
        assert_eq!(map.on_page(1), &[h]);
        assert_eq!(map.on_page(2), &[h]);
        assert_eq!(map.in_range(&BlockRange::new(0, 40)), vec![h]);
        assert!(map.in_range(&BlockRange::new(0, 31)).is_empty());
        assert!(map.remove(h).is_some());
        assert!(map.on_page(1).is_empty());
    }
}
