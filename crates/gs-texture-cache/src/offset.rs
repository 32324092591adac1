use std::num::NonZeroUsize;

use gs_mem::{has_shared_bits, PageMapper, Rect, SurfaceDesc};
use lru::LruCache;
use tracing::trace;

/// One translation query: where does `a_rect` of surface `a` land inside surface `b`, whose
/// extent is `b_rect`?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceOffsetKey {
    pub a: SurfaceDesc,
    pub a_rect: Rect,
    pub b: SurfaceDesc,
    pub b_rect: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceOffset {
    /// False when the two regions share no bytes.
    pub is_valid: bool,
    /// The translated rectangle in `b`'s coordinates.
    pub b_rect: Rect,
}

impl SurfaceOffset {
    pub const INVALID: SurfaceOffset = SurfaceOffset {
        is_valid: false,
        b_rect: Rect::EMPTY,
    };
}

/// Translates `key.a_rect` into `key.b`'s coordinate space.
///
/// Every block `a_rect` touches is located in `b` through the mapper; the result is the
/// bounding box of those blocks, clipped to `b_rect`. When both sides use the same block
/// size, the part of each block actually covered is carried over, so translations between
/// layouts of the same format are texel-exact.
pub fn compute_surface_offset(mapper: &impl PageMapper, key: &SurfaceOffsetKey) -> SurfaceOffset {
    let SurfaceOffsetKey {
        a,
        a_rect,
        b,
        b_rect,
    } = *key;
    let a_rect = Rect::new(a_rect.left.max(0), a_rect.top.max(0), a_rect.right, a_rect.bottom);
    if a_rect.is_empty() || b_rect.is_empty() || !has_shared_bits(a.psm, b.psm) {
        return SurfaceOffset::INVALID;
    }

    let a_range = mapper.block_range(&a, &a_rect);
    let b_range = mapper.block_range(&b, &b_rect);
    if !a_range.overlaps(&b_range) {
        return SurfaceOffset::INVALID;
    }

    let ai = a.psm.info();
    let bi = b.psm.info();
    let exact = ai.block_width == bi.block_width && ai.block_height == bi.block_height;
    let (bw, bh) = (ai.block_width as i32, ai.block_height as i32);

    let mut out = Rect::EMPTY;
    let aligned = a_rect.align_outwards(bw, bh);
    for by in (aligned.top..aligned.bottom).step_by(bh as usize) {
        for bx in (aligned.left..aligned.right).step_by(bw as usize) {
            let block = mapper.block_number(&a, bx as u32, by as u32);
            if !b_range.contains_block(block) {
                continue;
            }
            let (ox, oy) = mapper.block_origin(&b, block);
            let (ox, oy) = (ox as i32, oy as i32);
            let placed = if exact {
                // Same texel grid inside the block: keep the covered part only.
                let covered = a_rect.intersect(&Rect::new(bx, by, bx + bw, by + bh));
                covered.translate(ox - bx, oy - by)
            } else {
                Rect::new(ox, oy, ox + bi.block_width as i32, oy + bi.block_height as i32)
            };
            out = out.union(&placed.intersect(&b_rect));
        }
    }

    if out.is_empty() {
        SurfaceOffset::INVALID
    } else {
        SurfaceOffset {
            is_valid: true,
            b_rect: out,
        }
    }
}

/// Bounded memo of [`compute_surface_offset`] results.
#[derive(Debug)]
pub struct SurfaceOffsetCache {
    cache: LruCache<SurfaceOffsetKey, SurfaceOffset>,
    hits: u64,
    misses: u64,
}

impl SurfaceOffsetCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_or_compute(
        &mut self,
        mapper: &impl PageMapper,
        key: &SurfaceOffsetKey,
    ) -> SurfaceOffset {
        if let Some(offset) = self.cache.get(key) {
            self.hits += 1;
            return *offset;
        }
        self.misses += 1;
        let offset = compute_surface_offset(mapper, key);
        if let Some((evicted, _)) = self.cache.push(*key, offset) {
            if evicted != *key {
                trace!(a_bp = evicted.a.bp, b_bp = evicted.b.bp, "evicted surface offset");
            }
        }
        offset
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        self.cache.resize(capacity);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_mem::{GsPageMapper, Psm};
    use pretty_assertions::assert_eq;

    fn key(a: SurfaceDesc, a_rect: Rect, b: SurfaceDesc, b_rect: Rect) -> SurfaceOffsetKey {
        SurfaceOffsetKey {
            a,
            a_rect,
            b,
            b_rect,
        }
    }

    #[test]
    fn double_buffer_overlap_translates_rows() {
        let front = SurfaceDesc::new(0, 10, Psm::Ct32);
        let back = SurfaceDesc::new(0x500, 10, Psm::Ct32);
        let offset = compute_surface_offset(
            &GsPageMapper,
            &key(front, Rect::from_size(640, 224), back, Rect::from_size(640, 224)),
        );
        assert_eq!(
            offset,
            SurfaceOffset {
                is_valid: true,
                b_rect: Rect::new(0, 0, 640, 96)
            }
        );
    }

    #[test]
    fn disjoint_ranges_are_invalid() {
        let a = SurfaceDesc::new(0, 10, Psm::Ct32);
        let b = SurfaceDesc::new(0x1000, 10, Psm::Ct32);
        let offset = compute_surface_offset(
            &GsPageMapper,
            &key(a, Rect::from_size(640, 224), b, Rect::from_size(640, 224)),
        );
        assert!(!offset.is_valid);
    }

    #[test]
    fn disjoint_channels_are_invalid() {
        let a = SurfaceDesc::new(0, 10, Psm::T8H);
        let b = SurfaceDesc::new(0, 10, Psm::Ct24);
        let offset = compute_surface_offset(
            &GsPageMapper,
            &key(a, Rect::from_size(64, 32), b, Rect::from_size(640, 448)),
        );
        assert_eq!(offset, SurfaceOffset::INVALID);
    }

    #[test]
    fn sub_block_rect_is_exact_for_matching_formats() {
        let a = SurfaceDesc::new(0, 10, Psm::Ct32);
        let b = SurfaceDesc::new(0x500, 10, Psm::Ct24);
        let offset = compute_surface_offset(
            &GsPageMapper,
            &key(a, Rect::new(3, 130, 21, 141), b, Rect::from_size(640, 224)),
        );
        assert_eq!(offset.b_rect, Rect::new(3, 2, 21, 13));
    }

    #[test]
    fn cache_counts_hits() {
        let mut cache = SurfaceOffsetCache::new(1);
        let a = SurfaceDesc::new(0, 10, Psm::Ct32);
        let k1 = key(a, Rect::from_size(8, 8), a, Rect::from_size(640, 224));
        let k2 = key(a, Rect::from_size(16, 8), a, Rect::from_size(640, 224));
        cache.get_or_compute(&GsPageMapper, &k1);
        cache.get_or_compute(&GsPageMapper, &k1);
        cache.get_or_compute(&GsPageMapper, &k2);
        assert_eq!((cache.hits(), cache.misses(), cache.len()), (1, 2, 1));
    }
}
