use crate::{Rect, SurfaceDesc};

pub const BLOCK_BYTES: usize = 256;
pub const BLOCKS_PER_PAGE: u32 = 32;
pub const PAGE_BYTES: usize = BLOCK_BYTES * BLOCKS_PER_PAGE as usize;
pub const MAX_BLOCKS: u32 = 0x4000;
pub const MAX_BP: u32 = MAX_BLOCKS - 1;
pub const MAX_PAGES: u32 = MAX_BLOCKS / BLOCKS_PER_PAGE;
pub const MEMORY_BYTES: usize = BLOCK_BYTES * MAX_BLOCKS as usize;

/// Inclusive block range. `end` is unwrapped: it exceeds [`MAX_BP`] when the range wraps
/// past the top of memory, so `end >= start` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub start: u32,
    pub end: u32,
}

impl BlockRange {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(end >= start);
        Self { start, end }
    }

    pub fn wraps(&self) -> bool {
        self.end > MAX_BP
    }

    /// End block as stored in registers.
    pub fn wrapped_end(&self) -> u32 {
        self.end & MAX_BP
    }

    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn overlaps(&self, other: &BlockRange) -> bool {
        check_overlap(self.start, self.end, other.start, other.end)
    }

    pub fn contains_block(&self, block: u32) -> bool {
        let block = block & MAX_BP;
        (self.start..=self.end).contains(&block)
            || (self.wraps() && (self.start..=self.end).contains(&(block + MAX_BLOCKS)))
    }
}

/// Whether two block intervals intersect on the circular address space.
///
/// Ends may be unwrapped (greater than [`MAX_BP`]); starts must be in range.
pub fn check_overlap(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    let (a0, a1) = (i64::from(a_start), i64::from(a_end));
    [-1i64, 0, 1].into_iter().any(|k| {
        let off = k * i64::from(MAX_BLOCKS);
        let (b0, b1) = (i64::from(b_start) + off, i64::from(b_end) + off);
        b0 <= a1 && a0 <= b1
    })
}

/// Location of a texel in local memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexelAddress {
    /// Byte offset into local memory.
    pub byte: usize,
    /// Bit shift inside that byte (non-zero only for odd 4-bit texels).
    pub shift: u32,
}

/// Conversion between 2D texel coordinates and local-memory addresses.
pub trait PageMapper {
    /// Block holding texel `(x, y)`.
    fn block_number(&self, desc: &SurfaceDesc, x: u32, y: u32) -> u32;

    /// Blocks touched by `rect`. Empty rectangles touch only the base block.
    fn block_range(&self, desc: &SurfaceDesc, rect: &Rect) -> BlockRange;

    /// Top-left texel of `block` in the coordinate space of `desc`.
    fn block_origin(&self, desc: &SurfaceDesc, block: u32) -> (u32, u32);

    /// Sorted, deduplicated physical pages touched by `rect`.
    fn pages(&self, desc: &SurfaceDesc, rect: &Rect) -> Vec<u32>;

    fn texel_address(&self, desc: &SurfaceDesc, x: u32, y: u32) -> TexelAddress;

    /// Range covered by a `width` x `height` surface at `desc`.
    fn surface_range(&self, desc: &SurfaceDesc, width: u32, height: u32) -> BlockRange {
        self.block_range(desc, &Rect::from_size(width as i32, height as i32))
    }
}

/// Block-accurate mapper using the GS page and block arrangement tables, with row-major
/// texel order inside each block.
#[derive(Debug, Clone, Copy, Default)]
pub struct GsPageMapper;

fn pages_per_row(desc: &SurfaceDesc) -> u32 {
    (desc.stride() / desc.psm.info().page_width).max(1)
}

/// Calls `f(page_index, min_entry, max_entry)` for every descriptor page touched by `rect`,
/// with the smallest and largest block-table entries covered inside that page.
fn for_each_page_span(desc: &SurfaceDesc, rect: &Rect, mut f: impl FnMut(u32, u32, u32)) {
    let info = desc.psm.info();
    let (pw, ph) = (info.page_width, info.page_height);
    let (bw, bh) = (info.block_width, info.block_height);
    let table = info.layout.block_table();
    let cols = info.layout.block_columns();
    let ppr = pages_per_row(desc);

    let left = rect.left.max(0) as u32;
    let top = rect.top.max(0) as u32;
    let right = rect.right.max(0) as u32;
    let bottom = rect.bottom.max(0) as u32;
    if left >= right || top >= bottom {
        return;
    }

    for py in top / ph..=(bottom - 1) / ph {
        for px in left / pw..=(right - 1) / pw {
            let x0 = left.max(px * pw) - px * pw;
            let x1 = right.min((px + 1) * pw) - px * pw;
            let y0 = top.max(py * ph) - py * ph;
            let y1 = bottom.min((py + 1) * ph) - py * ph;

            let mut lo = u32::MAX;
            let mut hi = 0;
            for by in y0 / bh..=(y1 - 1) / bh {
                for bx in x0 / bw..=(x1 - 1) / bw {
                    let entry = u32::from(table[(by * cols + bx) as usize]);
                    lo = lo.min(entry);
                    hi = hi.max(entry);
                }
            }
            f(py * ppr + px, lo, hi);
        }
    }
}

impl PageMapper for GsPageMapper {
    fn block_number(&self, desc: &SurfaceDesc, x: u32, y: u32) -> u32 {
        let info = desc.psm.info();
        let page = (y / info.page_height) * pages_per_row(desc) + x / info.page_width;
        let bx = (x % info.page_width) / info.block_width;
        let by = (y % info.page_height) / info.block_height;
        let entry = u32::from(
            info.layout.block_table()[(by * info.layout.block_columns() + bx) as usize],
        );
        (desc.bp + page * BLOCKS_PER_PAGE + entry) & MAX_BP
    }

    fn block_range(&self, desc: &SurfaceDesc, rect: &Rect) -> BlockRange {
        let bp = desc.bp & MAX_BP;
        let mut lo = u32::MAX;
        let mut hi = 0u32;
        for_each_page_span(desc, rect, |page, min, max| {
            lo = lo.min(page * BLOCKS_PER_PAGE + min);
            hi = hi.max(page * BLOCKS_PER_PAGE + max);
        });
        if lo == u32::MAX {
            return BlockRange::new(bp, bp);
        }

        let mut start = bp + lo;
        let mut end = bp + hi;
        while start > MAX_BP {
            start -= MAX_BLOCKS;
            end -= MAX_BLOCKS;
        }
        BlockRange::new(start, end)
    }

    fn block_origin(&self, desc: &SurfaceDesc, block: u32) -> (u32, u32) {
        let info = desc.psm.info();
        let rel = block.wrapping_sub(desc.bp) & MAX_BP;
        let page = rel / BLOCKS_PER_PAGE;
        let ppr = pages_per_row(desc);
        let (bx, by) = info.layout.block_position(rel % BLOCKS_PER_PAGE);
        (
            (page % ppr) * info.page_width + bx * info.block_width,
            (page / ppr) * info.page_height + by * info.block_height,
        )
    }

    fn pages(&self, desc: &SurfaceDesc, rect: &Rect) -> Vec<u32> {
        let mut pages = Vec::new();
        for_each_page_span(desc, rect, |page, min, max| {
            let base = desc.bp + page * BLOCKS_PER_PAGE;
            for p in (base + min) / BLOCKS_PER_PAGE..=(base + max) / BLOCKS_PER_PAGE {
                pages.push(p % MAX_PAGES);
            }
        });
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    fn texel_address(&self, desc: &SurfaceDesc, x: u32, y: u32) -> TexelAddress {
        let info = desc.psm.info();
        let block = self.block_number(desc, x, y) as usize;
        let index = (y % info.block_height) * info.block_width + x % info.block_width;
        let bits = index * info.bpp;
        TexelAddress {
            byte: block * BLOCK_BYTES + (bits / 8) as usize,
            shift: bits % 8,
        }
    }
}
