use gs_mem::{check_overlap, BlockRange, PageMapper, Rect, SurfaceDesc, Texa};

/// Fields shared by sources and targets.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceBase {
    desc: SurfaceDesc,
    texa: Texa,
    width: u32,
    height: u32,
    scale: f32,
    pub(crate) age: u32,
    range: BlockRange,
}

impl SurfaceBase {
    pub(crate) fn new(
        mapper: &impl PageMapper,
        desc: SurfaceDesc,
        texa: Texa,
        width: u32,
        height: u32,
        scale: f32,
    ) -> Self {
        Self {
            desc,
            texa,
            width,
            height,
            scale,
            age: 0,
            range: mapper.surface_range(&desc, width, height),
        }
    }

    pub fn desc(&self) -> &SurfaceDesc {
        &self.desc
    }

    pub fn texa(&self) -> &Texa {
        &self.texa
    }

    pub fn unscaled_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn unscaled_rect(&self) -> Rect {
        Rect::from_size(self.width as i32, self.height as i32)
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Texture size at the surface's scale.
    pub fn scaled_size(&self) -> (u32, u32) {
        scaled_size(self.width, self.height, self.scale)
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn block_range(&self) -> BlockRange {
        self.range
    }

    /// Last block, as a register value; may be below the base pointer when wrapping.
    pub fn end_block(&self) -> u32 {
        self.range.wrapped_end()
    }

    pub fn unwrapped_end_block(&self) -> u32 {
        self.range.end
    }

    pub fn wraps(&self) -> bool {
        self.range.wraps()
    }

    /// Replaces the descriptor and extent, recomputing the block range.
    pub(crate) fn set_layout(
        &mut self,
        mapper: &impl PageMapper,
        desc: SurfaceDesc,
        width: u32,
        height: u32,
        scale: f32,
    ) {
        self.desc = desc;
        self.width = width;
        self.height = height;
        self.scale = scale;
        self.range = mapper.surface_range(&desc, width, height);
    }

    /// Whether `rect` at `desc` lies completely within this surface's blocks.
    pub fn inside(&self, mapper: &impl PageMapper, desc: &SurfaceDesc, rect: &Rect) -> bool {
        let other = mapper.block_range(desc, rect);
        let (start, end) = if other.start < self.range.start && self.wraps() {
            (other.start + gs_mem::MAX_BLOCKS, other.end + gs_mem::MAX_BLOCKS)
        } else {
            (other.start, other.end)
        };
        start >= self.range.start && end <= self.range.end
    }

    pub fn overlaps(&self, range: &BlockRange) -> bool {
        check_overlap(self.range.start, self.range.end, range.start, range.end)
    }
}

pub(crate) fn scaled_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
    (
        ((width as f32 * scale).ceil() as u32).max(1),
        ((height as f32 * scale).ceil() as u32).max(1),
    )
}
