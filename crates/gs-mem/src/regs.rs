use serde::{Deserialize, Serialize};

use crate::{Psm, Rect};

/// Location and layout of a surface inside local memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceDesc {
    /// Base block pointer.
    pub bp: u32,
    /// Buffer width in units of 64 pixels.
    pub bw: u32,
    pub psm: Psm,
}

impl SurfaceDesc {
    pub const fn new(bp: u32, bw: u32, psm: Psm) -> Self {
        Self { bp, bw, psm }
    }

    /// Row stride in pixels. A zero buffer width behaves like one.
    pub fn stride(&self) -> u32 {
        self.bw.max(1) * 64
    }
}

/// Texture register state sampled by a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tex0 {
    pub tbp0: u32,
    pub tbw: u32,
    pub psm: Psm,
    /// log2 of the texture width.
    pub tw: u8,
    /// log2 of the texture height.
    pub th: u8,
    /// CLUT base block pointer, used by indexed formats.
    pub cbp: u32,
    /// CLUT storage format.
    pub cpsm: Psm,
}

impl Tex0 {
    pub fn new(tbp0: u32, tbw: u32, psm: Psm, tw: u8, th: u8) -> Self {
        Self {
            tbp0,
            tbw,
            psm,
            tw,
            th,
            cbp: 0,
            cpsm: Psm::Ct32,
        }
    }

    pub fn with_clut(mut self, cbp: u32, cpsm: Psm) -> Self {
        self.cbp = cbp;
        self.cpsm = cpsm;
        self
    }

    pub fn desc(&self) -> SurfaceDesc {
        SurfaceDesc::new(self.tbp0, self.tbw, self.psm)
    }

    pub fn width(&self) -> u32 {
        1 << self.tw.min(10)
    }

    pub fn height(&self) -> u32 {
        1 << self.th.min(10)
    }

    pub fn rect(&self) -> Rect {
        Rect::from_size(self.width() as i32, self.height() as i32)
    }
}

/// Alpha expansion for 24-bit and 16-bit colour formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Texa {
    /// Alpha for texels without the alpha bit (or all of CT24).
    pub ta0: u8,
    /// When set, black texels expand to zero alpha.
    pub aem: bool,
    /// Alpha for CT16 texels with the alpha bit set.
    pub ta1: u8,
}

impl Texa {
    pub fn expand_alpha(&self, nonzero_rgb: bool) -> u8 {
        if self.aem && !nonzero_rgb {
            0
        } else {
            self.ta0
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WrapMode {
    #[default]
    Repeat,
    Clamp,
    RegionClamp,
    RegionRepeat,
}

/// Texture wrap state. The `min`/`max` fields are clamp bounds for `RegionClamp` and
/// mask/fix values for `RegionRepeat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clamp {
    pub wms: WrapMode,
    pub wmt: WrapMode,
    pub minu: u32,
    pub maxu: u32,
    pub minv: u32,
    pub maxv: u32,
}

/// Host/local transfer descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferDesc {
    pub sbp: u32,
    pub sbw: u32,
    pub spsm: Psm,
    pub dbp: u32,
    pub dbw: u32,
    pub dpsm: Psm,
}

impl TransferDesc {
    pub fn src(&self) -> SurfaceDesc {
        SurfaceDesc::new(self.sbp, self.sbw, self.spsm)
    }

    pub fn dst(&self) -> SurfaceDesc {
        SurfaceDesc::new(self.dbp, self.dbw, self.dpsm)
    }

    /// Descriptor for a host-to-local upload into `dst`.
    pub fn upload(dst: SurfaceDesc) -> Self {
        Self {
            sbp: 0,
            sbw: 0,
            spsm: dst.psm,
            dbp: dst.bp,
            dbw: dst.bw,
            dpsm: dst.psm,
        }
    }
}
