use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::Texa;

/// GS pixel storage mode.
///
/// Discriminants are the raw register encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Psm {
    Ct32 = 0x00,
    Ct24 = 0x01,
    Ct16 = 0x02,
    Ct16S = 0x0A,
    T8 = 0x13,
    T4 = 0x14,
    T8H = 0x1B,
    T4HL = 0x24,
    T4HH = 0x2C,
    Z32 = 0x30,
    Z24 = 0x31,
    Z16 = 0x32,
    Z16S = 0x3A,
}

/// Arrangement of blocks inside a page. Formats sharing a layout address the same bytes
/// at the same coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    C32,
    Z32,
    C16,
    C16S,
    Z16,
    Z16S,
    T8,
    T4,
}

#[rustfmt::skip]
const BLOCK_TABLE_32: [u8; 32] = [
     0,  1,  4,  5, 16, 17, 20, 21,
     2,  3,  6,  7, 18, 19, 22, 23,
     8,  9, 12, 13, 24, 25, 28, 29,
    10, 11, 14, 15, 26, 27, 30, 31,
];

#[rustfmt::skip]
const BLOCK_TABLE_32Z: [u8; 32] = [
    24, 25, 28, 29,  8,  9, 12, 13,
    26, 27, 30, 31, 10, 11, 14, 15,
    16, 17, 20, 21,  0,  1,  4,  5,
    18, 19, 22, 23,  2,  3,  6,  7,
];

#[rustfmt::skip]
const BLOCK_TABLE_16: [u8; 32] = [
     0,  2,  8, 10,
     1,  3,  9, 11,
     4,  6, 12, 14,
     5,  7, 13, 15,
    16, 18, 24, 26,
    17, 19, 25, 27,
    20, 22, 28, 30,
    21, 23, 29, 31,
];

#[rustfmt::skip]
const BLOCK_TABLE_16S: [u8; 32] = [
     0,  2, 16, 18,
     1,  3, 17, 19,
     8, 10, 24, 26,
     9, 11, 25, 27,
     4,  6, 20, 22,
     5,  7, 21, 23,
    12, 14, 28, 30,
    13, 15, 29, 31,
];

#[rustfmt::skip]
const BLOCK_TABLE_16Z: [u8; 32] = [
    24, 26, 16, 18,
    25, 27, 17, 19,
    28, 30, 20, 22,
    29, 31, 21, 23,
     8, 10,  0,  2,
     9, 11,  1,  3,
    12, 14,  4,  6,
    13, 15,  5,  7,
];

#[rustfmt::skip]
const BLOCK_TABLE_16SZ: [u8; 32] = [
    24, 26,  8, 10,
    25, 27,  9, 11,
    16, 18,  0,  2,
    17, 19,  1,  3,
    28, 30, 12, 14,
    29, 31, 13, 15,
    20, 22,  4,  6,
    21, 23,  5,  7,
];

impl Layout {
    /// Block numbers inside a page, row-major over the page's block grid.
    pub fn block_table(self) -> &'static [u8; 32] {
        match self {
            Layout::C32 | Layout::T8 => &BLOCK_TABLE_32,
            Layout::Z32 => &BLOCK_TABLE_32Z,
            Layout::C16 | Layout::T4 => &BLOCK_TABLE_16,
            Layout::C16S => &BLOCK_TABLE_16S,
            Layout::Z16 => &BLOCK_TABLE_16Z,
            Layout::Z16S => &BLOCK_TABLE_16SZ,
        }
    }

    /// Number of block columns in one page.
    pub fn block_columns(self) -> u32 {
        match self {
            Layout::C32 | Layout::Z32 | Layout::T8 => 8,
            Layout::C16 | Layout::C16S | Layout::Z16 | Layout::Z16S | Layout::T4 => 4,
        }
    }

    /// Inverse of [`Layout::block_table`]: `(column, row)` of each block inside the page.
    pub fn block_position(self, block_in_page: u32) -> (u32, u32) {
        let table = self.block_table();
        let cols = self.block_columns();
        let idx = table
            .iter()
            .position(|&b| u32::from(b) == block_in_page & 31)
            .unwrap_or(0) as u32;
        (idx % cols, idx / cols)
    }
}

/// Static description of a pixel storage mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsmInfo {
    /// Bits each texel occupies in memory.
    pub bpp: u32,
    pub page_width: u32,
    pub page_height: u32,
    pub block_width: u32,
    pub block_height: u32,
    pub layout: Layout,
    pub depth: bool,
    /// CLUT entries for indexed formats, 0 otherwise.
    pub pal: u16,
    /// Bits of the stored word this format reads and writes.
    pub fmsk: u32,
    /// Shift of the value inside the stored word.
    pub fshift: u32,
}

const fn info(
    bpp: u32,
    layout: Layout,
    depth: bool,
    pal: u16,
    fmsk: u32,
    fshift: u32,
) -> PsmInfo {
    let (page_width, page_height, block_width, block_height) = match bpp {
        32 => (64, 32, 8, 8),
        16 => (64, 64, 16, 8),
        8 => (128, 64, 16, 16),
        _ => (128, 128, 32, 16),
    };
    PsmInfo {
        bpp,
        page_width,
        page_height,
        block_width,
        block_height,
        layout,
        depth,
        pal,
        fmsk,
        fshift,
    }
}

const CT32: PsmInfo = info(32, Layout::C32, false, 0, 0xFFFF_FFFF, 0);
const CT24: PsmInfo = info(32, Layout::C32, false, 0, 0x00FF_FFFF, 0);
const CT16: PsmInfo = info(16, Layout::C16, false, 0, 0xFFFF, 0);
const CT16S: PsmInfo = info(16, Layout::C16S, false, 0, 0xFFFF, 0);
const T8: PsmInfo = info(8, Layout::T8, false, 256, 0xFF, 0);
const T4: PsmInfo = info(4, Layout::T4, false, 16, 0xF, 0);
const T8H: PsmInfo = info(32, Layout::C32, false, 256, 0xFF00_0000, 24);
const T4HL: PsmInfo = info(32, Layout::C32, false, 16, 0x0F00_0000, 24);
const T4HH: PsmInfo = info(32, Layout::C32, false, 16, 0xF000_0000, 28);
const Z32: PsmInfo = info(32, Layout::Z32, true, 0, 0xFFFF_FFFF, 0);
const Z24: PsmInfo = info(32, Layout::Z32, true, 0, 0x00FF_FFFF, 0);
const Z16: PsmInfo = info(16, Layout::Z16, true, 0, 0xFFFF, 0);
const Z16S: PsmInfo = info(16, Layout::Z16S, true, 0, 0xFFFF, 0);

impl Psm {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x00 => Psm::Ct32,
            0x01 => Psm::Ct24,
            0x02 => Psm::Ct16,
            0x0A => Psm::Ct16S,
            0x13 => Psm::T8,
            0x14 => Psm::T4,
            0x1B => Psm::T8H,
            0x24 => Psm::T4HL,
            0x2C => Psm::T4HH,
            0x30 => Psm::Z32,
            0x31 => Psm::Z24,
            0x32 => Psm::Z16,
            0x3A => Psm::Z16S,
            _ => return None,
        })
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn info(self) -> &'static PsmInfo {
        match self {
            Psm::Ct32 => &CT32,
            Psm::Ct24 => &CT24,
            Psm::Ct16 => &CT16,
            Psm::Ct16S => &CT16S,
            Psm::T8 => &T8,
            Psm::T4 => &T4,
            Psm::T8H => &T8H,
            Psm::T4HL => &T4HL,
            Psm::T4HH => &T4HH,
            Psm::Z32 => &Z32,
            Psm::Z24 => &Z24,
            Psm::Z16 => &Z16,
            Psm::Z16S => &Z16S,
        }
    }

    pub fn bpp(self) -> u32 {
        self.info().bpp
    }

    pub fn layout(self) -> Layout {
        self.info().layout
    }

    pub fn is_depth(self) -> bool {
        self.info().depth
    }

    pub fn is_indexed(self) -> bool {
        self.info().pal > 0
    }

    pub fn palette_size(self) -> u16 {
        self.info().pal
    }

    /// Whether render targets / depth buffers can use this format.
    pub fn is_target_format(self) -> bool {
        !self.is_indexed()
    }

    /// Whether TEXA alpha expansion affects how this format samples.
    pub fn uses_texa(self) -> bool {
        matches!(self, Psm::Ct24 | Psm::Ct16 | Psm::Ct16S)
    }

    /// Colour channels of a 32-bit target word touched by writes in this format.
    ///
    /// Formats narrower than 32 bits expand to every channel once converted.
    pub fn channels(self) -> ChannelMask {
        let info = self.info();
        if info.bpp != 32 {
            return ChannelMask::RGBA;
        }
        ChannelMask::from_word_mask(info.fmsk)
    }

    /// Expands a stored texel to RGBA8 (`0xAABBGGRR`). Depth and index values pass through.
    pub fn texel_to_rgba(self, texel: u32, texa: &Texa) -> u32 {
        match self {
            Psm::Ct32 => texel,
            Psm::Ct24 => {
                let rgb = texel & 0x00FF_FFFF;
                rgb | (u32::from(texa.expand_alpha(rgb != 0)) << 24)
            }
            Psm::Ct16 | Psm::Ct16S => {
                let c = texel & 0xFFFF;
                let r = (c & 0x1F) << 3;
                let g = ((c >> 5) & 0x1F) << 3;
                let b = ((c >> 10) & 0x1F) << 3;
                let rgb = r | (g << 8) | (b << 16);
                let a = if c & 0x8000 != 0 {
                    texa.ta1
                } else {
                    texa.expand_alpha((c & 0x7FFF) != 0)
                };
                rgb | (u32::from(a) << 24)
            }
            _ => texel,
        }
    }

    /// Packs an RGBA8 value back into this format's stored texel.
    pub fn rgba_to_texel(self, rgba: u32) -> u32 {
        match self {
            Psm::Ct24 | Psm::Z24 => rgba & 0x00FF_FFFF,
            Psm::Ct16 | Psm::Ct16S => {
                let r = (rgba & 0xFF) >> 3;
                let g = ((rgba >> 8) & 0xFF) >> 3;
                let b = ((rgba >> 16) & 0xFF) >> 3;
                let a = u32::from((rgba >> 24) & 0x80 != 0);
                r | (g << 5) | (b << 10) | (a << 15)
            }
            Psm::Z16 | Psm::Z16S => rgba & 0xFFFF,
            _ => rgba,
        }
    }
}

/// Whether writes in `a` and `b` touch any common bit of a stored word.
pub fn has_shared_bits(a: Psm, b: Psm) -> bool {
    let a = a.info();
    let b = b.info();
    if a.bpp != 32 || b.bpp != 32 {
        return true;
    }
    (a.fmsk & b.fmsk) != 0
}

/// Whether `a` and `b` arrange the same bytes at the same coordinates.
pub fn has_compatible_bits(a: Psm, b: Psm) -> bool {
    a == b || (a.bpp() == b.bpp() && a.layout() == b.layout())
}

bitflags! {
    /// Colour channels of a 32-bit texel. Depth targets reuse the lanes for the low 24 bits
    /// (`RGB`) and the top byte (`A`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ChannelMask: u8 {
        const R = 0b0001;
        const G = 0b0010;
        const B = 0b0100;
        const A = 0b1000;
        const RGB = Self::R.bits() | Self::G.bits() | Self::B.bits();
        const RGBA = Self::RGB.bits() | Self::A.bits();
    }
}

impl ChannelMask {
    /// Channels whose byte lane has any bit set in `mask`.
    pub fn from_word_mask(mask: u32) -> Self {
        let mut out = ChannelMask::empty();
        for (lane, flag) in [
            ChannelMask::R,
            ChannelMask::G,
            ChannelMask::B,
            ChannelMask::A,
        ]
        .into_iter()
        .enumerate()
        {
            if (mask >> (lane * 8)) & 0xFF != 0 {
                out |= flag;
            }
        }
        out
    }

    /// The 32-bit word mask covering the selected channels.
    pub fn word_mask(self) -> u32 {
        let mut mask = 0u32;
        for (lane, flag) in [
            ChannelMask::R,
            ChannelMask::G,
            ChannelMask::B,
            ChannelMask::A,
        ]
        .into_iter()
        .enumerate()
        {
            if self.contains(flag) {
                mask |= 0xFF << (lane * 8);
            }
        }
        mask
    }
}
