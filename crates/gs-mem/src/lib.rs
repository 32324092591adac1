//! Emulated GS local memory and its addressing rules.
//!
//! The texture cache never interprets raw graphics memory itself; it goes through the
//! types in this crate:
//!
//! - [`Psm`]: pixel storage modes, with their page/block geometry and written bit masks
//! - [`SurfaceDesc`], [`Tex0`], [`Texa`], [`Clamp`], [`TransferDesc`]: register-level
//!   descriptors of a surface inside local memory
//! - [`PageMapper`]: conversion between 2D texel coordinates and block/page addresses
//!   ([`GsPageMapper`] is the reference, block-accurate implementation)
//! - [`LocalMemory`]: the 4 MiB memory itself, with texel read/write helpers
//! - [`Rect`]: half-open integer rectangles used for every region computation

#![forbid(unsafe_code)]

mod error;
mod local_memory;
mod mapper;
mod psm;
mod rect;
mod regs;

pub use error::MemoryError;
pub use local_memory::LocalMemory;
pub use mapper::{
    check_overlap, BlockRange, GsPageMapper, PageMapper, TexelAddress, BLOCKS_PER_PAGE,
    BLOCK_BYTES, MAX_BLOCKS, MAX_BP, MAX_PAGES, MEMORY_BYTES, PAGE_BYTES,
};
pub use psm::{has_compatible_bits, has_shared_bits, ChannelMask, Layout, Psm, PsmInfo};
pub use rect::Rect;
pub use regs::{Clamp, SurfaceDesc, Tex0, Texa, TransferDesc, WrapMode};
