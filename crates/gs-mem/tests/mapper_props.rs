#![cfg(not(target_arch = "wasm32"))]

use gs_mem::{GsPageMapper, PageMapper, Psm, Rect, SurfaceDesc, MAX_BP};
use proptest::prelude::*;

fn psm_strategy() -> impl Strategy<Value = Psm> {
    prop_oneof![
        Just(Psm::Ct32),
        Just(Psm::Ct24),
        Just(Psm::Ct16),
        Just(Psm::Ct16S),
        Just(Psm::T8),
        Just(Psm::T4),
        Just(Psm::Z32),
        Just(Psm::Z16),
        Just(Psm::Z16S),
    ]
}

fn desc_strategy() -> impl Strategy<Value = SurfaceDesc> {
    (0u32..=MAX_BP, 1u32..=16, psm_strategy())
        .prop_map(|(bp, bw, psm)| SurfaceDesc::new(bp, bw, psm))
}

/// Whole pages only: texels past the last full page of a row alias the next row.
fn row_width(desc: &SurfaceDesc) -> u32 {
    let page_width = desc.psm.info().page_width;
    (desc.stride() / page_width).max(1) * page_width
}

fn point_in(desc: SurfaceDesc) -> impl Strategy<Value = (SurfaceDesc, u32, u32)> {
    (0..row_width(&desc), 0u32..256).prop_map(move |(x, y)| (desc, x, y))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn block_origin_inverts_block_number((desc, x, y) in desc_strategy().prop_flat_map(point_in)) {
        let info = desc.psm.info();
        let block = GsPageMapper.block_number(&desc, x, y);
        let (ox, oy) = GsPageMapper.block_origin(&desc, block);

        prop_assert_eq!(ox, x - x % info.block_width);
        prop_assert_eq!(oy, y - y % info.block_height);
        prop_assert_eq!(GsPageMapper.block_number(&desc, ox, oy), block);
    }

    #[test]
    fn block_range_covers_every_corner(
        (desc, x, y) in desc_strategy().prop_flat_map(point_in),
        w in 1u32..200,
        h in 1u32..200,
    ) {
        let rect = Rect::new(x as i32, y as i32, (x + w) as i32, (y + h) as i32);
        let range = GsPageMapper.block_range(&desc, &rect);
        prop_assert!(range.start <= MAX_BP);
        prop_assert!(range.end >= range.start);

        for (cx, cy) in [(x, y), (x + w - 1, y), (x, y + h - 1), (x + w - 1, y + h - 1)] {
            let block = GsPageMapper.block_number(&desc, cx, cy);
            prop_assert!(range.contains_block(block), "block {block:#x} outside {range:?}");
        }
    }

    #[test]
    fn distinct_texels_have_distinct_addresses(
        (desc, x, y) in desc_strategy().prop_flat_map(point_in),
        dx in 1u32..64,
    ) {
        prop_assume!(x + dx < row_width(&desc));
        let a = GsPageMapper.texel_address(&desc, x, y);
        let b = GsPageMapper.texel_address(&desc, x + dx, y);
        prop_assert_ne!(a, b);
    }
}
