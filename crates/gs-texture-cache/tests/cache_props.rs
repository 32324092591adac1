#![cfg(not(target_arch = "wasm32"))]

mod common;

use gs_mem::{LocalMemory, Psm, Rect, SurfaceDesc, Tex0};
use gs_texture_cache::{GpuBackend, TargetKind, TargetRequest};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Target {
        page: u32,
        bw: u32,
        psm: Psm,
        kind: TargetKind,
        width: u32,
        height: u32,
        upscale: bool,
    },
    Write {
        page: u32,
        bw: u32,
        rect: Rect,
        host: bool,
    },
    Age,
}

fn target_op() -> impl Strategy<Value = Op> {
    let rt = prop_oneof![Just(Psm::Ct32), Just(Psm::Ct24), Just(Psm::Ct16)]
        .prop_map(|psm| (psm, TargetKind::RenderTarget));
    let ds = prop_oneof![Just(Psm::Z32), Just(Psm::Z24), Just(Psm::Z16)]
        .prop_map(|psm| (psm, TargetKind::DepthStencil));
    (0u32..48, 1u32..=4, prop_oneof![rt, ds], any::<bool>())
        .prop_flat_map(|(page, bw, (psm, kind), upscale)| {
            (1..=bw * 64, 1u32..=128).prop_map(move |(width, height)| Op::Target {
                page,
                bw,
                psm,
                kind,
                width,
                height,
                upscale,
            })
        })
}

fn write_op() -> impl Strategy<Value = Op> {
    (0u32..48, 1u32..=4, 0i32..256, 0i32..128, 1i32..64, 1i32..64, any::<bool>()).prop_map(
        |(page, bw, x, y, w, h, host)| Op::Write {
            page,
            bw,
            rect: Rect::new(x, y, x + w, y + h),
            host,
        },
    )
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![4 => target_op(), 2 => write_op(), 1 => Just(Op::Age)]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn targets_cover_requests_and_never_overlap(ops in prop::collection::vec(op(), 1..24)) {
        let mut cache = common::cache();
        let mem = LocalMemory::new();

        for op in ops {
            match op {
                Op::Target { page, bw, psm, kind, width, height, upscale } => {
                    let scale = if upscale { 2.0 } else { 1.0 };
                    let desc = SurfaceDesc::new(page * 32, bw, psm);
                    let req = TargetRequest::new(desc, width, height, kind).scale(scale);
                    let t = cache.lookup_target(&mem, &req).unwrap();

                    let target = cache.target(t).unwrap();
                    let (w, h) = target.base().unscaled_size();
                    prop_assert!(w >= width && h >= height);
                    let (tw, th) = cache.backend().texture_size(target.texture()).unwrap();
                    prop_assert!(tw as f32 >= width as f32 * scale);
                    prop_assert!(th as f32 >= height as f32 * scale);
                    let valid = target.valid();
                    prop_assert!(target.extent().contains(&valid) || valid.is_empty());
                }
                Op::Write { page, bw, rect, host } => {
                    let desc = SurfaceDesc::new(page * 32, bw, Psm::Ct32);
                    if host {
                        cache.invalidate_local_mem(&desc, &rect);
                    } else {
                        cache.invalidate_video_mem(&desc, &rect, false);
                    }
                }
                Op::Age => cache.inc_age(),
            }

            let live: Vec<_> = cache
                .targets()
                .map(|(h, t)| (h, t.kind(), t.base().block_range()))
                .collect();
            for (i, (a, kind_a, range_a)) in live.iter().enumerate() {
                for (b, kind_b, range_b) in &live[i + 1..] {
                    prop_assert!(
                        kind_a != kind_b || !range_a.overlaps(range_b),
                        "{:?} {:?} and {:?} {:?} overlap", a, range_a, b, range_b
                    );
                }
            }
        }
    }

    #[test]
    fn invalidated_sources_are_not_returned(
        page in 0u32..64,
        bw in 1u32..=4,
        tw in 3u8..=6,
        th in 3u8..=6,
        x in 0i32..64,
        y in 0i32..64,
        size in 1i32..16,
        host in any::<bool>(),
    ) {
        let mut cache = common::cache();
        let mut mem = LocalMemory::new();
        let tex0 = Tex0::new(page * 32, bw, Psm::Ct32, tw, th);
        let s = common::lookup(&mut cache, &mut mem, &tex0);
        prop_assert_eq!(common::lookup(&mut cache, &mut mem, &tex0), s);

        let (x, y) = (x % tex0.width() as i32, y % tex0.height() as i32);
        let rect = Rect::new(x, y, x + size, y + size);
        if host {
            cache.invalidate_local_mem(&tex0.desc(), &rect);
        } else {
            cache.invalidate_video_mem(&tex0.desc(), &rect, false);
        }

        prop_assert!(cache.source(s).is_none());
        prop_assert_ne!(common::lookup(&mut cache, &mut mem, &tex0), s);
    }

    #[test]
    fn offsets_round_trip(
        bw in 1u32..=8,
        rows in 0u32..4,
        psm_b in prop_oneof![Just(Psm::Ct32), Just(Psm::Ct24)],
        x in 0i32..512,
        y in 0i32..256,
        w in 1i32..96,
        h in 1i32..96,
    ) {
        let mut cache = common::cache();
        let width = (bw * 64) as i32;
        let a = SurfaceDesc::new(0, bw, Psm::Ct32);
        let b = SurfaceDesc::new(rows * bw * 32, bw, psm_b);
        let extent = Rect::from_size(width, 256);
        let x = x % width;
        let rect = Rect::new(x, y, x + w, y + h).intersect(&extent);
        prop_assume!(!rect.is_empty());

        // B starts `rows` page rows into A.
        let shift = (rows * 32) as i32;
        let expected = rect.intersect(&Rect::new(0, shift, width, 256 + shift));

        let forward = cache.surface_offset(a, rect, b, extent);
        prop_assert_eq!(forward.is_valid, !expected.is_empty());
        if forward.is_valid {
            prop_assert_eq!(forward.b_rect, expected.translate(0, -shift));
            let back = cache.surface_offset(b, forward.b_rect, a, extent);
            prop_assert!(back.is_valid);
            prop_assert_eq!(back.b_rect, expected);
        }
    }
}
