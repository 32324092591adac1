//! Double-buffered frame buffer flip: the back buffer is allocated over the lower half of
//! the front buffer's memory and must inherit what was drawn there.

use gs_mem::{GsPageMapper, LocalMemory, PageMapper, Psm, Rect, SurfaceDesc};
use gs_texture_cache::{
    CacheConfig, GpuBackend, SoftwareBackend, TargetKind, TargetRequest, TextureCache,
};
use pretty_assertions::assert_eq;

const FRONT: SurfaceDesc = SurfaceDesc::new(0, 10, Psm::Ct32);
const BACK: SurfaceDesc = SurfaceDesc::new(0x500, 10, Psm::Ct32);
const WIDTH: u32 = 640;
const HEIGHT: u32 = 224;

#[test]
fn back_buffer_inherits_front_buffer_rows() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let mut cache = TextureCache::new(SoftwareBackend::new(), CacheConfig::default()).unwrap();
    let mut mem = LocalMemory::new();

    // Front buffer: every row drawn with its own index.
    let front = cache
        .lookup_target(
            &mem,
            &TargetRequest::new(FRONT, WIDTH, HEIGHT, TargetKind::RenderTarget).used(true),
        )
        .unwrap();
    let texels: Vec<u32> = (0..HEIGHT)
        .flat_map(|y| std::iter::repeat(0xFF00_0000 | y).take(WIDTH as usize))
        .collect();
    let extent = Rect::from_size(WIDTH as i32, HEIGHT as i32);
    let texture = cache.target(front).unwrap().texture();
    cache.backend_mut().upload(texture, 0, &extent, &texels).unwrap();
    cache
        .mark_drawn(front, &extent, gs_mem::ChannelMask::RGBA)
        .unwrap();

    // Host transfer into rows 224..448 of the front buffer's layout, past its end.
    let transfer = Rect::new(0, 224, 640, 448);
    for y in transfer.top..transfer.bottom {
        for x in transfer.left..transfer.right {
            mem.write_texel(&GsPageMapper, &FRONT, x as u32, y as u32, 0x5500_0000 | y as u32);
        }
    }
    cache.invalidate_local_mem(&FRONT, &transfer);
    let t1 = cache.target(front).unwrap();
    assert!(t1.dirty().is_empty());
    assert_eq!(t1.valid(), extent);

    let back_end = GsPageMapper.surface_range(&BACK, WIDTH, HEIGHT).end;
    assert_eq!(
        cache.find_target_overlap(BACK.bp, back_end, TargetKind::RenderTarget, Psm::Ct32),
        Some(front)
    );

    let back = cache
        .lookup_target(
            &mem,
            &TargetRequest::new(BACK, WIDTH, HEIGHT, TargetKind::RenderTarget).preload(true),
        )
        .unwrap();
    assert!(cache.target(front).is_none());

    let t2 = cache.target(back).unwrap();
    assert_eq!(t2.valid(), extent);
    assert_eq!(t2.drawn(), Rect::new(0, 0, 640, 96));
    let texture = t2.texture();
    let backend = cache.backend();
    // Rows 0..96 sit on front rows 128..224 and come from the GPU copy.
    for y in [0, 50, 95] {
        assert_eq!(backend.pixel(texture, 300, y), Some(0xFF00_0000 | (y + 128)));
    }
    // The rest was preloaded from the transfer.
    for y in [96, 150, 223] {
        assert_eq!(backend.pixel(texture, 300, y), Some(0x5500_0000 | (y + 128)));
    }
    assert_eq!(cache.stats().target_migrations, 1);

    cache.readback_all(&mut mem).unwrap();
    assert_eq!(mem.read_texel(&GsPageMapper, &FRONT, 10, 200), 0xFF00_0000 | 200);
    assert_eq!(mem.read_texel(&GsPageMapper, &FRONT, 10, 300), 0x5500_0000 | 300);
}
