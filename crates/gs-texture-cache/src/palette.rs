use std::cell::Cell;
use std::rc::Rc;

use gs_mem::Rect;
use hashbrown::HashMap;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::{GpuBackend, Result, TextureDesc, TextureId, TextureKind};

/// A CLUT shared by every source sampling with the same colours.
#[derive(Debug)]
pub struct Palette {
    clut: Box<[u32]>,
    texture: Cell<Option<TextureId>>,
}

impl Palette {
    fn new(clut: &[u32]) -> Self {
        Self {
            clut: clut.into(),
            texture: Cell::new(None),
        }
    }

    /// RGBA8 entries.
    pub fn clut(&self) -> &[u32] {
        &self.clut
    }

    pub fn entries(&self) -> u16 {
        self.clut.len() as u16
    }

    /// The palette as a one-row texture, created on first use.
    pub fn texture(&self, backend: &mut impl GpuBackend) -> Result<TextureId> {
        if let Some(id) = self.texture.get() {
            return Ok(id);
        }
        let width = self.clut.len() as u32;
        let id = backend.create_texture(&TextureDesc::new(TextureKind::Palette, width, 1))?;
        if let Err(err) = backend.upload(id, 0, &Rect::from_size(width as i32, 1), &self.clut) {
            backend.destroy_texture(id);
            return Err(err.into());
        }
        self.texture.set(Some(id));
        Ok(id)
    }

    pub fn cached_texture(&self) -> Option<TextureId> {
        self.texture.get()
    }

    fn release(&self, backend: &mut impl GpuBackend) {
        if let Some(id) = self.texture.take() {
            backend.destroy_texture(id);
        }
    }
}

/// Deduplicates palettes, with separate bounded maps for 16- and 256-colour CLUTs.
#[derive(Debug)]
pub struct PaletteMap {
    /// Buckets of palettes keyed by the xxh3 of their CLUT.
    maps: [HashMap<u64, Vec<Rc<Palette>>>; 2],
    lens: [usize; 2],
    capacity: usize,
}

impl PaletteMap {
    pub fn new(capacity: usize) -> Self {
        Self {
            maps: [HashMap::new(), HashMap::new()],
            lens: [0; 2],
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.lens[0] + self.lens[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// The shared palette holding `clut`, inserting it if new.
    pub fn lookup(&mut self, backend: &mut impl GpuBackend, clut: &[u32]) -> Rc<Palette> {
        let slot = usize::from(clut.len() > 16);
        let hash = xxh3_64(bytemuck::cast_slice(clut));

        if let Some(found) = self.maps[slot]
            .get(&hash)
            .and_then(|bucket| bucket.iter().find(|p| &*p.clut == clut))
        {
            return Rc::clone(found);
        }

        if self.lens[slot] >= self.capacity {
            self.purge_unreferenced(backend, slot);
            if self.lens[slot] >= self.capacity {
                warn!(
                    entries = self.lens[slot],
                    capacity = self.capacity,
                    "palette map full of referenced palettes"
                );
            }
        }

        let palette = Rc::new(Palette::new(clut));
        self.maps[slot]
            .entry(hash)
            .or_default()
            .push(Rc::clone(&palette));
        self.lens[slot] += 1;
        palette
    }

    /// Drops every palette no source holds anymore.
    pub fn purge(&mut self, backend: &mut impl GpuBackend) {
        self.purge_unreferenced(backend, 0);
        self.purge_unreferenced(backend, 1);
    }

    pub fn clear(&mut self, backend: &mut impl GpuBackend) {
        for map in &mut self.maps {
            for (_, bucket) in map.drain() {
                for palette in bucket {
                    palette.release(backend);
                }
            }
        }
        self.lens = [0; 2];
    }

    fn purge_unreferenced(&mut self, backend: &mut impl GpuBackend, slot: usize) {
        let before = self.lens[slot];
        let mut removed = 0;
        self.maps[slot].retain(|_, bucket| {
            bucket.retain(|palette| {
                let keep = Rc::strong_count(palette) > 1;
                if !keep {
                    palette.release(backend);
                    removed += 1;
                }
                keep
            });
            !bucket.is_empty()
        });
        self.lens[slot] -= removed;
        debug!(slot, before, removed, "purged palette map");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SoftwareBackend;

    #[test]
    fn identical_cluts_share_one_palette() {
        let mut backend = SoftwareBackend::new();
        let mut map = PaletteMap::new(8);
        let clut: Vec<u32> = (0..16).collect();
        let a = map.lookup(&mut backend, &clut);
        let b = map.lookup(&mut backend, &clut);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(map.len(), 1);

        let big: Vec<u32> = (0..256).collect();
        let c = map.lookup(&mut backend, &big);
        assert_eq!(c.entries(), 256);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn full_map_purges_palettes_only_it_holds() {
        let mut backend = SoftwareBackend::new();
        let mut map = PaletteMap::new(2);
        let held = map.lookup(&mut backend, &[1; 16]);
        let dropped = map.lookup(&mut backend, &[2; 16]);
        dropped.texture(&mut backend).unwrap();
        drop(dropped);
        assert_eq!(backend.texture_count(), 1);

        map.lookup(&mut backend, &[3; 16]);
        assert_eq!(map.len(), 2);
        assert_eq!(backend.texture_count(), 0);
        assert!(Rc::ptr_eq(&held, &map.lookup(&mut backend, &[1; 16])));
    }

    #[test]
    fn texture_is_created_once() {
        let mut backend = SoftwareBackend::new();
        let mut map = PaletteMap::new(4);
        let palette = map.lookup(&mut backend, &[0xFF00_00FF; 16]);
        let a = palette.texture(&mut backend).unwrap();
        let b = palette.texture(&mut backend).unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.pixel(a, 15, 0), Some(0xFF00_00FF));
    }
}
