use crate::{MemoryError, PageMapper, Psm, Rect, SurfaceDesc, Texa, MEMORY_BYTES};

/// The 4 MiB GS local memory.
pub struct LocalMemory {
    data: Box<[u8]>,
}

impl Default for LocalMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMemory")
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl LocalMemory {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; MEMORY_BYTES].into_boxed_slice(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw texel value at `(x, y)`, already shifted down to its low bits.
    pub fn read_texel(&self, mapper: &impl PageMapper, desc: &SurfaceDesc, x: u32, y: u32) -> u32 {
        let info = desc.psm.info();
        let addr = mapper.texel_address(desc, x, y);
        match info.bpp {
            32 => (self.read_u32(addr.byte) & info.fmsk) >> info.fshift,
            16 => u32::from(self.data[addr.byte]) | (u32::from(self.data[addr.byte + 1]) << 8),
            8 => u32::from(self.data[addr.byte]),
            _ => (u32::from(self.data[addr.byte]) >> addr.shift) & 0xF,
        }
    }

    /// Stores a raw texel at `(x, y)`, leaving bits outside the format's mask untouched.
    pub fn write_texel(
        &mut self,
        mapper: &impl PageMapper,
        desc: &SurfaceDesc,
        x: u32,
        y: u32,
        value: u32,
    ) {
        let info = desc.psm.info();
        let addr = mapper.texel_address(desc, x, y);
        match info.bpp {
            32 => {
                let old = self.read_u32(addr.byte);
                let new = (old & !info.fmsk) | ((value << info.fshift) & info.fmsk);
                self.data[addr.byte..addr.byte + 4].copy_from_slice(&new.to_le_bytes());
            }
            16 => {
                self.data[addr.byte..addr.byte + 2].copy_from_slice(&(value as u16).to_le_bytes());
            }
            8 => self.data[addr.byte] = value as u8,
            _ => {
                let byte = &mut self.data[addr.byte];
                *byte = (*byte & !(0xF << addr.shift)) | (((value & 0xF) as u8) << addr.shift);
            }
        }
    }

    /// Reads `rect` row by row. Negative coordinates are clipped.
    pub fn read_rect(&self, mapper: &impl PageMapper, desc: &SurfaceDesc, rect: &Rect) -> Vec<u32> {
        let rect = clip(rect);
        let mut out = Vec::with_capacity(rect.area() as usize);
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                out.push(self.read_texel(mapper, desc, x as u32, y as u32));
            }
        }
        out
    }

    /// Writes row-major `texels` into `rect`.
    pub fn write_rect(
        &mut self,
        mapper: &impl PageMapper,
        desc: &SurfaceDesc,
        rect: &Rect,
        texels: &[u32],
    ) -> Result<(), MemoryError> {
        let rect = clip(rect);
        let expected = rect.area() as usize;
        if texels.len() != expected {
            return Err(MemoryError::TexelCountMismatch {
                expected,
                actual: texels.len(),
            });
        }
        let width = rect.width() as usize;
        for (row, y) in (rect.top..rect.bottom).enumerate() {
            for (col, x) in (rect.left..rect.right).enumerate() {
                self.write_texel(mapper, desc, x as u32, y as u32, texels[row * width + col]);
            }
        }
        Ok(())
    }

    /// Host-to-local transfer of RGBA8 colour data, converted to `desc`'s storage format.
    pub fn upload(
        &mut self,
        mapper: &impl PageMapper,
        desc: &SurfaceDesc,
        rect: &Rect,
        rgba: &[u32],
    ) -> Result<(), MemoryError> {
        let texels: Vec<u32> = rgba.iter().map(|&c| desc.psm.rgba_to_texel(c)).collect();
        self.write_rect(mapper, desc, rect, &texels)
    }

    /// Reads `rect` and expands colour formats to RGBA8.
    pub fn read_rect_rgba(
        &self,
        mapper: &impl PageMapper,
        desc: &SurfaceDesc,
        rect: &Rect,
        texa: &Texa,
    ) -> Vec<u32> {
        let mut texels = self.read_rect(mapper, desc, rect);
        for t in &mut texels {
            *t = desc.psm.texel_to_rgba(*t, texa);
        }
        texels
    }

    /// Reads a palette of `entries` colours stored at `cbp` in `cpsm`, as RGBA8.
    ///
    /// Entries are laid out left to right in rows of 16.
    pub fn read_clut(
        &self,
        mapper: &impl PageMapper,
        cbp: u32,
        cpsm: Psm,
        entries: usize,
    ) -> Result<Vec<u32>, MemoryError> {
        if !matches!(cpsm, Psm::Ct32 | Psm::Ct24 | Psm::Ct16 | Psm::Ct16S) {
            return Err(MemoryError::UnsupportedFormat(cpsm));
        }
        if entries != 16 && entries != 256 {
            return Err(MemoryError::InvalidClut { psm: cpsm, entries });
        }
        let desc = SurfaceDesc::new(cbp, 1, cpsm);
        let texa = Texa {
            ta0: 0,
            aem: false,
            ta1: 0x80,
        };
        Ok((0..entries as u32)
            .map(|i| {
                let raw = self.read_texel(mapper, &desc, i % 16, i / 16);
                cpsm.texel_to_rgba(raw, &texa)
            })
            .collect())
    }

    fn read_u32(&self, byte: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.data[byte..byte + 4]);
        u32::from_le_bytes(word)
    }
}

fn clip(rect: &Rect) -> Rect {
    let r = Rect::new(rect.left.max(0), rect.top.max(0), rect.right, rect.bottom);
    if r.is_empty() {
        Rect::EMPTY
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GsPageMapper;

    #[test]
    fn masked_formats_preserve_other_bits() {
        let mut mem = LocalMemory::new();
        let ct32 = SurfaceDesc::new(0, 1, Psm::Ct32);
        let t8h = SurfaceDesc::new(0, 1, Psm::T8H);
        mem.write_texel(&GsPageMapper, &ct32, 3, 2, 0x1122_3344);
        mem.write_texel(&GsPageMapper, &t8h, 3, 2, 0xAB);
        assert_eq!(mem.read_texel(&GsPageMapper, &ct32, 3, 2), 0xAB22_3344);
        assert_eq!(mem.read_texel(&GsPageMapper, &t8h, 3, 2), 0xAB);
    }

    #[test]
    fn t4_nibbles_are_independent() {
        let mut mem = LocalMemory::new();
        let t4 = SurfaceDesc::new(0, 2, Psm::T4);
        mem.write_texel(&GsPageMapper, &t4, 0, 0, 0x5);
        mem.write_texel(&GsPageMapper, &t4, 1, 0, 0xC);
        assert_eq!(mem.read_texel(&GsPageMapper, &t4, 0, 0), 0x5);
        assert_eq!(mem.read_texel(&GsPageMapper, &t4, 1, 0), 0xC);
    }

    #[test]
    fn write_rect_checks_length() {
        let mut mem = LocalMemory::new();
        let desc = SurfaceDesc::new(0, 1, Psm::Ct32);
        let err = mem
            .write_rect(&GsPageMapper, &desc, &Rect::from_size(4, 4), &[0; 3])
            .unwrap_err();
        assert_eq!(
            err,
            MemoryError::TexelCountMismatch {
                expected: 16,
                actual: 3
            }
        );
    }

    #[test]
    fn clut_reads_rows_of_sixteen() {
        let mut mem = LocalMemory::new();
        let desc = SurfaceDesc::new(0x100, 1, Psm::Ct32);
        mem.write_texel(&GsPageMapper, &desc, 1, 1, 0xFF00_00FF);
        let clut = mem.read_clut(&GsPageMapper, 0x100, Psm::Ct32, 256).unwrap();
        assert_eq!(clut.len(), 256);
        assert_eq!(clut[17], 0xFF00_00FF);
        assert!(mem.read_clut(&GsPageMapper, 0, Psm::T8, 16).is_err());
    }
}
