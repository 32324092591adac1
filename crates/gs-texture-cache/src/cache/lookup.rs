use gs_mem::{
    has_compatible_bits, has_shared_bits, BlockRange, ChannelMask, Clamp, LocalMemory, PageMapper,
    Psm, Rect, SurfaceDesc, Tex0, Texa, BLOCKS_PER_PAGE, MAX_BLOCKS, MAX_BP,
};
use tracing::{debug, trace};

use super::{TargetRequest, TextureCache};
use crate::source::normalize_texa;
use crate::surface::scaled_size;
use crate::target::texture_to_memory;
use crate::{
    CacheError, DirtyRect, GpuBackend, HashCacheKey, MipChain, Result, Source, SourceHandle,
    SourceRegion, SourceTexture, SurfaceBase, SurfaceOffsetKey, Target, TargetHandle, TargetKind,
    TextureDesc, TextureId, TextureKind, TexturePreloading,
};

/// Texels a source actually samples; the whole texture when the region misses it entirely.
fn sampled_rect(tex0: &Tex0, region: &SourceRegion) -> Rect {
    let full = tex0.rect();
    let rect = region.rect(tex0.width(), tex0.height()).intersect(&full);
    if rect.is_empty() {
        full
    } else {
        rect
    }
}

/// Parts of `extent` outside `valid`, as up to four disjoint strips.
fn uncovered(extent: &Rect, valid: &Rect) -> [Rect; 4] {
    let v = valid.intersect(extent);
    if v.is_empty() {
        return [*extent, Rect::EMPTY, Rect::EMPTY, Rect::EMPTY];
    }
    [
        Rect::new(extent.left, extent.top, extent.right, v.top),
        Rect::new(extent.left, v.bottom, extent.right, extent.bottom),
        Rect::new(extent.left, v.top, v.left, v.bottom),
        Rect::new(v.right, v.top, extent.right, v.bottom),
    ]
}

fn upload_levels(
    backend: &mut impl GpuBackend,
    desc: &TextureDesc,
    rects: &[Rect],
    levels: &[Vec<u32>],
) -> Result<TextureId> {
    let texture = backend.create_texture(desc)?;
    for (level, (rect, texels)) in rects.iter().zip(levels).enumerate() {
        if let Err(err) = backend.upload(texture, level as u32, rect, texels) {
            backend.destroy_texture(texture);
            return Err(err.into());
        }
    }
    Ok(texture)
}

impl<B: GpuBackend, M: PageMapper> TextureCache<B, M> {
    /// Finds or builds the source a draw samples with `tex0`.
    ///
    /// In order of preference: an existing source created for the same state, the contents
    /// of a render target or depth buffer holding the texels, a hash-cache entry with the
    /// same contents, and finally a fresh upload from `mem`. Indexed formats get the palette
    /// for `clut`, read from `tex0.cbp` when `None`.
    ///
    /// `mem` is written when a target holding drawn texels the texture overlaps has to be
    /// read back before uploading.
    pub fn lookup_source(
        &mut self,
        mem: &mut LocalMemory,
        tex0: &Tex0,
        texa: &Texa,
        clamp: &Clamp,
        clut: Option<&[u32]>,
        mips: Option<&MipChain>,
    ) -> Result<SourceHandle> {
        let region = SourceRegion::from_clamp(clamp, tex0.width(), tex0.height());
        let rect = sampled_rect(tex0, &region);
        let clut = if tex0.psm.is_indexed() {
            Some(match clut {
                Some(clut) => clut.to_vec(),
                None => mem.read_clut(
                    &self.mapper,
                    tex0.cbp,
                    tex0.cpsm,
                    usize::from(tex0.psm.palette_size()),
                )?,
            })
        } else {
            None
        };

        let handle = match self.find_source(tex0, texa, &region, &rect, mips) {
            Some(handle) => {
                self.counters.source_hits += 1;
                self.refresh_source(mem, handle, &rect)?;
                trace!(?handle, tbp0 = tex0.tbp0, psm = ?tex0.psm, "source hit");
                handle
            }
            None => {
                self.counters.source_misses += 1;
                match self.source_from_target(mem, tex0, texa, &region, &rect, mips)? {
                    Some(handle) => handle,
                    None => self.source_from_memory(
                        mem,
                        tex0,
                        texa,
                        &region,
                        &rect,
                        clut.as_deref(),
                        mips,
                    )?,
                }
            }
        };

        if let Some(clut) = clut {
            let palette = self.palettes.lookup(&mut self.backend, &clut);
            if let Some(source) = self.sources.get_mut(handle) {
                source.palette = Some(palette);
            }
        }
        Ok(handle)
    }

    fn find_source(
        &self,
        tex0: &Tex0,
        texa: &Texa,
        region: &SourceRegion,
        rect: &Rect,
        mips: Option<&MipChain>,
    ) -> Option<SourceHandle> {
        let page = self.mapper.block_range(&tex0.desc(), rect).start / BLOCKS_PER_PAGE;
        self.sources.on_page(page).iter().copied().find(|&h| {
            self.sources.get(h).is_some_and(|s| {
                s.matches(tex0, texa, region, mips)
                    && match s.texture() {
                        SourceTexture::Target {
                            target,
                            shared: true,
                            ..
                        } => self.targets.contains(*target),
                        _ => true,
                    }
            })
        })
    }

    /// Resets a reused source's age and brings a shared target up to date.
    fn refresh_source(
        &mut self,
        mem: &LocalMemory,
        handle: SourceHandle,
        rect: &Rect,
    ) -> Result<()> {
        let Some(source) = self.sources.get_mut(handle) else {
            return Err(CacheError::StaleHandle);
        };
        source.base.age = 0;
        let shared = match source.texture() {
            SourceTexture::Target {
                target,
                shared: true,
                ..
            } => Some(*target),
            _ => None,
        };
        if let Some(target) = shared.and_then(|h| self.targets.get_mut(h)) {
            target.base.age = 0;
            if target.update_if_dirty_intersects(&mut self.backend, mem, &self.mapper, rect)? {
                self.counters.dirty_flushes += 1;
            }
        }
        Ok(())
    }

    fn source_from_target(
        &mut self,
        mem: &LocalMemory,
        tex0: &Tex0,
        texa: &Texa,
        region: &SourceRegion,
        rect: &Rect,
        mips: Option<&MipChain>,
    ) -> Result<Option<SourceHandle>> {
        if tex0.psm.is_indexed() || mips.is_some() {
            return Ok(None);
        }
        let desc = tex0.desc();
        let kind = if tex0.psm.is_depth() {
            TargetKind::DepthStencil
        } else {
            TargetKind::RenderTarget
        };
        let range = self.mapper.block_range(&desc, rect);

        let mut found = None;
        for (handle, target) in self.targets.iter() {
            let tdesc = *target.desc();
            if target.kind() != kind
                || tdesc.bw != desc.bw
                || !has_compatible_bits(tdesc.psm, desc.psm)
                || !target.base.overlaps(&range)
            {
                continue;
            }
            if tdesc.bp == desc.bp {
                found = Some((handle, *rect, true));
                break;
            }
            let offset = self.offsets.get_or_compute(
                &self.mapper,
                &SurfaceOffsetKey {
                    a: desc,
                    a_rect: *rect,
                    b: tdesc,
                    b_rect: target.extent(),
                },
            );
            if offset.is_valid
                && offset.b_rect.width() == rect.width()
                && offset.b_rect.height() == rect.height()
            {
                found = Some((handle, offset.b_rect, false));
                break;
            }
        }
        let Some((target_handle, target_rect, shared)) = found else {
            return self.source_from_other_kind(mem, tex0, texa, region, rect);
        };

        let target = self
            .targets
            .get_mut(target_handle)
            .ok_or(CacheError::StaleHandle)?;
        target.base.age = 0;
        if target.update_if_dirty_intersects(&mut self.backend, mem, &self.mapper, &target_rect)? {
            self.counters.dirty_flushes += 1;
        }
        let used = target_rect.intersect(&target.extent());
        if used.is_empty() || !target.valid().contains(&used) {
            return Ok(None);
        }

        let scale = target.base.scale();
        let target_texture = target.texture();
        let (texture, bytes) = if shared {
            (
                SourceTexture::Target {
                    target: target_handle,
                    texture: target_texture,
                    shared: true,
                },
                0,
            )
        } else {
            let (w, h) = scaled_size(tex0.width(), tex0.height(), scale);
            let tex_desc = TextureDesc::new(TextureKind::Texture, w, h);
            let copy = self.backend.create_texture(&tex_desc)?;
            if let Err(err) = self.backend.stretch_rect(
                target_texture,
                &target_rect.scale(scale),
                copy,
                &rect.scale(scale),
                ChannelMask::RGBA,
            ) {
                self.backend.destroy_texture(copy);
                return Err(err.into());
            }
            (
                SourceTexture::Target {
                    target: target_handle,
                    texture: copy,
                    shared: false,
                },
                tex_desc.byte_size(),
            )
        };

        let base = SurfaceBase::new(
            &self.mapper,
            desc,
            normalize_texa(tex0.psm, texa),
            tex0.width(),
            tex0.height(),
            scale,
        );
        let pages = self.mapper.pages(&desc, rect);
        let source = Source::new(base, *tex0, *region, None, texture, 1, pages, bytes);
        let handle = self.sources.insert(source);
        debug!(
            ?handle,
            target = ?target_handle,
            tbp0 = tex0.tbp0,
            psm = ?tex0.psm,
            shared,
            ?target_rect,
            "source from target"
        );
        Ok(Some(handle))
    }

    /// A depth buffer sampled with a colour format, or a colour target sampled with a depth
    /// format. The texels go through their memory representation into a private copy.
    fn source_from_other_kind(
        &mut self,
        mem: &LocalMemory,
        tex0: &Tex0,
        texa: &Texa,
        region: &SourceRegion,
        rect: &Rect,
    ) -> Result<Option<SourceHandle>> {
        let desc = tex0.desc();
        let kind = if tex0.psm.is_depth() {
            TargetKind::RenderTarget
        } else {
            TargetKind::DepthStencil
        };
        let found = self
            .targets
            .iter()
            .find(|(_, t)| {
                let tdesc = t.desc();
                t.kind() == kind
                    && tdesc.bp == desc.bp
                    && tdesc.bw == desc.bw
                    && tdesc.psm.bpp() == desc.psm.bpp()
                    && has_shared_bits(tdesc.psm, desc.psm)
            })
            .map(|(h, _)| h);
        let Some(target_handle) = found else {
            return Ok(None);
        };

        let target = self
            .targets
            .get_mut(target_handle)
            .ok_or(CacheError::StaleHandle)?;
        target.base.age = 0;
        if target.update_if_dirty_intersects(&mut self.backend, mem, &self.mapper, rect)? {
            self.counters.dirty_flushes += 1;
        }
        if !target.valid().contains(rect) {
            return Ok(None);
        }
        let tpsm = target.desc().psm;
        let scale = target.base.scale();
        let target_texture = target.texture();

        let scaled = rect.scale(scale);
        let texa = normalize_texa(tex0.psm, texa);
        let converted: Vec<u32> = self
            .backend
            .download(target_texture, &scaled)?
            .into_iter()
            .map(|texel| tex0.psm.texel_to_rgba(texture_to_memory(tpsm, texel), &texa))
            .collect();
        let (w, h) = scaled_size(tex0.width(), tex0.height(), scale);
        let tex_desc = TextureDesc::new(TextureKind::Texture, w, h);
        let copy = upload_levels(&mut self.backend, &tex_desc, &[scaled], &[converted])?;

        let base = SurfaceBase::new(&self.mapper, desc, texa, tex0.width(), tex0.height(), scale);
        let texture = SourceTexture::Target {
            target: target_handle,
            texture: copy,
            shared: false,
        };
        let pages = self.mapper.pages(&desc, rect);
        let source = Source::new(
            base,
            *tex0,
            *region,
            None,
            texture,
            1,
            pages,
            tex_desc.byte_size(),
        );
        let handle = self.sources.insert(source);
        debug!(
            ?handle,
            target = ?target_handle,
            tbp0 = tex0.tbp0,
            psm = ?tex0.psm,
            target_psm = ?tpsm,
            "source converted from target of the other kind"
        );
        Ok(Some(handle))
    }

    #[allow(clippy::too_many_arguments)]
    fn source_from_memory(
        &mut self,
        mem: &mut LocalMemory,
        tex0: &Tex0,
        texa: &Texa,
        region: &SourceRegion,
        rect: &Rect,
        clut: Option<&[u32]>,
        mips: Option<&MipChain>,
    ) -> Result<SourceHandle> {
        let desc = tex0.desc();
        let upload = match self.config.preloading {
            TexturePreloading::Partial => *rect,
            TexturePreloading::Off | TexturePreloading::Full => tex0.rect(),
        };
        self.readback_overlapping_targets(mem, &desc, &upload)?;

        let level_count = mips.map_or(1, MipChain::level_count);
        let tex_desc = TextureDesc::new(TextureKind::Texture, tex0.width(), tex0.height())
            .with_levels(level_count);

        let mut rects = vec![upload];
        let mut raw = vec![mem.read_rect(&self.mapper, &desc, &upload)];
        let mut pages = self.mapper.pages(&desc, &upload);
        for (i, level) in mips.map_or(&[][..], |m| &m.levels[..]).iter().enumerate() {
            let (w, h) = tex_desc.level_size(i as u32 + 1);
            let level_rect = Rect::from_size(w as i32, h as i32);
            raw.push(mem.read_rect(&self.mapper, &level.desc(), &level_rect));
            pages.extend(self.mapper.pages(&level.desc(), &level_rect));
            rects.push(level_rect);
        }
        pages.sort_unstable();
        pages.dedup();

        let texa = normalize_texa(tex0.psm, texa);
        let expanded: Vec<Vec<u32>> = raw
            .iter()
            .map(|level| {
                level
                    .iter()
                    .map(|&t| tex0.psm.texel_to_rgba(t, &texa))
                    .collect()
            })
            .collect();

        let use_hash_cache = self
            .policy
            .use_hash_cache(tex0, self.config.hash_cache_enabled());
        let (texture, bytes) = if use_hash_cache {
            let key = HashCacheKey::new(tex0, &texa, &raw, clut, *region);
            if self.hash_cache.acquire(&key).is_some() {
                self.counters.hash_cache_hits += 1;
            } else {
                self.counters.hash_cache_misses += 1;
                let texture = upload_levels(&mut self.backend, &tex_desc, &rects, &expanded)?;
                self.hash_cache.insert(key, texture, tex_desc.byte_size());
            }
            (SourceTexture::Hashed(key), 0)
        } else {
            let texture = upload_levels(&mut self.backend, &tex_desc, &rects, &expanded)?;
            (SourceTexture::Owned(texture), tex_desc.byte_size())
        };

        let base = SurfaceBase::new(&self.mapper, desc, texa, tex0.width(), tex0.height(), 1.0);
        let valid_mips = u32::MAX >> (32 - level_count.clamp(1, 32));
        let source = Source::new(
            base,
            *tex0,
            *region,
            mips.cloned(),
            texture,
            valid_mips,
            pages,
            bytes,
        );
        let handle = self.sources.insert(source);
        debug!(
            ?handle,
            tbp0 = tex0.tbp0,
            tbw = tex0.tbw,
            psm = ?tex0.psm,
            ?upload,
            levels = level_count,
            hashed = use_hash_cache,
            "source from memory"
        );
        Ok(handle)
    }

    /// Writes drawn texels of targets overlapping `rect` back to memory so an upload sees them.
    fn readback_overlapping_targets(
        &mut self,
        mem: &mut LocalMemory,
        desc: &SurfaceDesc,
        rect: &Rect,
    ) -> Result<()> {
        let range = self.mapper.block_range(desc, rect);
        let candidates: Vec<(TargetHandle, SurfaceDesc, Rect, Rect)> = self
            .targets
            .iter()
            .filter(|(_, t)| {
                !t.drawn().is_empty()
                    && t.base.overlaps(&range)
                    && has_shared_bits(t.desc().psm, desc.psm)
            })
            .map(|(h, t)| (h, *t.desc(), t.extent(), t.drawn()))
            .collect();

        for (handle, tdesc, extent, drawn) in candidates {
            let offset = self.offsets.get_or_compute(
                &self.mapper,
                &SurfaceOffsetKey {
                    a: *desc,
                    a_rect: *rect,
                    b: tdesc,
                    b_rect: extent,
                },
            );
            let area = offset.b_rect.intersect(&drawn);
            if offset.is_valid && !area.is_empty() {
                trace!(?handle, ?area, "reading back target under texture upload");
                self.read_target(handle, &area, mem)?;
            }
        }
        Ok(())
    }

    /// Finds or creates the target a draw renders into.
    ///
    /// A live target of the same kind at the same base pointer and buffer width is reused,
    /// grown to the requested size when smaller. A target whose blocks already hold the whole
    /// requested surface at an offset is reused as is; [`TextureCache::target_origin`] tells
    /// where the request starts inside it. Otherwise a new target is created: content
    /// of targets it overlaps is copied over and those targets are evicted, then whatever is
    /// still missing is either preloaded from `mem` or left cleared.
    pub fn lookup_target(
        &mut self,
        mem: &LocalMemory,
        req: &TargetRequest,
    ) -> Result<TargetHandle> {
        let desc = req.desc;
        let supported = match req.kind {
            TargetKind::RenderTarget => desc.psm.is_target_format(),
            TargetKind::DepthStencil => desc.psm.is_depth(),
        };
        if !supported {
            return Err(CacheError::UnsupportedTargetFormat {
                psm: desc.psm,
                kind: req.kind,
            });
        }

        let (width, height) = (req.width.max(1), req.height.max(1));
        let existing = self
            .targets
            .iter()
            .find(|(_, t)| {
                t.kind() == req.kind
                    && t.desc().bp == desc.bp
                    && t.desc().bw == desc.bw
                    && has_compatible_bits(t.desc().psm, desc.psm)
            })
            .map(|(h, _)| h);

        match existing {
            Some(handle) => {
                self.counters.target_hits += 1;
                self.reuse_target(mem, handle, req, width, height)?;
                Ok(handle)
            }
            None => match self.find_containing_target(req, width, height) {
                Some(handle) => {
                    self.counters.target_hits += 1;
                    self.reuse_containing_target(mem, handle, req)?;
                    Ok(handle)
                }
                None => {
                    self.counters.target_misses += 1;
                    self.create_target(mem, req, width, height)
                }
            },
        }
    }

    /// Offset of `desc`'s origin inside the target `handle`, in unscaled texels.
    pub fn target_origin(
        &mut self,
        handle: TargetHandle,
        desc: &SurfaceDesc,
    ) -> Option<(i32, i32)> {
        let target = self.targets.get(handle)?;
        let tdesc = *target.desc();
        if tdesc.bp == desc.bp {
            return Some((0, 0));
        }
        let offset = self.offsets.get_or_compute(
            &self.mapper,
            &SurfaceOffsetKey {
                a: *desc,
                a_rect: Rect::from_size(1, 1),
                b: tdesc,
                b_rect: target.extent(),
            },
        );
        offset
            .is_valid
            .then_some((offset.b_rect.left, offset.b_rect.top))
    }

    fn find_containing_target(
        &mut self,
        req: &TargetRequest,
        width: u32,
        height: u32,
    ) -> Option<TargetHandle> {
        let desc = req.desc;
        let rect = Rect::from_size(width as i32, height as i32);
        let candidates: Vec<(TargetHandle, SurfaceDesc, Rect)> = self
            .targets
            .iter()
            .filter(|(_, t)| {
                t.kind() == req.kind
                    && t.desc().bp != desc.bp
                    && t.desc().bw == desc.bw
                    && has_compatible_bits(t.desc().psm, desc.psm)
                    && t.base.inside(&self.mapper, &desc, &rect)
            })
            .map(|(h, t)| (h, *t.desc(), t.extent()))
            .collect();

        candidates.into_iter().find_map(|(handle, tdesc, extent)| {
            let offset = self.offsets.get_or_compute(
                &self.mapper,
                &SurfaceOffsetKey {
                    a: desc,
                    a_rect: rect,
                    b: tdesc,
                    b_rect: extent,
                },
            );
            (offset.is_valid
                && offset.b_rect.width() == rect.width()
                && offset.b_rect.height() == rect.height())
            .then_some(handle)
        })
    }

    fn reuse_containing_target(
        &mut self,
        mem: &LocalMemory,
        handle: TargetHandle,
        req: &TargetRequest,
    ) -> Result<()> {
        let current = self
            .targets
            .get(handle)
            .ok_or(CacheError::StaleHandle)?
            .base
            .scale();
        let scale = self.requested_scale(req, current);

        let target = self
            .targets
            .get_mut(handle)
            .ok_or(CacheError::StaleHandle)?;
        if scale != current {
            let (w, h) = target.base.unscaled_size();
            target.resize_texture(&mut self.backend, &self.mapper, w, h, scale)?;
        }
        target.used |= req.used;
        target.is_frame |= req.is_frame;
        trace!(
            ?handle,
            bp = req.desc.bp,
            container = target.desc().bp,
            "target contains request"
        );
        self.flush_target(mem, handle, true)
    }

    fn requested_scale(&self, req: &TargetRequest, current: f32) -> f32 {
        let scale = self
            .policy
            .target_scale(&req.desc, req.scale.unwrap_or(current));
        if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            current
        }
    }

    fn reuse_target(
        &mut self,
        mem: &LocalMemory,
        handle: TargetHandle,
        req: &TargetRequest,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let current = self
            .targets
            .get(handle)
            .ok_or(CacheError::StaleHandle)?
            .base
            .scale();
        let scale = self.requested_scale(req, current);

        let target = self
            .targets
            .get_mut(handle)
            .ok_or(CacheError::StaleHandle)?;
        let (w, h) = target.base.unscaled_size();
        if target.desc().psm != req.desc.psm {
            target.base.set_layout(&self.mapper, req.desc, w, h, current);
        }
        let grow = width > w || height > h;
        if grow || scale != current {
            target.resize_texture(
                &mut self.backend,
                &self.mapper,
                width.max(w),
                height.max(h),
                scale,
            )?;
        }
        target.used |= req.used;
        target.is_frame |= req.is_frame;
        trace!(?handle, bp = req.desc.bp, grow, "target hit");

        if grow {
            self.migrate_overlaps(mem, handle)?;
        }
        self.flush_target(mem, handle, true)
    }

    fn create_target(
        &mut self,
        mem: &LocalMemory,
        req: &TargetRequest,
        width: u32,
        height: u32,
    ) -> Result<TargetHandle> {
        let desc = req.desc;
        let scale = self.requested_scale(req, self.config.upscale_multiplier);
        let mut target = Target::create(
            &mut self.backend,
            &self.mapper,
            desc,
            req.kind,
            width,
            height,
            scale,
        )?;
        if let Err(err) = target.clear_texture(&mut self.backend, target.texture()) {
            target.destroy(&mut self.backend);
            return Err(err.into());
        }
        target.used = req.used;
        target.is_frame = req.is_frame;
        let handle = self.targets.insert(target);
        debug!(
            ?handle,
            bp = desc.bp,
            bw = desc.bw,
            psm = ?desc.psm,
            kind = ?req.kind,
            width,
            height,
            scale,
            "created target"
        );

        if let Err(err) = self.fill_new_target(mem, handle, req) {
            self.evict_target(handle);
            return Err(err);
        }
        Ok(handle)
    }

    fn fill_new_target(
        &mut self,
        mem: &LocalMemory,
        handle: TargetHandle,
        req: &TargetRequest,
    ) -> Result<()> {
        self.migrate_overlaps(mem, handle)?;

        let desc = req.desc;
        let preload = self.policy.preload_target(
            &desc,
            req.is_frame,
            self.config.frame_preload.resolve(req.preload),
        );
        if !req.is_clear && (preload || req.fbmask != 0) {
            let target = self
                .targets
                .get_mut(handle)
                .ok_or(CacheError::StaleHandle)?;
            for rect in uncovered(&target.extent(), &target.valid()) {
                target.dirty.push(DirtyRect {
                    rect,
                    channels: desc.psm.channels(),
                });
            }
        }
        self.flush_target(mem, handle, true)
    }

    /// Copies what other targets of the same kind hold inside `handle`'s blocks, then
    /// evicts them.
    fn migrate_overlaps(&mut self, mem: &LocalMemory, handle: TargetHandle) -> Result<()> {
        let (kind, range) = {
            let target = self.targets.get(handle).ok_or(CacheError::StaleHandle)?;
            (target.kind(), target.base.block_range())
        };
        loop {
            let overlap = self
                .targets
                .iter()
                .find(|(h, t)| *h != handle && t.kind() == kind && t.base.overlaps(&range))
                .map(|(h, _)| h);
            let Some(old) = overlap else {
                return Ok(());
            };
            self.migrate_target(mem, old, handle)?;
            self.evict_target(old);
        }
    }

    fn migrate_target(
        &mut self,
        mem: &LocalMemory,
        old: TargetHandle,
        new: TargetHandle,
    ) -> Result<()> {
        self.flush_target(mem, old, false)?;
        let (Some(src), Some(dst)) = (self.targets.get(old), self.targets.get(new)) else {
            return Ok(());
        };
        let (odesc, ovalid, odrawn) = (*src.desc(), src.valid(), src.drawn());
        let (otex, oscale, obits) = (src.texture(), src.base.scale(), src.valid_bits());
        let (ndesc, nextent) = (*dst.desc(), dst.extent());
        let (ntex, nscale) = (dst.texture(), dst.base.scale());
        if ovalid.is_empty()
            || !has_compatible_bits(odesc.psm, ndesc.psm)
            || !self.policy.migrate_overlap(&odesc, &ndesc)
        {
            return Ok(());
        }

        let forward = self.offsets.get_or_compute(
            &self.mapper,
            &SurfaceOffsetKey {
                a: odesc,
                a_rect: ovalid,
                b: ndesc,
                b_rect: nextent,
            },
        );
        if !forward.is_valid {
            return Ok(());
        }
        let back = self.offsets.get_or_compute(
            &self.mapper,
            &SurfaceOffsetKey {
                a: ndesc,
                a_rect: forward.b_rect,
                b: odesc,
                b_rect: ovalid,
            },
        );
        let (src_rect, dst_rect) = (back.b_rect, forward.b_rect);
        if !back.is_valid
            || src_rect.width() != dst_rect.width()
            || src_rect.height() != dst_rect.height()
        {
            return Ok(());
        }
        let mask = obits & ndesc.psm.channels();
        if mask.is_empty() {
            return Ok(());
        }

        self.backend.stretch_rect(
            otex,
            &src_rect.scale(oscale),
            ntex,
            &dst_rect.scale(nscale),
            mask,
        )?;
        let target = self.targets.get_mut(new).ok_or(CacheError::StaleHandle)?;
        target.update_validity(&dst_rect);
        target.update_valid_bits(mask);
        let drawn = odrawn
            .intersect(&src_rect)
            .translate(dst_rect.left - src_rect.left, dst_rect.top - src_rect.top);
        if !drawn.is_empty() {
            target.update_drawn(&drawn);
        }
        self.counters.target_migrations += 1;
        debug!(from = ?old, to = ?new, ?src_rect, ?dst_rect, ?mask, "migrated overlapping target");
        Ok(())
    }

    /// Applies a target's pending writes ahead of binding it.
    pub fn update_target(&mut self, mem: &LocalMemory, handle: TargetHandle) -> Result<()> {
        self.flush_target(mem, handle, true)
    }

    /// Find-only lookup for scan-out: the render target at `desc`, or one whose blocks
    /// contain the displayed area. The target is brought up to date and flagged as a frame.
    pub fn lookup_display_target(
        &mut self,
        mem: &LocalMemory,
        desc: &SurfaceDesc,
        width: u32,
        height: u32,
    ) -> Result<Option<TargetHandle>> {
        let rect = Rect::from_size(width as i32, height as i32);
        let candidate = |t: &Target| {
            t.kind() == TargetKind::RenderTarget && has_compatible_bits(t.desc().psm, desc.psm)
        };
        let found = self
            .targets
            .iter()
            .find(|(_, t)| candidate(t) && t.desc().bp == desc.bp && t.desc().bw == desc.bw)
            .or_else(|| {
                self.targets
                    .iter()
                    .find(|(_, t)| candidate(t) && t.base.inside(&self.mapper, desc, &rect))
            })
            .map(|(h, _)| h);

        let Some(handle) = found else {
            trace!(bp = desc.bp, "no display target");
            return Ok(None);
        };
        self.flush_target(mem, handle, true)?;
        if let Some(target) = self.targets.get_mut(handle) {
            target.is_frame = true;
        }
        Ok(Some(handle))
    }

    /// A target of `kind` based somewhere other than `bp` whose blocks overlap
    /// `bp..=end_block` and whose format shares bits with `psm`. `end_block` may be wrapped.
    pub fn find_target_overlap(
        &self,
        bp: u32,
        end_block: u32,
        kind: TargetKind,
        psm: Psm,
    ) -> Option<TargetHandle> {
        let bp = bp & MAX_BP;
        let end = if end_block < bp {
            end_block + MAX_BLOCKS
        } else {
            end_block
        };
        let range = BlockRange::new(bp, end);
        self.targets
            .iter()
            .find(|(_, t)| {
                t.kind() == kind
                    && t.desc().bp != bp
                    && has_shared_bits(t.desc().psm, psm)
                    && t.base.overlaps(&range)
            })
            .map(|(h, _)| h)
    }

    pub fn get_exact_target(&self, desc: &SurfaceDesc, kind: TargetKind) -> Option<TargetHandle> {
        self.targets
            .iter()
            .find(|(_, t)| t.kind() == kind && t.desc() == desc)
            .map(|(h, _)| h)
    }

    /// Whether a 32-bit render target starts at `bp`.
    pub fn has_32bit_target(&self, bp: u32) -> bool {
        self.targets.iter().any(|(_, t)| {
            t.kind() == TargetKind::RenderTarget && t.desc().bp == bp && t.desc().psm.bpp() == 32
        })
    }
}
