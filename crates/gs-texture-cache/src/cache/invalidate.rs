use gs_mem::{
    has_compatible_bits, has_shared_bits, BlockRange, ChannelMask, LocalMemory, PageMapper, Rect,
    SurfaceDesc, Tex0, TransferDesc,
};
use tracing::{debug, trace};

use super::TextureCache;
use crate::offset::compute_surface_offset;
use crate::{
    CacheError, DirtyRect, GpuBackend, Result, SourceHandle, SourceTexture, SurfaceOffsetKey,
    TargetHandle, TargetKind, TextureDesc, TextureKind,
};

impl<B: GpuBackend, M: PageMapper> TextureCache<B, M> {
    /// `rect` of `desc` was written behind the cache's back.
    ///
    /// Sources overlapping the write are destroyed. With `is_ee_write` the bytes came from the
    /// host and are already in memory, so overlapping targets queue them as dirty and the
    /// transfer is logged. Otherwise the GPU wrote them into some other surface: overlapping
    /// targets stop claiming the area, and are evicted when nothing valid remains.
    pub fn invalidate_video_mem(&mut self, desc: &SurfaceDesc, rect: &Rect, is_ee_write: bool) {
        self.invalidate_written(desc, rect, is_ee_write, None);
    }

    /// The host wrote `rect` of `desc` directly into local memory.
    ///
    /// Overlapping sources are destroyed and every overlapping target queues the area for
    /// upload on its next use. Targets already queued the same transfer during the current
    /// draw and are left alone; sources are destroyed regardless, since one may have been
    /// built from the earlier bytes.
    pub fn invalidate_local_mem(&mut self, desc: &SurfaceDesc, rect: &Rect) {
        if self.transfers.contains(self.draw, desc, rect) {
            trace!(bp = desc.bp, ?rect, draw = self.draw, "transfer already queued on targets");
            let range = self.mapper.block_range(desc, rect);
            self.destroy_written_sources(desc, &range, None);
            return;
        }
        self.invalidate_written(desc, rect, true, None);
    }

    /// Records that a draw wrote `rect` of `target` with `channels`, then invalidates every
    /// other surface holding those bytes.
    pub fn mark_drawn(
        &mut self,
        target: TargetHandle,
        rect: &Rect,
        channels: ChannelMask,
    ) -> Result<()> {
        let t = self
            .targets
            .get_mut(target)
            .ok_or(CacheError::StaleHandle)?;
        let rect = rect.intersect(&t.extent());
        if rect.is_empty() {
            return Ok(());
        }
        t.update_drawn(&rect);
        t.update_valid_bits(channels);
        t.base.age = 0;
        t.used = true;
        t.dirty.discard_covered(&rect, channels);
        let desc = *t.desc();
        self.invalidate_written(&desc, &rect, false, Some(target));
        Ok(())
    }

    /// Drops the `kind` target based at `bp`. Callers pass the kind opposite to the one
    /// about to be drawn there.
    pub fn invalidate_video_mem_type(&mut self, kind: TargetKind, bp: u32) {
        let found = self
            .targets
            .iter()
            .find(|(_, t)| t.kind() == kind && t.desc().bp == bp)
            .map(|(h, _)| h);
        if let Some(handle) = found {
            debug!(?handle, ?kind, bp, "target replaced by the other kind");
            self.evict_target(handle);
        }
    }

    /// Advances the draw index and forgets transfers that fell out of the log's window.
    pub fn begin_draw(&mut self) {
        self.draw += 1;
        self.transfers.prune(self.draw);
    }

    pub fn record_transfer(&mut self, transfer: &TransferDesc, rect: &Rect) {
        self.transfers.record(self.draw, transfer.dst(), *rect);
    }

    /// Whether the host uploaded anything overlapping `rect` of `tex0` during this or the
    /// previous draw.
    pub fn has_ee_upload(&self, tex0: &Tex0, rect: &Rect) -> bool {
        let desc = tex0.desc();
        self.transfers
            .since(self.draw.saturating_sub(1))
            .any(|record| {
                if record.dst == desc {
                    return record.rect.intersects(rect);
                }
                has_shared_bits(record.dst.psm, desc.psm)
                    && compute_surface_offset(
                        &self.mapper,
                        &SurfaceOffsetKey {
                            a: record.dst,
                            a_rect: record.rect,
                            b: desc,
                            b_rect: *rect,
                        },
                    )
                    .is_valid
            })
    }

    /// Performs a local-to-local move on the GPU.
    ///
    /// Only handled when the source rectangle is valid in a target with `transfer`'s source
    /// layout and the destination lies inside a target with its destination layout, both in
    /// the same format. Returns `false` when the move has to be done in memory instead.
    #[allow(clippy::too_many_arguments)]
    pub fn move_rect(
        &mut self,
        mem: &LocalMemory,
        transfer: &TransferDesc,
        sx: i32,
        sy: i32,
        dx: i32,
        dy: i32,
        w: i32,
        h: i32,
    ) -> Result<bool> {
        let (src_desc, dst_desc) = (transfer.src(), transfer.dst());
        if src_desc.psm != dst_desc.psm || w <= 0 || h <= 0 {
            return Ok(false);
        }
        let src_rect = Rect::new(sx, sy, sx + w, sy + h);
        let dst_rect = Rect::new(dx, dy, dx + w, dy + h);

        let find = |desc: &SurfaceDesc| {
            self.targets
                .iter()
                .find(|(_, t)| t.desc() == desc)
                .map(|(handle, _)| handle)
        };
        let (Some(src), Some(dst)) = (find(&src_desc), find(&dst_desc)) else {
            return Ok(false);
        };

        self.flush_target(mem, src, false)?;
        if dst != src {
            self.flush_target(mem, dst, false)?;
        }
        let (Some(s), Some(d)) = (self.targets.get(src), self.targets.get(dst)) else {
            return Ok(false);
        };
        if !s.valid().contains(&src_rect) || !d.extent().contains(&dst_rect) {
            return Ok(false);
        }
        let (src_tex, src_scale, bits) = (s.texture(), s.base.scale(), s.valid_bits());
        let (dst_tex, dst_scale) = (d.texture(), d.base.scale());
        let mask = dst_desc.psm.channels();

        if src == dst {
            // Source and destination may overlap; bounce through a scratch texture.
            let scaled = src_rect.scale(src_scale);
            let scratch_rect = Rect::from_size(scaled.width(), scaled.height());
            let scratch = self.backend.create_texture(&TextureDesc::new(
                TextureKind::RenderTarget,
                scaled.width() as u32,
                scaled.height() as u32,
            ))?;
            let copied = self
                .backend
                .stretch_rect(src_tex, &scaled, scratch, &scratch_rect, ChannelMask::RGBA)
                .and_then(|()| {
                    self.backend.stretch_rect(
                        scratch,
                        &scratch_rect,
                        dst_tex,
                        &dst_rect.scale(dst_scale),
                        mask,
                    )
                });
            self.backend.destroy_texture(scratch);
            copied?;
        } else {
            self.backend.stretch_rect(
                src_tex,
                &src_rect.scale(src_scale),
                dst_tex,
                &dst_rect.scale(dst_scale),
                mask,
            )?;
        }

        if let Some(d) = self.targets.get_mut(dst) {
            d.update_drawn(&dst_rect);
            d.update_valid_bits(bits);
            d.dirty.discard_covered(&dst_rect, mask);
        }
        debug!(?src, ?dst, ?src_rect, ?dst_rect, "moved rect on the GPU");
        self.invalidate_written(&dst_desc, &dst_rect, false, Some(dst));
        Ok(true)
    }

    /// Shared write handling. `writer` is the target that now holds the written bytes; it and
    /// the sources sampling it directly are left alone.
    fn invalidate_written(
        &mut self,
        desc: &SurfaceDesc,
        rect: &Rect,
        is_ee_write: bool,
        writer: Option<TargetHandle>,
    ) {
        if rect.is_empty() {
            return;
        }
        let range = self.mapper.block_range(desc, rect);
        self.destroy_written_sources(desc, &range, writer);

        let overlapping: Vec<TargetHandle> = self
            .targets
            .iter()
            .filter(|(h, t)| {
                Some(*h) != writer
                    && t.base.overlaps(&range)
                    && has_shared_bits(t.desc().psm, desc.psm)
            })
            .map(|(h, _)| h)
            .collect();

        for handle in overlapping {
            let Some(target) = self.targets.get(handle) else {
                continue;
            };
            let tdesc = *target.desc();
            let translated = if tdesc.bp == desc.bp
                && tdesc.bw == desc.bw
                && has_compatible_bits(tdesc.psm, desc.psm)
            {
                rect.intersect(&target.extent())
            } else {
                let extent = target.extent();
                let offset = self.offsets.get_or_compute(
                    &self.mapper,
                    &SurfaceOffsetKey {
                        a: *desc,
                        a_rect: *rect,
                        b: tdesc,
                        b_rect: extent,
                    },
                );
                if !offset.is_valid {
                    continue;
                }
                offset.b_rect
            };
            if translated.is_empty() {
                continue;
            }

            if is_ee_write {
                if let Some(target) = self.targets.get_mut(handle) {
                    target.dirty.push(DirtyRect {
                        rect: translated,
                        channels: desc.psm.channels() & tdesc.psm.channels(),
                    });
                    trace!(?handle, rect = ?translated, "queued host write");
                }
                continue;
            }

            let Some(target) = self.targets.get_mut(handle) else {
                continue;
            };
            let valid = target.valid();
            let remaining = valid.subtract(&translated);
            if valid.is_empty() || remaining.is_empty() {
                self.evict_target(handle);
                continue;
            }
            if remaining != valid {
                trace!(?handle, ?valid, ?remaining, "shrunk target validity");
                target.resize_validity(&remaining);
            }
            target.dirty.discard_covered(&translated, ChannelMask::RGBA);
        }

        if is_ee_write {
            self.transfers.record(self.draw, *desc, *rect);
        }
    }

    /// Destroys sources holding bytes of `range` written in `desc`'s format, except those
    /// sampling `writer` directly.
    fn destroy_written_sources(
        &mut self,
        desc: &SurfaceDesc,
        range: &BlockRange,
        writer: Option<TargetHandle>,
    ) {
        let stale: Vec<SourceHandle> = self
            .sources
            .in_range(range)
            .into_iter()
            .filter(|&h| {
                self.sources.get(h).is_some_and(|s| {
                    let writer_shared = match s.texture() {
                        SourceTexture::Target {
                            target,
                            shared: true,
                            ..
                        } => Some(*target) == writer,
                        _ => false,
                    };
                    !writer_shared
                        && s.overlaps(range)
                        && has_shared_bits(s.tex0().psm, desc.psm)
                })
            })
            .collect();
        for handle in stale {
            self.destroy_source(handle);
        }
    }
}
