use gs_mem::{ChannelMask, Rect};

/// A host write to local memory that has not reached a target's texture yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRect {
    /// Written area in the target's unscaled coordinates.
    pub rect: Rect,
    /// Channels the write touched.
    pub channels: ChannelMask,
}

/// Pending writes in the order they happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyRectList {
    entries: Vec<DirtyRect>,
}

impl DirtyRectList {
    pub fn push(&mut self, entry: DirtyRect) {
        if !entry.rect.is_empty() && !entry.channels.is_empty() {
            self.entries.push(entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirtyRect> {
        self.entries.iter()
    }

    pub fn bounding_rect(&self) -> Rect {
        self.entries
            .iter()
            .fold(Rect::EMPTY, |acc, e| acc.union(&e.rect))
    }

    pub fn intersects(&self, rect: &Rect) -> bool {
        self.entries.iter().any(|e| e.rect.intersects(rect))
    }

    /// Drops writes fully replaced by a draw to `rect` covering `channels`.
    pub fn discard_covered(&mut self, rect: &Rect, channels: ChannelMask) {
        self.entries
            .retain(|e| !(rect.contains(&e.rect) && channels.contains(e.channels)));
    }

    pub(crate) fn take(&mut self) -> Vec<DirtyRect> {
        std::mem::take(&mut self.entries)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rect: Rect, channels: ChannelMask) -> DirtyRect {
        DirtyRect { rect, channels }
    }

    #[test]
    fn keeps_insertion_order_and_bounds() {
        let mut list = DirtyRectList::default();
        list.push(entry(Rect::new(0, 0, 8, 8), ChannelMask::RGBA));
        list.push(entry(Rect::new(4, 4, 16, 12), ChannelMask::A));
        list.push(entry(Rect::EMPTY, ChannelMask::RGBA));

        assert_eq!(list.len(), 2);
        assert_eq!(list.iter().next().map(|e| e.rect), Some(Rect::new(0, 0, 8, 8)));
        assert_eq!(list.bounding_rect(), Rect::new(0, 0, 16, 12));
        assert!(list.intersects(&Rect::new(15, 11, 20, 20)));
    }

    #[test]
    fn draws_discard_only_covered_writes() {
        let mut list = DirtyRectList::default();
        list.push(entry(Rect::new(0, 0, 8, 8), ChannelMask::RGB));
        list.push(entry(Rect::new(0, 0, 32, 32), ChannelMask::RGB));
        list.push(entry(Rect::new(0, 0, 8, 8), ChannelMask::RGBA));
        list.discard_covered(&Rect::from_size(16, 16), ChannelMask::RGB);
        assert_eq!(list.len(), 2);
    }
}
