use std::collections::VecDeque;

use gs_mem::{Rect, SurfaceDesc};

/// A host write observed during draw `draw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRecord {
    pub draw: u64,
    pub dst: SurfaceDesc,
    pub rect: Rect,
}

/// Recent host-to-local transfers, bounded both by draw window and entry count.
#[derive(Debug)]
pub struct TransferLog {
    records: VecDeque<TransferRecord>,
    capacity: usize,
    window: u64,
}

impl TransferLog {
    pub fn new(capacity: usize, window: u64) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            window,
        }
    }

    pub fn record(&mut self, draw: u64, dst: SurfaceDesc, rect: Rect) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(TransferRecord { draw, dst, rect });
    }

    pub fn contains(&self, draw: u64, dst: &SurfaceDesc, rect: &Rect) -> bool {
        self.records
            .iter()
            .rev()
            .take_while(|r| r.draw >= draw)
            .any(|r| r.draw == draw && r.dst == *dst && r.rect == *rect)
    }

    /// Drops records more than `window` draws older than `current_draw`.
    pub fn prune(&mut self, current_draw: u64) {
        let oldest = current_draw.saturating_sub(self.window);
        while self.records.front().is_some_and(|r| r.draw < oldest) {
            self.records.pop_front();
        }
    }

    /// Records from draw `since` onwards, newest first.
    pub fn since(&self, since: u64) -> impl Iterator<Item = &TransferRecord> {
        self.records.iter().rev().take_while(move |r| r.draw >= since)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn set_window(&mut self, window: u64) {
        self.window = window;
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
