//! Physical frame arena with reference counting.
//!
//! Frames are the unit of duplication: a frame may be referenced by several
//! address-space entries at once (shared read-only/COW) or by exactly one
//! (privately owned). The arena tracks one reference count per frame and
//! recycles the slot when the count drops to zero, so a frame is never freed
//! while any address space still maps it.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::layout::PAGE_SIZE;
use super::{MemoryError, MemoryResult};

/// Stable handle to one allocated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    pub(crate) const fn new(idx: usize) -> Self {
        Self(idx)
    }
}

struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    refs: usize,
}

/// Fixed-capacity allocator for page-sized frames.
pub struct FrameArena {
    slots: Vec<Option<Frame>>,
    free: Vec<usize>,
    capacity: usize,
}

impl FrameArena {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        // Hand out low slot numbers first.
        let free = (0..capacity).rev().collect();
        Self {
            slots,
            free,
            capacity,
        }
    }

    /// Allocate a zero-filled frame with an initial reference count of one.
    pub fn alloc(&mut self) -> MemoryResult<FrameId> {
        let idx = self.free.pop().ok_or(MemoryError::OutOfMemory)?;
        self.slots[idx] = Some(Frame {
            data: Box::new([0u8; PAGE_SIZE]),
            refs: 1,
        });
        Ok(FrameId(idx))
    }

    /// Account for one more mapping of `id`.
    pub fn incref(&mut self, id: FrameId) -> MemoryResult<()> {
        let frame = self.frame_mut(id)?;
        frame.refs += 1;
        Ok(())
    }

    /// Drop one mapping of `id`; frees the frame when the last one goes.
    /// Returns true if the frame was freed.
    pub fn decref(&mut self, id: FrameId) -> MemoryResult<bool> {
        let frame = self.frame_mut(id)?;
        frame.refs -= 1;
        if frame.refs == 0 {
            self.slots[id.0] = None;
            self.free.push(id.0);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn refs(&self, id: FrameId) -> MemoryResult<usize> {
        self.frame(id).map(|f| f.refs)
    }

    pub fn data(&self, id: FrameId) -> MemoryResult<&[u8; PAGE_SIZE]> {
        self.frame(id).map(|f| &*f.data)
    }

    pub fn data_mut(&mut self, id: FrameId) -> MemoryResult<&mut [u8; PAGE_SIZE]> {
        self.frame_mut(id).map(|f| &mut *f.data)
    }

    /// Number of live frames.
    pub fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }

    fn frame(&self, id: FrameId) -> MemoryResult<&Frame> {
        self.slots
            .get(id.0)
            .and_then(|s| s.as_ref())
            .ok_or(MemoryError::InvalidAddress)
    }

    fn frame_mut(&mut self, id: FrameId) -> MemoryResult<&mut Frame> {
        self.slots
            .get_mut(id.0)
            .and_then(|s| s.as_mut())
            .ok_or(MemoryError::InvalidAddress)
    }
}
