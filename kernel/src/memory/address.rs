//! Virtual address newtype and page arithmetic.

use super::layout::{PAGE_SHIFT, PAGE_SIZE, PTSIZE};

/// A virtual address inside one environment's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Build the address of the first byte of page `pn`.
    pub const fn from_page_number(pn: usize) -> Self {
        Self(pn << PAGE_SHIFT)
    }

    pub const fn value(&self) -> usize {
        self.0
    }

    /// Round down to the containing page boundary.
    pub const fn page_base(&self) -> Self {
        Self(self.0 & !(PAGE_SIZE - 1))
    }

    pub const fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    pub const fn page_number(&self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Page-directory index (top level of the two-level table).
    pub const fn pdx(&self) -> usize {
        self.0 / PTSIZE
    }

    /// Page-table index within the directory entry.
    pub const fn ptx(&self) -> usize {
        (self.0 % PTSIZE) >> PAGE_SHIFT
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    pub const fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset)
    }
}

impl core::fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
