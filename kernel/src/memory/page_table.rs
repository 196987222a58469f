//! Two-level per-environment page tables.
//!
//! An [`AddressSpace`] is an ordered map from page number to
//! (frame, permission word), kept as directory-index → table-index levels so
//! callers can skip whole absent directories while walking. A page is mapped
//! iff an entry exists and carries `PRESENT`.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::address::VirtualAddress;
use super::perms::PagePerms;
use super::physical::FrameId;

/// One mapping: which frame backs the page and with which permissions.
#[derive(Debug, Clone, Copy)]
pub struct PageTableEntry {
    pub frame: FrameId,
    pub perms: PagePerms,
}

/// Ordered two-level mapping for one environment.
pub struct AddressSpace {
    tables: BTreeMap<usize, BTreeMap<usize, PageTableEntry>>,
}

impl AddressSpace {
    pub const fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, va: VirtualAddress) -> Option<&PageTableEntry> {
        self.tables.get(&va.pdx()).and_then(|t| t.get(&va.ptx()))
    }

    /// Install a mapping, returning the entry it replaced (if any) so the
    /// caller can release the old frame reference.
    pub fn insert(&mut self, va: VirtualAddress, entry: PageTableEntry) -> Option<PageTableEntry> {
        self.tables
            .entry(va.pdx())
            .or_insert_with(BTreeMap::new)
            .insert(va.ptx(), entry)
    }

    /// Remove a mapping, returning it so the caller can release the frame
    /// reference. Absent mappings are a silent no-op.
    pub fn remove(&mut self, va: VirtualAddress) -> Option<PageTableEntry> {
        let table = self.tables.get_mut(&va.pdx())?;
        let old = table.remove(&va.ptx());
        if table.is_empty() {
            self.tables.remove(&va.pdx());
        }
        old
    }

    /// Whether the directory entry for `pdx` is present at all.
    pub fn dir_present(&self, pdx: usize) -> bool {
        self.tables.contains_key(&pdx)
    }

    /// Tear down every mapping, handing back the entries for frame release.
    pub fn take_all(&mut self) -> Vec<PageTableEntry> {
        let tables = core::mem::take(&mut self.tables);
        tables
            .into_values()
            .flat_map(|t| t.into_values())
            .collect()
    }

    /// Mapped pages in ascending virtual-address order.
    pub fn iter(&self) -> impl Iterator<Item = (VirtualAddress, &PageTableEntry)> {
        self.tables.iter().flat_map(|(&pdx, table)| {
            table.iter().map(move |(&ptx, entry)| {
                let pn = pdx * super::layout::NPTENTRIES + ptx;
                (VirtualAddress::from_page_number(pn), entry)
            })
        })
    }

    pub fn mapped_pages(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::layout::{PAGE_SIZE, PTSIZE, UTEXT};

    fn entry() -> PageTableEntry {
        PageTableEntry {
            frame: FrameId::new(0),
            perms: PagePerms::PRESENT | PagePerms::USER,
        }
    }

    #[test]
    fn insert_lookup_remove() {
        let mut aspace = AddressSpace::new();
        let va = VirtualAddress::new(UTEXT);
        assert!(aspace.insert(va, entry()).is_none());
        assert!(aspace.lookup(va).is_some());
        assert!(aspace.dir_present(va.pdx()));

        assert!(aspace.remove(va).is_some());
        assert!(aspace.lookup(va).is_none());
        // Emptied table drops its directory entry too.
        assert!(!aspace.dir_present(va.pdx()));
        assert!(aspace.remove(va).is_none());
    }

    #[test]
    fn iteration_is_address_ordered() {
        let mut aspace = AddressSpace::new();
        let high = VirtualAddress::new(UTEXT + PTSIZE);
        let low = VirtualAddress::new(UTEXT + PAGE_SIZE);
        aspace.insert(high, entry());
        aspace.insert(low, entry());

        let order: alloc::vec::Vec<_> = aspace.iter().map(|(va, _)| va).collect();
        assert_eq!(order, alloc::vec![low, high]);
        assert_eq!(aspace.mapped_pages(), 2);
    }
}
