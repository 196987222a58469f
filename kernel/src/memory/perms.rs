//! Page permission bits.
//!
//! A strongly-typed view of the per-page permission word. Only the
//! [`PagePerms::SYSCALL`] subset may cross the privilege boundary; everything
//! else is kernel-private and must be masked off first.

use bitflags::bitflags;

bitflags! {
    /// Permission word attached to one page-table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PagePerms: u32 {
        const PRESENT  = 0x001;
        const WRITABLE = 0x002;
        const USER     = 0x004;
        const ACCESSED = 0x020;
        const DIRTY    = 0x040;
        /// Bits left free for user-space bookkeeping.
        const AVAIL    = 0xe00;
        /// Copy-on-write marker, one of the `AVAIL` bits.
        const COW      = 0x800;

        /// The only bits a syscall argument may carry.
        const SYSCALL = Self::PRESENT.bits()
            | Self::WRITABLE.bits()
            | Self::USER.bits()
            | Self::AVAIL.bits();
    }
}

impl PagePerms {
    /// Drop everything outside the syscall-exposable subset.
    pub fn syscall_subset(self) -> Self {
        self & Self::SYSCALL
    }

    /// Sharing downgrade: mark copy-on-write, revoke the write bit.
    pub fn cow_downgrade(self) -> Self {
        (self | Self::COW) - Self::WRITABLE
    }

    pub fn is_present(self) -> bool {
        self.contains(Self::PRESENT)
    }

    pub fn is_user(self) -> bool {
        self.contains(Self::USER)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    pub fn is_cow(self) -> bool {
        self.contains(Self::COW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_never_leaves_both_bits() {
        let plain = PagePerms::PRESENT | PagePerms::USER | PagePerms::WRITABLE;
        let down = plain.cow_downgrade();
        assert!(down.is_cow());
        assert!(!down.is_writable());

        // Downgrading an already-COW page is a no-op.
        assert_eq!(down.cow_downgrade(), down);
    }

    #[test]
    fn syscall_mask_strips_kernel_bits() {
        let dirty = PagePerms::PRESENT
            | PagePerms::USER
            | PagePerms::ACCESSED
            | PagePerms::DIRTY
            | PagePerms::COW;
        let masked = dirty.syscall_subset();
        assert!(masked.is_present() && masked.is_user() && masked.is_cow());
        assert!(!masked.intersects(PagePerms::ACCESSED | PagePerms::DIRTY));
    }
}
