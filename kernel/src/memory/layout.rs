//! User virtual-memory layout.
//!
//! Fixed addresses carving up an environment's address space: the program
//! image starts at [`UTEXT`], the scratch slot for staging page copies sits
//! at [`PFTEMP`], and the exception stack occupies the single page below
//! [`UXSTACK_TOP`]. Nothing above [`USER_TOP`] is addressable by user code.

/// Bytes per page.
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

/// Entries per page table; one directory entry spans [`PTSIZE`] bytes.
pub const NPTENTRIES: usize = 1024;
pub const PTSIZE: usize = NPTENTRIES * PAGE_SIZE;

/// Bottom of the temporary-mapping region.
pub const UTEMP: usize = 0x0040_0000;

/// Scratch slot for staging a private page copy, the last page of the
/// temporary region.
pub const PFTEMP: usize = UTEMP + PTSIZE - PAGE_SIZE;

/// Where the program image begins; the address-space walk starts here.
pub const UTEXT: usize = 0x0080_0000;

/// Top of the exception stack.
pub const UXSTACK_TOP: usize = 0xeec0_0000;

/// The one page of exception stack, never shared between environments.
pub const UXSTACK_PAGE: usize = UXSTACK_TOP - PAGE_SIZE;

/// First address user code cannot touch.
pub const USER_TOP: usize = UXSTACK_TOP;
