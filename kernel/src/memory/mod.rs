//! Memory management subsystem

pub mod address;
pub mod layout;
pub mod page_table;
pub mod perms;
pub mod physical;

// Re-exports
pub use address::VirtualAddress;
pub use page_table::{AddressSpace, PageTableEntry};
pub use perms::PagePerms;
pub use physical::{FrameArena, FrameId};

// Error type for memory operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    OutOfMemory,
    InvalidAddress,
    AlreadyMapped,
    NotMapped,
    PermissionDenied,
    AlignmentError,
}

impl core::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            MemoryError::OutOfMemory => write!(f, "Out of memory"),
            MemoryError::InvalidAddress => write!(f, "Invalid address"),
            MemoryError::AlreadyMapped => write!(f, "Already mapped"),
            MemoryError::NotMapped => write!(f, "Not mapped"),
            MemoryError::PermissionDenied => write!(f, "Permission denied"),
            MemoryError::AlignmentError => write!(f, "Alignment error"),
        }
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;
