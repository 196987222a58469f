//! # ufork — user-space copy-on-write fork
//!
//! A process ("environment") duplicates itself without kernel-side process
//! duplication: `fork` creates a suspended child, walks the caller's address
//! space sharing every page copy-on-write, gives the child a private
//! exception stack and a page-fault upcall, then marks it runnable. From
//! there the fault handler turns each first write to a shared page into a
//! private copy, independently in parent and child.
//!
//! The privileged side ([`kern`]) is a simulated machine: physical frames
//! are refcounted arena slots holding page-sized buffers, address spaces are
//! ordered two-level tables over them, and fault delivery is a synchronous
//! typed callback. User code ([`user`]) only ever talks to it through the
//! fixed primitive set.

#![no_std]

extern crate alloc;

pub mod env;
pub mod kern;
pub mod logger;
pub mod memory;
pub mod user;

// Re-exports
pub use env::{EnvId, EnvStatus, FaultUpcall};
pub use kern::{FaultCause, FaultError, FaultInfo, Kernel, KernelConfig, SysError};
pub use memory::{layout, PagePerms, VirtualAddress};
pub use user::{fork, pgfault, set_pgfault_handler, UserEnv};
