//! User-level page-fault handling.
//!
//! The handler resolves exactly one fault shape: a write to a page marked
//! copy-on-write in the faulting environment's own table. Everything else is
//! an error, which fault delivery treats as fatal.

use crate::env::FaultUpcall;
use crate::kern::{FaultCause, FaultError, FaultInfo, SysError};
use crate::memory::layout::{PAGE_SIZE, PFTEMP, UXSTACK_PAGE};
use crate::memory::{PagePerms, VirtualAddress};

use super::UserEnv;

/// Register `handler` as the calling environment's fault upcall. The first
/// registration also provisions the exception stack the upcall runs on.
pub fn set_pgfault_handler(u: &UserEnv<'_>, handler: FaultUpcall) -> Result<(), SysError> {
    let envid = u.sys_getenvid();
    if !u.kernel().pgfault_upcall_registered(envid) {
        u.sys_page_alloc(
            envid,
            VirtualAddress::new(UXSTACK_PAGE),
            PagePerms::PRESENT | PagePerms::USER | PagePerms::WRITABLE,
        )?;
    }
    u.sys_env_set_pgfault_upcall(envid, handler)
}

/// Copy-on-write fault handler.
///
/// Checks that the access was (1) a write and (2) to a copy-on-write page;
/// both checks failing means the fault is a genuine bug and must not be
/// papered over. Resolution stages a fresh frame at the scratch slot, copies
/// the page, then swaps the private copy in place of the shared mapping.
pub fn pgfault(u: &UserEnv<'_>, utf: &FaultInfo) -> Result<(), FaultError> {
    if !utf.cause.contains(FaultCause::WRITE) {
        return Err(FaultError::NotWrite);
    }
    let perms = u.vpt(utf.va.page_number()).ok_or(FaultError::NotCow)?;
    if !perms.is_cow() {
        return Err(FaultError::NotCow);
    }

    let envid = u.sys_getenvid();
    let scratch = VirtualAddress::new(PFTEMP);
    let page = utf.va.page_base();
    let rw = PagePerms::PRESENT | PagePerms::USER | PagePerms::WRITABLE;

    u.sys_page_alloc(envid, scratch, rw)?;

    let mut contents = [0u8; PAGE_SIZE];
    u.read_bytes(page, &mut contents)?;
    u.write_bytes(scratch, &contents)?;

    u.sys_page_unmap(envid, page)?;
    u.sys_page_map(envid, scratch, envid, page, rw)?;
    u.sys_page_unmap(envid, scratch)?;
    Ok(())
}
