//! User-level fork with copy-on-write.

use crate::env::{EnvId, EnvStatus};
use crate::kern::SysError;
use crate::memory::layout::{PAGE_SIZE, PTSIZE, UTEXT, UXSTACK_PAGE};
use crate::memory::{PagePerms, VirtualAddress};

use super::pgfault::{pgfault, set_pgfault_handler};
use super::UserEnv;

/// Map our virtual page `pn` into `child` at the same address. A writable or
/// already-COW page is shared copy-on-write; read-only pages are shared
/// as-is. Precondition: `pn` is present and user-accessible in the caller.
fn duppage(u: &UserEnv<'_>, child: EnvId, pn: usize) -> Result<(), SysError> {
    let envid = u.sys_getenvid();
    let va = VirtualAddress::from_page_number(pn);
    let mut perms = u.vpt(pn).ok_or(SysError::Inval)?;
    if perms.intersects(PagePerms::WRITABLE | PagePerms::COW) {
        perms = perms.cow_downgrade();
    }
    let perms = perms.syscall_subset();

    u.sys_page_map(envid, va, child, va, perms)?;
    // Remap in our own space with the same bits: a plain-writable page must
    // lose its write bit here too, or we would keep writing the frame the
    // child now shares.
    u.sys_page_map(envid, va, envid, va, perms)?;
    Ok(())
}

/// Create a copy-on-write duplicate of the calling environment.
///
/// Returns the child's id to the parent and [`EnvId::NULL`] to the child on
/// its first run. The fault handler is registered in the caller before
/// anything else so a fault taken during fork itself is already resolvable.
/// The child is not marked runnable until every page has been processed and
/// its upcall installed.
pub fn fork(u: &mut UserEnv<'_>) -> Result<EnvId, SysError> {
    set_pgfault_handler(u, pgfault)?;

    let child = u.sys_exofork()?;
    if child.is_null() {
        // First run of the child: resynchronize the cached self identity
        // and bail out; the parent does the rest.
        u.rebind_self();
        return Ok(EnvId::NULL);
    }

    let mut addr = UTEXT;
    while addr < UXSTACK_PAGE {
        let va = VirtualAddress::new(addr);
        if !u.vpd(va.pdx()) {
            addr = (va.pdx() + 1) * PTSIZE;
            continue;
        }
        if let Some(perms) = u.vpt(va.page_number()) {
            if perms.contains(PagePerms::PRESENT | PagePerms::USER) {
                duppage(u, child, va.page_number())?;
            }
        }
        addr += PAGE_SIZE;
    }

    // The exception stack is the one page that is never shared: the fault
    // handler must not be able to fault while running on it.
    u.sys_page_alloc(
        child,
        VirtualAddress::new(UXSTACK_PAGE),
        PagePerms::PRESENT | PagePerms::USER | PagePerms::WRITABLE,
    )?;
    u.sys_env_set_pgfault_upcall(child, pgfault)?;
    u.sys_env_set_status(child, EnvStatus::Runnable)?;

    log::debug!("{} forked {}", u.id(), child);
    Ok(child)
}
