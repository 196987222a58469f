//! Kernel primitives.
//!
//! The fixed call interface user code runs against. Every call validates its
//! arguments the same way: virtual addresses must be page-aligned and below
//! `USER_TOP`, permission words must carry `PRESENT|USER` and stay inside the
//! syscall-exposable subset, and a caller may only address itself or its
//! immediate children.

use crate::env::{EnvId, EnvStatus, FaultUpcall};
use crate::memory::layout::USER_TOP;
use crate::memory::{PagePerms, PageTableEntry, VirtualAddress};

use super::Kernel;

/// Primitive failure, the negative-errno analog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// Target environment doesn't exist or the caller may not address it.
    BadEnv,
    /// Malformed argument: address, permission bits, or status.
    Inval,
    /// Frame arena exhausted.
    NoMem,
    /// Environment table exhausted.
    NoFreeEnv,
}

impl core::fmt::Display for SysError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            SysError::BadEnv => write!(f, "bad environment"),
            SysError::Inval => write!(f, "invalid argument"),
            SysError::NoMem => write!(f, "out of memory"),
            SysError::NoFreeEnv => write!(f, "no free environment"),
        }
    }
}

fn check_user_va(va: VirtualAddress) -> Result<(), SysError> {
    if va.value() >= USER_TOP || !va.is_page_aligned() {
        return Err(SysError::Inval);
    }
    Ok(())
}

fn check_map_perms(perms: PagePerms) -> Result<(), SysError> {
    if !perms.contains(PagePerms::PRESENT | PagePerms::USER) {
        return Err(SysError::Inval);
    }
    if perms.syscall_subset() != perms {
        return Err(SysError::Inval);
    }
    Ok(())
}

impl Kernel {
    /// The caller's own identity. Always succeeds.
    pub fn sys_getenvid(&self, caller: EnvId) -> EnvId {
        caller
    }

    /// Create a suspended child with an empty address space. The child
    /// inherits the caller's priority and will observe [`EnvId::NULL`] as
    /// this call's result on its own first run.
    pub fn sys_exofork(&self, caller: EnvId) -> Result<EnvId, SysError> {
        let mut envs = self.envs.lock();
        let priority;
        {
            let cur = envs.get_mut(caller).ok_or(SysError::BadEnv)?;
            if let Some(ret) = cur.first_run_ret.take() {
                // The caller is itself a fresh child replaying its first
                // slice: hand back the recorded result instead of forking.
                return Ok(ret);
            }
            priority = cur.priority;
        }
        let child = envs.alloc(caller, priority).ok_or(SysError::NoFreeEnv)?;
        child.first_run_ret = Some(EnvId::NULL);
        let id = child.id;
        log::debug!("{} exofork -> {}", caller, id);
        Ok(id)
    }

    /// Bind a fresh zero-filled frame at `va` in `env`.
    pub fn sys_page_alloc(
        &self,
        caller: EnvId,
        env: EnvId,
        va: VirtualAddress,
        perms: PagePerms,
    ) -> Result<(), SysError> {
        check_user_va(va)?;
        check_map_perms(perms)?;
        let mut envs = self.envs.lock();
        let target = envs
            .resolve_checked_mut(caller, env)
            .ok_or(SysError::BadEnv)?;
        let mut frames = self.frames.lock();
        let frame = frames.alloc().map_err(|_| SysError::NoMem)?;
        let old = target.aspace.insert(va, PageTableEntry { frame, perms });
        if let Some(old) = old {
            let _ = frames.decref(old.frame);
        }
        log::trace!("{} page_alloc {} va {}", caller, target.id, va);
        Ok(())
    }

    /// Share the frame behind `src_va` in `src_env` at `dst_va` in
    /// `dst_env` with the given permissions. Mapping a read-only page
    /// writable is refused.
    pub fn sys_page_map(
        &self,
        caller: EnvId,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perms: PagePerms,
    ) -> Result<(), SysError> {
        check_user_va(src_va)?;
        check_user_va(dst_va)?;
        check_map_perms(perms)?;
        let mut envs = self.envs.lock();
        let entry = {
            let src = envs
                .resolve_checked(caller, src_env)
                .ok_or(SysError::BadEnv)?;
            *src.aspace.lookup(src_va).ok_or(SysError::Inval)?
        };
        if perms.is_writable() && !entry.perms.is_writable() {
            return Err(SysError::Inval);
        }
        let dst = envs
            .resolve_checked_mut(caller, dst_env)
            .ok_or(SysError::BadEnv)?;
        let mut frames = self.frames.lock();
        frames.incref(entry.frame).map_err(|_| SysError::Inval)?;
        let old = dst.aspace.insert(
            dst_va,
            PageTableEntry {
                frame: entry.frame,
                perms,
            },
        );
        if let Some(old) = old {
            let _ = frames.decref(old.frame);
        }
        log::trace!(
            "{} page_map {} va {} -> {} va {}",
            caller,
            src_env,
            src_va,
            dst_env,
            dst_va
        );
        Ok(())
    }

    /// Remove the mapping at `va` in `env`; the frame is freed once its last
    /// mapping goes. Unmapping an absent page is a silent success.
    pub fn sys_page_unmap(
        &self,
        caller: EnvId,
        env: EnvId,
        va: VirtualAddress,
    ) -> Result<(), SysError> {
        check_user_va(va)?;
        let mut envs = self.envs.lock();
        let target = envs
            .resolve_checked_mut(caller, env)
            .ok_or(SysError::BadEnv)?;
        if let Some(old) = target.aspace.remove(va) {
            let _ = self.frames.lock().decref(old.frame);
        }
        Ok(())
    }

    /// Register `env`'s page-fault upcall.
    pub fn sys_env_set_pgfault_upcall(
        &self,
        caller: EnvId,
        env: EnvId,
        upcall: FaultUpcall,
    ) -> Result<(), SysError> {
        let mut envs = self.envs.lock();
        let target = envs
            .resolve_checked_mut(caller, env)
            .ok_or(SysError::BadEnv)?;
        target.upcall = Some(upcall);
        Ok(())
    }

    /// Transition `env` between runnable and not-runnable.
    pub fn sys_env_set_status(
        &self,
        caller: EnvId,
        env: EnvId,
        status: EnvStatus,
    ) -> Result<(), SysError> {
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(SysError::Inval);
        }
        let mut envs = self.envs.lock();
        let target = envs
            .resolve_checked_mut(caller, env)
            .ok_or(SysError::BadEnv)?;
        target.status = status;
        log::trace!("{} set_status {} {:?}", caller, target.id, status);
        Ok(())
    }

    /// Destroy `env` (possibly the caller itself), releasing every frame it
    /// maps.
    pub fn sys_env_destroy(&self, caller: EnvId, env: EnvId) -> Result<(), SysError> {
        let id = {
            let envs = self.envs.lock();
            envs.resolve_checked(caller, env).ok_or(SysError::BadEnv)?.id
        };
        if id == caller {
            log::info!("{} exiting gracefully", caller);
        } else {
            log::info!("{} destroying {}", caller, id);
        }
        self.destroy(id);
        Ok(())
    }

    /// Read-only view of one entry in `env`'s own permission table.
    pub fn user_vpt(&self, env: EnvId, pn: usize) -> Option<PagePerms> {
        let envs = self.envs.lock();
        let e = envs.get(env)?;
        e.aspace
            .lookup(VirtualAddress::from_page_number(pn))
            .map(|pte| pte.perms)
    }

    /// Read-only view of one directory entry in `env`'s own table.
    pub fn user_vpd(&self, env: EnvId, pdx: usize) -> bool {
        self.envs
            .lock()
            .get(env)
            .map(|e| e.aspace.dir_present(pdx))
            .unwrap_or(false)
    }
}
