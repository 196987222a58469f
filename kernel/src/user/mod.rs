//! User-mode view of one environment.
//!
//! [`UserEnv`] is the handle user code runs against: syscall wrappers that
//! carry the caller's identity, read-only views of its own permission table
//! (the `vpd`/`vpt` windows), and checked memory access that goes through
//! fault delivery.

pub mod fork;
pub mod pgfault;

pub use fork::fork;
pub use pgfault::{pgfault, set_pgfault_handler};

use crate::env::{EnvId, EnvStatus, FaultUpcall};
use crate::kern::{FaultError, Kernel, SysError};
use crate::memory::{PagePerms, VirtualAddress};

pub struct UserEnv<'k> {
    kern: &'k Kernel,
    env: EnvId,
}

impl<'k> UserEnv<'k> {
    /// Enter user mode as `env`.
    pub fn enter(kern: &'k Kernel, env: EnvId) -> Self {
        Self { kern, env }
    }

    pub fn kernel(&self) -> &'k Kernel {
        self.kern
    }

    pub fn id(&self) -> EnvId {
        self.env
    }

    /// Refresh the cached self identity from the kernel.
    pub(crate) fn rebind_self(&mut self) {
        self.env = self.kern.sys_getenvid(self.env);
    }

    // Syscall wrappers.

    pub fn sys_getenvid(&self) -> EnvId {
        self.kern.sys_getenvid(self.env)
    }

    pub fn sys_exofork(&self) -> Result<EnvId, SysError> {
        self.kern.sys_exofork(self.env)
    }

    pub fn sys_page_alloc(
        &self,
        env: EnvId,
        va: VirtualAddress,
        perms: PagePerms,
    ) -> Result<(), SysError> {
        self.kern.sys_page_alloc(self.env, env, va, perms)
    }

    pub fn sys_page_map(
        &self,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perms: PagePerms,
    ) -> Result<(), SysError> {
        self.kern
            .sys_page_map(self.env, src_env, src_va, dst_env, dst_va, perms)
    }

    pub fn sys_page_unmap(&self, env: EnvId, va: VirtualAddress) -> Result<(), SysError> {
        self.kern.sys_page_unmap(self.env, env, va)
    }

    pub fn sys_env_set_pgfault_upcall(
        &self,
        env: EnvId,
        upcall: FaultUpcall,
    ) -> Result<(), SysError> {
        self.kern.sys_env_set_pgfault_upcall(self.env, env, upcall)
    }

    pub fn sys_env_set_status(&self, env: EnvId, status: EnvStatus) -> Result<(), SysError> {
        self.kern.sys_env_set_status(self.env, env, status)
    }

    pub fn sys_env_destroy(&self, env: EnvId) -> Result<(), SysError> {
        self.kern.sys_env_destroy(self.env, env)
    }

    // Read-only mapping windows over this environment's own tables.

    /// Permission word of page `pn`, if mapped.
    pub fn vpt(&self, pn: usize) -> Option<PagePerms> {
        self.kern.user_vpt(self.env, pn)
    }

    /// Whether the directory entry covering `pdx` is present.
    pub fn vpd(&self, pdx: usize) -> bool {
        self.kern.user_vpd(self.env, pdx)
    }

    // Memory access.

    pub fn read_bytes(&self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), FaultError> {
        self.kern.user_read(self.env, va, buf)
    }

    pub fn write_bytes(&self, va: VirtualAddress, data: &[u8]) -> Result<(), FaultError> {
        self.kern.user_write(self.env, va, data)
    }
}
