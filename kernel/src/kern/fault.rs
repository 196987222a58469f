//! Fault delivery and user memory access.
//!
//! User reads and writes go through the kernel so permission bits are
//! enforced. A disallowed access raises a page fault against the owning
//! environment: the registered upcall is invoked with a typed fault context,
//! and the access is retried exactly once afterwards. Any failure along that
//! path (no upcall, unusable exception stack, nested fault, handler error,
//! or a retry that still misses) terminates the environment.

use bitflags::bitflags;

use crate::env::EnvId;
use crate::memory::layout::{PAGE_SIZE, UXSTACK_PAGE};
use crate::memory::{PagePerms, VirtualAddress};
use crate::user::UserEnv;

use super::syscall::SysError;
use super::Kernel;

bitflags! {
    /// Why the access faulted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCause: u32 {
        /// The page was present; the access violated its permissions.
        const PROTECTION = 0x1;
        /// The access was a write.
        const WRITE = 0x2;
        /// The access came from user mode.
        const USER = 0x4;
    }
}

/// Fault context handed to the registered upcall.
#[derive(Debug, Clone, Copy)]
pub struct FaultInfo {
    pub va: VirtualAddress,
    pub cause: FaultCause,
}

/// Why fault handling gave up. All of these are fatal to the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// The faulting access was not a write.
    NotWrite,
    /// The faulting page is not marked copy-on-write.
    NotCow,
    /// No upcall registered.
    NoUpcall,
    /// Exception stack missing or not writable.
    NoStack,
    /// A fault was raised while the upcall was already running.
    Nested,
    /// The handler returned but the retried access still missed.
    Unresolved,
    /// A primitive failed inside the handler.
    Sys(SysError),
}

impl From<SysError> for FaultError {
    fn from(err: SysError) -> Self {
        FaultError::Sys(err)
    }
}

impl core::fmt::Display for FaultError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            FaultError::NotWrite => write!(f, "fault was not a write"),
            FaultError::NotCow => write!(f, "faulting page is not copy-on-write"),
            FaultError::NoUpcall => write!(f, "no fault upcall registered"),
            FaultError::NoStack => write!(f, "exception stack unusable"),
            FaultError::Nested => write!(f, "nested fault during resolution"),
            FaultError::Unresolved => write!(f, "fault handler did not resolve the access"),
            FaultError::Sys(err) => write!(f, "primitive failed: {}", err),
        }
    }
}

impl Kernel {
    /// Deliver a fault on `va` to `env`'s upcall.
    pub(crate) fn page_fault(
        &self,
        env: EnvId,
        va: VirtualAddress,
        cause: FaultCause,
    ) -> Result<(), FaultError> {
        self.fault_stats().inc_delivered();
        let precheck = {
            let mut envs = self.envs.lock();
            match envs.get_mut(env) {
                None => Err(FaultError::Unresolved),
                Some(e) => {
                    if e.in_fault {
                        Err(FaultError::Nested)
                    } else if !xstack_usable(e) {
                        Err(FaultError::NoStack)
                    } else {
                        match e.upcall {
                            Some(upcall) => {
                                e.in_fault = true;
                                Ok(upcall)
                            }
                            None => Err(FaultError::NoUpcall),
                        }
                    }
                }
            }
        };
        let upcall = match precheck {
            Ok(upcall) => upcall,
            Err(err) => return self.fatal_fault(env, va, err),
        };

        log::debug!("{} fault va {} cause {:?}", env, va, cause);
        let info = FaultInfo { va, cause };
        let user = UserEnv::enter(self, env);
        let outcome = upcall(&user, &info);

        if let Some(e) = self.envs.lock().get_mut(env) {
            e.in_fault = false;
        }
        match outcome {
            Ok(()) => {
                self.fault_stats().inc_resolved();
                Ok(())
            }
            Err(err) => self.fatal_fault(env, va, err),
        }
    }

    fn fatal_fault(&self, env: EnvId, va: VirtualAddress, err: FaultError) -> Result<(), FaultError> {
        self.fault_stats().inc_fatal();
        log::error!("{} fatal fault at {}: {}", env, va, err);
        self.destroy(env);
        Err(err)
    }

    /// Read user memory at `va` in `env`. Mapped, user-accessible pages are
    /// always readable; anything else raises a (non-write) fault.
    pub fn user_read(
        &self,
        env: EnvId,
        va: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), FaultError> {
        let mut addr = va;
        let mut done = 0;
        while done < buf.len() {
            let off = addr.page_offset();
            let n = (PAGE_SIZE - off).min(buf.len() - done);
            let mut retried = false;
            loop {
                match self.try_read(env, addr, &mut buf[done..done + n]) {
                    Ok(()) => break,
                    Err(cause) => {
                        if retried {
                            return self.fatal_fault(env, addr, FaultError::Unresolved);
                        }
                        retried = true;
                        self.page_fault(env, addr, cause)?;
                    }
                }
            }
            done += n;
            addr = addr.page_base().add(PAGE_SIZE);
        }
        Ok(())
    }

    /// Write user memory at `va` in `env`. A write to a non-writable or
    /// absent page raises a write fault and retries once.
    pub fn user_write(&self, env: EnvId, va: VirtualAddress, data: &[u8]) -> Result<(), FaultError> {
        let mut addr = va;
        let mut done = 0;
        while done < data.len() {
            let off = addr.page_offset();
            let n = (PAGE_SIZE - off).min(data.len() - done);
            let mut retried = false;
            loop {
                match self.try_write(env, addr, &data[done..done + n]) {
                    Ok(()) => break,
                    Err(cause) => {
                        if retried {
                            return self.fatal_fault(env, addr, FaultError::Unresolved);
                        }
                        retried = true;
                        self.page_fault(env, addr, cause)?;
                    }
                }
            }
            done += n;
            addr = addr.page_base().add(PAGE_SIZE);
        }
        Ok(())
    }

    fn try_read(&self, env: EnvId, addr: VirtualAddress, buf: &mut [u8]) -> Result<(), FaultCause> {
        let required = PagePerms::PRESENT | PagePerms::USER;
        let envs = self.envs.lock();
        let entry = envs
            .get(env)
            .and_then(|e| e.aspace.lookup(addr.page_base()))
            .copied();
        match entry {
            Some(pte) if pte.perms.contains(required) => {
                let frames = self.frames.lock();
                let data = frames.data(pte.frame).map_err(|_| FaultCause::USER)?;
                let off = addr.page_offset();
                buf.copy_from_slice(&data[off..off + buf.len()]);
                Ok(())
            }
            Some(_) => Err(FaultCause::USER | FaultCause::PROTECTION),
            None => Err(FaultCause::USER),
        }
    }

    fn try_write(&self, env: EnvId, addr: VirtualAddress, data: &[u8]) -> Result<(), FaultCause> {
        let required = PagePerms::PRESENT | PagePerms::USER | PagePerms::WRITABLE;
        let write = FaultCause::USER | FaultCause::WRITE;
        let envs = self.envs.lock();
        let entry = envs
            .get(env)
            .and_then(|e| e.aspace.lookup(addr.page_base()))
            .copied();
        match entry {
            Some(pte) if pte.perms.contains(required) => {
                let mut frames = self.frames.lock();
                let page = frames.data_mut(pte.frame).map_err(|_| write)?;
                let off = addr.page_offset();
                page[off..off + data.len()].copy_from_slice(data);
                Ok(())
            }
            Some(_) => Err(write | FaultCause::PROTECTION),
            None => Err(write),
        }
    }
}

fn xstack_usable(env: &crate::env::Environment) -> bool {
    let xstack = VirtualAddress::new(UXSTACK_PAGE);
    match env.aspace.lookup(xstack) {
        Some(pte) => {
            pte.perms
                .contains(PagePerms::PRESENT | PagePerms::USER | PagePerms::WRITABLE)
        }
        None => false,
    }
}
