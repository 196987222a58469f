//! The privileged side of the machine.
//!
//! [`Kernel`] owns the environment table and the physical frame arena and
//! exposes the fixed primitive set user code is allowed to call
//! ([`syscall`]), plus fault delivery ([`fault`]). Each primitive is
//! synchronous and atomic under the interior locks; no lock is ever held
//! across a fault upcall.

pub mod fault;
pub mod syscall;

pub use fault::{FaultCause, FaultError, FaultInfo};
pub use syscall::SysError;

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::env::{EnvId, EnvStatus, EnvTable};
use crate::memory::FrameArena;

/// Machine sizing knobs.
pub struct KernelConfig {
    /// Physical frames available for user pages.
    pub nframes: usize,
    /// Environment-table capacity.
    pub nenv: usize,
}

impl KernelConfig {
    /// 4 MiB of user frames, a full environment table.
    pub fn default_config() -> Self {
        Self {
            nframes: 1024,
            nenv: crate::env::NENV,
        }
    }
}

/// Fault-delivery statistics.
#[derive(Debug)]
pub struct FaultStats {
    delivered: AtomicUsize,
    resolved: AtomicUsize,
    fatal: AtomicUsize,
}

impl FaultStats {
    pub const fn new() -> Self {
        Self {
            delivered: AtomicUsize::new(0),
            resolved: AtomicUsize::new(0),
            fatal: AtomicUsize::new(0),
        }
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resolved(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fatal(&self) {
        self.fatal.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::Relaxed)
    }

    pub fn fatal(&self) -> usize {
        self.fatal.load(Ordering::Relaxed)
    }
}

/// The simulated privileged kernel.
pub struct Kernel {
    pub(crate) envs: Mutex<EnvTable>,
    pub(crate) frames: Mutex<FrameArena>,
    stats: FaultStats,
}

impl Kernel {
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default_config())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Self {
            envs: Mutex::new(EnvTable::new(config.nenv)),
            frames: Mutex::new(FrameArena::new(config.nframes)),
            stats: FaultStats::new(),
        }
    }

    /// Create the initial environment: no parent, immediately runnable,
    /// empty address space.
    pub fn create_root_env(&self) -> Result<EnvId, SysError> {
        let mut envs = self.envs.lock();
        let env = envs.alloc(EnvId::NULL, 0).ok_or(SysError::NoFreeEnv)?;
        env.status = EnvStatus::Runnable;
        let id = env.id;
        log::info!("{} created as root", id);
        Ok(id)
    }

    /// Run status of `id`; destroyed or stale ids read as [`EnvStatus::Free`].
    pub fn env_status(&self, id: EnvId) -> EnvStatus {
        self.envs
            .lock()
            .get(id)
            .map(|e| e.status)
            .unwrap_or(EnvStatus::Free)
    }

    /// The syscall result `id` will observe on its first run, if one is
    /// pending (set up by `sys_exofork` for a fresh child).
    pub fn pending_first_run_ret(&self, id: EnvId) -> Option<EnvId> {
        self.envs.lock().get(id).and_then(|e| e.first_run_ret)
    }

    pub fn pgfault_upcall_registered(&self, id: EnvId) -> bool {
        self.envs
            .lock()
            .get(id)
            .map(|e| e.upcall.is_some())
            .unwrap_or(false)
    }

    pub fn frames_in_use(&self) -> usize {
        self.frames.lock().in_use()
    }

    pub fn fault_stats(&self) -> &FaultStats {
        &self.stats
    }

    /// Tear an environment down: release every frame it maps and retire its
    /// identity. Idempotent for stale ids.
    pub(crate) fn destroy(&self, id: EnvId) {
        let env = self.envs.lock().take(id);
        if let Some(mut env) = env {
            let entries = env.aspace.take_all();
            let mut frames = self.frames.lock();
            for entry in entries {
                let _ = frames.decref(entry.frame);
            }
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
