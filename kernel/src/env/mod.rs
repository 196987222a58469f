//! Environments: process-like execution contexts.
//!
//! Environments live in a fixed arena indexed by a stable identity. The
//! identity packs the slot index with a generation counter, so a destroyed
//! slot can be reused without old ids resolving to the new occupant.

use alloc::vec::Vec;

use crate::kern::fault::{FaultError, FaultInfo};
use crate::memory::AddressSpace;
use crate::user::UserEnv;

/// Slots are indexed by the low `LOG2NENV` bits of an [`EnvId`].
pub const LOG2NENV: u32 = 10;
pub const NENV: usize = 1 << LOG2NENV;

/// Per-environment page-fault upcall: invoked with a typed fault context,
/// never a raw address.
pub type FaultUpcall = fn(&UserEnv<'_>, &FaultInfo) -> Result<(), FaultError>;

/// Environment identity: slot index plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(u32);

impl EnvId {
    /// The designated "zero" identity: names the caller itself in syscalls
    /// and is what a forked child observes as its fork return value.
    pub const NULL: EnvId = EnvId(0);

    fn new(index: usize, generation: u32) -> Self {
        Self((generation << LOG2NENV) | index as u32)
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub const fn index(&self) -> usize {
        (self.0 as usize) & (NENV - 1)
    }

    const fn generation(&self) -> u32 {
        self.0 >> LOG2NENV
    }
}

impl core::fmt::Display for EnvId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "[{:08x}]", self.0)
    }
}

/// Run status of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    /// Slot unused or environment destroyed.
    Free,
    /// Created or suspended; never scheduled.
    NotRunnable,
    Runnable,
}

pub struct Environment {
    pub id: EnvId,
    pub parent: EnvId,
    pub status: EnvStatus,
    pub priority: u8,
    pub aspace: AddressSpace,
    pub upcall: Option<FaultUpcall>,
    /// Set while the fault upcall runs; a second fault then is fatal.
    pub in_fault: bool,
    /// Syscall result replayed on the environment's first run
    /// (the trapframe-eax analog set up by exofork).
    pub first_run_ret: Option<EnvId>,
}

struct EnvSlot {
    generation: u32,
    env: Option<Environment>,
}

/// Arena of environment records with a free list.
pub struct EnvTable {
    slots: Vec<EnvSlot>,
    free: Vec<usize>,
}

impl EnvTable {
    pub fn new(nenv: usize) -> Self {
        let nenv = nenv.min(NENV);
        let mut slots = Vec::with_capacity(nenv);
        slots.resize_with(nenv, || EnvSlot {
            generation: 0,
            env: None,
        });
        let free = (0..nenv).rev().collect();
        Self { slots, free }
    }

    /// Allocate a fresh environment, suspended, with an empty address space.
    pub fn alloc(&mut self, parent: EnvId, priority: u8) -> Option<&mut Environment> {
        let idx = self.free.pop()?;
        let slot = &mut self.slots[idx];
        // Generation starts at one, so no live id ever equals NULL.
        slot.generation += 1;
        let id = EnvId::new(idx, slot.generation);
        slot.env = Some(Environment {
            id,
            parent,
            status: EnvStatus::NotRunnable,
            priority,
            aspace: AddressSpace::new(),
            upcall: None,
            in_fault: false,
            first_run_ret: None,
        });
        slot.env.as_mut()
    }

    pub fn get(&self, id: EnvId) -> Option<&Environment> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.env.as_ref()
    }

    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Environment> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.env.as_mut()
    }

    /// Resolve a syscall target: NULL names the caller, and a caller may
    /// only address itself or its immediate children.
    pub fn resolve_checked(&self, caller: EnvId, target: EnvId) -> Option<&Environment> {
        let target = if target.is_null() { caller } else { target };
        let env = self.get(target)?;
        if env.id != caller && env.parent != caller {
            return None;
        }
        Some(env)
    }

    pub fn resolve_checked_mut(
        &mut self,
        caller: EnvId,
        target: EnvId,
    ) -> Option<&mut Environment> {
        let id = self.resolve_checked(caller, target)?.id;
        self.get_mut(id)
    }

    /// Retire an environment, handing its record back for teardown.
    pub fn take(&mut self, id: EnvId) -> Option<Environment> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        let env = slot.env.take();
        if env.is_some() {
            self.free.push(id.index());
        }
        env
    }
}
