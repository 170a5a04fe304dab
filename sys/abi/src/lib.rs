// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and applications.
//!
//! Everything in this crate is part of the contract with user code: syscall
//! numbers, return codes, the sizing constants that bound what user code may
//! pass in, and the state/fault records that host-side tooling may want to
//! decode (hence the serde derives).

#![no_std]

use serde::{Deserialize, Serialize};

/// Capacity of the process table. Process IDs are slot indices and therefore
/// always less than this.
pub const MAX_TASKS: usize = 10;

/// Capacity of the global mutex table. Mutex descriptors handed to user code
/// are indices into this table, so they are always less than this.
pub const MAX_MUTEXES: usize = 8;

/// Number of mutex descriptor slots owned by each process.
pub const MUTEXES_PER_TASK: usize = 4;

/// Capacity of a mutex name buffer, including its NUL terminator. A name is
/// creatable only if its length is *strictly* less than this.
pub const MUTEX_NAME_MAX: usize = 16;

/// Bound on the length of a program-image name passed to process creation.
pub const TASK_NAME_MAX: usize = 32;

/// Size, in bytes, of the stack allocated for each new process.
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// Clock interrupts per second. Sleeps are specified in seconds and converted
/// to ticks with this factor.
pub const TICKS_PER_SEC: u32 = 100;

/// Number of entries in the system service table. Service numbers at or above
/// this value are rejected by the dispatcher.
pub const SYSCALL_COUNT: u32 = 10;

/// Enumeration of syscall numbers.
///
/// These indices are fixed; user-side shim libraries hard-code them, so they
/// must never be renumbered.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sysnum {
    CreateProcess = 0,
    ExitProcess = 1,
    Write = 2,
    GetPid = 3,
    Sleep = 4,
    MutexCreate = 5,
    MutexOpen = 6,
    MutexLock = 7,
    MutexUnlock = 8,
    MutexClose = 9,
}

impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::CreateProcess),
            1 => Ok(Self::ExitProcess),
            2 => Ok(Self::Write),
            3 => Ok(Self::GetPid),
            4 => Ok(Self::Sleep),
            5 => Ok(Self::MutexCreate),
            6 => Ok(Self::MutexOpen),
            7 => Ok(Self::MutexLock),
            8 => Ok(Self::MutexUnlock),
            9 => Ok(Self::MutexClose),
            _ => Err(()),
        }
    }
}

/// Flavors of mutex behavior when the owner locks twice.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MutexKind {
    /// A second lock by the owner is refused as a deadlock
    /// ([`ERR_WOULD_DEADLOCK`]).
    NonRecursive,
    /// A second lock by the owner increments the lock depth; the mutex is
    /// released when the depth returns to zero.
    Recursive,
}

impl Default for MutexKind {
    fn default() -> Self {
        Self::NonRecursive
    }
}

impl MutexKind {
    /// Raw ABI value selecting `NonRecursive`.
    pub const NON_RECURSIVE: u32 = 0;
    /// Raw ABI value selecting `Recursive`.
    pub const RECURSIVE: u32 = 1;

    /// Decodes a kind from its raw register value. Exactly `1` selects
    /// `Recursive`; every other value is treated as `NonRecursive`. There is
    /// deliberately no error case here, matching the syscall contract.
    pub fn from_raw(v: u32) -> Self {
        if v == Self::RECURSIVE {
            Self::Recursive
        } else {
            Self::NonRecursive
        }
    }
}

// Syscall return codes. Several conditions share a numeric value; the
// distinct names record which check produced them.

/// `CreateProcess`: no free process slot, or the program image could not be
/// loaded.
pub const ERR_NO_PROCESS: i32 = -1;
/// Dispatcher: service number out of range.
pub const ERR_BAD_SYSCALL: i32 = -1;
/// `MutexCreate`: name length reaches [`MUTEX_NAME_MAX`].
pub const ERR_NAME_TOO_LONG: i32 = -1;
/// `MutexOpen`: no created mutex carries the given name.
pub const ERR_UNKNOWN_NAME: i32 = -1;
/// `MutexLock`/`MutexUnlock`/`MutexClose`: descriptor is not a valid table
/// index.
pub const ERR_BAD_DESCRIPTOR: i32 = -1;
/// `MutexCreate`/`MutexOpen`: the calling process has no free descriptor
/// slot.
pub const ERR_NO_FREE_DESCRIPTOR: i32 = -2;
/// `MutexLock`/`MutexUnlock`/`MutexClose`: the calling process has not
/// opened the named entry.
pub const ERR_NOT_OPEN: i32 = -2;
/// `MutexCreate`: a mutex with this name already exists.
pub const ERR_DUPLICATE_NAME: i32 = -3;
/// `MutexLock`: re-lock of a non-recursive mutex by its owner.
pub const ERR_WOULD_DEADLOCK: i32 = -3;
/// `MutexUnlock`: caller does not own the (locked) mutex.
pub const ERR_NOT_OWNER: i32 = -3;
/// `MutexUnlock`: the mutex is not locked.
pub const ERR_NOT_LOCKED: i32 = -4;

/// Lifecycle state of a process table slot.
///
/// The variants double as the scheduling queue discipline: a `Ready` or
/// `Running` task is on the ready queue (the running one at its head), a
/// `Sleeping` task is on the sleep queue, and a `Blocked` task is on exactly
/// one wait queue, named by its [`BlockReason`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    /// Slot is free and may be claimed by process creation.
    Unused,
    /// Runnable; queued on `ready`.
    Ready,
    /// Currently executing. Exactly one task is in this state, and it is the
    /// head of the ready queue.
    Running,
    /// Waiting out a timed sleep; `ticks_left` clock interrupts remain.
    Sleeping { ticks_left: u32 },
    /// Waiting on a kernel object.
    Blocked(BlockReason),
    /// Mid-teardown. Transient: the slot returns to `Unused` once its
    /// resources are released.
    Terminated,
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::Unused
    }
}

/// Why a blocked task is blocked, naming the wait queue it sits on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BlockReason {
    /// Waiting in `lock` on the mutex at the given table index.
    MutexWait(usize),
    /// Waiting in `create` for a slot to open up in the full mutex table.
    MutexSlotWait,
}

/// A record describing a fault taken by a process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FaultInfo {
    /// The processor reported an arithmetic exception (e.g. divide by zero)
    /// while the process was running.
    Arithmetic,
    /// The process violated memory access rules, either directly (`source`
    /// `User`) or by passing bad addresses to a syscall (`source` `Kernel`).
    MemoryAccess {
        /// Problematic address, when the fault reports one.
        address: Option<usize>,
        /// Origin of the fault.
        source: FaultSource,
    },
    /// Arguments passed to a syscall were structurally invalid.
    SyscallUsage(UsageError),
}

impl From<UsageError> for FaultInfo {
    fn from(e: UsageError) -> Self {
        Self::SyscallUsage(e)
    }
}

/// A kernel-defined fault, arising from how a process used a syscall.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum UsageError {
    /// A program specified a slice as a syscall argument, but the slice is
    /// patently invalid: it would wrap around the end of the address space,
    /// or is misaligned for its type. Neither is ever legal, so this
    /// represents a malfunction in the caller.
    InvalidSlice,
}

/// Origin of a fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FaultSource {
    /// The process did something that was intercepted by the processor.
    User,
    /// The process asked the kernel to do something bad on its behalf.
    Kernel,
}
