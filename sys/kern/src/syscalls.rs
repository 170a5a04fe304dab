// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent syscall implementation.
//!
//! The dispatcher reads the service number from the caller's saved register
//! 0, runs the service routine, and delivers the result back through
//! register 0. Service numbers at or above the table size produce -1.
//!
//! # Blocking and restart
//!
//! A service routine that must wait does not loop inside the kernel.
//! Instead it parks the caller on a wait queue and reports one of two
//! things to the dispatcher:
//!
//! - [`Outcome::Yield`]: the call is *finished* (its result is already in
//!   the caller's registers); the caller just has to wait -- this is sleep.
//! - [`Outcome::Retry`]: the call could not finish -- lock contention, or a
//!   full mutex table. The caller's argument registers are left untouched,
//!   and when the scheduler next switches to the caller the whole syscall
//!   is re-executed from scratch. Waiters therefore *re-contend* after
//!   every wake-up, re-checking a world that may have changed while they
//!   were parked.
//!
//! In both cases the dispatcher then picks the next process and switches to
//! it, under the critical section, releasing it only after the switch
//! returns on the resumed process's kernel stack.

use core::convert::TryFrom;

use abi::{
    Sysnum, TaskState, ERR_BAD_SYSCALL, ERR_NAME_TOO_LONG, ERR_NO_PROCESS,
    ERR_UNKNOWN_NAME, MUTEX_NAME_MAX, SYSCALL_COUNT, TASK_NAME_MAX,
    TICKS_PER_SEC,
};
use arrayvec::ArrayVec;

use crate::arch;
use crate::crit::CritGuard;
use crate::err::UserError;
use crate::mutex;
use crate::task::{self, ArchState, Kernel};
use crate::umem::{read_cstr, NameError};

/// What a service routine did with the calling process.
#[derive(Debug, Eq, PartialEq)]
#[must_use]
pub enum Outcome {
    /// Completed; deliver this value in the caller's result register.
    Return(i32),
    /// Caller parked with its result already delivered; nothing to do when
    /// it wakes.
    Yield,
    /// Caller parked mid-operation; re-run the syscall when it is next
    /// scheduled.
    Retry,
    /// Caller was torn down; the switch to its successor already happened.
    Destroyed,
}

/// Entry point reached from the software-trap vector: dispatches the
/// current process's syscall.
pub fn handle_syscall(k: &mut Kernel) {
    let caller = k.current;
    dispatch(k, caller);
    task::check_invariants(k);
}

/// Re-runs the syscall a task was parked in, on its way back to the CPU.
/// Called by the scheduler, with `caller` freshly switched in.
pub(crate) fn redispatch(k: &mut Kernel, caller: usize) {
    uassert_eq!(k.current, caller);
    dispatch(k, caller);
}

fn dispatch(k: &mut Kernel, caller: usize) {
    let nr = k.tasks[caller].save().syscall_descriptor();
    let result = match Sysnum::try_from(nr) {
        Ok(Sysnum::CreateProcess) => create_process(k, caller),
        Ok(Sysnum::ExitProcess) => exit_process(k, caller),
        Ok(Sysnum::Write) => write(k, caller),
        Ok(Sysnum::GetPid) => Ok(Outcome::Return(caller as i32)),
        Ok(Sysnum::Sleep) => sleep(k, caller),
        Ok(Sysnum::MutexCreate) => mutex_create(k, caller),
        Ok(Sysnum::MutexOpen) => mutex_open(k, caller),
        Ok(Sysnum::MutexLock) => {
            let des = k.tasks[caller].save().as_descriptor_args().descriptor();
            Ok(mutex::lock(k, caller, des))
        }
        Ok(Sysnum::MutexUnlock) => {
            let des = k.tasks[caller].save().as_descriptor_args().descriptor();
            Ok(mutex::unlock(k, caller, des))
        }
        Ok(Sysnum::MutexClose) => {
            let des = k.tasks[caller].save().as_descriptor_args().descriptor();
            Ok(mutex::close(k, caller, des))
        }
        Err(()) => {
            uassert!(nr >= SYSCALL_COUNT);
            klog!("process {}: unknown service {}", caller, nr);
            Ok(Outcome::Return(ERR_BAD_SYSCALL))
        }
    };

    match result {
        Ok(Outcome::Return(v)) => {
            k.tasks[caller].save_mut().set_syscall_result(v);
        }
        Ok(outcome @ (Outcome::Yield | Outcome::Retry)) => {
            if outcome == Outcome::Retry {
                k.tasks[caller].pending_syscall = true;
            }
            // The caller is already parked off the ready queue; pick and
            // switch under the critical section, which the resumed side
            // releases after the switch.
            let _crit = CritGuard::new();
            let next = task::select(k);
            task::switch_to(k, Some(caller), next);
        }
        Ok(Outcome::Destroyed) => (),
        Err(UserError::Recoverable(code)) => {
            k.tasks[caller].save_mut().set_syscall_result(code);
        }
        Err(UserError::Unrecoverable(fault)) => {
            task::handle_fault(k, fault);
        }
    }
}

/// Copies a NUL-terminated name out of the caller, reporting an overlong
/// one as the recoverable `too_long` code for the call at hand.
fn read_name<const N: usize>(
    k: &Kernel,
    caller: usize,
    base: usize,
    too_long: i32,
) -> Result<ArrayVec<u8, N>, UserError> {
    read_cstr::<N>(&k.tasks[caller], base).map_err(|e| match e {
        NameError::TooLong => UserError::Recoverable(too_long),
        NameError::ReadFault(f) => f.into(),
    })
}

fn create_process(k: &mut Kernel, caller: usize) -> Result<Outcome, UserError> {
    let base = k.tasks[caller].save().as_create_args().name_base();
    // A name too long (or not UTF-8) names no loadable program.
    let name = read_name::<TASK_NAME_MAX>(k, caller, base, ERR_NO_PROCESS)?;
    let name = core::str::from_utf8(&name)
        .map_err(|_| UserError::Recoverable(ERR_NO_PROCESS))?;
    match task::create_task(k, name) {
        Ok(pid) => Ok(Outcome::Return(pid as i32)),
        Err(e) => {
            klog!("create process '{}' failed: {:?}", name, e);
            Ok(Outcome::Return(ERR_NO_PROCESS))
        }
    }
}

fn exit_process(k: &mut Kernel, _caller: usize) -> Result<Outcome, UserError> {
    task::destroy_current(k);
    Ok(Outcome::Destroyed)
}

fn write(k: &mut Kernel, caller: usize) -> Result<Outcome, UserError> {
    let slice = k.tasks[caller].save().as_write_args().buffer()?;
    let bytes = k.tasks[caller].try_read(&slice)?;
    arch::console_write(bytes);
    Ok(Outcome::Return(0))
}

fn sleep(k: &mut Kernel, caller: usize) -> Result<Outcome, UserError> {
    let seconds = k.tasks[caller].save().as_sleep_args().seconds();
    let ticks = seconds.saturating_mul(TICKS_PER_SEC);
    if ticks == 0 {
        // Nothing to wait out; a zero-tick entry on the sleep queue would
        // never expire.
        return Ok(Outcome::Return(0));
    }

    // The result is delivered now, so waking needs no syscall restart.
    k.tasks[caller].save_mut().set_syscall_result(0);

    let _crit = CritGuard::new();
    let Kernel {
        ref mut tasks,
        ref mut ready,
        ref mut sleeping,
        ..
    } = *k;
    tasks[caller].state = TaskState::Sleeping { ticks_left: ticks };
    let head = ready.pop_front(tasks);
    uassert_eq!(head, Some(caller));
    sleeping.push_back(tasks, caller);
    klog!("process {} sleeping for {} ticks", caller, ticks);
    Ok(Outcome::Yield)
}

fn mutex_create(k: &mut Kernel, caller: usize) -> Result<Outcome, UserError> {
    let args = k.tasks[caller].save().as_mutex_create_args();
    let base = args.name_base();
    let kind = args.kind();
    drop(args);

    let name =
        read_name::<MUTEX_NAME_MAX>(k, caller, base, ERR_NAME_TOO_LONG)?;
    Ok(mutex::create(k, caller, &name, kind))
}

fn mutex_open(k: &mut Kernel, caller: usize) -> Result<Outcome, UserError> {
    let base = k.tasks[caller].save().as_mutex_open_args().name_base();
    // Created names are always shorter than the window, so an unterminated
    // name cannot match anything.
    let name =
        read_name::<MUTEX_NAME_MAX>(k, caller, base, ERR_UNKNOWN_NAME)?;
    Ok(mutex::open(k, caller, &name))
}
