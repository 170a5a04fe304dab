// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tyro kernel.
//!
//! This is a small teaching kernel: a fixed-capacity process table, a FIFO
//! scheduler, a clock-driven sleep facility, and a table of named mutexes
//! that processes create, open, lock, and close through the syscall
//! interface defined in the `abi` crate.
//!
//! # Design principles
//!
//! This implementation uses *really naive algorithms*. That is deliberate.
//! The intent is:
//!
//! 1. To use safe Rust for as much as possible.
//! 2. To use easily understood and debugged algorithms -- every search is a
//!    linear scan over a table whose capacity is a small constant.
//! 3. To make the bookkeeping rules checkable: after every kernel entry the
//!    structural invariants of the queues and the mutex table are audited
//!    (see `task::check_invariants`).
//!
//! # Concurrency model
//!
//! Uniprocessor, kernel not preemptible. User processes give up the CPU only
//! inside syscalls; interrupt handlers move tasks between queues but never
//! perform a context switch themselves. Every mutation of shared queues
//! happens with the interrupt priority level raised (see `crit`). A syscall
//! that must block parks its caller on a wait queue and is *restarted from
//! scratch* when the caller is next scheduled, which is how the re-check
//! semantics of lock contention and mutex-table backpressure are expressed
//! (see `syscalls`).

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod crit;
pub mod err;
pub mod list;
pub mod mutex;
pub mod startup;
pub mod syscalls;
pub mod task;
pub mod umem;
pub mod util;
