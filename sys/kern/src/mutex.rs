// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Named inter-process mutexes.
//!
//! A fixed global table holds every mutex in the system, keyed by name.
//! Processes refer to entries through per-process descriptor slots; the
//! descriptor *value* handed to user code is the global table index, and a
//! process may use the lock/unlock/close calls only on entries it has open
//! (a descriptor slot naming the entry). Entries are reference-counted by
//! `open_count` and return to the free pool when the last descriptor
//! closes.
//!
//! Blocking: a `lock` of a busy mutex parks the caller on that entry's
//! waiter queue; a `create` against a full table parks the caller on the
//! kernel's slot-waiter queue. In both cases the syscall is restarted when
//! the process is next scheduled, so waiters *re-contend* rather than being
//! handed the lock -- which is why a close-while-owned may wake every
//! waiter at once without breaking mutual exclusion.

use abi::{
    BlockReason, MutexKind, TaskState, ERR_BAD_DESCRIPTOR, ERR_DUPLICATE_NAME,
    ERR_NOT_LOCKED, ERR_NOT_OPEN, ERR_NOT_OWNER, ERR_NO_FREE_DESCRIPTOR,
    ERR_UNKNOWN_NAME, ERR_WOULD_DEADLOCK, MAX_MUTEXES, MUTEX_NAME_MAX,
};
use arrayvec::ArrayVec;

use crate::crit::CritGuard;
use crate::list::TaskList;
use crate::syscalls::Outcome;
use crate::task::{Kernel, Task};

/// One slot of the global mutex table.
#[derive(Debug, Default)]
pub struct MutexEntry {
    /// Primary key across the table while `created`.
    pub(crate) name: ArrayVec<u8, MUTEX_NAME_MAX>,
    pub(crate) kind: MutexKind,
    /// 0 when unlocked; for non-recursive entries never exceeds 1.
    pub(crate) depth: u32,
    /// Holder while `depth > 0`.
    pub(crate) owner: Option<usize>,
    /// Number of per-process descriptors referring to this entry.
    pub(crate) open_count: u32,
    pub(crate) created: bool,
    /// Processes blocked in `lock` on this entry.
    pub waiters: TaskList,
}

impl MutexEntry {
    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    pub fn open_count(&self) -> u32 {
        self.open_count
    }
}

/// The global mutex table plus its occupancy count.
#[derive(Debug, Default)]
pub struct MutexTable {
    entries: [MutexEntry; MAX_MUTEXES],
    live: usize,
}

impl MutexTable {
    pub fn entry(&self, index: usize) -> &MutexEntry {
        &self.entries[index]
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut MutexEntry {
        &mut self.entries[index]
    }

    /// Number of created entries.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Finds the created entry carrying `name`, if any. Scans the whole
    /// table; created entries need not be contiguous.
    pub fn find_by_name(&self, name: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.created && e.name.as_slice() == name)
    }

    fn find_free(&self) -> Option<usize> {
        self.entries.iter().position(|e| !e.created)
    }

    fn create_entry(&mut self, index: usize, name: &[u8], kind: MutexKind) {
        let entry = &mut self.entries[index];
        uassert!(!entry.created);
        uassert!(entry.waiters.is_empty());
        entry.name.clear();
        let fit = entry.name.try_extend_from_slice(name);
        uassert!(fit.is_ok());
        entry.kind = kind;
        entry.depth = 0;
        entry.owner = None;
        entry.open_count = 1;
        entry.created = true;
        self.live += 1;
    }

    fn release_entry(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        uassert!(entry.created);
        uassert!(entry.waiters.is_empty());
        entry.created = false;
        entry.name.clear();
        entry.depth = 0;
        entry.owner = None;
        self.live -= 1;
    }
}

/// First free descriptor slot of `task`.
fn free_descriptor_slot(task: &Task) -> Option<usize> {
    task.descriptors.iter().position(|d| d.is_none())
}

/// Slot of `task` holding a descriptor for table entry `des`, if any.
pub(crate) fn descriptor_slot_for(task: &Task, des: usize) -> Option<usize> {
    task.descriptors.iter().position(|d| *d == Some(des))
}

/// Creates a named mutex for `caller` and returns its descriptor.
///
/// If the table is full, the caller is parked on the slot-waiter queue and
/// the call restarts from scratch when a close frees an entry -- the name
/// situation may have changed by then, so every check re-runs.
pub(crate) fn create(
    k: &mut Kernel,
    caller: usize,
    name: &[u8],
    kind: MutexKind,
) -> Outcome {
    uassert!(name.len() < MUTEX_NAME_MAX);

    let Some(dslot) = free_descriptor_slot(&k.tasks[caller]) else {
        klog!("create mutex: no free descriptor in process {}", caller);
        return Outcome::Return(ERR_NO_FREE_DESCRIPTOR);
    };
    if k.mutexes.find_by_name(name).is_some() {
        klog!("create mutex: name already exists");
        return Outcome::Return(ERR_DUPLICATE_NAME);
    }
    let Some(index) = k.mutexes.find_free() else {
        klog!("create mutex: table full, blocking process {}", caller);
        let _crit = CritGuard::new();
        let Kernel {
            ref mut tasks,
            ref mut ready,
            ref mut slot_waiters,
            ..
        } = *k;
        tasks[caller].state = TaskState::Blocked(BlockReason::MutexSlotWait);
        let head = ready.pop_front(tasks);
        uassert_eq!(head, Some(caller));
        slot_waiters.push_back(tasks, caller);
        return Outcome::Retry;
    };

    k.mutexes.create_entry(index, name, kind);
    k.tasks[caller].descriptors[dslot] = Some(index);
    klog!(
        "mutex {} created by process {} (open count 1, {} live)",
        index,
        caller,
        k.mutexes.live()
    );
    Outcome::Return(index as i32)
}

/// Opens the named mutex for `caller`.
///
/// Open is idempotent per process: if the caller already holds a descriptor
/// for the name, that descriptor is returned and the reference count is not
/// bumped.
pub(crate) fn open(k: &mut Kernel, caller: usize, name: &[u8]) -> Outcome {
    let Some(index) = k.mutexes.find_by_name(name) else {
        klog!("open mutex: unknown name");
        return Outcome::Return(ERR_UNKNOWN_NAME);
    };
    if descriptor_slot_for(&k.tasks[caller], index).is_some() {
        return Outcome::Return(index as i32);
    }
    let Some(dslot) = free_descriptor_slot(&k.tasks[caller]) else {
        klog!("open mutex: no free descriptor in process {}", caller);
        return Outcome::Return(ERR_NO_FREE_DESCRIPTOR);
    };
    k.tasks[caller].descriptors[dslot] = Some(index);
    k.mutexes.entry_mut(index).open_count += 1;
    klog!(
        "mutex {} opened by process {} (open count {})",
        index,
        caller,
        k.mutexes.entry(index).open_count()
    );
    Outcome::Return(index as i32)
}

/// Acquires the mutex named by descriptor `des` for `caller`, parking the
/// caller on the waiter queue when someone else holds it.
pub(crate) fn lock(k: &mut Kernel, caller: usize, des: usize) -> Outcome {
    if des >= MAX_MUTEXES {
        return Outcome::Return(ERR_BAD_DESCRIPTOR);
    }
    if descriptor_slot_for(&k.tasks[caller], des).is_none() {
        return Outcome::Return(ERR_NOT_OPEN);
    }

    let entry = k.mutexes.entry_mut(des);
    uassert!(entry.created);
    if entry.depth == 0 {
        entry.depth = 1;
        entry.owner = Some(caller);
        klog!("mutex {} locked by process {}", des, caller);
        return Outcome::Return(0);
    }
    if entry.owner == Some(caller) {
        return match entry.kind {
            MutexKind::Recursive => {
                entry.depth += 1;
                klog!("mutex {} relocked (depth {})", des, entry.depth);
                Outcome::Return(0)
            }
            MutexKind::NonRecursive => {
                klog!("mutex {}: re-lock by owner refused", des);
                Outcome::Return(ERR_WOULD_DEADLOCK)
            }
        };
    }

    // Held by another process: wait for it.
    klog!("mutex {} busy: blocking process {}", des, caller);
    let _crit = CritGuard::new();
    let Kernel {
        ref mut tasks,
        ref mut ready,
        ref mut mutexes,
        ..
    } = *k;
    tasks[caller].state = TaskState::Blocked(BlockReason::MutexWait(des));
    let head = ready.pop_front(tasks);
    uassert_eq!(head, Some(caller));
    mutexes.entries[des].waiters.push_back(tasks, caller);
    Outcome::Retry
}

/// Releases one level of the mutex named by descriptor `des`.
///
/// When the lock depth returns to zero, exactly one waiter (the queue head)
/// is readied; it re-contends for the lock once scheduled.
pub(crate) fn unlock(k: &mut Kernel, caller: usize, des: usize) -> Outcome {
    if des >= MAX_MUTEXES {
        return Outcome::Return(ERR_BAD_DESCRIPTOR);
    }
    if descriptor_slot_for(&k.tasks[caller], des).is_none() {
        return Outcome::Return(ERR_NOT_OPEN);
    }

    {
        let entry = k.mutexes.entry_mut(des);
        if entry.depth == 0 {
            klog!("mutex {}: unlock while unlocked", des);
            return Outcome::Return(ERR_NOT_LOCKED);
        }
        if entry.owner != Some(caller) {
            klog!("mutex {}: unlock by non-owner {}", des, caller);
            return Outcome::Return(ERR_NOT_OWNER);
        }
        entry.depth -= 1;
        if entry.depth > 0 {
            klog!("mutex {} unlocked one level (depth {})", des, entry.depth);
            return Outcome::Return(0);
        }
        entry.owner = None;
    }

    klog!("mutex {} unlocked by process {}", des, caller);
    let _crit = CritGuard::new();
    let Kernel {
        ref mut tasks,
        ref mut ready,
        ref mut mutexes,
        ..
    } = *k;
    if let Some(waiter) = mutexes.entries[des].waiters.pop_front(tasks) {
        tasks[waiter].state = TaskState::Ready;
        ready.push_back(tasks, waiter);
        klog!("mutex {}: waiter {} readied", des, waiter);
    }
    Outcome::Return(0)
}

/// Closes `caller`'s descriptor for table entry `des`.
pub(crate) fn close(k: &mut Kernel, caller: usize, des: usize) -> Outcome {
    if des >= MAX_MUTEXES {
        return Outcome::Return(ERR_BAD_DESCRIPTOR);
    }
    let Some(slot) = descriptor_slot_for(&k.tasks[caller], des) else {
        return Outcome::Return(ERR_NOT_OPEN);
    };
    close_descriptor(k, caller, slot, des);
    Outcome::Return(0)
}

/// Removes one descriptor reference to `des`, held by `task_index` in
/// descriptor slot `slot`. Shared by the close syscall and by process
/// teardown.
///
/// Closing is an abnormal release when the closer holds the lock: the lock
/// is forced open and *every* waiter is readied to re-contend, since any of
/// them may now succeed. If the reference count reaches zero the entry is
/// freed and every process stalled on the full table is readied to re-run
/// its create.
pub(crate) fn close_descriptor(
    k: &mut Kernel,
    task_index: usize,
    slot: usize,
    des: usize,
) {
    uassert_eq!(k.tasks[task_index].descriptors[slot], Some(des));
    k.tasks[task_index].descriptors[slot] = None;

    if k.mutexes.entry(des).owner() == Some(task_index) {
        {
            let entry = k.mutexes.entry_mut(des);
            entry.depth = 0;
            entry.owner = None;
        }
        klog!("mutex {} force-unlocked by close", des);
        let _crit = CritGuard::new();
        let Kernel {
            ref mut tasks,
            ref mut ready,
            ref mut mutexes,
            ..
        } = *k;
        while let Some(waiter) = mutexes.entries[des].waiters.pop_front(tasks) {
            tasks[waiter].state = TaskState::Ready;
            ready.push_back(tasks, waiter);
            klog!("mutex {}: waiter {} readied", des, waiter);
        }
    }

    let now_free = {
        let entry = k.mutexes.entry_mut(des);
        uassert!(entry.open_count > 0);
        entry.open_count -= 1;
        entry.open_count == 0
    };
    klog!(
        "mutex {} closed by process {} (open count {})",
        des,
        task_index,
        k.mutexes.entry(des).open_count()
    );

    if now_free {
        k.mutexes.release_entry(des);
        klog!("mutex {} destroyed ({} live)", des, k.mutexes.live());
        let _crit = CritGuard::new();
        let Kernel {
            ref mut tasks,
            ref mut ready,
            ref mut slot_waiters,
            ..
        } = *k;
        while let Some(waiter) = slot_waiters.pop_front(tasks) {
            tasks[waiter].state = TaskState::Ready;
            ready.push_back(tasks, waiter);
            klog!("slot waiter {} readied", waiter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testutil::fixture;
    use crate::task::check_invariants;
    use abi::MUTEXES_PER_TASK;

    #[test]
    fn create_claims_slot_and_descriptor() {
        let mut k = fixture(2);
        let r = create(&mut k, 0, b"gate", MutexKind::NonRecursive);
        assert_eq!(r, Outcome::Return(0));
        let e = k.mutexes.entry(0);
        assert!(e.is_created());
        assert_eq!(e.name(), b"gate");
        assert_eq!(e.open_count(), 1);
        assert_eq!(e.depth(), 0);
        assert_eq!(e.owner(), None);
        assert_eq!(k.tasks[0].descriptors()[0], Some(0));
        assert_eq!(k.mutexes.live(), 1);
        check_invariants(&k);
    }

    #[test]
    fn create_rejects_duplicate_names() {
        let mut k = fixture(2);
        assert_eq!(
            create(&mut k, 0, b"gate", MutexKind::NonRecursive),
            Outcome::Return(0)
        );
        assert_eq!(
            create(&mut k, 1, b"gate", MutexKind::Recursive),
            Outcome::Return(ERR_DUPLICATE_NAME)
        );
        check_invariants(&k);
    }

    #[test]
    fn create_exhausts_descriptor_slots() {
        let mut k = fixture(1);
        for (i, name) in [b"m0", b"m1", b"m2", b"m3"].iter().enumerate() {
            assert_eq!(
                create(&mut k, 0, *name, MutexKind::NonRecursive),
                Outcome::Return(i as i32)
            );
        }
        assert_eq!(
            create(&mut k, 0, b"m4", MutexKind::NonRecursive),
            Outcome::Return(ERR_NO_FREE_DESCRIPTOR)
        );
        check_invariants(&k);
    }

    // Fills the 8-entry table using the descriptor budgets of tasks 1 and 2.
    fn fill_table(k: &mut Kernel) {
        for i in 0..MUTEXES_PER_TASK {
            let name = [b'a', b'0' + i as u8];
            assert_eq!(
                create(k, 1, &name, MutexKind::NonRecursive),
                Outcome::Return(i as i32)
            );
        }
        for i in 0..MUTEXES_PER_TASK {
            let name = [b'b', b'0' + i as u8];
            assert_eq!(
                create(k, 2, &name, MutexKind::NonRecursive),
                Outcome::Return((MUTEXES_PER_TASK + i) as i32)
            );
        }
        assert_eq!(k.mutexes.live(), MAX_MUTEXES);
    }

    #[test]
    fn create_blocks_on_full_table_and_retries_after_close() {
        let mut k = fixture(3);
        fill_table(&mut k);

        // Task 0 (the ready head) must wait for a slot.
        let r = create(&mut k, 0, b"late", MutexKind::NonRecursive);
        assert_eq!(r, Outcome::Retry);
        assert_eq!(
            k.tasks[0].state(),
            TaskState::Blocked(BlockReason::MutexSlotWait)
        );
        assert!(k.slot_waiters.contains(&k.tasks, 0));
        check_invariants(&k);

        // Task 1 closes one of its mutexes; the slot frees and task 0 is
        // readied to re-run its create.
        assert_eq!(close(&mut k, 1, 0), Outcome::Return(0));
        assert_eq!(k.mutexes.live(), MAX_MUTEXES - 1);
        assert_eq!(k.tasks[0].state(), TaskState::Ready);
        assert!(k.slot_waiters.is_empty());

        // The restarted call finds the freed slot.
        assert_eq!(
            create(&mut k, 0, b"late", MutexKind::NonRecursive),
            Outcome::Return(0)
        );
        assert_eq!(k.mutexes.entry(0).name(), b"late");
        check_invariants(&k);
    }

    #[test]
    fn open_is_idempotent_per_process() {
        let mut k = fixture(2);
        assert_eq!(
            create(&mut k, 0, b"gate", MutexKind::NonRecursive),
            Outcome::Return(0)
        );
        // Re-open by the creator: same descriptor, no refcount bump.
        assert_eq!(open(&mut k, 0, b"gate"), Outcome::Return(0));
        assert_eq!(k.mutexes.entry(0).open_count(), 1);
        // Open by another process does take a reference.
        assert_eq!(open(&mut k, 1, b"gate"), Outcome::Return(0));
        assert_eq!(k.mutexes.entry(0).open_count(), 2);
        assert_eq!(open(&mut k, 1, b"gate"), Outcome::Return(0));
        assert_eq!(k.mutexes.entry(0).open_count(), 2);
        check_invariants(&k);
    }

    #[test]
    fn open_unknown_name_fails() {
        let mut k = fixture(1);
        assert_eq!(open(&mut k, 0, b"ghost"), Outcome::Return(ERR_UNKNOWN_NAME));
    }

    #[test]
    fn open_requires_a_free_descriptor() {
        let mut k = fixture(2);
        assert_eq!(
            create(&mut k, 1, b"other", MutexKind::NonRecursive),
            Outcome::Return(0)
        );
        for name in [b"m0", b"m1", b"m2", b"m3"] {
            let r = create(&mut k, 0, name, MutexKind::NonRecursive);
            assert!(matches!(r, Outcome::Return(v) if v >= 0));
        }
        assert_eq!(
            open(&mut k, 0, b"other"),
            Outcome::Return(ERR_NO_FREE_DESCRIPTOR)
        );
        check_invariants(&k);
    }

    #[test]
    fn lock_validates_descriptors() {
        let mut k = fixture(2);
        assert_eq!(
            lock(&mut k, 0, MAX_MUTEXES),
            Outcome::Return(ERR_BAD_DESCRIPTOR)
        );
        assert_eq!(
            create(&mut k, 0, b"gate", MutexKind::NonRecursive),
            Outcome::Return(0)
        );
        // Task 1 never opened the mutex.
        assert_eq!(lock(&mut k, 1, 0), Outcome::Return(ERR_NOT_OPEN));
    }

    #[test]
    fn nonrecursive_relock_is_refused() {
        let mut k = fixture(1);
        assert_eq!(
            create(&mut k, 0, b"gate", MutexKind::NonRecursive),
            Outcome::Return(0)
        );
        assert_eq!(lock(&mut k, 0, 0), Outcome::Return(0));
        assert_eq!(lock(&mut k, 0, 0), Outcome::Return(ERR_WOULD_DEADLOCK));
        let e = k.mutexes.entry(0);
        assert_eq!(e.depth(), 1);
        assert_eq!(e.owner(), Some(0));
        check_invariants(&k);
    }

    #[test]
    fn recursive_lock_nests() {
        let mut k = fixture(1);
        assert_eq!(
            create(&mut k, 0, b"gate", MutexKind::Recursive),
            Outcome::Return(0)
        );
        assert_eq!(lock(&mut k, 0, 0), Outcome::Return(0));
        assert_eq!(lock(&mut k, 0, 0), Outcome::Return(0));
        assert_eq!(unlock(&mut k, 0, 0), Outcome::Return(0));
        // Still held after one unlock of two.
        let e = k.mutexes.entry(0);
        assert_eq!(e.depth(), 1);
        assert_eq!(e.owner(), Some(0));
        assert!(e.waiters.is_empty());

        assert_eq!(unlock(&mut k, 0, 0), Outcome::Return(0));
        let e = k.mutexes.entry(0);
        assert_eq!(e.depth(), 0);
        assert_eq!(e.owner(), None);
        check_invariants(&k);
    }

    #[test]
    fn unlock_error_codes() {
        let mut k = fixture(2);
        assert_eq!(
            create(&mut k, 0, b"gate", MutexKind::NonRecursive),
            Outcome::Return(0)
        );
        assert_eq!(
            unlock(&mut k, 0, MAX_MUTEXES),
            Outcome::Return(ERR_BAD_DESCRIPTOR)
        );
        assert_eq!(unlock(&mut k, 1, 0), Outcome::Return(ERR_NOT_OPEN));
        // Not locked takes precedence over not-owner.
        assert_eq!(open(&mut k, 1, b"gate"), Outcome::Return(0));
        assert_eq!(unlock(&mut k, 1, 0), Outcome::Return(ERR_NOT_LOCKED));
        assert_eq!(lock(&mut k, 0, 0), Outcome::Return(0));
        assert_eq!(unlock(&mut k, 1, 0), Outcome::Return(ERR_NOT_OWNER));
        check_invariants(&k);
    }

    #[test]
    fn contended_lock_blocks_and_unlock_wakes_one() {
        let mut k = fixture(3);
        assert_eq!(
            create(&mut k, 0, b"gate", MutexKind::NonRecursive),
            Outcome::Return(0)
        );
        assert_eq!(lock(&mut k, 0, 0), Outcome::Return(0));
        assert_eq!(open(&mut k, 1, b"gate"), Outcome::Return(0));
        assert_eq!(open(&mut k, 2, b"gate"), Outcome::Return(0));

        // Walk the ready queue so each contender blocks from the head.
        // (In the full system the dispatcher arranges this.)
        let _ = k.ready.pop_front(&mut k.tasks); // task 0 off to "run" elsewhere
        k.tasks[0].state = TaskState::Ready;
        k.ready.push_back(&mut k.tasks, 0);

        assert_eq!(lock(&mut k, 1, 0), Outcome::Retry);
        assert_eq!(
            k.tasks[1].state(),
            TaskState::Blocked(BlockReason::MutexWait(0))
        );
        assert_eq!(lock(&mut k, 2, 0), Outcome::Retry);
        assert_eq!(
            k.mutexes.entry(0).waiters.iter(&k.tasks).collect::<Vec<_>>(),
            vec![1, 2]
        );
        check_invariants(&k);

        // Unlock readies exactly the queue head.
        assert_eq!(unlock(&mut k, 0, 0), Outcome::Return(0));
        assert_eq!(k.tasks[1].state(), TaskState::Ready);
        assert_eq!(
            k.tasks[2].state(),
            TaskState::Blocked(BlockReason::MutexWait(0))
        );
        // The woken waiter re-contends and wins.
        assert_eq!(lock(&mut k, 1, 0), Outcome::Return(0));
        assert_eq!(k.mutexes.entry(0).owner(), Some(1));
        check_invariants(&k);
    }

    #[test]
    fn close_while_owner_wakes_every_waiter() {
        let mut k = fixture(3);
        assert_eq!(
            create(&mut k, 0, b"gate", MutexKind::NonRecursive),
            Outcome::Return(0)
        );
        assert_eq!(lock(&mut k, 0, 0), Outcome::Return(0));
        assert_eq!(open(&mut k, 1, b"gate"), Outcome::Return(0));
        assert_eq!(open(&mut k, 2, b"gate"), Outcome::Return(0));

        let _ = k.ready.pop_front(&mut k.tasks);
        k.tasks[0].state = TaskState::Ready;
        k.ready.push_back(&mut k.tasks, 0);
        assert_eq!(lock(&mut k, 1, 0), Outcome::Retry);
        assert_eq!(lock(&mut k, 2, 0), Outcome::Retry);

        assert_eq!(close(&mut k, 0, 0), Outcome::Return(0));
        // Both waiters re-contend; the entry survives with two references.
        assert_eq!(k.tasks[1].state(), TaskState::Ready);
        assert_eq!(k.tasks[2].state(), TaskState::Ready);
        let e = k.mutexes.entry(0);
        assert!(e.is_created());
        assert_eq!(e.depth(), 0);
        assert_eq!(e.owner(), None);
        assert_eq!(e.open_count(), 2);
        assert!(k.tasks[0].descriptors().iter().all(|d| d.is_none()));
        check_invariants(&k);
    }

    #[test]
    fn create_then_close_restores_the_table() {
        let mut k = fixture(1);
        assert_eq!(
            create(&mut k, 0, b"gate", MutexKind::Recursive),
            Outcome::Return(0)
        );
        assert_eq!(close(&mut k, 0, 0), Outcome::Return(0));
        assert!(!k.mutexes.entry(0).is_created());
        assert_eq!(k.mutexes.live(), 0);
        assert_eq!(k.mutexes.find_by_name(b"gate"), None);
        check_invariants(&k);
    }
}
