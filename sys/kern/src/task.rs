// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of processes: the process control block, the table that
//! holds them, the FIFO scheduler, and the clock-driven sleep machinery.

use abi::{
    BlockReason, FaultInfo, FaultSource, MutexKind, TaskState, UsageError,
    DEFAULT_STACK_SIZE, MAX_MUTEXES, MAX_TASKS, MUTEXES_PER_TASK,
};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::arch;
use crate::crit::{CritGuard, IplLevel};
use crate::list::TaskList;
use crate::mutex::{self, MutexTable};
use crate::umem::USlice;
use crate::util::index2_distinct;

/// Interface that must be implemented by the `arch::SavedState` type. This
/// gives architecture-independent access to the saved register file: the
/// syscall descriptor arrives in register 0, arguments in the registers
/// after it, and results go back through register 0.
///
/// Architectures implement the raw accessors; the argument proxy types and
/// result conventions below just work.
pub trait ArchState: Default {
    fn stack_pointer(&self) -> usize;

    /// Reads the syscall descriptor (number).
    fn syscall_descriptor(&self) -> u32;

    /// Reads syscall argument register 1.
    fn arg1(&self) -> usize;
    /// Reads syscall argument register 2.
    fn arg2(&self) -> usize;
    /// Reads syscall argument register 3.
    fn arg3(&self) -> usize;

    /// Writes syscall return register 0.
    fn ret0(&mut self, _: usize);
    /// Writes syscall return register 1.
    fn ret1(&mut self, _: usize);

    /// Returns a proxied reference that assigns names and types to the
    /// syscall arguments for process creation.
    fn as_create_args(&self) -> AsCreateArgs<&Self> {
        AsCreateArgs(self)
    }

    /// Returns a proxied reference that assigns names and types to the
    /// syscall arguments for terminal writes.
    fn as_write_args(&self) -> AsWriteArgs<&Self> {
        AsWriteArgs(self)
    }

    /// Returns a proxied reference that assigns names and types to the
    /// syscall arguments for sleep.
    fn as_sleep_args(&self) -> AsSleepArgs<&Self> {
        AsSleepArgs(self)
    }

    /// Returns a proxied reference that assigns names and types to the
    /// syscall arguments for mutex creation.
    fn as_mutex_create_args(&self) -> AsMutexCreateArgs<&Self> {
        AsMutexCreateArgs(self)
    }

    /// Returns a proxied reference that assigns names and types to the
    /// syscall arguments for mutex open.
    fn as_mutex_open_args(&self) -> AsMutexOpenArgs<&Self> {
        AsMutexOpenArgs(self)
    }

    /// Returns a proxied reference that assigns names and types to the
    /// syscall arguments for the descriptor-taking mutex calls.
    fn as_descriptor_args(&self) -> AsDescriptorArgs<&Self> {
        AsDescriptorArgs(self)
    }

    /// Writes a syscall result using the generic convention: value in
    /// return register 0, register 1 cleared.
    fn set_syscall_result(&mut self, v: i32) {
        self.ret0(v as isize as usize);
        self.ret1(0);
    }
}

/// Reference proxy for process-creation argument registers.
pub struct AsCreateArgs<T>(T);

impl<'a, T: ArchState> AsCreateArgs<&'a T> {
    /// Base address of the NUL-terminated program name.
    pub fn name_base(&self) -> usize {
        self.0.arg1()
    }
}

/// Reference proxy for write argument registers.
pub struct AsWriteArgs<T>(T);

impl<'a, T: ArchState> AsWriteArgs<&'a T> {
    /// Extracts the bounds of the caller's text as a `USlice`.
    ///
    /// If the caller passed a slice that overlaps the end of the address
    /// space, returns `Err`.
    pub fn buffer(&self) -> Result<USlice<u8>, UsageError> {
        USlice::from_raw(self.0.arg1(), self.0.arg2())
    }
}

/// Reference proxy for sleep argument registers.
pub struct AsSleepArgs<T>(T);

impl<'a, T: ArchState> AsSleepArgs<&'a T> {
    /// Extracts the requested duration, in seconds.
    pub fn seconds(&self) -> u32 {
        self.0.arg1() as u32
    }
}

/// Reference proxy for mutex-creation argument registers.
pub struct AsMutexCreateArgs<T>(T);

impl<'a, T: ArchState> AsMutexCreateArgs<&'a T> {
    /// Base address of the NUL-terminated mutex name.
    pub fn name_base(&self) -> usize {
        self.0.arg1()
    }

    /// Extracts the requested mutex kind.
    pub fn kind(&self) -> MutexKind {
        MutexKind::from_raw(self.0.arg2() as u32)
    }
}

/// Reference proxy for mutex-open argument registers.
pub struct AsMutexOpenArgs<T>(T);

impl<'a, T: ArchState> AsMutexOpenArgs<&'a T> {
    /// Base address of the NUL-terminated mutex name.
    pub fn name_base(&self) -> usize {
        self.0.arg1()
    }
}

/// Reference proxy for the lock/unlock/close argument registers.
pub struct AsDescriptorArgs<T>(T);

impl<'a, T: ArchState> AsDescriptorArgs<&'a T> {
    /// Extracts the descriptor, unchecked.
    pub fn descriptor(&self) -> usize {
        self.0.arg1()
    }
}

/// Internal representation of a process (the PCB).
#[derive(Debug, Default)]
pub struct Task {
    /// Saved machine state of the user program.
    pub(crate) save: arch::SavedState,
    /// Lifecycle and scheduling state.
    pub(crate) state: TaskState,
    /// Intrusive link for the queue this task currently sits on, if any. A
    /// task is on at most one queue.
    pub(crate) queue_link: Option<usize>,
    /// Handle for the loaded program image; owned by this slot until
    /// teardown.
    pub(crate) image: Option<arch::Image>,
    /// Stack memory; owned by this slot until teardown.
    pub(crate) stack: Option<arch::Stack>,
    /// Per-process mutex descriptor table. Entries are indices into the
    /// global mutex table.
    pub(crate) descriptors: [Option<usize>; MUTEXES_PER_TASK],
    /// Set while this task is parked partway through a blocking syscall;
    /// the dispatcher restarts the call when the task is next scheduled.
    pub(crate) pending_syscall: bool,
}

impl Task {
    /// Returns this task's current state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Returns a reference to the saved machine state.
    pub fn save(&self) -> &arch::SavedState {
        &self.save
    }

    /// Returns a mutable reference to the saved machine state.
    pub fn save_mut(&mut self) -> &mut arch::SavedState {
        &mut self.save
    }

    /// Returns the per-process mutex descriptor table.
    pub fn descriptors(&self) -> &[Option<usize>; MUTEXES_PER_TASK] {
        &self.descriptors
    }

    /// Tests whether this task may access `slice` as readable memory.
    ///
    /// The image loader on this kernel provides no memory protection -- all
    /// processes share the machine's address space -- so there is no region
    /// table to consult and validation is limited to the arithmetic checks
    /// `USlice` performs at construction.
    #[must_use]
    fn can_read<T>(&self, _slice: &USlice<T>) -> bool {
        true
    }

    /// Obtains the memory backing `slice` as a real slice, if this task may
    /// read it.
    pub fn try_read<'a, T>(
        &'a self,
        slice: &'a USlice<T>,
    ) -> Result<&'a [T], FaultInfo>
    where
        T: FromBytes + Immutable + KnownLayout,
    {
        if self.can_read(slice) {
            // Safety: assume_readable requires the slice to refer to real,
            // readable memory, which can_read just vouched for.
            unsafe { Ok(slice.assume_readable()) }
        } else {
            Err(FaultInfo::MemoryAccess {
                address: Some(slice.base_addr()),
                source: FaultSource::Kernel,
            })
        }
    }
}

/// All mutable kernel state: the process table, the scheduler queues, the
/// mutex table, and the identity of the running process.
///
/// Keeping it in one value (rather than scattered globals) lets every
/// kernel entry point take `&mut Kernel` and lets the simulator host one
/// machine per test.
#[derive(Debug, Default)]
pub struct Kernel {
    pub tasks: [Task; MAX_TASKS],
    /// Runnable processes, the running one at the head.
    pub ready: TaskList,
    /// Processes waiting out a sleep.
    pub sleeping: TaskList,
    /// Processes stalled because the mutex table was full.
    pub slot_waiters: TaskList,
    pub mutexes: MutexTable,
    /// Index of the running process. Meaningful whenever some task is in
    /// state `Running`; see `check_invariants`.
    pub current: usize,
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_task(&self) -> &Task {
        &self.tasks[self.current]
    }

    pub fn current_task_mut(&mut self) -> &mut Task {
        &mut self.tasks[self.current]
    }
}

/// Ways process creation can fail.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CreateError {
    /// Every slot in the process table is occupied.
    NoSlot,
    /// The named program image could not be built.
    BadImage,
}

/// Allocates a process slot, builds the image and stack for `program`, and
/// queues the new process at the tail of the ready queue. Returns the new
/// pid (its slot index).
pub fn create_task(k: &mut Kernel, program: &str) -> Result<usize, CreateError> {
    let slot = k
        .tasks
        .iter()
        .position(|t| t.state == TaskState::Unused)
        .ok_or(CreateError::NoSlot)?;

    let image = arch::create_image(program).ok_or(CreateError::BadImage)?;
    let mut stack = arch::create_stack(DEFAULT_STACK_SIZE);
    let mut save = arch::SavedState::default();
    arch::initialize_context(&image, &mut stack, &mut save);

    let task = &mut k.tasks[slot];
    task.save = save;
    task.image = Some(image);
    task.stack = Some(stack);
    task.descriptors = [None; MUTEXES_PER_TASK];
    task.pending_syscall = false;
    task.state = TaskState::Ready;

    let _crit = CritGuard::new();
    let Kernel {
        ref mut tasks,
        ref mut ready,
        ..
    } = *k;
    ready.push_back(tasks, slot);
    klog!("created process {} ({})", slot, program);
    Ok(slot)
}

/// FIFO scheduler: the next process to run is the head of the ready queue.
///
/// When nothing is runnable, drops the interrupt level to the minimum and
/// waits for an interrupt to make something ready, then re-checks.
pub fn select(k: &mut Kernel) -> usize {
    loop {
        if let Some(head) = k.ready.first() {
            return head;
        }
        let prev = arch::set_interrupt_level(IplLevel::Minimum);
        arch::halt(k);
        arch::set_interrupt_level(prev);
    }
}

/// Makes `next` the running process and crosses the HAL context-switch
/// boundary.
///
/// `save_from` names the outgoing process whose context must be preserved,
/// or `None` when the outgoing context is being discarded (teardown). If
/// the incoming task parked partway through a blocking syscall, the call is
/// restarted here, before control returns to user code.
pub fn switch_to(k: &mut Kernel, save_from: Option<usize>, next: usize) {
    uassert_eq!(k.ready.first(), Some(next));
    uassert_eq!(k.tasks[next].state, TaskState::Ready);
    k.tasks[next].state = TaskState::Running;
    k.current = next;

    match save_from {
        Some(old) if old != next => {
            klog!("context switch: {} -> {}", old, next);
            let (old_task, next_task) = index2_distinct(&mut k.tasks, old, next);
            arch::switch_context(Some(&mut old_task.save), &next_task.save);
        }
        _ => {
            // Resuming the task we just suspended, or discarding the old
            // context entirely; either way there is nothing to save.
            arch::switch_context(None, &k.tasks[next].save);
        }
    }

    if k.tasks[next].pending_syscall {
        k.tasks[next].pending_syscall = false;
        crate::syscalls::redispatch(k, next);
    }
}

/// Tears down the current process: closes its mutex descriptors (waking any
/// waiters and possibly freeing table slots), releases its image and stack,
/// returns its slot to `Unused`, and switches to the next process.
///
/// Used by the exit syscall and by the exception paths.
pub fn destroy_current(k: &mut Kernel) {
    let dying = k.current;

    // Close every open descriptor first; closes can cascade wake-ups into
    // the ready queue.
    for slot in 0..MUTEXES_PER_TASK {
        if let Some(index) = k.tasks[dying].descriptors[slot] {
            mutex::close_descriptor(k, dying, slot, index);
        }
    }

    klog!("process {} exiting", dying);
    {
        let _crit = CritGuard::new();
        let Kernel {
            ref mut tasks,
            ref mut ready,
            ..
        } = *k;
        tasks[dying].image = None;
        tasks[dying].state = TaskState::Terminated;
        // The dying process is the running one, so it is the ready head.
        let head = ready.pop_front(tasks);
        uassert_eq!(head, Some(dying));
    }

    let next = select(k);

    // Free the dying stack only after the successor is chosen, and before
    // the switch: the HAL switch must not touch this stack.
    let task = &mut k.tasks[dying];
    task.stack = None;
    task.save = arch::SavedState::default();
    task.pending_syscall = false;
    task.state = TaskState::Unused;

    switch_to(k, None, next);
}

/// Entry point for the arithmetic and memory exception vectors.
///
/// A fault taken while user code was running kills the offending process; a
/// fault inside the kernel is unrecoverable.
pub fn handle_fault(k: &mut Kernel, fault: FaultInfo) {
    if !arch::came_from_user() {
        panic!("fault taken in kernel mode: {:?}", fault);
    }
    klog!("fault in process {}: {:?}", k.current, fault);
    destroy_current(k);
    check_invariants(k);
}

/// Clock interrupt handler body: ticks down every sleeping process and
/// readies the ones whose counters just expired.
///
/// Entered with the IPL already at clock level. This never performs a
/// context switch; a woken sleeper preempts the running process only when
/// that process next enters the scheduler.
pub fn process_sleep_timers(k: &mut Kernel) {
    {
        let Kernel {
            ref mut tasks,
            ref mut ready,
            ref mut sleeping,
            ..
        } = *k;
        let mut cursor = sleeping.first();
        while let Some(i) = cursor {
            // Save the link now; the node may be unlinked below.
            cursor = tasks[i].queue_link;
            let expired = match tasks[i].state {
                TaskState::Sleeping { ticks_left } => {
                    let left = ticks_left - 1;
                    tasks[i].state = TaskState::Sleeping { ticks_left: left };
                    left == 0
                }
                _ => panic!("non-sleeping task on sleep queue"),
            };
            if expired {
                // We already run at clock level; the guard keeps the
                // queues-move-only-at-CRIT rule uniform.
                let _crit = CritGuard::new();
                let found = sleeping.remove(tasks, i);
                uassert!(found);
                tasks[i].state = TaskState::Ready;
                ready.push_back(tasks, i);
                klog!("sleep complete: process {} ready", i);
            }
        }
    }
    check_invariants(k);
}

/// Structural audit of the scheduler and mutex bookkeeping, run after every
/// syscall and every interrupt delivery. Any violation is a kernel bug and
/// panics.
///
/// Checked here: each task appears on exactly the one queue its state names
/// (and nowhere during teardown/idle); at most one task runs and it is the
/// ready head; sleep counters are positive; every created mutex's open
/// count equals the number of descriptors naming it; locked mutexes have an
/// owner holding a descriptor; non-recursive mutexes never exceed depth 1;
/// the live-mutex count and name uniqueness hold.
pub fn check_invariants(k: &Kernel) {
    let mut appearances = [0u32; MAX_TASKS];
    let mut on_ready = [false; MAX_TASKS];
    let mut on_sleeping = [false; MAX_TASKS];
    let mut on_slot_wait = [false; MAX_TASKS];
    let mut waiting_on = [None::<usize>; MAX_TASKS];

    for i in k.ready.iter(&k.tasks) {
        appearances[i] += 1;
        on_ready[i] = true;
    }
    for i in k.sleeping.iter(&k.tasks) {
        appearances[i] += 1;
        on_sleeping[i] = true;
    }
    for i in k.slot_waiters.iter(&k.tasks) {
        appearances[i] += 1;
        on_slot_wait[i] = true;
    }
    for m in 0..MAX_MUTEXES {
        for i in k.mutexes.entry(m).waiters.iter(&k.tasks) {
            appearances[i] += 1;
            waiting_on[i] = Some(m);
        }
    }

    let mut running = 0u32;
    for (i, task) in k.tasks.iter().enumerate() {
        match task.state {
            TaskState::Unused | TaskState::Terminated => {
                uassert_eq!(appearances[i], 0);
            }
            TaskState::Ready => {
                uassert!(on_ready[i]);
                uassert_eq!(appearances[i], 1);
            }
            TaskState::Running => {
                running += 1;
                uassert_eq!(i, k.current);
                uassert_eq!(k.ready.first(), Some(i));
                uassert!(on_ready[i]);
                uassert_eq!(appearances[i], 1);
            }
            TaskState::Sleeping { ticks_left } => {
                uassert!(ticks_left > 0);
                uassert!(on_sleeping[i]);
                uassert_eq!(appearances[i], 1);
            }
            TaskState::Blocked(BlockReason::MutexSlotWait) => {
                uassert!(on_slot_wait[i]);
                uassert_eq!(appearances[i], 1);
            }
            TaskState::Blocked(BlockReason::MutexWait(m)) => {
                uassert_eq!(waiting_on[i], Some(m));
                uassert_eq!(appearances[i], 1);
            }
        }
        if task.state == TaskState::Unused {
            uassert!(task.descriptors.iter().all(|d| d.is_none()));
        }
    }
    uassert!(running <= 1);

    let mut live = 0;
    for m in 0..MAX_MUTEXES {
        let entry = k.mutexes.entry(m);
        let refs: u32 = k
            .tasks
            .iter()
            .map(|t| {
                t.descriptors.iter().filter(|d| **d == Some(m)).count() as u32
            })
            .sum();
        if entry.is_created() {
            live += 1;
            uassert_eq!(entry.open_count(), refs);
            uassert!(entry.open_count() >= 1);
            if entry.depth() > 0 {
                let owner = match entry.owner() {
                    Some(o) => o,
                    None => panic!("locked mutex without owner"),
                };
                uassert!(k.tasks[owner]
                    .descriptors
                    .iter()
                    .any(|d| *d == Some(m)));
                if entry.kind() == MutexKind::NonRecursive {
                    uassert!(entry.depth() <= 1);
                }
            } else {
                uassert!(entry.owner().is_none());
            }
            for m2 in (m + 1)..MAX_MUTEXES {
                let other = k.mutexes.entry(m2);
                if other.is_created() {
                    uassert!(entry.name() != other.name());
                }
            }
        } else {
            uassert_eq!(refs, 0);
            uassert_eq!(entry.open_count(), 0);
            uassert_eq!(entry.depth(), 0);
            uassert!(entry.owner().is_none());
            uassert!(entry.waiters.is_empty());
        }
    }
    uassert_eq!(k.mutexes.live(), live);
}
