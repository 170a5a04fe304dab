// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted simulator port.
//!
//! This port runs the kernel as an ordinary process, for development and
//! test. The "hardware" is modeled as follows:
//!
//! - The register file of every simulated process lives permanently in its
//!   [`SavedState`]; a context switch therefore has nothing to copy and is
//!   pure bookkeeping. Test code plays the role of user programs by writing
//!   syscall arguments into the current task's `SavedState` and invoking the
//!   kernel entry points directly.
//! - Interrupts are queued [`Event`]s. They are delivered when the kernel
//!   idles in `halt` (the simulated wait-for-interrupt), or when a test
//!   raises one explicitly with [`raise_interrupt`] to model preemption of
//!   user code. Delivery runs the corresponding handler with the interrupt
//!   priority level raised to the source's level, mirroring hardware entry.
//! - Program images are looked up in a registry filled by
//!   [`register_program`], standing in for the boot volume; stacks are heap
//!   allocations owned by the task slot that created them.
//!
//! All state is thread-local, so each test thread gets an isolated machine.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::crit::IplLevel;
use crate::task::{ArchState, Kernel};
use crate::umem::USlice;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Log things from kernel context. With the `klog-stderr` feature enabled,
/// messages go to stderr; otherwise the macro is stubbed out. (A hardware
/// port would route this to an ITM or semihosting channel; here it is the
/// simulator's tracing channel.)
#[cfg(feature = "klog-stderr")]
macro_rules! klog {
    ($s:expr) => { ::std::eprintln!(concat!("[kern] ", $s)) };
    ($s:expr, $($tt:tt)*) => { ::std::eprintln!(concat!("[kern] ", $s), $($tt)*) };
}

#[cfg(not(feature = "klog-stderr"))]
macro_rules! klog {
    ($s:expr) => {};
    ($s:expr, $($tt:tt)*) => {};
}

macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("kernel assertion failed: {}", stringify!($cond));
        }
    };
}

macro_rules! uassert_eq {
    ($left:expr, $right:expr) => {
        if !($left == $right) {
            panic!(
                "kernel assertion failed: {} == {}",
                stringify!($left),
                stringify!($right)
            );
        }
    };
}

std::thread_local! {
    static IPL: Cell<IplLevel> = const { Cell::new(IplLevel::Minimum) };
    static TICKS: Cell<u64> = const { Cell::new(0) };
    static SWITCHES: Cell<u64> = const { Cell::new(0) };
    static USER_MODE: Cell<bool> = const { Cell::new(true) };
    static TERMINAL_PORT: Cell<u8> = const { Cell::new(0) };
    static EVENTS: RefCell<VecDeque<Event>> = const { RefCell::new(VecDeque::new()) };
    static CONSOLE: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
    static PROGRAMS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Register state of a simulated process.
///
/// `args` holds the syscall descriptor (slot 0) and up to three arguments;
/// `rets` holds the values handed back on return to user code. Keeping the
/// two separate means a blocked syscall's arguments survive untouched until
/// its restart, the way callee-save registers would on real hardware.
#[derive(Debug, Default)]
pub struct SavedState {
    args: [usize; 4],
    rets: [usize; 2],
    sp: usize,
}

impl SavedState {
    /// Loads a syscall number and arguments into the argument registers, as
    /// the user-side shim library would before trapping. Test support.
    pub fn set_syscall(&mut self, nr: u32, args: [usize; 3]) {
        self.args = [nr as usize, args[0], args[1], args[2]];
    }

    /// Reads back the primary return register as the signed result user code
    /// would observe. Test support.
    pub fn syscall_result(&self) -> i32 {
        self.rets[0] as isize as i32
    }
}

/// Map the simulated registers to the architecture-independent accessors.
impl ArchState for SavedState {
    fn stack_pointer(&self) -> usize {
        self.sp
    }

    fn syscall_descriptor(&self) -> u32 {
        self.args[0] as u32
    }

    fn arg1(&self) -> usize {
        self.args[1]
    }
    fn arg2(&self) -> usize {
        self.args[2]
    }
    fn arg3(&self) -> usize {
        self.args[3]
    }

    fn ret0(&mut self, x: usize) {
        self.rets[0] = x
    }
    fn ret1(&mut self, x: usize) {
        self.rets[1] = x
    }
}

bitflags::bitflags! {
    /// Interrupt sources, as bits in the simulated controller's mask
    /// register.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct IrqMask: u8 {
        const SOFTWARE = 1 << 0;
        const TERMINAL = 1 << 1;
        const CLOCK = 1 << 2;
    }
}

/// Sources masked while running at `level`. Each level masks its own source
/// and everything less urgent.
pub fn masked_at(level: IplLevel) -> IrqMask {
    match level {
        IplLevel::Minimum => IrqMask::empty(),
        IplLevel::Software => IrqMask::SOFTWARE,
        IplLevel::Terminal => IrqMask::SOFTWARE | IrqMask::TERMINAL,
        IplLevel::Clock => IrqMask::all(),
    }
}

/// An interrupt waiting to be delivered.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    ClockTick,
    /// A character arrived on the terminal port.
    TerminalInput(u8),
    SoftwareInterrupt,
}

impl Event {
    /// Priority level this source interrupts at.
    fn priority(&self) -> IplLevel {
        match self {
            Event::ClockTick => IplLevel::Clock,
            Event::TerminalInput(_) => IplLevel::Terminal,
            Event::SoftwareInterrupt => IplLevel::Software,
        }
    }

    fn mask_bit(&self) -> IrqMask {
        match self {
            Event::ClockTick => IrqMask::CLOCK,
            Event::TerminalInput(_) => IrqMask::TERMINAL,
            Event::SoftwareInterrupt => IrqMask::SOFTWARE,
        }
    }
}

/// Sets the interrupt priority level, returning the previous one.
pub fn set_interrupt_level(level: IplLevel) -> IplLevel {
    IPL.with(|c| c.replace(level))
}

/// Reads the current interrupt priority level.
pub fn interrupt_level() -> IplLevel {
    IPL.with(|c| c.get())
}

/// Queues an interrupt for later delivery.
pub fn queue_event(ev: Event) {
    EVENTS.with(|q| q.borrow_mut().push_back(ev));
}

/// Queues `n` clock interrupts. Convenience for timing tests.
pub fn queue_clock_ticks(n: u32) {
    EVENTS.with(|q| {
        let mut q = q.borrow_mut();
        for _ in 0..n {
            q.push_back(Event::ClockTick);
        }
    });
}

/// Number of interrupts still queued.
pub fn pending_events() -> usize {
    EVENTS.with(|q| q.borrow().len())
}

/// The simulated wait-for-interrupt. Delivers the next queued event; if the
/// queue is dry the simulation can make no further progress, which on this
/// port is a panic rather than a hang.
///
/// Callers are expected to have lowered the interrupt level first, the way
/// the idle loop does.
pub fn halt(k: &mut Kernel) {
    let ev = EVENTS.with(|q| q.borrow_mut().pop_front());
    match ev {
        Some(ev) => deliver(k, ev),
        None => panic!("halted: no runnable tasks and no pending interrupts"),
    }
}

/// Delivers one interrupt immediately, as if it preempted user code. Test
/// support for exercising ISR paths while a task is current.
pub fn raise_interrupt(k: &mut Kernel, ev: Event) {
    deliver(k, ev);
}

fn deliver(k: &mut Kernel, ev: Event) {
    // Hardware would hold a masked source pending instead of vectoring.
    uassert!(!masked_at(interrupt_level()).contains(ev.mask_bit()));
    let prev = set_interrupt_level(ev.priority());
    match ev {
        Event::ClockTick => {
            TICKS.with(|t| t.set(t.get() + 1));
            crate::task::process_sleep_timers(k);
        }
        Event::TerminalInput(b) => {
            TERMINAL_PORT.with(|p| p.set(b));
            let c = read_terminal_port();
            klog!("terminal interrupt: {:?}", c as char);
        }
        Event::SoftwareInterrupt => {
            klog!("software interrupt");
        }
    }
    set_interrupt_level(prev);
}

/// Reads the terminal data port.
pub fn read_terminal_port() -> u8 {
    TERMINAL_PORT.with(|p| p.get())
}

/// Reads the tick counter maintained by the clock interrupt handler.
pub fn now() -> u64 {
    TICKS.with(|t| t.get())
}

/// Number of context switches performed since boot (or `reset`).
pub fn context_switches() -> u64 {
    SWITCHES.with(|s| s.get())
}

/// Reports whether the most recent trap came from user mode. The simulator
/// keeps this as a settable flag (see [`set_user_mode`]); it is true except
/// when a test is staging a kernel-mode fault.
pub fn came_from_user() -> bool {
    USER_MODE.with(|m| m.get())
}

/// Overrides the mode bit reported by [`came_from_user`]. Test support.
pub fn set_user_mode(user: bool) {
    USER_MODE.with(|m| m.set(user));
}

/// Appends bytes to the simulated terminal output.
pub fn console_write(bytes: &[u8]) {
    CONSOLE.with(|c| c.borrow_mut().extend_from_slice(bytes));
}

/// Takes and clears everything written to the terminal so far. Test support.
pub fn take_console() -> Vec<u8> {
    CONSOLE.with(|c| std::mem::take(&mut *c.borrow_mut()))
}

/// Adds a program name to the simulated boot volume, making it loadable by
/// [`create_image`].
pub fn register_program(name: &str) {
    PROGRAMS.with(|p| p.borrow_mut().push(name.to_string()));
}

/// Handle for a loaded program image. Dropping it releases the image.
#[derive(Debug)]
pub struct Image {
    name: String,
    entry: usize,
}

impl Image {
    /// Address of the first instruction of the program.
    pub fn entry_point(&self) -> usize {
        self.entry
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builds an image for the named program, reporting its entry point through
/// the returned handle. Fails if the program is not on the boot volume.
pub fn create_image(name: &str) -> Option<Image> {
    let index = PROGRAMS.with(|p| p.borrow().iter().position(|n| n == name))?;
    Some(Image {
        name: name.to_string(),
        // Fabricated text segment address; never dereferenced by the
        // simulator, only recorded in the initial frame.
        entry: 0x2000_0000 + (index << 12),
    })
}

/// Stack memory owned by a task slot. Dropping it releases the memory.
#[derive(Debug)]
pub struct Stack {
    mem: Box<[u8]>,
}

impl Stack {
    pub fn base(&self) -> usize {
        self.mem.as_ptr() as usize
    }

    pub fn top(&self) -> usize {
        self.base() + self.mem.len()
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }
}

/// Allocates a zeroed stack of `size` bytes.
pub fn create_stack(size: usize) -> Stack {
    Stack {
        mem: vec![0; size].into_boxed_slice(),
    }
}

/// Frame deposited at the top of a new process stack, standing in for the
/// exception frame a hardware port would build for its first entry.
#[derive(Debug, Default, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct InitialFrame {
    pub pc: usize,
    pub sp: usize,
    pub status: usize,
}

/// Sets up the initial register context for a fresh process: writes the
/// initial frame at the (aligned) top of its stack and points the saved
/// state at it.
pub fn initialize_context(
    image: &Image,
    stack: &mut Stack,
    save: &mut SavedState,
) {
    let frame_size = core::mem::size_of::<InitialFrame>();
    let align = core::mem::align_of::<InitialFrame>();
    // Stacks grow down; align the frame base the way hardware ports align
    // the initial stack pointer.
    let base = (stack.top() - frame_size) & !(align - 1);
    uassert!(base >= stack.base());

    let mut uslice: USlice<InitialFrame> = USlice::from_raw(base, 1).unwrap();
    // Safety: the frame lies inside the stack allocation we just carved it
    // from, and nothing else aliases that memory yet.
    let frame = unsafe { &mut uslice.assume_writable()[0] };
    *frame = InitialFrame::default();
    frame.pc = image.entry_point();
    frame.sp = base;

    *save = SavedState::default();
    save.sp = base;
}

/// Performs the machine part of a context switch.
///
/// On this port every task's registers already live in its `SavedState`, so
/// there is nothing to copy; the call records the crossing and sanity-checks
/// that the incoming context was initialized. `save` is `None` when the
/// outgoing context is being discarded (process teardown).
pub fn switch_context(save: Option<&mut SavedState>, restore: &SavedState) {
    let _ = save;
    uassert!(restore.stack_pointer() != 0);
    SWITCHES.with(|s| s.set(s.get() + 1));
}

/// Returns the simulated machine to its power-on state. Each test thread
/// has its own machine, so this is only needed when booting twice in one
/// test.
pub fn reset() {
    IPL.with(|c| c.set(IplLevel::Minimum));
    TICKS.with(|c| c.set(0));
    SWITCHES.with(|c| c.set(0));
    USER_MODE.with(|c| c.set(true));
    TERMINAL_PORT.with(|c| c.set(0));
    EVENTS.with(|q| q.borrow_mut().clear());
    CONSOLE.with(|c| c.borrow_mut().clear());
    PROGRAMS.with(|p| p.borrow_mut().clear());
}
