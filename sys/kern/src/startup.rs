// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! Boot reaches here with interrupts masked and the interrupt vectors
//! already pointing at the arch entry stubs (on the simulator port, event
//! delivery plays that role). What remains is pure kernel work: initialize
//! the tables, create the initial process, and start scheduling.

use crate::task::{self, Kernel};

/// Boots the kernel: builds an empty process/mutex table set, creates the
/// initial process from `init_name`'s image, and switches to it.
///
/// On a hardware port this function would not return -- the switch drops
/// into user code. The simulator port returns the running machine so the
/// harness can drive it.
///
/// # Panics
///
/// If the initial program image cannot be found; a machine with no initial
/// process has nothing to run.
pub fn start_kernel(init_name: &str) -> Kernel {
    klog!("kernel startup");
    let mut k = Kernel::new();

    if task::create_task(&mut k, init_name).is_err() {
        panic!("initial process image '{}' not found", init_name);
    }

    let first = task::select(&mut k);
    task::switch_to(&mut k, None, first);
    task::check_invariants(&k);
    k
}
