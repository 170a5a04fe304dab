// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, magically tailored for the current target.
//!
//! For this to work, each architecture support module must define the same
//! set of names: `SavedState` (implementing `task::ArchState`), the
//! interrupt-level primitives, `halt`, the image/stack allocators,
//! `initialize_context`, `switch_context`, `console_write`,
//! `came_from_user`, `now`, and the `klog!`/`uassert!` macros.
//!
//! The only port present in this tree is the hosted simulator, which runs
//! the kernel as an ordinary process for development and test. A bare-metal
//! port would slot in as another `cfg_if` arm.

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        compile_error!("no bare-metal port is present in this tree; \
                        build for the host to use the simulator port");
    } else {
        #[macro_use]
        pub mod hosted;
        pub use hosted::*;
    }
}
