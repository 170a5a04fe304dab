// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Kernel code distinguishes two tiers of user-visible trouble: conditions
//! the caller can observe and handle (negative syscall return codes), and
//! conditions that indicate the calling process is malfunctioning (faults,
//! which end it). `UserError` carries both through `Result` so that syscall
//! implementations can use `?` freely and let the dispatcher sort out
//! delivery.

use abi::{FaultInfo, UsageError};

#[derive(Copy, Clone, Debug)]
pub enum UserError {
    /// Deliver this code in the caller's result register and resume it.
    Recoverable(i32),
    /// The caller did something indefensible; tear it down.
    Unrecoverable(FaultInfo),
}

impl From<FaultInfo> for UserError {
    fn from(f: FaultInfo) -> Self {
        Self::Unrecoverable(f)
    }
}

impl From<UsageError> for UserError {
    fn from(f: UsageError) -> Self {
        Self::Unrecoverable(f.into())
    }
}
