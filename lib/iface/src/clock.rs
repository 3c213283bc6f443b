// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timekeeping interface used to timestamp published data.

use crate::Timespec;
use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum ClockError {
    Failed = 1,
    BadArg,
    NotImplemented,
}

pub trait Clock: Send + Sync {
    fn get(&self) -> Result<Timespec, ClockError>;

    fn set(&self, ts: Timespec) -> Result<(), ClockError>;

    /// Applies a sub-second phase offset (for disciplining against an
    /// external reference). Optional.
    fn shift(&self, _offset_ns: i64) -> Result<(), ClockError> {
        Err(ClockError::NotImplemented)
    }
}
