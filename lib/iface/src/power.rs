// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Controllable power rail with optional voltage programming and
//! measurement read-backs.

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum PowerError {
    Failed = 1,
    BadArg,
    NotImplemented,
}

pub trait Power: Send + Sync {
    fn enable(&self, on: bool) -> Result<(), PowerError>;

    /// Programs the rail output, for rails with a DAC reference.
    fn set_voltage_mv(&self, _mv: u32) -> Result<(), PowerError> {
        Err(PowerError::NotImplemented)
    }

    fn voltage_mv(&self) -> Result<u32, PowerError> {
        Err(PowerError::NotImplemented)
    }

    fn current_ma(&self) -> Result<i32, PowerError> {
        Err(PowerError::NotImplemented)
    }
}
