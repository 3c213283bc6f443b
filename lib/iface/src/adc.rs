// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum AdcError {
    Failed = 1,
    BadArg,
    Timeout,
}

/// Single-shot analog sampling by channel index.
pub trait Adc: Send + Sync {
    fn sample(&self, channel: u8) -> Result<i32, AdcError>;
}
