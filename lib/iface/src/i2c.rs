// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum I2cError {
    Failed = 1,
    BadArg,
    Timeout,
    /// Address phase was not acknowledged.
    Nak,
}

/// 7-bit addressed I2C bus. The transfer is a combined
/// write-then-read with a repeated start; either half may be empty.
/// Implementations hold a per-bus lock for the whole transaction.
pub trait I2cBus: Send + Sync {
    fn transfer(
        &self,
        addr: u8,
        txbuf: &[u8],
        rxbuf: &mut [u8],
    ) -> Result<(), I2cError>;
}
