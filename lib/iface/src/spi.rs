// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum SpiError {
    Failed = 1,
    BadArg,
    Timeout,
}

/// Raw bus transfers, chip-select not included. Implementations hold
/// the per-bus lock from `select` to `deselect`, so devices never
/// interleave partial transactions.
pub trait SpiBus: Send + Sync {
    fn send(&self, txbuf: &[u8]) -> Result<(), SpiError>;
    fn receive(&self, rxbuf: &mut [u8]) -> Result<(), SpiError>;

    /// Full-duplex transfer; `txbuf` and `rxbuf` must be equally long.
    fn exchange(
        &self,
        txbuf: &[u8],
        rxbuf: &mut [u8],
    ) -> Result<(), SpiError>;
}

/// A device on a SPI bus: the bus plus one chip-select line. Select
/// and deselect bracket a transaction.
pub trait SpiDev: Send + Sync {
    fn select(&self) -> Result<(), SpiError>;
    fn deselect(&self) -> Result<(), SpiError>;
    fn send(&self, txbuf: &[u8]) -> Result<(), SpiError>;
    fn receive(&self, rxbuf: &mut [u8]) -> Result<(), SpiError>;

    fn exchange(
        &self,
        txbuf: &[u8],
        rxbuf: &mut [u8],
    ) -> Result<(), SpiError>;
}
