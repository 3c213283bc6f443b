// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum BlockDevError {
    Failed = 1,
    BadArg,
    Timeout,
}

/// Fixed-block storage (SD/MMC cards and the like).
pub trait BlockDev: Send + Sync {
    fn block_size(&self) -> Result<usize, BlockDevError>;

    fn num_blocks(&self) -> Result<u64, BlockDevError>;

    /// Reads one block; `buf` must be exactly one block long.
    fn read_block(
        &self,
        lba: u64,
        buf: &mut [u8],
    ) -> Result<(), BlockDevError>;

    fn write_block(&self, lba: u64, buf: &[u8])
        -> Result<(), BlockDevError>;
}
