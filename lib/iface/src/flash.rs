// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash memory interface.
//!
//! A device describes itself as a hierarchy of block sizes: level 0 is
//! the whole array, each higher level a progressively smaller
//! individually addressable block (erase block, sector, page), until
//! [`Flash::get_size`] answers `BadArg`. Each level reports which
//! operations are permitted at that granularity.
//!
//! Erases are only accepted on ranges aligned to (and sized in multiples
//! of) an erasable block size. Reads and writes may use any byte range
//! within the device.

use bitflags::bitflags;
use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum FlashError {
    Failed = 1,
    BadArg,
    Timeout,
}

bitflags! {
    /// Operations permitted on one block-size level.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct BlockOps: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const ERASE = 1 << 2;
    }
}

pub trait Flash: Send + Sync {
    /// Size in bytes and permitted operations of blocks at `level`.
    /// `BadArg` past the smallest level.
    fn get_size(&self, level: u32) -> Result<(usize, BlockOps), FlashError>;

    /// Erases `[addr, addr + len)`. The range must be aligned to an
    /// erasable block size reported by [`Flash::get_size`].
    fn erase(&self, addr: usize, len: usize) -> Result<(), FlashError>;

    fn write(&self, addr: usize, buf: &[u8]) -> Result<(), FlashError>;

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), FlashError>;
}

/// Smallest erasable block size, scanning the level hierarchy.
pub fn smallest_erase_block(
    flash: &dyn Flash,
) -> Result<usize, FlashError> {
    smallest_with(flash, BlockOps::ERASE)
}

/// Smallest writable block size (the page size).
pub fn smallest_write_block(
    flash: &dyn Flash,
) -> Result<usize, FlashError> {
    smallest_with(flash, BlockOps::WRITE)
}

fn smallest_with(
    flash: &dyn Flash,
    ops: BlockOps,
) -> Result<usize, FlashError> {
    let mut best = None;
    let mut level = 0;
    loop {
        match flash.get_size(level) {
            Ok((size, block_ops)) => {
                if block_ops.contains(ops) {
                    best = Some(size);
                }
                level += 1;
            }
            Err(FlashError::BadArg) => break,
            Err(e) => return Err(e),
        }
    }
    best.ok_or(FlashError::Failed)
}
