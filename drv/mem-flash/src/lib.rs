// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RAM-backed NOR flash.
//!
//! Behaves like a real NOR array: erase sets a whole block to `0xFF`,
//! writes can only clear bits (the incoming byte is ANDed into storage),
//! and erases are accepted only on exactly block-aligned ranges. The
//! demo image and the storage test suites run against this device.

use std::sync::Mutex;

use iface::flash::{BlockOps, Flash, FlashError};

pub struct MemFlash {
    total: usize,
    block: usize,
    page: usize,
    data: Mutex<Vec<u8>>,
}

impl MemFlash {
    /// A device of `total` bytes with `block`-byte erase blocks and
    /// `page`-byte write pages. Sizes must nest evenly.
    pub fn new(total: usize, block: usize, page: usize) -> MemFlash {
        assert!(block > 0 && page > 0);
        assert_eq!(total % block, 0);
        assert_eq!(block % page, 0);
        MemFlash {
            total,
            block,
            page,
            data: Mutex::new(vec![0xff; total]),
        }
    }

    /// Raw snapshot of a byte range, for test assertions.
    pub fn snapshot(&self, addr: usize, len: usize) -> Vec<u8> {
        self.data.lock().unwrap()[addr..addr + len].to_vec()
    }
}

impl Flash for MemFlash {
    fn get_size(&self, level: u32) -> Result<(usize, BlockOps), FlashError> {
        match level {
            0 => Ok((self.total, BlockOps::ERASE)),
            1 => Ok((self.block, BlockOps::ERASE)),
            2 => Ok((self.page, BlockOps::READ | BlockOps::WRITE)),
            _ => Err(FlashError::BadArg),
        }
    }

    fn erase(&self, addr: usize, len: usize) -> Result<(), FlashError> {
        if addr % self.block != 0 || len % self.block != 0 || len == 0 {
            return Err(FlashError::BadArg);
        }
        if addr + len > self.total {
            return Err(FlashError::Failed);
        }
        self.data.lock().unwrap()[addr..addr + len].fill(0xff);
        Ok(())
    }

    fn write(&self, addr: usize, buf: &[u8]) -> Result<(), FlashError> {
        if addr + buf.len() > self.total {
            return Err(FlashError::Failed);
        }
        let mut data = self.data.lock().unwrap();
        for (cell, byte) in data[addr..addr + buf.len()].iter_mut().zip(buf)
        {
            // NOR semantics: only 1 -> 0 transitions happen.
            *cell &= byte;
        }
        Ok(())
    }

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        if addr + buf.len() > self.total {
            return Err(FlashError::Failed);
        }
        buf.copy_from_slice(
            &self.data.lock().unwrap()[addr..addr + buf.len()],
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erased_by_default() {
        let f = MemFlash::new(4096, 1024, 256);
        let mut buf = [0u8; 16];
        f.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xff; 16]);
    }

    #[test]
    fn writes_only_clear_bits() {
        let f = MemFlash::new(4096, 1024, 256);
        f.write(0, &[0x0f]).unwrap();
        f.write(0, &[0xf3]).unwrap();
        let mut b = [0u8; 1];
        f.read(0, &mut b).unwrap();
        assert_eq!(b[0], 0x03);

        f.erase(0, 1024).unwrap();
        f.read(0, &mut b).unwrap();
        assert_eq!(b[0], 0xff);
    }

    #[test]
    fn erase_alignment_enforced() {
        let f = MemFlash::new(4096, 1024, 256);
        assert_eq!(f.erase(512, 1024), Err(FlashError::BadArg));
        assert_eq!(f.erase(0, 512), Err(FlashError::BadArg));
        assert_eq!(f.erase(4096, 1024), Err(FlashError::Failed));
        assert!(f.erase(1024, 2048).is_ok());
    }

    #[test]
    fn level_hierarchy() {
        let f = MemFlash::new(4096, 1024, 256);
        assert_eq!(f.get_size(0).unwrap().0, 4096);
        assert_eq!(f.get_size(1).unwrap().0, 1024);
        let (page, ops) = f.get_size(2).unwrap();
        assert_eq!(page, 256);
        assert!(ops.contains(BlockOps::WRITE));
        assert_eq!(f.get_size(3), Err(FlashError::BadArg));

        assert_eq!(iface::flash::smallest_erase_block(&f), Ok(1024));
        assert_eq!(iface::flash::smallest_write_block(&f), Ok(256));
    }
}
