// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static flash volumes.
//!
//! A volume (LV) is a named, contiguous slice of a physical flash (PV)
//! exposed through the same [`Flash`] interface: level 0 reports the
//! volume size, higher levels delegate to the physical device, and all
//! addresses are translated by the volume's start offset. A whole-volume
//! erase is turned into a loop of physical erase-block erases so that a
//! volume can sit anywhere in the chip, not only at the start.
//!
//! Volumes are carved once at boot from a static configuration; there is
//! no on-flash partition table.

use iface::flash::{BlockOps, Flash, FlashError};
use log::info;

const LOG: &str = "flash-vol";

pub struct FlashVol {
    pv: &'static dyn Flash,
    name: &'static str,
    start: usize,
    size: usize,
}

impl FlashVol {
    pub fn new(
        pv: &'static dyn Flash,
        name: &'static str,
        start: usize,
        size: usize,
    ) -> Result<FlashVol, FlashError> {
        let (pv_size, _) = pv.get_size(0)?;
        let (block, _) = pv.get_size(1)?;
        if size == 0 || start % block != 0 || size % block != 0 {
            return Err(FlashError::BadArg);
        }
        if start + size > pv_size {
            return Err(FlashError::BadArg);
        }
        Ok(FlashVol {
            pv,
            name,
            start,
            size,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn check_range(&self, addr: usize, len: usize) -> Result<(), FlashError> {
        if addr >= self.size || addr + len > self.size {
            return Err(FlashError::Failed);
        }
        Ok(())
    }
}

impl Flash for FlashVol {
    fn get_size(&self, level: u32) -> Result<(usize, BlockOps), FlashError> {
        if level == 0 {
            return Ok((self.size, BlockOps::ERASE));
        }
        self.pv.get_size(level)
    }

    fn erase(&self, addr: usize, len: usize) -> Result<(), FlashError> {
        self.check_range(addr, len)?;
        if addr == 0 && len == self.size {
            // Whole-volume erase as a loop of physical block erases.
            let (block, _) = self.pv.get_size(1)?;
            for i in 0..len / block {
                self.pv.erase(self.start + i * block, block)?;
            }
            return Ok(());
        }
        self.pv.erase(self.start + addr, len)
    }

    fn write(&self, addr: usize, buf: &[u8]) -> Result<(), FlashError> {
        self.check_range(addr, buf.len())?;
        self.pv.write(self.start + addr, buf)
    }

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_range(addr, buf.len())?;
        self.pv.read(self.start + addr, buf)
    }
}

/// Boot-time volume factory. Volumes live for the life of the process,
/// so `create` hands out `'static` references.
pub struct FlashVolumes {
    pv: &'static dyn Flash,
}

impl FlashVolumes {
    pub fn new(pv: &'static dyn Flash) -> FlashVolumes {
        FlashVolumes { pv }
    }

    pub fn create(
        &self,
        name: &'static str,
        start: usize,
        size: usize,
    ) -> Result<&'static FlashVol, FlashError> {
        let lv = FlashVol::new(self.pv, name, start, size)?;
        info!(
            target: LOG,
            "creating LV '{}', start 0x{:x}, size {} K",
            name,
            start,
            size / 1024
        );
        Ok(Box::leak(Box::new(lv)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_mem_flash::MemFlash;

    const KIB: usize = 1024;

    fn pv_1mib() -> &'static MemFlash {
        Box::leak(Box::new(MemFlash::new(1024 * KIB, 4 * KIB, 256)))
    }

    #[test]
    fn bounds() {
        let pv = pv_1mib();
        let lv = FlashVol::new(pv, "log", 64 * KIB, 128 * KIB).unwrap();
        let mut b = [0u8; 1];
        assert!(lv.read(128 * KIB - 1, &mut b).is_ok());
        assert_eq!(lv.read(128 * KIB, &mut b), Err(FlashError::Failed));
        assert_eq!(
            lv.write(128 * KIB - 1, &[0, 0]),
            Err(FlashError::Failed),
        );
    }

    #[test]
    fn level_zero_reports_volume() {
        let pv = pv_1mib();
        let lv = FlashVol::new(pv, "log", 64 * KIB, 128 * KIB).unwrap();
        assert_eq!(lv.get_size(0).unwrap(), (128 * KIB, BlockOps::ERASE));
        // Higher levels delegate to the physical device.
        assert_eq!(lv.get_size(1).unwrap().0, 4 * KIB);
        assert_eq!(lv.get_size(2).unwrap().0, 256);
    }

    #[test]
    fn whole_volume_erase_stays_inside() {
        let pv = pv_1mib();
        // Dirty the whole physical device first.
        for block in 0..256 {
            pv.write(block * 4 * KIB, &[0u8; 16]).unwrap();
        }
        let lv = FlashVol::new(pv, "log", 64 * KIB, 128 * KIB).unwrap();
        lv.erase(0, 128 * KIB).unwrap();

        // Inside the volume: erased.
        assert!(pv
            .snapshot(64 * KIB, 128 * KIB)
            .iter()
            .all(|&b| b == 0xff));
        // The neighbouring blocks keep their dirty markers.
        assert_eq!(pv.snapshot(60 * KIB, 1)[0], 0x00);
        assert_eq!(pv.snapshot(192 * KIB, 1)[0], 0x00);
    }

    #[test]
    fn translated_partial_erase() {
        let pv = pv_1mib();
        let lv = FlashVol::new(pv, "log", 64 * KIB, 128 * KIB).unwrap();
        lv.write(4 * KIB, &[0u8; 8]).unwrap();
        lv.erase(4 * KIB, 4 * KIB).unwrap();
        let mut b = [0u8; 8];
        lv.read(4 * KIB, &mut b).unwrap();
        assert_eq!(b, [0xff; 8]);
        // Misaligned erases are rejected by the physical driver.
        assert!(lv.erase(KIB, KIB).is_err());
    }

    #[test]
    fn misplaced_volume_rejected() {
        let pv = pv_1mib();
        assert!(FlashVol::new(pv, "x", 1024 * KIB, 4 * KIB).is_err());
        assert!(FlashVol::new(pv, "x", 0, 1024 * KIB + 4 * KIB).is_err());
        assert!(FlashVol::new(pv, "x", 100, 4 * KIB).is_err());
    }
}
