// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Append-only FIFO log in a flash device, encrypted at rest.
//!
//! The device is treated as a ring of erase blocks. The first page of
//! each block holds a header, the rest is the data region:
//!
//! ```text
//! [magic: u32] [bitmap: 1024 bits] [iv: 16] [mac: 16]
//! ```
//!
//! NOR flash only clears bits between erases, so the block lifecycle is
//! encoded in magics whose transitions are monotone 1 -> 0:
//! `erased 0xFFFFFFFF -> head 0x77777777 -> fifo 0x33333333 ->
//! tail 0x00000000 -> (erase) -> erased`. The bitmap records the data
//! high-water mark as a count of leading zero bits (one bit per
//! 1/1024th of the block), again only ever clearing bits. A reboot in
//! any state is recoverable by scanning the headers; at least one
//! erased block is kept at all times so the scan has an anchor.
//!
//! Data is XORed with a BLAKE2s-128 keystream generated from the
//! block's random IV and a chunk counter, and each closed block carries
//! a BLAKE2s-128 MAC over its plaintext. The two 16-byte keys are
//! provisioned by the caller; there are no built-in defaults. A MAC
//! mismatch zeroises the decrypted buffer before the read fails.
//!
//! The log surfaces as a tiny filesystem with a single `"fifo"` entry:
//! `open` write-only and append, `open` read-only and replay from the
//! oldest unconsumed block, `remove` to consume the oldest block, and
//! garbage collection to turn consumed blocks back into erased ones.

use std::sync::Mutex;

use blake2::Blake2sMac;
use digest::consts::U16;
use digest::{KeyInit, Mac};
use iface::flash::{self, Flash};
use iface::fs::{File, Fs, FsError, FsInfo, FsMode};
use iface::rng::Rng;
use log::{error, info, warn};
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, IntoBytes};
use zeroize::Zeroize;

const LOG: &str = "flash-fifo";

pub const MAGIC_ERASED: u32 = 0xffff_ffff;
pub const MAGIC_HEAD: u32 = 0x7777_7777;
pub const MAGIC_FIFO: u32 = 0x3333_3333;
pub const MAGIC_TAIL: u32 = 0x0000_0000;

const BITMAP_BITS: usize = 1024;
const BITMAP_BYTES: usize = BITMAP_BITS / 8;
pub const KEY_SIZE: usize = 16;

const FILE_READING: File = File(0);
const FILE_WRITING: File = File(1);

type Mac128 = Blake2sMac<U16>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FifoError {
    Failed,
    Full,
    Empty,
}

impl From<FifoError> for FsError {
    fn from(e: FifoError) -> FsError {
        match e {
            FifoError::Failed => FsError::Failed,
            FifoError::Full => FsError::Full,
            FifoError::Empty => FsError::Empty,
        }
    }
}

/// Encryption keys, provisioned externally.
#[derive(Clone)]
pub struct FifoKeys {
    pub keystream: [u8; KEY_SIZE],
    pub mac: [u8; KEY_SIZE],
}

/// Per-magic block counts, for diagnostics and tests.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FifoStats {
    pub erased: usize,
    pub head: usize,
    pub fifo: usize,
    pub tail: usize,
    pub invalid: usize,
}

#[derive(
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::KnownLayout,
    zerocopy_derive::Immutable,
    zerocopy_derive::Unaligned,
)]
#[repr(C)]
struct BlockHeader {
    magic: U32<LittleEndian>,
    bitmap: [u8; BITMAP_BYTES],
    iv: [u8; KEY_SIZE],
    mac: [u8; KEY_SIZE],
}

const HEADER_LEN: usize = 4 + BITMAP_BYTES + 2 * KEY_SIZE;

impl BlockHeader {
    fn erased() -> BlockHeader {
        BlockHeader {
            magic: U32::new(MAGIC_ERASED),
            bitmap: [0xff; BITMAP_BYTES],
            iv: [0xff; KEY_SIZE],
            mac: [0xff; KEY_SIZE],
        }
    }

    /// High-water mark in bytes: leading zero bits of the bitmap times
    /// the granule.
    fn high_water(&self, granule: usize) -> usize {
        let mut zeros = 0;
        for &byte in &self.bitmap {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros() as usize;
                break;
            }
        }
        zeros * granule
    }

    /// Clears bitmap bits so the high-water mark covers `offset` bytes.
    fn mark_high_water(&mut self, granule: usize, offset: usize) {
        let bits = offset.div_ceil(granule).min(BITMAP_BITS);
        for (i, byte) in self.bitmap.iter_mut().enumerate() {
            let covered = bits.saturating_sub(i * 8);
            if covered >= 8 {
                *byte = 0;
            } else {
                *byte &= 0xff >> covered;
                break;
            }
        }
    }
}

struct ReadCursor {
    /// Block counter, starts at the oldest unconsumed block.
    block: u32,
    offset: usize,
    /// Decrypted data region of `cache_block`.
    cache: Vec<u8>,
    cache_block: Option<u32>,
}

struct FifoState {
    /// Oldest dirty block; everything before it is erased.
    tail: u32,
    /// Oldest unconsumed data block.
    last: u32,
    /// Block currently written to (or the last closed one).
    head: u32,
    head_open: bool,
    head_iv: [u8; KEY_SIZE],
    /// Exact bytes written into the open head's data region.
    write_offset: usize,
    mac_state: Option<Mac128>,
    read: Option<ReadCursor>,
}

pub struct FlashFifo {
    flash: &'static dyn Flash,
    rng: &'static dyn Rng,
    keys: FifoKeys,
    total: usize,
    block_size: usize,
    page_size: usize,
    blocks: u32,
    data_size: usize,
    granule: usize,
    state: Mutex<FifoState>,
}

impl FlashFifo {
    pub fn new(
        flash: &'static dyn Flash,
        rng: &'static dyn Rng,
        keys: FifoKeys,
    ) -> Result<FlashFifo, FifoError> {
        let (total, _) =
            flash.get_size(0).map_err(|_| FifoError::Failed)?;
        let block_size = flash::smallest_erase_block(flash)
            .map_err(|_| FifoError::Failed)?;
        let page_size = flash::smallest_write_block(flash)
            .map_err(|_| FifoError::Failed)?;
        if block_size <= page_size || page_size < HEADER_LEN {
            return Err(FifoError::Failed);
        }
        let fifo = FlashFifo {
            flash,
            rng,
            keys,
            total,
            block_size,
            page_size,
            blocks: (total / block_size) as u32,
            data_size: block_size - page_size,
            granule: (block_size / BITMAP_BITS).max(1),
            state: Mutex::new(FifoState {
                tail: 0,
                last: 0,
                head: 0,
                head_open: false,
                head_iv: [0; KEY_SIZE],
                write_offset: 0,
                mac_state: None,
                read: None,
            }),
        };
        if fifo.blocks < 2 {
            return Err(FifoError::Failed);
        }

        let mut st = fifo.state.lock().unwrap();
        match fifo.find_fifo(&mut st) {
            Ok(()) => {}
            Err(FifoError::Empty) => {
                info!(target: LOG, "no FIFO found, formatting");
                fifo.format(&mut st)?;
            }
            Err(_) => {
                warn!(
                    target: LOG,
                    "FIFO content missing or corrupted, formatting"
                );
                fifo.format(&mut st)?;
            }
        }
        info!(
            target: LOG,
            "blocks {}, head {}, last {}, tail {}",
            fifo.blocks,
            st.head % fifo.blocks,
            st.last % fifo.blocks,
            st.tail % fifo.blocks
        );
        drop(st);
        Ok(fifo)
    }

    fn header_addr(&self, pos: u32) -> usize {
        (pos % self.blocks) as usize * self.block_size
    }

    fn data_addr(&self, pos: u32) -> usize {
        self.header_addr(pos) + self.page_size
    }

    fn read_header(&self, pos: u32) -> Result<BlockHeader, FifoError> {
        let mut raw = [0u8; HEADER_LEN];
        self.flash
            .read(self.header_addr(pos), &mut raw)
            .map_err(|_| FifoError::Failed)?;
        BlockHeader::read_from_bytes(&raw[..])
            .map_err(|_| FifoError::Failed)
    }

    fn write_header(
        &self,
        pos: u32,
        header: &BlockHeader,
    ) -> Result<(), FifoError> {
        self.flash
            .write(self.header_addr(pos), header.as_bytes())
            .map_err(|_| FifoError::Failed)
    }

    /// First block with `magic` in `[start, start + blocks)`, as an
    /// absolute counter.
    fn find_block(&self, start: u32, magic: u32) -> Option<u32> {
        for pos in start..start + self.blocks {
            if let Ok(h) = self.read_header(pos) {
                if h.magic.get() == magic {
                    return Some(pos);
                }
            }
        }
        None
    }

    /// Reconstructs tail/last/head from the headers alone.
    fn find_fifo(&self, st: &mut FifoState) -> Result<(), FifoError> {
        // At least one erased block always exists; its absence means
        // the structure is corrupted.
        let erased = self
            .find_block(0, MAGIC_ERASED)
            .ok_or(FifoError::Failed)?;

        let pos = if let Some(tail) = self.find_block(erased, MAGIC_TAIL)
        {
            st.tail = tail;
            self.find_block(tail, MAGIC_FIFO)
                .or_else(|| self.find_block(tail, MAGIC_HEAD))
                .ok_or(FifoError::Failed)?
        } else {
            // Fully garbage-collected: the first data block after the
            // erased run starts the FIFO.
            let first = self
                .find_block(erased, MAGIC_FIFO)
                .or_else(|| self.find_block(erased, MAGIC_HEAD))
                .ok_or(FifoError::Empty)?;
            st.tail = first;
            first
        };
        st.last = pos;

        if let Some(head) = self.find_block(pos, MAGIC_HEAD) {
            st.head = head;
            st.head_open = true;
            self.recover_head(st)?;
        } else {
            // Head fully written and not yet reopened; it is the block
            // right before the first erased one.
            let e = self
                .find_block(pos, MAGIC_ERASED)
                .ok_or(FifoError::Failed)?;
            st.head = e - 1;
            st.head_open = false;
            st.write_offset = self.data_size;
            st.mac_state = None;
        }
        Ok(())
    }

    /// Rebuilds the open head's write offset, IV and running MAC after
    /// a reboot.
    fn recover_head(&self, st: &mut FifoState) -> Result<(), FifoError> {
        let header = self.read_header(st.head)?;
        st.head_iv = header.iv;
        st.write_offset =
            header.high_water(self.granule).min(self.data_size);
        let mut mac = self.mac_begin();
        if st.write_offset > 0 {
            let mut data = vec![0u8; st.write_offset];
            self.flash
                .read(self.data_addr(st.head), &mut data)
                .map_err(|_| FifoError::Failed)?;
            xor_keystream(
                &self.keys.keystream,
                &header.iv,
                0,
                &mut data,
            );
            mac.update(&data);
        }
        st.mac_state = Some(mac);
        Ok(())
    }

    fn mac_begin(&self) -> Mac128 {
        // A 16-byte key always fits BLAKE2s's 32-byte key bound.
        KeyInit::new_from_slice(&self.keys.mac).expect("mac key size")
    }

    /// Turns an erased block at `pos` into the new head. `pos + 1` must
    /// also be erased, preserving the at-least-one-erased invariant.
    fn prepare_head(
        &self,
        st: &mut FifoState,
        pos: u32,
    ) -> Result<(), FifoError> {
        if self.read_header(pos + 1)?.magic.get() != MAGIC_ERASED {
            return Err(FifoError::Full);
        }
        if self.read_header(pos)?.magic.get() != MAGIC_ERASED {
            return Err(FifoError::Full);
        }
        let mut header = BlockHeader::erased();
        header.magic = U32::new(MAGIC_HEAD);
        self.rng
            .fill(&mut header.iv)
            .map_err(|_| FifoError::Failed)?;
        self.write_header(pos, &header)?;
        st.head_iv = header.iv;
        Ok(())
    }

    /// Closes the current head: seals the MAC and moves the magic one
    /// step down the 1 -> 0 ladder.
    fn close_head(&self, st: &mut FifoState) -> Result<(), FifoError> {
        let mut header = self.read_header(st.head)?;
        if header.magic.get() != MAGIC_HEAD {
            return Err(FifoError::Failed);
        }
        header.magic = U32::new(MAGIC_FIFO);
        if let Some(mac) = &st.mac_state {
            header.mac.copy_from_slice(
                &mac.clone().finalize().into_bytes(),
            );
        }
        self.write_header(st.head, &header)?;
        Ok(())
    }

    fn format(&self, st: &mut FifoState) -> Result<(), FifoError> {
        self.flash
            .erase(0, self.total)
            .map_err(|_| FifoError::Failed)?;
        st.tail = 0;
        st.last = 0;
        st.head = 0;
        st.write_offset = 0;
        st.mac_state = Some(self.mac_begin());
        st.read = None;
        self.prepare_head(st, 0)?;
        st.head_open = true;
        Ok(())
    }

    fn update_bitmap(&self, st: &FifoState) -> Result<(), FifoError> {
        let mut header = self.read_header(st.head)?;
        if header.magic.get() != MAGIC_HEAD {
            return Err(FifoError::Failed);
        }
        header.mark_high_water(self.granule, st.write_offset);
        self.write_header(st.head, &header)
    }

    fn fifo_write(
        &self,
        st: &mut FifoState,
        buf: &[u8],
    ) -> Result<usize, FifoError> {
        let mut written = 0;
        while written < buf.len() {
            if !st.head_open {
                match self.prepare_head(st, st.head + 1) {
                    Ok(()) => {
                        st.head += 1;
                        st.head_open = true;
                        st.write_offset = 0;
                        st.mac_state = Some(self.mac_begin());
                    }
                    Err(e) => {
                        return if written > 0 {
                            Ok(written)
                        } else {
                            Err(e)
                        };
                    }
                }
            }
            let block_rem = self.data_size - st.write_offset;
            if block_rem == 0 {
                self.close_head(st)?;
                st.head_open = false;
                continue;
            }
            // Stay within one page per programming operation.
            let page_rem =
                self.page_size - (st.write_offset % self.page_size);
            let chunk = (buf.len() - written)
                .min(block_rem)
                .min(page_rem);

            let plain = &buf[written..written + chunk];
            let mut cipher = plain.to_vec();
            xor_keystream(
                &self.keys.keystream,
                &st.head_iv,
                st.write_offset,
                &mut cipher,
            );
            self.flash
                .write(
                    self.data_addr(st.head) + st.write_offset,
                    &cipher,
                )
                .map_err(|_| FifoError::Failed)?;
            if let Some(mac) = &mut st.mac_state {
                mac.update(plain);
            }
            st.write_offset += chunk;
            written += chunk;
            self.update_bitmap(st)?;
        }
        Ok(written)
    }

    /// Loads and decrypts one block's used data region into the read
    /// cache, verifying the MAC of closed blocks.
    fn fill_cache(
        &self,
        st: &mut FifoState,
        block: u32,
        limit: usize,
        verify: bool,
    ) -> Result<(), FifoError> {
        let header = self.read_header(block)?;
        let cur = st.read.as_mut().ok_or(FifoError::Failed)?;
        cur.cache.clear();
        cur.cache.resize(limit, 0);
        self.flash
            .read(self.data_addr(block), &mut cur.cache)
            .map_err(|_| FifoError::Failed)?;
        xor_keystream(
            &self.keys.keystream,
            &header.iv,
            0,
            &mut cur.cache,
        );
        if verify {
            let mut mac = self.mac_begin();
            mac.update(&cur.cache);
            let computed = mac.finalize().into_bytes();
            if computed.as_slice() != &header.mac[..] {
                error!(
                    target: LOG,
                    "MAC mismatch in block {}",
                    block % self.blocks
                );
                cur.cache.zeroize();
                cur.cache_block = None;
                return Err(FifoError::Failed);
            }
        }
        cur.cache_block = Some(block);
        Ok(())
    }

    fn fifo_read(
        &self,
        st: &mut FifoState,
        out: &mut [u8],
    ) -> Result<usize, FifoError> {
        let mut total = 0;
        while total < out.len() {
            let Some(cur) = st.read.as_ref() else {
                return Err(FifoError::Failed);
            };
            let block = cur.block;
            let offset = cur.offset;

            if block > st.head {
                break;
            }
            let at_open_head = block == st.head && st.head_open;
            let limit = if at_open_head {
                st.write_offset
            } else {
                let header = self.read_header(block)?;
                if header.magic.get() != MAGIC_FIFO
                    && header.magic.get() != MAGIC_HEAD
                {
                    break;
                }
                header.high_water(self.granule).min(self.data_size)
            };

            if offset >= limit {
                if block >= st.head {
                    break;
                }
                let cur = st.read.as_mut().ok_or(FifoError::Failed)?;
                cur.block += 1;
                cur.offset = 0;
                cur.cache_block = None;
                continue;
            }

            // The open head grows between reads; refresh a cache that
            // no longer covers the current high-water mark.
            if st.read.as_ref().is_some_and(|c| {
                c.cache_block != Some(block) || c.cache.len() < limit
            }) {
                self.fill_cache(st, block, limit, !at_open_head)?;
            }
            let cur = st.read.as_mut().ok_or(FifoError::Failed)?;
            let n = (out.len() - total).min(limit - cur.offset);
            out[total..total + n].copy_from_slice(
                &cur.cache[cur.offset..cur.offset + n],
            );
            cur.offset += n;
            total += n;
        }
        if total == 0 {
            Err(FifoError::Empty)
        } else {
            Ok(total)
        }
    }

    /// Consumes the oldest data block: `fifo` becomes `tail`.
    fn remove_oldest(
        &self,
        st: &mut FifoState,
    ) -> Result<(), FifoError> {
        let mut header = self.read_header(st.last)?;
        if header.magic.get() != MAGIC_FIFO {
            // Nothing consumable yet.
            return Err(FifoError::Failed);
        }
        header.magic = U32::new(MAGIC_TAIL);
        self.write_header(st.last, &header)?;
        st.last += 1;
        Ok(())
    }

    /// Erases one consumed block, reclaiming physical space. The tail
    /// does not advance on failure; the next pass retries.
    pub fn gc_single(&self) -> Result<(), FifoError> {
        let mut st = self.state.lock().unwrap();
        let header = self.read_header(st.tail)?;
        if header.magic.get() != MAGIC_TAIL {
            return Err(FifoError::Failed);
        }
        if self
            .flash
            .erase(self.header_addr(st.tail), self.block_size)
            .is_err()
        {
            warn!(target: LOG, "GC erase failed, will retry");
            return Err(FifoError::Failed);
        }
        st.tail += 1;
        Ok(())
    }

    pub fn stats(&self) -> Result<FifoStats, FifoError> {
        let mut stats = FifoStats::default();
        for pos in 0..self.blocks {
            match self.read_header(pos)?.magic.get() {
                MAGIC_ERASED => stats.erased += 1,
                MAGIC_HEAD => stats.head += 1,
                MAGIC_FIFO => stats.fifo += 1,
                MAGIC_TAIL => stats.tail += 1,
                _ => stats.invalid += 1,
            }
        }
        Ok(stats)
    }
}

/// XORs `buf` (located at `offset` within the data region) with the
/// block keystream: chunk `i` of 16 bytes is BLAKE2s-128 keyed with the
/// keystream key over `IV || i`.
fn xor_keystream(
    key: &[u8; KEY_SIZE],
    iv: &[u8; KEY_SIZE],
    offset: usize,
    buf: &mut [u8],
) {
    let mut pos = offset;
    let mut consumed = 0;
    while consumed < buf.len() {
        let chunk_index = (pos / KEY_SIZE) as u32;
        let within = pos % KEY_SIZE;
        let mut mac: Mac128 =
            KeyInit::new_from_slice(key).expect("keystream key size");
        mac.update(iv);
        mac.update(&chunk_index.to_be_bytes());
        let ks = mac.finalize().into_bytes();
        let take = (KEY_SIZE - within).min(buf.len() - consumed);
        for i in 0..take {
            buf[consumed + i] ^= ks[within + i];
        }
        pos += take;
        consumed += take;
    }
}

impl Fs for FlashFifo {
    fn open(&self, path: &str, mode: FsMode) -> Result<File, FsError> {
        if path != "fifo" {
            return Err(FsError::Failed);
        }
        let mut st = self.state.lock().unwrap();
        if mode == FsMode::READONLY {
            st.read = Some(ReadCursor {
                block: st.last,
                offset: 0,
                cache: Vec::new(),
                cache_block: None,
            });
            return Ok(FILE_READING);
        }
        if mode == FsMode::WRITEONLY {
            return Ok(FILE_WRITING);
        }
        Err(FsError::Failed)
    }

    fn close(&self, f: File) -> Result<(), FsError> {
        if f != FILE_READING && f != FILE_WRITING {
            return Err(FsError::BadArg);
        }
        if f == FILE_READING {
            self.state.lock().unwrap().read = None;
        }
        Ok(())
    }

    fn read(&self, f: File, buf: &mut [u8]) -> Result<usize, FsError> {
        if f != FILE_READING {
            return Err(FsError::NotOpened);
        }
        let mut st = self.state.lock().unwrap();
        if st.read.is_none() {
            return Err(FsError::NotOpened);
        }
        Ok(self.fifo_read(&mut st, buf)?)
    }

    fn write(&self, f: File, buf: &[u8]) -> Result<usize, FsError> {
        if f != FILE_WRITING {
            return Err(FsError::NotOpened);
        }
        let mut st = self.state.lock().unwrap();
        Ok(self.fifo_write(&mut st, buf)?)
    }

    fn remove(&self, path: &str) -> Result<(), FsError> {
        if path != "fifo" {
            return Err(FsError::Failed);
        }
        let mut st = self.state.lock().unwrap();
        Ok(self.remove_oldest(&mut st)?)
    }

    fn info(&self) -> Result<FsInfo, FsError> {
        let st = self.state.lock().unwrap();
        Ok(FsInfo {
            size_total: self.blocks as usize * self.data_size,
            size_used: (st.head - st.tail) as usize * self.data_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_mem_flash::MemFlash;
    use iface::rng::RngError;
    use std::sync::atomic::{AtomicU64, Ordering};

    const KIB: usize = 1024;

    struct XorShiftRng(AtomicU64);

    impl Rng for XorShiftRng {
        fn fill(&self, buf: &mut [u8]) -> Result<(), RngError> {
            for byte in buf {
                let mut x = self.0.load(Ordering::Relaxed);
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                self.0.store(x, Ordering::Relaxed);
                *byte = x as u8;
            }
            Ok(())
        }
    }

    fn rng() -> &'static XorShiftRng {
        Box::leak(Box::new(XorShiftRng(AtomicU64::new(0x1234_5678))))
    }

    fn keys() -> FifoKeys {
        FifoKeys {
            keystream: *b"0123456789abcdef",
            mac: *b"fedcba9876543210",
        }
    }

    fn flash_1mib() -> &'static MemFlash {
        Box::leak(Box::new(MemFlash::new(1024 * KIB, 4 * KIB, 256)))
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn write_all(fifo: &FlashFifo, data: &[u8]) -> usize {
        let f = fifo.open("fifo", FsMode::WRITEONLY).unwrap();
        let mut written = 0;
        while written < data.len() {
            match fifo.write(f, &data[written..]) {
                Ok(n) => written += n,
                Err(FsError::Full) => break,
                Err(e) => panic!("write failed: {e:?}"),
            }
        }
        fifo.close(f).unwrap();
        written
    }

    fn read_all(fifo: &FlashFifo) -> Vec<u8> {
        let f = fifo.open("fifo", FsMode::READONLY).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 1000];
        loop {
            match fifo.read(f, &mut buf) {
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(FsError::Empty) => break,
                Err(e) => panic!("read failed: {e:?}"),
            }
        }
        fifo.close(f).unwrap();
        out
    }

    #[test]
    fn write_read_round_trip() {
        let flash = flash_1mib();
        let fifo = FlashFifo::new(flash, rng(), keys()).unwrap();
        let data = pattern(10_000);
        assert_eq!(write_all(&fifo, &data), data.len());
        assert_eq!(read_all(&fifo), data);
    }

    #[test]
    fn data_is_encrypted_at_rest() {
        let flash = flash_1mib();
        let fifo = FlashFifo::new(flash, rng(), keys()).unwrap();
        let data = vec![0x41u8; 256];
        assert_eq!(write_all(&fifo, &data), 256);
        // Block 0 data region starts after the header page.
        let raw = flash.snapshot(256, 256);
        assert_ne!(raw, data);
        let matching = raw.iter().filter(|&&b| b == 0x41).count();
        assert!(matching < 64, "{matching} plaintext bytes leaked");
    }

    #[test]
    fn reboot_recovers_cursor_and_data() {
        let flash = flash_1mib();
        let mut data = Vec::new();
        {
            let fifo = FlashFifo::new(flash, rng(), keys()).unwrap();
            // 512 KiB in 50_000-byte chunks.
            let chunks = pattern(524_288);
            assert_eq!(write_all(&fifo, &chunks), chunks.len());
            data.extend_from_slice(&chunks);
        }

        // "Reboot": a fresh service instance over the same storage.
        let fifo = FlashFifo::new(flash, rng(), keys()).unwrap();
        assert_eq!(read_all(&fifo), data);

        // The recovered head accepts further appends, and the MAC
        // sealed over a block written across the reboot still checks.
        let more = pattern(8_000);
        assert_eq!(write_all(&fifo, &more), more.len());
        data.extend_from_slice(&more);
        assert_eq!(read_all(&fifo), data);
    }

    #[test]
    fn full_volume_write_read_totals_match() {
        // The log lives in a 1 MiB volume of a larger device.
        let pv: &'static MemFlash = Box::leak(Box::new(MemFlash::new(
            2048 * KIB,
            4 * KIB,
            256,
        )));
        let volumes = drv_flash_vol::FlashVolumes::new(pv);
        let flash =
            volumes.create("log", 512 * KIB, 1024 * KIB).unwrap();
        let fifo = FlashFifo::new(flash, rng(), keys()).unwrap();

        let chunk = pattern(50_000);
        let f = fifo.open("fifo", FsMode::WRITEONLY).unwrap();
        let mut total_written = 0usize;
        'outer: for _ in 0..130 {
            let mut off = 0;
            while off < chunk.len() {
                match fifo.write(f, &chunk[off..]) {
                    Ok(n) => {
                        off += n;
                        total_written += n;
                    }
                    Err(FsError::Full) => break 'outer,
                    Err(e) => panic!("write failed: {e:?}"),
                }
            }
        }
        fifo.close(f).unwrap();
        assert!(total_written > 900 * KIB);

        // The structural invariant survives a full device.
        let stats = fifo.stats().unwrap();
        assert!(stats.erased >= 1);
        assert_eq!(stats.invalid, 0);

        let replay = read_all(&fifo);
        assert_eq!(replay.len(), total_written);
    }

    #[test]
    fn remove_and_gc_reclaim_blocks() {
        let flash = flash_1mib();
        let fifo = FlashFifo::new(flash, rng(), keys()).unwrap();
        // Enough to close two blocks.
        let data = pattern(9_000);
        assert_eq!(write_all(&fifo, &data), data.len());

        let before = fifo.stats().unwrap();
        assert_eq!(before.tail, 0);

        fifo.remove("fifo").unwrap();
        let mid = fifo.stats().unwrap();
        assert_eq!(mid.tail, 1);

        fifo.gc_single().unwrap();
        let after = fifo.stats().unwrap();
        assert_eq!(after.tail, 0);
        assert_eq!(after.erased, before.erased + 1);

        // Nothing consumable left to collect.
        assert_eq!(fifo.gc_single(), Err(FifoError::Failed));
    }

    #[test]
    fn mac_mismatch_fails_the_read() {
        let flash = flash_1mib();
        let fifo = FlashFifo::new(flash, rng(), keys()).unwrap();
        // Closes block 0 (data region 3840 bytes) and spills into the
        // next head.
        let data = pattern(4_000);
        assert_eq!(write_all(&fifo, &data), data.len());

        // Flip ciphertext bits in block 0's data region.
        flash.write(256 + 100, &[0u8; 16]).unwrap();

        let f = fifo.open("fifo", FsMode::READONLY).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(fifo.read(f, &mut buf), Err(FsError::Failed));
        fifo.close(f).unwrap();
    }

    #[test]
    fn open_rejects_other_names_and_modes() {
        let flash = flash_1mib();
        let fifo = FlashFifo::new(flash, rng(), keys()).unwrap();
        assert!(fifo.open("log", FsMode::READONLY).is_err());
        assert!(fifo
            .open("fifo", FsMode::READWRITE | FsMode::CREATE)
            .is_err());
        // Unsupported surface answers NotImplemented, not a crash.
        assert_eq!(
            fifo.rename("fifo", "x"),
            Err(FsError::NotImplemented),
        );
    }

    #[test]
    fn info_tracks_usage() {
        let flash = flash_1mib();
        let fifo = FlashFifo::new(flash, rng(), keys()).unwrap();
        let info0 = fifo.info().unwrap();
        assert_eq!(info0.size_total, 256 * (4096 - 256));

        let data = pattern(40_000);
        assert_eq!(write_all(&fifo, &data), data.len());
        let info1 = fifo.info().unwrap();
        assert!(info1.size_used >= 40_000 - (4096 - 256));
    }
}
