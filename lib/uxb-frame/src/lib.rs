// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Extension-bus frame-group codec.
//!
//! One bus transaction (a *frame-group*, delimited by the shared frame
//! signal) is a sequence of 12-byte control frames optionally followed by
//! a single raw data phase, and is always terminated with a NOP:
//!
//! ```text
//! [0..2]  magic 0x1234, big-endian
//! [2]     (type << 5) | (sel_and << 4)
//! [3]     reserved
//! [4..12] payload: SEL_* carry an 8-byte address,
//!         DATA carries [len: u16 BE, slot: u8, 0, crc32: u32 BE]
//! ```
//!
//! Selection frames build up the set of addressed devices for this
//! group: the combinator bit picks whether a frame's matches are OR-ed
//! into or AND-ed with the running set. The data phase that follows a
//! DATA frame goes to the addressed slot of the *first* selected device.
//!
//! This crate is the wire-level half of the bus stack: a PHY driver
//! feeds received frames into a [`UxbNode`] (typically from its bus IRQ)
//! and transmits frames built with [`ControlFrame::encode`]. The timing
//! minima the PHY must respect between transmissions are exported as
//! constants.

use crc::Crc;
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{FromBytes, IntoBytes};

pub use iface::uxb::{UxbError, UXB_ADDRESS_LEN};

pub const CONTROL_FRAME_LEN: usize = 12;
pub const CONTROL_FRAME_MAGIC: u16 = 0x1234;

/// Minimum gap between two control frames.
pub const INTER_FRAME_US: u32 = 100;
/// Minimum gap between a DATA control frame and its data phase.
pub const FRAME_TO_DATA_US: u32 = 200;
/// Minimum gap between frame-groups.
pub const INTER_GROUP_US: u32 = 300;

const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

pub type Address = [u8; UXB_ADDRESS_LEN];

#[derive(
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::KnownLayout,
    zerocopy_derive::Immutable,
    zerocopy_derive::Unaligned,
)]
#[repr(C)]
struct RawControlFrame {
    magic: U16<BigEndian>,
    ftype: u8,
    reserved: u8,
    payload: [u8; 8],
}

#[derive(
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::KnownLayout,
    zerocopy_derive::Immutable,
    zerocopy_derive::Unaligned,
)]
#[repr(C)]
struct DataPayload {
    len: U16<BigEndian>,
    slot: u8,
    reserved: u8,
    crc: U32<BigEndian>,
}

const TYPE_NOP: u8 = 0 << 5;
const TYPE_ASSERT_ID: u8 = 1 << 5;
const TYPE_SEL_SINGLE: u8 = 2 << 5;
const TYPE_SEL_FROM: u8 = 3 << 5;
const TYPE_SEL_TO: u8 = 4 << 5;
const TYPE_SEL_PREV: u8 = 5 << 5;
const TYPE_DATA: u8 = 6 << 5;
const TYPE_MASK: u8 = 0xe0;
const SEL_AND_BIT: u8 = 1 << 4;

/// A decoded control frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlFrame {
    Nop,
    AssertId,
    SelSingle { and: bool, addr: Address },
    SelFrom { and: bool, addr: Address },
    SelTo { and: bool, addr: Address },
    SelPrev { and: bool },
    Data { len: u16, slot: u8, crc: u32 },
}

impl ControlFrame {
    pub fn parse(
        raw: &[u8; CONTROL_FRAME_LEN],
    ) -> Result<ControlFrame, UxbError> {
        let frame = RawControlFrame::read_from_bytes(&raw[..])
            .map_err(|_| UxbError::UnknownFrameType)?;
        if frame.magic.get() != CONTROL_FRAME_MAGIC {
            return Err(UxbError::UnknownFrameType);
        }
        let and = frame.ftype & SEL_AND_BIT != 0;
        let mut addr = [0; UXB_ADDRESS_LEN];
        addr.copy_from_slice(&frame.payload);
        match frame.ftype & TYPE_MASK {
            TYPE_NOP => Ok(ControlFrame::Nop),
            TYPE_ASSERT_ID => Ok(ControlFrame::AssertId),
            TYPE_SEL_SINGLE => Ok(ControlFrame::SelSingle { and, addr }),
            TYPE_SEL_FROM => Ok(ControlFrame::SelFrom { and, addr }),
            TYPE_SEL_TO => Ok(ControlFrame::SelTo { and, addr }),
            TYPE_SEL_PREV => Ok(ControlFrame::SelPrev { and }),
            TYPE_DATA => {
                let d = DataPayload::read_from_bytes(&frame.payload[..])
                    .map_err(|_| UxbError::UnknownFrameType)?;
                Ok(ControlFrame::Data {
                    len: d.len.get(),
                    slot: d.slot,
                    crc: d.crc.get(),
                })
            }
            _ => Err(UxbError::UnknownFrameType),
        }
    }

    pub fn encode(&self) -> [u8; CONTROL_FRAME_LEN] {
        let (ftype, payload) = match *self {
            ControlFrame::Nop => (TYPE_NOP, [0; 8]),
            ControlFrame::AssertId => (TYPE_ASSERT_ID, [0; 8]),
            ControlFrame::SelSingle { and, addr } => {
                (TYPE_SEL_SINGLE | and_bit(and), addr)
            }
            ControlFrame::SelFrom { and, addr } => {
                (TYPE_SEL_FROM | and_bit(and), addr)
            }
            ControlFrame::SelTo { and, addr } => {
                (TYPE_SEL_TO | and_bit(and), addr)
            }
            ControlFrame::SelPrev { and } => {
                (TYPE_SEL_PREV | and_bit(and), [0; 8])
            }
            ControlFrame::Data { len, slot, crc } => {
                let d = DataPayload {
                    len: U16::new(len),
                    slot,
                    reserved: 0,
                    crc: U32::new(crc),
                };
                let mut payload = [0; 8];
                payload.copy_from_slice(d.as_bytes());
                (TYPE_DATA, payload)
            }
        };
        let frame = RawControlFrame {
            magic: U16::new(CONTROL_FRAME_MAGIC),
            ftype,
            reserved: 0,
            payload,
        };
        let mut out = [0; CONTROL_FRAME_LEN];
        out.copy_from_slice(frame.as_bytes());
        out
    }

    /// The DATA frame announcing `data`, with its CRC filled in.
    pub fn data_for(slot: u8, data: &[u8]) -> ControlFrame {
        ControlFrame::Data {
            len: data.len() as u16,
            slot,
            crc: CRC32.checksum(data),
        }
    }
}

fn and_bit(and: bool) -> u8 {
    if and {
        SEL_AND_BIT
    } else {
        0
    }
}

/// What the PHY should do after feeding one control frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    /// Keep receiving control frames.
    Continue,
    /// ASSERT_ID round; true means this node must pull the shared
    /// open-drain ID line low.
    IdAsserted(bool),
    /// A data phase of `len` bytes follows; receive it and pass it to
    /// [`UxbNode::feed_data`].
    DataExpected { len: u16 },
    /// NOP: the group is over, release the bus.
    GroupEnd,
}

struct NodeSlot {
    number: u8,
    buf: Vec<u8>,
    len: usize,
}

struct NodeDevice {
    address: Address,
    selected: bool,
    prev_selected: bool,
    slots: Vec<NodeSlot>,
}

/// Handle to a device registered on a [`UxbNode`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceId(usize);

/// Receiver-side state machine for one bus node carrying any number of
/// local device identities.
#[derive(Default)]
pub struct UxbNode {
    devices: Vec<NodeDevice>,
    in_group: bool,
    pending_data: Option<PendingData>,
}

struct PendingData {
    device: usize,
    slot: usize,
    len: u16,
    crc: u32,
}

impl UxbNode {
    pub fn new() -> UxbNode {
        UxbNode::default()
    }

    pub fn add_device(&mut self, address: Address) -> DeviceId {
        self.devices.push(NodeDevice {
            address,
            selected: false,
            prev_selected: false,
            slots: Vec::new(),
        });
        DeviceId(self.devices.len() - 1)
    }

    /// Registers slot `number` with a receive buffer of `size` bytes.
    pub fn add_slot(&mut self, device: DeviceId, number: u8, size: usize) {
        self.devices[device.0].slots.push(NodeSlot {
            number,
            buf: vec![0; size],
            len: 0,
        });
    }

    /// Data last delivered to a slot.
    pub fn slot_data(&self, device: DeviceId, number: u8) -> Option<&[u8]> {
        let slot = self.devices[device.0]
            .slots
            .iter()
            .find(|s| s.number == number)?;
        Some(&slot.buf[..slot.len])
    }

    fn begin_group(&mut self) {
        for dev in &mut self.devices {
            dev.prev_selected = dev.selected;
            dev.selected = false;
        }
        self.in_group = true;
        self.pending_data = None;
    }

    fn apply_select(&mut self, and: bool, f: impl Fn(&NodeDevice) -> bool) {
        for i in 0..self.devices.len() {
            let hit = f(&self.devices[i]);
            let dev = &mut self.devices[i];
            dev.selected = if and {
                dev.selected && hit
            } else {
                dev.selected || hit
            };
        }
    }

    /// Feeds one received control frame.
    pub fn feed_control(
        &mut self,
        raw: &[u8; CONTROL_FRAME_LEN],
    ) -> Result<FrameEvent, UxbError> {
        if !self.in_group {
            self.begin_group();
        }
        match ControlFrame::parse(raw)? {
            ControlFrame::Nop => {
                self.in_group = false;
                self.pending_data = None;
                Ok(FrameEvent::GroupEnd)
            }
            ControlFrame::AssertId => {
                Ok(FrameEvent::IdAsserted(
                    self.devices.iter().any(|d| d.selected),
                ))
            }
            ControlFrame::SelSingle { and, addr } => {
                self.apply_select(and, |d| d.address == addr);
                Ok(FrameEvent::Continue)
            }
            ControlFrame::SelFrom { and, addr } => {
                self.apply_select(and, |d| d.address >= addr);
                Ok(FrameEvent::Continue)
            }
            ControlFrame::SelTo { and, addr } => {
                self.apply_select(and, |d| d.address <= addr);
                Ok(FrameEvent::Continue)
            }
            ControlFrame::SelPrev { and } => {
                self.apply_select(and, |d| d.prev_selected);
                Ok(FrameEvent::Continue)
            }
            ControlFrame::Data { len, slot, crc } => {
                let device = self
                    .devices
                    .iter()
                    .position(|d| d.selected)
                    .ok_or(UxbError::NoSelect)?;
                let slot_idx = self.devices[device]
                    .slots
                    .iter()
                    .position(|s| s.number == slot)
                    .ok_or(UxbError::UnknownSlot)?;
                if self.devices[device].slots[slot_idx].buf.len()
                    < usize::from(len)
                {
                    return Err(UxbError::InvalidBuffer);
                }
                self.pending_data = Some(PendingData {
                    device,
                    slot: slot_idx,
                    len,
                    crc,
                });
                Ok(FrameEvent::DataExpected { len })
            }
        }
    }

    /// Feeds the data phase announced by the preceding DATA frame and
    /// returns the device and slot it was delivered to.
    pub fn feed_data(
        &mut self,
        data: &[u8],
    ) -> Result<(DeviceId, u8), UxbError> {
        let pending =
            self.pending_data.take().ok_or(UxbError::NoSelect)?;
        if data.len() != usize::from(pending.len) {
            return Err(UxbError::InvalidBuffer);
        }
        // Legacy masters transmit an all-zero CRC field; only verify a
        // real checksum.
        if pending.crc != 0 && CRC32.checksum(data) != pending.crc {
            return Err(UxbError::Failed);
        }
        let slot = &mut self.devices[pending.device].slots[pending.slot];
        slot.buf[..data.len()].copy_from_slice(data);
        slot.len = data.len();
        Ok((DeviceId(pending.device), slot.number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_round_trip() {
        let frames = [
            ControlFrame::Nop,
            ControlFrame::AssertId,
            ControlFrame::SelSingle { and: true, addr: [7; 8] },
            ControlFrame::SelFrom { and: false, addr: [1; 8] },
            ControlFrame::SelTo { and: true, addr: [0xfe; 8] },
            ControlFrame::SelPrev { and: false },
            ControlFrame::data_for(3, b"abc"),
        ];
        for f in frames {
            let raw = f.encode();
            assert_eq!(u16::from_be_bytes([raw[0], raw[1]]), 0x1234);
            assert_eq!(ControlFrame::parse(&raw), Ok(f));
        }
    }

    #[test]
    fn bad_magic_rejected() {
        let mut raw = ControlFrame::Nop.encode();
        raw[0] = 0xff;
        assert_eq!(
            ControlFrame::parse(&raw),
            Err(UxbError::UnknownFrameType),
        );
    }

    #[test]
    fn hello_group_decode() {
        let mut node = UxbNode::new();
        let dev = node.add_device([0; 8]);
        node.add_slot(dev, 2, 32);

        let sel: [u8; 12] = [
            0x12, 0x34, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];
        let data: [u8; 12] = [
            0x12, 0x34, 0xC0, 0x00, 0x00, 0x05, 0x02, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];
        assert_eq!(node.feed_control(&sel), Ok(FrameEvent::Continue));
        assert_eq!(
            node.feed_control(&data),
            Ok(FrameEvent::DataExpected { len: 5 }),
        );
        assert_eq!(node.feed_data(b"Hello"), Ok((dev, 2)));
        assert_eq!(
            node.feed_control(&ControlFrame::Nop.encode()),
            Ok(FrameEvent::GroupEnd),
        );
        assert_eq!(node.slot_data(dev, 2), Some(&b"Hello"[..]));
    }

    #[test]
    fn data_without_selection() {
        let mut node = UxbNode::new();
        let dev = node.add_device([1; 8]);
        node.add_slot(dev, 0, 8);
        let data = ControlFrame::data_for(0, b"x").encode();
        assert_eq!(node.feed_control(&data), Err(UxbError::NoSelect));
    }

    #[test]
    fn select_combinators() {
        let mut node = UxbNode::new();
        let a = node.add_device([0x10; 8]);
        let b = node.add_device([0x20; 8]);
        node.add_slot(a, 0, 8);
        node.add_slot(b, 0, 8);

        // Range [0x10.., ..=0x20] AND-narrowed to single 0x20.
        let from =
            ControlFrame::SelFrom { and: false, addr: [0x10; 8] }.encode();
        let to =
            ControlFrame::SelTo { and: true, addr: [0x20; 8] }.encode();
        let single = ControlFrame::SelSingle { and: true, addr: [0x20; 8] }
            .encode();
        node.feed_control(&from).unwrap();
        node.feed_control(&to).unwrap();
        node.feed_control(&single).unwrap();
        assert_eq!(
            node.feed_control(&ControlFrame::AssertId.encode()),
            Ok(FrameEvent::IdAsserted(true)),
        );
        // Data goes to the first *selected* device, which is b.
        let data = ControlFrame::data_for(0, b"hi").encode();
        assert_eq!(
            node.feed_control(&data),
            Ok(FrameEvent::DataExpected { len: 2 }),
        );
        assert_eq!(node.feed_data(b"hi"), Ok((b, 0)));
    }

    #[test]
    fn crc_mismatch_fails() {
        let mut node = UxbNode::new();
        let dev = node.add_device([0; 8]);
        node.add_slot(dev, 1, 8);
        node.feed_control(
            &ControlFrame::SelSingle { and: false, addr: [0; 8] }.encode(),
        )
        .unwrap();
        let bad = ControlFrame::Data { len: 2, slot: 1, crc: 0xdeadbeef }
            .encode();
        node.feed_control(&bad).unwrap();
        assert_eq!(node.feed_data(b"hi"), Err(UxbError::Failed));
    }
}
