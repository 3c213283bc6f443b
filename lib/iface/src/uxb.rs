// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Extension-bus interfaces.
//!
//! The bus carries frame-groups: a run of control frames that builds up
//! a set of selected devices, optionally followed by one data transfer
//! addressed to a numbered slot of the first selected device. Devices
//! and slots surface here as interface handles; the frame codec lives in
//! its own crate.

use num_derive::FromPrimitive;

pub const UXB_ADDRESS_LEN: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UxbError {
    Failed = 1,
    Timeout,
    /// Data phase arrived with no device selected.
    NoSelect,
    /// The addressed slot does not exist on the selected device.
    UnknownSlot,
    /// The slot has no buffer, or the buffer is too small.
    InvalidBuffer,
    UnknownFrameType,
    NotImplemented,
}

/// Master-side bus access: run one selection round, then talk to the
/// selected device.
pub trait UxbBus: Send + Sync {
    /// Selects exactly the device with `addr` (a SEL_SINGLE round).
    fn select_single(
        &self,
        addr: &[u8; UXB_ADDRESS_LEN],
    ) -> Result<(), UxbError>;

    /// Runs an ASSERT_ID round and samples the shared ID line; true
    /// means at least one selected device answered.
    fn assert_id(&self) -> Result<bool, UxbError>;
}

pub trait UxbDevice: Send + Sync {
    fn address(&self) -> [u8; UXB_ADDRESS_LEN];
}

pub trait UxbSlot: Send + Sync {
    fn slot_number(&self) -> u8;

    /// Sends a data frame to this slot of the (already selected) peer.
    fn send(
        &self,
        buf: &[u8],
        response_expected: bool,
    ) -> Result<(), UxbError>;

    /// Blocks for the next data frame addressed to this slot.
    fn receive(&self, buf: &mut [u8]) -> Result<usize, UxbError>;
}
