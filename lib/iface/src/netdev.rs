// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Link-layer frame interface for packet radios and similar MACs.

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum NetDevError {
    Failed = 1,
    Timeout,
    BadArg,
}

/// Reception metadata for a single frame.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PacketInfo {
    pub rssi_dbm: f32,
    pub freq_error_hz: i32,
}

pub trait NetDev: Send + Sync {
    fn send(&self, frame: &[u8]) -> Result<(), NetDevError>;

    /// Blocks for the next frame, returning its length and metadata.
    fn receive(
        &self,
        frame: &mut [u8],
    ) -> Result<(usize, PacketInfo), NetDevError>;
}
