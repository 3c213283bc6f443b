// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum MuxError {
    Failed = 1,
    BadArg,
}

/// An analog or digital multiplexer driven by N select lines.
pub trait Mux: Send + Sync {
    fn enable(&self, on: bool) -> Result<(), MuxError>;

    /// Drives the select lines to `mask` (one bit per line).
    fn select(&self, mask: u32) -> Result<(), MuxError>;
}
