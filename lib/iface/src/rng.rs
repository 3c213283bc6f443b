// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum RngError {
    Failed = 1,
}

/// Entropy source.
pub trait Rng: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<(), RngError>;
}
