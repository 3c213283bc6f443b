// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability interfaces exposed by drivers and services.
//!
//! Every driver publishes its functionality as one or more of the trait
//! objects defined here; consumers discover them through the service
//! locator and call them without knowing the implementing type. Each kind
//! comes with its own small error enum returned by value — there are no
//! panicking paths in the contracts.
//!
//! An operation a driver does not support is a default trait method
//! returning the kind's `NotImplemented` error, so probing an optional
//! capability is an ordinary call, never a crash.
//!
//! All trait objects are `Send + Sync`: interfaces are registered once at
//! boot and then shared freely between service tasks.

pub mod adc;
pub mod blockdev;
pub mod cellular;
pub mod clock;
pub mod flash;
pub mod fs;
pub mod i2c;
pub mod mq;
pub mod mux;
pub mod netdev;
pub mod power;
pub mod rng;
pub mod rtc;
pub mod sensor;
pub mod spi;
pub mod stream;
pub mod tcpip;
pub mod uxb;
pub mod waveform;

/// Wall-clock or monotonic instant carried alongside every published
/// sample. An all-zero value means "no valid time was available".
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Timespec {
    pub sec: u64,
    pub nsec: u32,
}

impl Timespec {
    pub const ZERO: Timespec = Timespec { sec: 0, nsec: 0 };

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}
