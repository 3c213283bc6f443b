// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Continuous multi-channel sample sources (ADC front-ends).
//!
//! A waveform source produces frames of channel-interleaved samples at
//! a fixed rate and native dtype. Consumers size their reads in
//! *samples*; one sample spans `channels` consecutive elements.

use ndbuf::Dtype;
use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum WaveformError {
    Failed = 1,
    BadArg,
    Timeout,
    NotImplemented,
}

pub trait WaveformSource: Send + Sync {
    /// Starts the acquisition; data accumulates in the source's own
    /// buffer until read.
    fn start(&self) -> Result<(), WaveformError>;

    fn stop(&self) -> Result<(), WaveformError>;

    /// Reads up to `max_samples` interleaved samples into `buf` and
    /// returns how many were actually available. `buf` must hold
    /// `max_samples * channels` elements of the native dtype.
    fn read(
        &self,
        buf: &mut [u8],
        max_samples: usize,
    ) -> Result<usize, WaveformError>;

    /// Native element dtype and channel count.
    fn get_format(&self) -> Result<(Dtype, usize), WaveformError>;

    fn sample_rate(&self) -> Result<u32, WaveformError>;

    fn set_sample_rate(&self, _hz: u32) -> Result<(), WaveformError> {
        Err(WaveformError::NotImplemented)
    }
}
