// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scalar sensor interface (temperature, humidity, rail voltage, ...).

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum SensorError {
    Failed = 1,
    Timeout,
    NotImplemented,
}

/// Human-readable description of the measured quantity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SensorInfo {
    pub quantity: &'static str,
    pub unit: &'static str,
}

pub trait Sensor: Send + Sync {
    /// Current value in the unit reported by [`Sensor::info`].
    fn value_f(&self) -> Result<f32, SensorError>;

    fn info(&self) -> Result<SensorInfo, SensorError> {
        Err(SensorError::NotImplemented)
    }
}
