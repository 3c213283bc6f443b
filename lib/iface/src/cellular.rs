// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cellular modem control interface.

use num_derive::FromPrimitive;

pub const CELLULAR_IMEI_LEN: usize = 16;
pub const CELLULAR_OPERATOR_LEN: usize = 32;
pub const CELLULAR_USSD_LEN: usize = 128;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum CellularError {
    Failed = 1,
    BadArg,
    Timeout,
    NotImplemented,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum CellularStatus {
    NotRegistered = 0,
    Searching,
    Registered,
    Roaming,
}

pub trait Cellular: Send + Sync {
    fn start(&self) -> Result<(), CellularError>;

    fn stop(&self) -> Result<(), CellularError>;

    fn imei(
        &self,
    ) -> Result<heapless::String<CELLULAR_IMEI_LEN>, CellularError>;

    fn status(&self) -> Result<CellularStatus, CellularError>;

    fn operator(
        &self,
    ) -> Result<heapless::String<CELLULAR_OPERATOR_LEN>, CellularError> {
        Err(CellularError::NotImplemented)
    }

    /// Runs an USSD request and returns the network's response.
    fn run_ussd(
        &self,
        _request: &str,
    ) -> Result<heapless::String<CELLULAR_USSD_LEN>, CellularError> {
        Err(CellularError::NotImplemented)
    }
}
