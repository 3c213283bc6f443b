// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte stream interface (USARTs, logged consoles, socket-like pipes).

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum StreamError {
    Failed = 1,
    Timeout,
    /// End of stream; no further data will ever arrive.
    Eof,
    NotImplemented,
}

pub trait Stream: Send + Sync {
    /// Blocking read; returns the number of bytes placed in `buf`
    /// (at least one).
    fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Read with a bound on the wait. `Timeout` carries no data.
    fn read_timeout(
        &self,
        _buf: &mut [u8],
        _timeout_ms: u32,
    ) -> Result<usize, StreamError> {
        Err(StreamError::NotImplemented)
    }

    /// Blocking write; short writes are permitted.
    fn write(&self, buf: &[u8]) -> Result<usize, StreamError>;

    fn write_timeout(
        &self,
        _buf: &[u8],
        _timeout_ms: u32,
    ) -> Result<usize, StreamError> {
        Err(StreamError::NotImplemented)
    }
}
