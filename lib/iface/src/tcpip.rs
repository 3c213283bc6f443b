// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TCP/IP client sockets as offered by modem and network stacks.

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum TcpIpError {
    Failed = 1,
    BadArg,
    /// No data within the wait budget; the connection is still up.
    Timeout,
    /// The peer or the link went away.
    Disconnected,
    NotImplemented,
}

/// Socket factory.
pub trait TcpIp: Send + Sync {
    fn socket(&self) -> Result<Box<dyn TcpSocket>, TcpIpError>;
}

pub trait TcpSocket: Send {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TcpIpError>;

    fn disconnect(&mut self) -> Result<(), TcpIpError>;

    /// Short writes are permitted; the caller retries the remainder.
    fn send(&mut self, buf: &[u8]) -> Result<usize, TcpIpError>;

    /// Distinguishes `Timeout` (no data yet) from `Disconnected`.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TcpIpError>;
}
