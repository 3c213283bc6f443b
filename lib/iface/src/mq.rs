// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message queue interface.
//!
//! The broker behind [`Mq`] carries `(topic, array, timestamp)` messages
//! from publishers to subscribers. Topics are `/`-separated strings;
//! subscription filters use MQTT-style wildcards (`+` one level, `#` the
//! trailing remainder). Delivery is a synchronous rendezvous: `publish`
//! returns once every matching subscriber has either consumed the message
//! or run out of its wait budget, and the broker never retains a copy.
//!
//! A receiver owns the storage it receives into: `receive` adopts the
//! incoming dtype and appends the payload into the caller's array, so the
//! data remains valid after the publisher moves on.

use crate::Timespec;
use ndbuf::NdArray;
use num_derive::FromPrimitive;

/// Topics and filters longer than this are rejected; received topics
/// are truncated to fit.
pub const TOPIC_LEN_MAX: usize = 64;

pub type Topic = heapless::String<TOPIC_LEN_MAX>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum MqError {
    Failed = 1,
    Timeout,
    BadArg,
    Null,
    NotImplemented,
    NotOpened,
}

/// Broker handle; one per process, registered in the service locator.
pub trait Mq: Send + Sync {
    /// Allocates a new client endpoint bound to this broker.
    fn open(&self) -> Result<Box<dyn MqClient>, MqError>;
}

pub trait MqClient: Send {
    /// Replaces the client's (single) topic filter.
    fn subscribe(&self, filter: &str) -> Result<(), MqError>;

    /// Clears the filter; the argument is accepted for symmetry.
    fn unsubscribe(&self, filter: &str) -> Result<(), MqError>;

    fn publish(
        &self,
        topic: &str,
        array: &NdArray<'_>,
        ts: &Timespec,
    ) -> Result<(), MqError>;

    /// Waits up to the configured timeout for a matching message,
    /// then copies topic, timestamp and payload into caller storage.
    fn receive(
        &self,
        topic: &mut Topic,
        array: &mut NdArray<'_>,
        ts: &mut Timespec,
    ) -> Result<(), MqError>;

    /// Receive timeout; also bounds how long this client's publications
    /// wait on an unresponsive subscriber.
    fn set_timeout(&self, timeout_ms: u32) -> Result<(), MqError>;

    fn close(&self) -> Result<(), MqError>;
}
