// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-wide service registry.
//!
//! Drivers register their interfaces here at boot under a stable name;
//! services look their dependencies up by name, by capability tag, or
//! both, instead of being wired together at compile time. The registry
//! is append-only: nothing is ever removed, lookups are cheap list
//! scans, and iteration order is insertion order.
//!
//! Duplicate names are allowed — the first registration wins name
//! lookups, while every entry of a tag remains reachable through
//! [`ServiceLocator::query_type_id`]. Registering the *same* interface
//! twice is a caller bug and is not defended against.
//!
//! There is one locator in the system, created during early startup
//! before any driver registers, and handed to modules by reference.

use std::sync::Mutex;

use iface::adc::Adc;
use iface::blockdev::BlockDev;
use iface::cellular::Cellular;
use iface::clock::Clock;
use iface::flash::Flash;
use iface::fs::Fs;
use iface::i2c::I2cBus;
use iface::mq::Mq;
use iface::mux::Mux;
use iface::netdev::NetDev;
use iface::power::Power;
use iface::rng::Rng;
use iface::rtc::Rtc;
use iface::sensor::Sensor;
use iface::spi::SpiDev;
use iface::stream::Stream;
use iface::tcpip::TcpIp;
use iface::uxb::UxbDevice;
use iface::waveform::WaveformSource;

/// The closed set of capability tags a service can be registered under.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServiceTag {
    Adc,
    BlockDev,
    Cellular,
    Clock,
    Flash,
    Fs,
    I2cBus,
    Mq,
    Mux,
    NetDev,
    Power,
    Rng,
    Rtc,
    Sensor,
    SpiDev,
    Stream,
    TcpIp,
    UxbDevice,
    WaveformSource,
}

/// A type-tagged reference to a registered interface. Interfaces live
/// for the life of the process (drivers are constructed once at boot),
/// so entries are plain `'static` references.
#[derive(Copy, Clone)]
pub enum ServiceRef {
    Adc(&'static dyn Adc),
    BlockDev(&'static dyn BlockDev),
    Cellular(&'static dyn Cellular),
    Clock(&'static dyn Clock),
    Flash(&'static dyn Flash),
    Fs(&'static dyn Fs),
    I2cBus(&'static dyn I2cBus),
    Mq(&'static dyn Mq),
    Mux(&'static dyn Mux),
    NetDev(&'static dyn NetDev),
    Power(&'static dyn Power),
    Rng(&'static dyn Rng),
    Rtc(&'static dyn Rtc),
    Sensor(&'static dyn Sensor),
    SpiDev(&'static dyn SpiDev),
    Stream(&'static dyn Stream),
    TcpIp(&'static dyn TcpIp),
    UxbDevice(&'static dyn UxbDevice),
    WaveformSource(&'static dyn WaveformSource),
}

impl ServiceRef {
    pub fn tag(&self) -> ServiceTag {
        match self {
            ServiceRef::Adc(_) => ServiceTag::Adc,
            ServiceRef::BlockDev(_) => ServiceTag::BlockDev,
            ServiceRef::Cellular(_) => ServiceTag::Cellular,
            ServiceRef::Clock(_) => ServiceTag::Clock,
            ServiceRef::Flash(_) => ServiceTag::Flash,
            ServiceRef::Fs(_) => ServiceTag::Fs,
            ServiceRef::I2cBus(_) => ServiceTag::I2cBus,
            ServiceRef::Mq(_) => ServiceTag::Mq,
            ServiceRef::Mux(_) => ServiceTag::Mux,
            ServiceRef::NetDev(_) => ServiceTag::NetDev,
            ServiceRef::Power(_) => ServiceTag::Power,
            ServiceRef::Rng(_) => ServiceTag::Rng,
            ServiceRef::Rtc(_) => ServiceTag::Rtc,
            ServiceRef::Sensor(_) => ServiceTag::Sensor,
            ServiceRef::SpiDev(_) => ServiceTag::SpiDev,
            ServiceRef::Stream(_) => ServiceTag::Stream,
            ServiceRef::TcpIp(_) => ServiceTag::TcpIp,
            ServiceRef::UxbDevice(_) => ServiceTag::UxbDevice,
            ServiceRef::WaveformSource(_) => ServiceTag::WaveformSource,
        }
    }

    /// Data-pointer identity, used for reverse lookups. Two refs are
    /// the same service iff they point at the same implementor.
    fn data_ptr(&self) -> *const () {
        match self {
            ServiceRef::Adc(r) => *r as *const dyn Adc as *const (),
            ServiceRef::BlockDev(r) => {
                *r as *const dyn BlockDev as *const ()
            }
            ServiceRef::Cellular(r) => {
                *r as *const dyn Cellular as *const ()
            }
            ServiceRef::Clock(r) => *r as *const dyn Clock as *const (),
            ServiceRef::Flash(r) => *r as *const dyn Flash as *const (),
            ServiceRef::Fs(r) => *r as *const dyn Fs as *const (),
            ServiceRef::I2cBus(r) => *r as *const dyn I2cBus as *const (),
            ServiceRef::Mq(r) => *r as *const dyn Mq as *const (),
            ServiceRef::Mux(r) => *r as *const dyn Mux as *const (),
            ServiceRef::NetDev(r) => *r as *const dyn NetDev as *const (),
            ServiceRef::Power(r) => *r as *const dyn Power as *const (),
            ServiceRef::Rng(r) => *r as *const dyn Rng as *const (),
            ServiceRef::Rtc(r) => *r as *const dyn Rtc as *const (),
            ServiceRef::Sensor(r) => *r as *const dyn Sensor as *const (),
            ServiceRef::SpiDev(r) => *r as *const dyn SpiDev as *const (),
            ServiceRef::Stream(r) => *r as *const dyn Stream as *const (),
            ServiceRef::TcpIp(r) => *r as *const dyn TcpIp as *const (),
            ServiceRef::UxbDevice(r) => {
                *r as *const dyn UxbDevice as *const ()
            }
            ServiceRef::WaveformSource(r) => {
                *r as *const dyn WaveformSource as *const ()
            }
        }
    }

    pub fn same_service(&self, other: &ServiceRef) -> bool {
        std::ptr::eq(self.data_ptr(), other.data_ptr())
    }
}

struct Entry {
    name: &'static str,
    service: ServiceRef,
}

#[derive(Default)]
pub struct ServiceLocator {
    entries: Mutex<Vec<Entry>>,
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a registration. Never fails; duplicate names are
    /// permitted (first one wins name lookups).
    pub fn add(&self, name: &'static str, service: ServiceRef) {
        self.entries.lock().unwrap().push(Entry { name, service });
    }

    /// First entry registered under `name`.
    pub fn query_name(&self, name: &str) -> Option<ServiceRef> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.service)
    }

    /// The `index`-th entry carrying `tag`, in registration order.
    pub fn query_type_id(
        &self,
        tag: ServiceTag,
        index: usize,
    ) -> Option<ServiceRef> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.service.tag() == tag)
            .nth(index)
            .map(|e| e.service)
    }

    /// First entry matching both `name` and `tag`.
    pub fn query_name_type(
        &self,
        name: &str,
        tag: ServiceTag,
    ) -> Option<ServiceRef> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.name == name && e.service.tag() == tag)
            .map(|e| e.service)
    }

    /// Reverse lookup: the name `service` was registered under.
    pub fn get_name(&self, service: &ServiceRef) -> Option<&'static str> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.service.same_service(service))
            .map(|e| e.name)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of `(name, tag)` pairs in registration order, for
    /// status listings.
    pub fn enumerate(&self) -> Vec<(&'static str, ServiceTag)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.name, e.service.tag()))
            .collect()
    }
}
