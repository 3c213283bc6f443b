// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic sensor poller.
//!
//! Reads a [`Sensor`] every `period_ms` and publishes the value as a
//! length-1 float array on a fixed topic. A cycle is skipped when the
//! configured clock fails to produce a timestamp or the sensor read
//! fails; the task keeps going either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use iface::clock::Clock;
use iface::mq::{Mq, MqClient, Topic, TOPIC_LEN_MAX};
use iface::sensor::Sensor;
use iface::Timespec;
use log::{error, info};
use ndbuf::{Dtype, NdArray};
use osal::Task;

const LOG: &str = "sensor-source";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SensorSourceError {
    Failed,
    BadArg,
    NotRunning,
    AlreadyRunning,
}

struct Flags {
    can_run: AtomicBool,
    running: AtomicBool,
}

pub struct SensorSource {
    sensor: &'static dyn Sensor,
    mq: &'static dyn Mq,
    clock: Option<&'static dyn Clock>,
    topic: Topic,
    period_ms: u32,
    worker: Option<(Arc<Flags>, Task)>,
}

impl SensorSource {
    pub fn new(
        sensor: &'static dyn Sensor,
        topic: &str,
        mq: &'static dyn Mq,
        clock: Option<&'static dyn Clock>,
        period_ms: u32,
    ) -> Result<SensorSource, SensorSourceError> {
        if topic.is_empty() || topic.len() > TOPIC_LEN_MAX {
            return Err(SensorSourceError::BadArg);
        }
        let mut t = Topic::new();
        t.push_str(topic).map_err(|_| SensorSourceError::BadArg)?;
        Ok(SensorSource {
            sensor,
            mq,
            clock,
            topic: t,
            period_ms: period_ms.max(1),
            worker: None,
        })
    }

    pub fn start(&mut self) -> Result<(), SensorSourceError> {
        if self.worker.is_some() {
            return Err(SensorSourceError::AlreadyRunning);
        }
        let client =
            self.mq.open().map_err(|_| SensorSourceError::Failed)?;
        let flags = Arc::new(Flags {
            can_run: AtomicBool::new(true),
            running: AtomicBool::new(false),
        });

        let sensor = self.sensor;
        let clock = self.clock;
        let topic = self.topic.clone();
        let period_ms = self.period_ms;
        let task_flags = Arc::clone(&flags);
        let task = Task::spawn("sensor-source", 1, move || {
            poll_loop(sensor, clock, client, topic, period_ms, task_flags)
        })
        .map_err(|_| {
            error!(target: LOG, "cannot create task");
            SensorSourceError::Failed
        })?;

        self.worker = Some((flags, task));
        info!(
            target: LOG,
            "publishing sensor value to '{}' every {} ms",
            self.topic.as_str(),
            self.period_ms
        );
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), SensorSourceError> {
        let (flags, task) =
            self.worker.take().ok_or(SensorSourceError::NotRunning)?;
        flags.can_run.store(false, Ordering::Release);
        while flags.running.load(Ordering::Acquire) {
            osal::sleep_ms(100);
        }
        task.join();
        info!(target: LOG, "stopped");
        Ok(())
    }
}

fn poll_loop(
    sensor: &'static dyn Sensor,
    clock: Option<&'static dyn Clock>,
    client: Box<dyn MqClient>,
    topic: Topic,
    period_ms: u32,
    flags: Arc<Flags>,
) {
    flags.running.store(true, Ordering::Release);
    while flags.can_run.load(Ordering::Acquire) {
        osal::sleep_ms(period_ms);

        // No clock means a zero timestamp; a failing clock means the
        // sample cannot be placed in time, so skip the cycle.
        let ts = match clock {
            None => Timespec::ZERO,
            Some(c) => match c.get() {
                Ok(ts) => ts,
                Err(_) => continue,
            },
        };

        let value = match sensor.value_f() {
            Ok(v) => v,
            Err(_) => continue,
        };

        let raw = value.to_ne_bytes();
        if let Ok(array) = NdArray::view(Dtype::F32, 1, &raw) {
            let _ = client.publish(&topic, &array, &ts);
        }
    }
    let _ = client.close();
    flags.running.store(false, Ordering::Release);
}
