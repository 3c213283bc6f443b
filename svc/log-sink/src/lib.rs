// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Terminal node writing received values into the system log.
//!
//! Every element of a received float array is logged as
//! `<int>.<milli>`. A message of any other dtype is a wiring mistake;
//! the node logs one error and stops itself rather than spam the log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use iface::mq::{Mq, MqClient, Topic, TOPIC_LEN_MAX};
use iface::Timespec;
use log::{error, info};
use ndbuf::{Dtype, NdArray};
use osal::Task;

const LOG: &str = "log-sink";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogSinkError {
    Failed,
    BadArg,
    NotRunning,
    AlreadyRunning,
}

struct Flags {
    can_run: AtomicBool,
    running: AtomicBool,
}

pub struct LogSink {
    mq: &'static dyn Mq,
    worker: Option<(Arc<Flags>, Task)>,
}

impl LogSink {
    pub fn new(mq: &'static dyn Mq) -> LogSink {
        LogSink { mq, worker: None }
    }

    pub fn start(&mut self, sub_topic: &str) -> Result<(), LogSinkError> {
        if self.worker.is_some() {
            return Err(LogSinkError::AlreadyRunning);
        }
        if sub_topic.len() > TOPIC_LEN_MAX {
            return Err(LogSinkError::BadArg);
        }
        let client = self.mq.open().map_err(|_| LogSinkError::Failed)?;
        client
            .subscribe(sub_topic)
            .map_err(|_| LogSinkError::BadArg)?;

        let flags = Arc::new(Flags {
            can_run: AtomicBool::new(true),
            running: AtomicBool::new(false),
        });
        let task_flags = Arc::clone(&flags);
        let task = Task::spawn("log-sink", 1, move || {
            sink_loop(client, task_flags)
        })
        .map_err(|_| {
            error!(target: LOG, "cannot create task");
            LogSinkError::Failed
        })?;
        self.worker = Some((flags, task));
        info!(target: LOG, "logging values from '{}'", sub_topic);
        Ok(())
    }

    /// True while the sink task runs. The task stops on its own after
    /// a message of the wrong dtype.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|(f, _)| f.running.load(Ordering::Acquire))
    }

    pub fn stop(&mut self) -> Result<(), LogSinkError> {
        let (flags, task) =
            self.worker.take().ok_or(LogSinkError::NotRunning)?;
        flags.can_run.store(false, Ordering::Release);
        while flags.running.load(Ordering::Acquire) {
            osal::sleep_ms(100);
        }
        task.join();
        Ok(())
    }
}

fn sink_loop(client: Box<dyn MqClient>, flags: Arc<Flags>) {
    flags.running.store(true, Ordering::Release);
    let mut rxbuf = NdArray::empty(Dtype::F32, 64);
    let mut topic = Topic::new();
    let mut ts = Timespec::ZERO;
    while flags.can_run.load(Ordering::Acquire) {
        if client.receive(&mut topic, &mut rxbuf, &mut ts).is_err() {
            continue;
        }
        if rxbuf.dtype() != Dtype::F32 {
            error!(
                target: LOG,
                "unsupported data type on '{}', stopping",
                topic.as_str()
            );
            break;
        }
        for i in 0..rxbuf.len() {
            let v = rxbuf.get::<f32>(i);
            let int = v as i32;
            let milli = ((v - int as f32).abs() * 1000.0) as i32;
            info!(target: LOG, "{int}.{milli:03}");
        }
    }
    let _ = client.close();
    flags.running.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use svc_mq_router::MqRouter;

    #[test]
    fn consumes_floats() {
        let mq: &'static MqRouter = Box::leak(Box::new(MqRouter::new()));
        let mut sink = LogSink::new(mq);
        sink.start("values").unwrap();

        let publisher = mq.open().unwrap();
        let v = NdArray::from_elems(&[1.5f32, -0.25]);
        publisher.publish("values", &v, &Timespec::ZERO).unwrap();
        // The rendezvous completed, so the sink consumed the array.
        assert!(sink.is_running());
        sink.stop().unwrap();
    }

    #[test]
    fn wrong_dtype_stops_the_node() {
        let mq: &'static MqRouter = Box::leak(Box::new(MqRouter::new()));
        let mut sink = LogSink::new(mq);
        sink.start("values").unwrap();

        let publisher = mq.open().unwrap();
        let bad = NdArray::from_elems(&[1i32]);
        publisher.publish("values", &bad, &Timespec::ZERO).unwrap();

        // The task winds itself down.
        let mut tries = 0;
        while sink.is_running() && tries < 100 {
            osal::sleep_ms(10);
            tries += 1;
        }
        assert!(!sink.is_running());
        sink.stop().unwrap();
    }
}
