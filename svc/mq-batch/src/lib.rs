// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Batching node.
//!
//! Accumulates arrays received on one topic into a larger array of a
//! configured dtype and capacity, and republishes the batch (stamped
//! with the most recent input's timestamp) once it is full. Useful in
//! front of consumers that want fewer, bigger messages — a radio
//! uplink, or the flash log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use iface::mq::{Mq, MqClient, Topic, TOPIC_LEN_MAX};
use iface::Timespec;
use log::{error, info};
use ndbuf::{Dtype, NdArray};
use osal::Task;

const LOG: &str = "mq-batch";

/// Elements accepted from a single incoming message, at most.
const RXBUF_ELEMS: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MqBatchError {
    Failed,
    BadArg,
    NotRunning,
    AlreadyRunning,
}

struct Flags {
    can_run: AtomicBool,
    running: AtomicBool,
}

pub struct MqBatch {
    mq: &'static dyn Mq,
    worker: Option<(Arc<Flags>, Task)>,
}

impl MqBatch {
    pub fn new(mq: &'static dyn Mq) -> MqBatch {
        MqBatch { mq, worker: None }
    }

    pub fn start(
        &mut self,
        dtype: Dtype,
        batch_elems: usize,
        sub_topic: &str,
        pub_topic: &str,
    ) -> Result<(), MqBatchError> {
        if self.worker.is_some() {
            return Err(MqBatchError::AlreadyRunning);
        }
        if batch_elems == 0
            || sub_topic.len() > TOPIC_LEN_MAX
            || pub_topic.len() > TOPIC_LEN_MAX
        {
            return Err(MqBatchError::BadArg);
        }
        let client = self.mq.open().map_err(|_| MqBatchError::Failed)?;
        client
            .subscribe(sub_topic)
            .map_err(|_| MqBatchError::BadArg)?;
        let mut pub_t = Topic::new();
        pub_t.push_str(pub_topic).map_err(|_| MqBatchError::BadArg)?;

        let flags = Arc::new(Flags {
            can_run: AtomicBool::new(true),
            running: AtomicBool::new(false),
        });
        let task_flags = Arc::clone(&flags);
        let task = Task::spawn("mq-batch", 1, move || {
            batch_loop(client, dtype, batch_elems, pub_t, task_flags)
        })
        .map_err(|_| {
            error!(target: LOG, "cannot create task");
            MqBatchError::Failed
        })?;
        self.worker = Some((flags, task));
        info!(
            target: LOG,
            "'{}' -> '{}', batching {} values",
            sub_topic,
            pub_topic,
            batch_elems
        );
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), MqBatchError> {
        let (flags, task) =
            self.worker.take().ok_or(MqBatchError::NotRunning)?;
        flags.can_run.store(false, Ordering::Release);
        while flags.running.load(Ordering::Acquire) {
            osal::sleep_ms(100);
        }
        task.join();
        info!(target: LOG, "stopped");
        Ok(())
    }
}

fn batch_loop(
    client: Box<dyn MqClient>,
    dtype: Dtype,
    batch_elems: usize,
    pub_topic: Topic,
    flags: Arc<Flags>,
) {
    flags.running.store(true, Ordering::Release);
    let mut batch = NdArray::empty(dtype, batch_elems);
    let mut rxbuf = NdArray::empty(dtype, RXBUF_ELEMS);
    let mut topic = Topic::new();
    let mut ts = Timespec::ZERO;
    while flags.can_run.load(Ordering::Acquire) {
        if client.receive(&mut topic, &mut rxbuf, &mut ts).is_err() {
            continue;
        }
        // Arrays of a foreign dtype are not batchable; drop them.
        let _ = batch.append(&rxbuf);
        if batch.len() >= batch.capacity() {
            let _ = client.publish(&pub_topic, &batch, &ts);
            batch.clear();
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
    fn batches_ten_scalars() {
        let mq: &'static MqRouter = Box::leak(Box::new(MqRouter::new()));

        let out = mq.open().unwrap();
        out.subscribe("out").unwrap();
        out.set_timeout(2000).unwrap();

        let mut svc = MqBatch::new(mq);
        svc.start(Dtype::F32, 10, "in", "out").unwrap();

        let publisher = mq.open().unwrap();
        let sent = Timespec { sec: 77, nsec: 0 };
        for i in 1..=10 {
            let v = NdArray::from_elems(&[i as f32]);
            publisher.publish("in", &v, &sent).unwrap();
        }

        let mut topic = Topic::new();
        let mut ts = Timespec::ZERO;
        let mut arr = NdArray::empty(Dtype::F32, 16);
        out.receive(&mut topic, &mut arr, &mut ts).unwrap();
        assert_eq!(topic.as_str(), "out");
        assert_eq!(arr.len(), 10);
        for i in 0..10 {
            assert_eq!(arr.get::<f32>(i), (i + 1) as f32);
        }
        assert_eq!(ts, sent);

        // Only one publication for ten inputs.
        out.set_timeout(50).unwrap();
        assert_eq!(
            out.receive(&mut topic, &mut arr, &mut ts),
            Err(iface::mq::MqError::Timeout),
        );

        svc.stop().unwrap();
    }

    #[test]
    fn foreign_dtype_is_ignored() {
        let mq: &'static MqRouter = Box::leak(Box::new(MqRouter::new()));
        let out = mq.open().unwrap();
        out.subscribe("out").unwrap();
        out.set_timeout(100).unwrap();

        let mut svc = MqBatch::new(mq);
        svc.start(Dtype::F32, 2, "in", "out").unwrap();

        let publisher = mq.open().unwrap();
        let bad = NdArray::from_elems(&[1i16, 2]);
        publisher.publish("in", &bad, &Timespec::ZERO).unwrap();
        let good = NdArray::from_elems(&[1.0f32, 2.0]);
        publisher.publish("in", &good, &Timespec::ZERO).unwrap();

        let mut topic = Topic::new();
        let mut ts = Timespec::ZERO;
        let mut arr = NdArray::empty(Dtype::F32, 4);
        out.receive(&mut topic, &mut arr, &mut ts).unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr.get::<f32>(1), 2.0);

        svc.stop().unwrap();
    }
}
