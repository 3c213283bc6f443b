// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Statistics node.
//!
//! For every array received on the subscribed topic, computes the
//! enabled set of scalar statistics and republishes each as a length-1
//! float array on a synthetic sub-topic of the *received* topic:
//! `.../rms`, `.../mean`, `.../var`, `.../nrms`, `.../psd`, `.../snr`,
//! `.../enob`. Subscribing to a wildcard therefore yields one stats
//! family per source channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use iface::mq::{Mq, MqClient, Topic, TOPIC_LEN_MAX};
use iface::Timespec;
use log::{error, info};
use ndbuf::{Dtype, NdArray};
use osal::Task;

const LOG: &str = "mq-stats";

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct StatsEnable: u32 {
        const RMS = 1 << 0;
        const MEAN = 1 << 1;
        const VAR = 1 << 2;
        const NRMS = 1 << 3;
        const PSD = 1 << 4;
        const SNR = 1 << 5;
        const ENOB = 1 << 6;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MqStatsError {
    Failed,
    BadArg,
    NotRunning,
    AlreadyRunning,
}

struct Flags {
    can_run: AtomicBool,
    running: AtomicBool,
}

pub struct MqStats {
    mq: &'static dyn Mq,
    enabled: StatsEnable,
    bandwidth: f32,
    full_scale: f32,
    worker: Option<(Arc<Flags>, Task)>,
}

impl MqStats {
    pub fn new(mq: &'static dyn Mq) -> MqStats {
        MqStats {
            mq,
            enabled: StatsEnable::empty(),
            bandwidth: 1.0,
            full_scale: 65536.0,
            worker: None,
        }
    }

    pub fn enable(&mut self, enabled: StatsEnable) {
        self.enabled = enabled;
        let names: Vec<&str> = [
            (StatsEnable::RMS, "rms"),
            (StatsEnable::MEAN, "mean"),
            (StatsEnable::VAR, "var"),
            (StatsEnable::NRMS, "nrms"),
            (StatsEnable::PSD, "psd"),
            (StatsEnable::SNR, "snr"),
            (StatsEnable::ENOB, "enob"),
        ]
        .iter()
        .filter(|(flag, _)| enabled.contains(*flag))
        .map(|&(_, name)| name)
        .collect();
        info!(
            target: LOG,
            "compute [{}] statistics",
            names.join(",")
        );
    }

    /// Noise bandwidth used for the PSD estimate, in Hz.
    pub fn set_bandwidth(&mut self, bandwidth: f32) {
        self.bandwidth = bandwidth;
    }

    /// Full-scale input range used for SNR and ENOB.
    pub fn set_full_scale(&mut self, full_scale: f32) {
        self.full_scale = full_scale;
    }

    pub fn start(
        &mut self,
        sub_topic: &str,
        dtype: Dtype,
        max_elems: usize,
    ) -> Result<(), MqStatsError> {
        if self.worker.is_some() {
            return Err(MqStatsError::AlreadyRunning);
        }
        if max_elems == 0 || sub_topic.len() > TOPIC_LEN_MAX {
            return Err(MqStatsError::BadArg);
        }
        if dtype != Dtype::I16 && dtype != Dtype::F32 {
            return Err(MqStatsError::BadArg);
        }
        let client = self.mq.open().map_err(|_| MqStatsError::Failed)?;
        client
            .subscribe(sub_topic)
            .map_err(|_| MqStatsError::BadArg)?;

        let flags = Arc::new(Flags {
            can_run: AtomicBool::new(true),
            running: AtomicBool::new(false),
        });
        let worker = StatsWorker {
            client,
            dtype,
            max_elems,
            enabled: self.enabled,
            bandwidth: self.bandwidth,
            full_scale: self.full_scale,
            flags: Arc::clone(&flags),
        };
        let task = Task::spawn("mq-stats", 1, move || worker.run())
            .map_err(|_| {
                error!(target: LOG, "cannot create task");
                MqStatsError::Failed
            })?;
        self.worker = Some((flags, task));
        info!(target: LOG, "statistics for '{}'", sub_topic);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), MqStatsError> {
        let (flags, task) =
            self.worker.take().ok_or(MqStatsError::NotRunning)?;
        flags.can_run.store(false, Ordering::Release);
        while flags.running.load(Ordering::Acquire) {
            osal::sleep_ms(100);
        }
        task.join();
        info!(target: LOG, "stopped");
        Ok(())
    }
}

fn mean(x: &[f32]) -> f32 {
    x.iter().sum::<f32>() / x.len() as f32
}

fn rms(x: &[f32]) -> f32 {
    (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
}

fn var(x: &[f32]) -> f32 {
    let m = mean(x);
    x.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / x.len() as f32
}

fn nrms(x: &[f32]) -> f32 {
    var(x).sqrt()
}

fn psd(x: &[f32], bandwidth: f32) -> f32 {
    nrms(x) / bandwidth.sqrt()
}

fn snr_db(x: &[f32], full_scale: f32) -> f32 {
    let carrier =
        full_scale / ((full_scale / 2.0) * (full_scale / 2.0).sqrt());
    20.0 * (carrier / nrms(x)).log10()
}

fn enob(x: &[f32], full_scale: f32) -> f32 {
    (snr_db(x, full_scale) - 1.76) / 6.02
}

struct StatsWorker {
    client: Box<dyn MqClient>,
    dtype: Dtype,
    max_elems: usize,
    enabled: StatsEnable,
    bandwidth: f32,
    full_scale: f32,
    flags: Arc<Flags>,
}

impl StatsWorker {
    fn publish_scalar(&self, base: &Topic, suffix: &str, value: f32) {
        let mut topic = base.clone();
        if topic.push_str("/").is_err()
            || topic.push_str(suffix).is_err()
        {
            // Derived topic would overflow; nothing sensible to do.
            return;
        }
        let raw = value.to_ne_bytes();
        if let Ok(array) = NdArray::view(Dtype::F32, 1, &raw) {
            let _ =
                self.client.publish(&topic, &array, &Timespec::ZERO);
        }
    }

    fn run(self) {
        self.flags.running.store(true, Ordering::Release);
        let mut rxbuf = NdArray::empty(self.dtype, self.max_elems);
        let mut topic = Topic::new();
        let mut ts = Timespec::ZERO;
        while self.flags.can_run.load(Ordering::Acquire) {
            if self
                .client
                .receive(&mut topic, &mut rxbuf, &mut ts)
                .is_err()
            {
                continue;
            }
            if rxbuf.dtype() != self.dtype || rxbuf.is_empty() {
                continue;
            }
            let x: Vec<f32> =
                (0..rxbuf.len()).map(|i| rxbuf.to_f32(i)).collect();

            if self.enabled.contains(StatsEnable::RMS) {
                self.publish_scalar(&topic, "rms", rms(&x));
            }
            if self.enabled.contains(StatsEnable::MEAN) {
                self.publish_scalar(&topic, "mean", mean(&x));
            }
            if self.enabled.contains(StatsEnable::VAR) {
                self.publish_scalar(&topic, "var", var(&x));
            }
            if self.enabled.contains(StatsEnable::NRMS) {
                self.publish_scalar(&topic, "nrms", nrms(&x));
            }
            if self.enabled.contains(StatsEnable::PSD) {
                self.publish_scalar(
                    &topic,
                    "psd",
                    psd(&x, self.bandwidth),
                );
            }
            if self.enabled.contains(StatsEnable::SNR) {
                self.publish_scalar(
                    &topic,
                    "snr",
                    snr_db(&x, self.full_scale),
                );
            }
            if self.enabled.contains(StatsEnable::ENOB) {
                self.publish_scalar(
                    &topic,
                    "enob",
                    enob(&x, self.full_scale),
                );
            }
        }
        let _ = self.client.close();
        self.flags.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use svc_mq_router::MqRouter;

    fn close_to(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4 * b.abs().max(1.0)
    }

    #[test]
    fn formulas() {
        let x = [1.0f32, 2.0, 3.0, 4.0];
        assert!(close_to(mean(&x), 2.5));
        assert!(close_to(rms(&x), 7.5f32.sqrt()));
        assert!(close_to(var(&x), 1.25));
        assert!(close_to(nrms(&x), 1.25f32.sqrt()));
        assert!(close_to(psd(&x, 4.0), nrms(&x) / 2.0));
        let fs = 65536.0f32;
        let carrier = fs / ((fs / 2.0) * (fs / 2.0).sqrt());
        assert!(close_to(
            snr_db(&x, fs),
            20.0 * (carrier / nrms(&x)).log10(),
        ));
        assert!(close_to(
            enob(&x, fs),
            (snr_db(&x, fs) - 1.76) / 6.02,
        ));
    }

    #[test]
    fn publishes_enabled_stats_on_derived_topics() {
        let mq: &'static MqRouter = Box::leak(Box::new(MqRouter::new()));

        // `in/+` sees the derived scalars but not the input itself.
        let out = mq.open().unwrap();
        out.subscribe("in/+").unwrap();
        out.set_timeout(2000).unwrap();

        let mut svc = MqStats::new(mq);
        svc.enable(
            StatsEnable::RMS
                | StatsEnable::MEAN
                | StatsEnable::VAR
                | StatsEnable::NRMS,
        );
        svc.start("in", Dtype::F32, 16).unwrap();

        let publisher = mq.open().unwrap();
        let x = [1.0f32, 2.0, 3.0, 4.0];
        let arr = NdArray::from_elems(&x);
        publisher.publish("in", &arr, &Timespec::ZERO).unwrap();

        let expect = [
            ("in/rms", rms(&x)),
            ("in/mean", mean(&x)),
            ("in/var", var(&x)),
            ("in/nrms", nrms(&x)),
        ];
        let mut topic = Topic::new();
        let mut ts = Timespec::ZERO;
        for (want_topic, want_value) in expect {
            let mut v = NdArray::empty(Dtype::F32, 1);
            out.receive(&mut topic, &mut v, &mut ts).unwrap();
            assert_eq!(topic.as_str(), want_topic);
            assert_eq!(v.len(), 1);
            assert!(
                close_to(v.get::<f32>(0), want_value),
                "{want_topic}: {} vs {}",
                v.get::<f32>(0),
                want_value,
            );
        }

        svc.stop().unwrap();
    }

    #[test]
    fn int16_input_supported() {
        let mq: &'static MqRouter = Box::leak(Box::new(MqRouter::new()));
        let out = mq.open().unwrap();
        out.subscribe("ch/+").unwrap();
        out.set_timeout(2000).unwrap();

        let mut svc = MqStats::new(mq);
        svc.enable(StatsEnable::MEAN);
        svc.start("ch", Dtype::I16, 16).unwrap();

        let publisher = mq.open().unwrap();
        let arr = NdArray::from_elems(&[10i16, 20, 30]);
        publisher.publish("ch", &arr, &Timespec::ZERO).unwrap();

        let mut topic = Topic::new();
        let mut ts = Timespec::ZERO;
        let mut v = NdArray::empty(Dtype::F32, 1);
        out.receive(&mut topic, &mut v, &mut ts).unwrap();
        assert_eq!(topic.as_str(), "ch/mean");
        assert!(close_to(v.get::<f32>(0), 20.0));

        svc.stop().unwrap();
    }
}
