// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Waveform-source splitter.
//!
//! Bridges a [`WaveformSource`] producing channel-interleaved samples to
//! a set of per-channel MQ topics. Each configured channel accumulates
//! its own samples in a bounded buffer; when a buffer reaches exactly
//! its configured size the service publishes it as one array (with a
//! timestamp from the optional clock) and starts over.
//!
//! A single task drives the whole fan-out. Every period it works out how
//! many samples can be accepted without overflowing any channel, reads
//! that many from the source, and de-interleaves them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use iface::clock::Clock;
use iface::mq::{Mq, MqClient, MqError, Topic, TOPIC_LEN_MAX};
use iface::waveform::WaveformSource;
use iface::Timespec;
use log::{error, info};
use ndbuf::{Dtype, NdArray};
use osal::Task;

const LOG: &str = "ws-source";

/// Samples fetched from the source in one go, at most.
pub const RXBUF_SAMPLES: usize = 256;

pub const READ_PERIOD_MS_DEFAULT: u32 = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WsSourceError {
    Failed,
    BadArg,
    NotRunning,
    AlreadyRunning,
}

struct ChannelCfg {
    channel: usize,
    topic: Topic,
    max_samples: usize,
}

struct Flags {
    can_run: AtomicBool,
    running: AtomicBool,
}

pub struct WsSource {
    source: &'static dyn WaveformSource,
    mq: &'static dyn Mq,
    ts_clock: Option<&'static dyn Clock>,
    read_period_ms: u32,
    channels: Vec<ChannelCfg>,
    worker: Option<(Arc<Flags>, Task)>,
}

impl WsSource {
    pub fn new(
        source: &'static dyn WaveformSource,
        mq: &'static dyn Mq,
    ) -> WsSource {
        WsSource {
            source,
            mq,
            ts_clock: None,
            read_period_ms: READ_PERIOD_MS_DEFAULT,
            channels: Vec::new(),
            worker: None,
        }
    }

    /// Clock used to timestamp published buffers; without one the
    /// timestamp stays zero.
    pub fn set_ts_clock(&mut self, clock: &'static dyn Clock) {
        self.ts_clock = Some(clock);
    }

    pub fn set_read_period_ms(&mut self, period_ms: u32) {
        self.read_period_ms = period_ms.max(1);
    }

    /// Routes source channel `channel` to `topic`, publishing every
    /// `max_samples` samples. Channels are fixed before `start`.
    pub fn add_channel(
        &mut self,
        channel: usize,
        topic: &str,
        max_samples: usize,
    ) -> Result<(), WsSourceError> {
        if max_samples == 0 || topic.len() > TOPIC_LEN_MAX {
            return Err(WsSourceError::BadArg);
        }
        if self.worker.is_some() {
            return Err(WsSourceError::AlreadyRunning);
        }
        let mut t = Topic::new();
        t.push_str(topic).map_err(|_| WsSourceError::BadArg)?;
        self.channels.push(ChannelCfg {
            channel,
            topic: t,
            max_samples,
        });
        info!(
            target: LOG,
            "added topic '{}' for channel {}, buffer size {} samples",
            topic,
            channel,
            max_samples
        );
        Ok(())
    }

    pub fn start(&mut self, prio: u32) -> Result<(), WsSourceError> {
        if self.worker.is_some() {
            return Err(WsSourceError::AlreadyRunning);
        }
        let (dtype, source_channels) =
            self.source.get_format().map_err(|_| WsSourceError::Failed)?;
        for ch in &self.channels {
            if ch.channel >= source_channels {
                return Err(WsSourceError::BadArg);
            }
        }
        let client =
            self.mq.open().map_err(|_| WsSourceError::Failed)?;

        self.source.start().map_err(|_| WsSourceError::Failed)?;

        let flags = Arc::new(Flags {
            can_run: AtomicBool::new(true),
            running: AtomicBool::new(false),
        });
        let worker = SplitterWorker {
            source: self.source,
            ts_clock: self.ts_clock,
            client,
            dtype,
            source_channels,
            read_period_ms: self.read_period_ms,
            channels: self
                .channels
                .iter()
                .map(|c| ChannelState {
                    channel: c.channel,
                    topic: c.topic.clone(),
                    max_samples: c.max_samples,
                    buf: vec![0; c.max_samples * dtype.size()],
                    samples: 0,
                })
                .collect(),
            flags: Arc::clone(&flags),
        };
        let task = Task::spawn("ws-source", prio, move || worker.run())
            .map_err(|_| {
                error!(target: LOG, "cannot create task");
                let _ = self.source.stop();
                WsSourceError::Failed
            })?;
        self.worker = Some((flags, task));
        info!(target: LOG, "started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), WsSourceError> {
        let (flags, task) =
            self.worker.take().ok_or(WsSourceError::NotRunning)?;
        self.source.stop().map_err(|_| WsSourceError::Failed)?;
        flags.can_run.store(false, Ordering::Release);
        while flags.running.load(Ordering::Acquire) {
            osal::sleep_ms(100);
        }
        task.join();
        info!(target: LOG, "stopped");
        Ok(())
    }
}

struct ChannelState {
    channel: usize,
    topic: Topic,
    max_samples: usize,
    buf: Vec<u8>,
    samples: usize,
}

struct SplitterWorker {
    source: &'static dyn WaveformSource,
    ts_clock: Option<&'static dyn Clock>,
    client: Box<dyn MqClient>,
    dtype: Dtype,
    source_channels: usize,
    read_period_ms: u32,
    channels: Vec<ChannelState>,
    flags: Arc<Flags>,
}

impl SplitterWorker {
    /// Samples acceptable right now without overflowing any channel.
    fn may_receive(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.max_samples - c.samples)
            .min()
            .unwrap_or(0)
            .min(RXBUF_SAMPLES)
    }

    fn write_channels(
        &mut self,
        rxbuf: &[u8],
        samples: usize,
    ) -> Result<(), MqError> {
        let ds = self.dtype.size();
        let stride = self.source_channels * ds;
        for ch in &mut self.channels {
            for i in 0..samples {
                let src = i * stride + ch.channel * ds;
                let dst = (ch.samples + i) * ds;
                ch.buf[dst..dst + ds]
                    .copy_from_slice(&rxbuf[src..src + ds]);
            }
            ch.samples += samples;

            if ch.samples == ch.max_samples {
                let array =
                    NdArray::view(self.dtype, ch.samples, &ch.buf)
                        .map_err(|_| MqError::Failed)?;
                let ts = match self.ts_clock {
                    Some(clock) => clock.get().unwrap_or(Timespec::ZERO),
                    None => Timespec::ZERO,
                };
                self.client.publish(&ch.topic, &array, &ts)?;
                ch.samples = 0;
            }
        }
        Ok(())
    }

    fn run(mut self) {
        self.flags.running.store(true, Ordering::Release);
        let ds = self.dtype.size();
        let mut rxbuf =
            vec![0u8; RXBUF_SAMPLES * self.source_channels * ds];
        while self.flags.can_run.load(Ordering::Acquire) {
            let may_receive = self.may_receive();
            let read = if may_receive > 0 {
                let want = may_receive * self.source_channels * ds;
                self.source
                    .read(&mut rxbuf[..want], may_receive)
                    .unwrap_or(0)
            } else {
                0
            };
            if read > 0 {
                let _ = self.write_channels(&rxbuf, read);
            }
            osal::sleep_ms(self.read_period_ms);
        }
        let _ = self.client.close();
        self.flags.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iface::waveform::WaveformError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use svc_mq_router::MqRouter;

    /// Scripted source: hands out a fixed interleaved sample stream.
    struct ScriptedSource {
        dtype: Dtype,
        channels: usize,
        samples: Mutex<VecDeque<i16>>,
        started: AtomicBool,
    }

    impl ScriptedSource {
        fn with_samples(channels: usize, total: usize) -> ScriptedSource {
            // Element value encodes its interleaved position.
            let all = (0..total * channels)
                .map(|v| v as i16)
                .collect();
            ScriptedSource {
                dtype: Dtype::I16,
                channels,
                samples: Mutex::new(all),
                started: AtomicBool::new(false),
            }
        }
    }

    impl WaveformSource for ScriptedSource {
        fn start(&self) -> Result<(), WaveformError> {
            self.started.store(true, Ordering::Release);
            Ok(())
        }

        fn stop(&self) -> Result<(), WaveformError> {
            self.started.store(false, Ordering::Release);
            Ok(())
        }

        fn read(
            &self,
            buf: &mut [u8],
            max_samples: usize,
        ) -> Result<usize, WaveformError> {
            let mut q = self.samples.lock().unwrap();
            let avail = q.len() / self.channels;
            let n = avail.min(max_samples);
            for i in 0..n * self.channels {
                let v = q.pop_front().unwrap();
                buf[i * 2..i * 2 + 2].copy_from_slice(&v.to_ne_bytes());
            }
            Ok(n)
        }

        fn get_format(&self) -> Result<(Dtype, usize), WaveformError> {
            Ok((self.dtype, self.channels))
        }

        fn sample_rate(&self) -> Result<u32, WaveformError> {
            Ok(25)
        }
    }

    #[test]
    fn splits_into_exact_batches() {
        let mq: &'static MqRouter = Box::leak(Box::new(MqRouter::new()));
        let source: &'static ScriptedSource =
            Box::leak(Box::new(ScriptedSource::with_samples(8, 640)));

        let sub = mq.open().unwrap();
        sub.subscribe("acc/x").unwrap();
        sub.set_timeout(2000).unwrap();

        let mut svc = WsSource::new(source, mq);
        svc.set_read_period_ms(1);
        svc.add_channel(0, "acc/x", 64).unwrap();
        svc.start(1).unwrap();
        assert!(source.started.load(Ordering::Acquire));

        let mut topic = Topic::new();
        let mut ts = Timespec::ZERO;
        for batch in 0..10usize {
            let mut arr = NdArray::empty(Dtype::I16, 64);
            sub.receive(&mut topic, &mut arr, &mut ts).unwrap();
            assert_eq!(topic.as_str(), "acc/x");
            assert_eq!(arr.len(), 64);
            for i in 0..64 {
                let sample = batch * 64 + i;
                // Channel 0 of interleaved sample `sample`.
                assert_eq!(
                    arr.get::<i16>(i),
                    (sample * 8) as i16,
                    "batch {batch} sample {i}",
                );
            }
        }

        // The stream is exhausted: no 11th publication.
        sub.set_timeout(50).unwrap();
        let mut arr = NdArray::empty(Dtype::I16, 64);
        assert_eq!(
            sub.receive(&mut topic, &mut arr, &mut ts),
            Err(MqError::Timeout),
        );

        svc.stop().unwrap();
        assert!(!source.started.load(Ordering::Acquire));
    }

    #[test]
    fn channel_must_exist_in_source() {
        let mq: &'static MqRouter = Box::leak(Box::new(MqRouter::new()));
        let source: &'static ScriptedSource =
            Box::leak(Box::new(ScriptedSource::with_samples(2, 4)));
        let mut svc = WsSource::new(source, mq);
        svc.add_channel(5, "x", 8).unwrap();
        assert_eq!(svc.start(1), Err(WsSourceError::BadArg));
    }
}
