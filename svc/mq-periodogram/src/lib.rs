// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Welch periodogram node.
//!
//! Keeps the last `N` samples of the subscribed stream in a FIFO. Every
//! received array shifts the FIFO, and an `N`-point windowed FFT of the
//! whole FIFO is accumulated (squared magnitudes) into a running
//! spectrum. After `period` passes the accumulator's square root is
//! published as a length-`N/2` float array and the accumulation starts
//! over — averaged, overlapping segments in the Welch manner.

mod fft;

pub use fft::rfft_mag;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use iface::mq::{Mq, MqClient, Topic, TOPIC_LEN_MAX};
use iface::Timespec;
use log::{error, info};
use ndbuf::{Dtype, NdArray};
use osal::Task;

const LOG: &str = "mq-periodogram";

/// Elements accepted from a single incoming message, at most.
pub const MAX_INPUT_ELEMS: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Window {
    #[default]
    None,
    Hamming,
}

impl Window {
    fn coef(self, i: usize, n: usize) -> f32 {
        match self {
            Window::None => 1.0,
            Window::Hamming => {
                0.54 - 0.46
                    * (2.0 * core::f32::consts::PI * i as f32
                        / (n as f32 - 1.0))
                        .cos()
            }
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Window::None => "none",
            Window::Hamming => "hamming",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PeriodogramError {
    Failed,
    BadArg,
    NotRunning,
    AlreadyRunning,
}

struct Flags {
    can_run: AtomicBool,
    running: AtomicBool,
}

pub struct MqPeriodogram {
    mq: &'static dyn Mq,
    window: Window,
    period: Arc<AtomicU32>,
    worker: Option<(Arc<Flags>, Task)>,
}

impl MqPeriodogram {
    pub fn new(mq: &'static dyn Mq) -> MqPeriodogram {
        MqPeriodogram {
            mq,
            window: Window::default(),
            period: Arc::new(AtomicU32::new(1)),
            worker: None,
        }
    }

    pub fn set_window(&mut self, window: Window) {
        self.window = window;
    }

    /// Number of FFT passes averaged into one published spectrum. May
    /// be updated while the node runs.
    pub fn set_period(&self, period: u32) {
        self.period.store(period.max(1), Ordering::Relaxed);
    }

    pub fn start(
        &mut self,
        sub_topic: &str,
        pub_topic: &str,
        dtype: Dtype,
        n: usize,
    ) -> Result<(), PeriodogramError> {
        if self.worker.is_some() {
            return Err(PeriodogramError::AlreadyRunning);
        }
        if !n.is_power_of_two()
            || n < 4
            || sub_topic.len() > TOPIC_LEN_MAX
            || pub_topic.len() > TOPIC_LEN_MAX
        {
            return Err(PeriodogramError::BadArg);
        }
        let client =
            self.mq.open().map_err(|_| PeriodogramError::Failed)?;
        client
            .subscribe(sub_topic)
            .map_err(|_| PeriodogramError::BadArg)?;
        let mut pub_t = Topic::new();
        pub_t
            .push_str(pub_topic)
            .map_err(|_| PeriodogramError::BadArg)?;

        let flags = Arc::new(Flags {
            can_run: AtomicBool::new(true),
            running: AtomicBool::new(false),
        });
        let worker = PeriodogramWorker {
            client,
            pub_topic: pub_t,
            dtype,
            n,
            window: self.window,
            period: Arc::clone(&self.period),
            flags: Arc::clone(&flags),
        };
        let task =
            Task::spawn("mq-periodogram", 1, move || worker.run())
                .map_err(|_| {
                    error!(target: LOG, "cannot create task");
                    PeriodogramError::Failed
                })?;
        self.worker = Some((flags, task));
        info!(
            target: LOG,
            "'{}' -> '{}', periodogram size = {}, window = {}, period = {}",
            sub_topic,
            pub_topic,
            n,
            self.window.as_str(),
            self.period.load(Ordering::Relaxed)
        );
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), PeriodogramError> {
        let (flags, task) =
            self.worker.take().ok_or(PeriodogramError::NotRunning)?;
        flags.can_run.store(false, Ordering::Release);
        while flags.running.load(Ordering::Acquire) {
            osal::sleep_ms(100);
        }
        task.join();
        info!(target: LOG, "stopped");
        Ok(())
    }
}

struct PeriodogramWorker {
    client: Box<dyn MqClient>,
    pub_topic: Topic,
    dtype: Dtype,
    n: usize,
    window: Window,
    period: Arc<AtomicU32>,
    flags: Arc<Flags>,
}

impl PeriodogramWorker {
    fn run(self) {
        self.flags.running.store(true, Ordering::Release);
        let n = self.n;
        let mut fifo = NdArray::zeroed(self.dtype, n);
        let mut rxbuf = NdArray::empty(self.dtype, MAX_INPUT_ELEMS);
        let mut windowed = vec![0.0f32; n];
        let mut mag = vec![0.0f32; n / 2];
        let mut accumulator = NdArray::zeroed(Dtype::F32, n / 2);
        let mut passes = 0u32;
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
            if rxbuf.dtype() != self.dtype {
                // Message with an array of the wrong type.
                continue;
            }
            let m = rxbuf.len();
            if m == 0 || m > n {
                // Message bigger than the FIFO itself.
                continue;
            }

            // Shift the FIFO left and append the new samples.
            let _ = fifo.move_within(0, m, n - m);
            let _ = fifo.copy_from(n - m, &rxbuf, 0, m);

            // One windowed FFT pass over the whole FIFO.
            for i in 0..n {
                windowed[i] = fifo.to_f32(i) * self.window.coef(i, n);
            }
            rfft_mag(&windowed, &mut mag);
            for (i, &mi) in mag.iter().enumerate() {
                let acc = accumulator.get::<f32>(i);
                accumulator.set(i, acc + mi * mi);
            }
            passes += 1;

            if passes >= self.period.load(Ordering::Relaxed) {
                let _ = accumulator.sqrt();
                let _ = self.client.publish(
                    &self.pub_topic,
                    &accumulator,
                    &ts,
                );
                let _ = accumulator.zero();
                passes = 0;
            }
        }
        let _ = self.client.close();
        self.flags.running.store(false, Ordering::Release);
    }
}
