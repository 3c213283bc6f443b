// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated hardware for the host demo: a free-running waveform
//! source, a drifting scalar sensor, a tick-based clock and a xorshift
//! RNG. Each implements the same interface a real driver would.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use iface::clock::{Clock, ClockError};
use iface::rng::{Rng, RngError};
use iface::sensor::{Sensor, SensorError, SensorInfo};
use iface::waveform::{WaveformError, WaveformSource};
use iface::Timespec;
use ndbuf::Dtype;

/// Two-channel sine generator with a bit of deterministic jitter.
pub struct SimWaveform {
    channels: usize,
    sample_rate: u32,
    tone_hz: f32,
    running: AtomicBool,
    phase: Mutex<u64>,
}

impl SimWaveform {
    pub fn new(
        channels: usize,
        sample_rate: u32,
        tone_hz: f32,
    ) -> SimWaveform {
        SimWaveform {
            channels,
            sample_rate,
            tone_hz,
            running: AtomicBool::new(false),
            phase: Mutex::new(0),
        }
    }
}

impl WaveformSource for SimWaveform {
    fn start(&self) -> Result<(), WaveformError> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> Result<(), WaveformError> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn read(
        &self,
        buf: &mut [u8],
        max_samples: usize,
    ) -> Result<usize, WaveformError> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(0);
        }
        let mut phase = self.phase.lock().unwrap();
        for i in 0..max_samples {
            let n = *phase + i as u64;
            let t = n as f32 / self.sample_rate as f32;
            let x = (2.0 * core::f32::consts::PI * self.tone_hz * t)
                .sin();
            for c in 0..self.channels {
                // Channel 1 carries the same tone at half amplitude,
                // antiphase.
                let scale = if c == 0 { 0.7 } else { -0.35 };
                let jitter = ((n.wrapping_mul(2654435761)
                    .wrapping_add(c as u64))
                    % 64) as f32
                    - 32.0;
                let v = (x * scale * f32::from(i16::MAX) + jitter)
                    as i16;
                let at = (i * self.channels + c) * 2;
                buf[at..at + 2].copy_from_slice(&v.to_ne_bytes());
            }
        }
        *phase += max_samples as u64;
        Ok(max_samples)
    }

    fn get_format(&self) -> Result<(Dtype, usize), WaveformError> {
        Ok((Dtype::I16, self.channels))
    }

    fn sample_rate(&self) -> Result<u32, WaveformError> {
        Ok(self.sample_rate)
    }
}

/// Slowly drifting temperature-like value.
pub struct SimSensor {
    reads: AtomicU64,
}

impl SimSensor {
    pub fn new() -> SimSensor {
        SimSensor { reads: AtomicU64::new(0) }
    }
}

impl Default for SimSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for SimSensor {
    fn value_f(&self) -> Result<f32, SensorError> {
        let n = self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(23.5 + (n as f32 / 40.0).sin() * 1.5)
    }

    fn info(&self) -> Result<SensorInfo, SensorError> {
        Ok(SensorInfo {
            quantity: "temperature",
            unit: "degC",
        })
    }
}

/// Monotonic clock over the process tick counter.
pub struct SysClock {
    offset: Mutex<Timespec>,
}

impl SysClock {
    pub fn new() -> SysClock {
        SysClock {
            offset: Mutex::new(Timespec::ZERO),
        }
    }
}

impl Default for SysClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SysClock {
    fn get(&self) -> Result<Timespec, ClockError> {
        let offset = *self.offset.lock().unwrap();
        let ms = osal::ticks_ms();
        let nsec =
            u64::from(offset.nsec) + (ms % 1000) * 1_000_000;
        Ok(Timespec {
            sec: offset.sec + ms / 1000 + nsec / 1_000_000_000,
            nsec: (nsec % 1_000_000_000) as u32,
        })
    }

    fn set(&self, ts: Timespec) -> Result<(), ClockError> {
        *self.offset.lock().unwrap() = ts;
        Ok(())
    }
}

/// Deterministic xorshift generator; good enough for demo IVs.
pub struct SimRng {
    state: AtomicU64,
}

impl SimRng {
    pub fn new() -> SimRng {
        SimRng {
            state: AtomicU64::new(0x853c_49e6_748f_ea9b),
        }
    }
}

impl Default for SimRng {
    fn default() -> Self {
        Self::new()
    }
}

impl Rng for SimRng {
    fn fill(&self, buf: &mut [u8]) -> Result<(), RngError> {
        for byte in buf {
            let mut x = self.state.load(Ordering::Relaxed);
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.state.store(x, Ordering::Relaxed);
            *byte = x as u8;
        }
        Ok(())
    }
}
