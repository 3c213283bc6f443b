// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host demo image.
//!
//! Boots the composition core the way the firmware does: system log
//! first, then the service locator and the message router, then storage
//! (simulated NOR flash, volumes, the encrypted FIFO), then the
//! acquisition pipeline — a simulated two-channel waveform source split
//! into per-axis topics, flowing through periodogram/stats transform
//! nodes into log and storage sinks. Runs for a couple of seconds and
//! shuts everything down in reverse order.

mod sim;

use iface::fs::{Fs, FsMode};
use iface::mq::{Mq, MqClient, Topic};
use iface::Timespec;
use log::info;
use ndbuf::{Dtype, NdArray};
use svc_flash_fifo::{FifoKeys, FlashFifo};
use svc_locator::{ServiceLocator, ServiceRef, ServiceTag};
use svc_log_sink::LogSink;
use svc_mq_batch::MqBatch;
use svc_mq_periodogram::{MqPeriodogram, Window};
use svc_mq_router::MqRouter;
use svc_mq_stats::{MqStats, StatsEnable};
use svc_sensor_source::SensorSource;
use svc_ws_source::WsSource;

const LOG: &str = "demo";

fn main() {
    let syslog = logbuf::SystemLog::install(
        16 * 1024,
        true,
        log::LevelFilter::Info,
    );
    syslog.set_time_handler(Box::new(|| {
        (osal::ticks_ms() / 1000) as u32
    }));

    // Core singletons, created before any driver registers.
    let locator: &'static ServiceLocator =
        Box::leak(Box::new(ServiceLocator::new()));
    let router: &'static MqRouter = Box::leak(Box::new(MqRouter::new()));
    locator.add("plog-router", ServiceRef::Mq(router));

    let clock: &'static sim::SysClock =
        Box::leak(Box::new(sim::SysClock::new()));
    locator.add("system-clock", ServiceRef::Clock(clock));
    router.set_clock(clock);

    let rng: &'static sim::SimRng = Box::leak(Box::new(sim::SimRng::new()));
    locator.add("rng", ServiceRef::Rng(rng));

    // Storage: a 1 MiB NOR device carved into volumes, with the
    // encrypted FIFO log in the "log" volume.
    let pv: &'static drv_mem_flash::MemFlash = Box::leak(Box::new(
        drv_mem_flash::MemFlash::new(1024 * 1024, 4096, 256),
    ));
    locator.add("nor-flash", ServiceRef::Flash(pv));
    let volumes = drv_flash_vol::FlashVolumes::new(pv);
    let log_vol = volumes
        .create("log", 64 * 1024, 512 * 1024)
        .expect("log volume");
    locator.add("log", ServiceRef::Flash(log_vol));

    // Demo keys; a real deployment provisions these externally.
    let keys = FifoKeys {
        keystream: *b"demo-keystream-k",
        mac: *b"demo-mac-key-16b",
    };
    let fifo: &'static FlashFifo = Box::leak(Box::new(
        FlashFifo::new(log_vol, rng, keys).expect("flash fifo"),
    ));
    locator.add("flash-fifo", ServiceRef::Fs(fifo));

    // Acquisition front-end.
    let source: &'static sim::SimWaveform =
        Box::leak(Box::new(sim::SimWaveform::new(2, 8000, 1000.0)));
    locator.add("adc0", ServiceRef::WaveformSource(source));

    let sensor: &'static sim::SimSensor =
        Box::leak(Box::new(sim::SimSensor::new()));
    locator.add("temp0", ServiceRef::Sensor(sensor));

    // Data-flow graph: splitter -> transforms -> sinks.
    let mut splitter = WsSource::new(source, router);
    splitter.set_ts_clock(clock);
    splitter.set_read_period_ms(5);
    splitter.add_channel(0, "acc/x", 256).expect("channel 0");
    splitter.add_channel(1, "acc/y", 256).expect("channel 1");

    let mut periodogram = MqPeriodogram::new(router);
    periodogram.set_window(Window::Hamming);
    periodogram.set_period(4);

    let mut stats = MqStats::new(router);
    stats.enable(StatsEnable::RMS | StatsEnable::MEAN);
    stats.set_full_scale(65536.0);

    let mut rms_batch = MqBatch::new(router);
    let mut sink = LogSink::new(router);
    let mut temp_source =
        SensorSource::new(sensor, "env/temp", router, Some(clock), 250)
            .expect("sensor source");

    // A storage sink: spectra end up in the flash FIFO.
    let psd_sub = router.open().expect("psd subscriber");
    psd_sub.subscribe("acc/x/psd").expect("subscribe psd");
    psd_sub.set_timeout(200).expect("timeout");

    periodogram
        .start("acc/x", "acc/x/psd", Dtype::I16, 256)
        .expect("periodogram");
    stats.start("acc/x", Dtype::I16, 256).expect("stats");
    rms_batch
        .start(Dtype::F32, 8, "acc/x/rms", "acc/x/rms/batch")
        .expect("rms batch");
    sink.start("env/temp").expect("log sink");
    temp_source.start().expect("sensor source");
    splitter.start(1).expect("splitter");

    info!(target: LOG, "pipeline running");

    // Drain spectra into the storage sink for a while.
    let wf = fifo.open("fifo", FsMode::WRITEONLY).expect("fifo open");
    let mut stored = 0usize;
    let deadline = osal::ticks_ms() + 2000;
    let mut topic = Topic::new();
    let mut spectrum = NdArray::empty(Dtype::F32, 256);
    let mut ts = Timespec::ZERO;
    while osal::ticks_ms() < deadline {
        if psd_sub
            .receive(&mut topic, &mut spectrum, &mut ts)
            .is_ok()
        {
            let bytes = spectrum.as_bytes();
            if let Ok(n) = fifo.write(wf, bytes) {
                stored += n;
            }
        }
    }
    fifo.close(wf).expect("fifo close");
    psd_sub.close().expect("psd close");

    // Orderly shutdown, sinks last.
    splitter.stop().expect("splitter stop");
    temp_source.stop().expect("sensor stop");
    sink.stop().expect("sink stop");
    rms_batch.stop().expect("batch stop");
    stats.stop().expect("stats stop");
    periodogram.stop().expect("periodogram stop");

    info!(target: LOG, "stored {} bytes of spectra", stored);
    for (name, tag) in locator.enumerate() {
        info!(target: LOG, "service '{}' ({:?})", name, tag);
    }
    let stats = fifo.stats().expect("fifo stats");
    info!(
        target: LOG,
        "fifo blocks: {} erased, {} head, {} fifo, {} tail",
        stats.erased,
        stats.head,
        stats.fifo,
        stats.tail
    );
    let records = syslog.with_records(|it| it.count());
    info!(target: LOG, "{} records in the system log", records);

    // The registry answers the queries services booted with.
    assert!(locator
        .query_name_type("plog-router", ServiceTag::Mq)
        .is_some());
}
