// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Circular system log.
//!
//! Log records live in a single byte buffer so that the most recent
//! history survives in RAM and can be dumped over a console or carried
//! across a warm reboot. Each record is an 8-byte header followed by a
//! NUL-terminated message:
//!
//! ```text
//! [type: u8] [flags: u8] [len: u16 BE] [time: u32 BE] [msg... NUL]
//! ```
//!
//! `len` counts the message bytes including the NUL. Flag bit `0x80` on
//! a record means the *next* record wrapped to offset 0. When space runs
//! out the oldest records are truncated.
//!
//! [`SystemLog`] adapts the buffer to the `log` facade so services log
//! with the ordinary `info!`/`warn!`/`error!` macros.

use std::sync::Mutex;

pub const MSG_LEN_MAX: usize = 128;
const HEADER_LEN: usize = 8;

/// "Next record is at offset 0" marker.
pub const HEADER_OVR: u8 = 0x80;
const TYPE_MASK: u8 = 0x7f;

/// Record severity, stored in the header type byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LogType {
    Null = 0,
    Info = 1,
    Debug = 2,
    Warn = 3,
    Error = 4,
    Crit = 5,
    Assert = 6,
}

impl From<u8> for LogType {
    fn from(v: u8) -> Self {
        match v & TYPE_MASK {
            1 => LogType::Info,
            2 => LogType::Debug,
            3 => LogType::Warn,
            4 => LogType::Error,
            5 => LogType::Crit,
            6 => LogType::Assert,
            _ => LogType::Null,
        }
    }
}

/// A decoded record, borrowed from the buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Record<'a> {
    pub rtype: LogType,
    pub time: u32,
    pub msg: &'a str,
}

type TimeHandler = Box<dyn Fn() -> u32 + Send>;

pub struct LogBuffer {
    d: Vec<u8>,
    blk_first: usize,
    blk_last: usize,
    time_handler: Option<TimeHandler>,
}

impl LogBuffer {
    /// Creates a buffer of `size` bytes. `size` must hold at least one
    /// maximum-length record.
    pub fn new(size: usize) -> LogBuffer {
        assert!(size >= HEADER_LEN + MSG_LEN_MAX + 1);
        let mut buf = LogBuffer {
            d: vec![0; size],
            blk_first: 0,
            blk_last: 0,
            time_handler: None,
        };
        buf.place(0, LogType::Info, "log buffer initialized");
        buf
    }

    /// Installs the callback supplying record timestamps.
    pub fn set_time_handler(&mut self, handler: TimeHandler) {
        self.time_handler = Some(handler);
    }

    fn record_len(&self, pos: usize) -> usize {
        usize::from(u16::from_be_bytes([self.d[pos + 2], self.d[pos + 3]]))
    }

    /// Position of the record following `pos`.
    fn next_block(&self, pos: usize) -> usize {
        if self.d[pos] & HEADER_OVR != 0 {
            0
        } else {
            pos + HEADER_LEN + self.record_len(pos)
        }
    }

    fn place(&mut self, pos: usize, rtype: LogType, msg: &str) {
        let msg = &msg.as_bytes()[..msg.len().min(MSG_LEN_MAX)];
        let time = self.time_handler.as_ref().map_or(0, |h| h());
        let len = msg.len() + 1;
        self.d[pos] = rtype as u8;
        self.d[pos + 1] = 0;
        self.d[pos + 2..pos + 4]
            .copy_from_slice(&(len as u16).to_be_bytes());
        self.d[pos + 4..pos + 8].copy_from_slice(&time.to_be_bytes());
        self.d[pos + 8..pos + 8 + msg.len()].copy_from_slice(msg);
        self.d[pos + 8 + msg.len()] = 0;
        self.blk_last = pos;
    }

    /// Drops the oldest record.
    pub fn truncate(&mut self) {
        self.blk_first = self.next_block(self.blk_first);
    }

    /// Appends a record, truncating old history as needed.
    pub fn append(&mut self, rtype: LogType, msg: &str) {
        let need =
            HEADER_LEN + msg.len().min(MSG_LEN_MAX) + 1;
        let mut new_pos = self.next_block(self.blk_last);
        loop {
            if new_pos > self.blk_first {
                // Growing towards the end of the buffer.
                if need < self.d.len() - new_pos {
                    break;
                }
                // Wrap; mark the current last record so readers follow.
                self.d[self.blk_last] |= HEADER_OVR;
                new_pos = 0;
            } else {
                // Writing below the oldest record.
                if need < self.blk_first - new_pos {
                    break;
                }
                if self.blk_first == self.blk_last {
                    // Out of history to drop; restart the buffer.
                    self.blk_first = 0;
                    new_pos = 0;
                    break;
                }
                self.truncate();
            }
        }
        self.place(new_pos, rtype, msg);
    }

    /// All records, oldest first.
    pub fn records(&self) -> RecordIter<'_> {
        RecordIter {
            buf: self,
            pos: Some(self.blk_first),
        }
    }

    fn record_at(&self, pos: usize) -> Record<'_> {
        let len = self.record_len(pos);
        let raw = &self.d[pos + HEADER_LEN..pos + HEADER_LEN + len - 1];
        Record {
            rtype: LogType::from(self.d[pos]),
            time: u32::from_be_bytes([
                self.d[pos + 4],
                self.d[pos + 5],
                self.d[pos + 6],
                self.d[pos + 7],
            ]),
            msg: core::str::from_utf8(raw).unwrap_or(""),
        }
    }
}

pub struct RecordIter<'a> {
    buf: &'a LogBuffer,
    pos: Option<usize>,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        let pos = self.pos?;
        let rec = self.buf.record_at(pos);
        self.pos = if pos == self.buf.blk_last {
            None
        } else {
            Some(self.buf.next_block(pos))
        };
        Some(rec)
    }
}

/// `log` facade backend appending into a [`LogBuffer`], optionally
/// mirroring to stderr.
pub struct SystemLog {
    buf: Mutex<LogBuffer>,
    mirror_stderr: bool,
}

impl SystemLog {
    pub fn new(size: usize, mirror_stderr: bool) -> SystemLog {
        SystemLog {
            buf: Mutex::new(LogBuffer::new(size)),
            mirror_stderr,
        }
    }

    /// Installs this as the process logger. Called once at boot.
    pub fn install(
        size: usize,
        mirror_stderr: bool,
        level: log::LevelFilter,
    ) -> &'static SystemLog {
        let slog = Box::leak(Box::new(SystemLog::new(size, mirror_stderr)));
        if log::set_logger(slog).is_ok() {
            log::set_max_level(level);
        }
        slog
    }

    pub fn set_time_handler(&self, handler: TimeHandler) {
        self.buf.lock().unwrap().set_time_handler(handler);
    }

    /// Runs `f` over the record history, oldest first.
    pub fn with_records<R>(
        &self,
        f: impl FnOnce(RecordIter<'_>) -> R,
    ) -> R {
        let buf = self.buf.lock().unwrap();
        f(buf.records())
    }
}

fn level_to_type(level: log::Level) -> LogType {
    match level {
        log::Level::Error => LogType::Error,
        log::Level::Warn => LogType::Warn,
        log::Level::Info => LogType::Info,
        log::Level::Debug | log::Level::Trace => LogType::Debug,
    }
}

impl log::Log for SystemLog {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("{}: {}", record.target(), record.args());
        if self.mirror_stderr {
            eprintln!("[{}] {}", record.level(), line);
        }
        self.buf
            .lock()
            .unwrap()
            .append(level_to_type(record.level()), &line);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let mut buf = LogBuffer::new(1024);
        buf.set_time_handler(Box::new(|| 0x01020304));
        buf.append(LogType::Warn, "hi");
        let pos = buf.blk_last;
        assert_eq!(buf.d[pos], LogType::Warn as u8);
        assert_eq!(buf.d[pos + 1], 0);
        // len counts the NUL.
        assert_eq!(u16::from_be_bytes([buf.d[pos + 2], buf.d[pos + 3]]), 3);
        assert_eq!(
            &buf.d[pos + 4..pos + 8],
            &[0x01, 0x02, 0x03, 0x04],
        );
        assert_eq!(&buf.d[pos + 8..pos + 11], b"hi\0");
    }

    #[test]
    fn records_in_order() {
        let mut buf = LogBuffer::new(1024);
        buf.append(LogType::Info, "one");
        buf.append(LogType::Error, "two");
        let msgs: Vec<String> =
            buf.records().map(|r| r.msg.to_string()).collect();
        assert_eq!(
            msgs,
            vec!["log buffer initialized", "one", "two"],
        );
    }

    #[test]
    fn wrap_sets_ovr_and_truncates() {
        let mut buf = LogBuffer::new(160);
        for i in 0..64 {
            buf.append(LogType::Info, &format!("record number {i:03}"));
        }
        // The newest record must always be present and the chain from
        // blk_first must reach it.
        let last: Vec<Record<'_>> = buf.records().collect();
        assert_eq!(last.last().unwrap().msg, "record number 063");
        // The buffer can only hold a couple of records of this size.
        assert!(last.len() < 8);
    }

    #[test]
    fn long_messages_are_capped() {
        let mut buf = LogBuffer::new(512);
        let long = "x".repeat(400);
        buf.append(LogType::Info, &long);
        let rec: Vec<Record<'_>> = buf.records().collect();
        assert_eq!(rec.last().unwrap().msg.len(), MSG_LEN_MAX);
    }
}
