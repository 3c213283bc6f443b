// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thin port of the RTOS primitives the services are written against.
//!
//! The firmware proper runs its services as preemptive RTOS tasks blocking
//! on semaphores and single-slot queues. This crate provides the same
//! vocabulary (tasks, capacity-1 mailboxes, binary semaphores, tick
//! sleeps) implemented over `std::thread` and `Condvar`, so the service
//! crates read the way the target code does while remaining buildable and
//! testable on a host.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Milliseconds since an arbitrary (per-process) epoch. Monotonic.
pub fn ticks_ms() -> u64 {
    static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

pub fn sleep_ms(ms: u32) {
    std::thread::sleep(Duration::from_millis(u64::from(ms)));
}

/// A spawned service task. Joining is how `stop` waits for the loop to
/// observe `can_run == false` and unwind.
pub struct Task {
    handle: std::thread::JoinHandle<()>,
}

impl Task {
    /// Spawns a named task. Priority is accepted for parity with the
    /// target API; the host scheduler ignores it.
    pub fn spawn<F>(name: &str, _prio: u32, f: F) -> std::io::Result<Task>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle =
            std::thread::Builder::new().name(name.to_string()).spawn(f)?;
        Ok(Task { handle })
    }

    pub fn join(self) {
        // A panicked service task has already logged its failure; the
        // joiner must not propagate it into the stopping thread.
        let _ = self.handle.join();
    }
}

/// Capacity-1 queue. `post` blocks while the slot is occupied and returns
/// once the value is *enqueued* (not once it is taken); `pend` blocks up
/// to the timeout for a value to appear.
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    posted: Condvar,
    taken: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub const fn new() -> Self {
        Mailbox {
            slot: Mutex::new(None),
            posted: Condvar::new(),
            taken: Condvar::new(),
        }
    }

    /// Blocks while the mailbox is full, then deposits `value`.
    pub fn post(&self, value: T) {
        let mut slot = self.slot.lock().unwrap();
        while slot.is_some() {
            slot = self.taken.wait(slot).unwrap();
        }
        *slot = Some(value);
        self.posted.notify_one();
    }

    /// Non-blocking post; hands the value back if the slot is occupied.
    pub fn try_post(&self, value: T) -> Result<(), T> {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_some() {
            return Err(value);
        }
        *slot = Some(value);
        self.posted.notify_one();
        Ok(())
    }

    /// Waits for a value. `None` timeout blocks indefinitely.
    pub fn pend(&self, timeout: Option<Duration>) -> Option<T> {
        let mut slot = self.slot.lock().unwrap();
        match timeout {
            None => {
                while slot.is_none() {
                    slot = self.posted.wait(slot).unwrap();
                }
            }
            Some(t) => {
                let deadline = Instant::now() + t;
                while slot.is_none() {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, _) = self
                        .posted
                        .wait_timeout(slot, deadline - now)
                        .unwrap();
                    slot = guard;
                }
            }
        }
        let value = slot.take();
        self.taken.notify_one();
        value
    }

    /// Retracts a value the consumer has not picked up yet. Used by a
    /// poster that gives up on a delivery: either the value is still
    /// here (returned, delivery never happened) or the consumer already
    /// holds it.
    pub fn try_take_back(&self) -> Option<T> {
        let mut slot = self.slot.lock().unwrap();
        let value = slot.take();
        if value.is_some() {
            self.taken.notify_one();
        }
        value
    }
}

/// Binary semaphore with a timed take, matching the RTOS mutex-style
/// usage in the broker's delivery path.
pub struct BinarySemaphore {
    avail: Mutex<bool>,
    cv: Condvar,
}

impl BinarySemaphore {
    pub const fn new(initial: bool) -> Self {
        BinarySemaphore {
            avail: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    /// Takes the semaphore, waiting up to `timeout` (`None` = forever).
    /// Returns false if the wait timed out.
    pub fn take(&self, timeout: Option<Duration>) -> bool {
        let mut avail = self.avail.lock().unwrap();
        match timeout {
            None => {
                while !*avail {
                    avail = self.cv.wait(avail).unwrap();
                }
            }
            Some(t) => {
                let deadline = Instant::now() + t;
                while !*avail {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) =
                        self.cv.wait_timeout(avail, deadline - now).unwrap();
                    avail = guard;
                }
            }
        }
        *avail = false;
        true
    }

    pub fn give(&self) {
        let mut avail = self.avail.lock().unwrap();
        *avail = true;
        self.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn mailbox_rendezvous() {
        let mb = Arc::new(Mailbox::new());
        let mb2 = Arc::clone(&mb);
        let t = std::thread::spawn(move || {
            mb2.post(41u32);
            mb2.post(42u32);
        });
        assert_eq!(mb.pend(None), Some(41));
        assert_eq!(mb.pend(Some(Duration::from_secs(1))), Some(42));
        t.join().unwrap();
    }

    #[test]
    fn mailbox_pend_timeout() {
        let mb: Mailbox<u32> = Mailbox::new();
        let start = Instant::now();
        assert_eq!(mb.pend(Some(Duration::from_millis(20))), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn mailbox_take_back() {
        let mb = Mailbox::new();
        mb.post(7u8);
        assert_eq!(mb.try_take_back(), Some(7));
        assert_eq!(mb.try_take_back(), None);
    }

    #[test]
    fn semaphore_contention() {
        let sem = Arc::new(BinarySemaphore::new(true));
        assert!(sem.take(None));
        assert!(!sem.take(Some(Duration::from_millis(10))));
        let sem2 = Arc::clone(&sem);
        let t = std::thread::spawn(move || sem2.give());
        assert!(sem.take(Some(Duration::from_secs(1))));
        t.join().unwrap();
    }
}
