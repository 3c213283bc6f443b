// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message queue broker.
//!
//! A single broker instance switches `(topic, array, timestamp)`
//! messages between any number of clients. Publication is a synchronous
//! rendezvous per matching subscriber:
//!
//! 1. take the subscriber's delivery semaphore, so deliveries into one
//!    client never interleave;
//! 2. post the message reference into the subscriber's single-slot send
//!    mailbox;
//! 3. wait on the ack mailbox, which the subscriber posts after copying
//!    the payload into its own storage;
//! 4. release the semaphore.
//!
//! The broker never buffers or copies payloads. A subscriber that does
//! not pick the message up within the publisher's wait budget loses that
//! publication: the message is retracted from its mailbox and fan-out
//! continues with the next subscriber. Once a subscriber *has* taken the
//! message the publisher waits for the ack unconditionally — the copy is
//! in progress and completes promptly.
//!
//! Within one topic, each subscriber therefore sees messages in the
//! order a publisher issued them; across topics nothing is guaranteed.

mod filter;

pub use filter::topic_matches;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use iface::clock::Clock;
use iface::mq::{Mq, MqClient, MqError, Topic, TOPIC_LEN_MAX};
use iface::Timespec;
use log::info;
use ndbuf::NdArray;
use osal::{BinarySemaphore, Mailbox};

const LOG: &str = "mq-router";

pub const RX_TIMEOUT_MS_DEFAULT: u32 = 500;

/// Type-erased reference to the array being delivered.
///
/// The pointee lives on the publisher's stack. This stays sound because
/// the publisher never returns while the reference is reachable: it
/// either sees the ack, or it retracts the message from the send
/// mailbox before giving up. Receivers only dereference between taking
/// the message and posting the ack.
struct ArrayRef(*const NdArray<'static>);

unsafe impl Send for ArrayRef {}

impl ArrayRef {
    fn new(array: &NdArray<'_>) -> ArrayRef {
        let ptr = array as *const NdArray<'_> as *const NdArray<'static>;
        ArrayRef(ptr)
    }
}

struct SendMsg {
    topic: Topic,
    array: ArrayRef,
    ts: Timespec,
}

struct RouterClient {
    /// One topic filter per client; empty means not subscribed.
    filter: Mutex<Topic>,
    rx_timeout_ms: AtomicU32,
    /// Serializes deliveries into this client.
    delivery: BinarySemaphore,
    send_box: Mailbox<SendMsg>,
    ack_box: Mailbox<()>,
    closed: AtomicBool,
}

impl RouterClient {
    fn new() -> RouterClient {
        RouterClient {
            filter: Mutex::new(Topic::new()),
            rx_timeout_ms: AtomicU32::new(RX_TIMEOUT_MS_DEFAULT),
            delivery: BinarySemaphore::new(true),
            send_box: Mailbox::new(),
            ack_box: Mailbox::new(),
            closed: AtomicBool::new(false),
        }
    }
}

struct RouterInner {
    clients: Mutex<Vec<Arc<RouterClient>>>,
    clock: Mutex<Option<&'static dyn Clock>>,
}

/// The broker. Registered in the service locator as the system's `Mq`.
pub struct MqRouter {
    inner: Arc<RouterInner>,
}

impl Default for MqRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MqRouter {
    pub fn new() -> MqRouter {
        info!(target: LOG, "message router started");
        MqRouter {
            inner: Arc::new(RouterInner {
                clients: Mutex::new(Vec::new()),
                clock: Mutex::new(None),
            }),
        }
    }

    /// Clock used to timestamp messages published without a valid time.
    pub fn set_clock(&self, clock: &'static dyn Clock) {
        *self.inner.clock.lock().unwrap() = Some(clock);
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().unwrap().len()
    }
}

impl Mq for MqRouter {
    fn open(&self) -> Result<Box<dyn MqClient>, MqError> {
        let client = Arc::new(RouterClient::new());
        let mut clients = self.inner.clients.lock().unwrap();
        // Drop list entries for clients that have been closed; their
        // handles keep the allocation alive until dropped.
        clients.retain(|c| !c.closed.load(Ordering::Acquire));
        clients.push(Arc::clone(&client));
        drop(clients);
        Ok(Box::new(ClientHandle {
            inner: Arc::clone(&self.inner),
            client,
        }))
    }
}

pub struct ClientHandle {
    inner: Arc<RouterInner>,
    client: Arc<RouterClient>,
}

impl ClientHandle {
    fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(
            self.client.rx_timeout_ms.load(Ordering::Relaxed),
        ))
    }

    /// One rendezvous delivery; `Err(Timeout)` means this subscriber
    /// lost the publication.
    fn deliver(
        &self,
        to: &RouterClient,
        topic: &Topic,
        array: &NdArray<'_>,
        ts: Timespec,
    ) -> Result<(), MqError> {
        let budget = self.timeout();
        if !to.delivery.take(Some(budget)) {
            return Err(MqError::Timeout);
        }
        to.send_box.post(SendMsg {
            topic: topic.clone(),
            array: ArrayRef::new(array),
            ts,
        });
        let mut result = Ok(());
        if to.ack_box.pend(Some(budget)).is_none() {
            if to.send_box.try_take_back().is_some() {
                // Never picked up; the publication to this client is
                // dropped, not retried.
                result = Err(MqError::Timeout);
            } else {
                // The receiver holds the reference and will ack as
                // soon as its copy completes.
                to.ack_box.pend(None);
            }
        }
        to.delivery.give();
        result
    }
}

impl MqClient for ClientHandle {
    fn subscribe(&self, filter: &str) -> Result<(), MqError> {
        if filter.len() > TOPIC_LEN_MAX {
            return Err(MqError::BadArg);
        }
        let mut current = self.client.filter.lock().unwrap();
        current.clear();
        current.push_str(filter).map_err(|_| MqError::BadArg)?;
        Ok(())
    }

    fn unsubscribe(&self, _filter: &str) -> Result<(), MqError> {
        self.client.filter.lock().unwrap().clear();
        Ok(())
    }

    fn publish(
        &self,
        topic: &str,
        array: &NdArray<'_>,
        ts: &Timespec,
    ) -> Result<(), MqError> {
        if topic.is_empty() || topic.len() > TOPIC_LEN_MAX {
            return Err(MqError::BadArg);
        }
        if self.client.closed.load(Ordering::Acquire) {
            return Err(MqError::NotOpened);
        }
        let mut topic_buf = Topic::new();
        topic_buf.push_str(topic).map_err(|_| MqError::BadArg)?;

        // Messages published without a valid time get stamped by the
        // router's clock, when one is configured.
        let mut ts = *ts;
        if ts.is_zero() {
            if let Some(clock) = *self.inner.clock.lock().unwrap() {
                if let Ok(now) = clock.get() {
                    ts = now;
                }
            }
        }

        let snapshot: Vec<Arc<RouterClient>> =
            self.inner.clients.lock().unwrap().clone();
        for c in snapshot {
            if c.closed.load(Ordering::Acquire) {
                continue;
            }
            let filter = c.filter.lock().unwrap().clone();
            if filter.is_empty() || !topic_matches(&filter, topic) {
                continue;
            }
            // A subscriber timing out is its loss, not the
            // publisher's failure.
            let _ = self.deliver(&c, &topic_buf, array, ts);
        }
        Ok(())
    }

    fn receive(
        &self,
        topic: &mut Topic,
        array: &mut NdArray<'_>,
        ts: &mut Timespec,
    ) -> Result<(), MqError> {
        if self.client.closed.load(Ordering::Acquire) {
            return Err(MqError::NotOpened);
        }
        let msg = self
            .client
            .send_box
            .pend(Some(self.timeout()))
            .ok_or(MqError::Timeout)?;

        topic.clear();
        // The stored topic already fits the bounded length.
        let _ = topic.push_str(&msg.topic);
        *ts = msg.ts;

        // Safety: the publisher is blocked on our ack mailbox (it found
        // the send mailbox empty when its wait expired, if it expired),
        // so the referent is alive until we post the ack below. The ack
        // must be posted on every path out of here, or the publisher
        // never wakes.
        let payload = unsafe { &*msg.array.0 };
        let copied = array
            .reset(payload.dtype())
            .and_then(|()| array.append(payload).map(|_| ()));

        self.client.ack_box.post(());
        copied.map_err(|_| MqError::BadArg)
    }

    fn set_timeout(&self, timeout_ms: u32) -> Result<(), MqError> {
        self.client
            .rx_timeout_ms
            .store(timeout_ms, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<(), MqError> {
        self.client.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndbuf::Dtype;
    use std::time::Instant;

    fn router() -> &'static MqRouter {
        Box::leak(Box::new(MqRouter::new()))
    }

    fn recv_buf() -> NdArray<'static> {
        NdArray::empty(Dtype::F32, 64)
    }

    #[test]
    fn receive_times_out() {
        let mq = router();
        let c = mq.open().unwrap();
        c.subscribe("a/#").unwrap();
        c.set_timeout(10).unwrap();

        let mut topic = Topic::new();
        let mut arr = recv_buf();
        let mut ts = Timespec::ZERO;
        let start = Instant::now();
        assert_eq!(
            c.receive(&mut topic, &mut arr, &mut ts),
            Err(MqError::Timeout),
        );
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn fan_out_in_registration_order() {
        let mq = router();
        let c1 = mq.open().unwrap();
        c1.subscribe("a/#").unwrap();
        let c2 = mq.open().unwrap();
        c2.subscribe("a/b").unwrap();
        let publisher = mq.open().unwrap();

        let t = std::thread::spawn(move || {
            let data = NdArray::from_elems(&[1.0f32, 2.0]);
            publisher
                .publish("a/b", &data, &Timespec::ZERO)
                .unwrap();
        });

        let mut topic = Topic::new();
        let mut arr = recv_buf();
        let mut ts = Timespec::ZERO;

        // Delivery is ordered: until the first subscriber consumes the
        // message, the second sees nothing.
        c2.set_timeout(30).unwrap();
        assert_eq!(
            c2.receive(&mut topic, &mut arr, &mut ts),
            Err(MqError::Timeout),
        );

        c1.receive(&mut topic, &mut arr, &mut ts).unwrap();
        assert_eq!(topic.as_str(), "a/b");
        assert_eq!(arr.len(), 2);
        assert_eq!(arr.get::<f32>(1), 2.0);

        c2.set_timeout(1000).unwrap();
        c2.receive(&mut topic, &mut arr, &mut ts).unwrap();
        assert_eq!(arr.get::<f32>(0), 1.0);
        t.join().unwrap();
    }

    #[test]
    fn non_matching_topic_skips_subscriber() {
        let mq = router();
        let c1 = mq.open().unwrap();
        c1.subscribe("a/#").unwrap();
        let c2 = mq.open().unwrap();
        c2.subscribe("a/b").unwrap();
        let publisher = mq.open().unwrap();

        let t = std::thread::spawn(move || {
            let data = NdArray::from_elems(&[7i16]);
            publisher
                .publish("a/c", &data, &Timespec::ZERO)
                .unwrap();
        });

        let mut topic = Topic::new();
        let mut arr = recv_buf();
        let mut ts = Timespec::ZERO;
        c1.receive(&mut topic, &mut arr, &mut ts).unwrap();
        assert_eq!(topic.as_str(), "a/c");
        // The receive adopted the incoming dtype.
        assert_eq!(arr.dtype(), Dtype::I16);
        assert_eq!(arr.get::<i16>(0), 7);

        c2.set_timeout(20).unwrap();
        assert_eq!(
            c2.receive(&mut topic, &mut arr, &mut ts),
            Err(MqError::Timeout),
        );
        t.join().unwrap();
    }

    #[test]
    fn unresponsive_subscriber_drops_publication() {
        let mq = router();
        let sub = mq.open().unwrap();
        sub.subscribe("slow/#").unwrap();
        let publisher = mq.open().unwrap();
        publisher.set_timeout(30).unwrap();

        let data = NdArray::from_elems(&[1u8]);
        let start = Instant::now();
        publisher
            .publish("slow/x", &data, &Timespec::ZERO)
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));

        // The dropped message must not linger in the mailbox.
        let mut topic = Topic::new();
        let mut arr = recv_buf();
        let mut ts = Timespec::ZERO;
        sub.set_timeout(20).unwrap();
        assert_eq!(
            sub.receive(&mut topic, &mut arr, &mut ts),
            Err(MqError::Timeout),
        );
    }

    #[test]
    fn timestamps_pass_through() {
        let mq = router();
        let sub = mq.open().unwrap();
        sub.subscribe("t").unwrap();
        let publisher = mq.open().unwrap();

        let sent = Timespec { sec: 1234, nsec: 5678 };
        let t = std::thread::spawn(move || {
            let data = NdArray::from_elems(&[0.5f32]);
            publisher.publish("t", &data, &sent).unwrap();
        });

        let mut topic = Topic::new();
        let mut arr = recv_buf();
        let mut ts = Timespec::ZERO;
        sub.receive(&mut topic, &mut arr, &mut ts).unwrap();
        assert_eq!(ts, sent);
        t.join().unwrap();
    }

    #[test]
    fn overlong_filter_rejected() {
        let mq = router();
        let c = mq.open().unwrap();
        let long = "x/".repeat(40);
        assert_eq!(c.subscribe(&long), Err(MqError::BadArg));
    }

    #[test]
    fn closed_client_not_delivered() {
        let mq = router();
        let sub = mq.open().unwrap();
        sub.subscribe("#").unwrap();
        sub.close().unwrap();

        let publisher = mq.open().unwrap();
        let data = NdArray::from_elems(&[1u8]);
        let start = Instant::now();
        publisher.publish("x", &data, &Timespec::ZERO).unwrap();
        // No rendezvous was attempted.
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
