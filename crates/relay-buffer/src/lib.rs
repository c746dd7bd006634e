//! A thread-safe, FIFO mailbox for whole envelopes that separates messages
//! solicited by conversation id from anything else ("untagged").
//!
//! This is the one structure in the routing core touched from more than one
//! OS thread at a time (the pipe handler's I/O thread and its caller
//! threads), so it is built on plain `std::sync::{Mutex, Condvar}` rather
//! than an async primitive: caller threads block without needing an
//! executor.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use relay_wire::Envelope;

/// Raised by [`MessageBuffer::wait_for_message`] when no matching message
/// arrives before the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout;

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timed out waiting for message")
    }
}

impl std::error::Error for Timeout {}

struct Inner {
    queue: VecDeque<Envelope>,
    expected: HashSet<[u8; 16]>,
}

/// Thread-safe mailbox of buffered envelopes. See module docs.
pub struct MessageBuffer {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { queue: VecDeque::new(), expected: HashSet::new() }),
            condvar: Condvar::new(),
        }
    }

    /// Mark `cid` as expected: a message bearing it will be reserved for a
    /// specific waiter and never handed to the untagged reader.
    pub fn add_conversation_id(&self, cid: [u8; 16]) {
        let mut inner = self.inner.lock().expect("message buffer mutex poisoned");
        inner.expected.insert(cid);
    }

    /// Append a message to the back of the queue and wake any waiters.
    pub fn add_message(&self, message: Envelope) {
        let mut inner = self.inner.lock().expect("message buffer mutex poisoned");
        inner.queue.push_back(message);
        drop(inner);
        self.condvar.notify_all();
    }

    /// Return and remove the first message bearing `cid`, clearing its
    /// expectation. Returns `None` immediately if no such message is
    /// currently buffered (does not block).
    pub fn retrieve_message(&self, cid: [u8; 16]) -> Option<Envelope> {
        let mut inner = self.inner.lock().expect("message buffer mutex poisoned");
        Self::take_expected(&mut inner, cid)
    }

    /// Return and remove the first message whose conversation id is *not*
    /// in the expected set. Returns `None` immediately if none is buffered.
    pub fn retrieve_untagged(&self) -> Option<Envelope> {
        let mut inner = self.inner.lock().expect("message buffer mutex poisoned");
        Self::take_untagged(&mut inner)
    }

    /// Block the calling thread until a message bearing `cid` is added, or
    /// `timeout` elapses.
    pub fn wait_for_message(&self, cid: [u8; 16], timeout: Duration) -> Result<Envelope, Timeout> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().expect("message buffer mutex poisoned");
        loop {
            if let Some(msg) = Self::take_expected(&mut inner, cid) {
                return Ok(msg);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Timeout);
            }
            let (guard, result) = self
                .condvar
                .wait_timeout(inner, deadline - now)
                .expect("message buffer condvar poisoned");
            inner = guard;
            if result.timed_out() && !inner.queue.iter().any(|m| m.conversation_id == cid) {
                return Err(Timeout);
            }
        }
    }

    fn take_expected(inner: &mut Inner, cid: [u8; 16]) -> Option<Envelope> {
        let pos = inner.queue.iter().position(|m| m.conversation_id == cid)?;
        inner.expected.remove(&cid);
        inner.queue.remove(pos)
    }

    fn take_untagged(inner: &mut Inner) -> Option<Envelope> {
        let pos = inner.queue.iter().position(|m| !inner.expected.contains(&m.conversation_id))?;
        inner.queue.remove(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_wire::MessageType;

    fn msg(cid: [u8; 16]) -> Envelope {
        Envelope::new(
            bytes::Bytes::from_static(b"n1.A"),
            bytes::Bytes::from_static(b"n1.B"),
            MessageType::Json,
        )
        .with_conversation_id(cid)
    }

    #[test]
    fn expected_message_never_seen_by_untagged_reader() {
        let buf = MessageBuffer::new();
        let cid = [1u8; 16];
        buf.add_conversation_id(cid);
        buf.add_message(msg(cid));
        buf.add_message(msg([2u8; 16]));

        let untagged = buf.retrieve_untagged().unwrap();
        assert_eq!(untagged.conversation_id, [2u8; 16]);
        assert!(buf.retrieve_untagged().is_none());

        let expected = buf.retrieve_message(cid).unwrap();
        assert_eq!(expected.conversation_id, cid);
    }

    #[test]
    fn fifo_order_preserved_among_untagged() {
        let buf = MessageBuffer::new();
        buf.add_message(msg([1u8; 16]));
        buf.add_message(msg([2u8; 16]));
        assert_eq!(buf.retrieve_untagged().unwrap().conversation_id, [1u8; 16]);
        assert_eq!(buf.retrieve_untagged().unwrap().conversation_id, [2u8; 16]);
    }

    #[test]
    fn wait_for_message_times_out_when_nothing_arrives() {
        let buf = MessageBuffer::new();
        let cid = [9u8; 16];
        buf.add_conversation_id(cid);
        let result = buf.wait_for_message(cid, Duration::from_millis(20));
        assert_eq!(result, Err(Timeout));
    }

    #[test]
    fn wait_for_message_wakes_on_matching_insert() {
        use std::sync::Arc;
        use std::thread;

        let buf = Arc::new(MessageBuffer::new());
        let cid = [7u8; 16];
        buf.add_conversation_id(cid);

        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                buf.add_message(msg(cid));
            })
        };

        let received = buf.wait_for_message(cid, Duration::from_secs(1)).unwrap();
        assert_eq!(received.conversation_id, cid);
        writer.join().unwrap();
    }

    #[test]
    fn retrieve_message_returns_none_without_blocking() {
        let buf = MessageBuffer::new();
        assert!(buf.retrieve_message([0u8; 16]).is_none());
    }
}
