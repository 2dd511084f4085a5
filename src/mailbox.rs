//! The per-instance message mailbox.
//!
//! An unbounded, intrusive multi-producer single-consumer queue (the single-consumer
//! specialization of a Vyukov-style lock-free queue family) paired with a `Mutex<()>`
//! and `Condvar` used only to park and wake the one consumer thread. Enqueue never
//! takes the lock-free fast path away; the mutex is only acquired briefly to publish a
//! wakeup when a consumer might be asleep. The consumer takes the same lock around its
//! "is the queue really empty" recheck, which is what keeps a wakeup from being lost: a
//! producer's publish-plus-notify can only interleave either entirely before or
//! entirely after the consumer's locked recheck, never in the gap between the recheck
//! and the condvar wait.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: Option<T>,
}

impl<T> Node<T> {
    fn new(value: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value,
        }))
    }
}

/// Intrusive MPSC linked-list queue.
///
/// Safety invariant relied on throughout: `tail` (the consumer's local cursor) is only
/// ever read and written by the single consumer thread. `head` (the producers'
/// insertion point) is only ever touched via atomic swap/CAS from any thread.
struct RawQueue<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
}

unsafe impl<T: Send> Send for RawQueue<T> {}
unsafe impl<T: Send> Sync for RawQueue<T> {}

impl<T> RawQueue<T> {
    fn new() -> Self {
        // Start with one dummy node so push/pop never have to special-case "empty".
        let stub = Node::new(None);
        RawQueue {
            head: CachePadded::new(AtomicPtr::new(stub)),
            tail: CachePadded::new(AtomicPtr::new(stub)),
        }
    }

    /// Enqueue a value. Callable from any number of producer threads concurrently.
    fn push(&self, value: T) {
        let node = Node::new(Some(value));
        // `swap` is the only synchronization point producers contend on; the previous
        // head's `next` link is published after the swap, so a consumer walking from
        // `tail` may briefly see a node whose `next` is still null even though another
        // push has already claimed `head` — it just hasn't linked yet. The consumer
        // treats that as "queue looks empty for now" and tries again.
        let prev = self.head.swap(node, Ordering::AcqRel);
        unsafe {
            (*prev).next.store(node, Ordering::Release);
        }
    }

    /// Dequeue a value. Must only be called by the single consumer thread.
    fn pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = unsafe { (*tail).next.load(Ordering::Acquire) };
        if next.is_null() {
            return None;
        }
        let value = unsafe { (*next).value.take() };
        self.tail.store(next, Ordering::Relaxed);
        unsafe {
            drop(Box::from_raw(tail));
        }
        value
    }
}

impl<T> Drop for RawQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
        // Free the remaining stub node.
        let tail = *self.tail.get_mut();
        unsafe {
            drop(Box::from_raw(tail));
        }
    }
}

/// Outcome of a consumer-side wait on the mailbox.
pub(crate) enum Recv<T> {
    Message(T),
    TimedOut,
    Stopped,
}

/// The mailbox: a [`RawQueue`] plus park/wake coordination and a closed flag.
pub(crate) struct Mailbox<T> {
    queue: RawQueue<T>,
    lock: Mutex<()>,
    cvar: Condvar,
    closed: AtomicBool,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        Mailbox {
            queue: RawQueue::new(),
            lock: Mutex::new(()),
            cvar: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a value from any thread. Never blocks beyond the brief notify lock.
    pub(crate) fn push(&self, value: T) {
        self.queue.push(value);
        tracing::trace!("mailbox: message enqueued");
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.cvar.notify_one();
    }

    /// Idempotently close the mailbox and wake a blocked consumer immediately.
    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("mailbox: closed");
        }
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.cvar.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Called only by the owning worker. Waits until a message arrives, `deadline`
    /// elapses, or the mailbox is closed and drained.
    pub(crate) fn dequeue_wait(&self, deadline: Option<Instant>) -> Recv<T> {
        loop {
            if let Some(v) = self.queue.pop() {
                tracing::trace!("mailbox: message dequeued");
                return Recv::Message(v);
            }
            if self.closed.load(Ordering::Acquire) {
                if let Some(v) = self.queue.pop() {
                    return Recv::Message(v);
                }
                return Recv::Stopped;
            }

            let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            // Re-check under the same lock producers use to notify: if a push+notify
            // happened between the unlocked pop() above and taking this lock, it is
            // either fully visible now (we'll find the message) or the notify is still
            // pending and will wake us out of `wait`/`wait_timeout` below.
            if let Some(v) = self.queue.pop() {
                return Recv::Message(v);
            }
            if self.closed.load(Ordering::Acquire) {
                return Recv::Stopped;
            }

            match deadline {
                None => {
                    let _guard = self.cvar.wait(guard).unwrap_or_else(|e| e.into_inner());
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Recv::TimedOut;
                    }
                    let (_guard, timeout) = self
                        .cvar
                        .wait_timeout(guard, d - now)
                        .unwrap_or_else(|e| e.into_inner());
                    if timeout.timed_out() {
                        // Loop back around once more: a message or close may have
                        // raced in right as the wait timed out. If there's truly
                        // nothing, the next iteration's deadline check returns
                        // TimedOut without waiting again.
                        continue;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_fifo_single_producer() {
        let mailbox: Mailbox<i32> = Mailbox::new();
        mailbox.push(1);
        mailbox.push(2);
        mailbox.push(3);
        assert!(matches!(mailbox.dequeue_wait(None), Recv::Message(1)));
        assert!(matches!(mailbox.dequeue_wait(None), Recv::Message(2)));
        assert!(matches!(mailbox.dequeue_wait(None), Recv::Message(3)));
    }

    #[test]
    fn dequeue_wait_times_out_when_empty() {
        let mailbox: Mailbox<i32> = Mailbox::new();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(mailbox.dequeue_wait(Some(deadline)), Recv::TimedOut));
    }

    #[test]
    fn close_wakes_a_blocked_consumer() {
        let mailbox = Arc::new(Mailbox::<i32>::new());
        let consumer = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || mailbox.dequeue_wait(None))
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.close();
        assert!(matches!(consumer.join().unwrap(), Recv::Stopped));
    }

    #[test]
    fn two_producers_preserve_per_producer_order() {
        let mailbox = Arc::new(Mailbox::<(u8, u32)>::new());
        let mut producers = Vec::new();
        for p in 0..2u8 {
            let mailbox = Arc::clone(&mailbox);
            producers.push(thread::spawn(move || {
                for i in 0..200u32 {
                    mailbox.push((p, i));
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }

        let mut last_seen = [None::<u32>, None::<u32>];
        for _ in 0..400 {
            match mailbox.dequeue_wait(None) {
                Recv::Message((p, i)) => {
                    if let Some(prev) = last_seen[p as usize] {
                        assert!(i > prev, "producer {p} order violated: {prev} then {i}");
                    }
                    last_seen[p as usize] = Some(i);
                }
                _ => panic!("expected a message"),
            }
        }
    }
}
