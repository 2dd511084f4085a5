//! The runner façade: `create`, `run`, `ActiveHandle::send/stop/timer_*`, and the
//! worker loop that ties the mailbox, dispatch, and timer set together.
//!
//! # Lifecycle design
//!
//! `O` (the active object's state) is never placed behind `Arc`; it lives as a plain
//! local variable owned by the worker thread's stack frame for as long as the worker
//! runs. Only the concurrency substrate — the mailbox, an external reference count,
//! and the run-state — lives behind `Arc<Shared<O>>`. `ActiveHandle<O>`'s `Clone`/`Drop`
//! impls maintain `external_refs` by hand; the `Drop` that brings it to zero closes
//! the mailbox, which wakes a blocked worker and makes it observe `Stopped`. This is
//! the "explicit drop notification from the shared-handle control block" alternative
//! `spec.md` §4.5/§9 names alongside weak-handle polling — see `SPEC_FULL.md`
//! REDESIGN FLAGS for why it was chosen over polling a `Weak::upgrade()`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::context::{ActiveObject, Context, Handles};
use crate::error::{ActiveObjectError, ActiveObjectResult};
use crate::mailbox::{Mailbox, Recv};
use crate::timer::{Cycle, TimerSet};

const CONSTRUCTED: u8 = 0;
const STARTED: u8 = 1;
const STOPPING: u8 = 2;
const STOPPED: u8 = 3;

/// The work a dispatched envelope performs, type-erased over the payload (but not
/// over the object type `O`).
enum Envelope<O: ActiveObject> {
    Dispatch(Box<dyn FnOnce(&mut O, &mut Context<'_, O>) + Send>),
    TimerOp(Box<dyn FnOnce(&mut TimerSet<O>) + Send>),
    Stop,
}

/// The concurrency substrate shared between every `ActiveHandle<O>` and the worker
/// thread. Contains no `O`.
pub(crate) struct Shared<O: ActiveObject> {
    mailbox: Mailbox<Envelope<O>>,
    external_refs: AtomicUsize,
    state: AtomicU8,
}

impl<O: ActiveObject> Shared<O> {
    fn new() -> Arc<Self> {
        Arc::new(Shared {
            mailbox: Mailbox::new(),
            external_refs: AtomicUsize::new(1),
            state: AtomicU8::new(CONSTRUCTED),
        })
    }

    pub(crate) fn enqueue_dispatch<T: Send + 'static>(
        &self,
        handler: fn(&mut O, T, &mut Context<'_, O>),
        value: T,
    ) {
        if self.mailbox.is_closed() {
            tracing::debug!("active object is closed; dropping a message");
            return;
        }
        self.mailbox
            .push(Envelope::Dispatch(Box::new(move |obj, ctx| {
                handler(obj, value, ctx)
            })));
    }

    pub(crate) fn enqueue_timer_op(&self, op: Box<dyn FnOnce(&mut TimerSet<O>) + Send>) {
        if self.mailbox.is_closed() {
            return;
        }
        self.mailbox.push(Envelope::TimerOp(op));
    }

    pub(crate) fn request_stop(&self) {
        self.state
            .compare_exchange(STARTED, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .ok();
        self.mailbox.push(Envelope::Stop);
    }
}

/// An external, reference-counted handle to an active object. Clients interact with
/// the object solely by sending values through a handle — never by touching `O`
/// directly.
pub struct ActiveHandle<O: ActiveObject> {
    shared: Arc<Shared<O>>,
}

impl<O: ActiveObject> ActiveHandle<O> {
    pub(crate) fn from_shared(shared: Arc<Shared<O>>) -> Self {
        shared.external_refs.fetch_add(1, Ordering::AcqRel);
        ActiveHandle { shared }
    }

    /// Enqueue `value` for dispatch. `O` must declare a handler for `T` via
    /// `Handles<T>`; this is a compile-time requirement, not a runtime check.
    pub fn send<T>(&self, value: T) -> ActiveObjectResult<()>
    where
        O: Handles<T>,
        T: Send + 'static,
    {
        if self.shared.mailbox.is_closed() {
            return Err(ActiveObjectError::Closed);
        }
        self.shared
            .enqueue_dispatch(<O as Handles<T>>::handle, value);
        Ok(())
    }

    /// Start (or replace) a timer keyed by `(type(value), value)` from outside the
    /// worker thread. Routed through the mailbox as a control envelope; takes effect
    /// at the worker's next drain.
    pub fn timer_start<T>(&self, value: T, period: Duration, cycle: Cycle)
    where
        O: Handles<T>,
        T: Clone + PartialEq + Send + 'static,
    {
        self.shared
            .enqueue_timer_op(Box::new(move |timers| timers.start(value, period, cycle)));
    }

    /// Stop the timer keyed by `(type(value), value)` from outside the worker thread.
    /// Unknown keys are a silent no-op.
    pub fn timer_stop<T>(&self, value: T)
    where
        T: PartialEq + Send + 'static,
    {
        self.shared
            .enqueue_timer_op(Box::new(move |timers| timers.stop(&value)));
    }

    /// Request a graceful stop. Idempotent and safe to call from any thread.
    pub fn stop(&self) {
        self.shared.request_stop();
    }
}

impl<O: ActiveObject> Clone for ActiveHandle<O> {
    fn clone(&self) -> Self {
        ActiveHandle::from_shared(Arc::clone(&self.shared))
    }
}

impl<O: ActiveObject> Drop for ActiveHandle<O> {
    fn drop(&mut self) {
        if self.shared.external_refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last external interest in this object just went away: close the
            // mailbox so a blocked worker wakes and observes `Stopped` without
            // needing any further external action.
            self.shared.mailbox.close();
        }
    }
}

/// Spawn `object`'s dedicated worker thread and return a handle to it.
///
/// The worker thread is spawned with `name` for diagnostics; `on_start` runs on the
/// worker thread before this call returns control to dispatching messages.
pub fn create<O: ActiveObject>(object: O) -> ActiveObjectResult<ActiveHandle<O>> {
    create_named(object, "active-object")
}

/// Like [`create`], but names the worker thread for diagnostics/`tracing` spans and OS
/// thread listings.
pub fn create_named<O: ActiveObject>(
    object: O,
    name: impl Into<String>,
) -> ActiveObjectResult<ActiveHandle<O>> {
    let shared = Shared::new();
    let worker_shared = Arc::clone(&shared);

    thread::Builder::new()
        .name(name.into())
        .spawn(move || worker_loop(object, worker_shared))
        .map_err(ActiveObjectError::Spawn)?;

    shared.state.store(STARTED, Ordering::Release);
    Ok(ActiveHandle { shared })
}

/// Run `object` on the calling thread, reusing it as the worker thread. Returns when
/// the object stops (`0` on a normal, `stop()`-driven shutdown).
///
/// A handler panic unwinds out of this call rather than being translated into a
/// non-zero return, matching §7's "propagates ... and terminates the worker" policy.
pub fn run<O: ActiveObject>(object: O) -> i32 {
    let shared = Shared::new();
    shared.state.store(STARTED, Ordering::Release);
    worker_loop(object, shared);
    0
}

/// Runs `on_stop` and marks the object stopped. Called exactly once per worker, either
/// at normal shutdown or (also) right before a caught panic is resumed.
fn teardown<O: ActiveObject>(object: &mut O, shared: &Arc<Shared<O>>) {
    shared.state.store(STOPPING, Ordering::Release);
    shared.mailbox.close();
    object.on_stop();
    shared.state.store(STOPPED, Ordering::Release);
}

fn worker_loop<O: ActiveObject>(mut object: O, shared: Arc<Shared<O>>) {
    tracing::debug!("active object worker starting");
    let mut timers = TimerSet::new();

    let start_result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = Context::new(&shared, &mut timers);
        object.on_start(&mut ctx);
    }));
    if let Err(payload) = start_result {
        teardown(&mut object, &shared);
        panic::resume_unwind(payload);
    }

    loop {
        let deadline = timers.next_deadline();
        let dispatch_result = match shared.mailbox.dequeue_wait(deadline) {
            Recv::Message(Envelope::Stop) => break,
            Recv::Message(Envelope::Dispatch(thunk)) => panic::catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = Context::new(&shared, &mut timers);
                thunk(&mut object, &mut ctx);
            })),
            Recv::Message(Envelope::TimerOp(op)) => {
                op(&mut timers);
                continue;
            }
            Recv::TimedOut => panic::catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = Context::new(&shared, &mut timers);
                timers.fire_due(&mut object, &mut ctx);
            })),
            Recv::Stopped => break,
        };
        if let Err(payload) = dispatch_result {
            teardown(&mut object, &shared);
            panic::resume_unwind(payload);
        }
    }

    teardown(&mut object, &shared);
    tracing::debug!("active object worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Echo {
        out: mpsc::Sender<i32>,
    }

    impl ActiveObject for Echo {}

    impl Handles<i32> for Echo {
        fn handle(&mut self, msg: i32, _ctx: &mut Context<'_, Self>) {
            let _ = self.out.send(msg);
        }
    }

    #[test]
    fn send_is_delivered_in_order() {
        let (tx, rx) = mpsc::channel();
        let handle = create(Echo { out: tx }).unwrap();
        handle.send(1).unwrap();
        handle.send(2).unwrap();
        handle.send(3).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(1));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(2));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(3));
        handle.stop();
    }

    #[test]
    fn dropping_last_handle_stops_the_worker() {
        let (tx, rx) = mpsc::channel::<i32>();
        let handle = create(Echo { out: tx }).unwrap();
        drop(handle);
        // The worker should close out promptly; there is nothing left to receive.
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }

    #[test]
    fn send_after_stop_is_reported_as_closed() {
        let (tx, _rx) = mpsc::channel();
        let handle = create(Echo { out: tx }).unwrap();
        handle.stop();
        std::thread::sleep(Duration::from_millis(50));
        match handle.send(1) {
            Err(ActiveObjectError::Closed) => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }
}
