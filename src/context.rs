//! The subclass-facing vocabulary: `ActiveObject`, `Handles<T>`, and the `Context`
//! handed to every hook/handler invocation on the worker thread.

use std::sync::Arc;
use std::time::Duration;

use crate::callback::Callback;
use crate::handle::{ActiveHandle, Shared};
use crate::timer::{Cycle, TimerSet};

/// Implemented by every active-object subclass.
///
/// `on_start`/`on_stop` are optional hooks; the default implementations do nothing.
pub trait ActiveObject: Send + 'static {
    /// Runs once, on the worker thread, before the first message is dispatched.
    fn on_start(&mut self, _ctx: &mut Context<'_, Self>)
    where
        Self: Sized,
    {
    }

    /// Runs once, on the worker thread, after the object has stopped accepting
    /// messages and before the worker thread exits. Does not receive a `Context`: by
    /// the time this runs via the "last handle dropped" path, the shared control
    /// block backing one may already be gone (see `SPEC_FULL.md` REDESIGN FLAGS).
    fn on_stop(&mut self) {}
}

/// Declares that `Self` accepts messages of type `T`.
///
/// `send::<T>` on a handle is only well-formed when this trait is implemented for the
/// pair — there is no runtime dispatch table and no default handler.
pub trait Handles<T>: ActiveObject {
    fn handle(&mut self, msg: T, ctx: &mut Context<'_, Self>)
    where
        Self: Sized;
}

/// Passed to every hook/handler invocation on the worker thread. Provides the
/// capabilities a C++ active object would reach via `this`: starting/stopping timers,
/// minting callback tokens, sending to self, and requesting a stop.
pub struct Context<'a, O: ActiveObject> {
    pub(crate) shared: &'a Arc<Shared<O>>,
    pub(crate) timers: &'a mut TimerSet<O>,
}

impl<'a, O: ActiveObject> Context<'a, O> {
    pub(crate) fn new(shared: &'a Arc<Shared<O>>, timers: &'a mut TimerSet<O>) -> Self {
        Context { shared, timers }
    }

    /// Mint a new external handle to this object (reference-counted; keeps the
    /// object's mailbox alive as long as it is held).
    pub fn handle(&self) -> ActiveHandle<O> {
        ActiveHandle::from_shared(Arc::clone(self.shared))
    }

    /// Start (or replace) a timer keyed by `(type(value), value)`.
    pub fn timer_start<T>(&mut self, value: T, period: Duration, cycle: Cycle)
    where
        O: Handles<T>,
        T: Clone + PartialEq + Send + 'static,
    {
        self.timers.start(value, period, cycle);
    }

    /// Stop the timer keyed by `(type(value), value)`. Unknown keys are a silent
    /// no-op.
    pub fn timer_stop<T>(&mut self, value: &T)
    where
        T: PartialEq + Send + 'static,
    {
        self.timers.stop(value);
    }

    /// Mint a callback token bound to `O::handle::<T>`. The token never keeps this
    /// object alive; invoking it after this object has been torn down is a silent
    /// no-op.
    pub fn callback<T>(&self) -> Callback<O, T>
    where
        O: Handles<T>,
        T: Send + 'static,
    {
        Callback::new(Arc::downgrade(self.shared), <O as Handles<T>>::handle)
    }

    /// Request a graceful stop. Idempotent; safe to call from the worker thread
    /// itself (takes effect at the next dispatch boundary, after the handler that
    /// called it returns).
    pub fn stop(&self) {
        self.shared.request_stop();
    }
}
