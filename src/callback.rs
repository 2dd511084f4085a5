//! Callback tokens: a non-owning, invocable reference to a typed handler on a specific
//! active object, usable by any party without knowing the object's concrete type.

use std::sync::Weak;

use crate::context::{ActiveObject, Context, Handles};
use crate::handle::Shared;

/// A weak reference to an active object plus the handler to invoke on it.
///
/// Cheap to clone, freely shareable across threads, and never extends the target's
/// lifetime: invoking a token whose target has already been torn down is a silent
/// no-op, never undefined behavior.
pub struct Callback<O: ActiveObject, T> {
    target: Weak<Shared<O>>,
    handler: fn(&mut O, T, &mut Context<'_, O>),
}

impl<O: ActiveObject, T> Callback<O, T> {
    pub(crate) fn new(target: Weak<Shared<O>>, handler: fn(&mut O, T, &mut Context<'_, O>)) -> Self {
        Callback { target, handler }
    }
}

impl<O, T> Callback<O, T>
where
    O: Handles<T>,
    T: Send + 'static,
{
    /// Invoke this token with `value`. If the target has been destroyed, this is a
    /// silent no-op.
    pub fn invoke(&self, value: T) {
        if let Some(shared) = self.target.upgrade() {
            shared.enqueue_dispatch(self.handler, value);
        }
    }
}

impl<O: ActiveObject, T> Clone for Callback<O, T> {
    fn clone(&self) -> Self {
        Callback {
            target: self.target.clone(),
            handler: self.handler,
        }
    }
}

// `Send + Sync` fall out automatically: `target` is a `Weak<Shared<O>>` (no `O` stored
// inline — see `handle.rs`) and `handler` is a plain `fn` pointer, both of which are
// `Send + Sync` independent of `T`.
