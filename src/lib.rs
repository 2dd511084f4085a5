//! `active_object` — the concurrency substrate for binding a dedicated worker thread
//! to an object instance and delivering typed messages to it asynchronously.
//!
//! A subclass implements [`ActiveObject`] plus one [`Handles<T>`] impl per message type
//! it accepts. [`create`] spawns a worker thread and hands back an [`ActiveHandle`];
//! [`run`] does the same but reuses the calling thread as the worker (for top-level
//! application objects). Clients interact with the object solely through a handle:
//! `handle.send(value)`, `handle.stop()`, `handle.timer_start(value, period, cycle)`.
//! Handlers running on the worker thread additionally get a [`Context`], which exposes
//! the same timer operations plus [`Context::callback`] for minting a
//! [`Callback`] token another object can invoke without knowing this object's
//! concrete type.
//!
//! See `SPEC_FULL.md` for the full design rationale, including the deliberate
//! departures from the C++ source this core is modeled on.
#![forbid(unsafe_op_in_unsafe_fn)]

mod callback;
mod context;
mod error;
mod handle;
mod mailbox;
mod timer;

pub use callback::Callback;
pub use context::{ActiveObject, Context, Handles};
pub use error::{ActiveObjectError, ActiveObjectResult};
pub use handle::{create, create_named, run, ActiveHandle};
pub use timer::Cycle;
